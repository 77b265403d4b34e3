//! Hierarchical matrix-vector multiply: up-sweep (charge aggregation),
//! apply (link coefficient contraction), down-sweep (potential
//! distribution). The three phases together compute, for every leaf, the
//! potential induced by every other leaf's charge without ever forming the
//! dense interaction matrix.
//!
//! Charge and potential are tracked as real/imaginary pairs directly on
//! [`Element`] rather than as `Complex64`. Link coefficients are always real
//! (`kernel.potential(...).re`, see `capx_links::generator`), so applying one
//! to a `(re, im)` pair is just the same real scalar multiplying both
//! components - exactly the off-diagonal `R` block of the complex-permittivity
//! operator `[R -C; C R]` applied to both halves of the charge vector at
//! once. Only the self-potential diagonal carries an imaginary part (the
//! dielectric contrast `C`), and an ordinary complex multiply there produces
//! exactly the diagonal `C` term the block form calls for. So one pass over
//! complex-valued scratch fields is equivalent to running the block operator
//! on two real vectors, without ever materializing the second vector.

use rayon::prelude::*;

use capx_core::{ElementId, Tree};
use capx_hierarchy::PotentialKernel;
use capx_links::{LinkBuildResult, LinkEntry};

/// Self-potential (diagonal) coefficient for every element, indexed by
/// [`ElementId::index`]. Only leaf slots are meaningful; super-nodes are
/// never read during the up-sweep's seeding step.
pub struct SelfPotentials {
    pub re: Vec<f64>,
    pub im: Vec<f64>,
}

/// Evaluate `kernel.potential(leaf, leaf)` for every leaf reachable from
/// `roots`, sized to the whole arena so it can be indexed directly by
/// [`ElementId`].
#[must_use]
pub fn compute_self_potentials<K: PotentialKernel>(
    tree: &Tree,
    kernel: &K,
    roots: &[ElementId],
) -> SelfPotentials {
    let mut re = vec![0.0; tree.len()];
    let mut im = vec![0.0; tree.len()];
    for &root in roots {
        for leaf in tree.leaves_under(root) {
            let elem = tree.get(leaf);
            let p = kernel.potential(elem, elem);
            re[leaf.index()] = p.re;
            im[leaf.index()] = p.im;
        }
    }
    SelfPotentials { re, im }
}

/// Borrowed view over a [`LinkBuildResult`], letting the apply phase look up
/// one row's links by binary search over the sorted span table.
pub struct RowLinks<'a> {
    spans: &'a [(ElementId, u32, u32)],
    entries: &'a [LinkEntry],
}

impl<'a> RowLinks<'a> {
    #[must_use]
    pub fn new(result: &'a LinkBuildResult) -> Self {
        Self { spans: &result.spans, entries: &result.entries }
    }

    /// Links recorded against `id`'s row, or an empty slice if it has none.
    #[must_use]
    pub fn get(&self, id: ElementId) -> &'a [LinkEntry] {
        match self.spans.binary_search_by_key(&id, |&(row, _, _)| row) {
            Ok(idx) => {
                let (_, start, end) = self.spans[idx];
                &self.entries[start as usize..end as usize]
            }
            Err(_) => &[],
        }
    }
}

/// Post-order charge aggregation: seed every leaf's potential from its
/// self-coefficient and the charge just written into it, then fold each
/// super-node's children's charge up into the parent (leaving the parent's
/// own potential at zero, since super-nodes are never link targets).
///
/// Same explicit-stack shape as [`Tree::walk_post_order`], reimplemented here
/// rather than reused because this walk needs `get_mut` per node, which a
/// read-only visitor closure cannot provide.
pub fn up_sweep(tree: &mut Tree, root: ElementId, self_pot: &SelfPotentials) {
    let mut stack: Vec<(ElementId, u8)> = vec![(root, 0)];
    while let Some((id, state)) = stack.pop() {
        let children = tree.get(id).children;
        match (state, children) {
            (0, Some((left, right))) => {
                stack.push((id, 1));
                stack.push((right, 0));
                stack.push((left, 0));
            }
            (1, Some((left, right))) => {
                let (lc_re, lc_im) = {
                    let l = tree.get(left);
                    (l.charge_re, l.charge_im)
                };
                let (rc_re, rc_im) = {
                    let r = tree.get(right);
                    (r.charge_re, r.charge_im)
                };
                let node = tree.get_mut(id);
                node.charge_re = lc_re + rc_re;
                node.charge_im = lc_im + rc_im;
                node.potential_re = 0.0;
                node.potential_im = 0.0;
            }
            _ => {
                let s_re = self_pot.re[id.index()];
                let s_im = self_pot.im[id.index()];
                let node = tree.get_mut(id);
                let q_re = node.charge_re;
                let q_im = node.charge_im;
                node.potential_re = s_re * q_re - s_im * q_im;
                node.potential_im = s_re * q_im + s_im * q_re;
            }
        }
    }
}

/// Contract every row's links against its peers' charges and add the result
/// into that row's potential. Split into a read-only parallel pass (each row
/// reads arbitrary other rows' charges) followed by a sequential write-back,
/// since writing directly during the parallel pass would need every row to
/// hold a mutable borrow of the same tree at once.
pub fn apply(tree: &mut Tree, rows: &RowLinks<'_>, all_ids: &[ElementId]) {
    let deltas: Vec<(f64, f64)> = all_ids
        .par_iter()
        .map(|&id| {
            let mut d_re = 0.0;
            let mut d_im = 0.0;
            for link in rows.get(id) {
                let peer = tree.get(link.peer);
                d_re += link.coefficient * peer.charge_re;
                d_im += link.coefficient * peer.charge_im;
            }
            (d_re, d_im)
        })
        .collect();

    for (&id, &(d_re, d_im)) in all_ids.iter().zip(deltas.iter()) {
        let node = tree.get_mut(id);
        node.potential_re += d_re;
        node.potential_im += d_im;
    }
}

/// Pre-order potential distribution: push each super-node's accumulated
/// potential down into both children before descending, and record every
/// leaf's final potential into the output vectors.
pub fn down_sweep(tree: &mut Tree, root: ElementId, v_re: &mut [f64], v_im: &mut [f64]) {
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        let (children, p_re, p_im) = {
            let elem = tree.get(id);
            (elem.children, elem.potential_re, elem.potential_im)
        };
        match children {
            Some((left, right)) => {
                for child in [left, right] {
                    let c = tree.get_mut(child);
                    c.potential_re += p_re;
                    c.potential_im += p_im;
                }
                stack.push(right);
                stack.push(left);
            }
            None => {
                v_re[id.index()] = p_re;
                v_im[id.index()] = p_im;
            }
        }
    }
}

/// Full hierarchical multiply: write `q` into every leaf's charge, fold
/// charge up each root's hierarchy, contract links once across the whole
/// arena, then push potential back down each hierarchy. Returns `v_re`/`v_im`
/// sized to the whole arena (only leaf slots are meaningful).
pub fn multiply(
    tree: &mut Tree,
    roots: &[ElementId],
    self_pot: &SelfPotentials,
    rows: &RowLinks<'_>,
    all_ids: &[ElementId],
    q_re: &[f64],
    q_im: Option<&[f64]>,
) -> (Vec<f64>, Vec<f64>) {
    for &root in roots {
        for leaf in tree.leaves_under(root) {
            let node = tree.get_mut(leaf);
            node.charge_re = q_re[leaf.index()];
            node.charge_im = q_im.map_or(0.0, |im| im[leaf.index()]);
        }
    }

    for &root in roots {
        up_sweep(tree, root, self_pot);
    }

    apply(tree, rows, all_ids);

    let mut v_re = vec![0.0; tree.len()];
    let mut v_im = vec![0.0; tree.len()];
    for &root in roots {
        down_sweep(tree, root, &mut v_re, &mut v_im);
    }

    (v_re, v_im)
}

/// Apply the 2D charge-neutrality row substitution for one conductor's
/// hierarchy: the last leaf's potential row is replaced by `scale` times the
/// conductor's total charge, and that new value is subtracted back out of
/// every other leaf's potential, matching the floating reference-row
/// convention 2D problems use in place of a normal self-potential.
pub fn apply_2d_charge_neutrality(
    tree: &Tree,
    root: ElementId,
    v_re: &mut [f64],
    v_im: &mut [f64],
    scale: f64,
) {
    let leaves = tree.leaves_under(root);
    let Some(&last) = leaves.last() else { return };

    let (sum_re, sum_im) = leaves.iter().fold((0.0, 0.0), |(re, im), &id| {
        let elem = tree.get(id);
        (re + elem.charge_re, im + elem.charge_im)
    });

    let new_re = scale * sum_re;
    let new_im = scale * sum_im;
    v_re[last.index()] = new_re;
    v_im[last.index()] = new_im;

    for &id in &leaves {
        if id == last {
            continue;
        }
        v_re[id.index()] -= new_re;
        v_im[id.index()] -= new_im;
    }
}
