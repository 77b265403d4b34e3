//! Shared machinery for the two dense preconditioners (`super_precond`,
//! `hierarchical`): picking a coarse set of tree nodes, building the dense
//! interaction matrix between them, and gathering/scattering leaf charge to
//! and from that coarse set.

use nalgebra::DMatrix;
use num_complex::Complex64;

use capx_core::{ElementId, Tree};
use capx_hierarchy::PotentialKernel;

/// Greedily descend from `roots` one tree level at a time, stopping at the
/// last frontier that both fits within `cap` and still has room to split
/// further without exceeding it. Approximates "the tree-cut depth `d` such
/// that the node count at depth `d` is at most `cap`" without requiring a
/// uniform depth across conductors of different sizes.
#[must_use]
pub fn select_cut_nodes(tree: &Tree, roots: &[ElementId], cap: usize) -> Vec<ElementId> {
    let mut frontier: Vec<ElementId> = roots.to_vec();
    loop {
        if frontier.len() > cap {
            return frontier;
        }
        let mut next = Vec::with_capacity(frontier.len() * 2);
        let mut could_split = false;
        for &id in &frontier {
            match tree.get(id).children {
                Some((left, right)) => {
                    next.push(left);
                    next.push(right);
                    could_split = true;
                }
                None => next.push(id),
            }
        }
        if !could_split || next.len() > cap {
            return frontier;
        }
        frontier = next;
    }
}

/// Per-leaf placement within the coarse node set: which coarse node owns it
/// and what fraction of that node's total measure the leaf contributes.
pub struct LeafPlacement {
    pub owner: Vec<usize>,
    pub weight: Vec<f64>,
}

/// Assign every leaf under `nodes` to its owning coarse node (by position in
/// `nodes`) and compute its area-fraction weight within that node.
#[must_use]
pub fn place_leaves(tree: &Tree, nodes: &[ElementId]) -> LeafPlacement {
    let mut owner = vec![usize::MAX; tree.len()];
    let mut weight = vec![0.0; tree.len()];
    for (idx, &node) in nodes.iter().enumerate() {
        let node_measure = tree.get(node).dimension.max(f64::MIN_POSITIVE);
        for leaf in tree.leaves_under(node) {
            owner[leaf.index()] = idx;
            weight[leaf.index()] = tree.get(leaf).dimension / node_measure;
        }
    }
    LeafPlacement { owner, weight }
}

/// Build the dense interaction matrix between `nodes`: off-diagonal entries
/// are the kernel's real potential estimate, the diagonal is the (possibly
/// complex) self-potential, matching the same convention the link generator
/// uses (`kernel.potential(peer, row)`).
#[must_use]
pub fn build_dense_matrix<K: PotentialKernel>(
    tree: &Tree,
    kernel: &K,
    nodes: &[ElementId],
) -> DMatrix<Complex64> {
    let n = nodes.len();
    let mut matrix = DMatrix::<Complex64>::from_element(n, n, Complex64::new(0.0, 0.0));
    for row in 0..n {
        let row_elem = tree.get(nodes[row]);
        for col in 0..n {
            if row == col {
                matrix[(row, col)] = kernel.potential(row_elem, row_elem);
            } else {
                let peer_elem = tree.get(nodes[col]);
                matrix[(row, col)] = Complex64::new(kernel.potential(peer_elem, row_elem).re, 0.0);
            }
        }
    }
    matrix
}

/// Per-leaf complex charge gathered into its owning coarse node, summed over
/// every leaf that node owns.
#[must_use]
pub fn gather(
    placement: &LeafPlacement,
    leaves: &[ElementId],
    n_nodes: usize,
    q_re: &[f64],
    q_im: Option<&[f64]>,
) -> Vec<Complex64> {
    let mut gathered = vec![Complex64::new(0.0, 0.0); n_nodes];
    for &leaf in leaves {
        let idx = leaf.index();
        let owner = placement.owner[idx];
        if owner == usize::MAX {
            continue;
        }
        let q = Complex64::new(q_re[idx], q_im.map_or(0.0, |im| im[idx]));
        gathered[owner] += q * placement.weight[idx];
    }
    gathered
}

/// Scatter a coarse-node solution vector back to leaves, weighted by each
/// leaf's area fraction within its owner, adding into `v_re`/`v_im`.
pub fn scatter(
    placement: &LeafPlacement,
    leaves: &[ElementId],
    solved: &nalgebra::DVector<Complex64>,
    v_re: &mut [f64],
    v_im: &mut [f64],
) {
    for &leaf in leaves {
        let idx = leaf.index();
        let owner = placement.owner[idx];
        if owner == usize::MAX {
            continue;
        }
        let contribution = solved[owner] * placement.weight[idx];
        v_re[idx] += contribution.re;
        v_im[idx] += contribution.im;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capx_core::{Element, Panel, Triangle};
    use capx_hierarchy::{build_super_hierarchy, AxisCount};
    use nalgebra::Vector3;

    fn tri_leaf(tree: &mut Tree, centroid: Vector3<f64>, half: f64) -> ElementId {
        let t = Triangle::new([
            centroid - Vector3::new(half, 0.0, 0.0),
            centroid + Vector3::new(half, 0.0, 0.0),
            centroid + Vector3::new(0.0, half, 0.0),
        ]);
        tree.push(Element::leaf_from_panel(Panel::Triangle3D(t), 0, None))
    }

    #[test]
    fn select_cut_nodes_stops_before_exceeding_cap() {
        let mut tree = Tree::new();
        let mut leaves = Vec::new();
        for i in 0..8 {
            leaves.push(tri_leaf(&mut tree, Vector3::new(f64::from(i), 0.0, 0.0), 0.1));
        }
        let root = build_super_hierarchy(&mut tree, leaves, AxisCount::Three);

        let nodes = select_cut_nodes(&tree, &[root], 4);
        assert!(nodes.len() <= 4);
        assert!(nodes.len() > 1);
    }

    #[test]
    fn place_leaves_assigns_every_leaf_to_an_owner() {
        let mut tree = Tree::new();
        let mut leaves = Vec::new();
        for i in 0..4 {
            leaves.push(tri_leaf(&mut tree, Vector3::new(f64::from(i), 0.0, 0.0), 0.1));
        }
        let root = build_super_hierarchy(&mut tree, leaves.clone(), AxisCount::Three);
        let nodes = select_cut_nodes(&tree, &[root], 2);
        let placement = place_leaves(&tree, &nodes);

        for leaf in &leaves {
            assert_ne!(placement.owner[leaf.index()], usize::MAX);
            assert!(placement.weight[leaf.index()] > 0.0);
        }
    }
}
