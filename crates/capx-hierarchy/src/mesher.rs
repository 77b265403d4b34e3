//! Adaptive mesh refinement: curvature/proximity-driven splitting during the
//! geometry pass, and charge-driven splitting on a second pass once a first
//! solve has produced charge estimates.

use capx_core::{Element, ElementId, Error, RunContext, Tree, WarningKind};

use crate::kernel::PotentialKernel;

/// Tunables for one refinement pass, the Rust analogue of the relevant
/// fields of the original tool's global config struct.
#[derive(Clone, Copy, Debug)]
pub struct MesherConfig {
    pub mesh_eps: f64,
    pub mesh_curv_coeff: f64,
    pub max_levels: u32,
}

impl Default for MesherConfig {
    fn default() -> Self {
        Self {
            mesh_eps: 0.05,
            mesh_curv_coeff: 1.1,
            max_levels: 6,
        }
    }
}

/// Curvature coefficient for a same-conductor pair: parallel panels
/// (`n_a . n_b` near +1) are treated as farther apart than anti-parallel
/// ones (near -1), producing finer meshing at sharp edges.
fn curv_coeff(mesh_curv_coeff: f64, a: &Element, b: &Element) -> f64 {
    let dot = a.geo_normal.dot(&b.geo_normal);
    (mesh_curv_coeff - 1.0) * (dot + 1.0) + 1.0
}

/// `true` if the pair `(a, b)` needs further subdivision against
/// `threshold`, along with the ratio that was compared against it. Shared by
/// the mesher (`threshold = mesh_eps`) and the link generator's accepted-pair
/// predicate (`threshold = eps`, the tighter solve tolerance); `same_conductor`
/// enables the curvature weighting, cross-conductor pairs use a coefficient
/// of 1.
pub fn refine_criteria<K: PotentialKernel>(
    kernel: &K,
    mesh_curv_coeff: f64,
    threshold: f64,
    a: &Element,
    b: &Element,
    same_conductor: bool,
    global_max_measure: f64,
) -> (bool, f64) {
    if global_max_measure <= 0.0 {
        return (false, 0.0);
    }
    let coeff = if same_conductor {
        curv_coeff(mesh_curv_coeff, a, b)
    } else {
        1.0
    };

    let p_ab = kernel.potential(a, b).re;
    let p_ba = kernel.potential(b, a).re;

    let ratio_ab = (p_ab * b.dimension / (global_max_measure * coeff)).abs();
    let ratio_ba = (p_ba * a.dimension / (global_max_measure * coeff)).abs();
    let worst = ratio_ab.max(ratio_ba);
    (worst > threshold, worst)
}

/// Unconditionally subdivide any root that is still a bare leaf, so the
/// mutual-refinement pass always has at least two elements per conductor to
/// compare.
pub fn seed_singleton_roots(tree: &mut Tree, roots: &[ElementId]) {
    for &root in roots {
        if tree.get(root).is_leaf() {
            tree.subdivide_leaf(root);
        }
    }
}

struct PairWork {
    a: ElementId,
    b: ElementId,
    level: u32,
}

/// Run the curvature/proximity refinement pass over every unordered pair of
/// conductor roots (including self-pairs), returning the largest
/// below-threshold ratio observed — the `max_mesh_eps` the auto-loop uses to
/// pick the next target.
///
/// # Errors
/// Returns [`Error::Cancelled`] if `ctx` is cancelled mid-pass.
pub fn run_curvature_pass<K: PotentialKernel>(
    tree: &mut Tree,
    kernel: &K,
    ctx: &RunContext,
    roots: &[ElementId],
    cfg: &MesherConfig,
) -> Result<f64, Error> {
    seed_singleton_roots(tree, roots);

    let global_max_measure = roots
        .iter()
        .map(|&r| tree.get(r).dimension)
        .fold(0.0_f64, f64::max);

    let mut max_accepted_eps = 0.0_f64;

    for i in 0..roots.len() {
        for j in i..roots.len() {
            if ctx.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let same = i == j;
            refine_pair(
                tree,
                kernel,
                ctx,
                cfg,
                roots[i],
                roots[j],
                same,
                global_max_measure,
                &mut max_accepted_eps,
            )?;
        }
    }

    Ok(max_accepted_eps)
}

/// Explicit work-stack pairwise refinement for one root pair: whenever
/// `refine_criteria` triggers, the larger of the two elements is subdivided
/// and its two children replace it in the work list; otherwise the pair's
/// ratio is folded into `max_accepted_eps` and the pair is dropped.
fn refine_pair<K: PotentialKernel>(
    tree: &mut Tree,
    kernel: &K,
    ctx: &RunContext,
    cfg: &MesherConfig,
    a: ElementId,
    b: ElementId,
    same_conductor: bool,
    global_max_measure: f64,
    max_accepted_eps: &mut f64,
) -> Result<(), Error> {
    let mut stack = vec![PairWork { a, b, level: 0 }];

    while let Some(PairWork { a, b, level }) = stack.pop() {
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if same_conductor && a == b && tree.get(a).is_leaf() {
            // A leaf's self-pair contributes no mutual refinement signal.
            continue;
        }

        let (exceeds, ratio) = {
            let ea = tree.get(a);
            let eb = tree.get(b);
            refine_criteria(
                kernel,
                cfg.mesh_curv_coeff,
                cfg.mesh_eps,
                ea,
                eb,
                same_conductor,
                global_max_measure,
            )
        };

        if !exceeds {
            *max_accepted_eps = max_accepted_eps.max(ratio);
            continue;
        }

        if level >= cfg.max_levels {
            ctx.warn_once(
                WarningKind::RefinementLimitReached,
                "mesh refinement hit the configured depth limit before converging",
            );
            continue;
        }

        let a_bigger = tree.get(a).dimension >= tree.get(b).dimension;
        let splittable = if a_bigger {
            tree.get(a).is_leaf()
        } else {
            tree.get(b).is_leaf()
        };

        if !splittable {
            // The larger side is already a super-node (from an earlier
            // split); descend into its children instead of re-splitting.
            let (left, right) = if a_bigger {
                tree.get(a).children.expect("non-leaf has children")
            } else {
                tree.get(b).children.expect("non-leaf has children")
            };
            if a_bigger {
                stack.push(PairWork { a: left, b, level: level + 1 });
                stack.push(PairWork { a: right, b, level: level + 1 });
            } else {
                stack.push(PairWork { a, b: left, level: level + 1 });
                stack.push(PairWork { a, b: right, level: level + 1 });
            }
            continue;
        }

        if a_bigger {
            let (left, right) = tree.subdivide_leaf(a);
            stack.push(PairWork { a: left, b, level: level + 1 });
            stack.push(PairWork { a: right, b, level: level + 1 });
        } else {
            let (left, right) = tree.subdivide_leaf(b);
            stack.push(PairWork { a, b: left, level: level + 1 });
            stack.push(PairWork { a, b: right, level: level + 1 });
        }
    }

    Ok(())
}

/// Charge-driven second pass: split any leaf under `roots` whose `max_side`
/// exceeds `max_side_cap` and whose charge density exceeds the midpoint
/// between the run's observed minimum and maximum densities.
pub fn run_charge_driven_pass(
    tree: &mut Tree,
    roots: &[ElementId],
    max_side_cap: f64,
) -> usize {
    let mut leaves = Vec::new();
    for &root in roots {
        leaves.extend(tree.leaves_under(root));
    }

    let densities: Vec<f64> = leaves
        .iter()
        .map(|&id| {
            let e = tree.get(id);
            let charge = (e.charge_re.powi(2) + e.charge_im.powi(2)).sqrt();
            if e.dimension > 0.0 {
                charge / e.dimension
            } else {
                0.0
            }
        })
        .collect();

    if densities.is_empty() {
        return 0;
    }
    let min_density = densities.iter().copied().fold(f64::INFINITY, f64::min);
    let max_density = densities.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let midpoint = 0.5 * (min_density + max_density);

    let mut split_count = 0;
    for (id, density) in leaves.into_iter().zip(densities) {
        let max_side = tree.get(id).max_side;
        if max_side > max_side_cap && density > midpoint {
            tree.subdivide_leaf(id);
            split_count += 1;
        }
    }
    split_count
}
