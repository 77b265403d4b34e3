//! Top-level capacitance solver: wires mesh refinement, link generation,
//! preconditioner selection and GMRES into one entry point per outer
//! iteration, and assembles the resulting charge distribution into a
//! capacitance matrix.

use capx_core::{
    Conductor, ConductorRegistry, ElementId, Error, PreconditionerKind, RunContext, SolverConfig,
    Tree,
};
use capx_hierarchy::PotentialKernel;
use capx_links::{generate_links, LinkBuildResult, LinkGenConfig};
use capx_matvec::{compute_self_potentials, RowLinks};
use capx_precond::{
    auto_select, BlockPreconditioner, HierarchicalPreconditioner, JacobiPreconditioner,
    NoPreconditioner, Preconditioner, SuperPreconditioner, DEFAULT_BLOCK_SIZE,
    DEFAULT_COARSE_DIM, DEFAULT_INNER_MAX_ITER, DEFAULT_INNER_TOLERANCE, DEFAULT_SUPER_PRE_DIM,
};

use crate::autoloop::{run_auto_loop, AutoLoopResult};
use crate::gmres::{gmres_solve, GmresOutcome};

/// Result of one mesh-fixed solve: the capacitance matrix and the GMRES
/// outcome for every right-hand side (one per true conductor).
pub struct SolveOutcome {
    pub matrix: Vec<Vec<f64>>,
    pub gmres_outcomes: Vec<GmresOutcome>,
}

/// Rows that need a potential delta applied: every row the link generator
/// produced a span for, plus every leaf (so leaves with no links still get a
/// well-defined, self-potential-only row in the multiply).
fn build_all_ids(tree: &Tree, roots: &[ElementId], links: &LinkBuildResult) -> Vec<ElementId> {
    let mut ids: Vec<ElementId> = links.spans.iter().map(|&(id, _, _)| id).collect();
    for &root in roots {
        ids.extend(tree.leaves_under(root));
    }
    ids.sort_by_key(|arg0: &ElementId| ElementId::index(*arg0));
    ids.dedup();
    ids
}

fn build_preconditioner<K: PotentialKernel>(
    tree: &Tree,
    kernel: &K,
    roots: &[ElementId],
    kind: PreconditionerKind,
) -> Box<dyn Preconditioner> {
    match kind {
        PreconditionerKind::None => Box::new(NoPreconditioner),
        PreconditionerKind::Jacobi => Box::new(JacobiPreconditioner::build(tree, kernel, roots)),
        PreconditionerKind::Block => {
            Box::new(BlockPreconditioner::build(tree, kernel, roots, DEFAULT_BLOCK_SIZE))
        }
        PreconditionerKind::Super => {
            Box::new(SuperPreconditioner::build(tree, kernel, roots, DEFAULT_SUPER_PRE_DIM))
        }
        PreconditionerKind::Hierarchical => Box::new(HierarchicalPreconditioner::build(
            tree,
            kernel,
            roots,
            DEFAULT_COARSE_DIM,
            DEFAULT_INNER_TOLERANCE,
            DEFAULT_INNER_MAX_ITER,
        )),
    }
}

/// Automatically pick a preconditioner kind and, for the super family, a
/// cut size, from link/conductor counts, rather than trusting a fixed
/// `SolverConfig::preconditioner` when the caller asked for auto-selection
/// via [`PreconditionerKind::None`] on a large problem. The CLI surfaces
/// this as a distinct `-a`/auto flag layered on top of `SolverConfig`; here
/// it is a plain function so `solve_once` stays in control of when it runs.
#[must_use]
pub fn select_preconditioner_kind(link_count: usize, conductor_count: usize) -> PreconditionerKind {
    auto_select(link_count, conductor_count).kind
}

/// One fixed-mesh solve: link generation, preconditioner build, then one
/// GMRES solve per true conductor's unit right-hand side, assembled into a
/// capacitance matrix row. `roots` must hold exactly one super-hierarchy
/// root per true conductor, in the same order as the capacitance matrix's
/// rows/columns.
pub fn solve_once<K: PotentialKernel>(
    tree: &mut Tree,
    kernel: &K,
    roots: &[ElementId],
    cfg: &SolverConfig,
    eps: f64,
    ctx: &RunContext,
) -> Result<SolveOutcome, Error> {
    let self_pot = compute_self_potentials(tree, kernel, roots);
    let link_cfg = LinkGenConfig { eps, mesh_curv_coeff: cfg.mesh_curv_coeff };
    let links = generate_links(tree, kernel, roots, &link_cfg);
    let rows = RowLinks::new(&links);
    let all_ids = build_all_ids(tree, roots, &links);

    let conductor_count = roots.len();
    let precond = build_preconditioner(tree, kernel, roots, cfg.preconditioner);
    let flexible = cfg.preconditioner == PreconditionerKind::Hierarchical;

    let n = tree.len();
    let mut matrix = vec![vec![0.0; conductor_count]; conductor_count];
    let mut gmres_outcomes = Vec::with_capacity(conductor_count);

    for (col, &driven_root) in roots.iter().enumerate() {
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let mut rhs_re = vec![0.0; n];
        for leaf in tree.leaves_under(driven_root) {
            rhs_re[leaf.index()] = 1.0;
        }

        let (q_re, _q_im, outcome) = gmres_solve(
            tree,
            roots,
            &self_pot,
            &rows,
            &all_ids,
            Some(precond.as_ref()),
            flexible,
            cfg.dimension,
            &rhs_re,
            None,
            cfg.gmres_tolerance,
            cfg.gmres_max_iterations,
            cfg.gmres_reorthogonalize,
            ctx,
        );

        if matches!(outcome, GmresOutcome::MaxIterReached { .. }) {
            ctx.warn_once(
                capx_core::WarningKind::IllConditionedPreconditioner,
                "GMRES did not converge to the requested tolerance",
            );
        }

        for (row, &charge_root) in roots.iter().enumerate() {
            let mut total = 0.0;
            for leaf in tree.leaves_under(charge_root) {
                total += q_re[leaf.index()];
            }
            matrix[row][col] = total;
        }
        gmres_outcomes.push(outcome);
    }

    Ok(SolveOutcome { matrix, gmres_outcomes })
}

/// Row/column labels for a capacitance matrix: every true conductor's name,
/// in registry order (dielectrics already excluded by
/// [`ConductorRegistry::conductor_count`]).
#[must_use]
pub fn conductor_labels(registry: &ConductorRegistry) -> Vec<String> {
    registry
        .iter()
        .filter(|c| !c.is_dielectric)
        .map(|c: &Conductor| c.name.clone())
        .collect()
}

/// Top-level entry point: validate configuration, then either run the
/// auto-refinement loop (default) or, when `skip_mesh_refinement` is set,
/// solve once against the deck's geometry verbatim.
pub fn run(
    tree: &mut Tree,
    kernel: &impl PotentialKernel,
    roots: &[ElementId],
    cfg: &SolverConfig,
    ctx: &RunContext,
) -> Result<AutoLoopResult, Error> {
    cfg.validate()?;

    if cfg.skip_mesh_refinement {
        let eps = cfg.initial_mesh_eps * cfg.eps_ratio;
        let outcome = solve_once(tree, kernel, roots, cfg, eps, ctx)?;
        return Ok(AutoLoopResult {
            matrix: outcome.matrix,
            iterations: 1,
            final_state: crate::autoloop::AutoLoopState::Done,
        });
    }

    run_auto_loop(tree, kernel, roots, cfg, ctx)
}
