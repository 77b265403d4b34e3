//! Property 9: for a smooth geometry, successive capacitance matrices
//! produced by progressively tighter mesh refinement move less than the
//! step before, beyond the first refinement. Drives `run_curvature_pass`
//! and `solve_once` directly (the same two calls `run_auto_loop` alternates
//! between) rather than through `run_auto_loop` itself, since the loop
//! driver only returns its final matrix and iteration count, not the
//! per-iteration history this property is about.

use capx_core::{Discretization, Dimension, Element, Panel, PreconditionerKind, RunContext, SolverConfig, Tree};
use capx_hierarchy::{build_super_hierarchy, run_curvature_pass, AxisCount, LaplaceKernel, MesherConfig};
use capx_solve::solve_once;
use nalgebra::Vector3;

fn octahedron(tree: &mut Tree, conductor: u32, center: Vector3<f64>, radius: f64) -> Vec<capx_core::ElementId> {
    let axes = [
        Vector3::new(radius, 0.0, 0.0),
        Vector3::new(-radius, 0.0, 0.0),
        Vector3::new(0.0, radius, 0.0),
        Vector3::new(0.0, -radius, 0.0),
        Vector3::new(0.0, 0.0, radius),
        Vector3::new(0.0, 0.0, -radius),
    ];
    let faces = [
        (0, 2, 4), (2, 1, 4), (1, 3, 4), (3, 0, 4),
        (2, 0, 5), (1, 2, 5), (3, 1, 5), (0, 3, 5),
    ];
    faces
        .iter()
        .map(|&(a, b, c)| {
            let t = capx_core::Triangle::new([center + axes[a], center + axes[b], center + axes[c]]);
            tree.push(Element::leaf_from_panel(Panel::Triangle3D(t), conductor, None))
        })
        .collect()
}

fn frobenius_delta(current: &[Vec<f64>], previous: &[Vec<f64>]) -> f64 {
    let mut num = 0.0_f64;
    let mut den = 0.0_f64;
    for (row_c, row_p) in current.iter().zip(previous) {
        for (&c, &p) in row_c.iter().zip(row_p) {
            num += (c - p) * (c - p);
            den += c * c;
        }
    }
    if den <= 0.0 {
        0.0
    } else {
        (num / den).sqrt()
    }
}

#[test]
fn successive_refinement_deltas_shrink_beyond_the_first_step() {
    let mut tree = Tree::new();
    let inner = octahedron(&mut tree, 0, Vector3::zeros(), 1.0);
    let outer = octahedron(&mut tree, 1, Vector3::zeros(), 3.0);
    let roots = vec![
        build_super_hierarchy(&mut tree, inner, AxisCount::Three),
        build_super_hierarchy(&mut tree, outer, AxisCount::Three),
    ];

    let cfg = SolverConfig {
        dimension: Dimension::D3,
        discretization: Discretization::Collocation,
        preconditioner: PreconditionerKind::Jacobi,
        gmres_tolerance: 1e-6,
        gmres_max_iterations: 300,
        ..SolverConfig::default()
    };
    let ctx = RunContext::new();
    let kernel = LaplaceKernel;

    let mesh_epsilons = [0.4, 0.2, 0.1, 0.05];
    let mut previous: Option<Vec<Vec<f64>>> = None;
    let mut deltas = Vec::new();

    for &mesh_eps in &mesh_epsilons {
        let mesher_cfg = MesherConfig { mesh_eps, mesh_curv_coeff: 1.1, max_levels: 6 };
        run_curvature_pass(&mut tree, &kernel, &ctx, &roots, &mesher_cfg).unwrap();

        let outcome = solve_once(&mut tree, &kernel, &roots, &cfg, mesh_eps * 0.5, &ctx).unwrap();
        if let Some(prev) = &previous {
            deltas.push(frobenius_delta(&outcome.matrix, prev));
        }
        previous = Some(outcome.matrix);
    }

    assert!(deltas.len() >= 2, "expected at least two refinement steps to compare, got {}", deltas.len());
    for window in deltas.windows(2).skip(1) {
        assert!(
            window[1] <= window[0] * 1.2,
            "refinement delta grew from {} to {} past the first step",
            window[0],
            window[1]
        );
    }
}
