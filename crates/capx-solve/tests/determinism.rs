//! Property 7: solving the same geometry and config twice, from scratch,
//! produces bit-identical capacitance matrices. GMRES here has no random
//! restarts or parallelism-dependent reduction order, so two independent
//! runs over freshly built, byte-identical trees must retrace the exact
//! same floating-point operations.

use capx_core::{Discretization, Dimension, Element, Panel, PreconditionerKind, RunContext, SolverConfig, Tree};
use capx_hierarchy::{build_super_hierarchy, AxisCount, LaplaceKernel};
use capx_solve::solve_once;
use nalgebra::Vector3;

fn plate(tree: &mut Tree, conductor: u32, center: Vector3<f64>, n: usize, pitch: f64) -> Vec<capx_core::ElementId> {
    let mut leaves = Vec::new();
    for i in 0..n {
        for j in 0..n {
            let offset = Vector3::new(f64::from(i as i32) * pitch, f64::from(j as i32) * pitch, 0.0);
            let c = center + offset;
            let half = pitch * 0.4;
            let t = capx_core::Triangle::new([
                c - Vector3::new(half, 0.0, 0.0),
                c + Vector3::new(half, 0.0, 0.0),
                c + Vector3::new(0.0, half, 0.0),
            ]);
            leaves.push(tree.push(Element::leaf_from_panel(Panel::Triangle3D(t), conductor, None)));
        }
    }
    leaves
}

fn run_once() -> Vec<Vec<f64>> {
    let mut tree = Tree::new();
    let a = plate(&mut tree, 0, Vector3::new(0.0, 0.0, 0.0), 3, 1.0);
    let b = plate(&mut tree, 1, Vector3::new(0.0, 0.0, 2.0), 3, 1.0);
    let roots = vec![
        build_super_hierarchy(&mut tree, a, AxisCount::Three),
        build_super_hierarchy(&mut tree, b, AxisCount::Three),
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
    solve_once(&mut tree, &LaplaceKernel, &roots, &cfg, 1e-3, &ctx).unwrap().matrix
}

#[test]
fn identical_input_and_config_produce_bit_identical_matrices() {
    let first = run_once();
    let second = run_once();

    assert_eq!(first.len(), second.len());
    for (row_a, row_b) in first.iter().zip(&second) {
        assert_eq!(row_a.len(), row_b.len());
        for (&a, &b) in row_a.iter().zip(row_b) {
            assert_eq!(a.to_bits(), b.to_bits(), "expected bit-identical entries, got {a} vs {b}");
        }
    }
}

#[test]
fn differing_voltage_labeling_order_does_not_change_a_conductors_self_capacitance() {
    // Swapping which conductor is built first only permutes rows/columns; the
    // self-capacitance of a given physical plate must not depend on it.
    let mut tree_ab = Tree::new();
    let a_first = plate(&mut tree_ab, 0, Vector3::new(0.0, 0.0, 0.0), 3, 1.0);
    let b_first = plate(&mut tree_ab, 1, Vector3::new(0.0, 0.0, 2.0), 3, 1.0);
    let roots_ab = vec![
        build_super_hierarchy(&mut tree_ab, a_first, AxisCount::Three),
        build_super_hierarchy(&mut tree_ab, b_first, AxisCount::Three),
    ];

    let mut tree_ba = Tree::new();
    let b_second = plate(&mut tree_ba, 0, Vector3::new(0.0, 0.0, 2.0), 3, 1.0);
    let a_second = plate(&mut tree_ba, 1, Vector3::new(0.0, 0.0, 0.0), 3, 1.0);
    let roots_ba = vec![
        build_super_hierarchy(&mut tree_ba, b_second, AxisCount::Three),
        build_super_hierarchy(&mut tree_ba, a_second, AxisCount::Three),
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

    let out_ab = solve_once(&mut tree_ab, &LaplaceKernel, &roots_ab, &cfg, 1e-3, &ctx).unwrap();
    let out_ba = solve_once(&mut tree_ba, &LaplaceKernel, &roots_ba, &cfg, 1e-3, &ctx).unwrap();

    // row/col 0 is "plate at z=0" in out_ab, and row/col 1 is "plate at z=0" in out_ba.
    let diff = (out_ab.matrix[0][0] - out_ba.matrix[1][1]).abs();
    let scale = out_ab.matrix[0][0].abs().max(1e-12);
    assert!(diff / scale < 1e-9, "self-capacitance depends on labeling order: {} vs {}", out_ab.matrix[0][0], out_ba.matrix[1][1]);
}
