use capx_core::{Element, Panel, PreconditionerKind, RunContext, SolverConfig, Tree, Triangle};
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
            let t = Triangle::new([
                c - Vector3::new(half, 0.0, 0.0),
                c + Vector3::new(half, 0.0, 0.0),
                c + Vector3::new(0.0, half, 0.0),
            ]);
            leaves.push(tree.push(Element::leaf_from_panel(Panel::Triangle3D(t), conductor, None)));
        }
    }
    leaves
}

/// Two separated conductor plates, solved once at a fixed mesh. The
/// capacitance matrix must be square (one row/column per conductor), and
/// every diagonal entry (self-capacitance under a unit drive) must be
/// strictly positive, since a conductor always holds some charge when it
/// alone is driven to unit potential.
#[test]
fn two_plate_matrix_has_positive_diagonal() {
    let mut tree = Tree::new();
    let plate_a = plate(&mut tree, 0, Vector3::new(0.0, 0.0, 0.0), 3, 1.0);
    let plate_b = plate(&mut tree, 1, Vector3::new(0.0, 0.0, 5.0), 3, 1.0);

    let root_a = build_super_hierarchy(&mut tree, plate_a, AxisCount::Three);
    let root_b = build_super_hierarchy(&mut tree, plate_b, AxisCount::Three);
    let roots = vec![root_a, root_b];

    let kernel = LaplaceKernel;
    let cfg = SolverConfig {
        preconditioner: PreconditionerKind::Jacobi,
        gmres_tolerance: 1e-6,
        gmres_max_iterations: 200,
        ..SolverConfig::default()
    };
    let ctx = RunContext::new();

    let outcome = solve_once(&mut tree, &kernel, &roots, &cfg, 1e-3, &ctx).unwrap();

    assert_eq!(outcome.matrix.len(), 2);
    assert_eq!(outcome.matrix[0].len(), 2);
    assert!(outcome.matrix[0][0] > 0.0);
    assert!(outcome.matrix[1][1] > 0.0);
}

/// Solving with no preconditioner must still produce a finite, correctly
/// shaped matrix; the branch only changes GMRES's convergence path, never
/// the assembled result's shape.
#[test]
fn unpreconditioned_solve_produces_finite_matrix() {
    let mut tree = Tree::new();
    let plate_a = plate(&mut tree, 0, Vector3::new(0.0, 0.0, 0.0), 2, 1.0);
    let plate_b = plate(&mut tree, 1, Vector3::new(0.0, 0.0, 4.0), 2, 1.0);

    let root_a = build_super_hierarchy(&mut tree, plate_a, AxisCount::Three);
    let root_b = build_super_hierarchy(&mut tree, plate_b, AxisCount::Three);
    let roots = vec![root_a, root_b];

    let kernel = LaplaceKernel;
    let cfg = SolverConfig {
        preconditioner: PreconditionerKind::None,
        gmres_tolerance: 1e-4,
        gmres_max_iterations: 200,
        ..SolverConfig::default()
    };
    let ctx = RunContext::new();

    let outcome = solve_once(&mut tree, &kernel, &roots, &cfg, 1e-3, &ctx).unwrap();
    for row in &outcome.matrix {
        for &v in row {
            assert!(v.is_finite());
        }
    }
}
