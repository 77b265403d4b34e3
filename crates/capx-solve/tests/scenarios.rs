//! Concrete end-to-end scenarios: parallel plates, concentric spheres,
//! coaxial 2D wires, a single floating cube, a conductor-rename merge
//! (parsed through the real deck grammar), and a complex-permittivity deck.
//! Properties 4 (capacitance symmetry) and 6 (off-diagonal sign) are
//! checked against every solved scenario rather than split into their own
//! files, since every scenario here produces a matrix worth checking them
//! against.

use std::io::Write as _;

use capx_core::{
    Discretization, Dimension, Element, Panel, PreconditionerKind, RunContext, Segment,
    SolverConfig, Tree, Triangle,
};
use capx_hierarchy::{build_super_hierarchy, AxisCount, LaplaceKernel};
use capx_solve::solve_once;
use nalgebra::{Vector2, Vector3};

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

fn ring(tree: &mut Tree, conductor: u32, center: Vector2<f64>, radius: f64, n: usize) -> Vec<capx_core::ElementId> {
    let mut leaves = Vec::new();
    for i in 0..n {
        let a0 = std::f64::consts::TAU * (i as f64) / (n as f64);
        let a1 = std::f64::consts::TAU * ((i + 1) as f64) / (n as f64);
        let p0 = center + Vector2::new(radius * a0.cos(), radius * a0.sin());
        let p1 = center + Vector2::new(radius * a1.cos(), radius * a1.sin());
        leaves.push(tree.push(Element::leaf_from_panel(Panel::Segment2D(Segment::new([p0, p1])), conductor, None)));
    }
    leaves
}

/// Octahedron: a coarse 8-triangle faceting, close enough to a sphere for a
/// sanity-checked concentric-spheres scenario without an actual mesher.
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
            let t = Triangle::new([center + axes[a], center + axes[b], center + axes[c]]);
            tree.push(Element::leaf_from_panel(Panel::Triangle3D(t), conductor, None))
        })
        .collect()
}

fn cube(tree: &mut Tree, conductor: u32, center: Vector3<f64>, half: f64) -> Vec<capx_core::ElementId> {
    let h = half;
    let corners = |sx: f64, sy: f64, sz: f64| center + Vector3::new(sx * h, sy * h, sz * h);
    let faces = [
        [corners(-1.0, -1.0, -1.0), corners(1.0, -1.0, -1.0), corners(1.0, 1.0, -1.0), corners(-1.0, 1.0, -1.0)],
        [corners(-1.0, -1.0, 1.0), corners(-1.0, 1.0, 1.0), corners(1.0, 1.0, 1.0), corners(1.0, -1.0, 1.0)],
        [corners(-1.0, -1.0, -1.0), corners(-1.0, 1.0, -1.0), corners(-1.0, 1.0, 1.0), corners(-1.0, -1.0, 1.0)],
        [corners(1.0, -1.0, -1.0), corners(1.0, -1.0, 1.0), corners(1.0, 1.0, 1.0), corners(1.0, 1.0, -1.0)],
        [corners(-1.0, -1.0, -1.0), corners(-1.0, -1.0, 1.0), corners(1.0, -1.0, 1.0), corners(1.0, -1.0, -1.0)],
        [corners(-1.0, 1.0, -1.0), corners(1.0, 1.0, -1.0), corners(1.0, 1.0, 1.0), corners(-1.0, 1.0, 1.0)],
    ];
    let mut leaves = Vec::new();
    for quad in faces {
        for tri in capx_core::geom::triangulate_quad(quad) {
            leaves.push(tree.push(Element::leaf_from_panel(Panel::Triangle3D(tri), conductor, None)));
        }
    }
    leaves
}

fn default_cfg(dimension: Dimension) -> SolverConfig {
    SolverConfig {
        dimension,
        discretization: Discretization::Collocation,
        preconditioner: PreconditionerKind::Jacobi,
        gmres_tolerance: 1e-6,
        gmres_max_iterations: 300,
        ..SolverConfig::default()
    }
}

fn assert_symmetric_and_well_signed(matrix: &[Vec<f64>], sym_tol: f64) {
    let n = matrix.len();
    for i in 0..n {
        assert!(matrix[i][i] > 0.0, "diagonal {i} must be positive, got {}", matrix[i][i]);
        for j in 0..n {
            if i != j {
                assert!(matrix[i][j] <= sym_tol, "off-diagonal ({i},{j}) = {} must be non-positive", matrix[i][j]);
                let diff = (matrix[i][j] - matrix[j][i]).abs();
                let scale = matrix[i][j].abs().max(matrix[j][i].abs()).max(1e-12);
                assert!(diff / scale < 0.05, "matrix not symmetric at ({i},{j}): {} vs {}", matrix[i][j], matrix[j][i]);
            }
        }
    }
}

#[test]
fn parallel_plates_are_symmetric_with_negative_coupling() {
    let mut tree = Tree::new();
    let a = plate(&mut tree, 0, Vector3::new(0.0, 0.0, 0.0), 3, 1.0);
    let b = plate(&mut tree, 1, Vector3::new(0.0, 0.0, 2.0), 3, 1.0);
    let roots = vec![
        build_super_hierarchy(&mut tree, a, AxisCount::Three),
        build_super_hierarchy(&mut tree, b, AxisCount::Three),
    ];

    let cfg = default_cfg(Dimension::D3);
    let ctx = RunContext::new();
    let outcome = solve_once(&mut tree, &LaplaceKernel, &roots, &cfg, 1e-3, &ctx).unwrap();

    assert_symmetric_and_well_signed(&outcome.matrix, 1e-9);
}

#[test]
fn concentric_spheres_have_positive_symmetric_capacitance() {
    let mut tree = Tree::new();
    let inner = octahedron(&mut tree, 0, Vector3::zeros(), 1.0);
    let outer = octahedron(&mut tree, 1, Vector3::zeros(), 3.0);
    let roots = vec![
        build_super_hierarchy(&mut tree, inner, AxisCount::Three),
        build_super_hierarchy(&mut tree, outer, AxisCount::Three),
    ];

    let cfg = default_cfg(Dimension::D3);
    let ctx = RunContext::new();
    let outcome = solve_once(&mut tree, &LaplaceKernel, &roots, &cfg, 1e-3, &ctx).unwrap();

    assert_symmetric_and_well_signed(&outcome.matrix, 1e-6);
}

#[test]
fn coaxial_2d_wires_have_positive_symmetric_capacitance() {
    let mut tree = Tree::new();
    let inner = ring(&mut tree, 0, Vector2::zeros(), 0.5, 16);
    let outer = ring(&mut tree, 1, Vector2::zeros(), 2.0, 16);
    let roots = vec![
        build_super_hierarchy(&mut tree, inner, AxisCount::Two),
        build_super_hierarchy(&mut tree, outer, AxisCount::Two),
    ];

    let cfg = default_cfg(Dimension::D2);
    let ctx = RunContext::new();
    let outcome = solve_once(&mut tree, &LaplaceKernel, &roots, &cfg, 1e-3, &ctx).unwrap();

    assert_symmetric_and_well_signed(&outcome.matrix, 1e-6);
}

#[test]
fn single_floating_cube_has_positive_self_capacitance() {
    let mut tree = Tree::new();
    let leaves = cube(&mut tree, 0, Vector3::zeros(), 1.0);
    let roots = vec![build_super_hierarchy(&mut tree, leaves, AxisCount::Three)];

    let cfg = default_cfg(Dimension::D3);
    let ctx = RunContext::new();
    let outcome = solve_once(&mut tree, &LaplaceKernel, &roots, &cfg, 1e-3, &ctx).unwrap();

    assert_eq!(outcome.matrix.len(), 1);
    assert!(outcome.matrix[0][0] > 0.0);
}

/// Merging two plates with `N <old> <new>` before solving must behave like
/// one conductor: one row in the matrix, positive self-capacitance. Parsed
/// through the real grammar, exercising `capx-io::parser`'s `handle_rename`
/// end to end rather than only at the registry-bookkeeping level.
#[test]
fn conductor_rename_merges_before_solving() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("merge.txt");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(f, "0 merge two plates into one conductor").unwrap();
    writeln!(f, "T a 0 0 0 1 0 0 0 1 0").unwrap();
    writeln!(f, "T a 1 0 0 2 0 0 1 1 0").unwrap();
    writeln!(f, "T b 0 0 2 1 0 2 0 1 2").unwrap();
    writeln!(f, "T b 1 0 2 2 0 2 1 1 2").unwrap();
    writeln!(f, "N b a").unwrap();
    writeln!(f, "E").unwrap();
    drop(f);

    let deck = capx_io::parse_deck(&path, Dimension::D3).unwrap();
    assert_eq!(deck.registry.len(), 1);

    let mut tree = deck.tree;
    let leaves = deck.leaves_by_group.get(&0).cloned().unwrap_or_default();
    assert_eq!(leaves.len(), 4);
    let roots = vec![build_super_hierarchy(&mut tree, leaves, AxisCount::Three)];

    let cfg = default_cfg(Dimension::D3);
    let ctx = RunContext::new();
    let outcome = solve_once(&mut tree, &LaplaceKernel, &roots, &cfg, 1e-3, &ctx).unwrap();

    assert_eq!(outcome.matrix.len(), 1);
    assert!(outcome.matrix[0][0] > 0.0);
}

/// A deck with a complex outer permittivity (`a-jb` syntax) must be flagged
/// by the parser, and only its real part carried into the registry — the
/// documented limitation until the kernel propagates complex permittivity.
#[test]
fn complex_permittivity_is_flagged_and_truncated_to_its_real_part() {
    let dir = tempfile::tempdir().unwrap();
    let plate_path = dir.path().join("plate.txt");
    let mut f = std::fs::File::create(&plate_path).unwrap();
    writeln!(f, "0 plate panels").unwrap();
    writeln!(f, "T plate 0 0 0 1 0 0 0 1 0").unwrap();
    writeln!(f, "E").unwrap();
    drop(f);

    let main_path = dir.path().join("main.txt");
    let mut f = std::fs::File::create(&main_path).unwrap();
    writeln!(f, "0 complex permittivity conductor").unwrap();
    writeln!(f, "C plate.txt 4.2-j0.5 0 0 0").unwrap();
    writeln!(f, "E").unwrap();
    drop(f);

    let deck = capx_io::parse_deck(&main_path, Dimension::D3).unwrap();
    assert!(deck.complex_permittivity);
    let conductor = deck.registry.find_by_name("plate.txt").unwrap();
    assert!((conductor.outer_perm - 4.2).abs() < 1e-9);
}
