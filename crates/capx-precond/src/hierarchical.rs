//! Hierarchical preconditioner: an inner, unpreconditioned GMRES solve
//! against a coarse cut of the same tree, nested inside each outer GMRES
//! step.
//!
//! The coarse operator reuses the same tree-cut selection as
//! `super_precond` rather than building an entirely separate, independently
//! meshed coarse tree: both describe the same geometry at a coarser grain,
//! and reusing the cut avoids a second full mesh/link pass for a
//! preconditioner that is already an approximation. See `DESIGN.md` for the
//! rationale.
//!
//! The inner solve is a small, self-contained GMRES implementation local to
//! this module rather than a call into `capx-solve`: `capx-solve` depends
//! on `capx-precond` for its preconditioners, so the reverse dependency
//! would form a cycle. The outer, preconditioned/flexible GMRES driver that
//! actually calls this preconditioner lives in `capx-solve::gmres`.

use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;

use capx_core::{ElementId, Tree};
use capx_hierarchy::PotentialKernel;

use crate::dense_cut::{build_dense_matrix, gather, place_leaves, scatter, select_cut_nodes, LeafPlacement};
use crate::Preconditioner;

pub const DEFAULT_COARSE_DIM: usize = 256;
pub const DEFAULT_INNER_TOLERANCE: f64 = 1e-2;
pub const DEFAULT_INNER_MAX_ITER: usize = 30;

/// Express an `n`-dimensional complex linear system as the equivalent
/// `2n`-dimensional real one, `[Re(A) -Im(A); Im(A) Re(A)] [x_re; x_im] =
/// [b_re; b_im]`, so the inner solve never needs complex Givens rotations.
fn real_block_matrix(matrix: &DMatrix<Complex64>) -> DMatrix<f64> {
    let n = matrix.nrows();
    let mut out = DMatrix::<f64>::zeros(2 * n, 2 * n);
    for i in 0..n {
        for j in 0..n {
            let c = matrix[(i, j)];
            out[(i, j)] = c.re;
            out[(i, n + j)] = -c.im;
            out[(n + i, j)] = c.im;
            out[(n + i, n + j)] = c.re;
        }
    }
    out
}

/// Unrestarted real GMRES, modified Gram-Schmidt Arnoldi with Givens
/// rotations, capped at `max_iter` (and at the system dimension, past which
/// the Krylov space cannot grow further).
fn real_gmres(a: &DMatrix<f64>, b: &DVector<f64>, tol: f64, max_iter: usize) -> DVector<f64> {
    let n = b.len();
    let beta = b.norm();
    if beta < 1e-300 {
        return DVector::zeros(n);
    }
    let m = max_iter.min(n).max(1);

    let mut v = Vec::with_capacity(m + 1);
    v.push(b / beta);
    let mut h = vec![vec![0.0_f64; m]; m + 1];
    let mut cs = vec![0.0_f64; m];
    let mut sn = vec![0.0_f64; m];
    let mut g = vec![0.0_f64; m + 1];
    g[0] = beta;

    let mut k_used = 0;
    for j in 0..m {
        let mut w = a * &v[j];
        for i in 0..=j {
            h[i][j] = v[i].dot(&w);
            w -= &v[i] * h[i][j];
        }
        let h_next = w.norm();
        h[j + 1][j] = h_next;
        v.push(if h_next > 1e-14 { &w / h_next } else { DVector::zeros(n) });

        for i in 0..j {
            let temp = cs[i] * h[i][j] + sn[i] * h[i + 1][j];
            h[i + 1][j] = -sn[i] * h[i][j] + cs[i] * h[i + 1][j];
            h[i][j] = temp;
        }
        let denom = h[j][j].hypot(h[j + 1][j]);
        let (c, s) = if denom > 0.0 { (h[j][j] / denom, h[j + 1][j] / denom) } else { (1.0, 0.0) };
        cs[j] = c;
        sn[j] = s;
        h[j][j] = c * h[j][j] + s * h[j + 1][j];
        h[j + 1][j] = 0.0;
        g[j + 1] = -s * g[j];
        g[j] *= c;
        k_used = j + 1;

        if g[j + 1].abs() / beta < tol {
            break;
        }
    }

    let mut y = vec![0.0_f64; k_used];
    for i in (0..k_used).rev() {
        let mut sum = g[i];
        for (k, &yk) in y.iter().enumerate().take(k_used).skip(i + 1) {
            sum -= h[i][k] * yk;
        }
        y[i] = sum / h[i][i];
    }

    let mut x = DVector::zeros(n);
    for (i, &yi) in y.iter().enumerate() {
        x += &v[i] * yi;
    }
    x
}

fn solve_dense_complex(
    matrix: &DMatrix<Complex64>,
    rhs: &DVector<Complex64>,
    tol: f64,
    max_iter: usize,
) -> DVector<Complex64> {
    let n = matrix.nrows();
    let real_a = real_block_matrix(matrix);
    let mut b = DVector::<f64>::zeros(2 * n);
    for i in 0..n {
        b[i] = rhs[i].re;
        b[n + i] = rhs[i].im;
    }
    let x = real_gmres(&real_a, &b, tol, max_iter);
    let mut out = DVector::<Complex64>::zeros(n);
    for i in 0..n {
        out[i] = Complex64::new(x[i], x[n + i]);
    }
    out
}

pub struct HierarchicalPreconditioner {
    leaves: Vec<ElementId>,
    owner: LeafPlacement,
    matrix: DMatrix<Complex64>,
    n_nodes: usize,
    inner_tol: f64,
    inner_max_iter: usize,
}

impl HierarchicalPreconditioner {
    #[must_use]
    pub fn build<K: PotentialKernel>(
        tree: &Tree,
        kernel: &K,
        roots: &[ElementId],
        coarse_dim: usize,
        inner_tol: f64,
        inner_max_iter: usize,
    ) -> Self {
        let nodes = select_cut_nodes(tree, roots, coarse_dim);
        let matrix = build_dense_matrix(tree, kernel, &nodes);
        let owner = place_leaves(tree, &nodes);
        let leaves: Vec<ElementId> = roots.iter().flat_map(|&r| tree.leaves_under(r)).collect();
        Self { leaves, owner, matrix, n_nodes: nodes.len(), inner_tol, inner_max_iter }
    }
}

impl Preconditioner for HierarchicalPreconditioner {
    fn apply(&self, q_re: &[f64], q_im: Option<&[f64]>, v_re: &mut [f64], v_im: &mut [f64]) {
        let gathered = gather(&self.owner, &self.leaves, self.n_nodes, q_re, q_im);
        let rhs = DVector::from_vec(gathered);
        let solved = solve_dense_complex(&self.matrix, &rhs, self.inner_tol, self.inner_max_iter);
        scatter(&self.owner, &self.leaves, &solved, v_re, v_im);
    }
}
