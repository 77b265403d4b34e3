//! Two-level ("super") preconditioner: a dense, directly-inverted operator
//! between a coarse cut of the tree, plus a per-leaf diagonal correction.

use nalgebra::DVector;
use num_complex::Complex64;

use capx_core::{ElementId, Tree};
use capx_hierarchy::PotentialKernel;

use crate::dense_cut::{build_dense_matrix, gather, place_leaves, scatter, select_cut_nodes};
use crate::jacobi::JacobiPreconditioner;
use crate::Preconditioner;

/// Default cut size; the auto-selector also uses 512 and 1024 as the
/// complexity grows (see `auto.rs`).
pub const DEFAULT_SUPER_PRE_DIM: usize = 128;

pub struct SuperPreconditioner {
    leaves: Vec<ElementId>,
    owner: crate::dense_cut::LeafPlacement,
    inv: nalgebra::DMatrix<Complex64>,
    diag: JacobiPreconditioner,
    n_nodes: usize,
}

impl SuperPreconditioner {
    /// Build the cut, the dense interaction matrix with its diagonal zeroed,
    /// and its LU inverse, plus a Jacobi fallback for the diagonal term the
    /// zeroed-out matrix no longer carries.
    #[must_use]
    pub fn build<K: PotentialKernel>(
        tree: &Tree,
        kernel: &K,
        roots: &[ElementId],
        super_pre_dim: usize,
    ) -> Self {
        let nodes = select_cut_nodes(tree, roots, super_pre_dim);
        let n_nodes = nodes.len();
        let mut matrix = build_dense_matrix(tree, kernel, &nodes);
        for i in 0..n_nodes {
            matrix[(i, i)] = Complex64::new(0.0, 0.0);
        }
        let lu = nalgebra::linalg::LU::new(matrix);
        let inv = lu
            .try_inverse()
            .unwrap_or_else(|| nalgebra::DMatrix::zeros(n_nodes, n_nodes));

        let owner = place_leaves(tree, &nodes);
        let leaves: Vec<ElementId> = roots.iter().flat_map(|&r| tree.leaves_under(r)).collect();
        let diag = JacobiPreconditioner::build(tree, kernel, roots);

        Self { leaves, owner, inv, diag, n_nodes }
    }
}

impl Preconditioner for SuperPreconditioner {
    fn apply(&self, q_re: &[f64], q_im: Option<&[f64]>, v_re: &mut [f64], v_im: &mut [f64]) {
        self.diag.apply(q_re, q_im, v_re, v_im);

        let gathered = gather(&self.owner, &self.leaves, self.n_nodes, q_re, q_im);
        let rhs = DVector::from_vec(gathered);
        let solved = &self.inv * rhs;
        scatter(&self.owner, &self.leaves, &solved, v_re, v_im);
    }
}
