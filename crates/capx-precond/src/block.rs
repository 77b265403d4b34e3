//! Block-diagonal preconditioner: partition the tree into subtrees no
//! larger than `block_size` leaves, invert each subtree's exact dense
//! interaction matrix, and apply as independent block solves.

use nalgebra::DVector;
use num_complex::Complex64;

use capx_core::{ElementId, Tree};
use capx_hierarchy::PotentialKernel;

use crate::dense_cut::build_dense_matrix;
use crate::Preconditioner;

/// Default partition cap; larger problems still get one block per subtree,
/// just more of them.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

struct Block {
    leaves: Vec<ElementId>,
    inv: nalgebra::DMatrix<Complex64>,
}

pub struct BlockPreconditioner {
    blocks: Vec<Block>,
}

/// Non-recursive top-down partition: a subtree becomes one block as soon as
/// its leaf count fits `block_size`, otherwise both children are pushed for
/// further partitioning.
fn partition(tree: &Tree, roots: &[ElementId], block_size: usize) -> Vec<ElementId> {
    let mut out = Vec::new();
    let mut stack: Vec<ElementId> = roots.to_vec();
    while let Some(id) = stack.pop() {
        let elem = tree.get(id);
        if elem.is_leaf() || tree.leaves_under(id).len() <= block_size {
            out.push(id);
        } else {
            let (left, right) = elem.children.expect("non-leaf has children");
            stack.push(right);
            stack.push(left);
        }
    }
    out
}

impl BlockPreconditioner {
    #[must_use]
    pub fn build<K: PotentialKernel>(
        tree: &Tree,
        kernel: &K,
        roots: &[ElementId],
        block_size: usize,
    ) -> Self {
        let block_roots = partition(tree, roots, block_size);
        let blocks = block_roots
            .into_iter()
            .map(|root| {
                let leaves = tree.leaves_under(root);
                let matrix = build_dense_matrix(tree, kernel, &leaves);
                let lu = nalgebra::linalg::LU::new(matrix);
                let inv = lu
                    .try_inverse()
                    .unwrap_or_else(|| nalgebra::DMatrix::zeros(leaves.len(), leaves.len()));
                Block { leaves, inv }
            })
            .collect();
        Self { blocks }
    }
}

impl Preconditioner for BlockPreconditioner {
    fn apply(&self, q_re: &[f64], q_im: Option<&[f64]>, v_re: &mut [f64], v_im: &mut [f64]) {
        for block in &self.blocks {
            let rhs: Vec<Complex64> = block
                .leaves
                .iter()
                .map(|leaf| {
                    let idx = leaf.index();
                    Complex64::new(q_re[idx], q_im.map_or(0.0, |im| im[idx]))
                })
                .collect();
            let solved = &block.inv * DVector::from_vec(rhs);
            for (i, leaf) in block.leaves.iter().enumerate() {
                v_re[leaf.index()] = solved[i].re;
                v_im[leaf.index()] = solved[i].im;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use capx_core::{Element, Panel, Triangle};
    use capx_hierarchy::{build_super_hierarchy, AxisCount, LaplaceKernel};
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
    fn single_block_exactly_inverts_its_own_operator() {
        let mut tree = Tree::new();
        let mut leaves = Vec::new();
        for i in 0..4 {
            leaves.push(tri_leaf(&mut tree, Vector3::new(f64::from(i) * 3.0, 0.0, 0.0), 0.3));
        }
        let root = build_super_hierarchy(&mut tree, leaves.clone(), AxisCount::Three);

        let kernel = LaplaceKernel;
        // block_size large enough that the whole conductor is one block.
        let precond = BlockPreconditioner::build(&tree, &kernel, &[root], 16);
        assert_eq!(precond.blocks.len(), 1);

        // P * (A * q) should recover q when P = A^-1 exactly (single block).
        let matrix = build_dense_matrix(&tree, &kernel, &leaves);
        let q = DVector::from_vec(vec![Complex64::new(1.0, 0.0); leaves.len()]);
        let applied = &matrix * &q;

        let q_re: Vec<f64> = applied.iter().map(|c| c.re).collect();
        let q_im: Vec<f64> = applied.iter().map(|c| c.im).collect();
        let mut full_re = vec![0.0; tree.len()];
        let mut full_im = vec![0.0; tree.len()];
        for (i, &leaf) in leaves.iter().enumerate() {
            full_re[leaf.index()] = q_re[i];
            full_im[leaf.index()] = q_im[i];
        }

        let mut v_re = vec![0.0; tree.len()];
        let mut v_im = vec![0.0; tree.len()];
        precond.apply(&full_re, Some(&full_im), &mut v_re, &mut v_im);

        for &leaf in &leaves {
            assert_relative_eq!(v_re[leaf.index()], 1.0, epsilon = 1e-6);
        }
    }
}
