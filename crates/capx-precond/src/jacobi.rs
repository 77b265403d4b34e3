//! Jacobi preconditioner: `P = diag(self_coeff)^-1`. Cheapest mode, no
//! storage beyond one complex vector sized to the element arena.

use num_complex::Complex64;

use capx_core::{ElementId, Tree};
use capx_hierarchy::PotentialKernel;

use crate::Preconditioner;

pub struct JacobiPreconditioner {
    inv: Vec<Complex64>,
}

impl JacobiPreconditioner {
    #[must_use]
    pub fn build<K: PotentialKernel>(tree: &Tree, kernel: &K, roots: &[ElementId]) -> Self {
        let mut inv = vec![Complex64::new(0.0, 0.0); tree.len()];
        for &root in roots {
            for leaf in tree.leaves_under(root) {
                let elem = tree.get(leaf);
                let self_coeff = kernel.potential(elem, elem);
                inv[leaf.index()] = if self_coeff.norm() > 0.0 {
                    self_coeff.inv()
                } else {
                    Complex64::new(0.0, 0.0)
                };
            }
        }
        Self { inv }
    }
}

impl Preconditioner for JacobiPreconditioner {
    fn apply(&self, q_re: &[f64], q_im: Option<&[f64]>, v_re: &mut [f64], v_im: &mut [f64]) {
        for i in 0..q_re.len() {
            let q = Complex64::new(q_re[i], q_im.map_or(0.0, |im| im[i]));
            let v = self.inv[i] * q;
            v_re[i] = v.re;
            v_im[i] = v.im;
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
    fn jacobi_inverts_the_self_coefficient() {
        let mut tree = Tree::new();
        let l = tri_leaf(&mut tree, Vector3::new(0.0, 0.0, 0.0), 0.5);
        let r = tri_leaf(&mut tree, Vector3::new(5.0, 0.0, 0.0), 0.5);
        let root = build_super_hierarchy(&mut tree, vec![l, r], AxisCount::Three);

        let kernel = LaplaceKernel;
        let precond = JacobiPreconditioner::build(&tree, &kernel, &[root]);

        let self_coeff = kernel.potential(tree.get(l), tree.get(l));
        let mut q_re = vec![0.0; tree.len()];
        q_re[l.index()] = self_coeff.re;
        let mut v_re = vec![0.0; tree.len()];
        let mut v_im = vec![0.0; tree.len()];
        precond.apply(&q_re, None, &mut v_re, &mut v_im);

        assert_relative_eq!(v_re[l.index()], 1.0, epsilon = 1e-9);
    }
}
