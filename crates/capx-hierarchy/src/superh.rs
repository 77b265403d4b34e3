//! Top-down super-hierarchy builder: folds a flat list of leaf panels
//! belonging to one conductor into a balanced binary tree of super-nodes,
//! splitting on the longest axis of the centroid bounding box at each level.

use capx_core::{Element, ElementFlags, ElementId, Tree};
use nalgebra::Vector3;

/// Number of spatial axes considered for a split: 2 in the plane for 2D
/// problems (z held at 0), 3 in space for 3D.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AxisCount {
    Two,
    Three,
}

/// Tiny coordinate nudge applied when a median split produces an empty half
/// because every panel shares the same coordinate on the chosen axis.
const SPLIT_EPSILON: f64 = 1e-9;

#[derive(Clone, Copy)]
struct Bounds {
    min: Vector3<f64>,
    max: Vector3<f64>,
}

impl Bounds {
    fn from_centroids(tree: &Tree, ids: &[ElementId]) -> Self {
        let mut min = Vector3::from_element(f64::INFINITY);
        let mut max = Vector3::from_element(f64::NEG_INFINITY);
        for &id in ids {
            let c = tree.get(id).centroid;
            min = min.zip_map(&c, f64::min);
            max = max.zip_map(&c, f64::max);
        }
        Bounds { min, max }
    }

    /// Axis (0=x,1=y,2=z) with the largest extent, restricted to the axes
    /// `axes` allows.
    fn longest_axis(&self, axes: AxisCount) -> usize {
        let extent = self.max - self.min;
        let n = match axes {
            AxisCount::Two => 2,
            AxisCount::Three => 3,
        };
        let mut best = 0;
        let mut best_extent = f64::NEG_INFINITY;
        for i in 0..n {
            if extent[i] > best_extent {
                best_extent = extent[i];
                best = i;
            }
        }
        best
    }

    fn midplane(&self, axis: usize) -> f64 {
        0.5 * (self.min[axis] + self.max[axis])
    }
}

/// Build a super-hierarchy over `leaves`, a flat set of leaf panels belonging
/// to a single conductor, and return the id of the resulting root.
///
/// # Panics
/// Panics if `leaves` is empty; callers are expected to skip conductors with
/// no panels before calling this.
pub fn build_super_hierarchy(tree: &mut Tree, leaves: Vec<ElementId>, axes: AxisCount) -> ElementId {
    assert!(!leaves.is_empty(), "cannot build a hierarchy over zero panels");
    recur_build(tree, leaves, axes)
}

fn recur_build(tree: &mut Tree, ids: Vec<ElementId>, axes: AxisCount) -> ElementId {
    if ids.len() == 1 {
        return ids[0];
    }

    let (below, above) = split(tree, &ids, axes);

    let left = recur_build(tree, below, axes);
    let right = recur_build(tree, above, axes);

    make_super_node(tree, left, right)
}

/// Partition `ids` into a "below" and "above" half by centroid coordinate on
/// the bounding box's longest axis, guaranteeing both halves are non-empty
/// whenever `ids.len() > 1`.
fn split(tree: &Tree, ids: &[ElementId], axes: AxisCount) -> (Vec<ElementId>, Vec<ElementId>) {
    let bounds = Bounds::from_centroids(tree, ids);
    let axis = bounds.longest_axis(axes);
    let mid = bounds.midplane(axis);

    let partition = |threshold: f64| -> (Vec<ElementId>, Vec<ElementId>) {
        let mut below = Vec::new();
        let mut above = Vec::new();
        for &id in ids {
            if tree.get(id).centroid[axis] <= threshold {
                below.push(id);
            } else {
                above.push(id);
            }
        }
        (below, above)
    };

    let (below, above) = partition(mid);
    if !below.is_empty() && !above.is_empty() {
        return (below, above);
    }

    // All panels share the same coordinate on this axis: nudge and retry.
    let (below, above) = partition(mid + SPLIT_EPSILON);
    if !below.is_empty() && !above.is_empty() {
        return (below, above);
    }

    // Still degenerate: fall back to a deterministic round-robin split so
    // the recursion always terminates.
    let mut below = Vec::new();
    let mut above = Vec::new();
    for (i, &id) in ids.iter().enumerate() {
        if i % 2 == 0 {
            below.push(id);
        } else {
            above.push(id);
        }
    }
    (below, above)
}

fn make_super_node(tree: &mut Tree, left: ElementId, right: ElementId) -> ElementId {
    let l = tree.get(left);
    let r = tree.get(right);
    let centroid = (l.centroid + r.centroid) / 2.0;
    let dimension = l.dimension + r.dimension;
    let max_side = l.max_side.max(r.max_side);
    let conductor = l.conductor;

    let mut flags = ElementFlags::empty();
    flags.set(ElementFlags::IS_SUPER_NODE, true);

    let node = Element {
        parent: None,
        children: Some((left, right)),
        conductor,
        diel_index: None,
        flags,
        centroid,
        dimension,
        max_side,
        geo_normal: Vector3::zeros(),
        panel: None,
        link_start: 0,
        link_end: 0,
        charge_re: 0.0,
        charge_im: 0.0,
        potential_re: 0.0,
        potential_im: 0.0,
    };
    let id = tree.push(node);
    tree.get_mut(left).parent = Some(id);
    tree.get_mut(right).parent = Some(id);
    id
}
