//! Arena-indexed binary tree of elements (leaves and super-nodes).
//!
//! Nodes are addressed by [`ElementId`], a plain index into a flat `Vec`,
//! never by pointer. Children, parents and siblings are all stored as
//! indices, so walking the tree never needs `Rc`/`RefCell` and the whole
//! structure can be serialized or paged to disk unchanged. Traversal helpers
//! favour an explicit stack over recursion, since the tree depth tracks
//! geometry size and an unbounded call stack is not an option for the
//! million-panel inputs this crate targets.

use nalgebra::Vector3;

use crate::geom::{Segment, Triangle};

/// Index into a [`Tree`]'s element arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ElementId(pub u32);

impl ElementId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Per-element boolean attributes, packed into a byte rather than a bitflags
/// crate since the set is small and fixed by the original panel format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ElementFlags(pub u8);

impl ElementFlags {
    /// Element sits on a dielectric (as opposed to conductor) interface.
    pub const IS_DIEL: u8 = 0b0000_0001;
    /// `geo_normal` already points towards the dielectric reference point;
    /// if unset, the stored normal had to be flipped to satisfy that
    /// orientation convention.
    pub const OUTPERM_NORMAL_DIR: u8 = 0b0000_0010;
    /// Element is an internal super-node produced by the hierarchy builder,
    /// not a leaf panel read from the input deck.
    pub const IS_SUPER_NODE: u8 = 0b0000_0100;
    /// Element was produced by adaptive mesh refinement rather than being
    /// present verbatim in the input deck.
    pub const IS_REFINED: u8 = 0b0000_1000;

    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub fn contains(self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    pub fn set(&mut self, bit: u8, value: bool) {
        if value {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }
}

/// Leaf-only geometry payload. Super-nodes carry no geometry of their own,
/// only the bounding/centroid summary fields on [`Element`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Panel {
    Triangle3D(Triangle),
    Segment2D(Segment),
}

impl Panel {
    #[must_use]
    pub fn dimension(&self) -> f64 {
        match self {
            Panel::Triangle3D(t) => t.dimension(),
            Panel::Segment2D(s) => s.dimension(),
        }
    }

    #[must_use]
    pub fn max_side(&self) -> f64 {
        match self {
            Panel::Triangle3D(t) => t.max_side(),
            Panel::Segment2D(s) => s.max_side(),
        }
    }

    #[must_use]
    pub fn centroid3(&self) -> Vector3<f64> {
        match self {
            Panel::Triangle3D(t) => t.centroid(),
            Panel::Segment2D(s) => {
                let c = s.centroid();
                Vector3::new(c.x, c.y, 0.0)
            }
        }
    }
}

/// A single node in the hierarchy: either a leaf panel read from the deck
/// (possibly refined) or an internal super-node summarizing its children.
#[derive(Clone, Debug)]
pub struct Element {
    pub parent: Option<ElementId>,
    pub children: Option<(ElementId, ElementId)>,
    pub conductor: u32,
    pub diel_index: Option<u8>,
    pub flags: ElementFlags,

    pub centroid: Vector3<f64>,
    pub dimension: f64,
    pub max_side: f64,
    pub geo_normal: Vector3<f64>,

    /// `None` for super-nodes; `Some` for leaf panels.
    pub panel: Option<Panel>,

    /// First index into the owning [`Tree`]'s link arrays for this element's
    /// row, one past the last index lives on the next element at the same
    /// level (kept explicit rather than inferred, since refinement can
    /// insert elements out of that order).
    pub link_start: u32,
    pub link_end: u32,

    /// Charge / potential scratch used by the matvec and GMRES, real and
    /// imaginary parts kept side by side rather than as `Complex64` so the
    /// element stays `Copy`-friendly and cache-dense during tree walks.
    pub charge_re: f64,
    pub charge_im: f64,
    pub potential_re: f64,
    pub potential_im: f64,
}

impl Element {
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    #[must_use]
    pub fn is_super_node(&self) -> bool {
        self.flags.contains(ElementFlags::IS_SUPER_NODE)
    }

    /// Build a fresh leaf element from a panel, deriving the bounding
    /// summary fields (centroid, dimension, max_side, geo_normal) from the
    /// panel geometry itself rather than requiring callers to recompute them.
    #[must_use]
    pub fn leaf_from_panel(panel: Panel, conductor: u32, diel_index: Option<u8>) -> Self {
        let (centroid, dimension, max_side, geo_normal) = match &panel {
            Panel::Triangle3D(t) => (t.centroid(), t.dimension(), t.max_side(), t.geo_normal()),
            Panel::Segment2D(s) => {
                let c = s.centroid();
                let n = s.geo_normal();
                (
                    Vector3::new(c.x, c.y, 0.0),
                    s.dimension(),
                    s.max_side(),
                    Vector3::new(n.x, n.y, 0.0),
                )
            }
        };
        Element {
            parent: None,
            children: None,
            conductor,
            diel_index,
            flags: ElementFlags::empty(),
            centroid,
            dimension,
            max_side,
            geo_normal,
            panel: Some(panel),
            link_start: 0,
            link_end: 0,
            charge_re: 0.0,
            charge_im: 0.0,
            potential_re: 0.0,
            potential_im: 0.0,
        }
    }
}

/// Arena holding every element ever created for one run: deck leaves,
/// refinement children, and hierarchy super-nodes, all addressed by
/// [`ElementId`]. Elements are never removed once created, only linked in
/// or out of the active root set, so ids stay stable for the run's lifetime.
#[derive(Clone, Debug, Default)]
pub struct Tree {
    elements: Vec<Element>,
    /// Ids of elements with no parent: leaves not yet folded into a
    /// super-hierarchy, or the root(s) once the hierarchy builder runs.
    pub roots: Vec<ElementId>,
}

impl Tree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn get(&self, id: ElementId) -> &Element {
        &self.elements[id.index()]
    }

    pub fn get_mut(&mut self, id: ElementId) -> &mut Element {
        &mut self.elements[id.index()]
    }

    /// Append a new element and return its id.
    pub fn push(&mut self, element: Element) -> ElementId {
        let id = ElementId(u32::try_from(self.elements.len()).expect("element arena overflow"));
        self.elements.push(element);
        id
    }

    pub fn iter(&self) -> impl Iterator<Item = (ElementId, &Element)> {
        self.elements
            .iter()
            .enumerate()
            .map(|(i, e)| (ElementId(u32::try_from(i).expect("element arena overflow")), e))
    }

    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.elements.iter().filter(|e| e.is_leaf()).count()
    }

    /// Non-recursive post-order walk starting at `root`: every node is
    /// visited only after both of its children have been. Used by the
    /// up-sweep (charge aggregation) phase of the matrix-vector multiply and
    /// by the super-hierarchy builder's bottom-up summary pass.
    ///
    /// Implemented with an explicit stack of `(id, state)` frames rather than
    /// a recursive closure: `state == 0` means "first visit, push children
    /// and re-queue self at state 1", `state == 1` means "both children
    /// already produced their outputs, now visit self".
    pub fn walk_post_order(&self, root: ElementId, mut visit: impl FnMut(ElementId, &Element)) {
        let mut stack: Vec<(ElementId, u8)> = vec![(root, 0)];
        while let Some((id, state)) = stack.pop() {
            let elem = self.get(id);
            match (state, elem.children) {
                (0, Some((left, right))) => {
                    stack.push((id, 1));
                    stack.push((right, 0));
                    stack.push((left, 0));
                }
                _ => visit(id, elem),
            }
        }
    }

    /// Non-recursive pre-order walk: a node is visited before its children.
    /// Used by the down-sweep (potential distribution) phase of the
    /// matrix-vector multiply.
    pub fn walk_pre_order(&self, root: ElementId, mut visit: impl FnMut(ElementId, &Element)) {
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let elem = self.get(id);
            visit(id, elem);
            if let Some((left, right)) = elem.children {
                stack.push(right);
                stack.push(left);
            }
        }
    }

    /// Split a leaf element's panel in two, turning `id` into a super-node
    /// in place and appending the two new leaf children to the arena.
    /// Returns the child ids. `id` keeps its old `link_start`/`link_end` and
    /// scratch fields meaningless after this call; callers must regenerate
    /// links for the affected region.
    ///
    /// # Panics
    /// Panics if `id` is not a leaf.
    pub fn subdivide_leaf(&mut self, id: ElementId) -> (ElementId, ElementId) {
        let elem = self.get(id);
        assert!(elem.is_leaf(), "subdivide_leaf called on a non-leaf element");
        let panel = elem.panel.expect("leaf element always carries a panel");
        let conductor = elem.conductor;
        let diel_index = elem.diel_index;
        let parent_flags = elem.flags;

        let (left_panel, right_panel) = match panel {
            Panel::Triangle3D(t) => {
                let (a, b) = t.subdivide();
                (Panel::Triangle3D(a), Panel::Triangle3D(b))
            }
            Panel::Segment2D(s) => {
                let (a, b) = s.subdivide();
                (Panel::Segment2D(a), Panel::Segment2D(b))
            }
        };

        let mut left = Element::leaf_from_panel(left_panel, conductor, diel_index);
        let mut right = Element::leaf_from_panel(right_panel, conductor, diel_index);
        left.flags.set(ElementFlags::IS_REFINED, true);
        right.flags.set(ElementFlags::IS_REFINED, true);
        if parent_flags.contains(ElementFlags::IS_DIEL) {
            left.flags.set(ElementFlags::IS_DIEL, true);
            right.flags.set(ElementFlags::IS_DIEL, true);
        }

        let left_id = self.push(left);
        let right_id = self.push(right);
        self.get_mut(left_id).parent = Some(id);
        self.get_mut(right_id).parent = Some(id);

        let node = self.get_mut(id);
        node.children = Some((left_id, right_id));
        node.flags.set(ElementFlags::IS_SUPER_NODE, true);
        node.panel = None;

        (left_id, right_id)
    }

    /// Collect every leaf id reachable from `root`, in left-to-right order.
    #[must_use]
    pub fn leaves_under(&self, root: ElementId) -> Vec<ElementId> {
        let mut out = Vec::new();
        self.walk_pre_order(root, |id, elem| {
            if elem.is_leaf() {
                out.push(id);
            }
        });
        out
    }
}
