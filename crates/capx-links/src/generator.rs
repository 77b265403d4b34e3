//! Link generation: two counting/filling passes over the same pair recursion
//! the mesher uses, followed by a parallel coefficient fill.

use rayon::prelude::*;

use capx_core::{Element, ElementId, Tree};
use capx_hierarchy::{refine_criteria, PotentialKernel};

use crate::store::LinkEntry;

/// Tunables for one link-generation run.
#[derive(Clone, Copy, Debug)]
pub struct LinkGenConfig {
    /// Tighter than the mesher's `mesh_eps`; accepted pairs become links.
    pub eps: f64,
    pub mesh_curv_coeff: f64,
}

/// One accepted `(row, peer)` pair, before coefficients are filled in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct AcceptedPair {
    row: ElementId,
    peer: ElementId,
}

/// `true` if the pair should become a link: leaves are always accepted (the
/// multiply cannot refine further), otherwise the same ratio test the mesher
/// uses, tuned to the solver's `eps` rather than `mesh_eps`.
fn accept_pair<K: PotentialKernel>(
    kernel: &K,
    cfg: &LinkGenConfig,
    a: &Element,
    b: &Element,
    same_conductor: bool,
    global_max_measure: f64,
) -> bool {
    if a.is_leaf() && b.is_leaf() {
        return true;
    }
    let (exceeds, _) = refine_criteria(
        kernel,
        cfg.mesh_curv_coeff,
        cfg.eps,
        a,
        b,
        same_conductor,
        global_max_measure,
    );
    !exceeds
}

/// Walk the same top-down pair recursion as the mesher, but instead of
/// subdividing on a miss, descend into whichever side is not yet a leaf;
/// record every accepted `(row, peer)` pair found along the way, in both
/// directions.
fn collect_pairs<K: PotentialKernel>(
    tree: &Tree,
    kernel: &K,
    cfg: &LinkGenConfig,
    a: ElementId,
    b: ElementId,
    same_conductor: bool,
    global_max_measure: f64,
    out: &mut Vec<AcceptedPair>,
) {
    let mut stack = vec![(a, b)];
    while let Some((a, b)) = stack.pop() {
        let ea = tree.get(a);
        let eb = tree.get(b);

        if same_conductor && a == b && ea.is_leaf() {
            continue;
        }

        if accept_pair(kernel, cfg, ea, eb, same_conductor, global_max_measure) {
            out.push(AcceptedPair { row: a, peer: b });
            if a != b {
                out.push(AcceptedPair { row: b, peer: a });
            }
            continue;
        }

        let a_bigger = ea.dimension >= eb.dimension;
        if a_bigger && !ea.is_leaf() {
            let (l, r) = ea.children.expect("non-leaf has children");
            stack.push((l, b));
            stack.push((r, b));
        } else if !a_bigger && !eb.is_leaf() {
            let (l, r) = eb.children.expect("non-leaf has children");
            stack.push((a, l));
            stack.push((a, r));
        } else if !ea.is_leaf() {
            let (l, r) = ea.children.expect("non-leaf has children");
            stack.push((l, b));
            stack.push((r, b));
        } else if !eb.is_leaf() {
            let (l, r) = eb.children.expect("non-leaf has children");
            stack.push((a, l));
            stack.push((a, r));
        }
        // Both are leaves but the ratio test still rejected: nothing further
        // to refine, so the pair is simply dropped (no link, no error).
    }
}

/// Bytes occupied by one [`LinkEntry`] once paged to disk (see
/// `store::write_chunk`): an `f64` coefficient plus a `u32` peer index.
const BYTES_PER_LINK_ENTRY: u64 = 12;

/// Decide whether the generated links should be paged to disk: `true` when
/// free memory is less than `ooc_ratio` times the estimated resident size of
/// `entry_count` links.
#[must_use]
pub fn decide_out_of_core(entry_count: usize, free_bytes: u64, ooc_ratio: f64) -> bool {
    let estimated_bytes = entry_count as u64 * BYTES_PER_LINK_ENTRY;
    let threshold = (estimated_bytes as f64 * ooc_ratio) as u64;
    let page = free_bytes < threshold;
    if page {
        tracing::info!(
            target: "capx",
            entry_count,
            free_bytes,
            estimated_bytes,
            "link set exceeds in-core budget, paging to disk"
        );
    }
    page
}

/// Result of a link-generation run: per-row spans into a flat entry array,
/// ready to hand to [`crate::store::LinkStore`].
pub struct LinkBuildResult {
    pub entries: Vec<LinkEntry>,
    /// `(row, start, end)` spans into `entries`, one per row with at least
    /// one link.
    pub spans: Vec<(ElementId, u32, u32)>,
}

/// Run the full two-pass (count/fill) link generation over every unordered
/// pair of conductor roots, then fill coefficients in parallel over the
/// resulting rows.
pub fn generate_links<K: PotentialKernel>(
    tree: &Tree,
    kernel: &K,
    roots: &[ElementId],
    cfg: &LinkGenConfig,
) -> LinkBuildResult {
    let global_max_measure = roots
        .iter()
        .map(|&r| tree.get(r).dimension)
        .fold(0.0_f64, f64::max);

    // Pass 1 + 2 combined: the recursion itself is cheap relative to
    // coefficient evaluation, so "count" and "fill" collapse into one
    // traversal that records `(row, peer)` pairs; coefficients are computed
    // afterward, in parallel, which is where the real cost lives.
    let mut pairs = Vec::new();
    for i in 0..roots.len() {
        for j in i..roots.len() {
            collect_pairs(
                tree,
                kernel,
                cfg,
                roots[i],
                roots[j],
                i == j,
                global_max_measure,
                &mut pairs,
            );
        }
    }

    pairs.sort_by_key(|p| p.row);

    let mut spans = Vec::new();
    let mut entries = vec![
        LinkEntry { coefficient: 0.0, peer: ElementId(0) };
        pairs.len()
    ];

    let mut i = 0;
    while i < pairs.len() {
        let row = pairs[i].row;
        let start = i;
        while i < pairs.len() && pairs[i].row == row {
            i += 1;
        }
        spans.push((row, start as u32, i as u32));
    }

    // Parallel coefficient fill: each row's slice is disjoint, so threads
    // never alias a write target.
    entries
        .par_iter_mut()
        .enumerate()
        .for_each(|(idx, entry)| {
            let pair = pairs[idx];
            let row = tree.get(pair.row);
            let peer = tree.get(pair.peer);
            entry.coefficient = kernel.potential(peer, row).re;
            entry.peer = pair.peer;
        });

    LinkBuildResult { entries, spans }
}
