use capx_core::{Element, Panel, Tree, Triangle};
use capx_hierarchy::{build_super_hierarchy, AxisCount, LaplaceKernel};
use capx_links::{generate_links, LinkGenConfig};
use nalgebra::Vector3;

fn tri_leaf(tree: &mut Tree, centroid: Vector3<f64>, half: f64) -> capx_core::ElementId {
    let t = Triangle::new([
        centroid - Vector3::new(half, 0.0, 0.0),
        centroid + Vector3::new(half, 0.0, 0.0),
        centroid + Vector3::new(0.0, half, 0.0),
    ]);
    tree.push(Element::leaf_from_panel(Panel::Triangle3D(t), 0, None))
}

#[test]
fn every_link_has_a_reciprocal_entry() {
    let mut tree = Tree::new();
    let mut leaves = Vec::new();
    for i in 0..6 {
        leaves.push(tri_leaf(&mut tree, Vector3::new(f64::from(i) * 2.0, 0.0, 0.0), 0.4));
    }
    let root = build_super_hierarchy(&mut tree, leaves, AxisCount::Three);

    let kernel = LaplaceKernel;
    let cfg = LinkGenConfig { eps: 1e-3, mesh_curv_coeff: 1.1 };
    let result = generate_links(&tree, &kernel, &[root], &cfg);

    let mut row_peers: std::collections::HashMap<_, std::collections::HashSet<_>> =
        std::collections::HashMap::new();
    for (row, start, end) in &result.spans {
        let peers: std::collections::HashSet<_> = result.entries[*start as usize..*end as usize]
            .iter()
            .map(|e| e.peer)
            .collect();
        row_peers.insert(*row, peers);
    }

    for (row, peers) in &row_peers {
        for peer in peers {
            let reciprocal = row_peers.get(peer).expect("peer row must also have links");
            assert!(
                reciprocal.contains(row),
                "link {row:?} -> {peer:?} has no reciprocal entry"
            );
        }
    }
}
