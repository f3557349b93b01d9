//! Coverage resolver: hides avatar sub-meshes that sit under the garment so
//! skin does not poke through clothing. Known body-region names are hidden
//! outright; everything else falls back to a tolerance-expanded bounding-box
//! overlap test.

use std::collections::BTreeSet;

use crate::bounds::Aabb;
use crate::graph::{NodeId, SceneGraph};

/// Lowercased substrings of avatar part names that clothing conventionally
/// covers.
pub const COVERED_REGION_KEYWORDS: &[&str] = &["torso", "chest", "body", "upperbody"];

/// World-unit padding on garment boxes before the overlap test.
pub const COVERAGE_TOLERANCE: f32 = 0.01;

/// Recompute which avatar meshes the garment covers, mutating their
/// visibility flags, and return the hidden set. Re-running with unchanged
/// installations yields the same set. A hidden garment releases every avatar
/// mesh.
pub fn resolve_coverage(
    graph: &mut SceneGraph,
    avatar_root: NodeId,
    garment_root: NodeId,
) -> BTreeSet<NodeId> {
    let mut hidden = BTreeSet::new();

    let garment_visible = graph
        .get(garment_root)
        .map(|node| node.visible)
        .unwrap_or(false);

    let garment_boxes: Vec<Aabb> = graph
        .mesh_nodes(garment_root)
        .into_iter()
        .filter_map(|id| graph.mesh_world_bounds(id))
        .map(|bounds| bounds.expanded(COVERAGE_TOLERANCE))
        .collect();

    for id in graph.mesh_nodes(avatar_root) {
        let name = match graph.get(id) {
            Some(node) => node.name.to_lowercase(),
            None => continue,
        };

        let covered = if !garment_visible {
            false
        } else if COVERED_REGION_KEYWORDS
            .iter()
            .any(|keyword| name.contains(keyword))
        {
            true
        } else {
            match graph.mesh_world_bounds(id) {
                Some(bounds) => garment_boxes.iter().any(|gb| bounds.intersects(gb)),
                None => false,
            }
        };

        if let Some(node) = graph.get_mut(id) {
            node.visible = !covered;
        }
        if covered {
            hidden.insert(id);
        }
    }

    hidden
}
