//! Arena-backed scene graph. Nodes carry local TRS transforms, a visibility
//! flag, and an optional mesh payload; world transforms and subtree bounds are
//! derived on demand. The engine is the sole mutator.

use glam::{Mat4, Quat, Vec3};

use crate::bounds::Aabb;
use crate::resources::{GeometryHandle, MaterialHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
pub struct SceneNode {
    pub name: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    pub visible: bool,
    pub payload: NodePayload,
}

#[derive(Debug, Clone)]
pub enum NodePayload {
    Group,
    Bone,
    Mesh(MeshAttachment),
}

#[derive(Debug, Clone)]
pub struct MeshAttachment {
    pub geometry: GeometryHandle,
    pub material: MaterialHandle,
    pub local_bounds: Aabb,
    pub cast_shadow: bool,
    pub receive_shadow: bool,
    pub skin: Option<SkinAttachment>,
}

/// A mesh deformed by a bone hierarchy: joint nodes plus the inverse bind
/// matrix for each joint, in matching order.
#[derive(Debug, Clone)]
pub struct SkinAttachment {
    pub joints: Vec<NodeId>,
    pub inverse_bind: Vec<Mat4>,
}

impl SceneNode {
    pub fn group(name: impl Into<String>) -> Self {
        Self::with_payload(name, NodePayload::Group)
    }

    pub fn bone(name: impl Into<String>) -> Self {
        Self::with_payload(name, NodePayload::Bone)
    }

    pub fn mesh(name: impl Into<String>, attachment: MeshAttachment) -> Self {
        Self::with_payload(name, NodePayload::Mesh(attachment))
    }

    fn with_payload(name: impl Into<String>, payload: NodePayload) -> Self {
        Self {
            name: name.into(),
            parent: None,
            children: Vec::new(),
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            visible: true,
            payload,
        }
    }

    pub fn local_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }

    pub fn mesh_attachment(&self) -> Option<&MeshAttachment> {
        match &self.payload {
            NodePayload::Mesh(attachment) => Some(attachment),
            _ => None,
        }
    }

    pub fn mesh_attachment_mut(&mut self) -> Option<&mut MeshAttachment> {
        match &mut self.payload {
            NodePayload::Mesh(attachment) => Some(attachment),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct SceneGraph {
    nodes: Vec<Option<SceneNode>>,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, parent: Option<NodeId>, mut node: SceneNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        node.parent = parent;
        self.nodes.push(Some(node));
        if let Some(parent) = parent {
            if let Some(Some(parent_node)) = self.nodes.get_mut(parent.0) {
                parent_node.children.push(id);
            }
        }
        id
    }

    pub fn get(&self, id: NodeId) -> Option<&SceneNode> {
        self.nodes.get(id.0).and_then(|slot| slot.as_ref())
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut SceneNode> {
        self.nodes.get_mut(id.0).and_then(|slot| slot.as_mut())
    }

    pub fn live_count(&self) -> usize {
        self.nodes.iter().filter(|slot| slot.is_some()).count()
    }

    /// Depth-first ids of `root` and everything below it.
    pub fn subtree(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.get(id) {
                out.push(id);
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    /// Mesh-payload nodes within the subtree of `root`.
    pub fn mesh_nodes(&self, root: NodeId) -> Vec<NodeId> {
        self.subtree(root)
            .into_iter()
            .filter(|id| {
                self.get(*id)
                    .map(|node| matches!(node.payload, NodePayload::Mesh(_)))
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Detach `root` from its parent and drop its whole subtree.
    pub fn remove_subtree(&mut self, root: NodeId) {
        let parent = self.get(root).and_then(|node| node.parent);
        if let Some(parent) = parent {
            if let Some(parent_node) = self.get_mut(parent) {
                parent_node.children.retain(|child| *child != root);
            }
        }
        for id in self.subtree(root) {
            self.nodes[id.0] = None;
        }
    }

    pub fn world_matrix(&self, id: NodeId) -> Mat4 {
        let mut matrix = Mat4::IDENTITY;
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            match self.get(current) {
                Some(node) => {
                    matrix = node.local_matrix() * matrix;
                    cursor = node.parent;
                }
                None => break,
            }
        }
        matrix
    }

    /// Visible only when the node and every ancestor is visible.
    pub fn is_visible(&self, id: NodeId) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            match self.get(current) {
                Some(node) if !node.visible => return false,
                Some(node) => cursor = node.parent,
                None => return false,
            }
        }
        true
    }

    /// World-space box around every mesh in the subtree, visibility ignored.
    pub fn world_bounds(&self, root: NodeId) -> Aabb {
        let mut bounds = Aabb::EMPTY;
        for id in self.mesh_nodes(root) {
            if let Some(attachment) = self.get(id).and_then(|node| node.mesh_attachment()) {
                let world = attachment
                    .local_bounds
                    .transformed(&self.world_matrix(id));
                bounds = bounds.union(&world);
            }
        }
        bounds
    }

    /// World-space box of a single mesh node.
    pub fn mesh_world_bounds(&self, id: NodeId) -> Option<Aabb> {
        let attachment = self.get(id)?.mesh_attachment()?;
        Some(attachment.local_bounds.transformed(&self.world_matrix(id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{GeometryHandle, MaterialHandle};

    fn unit_mesh(name: &str) -> SceneNode {
        SceneNode::mesh(
            name,
            MeshAttachment {
                geometry: GeometryHandle(0),
                material: MaterialHandle(0),
                local_bounds: Aabb::new(Vec3::splat(-0.5), Vec3::splat(0.5)),
                cast_shadow: true,
                receive_shadow: true,
                skin: None,
            },
        )
    }

    #[test]
    fn world_matrix_chains_parent_transforms() {
        let mut graph = SceneGraph::new();
        let root = graph.add(None, SceneNode::group("root"));
        graph.get_mut(root).unwrap().translation = Vec3::new(1.0, 0.0, 0.0);
        let child = graph.add(Some(root), unit_mesh("box"));
        graph.get_mut(child).unwrap().translation = Vec3::new(0.0, 2.0, 0.0);

        let world = graph.world_matrix(child).transform_point3(Vec3::ZERO);
        assert_eq!(world, Vec3::new(1.0, 2.0, 0.0));
    }

    #[test]
    fn world_bounds_scale_with_the_root() {
        let mut graph = SceneGraph::new();
        let root = graph.add(None, SceneNode::group("root"));
        graph.get_mut(root).unwrap().scale = Vec3::splat(2.0);
        graph.add(Some(root), unit_mesh("box"));

        let bounds = graph.world_bounds(root);
        assert_eq!(bounds.size(), Vec3::splat(2.0));
    }

    #[test]
    fn hidden_ancestor_hides_descendants() {
        let mut graph = SceneGraph::new();
        let root = graph.add(None, SceneNode::group("root"));
        let child = graph.add(Some(root), unit_mesh("box"));
        assert!(graph.is_visible(child));

        graph.get_mut(root).unwrap().visible = false;
        assert!(!graph.is_visible(child));
    }

    #[test]
    fn remove_subtree_detaches_and_drops() {
        let mut graph = SceneGraph::new();
        let root = graph.add(None, SceneNode::group("root"));
        let limb = graph.add(Some(root), SceneNode::group("limb"));
        graph.add(Some(limb), unit_mesh("box"));
        assert_eq!(graph.live_count(), 3);

        graph.remove_subtree(limb);
        assert_eq!(graph.live_count(), 1);
        assert!(graph.get(limb).is_none());
        assert!(graph.get(root).unwrap().children.is_empty());
    }
}
