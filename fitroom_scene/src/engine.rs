//! The fitting engine. Owns the scene graph and the two installation slots
//! (avatar, garment), reacts to collaborator input changes, and pumps
//! background decode completions. Each slot keeps a generation counter; a
//! completion carrying a stale generation is discarded, never installed.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use glam::{Mat4, Vec3};

use fitroom_formats::Document;

use crate::bounds::Aabb;
use crate::camera::{OrbitController, PerspectiveCamera, framing_distance};
use crate::color::Color;
use crate::coverage::resolve_coverage;
use crate::fit::{BoneMatch, FitParams, FitTransform, fallback_fit, match_bones};
use crate::graph::{MeshAttachment, NodeId, SceneGraph, SceneNode, SkinAttachment};
use crate::loader::LoadError;
use crate::resources::{
    GeometryData, MaterialHandle, MaterialParams, RenderResources, ResourceSet,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Avatar,
    Garment,
}

/// Work order handed to the background loader.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub slot: Slot,
    pub generation: u64,
    pub source: PathBuf,
}

/// Decode completion delivered back to the engine on the frame tick.
#[derive(Debug)]
pub struct LoadOutcome {
    pub slot: Slot,
    pub generation: u64,
    pub result: Result<Document, LoadError>,
}

pub struct AvatarInstallation {
    pub root: NodeId,
    pub skeleton: Option<Vec<NodeId>>,
    pub bone_index: BTreeMap<String, NodeId>,
    pub bounds: Aabb,
    resources: ResourceSet,
}

pub struct GarmentInstallation {
    pub root: NodeId,
    /// The one material shared by every garment sub-mesh.
    pub material: MaterialHandle,
    pub bound_bones: Option<BTreeMap<String, BoneMatch>>,
    pub fit: Option<FitTransform>,
    resources: ResourceSet,
}

/// One renderable mesh for the viewer's frame pass.
#[derive(Debug, Clone, Copy)]
pub struct DrawItem {
    pub geometry: crate::resources::GeometryHandle,
    pub material: MaterialHandle,
    pub model: Mat4,
    pub cast_shadow: bool,
    pub receive_shadow: bool,
}

enum MaterialPolicy {
    /// Use the document's own materials (avatar path), with transparency
    /// fixups applied.
    FromDocument,
    /// Every primitive shares one already-created handle (garment path).
    Shared(MaterialHandle),
}

pub struct SceneEngine<R: RenderResources> {
    graph: SceneGraph,
    resources: R,
    params: FitParams,
    camera: PerspectiveCamera,
    orbit: OrbitController,
    avatar: Option<AvatarInstallation>,
    garment: Option<GarmentInstallation>,
    avatar_generation: u64,
    garment_generation: u64,
    avatar_pending: bool,
    garment_pending: bool,
    deferred_garment: Option<(u64, Document)>,
    garment_color: Color,
    garment_visible: bool,
    hidden: BTreeSet<NodeId>,
    on_loading_complete: Option<Box<dyn FnMut()>>,
    torn_down: bool,
}

impl<R: RenderResources> SceneEngine<R> {
    pub fn new(resources: R, params: FitParams) -> Self {
        Self {
            graph: SceneGraph::new(),
            resources,
            params,
            camera: PerspectiveCamera::default(),
            orbit: OrbitController::new(),
            avatar: None,
            garment: None,
            avatar_generation: 0,
            garment_generation: 0,
            avatar_pending: false,
            garment_pending: false,
            deferred_garment: None,
            garment_color: Color::WHITE,
            garment_visible: true,
            hidden: BTreeSet::new(),
            on_loading_complete: None,
            torn_down: false,
        }
    }

    /// Collaborator hook, invoked at most once per triggering input change.
    pub fn set_loading_listener(&mut self, listener: impl FnMut() + 'static) {
        self.on_loading_complete = Some(Box::new(listener));
    }

    fn signal_loading_complete(&mut self) {
        log::debug!("loading complete");
        if let Some(listener) = self.on_loading_complete.as_mut() {
            listener();
        }
    }

    /// Change the avatar source. Returns the load request to hand to the
    /// loader, or `None` when the source is absent (the slot is simply torn
    /// down) or the engine is torn down.
    pub fn set_avatar_source(&mut self, source: Option<&Path>) -> Option<LoadRequest> {
        if self.torn_down {
            return None;
        }
        self.avatar_generation += 1;
        self.avatar_pending = false;
        self.teardown_avatar();
        match source {
            None => {
                // A garment parked behind the old avatar load would otherwise
                // wait forever; no avatar outcome will carry this generation.
                if let Some((generation, document)) = self.deferred_garment.take() {
                    if generation == self.garment_generation {
                        self.garment_pending = false;
                        self.install_garment(&document);
                        self.signal_loading_complete();
                    }
                }
                self.signal_loading_complete();
                None
            }
            Some(path) => {
                self.avatar_pending = true;
                Some(LoadRequest {
                    slot: Slot::Avatar,
                    generation: self.avatar_generation,
                    source: path.to_path_buf(),
                })
            }
        }
    }

    /// Change the garment source. Same contract as [`Self::set_avatar_source`].
    pub fn set_garment_source(&mut self, source: Option<&Path>) -> Option<LoadRequest> {
        if self.torn_down {
            return None;
        }
        self.garment_generation += 1;
        self.garment_pending = false;
        self.deferred_garment = None;
        self.teardown_garment();
        match source {
            None => {
                self.signal_loading_complete();
                None
            }
            Some(path) => {
                self.garment_pending = true;
                Some(LoadRequest {
                    slot: Slot::Garment,
                    generation: self.garment_generation,
                    source: path.to_path_buf(),
                })
            }
        }
    }

    /// Deliver a decode completion. Stale generations are discarded here;
    /// the decode itself ran to completion harmlessly.
    pub fn finish_load(&mut self, outcome: LoadOutcome) {
        if self.torn_down {
            return;
        }
        match outcome.slot {
            Slot::Avatar => {
                if outcome.generation != self.avatar_generation {
                    log::debug!("discarding stale avatar load (generation {})", outcome.generation);
                    return;
                }
                self.avatar_pending = false;
                let failed = match outcome.result {
                    Ok(document) => {
                        self.install_avatar(&document);
                        false
                    }
                    Err(err) => {
                        log::error!("avatar decode failed: {err}");
                        true
                    }
                };
                // Garment fitting depends on the avatar, so a garment that
                // finished first was parked; resolve it now.
                if let Some((generation, document)) = self.deferred_garment.take() {
                    if generation == self.garment_generation {
                        self.garment_pending = false;
                        self.install_garment(&document);
                        self.signal_loading_complete();
                    }
                }
                if failed || !self.garment_pending {
                    self.signal_loading_complete();
                }
            }
            Slot::Garment => {
                if outcome.generation != self.garment_generation {
                    log::debug!(
                        "discarding stale garment load (generation {})",
                        outcome.generation
                    );
                    return;
                }
                match outcome.result {
                    Ok(document) => {
                        if self.avatar_pending {
                            self.deferred_garment = Some((outcome.generation, document));
                            return;
                        }
                        self.garment_pending = false;
                        self.install_garment(&document);
                        self.signal_loading_complete();
                    }
                    Err(err) => {
                        self.garment_pending = false;
                        log::error!("garment decode failed: {err}");
                        self.signal_loading_complete();
                    }
                }
            }
        }
    }

    /// Tint change on an installed garment mutates the shared material in
    /// place; the decoder is never re-run.
    pub fn set_garment_color(&mut self, color: Color) {
        self.garment_color = color;
        if self.torn_down {
            return;
        }
        if let Some(garment) = self.garment.as_ref() {
            self.resources.set_material_color(garment.material, color);
        }
    }

    /// Visibility flips the installed root and re-resolves coverage; no
    /// reload.
    pub fn set_garment_visible(&mut self, visible: bool) {
        self.garment_visible = visible;
        if self.torn_down {
            return;
        }
        if let Some(root) = self.garment.as_ref().map(|g| g.root) {
            if let Some(node) = self.graph.get_mut(root) {
                node.visible = visible;
            }
            self.refresh_coverage();
        }
    }

    /// Drop both installations and restore the default controls.
    pub fn reset(&mut self) {
        self.set_avatar_source(None);
        self.set_garment_source(None);
        self.garment_color = Color::WHITE;
        self.garment_visible = true;
        self.orbit = OrbitController::new();
    }

    /// Viewport teardown: release every installation. Safe to call once;
    /// every later operation is a silent no-op.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.avatar_generation += 1;
        self.garment_generation += 1;
        self.teardown_avatar();
        self.teardown_garment();
        self.torn_down = true;
    }

    fn teardown_avatar(&mut self) {
        if let Some(mut installation) = self.avatar.take() {
            self.graph.remove_subtree(installation.root);
            installation.resources.release(&mut self.resources);
            self.strip_dangling_garment_skins();
        }
        self.refresh_coverage();
    }

    fn teardown_garment(&mut self) {
        if let Some(mut installation) = self.garment.take() {
            self.graph.remove_subtree(installation.root);
            installation.resources.release(&mut self.resources);
        }
        self.refresh_coverage();
    }

    /// A garment bound to a removed avatar skeleton must not keep node ids
    /// into freed slots.
    fn strip_dangling_garment_skins(&mut self) {
        let Some(root) = self.garment.as_ref().map(|g| g.root) else {
            return;
        };
        for id in self.graph.mesh_nodes(root) {
            let dangling = self
                .graph
                .get(id)
                .and_then(|node| node.mesh_attachment())
                .and_then(|mesh| mesh.skin.as_ref())
                .map(|skin| {
                    skin.joints
                        .iter()
                        .any(|joint| self.graph.get(*joint).is_none())
                })
                .unwrap_or(false);
            if dangling {
                if let Some(mesh) = self.graph.get_mut(id).and_then(|n| n.mesh_attachment_mut()) {
                    mesh.skin = None;
                }
            }
        }
        if let Some(garment) = self.garment.as_mut() {
            garment.bound_bones = None;
        }
    }

    fn refresh_coverage(&mut self) {
        match (self.avatar.as_ref(), self.garment.as_ref()) {
            (Some(avatar), Some(garment)) => {
                self.hidden = resolve_coverage(&mut self.graph, avatar.root, garment.root);
            }
            (Some(avatar), None) => {
                // Garment gone: every avatar mesh comes back.
                for id in self.graph.mesh_nodes(avatar.root) {
                    if let Some(node) = self.graph.get_mut(id) {
                        node.visible = true;
                    }
                }
                self.hidden.clear();
            }
            _ => self.hidden.clear(),
        }
    }

    fn install_avatar(&mut self, document: &Document) {
        let mut resources = ResourceSet::default();
        let (root, prim_nodes) =
            self.instantiate(document, "avatar", MaterialPolicy::FromDocument, &mut resources);

        let bounds = self.graph.world_bounds(root);
        let size = bounds.size();
        if !bounds.is_empty() {
            let distance = framing_distance(self.camera.fov_y_degrees, size.max_element());
            self.orbit
                .frame(distance, Vec3::new(0.0, size.y * 0.5, 0.0));
        }

        let mut skeleton = None;
        let mut bone_index = BTreeMap::new();
        for ids in prim_nodes.values() {
            for id in ids {
                let Some(skin) = self
                    .graph
                    .get(*id)
                    .and_then(|node| node.mesh_attachment())
                    .and_then(|mesh| mesh.skin.clone())
                else {
                    continue;
                };
                for joint in &skin.joints {
                    if let Some(node) = self.graph.get(*joint) {
                        bone_index.insert(node.name.clone(), *joint);
                    }
                }
                skeleton = Some(skin.joints);
            }
        }

        log::info!(
            "avatar installed: {} meshes, {} bones, bounds {:.2}x{:.2}x{:.2}",
            self.graph.mesh_nodes(root).len(),
            bone_index.len(),
            size.x,
            size.y,
            size.z
        );

        self.avatar = Some(AvatarInstallation {
            root,
            skeleton,
            bone_index,
            bounds,
            resources,
        });
        self.refresh_coverage();
    }

    fn install_garment(&mut self, document: &Document) {
        let mut resources = ResourceSet::default();
        let material = self
            .resources
            .create_material(&MaterialParams::garment(self.garment_color));
        resources.track_material(material);

        let (root, prim_nodes) = self.instantiate(
            document,
            "garment",
            MaterialPolicy::Shared(material),
            &mut resources,
        );

        // Skeleton bind, when the avatar has bones to offer.
        let mut bound_bones: BTreeMap<String, BoneMatch> = BTreeMap::new();
        let mut bound_any = false;
        let avatar_bone_index = self
            .avatar
            .as_ref()
            .filter(|avatar| avatar.skeleton.is_some())
            .map(|avatar| avatar.bone_index.clone());
        if let Some(avatar_bones) = avatar_bone_index {
            for ids in prim_nodes.values() {
                for id in ids {
                    let Some(skin) = self
                        .graph
                        .get(*id)
                        .and_then(|node| node.mesh_attachment())
                        .and_then(|mesh| mesh.skin.clone())
                    else {
                        continue;
                    };
                    if skin.joints.len() != skin.inverse_bind.len() {
                        continue;
                    }
                    let names: Vec<String> = skin
                        .joints
                        .iter()
                        .map(|joint| {
                            self.graph
                                .get(*joint)
                                .map(|node| node.name.clone())
                                .unwrap_or_default()
                        })
                        .collect();
                    let mapping = match_bones(&names, &avatar_bones);
                    if mapping.confidence < self.params.bind_confidence_min {
                        log::debug!(
                            "skeleton bind confidence {:.2} below {:.2}; falling back",
                            mapping.confidence,
                            self.params.bind_confidence_min
                        );
                        continue;
                    }
                    let joints: Vec<NodeId> = mapping
                        .matches
                        .iter()
                        .zip(&skin.joints)
                        .map(|(m, original)| match m {
                            BoneMatch::Exact(id) | BoneMatch::Synonym(id) => *id,
                            BoneMatch::Placeholder => *original,
                        })
                        .collect();
                    for (name, m) in names.iter().zip(&mapping.matches) {
                        bound_bones.insert(name.clone(), *m);
                    }
                    if let Some(mesh) =
                        self.graph.get_mut(*id).and_then(|n| n.mesh_attachment_mut())
                    {
                        mesh.skin = Some(SkinAttachment {
                            joints,
                            inverse_bind: skin.inverse_bind,
                        });
                    }
                    bound_any = true;
                }
            }
        }

        // Bounding-box fallback when no skinned mesh was bindable.
        let mut fit = None;
        if !bound_any {
            if let Some(avatar) = self.avatar.as_ref() {
                let garment_bounds = self.graph.world_bounds(root);
                if let Some(transform) =
                    fallback_fit(&avatar.bounds, &garment_bounds, &self.params)
                {
                    if let Some(node) = self.graph.get_mut(root) {
                        node.scale = Vec3::splat(transform.scale);
                        node.rotation = transform.rotation;
                        node.translation = transform.translation;
                    }
                    fit = Some(transform);
                }
            }
        }

        if let Some(node) = self.graph.get_mut(root) {
            node.visible = self.garment_visible;
        }

        log::info!(
            "garment installed: {} meshes, bind={}, fit scale {:?}",
            self.graph.mesh_nodes(root).len(),
            bound_any,
            fit.map(|f| f.scale)
        );

        self.garment = Some(GarmentInstallation {
            root,
            material,
            bound_bones: if bound_bones.is_empty() {
                None
            } else {
                Some(bound_bones)
            },
            fit,
            resources,
        });
        self.refresh_coverage();
    }

    /// Build graph nodes for a decoded document. Returns the new root and the
    /// mesh-primitive nodes created for each document node index.
    fn instantiate(
        &mut self,
        document: &Document,
        label: &str,
        policy: MaterialPolicy,
        resources: &mut ResourceSet,
    ) -> (NodeId, HashMap<usize, Vec<NodeId>>) {
        let root = self.graph.add(None, SceneNode::group(label));

        let joint_indices: BTreeSet<usize> = document
            .skins
            .iter()
            .flat_map(|skin| skin.joints.iter().copied())
            .collect();

        let mut material_cache: HashMap<Option<usize>, MaterialHandle> = HashMap::new();
        let mut node_map: HashMap<usize, NodeId> = HashMap::new();
        let mut prim_nodes: HashMap<usize, Vec<NodeId>> = HashMap::new();

        let mut stack: Vec<(usize, NodeId)> = document
            .roots
            .iter()
            .rev()
            .map(|index| (*index, root))
            .collect();
        while let Some((index, parent)) = stack.pop() {
            let Some(doc_node) = document.nodes.get(index) else {
                continue;
            };
            let mut node = if joint_indices.contains(&index) {
                SceneNode::bone(doc_node.name.clone())
            } else {
                SceneNode::group(doc_node.name.clone())
            };
            node.translation = doc_node.translation;
            node.rotation = doc_node.rotation;
            node.scale = doc_node.scale;
            let id = self.graph.add(Some(parent), node);
            node_map.insert(index, id);

            if let Some(mesh_index) = doc_node.mesh {
                if let Some(mesh) = document.meshes.get(mesh_index) {
                    let multi = mesh.primitives.len() > 1;
                    for (prim_index, primitive) in mesh.primitives.iter().enumerate() {
                        let data = GeometryData::from_primitive(primitive);
                        let local_bounds = data.local_bounds();
                        let geometry = self.resources.create_geometry(&data);
                        resources.track_geometry(geometry);

                        let material = match &policy {
                            MaterialPolicy::Shared(handle) => *handle,
                            MaterialPolicy::FromDocument => {
                                let key = primitive.material;
                                match material_cache.get(&key) {
                                    Some(handle) => *handle,
                                    None => {
                                        let params = document_material_params(document, key);
                                        let handle = self.resources.create_material(&params);
                                        resources.track_material(handle);
                                        material_cache.insert(key, handle);
                                        handle
                                    }
                                }
                            }
                        };

                        let base_name = if mesh.name.is_empty() {
                            doc_node.name.clone()
                        } else {
                            mesh.name.clone()
                        };
                        let name = if multi {
                            format!("{base_name}_{prim_index}")
                        } else {
                            base_name
                        };
                        let prim_id = self.graph.add(
                            Some(id),
                            SceneNode::mesh(
                                name,
                                MeshAttachment {
                                    geometry,
                                    material,
                                    local_bounds,
                                    cast_shadow: true,
                                    receive_shadow: true,
                                    skin: None,
                                },
                            ),
                        );
                        prim_nodes.entry(index).or_default().push(prim_id);
                    }
                }
            }

            stack.extend(doc_node.children.iter().rev().map(|child| (*child, id)));
        }

        // Skins resolve after the whole hierarchy exists.
        for (index, doc_node) in document.nodes.iter().enumerate() {
            let Some(skin_index) = doc_node.skin else {
                continue;
            };
            let Some(skin) = document.skins.get(skin_index) else {
                continue;
            };
            let joints: Vec<NodeId> = skin
                .joints
                .iter()
                .filter_map(|joint| node_map.get(joint).copied())
                .collect();
            if joints.len() != skin.joints.len() {
                log::warn!("skin '{}' references nodes outside the scene", skin.name);
                continue;
            }
            if let Some(ids) = prim_nodes.get(&index) {
                for id in ids {
                    if let Some(mesh) =
                        self.graph.get_mut(*id).and_then(|n| n.mesh_attachment_mut())
                    {
                        mesh.skin = Some(SkinAttachment {
                            joints: joints.clone(),
                            inverse_bind: skin.inverse_bind.clone(),
                        });
                    }
                }
            }
        }

        (root, prim_nodes)
    }

    /// Renderable meshes this frame: visible nodes of both installations.
    pub fn draw_items(&self) -> Vec<DrawItem> {
        let mut items = Vec::new();
        let roots = self
            .avatar
            .as_ref()
            .map(|a| a.root)
            .into_iter()
            .chain(self.garment.as_ref().map(|g| g.root));
        for root in roots {
            for id in self.graph.mesh_nodes(root) {
                if !self.graph.is_visible(id) {
                    continue;
                }
                if let Some(mesh) = self.graph.get(id).and_then(|node| node.mesh_attachment()) {
                    items.push(DrawItem {
                        geometry: mesh.geometry,
                        material: mesh.material,
                        model: self.graph.world_matrix(id),
                        cast_shadow: mesh.cast_shadow,
                        receive_shadow: mesh.receive_shadow,
                    });
                }
            }
        }
        items
    }

    pub fn graph(&self) -> &SceneGraph {
        &self.graph
    }

    pub fn camera(&self) -> &PerspectiveCamera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut PerspectiveCamera {
        &mut self.camera
    }

    pub fn orbit(&self) -> &OrbitController {
        &self.orbit
    }

    pub fn orbit_mut(&mut self) -> &mut OrbitController {
        &mut self.orbit
    }

    pub fn resources(&self) -> &R {
        &self.resources
    }

    pub fn resources_mut(&mut self) -> &mut R {
        &mut self.resources
    }

    pub fn avatar(&self) -> Option<&AvatarInstallation> {
        self.avatar.as_ref()
    }

    pub fn garment(&self) -> Option<&GarmentInstallation> {
        self.garment.as_ref()
    }

    pub fn hidden(&self) -> &BTreeSet<NodeId> {
        &self.hidden
    }

    pub fn garment_color(&self) -> Color {
        self.garment_color
    }

    pub fn garment_visible(&self) -> bool {
        self.garment_visible
    }

    /// True while any slot has an in-flight decode.
    pub fn is_loading(&self) -> bool {
        self.avatar_pending || self.garment_pending
    }
}

fn document_material_params(document: &Document, index: Option<usize>) -> MaterialParams {
    let Some(material) = index.and_then(|i| document.materials.get(i)) else {
        return MaterialParams::default();
    };
    let transparent = material.transparent();
    MaterialParams {
        base_color: Color::new(
            material.base_color[0],
            material.base_color[1],
            material.base_color[2],
        ),
        roughness: material.roughness,
        metalness: material.metalness,
        // Thin transparent shells self-cull when single-sided; force both
        // faces and a mid alpha threshold.
        double_sided: material.double_sided || transparent,
        transparent,
        alpha_test: if transparent {
            0.5
        } else if material.alpha_mode == fitroom_formats::AlphaMode::Mask {
            material.alpha_cutoff
        } else {
            0.0
        },
        depth_bias: false,
    }
}
