//! glTF 2.0 container decode. Accepts both the binary (`.glb`) and JSON
//! (`.gltf`) variants and produces a CPU-side document: node hierarchy, meshes
//! with optional skinning attributes, skins, and materials. Primitives
//! compressed with `KHR_draco_mesh_compression` are routed through the
//! companion decoder in [`crate::draco`].

use std::path::Path;

use anyhow::{Context, Result, bail};
use glam::{Mat4, Quat, Vec3};
use gltf::mesh::util::{ReadIndices, ReadJoints, ReadWeights};

use crate::draco::decode_draco_primitive;

/// Fully decoded model container.
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub nodes: Vec<Node>,
    pub roots: Vec<usize>,
    pub meshes: Vec<Mesh>,
    pub skins: Vec<Skin>,
    pub materials: Vec<Material>,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    pub mesh: Option<usize>,
    pub skin: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct Mesh {
    pub name: String,
    pub primitives: Vec<Primitive>,
}

#[derive(Debug, Clone)]
pub struct Primitive {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
    pub material: Option<usize>,
    pub skinning: Option<Skinning>,
}

/// Per-vertex joint indices and weights for a skinned primitive.
#[derive(Debug, Clone)]
pub struct Skinning {
    pub joints: Vec<[u16; 4]>,
    pub weights: Vec<[f32; 4]>,
}

#[derive(Debug, Clone)]
pub struct Skin {
    pub name: String,
    /// Indices into [`Document::nodes`].
    pub joints: Vec<usize>,
    pub inverse_bind: Vec<Mat4>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlphaMode {
    Opaque,
    Mask,
    Blend,
}

#[derive(Debug, Clone)]
pub struct Material {
    pub name: String,
    pub base_color: [f32; 4],
    pub roughness: f32,
    pub metalness: f32,
    pub alpha_mode: AlphaMode,
    pub alpha_cutoff: f32,
    pub double_sided: bool,
}

impl Material {
    /// Whether the material renders with alpha blending.
    pub fn transparent(&self) -> bool {
        self.alpha_mode == AlphaMode::Blend
    }
}

impl Document {
    /// Decode a container from raw bytes. External buffer references (a
    /// `.gltf` pointing at a sibling `.bin`) cannot be resolved from a byte
    /// slice; use [`Document::import`] for those.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let (doc, buffers, _images) =
            gltf::import_slice(bytes).context("importing glTF container from bytes")?;
        convert(&doc, &buffers)
    }

    /// Decode a container from disk, resolving external buffers.
    pub fn import(path: &Path) -> Result<Self> {
        let (doc, buffers, _images) = gltf::import(path)
            .with_context(|| format!("importing glTF container {}", path.display()))?;
        convert(&doc, &buffers)
    }

    /// Total vertex count across every primitive, for log summaries.
    pub fn vertex_count(&self) -> usize {
        self.meshes
            .iter()
            .flat_map(|mesh| mesh.primitives.iter())
            .map(|prim| prim.positions.len())
            .sum()
    }
}

fn convert(doc: &gltf::Document, buffers: &[gltf::buffer::Data]) -> Result<Document> {
    let mut nodes = Vec::with_capacity(doc.nodes().len());
    for node in doc.nodes() {
        let (translation, rotation, scale) = node.transform().decomposed();
        nodes.push(Node {
            name: node.name().unwrap_or_default().to_string(),
            parent: None,
            children: node.children().map(|child| child.index()).collect(),
            translation: Vec3::from(translation),
            rotation: Quat::from_array(rotation),
            scale: Vec3::from(scale),
            mesh: node.mesh().map(|mesh| mesh.index()),
            skin: node.skin().map(|skin| skin.index()),
        });
    }
    for index in 0..nodes.len() {
        let children = nodes[index].children.clone();
        for child in children {
            nodes[child].parent = Some(index);
        }
    }

    let roots = match doc.default_scene().or_else(|| doc.scenes().next()) {
        Some(scene) => scene.nodes().map(|node| node.index()).collect(),
        None => nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.parent.is_none())
            .map(|(index, _)| index)
            .collect(),
    };

    let mut meshes = Vec::with_capacity(doc.meshes().len());
    for mesh in doc.meshes() {
        let mut primitives = Vec::new();
        for prim in mesh.primitives() {
            primitives.push(
                read_primitive(doc, buffers, &prim)
                    .with_context(|| format!("decoding mesh '{}'", mesh.name().unwrap_or("?")))?,
            );
        }
        meshes.push(Mesh {
            name: mesh.name().unwrap_or_default().to_string(),
            primitives,
        });
    }

    let mut skins = Vec::with_capacity(doc.skins().len());
    for skin in doc.skins() {
        let joints: Vec<usize> = skin.joints().map(|joint| joint.index()).collect();
        let reader = skin.reader(|buf| buffers.get(buf.index()).map(|data| data.0.as_slice()));
        let inverse_bind: Vec<Mat4> = match reader.read_inverse_bind_matrices() {
            Some(matrices) => matrices
                .map(|columns| Mat4::from_cols_array_2d(&columns))
                .collect(),
            None => vec![Mat4::IDENTITY; joints.len()],
        };
        if inverse_bind.len() != joints.len() {
            bail!(
                "skin '{}' carries {} inverse bind matrices for {} joints",
                skin.name().unwrap_or("?"),
                inverse_bind.len(),
                joints.len()
            );
        }
        skins.push(Skin {
            name: skin.name().unwrap_or_default().to_string(),
            joints,
            inverse_bind,
        });
    }

    let materials = doc
        .materials()
        .filter(|material| material.index().is_some())
        .map(|material| Material {
            name: material.name().unwrap_or_default().to_string(),
            base_color: material.pbr_metallic_roughness().base_color_factor(),
            roughness: material.pbr_metallic_roughness().roughness_factor(),
            metalness: material.pbr_metallic_roughness().metallic_factor(),
            alpha_mode: match material.alpha_mode() {
                gltf::material::AlphaMode::Opaque => AlphaMode::Opaque,
                gltf::material::AlphaMode::Mask => AlphaMode::Mask,
                gltf::material::AlphaMode::Blend => AlphaMode::Blend,
            },
            alpha_cutoff: material.alpha_cutoff().unwrap_or(0.5),
            double_sided: material.double_sided(),
        })
        .collect();

    Ok(Document {
        nodes,
        roots,
        meshes,
        skins,
        materials,
    })
}

fn read_primitive(
    doc: &gltf::Document,
    buffers: &[gltf::buffer::Data],
    prim: &gltf::mesh::Primitive,
) -> Result<Primitive> {
    let material = prim.material().index();

    if prim
        .extension_value("KHR_draco_mesh_compression")
        .is_some()
    {
        let decoded = decode_draco_primitive(doc, buffers, prim)?;
        let vertex_count = decoded.positions.len();
        let normals = decoded
            .normals
            .unwrap_or_else(|| vec![[0.0, 1.0, 0.0]; vertex_count]);
        let skinning = match (decoded.joints, decoded.weights) {
            (Some(joints), Some(weights)) => Some(Skinning { joints, weights }),
            _ => None,
        };
        return Ok(Primitive {
            positions: decoded.positions,
            normals,
            indices: decoded.indices,
            material,
            skinning,
        });
    }

    let reader = prim.reader(|buf| buffers.get(buf.index()).map(|data| data.0.as_slice()));
    let positions: Vec<[f32; 3]> = reader
        .read_positions()
        .context("primitive is missing POSITION data")?
        .collect();

    let normals: Vec<[f32; 3]> = match reader.read_normals() {
        Some(iter) => iter.collect(),
        None => vec![[0.0, 1.0, 0.0]; positions.len()],
    };

    let indices: Vec<u32> = match reader.read_indices() {
        Some(ReadIndices::U8(iter)) => iter.map(u32::from).collect(),
        Some(ReadIndices::U16(iter)) => iter.map(u32::from).collect(),
        Some(ReadIndices::U32(iter)) => iter.collect(),
        None => {
            // Non-indexed triangles: synthesize a 0..n list.
            if positions.len() % 3 != 0 {
                bail!("primitive without indices has non-multiple-of-3 vertex count");
            }
            (0..positions.len() as u32).collect()
        }
    };

    let joints: Option<Vec<[u16; 4]>> = reader.read_joints(0).map(|set| match set {
        ReadJoints::U8(iter) => iter
            .map(|j| [j[0] as u16, j[1] as u16, j[2] as u16, j[3] as u16])
            .collect(),
        ReadJoints::U16(iter) => iter.collect(),
    });
    let weights: Option<Vec<[f32; 4]>> = reader.read_weights(0).map(|set| match set {
        ReadWeights::F32(iter) => iter.collect(),
        ReadWeights::U8(iter) => iter
            .map(|w| w.map(|value| value as f32 / 255.0))
            .collect(),
        ReadWeights::U16(iter) => iter
            .map(|w| w.map(|value| value as f32 / 65535.0))
            .collect(),
    });
    let skinning = match (joints, weights) {
        (Some(joints), Some(weights)) => Some(Skinning { joints, weights }),
        _ => None,
    };

    Ok(Primitive {
        positions,
        normals,
        indices,
        material,
        skinning,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Assemble a binary `.glb` container from a JSON chunk and a BIN chunk.
    fn build_glb(json: &serde_json::Value, bin: &[u8]) -> Vec<u8> {
        let mut json_bytes = serde_json::to_vec(json).expect("serialize glTF JSON");
        while json_bytes.len() % 4 != 0 {
            json_bytes.push(b' ');
        }
        let mut bin_bytes = bin.to_vec();
        while bin_bytes.len() % 4 != 0 {
            bin_bytes.push(0);
        }

        let total = 12 + 8 + json_bytes.len() + 8 + bin_bytes.len();
        let mut glb = Vec::with_capacity(total);
        glb.extend_from_slice(&0x4654_6C67u32.to_le_bytes()); // 'glTF'
        glb.extend_from_slice(&2u32.to_le_bytes());
        glb.extend_from_slice(&(total as u32).to_le_bytes());
        glb.extend_from_slice(&(json_bytes.len() as u32).to_le_bytes());
        glb.extend_from_slice(&0x4E4F_534Au32.to_le_bytes()); // 'JSON'
        glb.extend_from_slice(&json_bytes);
        glb.extend_from_slice(&(bin_bytes.len() as u32).to_le_bytes());
        glb.extend_from_slice(&0x004E_4942u32.to_le_bytes()); // 'BIN\0'
        glb.extend_from_slice(&bin_bytes);
        glb
    }

    fn push_f32s(bin: &mut Vec<u8>, values: &[f32]) {
        for value in values {
            bin.extend_from_slice(&value.to_le_bytes());
        }
    }

    fn triangle_glb() -> Vec<u8> {
        let mut bin = Vec::new();
        push_f32s(
            &mut bin,
            &[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
        );
        for index in [0u16, 1, 2] {
            bin.extend_from_slice(&index.to_le_bytes());
        }

        let json = json!({
            "asset": { "version": "2.0" },
            "scene": 0,
            "scenes": [{ "nodes": [0] }],
            "nodes": [{ "mesh": 0, "name": "Torso" }],
            "meshes": [{
                "name": "Torso",
                "primitives": [{
                    "attributes": { "POSITION": 0 },
                    "indices": 1,
                    "material": 0
                }]
            }],
            "materials": [{
                "name": "skin",
                "alphaMode": "BLEND",
                "doubleSided": false,
                "pbrMetallicRoughness": { "baseColorFactor": [0.8, 0.6, 0.5, 1.0] }
            }],
            "buffers": [{ "byteLength": bin.len() }],
            "bufferViews": [
                { "buffer": 0, "byteOffset": 0, "byteLength": 36 },
                { "buffer": 0, "byteOffset": 36, "byteLength": 6 }
            ],
            "accessors": [
                {
                    "bufferView": 0,
                    "componentType": 5126,
                    "count": 3,
                    "type": "VEC3",
                    "min": [0.0, 0.0, 0.0],
                    "max": [1.0, 1.0, 0.0]
                },
                { "bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR" }
            ]
        });
        build_glb(&json, &bin)
    }

    #[test]
    fn decodes_triangle_glb() {
        let document = Document::from_slice(&triangle_glb()).expect("decoded container");

        assert_eq!(document.roots, vec![0]);
        assert_eq!(document.nodes[0].name, "Torso");
        assert_eq!(document.nodes[0].mesh, Some(0));

        let prim = &document.meshes[0].primitives[0];
        assert_eq!(prim.positions.len(), 3);
        assert_eq!(prim.indices, vec![0, 1, 2]);
        assert_eq!(prim.material, Some(0));
        // Normals were absent in the source; the loader substitutes up.
        assert_eq!(prim.normals, vec![[0.0, 1.0, 0.0]; 3]);
        assert!(prim.skinning.is_none());

        let material = &document.materials[0];
        assert_eq!(material.alpha_mode, AlphaMode::Blend);
        assert!(material.transparent());
        assert!(!material.double_sided);
    }

    #[test]
    fn decodes_skinned_glb() {
        let mut bin = Vec::new();
        // POSITION (3 vertices)
        push_f32s(
            &mut bin,
            &[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
        );
        // JOINTS_0 as u16 vec4
        for joints in [[0u16, 1, 0, 0], [1, 0, 0, 0], [0, 0, 0, 0]] {
            for joint in joints {
                bin.extend_from_slice(&joint.to_le_bytes());
            }
        }
        // WEIGHTS_0 as f32 vec4
        push_f32s(
            &mut bin,
            &[
                0.75, 0.25, 0.0, 0.0, //
                1.0, 0.0, 0.0, 0.0, //
                1.0, 0.0, 0.0, 0.0,
            ],
        );
        // Inverse bind matrices: two identity mat4s.
        let identity = Mat4::IDENTITY.to_cols_array();
        push_f32s(&mut bin, &identity);
        push_f32s(&mut bin, &identity);

        let json = json!({
            "asset": { "version": "2.0" },
            "scene": 0,
            "scenes": [{ "nodes": [0, 1] }],
            "nodes": [
                { "mesh": 0, "skin": 0, "name": "shirt" },
                { "name": "Hips", "children": [2] },
                { "name": "Spine" }
            ],
            "meshes": [{
                "name": "shirt",
                "primitives": [{
                    "attributes": { "POSITION": 0, "JOINTS_0": 1, "WEIGHTS_0": 2 }
                }]
            }],
            "skins": [{
                "name": "shirt-rig",
                "joints": [1, 2],
                "inverseBindMatrices": 3
            }],
            "buffers": [{ "byteLength": bin.len() }],
            "bufferViews": [
                { "buffer": 0, "byteOffset": 0, "byteLength": 36 },
                { "buffer": 0, "byteOffset": 36, "byteLength": 24 },
                { "buffer": 0, "byteOffset": 60, "byteLength": 48 },
                { "buffer": 0, "byteOffset": 108, "byteLength": 128 }
            ],
            "accessors": [
                {
                    "bufferView": 0,
                    "componentType": 5126,
                    "count": 3,
                    "type": "VEC3",
                    "min": [0.0, 0.0, 0.0],
                    "max": [1.0, 1.0, 0.0]
                },
                { "bufferView": 1, "componentType": 5123, "count": 3, "type": "VEC4" },
                { "bufferView": 2, "componentType": 5126, "count": 3, "type": "VEC4" },
                { "bufferView": 3, "componentType": 5126, "count": 2, "type": "MAT4" }
            ]
        });

        let document = Document::from_slice(&build_glb(&json, &bin)).expect("decoded container");

        let prim = &document.meshes[0].primitives[0];
        // No indices in the source: the loader synthesizes 0..n.
        assert_eq!(prim.indices, vec![0, 1, 2]);
        let skinning = prim.skinning.as_ref().expect("skinning attributes");
        assert_eq!(skinning.joints[0], [0, 1, 0, 0]);
        assert!((skinning.weights[0][0] - 0.75).abs() < 1e-6);

        let skin = &document.skins[0];
        assert_eq!(skin.joints, vec![1, 2]);
        assert_eq!(skin.inverse_bind.len(), 2);
        assert_eq!(document.nodes[skin.joints[0]].name, "Hips");
        assert_eq!(document.nodes[skin.joints[1]].name, "Spine");
        assert_eq!(document.nodes[1].children, vec![2]);
        assert_eq!(document.nodes[2].parent, Some(1));
    }

    #[test]
    fn rejects_garbage_bytes() {
        let err = Document::from_slice(&[0u8; 32]).expect_err("garbage must not decode");
        assert!(format!("{err:#}").contains("importing glTF container"));
    }

    #[test]
    fn imports_from_disk() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("triangle.glb");
        std::fs::write(&path, triangle_glb()).expect("write fixture");

        let document = Document::import(&path).expect("decoded container");
        assert_eq!(document.vertex_count(), 3);
    }
}
