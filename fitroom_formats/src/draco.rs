//! `KHR_draco_mesh_compression` primitive decode. The compressed payload
//! lives in a dedicated buffer view; the extension's attribute map assigns a
//! Draco attribute id to each glTF semantic, and the decoded stream packs the
//! index list first, then every attribute in ascending id order.

use anyhow::{Context, Result, bail};
use draco_decoder::{AttributeDataType, MeshDecodeConfig, decode_mesh};
use gltf::mesh::Semantic;

/// Geometry recovered from a Draco-compressed primitive.
#[derive(Debug, Default)]
pub(crate) struct DracoGeometry {
    pub positions: Vec<[f32; 3]>,
    pub normals: Option<Vec<[f32; 3]>>,
    pub joints: Option<Vec<[u16; 4]>>,
    pub weights: Option<Vec<[f32; 4]>>,
    pub indices: Vec<u32>,
}

pub(crate) fn decode_draco_primitive(
    doc: &gltf::Document,
    buffers: &[gltf::buffer::Data],
    prim: &gltf::mesh::Primitive,
) -> Result<DracoGeometry> {
    let ext = prim
        .extension_value("KHR_draco_mesh_compression")
        .context("primitive lacks the Draco extension")?;
    let ext = ext.as_object().context("Draco extension is not an object")?;
    let view_index = ext
        .get("bufferView")
        .and_then(|value| value.as_u64())
        .context("Draco extension is missing its bufferView")? as usize;
    let attributes = ext
        .get("attributes")
        .and_then(|value| value.as_object())
        .context("Draco extension is missing its attribute map")?;

    let view = doc
        .views()
        .nth(view_index)
        .context("Draco bufferView index out of range")?;
    let data = &buffers
        .get(view.buffer().index())
        .context("Draco buffer missing")?
        .0;
    let start = view.offset();
    let end = start + view.length();
    if end > data.len() {
        bail!("Draco bufferView overruns its buffer");
    }
    let compressed = &data[start..end];

    // Sort semantics by Draco attribute id; the decoded stream follows it.
    let mut mapped: Vec<(u32, Semantic)> = Vec::new();
    for (name, value) in attributes {
        let id = value
            .as_u64()
            .with_context(|| format!("Draco attribute id for {name} is not an integer"))?
            as u32;
        mapped.push((id, parse_semantic(name)?));
    }
    mapped.sort_by_key(|(id, _)| *id);

    let position_accessor = prim
        .get(&Semantic::Positions)
        .context("Draco primitive is missing its POSITION accessor")?;
    let vertex_count = position_accessor.count() as u32;
    let index_count = prim.indices().map(|acc| acc.count() as u32).unwrap_or(0);

    let mut config = MeshDecodeConfig::new(vertex_count, index_count);
    for (_, semantic) in &mapped {
        let accessor = prim
            .get(semantic)
            .with_context(|| format!("accessor for Draco attribute {semantic:?} missing"))?;
        config.add_attribute(
            dimension_of(accessor.dimensions()) as u32,
            data_type_of(accessor.data_type()),
        );
    }

    let decoded = pollster::block_on(decode_mesh(compressed, &config))
        .context("Draco decode failed")?;

    let mut geometry = DracoGeometry::default();
    let mut offset = 0usize;

    // Indices: u16 payload while the count fits, u32 otherwise.
    if index_count > 0 {
        if index_count <= u16::MAX as u32 {
            let byte_len = index_count as usize * 2;
            let slice = take(&decoded, &mut offset, byte_len)?;
            for chunk in slice.chunks_exact(2) {
                geometry
                    .indices
                    .push(u32::from(u16::from_le_bytes([chunk[0], chunk[1]])));
            }
        } else {
            let byte_len = index_count as usize * 4;
            let slice = take(&decoded, &mut offset, byte_len)?;
            for chunk in slice.chunks_exact(4) {
                geometry
                    .indices
                    .push(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
            }
        }
    } else {
        geometry.indices = (0..vertex_count).collect();
    }

    for (_, semantic) in &mapped {
        let accessor = prim.get(semantic).context("mapped accessor disappeared")?;
        let dim = dimension_of(accessor.dimensions());
        let data_type = data_type_of(accessor.data_type());
        let byte_len = dim * vertex_count as usize * data_type.size_in_bytes();
        let slice = take(&decoded, &mut offset, byte_len)?;

        match (semantic, data_type) {
            (Semantic::Positions, AttributeDataType::Float32) => {
                geometry.positions = read_vec3s(slice, dim);
            }
            (Semantic::Normals, AttributeDataType::Float32) => {
                geometry.normals = Some(read_vec3s(slice, dim));
            }
            (Semantic::Joints(0), AttributeDataType::UInt8) => {
                geometry.joints = Some(
                    slice
                        .chunks_exact(dim)
                        .map(|c| widen4(dim, |i| c[i] as u16))
                        .collect(),
                );
            }
            (Semantic::Joints(0), AttributeDataType::UInt16) => {
                geometry.joints = Some(
                    slice
                        .chunks_exact(2 * dim)
                        .map(|c| widen4(dim, |i| u16::from_le_bytes([c[2 * i], c[2 * i + 1]])))
                        .collect(),
                );
            }
            (Semantic::Weights(0), AttributeDataType::Float32) => {
                geometry.weights = Some(
                    slice
                        .chunks_exact(4 * dim)
                        .map(|c| widen4(dim, |i| read_f32(c, 4 * i)))
                        .collect(),
                );
            }
            (Semantic::Weights(0), AttributeDataType::UInt8) => {
                geometry.weights = Some(
                    slice
                        .chunks_exact(dim)
                        .map(|c| widen4(dim, |i| c[i] as f32 / 255.0))
                        .collect(),
                );
            }
            (Semantic::Weights(0), AttributeDataType::UInt16) => {
                geometry.weights = Some(
                    slice
                        .chunks_exact(2 * dim)
                        .map(|c| {
                            widen4(dim, |i| {
                                u16::from_le_bytes([c[2 * i], c[2 * i + 1]]) as f32 / 65535.0
                            })
                        })
                        .collect(),
                );
            }
            // Texture coordinates, colors, tangents: decoded to keep the
            // stream walk aligned, then dropped.
            _ => {}
        }
    }

    if geometry.positions.is_empty() {
        bail!("Draco stream produced no POSITION data");
    }
    Ok(geometry)
}

fn parse_semantic(name: &str) -> Result<Semantic> {
    let semantic = match name {
        "POSITION" => Semantic::Positions,
        "NORMAL" => Semantic::Normals,
        "TANGENT" => Semantic::Tangents,
        other => {
            if let Some(set) = other.strip_prefix("TEXCOORD_") {
                Semantic::TexCoords(set.parse().unwrap_or(0))
            } else if let Some(set) = other.strip_prefix("JOINTS_") {
                Semantic::Joints(set.parse().unwrap_or(0))
            } else if let Some(set) = other.strip_prefix("WEIGHTS_") {
                Semantic::Weights(set.parse().unwrap_or(0))
            } else if let Some(set) = other.strip_prefix("COLOR_") {
                Semantic::Colors(set.parse().unwrap_or(0))
            } else {
                bail!("unsupported Draco attribute semantic {other}");
            }
        }
    };
    Ok(semantic)
}

fn dimension_of(dimensions: gltf::accessor::Dimensions) -> usize {
    match dimensions {
        gltf::accessor::Dimensions::Scalar => 1,
        gltf::accessor::Dimensions::Vec2 => 2,
        gltf::accessor::Dimensions::Vec3 => 3,
        gltf::accessor::Dimensions::Vec4 => 4,
        _ => 3,
    }
}

fn data_type_of(data_type: gltf::accessor::DataType) -> AttributeDataType {
    match data_type {
        gltf::accessor::DataType::F32 => AttributeDataType::Float32,
        gltf::accessor::DataType::U32 => AttributeDataType::UInt32,
        gltf::accessor::DataType::U16 => AttributeDataType::UInt16,
        gltf::accessor::DataType::I16 => AttributeDataType::Int16,
        gltf::accessor::DataType::U8 => AttributeDataType::UInt8,
        gltf::accessor::DataType::I8 => AttributeDataType::Int8,
    }
}

fn take<'a>(decoded: &'a [u8], offset: &mut usize, len: usize) -> Result<&'a [u8]> {
    let end = *offset + len;
    if end > decoded.len() {
        bail!("Draco decode output shorter than its attribute layout");
    }
    let slice = &decoded[*offset..end];
    *offset = end;
    Ok(slice)
}

fn read_f32(bytes: &[u8], at: usize) -> f32 {
    f32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn read_vec3s(slice: &[u8], dim: usize) -> Vec<[f32; 3]> {
    slice
        .chunks_exact(4 * dim)
        .map(|chunk| {
            [
                read_f32(chunk, 0),
                if dim > 1 { read_f32(chunk, 4) } else { 0.0 },
                if dim > 2 { read_f32(chunk, 8) } else { 0.0 },
            ]
        })
        .collect()
}

fn widen4<T: Copy + Default>(dim: usize, read: impl Fn(usize) -> T) -> [T; 4] {
    let mut out = [T::default(); 4];
    for (i, slot) in out.iter_mut().enumerate().take(dim.min(4)) {
        *slot = read(i);
    }
    out
}
