//! wgpu implementation of the engine's resource trait. Geometries become
//! vertex/index buffer pairs, destroyed explicitly on dispose so repeated
//! load cycles cannot accumulate GPU memory. Materials stay CPU-side; their
//! parameters feed the per-draw uniforms each frame.

use std::collections::HashMap;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable, cast_slice};
use wgpu::util::DeviceExt;

use fitroom_scene::{
    Color, GeometryData, GeometryHandle, MaterialHandle, MaterialParams, RenderResources,
};

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

pub struct GpuGeometry {
    pub vertex_buffer: wgpu::Buffer,
    pub index_buffer: wgpu::Buffer,
    pub index_count: u32,
}

#[derive(Clone, Copy)]
pub struct GpuMaterial {
    pub params: MaterialParams,
    pub color: Color,
}

pub struct WgpuResources {
    device: Arc<wgpu::Device>,
    next_id: u64,
    geometries: HashMap<u64, GpuGeometry>,
    materials: HashMap<u64, GpuMaterial>,
}

impl WgpuResources {
    pub fn new(device: Arc<wgpu::Device>) -> Self {
        Self {
            device,
            next_id: 0,
            geometries: HashMap::new(),
            materials: HashMap::new(),
        }
    }

    pub fn geometry(&self, handle: GeometryHandle) -> Option<&GpuGeometry> {
        self.geometries.get(&handle.0)
    }

    pub fn material(&self, handle: MaterialHandle) -> Option<GpuMaterial> {
        self.materials.get(&handle.0).copied()
    }

    pub fn live_geometries(&self) -> usize {
        self.geometries.len()
    }
}

impl RenderResources for WgpuResources {
    fn create_geometry(&mut self, data: &GeometryData) -> GeometryHandle {
        let vertices: Vec<MeshVertex> = data
            .positions
            .iter()
            .zip(&data.normals)
            .map(|(position, normal)| MeshVertex {
                position: *position,
                normal: *normal,
            })
            .collect();
        let vertex_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("mesh-vertex-buffer"),
                contents: cast_slice(&vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });
        let index_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("mesh-index-buffer"),
                contents: cast_slice(&data.indices),
                usage: wgpu::BufferUsages::INDEX,
            });

        self.next_id += 1;
        self.geometries.insert(
            self.next_id,
            GpuGeometry {
                vertex_buffer,
                index_buffer,
                index_count: data.indices.len() as u32,
            },
        );
        GeometryHandle(self.next_id)
    }

    fn create_material(&mut self, params: &MaterialParams) -> MaterialHandle {
        self.next_id += 1;
        self.materials.insert(
            self.next_id,
            GpuMaterial {
                params: *params,
                color: params.base_color,
            },
        );
        MaterialHandle(self.next_id)
    }

    fn set_material_color(&mut self, handle: MaterialHandle, color: Color) {
        if let Some(material) = self.materials.get_mut(&handle.0) {
            material.color = color;
        }
    }

    fn dispose_geometry(&mut self, handle: GeometryHandle) {
        if let Some(geometry) = self.geometries.remove(&handle.0) {
            geometry.vertex_buffer.destroy();
            geometry.index_buffer.destroy();
        }
    }

    fn dispose_material(&mut self, handle: MaterialHandle) {
        self.materials.remove(&handle.0);
    }
}
