//! GPU resource lifecycle. The engine never touches a graphics API directly:
//! it allocates geometries and materials through [`RenderResources`], records
//! every handle in the owning installation's [`ResourceSet`], and releases
//! exactly that set on teardown. [`NullResources`] is the headless backend; it
//! counts allocations so leak checks are a straight comparison.

use std::collections::{BTreeMap, BTreeSet};

use fitroom_formats::Primitive;

use crate::bounds::Aabb;
use crate::color::Color;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GeometryHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MaterialHandle(pub u64);

/// CPU-side geometry ready for upload.
#[derive(Debug, Clone)]
pub struct GeometryData {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
}

impl GeometryData {
    pub fn from_primitive(primitive: &Primitive) -> Self {
        Self {
            positions: primitive.positions.clone(),
            normals: primitive.normals.clone(),
            indices: primitive.indices.clone(),
        }
    }

    pub fn local_bounds(&self) -> Aabb {
        Aabb::from_points(&self.positions)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialParams {
    pub base_color: Color,
    pub roughness: f32,
    pub metalness: f32,
    pub double_sided: bool,
    pub transparent: bool,
    pub alpha_test: f32,
    /// Negative depth bias keeps the garment shell from z-fighting the
    /// avatar surface beneath it.
    pub depth_bias: bool,
}

impl MaterialParams {
    /// The shared garment tint material.
    pub fn garment(base_color: Color) -> Self {
        Self {
            base_color,
            roughness: 0.7,
            metalness: 0.2,
            double_sided: true,
            transparent: true,
            alpha_test: 0.3,
            depth_bias: true,
        }
    }
}

impl Default for MaterialParams {
    fn default() -> Self {
        Self {
            base_color: Color::WHITE,
            roughness: 0.8,
            metalness: 0.0,
            double_sided: false,
            transparent: false,
            alpha_test: 0.0,
            depth_bias: false,
        }
    }
}

pub trait RenderResources {
    fn create_geometry(&mut self, data: &GeometryData) -> GeometryHandle;
    fn create_material(&mut self, params: &MaterialParams) -> MaterialHandle;
    /// In-place tint update; the handle and everything sharing it see the new
    /// color without reallocation.
    fn set_material_color(&mut self, handle: MaterialHandle, color: Color);
    fn dispose_geometry(&mut self, handle: GeometryHandle);
    fn dispose_material(&mut self, handle: MaterialHandle);
}

/// Handles allocated on behalf of one installation.
#[derive(Debug, Default)]
pub struct ResourceSet {
    geometries: Vec<GeometryHandle>,
    materials: Vec<MaterialHandle>,
}

impl ResourceSet {
    pub fn track_geometry(&mut self, handle: GeometryHandle) {
        self.geometries.push(handle);
    }

    pub fn track_material(&mut self, handle: MaterialHandle) {
        self.materials.push(handle);
    }

    pub fn geometry_count(&self) -> usize {
        self.geometries.len()
    }

    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    /// Dispose every tracked handle, leaving the set empty.
    pub fn release<R: RenderResources + ?Sized>(&mut self, resources: &mut R) {
        for handle in self.geometries.drain(..) {
            resources.dispose_geometry(handle);
        }
        for handle in self.materials.drain(..) {
            resources.dispose_material(handle);
        }
    }
}

/// Backend with no GPU behind it. Serves `--headless` runs and doubles as the
/// resource-tracking stub the lifecycle tests assert against.
#[derive(Debug, Default)]
pub struct NullResources {
    next_id: u64,
    live_geometries: BTreeSet<u64>,
    live_materials: BTreeSet<u64>,
    created_geometries: u64,
    created_materials: u64,
    material_colors: BTreeMap<u64, Color>,
}

impl NullResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_geometries(&self) -> usize {
        self.live_geometries.len()
    }

    pub fn live_materials(&self) -> usize {
        self.live_materials.len()
    }

    pub fn created_geometries(&self) -> u64 {
        self.created_geometries
    }

    pub fn created_materials(&self) -> u64 {
        self.created_materials
    }

    pub fn material_color(&self, handle: MaterialHandle) -> Option<Color> {
        self.material_colors.get(&handle.0).copied()
    }
}

impl RenderResources for NullResources {
    fn create_geometry(&mut self, _data: &GeometryData) -> GeometryHandle {
        self.next_id += 1;
        self.created_geometries += 1;
        self.live_geometries.insert(self.next_id);
        GeometryHandle(self.next_id)
    }

    fn create_material(&mut self, params: &MaterialParams) -> MaterialHandle {
        self.next_id += 1;
        self.created_materials += 1;
        self.live_materials.insert(self.next_id);
        self.material_colors.insert(self.next_id, params.base_color);
        MaterialHandle(self.next_id)
    }

    fn set_material_color(&mut self, handle: MaterialHandle, color: Color) {
        if let Some(slot) = self.material_colors.get_mut(&handle.0) {
            *slot = color;
        }
    }

    fn dispose_geometry(&mut self, handle: GeometryHandle) {
        self.live_geometries.remove(&handle.0);
    }

    fn dispose_material(&mut self, handle: MaterialHandle) {
        self.live_materials.remove(&handle.0);
        self.material_colors.remove(&handle.0);
    }
}
