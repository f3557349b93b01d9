//! Scene/fitting engine: owns the scene graph and the avatar/garment
//! installation slots, estimates camera framing from loaded geometry, fits a
//! garment onto an avatar (skeleton bind first, bounding-box heuristics as
//! fallback), and hides avatar sub-meshes covered by the garment. GPU-backed
//! resources are reached only through the [`resources::RenderResources`]
//! trait so the whole engine runs headless in tests.

pub mod bounds;
pub mod camera;
pub mod color;
pub mod coverage;
pub mod engine;
pub mod fit;
pub mod graph;
pub mod loader;
pub mod resources;

pub use bounds::Aabb;
pub use camera::{OrbitController, PerspectiveCamera};
pub use color::Color;
pub use engine::{LoadOutcome, LoadRequest, SceneEngine, Slot};
pub use fit::{BoneMatch, FitParams, FitTransform};
pub use graph::{NodeId, SceneGraph};
pub use loader::{AssetLoader, LoadError};
pub use resources::{
    GeometryData, GeometryHandle, MaterialHandle, MaterialParams, NullResources, RenderResources,
};
