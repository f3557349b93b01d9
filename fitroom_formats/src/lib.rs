pub mod draco;
pub mod model;

pub use model::{AlphaMode, Document, Material, Mesh, Node, Primitive, Skin, Skinning};
