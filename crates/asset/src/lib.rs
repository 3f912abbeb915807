//! Asset loading for toon-shaded character shapes.
//! Descriptor and material scripts, PMD models, VMD motions and the
//! import steps that turn them into shape data.

mod binary;

pub mod material;
pub mod mesh;
pub mod pmd;
pub mod script;
pub mod sequence;
pub mod shape;
pub mod texture;
pub mod vmd;

pub use binary::RawName;
pub use material::{BlendOp, MaterialRegistry, MaterialSpec, SurfaceBindings};
pub use mesh::{ImportedMesh, MeshNode, import_model};
pub use sequence::ResolvedSequence;
pub use shape::{MeshImportSpec, SequenceImportSpec, Shape, ShapeConstructor, ShapeHook};
