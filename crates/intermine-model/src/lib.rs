//! Data model of an InterMine warehouse: classes, their fields, and path resolution.
mod descriptor;
mod model;
mod path;

#[cfg(feature = "fixtures")]
pub mod fixtures;

pub use descriptor::{AttributeType, ClassDescriptor, FieldDescriptor, FieldKind};
pub use model::{Model, ModelError};
pub use path::{PathEnd, ResolvedPath, Subclasses};
