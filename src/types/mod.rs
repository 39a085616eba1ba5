/// Variable type layer
///
/// Maps declared pin type names to runtime validators and answers the
/// compatibility question asked whenever two pins are connected.

// Type registry, descriptors and builtin coercions
pub mod registry;

pub use registry::{TypeDescriptor, TypeRegistry, VarType, OBJECT};
