//! Column-major data representation: vectors, selection vectors and chunks.

mod chunk;
mod selection;
#[allow(clippy::module_inception)]
mod vector;

pub use chunk::DataChunk;
pub use selection::SelectionVector;
pub use vector::{Vector, VectorBuffer, VectorKind, STANDARD_VECTOR_SIZE};
