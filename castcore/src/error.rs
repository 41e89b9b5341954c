use thiserror::Error;

use crate::TypeHandle;

/// Failures raised by casts and array accesses. Never retried at this layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CastError {
    #[error("index {index} is outside the bounds of an array of length {length}")]
    OutOfBounds { index: usize, length: usize },

    /// `found` is the stored value's type, or the requested type for element addresses.
    #[error("array element type mismatch: {found} is not compatible with element type {element}")]
    TypeMismatch { element: TypeHandle, found: TypeHandle },

    #[error("unable to cast object of type {from} to type {to}")]
    CastIllegal { from: TypeHandle, to: TypeHandle },

    #[error("object reference not set to an instance of an object")]
    NullTarget,

    #[error("object of type {0} is not an array")]
    NotAnArray(TypeHandle),
}
