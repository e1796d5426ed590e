//! Tensor utilities shared across the crate.
//!
//! - [`tensor`] - Leading-dimension flattening and table lookups by index tensors
//! - [`chunk`] - Evaluation of a computation in slices along one axis
//! - [`inplace`] - In-place row-wise division on host storage

pub mod chunk;
pub mod inplace;
pub mod tensor;
