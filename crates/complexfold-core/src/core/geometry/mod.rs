//! Rigid-body geometry.
//!
//! [`rigid`] holds the batched, differentiable frame algebra used inside the structure module.
//! [`transforms`] holds host-side `nalgebra` helpers used to derive the residue-constant tables.

pub mod rigid;
pub mod transforms;
