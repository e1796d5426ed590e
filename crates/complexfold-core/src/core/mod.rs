//! # Core Module
//!
//! Foundational data structures and numeric primitives shared by the loss functions and the
//! learned modules.
//!
//! ## Architecture
//!
//! - **Geometry** ([`geometry`]) - Batched rigid frames on tensors and host-side rigid transforms
//! - **Residue Constants** ([`constants`]) - Rigid-group templates for amino acids and nucleotides,
//!   unified into one table and cached per dtype and device
//! - **Residue Models** ([`models`]) - Residue vocabulary (butype) and the residue partition
//! - **Utilities** ([`utils`]) - Batch flattening, table lookups, chunked evaluation and in-place ops

pub mod constants;
pub mod geometry;
pub mod models;
pub mod utils;
