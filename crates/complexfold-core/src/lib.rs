//! # complexfold Core Library
//!
//! Differentiable building blocks for protein and RNA complex structure prediction, written
//! on top of the `candle` tensor library.
//!
//! ## Architectural Philosophy
//!
//! The library follows a strict layering so that numeric contracts stay testable in isolation.
//!
//! - **[`core`]: The Foundation.** Rigid-frame tensor algebra (`Rigid`), host-side geometry
//!   helpers, the residue-type constant tables and their per-(dtype, device) cache, the residue
//!   vocabulary and the validated amino-acid/nucleotide partition, and general tensor utilities.
//!
//! - **[`loss`]: Metrics and Losses.** Stateless functions scoring predictions: cross-entropy
//!   variants, lDDT, predicted aligned error, pTM and pLDDT.
//!
//! - **[`model`]: Learned Modules.** The outer-product-mean pair update and the structure module,
//!   together with its collaborators (point attention, angle resnet, transition).
//!
//! Weights are always supplied by the caller through a [`candle_nn::VarBuilder`]; the library owns
//! no checkpoint or configuration file I/O.

pub mod core;
pub mod loss;
pub mod model;
