//! # Losses and Confidence Metrics
//!
//! Stateless functions that score predicted structures and turn confidence-head logits into
//! interpretable metrics. Every function takes tensors by reference and returns new tensors;
//! shapes are validated by the caller and mismatches surface as [`LossError::Tensor`].
//!
//! ## Key Components
//!
//! - [`cross_entropy`] - Softmax and sigmoid cross-entropy
//! - [`lddt`] - Local Distance Difference Test over arbitrary point clouds, all atoms, or Cα only
//! - [`confidence`] - pTM, predicted aligned error and pLDDT from binned logits

pub mod confidence;
pub mod cross_entropy;
pub mod lddt;

use thiserror::Error;

pub use confidence::{
    AlignedErrorOutput, TmParams, calculate_bin_centers, compute_plddt,
    compute_predicted_aligned_error, compute_tm,
};
pub use cross_entropy::{sigmoid_cross_entropy, softmax_cross_entropy};
pub use lddt::{LddtParams, lddt, lddt_all, lddt_ca};

#[derive(Debug, Error)]
pub enum LossError {
    #[error("Tensor operation failed: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("Interface scoring requires chain ids")]
    MissingChainIds,

    #[error("Binning needs at least two boundaries, got {boundaries}")]
    InvalidBinning { boundaries: usize },

    #[error("Cannot compute {0} over zero residues")]
    EmptyInput(&'static str),

    #[error("{0} found no finite alignment score")]
    NonFiniteScore(&'static str),
}
