use thiserror::Error;

use super::config::ConfigError;
use crate::core::constants::TableError;
use crate::core::models::partition::PartitionError;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Tensor operation failed: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("Invalid residue partition: {source}")]
    Partition {
        #[from]
        source: PartitionError,
    },

    #[error("Invalid configuration: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error("Invalid rigid-group table: {source}")]
    Table {
        #[from]
        source: TableError,
    },

    #[error("{context} covers {found} residues, expected {expected}")]
    ResidueCountMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },
}
