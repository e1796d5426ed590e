//! # Residue Models
//!
//! Residue-level vocabulary shared by the structure module and its callers.
//!
//! ## Key Components
//!
//! - [`residue`] - The butype vocabulary: residue names, one-letter codes and residue kinds
//! - [`partition`] - A validated split of residue positions into amino acids and nucleotides
//!
//! ## Usage
//!
//! ```ignore
//! use complexfold::core::models::{partition::ResiduePartition, residue::butype_from_name};
//!
//! let butype: Vec<u32> = ["ALA", "G", "GLY"]
//!     .iter()
//!     .map(|name| butype_from_name(name).unwrap())
//!     .collect();
//! let partition = ResiduePartition::from_butype(&butype)?;
//! assert_eq!(partition.rna_pos(), &[1]);
//! ```

pub mod partition;
pub mod residue;
