//! Residue-type constant tables.
//!
//! Amino-acid ([`amino_acid`]) and nucleotide ([`nucleotide`]) templates are built once per
//! process on the host and padded into one unified table indexed by butype. Tensor copies of the
//! unified table are materialized per `(dtype, device)` pair through [`ResidueConstantCache`].
//! A cache can also be built around a caller-supplied table of the same shape, e.g. one derived
//! from a curated reference geometry.

pub mod amino_acid;
pub mod nucleotide;

use candle_core::{DType, Device, DeviceLocation, Result, Tensor};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::debug;

/// Width of the frame axis in the unified table.
pub const NUM_RIGID_GROUPS: usize = nucleotide::NUM_RIGID_GROUPS;
/// Width of the dense atom axis in the unified table.
pub const NUM_DENSE_ATOMS: usize = nucleotide::NUM_DENSE_ATOMS;
/// Number of butype entries in the unified table.
pub const NUM_BUTYPES: usize = amino_acid::RESTYPES.len() + nucleotide::NTTYPES.len();

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TableError {
    #[error("Table has {found} {axis}, expected {expected}")]
    Shape {
        axis: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Residue type {restype} has ragged {field} rows")]
    Ragged { restype: usize, field: &'static str },

    #[error("Atom slot {slot} of residue type {restype} points at group {group}")]
    GroupOutOfRange { restype: usize, slot: usize, group: u32 },
}

/// Host-side rigid-group template table, one row per residue type.
#[derive(Debug, Clone, PartialEq)]
pub struct RigidGroupTable {
    /// Default frame of each group relative to its parent, as row-major 4x4 matrices.
    pub default_frames: Vec<Vec<[[f64; 4]; 4]>>,
    /// Rigid group each dense atom slot belongs to.
    pub atom_to_group: Vec<Vec<u32>>,
    /// 1.0 for populated dense atom slots.
    pub atom_mask: Vec<Vec<f64>>,
    /// Atom positions in the local frame of their rigid group.
    pub atom_positions: Vec<Vec<[f64; 3]>>,
}

impl RigidGroupTable {
    pub(crate) fn empty(num_types: usize, num_groups: usize, num_atoms: usize) -> Self {
        Self {
            default_frames: vec![vec![[[0.0; 4]; 4]; num_groups]; num_types],
            atom_to_group: vec![vec![0; num_atoms]; num_types],
            atom_mask: vec![vec![0.0; num_atoms]; num_types],
            atom_positions: vec![vec![[0.0; 3]; num_atoms]; num_types],
        }
    }

    pub fn num_types(&self) -> usize {
        self.default_frames.len()
    }

    pub fn num_groups(&self) -> usize {
        self.default_frames.first().map_or(0, Vec::len)
    }

    pub fn num_atoms(&self) -> usize {
        self.atom_mask.first().map_or(0, Vec::len)
    }

    /// Checks that the table has the unified layout: one row per butype, nine groups and 23
    /// dense atoms per row, and every atom assigned to an existing group.
    pub fn validate_unified(&self) -> std::result::Result<(), TableError> {
        for (axis, expected, found) in [
            ("residue types", NUM_BUTYPES, self.num_types()),
            ("rigid groups", NUM_RIGID_GROUPS, self.num_groups()),
            ("dense atoms", NUM_DENSE_ATOMS, self.num_atoms()),
        ] {
            if expected != found {
                return Err(TableError::Shape {
                    axis,
                    expected,
                    found,
                });
            }
        }
        for found in [
            self.atom_to_group.len(),
            self.atom_mask.len(),
            self.atom_positions.len(),
        ] {
            if found != NUM_BUTYPES {
                return Err(TableError::Shape {
                    axis: "residue types",
                    expected: NUM_BUTYPES,
                    found,
                });
            }
        }

        for restype in 0..NUM_BUTYPES {
            let ragged = [
                ("default_frames", self.default_frames[restype].len() != NUM_RIGID_GROUPS),
                ("atom_to_group", self.atom_to_group[restype].len() != NUM_DENSE_ATOMS),
                ("atom_mask", self.atom_mask[restype].len() != NUM_DENSE_ATOMS),
                ("atom_positions", self.atom_positions[restype].len() != NUM_DENSE_ATOMS),
            ];
            if let Some((field, _)) = ragged.into_iter().find(|(_, bad)| *bad) {
                return Err(TableError::Ragged { restype, field });
            }
            if let Some((slot, &group)) = self.atom_to_group[restype]
                .iter()
                .enumerate()
                .find(|(_, g)| **g as usize >= NUM_RIGID_GROUPS)
            {
                return Err(TableError::GroupOutOfRange {
                    restype,
                    slot,
                    group,
                });
            }
        }
        Ok(())
    }

    /// Concatenates tables along the residue-type axis, zero-padding the group and atom axes to
    /// the widest table.
    pub fn padcat(tables: &[&RigidGroupTable]) -> Self {
        let num_groups = tables.iter().map(|t| t.num_groups()).max().unwrap_or(0);
        let num_atoms = tables.iter().map(|t| t.num_atoms()).max().unwrap_or(0);
        let num_types = tables.iter().map(|t| t.num_types()).sum();

        let mut out = Self::empty(num_types, num_groups, num_atoms);
        let mut row = 0;
        for table in tables {
            for t in 0..table.num_types() {
                out.default_frames[row][..table.num_groups()]
                    .copy_from_slice(&table.default_frames[t]);
                out.atom_to_group[row][..table.num_atoms()].copy_from_slice(&table.atom_to_group[t]);
                out.atom_mask[row][..table.num_atoms()].copy_from_slice(&table.atom_mask[t]);
                out.atom_positions[row][..table.num_atoms()]
                    .copy_from_slice(&table.atom_positions[t]);
                row += 1;
            }
        }
        out
    }
}

/// Amino acids followed by nucleotides, padded to 9 groups and 23 atoms.
pub static UNIFIED_TABLE: Lazy<RigidGroupTable> =
    Lazy::new(|| RigidGroupTable::padcat(&[&*amino_acid::TABLE, &*nucleotide::TABLE]));

/// Tensor copy of [`UNIFIED_TABLE`] on one device in one floating-point precision.
#[derive(Debug, Clone)]
pub struct ResidueConstants {
    /// `[NUM_BUTYPES, 9, 4, 4]`
    pub default_frames: Tensor,
    /// `[NUM_BUTYPES, 23]`, u32
    pub group_idx: Tensor,
    /// `[NUM_BUTYPES, 23, 9]`, one-hot encoding of `group_idx`
    pub group_one_hot: Tensor,
    /// `[NUM_BUTYPES, 23]`
    pub atom_mask: Tensor,
    /// `[NUM_BUTYPES, 23, 3]`
    pub lit_positions: Tensor,
}

impl ResidueConstants {
    pub fn build(table: &RigidGroupTable, dtype: DType, device: &Device) -> Result<Self> {
        let (n_types, n_groups, n_atoms) = (table.num_types(), table.num_groups(), table.num_atoms());

        let frames: Vec<f64> = table
            .default_frames
            .iter()
            .flatten()
            .flat_map(|m| m.iter().flatten().copied())
            .collect();
        let group_idx: Vec<u32> = table.atom_to_group.iter().flatten().copied().collect();
        let one_hot: Vec<f64> = group_idx
            .iter()
            .flat_map(|&g| (0..n_groups).map(move |k| if k == g as usize { 1.0 } else { 0.0 }))
            .collect();
        let mask: Vec<f64> = table.atom_mask.iter().flatten().copied().collect();
        let positions: Vec<f64> = table
            .atom_positions
            .iter()
            .flatten()
            .flat_map(|p| p.iter().copied())
            .collect();

        Ok(Self {
            default_frames: Tensor::from_vec(frames, (n_types, n_groups, 4, 4), device)?
                .to_dtype(dtype)?,
            group_idx: Tensor::from_vec(group_idx, (n_types, n_atoms), device)?,
            group_one_hot: Tensor::from_vec(one_hot, (n_types, n_atoms, n_groups), device)?
                .to_dtype(dtype)?,
            atom_mask: Tensor::from_vec(mask, (n_types, n_atoms), device)?.to_dtype(dtype)?,
            lit_positions: Tensor::from_vec(positions, (n_types, n_atoms, 3), device)?
                .to_dtype(dtype)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum DeviceKey {
    Cpu,
    Cuda(usize),
    Metal(usize),
}

impl From<DeviceLocation> for DeviceKey {
    fn from(location: DeviceLocation) -> Self {
        match location {
            DeviceLocation::Cpu => DeviceKey::Cpu,
            DeviceLocation::Cuda { gpu_id } => DeviceKey::Cuda(gpu_id),
            DeviceLocation::Metal { gpu_id } => DeviceKey::Metal(gpu_id),
        }
    }
}

type CacheKey = (&'static str, DeviceKey);

/// Per-(dtype, device) cache of [`ResidueConstants`].
///
/// Entries are built on first request and never mutated afterwards.
#[derive(Debug)]
pub struct ResidueConstantCache {
    table: Arc<RigidGroupTable>,
    entries: RwLock<HashMap<CacheKey, Arc<ResidueConstants>>>,
}

impl Default for ResidueConstantCache {
    fn default() -> Self {
        Self {
            table: Arc::new(UNIFIED_TABLE.clone()),
            entries: RwLock::default(),
        }
    }
}

impl ResidueConstantCache {
    /// Cache over the built-in [`UNIFIED_TABLE`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache over a caller-supplied table in the unified layout.
    pub fn with_table(table: RigidGroupTable) -> std::result::Result<Self, TableError> {
        table.validate_unified()?;
        Ok(Self {
            table: Arc::new(table),
            entries: RwLock::default(),
        })
    }

    pub fn table(&self) -> &RigidGroupTable {
        &self.table
    }

    pub fn get_or_build(&self, dtype: DType, device: &Device) -> Result<Arc<ResidueConstants>> {
        let key: CacheKey = (dtype.as_str(), device.location().into());

        if let Some(entry) = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&key)
        {
            return Ok(Arc::clone(entry));
        }

        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(entry) = entries.get(&key) {
            return Ok(Arc::clone(entry));
        }

        debug!(dtype = key.0, device = ?key.1, "Materializing residue constant tables.");
        let built = Arc::new(ResidueConstants::build(&self.table, dtype, device)?);
        entries.insert(key, Arc::clone(&built));
        Ok(built)
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unified_table_has_expected_shape() {
        let table = &*UNIFIED_TABLE;
        assert_eq!(table.num_types(), NUM_BUTYPES);
        assert_eq!(table.num_groups(), NUM_RIGID_GROUPS);
        assert_eq!(table.num_atoms(), NUM_DENSE_ATOMS);
    }

    #[test]
    fn padcat_zero_pads_amino_acid_rows() {
        let table = &*UNIFIED_TABLE;
        for restype in 0..amino_acid::RESTYPES.len() {
            assert_eq!(table.default_frames[restype][8], [[0.0; 4]; 4]);
            assert!(table.atom_mask[restype][14..].iter().all(|&m| m == 0.0));
        }
        let guanosine = amino_acid::RESTYPES.len() + 2;
        assert_eq!(table.atom_mask[guanosine].iter().sum::<f64>(), 23.0);
    }

    #[test]
    fn padcat_preserves_source_rows() {
        let table = &*UNIFIED_TABLE;
        let offset = amino_acid::RESTYPES.len();
        assert_eq!(table.default_frames[3][..8], amino_acid::TABLE.default_frames[3][..]);
        assert_eq!(
            table.atom_positions[offset + 1],
            nucleotide::TABLE.atom_positions[1]
        );
    }

    #[test]
    fn constants_tensors_have_expected_dims() {
        let constants = ResidueConstants::build(&UNIFIED_TABLE, DType::F32, &Device::Cpu).unwrap();
        assert_eq!(constants.default_frames.dims(), &[24, 9, 4, 4]);
        assert_eq!(constants.group_idx.dims(), &[24, 23]);
        assert_eq!(constants.group_one_hot.dims(), &[24, 23, 9]);
        assert_eq!(constants.atom_mask.dims(), &[24, 23]);
        assert_eq!(constants.lit_positions.dims(), &[24, 23, 3]);
        assert_eq!(constants.default_frames.dtype(), DType::F32);
        assert_eq!(constants.group_idx.dtype(), DType::U32);
    }

    #[test]
    fn one_hot_rows_sum_to_one() {
        let constants = ResidueConstants::build(&UNIFIED_TABLE, DType::F64, &Device::Cpu).unwrap();
        let sums = constants
            .group_one_hot
            .sum(2)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f64>()
            .unwrap();
        assert!(sums.iter().all(|&s| s == 1.0));
    }

    #[test]
    fn cache_builds_once_per_dtype_and_device() {
        let cache = ResidueConstantCache::new();
        assert!(cache.is_empty());

        let first = cache.get_or_build(DType::F32, &Device::Cpu).unwrap();
        let again = cache.get_or_build(DType::F32, &Device::Cpu).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(cache.len(), 1);

        let double = cache.get_or_build(DType::F64, &Device::Cpu).unwrap();
        assert!(!Arc::ptr_eq(&first, &double));
        assert_eq!(double.default_frames.dtype(), DType::F64);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn built_in_table_has_the_unified_layout() {
        assert_eq!(UNIFIED_TABLE.validate_unified(), Ok(()));
    }

    #[test]
    fn cache_builds_from_a_supplied_table() {
        let mut table = UNIFIED_TABLE.clone();
        let adenosine = amino_acid::RESTYPES.len();
        table.atom_positions[adenosine][12] = [1.0, 2.0, 3.0];

        let cache = ResidueConstantCache::with_table(table).unwrap();
        let constants = cache.get_or_build(DType::F64, &Device::Cpu).unwrap();

        let n9 = constants
            .lit_positions
            .get(adenosine)
            .unwrap()
            .get(12)
            .unwrap()
            .to_vec1::<f64>()
            .unwrap();
        assert_eq!(n9, vec![1.0, 2.0, 3.0]);
        assert_eq!(cache.table().atom_positions[adenosine][12], [1.0, 2.0, 3.0]);
    }

    #[test]
    fn supplied_tables_must_match_the_unified_layout() {
        let nucleotides_only = nucleotide::TABLE.clone();
        assert_eq!(
            ResidueConstantCache::with_table(nucleotides_only).unwrap_err(),
            TableError::Shape {
                axis: "residue types",
                expected: NUM_BUTYPES,
                found: nucleotide::NTTYPES.len(),
            }
        );

        let mut table = UNIFIED_TABLE.clone();
        table.atom_mask[5].pop();
        assert_eq!(
            table.validate_unified(),
            Err(TableError::Ragged {
                restype: 5,
                field: "atom_mask"
            })
        );

        let mut table = UNIFIED_TABLE.clone();
        table.atom_to_group[2][0] = 9;
        assert_eq!(
            table.validate_unified(),
            Err(TableError::GroupOutOfRange {
                restype: 2,
                slot: 0,
                group: 9
            })
        );
    }
}
