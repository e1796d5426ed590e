use super::residue::{ResidueKind, residue_kind};
use candle_core::{Device, Result as TensorResult, Tensor};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PartitionError {
    #[error("Residue position {position} is listed as both amino acid and nucleotide")]
    Overlap { position: u32 },

    #[error("Residue position {position} is listed more than once as {kind}")]
    Duplicate { position: u32, kind: ResidueKind },

    #[error("Residue position {position} is out of range for {num_residues} residues")]
    OutOfRange { position: u32, num_residues: usize },

    #[error("Residue position {position} is neither amino acid nor nucleotide")]
    Uncovered { position: u32 },

    #[error("Unknown butype {butype} at residue position {position}")]
    UnknownButype { position: u32, butype: u32 },
}

/// Split of residue positions into amino acids and nucleotides.
///
/// Both position lists are sorted, disjoint, and together cover `0..num_residues` exactly once.
/// These invariants are checked on construction, so scatters driven by the partition never
/// write a residue twice or leave one unwritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResiduePartition {
    protein_pos: Vec<u32>,
    rna_pos: Vec<u32>,
    num_residues: usize,
}

impl ResiduePartition {
    pub fn new(
        mut protein_pos: Vec<u32>,
        mut rna_pos: Vec<u32>,
        num_residues: usize,
    ) -> Result<Self, PartitionError> {
        let mut owner: Vec<Option<ResidueKind>> = vec![None; num_residues];

        for (positions, kind) in [
            (&protein_pos, ResidueKind::AminoAcid),
            (&rna_pos, ResidueKind::Nucleotide),
        ] {
            for &position in positions.iter() {
                let slot = owner
                    .get_mut(position as usize)
                    .ok_or(PartitionError::OutOfRange {
                        position,
                        num_residues,
                    })?;
                match *slot {
                    None => *slot = Some(kind),
                    Some(existing) if existing == kind => {
                        return Err(PartitionError::Duplicate { position, kind });
                    }
                    Some(_) => return Err(PartitionError::Overlap { position }),
                }
            }
        }

        if let Some(position) = owner.iter().position(Option::is_none) {
            return Err(PartitionError::Uncovered {
                position: position as u32,
            });
        }

        protein_pos.sort_unstable();
        rna_pos.sort_unstable();
        Ok(Self {
            protein_pos,
            rna_pos,
            num_residues,
        })
    }

    /// Derives the partition from one butype per residue.
    pub fn from_butype(butype: &[u32]) -> Result<Self, PartitionError> {
        let mut protein_pos = Vec::new();
        let mut rna_pos = Vec::new();
        for (position, &code) in butype.iter().enumerate() {
            let position = position as u32;
            match residue_kind(code) {
                Some(ResidueKind::AminoAcid) => protein_pos.push(position),
                Some(ResidueKind::Nucleotide) => rna_pos.push(position),
                None => {
                    return Err(PartitionError::UnknownButype {
                        position,
                        butype: code,
                    });
                }
            }
        }
        Ok(Self {
            protein_pos,
            rna_pos,
            num_residues: butype.len(),
        })
    }

    pub fn protein_pos(&self) -> &[u32] {
        &self.protein_pos
    }

    pub fn rna_pos(&self) -> &[u32] {
        &self.rna_pos
    }

    pub fn positions(&self, kind: ResidueKind) -> &[u32] {
        match kind {
            ResidueKind::AminoAcid => &self.protein_pos,
            ResidueKind::Nucleotide => &self.rna_pos,
        }
    }

    pub fn num_residues(&self) -> usize {
        self.num_residues
    }

    pub fn kind_of(&self, position: u32) -> Option<ResidueKind> {
        if self.protein_pos.binary_search(&position).is_ok() {
            Some(ResidueKind::AminoAcid)
        } else if self.rna_pos.binary_search(&position).is_ok() {
            Some(ResidueKind::Nucleotide)
        } else {
            None
        }
    }

    /// Positions of one kind as a `u32` index tensor, or `None` when no residue has that kind.
    pub fn indices(&self, kind: ResidueKind, device: &Device) -> TensorResult<Option<Tensor>> {
        let positions = self.positions(kind);
        if positions.is_empty() {
            return Ok(None);
        }
        Tensor::from_slice(positions, positions.len(), device).map(Some)
    }
}
