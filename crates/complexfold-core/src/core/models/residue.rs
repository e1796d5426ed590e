use crate::core::constants::{amino_acid, nucleotide};
use phf::{Map, phf_map};
use std::fmt;

pub const NUM_AMINO_ACIDS: u32 = amino_acid::RESTYPES.len() as u32;
pub const NUM_NUCLEOTIDES: u32 = nucleotide::NTTYPES.len() as u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResidueKind {
    AminoAcid,
    Nucleotide,
}

impl fmt::Display for ResidueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResidueKind::AminoAcid => write!(f, "amino acid"),
            ResidueKind::Nucleotide => write!(f, "nucleotide"),
        }
    }
}

static BUTYPE_BY_NAME: Map<&'static str, u32> = phf_map! {
    // --- Amino acids ---
    "ALA" => 0, "ARG" => 1, "ASN" => 2, "ASP" => 3, "CYS" => 4,
    "GLN" => 5, "GLU" => 6, "GLY" => 7, "HIS" => 8, "ILE" => 9,
    "LEU" => 10, "LYS" => 11, "MET" => 12, "PHE" => 13, "PRO" => 14,
    "SER" => 15, "THR" => 16, "TRP" => 17, "TYR" => 18, "VAL" => 19,

    // --- Histidine protonation variants ---
    "HSE" => 8, "HSD" => 8, "HSP" => 8,

    // --- Ribonucleotides ---
    "A" => 20, "U" => 21, "G" => 22, "C" => 23,
};

/// Butype of a residue name (three-letter amino-acid name or one-letter nucleotide code).
pub fn butype_from_name(name: &str) -> Option<u32> {
    BUTYPE_BY_NAME.get(name.trim()).copied()
}

pub fn residue_kind(butype: u32) -> Option<ResidueKind> {
    if butype < NUM_AMINO_ACIDS {
        Some(ResidueKind::AminoAcid)
    } else if butype < NUM_AMINO_ACIDS + NUM_NUCLEOTIDES {
        Some(ResidueKind::Nucleotide)
    } else {
        None
    }
}

/// One-letter code of a butype. Amino acids and nucleotides share letters, so pair it with
/// [`residue_kind`] when the distinction matters.
pub fn one_letter_code(butype: u32) -> Option<&'static str> {
    match residue_kind(butype)? {
        ResidueKind::AminoAcid => Some(amino_acid::RESTYPES[butype as usize]),
        ResidueKind::Nucleotide => {
            Some(nucleotide::NTTYPES[(butype - NUM_AMINO_ACIDS) as usize])
        }
    }
}

/// Atom names of the populated dense slots, in slot order.
pub fn atom_names(butype: u32) -> Option<&'static [&'static str]> {
    match residue_kind(butype)? {
        ResidueKind::AminoAcid => Some(amino_acid::ATOM14_NAMES[butype as usize]),
        ResidueKind::Nucleotide => {
            Some(nucleotide::ATOM23_NAMES[(butype - NUM_AMINO_ACIDS) as usize])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn butype_from_name_follows_table_order() {
        for (i, name) in amino_acid::RESTYPE_NAMES.iter().enumerate() {
            assert_eq!(butype_from_name(name), Some(i as u32));
        }
        for (i, code) in nucleotide::NTTYPES.iter().enumerate() {
            assert_eq!(butype_from_name(code), Some(NUM_AMINO_ACIDS + i as u32));
        }
    }

    #[test]
    fn butype_from_name_trims_and_maps_histidine_variants() {
        assert_eq!(butype_from_name(" GLY "), Some(7));
        assert_eq!(butype_from_name("HSP"), butype_from_name("HIS"));
        assert_eq!(butype_from_name("DA"), None);
    }

    #[test]
    fn residue_kind_splits_at_nucleotide_offset() {
        assert_eq!(residue_kind(0), Some(ResidueKind::AminoAcid));
        assert_eq!(residue_kind(19), Some(ResidueKind::AminoAcid));
        assert_eq!(residue_kind(20), Some(ResidueKind::Nucleotide));
        assert_eq!(residue_kind(23), Some(ResidueKind::Nucleotide));
        assert_eq!(residue_kind(24), None);
    }

    #[test]
    fn one_letter_code_distinguishes_alanine_from_adenine() {
        assert_eq!(one_letter_code(0), Some("A"));
        assert_eq!(one_letter_code(20), Some("A"));
        assert_eq!(residue_kind(0), Some(ResidueKind::AminoAcid));
        assert_eq!(residue_kind(20), Some(ResidueKind::Nucleotide));
    }

    #[test]
    fn atom_names_match_dense_slot_widths() {
        assert_eq!(atom_names(7).map(|names| names.len()), Some(4));
        assert_eq!(atom_names(17).map(|names| names.len()), Some(14));
        assert_eq!(atom_names(22).map(|names| names.len()), Some(23));
        assert_eq!(atom_names(24), None);
    }
}
