//! Rigid-group templates for the four RNA nucleotides.
//!
//! Nine rigid groups per residue:
//!
//! | group | frame                     | torsion index | parent | atoms          |
//! |-------|---------------------------|---------------|--------|----------------|
//! | 0     | backbone 1 (C4′ centred)  | -             | -      | C4′ O4′ C3′ C5′|
//! | 1     | backbone 2 (C1′ centred)  | -             | -      | C1′ C2′        |
//! | 2     | gamma, C4′→C5′            | 0             | 0      | O5′            |
//! | 3     | beta, C5′→O5′             | 1             | 2      | P              |
//! | 4     | alpha, O5′→P              | 2             | 3      | OP1 OP2        |
//! | 5     | delta, C4′→C3′            | 3             | 0      | O3′            |
//! | 6     | epsilon, C3′→O3′          | 4             | 5      | -              |
//! | 7     | chi, C1′→N9/N1            | 5             | 1      | base atoms     |
//! | 8     | 2′-hydroxyl, C1′→C2′      | 6             | 1      | O2′            |
//!
//! Templates are derived from a single reference conformation: every group frame is built in the
//! reference, default frames are expressed relative to the parent group, and atom positions
//! relative to their own group.
//!
//! The reference conformation is idealized and assembled in place, not taken from a deposited
//! structure: a C3'-endo ribose with an extended phosphodiester, a fixed glycosidic direction,
//! and planar bases laid out from in-plane ring coordinates. Bond lengths fall within 1.2 to
//! 1.7 Angstrom but angles are only approximate. Use
//! [`ResidueConstantCache::with_table`](super::ResidueConstantCache::with_table) to run the
//! structure module on curated templates instead.

use super::RigidGroupTable;
use crate::core::geometry::transforms::{frame_from_3_points, to_homogeneous_rows, torsion_frame};
use nalgebra::{Isometry3, Point3, Vector3};
use once_cell::sync::Lazy;
use std::collections::HashMap;

pub const NUM_RIGID_GROUPS: usize = 9;
pub const NUM_DENSE_ATOMS: usize = 23;

/// One-letter codes in butype order (offset by the number of amino acids).
pub const NTTYPES: [&str; 4] = ["A", "U", "G", "C"];

/// Parent group of every torsion-driven group; backbone groups have none.
pub const PARENT_GROUP: [Option<usize>; NUM_RIGID_GROUPS] = [
    None,
    None,
    Some(0),
    Some(2),
    Some(3),
    Some(0),
    Some(5),
    Some(1),
    Some(1),
];

const BACKBONE_ATOMS: [&str; 12] = [
    "P", "OP1", "OP2", "O5'", "C5'", "C4'", "O4'", "C3'", "O3'", "C2'", "O2'", "C1'",
];

/// Dense (atom23) slot names per nucleotide type.
pub const ATOM23_NAMES: [&[&str]; 4] = [
    &[
        "P", "OP1", "OP2", "O5'", "C5'", "C4'", "O4'", "C3'", "O3'", "C2'", "O2'", "C1'", "N9",
        "C8", "N7", "C5", "C6", "N6", "N1", "C2", "N3", "C4",
    ],
    &[
        "P", "OP1", "OP2", "O5'", "C5'", "C4'", "O4'", "C3'", "O3'", "C2'", "O2'", "C1'", "N1",
        "C2", "O2", "N3", "C4", "O4", "C5", "C6",
    ],
    &[
        "P", "OP1", "OP2", "O5'", "C5'", "C4'", "O4'", "C3'", "O3'", "C2'", "O2'", "C1'", "N9",
        "C8", "N7", "C5", "C6", "O6", "N1", "C2", "N2", "N3", "C4",
    ],
    &[
        "P", "OP1", "OP2", "O5'", "C5'", "C4'", "O4'", "C3'", "O3'", "C2'", "O2'", "C1'", "N1",
        "C2", "O2", "N3", "C4", "N4", "C5", "C6",
    ],
];

// C3'-endo ribose with an extended phosphodiester, in Angstrom.
const SUGAR_PHOSPHATE: [(&str, [f64; 3]); 12] = [
    ("O4'", [0.000, 1.276, 0.000]),
    ("C1'", [-1.214, 0.394, 0.000]),
    ("C2'", [-0.750, -1.032, 0.000]),
    ("C3'", [0.750, -1.032, 0.450]),
    ("C4'", [1.214, 0.394, 0.000]),
    ("C5'", [2.075, 0.675, 1.208]),
    ("O5'", [2.358, 1.947, 1.773]),
    ("P", [1.875, 2.758, 3.063]),
    ("OP1", [0.680, 3.060, 3.880]),
    ("OP2", [2.770, 3.800, 3.650]),
    ("O3'", [1.460, -1.880, 1.330]),
    ("O2'", [-1.170, -2.020, -0.920]),
];

const GLYCOSIDIC_DIRECTION: [f64; 3] = [-0.600, 0.200, -0.780];
const GLYCOSIDIC_BOND: f64 = 1.47;

// In-plane base coordinates: glycosidic nitrogen at the origin, C1'->N along +x.
const PURINE_CORE: [(&str, [f64; 2]); 9] = [
    ("N9", [0.00, 0.00]),
    ("C8", [0.75, 1.15]),
    ("N7", [2.05, 0.95]),
    ("C5", [2.25, -0.40]),
    ("C4", [0.95, -0.85]),
    ("N3", [0.60, -2.15]),
    ("C2", [1.65, -3.00]),
    ("N1", [2.95, -2.65]),
    ("C6", [3.30, -1.30]),
];

const PYRIMIDINE_CORE: [(&str, [f64; 2]); 7] = [
    ("N1", [0.00, 0.00]),
    ("C2", [0.70, -1.20]),
    ("O2", [0.05, -2.25]),
    ("N3", [2.05, -1.20]),
    ("C4", [2.80, -0.05]),
    ("C5", [2.10, 1.15]),
    ("C6", [0.75, 1.15]),
];

fn base_atoms(nttype: usize) -> Vec<(&'static str, [f64; 2])> {
    let core: Vec<(&'static str, [f64; 2])> = match nttype {
        0 | 2 => PURINE_CORE.to_vec(),
        _ => PYRIMIDINE_CORE.to_vec(),
    };
    let substituents: &[(&str, [f64; 2])] = match nttype {
        0 => &[("N6", [4.60, -0.95])],
        1 => &[("O4", [4.03, -0.12])],
        2 => &[("O6", [4.45, -0.85]), ("N2", [1.35, -4.30])],
        _ => &[("N4", [4.13, -0.10])],
    };
    core.into_iter().chain(substituents.iter().copied()).collect()
}

fn glycosidic_nitrogen(nttype: usize) -> &'static str {
    match nttype {
        0 | 2 => "N9",
        _ => "N1",
    }
}

/// Reference coordinates of every atom of a nucleotide type.
pub(crate) fn reference_coordinates(nttype: usize) -> HashMap<&'static str, Point3<f64>> {
    let mut coords: HashMap<&'static str, Point3<f64>> = SUGAR_PHOSPHATE
        .iter()
        .map(|(name, pos)| (*name, Point3::from(*pos)))
        .collect();

    let c1 = coords["C1'"];
    let o4 = coords["O4'"];
    let n_pos = c1 + Vector3::from(GLYCOSIDIC_DIRECTION).normalize() * GLYCOSIDIC_BOND;

    let ex = (n_pos - c1).normalize();
    let reference = o4 - c1;
    let ey = (reference - ex * ex.dot(&reference)).normalize();

    for (name, [u, v]) in base_atoms(nttype) {
        coords.insert(name, n_pos + ex * u + ey * v);
    }
    coords
}

fn group_of(atom: &str) -> usize {
    match atom {
        "C4'" | "O4'" | "C3'" | "C5'" => 0,
        "C1'" | "C2'" => 1,
        "O5'" => 2,
        "P" => 3,
        "OP1" | "OP2" => 4,
        "O3'" => 5,
        "O2'" => 8,
        // base
        _ => 7,
    }
}

/// Global frames of all nine groups in the reference conformation.
fn group_frames(nttype: usize, coords: &HashMap<&'static str, Point3<f64>>) -> Vec<Isometry3<f64>> {
    let at = |name: &str| coords[name];
    let n_glyco = glycosidic_nitrogen(nttype);
    vec![
        frame_from_3_points(&at("O4'"), &at("C4'"), &at("C3'")),
        frame_from_3_points(&at("O4'"), &at("C1'"), &at("C2'")),
        torsion_frame(&at("C4'"), &at("C5'"), &at("C3'")),
        torsion_frame(&at("C5'"), &at("O5'"), &at("C4'")),
        torsion_frame(&at("O5'"), &at("P"), &at("C5'")),
        torsion_frame(&at("C4'"), &at("C3'"), &at("C5'")),
        torsion_frame(&at("C3'"), &at("O3'"), &at("C4'")),
        torsion_frame(&at("C1'"), &at(n_glyco), &at("O4'")),
        torsion_frame(&at("C1'"), &at("C2'"), &at("O4'")),
    ]
}

pub(crate) static TABLE: Lazy<RigidGroupTable> = Lazy::new(build_table);

fn build_table() -> RigidGroupTable {
    let mut table = RigidGroupTable::empty(NTTYPES.len(), NUM_RIGID_GROUPS, NUM_DENSE_ATOMS);

    for nttype in 0..NTTYPES.len() {
        let coords = reference_coordinates(nttype);
        let frames = group_frames(nttype, &coords);

        for (group, frame) in frames.iter().enumerate() {
            let default = match PARENT_GROUP[group] {
                Some(parent) => frames[parent].inverse() * frame,
                None => Isometry3::identity(),
            };
            table.default_frames[nttype][group] = to_homogeneous_rows(&default);
        }

        for (slot, name) in ATOM23_NAMES[nttype].iter().enumerate() {
            let group = group_of(name);
            let local = frames[group].inverse_transform_point(&coords[name]);
            table.atom_to_group[nttype][slot] = group as u32;
            table.atom_mask[nttype][slot] = 1.0;
            table.atom_positions[nttype][slot] = [local.x, local.y, local.z];
        }
    }

    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_nucleotide_lists_its_backbone_first() {
        for names in ATOM23_NAMES {
            assert_eq!(&names[..BACKBONE_ATOMS.len()], &BACKBONE_ATOMS);
        }
        assert_eq!(ATOM23_NAMES[2].len(), NUM_DENSE_ATOMS);
    }

    #[test]
    fn every_dense_atom_has_reference_coordinates() {
        for (nttype, names) in ATOM23_NAMES.iter().enumerate() {
            let coords = reference_coordinates(nttype);
            for name in names.iter() {
                assert!(coords.contains_key(name), "{} missing {}", NTTYPES[nttype], name);
            }
        }
    }

    #[test]
    fn reference_bond_lengths_are_chemically_plausible() {
        const SUGAR_PHOSPHATE_BONDS: [(&str, &str); 12] = [
            ("C4'", "O4'"),
            ("O4'", "C1'"),
            ("C1'", "C2'"),
            ("C2'", "C3'"),
            ("C3'", "C4'"),
            ("C4'", "C5'"),
            ("C5'", "O5'"),
            ("O5'", "P"),
            ("P", "OP1"),
            ("P", "OP2"),
            ("C3'", "O3'"),
            ("C2'", "O2'"),
        ];
        const PURINE_BONDS: [(&str, &str); 11] = [
            ("C1'", "N9"),
            ("N9", "C8"),
            ("C8", "N7"),
            ("N7", "C5"),
            ("C5", "C4"),
            ("C4", "N9"),
            ("C4", "N3"),
            ("N3", "C2"),
            ("C2", "N1"),
            ("N1", "C6"),
            ("C6", "C5"),
        ];
        const PYRIMIDINE_BONDS: [(&str, &str); 8] = [
            ("C1'", "N1"),
            ("N1", "C2"),
            ("C2", "O2"),
            ("C2", "N3"),
            ("N3", "C4"),
            ("C4", "C5"),
            ("C5", "C6"),
            ("C6", "N1"),
        ];
        let substituents: [&[(&str, &str)]; 4] = [
            &[("C6", "N6")],
            &[("C4", "O4")],
            &[("C6", "O6"), ("C2", "N2")],
            &[("C4", "N4")],
        ];

        for nttype in 0..NTTYPES.len() {
            let coords = reference_coordinates(nttype);
            let base: &[(&str, &str)] = match nttype {
                0 | 2 => &PURINE_BONDS,
                _ => &PYRIMIDINE_BONDS,
            };
            let bonds = SUGAR_PHOSPHATE_BONDS
                .iter()
                .chain(base)
                .chain(substituents[nttype]);
            for (a, b) in bonds {
                let d = (coords[a] - coords[b]).norm();
                assert!(
                    (1.2..1.7).contains(&d),
                    "{} {a}-{b} = {d}",
                    NTTYPES[nttype]
                );
            }
        }
    }

    #[test]
    fn local_positions_recompose_to_reference_geometry() {
        let nttype = 2;
        let coords = reference_coordinates(nttype);
        let frames = group_frames(nttype, &coords);
        let table = &*TABLE;

        for (slot, name) in ATOM23_NAMES[nttype].iter().enumerate() {
            let group = table.atom_to_group[nttype][slot] as usize;
            let local = Point3::from(table.atom_positions[nttype][slot]);
            let global = frames[group] * local;
            assert!((global - coords[name]).norm() < 1e-9, "{name}");
        }
    }

    #[test]
    fn torsion_groups_chain_from_their_parent_frames() {
        let nttype = 1;
        let coords = reference_coordinates(nttype);
        let frames = group_frames(nttype, &coords);
        let table = &*TABLE;

        // alpha group: bb1 -> gamma -> beta -> alpha
        let to_iso = |rows: [[f64; 4]; 4]| {
            let m = nalgebra::Matrix4::from_fn(|i, j| rows[i][j]);
            let rotation = nalgebra::Rotation3::from_matrix_unchecked(
                m.fixed_view::<3, 3>(0, 0).into_owned(),
            );
            Isometry3::from_parts(
                nalgebra::Translation3::new(m[(0, 3)], m[(1, 3)], m[(2, 3)]),
                nalgebra::UnitQuaternion::from_rotation_matrix(&rotation),
            )
        };
        let chained = frames[0]
            * to_iso(table.default_frames[nttype][2])
            * to_iso(table.default_frames[nttype][3])
            * to_iso(table.default_frames[nttype][4]);

        let p_expected = coords["OP1"];
        let slot = ATOM23_NAMES[nttype].iter().position(|n| *n == "OP1").unwrap();
        let p_actual = chained * Point3::from(table.atom_positions[nttype][slot]);
        assert!((p_actual - p_expected).norm() < 1e-9);
    }

    #[test]
    fn pyrimidines_leave_trailing_slots_masked() {
        let table = &*TABLE;
        for nttype in [1, 3] {
            assert_eq!(table.atom_mask[nttype].iter().sum::<f64>(), 20.0);
            assert_eq!(table.atom_mask[nttype][NUM_DENSE_ATOMS - 1], 0.0);
        }
    }
}
