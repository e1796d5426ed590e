//! Frame construction for mixed protein/RNA chains.
//!
//! Every residue carries two backbone frame slots. Amino acids fill the first from their C, CA
//! and N anchors and leave the second zero; nucleotides build one frame around C4′ and one
//! around C1′. Torsion angles then expand the backbone into the full set of nine rigid-group
//! frames, and the literal atom positions of each residue type are placed in those frames.

use crate::core::constants::{ResidueConstants, amino_acid, nucleotide};
use crate::core::geometry::rigid::{Rigid, rotation_x_from_sin_cos, with_suffix};
use crate::core::models::partition::ResiduePartition;
use crate::core::models::residue::ResidueKind;
use crate::core::utils::tensor::{batched_matmul, gather_rows};
use candle_core::{D, Result, Tensor};

/// Number of anchor points predicted per residue.
pub const NUM_ANCHORS: usize = 8;

/// Anchor slots in the `[*, N, 8, 3]` coordinate buffer.
pub mod anchor {
    pub const C: usize = 0;
    pub const CA: usize = 1;
    pub const N: usize = 2;
    /// Stored with inverted sign; frames are built from its negation.
    pub const O4: usize = 3;
    pub const C4: usize = 4;
    pub const C3: usize = 5;
    pub const C1: usize = 6;
    pub const C2: usize = 7;
}

const FRAME_EPS: f64 = 1e-8;

/// Builds the two-slot backbone frames `[*, N, 2]` from anchor coordinates `[*, N, 8, 3]`.
pub fn backbone_frames(xyz: &Tensor, partition: &ResiduePartition) -> Result<Rigid> {
    let axis = xyz.rank() - 3;
    let device = xyz.device();
    let pick = |slot: usize, index: &Tensor| -> Result<Tensor> {
        xyz.narrow(axis + 1, slot, 1)?
            .squeeze(axis + 1)?
            .contiguous()?
            .index_select(index, axis)
    };

    let mut frames = Rigid::zeros(&with_suffix(&xyz.dims()[..=axis], &[2]), xyz.dtype(), device)?;

    if let Some(index) = partition.indices(ResidueKind::AminoAcid, device)? {
        let frame = Rigid::from_3_points(
            &pick(anchor::C, &index)?,
            &pick(anchor::CA, &index)?,
            &pick(anchor::N, &index)?,
            FRAME_EPS,
        )?;
        let placeholder = frame.zeros_like()?;
        frames = frames.index_add(&index, &Rigid::stack(&[frame, placeholder], axis + 1)?, axis)?;
    }

    if let Some(index) = partition.indices(ResidueKind::Nucleotide, device)? {
        let o4 = pick(anchor::O4, &index)?.neg()?;
        let sugar = Rigid::from_3_points(
            &o4,
            &pick(anchor::C4, &index)?,
            &pick(anchor::C3, &index)?,
            FRAME_EPS,
        )?;
        let base = Rigid::from_3_points(
            &o4,
            &pick(anchor::C1, &index)?,
            &pick(anchor::C2, &index)?,
            FRAME_EPS,
        )?;
        frames = frames.index_add(&index, &Rigid::stack(&[sugar, base], axis + 1)?, axis)?;
    }

    Ok(frames)
}

// `(sin, cos) = (0, 1)` for `count` leading groups: [*, N, count, 2].
fn identity_sin_cos(alpha: &Tensor, count: usize) -> Result<Tensor> {
    let dims = with_suffix(&alpha.dims()[..alpha.rank() - 2], &[count, 1]);
    let sin = Tensor::zeros(dims.as_slice(), alpha.dtype(), alpha.device())?;
    let cos = Tensor::ones(dims.as_slice(), alpha.dtype(), alpha.device())?;
    Tensor::cat(&[sin, cos], D::Minus1)
}

/// Amino-acid frame expansion.
///
/// `backbone`: `[*, N]`, `alpha`: `[*, N, 7, 2]` (omega, phi, psi, chi1..chi4), `default_frames`:
/// `[T, 8, 4, 4]`. Returns the eight group frames `[*, N, 8]` in global coordinates; chi2..chi4
/// are chained onto chi1.
pub fn protein_torsion_angles_to_frames(
    backbone: &Rigid,
    alpha: &Tensor,
    butype: &Tensor,
    default_frames: &Tensor,
) -> Result<Rigid> {
    let group_axis = alpha.rank() - 2;
    let defaults = Rigid::from_tensor_4x4(&gather_rows(default_frames, butype)?)?;
    let alpha = Tensor::cat(&[identity_sin_cos(alpha, 1)?, alpha.clone()], group_axis)?;
    let local = defaults.compose_rotation(&rotation_x_from_sin_cos(&alpha)?)?;

    let chi2 = local
        .select(group_axis, 4)?
        .compose(&local.select(group_axis, 5)?)?;
    let chi3 = chi2.compose(&local.select(group_axis, 6)?)?;
    let chi4 = chi3.compose(&local.select(group_axis, 7)?)?;

    let to_backbone = Rigid::cat(
        &[
            local.narrow(group_axis, 0, 5)?,
            chi2.unsqueeze(group_axis)?,
            chi3.unsqueeze(group_axis)?,
            chi4.unsqueeze(group_axis)?,
        ],
        group_axis,
    )?;
    backbone.unsqueeze(group_axis)?.compose(&to_backbone)
}

/// Nucleotide frame expansion.
///
/// `backbone`: `[*, N, 2]`, `alpha`: `[*, N, 7, 2]`, `default_frames`: `[T, 9, 4, 4]`. Groups
/// without a parent are the two backbone slots; every other group composes onto the global
/// frame of its parent.
pub fn nucleotide_torsion_angles_to_frames(
    backbone: &Rigid,
    alpha: &Tensor,
    butype: &Tensor,
    default_frames: &Tensor,
) -> Result<Rigid> {
    let group_axis = alpha.rank() - 2;
    let defaults = Rigid::from_tensor_4x4(&gather_rows(default_frames, butype)?)?;
    let alpha = Tensor::cat(&[identity_sin_cos(alpha, 2)?, alpha.clone()], group_axis)?;
    let local = defaults.compose_rotation(&rotation_x_from_sin_cos(&alpha)?)?;

    let mut global: Vec<Rigid> = Vec::with_capacity(nucleotide::NUM_RIGID_GROUPS);
    for (group, parent) in nucleotide::PARENT_GROUP.iter().enumerate() {
        let base = match parent {
            Some(parent) => global[*parent].clone(),
            None => backbone.select(group_axis, group)?,
        };
        global.push(base.compose(&local.select(group_axis, group)?)?);
    }
    Rigid::stack(&global, group_axis)
}

/// All nine group frames `[*, N, 9]` for a mixed chain.
///
/// The nucleotide expansion runs over every residue; at amino-acid positions its first eight
/// slots are replaced by the amino-acid expansion of the first backbone slot.
pub fn torsion_angles_to_frames(
    backbone: &Rigid,
    alpha: &Tensor,
    butype: &Tensor,
    partition: &ResiduePartition,
    constants: &ResidueConstants,
) -> Result<Rigid> {
    let axis = alpha.rank() - 3;
    let device = alpha.device();
    let all = nucleotide_torsion_angles_to_frames(backbone, alpha, butype, &constants.default_frames)?;

    let Some(protein) = partition.indices(ResidueKind::AminoAcid, device)? else {
        return Ok(all);
    };
    let protein_frames = protein_torsion_angles_to_frames(
        &backbone.index_select(&protein, axis)?.select(axis + 1, 0)?,
        &alpha.contiguous()?.index_select(&protein, axis)?,
        &butype.contiguous()?.index_select(&protein, axis)?,
        &constants
            .default_frames
            .narrow(1, 0, amino_acid::NUM_RIGID_GROUPS)?
            .contiguous()?,
    )?;
    let tail = all.index_select(&protein, axis)?.narrow(
        axis + 1,
        amino_acid::NUM_RIGID_GROUPS,
        nucleotide::NUM_RIGID_GROUPS - amino_acid::NUM_RIGID_GROUPS,
    )?;
    let protein_frames = Rigid::cat(&[protein_frames, tail], axis + 1)?;

    let mut merged = all.zeros_like()?.index_add(&protein, &protein_frames, axis)?;
    if let Some(rna) = partition.indices(ResidueKind::Nucleotide, device)? {
        merged = merged.index_add(&rna, &all.index_select(&rna, axis)?, axis)?;
    }
    Ok(merged)
}

/// Places the literal atom positions of each residue type in their group frames.
///
/// `frames`: `[*, N, 9]`, `butype`: `[*, N]`. Returns dense coordinates `[*, N, 23, 3]` with
/// unpopulated slots zeroed.
pub fn frames_and_literature_positions_to_atom_pos(
    frames: &Rigid,
    butype: &Tensor,
    constants: &ResidueConstants,
) -> Result<Tensor> {
    // [*, N, 23, 9]
    let group_mask = gather_rows(&constants.group_one_hot, butype)?;
    let atom_dims = &group_mask.dims()[..group_mask.rank() - 1];

    // [*, N, 9, 3, 3] -> [*, N, 9, 9]
    let rots = frames.rots().reshape(with_suffix(frames.batch_dims(), &[9]))?;
    let atom_rots = batched_matmul(&group_mask, &rots)?.reshape(with_suffix(atom_dims, &[3, 3]))?;
    let atom_trans = batched_matmul(&group_mask, frames.trans())?;

    let lit = gather_rows(&constants.lit_positions, butype)?;
    let atom_mask = gather_rows(&constants.atom_mask, butype)?.unsqueeze(D::Minus1)?;
    Rigid::new(atom_rots, atom_trans)
        .apply(&lit)?
        .broadcast_mul(&atom_mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::{NUM_DENSE_ATOMS, UNIFIED_TABLE};
    use crate::core::models::residue::NUM_AMINO_ACIDS;
    use candle_core::{DType, Device};

    fn constants() -> ResidueConstants {
        ResidueConstants::build(&UNIFIED_TABLE, DType::F64, &Device::Cpu).unwrap()
    }

    fn max_abs(t: &Tensor) -> f64 {
        t.abs()
            .unwrap()
            .flatten_all()
            .unwrap()
            .max(0)
            .unwrap()
            .to_scalar::<f64>()
            .unwrap()
    }

    fn zero_torsions(batch: usize, n: usize) -> Tensor {
        let sin = Tensor::zeros((batch, n, 7, 1), DType::F64, &Device::Cpu).unwrap();
        let cos = Tensor::ones((batch, n, 7, 1), DType::F64, &Device::Cpu).unwrap();
        Tensor::cat(&[sin, cos], 3).unwrap()
    }

    fn random_anchors(batch: usize, n: usize) -> Tensor {
        Tensor::randn(0f64, 3.0, (batch, n, NUM_ANCHORS, 3), &Device::Cpu).unwrap()
    }

    #[test]
    fn all_protein_backbone_keeps_second_slot_zero() {
        let partition = ResiduePartition::from_butype(&[0, 5, 19]).unwrap();
        let frames = backbone_frames(&random_anchors(2, 3), &partition).unwrap();

        assert_eq!(frames.batch_dims(), &[2, 3, 2]);
        let second = frames.select(2, 1).unwrap();
        assert_eq!(max_abs(second.rots()), 0.0);
        assert_eq!(max_abs(second.trans()), 0.0);
        assert!(max_abs(frames.select(2, 0).unwrap().rots()) > 0.0);
    }

    #[test]
    fn backbone_frames_scatter_each_kind_to_its_positions() {
        let butype = [NUM_AMINO_ACIDS, 3, NUM_AMINO_ACIDS + 2];
        let partition = ResiduePartition::from_butype(&butype).unwrap();
        let xyz = random_anchors(1, 3);

        let frames = backbone_frames(&xyz, &partition).unwrap();

        // Amino acid at position 1: origin on CA, second slot empty.
        let ca = xyz.get(0).unwrap().get(1).unwrap().get(anchor::CA).unwrap();
        let origin = frames.trans().get(0).unwrap().get(1).unwrap();
        assert!(max_abs(&(origin.get(0).unwrap() - &ca).unwrap()) < 1e-12);
        assert_eq!(max_abs(&origin.get(1).unwrap()), 0.0);

        // Nucleotide at position 2: origins on C4' and C1'.
        let residue = xyz.get(0).unwrap().get(2).unwrap();
        let origin = frames.trans().get(0).unwrap().get(2).unwrap();
        let c4 = residue.get(anchor::C4).unwrap();
        let c1 = residue.get(anchor::C1).unwrap();
        assert!(max_abs(&(origin.get(0).unwrap() - &c4).unwrap()) < 1e-12);
        assert!(max_abs(&(origin.get(1).unwrap() - &c1).unwrap()) < 1e-12);
    }

    #[test]
    fn nucleotide_frames_use_the_negated_o4_anchor() {
        let partition = ResiduePartition::from_butype(&[NUM_AMINO_ACIDS]).unwrap();
        let xyz = random_anchors(1, 1);

        let frames = backbone_frames(&xyz, &partition).unwrap();

        let residue = xyz.get(0).unwrap().get(0).unwrap();
        let at = |slot: usize| residue.get(slot).unwrap().unsqueeze(0).unwrap();
        let expected = Rigid::from_3_points(
            &at(anchor::O4).neg().unwrap(),
            &at(anchor::C4),
            &at(anchor::C3),
            FRAME_EPS,
        )
        .unwrap();
        let sugar = frames.select(2, 0).unwrap().select(0, 0).unwrap();
        assert!(max_abs(&(sugar.rots() - expected.rots()).unwrap()) < 1e-12);
    }

    #[test]
    fn protein_frames_at_zero_torsion_place_backbone_atoms_on_templates() {
        let constants = constants();
        let butype = Tensor::new(&[[7u32, 0]], &Device::Cpu).unwrap();
        let partition = ResiduePartition::from_butype(&[7, 0]).unwrap();
        let backbone = Rigid::stack(
            &[
                Rigid::identity(&[1, 2], DType::F64, &Device::Cpu).unwrap(),
                Rigid::zeros(&[1, 2], DType::F64, &Device::Cpu).unwrap(),
            ],
            2,
        )
        .unwrap();

        let frames =
            torsion_angles_to_frames(&backbone, &zero_torsions(1, 2), &butype, &partition, &constants)
                .unwrap();
        let positions =
            frames_and_literature_positions_to_atom_pos(&frames, &butype, &constants).unwrap();

        assert_eq!(positions.dims(), &[1, 2, NUM_DENSE_ATOMS, 3]);
        // N, CA, C belong to the backbone group, so they sit exactly at their template positions.
        let table = &*UNIFIED_TABLE;
        for (residue, restype) in [(0usize, 7usize), (1, 0)] {
            let atoms = positions.get(0).unwrap().get(residue).unwrap().to_vec2::<f64>().unwrap();
            for slot in 0..3 {
                for k in 0..3 {
                    let expected = table.atom_positions[restype][slot][k];
                    assert!((atoms[slot][k] - expected).abs() < 1e-9);
                }
            }
            assert!(atoms[14..].iter().flatten().all(|&v| v == 0.0));
        }
    }

    #[test]
    fn protein_rows_leave_the_last_frame_slot_zero() {
        let constants = constants();
        let butype = Tensor::new(&[[4u32, 11, NUM_AMINO_ACIDS + 1]], &Device::Cpu).unwrap();
        let partition = ResiduePartition::from_butype(&[4, 11, NUM_AMINO_ACIDS + 1]).unwrap();
        let backbone = backbone_frames(&random_anchors(1, 3), &partition).unwrap();
        let alpha = Tensor::randn(0f64, 1.0, (1, 3, 7, 2), &Device::Cpu).unwrap();

        let frames =
            torsion_angles_to_frames(&backbone, &alpha, &butype, &partition, &constants).unwrap();

        assert_eq!(frames.batch_dims(), &[1, 3, 9]);
        let last = frames.select(2, 8).unwrap();
        for residue in 0..2 {
            assert_eq!(max_abs(&last.rots().get(0).unwrap().get(residue).unwrap()), 0.0);
            assert_eq!(max_abs(&last.trans().get(0).unwrap().get(residue).unwrap()), 0.0);
        }
        assert!(max_abs(&last.rots().get(0).unwrap().get(2).unwrap()) > 0.0);
    }

    #[test]
    fn nucleotide_frames_at_zero_torsion_reproduce_reference_geometry() {
        let constants = constants();
        for nttype in 0..nucleotide::NTTYPES.len() {
            let coords = nucleotide::reference_coordinates(nttype);
            let point = |name: &str| {
                let p = coords[name];
                Tensor::new(&[[p.x, p.y, p.z]], &Device::Cpu).unwrap()
            };
            let sugar =
                Rigid::from_3_points(&point("O4'"), &point("C4'"), &point("C3'"), 1e-12).unwrap();
            let base =
                Rigid::from_3_points(&point("O4'"), &point("C1'"), &point("C2'"), 1e-12).unwrap();
            // [1, 1, 2]
            let backbone = Rigid::stack(&[sugar, base], 1).unwrap().unsqueeze(0).unwrap();

            let butype_value = NUM_AMINO_ACIDS + nttype as u32;
            let butype = Tensor::new(&[[butype_value]], &Device::Cpu).unwrap();
            let partition = ResiduePartition::from_butype(&[butype_value]).unwrap();

            let frames = torsion_angles_to_frames(
                &backbone,
                &zero_torsions(1, 1),
                &butype,
                &partition,
                &constants,
            )
            .unwrap();
            let positions = frames_and_literature_positions_to_atom_pos(&frames, &butype, &constants)
                .unwrap()
                .get(0)
                .unwrap()
                .get(0)
                .unwrap()
                .to_vec2::<f64>()
                .unwrap();

            for (slot, name) in nucleotide::ATOM23_NAMES[nttype].iter().enumerate() {
                let expected = coords[name];
                let actual = &positions[slot];
                let error = ((actual[0] - expected.x).powi(2)
                    + (actual[1] - expected.y).powi(2)
                    + (actual[2] - expected.z).powi(2))
                .sqrt();
                assert!(error < 1e-6, "{name} of nucleotide {nttype} is off by {error}");
            }
        }
    }
}
