//! Iterative structure refinement for mixed protein/RNA chains.
//!
//! Every block updates the single representation with point attention, predicts an additive
//! update for eight anchor atoms per residue and a set of torsion angles, and expands both into
//! rigid-group frames and dense atom coordinates. The anchor buffer starts at the origin and is
//! only ever added to; per-block snapshots are kept for the output.

use super::angle_resnet::AngleResnet;
use super::attention::{InvariantPointAttention, SingleUpdate};
use super::config::StructureModuleConfig;
use super::error::ModelError;
use super::frames::{
    NUM_ANCHORS, backbone_frames, frames_and_literature_positions_to_atom_pos,
    torsion_angles_to_frames,
};
use super::primitives::{LayerNorm, Linear, LinearInit, layer_norm};
use super::transition::StructureModuleTransition;
use crate::core::constants::{ResidueConstantCache, RigidGroupTable};
use crate::core::geometry::rigid::{Rigid, with_suffix};
use crate::core::models::partition::ResiduePartition;
use candle_core::{D, Device, Module, Result, Tensor};
use candle_nn::{Dropout, VarBuilder};
use tracing::{debug, instrument};

/// Trunk embeddings consumed by [`StructureModule::forward`].
#[derive(Debug, Clone)]
pub struct StructureInput {
    /// `[*, N, C_s]`
    pub single: Tensor,
    /// `[*, N, N, C_z]`
    pub pair: Tensor,
}

/// Per-block predictions stacked along a new leading block axis `B`.
#[derive(Debug, Clone)]
pub struct StructureModuleOutput {
    /// `[B, *, N, 9, 4, 4]`
    pub sidechain_frames: Tensor,
    /// `[B, *, N, 7, 2]`
    pub unnormalized_angles: Tensor,
    /// `[B, *, N, 7, 2]`
    pub angles: Tensor,
    /// `[B, *, N, 23, 3]`
    pub positions: Tensor,
    /// `[B, *, N, 8, 3]`
    pub anchor_positions: Tensor,
    /// Final single representation, `[*, N, C_s]`.
    pub single: Tensor,
    /// Scaled backbone frames of every block, `[*, B, N, 2]`.
    pub frames: Rigid,
}

struct BlockPrediction {
    sidechain_frames: Tensor,
    unnormalized_angles: Tensor,
    angles: Tensor,
    positions: Tensor,
    anchor_positions: Tensor,
}

#[derive(Debug)]
pub struct StructureModule<A = InvariantPointAttention> {
    config: StructureModuleConfig,
    layer_norm_s: LayerNorm,
    layer_norm_z: LayerNorm,
    linear_in: Linear,
    attention: A,
    ipa_dropout: Dropout,
    layer_norm_ipa: LayerNorm,
    transition: StructureModuleTransition,
    refine_net: Linear,
    angle_resnet: AngleResnet,
    training: bool,
    constants: ResidueConstantCache,
}

impl StructureModule<InvariantPointAttention> {
    pub fn new(config: &StructureModuleConfig, vb: VarBuilder) -> std::result::Result<Self, ModelError> {
        config.validate()?;
        let attention = InvariantPointAttention::new(config, vb.pp("ipa"))?;
        Self::with_attention(config, attention, vb)
    }
}

impl<A: SingleUpdate> StructureModule<A> {
    /// Builds the module around a custom single-representation update.
    pub fn with_attention(
        config: &StructureModuleConfig,
        attention: A,
        vb: VarBuilder,
    ) -> std::result::Result<Self, ModelError> {
        config.validate()?;
        let c_s = config.c_s;

        Ok(Self {
            layer_norm_s: layer_norm(c_s, vb.pp("layer_norm_s"))?,
            layer_norm_z: layer_norm(config.c_z, vb.pp("layer_norm_z"))?,
            linear_in: Linear::new(c_s, c_s, LinearInit::Default, vb.pp("linear_in"))?,
            attention,
            ipa_dropout: Dropout::new(config.dropout_rate as f32),
            layer_norm_ipa: layer_norm(c_s, vb.pp("layer_norm_ipa"))?,
            transition: StructureModuleTransition::new(
                c_s,
                config.no_transition_layers,
                config.dropout_rate,
                vb.pp("transition"),
            )?,
            refine_net: Linear::new(c_s, NUM_ANCHORS * 3, LinearInit::Final, vb.pp("refine_net"))?,
            angle_resnet: AngleResnet::new(
                c_s,
                config.c_resnet,
                config.no_resnet_blocks,
                config.no_angles,
                config.epsilon,
                vb.pp("angle_resnet"),
            )?,
            training: false,
            constants: ResidueConstantCache::new(),
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &StructureModuleConfig {
        &self.config
    }

    /// Enables dropout.
    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub fn constants(&self) -> &ResidueConstantCache {
        &self.constants
    }

    /// Replaces the built-in rigid-group templates with a caller-supplied unified table.
    pub fn with_constant_table(
        mut self,
        table: RigidGroupTable,
    ) -> std::result::Result<Self, ModelError> {
        self.constants = ResidueConstantCache::with_table(table)?;
        Ok(self)
    }

    /// Runs all refinement blocks.
    ///
    /// `butype`: `[*, N]` u32 residue types, `mask`: `[*, N]` (all ones when absent). The
    /// partition must cover exactly the `N` residues of the input.
    ///
    /// With `offload_inference`, `input.pair` is moved to host memory while the blocks run and
    /// moved back to its original device before returning; only its normalized copy stays on
    /// the compute device.
    #[instrument(skip_all, name = "structure_module")]
    pub fn forward(
        &self,
        input: &mut StructureInput,
        butype: &Tensor,
        mask: Option<&Tensor>,
        partition: &ResiduePartition,
        offload_inference: bool,
    ) -> std::result::Result<StructureModuleOutput, ModelError> {
        let num_res = input.single.dim(D::Minus2)?;
        if partition.num_residues() != num_res {
            return Err(ModelError::ResidueCountMismatch {
                context: "residue partition",
                expected: num_res,
                found: partition.num_residues(),
            });
        }
        let butype_len = butype.dim(D::Minus1)?;
        if butype_len != num_res {
            return Err(ModelError::ResidueCountMismatch {
                context: "butype",
                expected: num_res,
                found: butype_len,
            });
        }

        let residue_dims = input.single.dims()[..input.single.rank() - 1].to_vec();
        let mask = match mask {
            Some(mask) => mask.clone(),
            None => Tensor::ones(
                residue_dims.as_slice(),
                input.single.dtype(),
                input.single.device(),
            )?,
        };

        let s = self.layer_norm_s.forward(&input.single)?;
        let z = self.layer_norm_z.forward(&input.pair)?;

        let compute_device = input.pair.device().clone();
        if offload_inference {
            debug!("Offloading pair representation to host memory.");
            input.pair = input.pair.to_device(&Device::Cpu)?;
        }

        let blocks = self.run_blocks(&s, &z, &mask, butype, partition, &residue_dims);
        drop(z);

        if offload_inference {
            input.pair = input.pair.to_device(&compute_device)?;
            debug!("Restored pair representation to the compute device.");
        }
        let (blocks, frames, s) = blocks?;
        let axis = residue_dims.len() - 1;

        Ok(StructureModuleOutput {
            sidechain_frames: stack_blocks(&blocks, |b| &b.sidechain_frames)?,
            unnormalized_angles: stack_blocks(&blocks, |b| &b.unnormalized_angles)?,
            angles: stack_blocks(&blocks, |b| &b.angles)?,
            positions: stack_blocks(&blocks, |b| &b.positions)?,
            anchor_positions: stack_blocks(&blocks, |b| &b.anchor_positions)?,
            single: s,
            frames: Rigid::cat(&frames, axis)?,
        })
    }

    fn run_blocks(
        &self,
        s: &Tensor,
        z: &Tensor,
        mask: &Tensor,
        butype: &Tensor,
        partition: &ResiduePartition,
        residue_dims: &[usize],
    ) -> std::result::Result<(Vec<BlockPrediction>, Vec<Rigid>, Tensor), ModelError> {
        let axis = residue_dims.len() - 1;
        let s_initial = s.clone();
        let mut s = self.linear_in.forward(s)?;
        let constants = self.constants.get_or_build(s.dtype(), s.device())?;

        let mut xyz = Tensor::zeros(
            with_suffix(residue_dims, &[NUM_ANCHORS, 3]),
            s.dtype(),
            s.device(),
        )?;

        let mut blocks = Vec::with_capacity(self.config.no_blocks);
        let mut frames = Vec::with_capacity(self.config.no_blocks);
        for block in 0..self.config.no_blocks {
            s = self.update_single(&s, z, mask, &xyz)?;
            let update = self.refine_net.forward(&s)?.reshape(xyz.shape())?;
            xyz = (xyz + update)?;

            let (unnormalized_angles, angles) = self.angle_resnet.forward(&s, &s_initial)?;

            let backbone = backbone_frames(&xyz, partition)?
                .scale_translation(self.config.trans_scale_factor)?;
            let all_frames =
                torsion_angles_to_frames(&backbone, &angles, butype, partition, &constants)?;
            let positions =
                frames_and_literature_positions_to_atom_pos(&all_frames, butype, &constants)?;

            debug!(block, "Refinement block finished.");
            blocks.push(BlockPrediction {
                sidechain_frames: all_frames.to_tensor_4x4()?,
                unnormalized_angles,
                angles,
                positions,
                anchor_positions: xyz.clone(),
            });
            frames.push(backbone.unsqueeze(axis)?);
        }
        Ok((blocks, frames, s))
    }

    fn update_single(&self, s: &Tensor, z: &Tensor, mask: &Tensor, xyz: &Tensor) -> Result<Tensor> {
        let s = (s + self.attention.forward(s, z, mask, xyz)?)?;
        let s = self.ipa_dropout.forward(&s, self.training)?;
        let s = self.layer_norm_ipa.forward(&s)?;
        self.transition.forward(&s, self.training)
    }
}

fn stack_blocks(
    blocks: &[BlockPrediction],
    field: impl Fn(&BlockPrediction) -> &Tensor,
) -> Result<Tensor> {
    let tensors: Vec<&Tensor> = blocks.iter().map(field).collect();
    Tensor::stack(&tensors, 0)
}
