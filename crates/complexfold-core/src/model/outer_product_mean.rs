use super::config::OuterProductMeanConfig;
use super::error::ModelError;
use super::primitives::{LayerNorm, Linear, LinearInit, layer_norm};
use crate::core::utils::chunk::chunked;
use crate::core::utils::inplace::div_rows_inplace;
use crate::core::utils::tensor::{flatten_leading, unflatten_leading};
use candle_core::{D, Module, Result, Tensor};
use candle_nn::VarBuilder;
use tracing::{debug, instrument};

#[derive(Debug, Clone)]
enum Projection {
    Separate { linear_1: Linear, linear_2: Linear },
    Fused { linear_12: Linear },
}

/// Pair update from the outer product of two projections of the MSA embedding, averaged over
/// the sequences in which both residues are present.
#[derive(Debug, Clone)]
pub struct OuterProductMean {
    config: OuterProductMeanConfig,
    layer_norm: LayerNorm,
    projection: Projection,
    linear_out: Linear,
}

impl OuterProductMean {
    pub fn new(config: &OuterProductMeanConfig, vb: VarBuilder) -> std::result::Result<Self, ModelError> {
        config.validate()?;
        let (c_m, c_hidden) = (config.c_m, config.c_hidden);

        let projection = if config.fused_projection {
            Projection::Fused {
                linear_12: Linear::new(c_m, 2 * c_hidden, LinearInit::Default, vb.pp("linear_12"))?,
            }
        } else {
            Projection::Separate {
                linear_1: Linear::new(c_m, c_hidden, LinearInit::Default, vb.pp("linear_1"))?,
                linear_2: Linear::new(c_m, c_hidden, LinearInit::Default, vb.pp("linear_2"))?,
            }
        };

        Ok(Self {
            config: config.clone(),
            layer_norm: layer_norm(c_m, vb.pp("layer_norm"))?,
            projection,
            linear_out: Linear::new(
                c_hidden * c_hidden,
                config.c_z,
                LinearInit::Final,
                vb.pp("linear_out"),
            )?,
        })
    }

    pub fn config(&self) -> &OuterProductMeanConfig {
        &self.config
    }

    /// `m`: `[*, N_seq, N_res, C_m]`, `mask`: `[*, N_seq, N_res]` (all ones when absent).
    /// Returns the `[*, N_res, N_res, C_z]` pair update.
    ///
    /// With `chunk_size`, the outer product is evaluated in slices of that many rows of the
    /// first residue axis. `inplace_safe` divides by the normalizer in place; only pass it when
    /// no gradient flows through the result.
    #[instrument(skip_all, name = "outer_product_mean")]
    pub fn forward(
        &self,
        m: &Tensor,
        mask: Option<&Tensor>,
        chunk_size: Option<usize>,
        inplace_safe: bool,
    ) -> std::result::Result<Tensor, ModelError> {
        let mask = match mask {
            Some(mask) => mask.to_dtype(m.dtype())?,
            None => Tensor::ones(&m.dims()[..m.rank() - 1], m.dtype(), m.device())?,
        };

        let ln = self.layer_norm.forward(m)?;
        let (a, b) = self.project(&ln)?;
        let channel_mask = mask.unsqueeze(D::Minus1)?;
        let a = a.broadcast_mul(&channel_mask)?;
        let b = b.broadcast_mul(&channel_mask)?;

        // [B, N_seq, N_res, C]
        let (a, leading) = flatten_leading(&a, 3)?;
        let (b, _) = flatten_leading(&b, 3)?;
        let n_res = a.dim(2)?;

        let outer = match chunk_size {
            Some(size) => {
                debug!(chunk_size = size, n_res, "Chunking outer product.");
                chunked(n_res, size, 1, |start, len| {
                    self.outer(&a.narrow(2, start, len)?, &b)
                })?
            }
            None => self.outer(&a, &b)?,
        };

        // [B, N_res, N_res, 1]
        let (mask, _) = flatten_leading(&mask, 2)?;
        let norm = (mask.transpose(1, 2)?.contiguous()?.matmul(&mask)? + self.config.eps)?
            .unsqueeze(D::Minus1)?;

        let outer = if inplace_safe {
            div_rows_inplace(&outer, &norm)?
        } else {
            outer.broadcast_div(&norm)?
        };
        Ok(unflatten_leading(&outer, &leading)?)
    }

    fn project(&self, ln: &Tensor) -> Result<(Tensor, Tensor)> {
        match &self.projection {
            Projection::Separate { linear_1, linear_2 } => {
                Ok((linear_1.forward(ln)?, linear_2.forward(ln)?))
            }
            Projection::Fused { linear_12 } => {
                let ab = linear_12.forward(ln)?;
                let c = self.config.c_hidden;
                Ok((ab.narrow(D::Minus1, 0, c)?, ab.narrow(D::Minus1, c, c)?))
            }
        }
    }

    // a: [B, S, I, C], b: [B, S, J, C] -> [B, I, J, C_z] with
    // outer[i, j, c, e] = sum_s a[s, i, c] * b[s, j, e], flattened over (c, e).
    fn outer(&self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        let (batch, seqs, rows, c) = a.dims4()?;
        let cols = b.dim(2)?;

        let a_t = a
            .permute((0, 2, 3, 1))?
            .contiguous()?
            .reshape((batch, rows * c, seqs))?;
        let b_flat = b.contiguous()?.reshape((batch, seqs, cols * c))?;
        let outer = a_t
            .matmul(&b_flat)?
            .reshape((batch, rows, c, cols, c))?
            .permute((0, 1, 3, 2, 4))?
            .contiguous()?
            .reshape((batch, rows, cols, c * c))?;
        self.linear_out.forward(&outer)
    }
}
