use super::primitives::{Linear, LinearInit};
use crate::core::geometry::rigid::with_suffix;
use candle_core::{D, Module, Result, Tensor};
use candle_nn::VarBuilder;

#[derive(Debug, Clone)]
struct AngleResnetBlock {
    linear_1: Linear,
    linear_2: Linear,
}

impl AngleResnetBlock {
    fn new(c_hidden: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            linear_1: Linear::new(c_hidden, c_hidden, LinearInit::Relu, vb.pp("linear_1"))?,
            linear_2: Linear::new(c_hidden, c_hidden, LinearInit::Final, vb.pp("linear_2"))?,
        })
    }
}

impl Module for AngleResnetBlock {
    fn forward(&self, a: &Tensor) -> Result<Tensor> {
        let update = self.linear_1.forward(&a.relu()?)?;
        let update = self.linear_2.forward(&update.relu()?)?;
        a + update
    }
}

/// Predicts torsion angles as `(sin, cos)` pairs from the current and the initial single
/// representation.
#[derive(Debug, Clone)]
pub struct AngleResnet {
    linear_in: Linear,
    linear_initial: Linear,
    layers: Vec<AngleResnetBlock>,
    linear_out: Linear,
    no_angles: usize,
    eps: f64,
}

impl AngleResnet {
    pub fn new(
        c_in: usize,
        c_hidden: usize,
        no_blocks: usize,
        no_angles: usize,
        eps: f64,
        vb: VarBuilder,
    ) -> Result<Self> {
        let layers = (0..no_blocks)
            .map(|i| AngleResnetBlock::new(c_hidden, vb.pp("layers").pp(i)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            linear_in: Linear::new(c_in, c_hidden, LinearInit::Default, vb.pp("linear_in"))?,
            linear_initial: Linear::new(
                c_in,
                c_hidden,
                LinearInit::Default,
                vb.pp("linear_initial"),
            )?,
            layers,
            linear_out: Linear::new(
                c_hidden,
                no_angles * 2,
                LinearInit::Default,
                vb.pp("linear_out"),
            )?,
            no_angles,
            eps,
        })
    }

    /// Returns `(unnormalized, normalized)` angles, both `[*, N, no_angles, 2]`. Normalized pairs
    /// are divided by `sqrt(max(|v|^2, eps))`.
    pub fn forward(&self, s: &Tensor, s_initial: &Tensor) -> Result<(Tensor, Tensor)> {
        let initial = self.linear_initial.forward(&s_initial.relu()?)?;
        let mut a = (self.linear_in.forward(&s.relu()?)? + initial)?;
        for layer in &self.layers {
            a = layer.forward(&a)?;
        }
        let a = self.linear_out.forward(&a.relu()?)?;

        let batch = &a.dims()[..a.rank() - 1];
        let unnormalized = a.reshape(with_suffix(batch, &[self.no_angles, 2]))?;
        let norm = unnormalized
            .sqr()?
            .sum_keepdim(D::Minus1)?
            .maximum(self.eps)?
            .sqrt()?;
        let normalized = unnormalized.broadcast_div(&norm)?;
        Ok((unnormalized, normalized))
    }
}
