use super::primitives::{LayerNorm, Linear, LinearInit, layer_norm};
use candle_core::{Module, Result, Tensor};
use candle_nn::{Dropout, VarBuilder};

#[derive(Debug, Clone)]
struct TransitionLayer {
    linear_1: Linear,
    linear_2: Linear,
    linear_3: Linear,
}

impl TransitionLayer {
    fn new(c: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            linear_1: Linear::new(c, c, LinearInit::Relu, vb.pp("linear_1"))?,
            linear_2: Linear::new(c, c, LinearInit::Relu, vb.pp("linear_2"))?,
            linear_3: Linear::new(c, c, LinearInit::Final, vb.pp("linear_3"))?,
        })
    }
}

impl Module for TransitionLayer {
    fn forward(&self, s: &Tensor) -> Result<Tensor> {
        let update = self.linear_1.forward(s)?.relu()?;
        let update = self.linear_2.forward(&update)?.relu()?;
        let update = self.linear_3.forward(&update)?;
        s + update
    }
}

/// Residual feed-forward stack on the single representation, followed by dropout and layer norm.
#[derive(Debug, Clone)]
pub struct StructureModuleTransition {
    layers: Vec<TransitionLayer>,
    dropout: Dropout,
    layer_norm: LayerNorm,
}

impl StructureModuleTransition {
    pub fn new(c: usize, num_layers: usize, dropout_rate: f64, vb: VarBuilder) -> Result<Self> {
        let layers = (0..num_layers)
            .map(|i| TransitionLayer::new(c, vb.pp("layers").pp(i)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            layers,
            dropout: Dropout::new(dropout_rate as f32),
            layer_norm: layer_norm(c, vb.pp("layer_norm"))?,
        })
    }

    pub fn forward(&self, s: &Tensor, train: bool) -> Result<Tensor> {
        let mut s = s.clone();
        for layer in &self.layers {
            s = layer.forward(&s)?;
        }
        let s = self.dropout.forward(&s, train)?;
        self.layer_norm.forward(&s)
    }
}
