//! Initialization-aware linear layer and layer norm.

use crate::core::utils::tensor::{flatten_leading, unflatten_leading};
use candle_core::{D, DType, Module, Result, Tensor};
use candle_nn::{Init, VarBuilder};

const LAYER_NORM_EPS: f64 = 1e-5;

/// Weight initialization schemes for [`Linear`].
///
/// Only used when the weight is created by the [`VarBuilder`]; weights loaded from a checkpoint
/// are taken as-is. Biases always start at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinearInit {
    /// LeCun normal, `std = sqrt(1 / fan_in)`.
    Default,
    /// He normal, `std = sqrt(2 / fan_in)`, for layers followed by a ReLU.
    Relu,
    /// All zeros, for layers whose output is added to a residual stream.
    Final,
}

impl LinearInit {
    fn weight_init(self, fan_in: usize) -> Init {
        let fan_in = fan_in.max(1) as f64;
        match self {
            LinearInit::Default => Init::Randn {
                mean: 0.0,
                stdev: (1.0 / fan_in).sqrt(),
            },
            LinearInit::Relu => Init::Randn {
                mean: 0.0,
                stdev: (2.0 / fan_in).sqrt(),
            },
            LinearInit::Final => Init::Const(0.0),
        }
    }
}

/// `y = x W^T + b` applied over the last axis of a tensor of any rank.
#[derive(Debug, Clone)]
pub struct Linear {
    weight: Tensor,
    bias: Tensor,
}

impl Linear {
    pub fn new(in_dim: usize, out_dim: usize, init: LinearInit, vb: VarBuilder) -> Result<Self> {
        let weight = vb.get_with_hints((out_dim, in_dim), "weight", init.weight_init(in_dim))?;
        let bias = vb.get_with_hints(out_dim, "bias", Init::Const(0.0))?;
        Ok(Self { weight, bias })
    }
}

impl Module for Linear {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let (flat, leading) = flatten_leading(xs, 1)?;
        let out = flat.matmul(&self.weight.t()?)?.broadcast_add(&self.bias)?;
        unflatten_leading(&out, &leading)
    }
}

/// Affine layer norm over the last axis.
///
/// Half and single precision go through the fused `candle_nn::ops::layer_norm` kernel, which has
/// no double-precision implementation; f64 inputs are normalized from an explicit mean and
/// variance instead.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    weight: Tensor,
    bias: Tensor,
    eps: f64,
}

impl LayerNorm {
    pub fn new(weight: Tensor, bias: Tensor, eps: f64) -> Self {
        Self { weight, bias, eps }
    }

    fn forward_explicit(&self, xs: &Tensor) -> Result<Tensor> {
        let hidden = xs.dim(D::Minus1)? as f64;
        let mean = (xs.sum_keepdim(D::Minus1)? / hidden)?;
        let centered = xs.broadcast_sub(&mean)?;
        let var = (centered.sqr()?.sum_keepdim(D::Minus1)? / hidden)?;
        let normed = centered.broadcast_div(&(var + self.eps)?.sqrt()?)?;
        normed.broadcast_mul(&self.weight)?.broadcast_add(&self.bias)
    }
}

impl Module for LayerNorm {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        match xs.dtype() {
            DType::F16 | DType::BF16 | DType::F32 => {
                candle_nn::ops::layer_norm(&xs.contiguous()?, &self.weight, &self.bias, self.eps as f32)
            }
            _ => self.forward_explicit(xs),
        }
    }
}

/// Layer norm with unit weight and zero bias at creation.
pub fn layer_norm(dim: usize, vb: VarBuilder) -> Result<LayerNorm> {
    let weight = vb.get_with_hints(dim, "weight", Init::Const(1.0))?;
    let bias = vb.get_with_hints(dim, "bias", Init::Const(0.0))?;
    Ok(LayerNorm::new(weight, bias, LAYER_NORM_EPS))
}
