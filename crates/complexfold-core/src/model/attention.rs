//! Point attention over the single representation.
//!
//! The structure module only depends on the [`SingleUpdate`] seam; [`InvariantPointAttention`]
//! is the stock implementation. Query, key and value points are predicted as offsets from the
//! centroid of each residue's anchor atoms, so attention sees the current coordinate estimate.

use super::config::StructureModuleConfig;
use super::primitives::{Linear, LinearInit};
use crate::core::utils::tensor::{flatten_leading, unflatten_leading};
use candle_core::{D, Module, Result, Tensor};
use candle_nn::{Init, VarBuilder, ops::softmax};

/// Produces an additive update to the single representation.
pub trait SingleUpdate {
    /// `s`: `[*, N, C_s]`, `z`: `[*, N, N, C_z]`, `mask`: `[*, N]`, `xyz`: `[*, N, A, 3]`.
    /// Returns `[*, N, C_s]`.
    fn forward(&self, s: &Tensor, z: &Tensor, mask: &Tensor, xyz: &Tensor) -> Result<Tensor>;
}

// softplus^-1(1): head weights start at one after the softplus.
const HEAD_WEIGHT_INIT: f64 = 0.541_324_854_612_918_1;

#[derive(Debug, Clone)]
pub struct InvariantPointAttention {
    linear_q: Linear,
    linear_kv: Linear,
    linear_q_points: Linear,
    linear_kv_points: Linear,
    linear_b: Linear,
    head_weights: Tensor,
    linear_out: Linear,
    c_hidden: usize,
    no_heads: usize,
    no_qk_points: usize,
    no_v_points: usize,
    inf: f64,
    eps: f64,
}

impl InvariantPointAttention {
    pub fn new(config: &StructureModuleConfig, vb: VarBuilder) -> Result<Self> {
        let (c_s, c_z, c) = (config.c_s, config.c_z, config.c_ipa);
        let h = config.no_heads_ipa;
        let (p_qk, p_v) = (config.no_qk_points, config.no_v_points);
        let concat_out = h * (c_z + c + p_v * 4);

        Ok(Self {
            linear_q: Linear::new(c_s, h * c, LinearInit::Default, vb.pp("linear_q"))?,
            linear_kv: Linear::new(c_s, 2 * h * c, LinearInit::Default, vb.pp("linear_kv"))?,
            linear_q_points: Linear::new(
                c_s,
                h * p_qk * 3,
                LinearInit::Default,
                vb.pp("linear_q_points"),
            )?,
            linear_kv_points: Linear::new(
                c_s,
                h * (p_qk + p_v) * 3,
                LinearInit::Default,
                vb.pp("linear_kv_points"),
            )?,
            linear_b: Linear::new(c_z, h, LinearInit::Default, vb.pp("linear_b"))?,
            head_weights: vb.get_with_hints(h, "head_weights", Init::Const(HEAD_WEIGHT_INIT))?,
            linear_out: Linear::new(concat_out, c_s, LinearInit::Final, vb.pp("linear_out"))?,
            c_hidden: c,
            no_heads: h,
            no_qk_points: p_qk,
            no_v_points: p_v,
            inf: config.inf,
            eps: config.epsilon,
        })
    }

    // [B, N, H * P * 3] -> [B, N, H, P, 3], shifted onto the anchor centroid.
    fn place_points(&self, raw: &Tensor, points: usize, centroid: &Tensor) -> Result<Tensor> {
        let (b, n, _) = raw.dims3()?;
        raw.reshape((b, n, self.no_heads, points, 3))?
            .broadcast_add(&centroid.unsqueeze(2)?.unsqueeze(2)?)
    }

    // [B, N, H, X] -> [B, H, N, X]
    fn heads_first(t: &Tensor) -> Result<Tensor> {
        t.transpose(1, 2)?.contiguous()
    }

    fn forward_flat(&self, s: &Tensor, z: &Tensor, mask: &Tensor, xyz: &Tensor) -> Result<Tensor> {
        let (b, n, _) = s.dims3()?;
        let (h, c) = (self.no_heads, self.c_hidden);
        let (p_qk, p_v) = (self.no_qk_points, self.no_v_points);

        let centroid = xyz.mean(2)?;

        // Scalar queries, keys and values: [B, H, N, C].
        let q = Self::heads_first(&self.linear_q.forward(s)?.reshape((b, n, h, c))?)?;
        let kv = self.linear_kv.forward(s)?.reshape((b, n, h, 2 * c))?;
        let k = Self::heads_first(&kv.narrow(3, 0, c)?)?;
        let v = Self::heads_first(&kv.narrow(3, c, c)?)?;

        // Points: [B, N, H, P, 3].
        let q_pts = self.place_points(&self.linear_q_points.forward(s)?, p_qk, &centroid)?;
        let kv_pts =
            self.place_points(&self.linear_kv_points.forward(s)?, p_qk + p_v, &centroid)?;
        let k_pts = kv_pts.narrow(3, 0, p_qk)?;
        let v_pts = kv_pts.narrow(3, p_qk, p_v)?;

        // Scalar term plus pair bias: [B, H, N, N].
        let scalar = q
            .matmul(&k.transpose(2, 3)?.contiguous()?)?
            .affine((1.0 / (3.0 * c as f64)).sqrt(), 0.0)?;
        let pair_bias = self
            .linear_b
            .forward(z)?
            .permute((0, 3, 1, 2))?
            .affine((1.0f64 / 3.0).sqrt(), 0.0)?;
        let mut a = (scalar + pair_bias)?;

        // Point term: -0.5 * w_h * sum_p |q_ip - k_jp|^2.
        let q_flat = Self::heads_first(&q_pts.reshape((b, n, h, p_qk * 3))?)?;
        let k_flat = Self::heads_first(&k_pts.reshape((b, n, h, p_qk * 3))?)?;
        let q_sq = q_flat.sqr()?.sum_keepdim(3)?;
        let k_sq = k_flat.sqr()?.sum_keepdim(3)?.transpose(2, 3)?;
        let cross = q_flat.matmul(&k_flat.transpose(2, 3)?.contiguous()?)?;
        let sq_dist = (q_sq.broadcast_add(&k_sq)? - (cross * 2.0)?)?;
        let head_weights = ((self.head_weights.exp()? + 1.0)?.log()?
            * (1.0 / (3.0 * (p_qk as f64 * 9.0 / 2.0))).sqrt())?;
        let point_term = sq_dist
            .broadcast_mul(&head_weights.reshape((1, h, 1, 1))?)?
            .affine(-0.5, 0.0)?;
        a = (a + point_term)?;

        // Mask: [B, 1, N, N].
        let square_mask = mask.unsqueeze(2)?.broadcast_mul(&mask.unsqueeze(1)?)?;
        let square_mask = square_mask.affine(self.inf, -self.inf)?.unsqueeze(1)?;
        let a = softmax(&a.broadcast_add(&square_mask)?, D::Minus1)?;

        // Scalar output: [B, N, H * C].
        let o = a.matmul(&v)?.transpose(1, 2)?.reshape((b, n, h * c))?;

        // Point output relative to the centroid: [B, N, H, P_v, 3].
        let v_flat = Self::heads_first(&v_pts.reshape((b, n, h, p_v * 3))?)?;
        let o_pt = a
            .matmul(&v_flat)?
            .transpose(1, 2)?
            .reshape((b, n, h, p_v, 3))?
            .broadcast_sub(&centroid.unsqueeze(2)?.unsqueeze(2)?)?;
        let o_pt_norm = (o_pt.sqr()?.sum(D::Minus1)? + self.eps)?
            .sqrt()?
            .reshape((b, n, h * p_v))?;
        let o_pt = o_pt.reshape((b, n, h * p_v * 3))?;

        // Pair output: [B, N, H * C_z].
        let c_z = z.dim(3)?;
        let o_pair = a
            .transpose(1, 2)?
            .contiguous()?
            .matmul(z)?
            .reshape((b, n, h * c_z))?;

        let concat = Tensor::cat(&[&o, &o_pt, &o_pt_norm, &o_pair], D::Minus1)?;
        self.linear_out.forward(&concat)
    }
}

impl SingleUpdate for InvariantPointAttention {
    fn forward(&self, s: &Tensor, z: &Tensor, mask: &Tensor, xyz: &Tensor) -> Result<Tensor> {
        let (s_flat, leading) = flatten_leading(s, 2)?;
        let (z_flat, _) = flatten_leading(z, 3)?;
        let (mask_flat, _) = flatten_leading(mask, 1)?;
        let (xyz_flat, _) = flatten_leading(xyz, 3)?;

        let z_flat = z_flat.contiguous()?;
        let out = self.forward_flat(&s_flat, &z_flat, &mask_flat, &xyz_flat)?;
        unflatten_leading(&out, &leading)
    }
}
