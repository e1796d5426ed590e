use crate::core::utils::tensor::batched_matmul;
use candle_core::{D, DType, Device, Result, Tensor};

/// A batch of rigid transformations `x -> R x + t`.
///
/// Rotations are stored as `[*, 3, 3]` matrices whose columns are the frame's basis vectors and
/// translations as `[*, 3]`. The leading `*` dimensions are the frame's batch dimensions; every
/// `dim` argument on this type indexes into them. Rotations are never re-orthonormalized, so
/// long composition chains may drift.
#[derive(Debug, Clone)]
pub struct Rigid {
    rots: Tensor,
    trans: Tensor,
}

impl Rigid {
    pub fn new(rots: Tensor, trans: Tensor) -> Self {
        Self { rots, trans }
    }

    pub fn identity(batch_dims: &[usize], dtype: DType, device: &Device) -> Result<Self> {
        let eye = Tensor::from_vec(
            vec![1f64, 0., 0., 0., 1., 0., 0., 0., 1.],
            (3, 3),
            device,
        )?
        .to_dtype(dtype)?;
        let rots = eye
            .broadcast_as(with_suffix(batch_dims, &[3, 3]))?
            .contiguous()?;
        let trans = Tensor::zeros(with_suffix(batch_dims, &[3]), dtype, device)?;
        Ok(Self { rots, trans })
    }

    /// The all-zero "frame": zero rotation matrix and zero translation. Used as a placeholder
    /// for frame slots a residue type does not populate.
    pub fn zeros(batch_dims: &[usize], dtype: DType, device: &Device) -> Result<Self> {
        Ok(Self {
            rots: Tensor::zeros(with_suffix(batch_dims, &[3, 3]), dtype, device)?,
            trans: Tensor::zeros(with_suffix(batch_dims, &[3]), dtype, device)?,
        })
    }

    pub fn zeros_like(&self) -> Result<Self> {
        Ok(Self {
            rots: self.rots.zeros_like()?,
            trans: self.trans.zeros_like()?,
        })
    }

    pub fn rots(&self) -> &Tensor {
        &self.rots
    }

    pub fn trans(&self) -> &Tensor {
        &self.trans
    }

    pub fn batch_dims(&self) -> &[usize] {
        let dims = self.trans.dims();
        &dims[..dims.len() - 1]
    }

    pub fn dtype(&self) -> DType {
        self.trans.dtype()
    }

    pub fn device(&self) -> &Device {
        self.trans.device()
    }

    /// Gram-Schmidt frame from three points.
    ///
    /// The origin sits on `origin`, the x-axis points from `p_neg_x_axis` towards `origin`, and
    /// `p_xy_plane` lies in the xy-plane with positive y. Vector norms are computed as
    /// `sqrt(|v|^2 + eps)` so degenerate inputs produce zero axes rather than NaNs.
    pub fn from_3_points(
        p_neg_x_axis: &Tensor,
        origin: &Tensor,
        p_xy_plane: &Tensor,
        eps: f64,
    ) -> Result<Self> {
        let e0 = normalize(&(origin - p_neg_x_axis)?, eps)?;
        let e1 = (p_xy_plane - origin)?;
        let dot = (&e0 * &e1)?.sum_keepdim(D::Minus1)?;
        let e1 = normalize(&(e1 - e0.broadcast_mul(&dot)?)?, eps)?;
        let e2 = cross(&e0, &e1)?;

        let rots = Tensor::stack(&[&e0, &e1, &e2], D::Minus1)?;
        Ok(Self {
            rots,
            trans: origin.clone(),
        })
    }

    /// Reads frames from homogeneous `[*, 4, 4]` matrices.
    pub fn from_tensor_4x4(t: &Tensor) -> Result<Self> {
        let top = t.narrow(D::Minus2, 0, 3)?;
        let rots = top.narrow(D::Minus1, 0, 3)?.contiguous()?;
        let trans = top.narrow(D::Minus1, 3, 1)?.squeeze(D::Minus1)?.contiguous()?;
        Ok(Self { rots, trans })
    }

    /// Writes frames as homogeneous `[*, 4, 4]` matrices.
    pub fn to_tensor_4x4(&self) -> Result<Tensor> {
        let top = Tensor::cat(&[&self.rots, &self.trans.unsqueeze(D::Minus1)?], D::Minus1)?;
        let bottom = Tensor::from_vec(vec![0f64, 0., 0., 1.], (1, 4), self.device())?
            .to_dtype(self.dtype())?
            .broadcast_as(with_suffix(self.batch_dims(), &[1, 4]))?;
        Tensor::cat(&[&top, &bottom], D::Minus2)
    }

    /// `self ∘ other`, broadcasting batch dimensions.
    pub fn compose(&self, other: &Rigid) -> Result<Self> {
        let rots = batched_matmul(&self.rots, &other.rots)?;
        let trans = rotate(&self.rots, &other.trans)?.broadcast_add(&self.trans)?;
        Ok(Self { rots, trans })
    }

    /// Composes with a pure rotation `[*, 3, 3]`, keeping the translation.
    pub fn compose_rotation(&self, rots: &Tensor) -> Result<Self> {
        let rots = batched_matmul(&self.rots, rots)?;
        let trans = self
            .trans
            .broadcast_as(with_suffix(&rots.dims()[..rots.rank() - 2], &[3]))?
            .contiguous()?;
        Ok(Self { rots, trans })
    }

    /// Applies the transformation to points `[*, 3]`.
    pub fn apply(&self, points: &Tensor) -> Result<Tensor> {
        rotate(&self.rots, points)?.broadcast_add(&self.trans)
    }

    pub fn invert(&self) -> Result<Self> {
        let rots = self.rots.transpose(D::Minus2, D::Minus1)?.contiguous()?;
        let trans = rotate(&rots, &self.trans)?.neg()?;
        Ok(Self { rots, trans })
    }

    pub fn invert_apply(&self, points: &Tensor) -> Result<Tensor> {
        self.invert()?.apply(points)
    }

    pub fn scale_translation(&self, factor: f64) -> Result<Self> {
        Ok(Self {
            rots: self.rots.clone(),
            trans: (&self.trans * factor)?,
        })
    }

    pub fn unsqueeze(&self, dim: usize) -> Result<Self> {
        Ok(Self {
            rots: self.rots.unsqueeze(dim)?,
            trans: self.trans.unsqueeze(dim)?,
        })
    }

    pub fn narrow(&self, dim: usize, start: usize, len: usize) -> Result<Self> {
        Ok(Self {
            rots: self.rots.narrow(dim, start, len)?,
            trans: self.trans.narrow(dim, start, len)?,
        })
    }

    /// Selects a single entry along `dim`, dropping that dimension.
    pub fn select(&self, dim: usize, index: usize) -> Result<Self> {
        Ok(Self {
            rots: self.rots.narrow(dim, index, 1)?.squeeze(dim)?,
            trans: self.trans.narrow(dim, index, 1)?.squeeze(dim)?,
        })
    }

    pub fn index_select(&self, indexes: &Tensor, dim: usize) -> Result<Self> {
        Ok(Self {
            rots: self.rots.contiguous()?.index_select(indexes, dim)?,
            trans: self.trans.contiguous()?.index_select(indexes, dim)?,
        })
    }

    /// Adds `source` into the rows of `self` named by `indexes` along `dim`.
    pub fn index_add(&self, indexes: &Tensor, source: &Rigid, dim: usize) -> Result<Self> {
        Ok(Self {
            rots: self.rots.index_add(indexes, &source.rots.contiguous()?, dim)?,
            trans: self.trans.index_add(indexes, &source.trans.contiguous()?, dim)?,
        })
    }

    pub fn cat(rigids: &[Rigid], dim: usize) -> Result<Self> {
        let rots: Vec<&Tensor> = rigids.iter().map(|r| &r.rots).collect();
        let trans: Vec<&Tensor> = rigids.iter().map(|r| &r.trans).collect();
        Ok(Self {
            rots: Tensor::cat(&rots, dim)?,
            trans: Tensor::cat(&trans, dim)?,
        })
    }

    pub fn stack(rigids: &[Rigid], dim: usize) -> Result<Self> {
        let rots: Vec<&Tensor> = rigids.iter().map(|r| &r.rots).collect();
        let trans: Vec<&Tensor> = rigids.iter().map(|r| &r.trans).collect();
        Ok(Self {
            rots: Tensor::stack(&rots, dim)?,
            trans: Tensor::stack(&trans, dim)?,
        })
    }
}

/// Rotation about the x-axis from `[*, 2]` (sin, cos) pairs, returned as `[*, 3, 3]`.
///
/// The pairs are used as given; callers normalize them beforehand if needed.
pub fn rotation_x_from_sin_cos(sin_cos: &Tensor) -> Result<Tensor> {
    let sin = sin_cos.narrow(D::Minus1, 0, 1)?;
    let cos = sin_cos.narrow(D::Minus1, 1, 1)?;
    let zero = sin.zeros_like()?;
    let one = sin.ones_like()?;
    let entries = [
        one.clone(),
        zero.clone(),
        zero.clone(),
        zero.clone(),
        cos.clone(),
        sin.neg()?,
        zero,
        sin,
        cos,
    ];
    let flat = Tensor::cat(&entries, D::Minus1)?;
    let batch = &sin_cos.dims()[..sin_cos.rank() - 1];
    flat.reshape(with_suffix(batch, &[3, 3]))
}

fn rotate(rots: &Tensor, points: &Tensor) -> Result<Tensor> {
    batched_matmul(rots, &points.unsqueeze(D::Minus1)?)?.squeeze(D::Minus1)
}

fn normalize(v: &Tensor, eps: f64) -> Result<Tensor> {
    let norm = (v.sqr()?.sum_keepdim(D::Minus1)? + eps)?.sqrt()?;
    v.broadcast_div(&norm)
}

fn cross(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let (a0, a1, a2) = components(a)?;
    let (b0, b1, b2) = components(b)?;
    let c0 = ((&a1 * &b2)? - (&a2 * &b1)?)?;
    let c1 = ((&a2 * &b0)? - (&a0 * &b2)?)?;
    let c2 = ((&a0 * &b1)? - (&a1 * &b0)?)?;
    Tensor::cat(&[c0, c1, c2], D::Minus1)
}

fn components(v: &Tensor) -> Result<(Tensor, Tensor, Tensor)> {
    Ok((
        v.narrow(D::Minus1, 0, 1)?,
        v.narrow(D::Minus1, 1, 1)?,
        v.narrow(D::Minus1, 2, 1)?,
    ))
}

pub(crate) fn with_suffix(prefix: &[usize], suffix: &[usize]) -> Vec<usize> {
    prefix.iter().chain(suffix).copied().collect()
}
