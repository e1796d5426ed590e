use candle_core::{CpuStorage, InplaceOp2, Layout, Result, Tensor, bail};
use tracing::debug;

/// In-place division of every row of the left operand by one scalar of the right operand.
///
/// The right operand holds one value per row (`[*, 1]` against `[*, C]`); both operands must be
/// contiguous and share a floating-point dtype.
struct RowDivAssign;

impl RowDivAssign {
    fn divide<T>(lhs: &mut [T], rhs: &[T]) -> Result<()>
    where
        T: Copy + std::ops::DivAssign,
    {
        if rhs.is_empty() || lhs.len() % rhs.len() != 0 {
            bail!(
                "row-div-assign: {} elements cannot be split into {} rows",
                lhs.len(),
                rhs.len()
            )
        }
        let width = lhs.len() / rhs.len();
        for (row, &divisor) in lhs.chunks_exact_mut(width).zip(rhs) {
            for value in row {
                *value /= divisor;
            }
        }
        Ok(())
    }
}

impl InplaceOp2 for RowDivAssign {
    fn name(&self) -> &'static str {
        "row-div-assign"
    }

    fn cpu_fwd(&self, s1: &mut CpuStorage, l1: &Layout, s2: &CpuStorage, l2: &Layout) -> Result<()> {
        let Some((start1, end1)) = l1.contiguous_offsets() else {
            bail!("row-div-assign: lhs is not contiguous")
        };
        let Some((start2, end2)) = l2.contiguous_offsets() else {
            bail!("row-div-assign: rhs is not contiguous")
        };
        match (s1, s2) {
            (CpuStorage::F32(lhs), CpuStorage::F32(rhs)) => {
                Self::divide(&mut lhs[start1..end1], &rhs[start2..end2])
            }
            (CpuStorage::F64(lhs), CpuStorage::F64(rhs)) => {
                Self::divide(&mut lhs[start1..end1], &rhs[start2..end2])
            }
            _ => bail!("row-div-assign: operands must both be f32 or both be f64"),
        }
    }
}

/// Divides `t` (`[*, C]`) by `divisor` (`[*, 1]`), overwriting the storage of `t` when it lives
/// in host memory.
///
/// Other devices have no in-place kernel and receive an out-of-place broadcast division instead.
/// The returned tensor is `t` itself in the in-place case. Not for use on tensors that take part
/// in gradient computation.
pub fn div_rows_inplace(t: &Tensor, divisor: &Tensor) -> Result<Tensor> {
    if divisor.dim(candle_core::D::Minus1)? != 1 {
        bail!(
            "row-div-assign: divisor must have a trailing unit axis, got {:?}",
            divisor.dims()
        )
    }
    if !t.device().is_cpu() {
        debug!(device = ?t.device().location(), "No in-place division kernel, dividing out of place.");
        return t.broadcast_div(divisor);
    }

    let t = t.contiguous()?;
    let divisor = divisor.contiguous()?;
    t.inplace_op2(&divisor, &RowDivAssign)?;
    Ok(t)
}
