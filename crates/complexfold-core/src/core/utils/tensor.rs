use crate::core::geometry::rigid::with_suffix;
use candle_core::{Result, Tensor, bail};

/// Collapses every dimension except the last `keep` into one leading dimension.
///
/// Returns the collapsed tensor together with the original leading dimensions, so the result of
/// a computation can be restored with [`unflatten_leading`].
pub fn flatten_leading(t: &Tensor, keep: usize) -> Result<(Tensor, Vec<usize>)> {
    let dims = t.dims();
    if keep > dims.len() {
        bail!("cannot keep {keep} trailing dims of a rank-{} tensor", dims.len())
    }
    let (leading, trailing) = dims.split_at(dims.len() - keep);
    let rows = leading.iter().product::<usize>();
    let flat = t.reshape(with_suffix(&[rows], trailing))?;
    Ok((flat, leading.to_vec()))
}

/// Inverse of [`flatten_leading`]: splits the first dimension back into `leading`.
pub fn unflatten_leading(t: &Tensor, leading: &[usize]) -> Result<Tensor> {
    let dims = t.dims();
    if dims.is_empty() {
        bail!("cannot unflatten a scalar")
    }
    t.reshape(with_suffix(leading, &dims[1..]))
}

/// Looks up rows of `table` (`[T, ...]`) for every entry of an integer `index` tensor (`[*]`),
/// producing `[*, ...]`.
pub fn gather_rows(table: &Tensor, index: &Tensor) -> Result<Tensor> {
    let flat_index = index.flatten_all()?;
    let rows = table.contiguous()?.index_select(&flat_index, 0)?;
    rows.reshape(with_suffix(index.dims(), &table.dims()[1..]))
}

/// Matrix product over the last two axes with broadcasting over all leading axes.
///
/// Leading axes are broadcast, materialized and collapsed into one batch axis, so operands of
/// any rank and stride pattern reach the kernel as contiguous rank-3 tensors.
pub fn batched_matmul(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let (a_dims, b_dims) = (a.dims(), b.dims());
    if a_dims.len() < 2 || b_dims.len() < 2 {
        bail!("batched_matmul needs rank >= 2 operands, got {a_dims:?} and {b_dims:?}")
    }
    let (a_batch, a_mat) = a_dims.split_at(a_dims.len() - 2);
    let (b_batch, b_mat) = b_dims.split_at(b_dims.len() - 2);
    let (m, k, n) = (a_mat[0], a_mat[1], b_mat[1]);
    if b_mat[0] != k {
        bail!("batched_matmul inner dimensions differ: {a_dims:?} x {b_dims:?}")
    }

    let rank = a_batch.len().max(b_batch.len());
    let mut batch = Vec::with_capacity(rank);
    for i in 0..rank {
        let da = padded_dim(a_batch, rank, i);
        let db = padded_dim(b_batch, rank, i);
        batch.push(match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => bail!("batched_matmul cannot broadcast {a_dims:?} with {b_dims:?}"),
        });
    }
    let count = batch.iter().product::<usize>();

    let a = a
        .broadcast_as(with_suffix(&batch, &[m, k]))?
        .contiguous()?
        .reshape((count, m, k))?;
    let b = b
        .broadcast_as(with_suffix(&batch, &[k, n]))?
        .contiguous()?
        .reshape((count, k, n))?;
    a.matmul(&b)?.reshape(with_suffix(&batch, &[m, n]))
}

fn padded_dim(dims: &[usize], rank: usize, i: usize) -> usize {
    let offset = rank - dims.len();
    if i < offset { 1 } else { dims[i - offset] }
}
