use candle_core::{Result, Tensor};
use tracing::trace;

/// Evaluates `f` over consecutive slices of `0..len` and concatenates the results along `dim`.
///
/// `f` receives `(start, len)` of each slice. A `chunk_size` of zero, or one covering the whole
/// range, evaluates `f` once. Slices are processed in order; the result is the same as a single
/// call up to floating-point summation order inside `f`.
pub fn chunked<F>(len: usize, chunk_size: usize, dim: usize, mut f: F) -> Result<Tensor>
where
    F: FnMut(usize, usize) -> Result<Tensor>,
{
    if chunk_size == 0 || chunk_size >= len {
        return f(0, len);
    }

    let mut pieces = Vec::with_capacity(len.div_ceil(chunk_size));
    let mut start = 0;
    while start < len {
        let size = chunk_size.min(len - start);
        trace!(start, size, len, "Evaluating chunk.");
        pieces.push(f(start, size)?);
        start += size;
    }
    Tensor::cat(&pieces, dim)
}
