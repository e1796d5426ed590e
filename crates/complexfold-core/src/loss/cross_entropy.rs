use super::LossError;
use candle_core::{D, DType, Tensor};
use candle_nn::ops::log_softmax;

/// `-Σ labels · log_softmax(logits)` over the class axis (last axis, reduced).
pub fn softmax_cross_entropy(logits: &Tensor, labels: &Tensor) -> Result<Tensor, LossError> {
    let log_p = log_softmax(logits, D::Minus1)?;
    Ok(labels.broadcast_mul(&log_p)?.sum(D::Minus1)?.neg()?)
}

/// Element-wise binary cross-entropy on logits.
///
/// Evaluated in `f64` and cast back to the dtype of `logits`; this is the only loss that
/// promotes precision.
pub fn sigmoid_cross_entropy(logits: &Tensor, labels: &Tensor) -> Result<Tensor, LossError> {
    let dtype = logits.dtype();
    let logits = logits.to_dtype(DType::F64)?;
    let labels = labels.to_dtype(DType::F64)?;

    let log_p = log_sigmoid(&logits)?;
    let log_not_p = log_sigmoid(&logits.neg()?)?;

    let positive = labels.broadcast_mul(&log_p)?.neg()?;
    let negative = labels.affine(-1.0, 1.0)?.broadcast_mul(&log_not_p)?;
    Ok((positive - negative)?.to_dtype(dtype)?)
}

// min(x, 0) - ln(1 + e^-|x|), finite for any finite x.
fn log_sigmoid(x: &Tensor) -> candle_core::Result<Tensor> {
    let tail = ((x.abs()?.neg()?.exp()? + 1.0)?).log()?;
    x.minimum(0.0)? - tail
}
