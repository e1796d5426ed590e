use super::LossError;
use candle_core::{D, DType, Device, Tensor};
use candle_nn::ops::softmax;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TmParams {
    /// Upper boundary of the last closed distance bin, in Angstrom.
    pub max_bin: f64,
    pub no_bins: usize,
    pub eps: f64,
    /// Score inter-chain pairs only.
    pub interface: bool,
}

impl Default for TmParams {
    fn default() -> Self {
        Self {
            max_bin: 31.0,
            no_bins: 64,
            eps: 1e-8,
            interface: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AlignedErrorOutput {
    /// `[*, N, N, no_bins]`
    pub aligned_confidence_probs: Tensor,
    /// `[*, N, N]`
    pub predicted_aligned_error: Tensor,
    /// Scalar: the center of the open-ended last bin.
    pub max_predicted_aligned_error: Tensor,
}

/// Centers of the bins delimited by `boundaries` (`[K]`, evenly spaced), plus one trailing
/// center for the open-ended bin above the last boundary. Returns `[K + 1]`.
pub fn calculate_bin_centers(boundaries: &Tensor) -> Result<Tensor, LossError> {
    let k = boundaries.dim(0)?;
    if k < 2 {
        return Err(LossError::InvalidBinning { boundaries: k });
    }
    let step = (boundaries.narrow(0, 1, 1)? - boundaries.narrow(0, 0, 1)?)?;
    let centers = boundaries.broadcast_add(&(&step * 0.5)?)?;
    let last = (centers.narrow(0, k - 1, 1)? + &step)?;
    Ok(Tensor::cat(&[&centers, &last], 0)?)
}

/// Predicted TM-score from pairwise aligned-error logits `[*, N, N, no_bins]`.
///
/// `residue_weights` (`[N]`) defaults to ones. With `params.interface`, only pairs from
/// different chains (per `asym_id`, `[N]`) contribute. Every residue is tried as the alignment
/// anchor and the score of the anchor with the highest weighted score is returned; on ties the
/// first anchor in row-major order wins.
pub fn compute_tm(
    logits: &Tensor,
    residue_weights: Option<&Tensor>,
    asym_id: Option<&Tensor>,
    params: &TmParams,
) -> Result<Tensor, LossError> {
    let dtype = logits.dtype();
    let device = logits.device();
    let n = logits.dim(D::Minus2)?;
    if n == 0 {
        return Err(LossError::EmptyInput("compute_tm"));
    }

    let residue_weights = match residue_weights {
        Some(weights) => weights.to_dtype(dtype)?,
        None => Tensor::ones(n, dtype, device)?,
    };

    let boundaries = bin_boundaries(params.max_bin, params.no_bins, dtype, device)?;
    let bin_centers = calculate_bin_centers(&boundaries)?;

    let clipped_n = n.max(19) as f64;
    let d0 = 1.24 * (clipped_n - 15.0).cbrt() - 1.8;

    let probs = softmax(logits, D::Minus1)?;
    let tm_per_bin = ((bin_centers.sqr()? / (d0 * d0))? + 1.0)?.recip()?;
    let predicted_tm_term = probs.broadcast_mul(&tm_per_bin)?.sum(D::Minus1)?;

    let pair_mask = if params.interface {
        let asym_id = asym_id.ok_or(LossError::MissingChainIds)?;
        asym_id
            .unsqueeze(D::Minus1)?
            .broadcast_ne(&asym_id.unsqueeze(D::Minus2)?)?
            .to_dtype(dtype)?
    } else {
        Tensor::ones((n, n), dtype, device)?
    };
    let predicted_tm_term = predicted_tm_term.broadcast_mul(&pair_mask)?;

    let pair_residue_weights = pair_mask.broadcast_mul(
        &residue_weights
            .unsqueeze(0)?
            .broadcast_mul(&residue_weights.unsqueeze(1)?)?,
    )?;
    let normalizer = (pair_residue_weights.sum_all()? + params.eps)?;
    let normed_residue_mask = pair_residue_weights.broadcast_div(&normalizer)?;
    let per_alignment = predicted_tm_term
        .broadcast_mul(&normed_residue_mask)?
        .sum(D::Minus1)?;

    let weighted = per_alignment
        .broadcast_mul(&residue_weights)?
        .flatten_all()?
        .to_dtype(DType::F64)?
        .to_vec1::<f64>()?;
    let best = first_argmax(&weighted).ok_or(LossError::NonFiniteScore("compute_tm"))?;

    Ok(per_alignment.flatten_all()?.get(best)?)
}

/// Softmax over distance-error bins and the expected aligned error per residue pair.
pub fn compute_predicted_aligned_error(
    logits: &Tensor,
    max_bin: f64,
    no_bins: usize,
) -> Result<AlignedErrorOutput, LossError> {
    let boundaries = bin_boundaries(max_bin, no_bins, logits.dtype(), logits.device())?;
    let bin_centers = calculate_bin_centers(&boundaries)?;

    let aligned_confidence_probs = softmax(logits, D::Minus1)?;
    let predicted_aligned_error = aligned_confidence_probs
        .broadcast_mul(&bin_centers)?
        .sum(D::Minus1)?;
    let max_predicted_aligned_error = bin_centers.get(bin_centers.dim(0)? - 1)?;

    Ok(AlignedErrorOutput {
        aligned_confidence_probs,
        predicted_aligned_error,
        max_predicted_aligned_error,
    })
}

/// Per-residue pLDDT in `[0, 100]` from `[*, num_bins]` logits over uniform bins of `[0, 1]`.
pub fn compute_plddt(logits: &Tensor) -> Result<Tensor, LossError> {
    let num_bins = logits.dim(D::Minus1)?;
    let width = 1.0 / num_bins as f64;
    let centers: Vec<f64> = (0..num_bins).map(|i| (i as f64 + 0.5) * width).collect();
    let centers = Tensor::from_vec(centers, num_bins, logits.device())?.to_dtype(logits.dtype())?;

    let probs = softmax(logits, D::Minus1)?;
    Ok((probs.broadcast_mul(&centers)?.sum(D::Minus1)? * 100.0)?)
}

// `no_bins - 1` evenly spaced boundaries on [0, max_bin].
fn bin_boundaries(
    max_bin: f64,
    no_bins: usize,
    dtype: DType,
    device: &Device,
) -> Result<Tensor, LossError> {
    let steps = no_bins.saturating_sub(1);
    if steps < 2 {
        return Err(LossError::InvalidBinning { boundaries: steps });
    }
    let step = max_bin / (steps - 1) as f64;
    let values: Vec<f64> = (0..steps).map(|i| i as f64 * step).collect();
    Ok(Tensor::from_vec(values, steps, device)?.to_dtype(dtype)?)
}

fn first_argmax(values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, current)) if v <= current => {}
            _ if v.is_nan() => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peaked_logits(n: usize, no_bins: usize, peak_of_row: impl Fn(usize) -> usize) -> Tensor {
        let mut data = vec![0.0f64; n * n * no_bins];
        for i in 0..n {
            for j in 0..n {
                data[(i * n + j) * no_bins + peak_of_row(i)] = 60.0;
            }
        }
        Tensor::from_vec(data, (n, n, no_bins), &Device::Cpu).unwrap()
    }

    fn host_tm(center: f64, n: usize) -> f64 {
        let d0 = 1.24 * (n.max(19) as f64 - 15.0).cbrt() - 1.8;
        1.0 / (1.0 + center * center / (d0 * d0))
    }

    #[test]
    fn bin_centers_shift_by_half_step_and_append_open_bin() {
        let boundaries = Tensor::from_vec(vec![0.0f64, 1.0, 2.0], 3, &Device::Cpu).unwrap();
        let centers = calculate_bin_centers(&boundaries).unwrap();
        assert_eq!(centers.to_vec1::<f64>().unwrap(), vec![0.5, 1.5, 2.5, 3.5]);
    }

    #[test]
    fn bin_centers_reject_single_boundary() {
        let boundaries = Tensor::from_vec(vec![0.0f64], 1, &Device::Cpu).unwrap();
        assert!(matches!(
            calculate_bin_centers(&boundaries),
            Err(LossError::InvalidBinning { boundaries: 1 })
        ));
        let logits = Tensor::zeros((2, 2, 2), DType::F64, &Device::Cpu).unwrap();
        assert!(matches!(
            compute_predicted_aligned_error(&logits, 31.0, 2),
            Err(LossError::InvalidBinning { .. })
        ));
    }

    #[test]
    fn max_predicted_aligned_error_is_last_bin_center() {
        for seed in [0.0f64, 3.0] {
            let logits = Tensor::arange(0f64, 4.0 * 64.0, &Device::Cpu)
                .unwrap()
                .reshape((2, 2, 64))
                .unwrap()
                .affine(0.01, seed)
                .unwrap();

            let out = compute_predicted_aligned_error(&logits, 31.0, 64).unwrap();

            // 63 boundaries on [0, 31] are 0.5 apart; the open bin is centered at 31.75.
            let max = out.max_predicted_aligned_error.to_scalar::<f64>().unwrap();
            assert!((max - 31.75).abs() < 1e-9);
            assert_eq!(out.predicted_aligned_error.dims(), &[2, 2]);
            assert_eq!(out.aligned_confidence_probs.dims(), &[2, 2, 64]);
        }
    }

    #[test]
    fn plddt_of_uniform_logits_is_fifty() {
        let logits = Tensor::zeros((3, 50), DType::F32, &Device::Cpu).unwrap();
        let plddt = compute_plddt(&logits).unwrap().to_vec1::<f32>().unwrap();
        for value in plddt {
            assert!((value - 50.0).abs() < 1e-4);
        }
    }

    #[test]
    fn plddt_stays_within_percentage_range() {
        let logits = Tensor::from_vec(
            vec![100.0f64, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 100.0],
            (2, 4),
            &Device::Cpu,
        )
        .unwrap();
        let plddt = compute_plddt(&logits).unwrap().to_vec1::<f64>().unwrap();
        assert!((plddt[0] - 12.5).abs() < 1e-9);
        assert!((plddt[1] - 87.5).abs() < 1e-9);
        assert!(plddt.iter().all(|v| (0.0..=100.0).contains(v)));
    }

    #[test]
    fn tm_of_confident_prediction_matches_closed_form() {
        let n = 4;
        let logits = peaked_logits(n, 64, |_| 0);

        let tm = compute_tm(&logits, None, None, &TmParams::default())
            .unwrap()
            .to_scalar::<f64>()
            .unwrap();

        // Every pair carries the bin-0 term; normalizing by all n^2 pairs leaves 1/n of it.
        let expected = host_tm(0.25, n) / n as f64;
        assert!((tm - expected).abs() < 1e-6);
    }

    #[test]
    fn tm_picks_the_best_alignment_anchor() {
        let n = 3;
        let logits = peaked_logits(n, 64, |i| if i == 1 { 0 } else { 40 });

        let tm = compute_tm(&logits, None, None, &TmParams::default())
            .unwrap()
            .to_scalar::<f64>()
            .unwrap();

        let expected = host_tm(0.25, n) * n as f64 / (n * n) as f64;
        assert!((tm - expected).abs() < 1e-6);
    }

    #[test]
    fn interface_tm_requires_chain_ids() {
        let logits = peaked_logits(2, 64, |_| 0);
        let params = TmParams {
            interface: true,
            ..TmParams::default()
        };
        assert!(matches!(
            compute_tm(&logits, None, None, &params),
            Err(LossError::MissingChainIds)
        ));
    }

    #[test]
    fn interface_tm_weights_only_inter_chain_pairs() {
        let n = 3;
        let logits = peaked_logits(n, 64, |_| 0);
        let params = TmParams {
            interface: true,
            ..TmParams::default()
        };
        let asym_id = Tensor::from_vec(vec![0u32, 0, 1], n, &Device::Cpu).unwrap();

        let tm = compute_tm(&logits, None, Some(&asym_id), &params)
            .unwrap()
            .to_scalar::<f64>()
            .unwrap();

        // Four inter-chain pairs; anchoring on the lone chain-1 residue covers two of them.
        let expected = host_tm(0.25, n) * 2.0 / 4.0;
        assert!((tm - expected).abs() < 1e-6);
    }

    #[test]
    fn tm_reports_non_finite_scores() {
        let logits = Tensor::full(f64::NAN, (2, 2, 64), &Device::Cpu).unwrap();
        assert!(matches!(
            compute_tm(&logits, None, None, &TmParams::default()),
            Err(LossError::NonFiniteScore("compute_tm"))
        ));
    }

    #[test]
    fn first_argmax_prefers_earliest_tie_and_skips_nan() {
        assert_eq!(first_argmax(&[0.1, 0.5, 0.5, 0.2]), Some(1));
        assert_eq!(first_argmax(&[f64::NAN, 0.3, 0.1]), Some(1));
        assert_eq!(first_argmax(&[]), None);
    }
}
