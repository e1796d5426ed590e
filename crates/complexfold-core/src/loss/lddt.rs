use super::LossError;
use crate::core::geometry::rigid::with_suffix;
use candle_core::{D, Tensor};
use serde::Deserialize;

const THRESHOLDS: [f64; 4] = [0.5, 1.0, 2.0, 4.0];

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LddtParams {
    /// Pairs whose true distance is at or beyond this many Angstrom are not scored.
    pub cutoff: f64,
    pub eps: f64,
    /// Reduce over partners only (`[*, N]`) instead of over all pairs (`[*]`).
    pub per_residue: bool,
}

impl Default for LddtParams {
    fn default() -> Self {
        Self {
            cutoff: 15.0,
            eps: 1e-10,
            per_residue: true,
        }
    }
}

/// Local Distance Difference Test between two point clouds.
///
/// `pred_pos` and `true_pos` are `[*, N, 3]`, `mask` is `[*, N, 1]`. A pair `(i, j)` is scored
/// when `i != j`, both points are masked in and their true distance is below the cutoff; its
/// score is the fraction of the thresholds 0.5, 1, 2 and 4 Angstrom that the distance error
/// stays under.
pub fn lddt(
    pred_pos: &Tensor,
    true_pos: &Tensor,
    mask: &Tensor,
    params: &LddtParams,
) -> Result<Tensor, LossError> {
    let n = mask.dim(D::Minus2)?;
    let dtype = true_pos.dtype();

    let dmat_true = distance_matrix(true_pos, params.eps)?;
    let dmat_pred = distance_matrix(pred_pos, params.eps)?;

    let index = Tensor::arange(0u32, n as u32, true_pos.device())?;
    let off_diagonal = index
        .unsqueeze(1)?
        .broadcast_ne(&index.unsqueeze(0)?)?
        .to_dtype(dtype)?;
    let pair_mask = mask.broadcast_mul(&mask.transpose(D::Minus2, D::Minus1)?)?;
    let dists_to_score = dmat_true
        .lt(params.cutoff)?
        .to_dtype(dtype)?
        .broadcast_mul(&pair_mask)?
        .broadcast_mul(&off_diagonal)?;

    let dist_l1 = (&dmat_true - &dmat_pred)?.abs()?;
    let mut score = dist_l1.zeros_like()?;
    for threshold in THRESHOLDS {
        score = (score + dist_l1.lt(threshold)?.to_dtype(dtype)?)?;
    }
    let score = (score * 0.25)?;

    let reduce = |t: &Tensor| -> candle_core::Result<Tensor> {
        if params.per_residue {
            t.sum(D::Minus1)
        } else {
            t.sum(D::Minus1)?.sum(D::Minus1)
        }
    };
    let norm = (reduce(&dists_to_score)? + params.eps)?;
    let total = (reduce(&(&dists_to_score * &score)?)? + params.eps)?;
    Ok((total / norm)?)
}

/// lDDT over every atom of every residue as one point cloud.
///
/// Positions are `[*, N_res, N_atoms, 3]` and the mask `[*, N_res, N_atoms]`.
pub fn lddt_all(
    pred_pos: &Tensor,
    true_pos: &Tensor,
    mask: &Tensor,
    params: &LddtParams,
) -> Result<Tensor, LossError> {
    let dims = pred_pos.dims();
    if dims.len() < 3 {
        return Err(candle_core::Error::Msg(format!(
            "lddt_all expects [*, N_res, N_atoms, 3] positions, got {:?}",
            dims
        ))
        .into());
    }
    let batch = &dims[..dims.len() - 3];
    let points = dims[dims.len() - 3] * dims[dims.len() - 2];

    let pred_pos = pred_pos.reshape(with_suffix(batch, &[points, 3]))?;
    let true_pos = true_pos.reshape(with_suffix(batch, &[points, 3]))?;
    let mask = mask.reshape(with_suffix(batch, &[points, 1]))?;
    lddt(&pred_pos, &true_pos, &mask, params)
}

/// lDDT on Cα positions (`[*, N, 3]`, mask `[*, N]`), averaged into one scalar.
pub fn lddt_ca(
    pred_pos: &Tensor,
    true_pos: &Tensor,
    mask: &Tensor,
    params: &LddtParams,
) -> Result<Tensor, LossError> {
    let mask = mask.unsqueeze(D::Minus1)?;
    let score = lddt(pred_pos, true_pos, &mask, params)?;
    Ok(score.mean_all()?)
}

fn distance_matrix(points: &Tensor, eps: f64) -> candle_core::Result<Tensor> {
    let diff = points
        .unsqueeze(D::Minus2)?
        .broadcast_sub(&points.unsqueeze(D::Minus(3))?)?;
    (diff.sqr()?.sum(D::Minus1)? + eps)?.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn cloud(points: &[[f64; 3]]) -> Tensor {
        let flat: Vec<f64> = points.iter().flatten().copied().collect();
        Tensor::from_vec(flat, (points.len(), 3), &Device::Cpu).unwrap()
    }

    fn column_mask(values: &[f64]) -> Tensor {
        Tensor::from_vec(values.to_vec(), (values.len(), 1), &Device::Cpu).unwrap()
    }

    fn sample() -> Tensor {
        cloud(&[
            [0.0, 0.0, 0.0],
            [3.8, 0.0, 0.0],
            [7.6, 0.5, 0.0],
            [9.0, 3.0, 1.0],
            [40.0, 40.0, 40.0],
        ])
    }

    #[test]
    fn identical_structures_score_one() {
        let x = sample();
        let mask = column_mask(&[1.0; 5]);

        let score = lddt(&x, &x, &mask, &LddtParams::default()).unwrap();

        assert_eq!(score.dims(), &[5]);
        for value in score.to_vec1::<f64>().unwrap() {
            assert!((value - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn scores_stay_within_unit_interval_for_perturbed_prediction() {
        let truth = sample();
        let noise = cloud(&[
            [0.3, -0.2, 0.1],
            [-1.5, 0.4, 0.9],
            [3.0, -2.0, 0.0],
            [0.0, 0.0, -6.0],
            [0.1, 0.1, 0.1],
        ]);
        let pred = (&truth + &noise).unwrap();
        let mask = column_mask(&[1.0, 1.0, 0.0, 1.0, 1.0]);

        let score = lddt(&pred, &truth, &mask, &LddtParams::default()).unwrap();

        let values = score.to_vec1::<f64>().unwrap();
        assert!(values.iter().all(|v| (0.0..=1.0 + 1e-9).contains(v)));
        assert!(values[0] < 1.0);
    }

    #[test]
    fn global_reduction_returns_one_value_per_structure() {
        let x = sample().unsqueeze(0).unwrap();
        let mask = column_mask(&[1.0; 5]).unsqueeze(0).unwrap();
        let params = LddtParams {
            per_residue: false,
            ..LddtParams::default()
        };

        let score = lddt(&x, &x, &mask, &params).unwrap();

        assert_eq!(score.dims(), &[1]);
        assert!((score.to_vec1::<f64>().unwrap()[0] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn single_threshold_violation_costs_a_quarter() {
        let truth = cloud(&[[0.0, 0.0, 0.0], [5.0, 0.0, 0.0]]);
        let pred = cloud(&[[0.0, 0.0, 0.0], [5.7, 0.0, 0.0]]);
        let mask = column_mask(&[1.0, 1.0]);

        let score = lddt(&pred, &truth, &mask, &LddtParams::default())
            .unwrap()
            .to_vec1::<f64>()
            .unwrap();

        assert!((score[0] - 0.75).abs() < 1e-6);
        assert!((score[1] - 0.75).abs() < 1e-6);
    }

    #[test]
    fn lddt_all_flattens_residues_and_atoms() {
        let x = sample().reshape((1, 5, 3)).unwrap();
        let x = Tensor::cat(&[&x, &(&x + 1.0).unwrap()], 0).unwrap();
        let mask = Tensor::ones((2, 5), candle_core::DType::F64, &Device::Cpu).unwrap();

        let score = lddt_all(&x, &x, &mask, &LddtParams::default()).unwrap();

        assert_eq!(score.dims(), &[10]);
    }

    #[test]
    fn lddt_ca_reduces_to_scalar() {
        let x = sample();
        let mask = Tensor::ones(5, candle_core::DType::F64, &Device::Cpu).unwrap();

        let score = lddt_ca(&x, &x, &mask, &LddtParams::default()).unwrap();

        assert_eq!(score.rank(), 0);
        assert!((score.to_scalar::<f64>().unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn params_deserialize_with_defaults() {
        let params: LddtParams = toml::from_str("cutoff = 30.0").unwrap();
        assert_eq!(params.cutoff, 30.0);
        assert_eq!(params.eps, 1e-10);
        assert!(params.per_residue);
        assert!(toml::from_str::<LddtParams>("radius = 3.0").is_err());
    }
}
