//! Graph tensor utilities
//!
//! Batched building blocks shared by the adjacency kernels and the graph
//! operators. Embeddings are `(batch, feature_maps, nodes)`, adjacencies
//! `(batch, nodes, nodes)`.

use crate::{GnnError, Result};
use candle_core::{DType, Device, Tensor};

// =============================================================================
// Distances
// =============================================================================

/// Pairwise differences `x_i - x_j` per feature: `(batch, fm, nodes, nodes)`.
pub fn pairwise_diff(emb: &Tensor) -> Result<Tensor> {
    let xi = emb.unsqueeze(3)?;
    let xj = emb.unsqueeze(2)?;
    xi.broadcast_sub(&xj)
        .map_err(|e| GnnError::Tensor(format!("pairwise_diff failed: {}", e)))
}

/// Pairwise squared Euclidean distance over the feature axis.
///
/// `(batch, fm, nodes)` → `(batch, nodes, nodes)`; entries are `>= 0` and the
/// diagonal is exactly 0.
pub fn sqdist(emb: &Tensor) -> Result<Tensor> {
    pairwise_diff(emb)?
        .sqr()
        .and_then(|t| t.sum(1))
        .map_err(|e| GnnError::Tensor(format!("sqdist failed: {}", e)))
}

/// Wrap differences into `[-period/2, period/2)`.
pub fn wrap_periodic(diff: &Tensor, period: f64) -> Result<Tensor> {
    let turns = diff.affine(1.0 / period, 0.5)?.floor()?;
    (diff - turns.affine(period, 0.0)?)
        .map_err(|e| GnnError::Tensor(format!("wrap_periodic failed: {}", e)))
}

/// Pairwise squared distance where feature `feature` lives on a circle of
/// circumference `period` (e.g. azimuth with period 2π).
pub fn sqdist_periodic(emb: &Tensor, feature: usize, period: f64) -> Result<Tensor> {
    let (_, fm, _) = emb.dims3()?;
    if feature >= fm {
        return Err(GnnError::Shape(format!(
            "periodic feature {} out of range for {} feature maps",
            feature, fm
        )));
    }
    if period <= 0.0 {
        return Err(GnnError::Config(format!("period must be positive, got {}", period)));
    }

    let diff = pairwise_diff(emb)?;
    let mut parts = Vec::with_capacity(3);
    if feature > 0 {
        parts.push(diff.narrow(1, 0, feature)?);
    }
    parts.push(wrap_periodic(&diff.narrow(1, feature, 1)?, period)?);
    if feature + 1 < fm {
        parts.push(diff.narrow(1, feature + 1, fm - feature - 1)?);
    }

    Tensor::cat(&parts, 1)?
        .sqr()
        .and_then(|t| t.sum(1))
        .map_err(|e| GnnError::Tensor(format!("sqdist_periodic failed: {}", e)))
}

// =============================================================================
// Samples for edge scoring
// =============================================================================

/// Cartesian product of the rows of `rows` (`(n, f)`).
///
/// Row `j * n + k` of the `(n * n, 2f)` result is `[rows[j], rows[k]]`.
pub fn cartesian(rows: &Tensor) -> Result<Tensor> {
    let (n, f) = rows.dims2()?;
    let left = rows.unsqueeze(1)?.broadcast_as((n, n, f))?;
    let right = rows.unsqueeze(0)?.broadcast_as((n, n, f))?;
    Tensor::cat(&[&left, &right], 2)?
        .reshape((n * n, 2 * f))
        .map_err(|e| GnnError::Tensor(format!("cartesian reshape failed: {}", e)))
}

/// Normalized incoming weight of every node, self edge excluded.
///
/// `(batch, n, n)` → `(batch, n)`: column sum minus the diagonal, divided by
/// `n - 1` (1 for single-node graphs).
pub fn summed_weights(adj: &Tensor) -> Result<Tensor> {
    let (b, n, _) = adj.dims3()?;
    let eye = batch_eye(b, n, adj.device())?;

    let incoming = adj.sum(1)?;
    let self_edges = adj.mul(&eye)?.sum(1)?;
    let divisor = (n.saturating_sub(1)).max(1) as f64;

    (incoming - self_edges)?
        .affine(1.0 / divisor, 0.0)
        .map_err(|e| GnnError::Tensor(format!("summed_weights failed: {}", e)))
}

// =============================================================================
// Normalization
// =============================================================================

/// `(batch, n, n)` stack of identity matrices.
pub fn batch_eye(batch: usize, n: usize, device: &Device) -> Result<Tensor> {
    Ok(Tensor::eye(n, DType::F32, device)?
        .unsqueeze(0)?
        .broadcast_as((batch, n, n))?
        .contiguous()?)
}

/// Row-normalize a batch of adjacencies: `D⁻¹ A`
///
/// Rows of isolated nodes stay zero.
pub fn row_normalize(adj: &Tensor) -> Result<Tensor> {
    let degree = adj
        .sum_keepdim(2)
        .and_then(|d| d.affine(1.0, 1e-8))
        .map_err(|e| GnnError::Tensor(format!("row_normalize degree failed: {}", e)))?;

    adj.broadcast_div(&degree)
        .map_err(|e| GnnError::Tensor(format!("row_normalize div failed: {}", e)))
}

/// Symmetric normalization of a batch of adjacencies: `D⁻¹/² A D⁻¹/²`
pub fn symmetric_normalize(adj: &Tensor) -> Result<Tensor> {
    let d_inv_sqrt = adj
        .sum_keepdim(2)
        .and_then(|d| d.affine(1.0, 1e-8))
        .and_then(|d| d.sqrt())
        .and_then(|d| d.recip())
        .map_err(|e| GnnError::Tensor(format!("sym_norm degree failed: {}", e)))?;

    let left = adj.broadcast_mul(&d_inv_sqrt)?;
    let d_inv_sqrt_row = d_inv_sqrt.transpose(1, 2)?;
    left.broadcast_mul(&d_inv_sqrt_row)
        .map_err(|e| GnnError::Tensor(format!("sym_norm right mul failed: {}", e)))
}

/// Unbiased standard deviation over every element, as a `(1, 1, 1)` tensor
/// that stays on the autograd graph.
pub fn std_all(x: &Tensor) -> Result<Tensor> {
    let count = x.elem_count();
    let centered = x.broadcast_sub(&x.mean_all()?)?;
    let dof = count.saturating_sub(1).max(1) as f64;
    centered
        .sqr()?
        .sum_all()?
        .affine(1.0 / dof, 0.0)?
        .sqrt()?
        .reshape((1, 1, 1))
        .map_err(|e| GnnError::Tensor(format!("std_all failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> Device {
        Device::Cpu
    }

    #[test]
    fn test_sqdist_by_hand() {
        // One graph, 2 features, 3 nodes at (0,0), (3,4), (1,0)
        let emb = Tensor::from_vec(
            vec![0.0f32, 3.0, 1.0, 0.0, 4.0, 0.0],
            (1, 2, 3),
            &device(),
        )
        .unwrap();
        let d = sqdist(&emb).unwrap().to_vec3::<f32>().unwrap();
        assert_eq!(d[0][0], vec![0.0, 25.0, 1.0]);
        assert_eq!(d[0][1], vec![25.0, 0.0, 20.0]);
        assert_eq!(d[0][2], vec![1.0, 20.0, 0.0]);
    }

    #[test]
    fn test_sqdist_periodic_wraps_azimuth() {
        let two_pi = std::f64::consts::TAU;
        // Feature 1 is azimuth: 0.1 and 2π - 0.1 are 0.2 apart on the circle.
        let emb = Tensor::from_vec(
            vec![0.0f32, 0.0, 0.1, (two_pi - 0.1) as f32],
            (1, 2, 2),
            &device(),
        )
        .unwrap();
        let flat = sqdist(&emb).unwrap().to_vec3::<f32>().unwrap();
        let wrapped = sqdist_periodic(&emb, 1, two_pi).unwrap().to_vec3::<f32>().unwrap();

        assert!(flat[0][0][1] > 30.0);
        assert!((wrapped[0][0][1] - 0.04).abs() < 1e-4);
        assert!((wrapped[0][1][0] - 0.04).abs() < 1e-4);
    }

    #[test]
    fn test_sqdist_periodic_rejects_bad_feature() {
        let emb = Tensor::zeros((1, 2, 3), DType::F32, &device()).unwrap();
        assert!(sqdist_periodic(&emb, 2, 1.0).is_err());
    }

    #[test]
    fn test_cartesian_order() {
        let rows = Tensor::from_vec(vec![0.0f32, 1.0, 2.0, 3.0, 4.0, 5.0], (2, 3), &device())
            .unwrap();
        let out = cartesian(&rows).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(out[0], vec![0.0, 1.0, 2.0, 0.0, 1.0, 2.0]);
        assert_eq!(out[1], vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(out[2], vec![3.0, 4.0, 5.0, 0.0, 1.0, 2.0]);
        assert_eq!(out[3], vec![3.0, 4.0, 5.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_summed_weights() {
        // Column sums without diagonal: col0 = 2+4 = 6, col1 = 1+5 = 6, col2 = 3+2 = 5
        let adj = Tensor::from_vec(
            vec![9.0f32, 1.0, 3.0, 2.0, 9.0, 2.0, 4.0, 5.0, 9.0],
            (1, 3, 3),
            &device(),
        )
        .unwrap();
        let w = summed_weights(&adj).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(w[0], vec![3.0, 3.0, 2.5]);
    }

    #[test]
    fn test_row_normalize() {
        let adj = Tensor::from_vec(
            vec![0.0f32, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            (1, 3, 3),
            &device(),
        )
        .unwrap();
        let normed = row_normalize(&adj).unwrap().to_vec3::<f32>().unwrap();
        assert!((normed[0][0].iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!((normed[0][1].iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert_eq!(normed[0][2].iter().sum::<f32>(), 0.0);
    }

    #[test]
    fn test_symmetric_normalize_stays_symmetric() {
        let adj = Tensor::from_vec(
            vec![1.0f32, 2.0, 0.0, 2.0, 1.0, 3.0, 0.0, 3.0, 1.0],
            (1, 3, 3),
            &device(),
        )
        .unwrap();
        let normed = symmetric_normalize(&adj).unwrap().to_vec3::<f32>().unwrap();
        for i in 0..3 {
            for j in 0..3 {
                assert!((normed[0][i][j] - normed[0][j][i]).abs() < 1e-6);
                assert!(normed[0][i][j].is_finite());
            }
        }
    }

    #[test]
    fn test_std_all_unbiased() {
        let x = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], (1, 2, 2), &device()).unwrap();
        let std = std_all(&x).unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        // sample variance of 1..4 is 5/3
        assert!((std[0] - (5.0f32 / 3.0).sqrt()).abs() < 1e-5);
    }
}
