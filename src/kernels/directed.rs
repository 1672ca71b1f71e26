//! Learned directed kernels
//!
//! Both produce edge weights in `(0, 1)` through a sigmoid and are evaluated
//! for the whole batch in one pass.

use super::AdjacencyKernel;
use crate::primitives::{relu, sigmoid, std_all, summed_weights, uniform_var};
use crate::{GnnError, Result};
use candle_core::{Device, Tensor, Var};

fn check_fmaps(name: &str, expected: usize, emb: &Tensor) -> Result<(usize, usize)> {
    let (b, fm, n) = emb.dims3()?;
    if fm != expected {
        return Err(GnnError::Shape(format!(
            "{} built for {} feature maps, got {}",
            name, expected, fm
        )));
    }
    Ok((b, n))
}

// =============================================================================
// MPNN
// =============================================================================

/// Message-passing inspired kernel: `sigmoid(v · (c_i + c_j) + b)` on
/// coordinates `c` normalized by the global standard deviation of the batch.
///
/// Symmetric by construction.
pub struct MpnnDirected {
    fmaps: usize,
    /// `(1, 1, fmaps)`
    v: Var,
    /// `(1,)`
    bias: Var,
}

impl MpnnDirected {
    pub fn new(fmaps: usize, device: &Device) -> Result<Self> {
        Ok(Self {
            fmaps,
            v: uniform_var(0.0, 1.0, &[1, 1, fmaps], device)?,
            bias: uniform_var(0.0, 1.0, &[1], device)?,
        })
    }
}

impl AdjacencyKernel for MpnnDirected {
    fn name(&self) -> &'static str {
        "MPNNdirected"
    }

    fn compute(&self, emb: &Tensor, _prev_adj: &Tensor) -> Result<Tensor> {
        check_fmaps(self.name(), self.fmaps, emb)?;

        let coord = emb.broadcast_div(&std_all(emb)?)?;
        // v · c_i for every node: (batch, 1, nodes)
        let projected = self
            .v
            .as_tensor()
            .broadcast_matmul(&coord)
            .map_err(|e| GnnError::Tensor(format!("mpnn projection failed: {}", e)))?;

        let pair_sum = projected
            .transpose(1, 2)?
            .broadcast_add(&projected)?
            .broadcast_add(self.bias.as_tensor())?;
        sigmoid(&pair_sum)
    }

    fn trainable_vars(&self) -> Vec<Var> {
        vec![self.v.clone(), self.bias.clone()]
    }
}

// =============================================================================
// MLP
// =============================================================================

/// Edge scores from a two-layer perceptron over `[h_j, h_k, w_k]`, where
/// `w_k` is node `k`'s summed weight in the previous adjacency.
pub struct MlpDirected {
    fmaps: usize,
    /// `(2 * fmaps + 1, hidden)`
    w1: Var,
    b1: Var,
    /// `(hidden, 1)`
    w2: Var,
    b2: Var,
}

impl MlpDirected {
    pub fn new(fmaps: usize, hidden: usize, device: &Device) -> Result<Self> {
        let in_dim = 2 * fmaps + 1;
        let bound1 = 1.0 / (in_dim as f32).sqrt();
        let bound2 = 1.0 / (hidden as f32).sqrt();

        Ok(Self {
            fmaps,
            w1: uniform_var(-bound1, bound1, &[in_dim, hidden], device)?,
            b1: uniform_var(-bound1, bound1, &[hidden], device)?,
            w2: uniform_var(-bound2, bound2, &[hidden, 1], device)?,
            b2: uniform_var(-bound2, bound2, &[1], device)?,
        })
    }

    /// Raw scores `(samples, 1)` for rows of width `2 * fmaps + 1`.
    pub fn score(&self, samples: &Tensor) -> Result<Tensor> {
        let hidden = samples
            .matmul(self.w1.as_tensor())
            .and_then(|t| t.broadcast_add(self.b1.as_tensor()))
            .map_err(|e| GnnError::Tensor(format!("mlp layer1 failed: {}", e)))?;
        relu(&hidden)?
            .matmul(self.w2.as_tensor())
            .and_then(|t| t.broadcast_add(self.b2.as_tensor()))
            .map_err(|e| GnnError::Tensor(format!("mlp layer2 failed: {}", e)))
    }
}

impl AdjacencyKernel for MlpDirected {
    fn name(&self) -> &'static str {
        "MLPdirected"
    }

    fn compute(&self, emb: &Tensor, prev_adj: &Tensor) -> Result<Tensor> {
        let (b, n) = check_fmaps(self.name(), self.fmaps, emb)?;
        let fm = self.fmaps;

        // (batch, nodes, fm) node-major rows
        let h = emb.transpose(1, 2)?.contiguous()?;
        let left = h.unsqueeze(2)?.broadcast_as((b, n, n, fm))?;
        let right = h.unsqueeze(1)?.broadcast_as((b, n, n, fm))?;
        let weights = summed_weights(prev_adj)?
            .unsqueeze(1)?
            .unsqueeze(3)?
            .broadcast_as((b, n, n, 1))?;

        let samples = Tensor::cat(&[&left, &right, &weights], 3)?
            .reshape((b * n * n, 2 * fm + 1))
            .map_err(|e| GnnError::Tensor(format!("mlp samples failed: {}", e)))?;

        let scores = self.score(&samples)?.reshape((b, n, n))?;
        sigmoid(&scores)
    }

    fn trainable_vars(&self) -> Vec<Var> {
        vec![
            self.w1.clone(),
            self.b1.clone(),
            self.w2.clone(),
            self.b2.clone(),
        ]
    }
}
