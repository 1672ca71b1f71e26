//! GraphNorm

use super::graph_op::INV_SQRT2;
use crate::primitives::uniform_var;
use crate::{GnnError, Result};
use candle_core::{DType, Device, Tensor, Var};

/// Default stabilizer added to the standard deviation.
pub const GRAPH_NORM_EPS: f64 = 1e-5;

/// Per-graph, per-feature-map normalization over the node axis followed by a
/// learned affine map `alpha · x + beta`.
///
/// A feature that is constant over a graph has zero variance; its variance
/// is replaced by 1 so the output stays finite.
pub struct GraphNorm {
    eps: f64,
    /// `(1, fm, 1)`
    alpha: Var,
    /// `(1, fm, 1)`
    beta: Var,
}

impl GraphNorm {
    pub fn new(fm: usize, device: &Device) -> Result<Self> {
        Ok(Self {
            eps: GRAPH_NORM_EPS,
            alpha: uniform_var(-INV_SQRT2, INV_SQRT2, &[1, fm, 1], device)?,
            beta: uniform_var(-INV_SQRT2, INV_SQRT2, &[1, fm, 1], device)?,
        })
    }

    pub fn with_eps(mut self, eps: f64) -> Self {
        self.eps = eps;
        self
    }

    /// `(x - mean) / (sqrt(var + [var == 0]) + eps)` over the node axis.
    pub fn normalize(&self, emb: &Tensor) -> Result<Tensor> {
        let avg = emb.mean_keepdim(2)?;
        let centered = emb.broadcast_sub(&avg)?;
        let var = centered.sqr()?.mean_keepdim(2)?;

        let zero_var = var.eq(0.0)?.to_dtype(DType::F32)?;
        let denom = (var + zero_var)?.sqrt()?.affine(1.0, self.eps)?;

        centered
            .broadcast_div(&denom)
            .map_err(|e| GnnError::Tensor(format!("graph norm failed: {}", e)))
    }

    pub fn forward(&self, emb: &Tensor) -> Result<Tensor> {
        self.normalize(emb)?
            .broadcast_mul(self.alpha.as_tensor())
            .and_then(|t| t.broadcast_add(self.beta.as_tensor()))
            .map_err(|e| GnnError::Tensor(format!("graph norm affine failed: {}", e)))
    }

    pub fn trainable_vars(&self) -> Vec<Var> {
        vec![self.alpha.clone(), self.beta.clone()]
    }
}
