//! Single-operator convolution

use super::operator_blocks;
use crate::primitives::{relu, tanh, uniform_var};
use crate::{GnnError, Result};
use candle_core::{Device, Tensor, Var};

/// `tanh(A · relu(W x + b))` per graph.
///
/// `A` is the operator block at index 1 when two or more operators are
/// joined (the adjacency after the identity in the usual
/// `[Identity, Adjacency]` setup), otherwise block 0.
pub struct Simple {
    in_fm: usize,
    out_fm: usize,
    /// `(1, out_fm, in_fm)`
    weight: Var,
    /// `(1, out_fm, 1)`
    bias: Var,
}

impl Simple {
    pub fn new(in_fm: usize, out_fm: usize, device: &Device) -> Result<Self> {
        let bound = 1.0 / (in_fm.max(1) as f32).sqrt();
        Ok(Self {
            in_fm,
            out_fm,
            weight: uniform_var(-bound, bound, &[1, out_fm, in_fm], device)?,
            bias: uniform_var(-bound, bound, &[1, out_fm, 1], device)?,
        })
    }

    pub fn out_fm(&self) -> usize {
        self.out_fm
    }

    pub fn forward(&self, ops: Option<&Tensor>, emb: &Tensor) -> Result<Tensor> {
        let ops = ops.ok_or_else(|| {
            GnnError::Config("Simple convolution needs at least one graph operator".into())
        })?;
        let (_, in_fm, n) = emb.dims3()?;
        if in_fm != self.in_fm {
            return Err(GnnError::Shape(format!(
                "Simple expects {} feature maps, got {}",
                self.in_fm, in_fm
            )));
        }

        let blocks = operator_blocks(ops, emb)?;
        let index = if blocks >= 2 { 1 } else { 0 };
        let operator = ops.narrow(2, index * n, n)?;

        let h = self
            .weight
            .as_tensor()
            .broadcast_matmul(&emb.contiguous()?)
            .and_then(|t| t.broadcast_add(self.bias.as_tensor()))
            .map_err(|e| GnnError::Tensor(format!("simple linear failed: {}", e)))?;
        let h = relu(&h)?;

        // out[:, i] = sum_j A[i, j] h[:, j]
        let aggregated = h
            .matmul(&operator.transpose(1, 2)?.contiguous()?)
            .map_err(|e| GnnError::Tensor(format!("simple aggregation failed: {}", e)))?;
        tanh(&aggregated)
    }

    pub fn trainable_vars(&self) -> Vec<Var> {
        vec![self.weight.clone(), self.bias.clone()]
    }
}
