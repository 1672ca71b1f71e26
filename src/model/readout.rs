//! Graph-level readouts

use crate::primitives::{mean_with_padding, sigmoid, uniform_var, NodeMask};
use crate::{GnnError, Result};
use candle_core::{Device, Tensor, Var};

/// Maps final node embeddings to one prediction per graph.
pub trait Readout: Send + Sync {
    /// `(batch, fm, nodes)` → `(batch,)`
    fn forward(&self, emb: &Tensor, mask: &NodeMask) -> Result<Tensor>;

    fn trainable_vars(&self) -> Vec<Var>;
}

/// Masked mean over nodes, linear projection to one logit, sigmoid.
pub struct MeanPoolReadout {
    fm: usize,
    /// `(fm, 1)`
    weight: Var,
    /// `(1,)`
    bias: Var,
}

impl MeanPoolReadout {
    pub fn new(fm: usize, device: &Device) -> Result<Self> {
        let bound = 1.0 / (fm.max(1) as f32).sqrt();
        Ok(Self {
            fm,
            weight: uniform_var(-bound, bound, &[fm, 1], device)?,
            bias: uniform_var(-bound, bound, &[1], device)?,
        })
    }
}

impl Readout for MeanPoolReadout {
    fn forward(&self, emb: &Tensor, mask: &NodeMask) -> Result<Tensor> {
        let (_, fm, _) = emb.dims3()?;
        if fm != self.fm {
            return Err(GnnError::Shape(format!(
                "readout expects {} feature maps, got {}",
                self.fm, fm
            )));
        }

        let pooled = mean_with_padding(emb, mask)?;
        let logits = pooled
            .matmul(self.weight.as_tensor())
            .and_then(|t| t.broadcast_add(self.bias.as_tensor()))
            .and_then(|t| t.squeeze(1))
            .map_err(|e| GnnError::Tensor(format!("readout projection failed: {}", e)))?;
        sigmoid(&logits)
    }

    fn trainable_vars(&self) -> Vec<Var> {
        vec![self.weight.clone(), self.bias.clone()]
    }
}
