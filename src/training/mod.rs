//! Training support
//!
//! The training loop itself lives with the caller. This module provides the
//! pieces it needs around [`crate::model::Gnn::trainable_vars`]:
//!
//! - [`Optimizer`]: AdamW or SGD built from an [`OptimizerConfig`]
//! - [`Optimizer::step_checked`]: skips non-finite gradients and clips by
//!   global norm before stepping
//! - [`grad_norm`] / [`gradients_healthy`]: monitoring helpers
//!
//! ## Example
//!
//! ```rust,ignore
//! use jet_gnn::prelude::*;
//!
//! let mut optimizer = Optimizer::from_config(gnn.trainable_vars(), &OptimizerConfig::default())?;
//! let probs = gnn.forward(&emb, &mask, None)?;
//! let loss = binary_cross_entropy(&probs, &labels)?;
//! let mut grads = loss.backward()?;
//! optimizer.step_checked(&mut grads)?;
//! ```

use crate::config::OptimizerConfig;
use crate::{GnnError, Result};
use candle_core::backprop::GradStore;
use candle_core::Var;
use candle_nn::optim::Optimizer as CandleOptimizer;
use tracing::warn;

// =============================================================================
// Optimizers
// =============================================================================

/// What [`Optimizer::step_checked`] did with a gradient store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    Applied,
    /// Gradients were scaled down from this global norm
    Clipped(f32),
    /// Non-finite gradients, parameters untouched
    Skipped,
}

/// AdamW or SGD over a fixed set of variables.
pub enum Optimizer {
    Sgd {
        inner: candle_nn::optim::SGD,
        vars: Vec<Var>,
        max_grad_norm: f32,
    },
    AdamW {
        inner: candle_nn::optim::AdamW,
        vars: Vec<Var>,
        max_grad_norm: f32,
    },
}

impl Optimizer {
    pub fn from_config(vars: Vec<Var>, config: &OptimizerConfig) -> Result<Self> {
        if config.learning_rate <= 0.0 || !config.learning_rate.is_finite() {
            return Err(GnnError::Config(format!(
                "learning rate must be positive, got {}",
                config.learning_rate
            )));
        }

        if config.use_adam {
            let params = candle_nn::optim::ParamsAdamW {
                lr: config.learning_rate,
                weight_decay: config.weight_decay,
                ..Default::default()
            };
            let inner = candle_nn::optim::AdamW::new(vars.clone(), params)
                .map_err(|e| GnnError::Tensor(format!("AdamW init failed: {}", e)))?;
            Ok(Self::AdamW {
                inner,
                vars,
                max_grad_norm: config.grad_clip,
            })
        } else {
            let inner = candle_nn::optim::SGD::new(vars.clone(), config.learning_rate)
                .map_err(|e| GnnError::Tensor(format!("SGD init failed: {}", e)))?;
            Ok(Self::Sgd {
                inner,
                vars,
                max_grad_norm: config.grad_clip,
            })
        }
    }

    pub fn vars(&self) -> &[Var] {
        match self {
            Self::Sgd { vars, .. } | Self::AdamW { vars, .. } => vars,
        }
    }

    fn max_grad_norm(&self) -> f32 {
        match self {
            Self::Sgd { max_grad_norm, .. } | Self::AdamW { max_grad_norm, .. } => *max_grad_norm,
        }
    }

    /// Take a gradient step without any checks.
    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        let stepped = match self {
            Self::Sgd { inner, .. } => inner.step(grads),
            Self::AdamW { inner, .. } => inner.step(grads),
        };
        stepped.map_err(|e| GnnError::Tensor(format!("optimizer step failed: {}", e)))
    }

    /// Step unless a gradient is non-finite; scale gradients down first when
    /// their global norm exceeds the configured clip.
    pub fn step_checked(&mut self, grads: &mut GradStore) -> Result<StepOutcome> {
        let vars = self.vars().to_vec();
        if !gradients_healthy(grads, &vars) {
            warn!("Non-finite gradients, skipping optimizer step");
            return Ok(StepOutcome::Skipped);
        }

        let norm = grad_norm(grads, &vars)?;
        let max_norm = self.max_grad_norm();
        let outcome = if max_norm > 0.0 && norm > max_norm {
            let scale = (max_norm / norm) as f64;
            for var in &vars {
                if let Some(grad) = grads.remove(var.as_tensor()) {
                    let scaled = grad
                        .affine(scale, 0.0)
                        .map_err(|e| GnnError::Tensor(format!("grad scale failed: {}", e)))?;
                    grads.insert(var.as_tensor(), scaled);
                }
            }
            StepOutcome::Clipped(norm)
        } else {
            StepOutcome::Applied
        };

        self.step(grads)?;
        Ok(outcome)
    }

    pub fn learning_rate(&self) -> f64 {
        match self {
            Self::Sgd { inner, .. } => inner.learning_rate(),
            Self::AdamW { inner, .. } => inner.learning_rate(),
        }
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        match self {
            Self::Sgd { inner, .. } => inner.set_learning_rate(lr),
            Self::AdamW { inner, .. } => inner.set_learning_rate(lr),
        }
    }
}

// =============================================================================
// Gradient health
// =============================================================================

/// Global L2 norm of the gradients of `vars`.
pub fn grad_norm(grads: &GradStore, vars: &[Var]) -> Result<f32> {
    let mut total_sq_norm = 0.0f32;
    for var in vars {
        if let Some(grad) = grads.get(var.as_tensor()) {
            total_sq_norm += grad
                .sqr()
                .and_then(|t| t.sum_all())
                .and_then(|t| t.to_scalar::<f32>())
                .map_err(|e| GnnError::Tensor(format!("grad norm failed: {}", e)))?;
        }
    }
    Ok(total_sq_norm.sqrt())
}

/// True when no gradient of `vars` holds a NaN or an infinity.
pub fn gradients_healthy(grads: &GradStore, vars: &[Var]) -> bool {
    vars.iter()
        .filter_map(|var| grads.get(var.as_tensor()))
        .all(|grad| {
            grad.flatten_all()
                .and_then(|t| t.to_vec1::<f32>())
                .map(|vals| vals.iter().all(|v| v.is_finite()))
                .unwrap_or(false)
        })
}
