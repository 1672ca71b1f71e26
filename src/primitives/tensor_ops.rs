//! Core Tensor Operations
//!
//! Device selection, divergence detection and the losses used by the
//! external training loop.
//!
//! ## Device selection
//!
//! Set `JET_GNN_NO_GPU=1` to force CPU even when the crate was built with the
//! `metal` or `cuda` feature:
//!
//! ```bash
//! export JET_GNN_NO_GPU=1
//! ```

use crate::{GnnError, Result};
use candle_core::{Device, Tensor, Var};
use tracing::{error, info};

/// Environment variable that forces CPU execution.
pub const NO_GPU_ENV: &str = "JET_GNN_NO_GPU";

// ============================================================================
// Device Selection
// ============================================================================

/// Check if GPU is disabled via environment variable.
pub fn gpu_disabled() -> bool {
    std::env::var(NO_GPU_ENV)
        .map(|v| !v.is_empty() && v != "0" && v.to_lowercase() != "false")
        .unwrap_or(false)
}

/// Get the best available device for tensor operations
///
/// Priority:
/// 1. `JET_GNN_NO_GPU` forces CPU
/// 2. Metal (when built with `metal`)
/// 3. CUDA (when built with `cuda`)
/// 4. CPU
pub fn best_device() -> Device {
    if gpu_disabled() {
        info!("Using CPU device ({} set)", NO_GPU_ENV);
        return Device::Cpu;
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            info!("Using Metal device");
            return device;
        }
    }

    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            info!("Using CUDA device");
            return device;
        }
    }

    info!("Using CPU device");
    Device::Cpu
}

/// Force CPU device, ignoring GPU availability.
pub fn cpu_device() -> Device {
    Device::Cpu
}

// ============================================================================
// Parameters
// ============================================================================

/// Trainable variable drawn uniformly from `[low, high)`.
pub fn uniform_var(low: f32, high: f32, shape: &[usize], device: &Device) -> Result<Var> {
    let init = Tensor::rand(low, high, shape, device)
        .map_err(|e| GnnError::Tensor(format!("uniform init failed: {}", e)))?;
    Ok(Var::from_tensor(&init)?)
}

// ============================================================================
// Divergence Detection
// ============================================================================

/// Returns true if any element of `tensor` is NaN.
pub fn has_nan(tensor: &Tensor) -> Result<bool> {
    let vals = tensor
        .flatten_all()
        .and_then(|t| t.to_dtype(candle_core::DType::F32))
        .and_then(|t| t.to_vec1::<f32>())
        .map_err(|e| GnnError::Tensor(format!("has_nan readback failed: {}", e)))?;
    Ok(vals.iter().any(|v| v.is_nan()))
}

/// Fail with [`GnnError::NumericalDivergence`] if `tensor` contains a NaN.
///
/// `context` names the tensor in the error message, e.g.
/// `"resgconv: linear"`. Callers must not retry after this error.
pub fn check_for_nan(tensor: &Tensor, context: &str) -> Result<()> {
    if has_nan(tensor)? {
        error!("NaN detected in {}", context);
        return Err(GnnError::NumericalDivergence(format!("NaN in {}", context)));
    }
    Ok(())
}

// ============================================================================
// Losses
// ============================================================================

/// Binary cross-entropy loss
///
/// BCE = -[y * log(p) + (1-y) * log(1-p)], predictions clamped to
/// `[1e-7, 1 - 1e-7]`.
pub fn binary_cross_entropy(pred: &Tensor, target: &Tensor) -> Result<Tensor> {
    let eps = 1e-7f32;
    let p = pred
        .clamp(eps, 1.0 - eps)
        .map_err(|e| GnnError::Tensor(format!("bce clamp failed: {}", e)))?;

    let log_p = p.log()?;
    let log_1_p = p.affine(-1.0, 1.0)?.log()?;

    let pos = target.mul(&log_p)?;
    let neg = target.affine(-1.0, 1.0)?.mul(&log_1_p)?;

    (pos + neg)?
        .neg()?
        .mean_all()
        .map_err(|e| GnnError::Tensor(format!("bce mean failed: {}", e)))
}

/// Mean squared error loss
pub fn mse_loss(pred: &Tensor, target: &Tensor) -> Result<Tensor> {
    let diff = (pred - target).map_err(|e| GnnError::Tensor(format!("mse diff failed: {}", e)))?;
    Ok(diff.sqr()?.mean_all()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_best_device() {
        let device = best_device();
        assert!(matches!(
            device,
            Device::Cpu | Device::Metal(_) | Device::Cuda(_)
        ));
    }

    #[test]
    fn test_cpu_device() {
        assert!(matches!(cpu_device(), Device::Cpu));
    }

    #[test]
    fn test_has_nan() {
        let device = Device::Cpu;
        let clean = Tensor::from_vec(vec![1.0f32, 2.0, 3.0], 3, &device).unwrap();
        assert!(!has_nan(&clean).unwrap());

        let dirty = Tensor::from_vec(vec![1.0f32, f32::NAN, 3.0], 3, &device).unwrap();
        assert!(has_nan(&dirty).unwrap());
    }

    #[test]
    fn test_check_for_nan_is_divergence() {
        let device = Device::Cpu;
        let dirty = Tensor::from_vec(vec![f32::NAN; 4], (2, 2), &device).unwrap();
        let err = check_for_nan(&dirty, "resgconv: linear").unwrap_err();
        assert!(matches!(err, GnnError::NumericalDivergence(_)));
        assert!(err.to_string().contains("resgconv: linear"));
    }

    #[test]
    fn test_infinity_is_not_nan() {
        let device = Device::Cpu;
        let t = Tensor::from_vec(vec![f32::INFINITY, 0.0], 2, &device).unwrap();
        assert!(check_for_nan(&t, "inf").is_ok());
    }

    #[test]
    fn test_mse_loss() {
        let device = Device::Cpu;
        let pred = Tensor::from_vec(vec![1.0f32, 2.0, 3.0], 3, &device).unwrap();
        let target = Tensor::from_vec(vec![1.0f32, 2.0, 5.0], 3, &device).unwrap();

        let loss = mse_loss(&pred, &target).unwrap().to_scalar::<f32>().unwrap();
        assert!((loss - 4.0 / 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_bce_loss() {
        let device = Device::Cpu;
        let pred = Tensor::from_vec(vec![0.9f32, 0.1], 2, &device).unwrap();
        let target = Tensor::from_vec(vec![1.0f32, 0.0], 2, &device).unwrap();

        let loss = binary_cross_entropy(&pred, &target)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        // -ln(0.9) for both samples
        assert!((loss - 0.105_360_5).abs() < 1e-4);
    }
}
