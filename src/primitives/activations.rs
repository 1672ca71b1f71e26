//! Activation Functions

use crate::{GnnError, Result};
use candle_core::Tensor;

/// Sigmoid activation: σ(x) = 1 / (1 + e^(-x))
///
/// Codomain of the directed kernels (MPNN, MLP): every edge weight lands in
/// (0, 1).
pub fn sigmoid(tensor: &Tensor) -> Result<Tensor> {
    let exp_neg = tensor
        .neg()
        .and_then(|t| t.exp())
        .map_err(|e| GnnError::Tensor(format!("sigmoid exp failed: {}", e)))?;
    (exp_neg + 1.0)
        .and_then(|t| t.recip())
        .map_err(|e| GnnError::Tensor(format!("sigmoid recip failed: {}", e)))
}

/// Softmax activation along a dimension
pub fn softmax(tensor: &Tensor, dim: usize) -> Result<Tensor> {
    candle_nn::ops::softmax(tensor, dim)
        .map_err(|e| GnnError::Tensor(format!("softmax failed: {}", e)))
}

/// ReLU activation: max(0, x)
pub fn relu(tensor: &Tensor) -> Result<Tensor> {
    tensor
        .relu()
        .map_err(|e| GnnError::Tensor(format!("relu failed: {}", e)))
}

/// Tanh activation, used by the `Simple` convolution output.
pub fn tanh(tensor: &Tensor) -> Result<Tensor> {
    tensor
        .tanh()
        .map_err(|e| GnnError::Tensor(format!("tanh failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn tensor(vals: &[f32]) -> Tensor {
        Tensor::from_vec(vals.to_vec(), vals.len(), &Device::Cpu).unwrap()
    }

    #[test]
    fn test_sigmoid() {
        let vals = sigmoid(&tensor(&[0.0, 100.0, -100.0]))
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert!((vals[0] - 0.5).abs() < 1e-6);
        assert!((vals[1] - 1.0).abs() < 1e-6);
        assert!(vals[2].abs() < 1e-6);
    }

    #[test]
    fn test_relu() {
        let vals = relu(&tensor(&[-2.0, 0.0, 3.0]))
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert_eq!(vals, vec![0.0, 0.0, 3.0]);
    }

    #[test]
    fn test_tanh_is_odd() {
        let vals = tanh(&tensor(&[-0.5, 0.0, 0.5]))
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert!((vals[0] + vals[2]).abs() < 1e-6);
        assert_eq!(vals[1], 0.0);
    }

    #[test]
    fn test_softmax_rows() {
        let t = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 0.0, 0.0, 0.0], (2, 3), &Device::Cpu)
            .unwrap();
        let rows = softmax(&t, 1).unwrap().to_vec2::<f32>().unwrap();
        for row in &rows {
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        }
        assert!(rows[0][2] > rows[0][1] && rows[0][1] > rows[0][0]);
        assert!((rows[1][0] - 1.0 / 3.0).abs() < 1e-6);
    }
}
