//! # jet-gnn
//!
//! Graph neural networks with learned adjacency for jet classification.
//!
//! ## Overview
//!
//! A jet is a variable-size set of constituents. Each constituent becomes a
//! node; the graph structure is not given but computed at every layer from the
//! current node embeddings by an *adjacency kernel*. Graph convolutions then
//! spread node features through operators built from that adjacency.
//!
//! Core capabilities:
//!
//! - **Primitives**: Pairwise distances, padded-batch means, NaN checks, activations
//! - **Kernels**: Identity, Gaussian (softmax / periodic), directed Gaussian, MPNN, MLP
//! - **Convolutions**: `GraphOpConv`, residual `ResGOpConv`, GraphNorm variant, `Simple`
//! - **Model**: Layer stack threading embeddings and adjacencies into a readout
//! - **Stats**: Running loss / kernel / activation moments flushed to CSV
//! - **Training**: Optimizer wrappers and gradient health checks
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use jet_gnn::prelude::*;
//!
//! let device = best_device();
//! let config = ModelConfig::for_dataset(DataFormat::Nyu);
//! let gnn = Gnn::new(&config, &device)?;
//!
//! // (batch, feature_maps, nodes) with per-jet constituent counts
//! let emb = Tensor::randn(0.0f32, 1.0, (8, 6, 30), &device)?;
//! let mask = NodeMask::new(&nb_nodes, 30, &device)?;
//! let probs = gnn.forward(&emb, &mask, None)?;
//! ```
//!
//! ## Feature Flags
//!
//! - `metal`: Apple Metal GPU acceleration
//! - `cuda`: NVIDIA CUDA GPU acceleration

pub mod config;
pub mod conv;
pub mod kernels;
pub mod model;
pub mod primitives;
pub mod stats;
pub mod training;

pub use candle_core::{DType, Device, Tensor, Var};

/// Error types for graph network operations
#[derive(Debug, thiserror::Error)]
pub enum GnnError {
    #[error("Tensor operation failed: {0}")]
    Tensor(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Shape mismatch: {0}")]
    Shape(String),

    /// A NaN reached the output of a convolution. Training has diverged and
    /// must stop; this is never retried.
    #[error("Numerical divergence: {0}")]
    NumericalDivergence(String),

    #[error("Kernel error: {0}")]
    Kernel(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),
}

/// Result type alias for graph network operations
pub type Result<T> = std::result::Result<T, GnnError>;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{DType, Device, Tensor, Var};
    pub use crate::{GnnError, Result};

    // Primitives
    pub use crate::primitives::{
        best_device, cpu_device, gpu_disabled,
        check_for_nan, has_nan, mean_with_padding, sqdist, NodeMask,
        sigmoid, softmax, relu, binary_cross_entropy, mse_loss,
    };

    // Kernels
    pub use crate::kernels::{build_kernel, AdjacencyKernel, Kernel, KernelMode};

    // Convolutions
    pub use crate::conv::{
        build_convolution, join_operators, Convolution, GraphNorm, GraphOpConv, GraphOperator,
        ResGOpConv, ResGOpConvNorm, Simple,
    };

    // Model
    pub use crate::model::{build_layers, GraphLayer, Gnn, MeanPoolReadout, PlotHook, Readout};

    // Configuration
    pub use crate::config::{
        ConvType, DataFormat, KernelConfig, ModelConfig, OptimizerConfig, Periodicity, RunMode,
        StatsConfig,
    };

    // Statistics and training
    pub use crate::stats::{Mode, Statistics};
    pub use crate::training::{grad_norm, gradients_healthy, Optimizer};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_prelude_imports() {
        use crate::prelude::*;

        let device = cpu_device();
        assert!(matches!(device, Device::Cpu));
        let err = GnnError::Config("odd width".into());
        assert_eq!(err.to_string(), "Invalid configuration: odd width");
    }
}
