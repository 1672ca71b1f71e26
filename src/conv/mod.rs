//! Graph convolutions
//!
//! A convolution maps `(batch, in_fm, nodes)` to `(batch, out_fm, nodes)`
//! using operators derived from the layer's adjacency. Operators are stacked
//! along the last axis by [`join_operators`] into `(batch, nodes, nodes * k)`
//! and applied by right product `x · op`.
//!
//! ## Variants
//!
//! - [`GraphOpConv`]: affine map of `[x, mean(x), x·op_1, …, x·op_k]`
//! - [`ResGOpConv`]: `[gc(x) || relu(gc'(x))]`
//! - [`ResGOpConvNorm`]: residual with a [`GraphNorm`] after each branch
//! - [`Simple`]: per-node linear + ReLU, aggregated by one operator, then tanh

mod graph_op;
mod norm;
mod simple;

pub use graph_op::{GraphOpConv, ResGOpConv, ResGOpConvNorm};
pub use norm::GraphNorm;
pub use simple::Simple;

use crate::config::ConvType;
use crate::primitives::{batch_eye, row_normalize, symmetric_normalize, NodeMask};
use crate::{GnnError, Result};
use candle_core::{Device, Tensor, Var};
use serde::{Deserialize, Serialize};

// =============================================================================
// Operators
// =============================================================================

/// Function of the adjacency applied to embeddings by right product.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum GraphOperator {
    Identity,
    Adjacency,
    /// `D⁻¹ A`
    RowNormalized,
    /// `D⁻¹/² A D⁻¹/²`
    SymmetricNormalized,
}

impl GraphOperator {
    pub fn apply(&self, adj: &Tensor) -> Result<Tensor> {
        match self {
            Self::Identity => {
                let (b, n, _) = adj.dims3()?;
                batch_eye(b, n, adj.device())
            }
            Self::Adjacency => Ok(adj.clone()),
            Self::RowNormalized => row_normalize(adj),
            Self::SymmetricNormalized => symmetric_normalize(adj),
        }
    }
}

/// Apply every operator to `adj` and stack the results along the last axis.
///
/// `(batch, n, n)` → `(batch, n, n * operators.len())`, or `None` for an
/// empty operator list.
pub fn join_operators(adj: &Tensor, operators: &[GraphOperator]) -> Result<Option<Tensor>> {
    if operators.is_empty() {
        return Ok(None);
    }
    let ops = operators
        .iter()
        .map(|op| op.apply(adj))
        .collect::<Result<Vec<_>>>()?;
    let joined = Tensor::cat(&ops, 2)
        .map_err(|e| GnnError::Tensor(format!("join_operators cat failed: {}", e)))?;
    Ok(Some(joined))
}

/// Number of operator blocks in `ops`, after checking it matches `emb`.
pub(crate) fn operator_blocks(ops: &Tensor, emb: &Tensor) -> Result<usize> {
    let (b, _, n) = emb.dims3()?;
    let (ob, on, width) = ops.dims3()?;
    if ob != b || on != n || width % n != 0 {
        return Err(GnnError::Shape(format!(
            "operators {:?} do not fit embedding {:?}",
            ops.dims(),
            emb.dims()
        )));
    }
    Ok(width / n)
}

// =============================================================================
// Convolution variants
// =============================================================================

/// Convolution selected by [`ConvType`].
pub enum Convolution {
    GraphOp(GraphOpConv),
    Residual(ResGOpConv),
    ResidualNorm(ResGOpConvNorm),
    Simple(Simple),
}

impl Convolution {
    pub fn forward(&self, ops: Option<&Tensor>, emb: &Tensor, mask: &NodeMask) -> Result<Tensor> {
        match self {
            Self::GraphOp(conv) => conv.forward(ops, emb, mask),
            Self::Residual(conv) => conv.forward(ops, emb, mask),
            Self::ResidualNorm(conv) => conv.forward(ops, emb, mask),
            Self::Simple(conv) => conv.forward(ops, emb),
        }
    }

    pub fn trainable_vars(&self) -> Vec<Var> {
        match self {
            Self::GraphOp(conv) => conv.trainable_vars(),
            Self::Residual(conv) => conv.trainable_vars(),
            Self::ResidualNorm(conv) => conv.trainable_vars(),
            Self::Simple(conv) => conv.trainable_vars(),
        }
    }

    pub fn out_fm(&self) -> usize {
        match self {
            Self::GraphOp(conv) => conv.out_fm(),
            Self::Residual(conv) => conv.out_fm(),
            Self::ResidualNorm(conv) => conv.out_fm(),
            Self::Simple(conv) => conv.out_fm(),
        }
    }

    pub fn conv_type(&self) -> ConvType {
        match self {
            Self::GraphOp(_) => ConvType::GraphOp,
            Self::Residual(_) => ConvType::ResGnn,
            Self::ResidualNorm(_) => ConvType::ResGnnNorm,
            Self::Simple(_) => ConvType::Simple,
        }
    }
}

/// Build a convolution from `in_fm` to `out_fm` feature maps that consumes
/// `nb_op` operator blocks.
pub fn build_convolution(
    conv_type: ConvType,
    in_fm: usize,
    out_fm: usize,
    nb_op: usize,
    device: &Device,
) -> Result<Convolution> {
    Ok(match conv_type {
        ConvType::GraphOp => Convolution::GraphOp(GraphOpConv::new(in_fm, out_fm, nb_op, device)?),
        ConvType::ResGnn => Convolution::Residual(ResGOpConv::new(in_fm, out_fm, nb_op, device)?),
        ConvType::ResGnnNorm => {
            Convolution::ResidualNorm(ResGOpConvNorm::new(in_fm, out_fm, nb_op, device)?)
        }
        ConvType::Simple => Convolution::Simple(Simple::new(in_fm, out_fm, device)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;

    fn device() -> Device {
        Device::Cpu
    }

    #[test]
    fn test_join_operators_layout() {
        let adj = Tensor::rand(0.0f32, 1.0, (2, 3, 3), &device()).unwrap();
        let ops = join_operators(&adj, &[GraphOperator::Identity, GraphOperator::Adjacency])
            .unwrap()
            .unwrap();
        assert_eq!(ops.dims(), &[2, 3, 6]);

        let identity = ops.narrow(2, 0, 3).unwrap().to_vec3::<f32>().unwrap();
        assert_eq!(identity[1][2], vec![0.0, 0.0, 1.0]);

        let second = ops.narrow(2, 3, 3).unwrap().to_vec3::<f32>().unwrap();
        assert_eq!(second, adj.to_vec3::<f32>().unwrap());
    }

    #[test]
    fn test_join_operators_empty() {
        let adj = Tensor::ones((1, 2, 2), DType::F32, &device()).unwrap();
        assert!(join_operators(&adj, &[]).unwrap().is_none());
    }

    #[test]
    fn test_row_normalized_operator() {
        let adj = Tensor::ones((1, 4, 4), DType::F32, &device()).unwrap();
        let op = GraphOperator::RowNormalized.apply(&adj).unwrap();
        let rows = op.to_vec3::<f32>().unwrap();
        assert!(rows[0].iter().flatten().all(|&v| (v - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_operator_serde() {
        let json = serde_json::to_string(&GraphOperator::SymmetricNormalized).unwrap();
        let back: GraphOperator = serde_json::from_str(&json).unwrap();
        assert_eq!(back, GraphOperator::SymmetricNormalized);
    }

    #[test]
    fn test_build_convolution_variants() {
        let mask = NodeMask::full(2, 5, &device()).unwrap();
        let emb = Tensor::randn(0.0f32, 1.0, (2, 3, 5), &device()).unwrap();
        let adj = Tensor::rand(0.0f32, 1.0, (2, 5, 5), &device()).unwrap();
        let operators = [GraphOperator::Identity, GraphOperator::Adjacency];
        let ops = join_operators(&adj, &operators).unwrap();

        for conv_type in [
            ConvType::GraphOp,
            ConvType::ResGnn,
            ConvType::ResGnnNorm,
            ConvType::Simple,
        ] {
            let conv = build_convolution(conv_type, 3, 8, operators.len(), &device()).unwrap();
            assert_eq!(conv.conv_type(), conv_type);
            let out = conv.forward(ops.as_ref(), &emb, &mask).unwrap();
            assert_eq!(out.dims(), &[2, 8, 5], "{}", conv_type);
            assert_eq!(conv.out_fm(), 8);
            assert!(!conv.trainable_vars().is_empty());
        }
    }

    #[test]
    fn test_odd_residual_width_is_config_error() {
        for conv_type in [ConvType::ResGnn, ConvType::ResGnnNorm] {
            assert!(matches!(
                build_convolution(conv_type, 4, 7, 1, &device()),
                Err(GnnError::Config(_))
            ));
        }
    }
}
