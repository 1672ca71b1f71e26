//! Tensor primitives
//!
//! Leaf operations consumed by kernels, convolutions and the readout.
//!
//! ## Submodules
//!
//! - [`tensor_ops`]: Device selection, NaN detection, losses
//! - [`activations`]: Activation functions (sigmoid, softmax, relu, tanh)
//! - [`padding`]: Padded batches of variable-size graphs ([`NodeMask`])
//! - [`graph`]: Pairwise distances, cartesian samples, adjacency normalization
//!
//! All tensors are F32. Embeddings use the `(batch, feature_maps, nodes)`
//! layout and adjacencies `(batch, nodes, nodes)`.

mod activations;
mod graph;
mod padding;
mod tensor_ops;

pub use activations::*;
pub use graph::*;
pub use padding::*;
pub use tensor_ops::*;
