//! Graph layers

use crate::config::ModelConfig;
use crate::conv::{build_convolution, join_operators, Convolution, GraphOperator};
use crate::kernels::{build_kernel, Kernel, KernelMode};
use crate::primitives::NodeMask;
use crate::Result;
use candle_core::{Device, Tensor, Var};
use std::sync::Arc;
use tracing::debug;

/// One step of the stack: adjacency kernel, operators, convolution.
pub struct GraphLayer {
    index: usize,
    kernel: Arc<Kernel>,
    /// Whether this layer recomputes the kernel (`forward`) or reuses it
    /// (`update`)
    refresh: bool,
    operators: Vec<GraphOperator>,
    conv: Convolution,
}

impl GraphLayer {
    pub fn new(
        index: usize,
        kernel: Arc<Kernel>,
        refresh: bool,
        operators: Vec<GraphOperator>,
        conv: Convolution,
    ) -> Self {
        Self {
            index,
            kernel,
            refresh,
            operators,
            conv,
        }
    }

    /// Returns the new embedding and the adjacency it was computed with.
    ///
    /// A layer sharing a caching kernel it does not refresh reuses `adj`,
    /// the adjacency threaded through the current pass. The kernel cache is
    /// shared by every caller of the model and only serves inspection.
    pub fn forward(&self, emb: &Tensor, adj: &Tensor, mask: &NodeMask) -> Result<(Tensor, Tensor)> {
        let adj = match (self.refresh, self.kernel.mode()) {
            (true, _) => self.kernel.forward(emb, adj)?,
            (false, KernelMode::CachingLastResult) => adj.clone(),
            (false, KernelMode::Stateless) => self.kernel.update(emb, adj)?,
        };

        let ops = join_operators(&adj, &self.operators)?;
        let out = self.conv.forward(ops.as_ref(), emb, mask)?;
        debug!(layer = self.index, shape = ?out.dims(), "graph layer");

        Ok((out, adj))
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn convolution(&self) -> &Convolution {
        &self.conv
    }

    /// A shared kernel is owned by the layer that refreshes it.
    pub fn owns_kernel(&self) -> bool {
        self.refresh
    }

    pub fn trainable_vars(&self) -> Vec<Var> {
        let mut vars = if self.owns_kernel() {
            self.kernel.trainable_vars()
        } else {
            Vec::new()
        };
        vars.extend(self.conv.trainable_vars());
        vars
    }
}

/// Build one [`GraphLayer`] per entry of `config.layer_fm`.
///
/// Layerwise configs give every layer a stateless kernel sized for its own
/// input. Otherwise one caching kernel is shared: layer 0 refreshes it and
/// the others reuse its adjacency.
pub fn build_layers(config: &ModelConfig, device: &Device) -> Result<Vec<GraphLayer>> {
    config.validate()?;

    let shared = if config.layerwise {
        None
    } else {
        Some(Arc::new(build_kernel(
            &config.kernel,
            config.input_fm,
            KernelMode::CachingLastResult,
            device,
        )?))
    };

    let nb_op = config.operators.len();
    config
        .layer_inputs()
        .into_iter()
        .zip(config.layer_fm.iter().copied())
        .enumerate()
        .map(|(i, (in_fm, out_fm))| -> Result<GraphLayer> {
            let (kernel, refresh) = match &shared {
                Some(kernel) => (Arc::clone(kernel), i == 0),
                None => (
                    Arc::new(build_kernel(&config.kernel, in_fm, KernelMode::Stateless, device)?),
                    true,
                ),
            };
            let conv = build_convolution(config.conv_type, in_fm, out_fm, nb_op, device)?;
            Ok(GraphLayer::new(i, kernel, refresh, config.operators.clone(), conv))
        })
        .collect()
}
