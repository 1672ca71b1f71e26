//! Layer stack
//!
//! [`Gnn`] threads node embeddings and adjacencies through its
//! [`GraphLayer`]s strictly in order and hands the final embedding to a
//! [`Readout`].
//!
//! ```text
//! emb ──► kernel ──► adj ──► join_operators ──► conv ──► emb' ──► … ──► readout
//!            ▲                                                │
//!            └────────────────── prev adj ◄───────────────────┘
//! ```

mod layer;
mod readout;

pub use layer::{build_layers, GraphLayer};
pub use readout::{MeanPoolReadout, Readout};

use crate::config::ModelConfig;
use crate::primitives::{dense_adjacency, NodeMask};
use crate::{GnnError, Result};
use candle_core::{Device, Tensor, Var};
use tracing::info;

/// Receives graph 0 of every layer's output during a forward pass.
///
/// `embedding` is node-major (`nodes` rows of `fm` values), `adjacency` is
/// `nodes × nodes`.
pub trait PlotHook {
    fn plot_graph(&mut self, embedding: &[Vec<f32>], adjacency: &[Vec<f32>], layer: usize)
        -> Result<()>;
}

impl<F> PlotHook for F
where
    F: FnMut(&[Vec<f32>], &[Vec<f32>], usize) -> Result<()>,
{
    fn plot_graph(
        &mut self,
        embedding: &[Vec<f32>],
        adjacency: &[Vec<f32>],
        layer: usize,
    ) -> Result<()> {
        self(embedding, adjacency, layer)
    }
}

/// Graph neural network with learned adjacency.
pub struct Gnn {
    config: ModelConfig,
    layers: Vec<GraphLayer>,
    readout: Box<dyn Readout>,
}

impl Gnn {
    pub fn new(config: &ModelConfig, device: &Device) -> Result<Self> {
        let layers = build_layers(config, device)?;
        let last_fm = config
            .layer_fm
            .last()
            .copied()
            .ok_or_else(|| GnnError::Config("model needs at least one layer".into()))?;
        let readout = Box::new(MeanPoolReadout::new(last_fm, device)?);

        let gnn = Self {
            config: config.clone(),
            layers,
            readout,
        };
        info!(
            "Built {} ({} layers, {} kernel, {} conv, {} parameters)",
            config.name,
            gnn.layers.len(),
            config.kernel.name(),
            config.conv_type,
            gnn.param_count()
        );
        Ok(gnn)
    }

    /// Replace the default mean-pool readout.
    pub fn with_readout(mut self, readout: Box<dyn Readout>) -> Self {
        self.readout = readout;
        self
    }

    pub fn layers(&self) -> &[GraphLayer] {
        &self.layers
    }

    /// Run every layer, then the readout: `(batch, fm, nodes)` → `(batch,)`.
    pub fn forward(
        &self,
        emb: &Tensor,
        mask: &NodeMask,
        mut plotting: Option<&mut dyn PlotHook>,
    ) -> Result<Tensor> {
        mask.check_embedding(emb)?;
        let (b, fm, n) = emb.dims3()?;
        if fm != self.config.input_fm {
            return Err(GnnError::Shape(format!(
                "model expects {} input feature maps, got {}",
                self.config.input_fm, fm
            )));
        }

        let mut adj = dense_adjacency(b, n, emb.device())?;
        let mut emb = emb.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            let (next_emb, next_adj) = layer.forward(&emb, &adj, mask)?;
            emb = next_emb;
            adj = next_adj;

            if let Some(hook) = plotting.as_deref_mut() {
                let rows = emb.get(0)?.t()?.to_vec2::<f32>()?;
                let adj_rows = adj.get(0)?.to_vec2::<f32>()?;
                hook.plot_graph(&rows, &adj_rows, i)?;
            }
        }

        self.readout.forward(&emb, mask)
    }

    pub fn trainable_vars(&self) -> Vec<Var> {
        let mut vars: Vec<Var> = self
            .layers
            .iter()
            .flat_map(|layer| layer.trainable_vars())
            .collect();
        vars.extend(self.readout.trainable_vars());
        vars
    }

    pub fn param_count(&self) -> usize {
        self.trainable_vars()
            .iter()
            .map(|v| v.as_tensor().elem_count())
            .sum()
    }

    /// Index and kind of the first non-finite parameter, if any.
    pub fn check_weights_health(&self) -> Option<(usize, &'static str)> {
        for (i, var) in self.trainable_vars().iter().enumerate() {
            if let Ok(vals) = var.as_tensor().flatten_all().and_then(|t| t.to_vec1::<f32>()) {
                for v in vals {
                    if v.is_nan() {
                        return Some((i, "NaN"));
                    }
                    if v.is_infinite() {
                        return Some((i, "Infinite"));
                    }
                }
            }
        }
        None
    }

    /// Width of the first layer's kernel, 0 for kernels without one.
    pub fn kernel_width(&self) -> f32 {
        self.layers
            .first()
            .and_then(|layer| layer.kernel().width())
            .unwrap_or(0.0)
    }

    /// Adjacency cached by the first layer's kernel in shared mode.
    pub fn last_adjacency(&self) -> Option<Tensor> {
        self.layers.first().and_then(|layer| layer.kernel().last_adjacency())
    }

    /// Human-readable summary: name, configuration and parameter count.
    pub fn description(&self) -> String {
        let rule = "-".repeat(20);
        let config = self
            .config
            .to_json()
            .unwrap_or_else(|e| format!("<unserializable config: {}>", e));
        format!(
            "{} :\n{}\n{}\n{}\nTotal of {} parameters\n\n",
            self.config.name,
            rule,
            config,
            rule,
            self.param_count()
        )
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }
}
