//! Adjacency kernels
//!
//! A kernel turns the current node embeddings `(batch, fm, nodes)` into a
//! dense `(batch, nodes, nodes)` affinity matrix. Every graph layer asks its
//! kernel for a fresh adjacency before convolving.
//!
//! | Kernel | Parameters | Edge weight |
//! |---|---|---|
//! | [`Identity`] | none | `δ_ij` |
//! | [`Gaussian`] | `sigma` | `exp(-‖x_i - x_j‖² σ²)` |
//! | [`DirectedGaussian`] | `theta`, `sigma` | `θ·gauss + (1-θ)·w_i` |
//! | [`MpnnDirected`] | `v`, `b` | `sigmoid(v·(c_i + c_j) + b)` |
//! | [`MlpDirected`] | two linear layers | `sigmoid(MLP([h_j, h_k, w_k]))` |
//!
//! [`Kernel`] wraps any of them with a [`KernelMode`]. In
//! `CachingLastResult` mode one kernel is shared across layers: the first
//! layer computes and later layers reuse that adjacency. The cache keeps the
//! last result for [`Kernel::update`] and [`Kernel::last_adjacency`].

mod directed;
mod gaussian;

pub use directed::{MlpDirected, MpnnDirected};
pub use gaussian::{DirectedGaussian, Gaussian};

use crate::config::KernelConfig;
use crate::primitives::batch_eye;
use crate::{GnnError, Result};
use candle_core::{Device, Tensor, Var};
use parking_lot::Mutex;
use tracing::debug;

/// Capability shared by every adjacency kernel.
pub trait AdjacencyKernel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Compute `(batch, nodes, nodes)` from `emb` and the previous layer's
    /// adjacency.
    fn compute(&self, emb: &Tensor, prev_adj: &Tensor) -> Result<Tensor>;

    fn trainable_vars(&self) -> Vec<Var>;

    /// Learned Gaussian width, if the kernel has one.
    fn width(&self) -> Option<f32> {
        None
    }
}

/// Whether a kernel remembers its last adjacency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelMode {
    /// One kernel per layer; `update` recomputes.
    Stateless,
    /// Shared kernel; `forward` stores its result and `update` returns it.
    CachingLastResult,
}

/// An adjacency kernel together with its caching behaviour.
pub struct Kernel {
    inner: Box<dyn AdjacencyKernel>,
    mode: KernelMode,
    cache: Mutex<Option<Tensor>>,
}

impl Kernel {
    pub fn new(inner: Box<dyn AdjacencyKernel>, mode: KernelMode) -> Self {
        Self {
            inner,
            mode,
            cache: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name()
    }

    pub fn mode(&self) -> KernelMode {
        self.mode
    }

    /// Compute a fresh adjacency, caching it in `CachingLastResult` mode.
    pub fn forward(&self, emb: &Tensor, prev_adj: &Tensor) -> Result<Tensor> {
        let adj = self.inner.compute(emb, prev_adj)?;
        debug!(kernel = self.name(), shape = ?adj.dims(), "adjacency computed");

        if self.mode == KernelMode::CachingLastResult {
            *self.cache.lock() = Some(adj.clone());
        }
        Ok(adj)
    }

    /// Adjacency for a layer that does not refresh the kernel.
    ///
    /// Stateless kernels recompute; caching kernels return the last result
    /// and fail if nothing has been computed yet.
    pub fn update(&self, emb: &Tensor, prev_adj: &Tensor) -> Result<Tensor> {
        match self.mode {
            KernelMode::Stateless => self.forward(emb, prev_adj),
            KernelMode::CachingLastResult => self.cache.lock().clone().ok_or_else(|| {
                GnnError::Kernel(format!(
                    "{} update called before any forward pass",
                    self.name()
                ))
            }),
        }
    }

    /// Last adjacency computed in `CachingLastResult` mode.
    pub fn last_adjacency(&self) -> Option<Tensor> {
        self.cache.lock().clone()
    }

    pub fn trainable_vars(&self) -> Vec<Var> {
        self.inner.trainable_vars()
    }

    pub fn width(&self) -> Option<f32> {
        self.inner.width()
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("name", &self.name())
            .field("mode", &self.mode)
            .finish()
    }
}

/// Per-graph identity adjacency.
#[derive(Debug, Default, Clone, Copy)]
pub struct Identity;

impl AdjacencyKernel for Identity {
    fn name(&self) -> &'static str {
        "Identity"
    }

    fn compute(&self, emb: &Tensor, _prev_adj: &Tensor) -> Result<Tensor> {
        let (b, _, n) = emb.dims3()?;
        batch_eye(b, n, emb.device())
    }

    fn trainable_vars(&self) -> Vec<Var> {
        Vec::new()
    }
}

/// Build the kernel described by `config` for embeddings with `fmaps`
/// feature maps.
pub fn build_kernel(
    config: &KernelConfig,
    fmaps: usize,
    mode: KernelMode,
    device: &Device,
) -> Result<Kernel> {
    config.validate()?;

    let inner: Box<dyn AdjacencyKernel> = match config {
        KernelConfig::Identity => Box::new(Identity),
        KernelConfig::Gaussian {
            diag,
            softmax,
            periodic,
            sigma,
        } => Box::new(
            Gaussian::new(*sigma, device)?
                .with_diag(*diag)
                .with_softmax(*softmax)
                .with_periodic(*periodic),
        ),
        KernelConfig::DirectedGaussian {
            theta,
            sigma,
            sparse,
        } => Box::new(DirectedGaussian::new(*theta, *sigma, *sparse, device)?),
        KernelConfig::MpnnDirected => Box::new(MpnnDirected::new(fmaps, device)?),
        KernelConfig::MlpDirected { hidden } => {
            Box::new(MlpDirected::new(fmaps, *hidden, device)?)
        }
    };

    debug!(kernel = inner.name(), fmaps, ?mode, "kernel built");
    Ok(Kernel::new(inner, mode))
}
