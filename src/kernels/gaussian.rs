//! Gaussian-family kernels

use super::AdjacencyKernel;
use crate::config::Periodicity;
use crate::primitives::{softmax, sqdist, sqdist_periodic, summed_weights};
use crate::{GnnError, Result};
use candle_core::{DType, Device, Tensor, Var};
use tracing::warn;

fn scalar_var(init: Option<f64>, device: &Device) -> Result<Var> {
    let init = match init {
        Some(value) => Tensor::new(&[value as f32], device)?,
        // Uniform on [0.99, 1.01]
        None => Tensor::rand(0.99f32, 1.01, 1, device)?,
    };
    Ok(Var::from_tensor(&init)?)
}

fn read_scalar(var: &Var) -> Option<f32> {
    var.as_tensor().to_vec1::<f32>().ok()?.first().copied()
}

/// `exp(-sqdist · σ²)` with a learned width σ.
///
/// Options: drop self edges (`diag = false`), measure one feature on a
/// circle (`periodic`), and row-normalize with a softmax per graph
/// (`softmax`, the GaussianSoftmax kernel).
pub struct Gaussian {
    sigma: Var,
    diag: bool,
    softmax: bool,
    periodic: Option<Periodicity>,
}

impl Gaussian {
    pub fn new(sigma: Option<f64>, device: &Device) -> Result<Self> {
        Ok(Self {
            sigma: scalar_var(sigma, device)?,
            diag: true,
            softmax: false,
            periodic: None,
        })
    }

    pub fn with_diag(mut self, diag: bool) -> Self {
        self.diag = diag;
        self
    }

    pub fn with_softmax(mut self, softmax: bool) -> Self {
        self.softmax = softmax;
        self
    }

    pub fn with_periodic(mut self, periodic: Option<Periodicity>) -> Self {
        self.periodic = periodic;
        self
    }

    pub fn sigma(&self) -> &Var {
        &self.sigma
    }

    fn squared_distances(&self, emb: &Tensor) -> Result<Tensor> {
        match self.periodic {
            Some(p) => sqdist_periodic(emb, p.feature, p.period),
            None => sqdist(emb),
        }
    }
}

impl AdjacencyKernel for Gaussian {
    fn name(&self) -> &'static str {
        if self.softmax {
            "GaussianSoftmax"
        } else {
            "Gaussian"
        }
    }

    fn compute(&self, emb: &Tensor, _prev_adj: &Tensor) -> Result<Tensor> {
        let (b, _, n) = emb.dims3()?;
        let d2 = self.squared_distances(emb)?;

        let var = self.sigma.as_tensor().sqr()?;
        let mut adj = d2
            .broadcast_mul(&var)
            .and_then(|t| t.neg())
            .and_then(|t| t.exp())
            .map_err(|e| GnnError::Tensor(format!("gaussian exp failed: {}", e)))?;

        if !self.diag {
            let off_diag = Tensor::eye(n, DType::F32, emb.device())?.affine(-1.0, 1.0)?;
            adj = adj.broadcast_mul(&off_diag)?;
        }

        if self.softmax {
            // Softmax over the rows of every graph at once
            let rows = adj.reshape((b * n, n))?;
            adj = softmax(&rows, 1)?.reshape((b, n, n))?;
        }

        Ok(adj)
    }

    fn trainable_vars(&self) -> Vec<Var> {
        vec![self.sigma.clone()]
    }

    fn width(&self) -> Option<f32> {
        read_scalar(&self.sigma)
    }
}

/// Gaussian adjacency mixed with the previous layer's incoming weights:
/// `θ · gauss + (1 - θ) · w`, where `w[b, i, j]` is the summed weight of
/// node `i` in `prev_adj[b]`.
pub struct DirectedGaussian {
    theta: Var,
    gauss: Gaussian,
}

impl DirectedGaussian {
    pub fn new(theta: f64, sigma: Option<f64>, sparse: bool, device: &Device) -> Result<Self> {
        if sparse {
            warn!("DirectedGaussian has no sparse implementation, using dense adjacency");
        }
        Ok(Self {
            theta: scalar_var(Some(theta), device)?,
            gauss: Gaussian::new(sigma, device)?,
        })
    }

    pub fn theta(&self) -> &Var {
        &self.theta
    }
}

impl AdjacencyKernel for DirectedGaussian {
    fn name(&self) -> &'static str {
        "DirectedGaussian"
    }

    fn compute(&self, emb: &Tensor, prev_adj: &Tensor) -> Result<Tensor> {
        let (b, _, n) = emb.dims3()?;
        if prev_adj.dims() != [b, n, n] {
            return Err(GnnError::Shape(format!(
                "previous adjacency is {:?}, expected [{}, {}, {}]",
                prev_adj.dims(),
                b,
                n,
                n
            )));
        }

        // Row i is uniform at node i's summed weight
        let weights = summed_weights(prev_adj)?
            .unsqueeze(2)?
            .broadcast_as((b, n, n))?;
        let gauss = self.gauss.compute(emb, prev_adj)?;

        let theta = self.theta.as_tensor();
        let one_minus_theta = theta.affine(-1.0, 1.0)?;
        let mixed = (gauss.broadcast_mul(theta)? + weights.broadcast_mul(&one_minus_theta)?)
            .map_err(|e| GnnError::Tensor(format!("directed gaussian mix failed: {}", e)))?;
        Ok(mixed)
    }

    fn trainable_vars(&self) -> Vec<Var> {
        vec![self.theta.clone(), self.gauss.sigma.clone()]
    }

    fn width(&self) -> Option<f32> {
        self.gauss.width()
    }
}
