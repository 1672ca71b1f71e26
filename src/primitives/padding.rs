//! Padded batches of variable-size graphs
//!
//! Jets have different constituent counts, so a batch is padded to the
//! largest graph. Graph `i` owns the first `nb_nodes[i]` nodes; the rest are
//! padding and must never enter a mean or a variance.

use crate::{GnnError, Result};
use candle_core::{DType, Device, Tensor};

/// Valid-node bookkeeping for a padded batch.
#[derive(Debug, Clone)]
pub struct NodeMask {
    nb_nodes: Vec<usize>,
    max_nodes: usize,
    /// `(batch, nodes)` with 1.0 on valid nodes
    mask: Tensor,
    /// `(batch, 1)` valid-node counts as F32
    counts: Tensor,
}

impl NodeMask {
    /// Build a mask from per-graph node counts.
    ///
    /// Every count must be in `1..=max_nodes`.
    pub fn new(nb_nodes: &[usize], max_nodes: usize, device: &Device) -> Result<Self> {
        if nb_nodes.is_empty() {
            return Err(GnnError::Shape("node mask needs at least one graph".into()));
        }
        if let Some(i) = nb_nodes.iter().position(|&n| n == 0 || n > max_nodes) {
            return Err(GnnError::Shape(format!(
                "graph {} has {} valid nodes, expected 1..={}",
                i, nb_nodes[i], max_nodes
            )));
        }

        let batch = nb_nodes.len();
        let data: Vec<f32> = nb_nodes
            .iter()
            .flat_map(|&n| (0..max_nodes).map(move |j| if j < n { 1.0 } else { 0.0 }))
            .collect();
        let mask = Tensor::from_vec(data, (batch, max_nodes), device)?;

        let count_data: Vec<f32> = nb_nodes.iter().map(|&n| n as f32).collect();
        let counts = Tensor::from_vec(count_data, (batch, 1), device)?;

        Ok(Self {
            nb_nodes: nb_nodes.to_vec(),
            max_nodes,
            mask,
            counts,
        })
    }

    /// Mask for an unpadded batch where every graph has `nodes` nodes.
    pub fn full(batch: usize, nodes: usize, device: &Device) -> Result<Self> {
        Self::new(&vec![nodes; batch], nodes, device)
    }

    pub fn batch_size(&self) -> usize {
        self.nb_nodes.len()
    }

    pub fn max_nodes(&self) -> usize {
        self.max_nodes
    }

    /// Valid-node count per graph (`batch_nb_nodes`).
    pub fn nb_nodes(&self) -> &[usize] {
        &self.nb_nodes
    }

    /// `(batch, nodes)` 0/1 mask.
    pub fn mask(&self) -> &Tensor {
        &self.mask
    }

    /// `(batch, 1)` valid-node counts.
    pub fn counts(&self) -> &Tensor {
        &self.counts
    }

    /// Check that `emb` is `(batch, _, nodes)` for this mask.
    pub fn check_embedding(&self, emb: &Tensor) -> Result<()> {
        let (b, _, n) = emb
            .dims3()
            .map_err(|e| GnnError::Shape(format!("embedding must be 3D: {}", e)))?;
        if b != self.batch_size() || n != self.max_nodes {
            return Err(GnnError::Shape(format!(
                "embedding is (batch {}, nodes {}) but mask is (batch {}, nodes {})",
                b,
                n,
                self.batch_size(),
                self.max_nodes
            )));
        }
        Ok(())
    }
}

/// Per-graph mean of `emb` over valid nodes only.
///
/// `emb` is `(batch, feature_maps, nodes)`; the result is
/// `(batch, feature_maps)`.
pub fn mean_with_padding(emb: &Tensor, mask: &NodeMask) -> Result<Tensor> {
    mask.check_embedding(emb)?;

    let node_mask = mask.mask().unsqueeze(1)?;
    let summed = emb
        .broadcast_mul(&node_mask)
        .and_then(|t| t.sum(2))
        .map_err(|e| GnnError::Tensor(format!("mean_with_padding sum failed: {}", e)))?;

    summed
        .broadcast_div(mask.counts())
        .map_err(|e| GnnError::Tensor(format!("mean_with_padding div failed: {}", e)))
}

/// All-ones `(batch, nodes, nodes)` adjacency used before the first layer.
pub fn dense_adjacency(batch: usize, nodes: usize, device: &Device) -> Result<Tensor> {
    Ok(Tensor::ones((batch, nodes, nodes), DType::F32, device)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> Device {
        Device::Cpu
    }

    #[test]
    fn test_mask_layout() {
        let mask = NodeMask::new(&[2, 4, 1], 4, &device()).unwrap();
        let rows = mask.mask().to_vec2::<f32>().unwrap();
        assert_eq!(rows[0], vec![1.0, 1.0, 0.0, 0.0]);
        assert_eq!(rows[1], vec![1.0, 1.0, 1.0, 1.0]);
        assert_eq!(rows[2], vec![1.0, 0.0, 0.0, 0.0]);
        assert_eq!(mask.nb_nodes(), &[2, 4, 1]);
    }

    #[test]
    fn test_rejects_bad_counts() {
        assert!(NodeMask::new(&[0, 2], 3, &device()).is_err());
        assert!(NodeMask::new(&[4], 3, &device()).is_err());
        assert!(NodeMask::new(&[], 3, &device()).is_err());
    }

    #[test]
    fn test_mean_with_padding_matches_manual_mean() {
        let (batch, fm, nodes) = (3, 2, 5);
        let nb_nodes = [5, 2, 3];
        let emb = Tensor::randn(0.0f32, 1.0, (batch, fm, nodes), &device()).unwrap();
        let mask = NodeMask::new(&nb_nodes, nodes, &device()).unwrap();

        let got = mean_with_padding(&emb, &mask).unwrap().to_vec2::<f32>().unwrap();
        let raw = emb.to_vec3::<f32>().unwrap();

        for (i, &n) in nb_nodes.iter().enumerate() {
            for f in 0..fm {
                let expected: f32 = raw[i][f][..n].iter().sum::<f32>() / n as f32;
                assert!(
                    (got[i][f] - expected).abs() < 1e-5,
                    "graph {} feature {}: {} vs {}",
                    i,
                    f,
                    got[i][f],
                    expected
                );
            }
        }
    }

    #[test]
    fn test_padding_values_are_ignored() {
        // Padding filled with huge values must not move the mean.
        let emb = Tensor::from_vec(vec![1.0f32, 3.0, 1e6, 1e6], (1, 1, 4), &device()).unwrap();
        let mask = NodeMask::new(&[2], 4, &device()).unwrap();
        let mean = mean_with_padding(&emb, &mask).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(mean[0][0], 2.0);
    }

    #[test]
    fn test_shape_mismatch() {
        let emb = Tensor::zeros((2, 3, 4), DType::F32, &device()).unwrap();
        let mask = NodeMask::full(2, 5, &device()).unwrap();
        assert!(matches!(
            mean_with_padding(&emb, &mask),
            Err(GnnError::Shape(_))
        ));
    }
}
