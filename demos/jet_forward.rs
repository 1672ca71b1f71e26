//! Forward, loss and checked optimizer steps on random jets
//!
//! Demonstrates: config → Gnn → forward with padding → BCE → step_checked → Statistics
//!
//! Run with:
//! ```bash
//! cargo run --example jet_forward
//! ```

use jet_gnn::prelude::*;
use jet_gnn::training::StepOutcome;

fn main() -> Result<()> {
    let device = best_device();

    // 1. Model for the NYU format with a shared Gaussian kernel
    let config = ModelConfig {
        layer_fm: vec![16, 16],
        ..ModelConfig::for_dataset(DataFormat::Nyu)
    };
    let gnn = Gnn::new(&config, &device)?;
    println!("{}", gnn.description());

    // 2. Optimizer and statistics
    let mut optimizer = Optimizer::from_config(gnn.trainable_vars(), &OptimizerConfig::default())?;
    let dir = tempfile::tempdir()?;
    let stats_config = StatsConfig {
        stat_dir: dir.path().join("stats"),
        net_dir: dir.path().join("net"),
        nb_display: 5,
        nb_step: 5,
    };
    let mut stats = Statistics::new(stats_config, gnn.description())?.with_device(&device);

    // 3. Training loop on random padded batches
    let (batch, max_nodes) = (8, 20);
    for step in 0..20 {
        let nb_nodes: Vec<usize> = (0..batch).map(|i| 5 + (i * 3 + step) % (max_nodes - 4)).collect();
        let mask = NodeMask::new(&nb_nodes, max_nodes, &device)?;
        let emb = Tensor::randn(0.0f32, 1.0, (batch, config.input_fm, max_nodes), &device)?;
        let labels: Vec<f32> = (0..batch).map(|i| (i % 2) as f32).collect();
        let target = Tensor::from_vec(labels.clone(), batch, &device)?;

        let probs = gnn.forward(&emb, &mask, None)?;
        let loss = binary_cross_entropy(&probs, &target)?;
        let mut grads = loss.backward()?;

        match optimizer.step_checked(&mut grads)? {
            StepOutcome::Skipped => println!("step {:>2}: skipped (non-finite gradients)", step),
            StepOutcome::Clipped(norm) => println!("step {:>2}: clipped from {:.3}", step, norm),
            StepOutcome::Applied => {}
        }

        let loss_value = loss.to_scalar::<f32>()? as f64;
        stats.update(
            Mode::Train,
            &probs.to_vec1::<f32>()?,
            &labels,
            loss_value,
            gnn.kernel_width() as f64,
        )?;
    }

    if let Some((idx, kind)) = gnn.check_weights_health() {
        println!("parameter {} is {}", idx, kind);
    }

    // 4. Plot hook: print the first graph's adjacency size per layer
    let mask = NodeMask::full(1, 6, &device)?;
    let emb = Tensor::randn(0.0f32, 1.0, (1, config.input_fm, 6), &device)?;
    let mut hook = |rows: &[Vec<f32>], adj: &[Vec<f32>], layer: usize| -> Result<()> {
        println!("layer {}: {} nodes x {} fm, adjacency {}x{}", layer, rows.len(), rows[0].len(), adj.len(), adj[0].len());
        Ok(())
    };
    gnn.forward(&emb, &mask, Some(&mut hook))?;

    println!("\n{}", stats.describe(Mode::Train));
    Ok(())
}
