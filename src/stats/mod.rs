//! Training statistics
//!
//! Running loss, kernel width and per-label output moments, flushed every
//! `nb_display` batches. Train-mode summaries are appended to CSV files as
//! `value,` entries; test-mode summaries are only logged.
//!
//! ## Files
//!
//! | File | Directory | Content |
//! |---|---|---|
//! | `description.txt` | `net_dir` | model description, written once |
//! | `loss.csv`, `kernel.csv` | `stat_dir` | window means |
//! | `avg0.csv`, `avg1.csv` | `stat_dir` | mean output per label |
//! | `std0.csv`, `std1.csv` | `stat_dir` | output standard deviation per label |
//! | `loss_step.csv` | `stat_dir` | mean loss every `nb_step` train steps |

use crate::config::StatsConfig;
use crate::{GnnError, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Statistics written to one CSV file each, in summary order.
pub const STATS: [&str; 6] = ["loss", "kernel", "avg0", "avg1", "std0", "std1"];

const STEP_LOSS: &str = "loss_step";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Train,
    Test,
}

impl Mode {
    fn index(&self) -> usize {
        match self {
            Self::Train => 0,
            Self::Test => 1,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Train => write!(f, "train"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// Running sums of one summary window.
#[derive(Debug, Clone, Default, PartialEq)]
struct Buffer {
    batches: usize,
    loss: f64,
    kernel: f64,
    /// Sum of outputs on label-0 events, then their mean after a flush
    avg0: f64,
    avg1: f64,
    /// Sum of squared outputs on label-0 events, then the std after a flush
    std0: f64,
    std1: f64,
    nb_zero: f64,
    nb_ones: f64,
}

impl Buffer {
    fn stat(&self, name: &str) -> f64 {
        match name {
            "loss" => self.loss,
            "kernel" => self.kernel,
            "avg0" => self.avg0,
            "avg1" => self.avg1,
            "std0" => self.std0,
            _ => self.std1,
        }
    }

    /// Turn sums into window statistics.
    fn finalize(&mut self, nb_display: usize) {
        let window = nb_display as f64;
        self.loss /= window;
        self.kernel /= window;

        if self.nb_ones > 0.0 {
            self.avg1 /= self.nb_ones;
            let var = (self.std1 / self.nb_ones - self.avg1 * self.avg1).max(0.0);
            self.std1 = var.sqrt();
        }
        if self.nb_zero > 0.0 {
            self.avg0 /= self.nb_zero;
            let var = (self.std0 / self.nb_zero - self.avg0 * self.avg0).max(0.0);
            self.std0 = var.sqrt();
        }
    }
}

/// Loss, kernel and output statistics of one model.
pub struct Statistics {
    config: StatsConfig,
    description: String,
    buffers: [Buffer; 2],
    events_seen: [usize; 2],
    step_loss: f64,
    steps: usize,
    device: String,
}

impl Statistics {
    /// Create the statistics files (never truncating existing ones) and
    /// write `description.txt` unless it already exists.
    pub fn new(config: StatsConfig, description: impl Into<String>) -> Result<Self> {
        config.validate()?;
        let description = description.into();

        let stamped = format!("{}Created {}\n", description, Utc::now().to_rfc3339());
        create_file_if_absent(&config.net_dir, "description.txt", &stamped)?;
        create_file_if_absent(&config.stat_dir, &format!("{}.csv", STEP_LOSS), "")?;
        for stat in STATS {
            create_file_if_absent(&config.stat_dir, &format!("{}.csv", stat), "")?;
        }

        Ok(Self {
            config,
            description,
            buffers: Default::default(),
            events_seen: [0; 2],
            step_loss: 0.0,
            steps: 0,
            device: "CPU".to_string(),
        })
    }

    /// Record where the model runs, for [`Statistics::describe`].
    pub fn with_device(mut self, device: &candle_core::Device) -> Self {
        self.device = if device.is_cpu() { "CPU" } else { "GPU" }.to_string();
        self
    }

    /// Replace the description after a model or parameter change.
    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    /// Account for one batch.
    ///
    /// `output` and `labels` hold one value per event; labels are 0 or 1.
    pub fn update(
        &mut self,
        mode: Mode,
        output: &[f32],
        labels: &[f32],
        loss: f64,
        kernel_width: f64,
    ) -> Result<()> {
        if output.len() != labels.len() {
            return Err(GnnError::Shape(format!(
                "{} outputs for {} labels",
                output.len(),
                labels.len()
            )));
        }
        self.events_seen[mode.index()] += labels.len();

        if mode == Mode::Train {
            self.step_loss += loss;
            self.steps += 1;
            if self.steps >= self.config.nb_step {
                let mean = self.step_loss / self.config.nb_step as f64;
                self.write_stat(STEP_LOSS, mean)?;
                self.step_loss = 0.0;
                self.steps = 0;
            }
        }

        let buffer = &mut self.buffers[mode.index()];
        buffer.loss += loss;
        buffer.kernel += kernel_width;
        for (&out, &label) in output.iter().zip(labels) {
            let one = label as f64;
            let zero = 1.0 - one;
            let out = out as f64;

            buffer.nb_ones += one;
            buffer.avg1 += out * one;
            buffer.std1 += (out * one).powi(2);

            buffer.nb_zero += zero;
            buffer.avg0 += out * zero;
            buffer.std0 += (out * zero).powi(2);
        }

        buffer.batches += 1;
        if buffer.batches >= self.config.nb_display {
            self.flush_window(mode)?;
        }
        Ok(())
    }

    fn flush_window(&mut self, mode: Mode) -> Result<()> {
        let mut window = std::mem::take(&mut self.buffers[mode.index()]);
        window.finalize(self.config.nb_display);

        let events = self.events_seen[mode.index()];
        let shown: Vec<&str> = match mode {
            Mode::Train => STATS.to_vec(),
            Mode::Test => STATS.iter().copied().filter(|s| !s.contains("loss")).collect(),
        };
        let summary = shown
            .iter()
            .map(|stat| format!("{}: {:.2E}", stat, window.stat(stat)))
            .collect::<Vec<_>>()
            .join(" - ");
        info!("{:>10} events : {}", events, summary);

        if mode == Mode::Train {
            for stat in STATS {
                self.write_stat(stat, window.stat(stat))?;
            }
        }
        Ok(())
    }

    /// Reset the step loss, the test window and the test event counter.
    pub fn flush(&mut self) {
        self.step_loss = 0.0;
        self.buffers[Mode::Test.index()] = Buffer::default();
        self.events_seen[Mode::Test.index()] = 0;
    }

    /// Description plus the number of training events seen and the device.
    pub fn describe(&self, mode: Mode) -> String {
        format!(
            "{}Trained on {} examples.\n{}ing using {}.\n",
            self.description,
            self.events_seen[Mode::Train.index()],
            mode,
            self.device
        )
    }

    pub fn events_seen(&self, mode: Mode) -> usize {
        self.events_seen[mode.index()]
    }

    fn write_stat(&self, name: &str, value: f64) -> Result<()> {
        let path = self.config.stat_dir.join(format!("{}.csv", name));
        let mut file = OpenOptions::new().append(true).create(true).open(path)?;
        write!(file, "{},", value)?;
        Ok(())
    }
}

fn create_file_if_absent(dir: &Path, name: &str, text: &str) -> Result<()> {
    fs::create_dir_all(dir)?;
    let path = dir.join(name);
    if !path.exists() {
        fs::write(path, text)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &Path, nb_display: usize, nb_step: usize) -> StatsConfig {
        StatsConfig {
            stat_dir: dir.join("stats"),
            net_dir: dir.join("net"),
            nb_display,
            nb_step,
        }
    }

    fn read(dir: &Path, name: &str) -> String {
        fs::read_to_string(dir.join("stats").join(name)).unwrap()
    }

    fn values(text: &str) -> Vec<f64> {
        text.split(',')
            .filter(|s| !s.is_empty())
            .map(|s| s.parse().unwrap())
            .collect()
    }

    #[test]
    fn test_files_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let _stats = Statistics::new(config(dir.path(), 2, 2), "first\n").unwrap();

        for name in ["loss.csv", "kernel.csv", "avg0.csv", "avg1.csv", "std0.csv", "std1.csv", "loss_step.csv"] {
            assert!(dir.path().join("stats").join(name).exists(), "{}", name);
        }

        fs::write(dir.path().join("stats").join("loss.csv"), "0.5,").unwrap();
        let _again = Statistics::new(config(dir.path(), 2, 2), "second\n").unwrap();

        assert_eq!(read(dir.path(), "loss.csv"), "0.5,");
        let description = fs::read_to_string(dir.path().join("net").join("description.txt")).unwrap();
        assert!(description.starts_with("first\n"));
    }

    #[test]
    fn test_train_window_written() {
        let dir = tempfile::tempdir().unwrap();
        let mut stats = Statistics::new(config(dir.path(), 2, 100), "").unwrap();

        stats
            .update(Mode::Train, &[0.8, 0.2], &[1.0, 0.0], 1.0, 0.5)
            .unwrap();
        assert_eq!(read(dir.path(), "loss.csv"), "");

        stats
            .update(Mode::Train, &[0.6, 0.4], &[1.0, 0.0], 3.0, 1.5)
            .unwrap();

        assert_eq!(values(&read(dir.path(), "loss.csv")), vec![2.0]);
        assert_eq!(values(&read(dir.path(), "kernel.csv")), vec![1.0]);

        let avg1 = values(&read(dir.path(), "avg1.csv"))[0];
        let std1 = values(&read(dir.path(), "std1.csv"))[0];
        assert!((avg1 - 0.7).abs() < 1e-6);
        assert!((std1 - 0.1).abs() < 1e-6);

        let avg0 = values(&read(dir.path(), "avg0.csv"))[0];
        let std0 = values(&read(dir.path(), "std0.csv"))[0];
        assert!((avg0 - 0.3).abs() < 1e-6);
        assert!((std0 - 0.1).abs() < 1e-6);

        assert_eq!(stats.events_seen(Mode::Train), 4);
    }

    #[test]
    fn test_missing_label_keeps_raw_sums() {
        let dir = tempfile::tempdir().unwrap();
        let mut stats = Statistics::new(config(dir.path(), 1, 100), "").unwrap();

        stats.update(Mode::Train, &[0.9], &[1.0], 0.1, 1.0).unwrap();
        assert_eq!(values(&read(dir.path(), "avg0.csv")), vec![0.0]);
        assert_eq!(values(&read(dir.path(), "std0.csv")), vec![0.0]);
    }

    #[test]
    fn test_step_loss_mean() {
        let dir = tempfile::tempdir().unwrap();
        let mut stats = Statistics::new(config(dir.path(), 100, 2), "").unwrap();

        for loss in [1.0, 2.0, 3.0, 5.0] {
            stats.update(Mode::Train, &[0.5], &[1.0], loss, 1.0).unwrap();
        }
        assert_eq!(values(&read(dir.path(), "loss_step.csv")), vec![1.5, 4.0]);
    }

    #[test]
    fn test_test_mode_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut stats = Statistics::new(config(dir.path(), 1, 1), "").unwrap();

        stats.update(Mode::Test, &[0.5, 0.1], &[1.0, 0.0], 0.7, 1.0).unwrap();
        for name in ["loss.csv", "avg1.csv", "loss_step.csv"] {
            assert_eq!(read(dir.path(), name), "");
        }
        assert_eq!(stats.events_seen(Mode::Test), 2);

        stats.flush();
        assert_eq!(stats.events_seen(Mode::Test), 0);
    }

    #[test]
    fn test_describe() {
        let dir = tempfile::tempdir().unwrap();
        let mut stats = Statistics::new(config(dir.path(), 10, 10), "jet-gnn :\n").unwrap();
        stats.update(Mode::Train, &[0.5; 3], &[1.0; 3], 0.7, 1.0).unwrap();

        let text = stats.describe(Mode::Train);
        assert!(text.starts_with("jet-gnn :\n"));
        assert!(text.contains("Trained on 3 examples."));
        assert!(text.contains("training using CPU."));

        stats.set_description("jet-gnn v2 :\n");
        assert!(stats.describe(Mode::Test).starts_with("jet-gnn v2 :\nTrained on 3 examples."));
    }

    #[test]
    fn test_rejects_mismatched_labels() {
        let dir = tempfile::tempdir().unwrap();
        let mut stats = Statistics::new(config(dir.path(), 1, 1), "").unwrap();

        assert!(matches!(
            stats.update(Mode::Train, &[0.5, 0.2], &[1.0], 0.7, 1.0),
            Err(GnnError::Shape(_))
        ));
        assert_eq!(stats.events_seen(Mode::Train), 0);
        assert_eq!(read(dir.path(), "loss.csv"), "");
    }
}
