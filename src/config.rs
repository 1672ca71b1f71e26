//! Configuration objects
//!
//! Everything a model, its statistics and its optimizer need is carried by
//! plain serde structs passed into constructors. Nothing is read from global
//! state.

use crate::{GnnError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

// =============================================================================
// Model
// =============================================================================

/// Jet input formats and their node feature counts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    /// `(p, eta, phi, E, E/E_jet, pt)` per constituent
    Nyu,
    /// `(E, eta, phi, EM fraction, track flag)` per calorimeter tower
    Nersc,
}

impl DataFormat {
    pub fn input_fm(&self) -> usize {
        match self {
            Self::Nyu => 6,
            Self::Nersc => 5,
        }
    }
}

/// Which graph convolution every layer uses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ConvType {
    #[serde(rename = "GraphOp")]
    GraphOp,
    #[serde(rename = "ResGNN")]
    ResGnn,
    #[serde(rename = "ResGNN_SN")]
    ResGnnNorm,
    #[serde(rename = "Simple")]
    Simple,
}

impl ConvType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GraphOp => "GraphOp",
            Self::ResGnn => "ResGNN",
            Self::ResGnnNorm => "ResGNN_SN",
            Self::Simple => "Simple",
        }
    }

    /// Residual variants split their output in two halves.
    pub fn needs_even_width(&self) -> bool {
        matches!(self, Self::ResGnn | Self::ResGnnNorm)
    }
}

impl FromStr for ConvType {
    type Err = GnnError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "GraphOp" => Ok(Self::GraphOp),
            "ResGNN" => Ok(Self::ResGnn),
            "ResGNN_SN" => Ok(Self::ResGnnNorm),
            "Simple" => Ok(Self::Simple),
            other => Err(GnnError::Config(format!("unknown convolution type '{}'", other))),
        }
    }
}

impl std::fmt::Display for ConvType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Circular feature for the Gaussian kernel distance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Periodicity {
    /// Index on the feature axis
    pub feature: usize,
    pub period: f64,
}

impl Default for Periodicity {
    /// Azimuth (feature 1) with period 2π.
    fn default() -> Self {
        Self {
            feature: 1,
            period: std::f64::consts::TAU,
        }
    }
}

/// Adjacency kernel selection and its hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum KernelConfig {
    Identity,
    Gaussian {
        #[serde(default = "default_true")]
        diag: bool,
        #[serde(default)]
        softmax: bool,
        #[serde(default)]
        periodic: Option<Periodicity>,
        /// Initial width; drawn from `[0.99, 1.01]` when absent
        #[serde(default)]
        sigma: Option<f64>,
    },
    DirectedGaussian {
        #[serde(default = "default_theta")]
        theta: f64,
        #[serde(default)]
        sigma: Option<f64>,
        /// Not supported; a request is logged and ignored
        #[serde(default)]
        sparse: bool,
    },
    #[serde(rename = "MPNNdirected")]
    MpnnDirected,
    #[serde(rename = "MLPdirected")]
    MlpDirected {
        #[serde(default = "default_hidden")]
        hidden: usize,
    },
}

fn default_true() -> bool {
    true
}

fn default_theta() -> f64 {
    0.67
}

fn default_hidden() -> usize {
    32
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::Gaussian {
            diag: true,
            softmax: false,
            periodic: None,
            sigma: None,
        }
    }
}

impl KernelConfig {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Identity => "Identity",
            Self::Gaussian { softmax: true, .. } => "GaussianSoftmax",
            Self::Gaussian { .. } => "Gaussian",
            Self::DirectedGaussian { .. } => "DirectedGaussian",
            Self::MpnnDirected => "MPNNdirected",
            Self::MlpDirected { .. } => "MLPdirected",
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Gaussian { periodic: Some(p), .. } if p.period <= 0.0 => Err(GnnError::Config(
                format!("periodic period must be positive, got {}", p.period),
            )),
            Self::DirectedGaussian { theta, .. } if !theta.is_finite() => {
                Err(GnnError::Config("theta must be finite".into()))
            }
            Self::MlpDirected { hidden: 0 } => {
                Err(GnnError::Config("MLPdirected needs a hidden width".into()))
            }
            _ => Ok(()),
        }
    }
}

/// Full description of a layer stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    /// Feature maps of the input embedding
    pub input_fm: usize,
    /// Output feature maps of each layer, in order
    pub layer_fm: Vec<usize>,
    pub conv_type: ConvType,
    pub kernel: KernelConfig,
    /// Operators joined from each layer's adjacency
    #[serde(default)]
    pub operators: Vec<crate::conv::GraphOperator>,
    /// Give each layer its own kernel instead of sharing one
    #[serde(default)]
    pub layerwise: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        use crate::conv::GraphOperator;
        Self {
            name: "jet-gnn".to_string(),
            input_fm: DataFormat::Nyu.input_fm(),
            layer_fm: vec![64, 64, 64],
            conv_type: ConvType::ResGnn,
            kernel: KernelConfig::default(),
            operators: vec![GraphOperator::Identity, GraphOperator::Adjacency],
            layerwise: false,
        }
    }
}

impl ModelConfig {
    /// Default stack sized for a jet format.
    pub fn for_dataset(format: DataFormat) -> Self {
        Self {
            input_fm: format.input_fm(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.input_fm == 0 {
            return Err(GnnError::Config("input_fm must be positive".into()));
        }
        if self.layer_fm.is_empty() {
            return Err(GnnError::Config("model needs at least one layer".into()));
        }
        if let Some(i) = self.layer_fm.iter().position(|&fm| fm == 0) {
            return Err(GnnError::Config(format!("layer {} has zero feature maps", i)));
        }
        if self.conv_type.needs_even_width() {
            if let Some(i) = self.layer_fm.iter().position(|fm| fm % 2 != 0) {
                return Err(GnnError::Config(format!(
                    "{} needs even feature maps, layer {} has {}",
                    self.conv_type, i, self.layer_fm[i]
                )));
            }
        }
        if self.conv_type == ConvType::Simple && self.operators.is_empty() {
            return Err(GnnError::Config("Simple convolution needs operators".into()));
        }
        self.kernel.validate()
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| GnnError::Serialization(format!("model config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| GnnError::Serialization(format!("model config: {}", e)))
    }

    /// Input feature maps of every layer.
    pub fn layer_inputs(&self) -> Vec<usize> {
        std::iter::once(self.input_fm)
            .chain(self.layer_fm.iter().copied())
            .take(self.layer_fm.len())
            .collect()
    }
}

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Directory receiving the CSV files
    pub stat_dir: PathBuf,
    /// Directory receiving `description.txt`
    pub net_dir: PathBuf,
    /// Batches per summary window
    pub nb_display: usize,
    /// Train steps per `loss_step` entry
    pub nb_step: usize,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            stat_dir: PathBuf::from("stats"),
            net_dir: PathBuf::from("net"),
            nb_display: 100,
            nb_step: 10,
        }
    }
}

impl StatsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.nb_display == 0 || self.nb_step == 0 {
            return Err(GnnError::Config(
                "nb_display and nb_step must be positive".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Optimizer
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub learning_rate: f64,
    /// Use AdamW (true) or SGD (false)
    pub use_adam: bool,
    pub weight_decay: f64,
    /// Global gradient norm above which updates are scaled down
    pub grad_clip: f32,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.001,
            use_adam: true,
            weight_decay: 0.0,
            grad_clip: 1.0,
        }
    }
}

// =============================================================================
// Run modes
// =============================================================================

/// What a driver program was asked to do.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Train,
    Test,
    Plot,
    Description,
    #[serde(rename = "prepare")]
    PrepareData,
    #[serde(rename = "weightavg")]
    WeightAverage,
    #[serde(rename = "setdefault")]
    SetDefault,
}

impl RunMode {
    /// Fail loudly for modes this crate has no implementation for.
    pub fn ensure_implemented(&self) -> Result<()> {
        match self {
            Self::Train | Self::Test | Self::Plot | Self::Description => Ok(()),
            Self::PrepareData | Self::WeightAverage | Self::SetDefault => Err(
                GnnError::NotImplemented(format!("run mode {:?}", self)),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conv::GraphOperator;

    #[test]
    fn test_default_is_valid() {
        let config = ModelConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.layer_inputs(), vec![6, 64, 64]);
    }

    #[test]
    fn test_for_dataset() {
        assert_eq!(ModelConfig::for_dataset(DataFormat::Nersc).input_fm, 5);
        assert_eq!(ModelConfig::for_dataset(DataFormat::Nyu).input_fm, 6);
    }

    #[test]
    fn test_conv_type_parsing() {
        assert_eq!("ResGNN_SN".parse::<ConvType>().unwrap(), ConvType::ResGnnNorm);
        assert_eq!("Simple".parse::<ConvType>().unwrap(), ConvType::Simple);
        assert!(matches!(
            "GraphConv".parse::<ConvType>(),
            Err(GnnError::Config(_))
        ));

        let json = serde_json::to_string(&ConvType::ResGnn).unwrap();
        assert_eq!(json, "\"ResGNN\"");
        assert!(serde_json::from_str::<ConvType>("\"Bogus\"").is_err());
    }

    #[test]
    fn test_odd_residual_width_rejected() {
        let config = ModelConfig {
            layer_fm: vec![64, 33],
            ..ModelConfig::default()
        };
        assert!(matches!(config.validate(), Err(GnnError::Config(_))));

        let graph_op = ModelConfig {
            layer_fm: vec![64, 33],
            conv_type: ConvType::GraphOp,
            ..ModelConfig::default()
        };
        assert!(graph_op.validate().is_ok());
    }

    #[test]
    fn test_empty_layers_rejected() {
        let config = ModelConfig {
            layer_fm: vec![],
            ..ModelConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_kernel_config_json() {
        let kernel: KernelConfig =
            serde_json::from_str(r#"{"type": "Gaussian", "softmax": true}"#).unwrap();
        assert_eq!(kernel.name(), "GaussianSoftmax");
        assert!(matches!(kernel, KernelConfig::Gaussian { diag: true, .. }));

        let directed: KernelConfig =
            serde_json::from_str(r#"{"type": "DirectedGaussian"}"#).unwrap();
        assert!(matches!(directed, KernelConfig::DirectedGaussian { theta, .. } if theta == 0.67));

        let mlp: KernelConfig = serde_json::from_str(r#"{"type": "MLPdirected"}"#).unwrap();
        assert_eq!(mlp, KernelConfig::MlpDirected { hidden: 32 });
    }

    #[test]
    fn test_model_config_file_round_trip() {
        let config = ModelConfig {
            operators: vec![GraphOperator::Identity, GraphOperator::RowNormalized],
            kernel: KernelConfig::Gaussian {
                diag: false,
                softmax: false,
                periodic: Some(Periodicity::default()),
                sigma: Some(0.5),
            },
            ..ModelConfig::default()
        };

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, config.to_json().unwrap()).unwrap();

        let loaded = ModelConfig::from_json_file(&path).unwrap();
        assert_eq!(loaded.operators, config.operators);
        assert_eq!(loaded.kernel, config.kernel);
        assert_eq!(loaded.conv_type, ConvType::ResGnn);
    }

    #[test]
    fn test_run_mode_not_implemented() {
        assert!(RunMode::Train.ensure_implemented().is_ok());
        for mode in [RunMode::PrepareData, RunMode::WeightAverage, RunMode::SetDefault] {
            assert!(matches!(
                mode.ensure_implemented(),
                Err(GnnError::NotImplemented(_))
            ));
        }
    }
}
