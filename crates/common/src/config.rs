//! Training configuration for the WGAN trainer.
//!
//! Serialised as JSON. Every field except `variant` has a default taken from the
//! WGAN paper's hyper-parameters, so `{"variant": "cifar"}` is a complete config.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Dataset / architecture variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// 1 × 28 × 28 grayscale digits, plain generator.
    Mnist,
    /// 3 × 32 × 32 colour images, generator with residual feature extractors.
    Cifar,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mnist => "mnist",
            Self::Cifar => "cifar",
        }
    }

    /// Image shape produced by the generator and consumed by the critic.
    pub fn image_shape(&self) -> ImageShape {
        match self {
            Self::Mnist => ImageShape::new(1, 28, 28),
            Self::Cifar => ImageShape::new(3, 32, 32),
        }
    }

    /// Last epoch (inclusive) when the config does not set one. MNIST runs
    /// epochs `0..100_000`, CIFAR runs `0..=1_000`.
    pub fn default_max_epochs(&self) -> usize {
        match self {
            Self::Mnist => 99_999,
            Self::Cifar => 1_000,
        }
    }
}

impl FromStr for Variant {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mnist" => Ok(Self::Mnist),
            "cifar" | "cifar10" | "cifar-10" => Ok(Self::Cifar),
            other => anyhow::bail!("unknown variant {other:?} (expected mnist or cifar)"),
        }
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(channels, height, width)` of a single image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageShape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl ImageShape {
    pub const fn new(channels: usize, height: usize, width: usize) -> Self {
        Self {
            channels,
            height,
            width,
        }
    }

    /// Number of scalar values in one image.
    pub fn numel(&self) -> usize {
        self.channels * self.height * self.width
    }
}

/// WGAN hyper-parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WganConfig {
    pub variant: Variant,

    // ── Model ───────────────────────────────────────────────────────────────
    /// Latent vector length fed to the generator.
    #[serde(default = "default_latent_dim")]
    pub latent_dim: usize,

    // ── Optimiser (RMSprop for both networks) ───────────────────────────────
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// Smoothing constant of the squared-gradient moving average.
    #[serde(default = "default_rms_alpha")]
    pub rms_alpha: f64,
    #[serde(default = "default_rms_eps")]
    pub rms_eps: f64,

    // ── WGAN stabilisation ──────────────────────────────────────────────────
    /// Critic parameters are clamped to `[-clip_value, clip_value]`.
    #[serde(default = "default_clip_value")]
    pub clip_value: f64,
    /// Critic updates per generator update.
    #[serde(default = "default_critic_iters")]
    pub critic_iters: usize,

    // ── Schedule ────────────────────────────────────────────────────────────
    /// Save a checkpoint and write a sample grid every N epochs.
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every: usize,
    /// Last epoch to run (inclusive). `None` = variant default.
    #[serde(default)]
    pub max_epochs: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    // ── Outputs ─────────────────────────────────────────────────────────────
    /// Number of generated images in each evaluation grid.
    #[serde(default = "default_sample_count")]
    pub sample_count: usize,
    /// Also write `generator_<epoch>` / `critic_<epoch>` snapshots.
    #[serde(default)]
    pub keep_epoch_snapshots: bool,
    /// Seed for latent sampling and shuffling. `None` = from entropy.
    #[serde(default)]
    pub seed: Option<u64>,
}

// ── Default value functions ─────────────────────────────────────────────────

fn default_latent_dim() -> usize {
    100
}
fn default_learning_rate() -> f64 {
    5e-5
}
fn default_rms_alpha() -> f64 {
    0.99
}
fn default_rms_eps() -> f64 {
    1e-8
}
fn default_clip_value() -> f64 {
    0.01
}
fn default_critic_iters() -> usize {
    5
}
fn default_checkpoint_every() -> usize {
    20
}
fn default_batch_size() -> usize {
    64
}
fn default_sample_count() -> usize {
    1
}

// ── Impl ────────────────────────────────────────────────────────────────────

impl WganConfig {
    /// Preset for a variant with every other field at its default.
    pub fn for_variant(variant: Variant) -> Self {
        Self {
            variant,
            latent_dim: default_latent_dim(),
            learning_rate: default_learning_rate(),
            rms_alpha: default_rms_alpha(),
            rms_eps: default_rms_eps(),
            clip_value: default_clip_value(),
            critic_iters: default_critic_iters(),
            checkpoint_every: default_checkpoint_every(),
            max_epochs: None,
            batch_size: default_batch_size(),
            sample_count: default_sample_count(),
            keep_epoch_snapshots: false,
            seed: None,
        }
    }

    /// MNIST preset. Keeps per-epoch snapshots alongside the latest pair.
    pub fn mnist() -> Self {
        Self {
            keep_epoch_snapshots: true,
            ..Self::for_variant(Variant::Mnist)
        }
    }

    pub fn cifar() -> Self {
        Self::for_variant(Variant::Cifar)
    }

    pub fn image_shape(&self) -> ImageShape {
        self.variant.image_shape()
    }

    pub fn max_epochs(&self) -> usize {
        self.max_epochs
            .unwrap_or_else(|| self.variant.default_max_epochs())
    }

    /// Whether `epoch` triggers a checkpoint + evaluation.
    pub fn is_checkpoint_epoch(&self, epoch: usize) -> bool {
        self.checkpoint_every > 0 && epoch % self.checkpoint_every == 0
    }

    /// Reject values the trainer cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.latent_dim > 0, "latent_dim must be positive");
        anyhow::ensure!(self.critic_iters > 0, "critic_iters must be positive");
        anyhow::ensure!(self.batch_size > 0, "batch_size must be positive");
        anyhow::ensure!(self.sample_count > 0, "sample_count must be positive");
        anyhow::ensure!(
            self.clip_value > 0.0 && self.clip_value.is_finite(),
            "clip_value must be a positive finite number, got {}",
            self.clip_value
        );
        anyhow::ensure!(
            self.learning_rate > 0.0,
            "learning_rate must be positive, got {}",
            self.learning_rate
        );
        anyhow::ensure!(
            (0.0..1.0).contains(&self.rms_alpha),
            "rms_alpha must be in [0, 1), got {}",
            self.rms_alpha
        );
        Ok(())
    }

    /// Save config to a JSON file.
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load config from a JSON file.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
