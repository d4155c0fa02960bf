//! Trainer: the WGAN training controller.
//!
//! Per batch: `critic_iters` critic updates (clamp, score real and fake,
//! RMSprop, clamp), then one generator update through the critic. Every
//! `checkpoint_every` epochs the trainer saves both networks and writes a
//! sample grid.

use std::path::PathBuf;

use anyhow::Context;
use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::SeedableRng;

use wgan_common::{ImageDataset, WganConfig};
use wgan_core::{Critic, Generator};

use crate::checkpoint::{CheckpointStore, LoadResult};
use crate::evaluator::{sample_grid, sample_latent};
use crate::network::Network;
use crate::optim::ParamsRmsProp;
use crate::state::{StepMetrics, TrainingState};

// ── Config ──────────────────────────────────────────────────────────────────

/// Where checkpoints and sample grids go.
#[derive(Debug, Clone)]
pub struct OutputDirs {
    pub checkpoint_dir: PathBuf,
    pub results_dir: PathBuf,
}

impl OutputDirs {
    /// `checkpoint/` and `results/` under `root`.
    pub fn under(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            checkpoint_dir: root.join("checkpoint"),
            results_dir: root.join("results"),
        }
    }
}

// ── Trainer ─────────────────────────────────────────────────────────────────

/// The training engine. Owns both networks, their optimisers, and the
/// latent RNG. Progress lives in a [`TrainingState`] passed in by the caller.
pub struct Trainer {
    generator: Network<Generator>,
    critic: Network<Critic>,
    config: WganConfig,
    store: CheckpointStore,
    results_dir: PathBuf,
    rng: StdRng,
    device: Device,
}

impl Trainer {
    /// Build fresh networks for `config.variant` on `device`.
    pub fn new(config: WganConfig, dirs: OutputDirs, device: Device) -> anyhow::Result<Self> {
        config.validate()?;
        for dir in [&dirs.checkpoint_dir, &dirs.results_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }

        let params = ParamsRmsProp {
            lr: config.learning_rate,
            alpha: config.rms_alpha,
            eps: config.rms_eps,
        };
        let generator = Network::new(|vb| Generator::new(vb, &config), params, &device)?;
        let critic = Network::new(|vb| Critic::new(vb, &config), params, &device)?;

        tracing::info!(
            variant = %config.variant,
            generator_params = generator.parameter_count(),
            critic_params = critic.parameter_count(),
            lr = config.learning_rate,
            clip_value = config.clip_value,
            critic_iters = config.critic_iters,
            "Networks built"
        );

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            generator,
            critic,
            store: CheckpointStore::new(dirs.checkpoint_dir),
            results_dir: dirs.results_dir,
            config,
            rng,
            device,
        })
    }

    /// Restore the latest checkpoint if there is one, else start at epoch 0.
    pub fn resume(&mut self) -> anyhow::Result<TrainingState> {
        match self.store.load(&mut self.generator, &mut self.critic)? {
            LoadResult::Found(state) => Ok(state),
            LoadResult::NotFound => {
                tracing::info!(dir = %self.store.dir().display(), "No checkpoint, starting fresh");
                Ok(TrainingState::default())
            }
        }
    }

    /// Resume, then run epochs until `max_epochs` (inclusive) is done.
    pub fn train(&mut self, data: &impl ImageDataset) -> anyhow::Result<TrainingState> {
        let state = self.resume()?;
        self.train_from(data, state, |_, _| {})
    }

    /// Run epochs starting at `state.epoch` until `max_epochs` (inclusive) is
    /// done, calling `on_epoch` after each one.
    pub fn train_from<F>(
        &mut self,
        data: &impl ImageDataset,
        mut state: TrainingState,
        mut on_epoch: F,
    ) -> anyhow::Result<TrainingState>
    where
        F: FnMut(&StepMetrics, &TrainingState),
    {
        let max_epochs = self.config.max_epochs();
        while state.epoch <= max_epochs {
            let metrics = self.train_epoch(data, &mut state)?;
            on_epoch(&metrics, &state);
        }
        Ok(state)
    }

    /// One pass over `data`. Checkpoints and evaluates on checkpoint epochs,
    /// then advances `state.epoch`.
    pub fn train_epoch(
        &mut self,
        data: &impl ImageDataset,
        state: &mut TrainingState,
    ) -> anyhow::Result<StepMetrics> {
        let mut last = None;
        for (i, batch) in data.batches(self.config.batch_size).enumerate() {
            let (real, _labels) = batch?;
            let m = self.train_batch(&real, state)?;
            tracing::debug!(
                epoch = m.epoch,
                batch = i,
                g_loss = m.g_loss,
                real_loss = m.real_loss,
                fake_loss = m.fake_loss,
                "batch"
            );
            last = Some(m);
        }
        let metrics = last.context("dataset yielded no batches")?;

        tracing::info!(
            epoch = metrics.epoch,
            g_loss = metrics.g_loss,
            real_loss = metrics.real_loss,
            fake_loss = metrics.fake_loss,
            "Epoch done"
        );

        if self.config.is_checkpoint_epoch(state.epoch) {
            self.save_checkpoint(state)?;
            self.evaluate(state.epoch)?;
        }
        state.epoch += 1;
        Ok(metrics)
    }

    /// `critic_iters` critic updates followed by one generator update.
    pub fn train_batch(
        &mut self,
        real: &Tensor,
        state: &mut TrainingState,
    ) -> anyhow::Result<StepMetrics> {
        let real = real.to_device(&self.device)?;
        let mut real_loss = 0.0;
        let mut fake_loss = 0.0;
        for _ in 0..self.config.critic_iters {
            (real_loss, fake_loss) = self.critic_step(&real, state)?;
        }
        let g_loss = self.generator_step(real.dim(0)?, state)?;
        Ok(StepMetrics {
            epoch: state.epoch,
            g_loss,
            real_loss,
            fake_loss,
        })
    }

    /// One critic update. Returns `(loss_real, loss_fake)`.
    ///
    /// Critic parameters are inside `[-clip_value, clip_value]` on return.
    pub fn critic_step(
        &mut self,
        real: &Tensor,
        state: &mut TrainingState,
    ) -> anyhow::Result<(f32, f32)> {
        let clip = self.config.clip_value;
        self.critic.clamp(clip)?;

        let loss_real = self.critic.forward_t(real, true)?.mean_all()?.neg()?;
        let z = self.latent(real.dim(0)?)?;
        let fake = self.generator.forward_t(&z, true)?.detach();
        let loss_fake = self.critic.forward_t(&fake, true)?.mean_all()?;

        let real_val = check_finite(loss_real.to_scalar::<f32>()?, "critic (real)", state)?;
        let fake_val = check_finite(loss_fake.to_scalar::<f32>()?, "critic (fake)", state)?;

        let grads = (&loss_real + &loss_fake)?.backward()?;
        self.critic.step(&grads)?;
        self.critic.clamp(clip)?;

        state.real_losses.push(real_val);
        state.fake_losses.push(fake_val);
        Ok((real_val, fake_val))
    }

    /// One generator update against the current critic. The gradient flows
    /// through the critic but only the generator is stepped.
    pub fn generator_step(
        &mut self,
        batch_size: usize,
        state: &mut TrainingState,
    ) -> anyhow::Result<f32> {
        let z = self.latent(batch_size)?;
        let fake = self.generator.forward_t(&z, true)?;
        let loss = self.critic.forward_t(&fake, true)?.mean_all()?.neg()?;
        let value = check_finite(loss.to_scalar::<f32>()?, "generator", state)?;

        let grads = loss.backward()?;
        self.generator.step(&grads)?;

        state.generator_losses.push(value);
        Ok(value)
    }

    /// Save both networks with the current state.
    pub fn save_checkpoint(&self, state: &TrainingState) -> anyhow::Result<()> {
        self.store.save(
            state,
            &self.generator,
            &self.critic,
            self.config.keep_epoch_snapshots,
        )
    }

    /// Reload the generator from the checkpoint on disk and write
    /// `samples_epoch_<epoch>.png` into the results directory.
    pub fn evaluate(&self, epoch: usize) -> anyhow::Result<PathBuf> {
        let config = &self.config;
        let generator = Network::new(
            |vb| Generator::new(vb, config),
            ParamsRmsProp::default(),
            &self.device,
        )?;
        if let LoadResult::NotFound = self.store.load_generator_params(generator.varmap())? {
            anyhow::bail!(
                "no checkpoint in {} to evaluate",
                self.store.dir().display()
            );
        }

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(epoch as u64)),
            None => StdRng::from_entropy(),
        };
        let grid = sample_grid(generator.model(), config.sample_count, &mut rng, &self.device)?;
        let path = self.results_dir.join(format!("samples_epoch_{epoch}.png"));
        grid.save(&path)?;
        tracing::info!(epoch, path = %path.display(), "Sample grid written");
        Ok(path)
    }

    fn latent(&mut self, n: usize) -> candle_core::Result<Tensor> {
        sample_latent(n, self.config.latent_dim, &mut self.rng, &self.device)
    }

    pub fn generator(&self) -> &Network<Generator> {
        &self.generator
    }

    pub fn critic(&self) -> &Network<Critic> {
        &self.critic
    }

    pub fn config(&self) -> &WganConfig {
        &self.config
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}

fn check_finite(value: f32, phase: &str, state: &TrainingState) -> anyhow::Result<f32> {
    if value.is_finite() {
        Ok(value)
    } else {
        anyhow::bail!("{phase} loss is {value} at epoch {}", state.epoch)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use candle_nn::ModuleT;
    use tempfile::TempDir;
    use wgan_common::InMemoryDataset;
    use wgan_core::{max_abs, named_vars};

    fn config() -> WganConfig {
        WganConfig {
            seed: Some(42),
            batch_size: 4,
            ..WganConfig::mnist()
        }
    }

    fn trainer(tmp: &TempDir, config: WganConfig) -> Trainer {
        Trainer::new(config, OutputDirs::under(tmp.path()), Device::Cpu).unwrap()
    }

    fn batch(n: usize) -> Tensor {
        Tensor::rand(-1f32, 1f32, (n, 1, 28, 28), &Device::Cpu).unwrap()
    }

    fn all_values<M: ModuleT>(net: &Network<M>) -> Vec<(String, Vec<f32>)> {
        named_vars(net.varmap())
            .unwrap()
            .into_iter()
            .map(|(n, v)| (n, v.as_tensor().flatten_all().unwrap().to_vec1().unwrap()))
            .collect()
    }

    fn dataset(n: usize) -> InMemoryDataset {
        let labels = Tensor::zeros(n, DType::U32, &Device::Cpu).unwrap();
        InMemoryDataset::new(batch(n), labels).unwrap()
    }

    #[test]
    fn one_epoch_one_batch() {
        let tmp = TempDir::new().unwrap();
        let mut t = trainer(&tmp, config());
        let mut state = TrainingState::default();
        let m = t.train_epoch(&dataset(4), &mut state).unwrap();

        assert_eq!(t.critic().optimizer().step_count(), 5);
        assert_eq!(t.generator().optimizer().step_count(), 1);
        assert_eq!(state.real_losses.len(), 5);
        assert_eq!(state.fake_losses.len(), 5);
        assert_eq!(state.generator_losses.len(), 1);
        assert_eq!(state.epoch, 1);
        assert_eq!(m.epoch, 0);
        assert_eq!(Some(&m.g_loss), state.generator_losses.last());

        // Epoch 0 is a checkpoint epoch.
        let dirs = OutputDirs::under(tmp.path());
        assert!(dirs.checkpoint_dir.join("generator.safetensors").is_file());
        assert!(dirs.checkpoint_dir.join("critic.safetensors").is_file());
        assert!(dirs.checkpoint_dir.join("generator_0.safetensors").is_file());
        assert!(dirs.results_dir.join("samples_epoch_0.png").is_file());
    }

    #[test]
    fn checkpoint_epochs_write_artifacts() {
        let tmp = TempDir::new().unwrap();
        let mut t = trainer(&tmp, config());
        let dirs = OutputDirs::under(tmp.path());

        let mut state = TrainingState {
            epoch: 7,
            ..Default::default()
        };
        t.train_epoch(&dataset(4), &mut state).unwrap();
        assert!(!dirs.checkpoint_dir.join("generator.safetensors").exists());
        assert!(!dirs.results_dir.join("samples_epoch_7.png").exists());

        state.epoch = 20;
        t.train_epoch(&dataset(4), &mut state).unwrap();
        assert_eq!(state.epoch, 21);
        assert!(dirs.checkpoint_dir.join("generator.safetensors").is_file());
        assert!(dirs.checkpoint_dir.join("critic.safetensors").is_file());
        assert!(dirs.results_dir.join("samples_epoch_20.png").is_file());

        // The saved epoch is the one just trained.
        let saved = t.store().load_histories().unwrap().found().unwrap();
        assert_eq!(saved.epoch, 20);
        assert_eq!(saved.generator_losses.len(), 2);
        assert_eq!(saved.real_losses.len(), 10);
    }

    #[test]
    fn critic_stays_clipped() {
        let tmp = TempDir::new().unwrap();
        let mut t = trainer(&tmp, config());
        let mut state = TrainingState::default();
        let real = batch(4);
        for _ in 0..3 {
            t.critic_step(&real, &mut state).unwrap();
            assert!(max_abs(t.critic().vars()).unwrap() <= 0.01);
        }
        t.generator_step(4, &mut state).unwrap();
        assert!(max_abs(t.critic().vars()).unwrap() <= 0.01);
    }

    #[test]
    fn generator_step_leaves_critic_alone() {
        let tmp = TempDir::new().unwrap();
        let mut t = trainer(&tmp, config());
        let mut state = TrainingState::default();
        let before: Vec<Vec<f32>> = t
            .critic()
            .vars()
            .iter()
            .map(|v| v.as_tensor().flatten_all().unwrap().to_vec1().unwrap())
            .collect();
        t.generator_step(2, &mut state).unwrap();
        let after: Vec<Vec<f32>> = t
            .critic()
            .vars()
            .iter()
            .map(|v| v.as_tensor().flatten_all().unwrap().to_vec1().unwrap())
            .collect();
        assert_eq!(before, after);
        assert_eq!(t.critic().optimizer().step_count(), 0);
        assert!(state.real_losses.is_empty());
    }

    #[test]
    fn same_params_and_seed_give_same_losses() {
        let tmp = TempDir::new().unwrap();
        let real = batch(4);

        let mut a = trainer(&tmp, config());
        a.save_checkpoint(&TrainingState::default()).unwrap();
        let mut state_a = a.resume().unwrap();
        a.train_batch(&real, &mut state_a).unwrap();

        let mut b = trainer(&tmp, config());
        let mut state_b = b.resume().unwrap();
        b.train_batch(&real, &mut state_b).unwrap();

        assert_eq!(state_a, state_b);
    }

    #[test]
    fn resume_restores_progress() {
        let tmp = TempDir::new().unwrap();
        let mut a = trainer(&tmp, config());
        assert_eq!(a.resume().unwrap(), TrainingState::default());

        let mut state = TrainingState::default();
        a.train_epoch(&dataset(4), &mut state).unwrap();

        let mut b = trainer(&tmp, config());
        let resumed = b.resume().unwrap();
        // Saved before the increment: a resumed run repeats epoch 0.
        assert_eq!(resumed.epoch, 0);
        assert_eq!(resumed.generator_losses, state.generator_losses);
        assert_eq!(resumed.real_losses, state.real_losses);
        assert_eq!(b.critic().optimizer().step_count(), 5);
        assert_eq!(b.generator().optimizer().step_count(), 1);

        // Every var, batch-norm running statistics included, comes back as saved.
        assert_eq!(all_values(a.generator()), all_values(b.generator()));
        assert_eq!(all_values(a.critic()), all_values(b.critic()));
    }

    #[test]
    fn train_runs_through_max_epochs() {
        let tmp = TempDir::new().unwrap();
        let mut t = trainer(
            &tmp,
            WganConfig {
                max_epochs: Some(1),
                ..config()
            },
        );
        let state = t.train(&dataset(4)).unwrap();
        assert_eq!(state.epoch, 2);
        assert_eq!(state.generator_losses.len(), 2);
    }

    #[test]
    fn train_from_reports_every_epoch() {
        let tmp = TempDir::new().unwrap();
        let mut t = trainer(
            &tmp,
            WganConfig {
                max_epochs: Some(3),
                ..config()
            },
        );
        let start = TrainingState {
            epoch: 2,
            ..Default::default()
        };
        let mut seen = Vec::new();
        let state = t
            .train_from(&dataset(4), start, |m, s| seen.push((m.epoch, s.epoch)))
            .unwrap();
        assert_eq!(seen, vec![(2, 3), (3, 4)]);
        assert_eq!(state.epoch, 4);
        assert_eq!(state.generator_losses.len(), 2);
    }

    #[test]
    fn empty_dataset_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let mut t = trainer(&tmp, config());
        let empty = InMemoryDataset::new(
            Tensor::zeros((0, 1, 28, 28), DType::F32, &Device::Cpu).unwrap(),
            Tensor::zeros(0, DType::U32, &Device::Cpu).unwrap(),
        )
        .unwrap();
        let mut state = TrainingState::default();
        let err = t.train_epoch(&empty, &mut state).unwrap_err();
        assert!(err.to_string().contains("no batches"), "{err}");
        assert_eq!(state.epoch, 0);
    }

    #[test]
    fn evaluate_without_checkpoint_fails() {
        let tmp = TempDir::new().unwrap();
        let t = trainer(&tmp, config());
        assert!(t.evaluate(0).is_err());
    }

    #[test]
    fn non_finite_loss_names_phase() {
        let state = TrainingState {
            epoch: 3,
            ..Default::default()
        };
        let err = check_finite(f32::NAN, "generator", &state).unwrap_err();
        assert_eq!(err.to_string(), "generator loss is NaN at epoch 3");
        assert_eq!(check_finite(1.5, "generator", &state).unwrap(), 1.5);
    }
}
