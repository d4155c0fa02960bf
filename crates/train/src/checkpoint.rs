//! Checkpoint store: one safetensors record per network.
//!
//! | File | Keys |
//! |------|------|
//! | `generator.safetensors` | `epoch`, `param.*`, `optim.*`, `history.generator` |
//! | `critic.safetensors` | `param.*`, `optim.*`, `history.real`, `history.fake` |
//!
//! `param.*` covers every var in the network's `VarMap`, batch-norm running
//! statistics included. Both files are overwritten on every save.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use candle_core::{Device, Tensor};
use candle_nn::{ModuleT, VarMap};

use wgan_core::named_vars;

use crate::network::Network;
use crate::state::TrainingState;

const PARAM_PREFIX: &str = "param.";
const OPTIM_PREFIX: &str = "optim.";
const EPOCH_KEY: &str = "epoch";
const HISTORY_GENERATOR: &str = "history.generator";
const HISTORY_REAL: &str = "history.real";
const HISTORY_FAKE: &str = "history.fake";

/// Outcome of a load attempt. A missing checkpoint is an expected condition
/// on first start; anything else that goes wrong is an error.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadResult<T = TrainingState> {
    Found(T),
    NotFound,
}

impl<T> LoadResult<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, LoadResult::Found(_))
    }

    pub fn found(self) -> Option<T> {
        match self {
            LoadResult::Found(v) => Some(v),
            LoadResult::NotFound => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn generator_path(&self) -> PathBuf {
        self.dir.join("generator.safetensors")
    }

    pub fn critic_path(&self) -> PathBuf {
        self.dir.join("critic.safetensors")
    }

    pub fn generator_snapshot_path(&self, epoch: usize) -> PathBuf {
        self.dir.join(format!("generator_{epoch}.safetensors"))
    }

    pub fn critic_snapshot_path(&self, epoch: usize) -> PathBuf {
        self.dir.join(format!("critic_{epoch}.safetensors"))
    }

    /// True when both records are on disk.
    pub fn exists(&self) -> bool {
        self.generator_path().is_file() && self.critic_path().is_file()
    }

    // ── Save ────────────────────────────────────────────────────────────────

    /// Write both records. With `keep_snapshot`, epoch-tagged copies are
    /// written alongside the fixed-name pair.
    pub fn save<G: ModuleT, C: ModuleT>(
        &self,
        state: &TrainingState,
        generator: &Network<G>,
        critic: &Network<C>,
        keep_snapshot: bool,
    ) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating checkpoint dir {}", self.dir.display()))?;

        let mut gen_record = network_record(generator)?;
        gen_record.insert(
            EPOCH_KEY.to_string(),
            Tensor::new(&[state.epoch as i64], &Device::Cpu)?,
        );
        insert_history(&mut gen_record, HISTORY_GENERATOR, &state.generator_losses)?;

        let mut critic_record = network_record(critic)?;
        insert_history(&mut critic_record, HISTORY_REAL, &state.real_losses)?;
        insert_history(&mut critic_record, HISTORY_FAKE, &state.fake_losses)?;

        write_record(&gen_record, &self.generator_path())?;
        write_record(&critic_record, &self.critic_path())?;
        if keep_snapshot {
            write_record(&gen_record, &self.generator_snapshot_path(state.epoch))?;
            write_record(&critic_record, &self.critic_snapshot_path(state.epoch))?;
        }

        tracing::info!(
            epoch = state.epoch,
            dir = %self.dir.display(),
            snapshot = keep_snapshot,
            "Checkpoint saved"
        );
        Ok(())
    }

    // ── Load ────────────────────────────────────────────────────────────────

    /// Restore parameters, optimiser state and histories into both networks.
    pub fn load<G: ModuleT, C: ModuleT>(
        &self,
        generator: &mut Network<G>,
        critic: &mut Network<C>,
    ) -> anyhow::Result<LoadResult> {
        let Some((gen_record, critic_record)) = self.read_pair()? else {
            return Ok(LoadResult::NotFound);
        };

        let gen_path = self.generator_path();
        let critic_path = self.critic_path();
        restore_params(generator.varmap(), &gen_record, &gen_path)?;
        generator
            .optimizer_mut()
            .load_state(&optimizer_state(&gen_record))
            .with_context(|| format!("restoring optimizer from {}", gen_path.display()))?;
        restore_params(critic.varmap(), &critic_record, &critic_path)?;
        critic
            .optimizer_mut()
            .load_state(&optimizer_state(&critic_record))
            .with_context(|| format!("restoring optimizer from {}", critic_path.display()))?;

        let state = state_from_records(&gen_record, &critic_record, &gen_path)?;
        tracing::info!(
            epoch = state.epoch,
            generator_steps = state.generator_losses.len(),
            critic_steps = state.real_losses.len(),
            "Checkpoint loaded"
        );
        Ok(LoadResult::Found(state))
    }

    /// Restore generator parameters only and return the saved epoch. Used by
    /// evaluation and sampling, which have no use for optimiser state.
    pub fn load_generator_params(&self, varmap: &VarMap) -> anyhow::Result<LoadResult<usize>> {
        let path = self.generator_path();
        if !path.is_file() {
            return Ok(LoadResult::NotFound);
        }
        let record = read_record(&path)?;
        restore_params(varmap, &record, &path)?;
        Ok(LoadResult::Found(read_epoch(&record, &path)?))
    }

    /// Epoch and loss histories, without touching any network.
    pub fn load_histories(&self) -> anyhow::Result<LoadResult> {
        let Some((gen_record, critic_record)) = self.read_pair()? else {
            return Ok(LoadResult::NotFound);
        };
        Ok(LoadResult::Found(state_from_records(
            &gen_record,
            &critic_record,
            &self.generator_path(),
        )?))
    }

    fn read_pair(
        &self,
    ) -> anyhow::Result<Option<(HashMap<String, Tensor>, HashMap<String, Tensor>)>> {
        let gen_path = self.generator_path();
        let critic_path = self.critic_path();
        match (gen_path.is_file(), critic_path.is_file()) {
            (true, true) => Ok(Some((read_record(&gen_path)?, read_record(&critic_path)?))),
            (false, false) => Ok(None),
            (gen, critic) => {
                tracing::warn!(
                    generator = gen,
                    critic = critic,
                    dir = %self.dir.display(),
                    "Incomplete checkpoint pair, starting fresh"
                );
                Ok(None)
            }
        }
    }
}

// ── Record helpers ──────────────────────────────────────────────────────────

fn network_record<M: ModuleT>(net: &Network<M>) -> anyhow::Result<HashMap<String, Tensor>> {
    let mut record = HashMap::new();
    for (name, var) in named_vars(net.varmap())? {
        record.insert(
            format!("{PARAM_PREFIX}{name}"),
            var.as_tensor().to_device(&Device::Cpu)?,
        );
    }
    for (key, tensor) in net.optimizer().state_tensors()? {
        record.insert(
            format!("{OPTIM_PREFIX}{key}"),
            tensor.to_device(&Device::Cpu)?,
        );
    }
    Ok(record)
}

/// Empty histories are left out of the record and read back as empty.
fn insert_history(
    record: &mut HashMap<String, Tensor>,
    key: &str,
    losses: &[f32],
) -> anyhow::Result<()> {
    if !losses.is_empty() {
        record.insert(
            key.to_string(),
            Tensor::from_slice(losses, losses.len(), &Device::Cpu)?,
        );
    }
    Ok(())
}

fn write_record(record: &HashMap<String, Tensor>, path: &Path) -> anyhow::Result<()> {
    candle_core::safetensors::save(record, path)
        .with_context(|| format!("writing checkpoint {}", path.display()))
}

fn read_record(path: &Path) -> anyhow::Result<HashMap<String, Tensor>> {
    candle_core::safetensors::load(path, &Device::Cpu)
        .with_context(|| format!("reading checkpoint {}", path.display()))
}

fn restore_params(
    varmap: &VarMap,
    record: &HashMap<String, Tensor>,
    path: &Path,
) -> anyhow::Result<()> {
    for (name, var) in named_vars(varmap)? {
        let key = format!("{PARAM_PREFIX}{name}");
        let saved = record
            .get(&key)
            .with_context(|| format!("{} has no parameter {name}", path.display()))?;
        if saved.dims() != var.dims() {
            bail!(
                "{}: parameter {name} has shape {:?}, expected {:?}",
                path.display(),
                saved.dims(),
                var.dims()
            );
        }
        var.set(&saved.to_device(var.device())?.to_dtype(var.dtype())?)?;
    }
    Ok(())
}

fn optimizer_state(record: &HashMap<String, Tensor>) -> HashMap<String, Tensor> {
    record
        .iter()
        .filter_map(|(key, t)| {
            key.strip_prefix(OPTIM_PREFIX)
                .map(|k| (k.to_string(), t.clone()))
        })
        .collect()
}

fn read_epoch(record: &HashMap<String, Tensor>, path: &Path) -> anyhow::Result<usize> {
    let epoch = record
        .get(EPOCH_KEY)
        .with_context(|| format!("{} has no epoch", path.display()))?
        .flatten_all()?
        .to_vec1::<i64>()?;
    match epoch.first() {
        Some(&e) if e >= 0 => Ok(e as usize),
        _ => bail!("{}: invalid epoch {epoch:?}", path.display()),
    }
}

fn read_history(record: &HashMap<String, Tensor>, key: &str) -> anyhow::Result<Vec<f32>> {
    match record.get(key) {
        Some(t) => Ok(t.flatten_all()?.to_vec1::<f32>()?),
        None => Ok(Vec::new()),
    }
}

fn state_from_records(
    gen_record: &HashMap<String, Tensor>,
    critic_record: &HashMap<String, Tensor>,
    gen_path: &Path,
) -> anyhow::Result<TrainingState> {
    Ok(TrainingState {
        epoch: read_epoch(gen_record, gen_path)?,
        generator_losses: read_history(gen_record, HISTORY_GENERATOR)?,
        real_losses: read_history(critic_record, HISTORY_REAL)?,
        fake_losses: read_history(critic_record, HISTORY_FAKE)?,
    })
}

// ── Tests ───────────────────────────────────────────────────────────────────
