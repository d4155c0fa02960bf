use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::SeedableRng;

use wgan_common::{load_dataset, ImageDataset, Variant, WganConfig};
use wgan_core::Generator;
use wgan_train::{sample_grid, CheckpointStore, LoadResult, OutputDirs, Trainer};

#[derive(Parser, Debug)]
#[command(name = "wgan", about = "Wasserstein GAN with weight clipping")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train (or resume training) a generator/critic pair.
    Train(TrainArgs),
    /// Write a grid of samples from the latest generator checkpoint.
    Sample(SampleArgs),
    /// Dump the loss histories of a checkpoint as CSV.
    Losses(LossesArgs),
}

// ── Train ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
struct TrainArgs {
    #[arg(long, default_value = "mnist")]
    variant: Variant,
    /// MNIST IDX files or CIFAR-10 binary batches.
    #[arg(long)]
    data_dir: PathBuf,
    #[arg(long, default_value = "checkpoint")]
    checkpoint_dir: PathBuf,
    #[arg(long, default_value = "results")]
    results_dir: PathBuf,
    /// JSON config; created from the variant preset if missing.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    batch_size: Option<usize>,
    /// Last epoch to run (inclusive).
    #[arg(long)]
    max_epochs: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
    /// Stay on the CPU even when CUDA is available.
    #[arg(long)]
    cpu: bool,
}

// ── Sample / Losses ────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
struct SampleArgs {
    #[arg(long, default_value = "mnist")]
    variant: Variant,
    #[arg(long, default_value = "checkpoint")]
    checkpoint_dir: PathBuf,
    /// JSON config the checkpoint was trained with; overrides --variant.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value = "samples.png")]
    output: PathBuf,
    #[arg(long, default_value_t = 64)]
    count: usize,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    cpu: bool,
}

#[derive(Parser, Debug)]
struct LossesArgs {
    #[arg(long, default_value = "checkpoint")]
    checkpoint_dir: PathBuf,
    #[arg(long, default_value = "losses.csv")]
    output: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Train(args) => cmd_train(args),
        Command::Sample(args) => cmd_sample(args),
        Command::Losses(args) => cmd_losses(args),
    }
}

fn select_device(cpu: bool) -> Result<Device> {
    if cpu {
        Ok(Device::Cpu)
    } else {
        Ok(Device::cuda_if_available(0)?)
    }
}

// ── Command implementations ────────────────────────────────────────────────────

fn load_or_create_config(args: &TrainArgs) -> Result<WganConfig> {
    let mut config = match &args.config {
        Some(path) if path.exists() => {
            let config = WganConfig::load(path)?;
            if config.variant != args.variant {
                eprintln!(
                    "Config {} selects {}, ignoring --variant {}",
                    path.display(),
                    config.variant,
                    args.variant
                );
            }
            config
        }
        Some(path) => {
            let preset = preset(args.variant);
            preset.save(path)?;
            eprintln!("Created default config at {}", path.display());
            preset
        }
        None => preset(args.variant),
    };
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if args.max_epochs.is_some() {
        config.max_epochs = args.max_epochs;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    config.validate()?;
    Ok(config)
}

fn preset(variant: Variant) -> WganConfig {
    match variant {
        Variant::Mnist => WganConfig::mnist(),
        Variant::Cifar => WganConfig::cifar(),
    }
}

fn cmd_train(args: TrainArgs) -> Result<()> {
    let config = load_or_create_config(&args)?;
    let device = select_device(args.cpu)?;

    let dataset = load_dataset(config.variant, &args.data_dir, &device)?.with_shuffle(config.seed);
    eprintln!(
        "Loaded {} {} images from {}",
        dataset.len(),
        config.variant,
        args.data_dir.display()
    );

    let max_epochs = config.max_epochs();
    let dirs = OutputDirs {
        checkpoint_dir: args.checkpoint_dir.clone(),
        results_dir: args.results_dir.clone(),
    };
    let mut trainer = Trainer::new(config, dirs, device)?;
    let state = trainer.resume()?;
    if state.epoch > 0 {
        eprintln!("Resuming at epoch {}", state.epoch);
    }

    let pb = ProgressBar::new(max_epochs as u64 + 1);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} epochs {msg}")?
            .progress_chars("=>-"),
    );
    pb.set_position(state.epoch.min(max_epochs + 1) as u64);

    let state = trainer.train_from(&dataset, state, |m, _| {
        pb.set_message(format!(
            "g {:.4} real {:.4} fake {:.4}",
            m.g_loss, m.real_loss, m.fake_loss
        ));
        pb.inc(1);
    })?;
    pb.finish_with_message("done");

    eprintln!(
        "Training done after epoch {}. Checkpoints in {}",
        state.epoch.saturating_sub(1),
        args.checkpoint_dir.display()
    );
    Ok(())
}

/// The generator must be rebuilt with the geometry it was trained with.
fn sample_config(args: &SampleArgs) -> Result<WganConfig> {
    match &args.config {
        Some(path) => WganConfig::load(path),
        None => Ok(preset(args.variant)),
    }
}

fn cmd_sample(args: SampleArgs) -> Result<()> {
    anyhow::ensure!(args.count > 0, "--count must be positive");
    let device = select_device(args.cpu)?;
    let config = sample_config(&args)?;

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let generator = Generator::new(vb, &config)?;
    let store = CheckpointStore::new(&args.checkpoint_dir);
    let epoch = match store.load_generator_params(&varmap)? {
        LoadResult::Found(epoch) => epoch,
        LoadResult::NotFound => anyhow::bail!(
            "no generator checkpoint in {}",
            args.checkpoint_dir.display()
        ),
    };

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let grid = sample_grid(&generator, args.count, &mut rng, &device)?;
    grid.save(&args.output)?;
    eprintln!(
        "Wrote {} samples from epoch {epoch} to {}",
        args.count,
        args.output.display()
    );
    Ok(())
}

fn cmd_losses(args: LossesArgs) -> Result<()> {
    let store = CheckpointStore::new(&args.checkpoint_dir);
    let state = match store.load_histories()? {
        LoadResult::Found(state) => state,
        LoadResult::NotFound => anyhow::bail!(
            "no checkpoint in {}",
            args.checkpoint_dir.display()
        ),
    };
    write_losses_csv(
        &args.output,
        &[
            ("generator", &state.generator_losses),
            ("real", &state.real_losses),
            ("fake", &state.fake_losses),
        ],
    )?;
    eprintln!(
        "Epoch {}: {} generator / {} critic updates written to {}",
        state.epoch,
        state.generator_losses.len(),
        state.real_losses.len(),
        args.output.display()
    );
    Ok(())
}

/// One row per recorded update: `series,step,loss`.
fn write_losses_csv(path: &Path, series: &[(&str, &Vec<f32>)]) -> Result<()> {
    let mut f = std::io::BufWriter::new(std::fs::File::create(path)?);
    writeln!(f, "series,step,loss")?;
    for (name, losses) in series {
        for (step, loss) in losses.iter().enumerate() {
            writeln!(f, "{name},{step},{loss}")?;
        }
    }
    f.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn train_args(extra: &[&str]) -> TrainArgs {
        let mut argv = vec!["wgan", "train", "--data-dir", "data"];
        argv.extend_from_slice(extra);
        match Cli::parse_from(argv).command {
            Command::Train(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn defaults_match_presets() {
        let config = load_or_create_config(&train_args(&[])).unwrap();
        assert_eq!(config.variant, Variant::Mnist);
        assert_eq!(config.batch_size, 64);
        assert_eq!(config.max_epochs(), 99_999);

        let config = load_or_create_config(&train_args(&["--variant", "cifar"])).unwrap();
        assert_eq!(config.max_epochs(), 1_000);
        assert!(!config.keep_epoch_snapshots);
    }

    #[test]
    fn overrides_apply_on_top_of_config_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("wgan.json");
        let path_str = path.to_str().unwrap();

        // First run writes the preset.
        load_or_create_config(&train_args(&["--config", path_str])).unwrap();
        assert!(path.is_file());

        let config = load_or_create_config(&train_args(&[
            "--config",
            path_str,
            "--batch-size",
            "16",
            "--max-epochs",
            "3",
            "--seed",
            "9",
        ]))
        .unwrap();
        assert_eq!(config.batch_size, 16);
        assert_eq!(config.max_epochs(), 3);
        assert_eq!(config.seed, Some(9));
    }

    #[test]
    fn sample_uses_training_config() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = WganConfig {
            latent_dim: 16,
            ..WganConfig::mnist()
        };
        let config_path = tmp.path().join("wgan.json");
        config.save(&config_path).unwrap();

        let dirs = OutputDirs::under(tmp.path());
        let trainer = Trainer::new(config, dirs.clone(), Device::Cpu).unwrap();
        trainer.save_checkpoint(&Default::default()).unwrap();

        let output = tmp.path().join("grid.png");
        let argv = [
            "wgan",
            "sample",
            "--cpu",
            "--count",
            "2",
            "--checkpoint-dir",
            dirs.checkpoint_dir.to_str().unwrap(),
            "--config",
            config_path.to_str().unwrap(),
            "--output",
            output.to_str().unwrap(),
        ];
        let args = match Cli::parse_from(argv).command {
            Command::Sample(args) => args,
            other => panic!("unexpected command {other:?}"),
        };
        assert_eq!(sample_config(&args).unwrap().latent_dim, 16);
        cmd_sample(args).unwrap();
        assert!(output.is_file());
    }

    #[test]
    fn losses_csv_layout() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("losses.csv");
        let g = vec![0.5f32];
        let r = vec![-0.25f32, -0.5];
        write_losses_csv(&path, &[("generator", &g), ("real", &r)]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "series,step,loss\ngenerator,0,0.5\nreal,0,-0.25\nreal,1,-0.5\n"
        );
    }
}
