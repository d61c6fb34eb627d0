use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use countae::{logging, Config, DeviceType, DEFAULT_OUTPUT_DIR};
use tracing::info;

#[derive(Parser)]
#[command(name = "countae")]
#[command(about = "Train zero-inflated negative binomial autoencoders on count matrices", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Preprocess a genes x cells table and train an autoencoder on it
    Train(TrainArgs),

    /// Validate a configuration file, or write a default one
    Config {
        /// Configuration file (JSON or YAML)
        #[arg(short, long)]
        file: PathBuf,

        /// Write the default configuration instead of validating
        #[arg(long)]
        init: bool,
    },

    /// Show build information
    Info,
}

#[derive(Args)]
struct TrainArgs {
    /// Count table (genes in rows, cells in columns) or a 10x .h5 matrix
    input: PathBuf,

    /// Configuration file (JSON or YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for checkpoints, event logs and the loss history
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Optimizer (sgd, rmsprop, adagrad, adadelta, adam, adamax, nadam)
    #[arg(long)]
    optimizer: Option<String>,

    /// Learning rate
    #[arg(short, long)]
    learning_rate: Option<f64>,

    /// Maximum number of epochs
    #[arg(short, long)]
    epochs: Option<usize>,

    /// Mini-batch size
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Early stopping patience
    #[arg(long)]
    early_stop: Option<usize>,

    /// Learning-rate reduction patience
    #[arg(long)]
    reduce_lr: Option<usize>,

    /// Checkpoint the best weights into the output directory
    #[arg(long)]
    save_weights: bool,

    /// Write an event log into <output_dir>/tb
    #[arg(long)]
    tensorboard: bool,

    /// Worker threads
    #[arg(short, long, env = "COUNTAE_THREADS")]
    threads: Option<usize>,

    /// Device to use (cpu, cuda[:N], metal[:N])
    #[arg(long)]
    device: Option<String>,

    /// Seed for the split and the batch shuffling
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose, cli.quiet, cli.json_logs)?;

    match cli.command {
        Commands::Train(args) => train(args),
        Commands::Config { file, init } => {
            if init {
                write_default_config(file)
            } else {
                validate_config(file)
            }
        }
        Commands::Info => {
            show_system_info();
            Ok(())
        }
    }
}

fn parse_device(spec: &str) -> Result<DeviceType> {
    let (kind, ordinal) = match spec.split_once(':') {
        Some((kind, ordinal)) => (
            kind,
            ordinal
                .parse::<usize>()
                .with_context(|| format!("invalid device ordinal in '{}'", spec))?,
        ),
        None => (spec, 0),
    };
    match kind.to_ascii_lowercase().as_str() {
        "cpu" => Ok(DeviceType::Cpu),
        "cuda" => Ok(DeviceType::Cuda(ordinal)),
        "metal" => Ok(DeviceType::Metal(ordinal)),
        other => bail!("unknown device '{}'", other),
    }
}

fn train(args: TrainArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load configuration file {}", path.display()))?,
        None => Config::default(),
    };

    let training = &mut config.training;
    if let Some(name) = &args.optimizer {
        training.optimizer = name.parse()?;
    }
    if args.learning_rate.is_some() {
        training.learning_rate = args.learning_rate;
    }
    if let Some(epochs) = args.epochs {
        training.epochs = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        training.batch_size = batch_size;
    }
    if args.early_stop.is_some() {
        training.early_stop = args.early_stop;
    }
    if args.reduce_lr.is_some() {
        training.reduce_lr = args.reduce_lr;
    }
    training.save_weights |= args.save_weights;
    training.tensorboard |= args.tensorboard;
    if let Some(dir) = args.output_dir {
        training.output_dir = Some(dir);
    }
    if training.output_dir.is_none() && (training.save_weights || training.tensorboard) {
        training.output_dir = Some(PathBuf::from(DEFAULT_OUTPUT_DIR));
    }

    if args.threads.is_some() {
        config.runtime.threads = args.threads;
    }
    if let Some(device) = &args.device {
        config.runtime.device = parse_device(device)?;
    }
    if let Some(seed) = args.seed {
        config.runtime.seed = seed;
        config.data.seed = seed;
    }

    info!("Training on {}", args.input.display());
    let outcome = countae::run(&config, &args.input)
        .with_context(|| format!("Training failed for {}", args.input.display()))?;

    let history = &outcome.history;
    match history.loss().last() {
        Some(loss) => info!("Final loss after {} epochs: {:.4}", history.len(), loss),
        None => info!("No epoch completed"),
    }

    if let Some(dir) = &config.training.output_dir {
        fs::create_dir_all(dir).context("Failed to create output directory")?;
        let path = dir.join("history.json");
        let json = serde_json::to_string_pretty(history).context("Failed to serialize history")?;
        fs::write(&path, json).context("Failed to write history")?;
        info!("Loss history saved to {}", path.display());
    }
    Ok(())
}

fn write_default_config(path: PathBuf) -> Result<()> {
    Config::default()
        .to_file(&path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Default configuration written to {}", path.display());
    Ok(())
}

fn validate_config(path: PathBuf) -> Result<()> {
    info!("Validating configuration file: {}", path.display());
    let config = Config::from_file(&path).context("Failed to load configuration file")?;

    info!("Configuration is valid");
    info!("  - Hidden sizes: {:?}", config.model.hidden_sizes);
    info!(
        "  - Optimizer: {} (lr {})",
        config.training.optimizer,
        config.training.effective_learning_rate()
    );
    info!(
        "  - Epochs: {}, batch size: {}",
        config.training.epochs, config.training.batch_size
    );
    info!("  - Test fraction: {}", config.data.test_fraction);
    Ok(())
}

fn show_system_info() {
    println!("countae {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Checkpoint format: {}", countae::training::WEIGHTS_FILE_NAME);
    println!("Optimizers: {}", countae::OptimizerKind::ALL.map(|k| k.as_str()).join(", "));
    println!();
    println!("Hardware support:");

    #[cfg(feature = "cuda")]
    println!("  CUDA: yes");
    #[cfg(not(feature = "cuda"))]
    println!("  CUDA: not compiled");

    #[cfg(feature = "metal")]
    println!("  Metal: yes");
    #[cfg(not(feature = "metal"))]
    println!("  Metal: not compiled");

    #[cfg(feature = "accelerate")]
    println!("  Accelerate: yes");
    #[cfg(not(feature = "accelerate"))]
    println!("  Accelerate: not compiled");

    println!("  CPU threads: {}", num_cpus::get());
    println!();
    println!("Usage:");
    println!("  countae train counts.csv -o result --save-weights");
    println!("  countae config -f run.yaml --init");
    println!("  countae info");
}
