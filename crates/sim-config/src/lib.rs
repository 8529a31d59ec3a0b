//! CLI parsing, `RunConfig` assembly, logging, and panic-hook installation.

use std::path::PathBuf;
use std::sync::Once;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid arguments: {0}")]
    Args(#[from] clap::Error),
}

/// CLI arguments for the simulator driver.
#[derive(Parser, Debug)]
#[command(name = "sim", version, about = "Distributed particle-motion simulator")]
pub struct Args {
    /// Agent pin file: one `sx,sy,gx,gy` record per line.
    #[arg(short = 'p', long = "pin-file")]
    pub pin_file: Option<PathBuf>,

    /// Number of agents declared in the pin file (must match its line count).
    #[arg(short = 'y', long = "pin-count", default_value_t = 0)]
    pub pin_count: usize,

    /// Additional random-agent count (default 2 with no pin file, else 0).
    #[arg(short = 'r', long = "random-count")]
    pub random_count: Option<usize>,

    /// Map file.
    #[arg(short = 'c', long = "map", default_value = "map.cfg")]
    pub map: PathBuf,

    /// Snapshot sink; omit for stdout.
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Step limit (0 = infinite). Defaults to 1000 when `--output` is set.
    #[arg(short = 't', long = "steps")]
    pub steps: Option<u64>,

    /// Rank count: must be a perfect square of a power of two.
    #[arg(short = 'n', long = "ranks", default_value_t = 1)]
    pub ranks: usize,

    /// RNG seed. Defaults to a value derived from system time.
    #[arg(long = "seed")]
    pub seed: Option<u64>,
}

/// Parses `Args` from the process's actual command line. Help/version
/// requests are handled by clap directly (exit 0); any other parse failure
/// is returned as a [`ConfigError`] for the caller to map to exit code 1.
pub fn parse_args() -> Result<Args, ConfigError> {
    match Args::try_parse() {
        Ok(args) => Ok(args),
        Err(e)
            if matches!(
                e.kind(),
                clap::error::ErrorKind::DisplayHelp
                    | clap::error::ErrorKind::DisplayVersion
                    | clap::error::ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
            ) =>
        {
            e.exit();
        }
        Err(e) => Err(ConfigError::Args(e)),
    }
}

/// Fully resolved, immutable run configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub pin_file: Option<PathBuf>,
    pub pin_count: usize,
    pub random_count: usize,
    pub map_path: PathBuf,
    pub output: Option<PathBuf>,
    pub steps: u64,
    pub ranks: usize,
    pub seed: u64,
}

impl RunConfig {
    /// Resolves context-dependent defaults and logs the resolved values:
    /// computed once, logged once, then treated as immutable for the run.
    pub fn apply_context(args: Args) -> Self {
        let random_count = args.random_count.unwrap_or(if args.pin_file.is_some() {
            0
        } else {
            2
        });
        let steps = args.steps.unwrap_or(if args.output.is_some() { 1000 } else { 0 });
        let seed = args.seed.unwrap_or_else(default_seed);

        let config = Self {
            pin_file: args.pin_file,
            pin_count: args.pin_count,
            random_count,
            map_path: args.map,
            output: args.output,
            steps,
            ranks: args.ranks,
            seed,
        };

        tracing::info!(
            target: "config",
            ranks = config.ranks,
            steps = config.steps,
            random_count = config.random_count,
            seed = config.seed,
            map = %config.map_path.display(),
            "resolved run configuration"
        );

        config
    }
}

fn default_seed() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(42)
}

/// Installs a non-blocking, rolling-never file appender plus an
/// `EnvFilter`-driven `tracing` subscriber. Safe to call more than once
/// (e.g. from tests): a second install is a no-op, not a panic.
pub fn configure_logging() -> Option<WorkerGuard> {
    let log_path = PathBuf::from("sim.log");
    let file_appender = tracing_appender::rolling::never(".", &log_path);
    let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);

    match tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(nb_writer)
        .try_init()
    {
        Ok(()) => Some(guard),
        Err(_) => None,
    }
}

/// Installs a panic hook, once per process, that logs via `tracing::error!`
/// before delegating to the default hook — so a panicking rank's worker
/// thread leaves a trace before the process aborts.
pub fn install_panic_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let default_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            tracing::error!(target: "runtime.panic", ?info, "panic");
            default_panic(info);
        }));
    });
}
