//! Command-line entry point: argument validation, verifier discovery,
//! skip-list initialization, and the exit-status protocol.

use std::io;
use std::path::PathBuf;
use std::process::exit;

use clap::Parser;
use rayon::ThreadPoolBuilder;

use archive_pwbf::bloom::{FilterError, SkipFilter};
use archive_pwbf::config::{Config, Mode};
use archive_pwbf::engine::{Engine, Outcome};
use archive_pwbf::enumerate;
use archive_pwbf::error::LaunchError;
use archive_pwbf::status;
use archive_pwbf::verify::{self, SevenZipVerifier};

/// Target false-positive rate for a freshly constructed skip list.
const SKIP_FILTER_FP_RATE: f64 = 0.01;
/// Skip lists needing more than 4 GiB of bits are refused.
const MAX_FILTER_BITS: u64 = 4 * 1024 * 1024 * 1024 * 8;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Ordered characters admissible in wildcard positions
    charset: String,

    /// Shortest password length to try
    min_length: usize,

    /// Longest password length to try
    max_length: usize,

    /// Path to the encrypted archive
    archive_path: PathBuf,

    /// Candidate ordering: ascending, descending, or random
    // A plain string: a misspelling must surface as a status line with exit
    // code 2, not as a clap usage error on stderr.
    mode: String,

    /// Skip-list file recording already-rejected candidates
    #[arg(short = 's', long = "skip-file", value_name = "PATH")]
    skip_file: Option<PathBuf>,

    /// Seconds between mid-run skip-list saves (0 disables)
    #[arg(
        short = 'c',
        long = "checkpoint-interval",
        value_name = "SECONDS",
        default_value_t = 0,
        allow_negative_numbers = true
    )]
    checkpoint_interval: i64,

    /// Template for candidate shape: `?` one charset char, `*` a run of
    /// them, `\` escapes the next character
    #[arg(short = 'p', long = "pattern", value_name = "PATTERN")]
    pattern: Option<String>,

    #[arg(
        trailing_var_arg = true,
        allow_hyphen_values = true,
        hide = true,
        num_args = 0..
    )]
    extra: Vec<String>,
}

fn main() {
    let cli = Cli::parse();
    match run(cli) {
        Ok(Outcome::Found(password)) => {
            status::found(&password);
            status::info("password found");
            exit(0);
        }
        Ok(_) => {
            status::info("password not found within the specified constraints");
            exit(1);
        }
        Err(err) => {
            status::error(&err.to_string());
            exit(err.exit_code());
        }
    }
}

fn run(cli: Cli) -> Result<Outcome, LaunchError> {
    for arg in &cli.extra {
        status::warn(&format!("ignoring unknown or misplaced argument `{arg}`"));
    }
    let config = validate(&cli)?;

    let verifier_path = verify::locate_verifier()?;
    status::info(&format!("using verifier: {}", verifier_path.display()));

    let filter = if config.skip_file.is_some() {
        init_filter(&config)
    } else {
        status::info("skip list feature not requested");
        None
    };

    let threads = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let pool = ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .unwrap_or_else(|err| {
            status::fatal(&format!("failed to build the worker pool: {err}"));
            exit(2);
        });

    let verifier = SevenZipVerifier::new(verifier_path, config.archive.clone());
    let mut engine = Engine::new(&config, &verifier, &pool, filter);
    Ok(engine.run())
}

fn validate(cli: &Cli) -> Result<Config, LaunchError> {
    let charset: Vec<char> = cli.charset.chars().collect();
    if charset.is_empty() {
        return Err(LaunchError::InvalidArguments(
            "charset must not be empty".into(),
        ));
    }
    if cli.min_length == 0 {
        return Err(LaunchError::InvalidArguments(
            "min_length must be at least 1".into(),
        ));
    }
    if cli.min_length > cli.max_length {
        return Err(LaunchError::InvalidArguments(format!(
            "min_length ({}) cannot be greater than max_length ({})",
            cli.min_length, cli.max_length
        )));
    }
    let mode: Mode = cli.mode.parse().map_err(LaunchError::InvalidArguments)?;

    let checkpoint_interval = if cli.checkpoint_interval < 0 {
        status::warn("checkpoint interval cannot be negative, disabling checkpoints");
        0
    } else {
        cli.checkpoint_interval as u64
    };
    if let Some(pattern) = &cli.pattern {
        status::info(&format!("using pattern: {pattern}"));
    }

    Ok(Config {
        charset,
        min_length: cli.min_length,
        max_length: cli.max_length,
        archive: cli.archive_path.clone(),
        mode,
        pattern: cli.pattern.clone(),
        skip_file: cli.skip_file.clone(),
        checkpoint_interval,
    })
}

/// Loads the configured skip list, or sizes and builds a fresh one. Any
/// failure degrades to a disabled filter: the search still runs, it just
/// cannot persist its progress.
fn init_filter(config: &Config) -> Option<SkipFilter> {
    let path = config.skip_file.as_ref()?;
    status::info(&format!("skip list enabled, file: {}", path.display()));
    if config.checkpoint_interval > 0 {
        status::info(&format!(
            "checkpoint interval: {} seconds",
            config.checkpoint_interval
        ));
    } else {
        status::info("periodic checkpointing disabled, skip list saved only on exit");
    }

    match SkipFilter::load(path) {
        Ok(filter) => {
            status::info(&format!(
                "loaded existing skip list ({} bits, {} hashes)",
                filter.num_bits(),
                filter.num_hashes()
            ));
            return Some(filter);
        }
        Err(FilterError::Io(err)) if err.kind() == io::ErrorKind::NotFound => {
            status::info("no existing skip list, creating a new one");
        }
        Err(err) => {
            status::warn(&format!(
                "existing skip list is unusable ({err}), creating a new one"
            ));
        }
    }

    let charset_size = config.charset.len() as u64;
    let mut estimated: u64 = 0;
    for length in config.min_length..=config.max_length {
        let Some(total) = enumerate::combinations_for_length(charset_size, length)
            .and_then(|count| estimated.checked_add(count))
        else {
            status::error(&format!(
                "estimated candidate count overflows at length {length}, skip list disabled for this run"
            ));
            return None;
        };
        estimated = total;
    }
    if estimated == 0 {
        status::warn("estimated zero candidates, skip list disabled for this run");
        return None;
    }

    let bits = SkipFilter::optimal_bits(estimated, SKIP_FILTER_FP_RATE);
    if bits > MAX_FILTER_BITS {
        status::error(&format!(
            "skip list would need {} MiB, over the {} MiB limit; disabled for this run",
            bits.div_ceil(8) / (1024 * 1024),
            MAX_FILTER_BITS / 8 / (1024 * 1024)
        ));
        return None;
    }
    status::info(&format!(
        "initializing skip list for about {estimated} candidates at {:.2}% false-positive rate (~{} MiB)",
        SKIP_FILTER_FP_RATE * 100.0,
        bits.div_ceil(8) / (1024 * 1024)
    ));
    match SkipFilter::with_capacity(estimated, SKIP_FILTER_FP_RATE) {
        Ok(filter) => {
            status::info(&format!(
                "new skip list created ({} bits, {} hashes)",
                filter.num_bits(),
                filter.num_hashes()
            ));
            Some(filter)
        }
        Err(err) => {
            status::error(&format!(
                "failed to create the skip list ({err}), disabled for this run"
            ));
            None
        }
    }
}
