//! `throttle` fires a fixed number of HTTP requests at an endpoint while
//! never running more than a configured number of them at once.
//!
//! The binary is a thin wrapper around throttle-lib, which provides the
//! admission gate, the backpressure pipeline, per-host locks and the snapshot
//! cache used here.
//!
//! Send 100 requests, at most 8 at a time, and give up after 30 seconds:
//! ```sh
//! throttle
//! ```
//!
//! Hit a local service through a bounded queue drained by 4 consumers:
//! ```sh
//! throttle --mode pipeline -c 4 --queue-capacity 16 -n 1000 -u "http://localhost:8080/items/{i}"
//! ```
//!
//! Print the summary as JSON:
//! ```sh
//! throttle --format json
//! ```
#![warn(clippy::all, clippy::pedantic)]
#![warn(
    absolute_paths_not_starting_with_crate,
    rustdoc::invalid_html_tags,
    missing_copy_implementations,
    missing_debug_implementations,
    semicolon_in_expressions_from_macros,
    unreachable_pub,
    unused_extern_crates,
    variant_size_differences,
    clippy::missing_const_for_fn
)]
#![deny(anonymous_parameters, macro_use_extern_crate)]
#![deny(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::Parser;
use formatters::{get_stats_formatter, log::init_logging};
use log::{error, info, warn};
use throttle_lib::{CancelSignal, ClientBuilder};

mod commands;
mod formatters;
mod options;
mod stats;
mod verbosity;

use crate::{
    commands::{Completion, Job},
    options::{Config, Mode, THROTTLE_CONFIG_FILE, ThrottleOptions, load_targets},
    stats::RunSummary,
};

/// A C-like enum that can be cast to `i32` and used as process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitCode {
    Success = 0,
    // NOTE: exit code 1 is used for any `Result::Err` bubbled up to `main()`
    // using the `?` operator.
    #[allow(unused)]
    UnexpectedFailure = 1,
    RequestFailure = 2,
    ConfigFile = 3,
    Canceled = 4,
}

fn main() -> Result<()> {
    // std::process::exit doesn't guarantee that all destructors will be run,
    // therefore we wrap the main code in another function to ensure that.
    // See: https://doc.rust-lang.org/stable/std/process/fn.exit.html
    let exit_code = run_main()?;
    std::process::exit(exit_code);
}

/// Merge all provided config options into one.
/// This includes a potential config file and command-line arguments.
fn load_config() -> Result<ThrottleOptions> {
    let mut opts = ThrottleOptions::parse();

    let merged = merge_config_file(&mut opts.config, opts.config_file.as_deref());

    // A config file that failed to load leaves the command-line verbosity in place
    init_logging(opts.config.verbose);

    merged?;
    opts.config.validate()?;
    Ok(opts)
}

/// Load a potentially existing config file and merge it into the config from
/// the CLI
fn merge_config_file(config: &mut Config, config_file: Option<&Path>) -> Result<()> {
    if let Some(config_file) = config_file {
        match Config::load_from_file(config_file) {
            Ok(c) => config.merge(c),
            Err(e) => {
                bail!(
                    "Cannot load configuration file `{}`: {e:?}",
                    config_file.display()
                );
            }
        }
    } else {
        // Without an explicit config file, the default one is only used if it
        // exists. An invalid default file is still an error.
        let default_config = PathBuf::from(THROTTLE_CONFIG_FILE);
        if default_config.is_file() {
            match Config::load_from_file(&default_config) {
                Ok(c) => config.merge(c),
                Err(e) => {
                    bail!(
                        "Cannot load default configuration file `{}`: {e:?}",
                        default_config.display()
                    );
                }
            }
        }
    }
    Ok(())
}

/// Set up runtime and call throttle entrypoint
fn run_main() -> Result<i32> {
    use std::process::exit;

    let opts = match load_config() {
        Ok(opts) => opts,
        Err(e) => {
            error!(
                "Error while loading config: {e} (throttle {})",
                env!("CARGO_PKG_VERSION")
            );
            exit(ExitCode::ConfigFile as i32);
        }
    };

    let runtime = match opts.config.threads {
        Some(threads) => {
            // We define our own runtime instead of the `tokio::main` attribute
            // since we want to make the number of threads configurable
            tokio::runtime::Builder::new_multi_thread()
                .worker_threads(threads)
                .enable_all()
                .build()?
        }
        None => tokio::runtime::Runtime::new()?,
    };

    runtime.block_on(run(&opts.config))
}

/// Run all requests and print the summary
async fn run(cfg: &Config) -> Result<i32> {
    let client = ClientBuilder::builder()
        .user_agent(cfg.user_agent.clone())
        .allow_insecure(cfg.insecure)
        .build()
        .client()
        .context("Cannot create HTTP client")?;

    let mut job = Job::new(client, cfg.url.clone()).per_host(cfg.per_host);
    if let Some(path) = &cfg.targets {
        match load_targets(path) {
            Ok(targets) => job = job.targets(targets),
            Err(e) => {
                error!("{e:#}");
                return Ok(ExitCode::ConfigFile as i32);
            }
        }
    }
    let job = Arc::new(job);

    // Fires on Ctrl+C or once the global deadline has elapsed
    let signal = CancelSignal::with_deadline(cfg.deadline());
    tokio::spawn({
        let signal = signal.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Received Ctrl+C, canceling");
                signal.fire();
            }
        }
    });

    // Stops background work once the requests are done
    let background = signal.child();
    if let (Some(path), Some(interval)) = (&cfg.targets, cfg.refresh_targets) {
        tokio::spawn(Arc::clone(&job).refresh_targets(
            path.clone(),
            interval,
            background.clone(),
        ));
    }

    info!(
        "Starting with concurrency={}, total={}, timeout={}s, mode={}",
        cfg.concurrency, cfg.total, cfg.timeout, cfg.mode
    );
    info!("URL template: {}", cfg.url);

    let start = Instant::now();
    let completion = match cfg.mode {
        Mode::Gate => commands::gate(Arc::clone(&job), cfg.total, cfg.concurrency, &signal).await?,
        Mode::Pipeline => {
            commands::pipeline(
                Arc::clone(&job),
                cfg.total,
                cfg.queue_capacity(),
                cfg.concurrency,
                &signal,
            )
            .await?
        }
    };
    background.fire();

    let summary = RunSummary::new(
        job.tally.snapshot(),
        &job.latencies,
        start.elapsed(),
        completion == Completion::Canceled,
    );
    let formatter = get_stats_formatter(cfg.format);
    println!("{}", formatter.format(&summary)?);

    let exit_code = if summary.canceled {
        ExitCode::Canceled
    } else if summary.is_success() {
        ExitCode::Success
    } else {
        ExitCode::RequestFailure
    };
    Ok(exit_code as i32)
}
