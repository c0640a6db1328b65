use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use ephemeral_metrics::common::time::parse_duration;
use ephemeral_metrics::config::{init_global_settings, OutputFormat, Settings};
use ephemeral_metrics::host::{register_ephemeral_query, CallableRegistry, KeepAlive, EPHEMERAL_QUERY_FN};
use ephemeral_metrics::pipeline::{Reporter, TracingReporter};

/// Runs a PromQL range query over a throwaway in-memory head each time it is invoked.
///
/// Every line read from stdin names a registered function to invoke (`EphemeralQuery`).
#[derive(Parser, Debug)]
#[command(name = "ephemeral-query", version, about)]
struct Args {
    /// Path to a JSON settings file. Defaults to $EPHEMERAL_CONFIG, if set.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Expression evaluated on every invocation
    #[arg(short, long)]
    query: Option<String>,

    #[arg(long, value_parser = parse_duration)]
    step: Option<Duration>,

    #[arg(long, value_parser = parse_duration)]
    lookback_delta: Option<Duration>,

    #[arg(long, value_parser = parse_duration)]
    timeout: Option<Duration>,

    #[arg(long)]
    max_samples: Option<usize>,

    #[arg(short, long)]
    output: Option<OutputFormat>,

    /// Invoke the pipeline once and exit instead of waiting for call signals
    #[arg(long)]
    once: bool,
}

impl Args {
    fn settings(&self) -> anyhow::Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => {
                let mut settings = Settings::load_file(path)?;
                settings.apply_overrides(|name| std::env::var(name).ok())?;
                settings
            }
            None => Settings::from_env()?,
        };
        if let Some(query) = &self.query {
            settings.query = query.clone();
        }
        if let Some(step) = self.step {
            settings.default_step = step;
        }
        if let Some(lookback) = self.lookback_delta {
            settings.max_look_back = lookback;
        }
        if let Some(timeout) = self.timeout {
            settings.query_timeout = timeout;
        }
        if let Some(max_samples) = self.max_samples {
            settings.max_samples = max_samples;
        }
        if let Some(output) = self.output {
            settings.output_format = output;
        }
        settings.validate()?;
        Ok(settings)
    }
}

fn main() -> anyhow::Result<()> {
    // log level is taken from RUST_LOG
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(true)
        .init();

    let args = Args::parse();
    let settings = args.settings().context("failed to load settings")?;
    info!(query = settings.query.as_str(), step = ?settings.default_step, "settings loaded");
    init_global_settings(settings.clone());

    let registry = Arc::new(CallableRegistry::new());
    let reporter: Arc<dyn Reporter> = Arc::new(TracingReporter);
    register_ephemeral_query(&registry, settings, reporter);

    if args.once {
        registry.invoke(EPHEMERAL_QUERY_FN);
        return Ok(());
    }

    let keep_alive = Arc::new(KeepAlive::new());
    let host = {
        let registry = registry.clone();
        let keep_alive = keep_alive.clone();
        std::thread::Builder::new()
            .name("host".to_string())
            .spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    let name = match line {
                        Ok(line) => line.trim().to_string(),
                        Err(e) => {
                            warn!("failed to read call signal: {e}");
                            break;
                        }
                    };
                    if name.is_empty() {
                        continue;
                    }
                    if !registry.invoke(&name) {
                        warn!("unknown function \"{name}\", registered: {:?}", registry.names());
                    }
                }
                keep_alive.release();
            })
            .context("failed to start host thread")?
    };

    info!("waiting for call signals on stdin");
    keep_alive.park();
    if host.join().is_err() {
        anyhow::bail!("host thread panicked");
    }
    Ok(())
}
