use anyhow::Context;
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Installs the global subscriber. `RUST_LOG` directives take precedence
/// over the configured level.
pub fn init(cfg: &Config) -> anyhow::Result<()> {
    let level: LevelFilter = cfg
        .effective_log_level()
        .parse()
        .with_context(|| format!("bad log level {:?}", cfg.effective_log_level()))?;
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let writer = match &cfg.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(true);
    let installed = if cfg.log_json {
        builder.json().try_init()
    } else {
        builder.with_ansi(cfg.log_file.is_none()).try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("logging already initialized: {}", e))
}
