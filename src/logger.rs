//! Logging initialization.
//!
//! `LoggerManager` validates the logging configuration and installs the
//! global `tracing` subscriber with up to three outputs: console, an
//! append-only log file and systemd journald. Each output gets its own
//! `EnvFilter`, taken from `RUST_LOG` when set and from the configured level
//! otherwise.

use std::{fs::OpenOptions, io, path::Path, sync::Mutex};

use thiserror::Error;
use tracing_subscriber::{
    fmt::{self, MakeWriter},
    prelude::*,
    EnvFilter, Layer, Registry,
};
use validator::{Validate, ValidationErrors};

use crate::{
    config::logger::{LogFormat, LoggerConfig},
    print_info, print_warn,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

#[derive(Error, Debug)]
pub enum LoggerError {
    /// The global subscriber could not be installed (usually: already set).
    #[error("Logger initialization error: {0}")]
    InitializationError(String),

    #[error("Logger configuration validation error: {0}")]
    ValidationError(#[from] ValidationErrors),

    /// Opening the log file or the journald socket failed.
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("No logging layers were configured or successfully initialized")]
    NoLayersConfigured,
}

/// Line layout shared by the console and file outputs.
struct LineStyle {
    format: LogFormat,
    ansi: bool,
    target: bool,
    thread_ids: bool,
}

pub struct LoggerManager {
    config: LoggerConfig,
}

impl LoggerManager {
    /// Validates `config` without touching the global subscriber.
    pub fn new(config: LoggerConfig) -> Result<Self, LoggerError> {
        config.validate()?;
        Ok(LoggerManager { config })
    }

    /// Installs the global subscriber. Call once at startup.
    ///
    /// A journald failure is only a warning as long as another output is
    /// active. A log file that cannot be opened is an error.
    pub fn init(&mut self) -> Result<(), LoggerError> {
        let layers = self.build_layers()?;
        tracing_subscriber::registry()
            .with(layers)
            .try_init()
            .map_err(|e| LoggerError::InitializationError(e.to_string()))
    }

    fn build_layers(&self) -> Result<Vec<BoxedLayer>, LoggerError> {
        let mut layers = Vec::new();

        if let Some(console) = self.config.console.as_ref().filter(|c| c.enabled) {
            let style = LineStyle {
                format: console.format,
                ansi: console.ansi_colors,
                target: console.show_target,
                thread_ids: console.show_thread_ids,
            };
            layers.push(fmt_layer(&style, io::stdout, self.filter()));
        }

        if let Some(file) = self.config.file.as_ref().filter(|f| f.enabled) {
            let writer = open_log_file(Path::new(&file.path))?;
            let style = LineStyle {
                format: file.format,
                ansi: false,
                target: true,
                thread_ids: false,
            };
            layers.push(fmt_layer(&style, writer, self.filter()));
            print_info!("Logging to file: {}", file.path);
        }

        if let Some(journald) = self.config.journald.as_ref().filter(|j| j.enabled) {
            match tracing_journald::layer() {
                Ok(layer) => {
                    let layer = layer.with_syslog_identifier(journald.identifier.clone());
                    layers.push(layer.with_filter(self.filter()).boxed());
                    print_info!(
                        "Systemd journald logger initialized with identifier: {}",
                        journald.identifier
                    );
                }
                Err(e) => {
                    print_warn!("Failed to initialize systemd journald logger: {}", e);
                }
            }
        }

        if layers.is_empty() {
            print_warn!("No logging layers were initialized. Please check your configuration.");
            return Err(LoggerError::NoLayersConfigured);
        }
        Ok(layers)
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.config.level))
    }
}

fn open_log_file(path: &Path) -> Result<Mutex<std::fs::File>, LoggerError> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(Mutex::new(file))
}

fn fmt_layer<W>(style: &LineStyle, writer: W, filter: EnvFilter) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let base = fmt::layer()
        .with_target(style.target)
        .with_thread_ids(style.thread_ids)
        .with_ansi(style.ansi)
        .with_writer(writer);

    match style.format {
        LogFormat::Json => base.json().with_filter(filter).boxed(),
        LogFormat::Pretty => base.pretty().with_filter(filter).boxed(),
        LogFormat::Compact => base.compact().with_filter(filter).boxed(),
    }
}
