//! ## relay-telemetry::logging
//! **Two append-mode text sinks behind `tracing`**
//!
//! - the trace sink receives every event allowed by the env filter;
//! - the error sink receives `ERROR` events plus verbatim diagnostic lines
//!   written through [`SinkFile::append_line`].
//!
//! Sinks are closeable: after [`LogSinks::close`] every later write is dropped, so
//! teardown can release the files while the global subscriber is still installed.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to open log sink {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("global subscriber already installed: {0}")]
    Install(String),
}

/// One append-mode log file that can be closed while handles to it are alive.
#[derive(Debug)]
pub struct SinkFile {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl SinkFile {
    pub fn open_append<P: AsRef<Path>>(path: P) -> Result<Arc<Self>, TelemetryError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| TelemetryError::Open {
                path: path.clone(),
                source,
            })?;

        Ok(Arc::new(Self {
            path,
            file: Mutex::new(Some(file)),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `bytes` as one line, adding the newline when missing.
    ///
    /// The line is written with a single `write_all` so concurrent writers on the
    /// same file never interleave within it. Writes after `close` are dropped.
    pub fn append_line(&self, bytes: &[u8]) -> io::Result<()> {
        let mut line = Vec::with_capacity(bytes.len() + 1);
        line.extend_from_slice(bytes);
        if line.last() != Some(&b'\n') {
            line.push(b'\n');
        }
        self.write_raw(&line)
    }

    fn write_raw(&self, bytes: &[u8]) -> io::Result<()> {
        match self.file.lock().as_mut() {
            Some(file) => file.write_all(bytes),
            None => Ok(()),
        }
    }

    /// Flushes and releases the file. Closing twice is a no-op.
    pub fn close(&self) -> io::Result<()> {
        match self.file.lock().take() {
            Some(mut file) => {
                file.flush()?;
                file.sync_data()
            }
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.file.lock().is_none()
    }
}

/// `io::Write` adapter handed to `tracing_subscriber::fmt` per event.
pub struct SinkWriter(Arc<SinkFile>);

impl Write for SinkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write_raw(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Clone)]
struct SinkMakeWriter(Arc<SinkFile>);

impl<'a> MakeWriter<'a> for SinkMakeWriter {
    type Writer = SinkWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SinkWriter(self.0.clone())
    }
}

/// The trace and error sinks of one relay run.
#[derive(Debug, Clone)]
pub struct LogSinks {
    trace: Arc<SinkFile>,
    errors: Arc<SinkFile>,
}

impl LogSinks {
    pub fn open<P: AsRef<Path>, Q: AsRef<Path>>(
        trace_path: P,
        error_path: Q,
    ) -> Result<Self, TelemetryError> {
        Ok(Self {
            trace: SinkFile::open_append(trace_path)?,
            errors: SinkFile::open_append(error_path)?,
        })
    }

    pub fn trace(&self) -> &Arc<SinkFile> {
        &self.trace
    }

    pub fn errors(&self) -> &Arc<SinkFile> {
        &self.errors
    }

    /// Closes both sinks, reporting the first failure after attempting both.
    pub fn close(&self) -> io::Result<()> {
        let trace = self.trace.close();
        let errors = self.errors.close();
        trace.and(errors)
    }
}

#[derive(Clone)]
pub struct EventLogger;

impl EventLogger {
    /// Installs the global subscriber writing to `sinks`.
    ///
    /// `default_level` applies to the trace sink when `RUST_LOG` is unset; the error
    /// sink always receives `ERROR` events only.
    pub fn init(sinks: &LogSinks, default_level: &str) -> Result<(), TelemetryError> {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_level));

        let trace_layer = fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(SinkMakeWriter(sinks.trace.clone()))
            .with_filter(filter);

        let error_layer = fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(SinkMakeWriter(sinks.errors.clone()))
            .with_filter(LevelFilter::ERROR);

        tracing_subscriber::registry()
            .with(trace_layer)
            .with(error_layer)
            .try_init()
            .map_err(|e| TelemetryError::Install(e.to_string()))
    }
}
