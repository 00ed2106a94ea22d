//! Logging bootstrap.
//!
//! Stdout always gets a `tracing` fmt layer (ANSI per `print-colors`).
//! `verbose:logfile FILE` adds a plain transcript layer; a `.html` extension
//! switches it to an HTML transcript with one escaped line per log event.
//! `RUST_LOG` takes precedence over the `verbose` flag for filtering.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::DaemonConfig;

/// Install the global subscriber for the daemon process.
pub fn init(config: &DaemonConfig) -> Result<()> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(spec) if !spec.is_empty() => EnvFilter::new(spec),
        _ if config.verbose => EnvFilter::new("debug"),
        _ => EnvFilter::new("info"),
    };

    let stdout_layer = tracing_subscriber::fmt::layer().with_ansi(config.print_colors);

    let transcript_layer = match &config.log_file {
        None => None,
        Some(path) => {
            let writer = transcript_writer(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(writer),
            )
        }
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(transcript_layer)
        .init();
    Ok(())
}

fn transcript_writer(path: &Path) -> io::Result<BoxMakeWriter> {
    if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("html")) {
        Ok(BoxMakeWriter::new(Mutex::new(HtmlWriter::create(path)?)))
    } else {
        Ok(BoxMakeWriter::new(Mutex::new(File::create(path)?)))
    }
}

/// Writes log lines as an HTML transcript. The document header goes out on
/// create, the footer on drop; each `write` call is one formatted event.
pub struct HtmlWriter {
    file: File,
}

impl HtmlWriter {
    pub fn create(path: &Path) -> io::Result<Self> {
        let mut file = File::create(path)?;
        file.write_all(
            b"<!DOCTYPE html>\n<html>\n<head>\n\
              <title>Depot Daemon Protocol History</title>\n\
              <style>body { font-family: monospace; } p { margin: 0; }</style>\n\
              </head>\n<body>\n",
        )?;
        Ok(Self { file })
    }
}

impl Write for HtmlWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for line in String::from_utf8_lossy(buf).lines() {
            self.file.write_all(b"<p>")?;
            self.file.write_all(escape(line).as_bytes())?;
            self.file.write_all(b"</p>\n")?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Drop for HtmlWriter {
    fn drop(&mut self) {
        let _ = self.file.write_all(b"</body>\n</html>\n");
        let _ = self.file.flush();
    }
}

fn escape(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    for c in line.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────
