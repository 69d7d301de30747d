//! Logging initialization: file-only, never to the terminal, so the REPL's
//! stdout stays clean for prompts and replies.
//!
//! Reads `LOG_LEVEL` (filter) and writes to `<LOG_DIR>/hatch.log` (append).
//! Every formatted line is also mirrored into an in-memory ring buffer so
//! the `show_logs [N]` command can serve recent lines without re-reading
//! the file from disk.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Mutex};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use hatch_core::Settings;

/// Caps how many recently-formatted log lines are kept in memory for
/// `show_logs`. Independent of the on-disk file, which is never truncated.
const RING_BUFFER_CAPACITY: usize = 2000;

/// Shared, lock-guarded tail of recently emitted log lines.
#[derive(Debug, Default)]
pub struct LogBuffer {
    lines: Mutex<VecDeque<String>>,
}

impl LogBuffer {
    fn push_line(&self, line: String) {
        let mut lines = self.lines.lock().expect("log buffer mutex poisoned");
        lines.push_back(line);
        while lines.len() > RING_BUFFER_CAPACITY {
            lines.pop_front();
        }
    }

    /// Returns up to the last `n` lines, oldest first.
    pub fn tail(&self, n: usize) -> Vec<String> {
        let lines = self.lines.lock().expect("log buffer mutex poisoned");
        let skip = lines.len().saturating_sub(n);
        lines.iter().skip(skip).cloned().collect()
    }
}

/// Initializes tracing so every event is appended to `<LOG_DIR>/hatch.log`
/// and mirrored into the returned [`LogBuffer`]. Never writes to stdout.
pub fn init(settings: &Settings) -> Result<Arc<LogBuffer>, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(&settings.log_dir)?;
    let log_path = settings.log_dir.join("hatch.log");
    let file = std::fs::OpenOptions::new().create(true).append(true).open(&log_path)?;

    let filter = tracing_subscriber::EnvFilter::try_new(&settings.log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let buffer = Arc::new(LogBuffer::default());
    let writer = Mutex::new(TeeWriter::new(file, buffer.clone()));
    let file_layer = tracing_subscriber::fmt::layer()
        .event_format(crate::log_format::TextWithSpanIds::new())
        .with_writer(writer)
        .with_ansi(false)
        .with_filter(filter);

    tracing_subscriber::registry().with(file_layer).init();
    tracing::info!(path = %log_path.display(), "hatch logging initialized");
    Ok(buffer)
}

/// Writes formatted events to the log file and appends completed lines to
/// the in-memory ring buffer, stripping any stray ANSI escape sequences
/// (formatted `Debug` output of colored error types can carry them even with
/// the formatter's own `with_ansi(false)`).
struct TeeWriter {
    file: std::fs::File,
    buffer: Arc<LogBuffer>,
    pending: String,
    ansi_state: Vec<u8>,
}

impl TeeWriter {
    fn new(file: std::fs::File, buffer: Arc<LogBuffer>) -> Self {
        Self { file, buffer, pending: String::new(), ansi_state: Vec::new() }
    }

    fn feed_clean(&mut self, text: &str) {
        for ch in text.chars() {
            if ch == '\n' {
                let line = std::mem::take(&mut self.pending);
                self.buffer.push_line(line);
            } else {
                self.pending.push(ch);
            }
        }
    }
}

impl Write for TeeWriter {
    fn write(&mut self, mut buf: &[u8]) -> std::io::Result<usize> {
        let len = buf.len();
        self.file.write_all(buf)?;

        let mut clean = Vec::with_capacity(buf.len());
        while !buf.is_empty() {
            if self.ansi_state.is_empty() {
                if let Some(i) = buf.iter().position(|&b| b == 0x1b) {
                    clean.extend_from_slice(&buf[..i]);
                    buf = &buf[i..];
                    self.ansi_state.push(buf[0]);
                    buf = &buf[1..];
                } else {
                    clean.extend_from_slice(buf);
                    break;
                }
            } else if self.ansi_state.len() == 1 {
                self.ansi_state.push(buf[0]);
                buf = &buf[1..];
                if self.ansi_state[1] != b'[' {
                    self.ansi_state.clear();
                }
            } else {
                let b = buf[0];
                buf = &buf[1..];
                let is_csi_final = (0x40..=0x7e).contains(&b);
                let is_csi_param = b == b'[' || b == b'?' || b == b';' || b.is_ascii_digit();
                if is_csi_final {
                    self.ansi_state.clear();
                } else if is_csi_param || b == b':' {
                    self.ansi_state.push(b);
                    if self.ansi_state.len() > 64 {
                        self.ansi_state.clear();
                    }
                } else {
                    self.ansi_state.clear();
                    clean.push(b);
                }
            }
        }

        self.feed_clean(&String::from_utf8_lossy(&clean));
        Ok(len)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}
