//! Synchronous protocol log file writer.
//!
//! Entries append to `Log-Protocol-<timestamp>.log` under the configured
//! directory. The file and directory are created lazily on first write.
//! Write failures never propagate: they are logged and the entry is dropped
//! from disk, but the [`LogLine`] broadcast still fires so in-memory
//! consumers see every entry.
//!
//! Entry format (consumed by the tailer):
//!
//! ```text
//! 2025-03-01 12:00:00.123 [TX] START READ
//! HEX: 02 53 52 03
//! --------------------------------------------------------------------------------
//! ```

use super::LogLine;
use chrono::Local;
use log::{debug, warn};
use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

/// Hex dumps wrap after this many bytes.
pub const HEX_WRAP: usize = 16;
/// Width of the separator line between entries.
pub const SEPARATOR_WIDTH: usize = 80;

const BROADCAST_CAPACITY: usize = 1024;

struct SinkInner {
    dir: PathBuf,
    // None until the first write; stays None if the directory is unusable,
    // in which case entries go to broadcast only.
    file: Mutex<Option<PathBuf>>,
    tx: broadcast::Sender<LogLine>,
}

/// Cloneable handle to the protocol log sink.
#[derive(Clone)]
pub struct ProtocolLog {
    inner: Arc<SinkInner>,
}

impl ProtocolLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: Arc::new(SinkInner {
                dir: dir.into(),
                file: Mutex::new(None),
                tx,
            }),
        }
    }

    /// Appends one protocol entry and broadcasts it. Never fails.
    pub fn write(&self, direction: &str, text: &str, raw: Option<&[u8]>) {
        let line = LogLine {
            timestamp: Local::now(),
            direction: direction.to_string(),
            text: text.to_string(),
            raw: raw.map(<[u8]>::to_vec),
        };

        if let Some(path) = self.ensure_file() {
            let entry = format_entry(&line);
            if let Err(e) = append(&path, &entry) {
                warn!("protocol log write to {} failed: {e}", path.display());
            }
        }

        // Broadcast regardless of file success; send only errs when nobody
        // is subscribed.
        let _ = self.inner.tx.send(line);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogLine> {
        self.inner.tx.subscribe()
    }

    /// Path of the current log file, if one has been created.
    pub fn file_path(&self) -> Option<PathBuf> {
        self.lock_file().clone()
    }

    fn ensure_file(&self) -> Option<PathBuf> {
        let mut file = self.lock_file();
        if file.is_none() {
            match create_log_file(&self.inner.dir) {
                Ok(path) => {
                    debug!("protocol log started at {}", path.display());
                    *file = Some(path);
                }
                Err(e) => {
                    warn!(
                        "cannot create protocol log under {}: {e}",
                        self.inner.dir.display()
                    );
                }
            }
        }
        file.clone()
    }

    fn lock_file(&self) -> MutexGuard<'_, Option<PathBuf>> {
        match self.inner.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn create_log_file(dir: &Path) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("Log-Protocol-{stamp}.log"));
    let header = format!(
        "{} - Protocol log started\n",
        Local::now().format("%Y-%m-%d %H:%M:%S%.3f")
    );
    append(&path, &header)?;
    Ok(path)
}

fn append(path: &Path, entry: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(entry.as_bytes())
}

/// Renders one entry in the on-disk format.
pub fn format_entry(line: &LogLine) -> String {
    let mut out = format!(
        "{} [{}] {}\n",
        line.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
        line.direction,
        line.text
    );
    if let Some(raw) = line.raw.as_deref() {
        if !raw.is_empty() {
            let _ = writeln!(out, "HEX: {}", hex_dump(raw));
        }
    }
    out.push_str(&"-".repeat(SEPARATOR_WIDTH));
    out.push('\n');
    out
}

/// Uppercase space-separated hex, wrapped every [`HEX_WRAP`] bytes.
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        let _ = write!(out, "{byte:02X}");
        if i + 1 < bytes.len() {
            if (i + 1) % HEX_WRAP == 0 {
                out.push('\n');
            } else {
                out.push(' ');
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn hex_dump_wraps_every_sixteen_bytes() {
        let bytes: Vec<u8> = (0u8..20).collect();
        let dump = hex_dump(&bytes);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("00 01"));
        assert!(lines[0].ends_with("0F"));
        assert!(lines[1].starts_with("10"));
        assert!(dump.contains("0A"));
        assert_eq!(dump.to_uppercase(), dump);
    }

    #[test]
    fn entry_format_has_direction_hex_and_separator() {
        let line = LogLine {
            timestamp: Local::now(),
            direction: "TX".to_string(),
            text: "START READ".to_string(),
            raw: Some(vec![0x02, 0x53, 0x03]),
        };
        let entry = format_entry(&line);
        assert!(entry.contains("[TX] START READ\n"));
        assert!(entry.contains("HEX: 02 53 03\n"));
        assert!(entry.ends_with(&format!("{}\n", "-".repeat(SEPARATOR_WIDTH))));
    }

    #[tokio::test]
    async fn writes_append_to_file_and_broadcast() {
        let dir = tempdir().expect("tempdir");
        let sink = ProtocolLog::new(dir.path());
        let mut rx = sink.subscribe();

        sink.write("TX", "hello", Some(&[0xAA, 0xBB]));
        sink.write("RX", "world", None);

        let first = rx.recv().await.expect("first line");
        assert_eq!(first.direction, "TX");
        assert_eq!(first.raw.as_deref(), Some(&[0xAA, 0xBB][..]));
        let second = rx.recv().await.expect("second line");
        assert_eq!(second.text, "world");

        let path = sink.file_path().expect("file created");
        let contents = std::fs::read_to_string(path).expect("readable");
        assert!(contents.contains("[TX] hello"));
        assert!(contents.contains("HEX: AA BB"));
        assert!(contents.contains("[RX] world"));
    }

    #[tokio::test]
    async fn unwritable_directory_still_broadcasts() {
        let sink = ProtocolLog::new("/proc/no-such-dir/logs");
        let mut rx = sink.subscribe();
        sink.write("SYS", "degraded", None);
        assert_eq!(rx.recv().await.expect("line").text, "degraded");
        assert!(sink.file_path().is_none());
    }
}
