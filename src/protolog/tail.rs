//! Background tailer for externally-written protocol log files.
//!
//! The tailer does not cooperate with the writer at all: it scans a fixed
//! set of candidate directories for the most-recently-modified file, follows
//! its growth line by line, and switches whenever a newer file appears
//! (rotation). A freshly opened file is seeked to its end so historical
//! content is never replayed. Directories that do not exist yet are simply
//! skipped. The loop ends only on explicit cancellation.

use super::{TailedLine, Telegram, TelegramDirection};
use log::{debug, warn};
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

/// Sleep between directory scans when no candidate file exists.
pub const SCAN_BACKOFF: Duration = Duration::from_millis(800);
/// Sleep between read passes once a file is being tailed.
pub const POLL_INTERVAL: Duration = Duration::from_millis(200);
/// Sleep after a read error before retrying.
pub const READ_RETRY_DELAY: Duration = Duration::from_millis(200);

struct TailCursor {
    path: PathBuf,
    reader: BufReader<File>,
    /// Incomplete trailing line carried across read passes.
    partial: String,
}

/// Cancellable background log tailer.
pub struct LogTailer {
    dirs: Vec<PathBuf>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl LogTailer {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self {
            dirs,
            shutdown_tx: None,
            task: None,
        }
    }

    /// Starts the tail loop, returning the consumer end. Restarting an
    /// already-running tailer stops the previous loop first.
    pub async fn start(&mut self) -> mpsc::UnboundedReceiver<TailedLine> {
        self.stop().await;
        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let dirs = self.dirs.clone();
        self.shutdown_tx = Some(shutdown_tx);
        self.task = Some(tokio::spawn(tail_loop(dirs, line_tx, shutdown_rx)));
        line_rx
    }

    /// Cancels the tail loop and waits for it to finish.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

async fn tail_loop(
    dirs: Vec<PathBuf>,
    line_tx: mpsc::UnboundedSender<TailedLine>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut cursor: Option<TailCursor> = None;

    loop {
        let newest = newest_file(&dirs);

        let Some(path) = newest else {
            if pause(SCAN_BACKOFF, &mut shutdown_rx).await {
                return;
            }
            continue;
        };

        let rotated = cursor.as_ref().map(|c| c.path != path).unwrap_or(true);
        if rotated {
            // Dropping the old cursor closes the previous handle.
            match open_at_end(&path) {
                Ok(new_cursor) => {
                    debug!("tailing {}", path.display());
                    cursor = Some(new_cursor);
                }
                Err(e) => {
                    warn!("cannot open {} for tailing: {e}", path.display());
                    if pause(READ_RETRY_DELAY, &mut shutdown_rx).await {
                        return;
                    }
                    continue;
                }
            }
        }

        if let Some(c) = cursor.as_mut() {
            if let Err(e) = drain_new_lines(c, &line_tx) {
                warn!("read error while tailing {}: {e}", c.path.display());
                if pause(READ_RETRY_DELAY, &mut shutdown_rx).await {
                    return;
                }
                continue;
            }
        }

        if pause(POLL_INTERVAL, &mut shutdown_rx).await {
            return;
        }
    }
}

/// Sleeps for `duration` unless cancelled first. Returns true on cancel.
async fn pause(duration: Duration, shutdown_rx: &mut oneshot::Receiver<()>) -> bool {
    tokio::select! {
        _ = &mut *shutdown_rx => true,
        _ = sleep(duration) => false,
    }
}

fn open_at_end(path: &Path) -> std::io::Result<TailCursor> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::End(0))?;
    Ok(TailCursor {
        path: path.to_path_buf(),
        reader: BufReader::new(file),
        partial: String::new(),
    })
}

fn drain_new_lines(
    cursor: &mut TailCursor,
    line_tx: &mpsc::UnboundedSender<TailedLine>,
) -> std::io::Result<()> {
    loop {
        let mut chunk = String::new();
        let n = cursor.reader.read_line(&mut chunk)?;
        if n == 0 {
            return Ok(());
        }
        cursor.partial.push_str(&chunk);
        if !cursor.partial.ends_with('\n') {
            // The writer is mid-line; finish it on a later pass.
            return Ok(());
        }
        let raw = cursor.partial.trim_end_matches(['\r', '\n']).to_string();
        cursor.partial.clear();
        let telegram = classify(&raw);
        let _ = line_tx.send(TailedLine { raw, telegram });
    }
}

/// Most-recently-modified file across the candidate directories. Unreadable
/// directories and entries are skipped.
fn newest_file(dirs: &[PathBuf]) -> Option<PathBuf> {
    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for dir in dirs {
        let Ok(entries) = std::fs::read_dir(dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
                continue;
            };
            let is_newer = newest
                .as_ref()
                .map(|(best, _)| modified > *best)
                .unwrap_or(true);
            if is_newer {
                newest = Some((modified, path));
            }
        }
    }
    newest.map(|(_, path)| path)
}

/// Extracts the bracket-delimited telegram from a log line, classifying its
/// direction by keyword.
fn classify(line: &str) -> Option<Telegram> {
    let start = line.find('[')?;
    let end = line[start + 1..].find(']')? + start + 1;
    let payload = line[start + 1..end].trim().to_string();
    if payload.is_empty() {
        return None;
    }
    let direction = if payload.contains("TX") {
        TelegramDirection::Tx
    } else if payload.contains("RX") {
        TelegramDirection::Rx
    } else {
        TelegramDirection::Generic
    };
    Some(Telegram { direction, payload })
}
