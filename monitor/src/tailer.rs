//! Log tailer for the VRChat log directory.
//!
//! This module follows the newest `output_log_*.txt` file in a directory and
//! emits every complete line appended to it after it was opened.
//!
//! # Architecture
//!
//! The tailer is a single cooperative task with two independent activities:
//!
//! - **Discovery** scans the directory every scan period. The newest file that
//!   has not been claimed yet becomes current; while a file is current, only a
//!   strictly newer unclaimed file replaces it (rotation). If nothing has ever
//!   been claimed, discovery gives up after a bounded number of consecutive
//!   empty scans.
//! - **Tailing** reads new lines from the current file using a byte-offset
//!   cursor. Opening a file seeks to its end so history is never replayed. A
//!   current file is tailed for as long as the task runs, whether or not
//!   discovery is still active.
//!
//! On rotation the previous file is retired without reading its remaining
//! tail and is never reopened.
//!
//! # Example
//!
//! ```no_run
//! use std::path::PathBuf;
//! use tokio_util::sync::CancellationToken;
//! use vrcnotif_monitor::tailer::{LogTailer, TailEvent, TailerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let tailer = LogTailer::new(PathBuf::from("/path/to/VRChat"), TailerConfig::default());
//!     let (mut rx, _task) = tailer.spawn(CancellationToken::new());
//!
//!     while let Some(event) = rx.recv().await {
//!         match event {
//!             TailEvent::FileOpened(path) => println!("Tailing {:?}", path),
//!             TailEvent::Line(line) => println!("{}", line.text),
//!         }
//!     }
//! }
//! ```

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::{DEFAULT_MAX_EMPTY_SCANS, DEFAULT_SCAN_INTERVAL_MS};
use crate::locator::enumerate_log_files;
use crate::types::{LogFile, LogLine};

/// Capacity of the channel between the tailer and its consumer.
const CHANNEL_CAPACITY: usize = 1024;

/// Events emitted by the tailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailEvent {
    /// A log file became current. Lines that follow come from this file.
    FileOpened(PathBuf),

    /// A complete line was appended to the current file.
    Line(LogLine),
}

/// Errors that end the log pipeline.
#[derive(Error, Debug)]
pub enum TailError {
    /// The log directory could not be read.
    #[error("failed to read log directory {dir}: {source}")]
    ReadDir {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The consumer dropped its receiver.
    #[error("failed to send log line: channel closed")]
    ChannelClosed,
}

/// Timing parameters for the tailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TailerConfig {
    /// Directory scan period, also the wait when no new line is available.
    pub scan_interval: Duration,

    /// Consecutive empty scans, before any file was claimed, after which
    /// discovery stops.
    pub max_empty_scans: u32,
}

impl Default for TailerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_millis(DEFAULT_SCAN_INTERVAL_MS),
            max_empty_scans: DEFAULT_MAX_EMPTY_SCANS,
        }
    }
}

/// Follows the newest log file in a directory.
#[derive(Debug)]
pub struct LogTailer {
    dir: PathBuf,
    config: TailerConfig,
}

impl LogTailer {
    /// Creates a tailer for `dir`.
    #[must_use]
    pub fn new(dir: PathBuf, config: TailerConfig) -> Self {
        Self { dir, config }
    }

    /// Returns the directory being followed.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Spawns [`follow`](Self::follow) on the runtime and returns its output channel.
    pub fn spawn(
        self,
        cancel: CancellationToken,
    ) -> (mpsc::Receiver<TailEvent>, JoinHandle<Result<(), TailError>>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let handle = tokio::spawn(async move { self.follow(tx, cancel).await });
        (rx, handle)
    }

    /// Follows the directory until cancelled, sending events to `tx`.
    ///
    /// Returns `Ok(())` when cancelled, or when discovery gave up without ever
    /// finding a log file.
    ///
    /// # Errors
    ///
    /// Returns [`TailError::ReadDir`] if the directory cannot be enumerated and
    /// [`TailError::ChannelClosed`] if the receiver is dropped.
    pub async fn follow(
        self,
        tx: mpsc::Sender<TailEvent>,
        cancel: CancellationToken,
    ) -> Result<(), TailError> {
        info!(dir = %self.dir.display(), "Following log directory");

        let mut discovery = Discovery::new(self.dir.clone(), self.config.max_empty_scans);
        let mut current: Option<TailCursor> = None;
        let mut last_scan: Option<Instant> = None;

        loop {
            if cancel.is_cancelled() {
                debug!("Log tailer cancelled");
                return Ok(());
            }

            let scan_due = last_scan.map_or(true, |at| at.elapsed() >= self.config.scan_interval);
            if discovery.is_active() && scan_due {
                last_scan = Some(Instant::now());

                if let Some(cursor) = discovery.advance(current.as_mut(), TailCursor::open_at_end)? {
                    match current.take() {
                        Some(previous) => info!(
                            retired = %previous.path.display(),
                            current = %cursor.path.display(),
                            "Log rotation detected"
                        ),
                        None => info!(path = %cursor.path.display(), "New log file detected"),
                    }
                    let path = cursor.path.clone();
                    current = Some(cursor);
                    tx.send(TailEvent::FileOpened(path))
                        .await
                        .map_err(|_| TailError::ChannelClosed)?;
                }

                if !discovery.is_active() && current.is_none() {
                    info!(
                        scans = self.config.max_empty_scans,
                        "No log file appeared, stopping log discovery"
                    );
                    return Ok(());
                }
            }

            let mut emitted = 0usize;
            if let Some(cursor) = current.as_mut() {
                match cursor.read_new_lines() {
                    Ok(lines) => {
                        cursor.missing = false;
                        emitted = lines.len();
                        for text in lines {
                            let line = LogLine::new(text, cursor.path.clone());
                            tx.send(TailEvent::Line(line))
                                .await
                                .map_err(|_| TailError::ChannelClosed)?;
                        }
                    }
                    Err(e) => {
                        if cursor.note_read_error(&e) {
                            warn!(path = %cursor.path.display(), error = %e, "Failed to read log file");
                        } else {
                            trace!(path = %cursor.path.display(), error = %e, "Log file still missing");
                        }
                    }
                }
            }

            if emitted == 0 {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Log tailer cancelled");
                        return Ok(());
                    }
                    _ = sleep(self.config.scan_interval) => {}
                }
            }
        }
    }
}

/// Directory discovery state: which files have been claimed and when to give up.
#[derive(Debug)]
struct Discovery {
    dir: PathBuf,
    processed: HashSet<PathBuf>,
    empty_scans: u32,
    max_empty_scans: u32,
    active: bool,
}

impl Discovery {
    fn new(dir: PathBuf, max_empty_scans: u32) -> Self {
        Self {
            dir,
            processed: HashSet::new(),
            empty_scans: 0,
            max_empty_scans,
            active: true,
        }
    }

    fn is_active(&self) -> bool {
        self.active
    }

    /// Scans the directory and returns the file that should become current, if any.
    ///
    /// A candidate replaces `current` only if it is strictly newer than the
    /// last modification time seen for `current`, even after `current` has
    /// been deleted.
    fn scan(&mut self, current: Option<&mut TailCursor>) -> Result<Option<LogFile>, TailError> {
        let files = enumerate_log_files(&self.dir).map_err(|source| TailError::ReadDir {
            dir: self.dir.clone(),
            source,
        })?;

        let current_modified = current.map(|cursor| {
            if let Some(listed) = files.iter().find(|f| f.path == cursor.path) {
                cursor.modified = listed.modified;
            }
            cursor.modified
        });

        let candidate = select_candidate(
            files
                .into_iter()
                .filter(|f| !self.processed.contains(&f.path)),
        )
        .filter(|c| match current_modified {
            Some(modified) => c.modified > modified,
            None => true,
        });

        if candidate.is_none() && self.processed.is_empty() {
            self.empty_scans += 1;
            trace!(
                attempt = self.empty_scans,
                max = self.max_empty_scans,
                "No new log file detected"
            );
            if self.empty_scans >= self.max_empty_scans {
                self.active = false;
            }
        }

        Ok(candidate)
    }

    /// Scans and opens the next current file with `open`.
    ///
    /// A candidate that fails to open is not claimed and is retried on the
    /// next scan.
    fn advance<F>(
        &mut self,
        current: Option<&mut TailCursor>,
        open: F,
    ) -> Result<Option<TailCursor>, TailError>
    where
        F: FnOnce(&Path) -> io::Result<TailCursor>,
    {
        let Some(candidate) = self.scan(current)? else {
            return Ok(None);
        };

        match open(&candidate.path) {
            Ok(cursor) => {
                self.claim(&candidate.path);
                Ok(Some(cursor))
            }
            Err(e) => {
                debug!(
                    path = %candidate.path.display(),
                    error = %e,
                    "Log file not ready yet"
                );
                Ok(None)
            }
        }
    }

    /// Marks a file as claimed. Claimed files are never selected again.
    fn claim(&mut self, path: &Path) {
        self.processed.insert(path.to_path_buf());
        self.empty_scans = 0;
    }
}

/// Picks the newest file; ties go to the lexically smallest path.
fn select_candidate(files: impl Iterator<Item = LogFile>) -> Option<LogFile> {
    files.min_by(|a, b| match b.modified.cmp(&a.modified) {
        Ordering::Equal => a.path.cmp(&b.path),
        other => other,
    })
}

/// Read position within the current log file.
#[derive(Debug)]
struct TailCursor {
    path: PathBuf,
    position: u64,
    /// Last modification time seen by discovery.
    modified: SystemTime,
    /// Set once a read found the file gone.
    missing: bool,
}

impl TailCursor {
    /// Opens `path` and positions the cursor at its current end.
    fn open_at_end(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let metadata = file.metadata()?;
        Ok(Self {
            path: path.to_path_buf(),
            position: metadata.len(),
            modified: metadata.modified()?,
            missing: false,
        })
    }

    /// Records a failed read. Returns false for repeats of a missing file,
    /// which are not worth a warning every scan.
    fn note_read_error(&mut self, error: &io::Error) -> bool {
        if error.kind() != io::ErrorKind::NotFound {
            return true;
        }
        !std::mem::replace(&mut self.missing, true)
    }

    /// Reads complete lines appended since the last read.
    ///
    /// A trailing partial line is left unread until its newline arrives. If
    /// the file shrank, reading restarts from the beginning.
    fn read_new_lines(&mut self) -> io::Result<Vec<String>> {
        let mut file = File::open(&self.path)?;
        let file_size = file.metadata()?.len();

        if file_size < self.position {
            info!(
                path = %self.path.display(),
                old_pos = self.position,
                new_size = file_size,
                "Log file truncated, resetting position to 0"
            );
            self.position = 0;
        }

        if self.position >= file_size {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(self.position))?;
        let mut reader = BufReader::new(file);
        let mut lines = Vec::new();
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let read = reader.read_until(b'\n', &mut buf)?;
            if read == 0 || buf.last() != Some(&b'\n') {
                break;
            }
            self.position += read as u64;

            let text = String::from_utf8_lossy(&buf);
            let trimmed = text.trim_end_matches(&['\n', '\r'][..]);
            if !trimmed.is_empty() {
                lines.push(trimmed.to_string());
            }
        }

        Ok(lines)
    }
}
