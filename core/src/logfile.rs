use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cfg::{LogFormat, LoggingConfig};
use crate::probe::{ApplicationStatus, ProbeResult};

/// One durable health log entry: a probe outcome plus run metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    /// Unique record id.
    pub id: Uuid,
    /// The probe outcome.
    #[serde(flatten)]
    pub probe: ProbeResult,
    /// Coarse application state derived from the probe.
    pub application_status: ApplicationStatus,
    /// Job that produced the attempt.
    pub job_id: String,
    /// Duration of the whole attempt.
    pub execution_time_ms: u64,
    /// Zero-based attempt index within one retry cycle.
    pub retry_count: u32,
    /// Deployment tag.
    pub environment: String,
}

impl LogRecord {
    /// Wrap `probe` with run metadata.
    pub fn new(
        probe: ProbeResult,
        job_id: impl Into<String>,
        retry_count: u32,
        execution_time_ms: u64,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            application_status: ApplicationStatus::from(&probe),
            probe,
            job_id: job_id.into(),
            execution_time_ms,
            retry_count,
            environment: environment.into(),
        }
    }

    /// `[timestamp] STATUS - endpoint (code) Nms[ ERROR: msg]`
    pub fn to_text_line(&self) -> String {
        let p = &self.probe;
        let mut line = format!(
            "[{}] {} - {} ({}) {}ms",
            p.timestamp.to_rfc3339(),
            p.status.label(),
            p.endpoint,
            p.http_status_code,
            p.response_time_ms
        );
        if let Some(err) = &p.error {
            line.push_str(" ERROR: ");
            line.push_str(err);
        }
        line
    }
}

/// Snapshot of the health log on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggerStats {
    /// Whether appends are enabled.
    pub enabled: bool,
    /// Active file path.
    pub path: PathBuf,
    /// Size of the active file in bytes (0 if absent).
    pub current_size: u64,
    /// Active file (if present) plus all rotated generations.
    pub total_files: usize,
    /// Rotation threshold.
    pub max_file_size: u64,
    /// Generations retained.
    pub max_files: u32,
    /// Line format.
    pub format: LogFormat,
}

/// Append-only health log with size-based rotation.
///
/// Every method swallows I/O errors after reporting them through `tracing`;
/// a broken log sink never interrupts the caller.
pub struct StructuredLogger {
    config: LoggingConfig,
    // Serializes append/rotate/clear against the active file.
    write_lock: Mutex<()>,
}

impl StructuredLogger {
    /// Create a logger; no file is touched until the first append.
    pub fn new(config: LoggingConfig) -> Self {
        Self { config, write_lock: Mutex::new(()) }
    }

    /// Settings this logger was built with.
    pub fn config(&self) -> &LoggingConfig {
        &self.config
    }

    /// Active log file.
    pub fn path(&self) -> &Path {
        &self.config.file_path
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Append one record, then rotate if the size threshold was reached.
    pub fn append(&self, record: &LogRecord) {
        let _guard = self.lock();
        if let Err(e) = self.write_line(record) {
            error!(path = %self.path().display(), error = %e, "health log append failed");
            return;
        }
        self.rotate_locked();
    }

    fn write_line(&self, record: &LogRecord) -> io::Result<()> {
        if let Some(dir) = self.path().parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let mut line = match self.config.format {
            LogFormat::Json => serde_json::to_string(record).map_err(io::Error::other)?,
            LogFormat::Text => record.to_text_line(),
        };
        line.push('\n');
        let mut f = OpenOptions::new().create(true).append(true).open(self.path())?;
        f.write_all(line.as_bytes())
    }

    /// Rotate if the active file is at or above the size threshold. Returns whether it rotated.
    pub fn rotate_if_needed(&self) -> bool {
        let _guard = self.lock();
        self.rotate_locked()
    }

    fn rotate_locked(&self) -> bool {
        let size = match fs::metadata(self.path()) {
            Ok(m) => m.len(),
            Err(_) => return false,
        };
        if size < self.config.max_file_size {
            return false;
        }
        match self.shift_generations() {
            Ok(()) => {
                info!(path = %self.path().display(), size, "health log rotated");
                true
            }
            Err(e) => {
                error!(path = %self.path().display(), error = %e, "health log rotation failed");
                false
            }
        }
    }

    fn shift_generations(&self) -> io::Result<()> {
        let keep = self.config.max_files;
        if keep == 0 {
            fs::remove_file(self.path())?;
        } else {
            remove_if_exists(&self.generation_path(keep))?;
            for n in (1..keep).rev() {
                let src = self.generation_path(n);
                if src.exists() {
                    fs::rename(&src, self.generation_path(n + 1))?;
                }
            }
            fs::rename(self.path(), self.generation_path(1))?;
        }
        // generations left behind by a larger max_files
        for (n, p) in self.rotated_files() {
            if n > keep {
                remove_if_exists(&p)?;
            }
        }
        Ok(())
    }

    /// Path of rotated generation `n`: `name.log` -> `name.<n>.log`.
    pub fn generation_path(&self, n: u32) -> PathBuf {
        let path = self.path();
        let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        let name = match path.extension() {
            Some(ext) => format!("{stem}.{n}.{}", ext.to_string_lossy()),
            None => format!("{stem}.{n}"),
        };
        path.with_file_name(name)
    }

    fn rotated_files(&self) -> Vec<(u32, PathBuf)> {
        let path = self.path();
        let dir = match path.parent() {
            Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        let ext = path.extension().map(|e| e.to_string_lossy().into_owned());
        let entries = match fs::read_dir(&dir) {
            Ok(e) => e,
            Err(_) => return Vec::new(),
        };
        entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter_map(|p| {
                let name = p.file_name()?.to_string_lossy().into_owned();
                let rest = name.strip_prefix(&stem)?.strip_prefix('.')?;
                let index = match &ext {
                    Some(ext) => rest.strip_suffix(ext.as_str())?.strip_suffix('.')?,
                    None => rest,
                };
                if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                Some((index.parse().ok()?, p))
            })
            .collect()
    }

    /// Up to `limit` most recent records, newest first. Empty under text format.
    pub fn recent(&self, limit: usize) -> Vec<LogRecord> {
        if self.config.format == LogFormat::Text {
            warn!(format = %self.config.format, "recent() cannot parse text-format health logs");
            return Vec::new();
        }
        let txt = match fs::read_to_string(self.path()) {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                error!(path = %self.path().display(), error = %e, "health log read failed");
                return Vec::new();
            }
        };
        txt.lines()
            .rev()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| match serde_json::from_str::<LogRecord>(l) {
                Ok(r) => Some(r),
                Err(e) => {
                    debug!(error = %e, "skipping unparseable health log line");
                    None
                }
            })
            .take(limit)
            .collect()
    }

    /// Size, path and retained file count.
    pub fn stats(&self) -> LoggerStats {
        let current = fs::metadata(self.path()).ok();
        let rotated = self.rotated_files().len();
        LoggerStats {
            enabled: self.config.enabled,
            path: self.path().to_path_buf(),
            current_size: current.as_ref().map(|m| m.len()).unwrap_or(0),
            total_files: rotated + usize::from(current.is_some()),
            max_file_size: self.config.max_file_size,
            max_files: self.config.max_files,
            format: self.config.format,
        }
    }

    /// Delete the active file and every rotated generation. Irreversible.
    pub fn clear(&self) -> usize {
        let _guard = self.lock();
        let mut removed = 0;
        for p in std::iter::once(self.path().to_path_buf()).chain(self.rotated_files().into_iter().map(|(_, p)| p)) {
            match fs::remove_file(&p) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => error!(path = %p.display(), error = %e, "health log delete failed"),
            }
        }
        info!(removed, "health logs cleared");
        removed
    }
}

fn remove_if_exists(p: &Path) -> io::Result<()> {
    match fs::remove_file(p) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
