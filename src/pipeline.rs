//! Sequential batch conversion with progress reporting and cancellation.
//!
//! A batch takes an explicit list of source files, converts each one with
//! the same [`ConversionParams`], and appends one ledger row per file. The
//! ordering contract observers can rely on: when `on_progress(n, total)`
//! fires, exactly `n` rows for this batch have been persisted.
//!
//! One failing file never aborts the batch; it gets a failed row and the
//! batch moves on. Cancellation is cooperative and checked between files,
//! so an in-flight conversion always runs to completion and is recorded.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Instant;
use thiserror::Error;

use crate::codec;
use crate::params::ConversionParams;
use crate::store::{HistoryStore, NewRecord, RecordStatus, StoreError};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("cannot create output directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Persistence(#[from] StoreError),
    #[error("batch worker thread panicked")]
    Worker,
}

/// Shared cancellation flag. Cloning yields a handle to the same flag, so a
/// caller can keep one clone and hand another to the running batch.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent; takes effect at the next
    /// between-files check.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Callbacks a batch run emits as it works through its file list.
///
/// All methods default to no-ops so observers implement only what they
/// display. Methods are called from the thread running the batch.
pub trait BatchObserver: Send + Sync {
    /// `done` files fully processed and persisted, out of `total`.
    fn on_progress(&self, done: usize, total: usize) {
        let _ = (done, total);
    }

    fn on_item_done(&self, source: &Path) {
        let _ = source;
    }

    fn on_item_failed(&self, source: &Path, message: &str) {
        let _ = (source, message);
    }
}

/// Observer that ignores every event.
#[derive(Debug, Default)]
pub struct NullObserver;

impl BatchObserver for NullObserver {}

/// Run a batch to completion on the current thread.
///
/// Returns the number of files successfully converted. Cancellation is not
/// an error: the run stops early and the count reflects what finished.
pub fn run(
    files: &[PathBuf],
    output_dir: &Path,
    params: &ConversionParams,
    store: &HistoryStore,
    observer: &dyn BatchObserver,
    cancel: &CancelToken,
) -> Result<usize, PipelineError> {
    std::fs::create_dir_all(output_dir).map_err(|source| PipelineError::Io {
        path: output_dir.to_path_buf(),
        source,
    })?;

    let total = files.len();
    let mut completed = 0usize;
    tracing::info!(total, format = %params.format(), "starting batch conversion");

    for (index, source) in files.iter().enumerate() {
        if cancel.is_cancelled() {
            tracing::info!(done = index, total, "batch cancelled");
            break;
        }

        let target = target_path(source, output_dir, params);
        let started = Instant::now();
        let outcome = codec::convert(source, &target, params);
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(produced) => {
                store.append(&NewRecord {
                    source_path: source.to_string_lossy().into_owned(),
                    target_path: target.to_string_lossy().into_owned(),
                    source_format: extension_of(source),
                    target_format: params.format().ext().to_string(),
                    source_size: file_size(source),
                    target_size: file_size(&target),
                    width: Some(produced.width),
                    height: Some(produced.height),
                    duration_ms,
                    status: RecordStatus::Completed,
                })?;
                completed += 1;
                observer.on_item_done(source);
            }
            Err(e) => {
                let message = e.to_string();
                tracing::warn!(source = %source.display(), error = %message, "conversion failed");
                store.append(&NewRecord {
                    source_path: source.to_string_lossy().into_owned(),
                    target_path: target.to_string_lossy().into_owned(),
                    source_format: extension_of(source),
                    target_format: params.format().ext().to_string(),
                    source_size: file_size(source),
                    target_size: 0,
                    width: None,
                    height: None,
                    duration_ms,
                    status: RecordStatus::Failed,
                })?;
                observer.on_item_failed(source, &message);
            }
        }

        observer.on_progress(index + 1, total);
    }

    tracing::info!(completed, total, "batch finished");
    Ok(completed)
}

/// Handle to a batch running on a background thread.
pub struct BatchHandle {
    cancel: CancelToken,
    thread: JoinHandle<Result<usize, PipelineError>>,
}

impl BatchHandle {
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the batch to finish and return its completed-file count.
    pub fn join(self) -> Result<usize, PipelineError> {
        self.thread.join().map_err(|_| PipelineError::Worker)?
    }
}

/// Start a batch on a background thread and return a handle for
/// cancellation and joining.
pub fn spawn(
    files: Vec<PathBuf>,
    output_dir: PathBuf,
    params: ConversionParams,
    store: Arc<HistoryStore>,
    observer: Arc<dyn BatchObserver>,
) -> BatchHandle {
    let cancel = CancelToken::new();
    let worker_cancel = cancel.clone();
    let thread = std::thread::spawn(move || {
        run(
            &files,
            &output_dir,
            &params,
            &store,
            observer.as_ref(),
            &worker_cancel,
        )
    });
    BatchHandle { cancel, thread }
}

fn target_path(source: &Path, output_dir: &Path, params: &ConversionParams) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    output_dir.join(format!("{stem}.{}", params.format().ext()))
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::OutputFormat;
    use image::RgbaImage;
    use std::sync::Mutex;

    fn write_png(dir: &Path, name: &str, w: u32, h: u32) -> PathBuf {
        let path = dir.join(name);
        let img = RgbaImage::from_pixel(w, h, image::Rgba([200, 30, 30, 255]));
        img.save(&path).unwrap();
        path
    }

    #[derive(Default)]
    struct RecordingObserver {
        progress: Mutex<Vec<(usize, usize)>>,
        failures: Mutex<Vec<String>>,
    }

    impl BatchObserver for RecordingObserver {
        fn on_progress(&self, done: usize, total: usize) {
            self.progress.lock().unwrap().push((done, total));
        }

        fn on_item_failed(&self, source: &Path, _message: &str) {
            self.failures
                .lock()
                .unwrap()
                .push(source.to_string_lossy().into_owned());
        }
    }

    #[test]
    fn target_path_swaps_extension() {
        let params = ConversionParams::new(OutputFormat::Webp);
        let target = target_path(Path::new("/in/photo.png"), Path::new("/out"), &params);
        assert_eq!(target, PathBuf::from("/out/photo.webp"));
    }

    #[test]
    fn run_converts_all_and_reports_ordered_progress() {
        let tmp = tempfile::TempDir::new().unwrap();
        let files = vec![
            write_png(tmp.path(), "a.png", 40, 40),
            write_png(tmp.path(), "b.png", 40, 40),
        ];
        let out = tmp.path().join("out");
        let store = HistoryStore::open_in_memory().unwrap();
        let observer = RecordingObserver::default();
        let params = ConversionParams::new(OutputFormat::Jpeg);

        let completed = run(
            &files,
            &out,
            &params,
            &store,
            &observer,
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(completed, 2);
        assert!(out.join("a.jpg").exists());
        assert!(out.join("b.jpg").exists());
        assert_eq!(*observer.progress.lock().unwrap(), vec![(1, 2), (2, 2)]);
        assert_eq!(store.recent(10).len(), 2);
    }

    #[test]
    fn failing_file_gets_failed_row_and_batch_continues() {
        let tmp = tempfile::TempDir::new().unwrap();
        let good = write_png(tmp.path(), "good.png", 30, 30);
        let bad = tmp.path().join("bad.png");
        std::fs::write(&bad, b"").unwrap();
        let out = tmp.path().join("out");
        let store = HistoryStore::open_in_memory().unwrap();
        let observer = RecordingObserver::default();
        let params = ConversionParams::new(OutputFormat::Png);

        let completed = run(
            &[bad.clone(), good],
            &out,
            &params,
            &store,
            &observer,
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(completed, 1);
        assert_eq!(observer.failures.lock().unwrap().len(), 1);

        let records = store.recent(10);
        assert_eq!(records.len(), 2);
        // Newest first: the good file was processed second.
        assert_eq!(records[0].status, RecordStatus::Completed);
        assert_eq!(records[1].status, RecordStatus::Failed);
        assert_eq!(records[1].target_size, 0);
        assert_eq!(records[1].width, None);
    }

    #[test]
    fn cancellation_stops_between_files() {
        struct CancelAfterFirst {
            token: CancelToken,
        }
        impl BatchObserver for CancelAfterFirst {
            fn on_progress(&self, done: usize, _total: usize) {
                if done == 1 {
                    self.token.cancel();
                }
            }
        }

        let tmp = tempfile::TempDir::new().unwrap();
        let files = vec![
            write_png(tmp.path(), "a.png", 20, 20),
            write_png(tmp.path(), "b.png", 20, 20),
            write_png(tmp.path(), "c.png", 20, 20),
        ];
        let out = tmp.path().join("out");
        let store = HistoryStore::open_in_memory().unwrap();
        let cancel = CancelToken::new();
        let observer = CancelAfterFirst {
            token: cancel.clone(),
        };
        let params = ConversionParams::new(OutputFormat::Png);

        let completed = run(&files, &out, &params, &store, &observer, &cancel).unwrap();

        assert_eq!(completed, 1);
        assert_eq!(store.recent(10).len(), 1);
        assert!(out.join("a.png").exists());
        assert!(!out.join("b.png").exists());
    }

    #[test]
    fn ledger_write_failure_aborts_the_batch() {
        let tmp = tempfile::TempDir::new().unwrap();
        let files = vec![
            write_png(tmp.path(), "a.png", 20, 20),
            write_png(tmp.path(), "b.png", 20, 20),
        ];
        let out = tmp.path().join("out");
        let store = HistoryStore::open_in_memory().unwrap();
        store.execute_raw("DROP TABLE conversion_history").unwrap();
        let params = ConversionParams::new(OutputFormat::Png);

        let result = run(
            &files,
            &out,
            &params,
            &store,
            &NullObserver,
            &CancelToken::new(),
        );

        // The first unrecordable file stops the batch
        assert!(matches!(result, Err(PipelineError::Persistence(_))));
        assert!(out.join("a.png").exists());
        assert!(!out.join("b.png").exists());
    }

    #[test]
    fn spawn_runs_on_background_thread() {
        let tmp = tempfile::TempDir::new().unwrap();
        let files = vec![write_png(tmp.path(), "a.png", 20, 20)];
        let out = tmp.path().join("out");
        let store = Arc::new(HistoryStore::open_in_memory().unwrap());

        let handle = spawn(
            files,
            out.clone(),
            ConversionParams::new(OutputFormat::Webp),
            Arc::clone(&store),
            Arc::new(NullObserver),
        );
        assert_eq!(handle.join().unwrap(), 1);
        assert!(out.join("a.webp").exists());
    }
}
