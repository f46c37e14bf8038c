//! Progress-callback trait for batch (directory) runs.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as [`crate::batch::process_directory`] works through a directory.
//!
//! # Example
//!
//! ```rust
//! use contractiq::{BatchProgressCallback, PipelineConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct SkipCounter(AtomicUsize);
//!
//! impl BatchProgressCallback for SkipCounter {
//!     fn on_document_skipped(&self, _filename: &str) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(SkipCounter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the batch runner as it processes each document.
///
/// With `batch_concurrency > 1` the per-document methods may be called
/// concurrently from different tasks, so implementations must be
/// `Send + Sync`. All methods default to no-ops.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once with the number of PDFs found in the input directory.
    fn on_batch_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    /// Called before OCR starts on a document.
    fn on_document_start(&self, filename: &str) {
        let _ = filename;
    }

    /// Called when OCR is skipped because an artifact already exists.
    fn on_document_skipped(&self, filename: &str) {
        let _ = filename;
    }

    /// Called when OCR finishes and the artifact has been written.
    fn on_document_complete(&self, filename: &str, pages: usize) {
        let _ = (filename, pages);
    }

    /// Called when OCR or artifact writing fails for a document.
    fn on_document_error(&self, filename: &str, error: String) {
        let _ = (filename, error);
    }

    /// Called once after the consolidated results file has been written.
    ///
    /// * `extracted` — documents with a successful extraction record
    /// * `failed`    — documents recorded as `{"Error": ...}`
    fn on_batch_complete(&self, extracted: usize, failed: usize) {
        let _ = (extracted, failed);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        skipped: AtomicUsize,
        errors: Mutex<Vec<String>>,
    }

    impl BatchProgressCallback for Recorder {
        fn on_document_skipped(&self, _filename: &str) {
            self.skipped.fetch_add(1, Ordering::SeqCst);
        }

        fn on_document_error(&self, filename: &str, error: String) {
            self.errors
                .lock()
                .unwrap()
                .push(format!("{filename}: {error}"));
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(2);
        cb.on_document_start("a.pdf");
        cb.on_document_complete("a.pdf", 3);
        cb.on_document_skipped("b.pdf");
        cb.on_document_error("c.pdf", "boom".into());
        cb.on_batch_complete(2, 1);
    }

    #[tokio::test]
    async fn callback_can_move_into_spawned_task() {
        let recorder = Arc::new(Recorder::default());
        let cb: ProgressCallback = Arc::clone(&recorder) as ProgressCallback;

        tokio::spawn(async move {
            cb.on_document_skipped("a.pdf");
            cb.on_document_error("b.pdf", "not a PDF".to_string());
        })
        .await
        .expect("spawn must succeed");

        assert_eq!(recorder.skipped.load(Ordering::SeqCst), 1);
        assert_eq!(
            recorder.errors.lock().unwrap().clone(),
            vec!["b.pdf: not a PDF".to_string()]
        );
    }
}
