//! Cancellation and progress reporting for a run.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress after a layer finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    pub label: String,
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layer {} of {} ({})", self.completed, self.total, self.label)
    }
}

type ProgressCallback = Box<dyn Fn(&Progress) + Send + Sync>;

/// Per-run context threaded through the orchestrator.
#[derive(Default)]
pub struct ConversionContext {
    cancellation: CancellationToken,
    on_progress: Option<ProgressCallback>,
}

impl fmt::Debug for ConversionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionContext")
            .field("cancelled", &self.cancellation.is_cancelled())
            .field("has_progress", &self.on_progress.is_some())
            .finish()
    }
}

impl ConversionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Progress) + Send + Sync + 'static,
    {
        self.on_progress = Some(Box::new(callback));
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub(crate) fn report(&self, progress: Progress) {
        if let Some(callback) = &self.on_progress {
            callback(&progress);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_token_is_shared() {
        let token = CancellationToken::new();
        let context = ConversionContext::new().with_cancellation(token.clone());
        assert!(!context.is_cancelled());
        token.cancel();
        assert!(context.is_cancelled());
    }

    #[test]
    fn test_progress_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let context = ConversionContext::new().with_progress(move |p| {
            sink.lock().unwrap().push(p.to_string());
        });
        context.report(Progress {
            completed: 1,
            total: 3,
            label: "2017-01-01".to_string(),
        });
        assert_eq!(*seen.lock().unwrap(), vec!["layer 1 of 3 (2017-01-01)"]);
    }
}
