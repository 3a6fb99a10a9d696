//! Generic progress callback used by long-running batch operations.

use std::marker::PhantomData;

/// Progress callback invoked between batches.
///
/// Type parameter `T` is the progress snapshot type, so the download,
/// upload and sync stages can each report their own shape of progress.
pub trait ProgressCallback<T>: Send + Sync {
    /// Called with a progress snapshot.
    ///
    /// # Returns
    /// - `true` to continue with the next batch
    /// - `false` to stop after the current batch
    fn on_progress(&self, progress: &T) -> bool;
}

/// A progress callback that wraps a closure.
pub struct FnProgress<F, T> {
    callback: F,
    _marker: PhantomData<fn(&T)>,
}

impl<F, T> FnProgress<F, T>
where
    F: Fn(&T) -> bool + Send + Sync,
{
    /// Wrap a closure as a progress callback.
    pub fn new(callback: F) -> Self {
        Self {
            callback,
            _marker: PhantomData,
        }
    }
}

impl<F, T> ProgressCallback<T> for FnProgress<F, T>
where
    F: Fn(&T) -> bool + Send + Sync,
{
    fn on_progress(&self, progress: &T) -> bool {
        (self.callback)(progress)
    }
}

/// Create a progress callback from a closure.
pub fn progress_fn<F, T>(f: F) -> FnProgress<F, T>
where
    F: Fn(&T) -> bool + Send + Sync,
{
    FnProgress::new(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct BatchDone {
        completed: usize,
        total: usize,
    }

    #[test]
    fn test_fn_progress_can_stop() {
        let callback = progress_fn(|p: &BatchDone| p.completed < p.total / 2);
        assert!(callback.on_progress(&BatchDone { completed: 1, total: 10 }));
        assert!(!callback.on_progress(&BatchDone { completed: 6, total: 10 }));
    }

    #[test]
    fn test_fn_progress_captures_state() {
        let batches: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
        let batches_clone: Arc<AtomicUsize> = Arc::clone(&batches);

        let callback = progress_fn(move |_: &BatchDone| {
            batches_clone.fetch_add(1, Ordering::SeqCst);
            true
        });

        callback.on_progress(&BatchDone { completed: 4, total: 8 });
        callback.on_progress(&BatchDone { completed: 8, total: 8 });

        assert_eq!(batches.load(Ordering::SeqCst), 2);
    }
}
