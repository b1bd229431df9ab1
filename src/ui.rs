//! UI thread marshaling.
//!
//! The passphrase prompt and UI-bound output sinks must run on the thread that
//! owns the user interface. `UiThread` owns such a thread and executes closures
//! posted to it in order. In the command-line host it is the terminal thread.

use std::thread::{self, JoinHandle, ThreadId};
use tokio::sync::{mpsc, oneshot};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Handle to the UI-owning thread. Cheap to clone.
#[derive(Clone)]
pub struct UiThread {
    tx: mpsc::UnboundedSender<Job>,
    thread_id: ThreadId,
}

/// Keeps the UI thread alive; joining happens when the guard is dropped
/// after every `UiThread` handle is gone.
pub struct UiThreadGuard {
    handle: Option<JoinHandle<()>>,
}

impl UiThread {
    /// Spawn a dedicated UI thread
    pub fn spawn(name: &str) -> std::io::Result<(Self, UiThreadGuard)> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Some(job) = rx.blocking_recv() {
                    job();
                }
                tracing::debug!("UI thread exiting");
            })?;

        let ui = Self {
            tx,
            thread_id: handle.thread().id(),
        };
        Ok((ui, UiThreadGuard { handle: Some(handle) }))
    }

    /// True when called from the UI thread itself
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Fire-and-forget: run `f` on the UI thread
    pub fn post<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_current() {
            f();
            return;
        }
        if self.tx.send(Box::new(f)).is_err() {
            tracing::warn!("UI thread is gone, dropping posted work");
        }
    }

    /// Run `f` on the UI thread and block the calling thread until it returns.
    ///
    /// Must not be called from inside an async task; use [`UiThread::invoke`]
    /// there. Returns `None` if the UI thread has shut down.
    pub fn invoke_blocking<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_current() {
            return Some(f());
        }
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Box::new(move || {
                let _ = done_tx.send(f());
            }))
            .ok()?;
        done_rx.blocking_recv().ok()
    }

    /// Async variant of [`UiThread::invoke_blocking`]
    pub async fn invoke<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_current() {
            return Some(f());
        }
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Box::new(move || {
                let _ = done_tx.send(f());
            }))
            .ok()?;
        done_rx.await.ok()
    }
}

impl Drop for UiThreadGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            // The thread only exits once every sender is dropped
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_invoke_blocking_runs_on_ui_thread() {
        let (ui, _guard) = UiThread::spawn("ui-test").unwrap();
        let ui_inner = ui.clone();
        let on_ui = ui.invoke_blocking(move || ui_inner.is_current()).unwrap();
        assert!(on_ui);
        assert!(!ui.is_current());
    }

    #[test]
    fn test_posts_run_in_order() {
        let (ui, _guard) = UiThread::spawn("ui-order").unwrap();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for i in 0..10 {
            let seen = seen.clone();
            ui.post(move || seen.lock().push(i));
        }
        // A blocking invoke queues behind all posts
        ui.invoke_blocking(|| ()).unwrap();
        assert_eq!(*seen.lock(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_nested_invoke_does_not_deadlock() {
        let (ui, _guard) = UiThread::spawn("ui-nested").unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let (ui2, count2) = (ui.clone(), count.clone());
        ui.invoke_blocking(move || {
            ui2.invoke_blocking(move || count2.fetch_add(1, Ordering::SeqCst));
        })
        .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_async_invoke() {
        let (ui, _guard) = UiThread::spawn("ui-async").unwrap();
        assert_eq!(ui.invoke(|| 41 + 1).await, Some(42));
    }
}
