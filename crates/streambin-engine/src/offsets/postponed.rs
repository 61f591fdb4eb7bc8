use std::future::Future;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Debounce window for coalescing write bursts; postponement stays well
/// under a second.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

enum Signal {
    Trigger,
    Shutdown(oneshot::Sender<()>),
}

/// Background writer that coalesces bursts of write requests.
///
/// `trigger` is a non-blocking request; the dedicated task debounces
/// within the given window, folds any further triggers that arrive while
/// waiting into one write, and runs the supplied write closure. `close`
/// posts a shutdown sentinel, forces a final write, and awaits the task.
pub struct PostponedWriter {
    tx: mpsc::Sender<Signal>,
    handle: Option<JoinHandle<()>>,
}

impl PostponedWriter {
    pub fn spawn<F, Fut>(debounce: Duration, write: F) -> Self
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<Signal>(16);

        let handle = tokio::spawn(async move {
            while let Some(signal) = rx.recv().await {
                let mut shutdown_ack = match signal {
                    Signal::Trigger => None,
                    Signal::Shutdown(ack) => Some(ack),
                };

                if shutdown_ack.is_none() {
                    tokio::time::sleep(debounce).await;
                    // Fold triggers that queued up during the wait; stop
                    // early when a shutdown is among them.
                    while let Ok(extra) = rx.try_recv() {
                        if let Signal::Shutdown(ack) = extra {
                            shutdown_ack = Some(ack);
                            break;
                        }
                    }
                }

                write().await;

                if let Some(ack) = shutdown_ack {
                    let _ = ack.send(());
                    return;
                }
            }
        });

        Self {
            tx,
            handle: Some(handle),
        }
    }

    /// Request a write. Never blocks; a full queue means a write is
    /// already pending, which covers this request too.
    pub fn trigger(&self) {
        let _ = self.tx.try_send(Signal::Trigger);
    }

    /// Force a final synchronous write and stop the background task.
    pub async fn close(mut self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Signal::Shutdown(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_writer(
        debounce: Duration,
    ) -> (PostponedWriter, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let writes = count.clone();
        let writer = PostponedWriter::spawn(debounce, move || {
            let writes = writes.clone();
            async move {
                writes.fetch_add(1, Ordering::SeqCst);
            }
        });
        (writer, count)
    }

    #[tokio::test]
    async fn test_trigger_causes_write() {
        let (writer, count) = counting_writer(Duration::from_millis(10));
        writer.trigger();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        writer.close().await;
    }

    #[tokio::test]
    async fn test_burst_coalesces_into_one_write() {
        let (writer, count) = counting_writer(Duration::from_millis(50));
        for _ in 0..10 {
            writer.trigger();
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        writer.close().await;
    }

    #[tokio::test]
    async fn test_close_forces_final_write() {
        let (writer, count) = counting_writer(Duration::from_secs(60));
        writer.close().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_during_debounce_still_writes_once() {
        let (writer, count) = counting_writer(Duration::from_millis(100));
        writer.trigger();
        tokio::time::sleep(Duration::from_millis(10)).await;
        writer.close().await;
        // The pending trigger and the shutdown fold into a single write.
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_writes_after_each_quiet_period() {
        let (writer, count) = counting_writer(Duration::from_millis(10));
        writer.trigger();
        tokio::time::sleep(Duration::from_millis(80)).await;
        writer.trigger();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        writer.close().await;
    }
}
