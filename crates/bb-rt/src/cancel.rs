//! Control-rate tickers and the cancellation registry
//!
//! Periodic control-domain work (automation ticks, deferred retry/diagnostic
//! draining) runs on named background threads, never on the render thread.
//! Every ticker is registered with a `CancellationRegistry` at creation and
//! cancelled exactly once, synchronously, during owner teardown.
//!
//! Ownership rule: a ticker callback must observe its logical owner through
//! a `Weak` reference. When the owner is gone the callback returns
//! `TickerControl::Stop` and the thread exits on its own; `cancel_all()`
//! handles the orderly-shutdown path. Either way, no retain cycle keeps an
//! owner alive past teardown.

use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;

// ═══════════════════════════════════════════════════════════════════════════
// TICKER
// ═══════════════════════════════════════════════════════════════════════════

/// Callback verdict after each tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickerControl {
    Continue,
    Stop,
}

/// Handle to a running ticker thread
///
/// Cancelling is synchronous (joins the thread) and idempotent. Dropping
/// the handle cancels too, so a handle parked in a registry cannot leak
/// its thread.
pub struct TickerHandle {
    name: String,
    shutdown_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl TickerHandle {
    /// Stop the ticker and wait for its thread to exit.
    ///
    /// Safe from any thread, including the ticker's own callback (teardown
    /// triggered from inside a tick): the self-join is skipped and the
    /// thread exits once the callback returns. A second call is a no-op.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.thread.take() {
            // The thread may already have exited (owner dropped); a send
            // failure just means there is nobody left to wake.
            let _ = self.shutdown_tx.send(());
            if handle.thread().id() == thread::current().id() {
                log::debug!("Ticker '{}' cancelled from its own thread", self.name);
                return;
            }
            if handle.join().is_err() {
                log::error!("Ticker '{}' panicked before shutdown", self.name);
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.thread.is_none()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for TickerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Spawns fixed-period background tickers
pub struct ControlTicker;

impl ControlTicker {
    /// Spawn a named ticker running `callback` every `period` until
    /// cancelled or until the callback asks to stop.
    pub fn spawn<F>(name: &str, period: Duration, mut callback: F) -> TickerHandle
    where
        F: FnMut() -> TickerControl + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let thread_name = name.to_string();

        let thread = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || loop {
                match shutdown_rx.recv_timeout(period) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {
                        if callback() == TickerControl::Stop {
                            break;
                        }
                    }
                }
            })
            .unwrap_or_else(|e| panic!("Failed to spawn ticker '{}': {}", name, e));

        TickerHandle {
            name: name.to_string(),
            shutdown_tx,
            thread: Some(thread),
        }
    }

    /// Spawn a ticker that holds its owner weakly.
    ///
    /// The callback receives the upgraded owner; once the last strong
    /// reference is gone the ticker stops by itself.
    pub fn spawn_weak<T, F>(name: &str, period: Duration, owner: &Arc<T>, callback: F) -> TickerHandle
    where
        T: Send + Sync + 'static,
        F: Fn(&T) + Send + 'static,
    {
        let weak: Weak<T> = Arc::downgrade(owner);
        Self::spawn(name, period, move || match weak.upgrade() {
            Some(owner) => {
                callback(&owner);
                TickerControl::Continue
            }
            None => TickerControl::Stop,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CANCELLATION REGISTRY
// ═══════════════════════════════════════════════════════════════════════════

/// Owns the ticker handles of one logical owner
///
/// Registered at creation, cancelled exactly once during owner teardown.
/// `cancel_all()` is synchronous and idempotent: the first call drains and
/// joins every handle, later calls see an empty registry.
#[derive(Default)]
pub struct CancellationRegistry {
    handles: Mutex<Vec<TickerHandle>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a ticker for teardown
    pub fn register(&self, handle: TickerHandle) {
        self.handles.lock().push(handle);
    }

    /// Number of live registered tickers
    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every registered ticker and wait for the threads to exit.
    ///
    /// Callable from any non-ticker thread during teardown; no
    /// synchronization onto the owning execution context is required.
    pub fn cancel_all(&self) {
        let drained: Vec<TickerHandle> = self.handles.lock().drain(..).collect();
        for mut handle in drained {
            log::debug!("Cancelling ticker '{}'", handle.name());
            handle.cancel();
        }
    }
}

impl Drop for CancellationRegistry {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_ticker_fires_and_cancels() {
        let _ = env_logger::builder().is_test(true).try_init();
        let count = Arc::new(AtomicU32::new(0));
        let count2 = Arc::clone(&count);

        let mut handle = ControlTicker::spawn("test-tick", Duration::from_millis(2), move || {
            count2.fetch_add(1, Ordering::Relaxed);
            TickerControl::Continue
        });

        std::thread::sleep(Duration::from_millis(30));
        handle.cancel();
        let fired = count.load(Ordering::Relaxed);
        assert!(fired > 0);

        // No further ticks after cancel returns
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(count.load(Ordering::Relaxed), fired);
    }

    #[test]
    fn test_cancel_idempotent() {
        let mut handle =
            ControlTicker::spawn("idempotent", Duration::from_millis(1), || TickerControl::Continue);
        handle.cancel();
        assert!(handle.is_cancelled());
        handle.cancel();
        assert!(handle.is_cancelled());
    }

    #[test]
    fn test_weak_ticker_stops_when_owner_dropped() {
        struct Owner {
            ticks: AtomicU32,
        }

        let owner = Arc::new(Owner {
            ticks: AtomicU32::new(0),
        });

        let mut handle =
            ControlTicker::spawn_weak("weak-tick", Duration::from_millis(2), &owner, |o| {
                o.ticks.fetch_add(1, Ordering::Relaxed);
            });

        std::thread::sleep(Duration::from_millis(10));
        drop(owner);

        // Thread observes the dead Weak and exits; cancel is then a no-op join
        std::thread::sleep(Duration::from_millis(10));
        handle.cancel();
        assert!(handle.is_cancelled());
    }

    #[test]
    fn test_owner_dropped_inside_callback_does_not_deadlock() {
        // The last strong reference to an owner can die while its own
        // ticker callback is running; the resulting cancel_all must not
        // try to join the calling thread.
        struct Owner {
            registry: CancellationRegistry,
            torn_down: Arc<AtomicU32>,
        }

        impl Drop for Owner {
            fn drop(&mut self) {
                self.registry.cancel_all();
                self.torn_down.store(1, Ordering::SeqCst);
            }
        }

        let torn_down = Arc::new(AtomicU32::new(0));
        let owner = Arc::new(Owner {
            registry: CancellationRegistry::new(),
            torn_down: Arc::clone(&torn_down),
        });

        let (entered_tx, entered_rx) = bounded::<()>(1);
        let handle = ControlTicker::spawn_weak(
            "self-cancel",
            Duration::from_millis(2),
            &owner,
            move |_| {
                let _ = entered_tx.try_send(());
                std::thread::sleep(Duration::from_millis(20));
            },
        );
        owner.registry.register(handle);

        // Drop the last strong reference while the callback holds the
        // upgraded Arc: the callback's drop runs the owner teardown on
        // the ticker thread itself.
        entered_rx
            .recv_timeout(Duration::from_secs(1))
            .expect("callback never entered");
        drop(owner);

        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(torn_down.load(Ordering::SeqCst), 1, "teardown completed");
    }

    #[test]
    fn test_registry_cancel_all_idempotent() {
        let registry = CancellationRegistry::new();
        let count = Arc::new(AtomicU32::new(0));

        for i in 0..3 {
            let count = Arc::clone(&count);
            registry.register(ControlTicker::spawn(
                &format!("reg-{}", i),
                Duration::from_millis(2),
                move || {
                    count.fetch_add(1, Ordering::Relaxed);
                    TickerControl::Continue
                },
            ));
        }
        assert_eq!(registry.len(), 3);

        registry.cancel_all();
        assert!(registry.is_empty());
        let after_first = count.load(Ordering::Relaxed);

        registry.cancel_all();
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(count.load(Ordering::Relaxed), after_first);
    }
}
