//! Process-wide termination handling.
//!
//! SIGINT, SIGTERM and SIGQUIT (Ctrl-C only on non-unix) are dispatched to the
//! handler on top of a stack. A prompt that needs its own behavior pushes a
//! handler with [`SignalHandlers::scope`]; dropping the returned guard
//! restores the previous one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

type Handler = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Stack {
    handlers: Mutex<Vec<(u64, Handler)>>,
    next_id: AtomicU64,
}

/// Stack of termination handlers. Cheap to clone.
#[derive(Clone, Default)]
pub struct SignalHandlers {
    stack: Arc<Stack>,
}

/// Keeps a handler installed until dropped.
#[must_use = "the handler is removed when the guard is dropped"]
pub struct SignalScope {
    stack: Arc<Stack>,
    id: u64,
}

impl Drop for SignalScope {
    fn drop(&mut self) {
        if let Ok(mut handlers) = self.stack.handlers.lock() {
            handlers.retain(|(id, _)| *id != self.id);
        }
    }
}

impl SignalHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the stack and start listening for termination signals.
    pub fn install() -> Self {
        let handlers = Self::new();
        handlers.listen();
        handlers
    }

    /// Install `handler` until the returned guard is dropped.
    pub fn scope(&self, handler: impl Fn() + Send + Sync + 'static) -> SignalScope {
        let id = self.stack.next_id.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut handlers) = self.stack.handlers.lock() {
            handlers.push((id, Arc::new(handler)));
        }
        SignalScope {
            stack: self.stack.clone(),
            id,
        }
    }

    /// Run the handler on top of the stack. Returns `false` if there is none.
    pub fn dispatch(&self) -> bool {
        let top = match self.stack.handlers.lock() {
            Ok(handlers) => handlers.last().map(|(_, h)| h.clone()),
            Err(_) => None,
        };
        match top {
            Some(handler) => {
                handler();
                true
            }
            None => false,
        }
    }

    pub fn depth(&self) -> usize {
        self.stack.handlers.lock().map(|h| h.len()).unwrap_or(0)
    }

    #[cfg(unix)]
    fn listen(&self) {
        for kind in [
            SignalKind::interrupt(),
            SignalKind::terminate(),
            SignalKind::quit(),
        ] {
            let mut stream = match signal(kind) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Failed to install signal handler: {}", e);
                    continue;
                }
            };
            let handlers = self.clone();
            tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    debug!("Termination signal received");
                    if !handlers.dispatch() {
                        std::process::exit(1);
                    }
                }
            });
        }
    }

    #[cfg(not(unix))]
    fn listen(&self) {
        let handlers = self.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!("Failed to install Ctrl-C handler: {}", e);
                    return;
                }
                debug!("Ctrl-C received");
                if !handlers.dispatch() {
                    std::process::exit(1);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_top_handler_receives_signal() {
        let handlers = SignalHandlers::new();
        let outer = Arc::new(AtomicUsize::new(0));
        let inner = Arc::new(AtomicUsize::new(0));

        let o = outer.clone();
        let _outer = handlers.scope(move || {
            o.fetch_add(1, Ordering::SeqCst);
        });
        {
            let i = inner.clone();
            let _inner = handlers.scope(move || {
                i.fetch_add(1, Ordering::SeqCst);
            });
            assert!(handlers.dispatch());
            assert_eq!(handlers.depth(), 2);
        }
        assert!(handlers.dispatch());

        assert_eq!(inner.load(Ordering::SeqCst), 1);
        assert_eq!(outer.load(Ordering::SeqCst), 1);
        assert_eq!(handlers.depth(), 1);
    }

    #[test]
    fn test_empty_stack() {
        assert!(!SignalHandlers::new().dispatch());
    }

    #[test]
    fn test_out_of_order_drop() {
        let handlers = SignalHandlers::new();
        let first = handlers.scope(|| {});
        let second = handlers.scope(|| {});
        drop(first);
        assert_eq!(handlers.depth(), 1);
        drop(second);
        assert_eq!(handlers.depth(), 0);
    }
}
