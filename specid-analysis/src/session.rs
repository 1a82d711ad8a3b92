//! Delivery of results onto the caller's own execution context.

use log::debug;
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, PoisonError};

/// Work posted to a session.
pub type SessionTask = Box<dyn FnOnce() + Send + 'static>;

/// Posts tasks onto the context that owns a session.
pub trait SessionDispatcher: Send + Sync {
    /// Queues `task` for `session_id`.
    ///
    /// # Errors
    /// Hands `task` back if the session is unknown or has gone away.
    fn post(&self, session_id: &str, task: SessionTask) -> Result<(), SessionTask>;
}

/// Channel-backed dispatcher: each registered session drains its own
/// receiver on its own thread.
#[derive(Default)]
pub struct ChannelDispatcher {
    sessions: Mutex<HashMap<String, Sender<SessionTask>>>,
}

impl ChannelDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `session_id`, replacing any earlier registration.
    pub fn register(&self, session_id: impl Into<String>) -> Receiver<SessionTask> {
        let (tx, rx) = mpsc::channel();
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id.into(), tx);
        rx
    }

    pub fn unregister(&self, session_id: &str) {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
    }
}

impl SessionDispatcher for ChannelDispatcher {
    fn post(&self, session_id: &str, task: SessionTask) -> Result<(), SessionTask> {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = sessions.get(session_id) else {
            return Err(task);
        };
        sender.send(task).map_err(|e| e.0)?;
        debug!("Posted task to session '{session_id}'");
        Ok(())
    }
}

/// Runs every task currently waiting on `receiver`; returns how many ran.
pub fn run_pending(receiver: &Receiver<SessionTask>) -> usize {
    let mut ran = 0;
    while let Ok(task) = receiver.try_recv() {
        task();
        ran += 1;
    }
    ran
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_post_to_registered_session() {
        let dispatcher = ChannelDispatcher::new();
        let rx = dispatcher.register("a");
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        assert!(dispatcher
            .post("a", Box::new(move || {
                h.fetch_add(1, Ordering::SeqCst);
            }))
            .is_ok());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(run_pending(&rx), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_or_closed_session_returns_task() {
        let dispatcher = ChannelDispatcher::new();
        assert!(dispatcher.post("missing", Box::new(|| {})).is_err());

        let rx = dispatcher.register("gone");
        drop(rx);
        let returned = dispatcher.post("gone", Box::new(|| {}));
        assert!(returned.is_err());

        dispatcher.register("b");
        dispatcher.unregister("b");
        assert!(dispatcher.post("b", Box::new(|| {})).is_err());
    }
}
