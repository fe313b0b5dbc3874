//! Typed session events
//!
//! The protocol surfaces three signals besides audio: the stream UUID, DTMF
//! digits, and PBX-reported errors. Each kind accepts exactly one handler;
//! registering again replaces the previous one. Handlers run inline on the
//! receive-loop task, so they should hand heavy work off to their own tasks.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use audiosock_wire::PbxErrorCode;

/// The closed set of event kinds a handler can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEventKind {
    /// The stream UUID arrived and the session is now addressable.
    Uuid,
    /// A keypad digit was pressed on the call.
    Dtmf,
    /// The PBX reported an error condition.
    Error,
}

/// An event payload delivered to a registered handler.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Uuid(Uuid),
    /// The ASCII digit byte from the DTMF frame.
    Dtmf(u8),
    Error(PbxErrorCode),
}

impl SessionEvent {
    pub fn kind(&self) -> SessionEventKind {
        match self {
            SessionEvent::Uuid(_) => SessionEventKind::Uuid,
            SessionEvent::Dtmf(_) => SessionEventKind::Dtmf,
            SessionEvent::Error(_) => SessionEventKind::Error,
        }
    }
}

/// A registered event callback.
pub type EventHandler = Arc<dyn Fn(SessionEvent) + Send + Sync>;

/// One handler slot per event kind.
pub(crate) struct HandlerTable {
    handlers: Mutex<HashMap<SessionEventKind, EventHandler>>,
}

impl HandlerTable {
    pub(crate) fn new() -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
        }
    }

    /// Install a handler, replacing any existing one for the same kind.
    pub(crate) fn set(&self, kind: SessionEventKind, handler: EventHandler) {
        if self.handlers.lock().insert(kind, handler).is_some() {
            debug!(?kind, "replacing existing event handler");
        }
    }

    /// Invoke the handler for the event's kind, if one is registered. The
    /// handler is cloned out of the table first so it never runs under the
    /// table lock.
    pub(crate) fn fire(&self, event: SessionEvent) {
        let handler = self.handlers.lock().get(&event.kind()).cloned();
        if let Some(handler) = handler {
            handler(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_fire_dispatches_by_kind() {
        let table = HandlerTable::new();
        let digits = Arc::new(Mutex::new(Vec::new()));
        let sink = digits.clone();
        table.set(
            SessionEventKind::Dtmf,
            Arc::new(move |event| {
                if let SessionEvent::Dtmf(digit) = event {
                    sink.lock().push(digit);
                }
            }),
        );

        table.fire(SessionEvent::Dtmf(b'4'));
        table.fire(SessionEvent::Error(PbxErrorCode::Memory));
        assert_eq!(&*digits.lock(), &[b'4']);
    }

    #[test]
    fn test_set_overwrites_previous_handler() {
        let table = HandlerTable::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = first.clone();
        table.set(
            SessionEventKind::Uuid,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let counter = second.clone();
        table.set(
            SessionEventKind::Uuid,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        table.fire(SessionEvent::Uuid(Uuid::nil()));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fire_without_handler_is_noop() {
        let table = HandlerTable::new();
        table.fire(SessionEvent::Dtmf(b'1'));
    }
}
