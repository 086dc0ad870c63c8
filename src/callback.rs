//! Application handler and event observer dispatch.

use crate::client::ConnectionEvent;
use crate::types::Message;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use tracing::error;

/// Application message handler.
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;
/// Connection event observer.
pub type EventObserver = Arc<dyn Fn(ConnectionEvent) + Send + Sync>;

fn read<'a, T>(lock: &'a RwLock<T>) -> std::sync::RwLockReadGuard<'a, T> {
    lock.read().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn write<'a, T>(lock: &'a RwLock<T>) -> std::sync::RwLockWriteGuard<'a, T> {
    lock.write()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Holds the single message handler and the event observers.
///
/// Dispatch is synchronous and ordered with packet arrival. A panicking
/// handler is caught at this boundary and logged; it never takes the read
/// loop down with it.
#[derive(Default)]
pub struct CallbackRegistry {
    message_handler: RwLock<Option<MessageHandler>>,
    event_observers: RwLock<Vec<EventObserver>>,
}

impl CallbackRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs (or replaces) the message handler.
    pub fn set_message_handler(&self, handler: MessageHandler) {
        *write(&self.message_handler) = Some(handler);
    }

    #[must_use]
    pub fn has_message_handler(&self) -> bool {
        read(&self.message_handler).is_some()
    }

    /// Registers an additional event observer.
    pub fn add_event_observer(&self, observer: EventObserver) {
        write(&self.event_observers).push(observer);
    }

    /// Delivers a message to the handler. Returns `false` when no handler is
    /// installed (the caller may queue the message instead).
    pub fn dispatch_message(&self, message: Message) -> bool {
        let handler = read(&self.message_handler).clone();
        match handler {
            Some(handler) => {
                if catch_unwind(AssertUnwindSafe(|| handler(message))).is_err() {
                    error!("message handler panicked; dropping the panic");
                }
                true
            }
            None => false,
        }
    }

    /// Delivers an event to every observer, in registration order.
    pub fn emit_event(&self, event: &ConnectionEvent) {
        let observers = read(&self.event_observers).clone();
        for observer in observers {
            if catch_unwind(AssertUnwindSafe(|| observer(event.clone()))).is_err() {
                error!("connection event observer panicked; dropping the panic");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageProperties;
    use crate::QoS;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn message(topic: &str) -> Message {
        Message {
            topic: topic.to_string(),
            payload: b"x".to_vec(),
            qos: QoS::AtMostOnce,
            retain: false,
            dup: false,
            properties: MessageProperties::default(),
        }
    }

    #[test]
    fn no_handler_reports_unhandled() {
        let registry = CallbackRegistry::new();
        assert!(!registry.dispatch_message(message("t")));
        assert!(!registry.has_message_handler());
    }

    #[test]
    fn handler_receives_messages() {
        let registry = CallbackRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        registry.set_message_handler(Arc::new(move |msg| {
            assert_eq!(msg.topic, "t");
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(registry.dispatch_message(message("t")));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_handler_is_contained() {
        let registry = CallbackRegistry::new();
        registry.set_message_handler(Arc::new(|_| panic!("boom")));
        // Does not unwind into the caller.
        assert!(registry.dispatch_message(message("t")));
    }

    #[test]
    fn observers_run_in_registration_order() {
        let registry = CallbackRegistry::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let order = order.clone();
            registry.add_event_observer(Arc::new(move |_| {
                order.lock().unwrap().push(tag);
            }));
        }

        registry.emit_event(&ConnectionEvent::Connected {
            session_present: false,
        });
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }
}
