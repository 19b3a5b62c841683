//! Synchronous event delivery
//!
//! Callbacks run on the thread that performs the tick, while the engine is
//! borrowed. They must not block and cannot call back into the engine.

use std::collections::BTreeMap;

use super::types::EngineEvent;

/// Callback function type for engine events
pub type EventCallback = Box<dyn Fn(&EngineEvent) + Send>;

/// Callback registration handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallbackHandle(u32);

impl CallbackHandle {
    fn new(id: u32) -> Self {
        CallbackHandle(id)
    }

    pub fn id(&self) -> u32 {
        self.0
    }
}

/// Registry of event subscribers, called in registration order
#[derive(Default)]
pub struct EventBus {
    callback_counter: u32,
    callbacks: BTreeMap<CallbackHandle, EventCallback>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, callback: EventCallback) -> CallbackHandle {
        self.callback_counter += 1;
        let handle = CallbackHandle::new(self.callback_counter);
        self.callbacks.insert(handle, callback);
        handle
    }

    /// Returns false for an unknown handle
    pub fn unsubscribe(&mut self, handle: CallbackHandle) -> bool {
        self.callbacks.remove(&handle).is_some()
    }

    pub fn publish(&self, event: &EngineEvent) {
        tracing::trace!(kind = event.kind(), subscribers = self.callbacks.len(), "publishing event");
        for callback in self.callbacks.values() {
            callback(event);
        }
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.callbacks.len())
            .finish()
    }
}
