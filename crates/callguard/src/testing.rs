//! Test helpers shared by unit and integration tests

use parking_lot::Mutex;

use crate::observer::{ResilienceEvent, ResilienceObserver};

/// Observer that keeps every event it receives
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ResilienceEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all recorded events, oldest first
    pub fn events(&self) -> Vec<ResilienceEvent> {
        self.events.lock().clone()
    }

    /// Recorded event names, oldest first
    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(ResilienceEvent::name).collect()
    }

    /// Number of recorded events called `name`
    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|e| e.name() == name).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl ResilienceObserver for RecordingObserver {
    fn on_event(&self, event: &ResilienceEvent) {
        self.events.lock().push(event.clone());
    }
}
