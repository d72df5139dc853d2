use serde_json::Value;

/// Events the daemon pushes to the extension UI (popup) layer.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    /// Shallow delta of the durable app state.
    AppStateUpdated(Value),
    /// Shallow delta of the wallet state.
    WalletStateUpdated(Value),
    /// A signing-kind request settled (success or serialized failure).
    SignFinished { success: bool, error: Option<String> },
}

/// Push channel into the UI layer. The transport collaborator implements
/// this; the daemon only ever fires and forgets.
pub trait UiSink: Send + Sync {
    fn send(&self, event: UiEvent);
}

/// Sink that drops every event, for headless operation and tests that do
/// not observe the UI side.
pub struct NullSink;

impl UiSink for NullSink {
    fn send(&self, _event: UiEvent) {}
}

/// Sink that records events for assertions.
pub struct RecordingSink {
    events: std::sync::Mutex<Vec<UiEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            events: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<UiEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl UiSink for RecordingSink {
    fn send(&self, event: UiEvent) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event);
    }
}
