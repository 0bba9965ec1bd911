use tokio::sync::{broadcast, mpsc};

use super::SynthRouteState;
use crate::midi::{MidiSession, SessionId};

#[derive(Debug, Clone, PartialEq)]
pub enum RouteEvent {
    StateChanged(SynthRouteState),
    MidiSessionAdded(MidiSession),
    MidiSessionRemoved(SessionId),
    MidiSessionNameChanged(MidiSession),
    /// The session lost exclusive routing to another one.
    ExclusiveSessionRemoved(SessionId),
    AudioStreamFailed,
}

/// Receives route notifications synchronously, at the point of change.
///
/// Called with the route's session registry locked: implementations must
/// return quickly and must not call back into the route.
pub trait RouteObserver: Send + Sync {
    fn on_event(&self, event: &RouteEvent);
}

impl RouteObserver for mpsc::UnboundedSender<RouteEvent> {
    fn on_event(&self, event: &RouteEvent) {
        _ = self.send(event.clone());
    }
}

impl RouteObserver for broadcast::Sender<RouteEvent> {
    fn on_event(&self, event: &RouteEvent) {
        _ = self.send(event.clone());
    }
}
