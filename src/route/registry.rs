use std::sync::Arc;

use super::observer::{RouteEvent, RouteObserver};
use crate::midi::{MidiSession, SessionId};

/// Live sessions, routing modes and observers of one route.
#[derive(Default)]
pub(crate) struct Registry {
    sessions: Vec<MidiSession>,
    next_id: u64,
    exclusive: Option<SessionId>,
    multi_mode: bool,
    observers: Vec<Arc<dyn RouteObserver>>,
}

impl Registry {
    pub(crate) fn add_observer(&mut self, observer: Arc<dyn RouteObserver>) {
        self.observers.push(observer);
    }

    pub(crate) fn notify(&self, event: RouteEvent) {
        for observer in &self.observers {
            observer.on_event(&event);
        }
    }

    pub(crate) fn add(&mut self, name: &str) -> MidiSession {
        let session = MidiSession {
            id: SessionId(self.next_id),
            name: name.into(),
        };
        self.next_id += 1;
        self.sessions.push(session.clone());
        if self.sessions.len() > 1 {
            self.multi_mode = true;
        }
        self.notify(RouteEvent::MidiSessionAdded(session.clone()));
        session
    }

    pub(crate) fn remove(&mut self, id: SessionId) -> Option<MidiSession> {
        let index = self.sessions.iter().position(|s| s.id == id)?;
        let session = self.sessions.remove(index);
        if self.exclusive == Some(id) {
            self.exclusive = None;
        }
        self.notify(RouteEvent::MidiSessionRemoved(id));
        Some(session)
    }

    pub(crate) fn rename(&mut self, id: SessionId, name: &str) -> Option<MidiSession> {
        let session = self.sessions.iter_mut().find(|s| s.id == id)?;
        session.name = name.into();
        let session = session.clone();
        self.notify(RouteEvent::MidiSessionNameChanged(session.clone()));
        Some(session)
    }

    pub(crate) fn contains(&self, id: SessionId) -> bool {
        self.sessions.iter().any(|s| s.id == id)
    }

    pub(crate) fn sessions(&self) -> &[MidiSession] {
        &self.sessions
    }

    pub(crate) fn exclusive(&self) -> Option<SessionId> {
        self.exclusive
    }

    /// Grants exclusive routing to `id`. A previous holder is revoked and
    /// notified before this returns.
    pub(crate) fn set_exclusive(&mut self, id: SessionId) -> Option<SessionId> {
        let revoked = self.exclusive.replace(id).filter(|&prev| prev != id);
        if let Some(prev) = revoked {
            self.notify(RouteEvent::ExclusiveSessionRemoved(prev));
        }
        revoked
    }

    pub(crate) fn clear_exclusive(&mut self, id: SessionId) -> bool {
        if self.exclusive == Some(id) {
            self.exclusive = None;
            true
        } else {
            false
        }
    }

    pub(crate) fn multi_mode(&self) -> bool {
        self.multi_mode
    }

    pub(crate) fn enable_multi_mode(&mut self) {
        self.multi_mode = true;
    }
}
