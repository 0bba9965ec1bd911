//! The synth route: lifecycle state machine, MIDI session routing and the
//! render entry point shared with the audio stream.

use std::{
    sync::{Arc, Mutex, MutexGuard, Weak},
    thread,
};

use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        driver::AudioDriver,
        stream::{AudioStream, FailureHook},
        timing::StreamTiming,
        Frame, I16Frame,
    },
    config::{AudioLatencyConfig, AudioSettings},
    error::RouteError,
    midi::{MidiEvent, MidiEventKind, MidiSession, SessionId},
    synth::Synth,
};

mod engine;
pub mod merge;
pub mod observer;
mod registry;
mod state;

pub use engine::RenderCore;
pub use observer::{RouteEvent, RouteObserver};
pub use state::SynthRouteState;

use registry::Registry;
use state::StateCell;

struct Control {
    driver: Box<dyn AudioDriver>,
    settings: AudioSettings,
    stream: Option<AudioStream>,
}

struct Shared {
    state: StateCell,
    core: Arc<RenderCore>,
    timing: Arc<StreamTiming>,
    registry: Mutex<Registry>,
    control: Mutex<Control>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Ok(control) = self.control.get_mut() {
            if let Some(stream) = control.stream.take() {
                stream.stop(control.driver.as_mut());
            }
        }
        self.core.close_synth();
    }
}

/// Handle to a synth route. Clones refer to the same route; it shuts down
/// when the last handle goes away.
#[derive(Clone)]
pub struct SynthRoute {
    shared: Arc<Shared>,
}

impl SynthRoute {
    pub fn new(
        synth: Box<dyn Synth>,
        driver: Box<dyn AudioDriver>,
        settings: AudioSettings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: StateCell::new(),
                core: Arc::new(RenderCore::new(synth)),
                timing: Arc::new(StreamTiming::new(settings.sample_rate)),
                registry: Mutex::new(Registry::default()),
                control: Mutex::new(Control {
                    driver,
                    settings,
                    stream: None,
                }),
            }),
        }
    }

    fn registry(&self) -> Result<MutexGuard<'_, Registry>, RouteError> {
        self.shared.registry.lock().map_err(|_| RouteError::LockPoisoned)
    }

    fn control(&self) -> Result<MutexGuard<'_, Control>, RouteError> {
        self.shared.control.lock().map_err(|_| RouteError::LockPoisoned)
    }

    pub fn state(&self) -> SynthRouteState {
        self.shared.state.get()
    }

    fn transition(&self, from: SynthRouteState, to: SynthRouteState) -> Result<(), RouteError> {
        self.shared
            .state
            .transition(from, to)
            .map_err(RouteError::InvalidState)?;
        debug!("Synth route state: {from:?} -> {to:?}");
        if let Ok(registry) = self.registry() {
            registry.notify(RouteEvent::StateChanged(to));
        }
        Ok(())
    }

    pub fn add_observer(&self, observer: Arc<dyn RouteObserver>) -> Result<(), RouteError> {
        self.registry()?.add_observer(observer);
        Ok(())
    }

    /// Replaces the audio settings used by the next `open`.
    pub fn set_audio_settings(&self, settings: AudioSettings) -> Result<(), RouteError> {
        self.control()?.settings = settings;
        Ok(())
    }

    /// Opens the synthesizer and starts the audio stream. With `binding`,
    /// the stream belongs to that session and renders synchronously.
    pub fn open(&self, binding: Option<SessionId>) -> Result<(), RouteError> {
        if let Some(id) = binding {
            if !self.registry()?.contains(id) {
                return Err(RouteError::UnknownSession(id));
            }
        }
        self.transition(SynthRouteState::Closed, SynthRouteState::Opening)?;
        match self.start_stream(binding) {
            Ok(()) => {
                self.transition(SynthRouteState::Opening, SynthRouteState::Open)?;
                info!("Synth route open");
                Ok(())
            }
            Err(e) => {
                error!("Synth route failed to open: {e}");
                self.transition(SynthRouteState::Opening, SynthRouteState::Closed)?;
                Err(e)
            }
        }
    }

    fn start_stream(&self, binding: Option<SessionId>) -> Result<(), RouteError> {
        let mut guard = self.control()?;
        let control = &mut *guard;
        let core = &self.shared.core;
        core.open_synth(control.settings.sample_rate)?;
        let on_failure = failure_hook(Arc::downgrade(&self.shared));
        match AudioStream::start(
            control.driver.as_mut(),
            Arc::clone(core),
            Arc::clone(&self.shared.timing),
            &control.settings,
            binding,
            on_failure,
        ) {
            Ok(stream) => {
                control.stream = Some(stream);
                Ok(())
            }
            Err(e) => {
                core.close_synth();
                Err(e.into())
            }
        }
    }

    /// Stops the audio stream and closes the synthesizer.
    pub fn close(&self) -> Result<(), RouteError> {
        self.transition(SynthRouteState::Open, SynthRouteState::Closing)?;
        {
            let mut guard = self.control()?;
            let control = &mut *guard;
            if let Some(stream) = control.stream.take() {
                stream.stop(control.driver.as_mut());
            }
        }
        self.shared.core.close_synth();
        self.transition(SynthRouteState::Closing, SynthRouteState::Closed)?;
        info!("Synth route closed");
        Ok(())
    }

    /// Forced close after the audio device went away.
    pub fn audio_stream_failed(&self) {
        if let Ok(registry) = self.registry() {
            registry.notify(RouteEvent::AudioStreamFailed);
        }
        match self.close() {
            Ok(()) => {}
            Err(RouteError::InvalidState(state)) => {
                debug!("Audio stream failure ignored in state {state:?}")
            }
            Err(e) => error!("Failed to close synth route: {e}"),
        }
    }

    /// Effective latency of the running stream.
    pub fn stream_latency(&self) -> Option<AudioLatencyConfig> {
        self.control()
            .ok()?
            .stream
            .as_ref()
            .map(AudioStream::latency)
    }

    pub fn underruns(&self) -> u64 {
        self.shared.timing.underruns()
    }

    pub fn rendered_frames(&self) -> u64 {
        self.shared.timing.rendered_frames()
    }

    pub fn render_position(&self) -> u64 {
        self.shared.core.render_position()
    }

    // Sessions

    pub fn add_midi_session(&self, name: &str) -> Result<MidiSession, RouteError> {
        let mut registry = self.registry()?;
        let session = registry.add(name);
        if registry.multi_mode() {
            self.shared.core.set_multi_mode(true);
        }
        debug!("MIDI session {} added: {name}", session.id);
        Ok(session)
    }

    pub fn remove_midi_session(&self, id: SessionId) -> Result<(), RouteError> {
        self.registry()?
            .remove(id)
            .ok_or(RouteError::UnknownSession(id))?;
        debug!("MIDI session {id} removed");
        Ok(())
    }

    pub fn set_midi_session_name(&self, id: SessionId, name: &str) -> Result<(), RouteError> {
        self.registry()?
            .rename(id, name)
            .ok_or(RouteError::UnknownSession(id))?;
        Ok(())
    }

    pub fn has_midi_sessions(&self) -> bool {
        self.registry()
            .map(|r| !r.sessions().is_empty())
            .unwrap_or(false)
    }

    pub fn midi_sessions(&self) -> Vec<MidiSession> {
        self.registry()
            .map(|r| r.sessions().to_vec())
            .unwrap_or_default()
    }

    /// Routes `id` straight to the synthesizer, bypassing the queue. Any
    /// other exclusive session loses the status first.
    pub fn enable_exclusive_midi_mode(&self, id: SessionId) -> Result<(), RouteError> {
        let mut registry = self.registry()?;
        if !registry.contains(id) {
            return Err(RouteError::UnknownSession(id));
        }
        if let Some(revoked) = registry.set_exclusive(id) {
            debug!("Exclusive MIDI mode moved from session {revoked} to {id}");
        }
        Ok(())
    }

    pub fn disable_exclusive_midi_mode(&self, id: SessionId) -> Result<(), RouteError> {
        if !self.registry()?.clear_exclusive(id) {
            warn!("Session {id} does not hold exclusive MIDI mode");
        }
        Ok(())
    }

    pub fn is_exclusive_midi_mode_enabled(&self) -> bool {
        self.exclusive_midi_session().is_some()
    }

    pub fn exclusive_midi_session(&self) -> Option<SessionId> {
        self.registry().ok()?.exclusive()
    }

    pub fn enable_multi_midi_mode(&self) -> Result<(), RouteError> {
        self.registry()?.enable_multi_mode();
        self.shared.core.set_multi_mode(true);
        Ok(())
    }

    pub fn is_multi_midi_mode_enabled(&self) -> bool {
        self.registry().map(|r| r.multi_mode()).unwrap_or(false)
    }

    // MIDI ingress

    fn ensure_open(&self) -> Result<(), RouteError> {
        match self.state() {
            SynthRouteState::Open => Ok(()),
            state => Err(RouteError::InvalidState(state)),
        }
    }

    pub fn play_short_message_now(&self, msg: u32) -> Result<(), RouteError> {
        self.ensure_open()?;
        Ok(self.shared.core.play_short_message_now(msg)?)
    }

    pub fn play_sysex_now(&self, data: &[u8]) -> Result<(), RouteError> {
        self.ensure_open()?;
        Ok(self.shared.core.play_sysex_now(data)?)
    }

    /// Queues a short message stamped in master clock nanoseconds.
    pub fn push_short_message(
        &self,
        id: SessionId,
        msg: u32,
        nanos: u64,
    ) -> Result<(), RouteError> {
        let timestamp = self.shared.timing.estimate_midi_timestamp(nanos);
        self.play_short_message(id, msg, timestamp)
    }

    pub fn push_sysex(&self, id: SessionId, data: &[u8], nanos: u64) -> Result<(), RouteError> {
        let timestamp = self.shared.timing.estimate_midi_timestamp(nanos);
        self.play_sysex(id, data, timestamp)
    }

    /// Queues a short message due at render-frame position `timestamp`.
    pub fn play_short_message(
        &self,
        id: SessionId,
        msg: u32,
        timestamp: u64,
    ) -> Result<(), RouteError> {
        self.submit(id, MidiEventKind::Short(msg), timestamp)
    }

    pub fn play_sysex(&self, id: SessionId, data: &[u8], timestamp: u64) -> Result<(), RouteError> {
        let data = self.shared.core.sysex_buffer(data);
        self.submit(id, MidiEventKind::Sysex(data), timestamp)
    }

    fn submit(&self, id: SessionId, kind: MidiEventKind, timestamp: u64) -> Result<(), RouteError> {
        self.ensure_open()?;
        let exclusive = {
            let registry = self.registry()?;
            if !registry.contains(id) {
                return Err(RouteError::UnknownSession(id));
            }
            registry.exclusive() == Some(id)
        };
        let core = &self.shared.core;
        if exclusive {
            match kind {
                MidiEventKind::Short(msg) => core.play_short_message_now(msg)?,
                MidiEventKind::Sysex(data) => core.play_sysex_now(&data)?,
            }
        } else if !core.enqueue(MidiEvent {
            session: id,
            kind,
            timestamp,
        }) {
            return Err(RouteError::LockPoisoned);
        }
        Ok(())
    }

    pub fn flush_midi_queue(&self) {
        self.shared.core.flush_midi_queue();
    }

    pub fn discard_queued_midi(&self) {
        self.shared.core.discard_queued_midi();
    }

    // Render entry point and synth controls

    pub fn render(&self, frames: &mut [Frame]) {
        self.shared.core.render(frames);
    }

    pub fn render_i16(&self, frames: &mut [I16Frame]) {
        self.shared.core.render_i16(frames);
    }

    pub fn reset(&self) -> Result<(), RouteError> {
        self.ensure_open()?;
        self.shared.core.flush_midi_queue();
        self.shared.core.reset()?;
        info!("Synth reset");
        Ok(())
    }

    pub fn set_output_gain(&self, gain: f32) {
        self.shared.core.set_output_gain(gain);
    }

    pub fn output_gain(&self) -> f32 {
        self.shared.core.output_gain()
    }

    pub fn set_reversed_stereo_enabled(&self, enabled: bool) {
        self.shared.core.set_reversed_stereo_enabled(enabled);
    }
}

/// The hook runs on a driver thread, so the close happens on a fresh one.
fn failure_hook(shared: Weak<Shared>) -> FailureHook {
    Arc::new(move || {
        let shared = Weak::clone(&shared);
        let spawned = thread::Builder::new()
            .name("route-failure".into())
            .spawn(move || {
                if let Some(shared) = shared.upgrade() {
                    SynthRoute { shared }.audio_stream_failed();
                }
            });
        if let Err(e) = spawned {
            error!("Failed to handle audio stream failure: {e}");
        }
    })
}
