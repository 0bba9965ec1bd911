use midir::{MidiInput, MidiInputConnection, MidiInputPort};
use tracing::debug;

use super::{classify, MidiEventKind, SessionId};
use crate::{clock, error::MidiInputError, route::SynthRoute};

pub type Result<T> = std::result::Result<T, MidiInputError>;

const CLIENT_NAME: &str = "synthroute";

struct PortConnection {
    port_name: String,
    session: SessionId,
    _connection: MidiInputConnection<()>,
}

/// Hardware MIDI inputs feeding a route, one session per connected port.
pub struct MidiInputs {
    connections: Vec<PortConnection>,
    route: SynthRoute,
}

impl MidiInputs {
    pub fn new(route: SynthRoute) -> Self {
        Self {
            connections: vec![],
            route,
        }
    }

    pub fn get_available_ports() -> Vec<String> {
        MidiInput::new(CLIENT_NAME)
            .map(get_available_ports_of)
            .unwrap_or_else(|_| vec![])
    }

    pub fn connect_input(&mut self, port_name: &str) -> Result<SessionId> {
        if let Some(existing) = self.session_of(port_name) {
            return Ok(existing);
        }
        let midi_in = MidiInput::new(CLIENT_NAME).map_err(|_| MidiInputError::ConnectError)?;
        let port = find_port(&midi_in, port_name)
            .ok_or_else(|| MidiInputError::PortNotFound(port_name.into()))?;
        let session = self
            .route
            .add_midi_session(port_name)
            .map_err(|_| MidiInputError::ConnectError)?
            .id;
        let connection = match connect_port(midi_in, &port, self.route.clone(), session) {
            Ok(connection) => connection,
            Err(e) => {
                _ = self.route.remove_midi_session(session);
                return Err(e);
            }
        };
        debug!("MIDI port connected: {port_name} as session {session}");
        self.connections.push(PortConnection {
            port_name: port_name.into(),
            session,
            _connection: connection,
        });
        Ok(session)
    }

    pub fn disconnect_input(&mut self, port_name: &str) -> Result<()> {
        let index = self
            .connections
            .iter()
            .position(|c| c.port_name == port_name)
            .ok_or_else(|| MidiInputError::NotConnected(port_name.into()))?;
        let connection = self.connections.remove(index);
        drop(connection._connection);
        _ = self.route.remove_midi_session(connection.session);
        debug!("MIDI port disconnected: {port_name}");
        Ok(())
    }

    pub fn disconnect_all(&mut self) {
        for connection in self.connections.drain(..) {
            drop(connection._connection);
            _ = self.route.remove_midi_session(connection.session);
        }
    }

    pub fn session_of(&self, port_name: &str) -> Option<SessionId> {
        self.connections
            .iter()
            .find(|c| c.port_name == port_name)
            .map(|c| c.session)
    }

    pub fn connected_input_names(&self) -> Vec<String> {
        self.connections
            .iter()
            .map(|c| c.port_name.clone())
            .collect()
    }
}

impl Drop for MidiInputs {
    fn drop(&mut self) {
        self.disconnect_all();
    }
}

fn get_available_ports_of(midi_in: MidiInput) -> Vec<String> {
    midi_in
        .ports()
        .iter()
        .filter_map(|port| midi_in.port_name(port).ok())
        .collect()
}

fn find_port(midi_in: &MidiInput, port_name: &str) -> Option<MidiInputPort> {
    midi_in.ports().into_iter().find(|port| {
        if let Ok(name) = midi_in.port_name(port) {
            name == port_name
        } else {
            false
        }
    })
}

fn connect_port(
    midi_in: MidiInput,
    port: &MidiInputPort,
    route: SynthRoute,
    session: SessionId,
) -> Result<MidiInputConnection<()>> {
    midi_in
        .connect(
            port,
            "synthroute-in",
            move |_, message, _| {
                let nanos = clock::clock_nanos();
                let res = match classify(message) {
                    Some(MidiEventKind::Short(msg)) => {
                        route.push_short_message(session, msg, nanos)
                    }
                    Some(MidiEventKind::Sysex(data)) => route.push_sysex(session, &data, nanos),
                    None => Ok(()),
                };
                if let Err(e) = res {
                    debug!("MIDI event from session {session} dropped: {e}");
                }
            },
            (),
        )
        .map_err(|_| MidiInputError::ConnectError)
}
