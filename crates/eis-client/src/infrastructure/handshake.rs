//! Handshake Negotiator: from an open channel to usable devices.
//!
//! # How an EI session starts (for beginners)
//!
//! 1. The server opens with `handshake_version`.  The client answers with
//!    the version it will speak, declares itself a *sender* (it emulates
//!    input rather than receiving it), names itself, lists the interface
//!    versions it implements and sends `finish`.
//! 2. The server replies with `connection`, creating the connection object.
//!    From here on the handshake object is gone.
//! 3. The server announces seats.  Each seat lists the capabilities it can
//!    offer as bit masks and ends with `done`.  The client binds the masks
//!    it wants, and the server answers with devices on that seat.
//! 4. Each device describes itself (name, regions, interfaces), sends
//!    `done`, and finally `resumed` once it may receive input.
//!
//! The negotiator is sans-I/O: it consumes decoded [`Event`]s, updates the
//! [`ObjectRegistry`] and returns the requests to send.  The dispatcher
//! owns the socket and the timeout.  Seats and devices announced after
//! the initial handshake (hot-plug) flow through the same code path.

use std::collections::BTreeMap;

use eis_core::protocol::{ContextType, HANDSHAKE_OBJECT_ID};
use eis_core::{Capability, CapabilitySet, Event, InterfaceKind, Request};
use tracing::{debug, info, warn};

use crate::application::errors::InputError;
use crate::infrastructure::registry::ObjectRegistry;

/// Handshake version this client implements.
pub const CLIENT_HANDSHAKE_VERSION: u32 = 1;

/// Where the negotiator is in the opening exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    /// Waiting for the server's `handshake_version`.
    AwaitingVersion,
    /// Our side of the handshake is sent; waiting for `connection`.
    AwaitingConnection,
    /// The connection object exists.
    Connected,
}

/// Drives the handshake and keeps seat/device state in the registry.
#[derive(Debug)]
pub struct HandshakeNegotiator {
    name: String,
    required: CapabilitySet,
    requested: CapabilitySet,
    phase: HandshakePhase,
    version: u32,
    /// Interface versions the server announced.
    server_versions: BTreeMap<String, u32>,
}

impl HandshakeNegotiator {
    /// `required` capabilities must each end up with a usable device;
    /// `requested` ones are bound when a seat offers them.  Required
    /// capabilities are always requested.
    pub fn new(name: impl Into<String>, required: CapabilitySet, requested: CapabilitySet) -> Self {
        let requested = requested.iter().chain(required.iter()).collect();
        Self {
            name: name.into(),
            required,
            requested,
            phase: HandshakePhase::AwaitingVersion,
            version: 0,
            server_versions: BTreeMap::new(),
        }
    }

    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    /// Negotiated handshake version, 0 until agreed.
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn server_version_of(&self, interface: &str) -> Option<u32> {
        self.server_versions.get(interface).copied()
    }

    /// First required capability without a usable device.
    pub fn missing(&self, registry: &ObjectRegistry) -> Option<Capability> {
        self.required
            .iter()
            .find(|c| registry.usable_device(*c).is_none())
    }

    /// Connected, and every required capability has a usable device.
    pub fn is_complete(&self, registry: &ObjectRegistry) -> bool {
        self.phase == HandshakePhase::Connected && self.missing(registry).is_none()
    }

    /// The error reported when the handshake times out.
    pub fn timeout_error(&self, registry: &ObjectRegistry) -> InputError {
        match self.missing(registry) {
            Some(capability) if self.phase == HandshakePhase::Connected => {
                InputError::CapabilityUnavailable(capability)
            }
            _ => InputError::Connection(format!(
                "handshake did not complete (phase {:?})",
                self.phase
            )),
        }
    }

    /// Applies one event and returns the requests it calls for.
    ///
    /// # Errors
    ///
    /// [`InputError::ProtocolViolation`] for out-of-order handshake events,
    /// an unusable handshake version, or a duplicate object id.
    pub fn on_event(
        &mut self,
        event: &Event,
        registry: &mut ObjectRegistry,
    ) -> Result<Vec<Request>, InputError> {
        let mut out = Vec::new();
        match event {
            // ── Handshake object ─────────────────────────────────────────
            Event::HandshakeVersion { version } => {
                if self.phase != HandshakePhase::AwaitingVersion {
                    return Err(InputError::ProtocolViolation(
                        "handshake_version received twice".to_string(),
                    ));
                }
                if *version == 0 {
                    return Err(InputError::ProtocolViolation(
                        "server offered handshake version 0".to_string(),
                    ));
                }
                self.version = (*version).min(CLIENT_HANDSHAKE_VERSION);
                out.push(Request::HandshakeVersion {
                    version: self.version,
                });
                out.push(Request::HandshakeContextType {
                    context: ContextType::Sender,
                });
                out.push(Request::HandshakeName {
                    name: self.name.clone(),
                });
                for interface in InterfaceKind::ANNOUNCED {
                    out.push(Request::HandshakeInterfaceVersion {
                        interface,
                        version: interface.supported_version(),
                    });
                }
                out.push(Request::HandshakeFinish);
                self.phase = HandshakePhase::AwaitingConnection;
                debug!("handshake v{} sent as {:?}", self.version, self.name);
            }
            Event::HandshakeInterfaceVersion { name, version } => {
                self.server_versions.insert(name.clone(), *version);
            }
            Event::HandshakeConnection {
                connection,
                version,
                ..
            } => {
                if self.phase != HandshakePhase::AwaitingConnection {
                    return Err(InputError::ProtocolViolation(
                        "connection event before handshake_version".to_string(),
                    ));
                }
                registry.bind(
                    HANDSHAKE_OBJECT_ID,
                    *connection,
                    InterfaceKind::Connection,
                    *version,
                )?;
                registry.retire(HANDSHAKE_OBJECT_ID);
                self.phase = HandshakePhase::Connected;
                info!("EI connection established (object {connection:#x})");
            }

            // ── Seats ────────────────────────────────────────────────────
            Event::SeatAdded { seat, version } => {
                let connection = registry.connection().ok_or_else(|| {
                    InputError::ProtocolViolation("seat announced before connection".to_string())
                })?;
                registry.bind(connection, *seat, InterfaceKind::Seat, *version)?;
            }
            Event::SeatName { seat, name } => {
                if let Some(record) = registry.seat_mut(*seat) {
                    record.name = Some(name.clone());
                }
            }
            Event::SeatCapability {
                seat,
                mask,
                interface,
            } => match (InterfaceKind::from_name(interface), registry.seat_mut(*seat)) {
                (Some(kind), Some(record)) => {
                    record.capability_masks.insert(kind, *mask);
                }
                (None, _) => debug!("seat {seat:#x} offers unsupported {interface}"),
                (_, None) => warn!("capability for unknown seat {seat:#x}"),
            },
            Event::SeatDone { seat } => {
                if let Some(record) = registry.seat_mut(*seat) {
                    record.done = true;
                    let mask = record.bind_mask(self.requested);
                    info!(
                        "seat {seat:#x} ({}) ready, binding mask {mask:#x}",
                        record.name.as_deref().unwrap_or("unnamed")
                    );
                    if mask == 0 {
                        warn!("seat {seat:#x} offers none of the requested capabilities");
                    } else {
                        out.push(Request::SeatBind {
                            seat: *seat,
                            capabilities: mask,
                        });
                    }
                }
            }

            // ── Devices ──────────────────────────────────────────────────
            Event::DeviceAdded {
                seat,
                device,
                version,
            } => {
                registry.bind(*seat, *device, InterfaceKind::Device, *version)?;
            }
            Event::DeviceName { device, name } => {
                if let Some(record) = registry.device_mut(*device) {
                    record.name = Some(name.clone());
                }
            }
            Event::DeviceType {
                device,
                device_type,
            } => {
                if let Some(record) = registry.device_mut(*device) {
                    record.device_type = Some(*device_type);
                }
            }
            Event::DeviceDimensions {
                device,
                width,
                height,
            } => {
                if let Some(record) = registry.device_mut(*device) {
                    record.dimensions = Some((*width, *height));
                }
            }
            Event::DeviceRegion { device, region } => {
                if let Some(record) = registry.device_mut(*device) {
                    record.regions.push(*region);
                }
            }
            Event::DeviceInterface {
                device,
                object,
                interface,
                version,
            } => match InterfaceKind::from_name(interface) {
                Some(kind) => {
                    registry.bind(*device, *object, kind, *version)?;
                }
                None => debug!("device {device:#x} offers unsupported {interface}"),
            },
            Event::DeviceDone { device } => {
                if let Some(record) = registry.device_mut(*device) {
                    record.ready = true;
                    info!(
                        "device {device:#x} ({}) ready with {:?}",
                        record.name.as_deref().unwrap_or("unnamed"),
                        record.capabilities().iter().collect::<Vec<_>>()
                    );
                }
            }
            Event::DeviceResumed { device, .. } => {
                if let Some(record) = registry.device_mut(*device) {
                    record.resumed = true;
                    debug!("device {device:#x} resumed");
                }
            }
            Event::DevicePaused { device, .. } => {
                if let Some(record) = registry.device_mut(*device) {
                    record.resumed = false;
                    debug!("device {device:#x} paused");
                }
            }
            Event::Destroyed { object, .. } => {
                registry.release(*object);
            }

            // Connection-level events are the dispatcher's business.
            _ => {}
        }
        Ok(out)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use eis_core::protocol::{Region, SERVER_ID_BASE};

    const CONN: u64 = SERVER_ID_BASE;
    const SEAT: u64 = SERVER_ID_BASE + 1;
    const DEV: u64 = SERVER_ID_BASE + 2;
    const POINTER: u64 = SERVER_ID_BASE + 3;
    const BUTTON: u64 = SERVER_ID_BASE + 4;

    fn pointer_only() -> CapabilitySet {
        [Capability::Pointer].into_iter().collect()
    }

    fn negotiator() -> HandshakeNegotiator {
        HandshakeNegotiator::new("tester", pointer_only(), pointer_only())
    }

    fn feed(
        hs: &mut HandshakeNegotiator,
        reg: &mut ObjectRegistry,
        events: &[Event],
    ) -> Vec<Request> {
        let mut out = Vec::new();
        for event in events {
            out.extend(hs.on_event(event, reg).unwrap());
        }
        out
    }

    fn connect(hs: &mut HandshakeNegotiator, reg: &mut ObjectRegistry) {
        feed(
            hs,
            reg,
            &[
                Event::HandshakeVersion { version: 1 },
                Event::HandshakeConnection {
                    serial: 0,
                    connection: CONN,
                    version: 1,
                },
            ],
        );
    }

    fn pointer_device_events() -> Vec<Event> {
        vec![
            Event::DeviceAdded {
                seat: SEAT,
                device: DEV,
                version: 1,
            },
            Event::DeviceName {
                device: DEV,
                name: "virtual pointer".to_string(),
            },
            Event::DeviceRegion {
                device: DEV,
                region: Region {
                    offset_x: 0,
                    offset_y: 0,
                    width: 1280,
                    height: 720,
                    scale: 1.0,
                },
            },
            Event::DeviceInterface {
                device: DEV,
                object: POINTER,
                interface: "ei_pointer_absolute".to_string(),
                version: 1,
            },
            Event::DeviceInterface {
                device: DEV,
                object: BUTTON,
                interface: "ei_button".to_string(),
                version: 1,
            },
            Event::DeviceDone { device: DEV },
            Event::DeviceResumed {
                device: DEV,
                serial: 1,
            },
        ]
    }

    #[test]
    fn test_version_reply_declares_sender_and_interfaces() {
        // Arrange
        let mut hs = negotiator();
        let mut reg = ObjectRegistry::new();

        // Act
        let out = hs
            .on_event(&Event::HandshakeVersion { version: 3 }, &mut reg)
            .unwrap();

        // Assert
        assert_eq!(out[0], Request::HandshakeVersion { version: 1 });
        assert_eq!(
            out[1],
            Request::HandshakeContextType {
                context: ContextType::Sender
            }
        );
        assert_eq!(
            out[2],
            Request::HandshakeName {
                name: "tester".to_string()
            }
        );
        assert_eq!(out.len(), 3 + InterfaceKind::ANNOUNCED.len() + 1);
        assert_eq!(out.last(), Some(&Request::HandshakeFinish));
        assert_eq!(hs.phase(), HandshakePhase::AwaitingConnection);
    }

    #[test]
    fn test_second_version_event_is_protocol_violation() {
        let mut hs = negotiator();
        let mut reg = ObjectRegistry::new();
        hs.on_event(&Event::HandshakeVersion { version: 1 }, &mut reg)
            .unwrap();

        let result = hs.on_event(&Event::HandshakeVersion { version: 1 }, &mut reg);

        assert!(matches!(result, Err(InputError::ProtocolViolation(_))));
    }

    #[test]
    fn test_connection_replaces_handshake_object() {
        // Arrange
        let mut hs = negotiator();
        let mut reg = ObjectRegistry::new();

        // Act
        connect(&mut hs, &mut reg);

        // Assert
        assert_eq!(hs.phase(), HandshakePhase::Connected);
        assert_eq!(reg.connection(), Some(CONN));
        assert!(reg.lookup(HANDSHAKE_OBJECT_ID).is_none());
    }

    #[test]
    fn test_seat_done_binds_requested_masks() {
        // Arrange
        let mut hs = negotiator();
        let mut reg = ObjectRegistry::new();
        connect(&mut hs, &mut reg);

        // Act
        let out = feed(
            &mut hs,
            &mut reg,
            &[
                Event::SeatAdded {
                    seat: SEAT,
                    version: 1,
                },
                Event::SeatName {
                    seat: SEAT,
                    name: "default".to_string(),
                },
                Event::SeatCapability {
                    seat: SEAT,
                    mask: 0x2,
                    interface: "ei_pointer_absolute".to_string(),
                },
                Event::SeatCapability {
                    seat: SEAT,
                    mask: 0x8,
                    interface: "ei_button".to_string(),
                },
                Event::SeatCapability {
                    seat: SEAT,
                    mask: 0x20,
                    interface: "ei_keyboard".to_string(),
                },
                Event::SeatCapability {
                    seat: SEAT,
                    mask: 0x40,
                    interface: "ei_text".to_string(),
                },
                Event::SeatDone { seat: SEAT },
            ],
        );

        // Assert – keyboard was not requested
        assert_eq!(
            out,
            vec![Request::SeatBind {
                seat: SEAT,
                capabilities: 0xA
            }]
        );
    }

    #[test]
    fn test_complete_once_required_device_is_resumed() {
        // Arrange
        let mut hs = negotiator();
        let mut reg = ObjectRegistry::new();
        connect(&mut hs, &mut reg);
        feed(
            &mut hs,
            &mut reg,
            &[Event::SeatAdded {
                seat: SEAT,
                version: 1,
            }],
        );
        let mut events = pointer_device_events();
        let resumed = events.pop().unwrap();

        // Act
        feed(&mut hs, &mut reg, &events);
        let before = hs.is_complete(&reg);
        feed(&mut hs, &mut reg, &[resumed]);

        // Assert
        assert!(!before);
        assert!(hs.is_complete(&reg));
        let device = reg.usable_device(Capability::Pointer).unwrap();
        assert_eq!(device.name.as_deref(), Some("virtual pointer"));
        assert_eq!(device.regions.len(), 1);
    }

    #[test]
    fn test_timeout_names_missing_capability() {
        // Arrange – keyboard required but only a pointer arrives
        let required = [Capability::Pointer, Capability::Keyboard].into_iter().collect();
        let mut hs = HandshakeNegotiator::new("tester", required, CapabilitySet::empty());
        let mut reg = ObjectRegistry::new();
        connect(&mut hs, &mut reg);
        feed(
            &mut hs,
            &mut reg,
            &[Event::SeatAdded {
                seat: SEAT,
                version: 1,
            }],
        );
        feed(&mut hs, &mut reg, &pointer_device_events());

        // Act
        let err = hs.timeout_error(&reg);

        // Assert
        assert_eq!(err, InputError::CapabilityUnavailable(Capability::Keyboard));
    }

    #[test]
    fn test_timeout_before_connection_is_connection_error() {
        let hs = negotiator();
        let reg = ObjectRegistry::new();

        assert!(matches!(hs.timeout_error(&reg), InputError::Connection(_)));
    }

    #[test]
    fn test_hot_plugged_device_is_registered_after_completion() {
        // Arrange
        let mut hs = negotiator();
        let mut reg = ObjectRegistry::new();
        connect(&mut hs, &mut reg);
        feed(
            &mut hs,
            &mut reg,
            &[Event::SeatAdded {
                seat: SEAT,
                version: 1,
            }],
        );
        feed(&mut hs, &mut reg, &pointer_device_events());

        // Act – a keyboard shows up later
        feed(
            &mut hs,
            &mut reg,
            &[
                Event::DeviceAdded {
                    seat: SEAT,
                    device: DEV + 100,
                    version: 1,
                },
                Event::DeviceInterface {
                    device: DEV + 100,
                    object: DEV + 101,
                    interface: "ei_keyboard".to_string(),
                    version: 1,
                },
                Event::DeviceDone { device: DEV + 100 },
                Event::DeviceResumed {
                    device: DEV + 100,
                    serial: 5,
                },
            ],
        );

        // Assert
        assert_eq!(
            reg.usable_device(Capability::Keyboard).map(|d| d.id),
            Some(DEV + 100)
        );
        assert!(hs.is_complete(&reg));
    }

    #[test]
    fn test_destroyed_device_leaves_registry() {
        let mut hs = negotiator();
        let mut reg = ObjectRegistry::new();
        connect(&mut hs, &mut reg);
        feed(
            &mut hs,
            &mut reg,
            &[Event::SeatAdded {
                seat: SEAT,
                version: 1,
            }],
        );
        feed(&mut hs, &mut reg, &pointer_device_events());

        feed(
            &mut hs,
            &mut reg,
            &[Event::Destroyed {
                object: DEV,
                serial: 9,
            }],
        );

        assert!(reg.lookup(POINTER).is_none());
        assert_eq!(hs.missing(&reg), Some(Capability::Pointer));
    }

    #[test]
    fn test_duplicate_device_id_is_protocol_violation() {
        let mut hs = negotiator();
        let mut reg = ObjectRegistry::new();
        connect(&mut hs, &mut reg);
        feed(
            &mut hs,
            &mut reg,
            &[Event::SeatAdded {
                seat: SEAT,
                version: 1,
            }],
        );

        let added = Event::DeviceAdded {
            seat: SEAT,
            device: DEV,
            version: 1,
        };
        hs.on_event(&added, &mut reg).unwrap();
        let result = hs.on_event(&added, &mut reg);

        assert!(matches!(result, Err(InputError::ProtocolViolation(_))));
    }
}
