//! Interface catalog: typed requests and events of the EI protocol.
//!
//! Every protocol object has an *interface* that fixes the meaning of its
//! opcodes.  This module is the single place where opcode numbers and
//! argument order live.  Requests flow client → server, events flow
//! server → client.
//!
//! Only the sender-context subset is modelled.  Receiver-only events (a
//! server replaying input to a client) decode as [`Event::Unknown`] and are
//! skipped by the caller.

use crate::protocol::codec::{self, decode_args, Arg, ArgType, ProtocolError, RawMessage};

/// Object id of the handshake object; fixed by the protocol.
pub const HANDSHAKE_OBJECT_ID: u64 = 0;

/// First object id in the server-allocated range.
pub const SERVER_ID_BASE: u64 = 0xff00_0000_0000_0000;

/// Protocol interfaces this client understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InterfaceKind {
    Handshake,
    Connection,
    Callback,
    Pingpong,
    Seat,
    Device,
    PointerAbsolute,
    Button,
    Scroll,
    Keyboard,
    Touchscreen,
}

impl InterfaceKind {
    /// Interfaces announced during the handshake, in announcement order.
    pub const ANNOUNCED: [InterfaceKind; 10] = [
        InterfaceKind::Connection,
        InterfaceKind::Callback,
        InterfaceKind::Pingpong,
        InterfaceKind::Seat,
        InterfaceKind::Device,
        InterfaceKind::PointerAbsolute,
        InterfaceKind::Button,
        InterfaceKind::Scroll,
        InterfaceKind::Keyboard,
        InterfaceKind::Touchscreen,
    ];

    /// Returns the protocol name of the interface (e.g. `"ei_seat"`).
    pub fn name(self) -> &'static str {
        match self {
            InterfaceKind::Handshake => "ei_handshake",
            InterfaceKind::Connection => "ei_connection",
            InterfaceKind::Callback => "ei_callback",
            InterfaceKind::Pingpong => "ei_pingpong",
            InterfaceKind::Seat => "ei_seat",
            InterfaceKind::Device => "ei_device",
            InterfaceKind::PointerAbsolute => "ei_pointer_absolute",
            InterfaceKind::Button => "ei_button",
            InterfaceKind::Scroll => "ei_scroll",
            InterfaceKind::Keyboard => "ei_keyboard",
            InterfaceKind::Touchscreen => "ei_touchscreen",
        }
    }

    /// Parses a protocol interface name.  Unsupported names return `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ei_handshake" => Some(InterfaceKind::Handshake),
            "ei_connection" => Some(InterfaceKind::Connection),
            "ei_callback" => Some(InterfaceKind::Callback),
            "ei_pingpong" => Some(InterfaceKind::Pingpong),
            "ei_seat" => Some(InterfaceKind::Seat),
            "ei_device" => Some(InterfaceKind::Device),
            "ei_pointer_absolute" => Some(InterfaceKind::PointerAbsolute),
            "ei_button" => Some(InterfaceKind::Button),
            "ei_scroll" => Some(InterfaceKind::Scroll),
            "ei_keyboard" => Some(InterfaceKind::Keyboard),
            "ei_touchscreen" => Some(InterfaceKind::Touchscreen),
            _ => None,
        }
    }

    /// Highest interface version this client implements.
    pub fn supported_version(self) -> u32 {
        1
    }
}

/// Handshake context type: this client only ever emulates input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ContextType {
    Receiver = 1,
    Sender = 2,
}

/// State argument shared by `ei_button.button` and `ei_keyboard.key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PressState {
    Released = 0,
    Pressed = 1,
}

impl TryFrom<u32> for PressState {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PressState::Released),
            1 => Ok(PressState::Pressed),
            _ => Err(()),
        }
    }
}

/// Reason carried by `ei_connection.disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Disconnected,
    Error,
    Mode,
    Protocol,
    Value,
    Transport,
    Other(u32),
}

impl From<u32> for DisconnectReason {
    fn from(value: u32) -> Self {
        match value {
            0 => DisconnectReason::Disconnected,
            1 => DisconnectReason::Error,
            2 => DisconnectReason::Mode,
            3 => DisconnectReason::Protocol,
            4 => DisconnectReason::Value,
            5 => DisconnectReason::Transport,
            other => DisconnectReason::Other(other),
        }
    }
}

impl From<DisconnectReason> for u32 {
    fn from(reason: DisconnectReason) -> Self {
        match reason {
            DisconnectReason::Disconnected => 0,
            DisconnectReason::Error => 1,
            DisconnectReason::Mode => 2,
            DisconnectReason::Protocol => 3,
            DisconnectReason::Value => 4,
            DisconnectReason::Transport => 5,
            DisconnectReason::Other(v) => v,
        }
    }
}

/// A rectangular region of the compositor's logical coordinate space
/// that absolute coordinates of a device map into.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    pub offset_x: u32,
    pub offset_y: u32,
    pub width: u32,
    pub height: u32,
    pub scale: f32,
}

/// The three values every frame commit carries.
///
/// `ei_device.frame` needs the device, the last server serial and a
/// timestamp; bundling them in one record means a frame cannot be built
/// with a field missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCommit {
    pub device: u64,
    pub serial: u32,
    /// Microseconds of `CLOCK_MONOTONIC`.
    pub timestamp_us: u64,
}

impl FrameCommit {
    pub fn new(device: u64, serial: u32, timestamp_us: u64) -> Self {
        Self {
            device,
            serial,
            timestamp_us,
        }
    }
}

// ── Requests ──────────────────────────────────────────────────────────────────

/// A client → server message.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    HandshakeVersion { version: u32 },
    HandshakeFinish,
    HandshakeContextType { context: ContextType },
    HandshakeName { name: String },
    HandshakeInterfaceVersion { interface: InterfaceKind, version: u32 },

    Sync { connection: u64, callback: u64, version: u32 },
    Disconnect { connection: u64 },

    PingpongDone { pingpong: u64, data: u64 },

    SeatRelease { seat: u64 },
    SeatBind { seat: u64, capabilities: u64 },

    DeviceRelease { device: u64 },
    StartEmulating { device: u64, last_serial: u32, sequence: u32 },
    StopEmulating { device: u64, last_serial: u32 },
    Frame(FrameCommit),

    MotionAbsolute { pointer: u64, x: f32, y: f32 },
    Button { button: u64, code: u32, state: PressState },
    Scroll { scroll: u64, x: f32, y: f32 },
    ScrollDiscrete { scroll: u64, x: i32, y: i32 },
    ScrollStop { scroll: u64, x: bool, y: bool, is_cancel: bool },
    Key { keyboard: u64, key: u32, state: PressState },
    TouchDown { touchscreen: u64, touch_id: u32, x: f32, y: f32 },
    TouchMotion { touchscreen: u64, touch_id: u32, x: f32, y: f32 },
    TouchUp { touchscreen: u64, touch_id: u32 },
}

impl Request {
    /// Object the request is addressed to.
    pub fn object_id(&self) -> u64 {
        match self {
            Request::HandshakeVersion { .. }
            | Request::HandshakeFinish
            | Request::HandshakeContextType { .. }
            | Request::HandshakeName { .. }
            | Request::HandshakeInterfaceVersion { .. } => HANDSHAKE_OBJECT_ID,
            Request::Sync { connection, .. } | Request::Disconnect { connection } => *connection,
            Request::PingpongDone { pingpong, .. } => *pingpong,
            Request::SeatRelease { seat } | Request::SeatBind { seat, .. } => *seat,
            Request::DeviceRelease { device }
            | Request::StartEmulating { device, .. }
            | Request::StopEmulating { device, .. } => *device,
            Request::Frame(commit) => commit.device,
            Request::MotionAbsolute { pointer, .. } => *pointer,
            Request::Button { button, .. } => *button,
            Request::Scroll { scroll, .. }
            | Request::ScrollDiscrete { scroll, .. }
            | Request::ScrollStop { scroll, .. } => *scroll,
            Request::Key { keyboard, .. } => *keyboard,
            Request::TouchDown { touchscreen, .. }
            | Request::TouchMotion { touchscreen, .. }
            | Request::TouchUp { touchscreen, .. } => *touchscreen,
        }
    }

    /// Opcode within the target object's interface.
    pub fn opcode(&self) -> u32 {
        match self {
            Request::HandshakeVersion { .. } => 0,
            Request::HandshakeFinish => 1,
            Request::HandshakeContextType { .. } => 2,
            Request::HandshakeName { .. } => 3,
            Request::HandshakeInterfaceVersion { .. } => 4,
            Request::Sync { .. } => 0,
            Request::Disconnect { .. } => 1,
            Request::PingpongDone { .. } => 0,
            Request::SeatRelease { .. } => 0,
            Request::SeatBind { .. } => 1,
            Request::DeviceRelease { .. } => 0,
            Request::StartEmulating { .. } => 1,
            Request::StopEmulating { .. } => 2,
            Request::Frame(_) => 3,
            Request::MotionAbsolute { .. } => 1,
            Request::Button { .. } => 1,
            Request::Scroll { .. } => 1,
            Request::ScrollDiscrete { .. } => 2,
            Request::ScrollStop { .. } => 3,
            Request::Key { .. } => 1,
            Request::TouchDown { .. } => 1,
            Request::TouchMotion { .. } => 2,
            Request::TouchUp { .. } => 3,
        }
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Request::HandshakeVersion { .. } => "handshake_version",
            Request::HandshakeFinish => "finish",
            Request::HandshakeContextType { .. } => "context_type",
            Request::HandshakeName { .. } => "name",
            Request::HandshakeInterfaceVersion { .. } => "interface_version",
            Request::Sync { .. } => "sync",
            Request::Disconnect { .. } => "disconnect",
            Request::PingpongDone { .. } => "pingpong.done",
            Request::SeatRelease { .. } => "seat.release",
            Request::SeatBind { .. } => "bind",
            Request::DeviceRelease { .. } => "device.release",
            Request::StartEmulating { .. } => "start_emulating",
            Request::StopEmulating { .. } => "stop_emulating",
            Request::Frame(_) => "frame",
            Request::MotionAbsolute { .. } => "motion_absolute",
            Request::Button { .. } => "button",
            Request::Scroll { .. } => "scroll",
            Request::ScrollDiscrete { .. } => "scroll_discrete",
            Request::ScrollStop { .. } => "scroll_stop",
            Request::Key { .. } => "key",
            Request::TouchDown { .. } => "touch.down",
            Request::TouchMotion { .. } => "touch.motion",
            Request::TouchUp { .. } => "touch.up",
        }
    }

    /// Arguments in wire order.
    pub fn args(&self) -> Vec<Arg> {
        match self {
            Request::HandshakeVersion { version } => vec![Arg::Uint32(*version)],
            Request::HandshakeFinish => vec![],
            Request::HandshakeContextType { context } => vec![Arg::Uint32(*context as u32)],
            Request::HandshakeName { name } => vec![Arg::String(Some(name.clone()))],
            Request::HandshakeInterfaceVersion { interface, version } => vec![
                Arg::String(Some(interface.name().to_string())),
                Arg::Uint32(*version),
            ],
            Request::Sync {
                callback, version, ..
            } => vec![Arg::NewId(*callback), Arg::Uint32(*version)],
            Request::Disconnect { .. } => vec![],
            Request::PingpongDone { data, .. } => vec![Arg::Uint64(*data)],
            Request::SeatRelease { .. } => vec![],
            Request::SeatBind { capabilities, .. } => vec![Arg::Uint64(*capabilities)],
            Request::DeviceRelease { .. } => vec![],
            Request::StartEmulating {
                last_serial,
                sequence,
                ..
            } => vec![Arg::Uint32(*last_serial), Arg::Uint32(*sequence)],
            Request::StopEmulating { last_serial, .. } => vec![Arg::Uint32(*last_serial)],
            Request::Frame(commit) => {
                vec![Arg::Uint32(commit.serial), Arg::Uint64(commit.timestamp_us)]
            }
            Request::MotionAbsolute { x, y, .. } | Request::Scroll { x, y, .. } => {
                vec![Arg::Float(*x), Arg::Float(*y)]
            }
            Request::Button { code, state, .. } => {
                vec![Arg::Uint32(*code), Arg::Uint32(*state as u32)]
            }
            Request::ScrollDiscrete { x, y, .. } => vec![Arg::Int32(*x), Arg::Int32(*y)],
            Request::ScrollStop {
                x, y, is_cancel, ..
            } => vec![
                Arg::Uint32(u32::from(*x)),
                Arg::Uint32(u32::from(*y)),
                Arg::Uint32(u32::from(*is_cancel)),
            ],
            Request::Key { key, state, .. } => vec![Arg::Uint32(*key), Arg::Uint32(*state as u32)],
            Request::TouchDown {
                touch_id, x, y, ..
            }
            | Request::TouchMotion {
                touch_id, x, y, ..
            } => vec![Arg::Uint32(*touch_id), Arg::Float(*x), Arg::Float(*y)],
            Request::TouchUp { touch_id, .. } => vec![Arg::Uint32(*touch_id)],
        }
    }

    /// Encodes the request into wire bytes.
    ///
    /// # Errors
    ///
    /// Propagates [`ProtocolError`] from the codec.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        codec::encode(self.object_id(), self.opcode(), &self.args())
    }
}

/// Decodes a request addressed to an object of `interface`.
///
/// The client never needs this; it exists so a test server can check what
/// the client wrote.  Unknown opcodes are reported as errors here because a
/// server must reject them.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedPayload`] for unknown opcodes and
/// propagates argument decoding errors.
pub fn decode_request(interface: InterfaceKind, raw: &RawMessage) -> Result<Request, ProtocolError> {
    use ArgType::*;
    use InterfaceKind as I;

    let object = raw.object_id;
    let (name, signature): (&'static str, &[ArgType]) = match (interface, raw.opcode) {
        (I::Handshake, 0) => ("handshake_version", &[Uint32]),
        (I::Handshake, 1) => ("finish", &[]),
        (I::Handshake, 2) => ("context_type", &[Uint32]),
        (I::Handshake, 3) => ("name", &[String]),
        (I::Handshake, 4) => ("interface_version", &[String, Uint32]),
        (I::Connection, 0) => ("sync", &[NewId, Uint32]),
        (I::Connection, 1) => ("disconnect", &[]),
        (I::Pingpong, 0) => ("pingpong.done", &[Uint64]),
        (I::Seat, 0) | (I::Device, 0) => ("release", &[]),
        (I::Seat, 1) => ("bind", &[Uint64]),
        (I::Device, 1) => ("start_emulating", &[Uint32, Uint32]),
        (I::Device, 2) => ("stop_emulating", &[Uint32]),
        (I::Device, 3) => ("frame", &[Uint32, Uint64]),
        (I::PointerAbsolute, 1) | (I::Scroll, 1) => ("motion", &[Float, Float]),
        (I::Button, 1) | (I::Keyboard, 1) => ("press", &[Uint32, Uint32]),
        (I::Scroll, 2) => ("scroll_discrete", &[Int32, Int32]),
        (I::Scroll, 3) => ("scroll_stop", &[Uint32, Uint32, Uint32]),
        (I::Touchscreen, 1) | (I::Touchscreen, 2) => ("touch", &[Uint32, Float, Float]),
        (I::Touchscreen, 3) => ("touch.up", &[Uint32]),
        (interface, opcode) => {
            return Err(ProtocolError::MalformedPayload(format!(
                "unknown request opcode {opcode} for {}",
                interface.name()
            )))
        }
    };
    let args = ArgList::new(name, decode_args(&raw.body, signature)?);

    let request = match (interface, raw.opcode) {
        (I::Handshake, 0) => Request::HandshakeVersion {
            version: args.u32(0)?,
        },
        (I::Handshake, 1) => Request::HandshakeFinish,
        (I::Handshake, 2) => Request::HandshakeContextType {
            context: if args.u32(0)? == ContextType::Receiver as u32 {
                ContextType::Receiver
            } else {
                ContextType::Sender
            },
        },
        (I::Handshake, 3) => Request::HandshakeName {
            name: args.string(0)?,
        },
        (I::Handshake, _) => {
            let name = args.string(0)?;
            let interface = InterfaceKind::from_name(&name).ok_or_else(|| {
                ProtocolError::MalformedPayload(format!("unknown interface {name}"))
            })?;
            Request::HandshakeInterfaceVersion {
                interface,
                version: args.u32(1)?,
            }
        }
        (I::Connection, 0) => Request::Sync {
            connection: object,
            callback: args.u64(0)?,
            version: args.u32(1)?,
        },
        (I::Connection, _) => Request::Disconnect { connection: object },
        (I::Pingpong, _) => Request::PingpongDone {
            pingpong: object,
            data: args.u64(0)?,
        },
        (I::Seat, 0) => Request::SeatRelease { seat: object },
        (I::Seat, _) => Request::SeatBind {
            seat: object,
            capabilities: args.u64(0)?,
        },
        (I::Device, 0) => Request::DeviceRelease { device: object },
        (I::Device, 1) => Request::StartEmulating {
            device: object,
            last_serial: args.u32(0)?,
            sequence: args.u32(1)?,
        },
        (I::Device, 2) => Request::StopEmulating {
            device: object,
            last_serial: args.u32(0)?,
        },
        (I::Device, _) => {
            Request::Frame(FrameCommit::new(object, args.u32(0)?, args.u64(1)?))
        }
        (I::PointerAbsolute, _) => Request::MotionAbsolute {
            pointer: object,
            x: args.f32(0)?,
            y: args.f32(1)?,
        },
        (I::Button, _) => Request::Button {
            button: object,
            code: args.u32(0)?,
            state: args.press_state(1)?,
        },
        (I::Keyboard, _) => Request::Key {
            keyboard: object,
            key: args.u32(0)?,
            state: args.press_state(1)?,
        },
        (I::Scroll, 1) => Request::Scroll {
            scroll: object,
            x: args.f32(0)?,
            y: args.f32(1)?,
        },
        (I::Scroll, 2) => Request::ScrollDiscrete {
            scroll: object,
            x: args.i32(0)?,
            y: args.i32(1)?,
        },
        (I::Scroll, _) => Request::ScrollStop {
            scroll: object,
            x: args.u32(0)? != 0,
            y: args.u32(1)? != 0,
            is_cancel: args.u32(2)? != 0,
        },
        (I::Touchscreen, 1) => Request::TouchDown {
            touchscreen: object,
            touch_id: args.u32(0)?,
            x: args.f32(1)?,
            y: args.f32(2)?,
        },
        (I::Touchscreen, 2) => Request::TouchMotion {
            touchscreen: object,
            touch_id: args.u32(0)?,
            x: args.f32(1)?,
            y: args.f32(2)?,
        },
        (I::Touchscreen, _) => Request::TouchUp {
            touchscreen: object,
            touch_id: args.u32(0)?,
        },
        (I::Callback, _) => {
            return Err(ProtocolError::MalformedPayload(
                "ei_callback has no requests".to_string(),
            ))
        }
    };
    Ok(request)
}

// ── Events ────────────────────────────────────────────────────────────────────

/// A server → client message.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    HandshakeVersion { version: u32 },
    HandshakeInterfaceVersion { name: String, version: u32 },
    HandshakeConnection { serial: u32, connection: u64, version: u32 },

    Disconnected {
        last_serial: u32,
        reason: DisconnectReason,
        explanation: Option<String>,
    },
    SeatAdded { seat: u64, version: u32 },
    InvalidObject { last_serial: u32, invalid_id: u64 },
    Ping { pingpong: u64, version: u32 },

    CallbackDone { callback: u64, data: u64 },

    /// Event 0 of seats, devices and device sub-interfaces.
    Destroyed { object: u64, serial: u32 },

    SeatName { seat: u64, name: String },
    SeatCapability { seat: u64, mask: u64, interface: String },
    SeatDone { seat: u64 },
    DeviceAdded { seat: u64, device: u64, version: u32 },

    DeviceName { device: u64, name: String },
    DeviceType { device: u64, device_type: u32 },
    DeviceDimensions { device: u64, width: u32, height: u32 },
    DeviceRegion { device: u64, region: Region },
    DeviceInterface {
        device: u64,
        object: u64,
        interface: String,
        version: u32,
    },
    DeviceDone { device: u64 },
    DeviceResumed { device: u64, serial: u32 },
    DevicePaused { device: u64, serial: u32 },

    /// The keymap file descriptor itself travels out of band.
    KeyboardKeymap { keyboard: u64, keymap_type: u32, size: u32 },
    KeyboardModifiers {
        keyboard: u64,
        serial: u32,
        depressed: u32,
        locked: u32,
        latched: u32,
        group: u32,
    },

    /// Opcode not handled by this client; skipped by declared length.
    Unknown {
        object: u64,
        interface: InterfaceKind,
        opcode: u32,
    },
}

impl Event {
    /// Serial carried by the event, if any.  The dispatcher records it as
    /// the "last serial" echoed in emulation requests.
    pub fn serial(&self) -> Option<u32> {
        match self {
            Event::HandshakeConnection { serial, .. }
            | Event::Destroyed { serial, .. }
            | Event::DeviceResumed { serial, .. }
            | Event::DevicePaused { serial, .. }
            | Event::KeyboardModifiers { serial, .. } => Some(*serial),
            Event::Disconnected { last_serial, .. } | Event::InvalidObject { last_serial, .. } => {
                Some(*last_serial)
            }
            _ => None,
        }
    }

    /// Encodes the event for `object_id`.  Used by test servers.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedPayload`] for [`Event::Unknown`]
    /// and propagates codec errors.
    pub fn encode(&self, object_id: u64) -> Result<Vec<u8>, ProtocolError> {
        let (opcode, args) = match self {
            Event::HandshakeVersion { version } => (0, vec![Arg::Uint32(*version)]),
            Event::HandshakeInterfaceVersion { name, version } => (
                1,
                vec![Arg::String(Some(name.clone())), Arg::Uint32(*version)],
            ),
            Event::HandshakeConnection {
                serial,
                connection,
                version,
            } => (
                2,
                vec![
                    Arg::Uint32(*serial),
                    Arg::NewId(*connection),
                    Arg::Uint32(*version),
                ],
            ),
            Event::Disconnected {
                last_serial,
                reason,
                explanation,
            } => (
                0,
                vec![
                    Arg::Uint32(*last_serial),
                    Arg::Uint32(u32::from(*reason)),
                    Arg::String(explanation.clone()),
                ],
            ),
            Event::SeatAdded { seat, version } => {
                (1, vec![Arg::NewId(*seat), Arg::Uint32(*version)])
            }
            Event::InvalidObject {
                last_serial,
                invalid_id,
            } => (2, vec![Arg::Uint32(*last_serial), Arg::Uint64(*invalid_id)]),
            Event::Ping { pingpong, version } => {
                (3, vec![Arg::NewId(*pingpong), Arg::Uint32(*version)])
            }
            Event::CallbackDone { data, .. } => (0, vec![Arg::Uint64(*data)]),
            Event::Destroyed { serial, .. } => (0, vec![Arg::Uint32(*serial)]),
            Event::SeatName { name, .. } => (1, vec![Arg::String(Some(name.clone()))]),
            Event::SeatCapability {
                mask, interface, ..
            } => (
                2,
                vec![Arg::Uint64(*mask), Arg::String(Some(interface.clone()))],
            ),
            Event::SeatDone { .. } => (3, vec![]),
            Event::DeviceAdded {
                device, version, ..
            } => (4, vec![Arg::NewId(*device), Arg::Uint32(*version)]),
            Event::DeviceName { name, .. } => (1, vec![Arg::String(Some(name.clone()))]),
            Event::DeviceType { device_type, .. } => (2, vec![Arg::Uint32(*device_type)]),
            Event::DeviceDimensions { width, height, .. } => {
                (3, vec![Arg::Uint32(*width), Arg::Uint32(*height)])
            }
            Event::DeviceRegion { region, .. } => (
                4,
                vec![
                    Arg::Uint32(region.offset_x),
                    Arg::Uint32(region.offset_y),
                    Arg::Uint32(region.width),
                    Arg::Uint32(region.height),
                    Arg::Float(region.scale),
                ],
            ),
            Event::DeviceInterface {
                object,
                interface,
                version,
                ..
            } => (
                5,
                vec![
                    Arg::NewId(*object),
                    Arg::String(Some(interface.clone())),
                    Arg::Uint32(*version),
                ],
            ),
            Event::DeviceDone { .. } => (6, vec![]),
            Event::DeviceResumed { serial, .. } => (7, vec![Arg::Uint32(*serial)]),
            Event::DevicePaused { serial, .. } => (8, vec![Arg::Uint32(*serial)]),
            Event::KeyboardKeymap {
                keymap_type, size, ..
            } => (
                1,
                vec![Arg::Uint32(*keymap_type), Arg::Uint32(*size), Arg::Fd],
            ),
            Event::KeyboardModifiers {
                serial,
                depressed,
                locked,
                latched,
                group,
                ..
            } => (
                3,
                vec![
                    Arg::Uint32(*serial),
                    Arg::Uint32(*depressed),
                    Arg::Uint32(*locked),
                    Arg::Uint32(*latched),
                    Arg::Uint32(*group),
                ],
            ),
            Event::Unknown { .. } => {
                return Err(ProtocolError::MalformedPayload(
                    "cannot encode an unknown event".to_string(),
                ))
            }
        };
        codec::encode(object_id, opcode, &args)
    }
}

/// Decodes an event received on an object of `interface`.
///
/// Opcodes this client does not handle decode as [`Event::Unknown`]; the
/// message has already been framed by its declared length so nothing is
/// lost by skipping it.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the arguments of a known opcode are
/// malformed or truncated.
pub fn decode_event(interface: InterfaceKind, raw: &RawMessage) -> Result<Event, ProtocolError> {
    use ArgType::*;
    use InterfaceKind as I;

    let object = raw.object_id;
    let (name, signature): (&'static str, &[ArgType]) = match (interface, raw.opcode) {
        (I::Handshake, 0) => ("handshake_version", &[Uint32]),
        (I::Handshake, 1) => ("interface_version", &[String, Uint32]),
        (I::Handshake, 2) => ("connection", &[Uint32, NewId, Uint32]),
        (I::Connection, 0) => ("disconnected", &[Uint32, Uint32, String]),
        (I::Connection, 1) => ("seat", &[NewId, Uint32]),
        (I::Connection, 2) => ("invalid_object", &[Uint32, Uint64]),
        (I::Connection, 3) => ("ping", &[NewId, Uint32]),
        (I::Callback, 0) => ("done", &[Uint64]),
        (I::Seat, 0)
        | (I::Device, 0)
        | (I::PointerAbsolute, 0)
        | (I::Button, 0)
        | (I::Scroll, 0)
        | (I::Keyboard, 0)
        | (I::Touchscreen, 0) => ("destroyed", &[Uint32]),
        (I::Seat, 1) | (I::Device, 1) => ("name", &[String]),
        (I::Seat, 2) => ("capability", &[Uint64, String]),
        (I::Seat, 3) | (I::Device, 6) => ("done", &[]),
        (I::Seat, 4) => ("device", &[NewId, Uint32]),
        (I::Device, 2) => ("device_type", &[Uint32]),
        (I::Device, 3) => ("dimensions", &[Uint32, Uint32]),
        (I::Device, 4) => ("region", &[Uint32, Uint32, Uint32, Uint32, Float]),
        (I::Device, 5) => ("interface", &[NewId, String, Uint32]),
        (I::Device, 7) => ("resumed", &[Uint32]),
        (I::Device, 8) => ("paused", &[Uint32]),
        (I::Keyboard, 1) => ("keymap", &[Uint32, Uint32, Fd]),
        (I::Keyboard, 3) => ("modifiers", &[Uint32, Uint32, Uint32, Uint32, Uint32]),
        (interface, opcode) => {
            return Ok(Event::Unknown {
                object,
                interface,
                opcode,
            })
        }
    };
    let args = ArgList::new(name, decode_args(&raw.body, signature)?);

    let event = match (interface, raw.opcode) {
        (I::Handshake, 0) => Event::HandshakeVersion {
            version: args.u32(0)?,
        },
        (I::Handshake, 1) => Event::HandshakeInterfaceVersion {
            name: args.string(0)?,
            version: args.u32(1)?,
        },
        (I::Handshake, _) => Event::HandshakeConnection {
            serial: args.u32(0)?,
            connection: args.u64(1)?,
            version: args.u32(2)?,
        },
        (I::Connection, 0) => Event::Disconnected {
            last_serial: args.u32(0)?,
            reason: DisconnectReason::from(args.u32(1)?),
            explanation: args.optional_string(2)?,
        },
        (I::Connection, 1) => Event::SeatAdded {
            seat: args.u64(0)?,
            version: args.u32(1)?,
        },
        (I::Connection, 2) => Event::InvalidObject {
            last_serial: args.u32(0)?,
            invalid_id: args.u64(1)?,
        },
        (I::Connection, _) => Event::Ping {
            pingpong: args.u64(0)?,
            version: args.u32(1)?,
        },
        (I::Callback, _) => Event::CallbackDone {
            callback: object,
            data: args.u64(0)?,
        },
        (_, 0) => Event::Destroyed {
            object,
            serial: args.u32(0)?,
        },
        (I::Seat, 1) => Event::SeatName {
            seat: object,
            name: args.string(0)?,
        },
        (I::Seat, 2) => Event::SeatCapability {
            seat: object,
            mask: args.u64(0)?,
            interface: args.string(1)?,
        },
        (I::Seat, 3) => Event::SeatDone { seat: object },
        (I::Seat, _) => Event::DeviceAdded {
            seat: object,
            device: args.u64(0)?,
            version: args.u32(1)?,
        },
        (I::Device, 1) => Event::DeviceName {
            device: object,
            name: args.string(0)?,
        },
        (I::Device, 2) => Event::DeviceType {
            device: object,
            device_type: args.u32(0)?,
        },
        (I::Device, 3) => Event::DeviceDimensions {
            device: object,
            width: args.u32(0)?,
            height: args.u32(1)?,
        },
        (I::Device, 4) => Event::DeviceRegion {
            device: object,
            region: Region {
                offset_x: args.u32(0)?,
                offset_y: args.u32(1)?,
                width: args.u32(2)?,
                height: args.u32(3)?,
                scale: args.f32(4)?,
            },
        },
        (I::Device, 5) => Event::DeviceInterface {
            device: object,
            object: args.u64(0)?,
            interface: args.string(1)?,
            version: args.u32(2)?,
        },
        (I::Device, 6) => Event::DeviceDone { device: object },
        (I::Device, 7) => Event::DeviceResumed {
            device: object,
            serial: args.u32(0)?,
        },
        (I::Device, _) => Event::DevicePaused {
            device: object,
            serial: args.u32(0)?,
        },
        (I::Keyboard, 1) => Event::KeyboardKeymap {
            keyboard: object,
            keymap_type: args.u32(0)?,
            size: args.u32(1)?,
        },
        _ => Event::KeyboardModifiers {
            keyboard: object,
            serial: args.u32(0)?,
            depressed: args.u32(1)?,
            locked: args.u32(2)?,
            latched: args.u32(3)?,
            group: args.u32(4)?,
        },
    };
    Ok(event)
}

// ── Private helpers ───────────────────────────────────────────────────────────

/// Decoded arguments plus the message name for error context.
struct ArgList {
    message: &'static str,
    args: Vec<Arg>,
}

impl ArgList {
    fn new(message: &'static str, args: Vec<Arg>) -> Self {
        Self { message, args }
    }

    fn mismatch(&self, index: usize, expected: ArgType) -> ProtocolError {
        ProtocolError::ArgumentMismatch {
            message: self.message,
            index,
            expected,
        }
    }

    fn u32(&self, index: usize) -> Result<u32, ProtocolError> {
        self.args
            .get(index)
            .and_then(Arg::as_u32)
            .ok_or_else(|| self.mismatch(index, ArgType::Uint32))
    }

    fn i32(&self, index: usize) -> Result<i32, ProtocolError> {
        self.args
            .get(index)
            .and_then(Arg::as_i32)
            .ok_or_else(|| self.mismatch(index, ArgType::Int32))
    }

    fn u64(&self, index: usize) -> Result<u64, ProtocolError> {
        self.args
            .get(index)
            .and_then(Arg::as_u64)
            .ok_or_else(|| self.mismatch(index, ArgType::Uint64))
    }

    fn f32(&self, index: usize) -> Result<f32, ProtocolError> {
        self.args
            .get(index)
            .and_then(Arg::as_f32)
            .ok_or_else(|| self.mismatch(index, ArgType::Float))
    }

    fn string(&self, index: usize) -> Result<String, ProtocolError> {
        self.args
            .get(index)
            .and_then(Arg::as_str)
            .map(str::to_string)
            .ok_or_else(|| self.mismatch(index, ArgType::String))
    }

    fn optional_string(&self, index: usize) -> Result<Option<String>, ProtocolError> {
        match self.args.get(index) {
            Some(Arg::String(s)) => Ok(s.clone()),
            _ => Err(self.mismatch(index, ArgType::String)),
        }
    }

    fn press_state(&self, index: usize) -> Result<PressState, ProtocolError> {
        let raw = self.u32(index)?;
        PressState::try_from(raw).map_err(|_| {
            ProtocolError::MalformedPayload(format!("{}: invalid press state {raw}", self.message))
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::decode;

    fn raw(bytes: &[u8]) -> RawMessage {
        decode(bytes).expect("valid frame").0
    }

    #[test]
    fn test_frame_request_carries_serial_and_timestamp_on_device_object() {
        // Arrange
        let commit = FrameCommit::new(SERVER_ID_BASE + 4, 1, 123_456);

        // Act
        let bytes = Request::Frame(commit).encode().unwrap();
        let decoded = decode_request(InterfaceKind::Device, &raw(&bytes)).unwrap();

        // Assert
        assert_eq!(bytes.len(), 16 + 4 + 8);
        assert_eq!(decoded, Request::Frame(commit));
    }

    #[test]
    fn test_start_emulating_sends_last_serial_then_sequence() {
        // Arrange
        let request = Request::StartEmulating {
            device: 9,
            last_serial: 42,
            sequence: 1,
        };

        // Act
        let bytes = request.encode().unwrap();

        // Assert
        assert_eq!(&bytes[12..16], &1u32.to_ne_bytes(), "opcode");
        assert_eq!(&bytes[16..20], &42u32.to_ne_bytes());
        assert_eq!(&bytes[20..24], &1u32.to_ne_bytes());
    }

    #[test]
    fn test_handshake_requests_target_object_zero() {
        let requests = [
            Request::HandshakeVersion { version: 1 },
            Request::HandshakeContextType {
                context: ContextType::Sender,
            },
            Request::HandshakeName {
                name: "eis-client".to_string(),
            },
            Request::HandshakeFinish,
        ];
        for request in &requests {
            assert_eq!(request.object_id(), HANDSHAKE_OBJECT_ID, "{}", request.name());
        }
    }

    #[test]
    fn test_interface_version_request_decodes_interface_name() {
        let request = Request::HandshakeInterfaceVersion {
            interface: InterfaceKind::Touchscreen,
            version: 1,
        };
        let bytes = request.encode().unwrap();

        let decoded = decode_request(InterfaceKind::Handshake, &raw(&bytes)).unwrap();

        assert_eq!(decoded, request);
    }

    #[test]
    fn test_scroll_stop_encodes_flags_as_u32() {
        // Arrange
        let request = Request::ScrollStop {
            scroll: 3,
            x: false,
            y: true,
            is_cancel: false,
        };

        // Act
        let bytes = request.encode().unwrap();

        // Assert
        assert_eq!(&bytes[16..20], &0u32.to_ne_bytes());
        assert_eq!(&bytes[20..24], &1u32.to_ne_bytes());
        assert_eq!(&bytes[24..28], &0u32.to_ne_bytes());
        assert_eq!(decode_request(InterfaceKind::Scroll, &raw(&bytes)).unwrap(), request);
    }

    #[test]
    fn test_device_interface_event_decodes_new_id_name_and_version() {
        // Arrange
        let event = Event::DeviceInterface {
            device: SERVER_ID_BASE + 2,
            object: SERVER_ID_BASE + 3,
            interface: "ei_keyboard".to_string(),
            version: 1,
        };
        let bytes = event.encode(SERVER_ID_BASE + 2).unwrap();

        // Act
        let decoded = decode_event(InterfaceKind::Device, &raw(&bytes)).unwrap();

        // Assert
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_region_event_decodes_scale() {
        let event = Event::DeviceRegion {
            device: 7,
            region: Region {
                offset_x: 1920,
                offset_y: 0,
                width: 1280,
                height: 1024,
                scale: 1.5,
            },
        };
        let bytes = event.encode(7).unwrap();
        assert_eq!(decode_event(InterfaceKind::Device, &raw(&bytes)).unwrap(), event);
    }

    #[test]
    fn test_disconnected_event_with_null_explanation() {
        let event = Event::Disconnected {
            last_serial: 5,
            reason: DisconnectReason::Transport,
            explanation: None,
        };
        let bytes = event.encode(1).unwrap();
        assert_eq!(
            decode_event(InterfaceKind::Connection, &raw(&bytes)).unwrap(),
            event
        );
    }

    #[test]
    fn test_keymap_event_skips_out_of_band_fd() {
        let event = Event::KeyboardKeymap {
            keyboard: 11,
            keymap_type: 1,
            size: 4096,
        };
        let bytes = event.encode(11).unwrap();
        assert_eq!(bytes.len(), 16 + 8);
        assert_eq!(decode_event(InterfaceKind::Keyboard, &raw(&bytes)).unwrap(), event);
    }

    #[test]
    fn test_unknown_opcode_is_not_fatal() {
        // Arrange – opcode 12 is region_mapping_id, not handled by this client
        let bytes = codec::encode(7, 12, &[Arg::String(Some("map-1".to_string()))]).unwrap();

        // Act
        let decoded = decode_event(InterfaceKind::Device, &raw(&bytes)).unwrap();

        // Assert
        assert_eq!(
            decoded,
            Event::Unknown {
                object: 7,
                interface: InterfaceKind::Device,
                opcode: 12
            }
        );
    }

    #[test]
    fn test_truncated_known_event_is_an_error() {
        // Arrange – "resumed" needs a u32 serial but the body is empty
        let bytes = codec::encode(7, 7, &[]).unwrap();

        // Act
        let result = decode_event(InterfaceKind::Device, &raw(&bytes));

        // Assert
        assert!(matches!(result, Err(ProtocolError::LengthOverrun { .. })));
    }

    #[test]
    fn test_destroyed_is_event_zero_of_sub_interfaces() {
        let bytes = Event::Destroyed {
            object: 21,
            serial: 8,
        }
        .encode(21)
        .unwrap();

        for interface in [
            InterfaceKind::PointerAbsolute,
            InterfaceKind::Button,
            InterfaceKind::Keyboard,
            InterfaceKind::Touchscreen,
        ] {
            assert_eq!(
                decode_event(interface, &raw(&bytes)).unwrap(),
                Event::Destroyed {
                    object: 21,
                    serial: 8
                }
            );
        }
    }

    #[test]
    fn test_event_serial_reports_serial_bearing_events() {
        assert_eq!(
            Event::DeviceResumed {
                device: 1,
                serial: 3
            }
            .serial(),
            Some(3)
        );
        assert_eq!(Event::SeatDone { seat: 1 }.serial(), None);
    }

    #[test]
    fn test_interface_names_round_trip() {
        for kind in InterfaceKind::ANNOUNCED {
            assert_eq!(InterfaceKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(InterfaceKind::from_name("ei_text"), None);
    }
}
