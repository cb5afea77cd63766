//! Protocol module: the wire codec and the EI interface catalog.

pub mod codec;
pub mod interfaces;
pub mod sequence;

pub use codec::{decode, encode, Arg, ArgType, MessageBuffer, ProtocolError, RawMessage};
pub use interfaces::{
    decode_event, decode_request, ContextType, DisconnectReason, Event, FrameCommit,
    InterfaceKind, PressState, Region, Request, HANDSHAKE_OBJECT_ID, SERVER_ID_BASE,
};
pub use sequence::{ClientIdAllocator, SerialTracker};
