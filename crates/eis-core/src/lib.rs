//! # eis-core
//!
//! Platform-free building blocks for an EI input emulation client: the
//! wire codec, the interface catalog, key translation tables and the
//! screen geometry used to plan gestures.
//!
//! This crate does no I/O.  It has no dependency on sockets, async
//! runtimes or compositor libraries.
//!
//! # Architecture overview (for beginners)
//!
//! EI ("emulated input") is the protocol a Wayland compositor exposes so a
//! trusted client can inject pointer, keyboard and touch events.  The
//! client talks to an EIS ("emulated input server") endpoint over a Unix
//! socket.
//!
//! - **`protocol`** – How bytes travel over the socket.  Every message is a
//!   16-byte header (object id, length, opcode) followed by typed
//!   arguments.  The catalog maps opcodes of each interface to typed Rust
//!   enums.
//!
//! - **`keymap`** – Which physical key (evdev code) produces a character on
//!   a US QWERTY layout, plus key names and `ctrl+shift+t` style combos.
//!
//! - **`domain`** – Points, display bounds, interpolation and capability
//!   types shared by the gesture planner.

pub mod domain;
pub mod keymap;
pub mod protocol;

// Re-export the most-used types at the crate root.
pub use domain::geometry::{DisplayBounds, Point};
pub use domain::input::{Capability, CapabilitySet, MouseButton, ScrollAxis};
pub use keymap::{KeyCode, KeyCombo, KeyMapper, KeymapError, Modifier};
pub use protocol::codec::ProtocolError;
pub use protocol::interfaces::{Event, FrameCommit, InterfaceKind, Request};
