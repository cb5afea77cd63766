//! Infrastructure layer: everything that touches the EI socket.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `eis_core`, but MUST NOT be imported by the `application` layer.
//!
//! # Sub-modules
//!
//! - **`registry`** – Every live protocol object, plus what seats and
//!   devices have told us about themselves.
//!
//! - **`handshake`** – Sans-I/O negotiator that turns the server's opening
//!   events into our handshake replies and seat bindings.  Also handles
//!   devices that appear later (hot-plug).
//!
//! - **`dispatcher`** – The actor that owns the socket, executes gesture
//!   plans and drains incoming events, plus the `InputSession` handle.
//!
//! - **`config`** – TOML configuration with serde defaults.

pub mod config;
pub mod dispatcher;
pub mod handshake;
pub mod registry;
