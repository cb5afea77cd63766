//! eis-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does eis-client do? (for beginners)
//!
//! On a Wayland desktop, programs cannot inject keyboard and mouse input
//! the way X11 programs could.  Instead the compositor (or a portal acting
//! for it) hands out a socket that speaks the *EI* protocol.  A client on
//! that socket is given virtual devices, and input it sends on those
//! devices is treated like input from real hardware.
//!
//! This crate is such a client:
//!
//! 1. It performs the EI handshake, declaring itself an input *sender*.
//! 2. It binds the seat capabilities it wants (absolute pointer, keyboard,
//!    touchscreen) and waits until each required capability has a device.
//! 3. It turns high-level gestures ("double-click here with ctrl held",
//!    "pinch out", "type this text") into correctly bracketed sequences of
//!    start-emulating / events / frame / stop-emulating requests.
//! 4. It guarantees that no button, key or touch is left held when a
//!    gesture fails, is cancelled, or the session closes.

/// Application layer: gesture planning, emulation state, errors.
pub mod application;

/// Infrastructure layer: registry, handshake, dispatcher, config.
pub mod infrastructure;

pub use application::backend::{perform_all, InputBackend};
pub use application::errors::InputError;
pub use application::gestures::{Gesture, Waypoint};
pub use infrastructure::config::{ClientConfig, ConfigError};
pub use infrastructure::dispatcher::InputSession;
