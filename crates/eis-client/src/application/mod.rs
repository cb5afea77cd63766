//! Application layer: gesture planning and emulation bookkeeping.
//!
//! # What lives here?
//!
//! - **`gestures`** – Turns intents ("double-click with ctrl held", "three
//!   finger swipe") into ordered step plans.  Pure, no I/O.
//!
//! - **`session_tracker`** – The per-device emulation state machine.  Every
//!   request that carries input is checked here before it is written.
//!
//! - **`errors`** – The error type returned by every public operation.
//!
//! - **`backend`** – The `InputBackend` trait the binary drives, plus the
//!   use case that runs a list of gestures through it.

pub mod backend;
pub mod errors;
pub mod gestures;
pub mod session_tracker;
