//! Domain types for input emulation.
//!
//! This module contains pure logic with no I/O: where things are on screen
//! and what kinds of input exist.
//!
//! # What is "domain" in Clean Architecture? (for beginners)
//!
//! The innermost layer of the workspace.  Domain code has no imports from
//! sockets, async runtimes or OS APIs, so it can be tested anywhere.  The
//! gesture planner in `eis-client` builds entirely on these types; the
//! protocol layer only sees the numbers they resolve to.

/// Points, display bounds, interpolation and even splitting.
pub mod geometry;

/// Capabilities, mouse buttons and scroll axes.
pub mod input;
