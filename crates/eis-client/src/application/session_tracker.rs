//! Emulation Session Tracker: per-device `Idle → Emulating → Idle` lifecycle.
//!
//! Every request that puts input on a device goes through this tracker
//! first.  It checks the device is in the right state, records what is held
//! (buttons, keys, touch slots) and only then hands back the typed
//! [`Request`] to write.  A call in the wrong state returns
//! [`InputError::ProtocolViolation`] without building anything, so nothing
//! reaches the wire.
//!
//! # State machine (for beginners)
//!
//! ```text
//!            start_emulating            stop_emulating
//!   Idle ───────────────────▶ Emulating ──────────────▶ Idle
//!                              │  ▲
//!                   emit/frame │  │
//!                              └──┘
//! ```
//!
//! `force_release` is the escape hatch for cancelled or failed gestures: it
//! produces the touch-ups, button and key releases, the frame and the
//! `stop_emulating` needed to leave the device clean, and marks it `Idle`
//! whether or not those requests can still be written.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use eis_core::protocol::PressState;
use eis_core::{FrameCommit, InterfaceKind, Point, Request};
use tracing::{debug, warn};

use crate::application::errors::InputError;
use crate::application::gestures::{DeviceView, InputCall};

/// Emulation state of one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmulationState {
    #[default]
    Idle,
    /// Between `start_emulating` and `stop_emulating`.  `sequence` is the
    /// value sent with the start request.
    Emulating { sequence: u32 },
}

/// One live finger contact.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchSlot {
    pub slot_id: u32,
    pub device: u64,
    pub origin: Point,
}

/// Object ids of a device and the interfaces bound on it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceHandles {
    pub device: u64,
    pub interfaces: BTreeMap<InterfaceKind, u64>,
}

impl DeviceHandles {
    pub fn new(device: u64) -> Self {
        Self {
            device,
            interfaces: BTreeMap::new(),
        }
    }

    pub fn with(mut self, kind: InterfaceKind, object: u64) -> Self {
        self.interfaces.insert(kind, object);
        self
    }

    pub fn interface(&self, kind: InterfaceKind) -> Option<u64> {
        self.interfaces.get(&kind).copied()
    }
}

#[derive(Debug, Default)]
struct DeviceEmulation {
    state: EmulationState,
    held_buttons: BTreeSet<u32>,
    held_keys: BTreeSet<u32>,
    touches: BTreeMap<u32, TouchSlot>,
    last_sequence: u32,
    paused: bool,
}

impl DeviceEmulation {
    fn clear_held(&mut self) {
        self.held_buttons.clear();
        self.held_keys.clear();
        self.touches.clear();
    }
}

/// Tracks emulation state for every device the session has touched.
#[derive(Debug, Default)]
pub struct EmulationTracker {
    devices: HashMap<u64, DeviceEmulation>,
}

impl EmulationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, device: u64) -> EmulationState {
        self.devices
            .get(&device)
            .map(|d| d.state)
            .unwrap_or_default()
    }

    pub fn is_emulating(&self, device: u64) -> bool {
        matches!(self.state(device), EmulationState::Emulating { .. })
    }

    /// Devices currently between start and stop.
    pub fn emulating_devices(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .devices
            .iter()
            .filter(|(_, d)| matches!(d.state, EmulationState::Emulating { .. }))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Live touch slots on `device`, lowest id first.
    pub fn touch_slots(&self, device: u64) -> Vec<TouchSlot> {
        self.devices
            .get(&device)
            .map(|d| d.touches.values().copied().collect())
            .unwrap_or_default()
    }

    /// Snapshot used by the gesture synthesizer.
    pub fn view(&self, device: u64) -> DeviceView {
        match self.devices.get(&device) {
            Some(d) => DeviceView {
                emulating: matches!(d.state, EmulationState::Emulating { .. }),
                held_buttons: d.held_buttons.clone(),
                held_keys: d.held_keys.clone(),
                live_touches: d.touches.keys().copied().collect(),
            },
            None => DeviceView::default(),
        }
    }

    /// Builds `start_emulating` and moves the device to `Emulating`.
    ///
    /// # Errors
    ///
    /// [`InputError::ProtocolViolation`] if the device is already emulating
    /// or is paused.
    pub fn start_emulating(&mut self, device: u64, last_serial: u32) -> Result<Request, InputError> {
        let entry = self.devices.entry(device).or_default();
        if entry.paused {
            return Err(InputError::ProtocolViolation(format!(
                "device {device:#x} is paused and cannot start emulating"
            )));
        }
        if let EmulationState::Emulating { sequence } = entry.state {
            return Err(InputError::ProtocolViolation(format!(
                "device {device:#x} is already emulating (sequence {sequence})"
            )));
        }

        let sequence = entry.last_sequence.wrapping_add(1);
        entry.last_sequence = sequence;
        entry.state = EmulationState::Emulating { sequence };
        debug!(device, sequence, "start emulating");
        Ok(Request::StartEmulating {
            device,
            last_serial,
            sequence,
        })
    }

    /// Checks `call` against the device state, records held input and
    /// builds its request.
    ///
    /// # Errors
    ///
    /// - [`InputError::ProtocolViolation`] if the device is idle, a touch id
    ///   is reused while live, or an unknown touch id is moved or lifted.
    /// - [`InputError::CapabilityUnavailable`] if the device lacks the
    ///   interface the call needs.
    pub fn emit(&mut self, handles: &DeviceHandles, call: &InputCall) -> Result<Request, InputError> {
        let device = handles.device;
        let entry = self.emulating_entry(device, "input event")?;
        let object = handles
            .interface(call.interface())
            .ok_or(InputError::CapabilityUnavailable(call.capability()))?;

        let request = match *call {
            InputCall::Motion { x, y } => Request::MotionAbsolute {
                pointer: object,
                x: x as f32,
                y: y as f32,
            },
            InputCall::Button { code, pressed } => {
                if pressed {
                    entry.held_buttons.insert(code);
                } else {
                    entry.held_buttons.remove(&code);
                }
                Request::Button {
                    button: object,
                    code,
                    state: press_state(pressed),
                }
            }
            InputCall::Scroll { dx, dy } => Request::Scroll {
                scroll: object,
                x: dx,
                y: dy,
            },
            InputCall::ScrollDiscrete { dx, dy } => Request::ScrollDiscrete {
                scroll: object,
                x: dx,
                y: dy,
            },
            InputCall::ScrollStop { x, y } => Request::ScrollStop {
                scroll: object,
                x,
                y,
                is_cancel: false,
            },
            InputCall::Key { code, pressed } => {
                if pressed {
                    entry.held_keys.insert(code);
                } else {
                    entry.held_keys.remove(&code);
                }
                Request::Key {
                    keyboard: object,
                    key: code,
                    state: press_state(pressed),
                }
            }
            InputCall::TouchDown { id, x, y } => {
                if entry.touches.contains_key(&id) {
                    return Err(InputError::ProtocolViolation(format!(
                        "touch slot {id} is already live on device {device:#x}"
                    )));
                }
                entry.touches.insert(
                    id,
                    TouchSlot {
                        slot_id: id,
                        device,
                        origin: Point::new(x, y),
                    },
                );
                Request::TouchDown {
                    touchscreen: object,
                    touch_id: id,
                    x: x as f32,
                    y: y as f32,
                }
            }
            InputCall::TouchMotion { id, x, y } => {
                if !entry.touches.contains_key(&id) {
                    return Err(unknown_touch(id, device));
                }
                Request::TouchMotion {
                    touchscreen: object,
                    touch_id: id,
                    x: x as f32,
                    y: y as f32,
                }
            }
            InputCall::TouchUp { id } => {
                if entry.touches.remove(&id).is_none() {
                    return Err(unknown_touch(id, device));
                }
                Request::TouchUp {
                    touchscreen: object,
                    touch_id: id,
                }
            }
        };
        Ok(request)
    }

    /// Builds the frame request for `commit`.
    ///
    /// # Errors
    ///
    /// [`InputError::ProtocolViolation`] if the device is idle.
    pub fn commit_frame(&mut self, commit: FrameCommit) -> Result<Request, InputError> {
        self.emulating_entry(commit.device, "frame")?;
        Ok(Request::Frame(commit))
    }

    /// Builds `stop_emulating` and moves the device back to `Idle`.
    ///
    /// # Errors
    ///
    /// [`InputError::ProtocolViolation`] if the device is idle.
    pub fn stop_emulating(&mut self, device: u64, last_serial: u32) -> Result<Request, InputError> {
        let entry = self.emulating_entry(device, "stop_emulating")?;
        if !entry.held_buttons.is_empty() || !entry.held_keys.is_empty() || !entry.touches.is_empty() {
            warn!(device, "stopping emulation with input still held");
            entry.clear_held();
        }
        entry.state = EmulationState::Idle;
        debug!(device, "stop emulating");
        Ok(Request::StopEmulating {
            device,
            last_serial,
        })
    }

    /// Releases everything held on the device and stops emulating.
    ///
    /// Returns the requests to send: touch-ups, button releases, key
    /// releases, one frame, then `stop_emulating`.  The device is `Idle`
    /// afterwards even if the caller cannot deliver them.  An idle device
    /// yields nothing.
    pub fn force_release(
        &mut self,
        handles: &DeviceHandles,
        last_serial: u32,
        timestamp_us: u64,
    ) -> Vec<Request> {
        let device = handles.device;
        let Some(entry) = self.devices.get_mut(&device) else {
            return Vec::new();
        };
        if entry.state == EmulationState::Idle {
            entry.clear_held();
            return Vec::new();
        }

        let mut requests = Vec::new();
        if let Some(touchscreen) = handles.interface(InterfaceKind::Touchscreen) {
            for id in entry.touches.keys() {
                requests.push(Request::TouchUp {
                    touchscreen,
                    touch_id: *id,
                });
            }
        }
        if let Some(button) = handles.interface(InterfaceKind::Button) {
            for code in &entry.held_buttons {
                requests.push(Request::Button {
                    button,
                    code: *code,
                    state: PressState::Released,
                });
            }
        }
        if let Some(keyboard) = handles.interface(InterfaceKind::Keyboard) {
            for key in entry.held_keys.iter().rev() {
                requests.push(Request::Key {
                    keyboard,
                    key: *key,
                    state: PressState::Released,
                });
            }
        }
        if !requests.is_empty() {
            requests.push(Request::Frame(FrameCommit::new(device, last_serial, timestamp_us)));
        }
        requests.push(Request::StopEmulating {
            device,
            last_serial,
        });

        warn!(
            device,
            released = requests.len(),
            "force-releasing emulation session"
        );
        entry.clear_held();
        entry.state = EmulationState::Idle;
        requests
    }

    /// Marks the device paused or resumed.
    ///
    /// A pause ends any emulation session server-side, so the device drops
    /// to `Idle` with nothing held and no requests to send.  Returns `true`
    /// if the device was emulating.
    pub fn set_paused(&mut self, device: u64, paused: bool) -> bool {
        let entry = self.devices.entry(device).or_default();
        entry.paused = paused;
        if !paused {
            return false;
        }
        let was_emulating = matches!(entry.state, EmulationState::Emulating { .. });
        entry.state = EmulationState::Idle;
        entry.clear_held();
        was_emulating
    }

    /// Drops all state for a destroyed device.  Returns `true` if it was
    /// emulating.
    pub fn forget(&mut self, device: u64) -> bool {
        self.devices
            .remove(&device)
            .is_some_and(|d| matches!(d.state, EmulationState::Emulating { .. }))
    }

    /// Drops all state; used when the channel is gone.
    pub fn clear(&mut self) {
        self.devices.clear();
    }

    fn emulating_entry(
        &mut self,
        device: u64,
        what: &str,
    ) -> Result<&mut DeviceEmulation, InputError> {
        match self.devices.get_mut(&device) {
            Some(entry) if matches!(entry.state, EmulationState::Emulating { .. }) => Ok(entry),
            _ => Err(InputError::ProtocolViolation(format!(
                "{what} on device {device:#x} while it is not emulating"
            ))),
        }
    }
}

fn press_state(pressed: bool) -> PressState {
    if pressed {
        PressState::Pressed
    } else {
        PressState::Released
    }
}

fn unknown_touch(id: u32, device: u64) -> InputError {
    InputError::ProtocolViolation(format!("touch slot {id} is not live on device {device:#x}"))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const DEV: u64 = 0xff00_0000_0000_0010;

    fn handles() -> DeviceHandles {
        DeviceHandles::new(DEV)
            .with(InterfaceKind::PointerAbsolute, DEV + 1)
            .with(InterfaceKind::Button, DEV + 2)
            .with(InterfaceKind::Keyboard, DEV + 3)
            .with(InterfaceKind::Touchscreen, DEV + 4)
    }

    fn started() -> EmulationTracker {
        let mut tracker = EmulationTracker::new();
        tracker.start_emulating(DEV, 1).unwrap();
        tracker
    }

    #[test]
    fn test_start_allocates_increasing_sequence() {
        // Arrange
        let mut tracker = EmulationTracker::new();

        // Act
        let first = tracker.start_emulating(DEV, 7).unwrap();
        tracker.stop_emulating(DEV, 7).unwrap();
        let second = tracker.start_emulating(DEV, 9).unwrap();

        // Assert
        assert_eq!(
            first,
            Request::StartEmulating {
                device: DEV,
                last_serial: 7,
                sequence: 1
            }
        );
        assert_eq!(
            second,
            Request::StartEmulating {
                device: DEV,
                last_serial: 9,
                sequence: 2
            }
        );
    }

    #[test]
    fn test_nested_start_is_a_protocol_violation() {
        let mut tracker = started();
        assert!(matches!(
            tracker.start_emulating(DEV, 1),
            Err(InputError::ProtocolViolation(_))
        ));
        assert_eq!(tracker.state(DEV), EmulationState::Emulating { sequence: 1 });
    }

    #[test]
    fn test_event_and_frame_on_idle_device_are_rejected() {
        // Arrange
        let mut tracker = EmulationTracker::new();

        // Act
        let event = tracker.emit(&handles(), &InputCall::Motion { x: 1.0, y: 1.0 });
        let frame = tracker.commit_frame(FrameCommit::new(DEV, 1, 10));
        let stop = tracker.stop_emulating(DEV, 1);

        // Assert
        assert!(matches!(event, Err(InputError::ProtocolViolation(_))));
        assert!(matches!(frame, Err(InputError::ProtocolViolation(_))));
        assert!(matches!(stop, Err(InputError::ProtocolViolation(_))));
    }

    #[test]
    fn test_paused_device_cannot_start() {
        let mut tracker = EmulationTracker::new();
        tracker.set_paused(DEV, true);
        assert!(matches!(
            tracker.start_emulating(DEV, 1),
            Err(InputError::ProtocolViolation(_))
        ));

        tracker.set_paused(DEV, false);
        assert!(tracker.start_emulating(DEV, 2).is_ok());
    }

    #[test]
    fn test_pause_drops_emulating_device_to_idle() {
        let mut tracker = started();
        tracker
            .emit(&handles(), &InputCall::Button { code: 0x110, pressed: true })
            .unwrap();

        assert!(tracker.set_paused(DEV, true));
        assert_eq!(tracker.state(DEV), EmulationState::Idle);
        assert!(!tracker.view(DEV).holds_anything());
    }

    #[test]
    fn test_missing_interface_is_capability_unavailable() {
        let mut tracker = started();
        let result = tracker.emit(&handles(), &InputCall::Scroll { dx: 0.0, dy: 15.0 });
        assert_eq!(
            result,
            Err(InputError::CapabilityUnavailable(eis_core::Capability::Pointer))
        );
    }

    #[test]
    fn test_reusing_live_touch_id_is_rejected() {
        // Arrange
        let mut tracker = started();
        tracker
            .emit(&handles(), &InputCall::TouchDown { id: 0, x: 1.0, y: 1.0 })
            .unwrap();

        // Act
        let again = tracker.emit(&handles(), &InputCall::TouchDown { id: 0, x: 2.0, y: 2.0 });

        // Assert
        assert!(matches!(again, Err(InputError::ProtocolViolation(_))));
        assert_eq!(tracker.touch_slots(DEV).len(), 1);
    }

    #[test]
    fn test_touch_id_is_reusable_after_lift() {
        let mut tracker = started();
        let h = handles();
        tracker.emit(&h, &InputCall::TouchDown { id: 0, x: 1.0, y: 1.0 }).unwrap();
        tracker.emit(&h, &InputCall::TouchUp { id: 0 }).unwrap();

        assert!(tracker.emit(&h, &InputCall::TouchDown { id: 0, x: 3.0, y: 3.0 }).is_ok());
    }

    #[test]
    fn test_lifting_unknown_touch_is_rejected() {
        let mut tracker = started();
        assert!(matches!(
            tracker.emit(&handles(), &InputCall::TouchUp { id: 4 }),
            Err(InputError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_force_release_releases_everything_then_stops() {
        // Arrange
        let mut tracker = started();
        let h = handles();
        tracker.emit(&h, &InputCall::TouchDown { id: 2, x: 5.0, y: 5.0 }).unwrap();
        tracker.emit(&h, &InputCall::Button { code: 0x110, pressed: true }).unwrap();
        tracker.emit(&h, &InputCall::Key { code: 29, pressed: true }).unwrap();

        // Act
        let requests = tracker.force_release(&h, 4, 1000);

        // Assert
        assert_eq!(
            requests,
            vec![
                Request::TouchUp {
                    touchscreen: DEV + 4,
                    touch_id: 2
                },
                Request::Button {
                    button: DEV + 2,
                    code: 0x110,
                    state: PressState::Released
                },
                Request::Key {
                    keyboard: DEV + 3,
                    key: 29,
                    state: PressState::Released
                },
                Request::Frame(FrameCommit::new(DEV, 4, 1000)),
                Request::StopEmulating {
                    device: DEV,
                    last_serial: 4
                },
            ]
        );
        assert_eq!(tracker.state(DEV), EmulationState::Idle);
        assert!(tracker.touch_slots(DEV).is_empty());
    }

    #[test]
    fn test_force_release_with_nothing_held_only_stops() {
        let mut tracker = started();
        let requests = tracker.force_release(&handles(), 1, 0);
        assert_eq!(
            requests,
            vec![Request::StopEmulating {
                device: DEV,
                last_serial: 1
            }]
        );
    }

    #[test]
    fn test_force_release_of_idle_device_is_empty() {
        let mut tracker = EmulationTracker::new();
        assert!(tracker.force_release(&handles(), 1, 0).is_empty());
    }

    #[test]
    fn test_view_reflects_held_input() {
        let mut tracker = started();
        let h = handles();
        tracker.emit(&h, &InputCall::Key { code: 42, pressed: true }).unwrap();

        let view = tracker.view(DEV);

        assert!(view.emulating);
        assert!(view.held_keys.contains(&42));
        assert!(view.holds_anything());
    }

    #[test]
    fn test_forget_reports_emulating_device() {
        let mut tracker = started();
        assert!(tracker.forget(DEV));
        assert_eq!(tracker.state(DEV), EmulationState::Idle);
        assert!(tracker.emulating_devices().is_empty());
    }
}
