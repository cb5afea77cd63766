//! Object Registry: every live protocol object, keyed by its id.
//!
//! Objects appear when the server announces them (a `seat`, `device` or
//! `interface` event carrying a `new_id`) and disappear on `destroyed` or
//! when the channel closes.  The client never invents a server id; the one
//! exception is the `ei_callback` of a `sync` round trip, whose id comes
//! from the client-side allocator.
//!
//! Seats and devices carry extra descriptive state (names, capability
//! masks, regions, the interfaces bound on each device, paused/resumed)
//! kept alongside the plain object table.

use std::collections::BTreeMap;

use eis_core::protocol::{Region, HANDSHAKE_OBJECT_ID};
use eis_core::{Capability, CapabilitySet, InterfaceKind};
use tracing::debug;

use crate::application::errors::InputError;
use crate::application::session_tracker::DeviceHandles;

/// One live protocol object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolObject {
    pub id: u64,
    pub interface: InterfaceKind,
    pub version: u32,
    /// The object whose event created this one.
    pub parent: Option<u64>,
}

/// What a seat has told us about itself.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SeatRecord {
    pub id: u64,
    pub name: Option<String>,
    /// Capability masks keyed by interface, from `seat.capability`.
    pub capability_masks: BTreeMap<InterfaceKind, u64>,
    pub done: bool,
}

impl SeatRecord {
    /// OR of the masks for every interface the requested capabilities need.
    pub fn bind_mask(&self, requested: CapabilitySet) -> u64 {
        requested
            .iter()
            .flat_map(|c| c.seat_interfaces().iter())
            .filter_map(|kind| self.capability_masks.get(kind))
            .fold(0, |acc, mask| acc | mask)
    }
}

/// What a device has told us about itself.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeviceRecord {
    pub id: u64,
    pub seat: u64,
    pub name: Option<String>,
    pub device_type: Option<u32>,
    pub dimensions: Option<(u32, u32)>,
    pub regions: Vec<Region>,
    /// Interface objects bound on this device.
    pub interfaces: BTreeMap<InterfaceKind, u64>,
    /// `device.done` received; the description is complete.
    pub ready: bool,
    pub resumed: bool,
}

impl DeviceRecord {
    /// Capabilities whose required interfaces are all bound.
    pub fn capabilities(&self) -> CapabilitySet {
        Capability::ALL
            .into_iter()
            .filter(|c| {
                c.required_interfaces()
                    .iter()
                    .all(|kind| self.interfaces.contains_key(kind))
            })
            .collect()
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities().contains(capability)
    }

    /// A ready, resumed device can take input.
    pub fn is_usable(&self) -> bool {
        self.ready && self.resumed
    }

    pub fn handles(&self) -> DeviceHandles {
        DeviceHandles {
            device: self.id,
            interfaces: self.interfaces.clone(),
        }
    }
}

/// Live objects plus seat and device descriptions.
#[derive(Debug)]
pub struct ObjectRegistry {
    objects: BTreeMap<u64, ProtocolObject>,
    seats: BTreeMap<u64, SeatRecord>,
    devices: BTreeMap<u64, DeviceRecord>,
}

impl ObjectRegistry {
    /// A registry holding only the handshake object.
    pub fn new() -> Self {
        let mut objects = BTreeMap::new();
        objects.insert(
            HANDSHAKE_OBJECT_ID,
            ProtocolObject {
                id: HANDSHAKE_OBJECT_ID,
                interface: InterfaceKind::Handshake,
                version: 1,
                parent: None,
            },
        );
        Self {
            objects,
            seats: BTreeMap::new(),
            devices: BTreeMap::new(),
        }
    }

    /// Records `new_id` as an object of `interface` created by `parent`.
    ///
    /// # Errors
    ///
    /// [`InputError::ProtocolViolation`] if `new_id` is already live or
    /// `parent` is unknown.
    pub fn bind(
        &mut self,
        parent: u64,
        new_id: u64,
        interface: InterfaceKind,
        version: u32,
    ) -> Result<&ProtocolObject, InputError> {
        if let Some(existing) = self.objects.get(&new_id) {
            return Err(InputError::ProtocolViolation(format!(
                "object {new_id:#x} is already bound as {}",
                existing.interface.name()
            )));
        }
        if !self.objects.contains_key(&parent) {
            return Err(InputError::ProtocolViolation(format!(
                "{} {new_id:#x} announced by unknown object {parent:#x}",
                interface.name()
            )));
        }

        match interface {
            InterfaceKind::Seat => {
                self.seats.insert(
                    new_id,
                    SeatRecord {
                        id: new_id,
                        ..SeatRecord::default()
                    },
                );
            }
            InterfaceKind::Device => {
                self.devices.insert(
                    new_id,
                    DeviceRecord {
                        id: new_id,
                        seat: parent,
                        ..DeviceRecord::default()
                    },
                );
            }
            kind => {
                if let Some(device) = self.devices.get_mut(&parent) {
                    device.interfaces.insert(kind, new_id);
                }
            }
        }

        debug!("bind {} {new_id:#x} (parent {parent:#x}, v{version})", interface.name());
        Ok(self.objects.entry(new_id).or_insert(ProtocolObject {
            id: new_id,
            interface,
            version,
            parent: Some(parent),
        }))
    }

    /// Removes `id` and every object created under it.
    ///
    /// Returns the removed objects, `id` first.  Unknown ids return an
    /// empty list.
    pub fn release(&mut self, id: u64) -> Vec<ProtocolObject> {
        let Some(object) = self.objects.remove(&id) else {
            return Vec::new();
        };

        self.seats.remove(&id);
        self.devices.remove(&id);
        if let Some(parent) = object.parent {
            if let Some(device) = self.devices.get_mut(&parent) {
                device.interfaces.retain(|_, obj| *obj != id);
            }
        }

        let children: Vec<u64> = self
            .objects
            .values()
            .filter(|o| o.parent == Some(id))
            .map(|o| o.id)
            .collect();
        let mut removed = vec![object];
        for child in children {
            removed.extend(self.release(child));
        }
        debug!("release {} {id:#x} ({} objects)", object.interface.name(), removed.len());
        removed
    }

    /// Removes `id` alone, leaving objects it created in place.
    ///
    /// The handshake object is retired this way once the connection
    /// object exists.
    pub fn retire(&mut self, id: u64) -> Option<ProtocolObject> {
        self.objects.remove(&id)
    }

    /// Never fabricates an object: unknown ids are `None`.
    pub fn lookup(&self, id: u64) -> Option<&ProtocolObject> {
        self.objects.get(&id)
    }

    pub fn interface_of(&self, id: u64) -> Option<InterfaceKind> {
        self.lookup(id).map(|o| o.interface)
    }

    /// The single `ei_connection` object, once the handshake created it.
    pub fn connection(&self) -> Option<u64> {
        self.objects
            .values()
            .find(|o| o.interface == InterfaceKind::Connection)
            .map(|o| o.id)
    }

    pub fn seat(&self, id: u64) -> Option<&SeatRecord> {
        self.seats.get(&id)
    }

    pub fn seat_mut(&mut self, id: u64) -> Option<&mut SeatRecord> {
        self.seats.get_mut(&id)
    }

    pub fn device(&self, id: u64) -> Option<&DeviceRecord> {
        self.devices.get(&id)
    }

    pub fn device_mut(&mut self, id: u64) -> Option<&mut DeviceRecord> {
        self.devices.get_mut(&id)
    }

    /// Ready devices offering `capability`, resumed ones first, then by id.
    pub fn devices_with(&self, capability: Capability) -> Vec<&DeviceRecord> {
        let mut found: Vec<&DeviceRecord> = self
            .devices
            .values()
            .filter(|d| d.ready && d.has(capability))
            .collect();
        found.sort_by_key(|d| (!d.resumed, d.id));
        found
    }

    /// First usable device for `capability`.
    pub fn usable_device(&self, capability: Capability) -> Option<&DeviceRecord> {
        self.devices_with(capability)
            .into_iter()
            .find(|d| d.is_usable())
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.devices.values()
    }

    /// Drops everything except the handshake object.  Used when the channel
    /// closes.
    pub fn clear(&mut self) {
        *self = Self::new();
    }
}

impl Default for ObjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use eis_core::protocol::SERVER_ID_BASE;

    const CONN: u64 = SERVER_ID_BASE;
    const SEAT: u64 = SERVER_ID_BASE + 1;
    const DEV: u64 = SERVER_ID_BASE + 2;

    fn with_device() -> ObjectRegistry {
        let mut reg = ObjectRegistry::new();
        reg.bind(HANDSHAKE_OBJECT_ID, CONN, InterfaceKind::Connection, 1).unwrap();
        reg.bind(CONN, SEAT, InterfaceKind::Seat, 1).unwrap();
        reg.bind(SEAT, DEV, InterfaceKind::Device, 1).unwrap();
        reg
    }

    #[test]
    fn test_bind_records_object() {
        // Arrange / Act
        let reg = with_device();

        // Assert
        assert_eq!(
            reg.lookup(DEV),
            Some(&ProtocolObject {
                id: DEV,
                interface: InterfaceKind::Device,
                version: 1,
                parent: Some(SEAT)
            })
        );
        assert_eq!(reg.connection(), Some(CONN));
        assert_eq!(reg.device(DEV).map(|d| d.seat), Some(SEAT));
    }

    #[test]
    fn test_duplicate_bind_is_protocol_violation() {
        let mut reg = with_device();
        let result = reg.bind(SEAT, DEV, InterfaceKind::Device, 1);
        assert!(matches!(result, Err(InputError::ProtocolViolation(_))));
    }

    #[test]
    fn test_bind_under_unknown_parent_is_protocol_violation() {
        let mut reg = ObjectRegistry::new();
        let result = reg.bind(SERVER_ID_BASE + 99, SEAT, InterfaceKind::Seat, 1);
        assert!(matches!(result, Err(InputError::ProtocolViolation(_))));
        assert!(reg.lookup(SEAT).is_none());
    }

    #[test]
    fn test_lookup_unknown_id_is_none() {
        assert!(ObjectRegistry::new().lookup(1234).is_none());
    }

    #[test]
    fn test_device_capabilities_follow_bound_interfaces() {
        // Arrange
        let mut reg = with_device();

        // Act – absolute pointer alone is not enough for the pointer capability
        reg.bind(DEV, DEV + 10, InterfaceKind::PointerAbsolute, 1).unwrap();
        let before = reg.device(DEV).unwrap().capabilities();
        reg.bind(DEV, DEV + 11, InterfaceKind::Button, 1).unwrap();
        let after = reg.device(DEV).unwrap().capabilities();

        // Assert
        assert!(!before.contains(Capability::Pointer));
        assert!(after.contains(Capability::Pointer));
        assert!(!after.contains(Capability::Keyboard));
    }

    #[test]
    fn test_release_cascades_to_device_interfaces() {
        // Arrange
        let mut reg = with_device();
        reg.bind(DEV, DEV + 10, InterfaceKind::Keyboard, 1).unwrap();

        // Act
        let removed = reg.release(SEAT);

        // Assert
        let ids: Vec<u64> = removed.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![SEAT, DEV, DEV + 10]);
        assert!(reg.lookup(DEV + 10).is_none());
        assert!(reg.device(DEV).is_none());
    }

    #[test]
    fn test_releasing_an_interface_unbinds_it_from_its_device() {
        let mut reg = with_device();
        reg.bind(DEV, DEV + 10, InterfaceKind::Keyboard, 1).unwrap();

        reg.release(DEV + 10);

        assert!(reg.device(DEV).unwrap().interfaces.is_empty());
    }

    #[test]
    fn test_devices_with_prefers_resumed_devices() {
        // Arrange – two keyboards, only the second is resumed
        let mut reg = with_device();
        reg.bind(SEAT, DEV + 5, InterfaceKind::Device, 1).unwrap();
        reg.bind(DEV, DEV + 10, InterfaceKind::Keyboard, 1).unwrap();
        reg.bind(DEV + 5, DEV + 11, InterfaceKind::Keyboard, 1).unwrap();
        for id in [DEV, DEV + 5] {
            reg.device_mut(id).unwrap().ready = true;
        }
        reg.device_mut(DEV + 5).unwrap().resumed = true;

        // Act
        let ids: Vec<u64> = reg
            .devices_with(Capability::Keyboard)
            .iter()
            .map(|d| d.id)
            .collect();

        // Assert
        assert_eq!(ids, vec![DEV + 5, DEV]);
        assert_eq!(reg.usable_device(Capability::Keyboard).map(|d| d.id), Some(DEV + 5));
    }

    #[test]
    fn test_seat_bind_mask_ors_requested_interfaces() {
        let mut seat = SeatRecord::default();
        seat.capability_masks.insert(InterfaceKind::PointerAbsolute, 0x2);
        seat.capability_masks.insert(InterfaceKind::Button, 0x8);
        seat.capability_masks.insert(InterfaceKind::Keyboard, 0x20);

        let requested: CapabilitySet = [Capability::Pointer].into_iter().collect();

        assert_eq!(seat.bind_mask(requested), 0xA);
    }

    #[test]
    fn test_clear_keeps_only_handshake() {
        let mut reg = with_device();
        reg.clear();
        assert!(reg.lookup(HANDSHAKE_OBJECT_ID).is_some());
        assert!(reg.connection().is_none());
    }
}
