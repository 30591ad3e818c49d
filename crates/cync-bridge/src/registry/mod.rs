// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Process-wide device and group state, single-writer discipline: every
//! mutation goes through [`Registry`], which guards its maps. Readers take a
//! consistent snapshot per device or group.

pub mod device;
pub mod group;

use device::{Capabilities, Device, DeviceAttrs, DeviceId, DeviceStatus, StatusDelta};
use group::{aggregate, AggregateStatus, Group, GroupId};
use std::collections::HashMap;
use tracing::{trace, warn};

use crate::error::RegistryValidationError;

/// Color-temperature mapping bounds: Kelvin on MQTT, 0-100 on the wire.
#[derive(Debug, Clone, Copy)]
pub struct TemperatureBounds {
    pub min_kelvin: u32,
    pub max_kelvin: u32,
}

impl Default for TemperatureBounds {
    fn default() -> Self {
        Self {
            min_kelvin: 2000,
            max_kelvin: 7000,
        }
    }
}

impl TemperatureBounds {
    /// Kelvin -> device 0-100 scale.
    pub fn kelvin_to_device(&self, kelvin: u32) -> u8 {
        let kelvin = kelvin.clamp(self.min_kelvin, self.max_kelvin);
        let span = (self.max_kelvin - self.min_kelvin).max(1) as f64;
        (((kelvin - self.min_kelvin) as f64 / span) * 100.0).round() as u8
    }

    /// Device 0-100 scale -> Kelvin.
    pub fn device_to_kelvin(&self, device_value: u8) -> u32 {
        let device_value = device_value.min(100) as f64;
        let span = (self.max_kelvin - self.min_kelvin) as f64;
        self.min_kelvin + ((device_value / 100.0) * span).round() as u32
    }
}

/// Process-wide device/group state.
#[derive(Debug, Default)]
pub struct Registry {
    devices: HashMap<DeviceId, Device>,
    groups: HashMap<GroupId, Group>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or merge attributes for a device.
    pub fn upsert_device(&mut self, id: DeviceId, attrs: DeviceAttrs) {
        match self.devices.get_mut(&id) {
            Some(existing) => {
                existing.attrs = attrs;
            }
            None => {
                self.devices.insert(id, Device::new(id, attrs));
            }
        }
    }

    /// Create a minimal device record for a previously unseen endpoint, as
    /// happens when a 0x83 broadcast references an unknown device id.
    pub fn upsert_minimal_device(&mut self, id: DeviceId) {
        if !self.devices.contains_key(&id) {
            self.upsert_device(
                id,
                DeviceAttrs {
                    name: id.unique_id(),
                    type_code: 0,
                    capabilities: Capabilities::default(),
                    mac: None,
                    firmware_version: None,
                },
            );
        }
    }

    pub fn device(&self, id: DeviceId) -> Option<&Device> {
        self.devices.get(&id)
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn record_known_session(&mut self, id: DeviceId, peer_addr: &str) {
        if let Some(device) = self.devices.get_mut(&id) {
            device.known_sessions.insert(peer_addr.to_string());
        }
    }

    /// Drop a session from every device's known-sessions set. A device that
    /// loses its last session goes offline and its `offline_count` flap
    /// counter advances.
    pub fn forget_session(&mut self, peer_addr: &str) {
        let mut now_unreachable = Vec::new();
        for device in self.devices.values_mut() {
            if device.known_sessions.remove(peer_addr) && device.known_sessions.is_empty() {
                now_unreachable.push(device.id);
            }
        }
        for id in now_unreachable {
            self.mark_offline(id);
        }
    }

    /// Apply a validated status delta. Out-of-range values are rejected
    /// without mutation.
    pub fn update_status(
        &mut self,
        id: DeviceId,
        delta: StatusDelta,
    ) -> Result<DeviceStatus, RegistryValidationError> {
        validate_delta(&delta)?;

        let device = self
            .devices
            .get_mut(&id)
            .ok_or(RegistryValidationError::UnknownDevice { cync_id: id.cync_id })?;

        if let Some(state) = delta.state {
            device.status.state = state;
        }
        if delta.brightness.is_some() {
            device.status.brightness = delta.brightness;
        }
        if delta.temperature.is_some() {
            device.status.temperature = delta.temperature;
        }
        if delta.rgb.is_some() {
            device.status.rgb = delta.rgb;
        }

        trace!(device = %id, "status updated");
        Ok(device.status)
    }

    pub fn mark_online(&mut self, id: DeviceId) {
        if let Some(device) = self.devices.get_mut(&id) {
            device.status.online = true;
        }
    }

    /// Mark a device offline, advancing its flap counter on every
    /// online-to-offline transition.
    pub fn mark_offline(&mut self, id: DeviceId) {
        if let Some(device) = self.devices.get_mut(&id) {
            if device.status.online {
                device.status.offline_count += 1;
            }
            device.status.online = false;
        }
    }

    pub fn upsert_group(&mut self, group: Group) {
        self.groups.insert(group.id, group);
    }

    pub fn group(&self, id: GroupId) -> Option<&Group> {
        self.groups.get(&id)
    }

    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    /// Derived status for a group: a pure function of its online members'
    /// current status.
    pub fn aggregate(&self, id: GroupId) -> Result<AggregateStatus, RegistryValidationError> {
        let group = self
            .groups
            .get(&id)
            .ok_or(RegistryValidationError::UnknownGroup { group_id: id.group_id })?;

        let members = group
            .member_cync_ids
            .iter()
            .filter_map(|cync_id| self.devices.get(&DeviceId::new(id.home_id, *cync_id)));

        Ok(aggregate(members))
    }
}

fn validate_delta(delta: &StatusDelta) -> Result<(), RegistryValidationError> {
    if let Some(state) = delta.state {
        if state > 1 {
            warn!(value = state, "rejecting out-of-range state");
            return Err(RegistryValidationError::OutOfRange {
                field: "state",
                value: state.to_string(),
            });
        }
    }
    if let Some(b) = delta.brightness {
        if b > 100 {
            return Err(RegistryValidationError::OutOfRange {
                field: "brightness",
                value: b.to_string(),
            });
        }
    }
    if let Some(t) = delta.temperature {
        if t > 100 {
            return Err(RegistryValidationError::OutOfRange {
                field: "temperature",
                value: t.to_string(),
            });
        }
    }
    // rgb is already u8 per-channel, so 0..=255 is always in range.
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use device::{Capabilities, DeviceAttrs};

    fn attrs(name: &str) -> DeviceAttrs {
        DeviceAttrs {
            name: name.to_string(),
            type_code: 1,
            capabilities: Capabilities {
                on_off: true,
                brightness: true,
                ..Default::default()
            },
            mac: None,
            firmware_version: None,
        }
    }

    #[test]
    fn upsert_then_update_status() {
        let mut registry = Registry::new();
        let id = DeviceId::new(1, 100);
        registry.upsert_device(id, attrs("lamp"));
        registry.mark_online(id);

        let status = registry
            .update_status(
                id,
                StatusDelta {
                    state: Some(1),
                    brightness: Some(80),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(status.state, 1);
        assert_eq!(status.brightness, Some(80));
    }

    #[test]
    fn rejects_out_of_range_brightness() {
        let mut registry = Registry::new();
        let id = DeviceId::new(1, 100);
        registry.upsert_device(id, attrs("lamp"));

        let err = registry
            .update_status(
                id,
                StatusDelta {
                    brightness: Some(200),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, RegistryValidationError::OutOfRange { field: "brightness", .. }));
        // Rejected update must not mutate existing status.
        assert_eq!(registry.device(id).unwrap().status.brightness, None);
    }

    #[test]
    fn unknown_device_update_is_rejected() {
        let mut registry = Registry::new();
        let err = registry
            .update_status(DeviceId::new(1, 999), StatusDelta::default())
            .unwrap_err();
        assert!(matches!(err, RegistryValidationError::UnknownDevice { cync_id: 999 }));
    }

    #[test]
    fn group_aggregate_reflects_member_status() {
        let mut registry = Registry::new();
        let a = DeviceId::new(1, 1);
        let b = DeviceId::new(1, 2);
        registry.upsert_device(a, attrs("a"));
        registry.upsert_device(b, attrs("b"));
        registry.mark_online(a);
        registry.mark_online(b);
        registry
            .update_status(a, StatusDelta { state: Some(1), brightness: Some(20), ..Default::default() })
            .unwrap();
        registry
            .update_status(b, StatusDelta { state: Some(0), brightness: Some(60), ..Default::default() })
            .unwrap();

        registry.upsert_group(Group {
            id: GroupId::new(1, 10),
            name: "living room".into(),
            member_cync_ids: vec![1, 2],
        });

        let agg = registry.aggregate(GroupId::new(1, 10)).unwrap();
        assert_eq!(agg.state, 1);
        assert_eq!(agg.brightness, Some(40));
    }

    #[test]
    fn forget_session_marks_device_offline_and_advances_flap_counter() {
        let mut registry = Registry::new();
        let id = DeviceId::new(1, 100);
        registry.upsert_device(id, attrs("lamp"));
        registry.record_known_session(id, "10.0.0.1:1");
        registry.mark_online(id);
        assert_eq!(registry.device(id).unwrap().status.offline_count, 0);

        registry.forget_session("10.0.0.1:1");
        let status = registry.device(id).unwrap().status;
        assert!(!status.online);
        assert_eq!(status.offline_count, 1);

        // Reconnecting and dropping again advances the counter further.
        registry.record_known_session(id, "10.0.0.1:2");
        registry.mark_online(id);
        registry.forget_session("10.0.0.1:2");
        assert_eq!(registry.device(id).unwrap().status.offline_count, 2);
    }

    #[test]
    fn forget_session_leaves_device_online_if_another_session_remains() {
        let mut registry = Registry::new();
        let id = DeviceId::new(1, 101);
        registry.upsert_device(id, attrs("lamp"));
        registry.record_known_session(id, "10.0.0.1:1");
        registry.record_known_session(id, "10.0.0.2:1");
        registry.mark_online(id);

        registry.forget_session("10.0.0.1:1");
        let status = registry.device(id).unwrap().status;
        assert!(status.online);
        assert_eq!(status.offline_count, 0);
    }

    #[test]
    fn kelvin_round_trip_within_rounding() {
        let bounds = TemperatureBounds::default();
        for kelvin in [2000, 3500, 4500, 7000] {
            let device_value = bounds.kelvin_to_device(kelvin);
            let back = bounds.device_to_kelvin(device_value);
            assert!((back as i64 - kelvin as i64).abs() <= 50);
        }
    }
}
