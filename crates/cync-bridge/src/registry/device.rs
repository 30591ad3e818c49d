// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device identity, capabilities, and status.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Stable device identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId {
    pub home_id: u32,
    pub cync_id: u32,
}

impl DeviceId {
    pub fn new(home_id: u32, cync_id: u32) -> Self {
        Self { home_id, cync_id }
    }

    pub fn unique_id(&self) -> String {
        format!("{}-{}", self.home_id, self.cync_id)
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.unique_id())
    }
}

/// Capabilities a device supports, gating which MQTT commands it accepts
/// and which schema the discovery document advertises.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub on_off: bool,
    pub brightness: bool,
    pub color_temperature: bool,
    pub rgb: bool,
    pub fan_speed: bool,
    pub hvac: bool,
}

/// Static device metadata, populated from the config file and refined by
/// 0x43 DEVICE_INFO announcements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceAttrs {
    pub name: String,
    pub type_code: u32,
    pub capabilities: Capabilities,
    pub mac: Option<String>,
    pub firmware_version: Option<String>,
}

/// Live device status. Every numeric field is range-validated before it
/// reaches this struct; see [`super::RegistryError`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub state: u8,
    pub brightness: Option<u8>,
    pub temperature: Option<u8>,
    pub rgb: Option<(u8, u8, u8)>,
    pub online: bool,
    pub offline_count: u32,
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self {
            state: 0,
            brightness: None,
            temperature: None,
            rgb: None,
            online: false,
            offline_count: 0,
        }
    }
}

/// A partial status update: `None` fields are left unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusDelta {
    pub state: Option<u8>,
    pub brightness: Option<u8>,
    pub temperature: Option<u8>,
    pub rgb: Option<(u8, u8, u8)>,
}

/// A device known to the registry: identity, attributes, status, and the
/// set of sessions currently relaying for it (by peer address string, kept
/// in sync by the session engine).
#[derive(Debug, Clone)]
pub struct Device {
    pub id: DeviceId,
    pub attrs: DeviceAttrs,
    pub status: DeviceStatus,
    pub known_sessions: HashSet<String>,
}

impl Device {
    pub fn new(id: DeviceId, attrs: DeviceAttrs) -> Self {
        Self {
            id,
            attrs,
            status: DeviceStatus::default(),
            known_sessions: HashSet::new(),
        }
    }
}
