// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Home Assistant-style MQTT discovery documents.

use crate::config::MqttConfig;
use crate::registry::device::{Capabilities, Device};
use crate::registry::group::Group;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct DeviceBlock {
    pub manufacturer: String,
    pub model: String,
    pub sw_version: Option<String>,
    pub support_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryDocument {
    pub unique_id: String,
    pub name: String,
    pub device: DeviceBlock,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_area: Option<String>,
    pub state_topic: String,
    pub command_topic: String,
    pub availability_topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brightness: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_temp: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rgb: Option<bool>,
}

/// Discovery component, matching Home Assistant's MQTT schema names.
pub fn component_for(capabilities: Capabilities) -> &'static str {
    if capabilities.fan_speed {
        "fan"
    } else if capabilities.brightness || capabilities.color_temperature || capabilities.rgb {
        "light"
    } else {
        "switch"
    }
}

/// Discovery config topic: `<discovery_topic>/<component>/<unique_id>/config`.
pub fn config_topic(mqtt: &MqttConfig, component: &str, unique_id: &str) -> String {
    format!("{}/{}/{}/config", mqtt.discovery_topic, component, unique_id)
}

pub fn state_topic(mqtt: &MqttConfig, unique_id: &str) -> String {
    format!("{}/state/{}", mqtt.topic_prefix, unique_id)
}

pub fn availability_topic(mqtt: &MqttConfig, unique_id: &str) -> String {
    format!("{}/availability/{}", mqtt.topic_prefix, unique_id)
}

pub fn command_topic(mqtt: &MqttConfig, unique_id: &str) -> String {
    format!("{}/set/{}", mqtt.topic_prefix, unique_id)
}

pub fn device_document(mqtt: &MqttConfig, device: &Device, suggested_area: Option<String>) -> DiscoveryDocument {
    let unique_id = device.id.unique_id();
    DiscoveryDocument {
        unique_id: unique_id.clone(),
        name: device.attrs.name.clone(),
        device: DeviceBlock {
            manufacturer: "Savant".to_string(),
            model: format!("type-{}", device.attrs.type_code),
            sw_version: device.attrs.firmware_version.clone(),
            support_url: "https://github.com".to_string(),
        },
        suggested_area,
        state_topic: state_topic(mqtt, &unique_id),
        command_topic: command_topic(mqtt, &unique_id),
        availability_topic: availability_topic(mqtt, &unique_id),
        brightness: device.attrs.capabilities.brightness.then_some(true),
        color_temp: device.attrs.capabilities.color_temperature.then_some(true),
        rgb: device.attrs.capabilities.rgb.then_some(true),
    }
}

pub fn group_document(mqtt: &MqttConfig, group: &Group) -> DiscoveryDocument {
    let unique_id = format!("group-{}", group.id.unique_id());
    DiscoveryDocument {
        unique_id: unique_id.clone(),
        name: group.name.clone(),
        device: DeviceBlock {
            manufacturer: "Savant".to_string(),
            model: "group".to_string(),
            sw_version: None,
            support_url: "https://github.com".to_string(),
        },
        suggested_area: Some(group.name.clone()),
        state_topic: state_topic(mqtt, &unique_id),
        command_topic: command_topic(mqtt, &unique_id),
        availability_topic: availability_topic(mqtt, &unique_id),
        brightness: Some(true),
        color_temp: None,
        rgb: None,
    }
}
