// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Parses inbound `<topic_prefix>/set/<unique_id>` publishes into dispatcher
//! intents.

use crate::dispatcher::Intent;
use crate::registry::device::DeviceId;
use crate::registry::group::GroupId;
use serde::Deserialize;

/// What a command topic addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Device(DeviceId),
    Group(GroupId),
}

/// Split `<prefix>/set/<unique_id>` into a [`Target`]. `unique_id` is
/// `<home_id>-<cync_id>` for a device or `group-<home_id>-<group_id>` for a
/// group, matching [`crate::mqtt::discovery`]'s id scheme.
pub fn parse_target(topic_prefix: &str, topic: &str) -> Option<Target> {
    let rest = topic.strip_prefix(topic_prefix)?.strip_prefix("/set/")?;

    if let Some(group_part) = rest.strip_prefix("group-") {
        let (home_id, group_id) = split_pair(group_part)?;
        return Some(Target::Group(GroupId::new(home_id, group_id)));
    }

    let (home_id, cync_id) = split_pair(rest)?;
    Some(Target::Device(DeviceId::new(home_id, cync_id)))
}

fn split_pair(s: &str) -> Option<(u32, u32)> {
    let (a, b) = s.split_once('-')?;
    Some((a.parse().ok()?, b.parse().ok()?))
}

/// JSON payload accepted on a command topic. Home Assistant's generic MQTT
/// light/switch/fan schemas all agree on this shape; unset fields are
/// ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandPayload {
    pub state: Option<String>,
    pub brightness: Option<u8>,
    pub color_temp: Option<u32>,
    pub color: Option<RgbPayload>,
    pub percentage: Option<u8>,
    pub preset: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RgbPayload {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// A payload may request several changes at once (e.g. `state` + `color`);
/// apply them in a fixed, most-specific-first order since the wire protocol
/// only carries one opcode per command.
///
/// The payload may also be a bare state string (`ON`/`OFF`) rather than
/// JSON, per the command topic's accepted schema; any string that doesn't
/// parse as the JSON object falls back to that.
pub fn parse_intents(payload: &[u8]) -> Result<Vec<Intent>, serde_json::Error> {
    let parsed: CommandPayload = match serde_json::from_slice(payload) {
        Ok(parsed) => parsed,
        Err(e) => {
            return match std::str::from_utf8(payload) {
                Ok(state) if !state.trim().is_empty() => {
                    Ok(vec![Intent::SetPower(state.trim().eq_ignore_ascii_case("on"))])
                }
                _ => Err(e),
            };
        }
    };
    let mut intents = Vec::new();

    if let Some(preset) = parsed.preset {
        intents.push(Intent::Preset(preset));
    }
    if let Some(color) = parsed.color {
        intents.push(Intent::SetRgb(color.r, color.g, color.b));
    }
    if let Some(kelvin) = parsed.color_temp {
        intents.push(Intent::SetTemperature(kelvin));
    }
    if let Some(brightness) = parsed.brightness {
        intents.push(Intent::SetBrightness(brightness));
    }
    if let Some(percentage) = parsed.percentage {
        intents.push(Intent::SetFanSpeed(percentage));
    }
    if let Some(state) = parsed.state {
        intents.push(Intent::SetPower(state.eq_ignore_ascii_case("on")));
    }

    Ok(intents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_device_target() {
        let target = parse_target("cync", "cync/set/1-42").unwrap();
        assert_eq!(target, Target::Device(DeviceId::new(1, 42)));
    }

    #[test]
    fn parses_group_target() {
        let target = parse_target("cync", "cync/set/group-1-9").unwrap();
        assert_eq!(target, Target::Group(GroupId::new(1, 9)));
    }

    #[test]
    fn rejects_foreign_prefix() {
        assert!(parse_target("cync", "other/set/1-42").is_none());
    }

    #[test]
    fn parses_combined_power_and_brightness_payload() {
        let payload = br#"{"state":"ON","brightness":128}"#;
        let intents = parse_intents(payload).unwrap();
        assert!(intents.iter().any(|i| matches!(i, Intent::SetBrightness(128))));
        assert!(intents.iter().any(|i| matches!(i, Intent::SetPower(true))));
    }

    #[test]
    fn preset_takes_precedence_in_ordering() {
        let payload = br#"{"preset":"rainbow","state":"ON"}"#;
        let intents = parse_intents(payload).unwrap();
        assert!(matches!(intents[0], Intent::Preset(ref name) if name == "rainbow"));
    }

    #[test]
    fn color_temp_field_matches_outbound_discovery_naming() {
        let payload = br#"{"color_temp":3000}"#;
        let intents = parse_intents(payload).unwrap();
        assert!(matches!(intents[0], Intent::SetTemperature(3000)));
    }

    #[test]
    fn plain_state_string_falls_back_to_power_intent() {
        let intents = parse_intents(b"ON").unwrap();
        assert!(matches!(intents[0], Intent::SetPower(true)));

        let intents = parse_intents(b"off").unwrap();
        assert!(matches!(intents[0], Intent::SetPower(false)));
    }
}
