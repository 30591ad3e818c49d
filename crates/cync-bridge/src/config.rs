// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bridge configuration: loaded from the export collaborator's YAML file,
//! with a fixed set of environment-variable overrides (§6).

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use crate::registry::device::{Capabilities, DeviceAttrs};
use crate::registry::device::DeviceId;
use crate::registry::group::{Group, GroupId};

/// One home's exported devices and groups, as supplied by the export
/// collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HomeConfig {
    pub home_id: u32,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub cync_id: u32,
    pub name: String,
    #[serde(default)]
    pub type_code: u32,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub firmware_version: Option<String>,
    #[serde(default)]
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    pub group_id: u32,
    pub name: String,
    #[serde(default)]
    pub member_ids: Vec<u32>,
}

/// MQTT broker connection and topic configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    #[serde(default = "default_discovery_topic")]
    pub discovery_topic: String,
    #[serde(default = "default_status_topic")]
    pub status_topic: String,
    #[serde(default = "default_birth_payload")]
    pub birth_payload: String,
    #[serde(default = "default_will_payload")]
    pub will_payload: String,
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}
fn default_mqtt_port() -> u16 {
    1883
}
fn default_topic_prefix() -> String {
    "cync".to_string()
}
fn default_discovery_topic() -> String {
    "homeassistant".to_string()
}
fn default_status_topic() -> String {
    "status".to_string()
}
fn default_birth_payload() -> String {
    "online".to_string()
}
fn default_will_payload() -> String {
    "offline".to_string()
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            username: None,
            password: None,
            topic_prefix: default_topic_prefix(),
            discovery_topic: default_discovery_topic(),
            status_topic: default_status_topic(),
            birth_payload: default_birth_payload(),
            will_payload: default_will_payload(),
        }
    }
}

/// Full bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    #[serde(default = "default_device_port")]
    pub device_port: u16,
    #[serde(default = "default_home_id")]
    pub home_id: u32,
    #[serde(default = "default_max_tcp_connections")]
    pub max_tcp_connections: usize,
    #[serde(default)]
    pub tcp_whitelist: Option<Vec<IpAddr>>,
    #[serde(default = "default_blackhole_delay_ms")]
    pub blackhole_delay_ms: u64,
    #[serde(default = "default_cmd_broadcasts")]
    pub cmd_broadcasts: u32,
    #[serde(default = "default_dedup_ttl_ms")]
    pub dedup_ttl_ms: u64,
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
    #[serde(default = "default_ack_p99_ms")]
    pub ack_p99_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_min_kelvin")]
    pub min_kelvin: u32,
    #[serde(default = "default_max_kelvin")]
    pub max_kelvin: u32,
    #[serde(default)]
    pub tls_cert_path: String,
    #[serde(default)]
    pub tls_key_path: String,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub homes: Vec<HomeConfig>,
}

fn default_bind_address() -> IpAddr {
    "0.0.0.0".parse().unwrap()
}
fn default_device_port() -> u16 {
    23779
}
fn default_home_id() -> u32 {
    0
}
fn default_max_tcp_connections() -> usize {
    8
}
fn default_blackhole_delay_ms() -> u64 {
    3000
}
fn default_cmd_broadcasts() -> u32 {
    2
}
fn default_dedup_ttl_ms() -> u64 {
    1000
}
fn default_dedup_capacity() -> usize {
    512
}
fn default_ack_p99_ms() -> u64 {
    51
}
fn default_max_retries() -> u32 {
    3
}
fn default_min_kelvin() -> u32 {
    2000
}
fn default_max_kelvin() -> u32 {
    7000
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            device_port: default_device_port(),
            home_id: default_home_id(),
            max_tcp_connections: default_max_tcp_connections(),
            tcp_whitelist: None,
            blackhole_delay_ms: default_blackhole_delay_ms(),
            cmd_broadcasts: default_cmd_broadcasts(),
            dedup_ttl_ms: default_dedup_ttl_ms(),
            dedup_capacity: default_dedup_capacity(),
            ack_p99_ms: default_ack_p99_ms(),
            max_retries: default_max_retries(),
            min_kelvin: default_min_kelvin(),
            max_kelvin: default_max_kelvin(),
            tls_cert_path: String::new(),
            tls_key_path: String::new(),
            mqtt: MqttConfig::default(),
            homes: Vec::new(),
        }
    }
}

impl BridgeConfig {
    pub fn blackhole_delay(&self) -> Duration {
        Duration::from_millis(self.blackhole_delay_ms)
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_millis(self.dedup_ttl_ms)
    }

    pub fn ack_p99(&self) -> Duration {
        Duration::from_millis(self.ack_p99_ms)
    }

    /// Load from a YAML file, then apply the `CYNC_*` environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let mut config: Self = serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("CYNC_SRV_HOST") {
            if let Ok(addr) = host.parse() {
                self.bind_address = addr;
            }
        }
        if let Ok(v) = std::env::var("CYNC_MAX_TCP_CONN") {
            if let Ok(n) = v.parse() {
                self.max_tcp_connections = n;
            }
        }
        if let Ok(v) = std::env::var("CYNC_CMD_BROADCASTS") {
            if let Ok(n) = v.parse() {
                self.cmd_broadcasts = n;
            }
        }
        if let Ok(v) = std::env::var("CYNC_TCP_WHITELIST") {
            let parsed: Vec<IpAddr> = v.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            if !parsed.is_empty() {
                self.tcp_whitelist = Some(parsed);
            }
        }
        if let Ok(v) = std::env::var("CYNC_TCP_BLACKHOLE_DELAY") {
            if let Ok(n) = v.parse() {
                self.blackhole_delay_ms = n;
            }
        }
        if let Ok(v) = std::env::var("CYNC_MINK") {
            if let Ok(n) = v.parse() {
                self.min_kelvin = n;
            }
        }
        if let Ok(v) = std::env::var("CYNC_MAXK") {
            if let Ok(n) = v.parse() {
                self.max_kelvin = n;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_port == 0 {
            return Err(ConfigError::InvalidValue("device_port cannot be 0".into()));
        }
        if self.max_tcp_connections == 0 {
            return Err(ConfigError::InvalidValue("max_tcp_connections cannot be 0".into()));
        }
        if self.min_kelvin >= self.max_kelvin {
            return Err(ConfigError::InvalidValue("min_kelvin must be less than max_kelvin".into()));
        }
        if self.tls_cert_path.is_empty() || self.tls_key_path.is_empty() {
            return Err(ConfigError::InvalidValue("tls_cert_path and tls_key_path are required".into()));
        }
        Ok(())
    }

    /// Flatten the configured homes/devices/groups into registry seed data.
    pub fn seed_devices(&self) -> Vec<(DeviceId, DeviceAttrs)> {
        self.homes
            .iter()
            .flat_map(|home| {
                home.devices.iter().map(move |d| {
                    (
                        DeviceId::new(home.home_id, d.cync_id),
                        DeviceAttrs {
                            name: d.name.clone(),
                            type_code: d.type_code,
                            capabilities: d.capabilities,
                            mac: d.mac.clone(),
                            firmware_version: d.firmware_version.clone(),
                        },
                    )
                })
            })
            .collect()
    }

    pub fn seed_groups(&self) -> Vec<Group> {
        self.homes
            .iter()
            .flat_map(|home| {
                home.groups.iter().map(move |g| Group {
                    id: GroupId::new(home.home_id, g.group_id),
                    name: g.name.clone(),
                    member_cync_ids: g.member_ids.clone(),
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(s) => write!(f, "I/O error: {s}"),
            Self::Parse(s) => write!(f, "parse error: {s}"),
            Self::InvalidValue(s) => write!(f, "invalid value: {s}"),
        }
    }
}

impl std::error::Error for ConfigError {}
