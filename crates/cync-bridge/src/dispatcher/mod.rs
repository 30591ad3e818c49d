// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Routes MQTT-originated intent to the right session, shapes it into wire
//! commands, and fans a group command out across `cmd_broadcasts` copies.
//! Stateless by design (§9): every lookup goes through the Registry or the
//! session handle registry, never through state the Dispatcher itself owns.

pub mod presets;

use crate::error::DispatchError;
use crate::registry::device::DeviceId;
use crate::registry::group::GroupId;
use crate::registry::{Registry, TemperatureBounds};
use crate::session::{SendResult, SessionHandle, SessionRegistry};
use crate::timing::CorrelationId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

/// Spacing between successive broadcast copies (§4.4: "spaced by a short
/// delay"). Copies are fired concurrently, each after `copy_index *
/// BROADCAST_SPACING`, not sequentially retried-to-exhaustion.
const BROADCAST_SPACING: Duration = Duration::from_millis(30);

/// High-level intent parsed from an MQTT command payload (§4.5).
#[derive(Debug, Clone)]
pub enum Intent {
    SetPower(bool),
    /// 0-255, MQTT brightness scale.
    SetBrightness(u8),
    /// Kelvin.
    SetTemperature(u32),
    SetRgb(u8, u8, u8),
    /// 0-100 percent, mapped to the device's speed enum.
    SetFanSpeed(u8),
    Preset(String),
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchOutcome {
    pub success: bool,
    pub retries: u32,
}

pub struct Dispatcher {
    pub registry: Arc<RwLock<Registry>>,
    pub sessions: SessionRegistry,
    pub cmd_broadcasts: u32,
    pub kelvin_bounds: TemperatureBounds,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<RwLock<Registry>>,
        sessions: SessionRegistry,
        cmd_broadcasts: u32,
        kelvin_bounds: TemperatureBounds,
    ) -> Self {
        Self { registry, sessions, cmd_broadcasts: cmd_broadcasts.max(1), kelvin_bounds }
    }

    /// Dispatch an intent to a single device.
    pub async fn dispatch_device(
        &self,
        device_id: DeviceId,
        intent: Intent,
        correlation_id: CorrelationId,
    ) -> Result<DispatchOutcome, DispatchError> {
        let data = shape_command(&intent, &self.kelvin_bounds);
        let handle = self
            .sessions
            .primary_for(device_id.cync_id)
            .ok_or(DispatchError::NoBridgeAvailable)?;

        self.broadcast(&handle, device_id.cync_id, &data, correlation_id).await
    }

    /// Dispatch an intent to every online member of a group via one mesh
    /// bridge session.
    pub async fn dispatch_group(
        &self,
        group_id: GroupId,
        intent: Intent,
        correlation_id: CorrelationId,
    ) -> Result<DispatchOutcome, DispatchError> {
        let member_ids = {
            let registry = self.registry.read().await;
            registry
                .group(group_id)
                .map(|g| g.member_cync_ids.clone())
                .unwrap_or_default()
        };
        if member_ids.is_empty() {
            return Err(DispatchError::NoBridgeAvailable);
        }

        let data = shape_command(&intent, &self.kelvin_bounds);
        let handle = self
            .sessions
            .primary_for_group(&member_ids)
            .ok_or(DispatchError::NoBridgeAvailable)?;

        // Endpoint addresses the mesh bridge itself; the first member id is
        // used as a representative routing endpoint, per §4.2's "one 0x73
        // targeted at the session's mesh bridge (not per member)".
        let endpoint_id = member_ids[0];
        self.broadcast(&handle, endpoint_id, &data, correlation_id).await
    }

    /// Fire `cmd_broadcasts` copies of the command close together (§4.2:
    /// "application-level redundancy, not transport-level retry"; §4.4:
    /// "Dispatcher waits for any ACK to count as success"). Copies run
    /// concurrently, each staggered by [`BROADCAST_SPACING`] rather than
    /// waiting for one copy to fully exhaust its own retries before the next
    /// is even sent.
    async fn broadcast(
        &self,
        handle: &SessionHandle,
        cync_id: u32,
        data: &[u8],
        correlation_id: CorrelationId,
    ) -> Result<DispatchOutcome, DispatchError> {
        let endpoint = endpoint_for(cync_id);
        let (tx, mut rx) = mpsc::channel::<Result<SendResult, DispatchError>>(self.cmd_broadcasts as usize);

        for copy in 0..self.cmd_broadcasts {
            let handle = handle.clone();
            let data = data.to_vec();
            let tx = tx.clone();
            tokio::spawn(async move {
                if copy > 0 {
                    tokio::time::sleep(BROADCAST_SPACING * copy).await;
                }
                let result = handle.send_reliable(endpoint, data, correlation_id).await;
                let _ = tx.send(result).await;
            });
        }
        drop(tx);

        let mut last_result: Option<SendResult> = None;
        let mut last_err: Option<DispatchError> = None;
        let mut received = 0u32;
        while received < self.cmd_broadcasts {
            match rx.recv().await {
                Some(Ok(result)) => {
                    received += 1;
                    if result.success {
                        info!(%correlation_id, "command acknowledged");
                        return Ok(DispatchOutcome { success: true, retries: result.retries });
                    }
                    last_result = Some(result);
                }
                Some(Err(e)) => {
                    received += 1;
                    last_err = Some(e);
                }
                None => break,
            }
        }

        warn!(%correlation_id, "all broadcast copies failed to receive an ACK");
        match last_result {
            Some(result) => Ok(DispatchOutcome { success: false, retries: result.retries }),
            None => match last_err {
                Some(e) => Err(e),
                None => Ok(DispatchOutcome { success: false, retries: 0 }),
            },
        }
    }
}

fn endpoint_for(cync_id: u32) -> [u8; 5] {
    let bytes = cync_id.to_be_bytes();
    [0, bytes[0], bytes[1], bytes[2], bytes[3]]
}

/// Translate a high-level intent into an inner 0x73 payload:
/// `[opcode, args...]`.
fn shape_command(intent: &Intent, bounds: &crate::registry::TemperatureBounds) -> Vec<u8> {
    match intent {
        Intent::SetPower(on) => vec![0x01, if *on { 1 } else { 0 }],
        Intent::SetBrightness(mqtt_value) => {
            let device_value = ((*mqtt_value as u32 * 100) / 255) as u8;
            vec![0x02, device_value]
        }
        Intent::SetTemperature(kelvin) => vec![0x03, bounds.kelvin_to_device(*kelvin)],
        Intent::SetRgb(r, g, b) => vec![0x04, *r, *g, *b],
        Intent::SetFanSpeed(percentage) => {
            let speed = fan_speed_from_percentage(*percentage);
            vec![0x05, speed]
        }
        Intent::Preset(name) => match presets::lookup(name) {
            Some((effect_byte, seed)) => vec![0x06, effect_byte, seed],
            None => {
                warn!(preset = %name, "unknown preset requested, sending no-op");
                vec![0x06, 0x00, 0x00]
            }
        },
    }
}

/// Percentages map to a small discrete speed enum (0 = off, 1..=3 = low/
/// medium/high), mirroring the fan-controller's coarse resolution.
fn fan_speed_from_percentage(percentage: u8) -> u8 {
    match percentage {
        0 => 0,
        1..=33 => 1,
        34..=66 => 2,
        _ => 3,
    }
}
