// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Logical groups and aggregate status derived from online members.

use super::device::{Device, DeviceStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupId {
    pub home_id: u32,
    pub group_id: u32,
}

impl GroupId {
    pub fn new(home_id: u32, group_id: u32) -> Self {
        Self { home_id, group_id }
    }

    pub fn unique_id(&self) -> String {
        format!("{}-{}", self.home_id, self.group_id)
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.unique_id())
    }
}

#[derive(Debug, Clone)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub member_cync_ids: Vec<u32>,
}

/// Group state derived purely from the status of its online members.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregateStatus {
    pub state: u8,
    pub brightness: Option<u8>,
    pub temperature: Option<u8>,
    pub rgb: Option<(u8, u8, u8)>,
    pub available: bool,
}

/// Re-running this on the same member snapshot always yields the same
/// result: no hidden state, no side effects.
pub fn aggregate<'a>(members: impl Iterator<Item = &'a Device>) -> AggregateStatus {
    let online: Vec<&DeviceStatus> = members
        .filter(|d| d.status.online)
        .map(|d| &d.status)
        .collect();

    if online.is_empty() {
        return AggregateStatus {
            state: 0,
            brightness: None,
            temperature: None,
            rgb: None,
            available: false,
        };
    }

    let state = if online.iter().any(|s| s.state == 1) { 1 } else { 0 };
    let brightness = mean_u8(online.iter().filter_map(|s| s.brightness));
    let temperature = mean_u8(online.iter().filter_map(|s| s.temperature));
    let rgb = mean_rgb(online.iter().filter_map(|s| s.rgb));

    AggregateStatus {
        state,
        brightness,
        temperature,
        rgb,
        available: true,
    }
}

fn mean_u8(values: impl Iterator<Item = u8>) -> Option<u8> {
    let (sum, count) = values.fold((0u32, 0u32), |(sum, count), v| (sum + v as u32, count + 1));
    if count == 0 {
        None
    } else {
        Some((sum / count) as u8)
    }
}

fn mean_rgb(values: impl Iterator<Item = (u8, u8, u8)>) -> Option<(u8, u8, u8)> {
    let (sums, count) = values.fold(((0u32, 0u32, 0u32), 0u32), |(sums, count), (r, g, b)| {
        ((sums.0 + r as u32, sums.1 + g as u32, sums.2 + b as u32), count + 1)
    });
    if count == 0 {
        None
    } else {
        Some(((sums.0 / count) as u8, (sums.1 / count) as u8, (sums.2 / count) as u8))
    }
}
