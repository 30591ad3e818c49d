// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end scenarios that exercise the codec, session engine, dispatcher,
//! and session registry together, the way a real device connection would
//! drive them.

use cync_bridge::codec::PacketFramer;
use cync_bridge::dispatcher::{Dispatcher, Intent};
use cync_bridge::registry::device::{Capabilities, DeviceAttrs, DeviceId};
use cync_bridge::registry::group::{Group, GroupId};
use cync_bridge::registry::Registry;
use cync_bridge::session::handles::DispatchRequest;
use cync_bridge::session::{Session, SessionHandle, SessionRegistry};
use cync_bridge::timing::{CorrelationId, TimingPolicy};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

fn device_attrs(name: &str) -> DeviceAttrs {
    DeviceAttrs {
        name: name.to_string(),
        type_code: 1,
        capabilities: Capabilities { on_off: true, brightness: true, ..Default::default() },
        mac: None,
        firmware_version: None,
    }
}

fn handshake_frame() -> Vec<u8> {
    let payload = vec![0u8; 26];
    let mut raw = vec![0x23, 0, 0, 0, 26];
    raw.extend_from_slice(&payload);
    raw
}

/// Drive the full read path through the stream framer exactly as the
/// listener's accept loop does: bytes in, frames out, each frame decoded and
/// applied to the session.
#[tokio::test]
async fn handshake_and_status_through_the_stream_framer() {
    let registry = Arc::new(RwLock::new(Registry::new()));
    let mut session = Session::new(
        "10.0.0.5:5001".into(),
        1,
        [0, 0, 1],
        registry.clone(),
        Duration::from_millis(200),
        64,
        TimingPolicy::default(),
    );
    session.on_tls_accepted();

    let mut framer = PacketFramer::new();

    // The device's handshake and a status broadcast arrive split across two
    // reads, as TCP offers no message boundaries.
    let handshake = handshake_frame();
    let mut wire = handshake.clone();
    wire.extend_from_slice(&status_frame([1, 0, 0, 0, 77], [0, 1], &[1, 90, 40]));

    let first_read = &wire[..handshake.len() + 3];
    let second_read = &wire[handshake.len() + 3..];

    let mut outbound = Vec::new();
    for frame in framer.feed(first_read) {
        outbound.extend(session.handle_raw(&frame).await.unwrap());
    }
    for frame in framer.feed(second_read) {
        outbound.extend(session.handle_raw(&frame).await.unwrap());
    }

    // handshake ack + probe + status ack
    assert_eq!(outbound.len(), 3);
    assert_eq!(outbound[0][0], 0x28);
    assert_eq!(outbound[1][0], 0xA3);
    assert_eq!(outbound[2][0], 0x88);

    let registry = registry.read().await;
    let device = registry.device(DeviceId::new(1, 77)).expect("device seeded from status broadcast");
    assert_eq!(device.status.state, 1);
    assert_eq!(device.status.brightness, Some(90));
    assert!(device.status.online);
}

fn status_frame(endpoint: [u8; 5], msg_id: [u8; 2], inner: &[u8]) -> Vec<u8> {
    use cync_bridge::codec::checksum;
    let mut payload = Vec::new();
    payload.extend_from_slice(&endpoint);
    payload.extend_from_slice(&msg_id);
    payload.push(0x00);
    payload.push(checksum::FRAME_MARKER);
    payload.extend_from_slice(inner);
    payload.push(0x00);
    payload.push(checksum::FRAME_MARKER);
    let idx = payload.len() - 2;
    checksum::insert_checksum_in_place(&mut payload, idx, checksum::DEFAULT_OFFSET_AFTER_START).unwrap();

    let mut raw = vec![0x83u8, 0, 0];
    let len = payload.len() as u16;
    raw.push((len / 256) as u8);
    raw.push((len % 256) as u8);
    raw.extend_from_slice(&payload);
    raw
}

#[tokio::test]
async fn dispatch_device_routes_through_session_handle_and_acks() {
    let registry = Arc::new(RwLock::new(Registry::new()));
    let device_id = DeviceId::new(1, 42);
    registry.write().await.upsert_device(device_id, device_attrs("lamp"));

    let sessions = SessionRegistry::new();

    // A loopback connection that never acks would hang the dispatcher's
    // retry loop for the full max_retries window; instead simulate the ACK
    // arriving out-of-band by resolving it from a second task.
    let (command_tx, mut command_rx) = mpsc::channel::<DispatchRequest>(8);
    let handle = SessionHandle::new("10.0.0.9:1".into(), command_tx);
    handle.set_ready(true);
    handle.remember(42);
    sessions.insert(handle);

    let acker = tokio::spawn(async move {
        if let Some(request) = command_rx.recv().await {
            let _ = request.reply.send(cync_bridge::session::SendResult {
                success: true,
                correlation_id: request.correlation_id,
                retries: 0,
            });
        }
    });

    let dispatcher = Dispatcher::new(registry, sessions, 1, cync_bridge::registry::TemperatureBounds::default());
    let outcome = dispatcher
        .dispatch_device(device_id, Intent::SetPower(true), CorrelationId::new())
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.retries, 0);
    acker.await.unwrap();
}

#[tokio::test]
async fn session_loss_leaves_dispatcher_without_a_bridge() {
    let registry = Arc::new(RwLock::new(Registry::new()));
    let device_id = DeviceId::new(1, 7);
    registry.write().await.upsert_device(device_id, device_attrs("switch"));

    let sessions = SessionRegistry::new();
    let (command_tx, _command_rx) = mpsc::channel::<DispatchRequest>(8);
    let handle = SessionHandle::new("10.0.0.3:1".into(), command_tx);
    handle.set_ready(true);
    handle.remember(7);
    sessions.insert(handle);

    // The device disconnects: the listener removes the handle from the
    // registry exactly as `drive_session` does on exit.
    sessions.remove("10.0.0.3:1");

    let dispatcher = Dispatcher::new(registry, sessions, 1, cync_bridge::registry::TemperatureBounds::default());
    let err = dispatcher
        .dispatch_device(device_id, Intent::SetPower(true), CorrelationId::new())
        .await
        .unwrap_err();
    assert!(matches!(err, cync_bridge::error::DispatchError::NoBridgeAvailable));
}

#[tokio::test]
async fn group_command_resolves_to_the_session_with_the_most_members() {
    let registry = Arc::new(RwLock::new(Registry::new()));
    let group_id = GroupId::new(1, 100);
    registry.write().await.upsert_group(Group {
        id: group_id,
        name: "living room".into(),
        member_cync_ids: vec![1, 2, 3],
    });

    let sessions = SessionRegistry::new();
    let (partial_tx, _partial_rx) = mpsc::channel::<DispatchRequest>(8);
    let partial = SessionHandle::new("10.0.0.1:1".into(), partial_tx);
    partial.set_ready(true);
    partial.remember(1);
    sessions.insert(partial);

    let (full_tx, mut full_rx) = mpsc::channel::<DispatchRequest>(8);
    let full = SessionHandle::new("10.0.0.2:1".into(), full_tx);
    full.set_ready(true);
    full.remember(1);
    full.remember(2);
    full.remember(3);
    sessions.insert(full);

    let acker = tokio::spawn(async move {
        if let Some(request) = full_rx.recv().await {
            let _ = request.reply.send(cync_bridge::session::SendResult {
                success: true,
                correlation_id: request.correlation_id,
                retries: 0,
            });
        }
    });

    let dispatcher = Dispatcher::new(registry, sessions, 1, cync_bridge::registry::TemperatureBounds::default());
    let outcome = dispatcher
        .dispatch_group(group_id, Intent::SetBrightness(200), CorrelationId::new())
        .await
        .unwrap();

    assert!(outcome.success);
    acker.await.unwrap();
}

/// A command whose ACK never arrives must retry `max_retries` times with
/// the configured backoff and then fail, without hanging past the expected
/// bound — exercised under paused virtual time so it runs instantly.
#[tokio::test(start_paused = true)]
async fn unacked_command_retries_then_fails_within_expected_window() {
    let registry = Arc::new(RwLock::new(Registry::new()));
    let timing = TimingPolicy::default();
    let mut session = Session::new(
        "10.0.0.4:1".into(),
        1,
        [0, 0, 3],
        registry,
        Duration::from_millis(200),
        64,
        timing,
    );

    let send_task = tokio::spawn(async move {
        session
            .send_reliable([0, 0, 0, 0, 9], &[0x01, 1], CorrelationId::new(), |_frame| {
                Box::pin(async move {})
            })
            .await
    });

    tokio::time::advance(Duration::from_secs(5)).await;
    let result = send_task.await.unwrap();

    assert!(!result.success);
    assert_eq!(result.retries, timing.max_retries);
}

#[tokio::test]
async fn unknown_preset_falls_back_to_a_no_op_rather_than_an_error() {
    let registry = Arc::new(RwLock::new(Registry::new()));
    let device_id = DeviceId::new(1, 55);
    registry.write().await.upsert_device(device_id, device_attrs("strip"));

    let sessions = SessionRegistry::new();
    let (tx, mut rx) = mpsc::channel::<DispatchRequest>(8);
    let handle = SessionHandle::new("10.0.0.6:1".into(), tx);
    handle.set_ready(true);
    handle.remember(55);
    sessions.insert(handle);

    let acker = tokio::spawn(async move {
        if let Some(request) = rx.recv().await {
            assert_eq!(request.data, vec![0x06, 0x00, 0x00]);
            let _ = request.reply.send(cync_bridge::session::SendResult {
                success: true,
                correlation_id: request.correlation_id,
                retries: 0,
            });
        }
    });

    let dispatcher = Dispatcher::new(registry, sessions, 1, cync_bridge::registry::TemperatureBounds::default());
    let outcome = dispatcher
        .dispatch_device(device_id, Intent::Preset("not-a-real-preset".into()), CorrelationId::new())
        .await
        .unwrap();
    assert!(outcome.success);
    acker.await.unwrap();
}
