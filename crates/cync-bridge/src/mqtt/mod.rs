// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Single MQTT client bridging the device registry and dispatcher to an
//! external broker. Reconnects with the backoff baked into `rumqttc`'s event
//! loop, publishes a will so subscribers see the bridge go `offline`, and
//! re-subscribes/re-publishes discovery on every `ConnAck` — `clean_session`
//! means the broker forgets our subscriptions across a bounce.

pub mod command;
pub mod discovery;

use crate::core::Core;
use crate::dispatcher::Intent;
use crate::timing::CorrelationId;
use rumqttc::{AsyncClient, ConnectionError, Event, LastWill, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub enum MqttError {
    Connect(String),
}

impl std::fmt::Display for MqttError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect(s) => write!(f, "mqtt connect error: {s}"),
        }
    }
}

impl std::error::Error for MqttError {}

pub struct MqttBridge {
    client: AsyncClient,
    event_loop_handle: JoinHandle<()>,
    availability_topic: String,
}

impl MqttBridge {
    /// Connect to the configured broker and spawn the background event-loop
    /// task that drives reconnects, discovery republication, and inbound
    /// command dispatch.
    pub async fn connect(core: Core) -> Result<Self, MqttError> {
        let mqtt_config = core.config.mqtt.clone();
        let availability_topic = format!("{}/bridge/availability", mqtt_config.topic_prefix);

        let client_id = format!("cync-bridge-{}", core.config.home_id);
        let mut options = MqttOptions::new(client_id, mqtt_config.host.clone(), mqtt_config.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(username), Some(password)) = (&mqtt_config.username, &mqtt_config.password) {
            options.set_credentials(username, password);
        }
        options.set_last_will(LastWill::new(
            &availability_topic,
            mqtt_config.will_payload.clone(),
            QoS::AtLeastOnce,
            true,
        ));

        let (client, mut event_loop) = AsyncClient::new(options, 64);
        let command_topic_filter = format!("{}/set/#", mqtt_config.topic_prefix);

        let task_client = client.clone();
        let task_core = core.clone();
        let task_availability_topic = availability_topic.clone();
        let event_loop_handle = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        info!(?ack, "mqtt connected");
                        if let Err(e) = task_client.subscribe(&command_topic_filter, QoS::AtLeastOnce).await {
                            error!(error = %e, "failed to subscribe to command topic");
                        }
                        if let Err(e) = task_client
                            .publish(&task_availability_topic, QoS::AtLeastOnce, true, task_core.config.mqtt.birth_payload.clone())
                            .await
                        {
                            error!(error = %e, "failed to publish birth message");
                        }
                        publish_all_discovery(&task_client, &task_core).await;
                        publish_all_state(&task_client, &task_core).await;
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        handle_incoming_command(&task_client, &task_core, &publish.topic, &publish.payload).await;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt event loop error, will reconnect");
                        if matches!(e, ConnectionError::RequestsDone) {
                            break;
                        }
                        // rumqttc's event loop reconnects internally on the
                        // next poll(); this sleep just avoids a hot loop
                        // while the broker is unreachable.
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Ok(Self { client, event_loop_handle, availability_topic })
    }

    /// Publish the will payload proactively and disconnect cleanly, used
    /// during graceful shutdown so the availability topic flips immediately
    /// rather than waiting on the broker's keep-alive timeout.
    pub async fn shutdown(&self, will_payload: &str) {
        let _ = self
            .client
            .publish(&self.availability_topic, QoS::AtLeastOnce, true, will_payload)
            .await;
        let _ = self.client.disconnect().await;
        self.event_loop_handle.abort();
    }
}

async fn publish_all_discovery(client: &AsyncClient, core: &Core) {
    let registry = core.registry.read().await;
    for device in registry.devices() {
        let doc = discovery::device_document(&core.config.mqtt, device, None);
        let component = discovery::component_for(device.attrs.capabilities);
        let topic = discovery::config_topic(&core.config.mqtt, component, &doc.unique_id);
        publish_discovery_doc(client, &topic, &doc).await;
    }
    for group in registry.groups() {
        let doc = discovery::group_document(&core.config.mqtt, group);
        let topic = discovery::config_topic(&core.config.mqtt, "light", &doc.unique_id);
        publish_discovery_doc(client, &topic, &doc).await;
    }
}

async fn publish_discovery_doc(client: &AsyncClient, topic: &str, doc: &discovery::DiscoveryDocument) {
    match serde_json::to_string(doc) {
        Ok(json) => {
            if let Err(e) = client.publish(topic, QoS::AtLeastOnce, true, json).await {
                error!(%topic, error = %e, "failed to publish discovery document");
            }
        }
        Err(e) => error!(%topic, error = %e, "failed to serialize discovery document"),
    }
}

async fn publish_all_state(client: &AsyncClient, core: &Core) {
    let registry = core.registry.read().await;
    for device in registry.devices() {
        let unique_id = device.id.unique_id();
        let topic = discovery::state_topic(&core.config.mqtt, &unique_id);
        publish_state_json(client, &topic, &device.status).await;
    }
    for group in registry.groups() {
        if let Ok(agg) = registry.aggregate(group.id) {
            let unique_id = format!("group-{}", group.id.unique_id());
            let topic = discovery::state_topic(&core.config.mqtt, &unique_id);
            publish_state_json(client, &topic, &agg).await;
        }
    }
}

async fn publish_state_json(client: &AsyncClient, topic: &str, status: &impl serde::Serialize) {
    match serde_json::to_string(status) {
        Ok(json) => {
            if let Err(e) = client.publish(topic, QoS::AtLeastOnce, true, json).await {
                error!(%topic, error = %e, "failed to publish state");
            }
        }
        Err(e) => error!(%topic, error = %e, "failed to serialize state"),
    }
}

async fn handle_incoming_command(client: &AsyncClient, core: &Core, topic: &str, payload: &[u8]) {
    let Some(target) = command::parse_target(&core.config.mqtt.topic_prefix, topic) else {
        debug!(%topic, "ignoring publish on unrecognized topic");
        return;
    };

    let intents = match command::parse_intents(payload) {
        Ok(intents) => intents,
        Err(e) => {
            warn!(%topic, error = %e, "malformed command payload");
            return;
        }
    };

    for intent in intents {
        let correlation_id = CorrelationId::new();
        let outcome = match target {
            command::Target::Device(device_id) => {
                core.dispatcher.dispatch_device(device_id, intent.clone(), correlation_id).await
            }
            command::Target::Group(group_id) => {
                core.dispatcher.dispatch_group(group_id, intent.clone(), correlation_id).await
            }
        };

        match outcome {
            Ok(result) if result.success => {
                debug!(%correlation_id, ?intent, "command dispatched");
                refresh_state_after_command(client, core, target).await;
            }
            Ok(_) => warn!(%correlation_id, ?intent, "command exhausted retries without an ACK"),
            Err(e) => warn!(%correlation_id, ?intent, error = %e, "dispatch failed"),
        }
    }
}

async fn refresh_state_after_command(client: &AsyncClient, core: &Core, target: command::Target) {
    let registry = core.registry.read().await;
    match target {
        command::Target::Device(device_id) => {
            if let Some(device) = registry.device(device_id) {
                let unique_id = device.id.unique_id();
                let topic = discovery::state_topic(&core.config.mqtt, &unique_id);
                publish_state_json(client, &topic, &device.status).await;
            }
        }
        command::Target::Group(group_id) => {
            if let Ok(agg) = registry.aggregate(group_id) {
                let unique_id = format!("group-{}", group_id.unique_id());
                let topic = discovery::state_topic(&core.config.mqtt, &unique_id);
                publish_state_json(client, &topic, &agg).await;
            }
        }
    }
}
