// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! cync-bridge
//!
//! LAN-side bridge for consumer mesh-lighting devices: terminates their TLS
//! sessions, speaks the vendor's binary wire protocol, and exposes devices
//! and groups over MQTT with Home Assistant-style discovery.
//!
//! # Usage
//!
//! ```bash
//! cync-bridge --config bridge.yaml
//! cync-bridge --config bridge.yaml --log-level debug
//! ```

use clap::Parser;
use cync_bridge::config::BridgeConfig;
use cync_bridge::core::Core;
use cync_bridge::mqtt::MqttBridge;
use cync_bridge::session::{self, ListenerContext};
use std::path::PathBuf;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use tokio_rustls::rustls;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "cync-bridge")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Bridge configuration file (YAML)
    #[arg(short, long)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = BridgeConfig::load(&args.config)?;
    info!(device_port = config.device_port, home_id = config.home_id, "loaded configuration");

    let tls_acceptor = build_tls_acceptor(&config)?;

    let core = Core::new(config);
    core.seed_registry().await;

    let listener_ctx = Arc::new(ListenerContext {
        config: core.config.clone(),
        registry: core.registry.clone(),
        sessions: core.sessions.clone(),
        tls_acceptor,
        timing: core.timing,
        metrics: core.metrics.clone(),
        connection_count: AtomicUsize::new(0),
        shutdown: core.shutdown.clone(),
    });

    let mqtt_bridge = MqttBridge::connect(core.clone()).await?;

    let listener_task = tokio::spawn(async move {
        if let Err(e) = session::run(listener_ctx).await {
            error!(error = %e, "device listener exited with an error");
        }
    });

    let shutdown_core = core.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown signal received, draining sessions");
        shutdown_core.shutdown().await;
    });

    listener_task.await?;
    mqtt_bridge.shutdown(&core.config.mqtt.will_payload).await;

    info!("cync-bridge stopped");
    Ok(())
}

/// Load the bridge's server certificate and private key for TLS termination
/// (§4.1: the bridge impersonates the vendor cloud endpoint, so it must
/// present a certificate the device's pinned trust store accepts).
fn build_tls_acceptor(config: &BridgeConfig) -> Result<tokio_rustls::TlsAcceptor, Box<dyn std::error::Error>> {
    let cert_file = std::fs::File::open(&config.tls_cert_path)?;
    let mut cert_reader = std::io::BufReader::new(cert_file);
    let certs = rustls_pemfile::certs(&mut cert_reader).collect::<Result<Vec<_>, _>>()?;

    let key_file = std::fs::File::open(&config.tls_key_path)?;
    let mut key_reader = std::io::BufReader::new(key_file);
    let key = rustls_pemfile::private_key(&mut key_reader)?
        .ok_or("no private key found in tls_key_path")?;

    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    Ok(tokio_rustls::TlsAcceptor::from(Arc::new(server_config)))
}
