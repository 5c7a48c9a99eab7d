//! Device Onboarding Service - Main Entry Point

use std::sync::Arc;

use clap::Parser;
use device_onboarding_service::{
    backend::{Simulated, SimulatedBroker, SimulatedFabric, SimulatedRadio, SimulatedWifi},
    config::{CliArgs, Settings},
    core::{
        connection::ConnectionManager,
        control::DeviceController,
        device_state::DeviceStateManager,
        dispatch::CommandDispatcher,
        provisioning::ProvisioningCoordinator,
        registry::DeviceRegistry,
        status_feed::{STATUS_TOPIC_FILTER, StatusFeed},
    },
    provisioner::{BluetoothProvisioner, QrCodeProvisioner, WifiProvisioner, WifiTimeouts},
    server::UnixSocketServer,
    transport::Transports,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,device_onboarding_service=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse CLI arguments
    let args = CliArgs::parse();
    info!(?args, "Starting device onboarding service");
    let settings = Settings::from(args);

    // Simulated radio, broker, fabric and WiFi interface
    let wifi = Arc::new(SimulatedWifi::new());
    let transports = Transports::<Simulated>::new(
        Arc::new(SimulatedRadio::with_demo_peripherals()),
        Arc::new(SimulatedBroker::new()),
        Arc::new(SimulatedFabric::with_demo_nodes()),
        settings.transport_settings(),
    );

    match transports
        .mqtt
        .connect_broker(
            &settings.mqtt_host,
            settings.mqtt_port,
            &settings.mqtt_client_id,
        )
        .await
    {
        Ok(_) => {
            if let Err(e) = transports.mqtt.subscribe(STATUS_TOPIC_FILTER).await {
                warn!("Failed to subscribe to device status topics: {}", e);
            }
        }
        Err(e) => warn!(
            "MQTT broker {}:{} unavailable: {}",
            settings.mqtt_host, settings.mqtt_port, e
        ),
    }

    // Device control
    let registry = Arc::new(DeviceRegistry::new());
    let connections = Arc::new(ConnectionManager::new(transports.clone()));
    let dispatcher = Arc::new(CommandDispatcher::new(
        registry.clone(),
        connections.clone(),
        settings.dispatch_timeouts(),
    ));
    let states = Arc::new(DeviceStateManager::new());
    let control = Arc::new(DeviceController::new(
        registry,
        connections,
        dispatcher,
        states.clone(),
    ));
    let mut status_feed = StatusFeed::start(&transports, states.clone());

    // Provisioning
    let provisioning = Arc::new(ProvisioningCoordinator::new(
        Arc::new(BluetoothProvisioner::new(transports.bluetooth.clone())),
        Arc::new(WifiProvisioner::new(wifi, WifiTimeouts::default())),
        Arc::new(QrCodeProvisioner::new(settings.qr_apply_delay)),
        settings.default_configuration(),
    ));
    info!("Device onboarding service created");

    info!("Starting Unix socket server on {}", settings.socket_path);
    let server = UnixSocketServer::new(
        settings.socket_path.clone(),
        settings.socket_mode,
        provisioning,
        control,
        states,
    );
    let server_task = tokio::spawn(async move {
        if let Err(e) = server.start().await {
            error!("Unix socket server error: {}", e);
        }
    });

    info!("Service started successfully");

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully");
        }
        _ = shutdown_signal() => {
            info!("Received SIGTERM, shutting down gracefully");
        }
        _ = server_task => {
            info!("Server task completed");
        }
    }

    info!("Shutting down...");
    transports.cancel_all().await;
    status_feed.stop();
    if let Err(e) = tokio::fs::remove_file(&settings.socket_path).await {
        warn!("Failed to remove socket {}: {}", settings.socket_path, e);
    }
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            error!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    // On non-Unix platforms, just wait forever
    std::future::pending::<()>().await
}
