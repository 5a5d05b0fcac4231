//! `camgated` – the edge camera gateway daemon.
//!
//! Wires the configured cameras, the broker session, the supervisor step
//! machine and the MJPEG preview server together and runs until Ctrl-C.

mod config;
mod telemetry;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use camgate_bus::BrokerBus;
use camgate_device::CameraDevice;
use camgate_hal::{CaptureBackend, MjvFileBackend, RecordingBackend, SyntheticBackend, discovery};
use camgate_stream::StreamServer;
use camgate_supervisor::DeviceSupervisor;
use camgate_types::GatewayError;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), GatewayError> {
    let _guard = telemetry::init_tracing("camgate");

    let cfg = match config::load()? {
        Some(cfg) => cfg,
        None => {
            info!(path = %config::config_path().display(), "no config file, using defaults");
            config::Config::default()
        }
    };
    info!(broker = %cfg.broker.host, cameras = cfg.cameras.len(), "gateway starting");

    std::fs::create_dir_all(&cfg.video_dir)?;

    let discovered = discovery::list_cameras();
    for cam in &discovered {
        info!(index = cam.index, name = %cam.name, serial = %cam.serial, "camera present");
    }

    let bus = Arc::new(BrokerBus::default());
    // Physical capture backends implement CaptureBackend out of tree; the
    // synthetic backend keeps the gateway fully runnable on headless hosts.
    let capture: Arc<dyn CaptureBackend> = Arc::new(SyntheticBackend::new());
    let recorder: Arc<dyn RecordingBackend> = Arc::new(MjvFileBackend);

    let mut supervisor = DeviceSupervisor::new(bus, cfg.supervisor_config());
    for mut camera_cfg in cfg.camera_configs()? {
        // Camera map values that are not device nodes are USB serials to be
        // resolved against the live topology.
        if !camera_cfg.node.starts_with("/dev/") {
            match discovery::index_by_serial(&camera_cfg.node) {
                Some(index) => camera_cfg.node = format!("/dev/video{index}"),
                None => warn!(
                    camera = camera_cfg.id,
                    serial = %camera_cfg.node,
                    "configured serial not found on this host"
                ),
            }
        }
        supervisor.add_camera(CameraDevice::new(
            camera_cfg,
            Arc::clone(&capture),
            Arc::clone(&recorder),
        ));
    }

    let stream_server = StreamServer::new(supervisor.camera_shares(), cfg.stream.clone())
        .with_port(cfg.stream_port);
    tokio::spawn(async move {
        if let Err(e) = stream_server.run().await {
            error!(error = %e, "stream server failed");
        }
    });

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            flag.store(true, Ordering::SeqCst);
        }
    });

    supervisor.run(shutdown).await;
    info!("gateway stopped");
    Ok(())
}
