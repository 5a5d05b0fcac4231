//! The device-level step machine.
//!
//! [`DeviceSupervisor`] owns every [`CameraDevice`], the broker session and
//! the heartbeat monitor, and advances them all from a single cooperative
//! tick.  The step progression is
//! `Inactive -> Resetting -> Idle -> Running`, with `Aborting` as the
//! escape hatch taken on heartbeat loss or a dead broker session.  Aborting
//! tears everything down and re-enters `Inactive`, so a gateway left alone
//! with an unreachable broker just cycles through
//! `Aborting/Inactive/Resetting` until the broker comes back.
//!
//! One tick never waits on anything: broker connects fail fast, commands and
//! liveness are drained non-blocking, and camera ticks only touch state and
//! bounded queues.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use camgate_bus::{BusReceiver, BusTransport, Topic};
use camgate_device::{CameraDevice, CameraShared};
use camgate_types::{
    CameraId, CameraIntent, CommandEnvelope, DeviceStatus, Envelope, LivenessMsg, SupervisorStep,
};
use tracing::{debug, info, warn};

use crate::heartbeat::{HeartbeatEvent, HeartbeatMonitor};

/// Supervisor cadence and fault tuning.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Delay between scheduler ticks.
    pub tick_interval: Duration,
    /// Cadence of status publishes while the broker session is up.
    pub status_interval: Duration,
    /// Backoff between broker connect attempts in `Resetting`.
    pub connect_retry_delay: Duration,
    /// Silence on the heartbeat counter that counts as controller loss.
    pub heartbeat_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(1),
            status_interval: Duration::from_secs(1),
            connect_retry_delay: Duration::from_secs(1),
            heartbeat_timeout: Duration::from_secs(5),
        }
    }
}

/// Owns and advances the whole gateway.
pub struct DeviceSupervisor {
    bus: Arc<dyn BusTransport>,
    cameras: BTreeMap<CameraId, CameraDevice>,
    step: SupervisorStep,
    monitor: HeartbeatMonitor,
    config: SupervisorConfig,
    cmd_rx: Option<BusReceiver>,
    liveness_rx: Option<BusReceiver>,
    next_connect: Instant,
    last_publish: Option<Instant>,
    abort_draining: bool,
}

impl DeviceSupervisor {
    pub fn new(bus: Arc<dyn BusTransport>, config: SupervisorConfig) -> Self {
        let monitor = HeartbeatMonitor::new(config.heartbeat_timeout);
        Self {
            bus,
            cameras: BTreeMap::new(),
            step: SupervisorStep::Inactive,
            monitor,
            config,
            cmd_rx: None,
            liveness_rx: None,
            next_connect: Instant::now(),
            last_publish: None,
            abort_draining: false,
        }
    }

    /// Register a camera.  Replacing an id is a wiring bug and is rejected.
    pub fn add_camera(&mut self, device: CameraDevice) {
        let id = device.id();
        if self.cameras.insert(id, device).is_some() {
            warn!(camera = id, "duplicate camera id replaced an existing device");
        }
    }

    pub fn step(&self) -> SupervisorStep {
        self.step
    }

    /// Shared views of every camera, keyed by id, for the stream server.
    pub fn camera_shares(&self) -> std::collections::HashMap<CameraId, Arc<CameraShared>> {
        self.cameras
            .iter()
            .map(|(id, dev)| (*id, dev.shared()))
            .collect()
    }

    /// One scheduler tick.  Never blocks.
    pub fn tick(&mut self) {
        self.drain_liveness();
        self.advance_step();
        self.check_faults();
        for device in self.cameras.values_mut() {
            device.tick();
        }
        self.publish_status();
    }

    /// Drive ticks until `shutdown` is raised, then close everything down.
    pub async fn run(mut self, shutdown: Arc<AtomicBool>) {
        info!(cameras = self.cameras.len(), "supervisor started");
        while !shutdown.load(Ordering::SeqCst) {
            self.tick();
            tokio::time::sleep(self.config.tick_interval).await;
        }
        info!("supervisor stopping");
        for device in self.cameras.values_mut() {
            device.shutdown();
        }
        self.bus.teardown();
    }

    // ────────────────────────────────────────────────────────────────────────
    // Step machine
    // ────────────────────────────────────────────────────────────────────────

    fn advance_step(&mut self) {
        match self.step {
            SupervisorStep::Aborting => {
                // Recordings drain through Saving on the camera ticks that
                // follow; the step holds Aborting until every camera is
                // quiet, never blocking a tick on the join.
                if !self.abort_draining {
                    for device in self.cameras.values_mut() {
                        device.begin_shutdown();
                    }
                    self.bus.teardown();
                    self.cmd_rx = None;
                    self.liveness_rx = None;
                    self.monitor.reset();
                    self.last_publish = None;
                    self.abort_draining = true;
                }
                if self.cameras.values().all(CameraDevice::is_drained) {
                    self.abort_draining = false;
                    self.step = SupervisorStep::Inactive;
                    info!("abort complete, re-entering Inactive");
                }
            }
            SupervisorStep::Inactive => {
                self.step = SupervisorStep::Resetting;
            }
            SupervisorStep::Resetting => {
                if Instant::now() < self.next_connect {
                    return;
                }
                match self.bus.connect() {
                    Ok(()) => {
                        self.cmd_rx = Some(self.bus.subscribe(Topic::Command));
                        self.liveness_rx = Some(self.bus.subscribe(Topic::Liveness));
                        self.step = SupervisorStep::Idle;
                        info!("broker session up, entering Idle");
                    }
                    Err(e) => {
                        debug!(error = %e, "broker connect failed, will retry");
                        self.next_connect = Instant::now() + self.config.connect_retry_delay;
                    }
                }
            }
            SupervisorStep::Idle | SupervisorStep::Running => {
                self.dispatch_commands();
            }
        }
    }

    fn check_faults(&mut self) {
        match self.monitor.tick() {
            Some(HeartbeatEvent::Detected) => {
                if self.step == SupervisorStep::Idle {
                    info!("controller heartbeat detected, entering Running");
                    self.step = SupervisorStep::Running;
                }
            }
            Some(HeartbeatEvent::Lost) => {
                if self.step > SupervisorStep::Resetting {
                    self.abort("controller heartbeat lost");
                }
            }
            None => {}
        }
        if self.step > SupervisorStep::Resetting && !self.bus.is_connected() {
            self.abort("broker session lost");
        }
    }

    fn abort(&mut self, reason: &str) {
        warn!(reason, step = ?self.step, "aborting");
        self.step = SupervisorStep::Aborting;
    }

    // ────────────────────────────────────────────────────────────────────────
    // Bus traffic
    // ────────────────────────────────────────────────────────────────────────

    fn drain_liveness(&mut self) {
        let Some(rx) = self.liveness_rx.as_mut() else {
            return;
        };
        while let Some(value) = rx.try_next() {
            // Payloads may arrive bare or wrapped in a publish envelope.
            let inner = value.get("payload").unwrap_or(&value);
            match serde_json::from_value::<LivenessMsg>(inner.clone()) {
                Ok(msg) => self.monitor.update_external(msg.heartbeat_val),
                Err(e) => warn!(error = %e, "unreadable liveness message dropped"),
            }
        }
    }

    fn dispatch_commands(&mut self) {
        let Some(rx) = self.cmd_rx.as_mut() else {
            return;
        };
        while let Some(value) = rx.try_next() {
            let envelope = match serde_json::from_value::<CommandEnvelope>(value) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(error = %e, "malformed command dropped");
                    continue;
                }
            };
            let Some(intent) = CameraIntent::from_wire(&envelope.cmd) else {
                warn!(cmd = %envelope.cmd, "unknown command dropped");
                continue;
            };
            let Some(id) = envelope.camera_id() else {
                warn!(cmd = %envelope.cmd, "command without camera id dropped");
                continue;
            };
            match self.cameras.get(&id) {
                Some(device) => device.handle().send(intent),
                None => warn!(camera = id, cmd = %envelope.cmd, "command for unknown camera dropped"),
            }
        }
    }

    fn publish_status(&mut self) {
        // Publishing is gated on the session: while disconnected the status
        // simply goes unreported rather than queueing up.
        if !self.bus.is_connected() {
            return;
        }
        let due = self
            .last_publish
            .is_none_or(|t| t.elapsed() >= self.config.status_interval);
        if !due {
            return;
        }
        self.last_publish = Some(Instant::now());

        for (id, device) in &self.cameras {
            let snap = device.shared().stats.snapshot();
            debug!(
                camera = *id,
                captured = snap.captured,
                streamed = snap.streamed,
                written = snap.written,
                dropped = snap.dropped,
                "camera counters"
            );
        }

        let status = DeviceStatus {
            cameras: self.cameras.values().map(|d| d.status()).collect(),
            heartbeat: self.monitor.snapshot(),
            step_num: self.step.step_num(),
        };
        match serde_json::to_value(Envelope::now(status)) {
            Ok(payload) => {
                if let Err(e) = self.bus.publish(Topic::Status, payload) {
                    warn!(error = %e, "status publish failed");
                }
            }
            Err(e) => warn!(error = %e, "status serialization failed"),
        }

        if self.monitor.is_detected() {
            let echo = Envelope::now(LivenessMsg {
                heartbeat_val: self.monitor.echo_value(),
            });
            match serde_json::to_value(echo) {
                Ok(payload) => {
                    if let Err(e) = self.bus.publish(Topic::Liveness, payload) {
                        warn!(error = %e, "heartbeat echo failed");
                    }
                }
                Err(e) => warn!(error = %e, "heartbeat echo serialization failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camgate_bus::BrokerBus;
    use camgate_device::CameraConfig;
    use camgate_hal::{SyntheticBackend, SyntheticSinkBackend};
    use camgate_types::RecordingState;
    use serde_json::json;
    use std::path::PathBuf;

    fn fast_config() -> SupervisorConfig {
        SupervisorConfig {
            tick_interval: Duration::from_millis(1),
            status_interval: Duration::ZERO,
            connect_retry_delay: Duration::ZERO,
            heartbeat_timeout: Duration::from_millis(40),
        }
    }

    fn supervisor_with(bus: BrokerBus, cameras: u8) -> DeviceSupervisor {
        let mut sup = DeviceSupervisor::new(Arc::new(bus), fast_config());
        for id in 1..=cameras {
            let config = CameraConfig {
                capture: camgate_types::CaptureProfile {
                    width: 8,
                    height: 4,
                    frame_rate: 30.0,
                    pixel_format: "MJPG".to_string(),
                },
                ..CameraConfig::new(id, format!("/dev/video{id}"), PathBuf::from("/tmp"))
            };
            sup.add_camera(CameraDevice::new(
                config,
                Arc::new(SyntheticBackend::new()),
                Arc::new(SyntheticSinkBackend::new()),
            ));
        }
        sup
    }

    fn tick_until(sup: &mut DeviceSupervisor, step: SupervisorStep) {
        for _ in 0..200 {
            if sup.step() == step {
                return;
            }
            sup.tick();
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("never reached {step:?}, stuck at {:?}", sup.step());
    }

    #[test]
    fn startup_progresses_to_idle() {
        let mut sup = supervisor_with(BrokerBus::default(), 1);
        assert_eq!(sup.step(), SupervisorStep::Inactive);
        sup.tick();
        assert_eq!(sup.step(), SupervisorStep::Resetting);
        sup.tick();
        assert_eq!(sup.step(), SupervisorStep::Idle);
        sup.tick();
        assert_eq!(sup.step(), SupervisorStep::Idle, "Idle holds without a heartbeat");
    }

    #[test]
    fn connect_failures_keep_resetting_until_broker_answers() {
        let mut sup = supervisor_with(BrokerBus::default().with_failing_connects(2), 1);
        sup.tick();
        sup.tick();
        assert_eq!(sup.step(), SupervisorStep::Resetting);
        sup.tick();
        assert_eq!(sup.step(), SupervisorStep::Resetting);
        sup.tick();
        assert_eq!(sup.step(), SupervisorStep::Idle);
    }

    #[test]
    fn heartbeat_detection_enters_running() {
        let bus = BrokerBus::default();
        let mut sup = supervisor_with(bus.clone(), 1);
        tick_until(&mut sup, SupervisorStep::Idle);

        bus.publish(Topic::Liveness, json!({"heartbeatVal": 1})).unwrap();
        sup.tick();
        assert_eq!(sup.step(), SupervisorStep::Running);
    }

    #[test]
    fn heartbeat_loss_aborts_and_recovers() {
        let bus = BrokerBus::default();
        let mut sup = supervisor_with(bus.clone(), 1);
        tick_until(&mut sup, SupervisorStep::Idle);

        bus.publish(Topic::Liveness, json!({"heartbeatVal": 1})).unwrap();
        sup.tick();
        assert_eq!(sup.step(), SupervisorStep::Running);

        // Counter stalls past the timeout.
        std::thread::sleep(Duration::from_millis(60));
        sup.tick();
        assert_eq!(sup.step(), SupervisorStep::Aborting);

        // The abort tears down and the cycle re-establishes the session.
        tick_until(&mut sup, SupervisorStep::Idle);
    }

    #[test]
    fn broker_loss_aborts_and_cycles_without_publishing() {
        let bus = BrokerBus::default();
        let mut sup = supervisor_with(bus.clone(), 1);
        tick_until(&mut sup, SupervisorStep::Idle);

        let mut status_rx = bus.subscribe(Topic::Status);
        // Simulate the broker dropping the session, with the next connect
        // attempts also failing.
        bus.teardown();
        let bus = bus.with_failing_connects(3);

        sup.tick();
        assert_eq!(sup.step(), SupervisorStep::Aborting);
        sup.tick();
        assert_eq!(sup.step(), SupervisorStep::Inactive);
        sup.tick();
        assert_eq!(sup.step(), SupervisorStep::Resetting);
        sup.tick();
        sup.tick();
        assert_eq!(sup.step(), SupervisorStep::Resetting, "stays Resetting while broker is down");
        assert!(
            status_rx.try_next().is_none(),
            "no status may be published while disconnected"
        );

        tick_until(&mut sup, SupervisorStep::Idle);
        drop(bus);
    }

    #[test]
    fn commands_are_routed_to_the_addressed_camera() {
        let bus = BrokerBus::default();
        let mut sup = supervisor_with(bus.clone(), 2);
        tick_until(&mut sup, SupervisorStep::Idle);

        bus.publish(Topic::Command, json!({"cmd": "connect", "params": [2]})).unwrap();
        bus.publish(Topic::Command, json!({"cmd": "start_stream", "params": [2]})).unwrap();
        sup.tick();
        sup.tick();

        let shares = sup.camera_shares();
        assert!(shares[&2].is_connected());
        assert!(shares[&2].is_streaming());
        assert!(!shares[&1].is_connected(), "camera 1 was not addressed");
    }

    #[test]
    fn bad_commands_are_dropped_without_state_change() {
        let bus = BrokerBus::default();
        let mut sup = supervisor_with(bus.clone(), 1);
        tick_until(&mut sup, SupervisorStep::Idle);

        bus.publish(Topic::Command, json!("not an object")).unwrap();
        bus.publish(Topic::Command, json!({"cmd": "take_image", "params": [1]})).unwrap();
        bus.publish(Topic::Command, json!({"cmd": "connect"})).unwrap();
        bus.publish(Topic::Command, json!({"cmd": "connect", "params": [9]})).unwrap();
        sup.tick();
        sup.tick();

        assert_eq!(sup.step(), SupervisorStep::Idle);
        assert!(!sup.camera_shares()[&1].is_connected());
    }

    #[test]
    fn status_envelope_carries_cameras_step_and_heartbeat() {
        let bus = BrokerBus::default();
        let mut sup = supervisor_with(bus.clone(), 2);
        tick_until(&mut sup, SupervisorStep::Idle);

        let mut status_rx = bus.subscribe(Topic::Status);
        bus.publish(Topic::Liveness, json!({"heartbeatVal": 5})).unwrap();
        sup.tick();

        let mut last = None;
        while let Some(value) = status_rx.try_next() {
            last = Some(value);
        }
        let envelope = last.expect("status published while connected");
        assert!(envelope["timestamp"].as_i64().is_some());
        let payload = &envelope["payload"];
        assert_eq!(payload["cameras"].as_array().map(Vec::len), Some(2));
        assert_eq!(payload["stepNum"], 500);
        assert_eq!(payload["heartbeat"]["input"], 5);
        assert_eq!(payload["cameras"][0]["recordingState"], 0);
    }

    #[test]
    fn heartbeat_echo_is_published_back() {
        let bus = BrokerBus::default();
        let mut sup = supervisor_with(bus.clone(), 1);
        tick_until(&mut sup, SupervisorStep::Idle);

        bus.publish(Topic::Liveness, json!({"heartbeatVal": 9})).unwrap();
        sup.tick();

        let mut liveness_rx = bus.subscribe(Topic::Liveness);
        sup.tick();
        let mut echoed = false;
        while let Some(value) = liveness_rx.try_next() {
            let inner = value.get("payload").unwrap_or(&value);
            if inner["heartbeatVal"] == 9 {
                echoed = true;
            }
        }
        assert!(echoed, "gateway must mirror the controller's counter");
    }

    #[test]
    fn abort_closes_active_recordings() {
        let bus = BrokerBus::default();
        let mut sup = supervisor_with(bus.clone(), 1);
        tick_until(&mut sup, SupervisorStep::Idle);

        bus.publish(Topic::Command, json!({"cmd": "connect", "params": [1]})).unwrap();
        bus.publish(Topic::Command, json!({"cmd": "start_record", "params": [1]})).unwrap();
        for _ in 0..5 {
            sup.tick();
        }
        assert_eq!(
            sup.cameras[&1].status().recording_state,
            RecordingState::Recording
        );

        bus.teardown();
        sup.tick();
        assert_eq!(sup.step(), SupervisorStep::Aborting);

        // The drain runs across ticks; the recording ends up closed.
        for _ in 0..500 {
            if sup.cameras[&1].status().recording_state == RecordingState::Stopped {
                break;
            }
            sup.tick();
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(
            sup.cameras[&1].status().recording_state,
            RecordingState::Stopped
        );
        assert!(!sup.camera_shares()[&1].is_connected());
    }

    #[test]
    fn abort_ticks_stay_short_while_a_recording_drains() {
        let bus = BrokerBus::default();
        let mut sup = DeviceSupervisor::new(Arc::new(bus.clone()), fast_config());
        let config = CameraConfig {
            capture: camgate_types::CaptureProfile {
                width: 8,
                height: 4,
                frame_rate: 30.0,
                pixel_format: "MJPG".to_string(),
            },
            ..CameraConfig::new(1, "/dev/video1", PathBuf::from("/tmp"))
        };
        // Finalization takes far longer than any tick may.
        sup.add_camera(CameraDevice::new(
            config,
            Arc::new(SyntheticBackend::new()),
            Arc::new(SyntheticSinkBackend::new().with_finalize_delay(Duration::from_millis(400))),
        ));
        tick_until(&mut sup, SupervisorStep::Idle);

        bus.publish(Topic::Command, json!({"cmd": "connect", "params": [1]})).unwrap();
        bus.publish(Topic::Command, json!({"cmd": "start_record", "params": [1]})).unwrap();
        for _ in 0..5 {
            sup.tick();
        }
        assert_eq!(
            sup.cameras[&1].status().recording_state,
            RecordingState::Recording
        );

        bus.teardown();
        sup.tick();
        assert_eq!(sup.step(), SupervisorStep::Aborting);

        let start = Instant::now();
        sup.tick();
        assert!(
            start.elapsed() < Duration::from_millis(100),
            "the abort tick must not wait on the recording worker"
        );
        assert_eq!(sup.step(), SupervisorStep::Aborting, "drain still in flight");
        assert_eq!(
            sup.cameras[&1].status().recording_state,
            RecordingState::Saving
        );
    }
}
