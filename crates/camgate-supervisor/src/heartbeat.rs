//! Heartbeat mirror protocol with the external controller.
//!
//! The controller publishes a counter on the liveness topic and expects the
//! gateway to mirror it back.  Liveness is judged on *change*: a counter
//! that stops moving for longer than the timeout means the controller is
//! gone.  Judging change rather than receipt also makes the monitor immune
//! to hearing its own mirrored echo on the shared topic.

use std::time::{Duration, Instant};

use camgate_types::Heartbeat;

/// Edge produced by [`HeartbeatMonitor::tick`], at most one per transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// First counter value seen since start or reset.
    Detected,
    /// The counter stopped changing for longer than the timeout.
    Lost,
}

/// Tracks the controller's heartbeat counter and mirrors it.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    heartbeat: Heartbeat,
    timeout: Duration,
    last_change: Option<Instant>,
    detected: bool,
    pending_detect: bool,
}

impl HeartbeatMonitor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            heartbeat: Heartbeat::default(),
            timeout,
            last_change: None,
            detected: false,
            pending_detect: false,
        }
    }

    /// Record a counter value received on the liveness topic.  The value is
    /// mirrored into the input side immediately.
    pub fn update_external(&mut self, value: u8) {
        let changed = self.last_change.is_none() || value != self.heartbeat.output;
        self.heartbeat.output = value;
        self.heartbeat.input = value;
        if changed {
            self.last_change = Some(Instant::now());
            if !self.detected {
                self.pending_detect = true;
            }
        }
    }

    /// Advance the monitor; returns an event on a liveness edge.
    pub fn tick(&mut self) -> Option<HeartbeatEvent> {
        if self.pending_detect {
            self.pending_detect = false;
            self.detected = true;
            return Some(HeartbeatEvent::Detected);
        }
        if self.detected
            && let Some(last) = self.last_change
            && last.elapsed() > self.timeout
        {
            self.detected = false;
            self.last_change = None;
            return Some(HeartbeatEvent::Lost);
        }
        None
    }

    /// The value to echo back to the controller.
    pub fn echo_value(&self) -> u8 {
        self.heartbeat.input
    }

    /// Current mirrored counters, for the status snapshot.
    pub fn snapshot(&self) -> Heartbeat {
        self.heartbeat
    }

    pub fn is_detected(&self) -> bool {
        self.detected
    }

    /// Forget everything; the next counter value is a fresh detection.
    pub fn reset(&mut self) {
        self.heartbeat = Heartbeat::default();
        self.last_change = None;
        self.detected = false;
        self.pending_detect = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn first_value_produces_detected_once() {
        let mut monitor = HeartbeatMonitor::new(Duration::from_secs(5));
        assert_eq!(monitor.tick(), None);

        monitor.update_external(3);
        assert_eq!(monitor.tick(), Some(HeartbeatEvent::Detected));
        assert_eq!(monitor.tick(), None);
        assert!(monitor.is_detected());
    }

    #[test]
    fn mirrors_the_received_value() {
        let mut monitor = HeartbeatMonitor::new(Duration::from_secs(5));
        monitor.update_external(42);
        assert_eq!(monitor.echo_value(), 42);
        let snap = monitor.snapshot();
        assert_eq!(snap.input, 42);
        assert_eq!(snap.output, 42);
    }

    #[test]
    fn stalled_counter_is_lost_after_timeout() {
        let mut monitor = HeartbeatMonitor::new(Duration::from_millis(20));
        monitor.update_external(1);
        assert_eq!(monitor.tick(), Some(HeartbeatEvent::Detected));

        // Repeats of the same value do not refresh the deadline.
        sleep(Duration::from_millis(15));
        monitor.update_external(1);
        sleep(Duration::from_millis(15));
        assert_eq!(monitor.tick(), Some(HeartbeatEvent::Lost));
        assert_eq!(monitor.tick(), None);
    }

    #[test]
    fn changing_counter_stays_alive() {
        let mut monitor = HeartbeatMonitor::new(Duration::from_millis(40));
        monitor.update_external(1);
        monitor.tick();
        for value in 2..6 {
            sleep(Duration::from_millis(15));
            monitor.update_external(value);
            assert_eq!(monitor.tick(), None, "fresh counter value {value} keeps liveness");
        }
    }

    #[test]
    fn reset_clears_state_and_allows_redetection() {
        let mut monitor = HeartbeatMonitor::new(Duration::from_secs(5));
        monitor.update_external(9);
        monitor.tick();

        monitor.reset();
        assert!(!monitor.is_detected());
        assert_eq!(monitor.snapshot(), Heartbeat::default());

        monitor.update_external(9);
        assert_eq!(monitor.tick(), Some(HeartbeatEvent::Detected));
    }
}
