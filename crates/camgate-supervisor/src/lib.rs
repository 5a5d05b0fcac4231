//! Device-level supervision: the step machine that owns every camera, the
//! broker session, and the heartbeat exchange with the external controller.
//!
//! # Modules
//!
//! * [`heartbeat`] – [`HeartbeatMonitor`], mirror/echo counter with timeout.
//! * [`supervisor`] – [`DeviceSupervisor`], the cooperative step machine.

pub mod heartbeat;
pub mod supervisor;

pub use heartbeat::{HeartbeatEvent, HeartbeatMonitor};
pub use supervisor::{DeviceSupervisor, SupervisorConfig};
