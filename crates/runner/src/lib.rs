//! privprobe runner
//!
//! Drives candidate apps one at a time through reset, capture, launch and
//! monitoring on an Android emulator, recording what was tested in the run
//! ledger and what failed on the skip-list.

pub mod bridge;
pub mod candidates;
pub mod capture;
pub mod config;
pub mod device;
pub mod orchestrator;
pub mod preflight;
pub mod status;

pub use bridge::{CommandOutput, CommandRunner, HostCommandRunner};
pub use capture::CaptureProxy;
pub use config::RunnerConfig;
pub use device::{AndroidDevice, DeviceControl, PreLaunchHook};
pub use orchestrator::Orchestrator;
pub use preflight::{HostResolver, SystemResolver};
pub use status::{OutputFormat, StatusReport};
