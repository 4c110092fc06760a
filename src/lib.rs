//! AppHost - embed a hosted program's windows into a container control
//!
//! The hosted program runs on its own thread. Its windows are intercepted
//! as they are shown, resized and destroyed, classified by an ordered filter
//! chain and reparented, maximized or centered inside the container.

pub mod config;
pub mod error;
pub mod host;
pub mod platform;
pub mod shared;

pub use config::HostConfig;
pub use error::{HostError, HostResult, PlatformError, PlatformResult};
pub use host::{AppHost, HostState, RunOutcome};
