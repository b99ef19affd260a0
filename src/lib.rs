pub mod checkpoint;
pub mod config;
pub mod controller;
pub mod error;
pub mod file;
pub mod job;
pub mod jobs;
pub mod protocol;
pub mod shutdown;
pub mod transport;
pub mod worker;

pub use controller::{ControllerState, ControllerStatus, ResourceController};
pub use error::{ResourceError, Result};
