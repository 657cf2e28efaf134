pub mod config;
pub mod error;
pub mod paths;
pub mod protocol;

pub use config::Config;
pub use error::{Error, Result};
pub use paths::Paths;
pub use protocol::{Command, CommandResponse, InboundFrame, SafetyDecision};
