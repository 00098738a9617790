//! Process startup: logging, banner and component wiring

pub mod logger;
pub mod runtime;

pub use logger::{display_startup_banner, init_logging, StartupLogger};
pub use runtime::GatewayRuntime;
