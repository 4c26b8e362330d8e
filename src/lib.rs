pub mod cli;
pub mod config;
pub mod error;
pub mod inventory;
pub mod log_rotate;
pub mod session;
pub mod ui;
pub mod vc;

pub use error::{Error, Result};

/// Version of vctui
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
