use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("{op} failed on {vm}: {message}")]
    Remote {
        op: &'static str,
        vm: String,
        message: String,
    },

    #[error("No VMs")]
    NoInventory,

    #[error("Datacenter not found: {0}")]
    DatacenterNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn remote(op: &'static str, vm: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            op,
            vm: vm.into(),
            message: message.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Short title used by the error dialog
    pub fn title(&self) -> &'static str {
        match self {
            Error::Remote { .. } => "Operation failed",
            Error::InvalidFilter { .. } => "Invalid filter",
            Error::Http(_) => "Deploy server error",
            Error::NoInventory | Error::DatacenterNotFound(_) => "Inventory error",
            _ => "Error",
        }
    }
}
