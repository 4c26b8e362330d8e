//! One interactive console session: inventory state, key dispatch, modal
//! sub-dialogs and power actions.

mod dispatch;
mod modal;
mod power;
mod state;

pub use dispatch::{Dispatcher, Outcome, Phase};
pub use modal::{suspend, Screen, SearchResult, SubDialogs};
pub use power::{execute, PowerAction, PowerOutcome, DISK_FIRST, NETWORK_FIRST};
pub use state::SessionState;
