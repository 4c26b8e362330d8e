mod app;
mod dialogs;
mod input;
mod render;
mod subdialogs;
mod view;

pub use app::{App, TerminalScreen};
pub use subdialogs::TerminalDialogs;
pub use view::{Row, TreeView};

use std::sync::Arc;

use crate::config::ConfigFile;
use crate::error::{Error, Result};
use crate::session::{Dispatcher, SessionState};
use crate::vc::{Client, VmHandle};

/// Run the interactive console until the operator quits.
///
/// `vms` is the initial inventory; `None` means it could not be obtained and
/// the session does not start. An empty list starts with an empty tree.
pub async fn run_session(
    vms: Option<Vec<VmHandle>>,
    datacenter: &str,
    client: Arc<dyn Client>,
    config: &ConfigFile,
) -> Result<()> {
    let vms = vms.ok_or(Error::NoInventory)?;
    tracing::info!("Starting session on {} with {} VMs", datacenter, vms.len());

    let session = SessionState::new(
        Arc::clone(&client),
        datacenter,
        vms,
        config.root_label.clone(),
        config.tree_options(),
    );
    let dialogs = TerminalDialogs::new(
        client,
        config.deploy_url.clone(),
        config.deploy_types.clone(),
    );
    let screen = TerminalScreen::enter()?;
    let dispatcher = Dispatcher::new(
        session,
        screen,
        dialogs,
        config.key_bindings(),
        config.boot_revert_delay(),
    );

    App::new(dispatcher).run().await
}
