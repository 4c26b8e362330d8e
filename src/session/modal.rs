//! Handing the terminal to a sub-dialog and taking it back.
//!
//! [`suspend`] releases the main screen, runs exactly one sub-dialog to
//! completion and then repairs the screen. The repair runs from a drop guard,
//! so it also happens when the dialog future errors out, panics or is dropped.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::vc::{Client, VmHandle};

use super::power::PowerAction;

/// The main interactive surface
pub trait Screen {
    /// Stop drawing and reading input so another UI can own the terminal.
    fn release(&mut self) -> Result<()>;

    /// Take the terminal back: restore input mode, drop input that arrived
    /// while suspended and force a full redraw on the next frame.
    fn repair(&mut self) -> Result<()>;
}

/// Outcome of the search dialog
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub filter: String,
    pub matched: Vec<VmHandle>,
}

/// Blocking sub-dialogs run while the main screen is suspended
#[async_trait]
pub trait SubDialogs: Send {
    /// `None` when the operator cancelled.
    async fn search(&mut self, current: &str, vms: &[VmHandle]) -> Result<Option<SearchResult>>;

    async fn power(&mut self, vm_name: &str) -> Result<PowerAction>;

    /// Reports its own failures.
    async fn deploy(&mut self, address: &str, hostname: &str) -> Result<()>;

    /// True when a VM was created.
    async fn new_vm(&mut self, client: Arc<dyn Client>, datacenter: &str) -> Result<bool>;

    /// True when a VM was cloned from `template`.
    async fn new_vm_from_template(&mut self, template: &str) -> Result<bool>;

    /// Show `err` until acknowledged.
    async fn error(&mut self, err: &Error) -> Result<()>;
}

struct Repair<'a, S: Screen + ?Sized> {
    screen: &'a mut S,
    armed: bool,
}

impl<S: Screen + ?Sized> Repair<'_, S> {
    fn finish(mut self) -> Result<()> {
        self.armed = false;
        self.screen.repair()
    }
}

impl<S: Screen + ?Sized> Drop for Repair<'_, S> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.screen.repair() {
                tracing::error!("Screen repair failed: {}", e);
            }
        }
    }
}

/// Run `action` with the main screen suspended.
pub async fn suspend<S, F, T>(screen: &mut S, action: F) -> Result<T>
where
    S: Screen + ?Sized,
    F: Future<Output = T>,
{
    let guard = Repair {
        screen,
        armed: true,
    };
    guard.screen.release()?;
    let out = action.await;
    guard.finish()?;
    Ok(out)
}
