use std::time::Duration;

use crossterm::event::{KeyCode, KeyModifiers};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::config::{KeyAction, KeyBindings};
use crate::error::{Error, Result};
use crate::inventory::{NodeRef, Walk};
use crate::vc::VmHandle;

use super::modal::{suspend, Screen, SearchResult, SubDialogs};
use super::power::{self, PowerAction};
use super::state::SessionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Resolving,
    Dispatching,
    Suspended,
}

/// Whether the dispatcher consumed a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Handled,
    /// Not a lifecycle key; the tree view should handle it.
    PassThrough,
}

/// Routes lifecycle keys to VM operations and sub-dialogs.
///
/// One key is processed to completion before the next. Remote calls are
/// awaited inline; the only background work is the boot-order revert, whose
/// failures come back through [`Dispatcher::drain_deferred`].
pub struct Dispatcher<S: Screen, D: SubDialogs> {
    session: SessionState,
    screen: S,
    dialogs: D,
    keys: KeyBindings,
    revert_delay: Duration,
    phase: Phase,
    failures_tx: UnboundedSender<Error>,
    failures_rx: UnboundedReceiver<Error>,
    pending_reverts: Vec<JoinHandle<()>>,
}

impl<S: Screen, D: SubDialogs> Dispatcher<S, D> {
    pub fn new(
        session: SessionState,
        screen: S,
        dialogs: D,
        keys: KeyBindings,
        revert_delay: Duration,
    ) -> Self {
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        Self {
            session,
            screen,
            dialogs,
            keys,
            revert_delay,
            phase: Phase::Idle,
            failures_tx,
            failures_rx,
            pending_reverts: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionState {
        &mut self.session
    }

    pub fn keys(&self) -> &KeyBindings {
        &self.keys
    }

    /// Screen, session and bindings together, for drawing
    pub fn parts_mut(&mut self) -> (&mut S, &SessionState, &KeyBindings) {
        (&mut self.screen, &self.session, &self.keys)
    }

    /// Handle one key with the node at `current` selected.
    pub async fn dispatch(
        &mut self,
        code: KeyCode,
        modifiers: KeyModifiers,
        current: &[usize],
    ) -> Outcome {
        self.phase = Phase::Resolving;
        let Some(action) = self.keys.resolve(&code, modifiers).filter(|a| a.is_lifecycle()) else {
            self.phase = Phase::Idle;
            return Outcome::PassThrough;
        };

        let Some(node) = self.session.root().node_at(current) else {
            tracing::debug!("Stale selection {:?}, ignoring {}", current, action.name());
            self.phase = Phase::Idle;
            return Outcome::Handled;
        };
        let reference = node.reference().cloned();
        let text = node.text().to_string();
        let nic = if action == KeyAction::Deploy {
            first_nic(node)
        } else {
            None
        };

        tracing::debug!(
            "Dispatching {} on '{}' ({})",
            action.name(),
            text,
            reference.as_ref().map_or("none", |r| r.kind().as_str())
        );
        self.phase = Phase::Dispatching;

        match action {
            KeyAction::Delete => {
                if let Some(vm) = reference.as_ref().and_then(|r| r.vm()).cloned() {
                    self.delete(vm).await;
                }
            }
            KeyAction::Find => self.find().await,
            KeyAction::Deploy => {
                if let Some((address, hostname)) = nic {
                    self.deploy(&address, &hostname).await;
                }
            }
            KeyAction::New => match &reference {
                Some(NodeRef::Template { .. }) => self.new_from_template(&text).await,
                _ => self.new_vm().await,
            },
            KeyAction::Power => {
                if let Some(vm) = reference.as_ref().and_then(|r| r.vm()).cloned() {
                    self.power(vm).await;
                }
            }
            KeyAction::Refresh => self.refresh().await,
            KeyAction::RevertSnapshot => {
                if let Some(NodeRef::Snapshot { name, vm }) = &reference {
                    self.revert_snapshot(vm, name).await;
                }
            }
            _ => {}
        }

        self.phase = Phase::Idle;
        Outcome::Handled
    }

    async fn delete(&mut self, vm: VmHandle) {
        tracing::info!("Destroying {}", vm.name());
        match vm.destroy().await {
            Ok(task) => {
                tracing::debug!("Destroy of {} accepted as {}", vm.name(), task.id);
                self.refresh().await;
            }
            Err(e) => self.report_error(e).await,
        }
    }

    async fn find(&mut self) {
        self.phase = Phase::Suspended;
        let result = suspend(
            &mut self.screen,
            self.dialogs
                .search(self.session.filter(), self.session.inventory()),
        )
        .await;
        self.phase = Phase::Dispatching;

        match result.and_then(|r| r) {
            Ok(Some(SearchResult { filter, matched })) => {
                tracing::info!("Filter '{}' matched {} VMs", filter, matched.len());
                self.session.apply_search(&filter, &matched);
            }
            Ok(None) => tracing::debug!("Search cancelled"),
            Err(e) => self.report_error(e).await,
        }
    }

    async fn deploy(&mut self, address: &str, hostname: &str) {
        tracing::info!("Deploying {} ({})", hostname, address);
        self.phase = Phase::Suspended;
        let result = suspend(&mut self.screen, self.dialogs.deploy(address, hostname)).await;
        self.phase = Phase::Dispatching;
        // The deploy dialog shows its own errors
        if let Err(e) = result.and_then(|r| r) {
            tracing::warn!("Deploy flow for {} ended with: {}", hostname, e);
        }
    }

    async fn new_vm(&mut self) {
        let client = self.session.client();
        self.phase = Phase::Suspended;
        let result = suspend(
            &mut self.screen,
            self.dialogs.new_vm(client, self.session.datacenter()),
        )
        .await;
        self.phase = Phase::Dispatching;
        self.after_create(result.and_then(|r| r)).await;
    }

    async fn new_from_template(&mut self, template: &str) {
        self.phase = Phase::Suspended;
        let result = suspend(&mut self.screen, self.dialogs.new_vm_from_template(template)).await;
        self.phase = Phase::Dispatching;
        self.after_create(result.and_then(|r| r)).await;
    }

    async fn after_create(&mut self, result: Result<bool>) {
        match result {
            Ok(true) => self.refresh().await,
            Ok(false) => {}
            Err(e) => self.report_error(e).await,
        }
    }

    async fn power(&mut self, vm: VmHandle) {
        self.phase = Phase::Suspended;
        let chosen = suspend(&mut self.screen, self.dialogs.power(vm.name())).await;
        self.phase = Phase::Dispatching;

        let action = match chosen.and_then(|r| r) {
            Ok(action) => action,
            Err(e) => {
                self.report_error(e).await;
                return;
            }
        };
        if action == PowerAction::None {
            return;
        }

        let outcome = power::execute(action, &vm, self.revert_delay, &self.failures_tx).await;
        if let Some(handle) = outcome.deferred {
            self.pending_reverts.push(handle);
        }
        for e in outcome.errors {
            self.report_error(e).await;
        }
    }

    async fn refresh(&mut self) {
        if let Err(e) = self.session.refresh().await {
            self.report_error(e).await;
        }
    }

    async fn revert_snapshot(&mut self, vm: &VmHandle, snapshot: &str) {
        tracing::info!("Reverting {} to snapshot '{}'", vm.name(), snapshot);
        if let Err(e) = vm.revert_to_snapshot(snapshot, true).await {
            self.report_error(e).await;
        }
    }

    /// Show `err` in the error dialog. Never fails; problems with the dialog
    /// itself are only logged.
    pub async fn report_error(&mut self, err: Error) {
        tracing::warn!("{}", err);
        let previous = self.phase;
        self.phase = Phase::Suspended;
        match suspend(&mut self.screen, self.dialogs.error(&err)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) | Err(e) => tracing::error!("Error dialog failed: {}", e),
        }
        self.phase = previous;
    }

    /// Surface failures of boot-order reverts that fired since the last call.
    pub async fn drain_deferred(&mut self) {
        self.pending_reverts.retain(|h| !h.is_finished());
        while let Ok(err) = self.failures_rx.try_recv() {
            self.report_error(err).await;
        }
    }

    /// Let scheduled reverts fire before the session ends. Their failures are
    /// logged since the screen is going away.
    pub async fn wait_pending_reverts(&mut self) {
        if !self.pending_reverts.is_empty() {
            tracing::info!(
                "Waiting for {} boot order revert(s)",
                self.pending_reverts.len()
            );
        }
        for handle in self.pending_reverts.drain(..) {
            if let Err(e) = handle.await {
                tracing::error!("Boot order revert task failed: {}", e);
            }
        }
        while let Ok(err) = self.failures_rx.try_recv() {
            tracing::warn!("{}", err);
        }
    }

    pub fn has_pending_reverts(&self) -> bool {
        self.pending_reverts.iter().any(|h| !h.is_finished())
    }
}

/// Depth-first search for the first network interface below `node`.
/// Nodes without a reference are not descended.
fn first_nic(node: &crate::inventory::InventoryNode) -> Option<(String, String)> {
    let mut found = None;
    node.walk(&mut |n| match n.reference() {
        None => Walk::Skip,
        Some(NodeRef::NetworkInterface { mac, vm }) => {
            found = Some((mac.clone(), vm.name().to_string()));
            Walk::Stop
        }
        Some(_) => Walk::Descend,
    });
    found
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::inventory::{TreeLayout, TreeOptions, DEFAULT_ROOT_LABEL};
    use crate::session::modal::testing::{MockDialogs, MockScreen};
    use crate::session::power::{DISK_FIRST, NETWORK_FIRST};
    use crate::vc::mock::{CallLog, MockClient, MockVm};

    type Log = Arc<Mutex<Vec<String>>>;

    struct Harness {
        dispatcher: Dispatcher<MockScreen, MockDialogs>,
        client: Arc<MockClient>,
        calls: CallLog,
        log: Log,
    }

    fn harness_with(vms: Vec<VmHandle>, calls: CallLog, options: TreeOptions) -> Harness {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let client = MockClient::new(vms.clone());
        let session =
            SessionState::new(client.clone(), "dc1", vms, DEFAULT_ROOT_LABEL, options);
        let dispatcher = Dispatcher::new(
            session,
            MockScreen::new(&log),
            MockDialogs::new(&log),
            KeyBindings::default(),
            Duration::from_secs(3),
        );
        Harness {
            dispatcher,
            client,
            calls,
            log,
        }
    }

    /// `[A(running, with disk/nic/snapshot), B(template)]`
    fn harness() -> Harness {
        let calls = CallLog::default();
        let vms = vec![
            MockVm::new("A", &calls)
                .disk("Hard disk 1")
                .nic("00:50:56:aa:bb:01")
                .snapshot("clean")
                .handle(),
            MockVm::new("B", &calls).template().handle(),
        ];
        harness_with(vms, calls, TreeOptions::default())
    }

    fn ctrl(c: char) -> (KeyCode, KeyModifiers) {
        (KeyCode::Char(c), KeyModifiers::CONTROL)
    }

    async fn press(h: &mut Harness, key: (KeyCode, KeyModifiers), path: &[usize]) -> Outcome {
        h.dispatcher.dispatch(key.0, key.1, path).await
    }

    fn ops(calls: &CallLog) -> Vec<&'static str> {
        calls.lock().iter().map(|c| c.op).collect()
    }

    fn log(h: &Harness) -> Vec<String> {
        h.log.lock().clone()
    }

    #[tokio::test]
    async fn test_navigation_keys_pass_through() {
        let mut h = harness();
        for key in [
            (KeyCode::Down, KeyModifiers::NONE),
            (KeyCode::Char('j'), KeyModifiers::NONE),
            (KeyCode::Enter, KeyModifiers::NONE),
            (KeyCode::Char('q'), KeyModifiers::NONE),
        ] {
            assert_eq!(press(&mut h, key, &[0]).await, Outcome::PassThrough);
        }
        assert!(log(&h).is_empty());
        assert_eq!(h.dispatcher.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_no_reference_is_noop() {
        let mut h = harness();
        let before = h.dispatcher.session().root().outline();

        for c in ['d', 'i', 'p', 's'] {
            assert_eq!(press(&mut h, ctrl(c), &[]).await, Outcome::Handled);
        }

        assert!(ops(&h.calls).is_empty());
        assert!(log(&h).is_empty());
        assert_eq!(h.dispatcher.session().root().outline(), before);
        assert_eq!(h.dispatcher.session().filter(), "");
        assert!(h.client.fetches.lock().is_empty());
    }

    #[tokio::test]
    async fn test_delete_without_vm_makes_no_call() {
        let calls = CallLog::default();
        let vms = vec![MockVm::new("A", &calls).handle()];
        let opts = TreeOptions {
            layout: TreeLayout::Hierarchy,
            expand_vms: false,
        };
        let mut h = harness_with(vms, calls, opts);

        // [0] is the datacenter, [0, 0] the host
        press(&mut h, ctrl('d'), &[0]).await;
        press(&mut h, ctrl('d'), &[0, 0]).await;

        assert!(ops(&h.calls).is_empty());
        assert!(h.client.fetches.lock().is_empty());
    }

    #[tokio::test]
    async fn test_delete_destroys_then_refreshes() {
        let mut h = harness();
        // Delete from a leaf below the VM
        press(&mut h, ctrl('d'), &[0, 0, 0]).await;

        assert_eq!(ops(&h.calls), vec!["Destroy"]);
        assert_eq!(*h.client.fetches.lock(), vec![true]);
        assert!(log(&h).is_empty());
    }

    #[tokio::test]
    async fn test_report_error_then_dispatch_still_works() {
        let calls = CallLog::default();
        let vms = vec![
            MockVm::new("A", &calls).failing("Destroy").handle(),
            MockVm::new("B", &calls).handle(),
        ];
        let mut h = harness_with(vms, calls, TreeOptions::default());
        h.dispatcher.dialogs.fail_error_dialog = true;

        press(&mut h, ctrl('d'), &[0]).await;
        assert_eq!(
            log(&h),
            vec![
                "release",
                "error(Destroy failed on A: injected failure)",
                "repair"
            ]
        );
        assert_eq!(h.dispatcher.phase(), Phase::Idle);

        h.log.lock().clear();
        h.dispatcher.dialogs.power_choice = PowerAction::PowerOff;
        press(&mut h, ctrl('p'), &[1]).await;

        assert_eq!(log(&h), vec!["release", "power(B)", "repair"]);
        assert_eq!(ops(&h.calls), vec!["Destroy", "PowerOff"]);
    }

    #[tokio::test]
    async fn test_find_applies_filter() {
        let mut h = harness();
        h.dispatcher.dialogs.searches.push_back(Some("A".to_string()));

        press(&mut h, ctrl('f'), &[]).await;

        let root = h.dispatcher.session().root();
        assert_eq!(root.text(), "VMware vCenter (filter: A)");
        let names: Vec<&str> = root.children().iter().map(|c| c.text()).collect();
        assert_eq!(names, vec!["A"]);
        assert_eq!(log(&h), vec!["release", "search()", "repair"]);
    }

    #[tokio::test]
    async fn test_find_without_matches_keeps_filter_label() {
        let mut h = harness();
        h.dispatcher.dialogs.searches.push_back(Some("zzz".to_string()));

        press(&mut h, ctrl('f'), &[]).await;

        let root = h.dispatcher.session().root();
        assert_eq!(root.text(), "VMware vCenter (filter: zzz)");
        assert!(root.children().is_empty());
    }

    #[tokio::test]
    async fn test_find_cancel_changes_nothing() {
        let mut h = harness();
        h.dispatcher.dialogs.searches.push_back(Some("A".to_string()));
        press(&mut h, ctrl('f'), &[]).await;
        let before = h.dispatcher.session().root().outline();

        h.dispatcher.dialogs.searches.push_back(None);
        press(&mut h, ctrl('f'), &[]).await;

        assert_eq!(h.dispatcher.session().root().outline(), before);
        assert_eq!(h.dispatcher.session().filter(), "A");
        assert!(log(&h).contains(&"search(A)".to_string()));
    }

    #[tokio::test]
    async fn test_invalid_filter_is_reported() {
        let mut h = harness();
        h.dispatcher.dialogs.searches.push_back(Some("/(/".to_string()));

        press(&mut h, ctrl('f'), &[]).await;

        let entries = log(&h);
        assert_eq!(entries.len(), 6);
        assert!(entries[4].starts_with("error(Invalid filter"));
        assert_eq!(h.dispatcher.session().filter(), "");
    }

    #[tokio::test]
    async fn test_deploy_uses_first_nic_of_subtree() {
        let mut h = harness();

        press(&mut h, ctrl('i'), &[0]).await;
        assert_eq!(
            log(&h),
            vec!["release", "deploy(00:50:56:aa:bb:01,A)", "repair"]
        );

        // Tab is the terminal's spelling of Ctrl+I
        h.log.lock().clear();
        press(&mut h, (KeyCode::Tab, KeyModifiers::NONE), &[0, 1, 0]).await;
        assert_eq!(log(&h).len(), 3);

        // The template has no NICs
        h.log.lock().clear();
        press(&mut h, ctrl('i'), &[1]).await;
        assert!(log(&h).is_empty());
    }

    #[tokio::test]
    async fn test_new_from_template_and_generic() {
        let mut h = harness();
        h.dispatcher.dialogs.create = true;

        press(&mut h, ctrl('n'), &[1]).await;
        press(&mut h, ctrl('n'), &[0]).await;
        press(&mut h, ctrl('n'), &[]).await;

        let entries = log(&h);
        let flows: Vec<&String> = entries
            .iter()
            .filter(|e| e.starts_with("new_vm"))
            .collect();
        assert_eq!(
            flows,
            vec!["new_vm_from_template(B)", "new_vm(dc1)", "new_vm(dc1)"]
        );
        assert_eq!(h.client.fetches.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_new_cancelled_does_not_refresh() {
        let mut h = harness();
        press(&mut h, ctrl('n'), &[0]).await;
        assert!(h.client.fetches.lock().is_empty());
    }

    #[tokio::test]
    async fn test_power_dialog_cancel() {
        let mut h = harness();
        press(&mut h, ctrl('p'), &[0]).await;
        assert_eq!(log(&h), vec!["release", "power(A)", "repair"]);
        assert!(ops(&h.calls).is_empty());
    }

    #[tokio::test]
    async fn test_power_reports_each_failure() {
        let calls = CallLog::default();
        let vms = vec![MockVm::new("A", &calls)
            .disk("Hard disk 1")
            .nic("00:50:56:aa:bb:01")
            .failing("SetBootOptions")
            .failing("PowerOn")
            .handle()];
        let mut h = harness_with(vms, calls, TreeOptions::default());
        h.dispatcher.dialogs.power_choice = PowerAction::DiskBootOnce;

        press(&mut h, ctrl('p'), &[0]).await;

        let errors: Vec<String> = log(&h)
            .into_iter()
            .filter(|e| e.starts_with("error("))
            .collect();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("SetBootOptions"));
        assert!(errors[1].contains("PowerOn"));
        assert_eq!(ops(&h.calls), vec!["Device", "SetBootOptions", "PowerOn"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_boot_once_reverts_after_delay() {
        let mut h = harness();
        h.dispatcher.dialogs.power_choice = PowerAction::NetworkBootOnce;

        press(&mut h, ctrl('p'), &[0]).await;
        assert!(h.dispatcher.has_pending_reverts());
        assert_eq!(ops(&h.calls), vec!["Device", "SetBootOptions", "PowerOn"]);

        h.dispatcher.wait_pending_reverts().await;

        let calls = h.calls.lock();
        let boot: Vec<_> = calls.iter().filter(|c| c.op == "SetBootOptions").collect();
        assert_eq!(boot.len(), 2);
        assert_eq!(boot[0].boot_order.as_deref(), Some(&NETWORK_FIRST[..]));
        assert_eq!(boot[1].boot_order.as_deref(), Some(&DISK_FIRST[..]));
        assert!(boot[1].at - boot[0].at >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_failure_surfaced_by_drain() {
        let calls = CallLog::default();
        let vms = vec![MockVm::new("A", &calls)
            .disk("Hard disk 1")
            .nic("00:50:56:aa:bb:01")
            .failing("SetBootOptions")
            .handle()];
        let mut h = harness_with(vms, calls, TreeOptions::default());
        h.dispatcher.dialogs.power_choice = PowerAction::NetworkBootOnce;

        press(&mut h, ctrl('p'), &[0]).await;
        h.log.lock().clear();

        tokio::time::sleep(Duration::from_secs(4)).await;
        h.dispatcher.drain_deferred().await;

        let entries = log(&h);
        assert_eq!(entries.len(), 3);
        assert!(entries[1].contains("SetBootOptions failed on A"));
        assert!(!h.dispatcher.has_pending_reverts());
    }

    #[tokio::test]
    async fn test_refresh_filters_superset() {
        let calls = CallLog::default();
        let mut h = harness_with(vec![], calls.clone(), TreeOptions::default());
        h.dispatcher.dialogs.searches.push_back(Some("web".to_string()));
        press(&mut h, ctrl('f'), &[]).await;

        *h.client.vms.lock() = vec![
            MockVm::new("web-1", &calls).handle(),
            MockVm::new("db-1", &calls).handle(),
            MockVm::new("web-2", &calls).handle(),
        ];
        press(&mut h, ctrl('r'), &[]).await;

        let root = h.dispatcher.session().root();
        let names: Vec<&str> = root.children().iter().map(|c| c.text()).collect();
        assert_eq!(names, vec!["web-1", "web-2"]);
        assert_eq!(root.text(), "VMware vCenter (filter: web)");
        assert_eq!(h.dispatcher.session().inventory().len(), 3);
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_tree() {
        let mut h = harness();
        let before = h.dispatcher.session().root().outline();
        *h.client.fail_fetch.lock() = true;

        press(&mut h, ctrl('r'), &[0]).await;

        assert_eq!(h.dispatcher.session().root().outline(), before);
        let entries = log(&h);
        assert_eq!(entries.len(), 3);
        assert!(entries[1].starts_with("error(VMInventory failed"));
    }

    #[tokio::test]
    async fn test_revert_snapshot_only_on_snapshot_nodes() {
        let mut h = harness();

        press(&mut h, ctrl('s'), &[0]).await;
        press(&mut h, ctrl('s'), &[0, 2]).await;
        assert!(ops(&h.calls).is_empty());

        press(&mut h, ctrl('s'), &[0, 2, 0]).await;
        assert_eq!(ops(&h.calls), vec!["RevertToSnapshot"]);
    }

    #[tokio::test]
    async fn test_stale_selection_is_ignored() {
        let mut h = harness();
        assert_eq!(press(&mut h, ctrl('d'), &[7, 3]).await, Outcome::Handled);
        assert!(ops(&h.calls).is_empty());
    }
}
