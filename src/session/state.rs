use std::sync::Arc;

use crate::error::Result;
use crate::inventory::{apply_filter, build_tree_with, root_label, InventoryNode, TreeOptions};
use crate::vc::{Client, VmHandle};

/// Everything one console session owns.
///
/// The dispatcher is the only writer. `inventory` is the last full fetch,
/// the tree shows the subset matching `filter`.
pub struct SessionState {
    client: Arc<dyn Client>,
    datacenter: String,
    label: String,
    options: TreeOptions,
    filter: String,
    inventory: Vec<VmHandle>,
    root: InventoryNode,
}

impl SessionState {
    pub fn new(
        client: Arc<dyn Client>,
        datacenter: impl Into<String>,
        vms: Vec<VmHandle>,
        label: impl Into<String>,
        options: TreeOptions,
    ) -> Self {
        let label = label.into();
        let mut root = build_tree_with(&vms, &options);
        root.set_text(label.clone());
        Self {
            client,
            datacenter: datacenter.into(),
            label,
            options,
            filter: String::new(),
            inventory: vms,
            root,
        }
    }

    pub fn client(&self) -> Arc<dyn Client> {
        Arc::clone(&self.client)
    }

    pub fn datacenter(&self) -> &str {
        &self.datacenter
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn inventory(&self) -> &[VmHandle] {
        &self.inventory
    }

    pub fn root(&self) -> &InventoryNode {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut InventoryNode {
        &mut self.root
    }

    /// Show `subset` under a new filter. The subset was computed by the
    /// search dialog from [`Self::inventory`].
    pub fn apply_search(&mut self, filter: &str, subset: &[VmHandle]) {
        self.filter = filter.trim().to_string();
        self.rebuild(subset);
    }

    /// Replace the inventory with a fresh fetch and re-apply the filter.
    /// On error nothing changes.
    pub fn refresh_with(&mut self, vms: Vec<VmHandle>) -> Result<()> {
        let subset = apply_filter(&self.filter, &vms)?;
        self.inventory = vms;
        self.rebuild(&subset);
        Ok(())
    }

    /// Force a re-fetch from the control plane, then [`Self::refresh_with`].
    pub async fn refresh(&mut self) -> Result<()> {
        let vms = self.client.vm_inventory(&self.datacenter, true).await?;
        tracing::debug!("Fetched {} VMs from {}", vms.len(), self.datacenter);
        self.refresh_with(vms)
    }

    /// Swap a completely built tree in under the existing root.
    pub fn rebuild(&mut self, vms: &[VmHandle]) {
        let fresh = build_tree_with(vms, &self.options);
        self.root.replace_children(fresh.into_children());
        self.root.set_text(root_label(&self.label, &self.filter));
    }
}
