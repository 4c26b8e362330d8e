use serde::Deserialize;

use crate::vc::VmHandle;

/// Label of the root node when no filter is active
pub const DEFAULT_ROOT_LABEL: &str = "VMware vCenter";

/// Category branches synthesized under every VM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderKind {
    Disks,
    Network,
    Snapshots,
}

impl FolderKind {
    pub fn label(&self) -> &'static str {
        match self {
            FolderKind::Disks => "Disks",
            FolderKind::Network => "Network",
            FolderKind::Snapshots => "Snapshots",
        }
    }
}

/// What a tree node stands for.
///
/// `vm` is a lookup handle to the nearest VM at or above the node. It never
/// keeps the subtree alive; the tree is owned solely through `children`.
#[derive(Debug, Clone)]
pub enum NodeRef {
    Datacenter { name: String },
    Host { name: String },
    VirtualMachine { vm: VmHandle },
    Template { vm: VmHandle },
    Folder { kind: FolderKind, vm: VmHandle },
    Disk { key: i32, vm: VmHandle },
    NetworkInterface { mac: String, vm: VmHandle },
    Snapshot { name: String, vm: VmHandle },
}

/// Discriminant of [`NodeRef`], used for display and comparisons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Datacenter,
    Host,
    VirtualMachine,
    Template,
    Folder,
    Disk,
    NetworkInterface,
    Snapshot,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Datacenter => "datacenter",
            NodeKind::Host => "host",
            NodeKind::VirtualMachine => "vm",
            NodeKind::Template => "template",
            NodeKind::Folder => "folder",
            NodeKind::Disk => "disk",
            NodeKind::NetworkInterface => "nic",
            NodeKind::Snapshot => "snapshot",
        }
    }
}

impl NodeRef {
    pub fn vm(&self) -> Option<&VmHandle> {
        match self {
            NodeRef::Datacenter { .. } | NodeRef::Host { .. } => None,
            NodeRef::VirtualMachine { vm }
            | NodeRef::Template { vm }
            | NodeRef::Folder { vm, .. }
            | NodeRef::Disk { vm, .. }
            | NodeRef::NetworkInterface { vm, .. }
            | NodeRef::Snapshot { vm, .. } => Some(vm),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            NodeRef::Datacenter { .. } => NodeKind::Datacenter,
            NodeRef::Host { .. } => NodeKind::Host,
            NodeRef::VirtualMachine { .. } => NodeKind::VirtualMachine,
            NodeRef::Template { .. } => NodeKind::Template,
            NodeRef::Folder { .. } => NodeKind::Folder,
            NodeRef::Disk { .. } => NodeKind::Disk,
            NodeRef::NetworkInterface { .. } => NodeKind::NetworkInterface,
            NodeRef::Snapshot { .. } => NodeKind::Snapshot,
        }
    }
}

/// Result of a visit during [`InventoryNode::walk`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Walk {
    Descend,
    Skip,
    Stop,
}

/// A node of the displayed inventory tree
#[derive(Debug, Clone)]
pub struct InventoryNode {
    text: String,
    expanded: bool,
    children: Vec<InventoryNode>,
    reference: Option<NodeRef>,
}

impl InventoryNode {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            expanded: true,
            children: Vec::new(),
            reference: None,
        }
    }

    pub fn with_reference(text: impl Into<String>, reference: NodeRef) -> Self {
        Self {
            reference: Some(reference),
            ..Self::new(text)
        }
    }

    pub fn expanded(mut self, expanded: bool) -> Self {
        self.expanded = expanded;
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    pub fn set_expanded(&mut self, expanded: bool) {
        self.expanded = expanded;
    }

    pub fn reference(&self) -> Option<&NodeRef> {
        self.reference.as_ref()
    }

    pub fn children(&self) -> &[InventoryNode] {
        &self.children
    }

    pub fn add_child(&mut self, child: InventoryNode) {
        self.children.push(child);
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Swap in a fully built set of children, returning the old ones
    pub fn replace_children(&mut self, children: Vec<InventoryNode>) -> Vec<InventoryNode> {
        std::mem::replace(&mut self.children, children)
    }

    pub fn into_children(self) -> Vec<InventoryNode> {
        self.children
    }

    /// Node at a path of child indices (empty path = self)
    pub fn node_at(&self, path: &[usize]) -> Option<&InventoryNode> {
        let mut node = self;
        for &i in path {
            node = node.children.get(i)?;
        }
        Some(node)
    }

    pub fn node_at_mut(&mut self, path: &[usize]) -> Option<&mut InventoryNode> {
        let mut node = self;
        for &i in path {
            node = node.children.get_mut(i)?;
        }
        Some(node)
    }

    /// Depth-first pre-order walk. Returns true when `visit` asked to stop.
    pub fn walk(&self, visit: &mut impl FnMut(&InventoryNode) -> Walk) -> bool {
        match visit(self) {
            Walk::Stop => true,
            Walk::Skip => false,
            Walk::Descend => self.children.iter().any(|c| c.walk(visit)),
        }
    }

    /// Indented text rendering, one node per line
    pub fn outline(&self) -> String {
        fn go(node: &InventoryNode, depth: usize, out: &mut String) {
            out.push_str(&"  ".repeat(depth));
            out.push_str(&node.text);
            if let Some(r) = node.reference() {
                out.push_str(&format!(" [{}]", r.kind().as_str()));
            }
            out.push('\n');
            for c in &node.children {
                go(c, depth + 1, out);
            }
        }
        let mut out = String::new();
        go(self, 0, &mut out);
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeLayout {
    /// VMs directly under the root
    #[default]
    Flat,
    /// Root, then datacenter, then host, then VMs
    Hierarchy,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TreeOptions {
    pub layout: TreeLayout,
    pub expand_vms: bool,
}

/// Build the inventory tree with the flat layout
pub fn build_tree(vms: &[VmHandle]) -> InventoryNode {
    build_tree_with(vms, &TreeOptions::default())
}

/// Build the inventory tree. VMs keep their input order.
pub fn build_tree_with(vms: &[VmHandle], opts: &TreeOptions) -> InventoryNode {
    let mut root = InventoryNode::new(DEFAULT_ROOT_LABEL);

    match opts.layout {
        TreeLayout::Flat => {
            for vm in vms {
                root.add_child(vm_node(vm, opts));
            }
        }
        TreeLayout::Hierarchy => {
            let mut datacenters: Vec<(String, Vec<(String, Vec<&VmHandle>)>)> = Vec::new();
            for vm in vms {
                let summary = vm.summary();
                let dc_idx = match datacenters.iter().position(|(n, _)| *n == summary.datacenter) {
                    Some(i) => i,
                    None => {
                        datacenters.push((summary.datacenter.clone(), Vec::new()));
                        datacenters.len() - 1
                    }
                };
                let hosts = &mut datacenters[dc_idx].1;
                match hosts.iter_mut().find(|(h, _)| *h == summary.host) {
                    Some((_, list)) => list.push(vm),
                    None => hosts.push((summary.host.clone(), vec![vm])),
                }
            }

            for (dc, hosts) in datacenters {
                let mut dc_node = InventoryNode::with_reference(
                    display_or(&dc, "(unknown datacenter)"),
                    NodeRef::Datacenter { name: dc.clone() },
                );
                for (host, list) in hosts {
                    let mut host_node = InventoryNode::with_reference(
                        display_or(&host, "(unknown host)"),
                        NodeRef::Host { name: host.clone() },
                    );
                    for vm in list {
                        host_node.add_child(vm_node(vm, opts));
                    }
                    dc_node.add_child(host_node);
                }
                root.add_child(dc_node);
            }
        }
    }

    root
}

fn display_or(name: &str, fallback: &str) -> String {
    if name.is_empty() {
        fallback.to_string()
    } else {
        name.to_string()
    }
}

fn vm_node(vm: &VmHandle, opts: &TreeOptions) -> InventoryNode {
    let summary = vm.summary();
    let reference = if summary.template {
        NodeRef::Template { vm: vm.clone() }
    } else {
        NodeRef::VirtualMachine { vm: vm.clone() }
    };
    let mut node =
        InventoryNode::with_reference(summary.name.clone(), reference).expanded(opts.expand_vms);

    if !summary.disks.is_empty() {
        let mut folder = folder(FolderKind::Disks, vm);
        for d in &summary.disks {
            folder.add_child(InventoryNode::with_reference(
                format!("{} ({} GB)", d.label, d.capacity_gb),
                NodeRef::Disk {
                    key: d.key,
                    vm: vm.clone(),
                },
            ));
        }
        node.add_child(folder);
    }

    if !summary.nics.is_empty() {
        let mut folder = folder(FolderKind::Network, vm);
        for n in &summary.nics {
            folder.add_child(InventoryNode::with_reference(
                n.mac.clone(),
                NodeRef::NetworkInterface {
                    mac: n.mac.clone(),
                    vm: vm.clone(),
                },
            ));
        }
        node.add_child(folder);
    }

    if !summary.snapshots.is_empty() {
        let mut folder = folder(FolderKind::Snapshots, vm);
        for s in &summary.snapshots {
            folder.add_child(InventoryNode::with_reference(
                s.name.clone(),
                NodeRef::Snapshot {
                    name: s.name.clone(),
                    vm: vm.clone(),
                },
            ));
        }
        node.add_child(folder);
    }

    node
}

fn folder(kind: FolderKind, vm: &VmHandle) -> InventoryNode {
    InventoryNode::with_reference(
        kind.label(),
        NodeRef::Folder {
            kind,
            vm: vm.clone(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vc::mock::{CallLog, MockVm};
    use std::sync::Arc;

    fn kinds(node: &InventoryNode) -> Vec<(String, Option<NodeKind>)> {
        let mut out = Vec::new();
        node.walk(&mut |n| {
            out.push((n.text().to_string(), n.reference().map(|r| r.kind())));
            Walk::Descend
        });
        out
    }

    fn sample(calls: &CallLog) -> Vec<VmHandle> {
        vec![
            MockVm::new("A", calls)
                .disk("Hard disk 1")
                .nic("00:50:56:aa:bb:01")
                .snapshot("before-upgrade")
                .handle(),
            MockVm::new("B", calls).template().handle(),
        ]
    }

    #[test]
    fn test_empty_input() {
        let root = build_tree(&[]);
        assert!(root.children().is_empty());
        assert!(root.reference().is_none());
        assert_eq!(root.text(), DEFAULT_ROOT_LABEL);
    }

    #[test]
    fn test_vm_and_template_variants() {
        let calls = CallLog::default();
        let root = build_tree(&sample(&calls));

        assert_eq!(root.children().len(), 2);
        let a = &root.children()[0];
        let b = &root.children()[1];
        assert_eq!(a.text(), "A");
        assert_eq!(a.reference().map(|r| r.kind()), Some(NodeKind::VirtualMachine));
        assert_eq!(b.text(), "B");
        assert_eq!(b.reference().map(|r| r.kind()), Some(NodeKind::Template));
        assert!(b.is_leaf());
    }

    #[test]
    fn test_category_branches() {
        let calls = CallLog::default();
        let root = build_tree(&sample(&calls));
        let a = &root.children()[0];

        let folders: Vec<&str> = a.children().iter().map(|c| c.text()).collect();
        assert_eq!(folders, vec!["Disks", "Network", "Snapshots"]);

        let nic = a.node_at(&[1, 0]).unwrap();
        match nic.reference() {
            Some(NodeRef::NetworkInterface { mac, vm }) => {
                assert_eq!(mac, "00:50:56:aa:bb:01");
                assert_eq!(vm.name(), "A");
            }
            other => panic!("unexpected reference: {other:?}"),
        }

        let snap = a.node_at(&[2, 0]).unwrap();
        match snap.reference() {
            Some(NodeRef::Snapshot { name, vm }) => {
                assert_eq!(name, "before-upgrade");
                assert_eq!(vm.name(), "A");
            }
            other => panic!("unexpected reference: {other:?}"),
        }
    }

    #[test]
    fn test_back_reference_is_shared() {
        let calls = CallLog::default();
        let vms = sample(&calls);
        let root = build_tree(&vms);

        let disk = root.node_at(&[0, 0, 0]).unwrap();
        let vm = disk.reference().and_then(|r| r.vm()).unwrap();
        assert!(Arc::ptr_eq(vm, &vms[0]));
    }

    #[test]
    fn test_deterministic() {
        let calls = CallLog::default();
        let vms = sample(&calls);
        assert_eq!(kinds(&build_tree(&vms)), kinds(&build_tree(&vms)));
        assert_eq!(build_tree(&vms).outline(), build_tree(&vms).outline());
    }

    #[test]
    fn test_input_order_preserved() {
        let calls = CallLog::default();
        let vms = vec![
            MockVm::new("zeta", &calls).handle(),
            MockVm::new("alpha", &calls).handle(),
            MockVm::new("mid", &calls).handle(),
        ];
        let root = build_tree(&vms);
        let names: Vec<&str> = root.children().iter().map(|c| c.text()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_hierarchy_layout() {
        let calls = CallLog::default();
        let vms = vec![
            MockVm::new("a", &calls).host("esx02").handle(),
            MockVm::new("b", &calls).host("esx01").handle(),
            MockVm::new("c", &calls).host("esx02").handle(),
        ];
        let opts = TreeOptions {
            layout: TreeLayout::Hierarchy,
            expand_vms: true,
        };
        let root = build_tree_with(&vms, &opts);

        assert_eq!(root.children().len(), 1);
        let dc = &root.children()[0];
        assert_eq!(dc.reference().map(|r| r.kind()), Some(NodeKind::Datacenter));
        let hosts: Vec<&str> = dc.children().iter().map(|c| c.text()).collect();
        assert_eq!(hosts, vec!["esx02", "esx01"]);
        let esx02: Vec<&str> = dc.children()[0].children().iter().map(|c| c.text()).collect();
        assert_eq!(esx02, vec!["a", "c"]);
        assert!(dc.children()[0].children()[0].is_expanded());
    }

    #[test]
    fn test_walk_skip_and_stop() {
        let calls = CallLog::default();
        let root = build_tree(&sample(&calls));

        let mut seen = Vec::new();
        let stopped = root.walk(&mut |n| {
            seen.push(n.text().to_string());
            match n.reference().map(|r| r.kind()) {
                Some(NodeKind::Folder) if n.text() == "Disks" => Walk::Skip,
                Some(NodeKind::NetworkInterface) => Walk::Stop,
                _ => Walk::Descend,
            }
        });
        assert!(stopped);
        assert_eq!(
            seen,
            vec![DEFAULT_ROOT_LABEL, "A", "Disks", "Network", "00:50:56:aa:bb:01"]
        );
    }
}
