use crate::inventory::{InventoryNode, NodeKind};

/// One visible line of the tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub path: Vec<usize>,
    pub depth: usize,
    pub text: String,
    pub kind: Option<NodeKind>,
    pub has_children: bool,
    pub expanded: bool,
}

/// Selection and flattened rows over an [`InventoryNode`] tree.
///
/// The selection is a path of child indices from the root. After the tree
/// changes, [`TreeView::sync`] re-resolves it against the new tree.
#[derive(Debug, Default)]
pub struct TreeView {
    rows: Vec<Row>,
    selected: Vec<usize>,
}

impl TreeView {
    pub fn new(root: &InventoryNode) -> Self {
        let mut view = Self::default();
        view.sync(root);
        view
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn selected_path(&self) -> &[usize] {
        &self.selected
    }

    pub fn selected_index(&self) -> usize {
        self.rows
            .iter()
            .position(|r| r.path == self.selected)
            .unwrap_or(0)
    }

    pub fn selected_row(&self) -> Option<&Row> {
        self.rows.get(self.selected_index())
    }

    /// Recompute rows and clamp the selection to what is still visible.
    pub fn sync(&mut self, root: &InventoryNode) {
        self.rows.clear();
        flatten(root, &mut Vec::new(), 0, &mut self.rows);
        self.selected = resolve(root, &self.selected);
    }

    pub fn move_up(&mut self) {
        let i = self.selected_index();
        if i > 0 {
            self.selected = self.rows[i - 1].path.clone();
        }
    }

    pub fn move_down(&mut self) {
        let i = self.selected_index();
        if let Some(row) = self.rows.get(i + 1) {
            self.selected = row.path.clone();
        }
    }

    /// Toggle expansion of the selected node. Nodes without a reference
    /// (the root) stay as they are.
    pub fn toggle(&mut self, root: &mut InventoryNode) {
        if let Some(node) = root.node_at_mut(&self.selected) {
            if node.reference().is_some() && !node.is_leaf() {
                let expanded = node.is_expanded();
                node.set_expanded(!expanded);
            }
        }
        self.sync(root);
    }

    /// Collapse the selected node, or move to its parent when it is already
    /// collapsed or a leaf.
    pub fn collapse(&mut self, root: &mut InventoryNode) {
        match root.node_at_mut(&self.selected) {
            Some(node) if node.reference().is_some() && !node.is_leaf() && node.is_expanded() => {
                node.set_expanded(false);
            }
            _ => {
                self.selected.pop();
            }
        }
        self.sync(root);
    }

    /// Expand the selected node, or step into its first child.
    pub fn expand(&mut self, root: &mut InventoryNode) {
        if let Some(node) = root.node_at_mut(&self.selected) {
            if !node.is_leaf() {
                if node.is_expanded() {
                    self.selected.push(0);
                } else {
                    node.set_expanded(true);
                }
            }
        }
        self.sync(root);
    }
}

fn flatten(node: &InventoryNode, path: &mut Vec<usize>, depth: usize, out: &mut Vec<Row>) {
    out.push(Row {
        path: path.clone(),
        depth,
        text: node.text().to_string(),
        kind: node.reference().map(|r| r.kind()),
        has_children: !node.is_leaf(),
        expanded: node.is_expanded(),
    });
    if !node.is_expanded() {
        return;
    }
    for (i, child) in node.children().iter().enumerate() {
        path.push(i);
        flatten(child, path, depth + 1, out);
        path.pop();
    }
}

/// Longest visible prefix of `path`, clamping an out-of-range index to the
/// last sibling.
fn resolve(root: &InventoryNode, path: &[usize]) -> Vec<usize> {
    let mut out = Vec::with_capacity(path.len());
    let mut node = root;
    for &i in path {
        if !node.is_expanded() || node.is_leaf() {
            break;
        }
        let idx = i.min(node.children().len() - 1);
        out.push(idx);
        node = &node.children()[idx];
        if idx != i {
            break;
        }
    }
    out
}
