mod filter;
mod tree;

pub use filter::{apply_filter, root_label, Matcher};
pub use tree::{
    build_tree, build_tree_with, FolderKind, InventoryNode, NodeKind, NodeRef, TreeLayout,
    TreeOptions, Walk, DEFAULT_ROOT_LABEL,
};
