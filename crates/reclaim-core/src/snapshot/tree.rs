use serde::{Deserialize, Serialize};

use reclaim_types::{BlobHandle, BlobId, ReclaimError, Result};

/// A directory listing stored as a tree blob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

/// A single entry of a tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub node_type: NodeType,
    /// For regular files: the data blobs making up the content, in order.
    #[serde(default)]
    pub content: Vec<BlobId>,
    /// For directories: the tree blob listing the directory.
    #[serde(default)]
    pub subtree: Option<BlobId>,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeType {
    File,
    Dir,
    Symlink,
}

impl Node {
    pub fn file(name: impl Into<String>, content: Vec<BlobId>, size: u64) -> Self {
        Self {
            name: name.into(),
            node_type: NodeType::File,
            content,
            subtree: None,
            size,
        }
    }

    pub fn dir(name: impl Into<String>, subtree: BlobId) -> Self {
        Self {
            name: name.into(),
            node_type: NodeType::Dir,
            content: Vec::new(),
            subtree: Some(subtree),
            size: 0,
        }
    }
}

impl Tree {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(data)?)
    }

    /// Every blob this tree references directly, in node order.
    ///
    /// Fails if a directory node carries no subtree.
    pub fn children(&self) -> Result<Vec<BlobHandle>> {
        let mut out = Vec::new();
        for node in &self.nodes {
            match node.node_type {
                NodeType::Dir => {
                    let subtree = node.subtree.ok_or_else(|| {
                        ReclaimError::InvalidFormat(format!(
                            "directory '{}' has no subtree",
                            node.name
                        ))
                    })?;
                    out.push(BlobHandle::tree(subtree));
                }
                NodeType::File => {
                    out.extend(node.content.iter().map(|id| BlobHandle::data(*id)));
                }
                NodeType::Symlink => {}
            }
        }
        Ok(out)
    }
}
