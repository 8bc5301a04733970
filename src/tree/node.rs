// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::key_pair::{PublicKey, SecretKey};
use crate::peer::Peer;

/// Stable index of a node or leaf inside the tree arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Position of a single member in the tree.
///
/// The public key is either the member's own ephemeral key or a blinded key derived for them when
/// they joined. The secret key is only known for the local member's leaf.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Leaf {
    pub(crate) peer: Peer,
    pub(crate) public_key: PublicKey,
    pub(crate) secret_key: Option<SecretKey>,
}

impl Leaf {
    pub(crate) fn new(peer: Peer, public_key: PublicKey, secret_key: Option<SecretKey>) -> Self {
        Self {
            peer,
            public_key,
            secret_key,
        }
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn secret_key(&self) -> Option<&SecretKey> {
        self.secret_key.as_ref()
    }
}

/// Internal node combining two children with Diffie-Hellman.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    pub(crate) left: NodeId,
    pub(crate) right: NodeId,
    pub(crate) public_key: PublicKey,
    pub(crate) secret_key: Option<SecretKey>,
}

impl Node {
    pub fn left(&self) -> NodeId {
        self.left
    }

    pub fn right(&self) -> NodeId {
        self.right
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn secret_key(&self) -> Option<&SecretKey> {
        self.secret_key.as_ref()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TreeNode {
    Leaf(Leaf),
    Node(Node),
}

impl TreeNode {
    pub fn public_key(&self) -> &PublicKey {
        match self {
            TreeNode::Leaf(leaf) => &leaf.public_key,
            TreeNode::Node(node) => &node.public_key,
        }
    }

    pub fn secret_key(&self) -> Option<&SecretKey> {
        match self {
            TreeNode::Leaf(leaf) => leaf.secret_key.as_ref(),
            TreeNode::Node(node) => node.secret_key.as_ref(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, TreeNode::Leaf(_))
    }

    pub fn as_leaf(&self) -> Option<&Leaf> {
        match self {
            TreeNode::Leaf(leaf) => Some(leaf),
            TreeNode::Node(_) => None,
        }
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            TreeNode::Leaf(_) => None,
            TreeNode::Node(node) => Some(node),
        }
    }

    pub(crate) fn set_secret_key(&mut self, secret_key: Option<SecretKey>) {
        match self {
            TreeNode::Leaf(leaf) => leaf.secret_key = secret_key,
            TreeNode::Node(node) => node.secret_key = secret_key,
        }
    }

    pub(crate) fn set_public_key(&mut self, public_key: PublicKey) {
        match self {
            TreeNode::Leaf(leaf) => leaf.public_key = public_key,
            TreeNode::Node(node) => node.public_key = public_key,
        }
    }
}
