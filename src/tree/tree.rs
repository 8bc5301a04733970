// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use tracing::trace;

use crate::error::{ArtError, ArtResult};
use crate::key_pair::{KeyPair, PublicKey, SecretKey};
use crate::peer::{LocalPeer, Peer};
use crate::traits::CryptoProvider;
use crate::tree::node::{Leaf, Node, NodeId, TreeNode};
use crate::x3dh::{key_exchange_receive, key_exchange_send};

/// Describes how the keys of a newly created leaf and of all nodes above it are obtained when
/// splitting a leaf.
#[derive(Debug)]
pub enum SplitInit<'a> {
    /// Public keys for the new leaf, the new node and all ancestors up to the root, in this order.
    ///
    /// Used by existing members when applying a split made by someone else. Nodes on the local
    /// path are re-derived and need to match the given keys.
    ApplyFromList(Vec<PublicKey>),

    /// Derive a blinded key pair for the new member with an X3DH key exchange.
    ///
    /// Used by the member performing the split.
    DeriveAsInitiator {
        identity: &'a KeyPair,
        exchange: &'a KeyPair,
    },

    /// Derive our own leaf key pair with an X3DH key exchange.
    ///
    /// Used by the new member when reconstructing the tree after joining.
    DeriveAsJoiner {
        local: &'a LocalPeer,
        identity_key: &'a PublicKey,
        exchange_key: &'a PublicKey,
    },
}

/// Arena-backed binary tree of all group members.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tree {
    nodes: Vec<TreeNode>,
    root: NodeId,
}

impl Tree {
    /// Creates a balanced tree over the given peers.
    ///
    /// The first peer needs to be the local peer, its leaf uses the local ephemeral key pair. All
    /// other leaves receive a blinded key pair derived with an X3DH key exchange between the local
    /// identity, the given exchange key pair and the member's identity and ephemeral key. Secret
    /// keys off the local path are removed afterwards.
    pub fn create<P: CryptoProvider>(
        provider: &P,
        peers: &[Peer],
        local: &LocalPeer,
        exchange: &KeyPair,
    ) -> ArtResult<Self> {
        let Some(first) = peers.first() else {
            return Err(ArtError::InconsistentState("can't create tree without peers"));
        };
        if !local.is(first) {
            return Err(ArtError::InconsistentState(
                "first peer of the tree needs to be the local peer",
            ));
        }

        let mut tree = Self {
            nodes: Vec::with_capacity(peers.len() * 2 - 1),
            root: NodeId(0),
        };
        tree.root = tree.create_subtree(provider, peers, true, local, exchange)?;
        tree.purge(&local.peer());

        Ok(tree)
    }

    fn create_subtree<P: CryptoProvider>(
        &mut self,
        provider: &P,
        peers: &[Peer],
        contains_local: bool,
        local: &LocalPeer,
        exchange: &KeyPair,
    ) -> ArtResult<NodeId> {
        match peers {
            [] => Err(ArtError::InconsistentState("can't create subtree without peers")),
            [peer] if contains_local => {
                let ephemeral = local.ephemeral();
                Ok(self.push(TreeNode::Leaf(Leaf::new(
                    peer.clone(),
                    ephemeral.public_key.clone(),
                    Some(ephemeral.secret_key.clone()),
                ))))
            }
            [peer] => {
                let secret_key = key_exchange_send(
                    provider,
                    local.identity(),
                    peer.identity_key(),
                    exchange,
                    peer.ephemeral_key(),
                )?;
                let key_pair =
                    KeyPair::from_secret_key(provider, secret_key).map_err(ArtError::provider)?;
                Ok(self.push(TreeNode::Leaf(Leaf::new(
                    peer.clone(),
                    key_pair.public_key,
                    Some(key_pair.secret_key),
                ))))
            }
            _ => {
                let (left_peers, right_peers) = peers.split_at(left_tree_size(peers.len()));
                let left =
                    self.create_subtree(provider, left_peers, contains_local, local, exchange)?;
                let right = self.create_subtree(provider, right_peers, false, local, exchange)?;
                let id = self.push(TreeNode::Node(Node {
                    left,
                    right,
                    public_key: PublicKey::from_bytes(Vec::new()),
                    secret_key: None,
                }));
                self.derive(provider, id)?;
                Ok(id)
            }
        }
    }

    /// Assembles a tree from already linked arena entries.
    pub(crate) fn from_nodes(nodes: Vec<TreeNode>, root: NodeId) -> ArtResult<Self> {
        if root.0 >= nodes.len() {
            return Err(ArtError::InconsistentState("root is not part of the tree"));
        }
        Ok(Self { nodes, root })
    }

    fn push(&mut self, node: TreeNode) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn get(&self, id: NodeId) -> ArtResult<&TreeNode> {
        self.nodes
            .get(id.0)
            .ok_or(ArtError::InconsistentState("unknown node id"))
    }

    fn get_mut(&mut self, id: NodeId) -> ArtResult<&mut TreeNode> {
        self.nodes
            .get_mut(id.0)
            .ok_or(ArtError::InconsistentState("unknown node id"))
    }

    pub fn public_key(&self, id: NodeId) -> ArtResult<&PublicKey> {
        Ok(self.get(id)?.public_key())
    }

    /// Secret key of the root node, only known after all keys on the local path were derived.
    pub fn root_secret(&self) -> Option<&SecretKey> {
        self.nodes
            .get(self.root.0)
            .and_then(|node| node.secret_key())
    }

    /// Number of nodes and leaves in the tree.
    pub fn len(&self) -> usize {
        self.members().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes and leaves in pre-order (node, left subtree, right subtree).
    pub fn members(&self) -> Vec<NodeId> {
        let mut result = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            result.push(id);
            if let Some(TreeNode::Node(node)) = self.nodes.get(id.0) {
                stack.push(node.right);
                stack.push(node.left);
            }
        }
        result
    }

    /// Ids of all leaves from left to right.
    pub fn leaf_ids(&self) -> Vec<NodeId> {
        self.members()
            .into_iter()
            .filter(|id| self.nodes.get(id.0).is_some_and(TreeNode::is_leaf))
            .collect()
    }

    /// All leaves from left to right.
    pub fn leaves(&self) -> Vec<&Leaf> {
        self.members()
            .into_iter()
            .filter_map(|id| self.nodes.get(id.0).and_then(TreeNode::as_leaf))
            .collect()
    }

    /// All group members in leaf order.
    pub fn peers(&self) -> Vec<&Peer> {
        self.leaves().into_iter().map(|leaf| &leaf.peer).collect()
    }

    /// Left-most leaf, belonging to the member who created the tree.
    pub fn initiator(&self) -> ArtResult<&Leaf> {
        let mut id = self.root;
        loop {
            match self.get(id)? {
                TreeNode::Leaf(leaf) => return Ok(leaf),
                TreeNode::Node(node) => id = node.left,
            }
        }
    }

    /// Finds the leaf with the given public key.
    pub fn leaf_by_public_key(&self, public_key: &PublicKey) -> Option<NodeId> {
        self.leaf_ids().into_iter().find(|id| {
            self.nodes
                .get(id.0)
                .is_some_and(|node| node.public_key() == public_key)
        })
    }

    /// Finds the first leaf of a member with the given identity or ephemeral key.
    pub fn leaf_of(&self, public_key: &PublicKey) -> Option<&Leaf> {
        self.leaves().into_iter().find(|leaf| {
            leaf.peer.identity_key() == public_key || leaf.peer.ephemeral_key() == public_key
        })
    }

    /// Finds the leaf of the given peer.
    pub fn leaf_id_of_peer(&self, peer: &Peer) -> Option<NodeId> {
        self.leaf_ids().into_iter().find(|id| {
            matches!(self.nodes.get(id.0), Some(TreeNode::Leaf(leaf)) if leaf.peer.is_same(peer))
        })
    }

    /// Leaf and all of its ancestors up to the root, bottom-up. Empty if the peer is not a member.
    pub fn path_of(&self, peer: &Peer) -> Vec<NodeId> {
        match self.leaf_id_of_peer(peer) {
            Some(id) => self.path_of_leaf(id),
            None => Vec::new(),
        }
    }

    /// Given node and all of its ancestors up to the root, bottom-up.
    pub fn path_of_leaf(&self, id: NodeId) -> Vec<NodeId> {
        let parents = self.parents();
        if !parents.contains_key(&id) && id != self.root {
            return Vec::new();
        }

        let mut path = vec![id];
        let mut current = id;
        while let Some(parent) = parents.get(&current) {
            path.push(*parent);
            current = *parent;
        }
        path
    }

    fn parents(&self) -> HashMap<NodeId, NodeId> {
        let mut parents = HashMap::new();
        for id in self.members() {
            if let Some(TreeNode::Node(node)) = self.nodes.get(id.0) {
                parents.insert(node.left, id);
                parents.insert(node.right, id);
            }
        }
        parents
    }

    /// Derives the key pair of an internal node from the secret key of one child and the public
    /// key of the other.
    ///
    /// The secret key of the left child is used when both are known.
    pub fn derive<P: CryptoProvider>(&mut self, provider: &P, id: NodeId) -> ArtResult<()> {
        let TreeNode::Node(node) = self.get(id)? else {
            return Err(ArtError::InconsistentState("can't derive keys of a leaf"));
        };
        let left = self.get(node.left)?;
        let right = self.get(node.right)?;

        let (secret_key, public_key) = match (left.secret_key(), right.secret_key()) {
            (Some(secret_key), _) => (secret_key, right.public_key()),
            (None, Some(secret_key)) => (secret_key, left.public_key()),
            (None, None) => {
                return Err(ArtError::InconsistentState(
                    "can't derive node not on local path",
                ));
            }
        };

        let key_pair = derive_key_pair(provider, secret_key, public_key)?;
        trace!(node = id.0, "derived node key pair");

        let node = self.get_mut(id)?;
        node.set_public_key(key_pair.public_key);
        node.set_secret_key(Some(key_pair.secret_key));
        Ok(())
    }

    /// Returns `true` if we know the secret key of at least one child, that is, the node is on
    /// the local path.
    pub fn is_derivable(&self, id: NodeId) -> bool {
        match self.nodes.get(id.0) {
            Some(TreeNode::Node(node)) => [node.left, node.right].iter().any(|child| {
                self.nodes
                    .get(child.0)
                    .is_some_and(|child| child.secret_key().is_some())
            }),
            _ => false,
        }
    }

    /// Applies a public key announced by another member.
    ///
    /// Nodes on the local path are re-derived instead and the result needs to equal the announced
    /// key. All other nodes and leaves take the key as-is.
    pub fn update<P: CryptoProvider>(
        &mut self,
        provider: &P,
        id: NodeId,
        public_key: PublicKey,
    ) -> ArtResult<()> {
        match self.get(id)? {
            TreeNode::Leaf(leaf) => {
                if leaf.secret_key.is_some() {
                    return Err(ArtError::InconsistentState(
                        "can't overwrite key of local leaf",
                    ));
                }
                self.get_mut(id)?.set_public_key(public_key);
            }
            TreeNode::Node(_) => {
                if self.is_derivable(id) {
                    self.derive(provider, id)?;
                    if self.public_key(id)? != &public_key {
                        return Err(ArtError::InconsistentState(
                            "updated public key is not equal to derived one",
                        ));
                    }
                } else {
                    let node = self.get_mut(id)?;
                    node.set_public_key(public_key);
                    node.set_secret_key(None);
                }
            }
        }
        Ok(())
    }

    /// Replaces the leaf with the given public key by a new node, holding the old leaf on the left
    /// and a new leaf for `peer` on the right. All ancestors get new keys.
    ///
    /// Returns `false` if no leaf with this public key exists. The tree is left unchanged on
    /// errors.
    pub fn split<P: CryptoProvider>(
        &mut self,
        provider: &P,
        at: &PublicKey,
        peer: &Peer,
        init: SplitInit<'_>,
    ) -> ArtResult<bool> {
        let Some(old_leaf) = self.leaf_by_public_key(at) else {
            return Ok(false);
        };

        let mut tree = self.clone();
        let ancestors: Vec<NodeId> = tree.path_of_leaf(old_leaf).into_iter().skip(1).collect();

        let mut claimed = match init {
            SplitInit::ApplyFromList(ref public_keys) => {
                Some(public_keys.iter().cloned().collect::<VecDeque<_>>())
            }
            _ => None,
        };

        let new_leaf = match init {
            SplitInit::ApplyFromList(_) => {
                let public_key = next_claimed(&mut claimed)?;
                Leaf::new(peer.clone(), public_key, None)
            }
            SplitInit::DeriveAsInitiator { identity, exchange } => {
                let secret_key = key_exchange_send(
                    provider,
                    identity,
                    peer.identity_key(),
                    exchange,
                    peer.ephemeral_key(),
                )?;
                let key_pair =
                    KeyPair::from_secret_key(provider, secret_key).map_err(ArtError::provider)?;
                Leaf::new(peer.clone(), key_pair.public_key, Some(key_pair.secret_key))
            }
            SplitInit::DeriveAsJoiner {
                local,
                identity_key,
                exchange_key,
            } => {
                if !local.is(peer) {
                    return Err(ArtError::InconsistentState(
                        "joining peer needs to be the local peer",
                    ));
                }
                let secret_key = key_exchange_receive(
                    provider,
                    local.identity(),
                    identity_key,
                    local.ephemeral(),
                    exchange_key,
                )?;
                let key_pair =
                    KeyPair::from_secret_key(provider, secret_key).map_err(ArtError::provider)?;
                Leaf::new(peer.clone(), key_pair.public_key, Some(key_pair.secret_key))
            }
        };

        let new_leaf = tree.push(TreeNode::Leaf(new_leaf));
        let new_node = tree.push(TreeNode::Node(Node {
            left: old_leaf,
            right: new_leaf,
            public_key: PublicKey::from_bytes(Vec::new()),
            secret_key: None,
        }));

        match ancestors.first() {
            Some(parent) => {
                if let TreeNode::Node(parent) = tree.get_mut(*parent)? {
                    if parent.left == old_leaf {
                        parent.left = new_node;
                    } else {
                        parent.right = new_node;
                    }
                }
            }
            None => tree.root = new_node,
        }

        for id in std::iter::once(new_node).chain(ancestors) {
            let claimed_key = if claimed.is_some() {
                Some(next_claimed(&mut claimed)?)
            } else {
                None
            };

            if tree.is_derivable(id) {
                tree.derive(provider, id)?;
                if let Some(claimed_key) = claimed_key {
                    if tree.public_key(id)? != &claimed_key {
                        return Err(ArtError::InconsistentState(
                            "split public key is not equal to derived one",
                        ));
                    }
                }
            } else {
                let Some(claimed_key) = claimed_key else {
                    return Err(ArtError::InconsistentState(
                        "can't construct node not on local path without public key",
                    ));
                };
                let node = tree.get_mut(id)?;
                node.set_public_key(claimed_key);
                node.set_secret_key(None);
            }
        }

        if claimed.is_some_and(|keys| !keys.is_empty()) {
            return Err(ArtError::InconsistentState(
                "public keys left after processing split",
            ));
        }

        *self = tree;
        Ok(true)
    }

    /// Replaces the leaf with the given id.
    pub(crate) fn replace_leaf(&mut self, id: NodeId, leaf: Leaf) -> ArtResult<()> {
        match self.get_mut(id)? {
            TreeNode::Leaf(current) => {
                *current = leaf;
                Ok(())
            }
            TreeNode::Node(_) => Err(ArtError::InconsistentState("can't replace node with leaf")),
        }
    }

    /// Replaces the peer of a leaf after the member rotated their ephemeral key.
    pub(crate) fn set_peer(&mut self, id: NodeId, peer: Peer) -> ArtResult<()> {
        match self.get_mut(id)? {
            TreeNode::Leaf(leaf) => {
                leaf.peer = peer;
                Ok(())
            }
            TreeNode::Node(_) => Err(ArtError::InconsistentState("can't set peer of a node")),
        }
    }

    /// Sets a new key pair for the local leaf.
    pub(crate) fn set_leaf_key(&mut self, id: NodeId, key_pair: KeyPair) -> ArtResult<()> {
        match self.get_mut(id)? {
            TreeNode::Leaf(leaf) => {
                leaf.public_key = key_pair.public_key;
                leaf.secret_key = Some(key_pair.secret_key);
                Ok(())
            }
            TreeNode::Node(_) => Err(ArtError::InconsistentState("can't set leaf key of a node")),
        }
    }

    /// Removes all secret keys which are not on the path of the given peer.
    pub fn purge(&mut self, peer: &Peer) {
        let path: HashSet<NodeId> = self.path_of(peer).into_iter().collect();
        for (index, node) in self.nodes.iter_mut().enumerate() {
            if !path.contains(&NodeId(index)) {
                node.set_secret_key(None);
            }
        }
    }

    fn fmt_subtree(&self, f: &mut fmt::Formatter<'_>, id: NodeId, depth: usize) -> fmt::Result {
        let indent = "  ".repeat(depth);
        let Some(node) = self.nodes.get(id.0) else {
            return writeln!(f, "{indent}<missing {}>", id.0);
        };
        let secret = if node.secret_key().is_some() {
            " (secret)"
        } else {
            ""
        };
        match node {
            TreeNode::Leaf(leaf) => writeln!(
                f,
                "{indent}leaf {}{secret} identity={} ephemeral={}",
                abbreviate(&leaf.public_key),
                abbreviate(leaf.peer.identity_key()),
                abbreviate(leaf.peer.ephemeral_key()),
            ),
            TreeNode::Node(inner) => {
                writeln!(f, "{indent}node {}{secret}", abbreviate(&inner.public_key))?;
                self.fmt_subtree(f, inner.left, depth + 1)?;
                self.fmt_subtree(f, inner.right, depth + 1)
            }
        }
    }
}

impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_subtree(f, self.root, 0)
    }
}

fn abbreviate(public_key: &PublicKey) -> String {
    let hex = public_key.to_hex();
    hex.chars().take(8).collect()
}

fn next_claimed(claimed: &mut Option<VecDeque<PublicKey>>) -> ArtResult<PublicKey> {
    claimed
        .as_mut()
        .and_then(|keys| keys.pop_front())
        .ok_or(ArtError::InconsistentState(
            "not enough public keys to process split",
        ))
}

/// `keypair(HKDF(DH(secret_key, public_key)))` without salt and info.
fn derive_key_pair<P: CryptoProvider>(
    provider: &P,
    secret_key: &SecretKey,
    public_key: &PublicKey,
) -> ArtResult<KeyPair> {
    let shared_secret = provider
        .calculate_agreement(secret_key, public_key)
        .map_err(ArtError::provider)?;
    let okm = provider
        .hkdf(None, shared_secret.as_bytes(), None, P::SECRET_KEY_SIZE)
        .map_err(ArtError::provider)?;
    KeyPair::from_secret_key(provider, SecretKey::from_bytes(okm)).map_err(ArtError::provider)
}

/// Number of leaves in the left subtree: the largest power of two strictly below `leaves`.
pub(crate) fn left_tree_size(leaves: usize) -> usize {
    debug_assert!(leaves >= 2);
    1 << (usize::BITS - (leaves - 1).leading_zeros() - 1)
}
