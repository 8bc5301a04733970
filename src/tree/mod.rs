// SPDX-License-Identifier: MIT OR Apache-2.0

//! Binary tree of Diffie-Hellman key pairs.
//!
//! Every leaf belongs to one group member and every internal node carries a key pair derived from
//! its two children: `HKDF(DH(sk_child, pk_sibling))`. Since Diffie-Hellman is commutative, each
//! member can compute the secret keys along the path from their own leaf up to the root while
//! only knowing the public keys of all other nodes. All members therefore agree on the public key
//! of every node and on the secret key of the root.
//!
//! Nodes are stored in an arena and address their children by [`NodeId`]. Cloning a tree is a
//! deep copy, including all secret keys known to the local member.
mod node;
#[allow(clippy::module_inception)]
mod tree;

pub use node::{Leaf, Node, NodeId, TreeNode};
pub use tree::{SplitInit, Tree};
