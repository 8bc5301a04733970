// SPDX-License-Identifier: MIT OR Apache-2.0

//! `p2panda-art` implements Asynchronous Ratcheting Trees (ART) for continuous group
//! key-agreement with forward secrecy and post-compromise security.
//!
//! ART was introduced in the paper ["On Ends-to-Ends Encryption: Asynchronous Group Messaging
//! with Strong Security Guarantees"](https://eprint.iacr.org/2017/666.pdf) (2017) by Katriel
//! Cohn-Gordon, Cas Cremers, Luke Garratt, Jon Millican and Kevin Milner. All members of a group
//! are leaves of a binary Diffie-Hellman tree. The secret of the root is known to every member
//! and mixed into a "stage key" which can be used to derive secrets for encrypting data towards
//! the group.
//!
//! ## Group lifecycle
//!
//! 1. An initiator creates the tree over the identity and signed ephemeral keys of all members
//!    with [`Art::initiate`]. The resulting setup message is signed with the identity key of the
//!    initiator and can be sent to every member.
//! 2. Every other member reconstructs the tree with [`Art::from_setup_message`]. Their leaf secret
//!    is derived through an X3DH key exchange with the initiator, so they don't need to be online
//!    while the tree is being created.
//! 3. Members rotate their leaf key with [`Art::update_key`], everyone else applies the update with
//!    [`Art::process_key_update`].
//! 4. New members are added with [`Art::split`]. The initiator can add any new identity, every
//!    member can add other devices of their own identity.
//!
//! Every message is signed with the stage key it was created under. A member can only apply a
//! message after applying all messages which came before it, the application needs to take care
//! of delivering them in a total order.
//!
//! ## Cryptography
//!
//! All algorithms are accessed through the [`CryptoProvider`](traits::CryptoProvider) trait. The
//! default implementation [`Crypto`](crypto::Crypto) uses X25519 for Diffie-Hellman, XEdDSA for
//! signatures with the same key pairs, SHA-256, HKDF-SHA256 and XChaCha20-Poly1305.
//!
//! ## Security
//!
//! This crate did not receive a security audit and tree-based key-agreement is only secure under
//! the assumptions of the paper. Group control messages are not encrypted, an adversary observing
//! the network learns which identities are members of a group.
pub mod art;
pub mod codec;
pub mod crypto;
mod error;
mod key_pair;
mod peer;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
pub mod traits;
pub mod tree;
mod x3dh;

pub use art::{Art, Member, SplitOutput};
pub use codec::{KeyUpdateMessage, Snapshot, SplitMessage};
pub use error::{ArtError, ArtResult, EncodingError};
pub use key_pair::{KeyPair, PublicKey, SecretKey, Signature};
pub use peer::{LocalPeer, Peer};
