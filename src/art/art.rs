// SPDX-License-Identifier: MIT OR Apache-2.0

use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::codec::{KeyUpdateMessage, Snapshot, SplitMessage, peek_initiator_identity};
use crate::error::{ArtError, ArtResult};
use crate::key_pair::{KeyPair, PublicKey, SecretKey};
use crate::peer::{LocalPeer, Peer};
use crate::traits::CryptoProvider;
use crate::tree::{Leaf, NodeId, SplitInit, Tree};
use crate::x3dh::{key_exchange_receive, key_exchange_send};

/// Member passed to [`Art::initiate`].
#[derive(Clone, Debug)]
pub enum Member {
    /// The local peer creating the tree, needs to be the first member.
    Local(LocalPeer),

    /// Any other member, known by their identity and signed ephemeral key.
    Remote(Peer),
}

/// Messages created when adding a new member to the tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SplitOutput {
    /// Split message for all existing members and the new member.
    pub message: Vec<u8>,

    /// Snapshot of the tree before the split, only for the new member.
    pub snapshot: Vec<u8>,
}

/// Asynchronous Ratcheting Tree of one group member.
///
/// Holds the local peer, the tree with all secret keys on the local path and the current stage
/// key. Every accepted operation re-derives the stage key from the previous one, the root secret,
/// all public keys of the tree and the identity keys of all members.
///
/// Operations never leave a partially modified state behind: they work on copies of the tree and
/// local peer and only replace them together with the stage key after all checks passed.
#[derive(Clone, Debug)]
pub struct Art {
    local: LocalPeer,
    tree: Tree,
    setup_message: Vec<u8>,
    stage: KeyPair,
}

impl Art {
    /// Creates a new tree over the given members.
    ///
    /// The first member needs to be the local peer who becomes the initiator of the tree. Returns
    /// the state of the initiator, the setup message for all other members can be retrieved with
    /// [`Art::setup_message`].
    pub fn initiate<P: CryptoProvider>(provider: &P, members: Vec<Member>) -> ArtResult<Self> {
        if members.len() < 2 {
            return Err(ArtError::InvalidArgument(
                "at least two members are required to create a tree",
            ));
        }

        let mut members = members.into_iter();
        let Some(Member::Local(local)) = members.next() else {
            return Err(ArtError::InconsistentState(
                "first member needs to be the local initiator",
            ));
        };

        let mut peers = vec![local.peer()];
        for member in members {
            let Member::Remote(peer) = member else {
                return Err(ArtError::InvalidArgument(
                    "only the first member can be the local peer",
                ));
            };
            if peers
                .iter()
                .any(|existing| existing.ephemeral_key() == peer.ephemeral_key())
            {
                return Err(ArtError::InvalidArgument("member was added twice"));
            }
            peers.push(peer);
        }

        let exchange = KeyPair::generate(provider).map_err(ArtError::provider)?;
        let tree = Tree::create(provider, &peers, &local, &exchange)?;
        let setup_message = Snapshot::encode(
            provider,
            &tree,
            &exchange.public_key,
            None,
            &local.identity().secret_key,
        )?;
        let stage = derive_stage_key(provider, &tree, None)?;

        debug!(members = peers.len(), "initiated tree");

        Ok(Self {
            local,
            tree,
            setup_message,
            stage,
        })
    }

    /// Reconstructs a tree from the setup message of the initiator.
    pub fn from_setup_message<P: CryptoProvider>(
        provider: &P,
        local: LocalPeer,
        setup_message: &[u8],
    ) -> ArtResult<Self> {
        // Authenticate before looking at anything else.
        let initiator_identity = peek_initiator_identity::<P>(setup_message)
            .map_err(|_| ArtError::InvalidSignature("invalid signature of setup message"))?;
        let (payload, signature) = Snapshot::signed_bytes::<P>(setup_message)?;
        if !provider.verify(payload, &initiator_identity, &signature) {
            warn!("rejected setup message with invalid signature");
            return Err(ArtError::InvalidSignature(
                "invalid signature of setup message",
            ));
        }

        let snapshot = Snapshot::decode(provider, setup_message, false)?;
        let mut tree = snapshot.tree;
        let initiator = tree.initiator()?.peer().clone();

        let local_peer = local.peer();
        let Some(leaf_id) = tree.leaf_id_of_peer(&local_peer) else {
            return Err(ArtError::InvalidArgument(
                "local peer is not a member of this tree",
            ));
        };

        let secret_key = key_exchange_receive(
            provider,
            local.identity(),
            initiator.identity_key(),
            local.ephemeral(),
            &snapshot.exchange_key,
        )?;
        let key_pair = KeyPair::from_secret_key(provider, secret_key).map_err(ArtError::provider)?;
        if tree.public_key(leaf_id)? != &key_pair.public_key {
            return Err(ArtError::InconsistentState(
                "derived leaf key does not match setup message",
            ));
        }

        tree.replace_leaf(
            leaf_id,
            Leaf::new(local_peer, key_pair.public_key, Some(key_pair.secret_key)),
        )?;
        derive_path(provider, &mut tree, leaf_id)?;

        let stage = derive_stage_key(provider, &tree, None)?;

        debug!(members = tree.leaves().len(), "joined tree from setup message");

        Ok(Self {
            local,
            tree,
            setup_message: setup_message.to_vec(),
            stage,
        })
    }

    /// Reconstructs a tree after being added by another member.
    ///
    /// Needs the snapshot and the split message which were both created by [`Art::split`].
    pub fn from_split_message<P: CryptoProvider>(
        provider: &P,
        local: LocalPeer,
        snapshot: &[u8],
        split_message: &[u8],
    ) -> ArtResult<Self> {
        // The snapshot is either signed by the initiator of the tree or by another device of our
        // own identity.
        let initiator_identity = peek_initiator_identity::<P>(snapshot)
            .map_err(|_| ArtError::InvalidSignature("invalid signature of split snapshot"))?;
        let (payload, signature) = Snapshot::signed_bytes::<P>(snapshot)?;
        if !provider.verify(payload, &initiator_identity, &signature)
            && !provider.verify(payload, &local.identity().public_key, &signature)
        {
            warn!("rejected split snapshot with invalid signature");
            return Err(ArtError::InvalidSignature(
                "invalid signature of split snapshot",
            ));
        }

        let decoded = Snapshot::decode(provider, snapshot, true)?;
        let message = SplitMessage::decode::<P>(split_message)?;
        let mut tree = decoded.tree;
        let initiator = tree.initiator()?.peer().clone();

        // Members with our identity received the stage secret encrypted with the shared identity
        // key, everyone else with a key from the X3DH exchange with the initiator.
        let is_known_identity = tree
            .peers()
            .iter()
            .any(|peer| peer.identity_key() == &local.identity().public_key);
        let decryption_key = if is_known_identity {
            local.identity().secret_key.clone()
        } else {
            key_exchange_receive(
                provider,
                local.identity(),
                initiator.identity_key(),
                local.ephemeral(),
                &decoded.exchange_key,
            )?
        };

        let Some(encrypted_stage_key) = decoded.encrypted_stage_key.as_ref() else {
            return Err(ArtError::InconsistentState("no stage key in split snapshot"));
        };
        let Some(stage_secret) = provider.decrypt(encrypted_stage_key, &decryption_key) else {
            warn!("failed to decrypt stage key of split snapshot");
            return Err(ArtError::InvalidSignature("failed to decrypt stage key"));
        };
        let prior_stage = KeyPair::from_secret_key(provider, SecretKey::from_bytes(stage_secret))
            .map_err(ArtError::provider)?;

        if !provider.verify(
            SplitMessage::signed_bytes::<P>(split_message),
            &prior_stage.public_key,
            &message.signature,
        ) {
            warn!("rejected split message with invalid signature");
            return Err(ArtError::InvalidSignature(
                "invalid signature of split message",
            ));
        }

        if message.identity_key != local.identity().public_key
            || message.ephemeral_key != local.ephemeral().public_key
        {
            return Err(ArtError::InvalidArgument("split message is for another peer"));
        }

        let Some(at_id) = tree.leaf_by_public_key(&message.at) else {
            return Err(ArtError::InvalidArgument("no leaf to split at"));
        };
        let splitter_key = if is_known_identity {
            leaf_at(&tree, at_id)?.peer().ephemeral_key().clone()
        } else {
            initiator.ephemeral_key().clone()
        };
        if !provider.verify(
            SplitMessage::splitter_signed_bytes::<P>(split_message),
            &splitter_key,
            &message.splitter_signature,
        ) {
            warn!("rejected split message with invalid splitter signature");
            return Err(ArtError::InvalidSignature(
                "invalid signature of split message creator",
            ));
        }

        let local_peer = local.peer();
        let is_split = tree.split(
            provider,
            &message.at,
            &local_peer,
            SplitInit::DeriveAsJoiner {
                local: &local,
                identity_key: &splitter_key,
                exchange_key: &decoded.exchange_key,
            },
        )?;
        if !is_split {
            return Err(ArtError::InvalidArgument("no such member to split at"));
        }

        // Our own derivation needs to arrive at the keys announced to all other members.
        if path_public_keys(&tree, &local_peer)? != message.path_keys {
            return Err(ArtError::InconsistentState(
                "derived path keys do not match split message",
            ));
        }

        let stage = derive_stage_key(provider, &tree, Some(&prior_stage))?;

        debug!(members = tree.leaves().len(), "joined tree from split message");

        Ok(Self {
            local,
            tree,
            setup_message: snapshot.to_vec(),
            stage,
        })
    }

    /// Replaces our leaf key with a new ephemeral key pair and derives all keys on our path.
    ///
    /// A fresh key pair is generated when none is given. Returns the key update message for all
    /// other members, signed with the stage key before the update. Ratchets of different members
    /// need to be applied one after another, concurrent updates are not supported.
    pub fn update_key<P: CryptoProvider>(
        &mut self,
        provider: &P,
        ephemeral: Option<KeyPair>,
    ) -> ArtResult<Vec<u8>> {
        let ephemeral = match ephemeral {
            Some(ephemeral) => ephemeral,
            None => KeyPair::generate(provider).map_err(ArtError::provider)?,
        };

        let mut tree = self.tree.clone();
        let mut local = self.local.clone();
        let leaf_id = local_leaf_id(&tree, &local)?;

        local.rotate_ephemeral(provider, ephemeral.clone())?;

        let path = tree.path_of_leaf(leaf_id);
        let mut path_keys = Vec::with_capacity(path.len());
        for id in path {
            let old = tree.public_key(id)?.clone();
            if id == leaf_id {
                tree.set_leaf_key(id, ephemeral.clone())?;
                tree.set_peer(id, local.peer())?;
            } else {
                tree.derive(provider, id)?;
            }
            path_keys.push((old, tree.public_key(id)?.clone()));
        }

        let message = KeyUpdateMessage::encode(
            provider,
            &path_keys,
            local.ephemeral_signature(),
            &self.stage.secret_key,
        )?;
        let stage = derive_stage_key(provider, &tree, Some(&self.stage))?;

        debug!(path = path_keys.len(), "updated local key");

        self.local = local;
        self.tree = tree;
        self.stage = stage;

        Ok(message)
    }

    /// Applies a key update message of another member.
    ///
    /// Only updates signed with our current stage key are accepted, updates need to be processed
    /// in the order they were created.
    pub fn process_key_update<P: CryptoProvider>(
        &mut self,
        provider: &P,
        message: &[u8],
    ) -> ArtResult<()> {
        let decoded = KeyUpdateMessage::decode::<P>(message)?;

        if !provider.verify(
            KeyUpdateMessage::signed_bytes::<P>(message),
            &self.stage.public_key,
            &decoded.signature,
        ) {
            warn!("rejected key update with invalid signature");
            return Err(ArtError::InvalidSignature(
                "invalid signature of key update message",
            ));
        }

        let Some((leaf_key, ephemeral_key)) = decoded.path_keys.first() else {
            return Err(ArtError::InconsistentState(
                "not enough public keys in key update",
            ));
        };

        let mut tree = self.tree.clone();
        let Some(leaf_id) = tree.leaf_by_public_key(leaf_key) else {
            return Err(ArtError::InvalidArgument("no such leaf"));
        };

        let peer = Peer::new(
            provider,
            leaf_at(&tree, leaf_id)?.peer().identity_key().clone(),
            ephemeral_key.clone(),
            decoded.ephemeral_signature.clone(),
        )
        .inspect_err(|_| warn!("rejected key update with invalid ephemeral key signature"))?;
        tree.set_peer(leaf_id, peer)?;

        let path = tree.path_of_leaf(leaf_id);
        if path.len() != decoded.path_keys.len() {
            return Err(ArtError::InconsistentState(
                "number of public keys does not match path length",
            ));
        }

        for (id, (old, new)) in path.into_iter().zip(decoded.path_keys) {
            if tree.public_key(id)? != &old {
                return Err(ArtError::InconsistentState("invalid old public key"));
            }
            tree.update(provider, id, new)?;
        }

        let stage = derive_stage_key(provider, &tree, Some(&self.stage))?;

        debug!("processed key update");

        self.tree = tree;
        self.stage = stage;

        Ok(())
    }

    /// Adds a new member by splitting a leaf.
    ///
    /// Any member can add another device of their own identity, the new leaf is placed next to
    /// their own and `at` is ignored. Only the initiator can add members with a new identity, the
    /// new leaf is placed next to the leaf with public key `at` or next to the initiator's own
    /// leaf.
    pub fn split<P: CryptoProvider>(
        &mut self,
        provider: &P,
        peer: &Peer,
        at: Option<&PublicKey>,
    ) -> ArtResult<SplitOutput> {
        if self
            .tree
            .peers()
            .iter()
            .any(|member| member.ephemeral_key() == peer.ephemeral_key())
        {
            return Err(ArtError::InvalidArgument("peer is already a member"));
        }

        let local_leaf = local_leaf_id(&self.tree, &self.local)?;
        let exchange = KeyPair::generate(provider).map_err(ArtError::provider)?;

        let (at, encryption_key) = if peer.identity_key() == &self.local.identity().public_key {
            (
                self.tree.public_key(local_leaf)?.clone(),
                self.local.identity().secret_key.clone(),
            )
        } else {
            if self
                .tree
                .peers()
                .iter()
                .any(|member| member.identity_key() == peer.identity_key())
            {
                return Err(ArtError::InvalidArgument(
                    "identity can only be added by one of its own devices",
                ));
            }
            if !self.is_initiator() {
                return Err(ArtError::InvalidArgument(
                    "only the initiator can add members with another identity",
                ));
            }

            let at = match at {
                Some(at) => at.clone(),
                None => self.tree.public_key(local_leaf)?.clone(),
            };
            if self.tree.leaf_by_public_key(&at).is_none() {
                return Err(ArtError::InvalidArgument("no such leaf to split at"));
            }

            let encryption_key = key_exchange_send(
                provider,
                self.local.identity(),
                peer.identity_key(),
                &exchange,
                peer.ephemeral_key(),
            )?;
            (at, encryption_key)
        };

        let encrypted_stage_key = provider
            .encrypt(self.stage.secret_key.as_bytes(), &encryption_key)
            .map_err(ArtError::provider)?;
        let snapshot = Snapshot::encode(
            provider,
            &self.tree,
            &exchange.public_key,
            Some(encrypted_stage_key.as_slice()),
            &self.local.identity().secret_key,
        )?;

        let mut tree = self.tree.clone();
        let is_split = tree.split(
            provider,
            &at,
            peer,
            SplitInit::DeriveAsInitiator {
                identity: self.local.ephemeral(),
                exchange: &exchange,
            },
        )?;
        if !is_split {
            return Err(ArtError::InvalidArgument("no such member to split at"));
        }

        let path_keys = path_public_keys(&tree, peer)?;
        let message = SplitMessage::encode(
            provider,
            &at,
            peer,
            &path_keys,
            &self.local.ephemeral().secret_key,
            &self.stage.secret_key,
        )?;

        tree.purge(&self.local.peer());
        let stage = derive_stage_key(provider, &tree, Some(&self.stage))?;

        debug!(
            members = tree.leaves().len(),
            path = path_keys.len(),
            "added member to tree"
        );

        self.tree = tree;
        self.stage = stage;

        Ok(SplitOutput { message, snapshot })
    }

    /// Applies a split message of another member.
    pub fn process_split<P: CryptoProvider>(
        &mut self,
        provider: &P,
        message: &[u8],
    ) -> ArtResult<()> {
        let decoded = SplitMessage::decode::<P>(message)?;

        if !provider.verify(
            SplitMessage::signed_bytes::<P>(message),
            &self.stage.public_key,
            &decoded.signature,
        ) {
            warn!("rejected split message with invalid signature");
            return Err(ArtError::InvalidSignature(
                "invalid signature of split message",
            ));
        }

        let Some(at_id) = self.tree.leaf_by_public_key(&decoded.at) else {
            return Err(ArtError::InvalidArgument("no leaf to split at"));
        };

        // Devices can add other devices of their own identity next to them, only the initiator
        // can add new identities. Exactly one key is accepted per split, the same rule the joiner
        // applies, so a split can't be signed by the initiator in place of the target's device.
        let target = leaf_at(&self.tree, at_id)?.peer();
        let splitter_key = if target.identity_key() == &decoded.identity_key {
            target.ephemeral_key()
        } else {
            self.tree.initiator()?.peer().ephemeral_key()
        };
        if !provider.verify(
            SplitMessage::splitter_signed_bytes::<P>(message),
            splitter_key,
            &decoded.splitter_signature,
        ) {
            warn!("rejected split message with invalid splitter signature");
            return Err(ArtError::InvalidSignature(
                "invalid signature of split message creator",
            ));
        }

        let peer = Peer::new(
            provider,
            decoded.identity_key,
            decoded.ephemeral_key,
            decoded.ephemeral_signature,
        )?;
        if self
            .tree
            .peers()
            .iter()
            .any(|member| member.ephemeral_key() == peer.ephemeral_key())
        {
            return Err(ArtError::InvalidArgument("peer is already a member"));
        }

        let mut tree = self.tree.clone();
        let is_split = tree.split(
            provider,
            &decoded.at,
            &peer,
            SplitInit::ApplyFromList(decoded.path_keys),
        )?;
        if !is_split {
            return Err(ArtError::InvalidArgument("no such member to split at"));
        }

        let stage = derive_stage_key(provider, &tree, Some(&self.stage))?;

        debug!(members = tree.leaves().len(), "processed split");

        self.tree = tree;
        self.stage = stage;

        Ok(())
    }

    pub fn local_peer(&self) -> &LocalPeer {
        &self.local
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Snapshot this state was created from, or the setup message if we initiated the tree.
    pub fn setup_message(&self) -> &[u8] {
        &self.setup_message
    }

    /// Current stage key, shared by all members who processed the same operations.
    pub fn stage_key(&self) -> &KeyPair {
        &self.stage
    }

    /// Our own leaf.
    pub fn leaf(&self) -> ArtResult<&Leaf> {
        leaf_at(&self.tree, local_leaf_id(&self.tree, &self.local)?)
    }

    /// Leaf of a member with the given identity or ephemeral key.
    pub fn leaf_of(&self, public_key: &PublicKey) -> Option<&Leaf> {
        self.tree.leaf_of(public_key)
    }

    /// Leaf of the member who created the tree.
    pub fn initiator(&self) -> ArtResult<&Leaf> {
        self.tree.initiator()
    }

    pub fn is_initiator(&self) -> bool {
        self.tree
            .initiator()
            .is_ok_and(|leaf| self.local.is(leaf.peer()))
    }

    pub fn peers(&self) -> Vec<&Peer> {
        self.tree.peers()
    }

    pub fn leaves(&self) -> Vec<&Leaf> {
        self.tree.leaves()
    }
}

fn local_leaf_id(tree: &Tree, local: &LocalPeer) -> ArtResult<NodeId> {
    tree.leaf_id_of_peer(&local.peer())
        .ok_or(ArtError::InconsistentState("local leaf is missing in tree"))
}

fn leaf_at(tree: &Tree, id: NodeId) -> ArtResult<&Leaf> {
    tree.get(id)?
        .as_leaf()
        .ok_or(ArtError::InconsistentState("expected leaf"))
}

/// Derives all nodes above the given leaf, checking them against the public keys in the tree.
fn derive_path<P: CryptoProvider>(provider: &P, tree: &mut Tree, leaf_id: NodeId) -> ArtResult<()> {
    for id in tree.path_of_leaf(leaf_id).into_iter().skip(1) {
        let expected = tree.public_key(id)?.clone();
        tree.derive(provider, id)?;
        if tree.public_key(id)? != &expected {
            return Err(ArtError::InconsistentState(
                "derived public key does not match tree",
            ));
        }
    }
    Ok(())
}

fn path_public_keys(tree: &Tree, peer: &Peer) -> ArtResult<Vec<PublicKey>> {
    tree.path_of(peer)
        .into_iter()
        .map(|id| tree.public_key(id).cloned())
        .collect()
}

/// Derives the next stage key.
///
/// ```text
/// ikm   = prior_stage_sk? || root_sk || public keys of all nodes and leaves in pre-order
/// info  = identity keys of all members in leaf order
/// stage = keypair(HKDF(ikm, info))
/// ```
fn derive_stage_key<P: CryptoProvider>(
    provider: &P,
    tree: &Tree,
    prior: Option<&KeyPair>,
) -> ArtResult<KeyPair> {
    let Some(root_secret) = tree.root_secret() else {
        return Err(ArtError::InconsistentState("root secret is unknown"));
    };

    let members = tree.members();
    let mut ikm = Zeroizing::new(Vec::with_capacity(
        P::SECRET_KEY_SIZE * 2 + members.len() * P::PUBLIC_KEY_SIZE,
    ));
    if let Some(prior) = prior {
        ikm.extend_from_slice(prior.secret_key.as_bytes());
    }
    ikm.extend_from_slice(root_secret.as_bytes());
    for id in members {
        ikm.extend_from_slice(tree.public_key(id)?.as_bytes());
    }

    let info: Vec<u8> = tree
        .peers()
        .into_iter()
        .flat_map(|peer| peer.identity_key().as_bytes().to_vec())
        .collect();

    let okm = provider
        .hkdf(None, &ikm, Some(&info), P::SECRET_KEY_SIZE)
        .map_err(ArtError::provider)?;
    KeyPair::from_secret_key(provider, SecretKey::from_bytes(okm)).map_err(ArtError::provider)
}
