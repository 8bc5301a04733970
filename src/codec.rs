// SPDX-License-Identifier: MIT OR Apache-2.0

//! Binary wire formats of trees, snapshots, split and key update messages.
//!
//! All formats are plain concatenations of fixed-size fields without any padding or length
//! prefixes. Field sizes are defined by the crypto provider. Every signature covers all bytes
//! preceding it in the same message.
//!
//! ```text
//! tree snapshot     pre-order, per node: [tag: u8][public key]
//!                   leaves additionally: [identity key][ephemeral key][ephemeral signature]
//! snapshot          [tree][exchange key][encrypted stage secret]?[signature]
//! split message     [at][identity key][ephemeral key][ephemeral signature][path keys..]
//!                   [splitter signature][signature]
//! key update        [(old key, new key)..][ephemeral signature][signature]
//! ```
use crate::error::{ArtError, ArtResult, EncodingError};
use crate::key_pair::{PublicKey, SecretKey, Signature};
use crate::peer::Peer;
use crate::traits::CryptoProvider;
use crate::tree::{Leaf, Node, NodeId, Tree, TreeNode};

const LEAF_TAG: u8 = 0;

const NODE_TAG: u8 = 1;

/// Appends fields to a buffer of known final size.
#[derive(Debug)]
pub(crate) struct Writer {
    bytes: Vec<u8>,
}

impl Writer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
        }
    }

    pub fn write(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    pub fn write_u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns the written bytes, failing if they do not add up to the expected length.
    pub fn finish(self, expected: usize) -> Result<Vec<u8>, EncodingError> {
        if self.bytes.len() != expected {
            return Err(EncodingError::WrongOffset {
                actual: self.bytes.len(),
                expected,
            });
        }
        Ok(self.bytes)
    }
}

/// Reads fields from a byte slice while keeping track of the offset.
#[derive(Debug)]
pub(crate) struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    pub fn read(&mut self, len: usize) -> Result<&'a [u8], EncodingError> {
        if self.remaining() < len {
            return Err(EncodingError::UnexpectedEnd {
                offset: self.offset,
                needed: len - self.remaining(),
            });
        }
        let out = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, EncodingError> {
        Ok(self.read(1)?[0])
    }

    pub fn read_public_key<P: CryptoProvider>(&mut self) -> Result<PublicKey, EncodingError> {
        Ok(PublicKey::from_bytes(self.read(P::PUBLIC_KEY_SIZE)?.to_vec()))
    }

    pub fn read_signature<P: CryptoProvider>(&mut self) -> Result<Signature, EncodingError> {
        Ok(Signature::from_bytes(self.read(P::SIGNATURE_SIZE)?.to_vec()))
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.offset)
    }

    /// Fails if not all bytes have been consumed.
    pub fn finish(&self) -> Result<(), EncodingError> {
        if self.offset != self.bytes.len() {
            return Err(EncodingError::WrongOffset {
                actual: self.offset,
                expected: self.bytes.len(),
            });
        }
        Ok(())
    }
}

/// Size of the AEAD-encrypted stage secret inside split snapshots.
pub fn encrypted_stage_key_size<P: CryptoProvider>() -> usize {
    P::ENCRYPTION_PREFIX_SIZE + P::SECRET_KEY_SIZE + P::ENCRYPTION_SUFFIX_SIZE
}

fn leaf_size<P: CryptoProvider>() -> usize {
    1 + P::PUBLIC_KEY_SIZE * 3 + P::SIGNATURE_SIZE
}

fn node_size<P: CryptoProvider>() -> usize {
    1 + P::PUBLIC_KEY_SIZE
}

/// Size of the encoded tree in bytes.
pub fn tree_size<P: CryptoProvider>(tree: &Tree) -> usize {
    let leaves = tree.leaf_ids().len();
    let nodes = tree.len() - leaves;
    leaves * leaf_size::<P>() + nodes * node_size::<P>()
}

/// Encodes all public parts of the tree in pre-order.
pub fn encode_tree<P: CryptoProvider>(tree: &Tree) -> ArtResult<Vec<u8>> {
    let size = tree_size::<P>(tree);
    let mut writer = Writer::with_capacity(size);
    write_tree(tree, &mut writer)?;
    Ok(writer.finish(size)?)
}

fn write_tree(tree: &Tree, writer: &mut Writer) -> ArtResult<()> {
    for id in tree.members() {
        match tree.get(id)? {
            TreeNode::Leaf(leaf) => {
                writer.write_u8(LEAF_TAG);
                writer.write(leaf.public_key().as_bytes());
                writer.write(leaf.peer().identity_key().as_bytes());
                writer.write(leaf.peer().ephemeral_key().as_bytes());
                writer.write(leaf.peer().ephemeral_signature().as_bytes());
            }
            TreeNode::Node(node) => {
                writer.write_u8(NODE_TAG);
                writer.write(node.public_key().as_bytes());
            }
        }
    }
    Ok(())
}

/// Decodes a tree, only containing public keys.
///
/// Every leaf's ephemeral key signature is verified.
pub fn decode_tree<P: CryptoProvider>(provider: &P, bytes: &[u8]) -> ArtResult<Tree> {
    let mut reader = Reader::new(bytes);
    let tree = read_tree(provider, &mut reader)?;
    reader.finish()?;
    Ok(tree)
}

fn read_tree<P: CryptoProvider>(provider: &P, reader: &mut Reader<'_>) -> ArtResult<Tree> {
    enum Entry {
        Leaf(Leaf),
        Node(PublicKey),
    }

    // Read entries in pre-order until every opened child slot has been filled.
    let mut entries = Vec::new();
    let mut open_slots = 1usize;
    while open_slots > 0 {
        let tag = reader.read_u8()?;
        let public_key = reader.read_public_key::<P>()?;
        match tag {
            LEAF_TAG => {
                let identity_key = reader.read_public_key::<P>()?;
                let ephemeral_key = reader.read_public_key::<P>()?;
                let ephemeral_signature = reader.read_signature::<P>()?;
                let peer = Peer::new(provider, identity_key, ephemeral_key, ephemeral_signature)?;
                entries.push(Entry::Leaf(Leaf::new(peer, public_key, None)));
                open_slots -= 1;
            }
            NODE_TAG => {
                entries.push(Entry::Node(public_key));
                open_slots += 1;
            }
            tag => return Err(EncodingError::UnknownTag(tag).into()),
        }
    }

    // Link entries bottom-up: walking backwards, the left child of every node is on top of the
    // stack, followed by its right child.
    let mut nodes = Vec::with_capacity(entries.len());
    let mut stack: Vec<NodeId> = Vec::new();
    for entry in entries.into_iter().rev() {
        let node = match entry {
            Entry::Leaf(leaf) => TreeNode::Leaf(leaf),
            Entry::Node(public_key) => {
                let (Some(left), Some(right)) = (stack.pop(), stack.pop()) else {
                    return Err(ArtError::InconsistentState("node without children"));
                };
                TreeNode::Node(Node {
                    left,
                    right,
                    public_key,
                    secret_key: None,
                })
            }
        };
        nodes.push(node);
        stack.push(NodeId(nodes.len() - 1));
    }

    match stack.as_slice() {
        [root] => Tree::from_nodes(nodes, *root),
        _ => Err(ArtError::InconsistentState("tree needs exactly one root")),
    }
}

/// Reads the identity key of the left-most leaf without decoding the whole tree.
///
/// Used to check the signature of a snapshot before processing any of its contents.
pub(crate) fn peek_initiator_identity<P: CryptoProvider>(bytes: &[u8]) -> ArtResult<PublicKey> {
    let mut reader = Reader::new(bytes);
    loop {
        let tag = reader.read_u8()?;
        reader.read(P::PUBLIC_KEY_SIZE)?;
        match tag {
            LEAF_TAG => return Ok(reader.read_public_key::<P>()?),
            NODE_TAG => continue,
            tag => return Err(EncodingError::UnknownTag(tag).into()),
        }
    }
}

/// Signed tree state for new members.
///
/// Setup messages created when initiating a tree carry no stage secret, snapshots created when
/// splitting a leaf always carry the prior stage secret encrypted for the joining member.
#[derive(Debug)]
pub struct Snapshot {
    pub tree: Tree,
    pub exchange_key: PublicKey,
    pub encrypted_stage_key: Option<Vec<u8>>,
    pub signature: Signature,
}

impl Snapshot {
    /// Encodes the tree with the exchange key and optional encrypted stage secret and signs it.
    pub fn encode<P: CryptoProvider>(
        provider: &P,
        tree: &Tree,
        exchange_key: &PublicKey,
        encrypted_stage_key: Option<&[u8]>,
        signing_key: &SecretKey,
    ) -> ArtResult<Vec<u8>> {
        let size = tree_size::<P>(tree)
            + P::PUBLIC_KEY_SIZE
            + encrypted_stage_key.map_or(0, |_| encrypted_stage_key_size::<P>())
            + P::SIGNATURE_SIZE;

        let mut writer = Writer::with_capacity(size);
        write_tree(tree, &mut writer)?;
        writer.write(exchange_key.as_bytes());
        if let Some(encrypted_stage_key) = encrypted_stage_key {
            if encrypted_stage_key.len() != encrypted_stage_key_size::<P>() {
                return Err(ArtError::InconsistentState(
                    "unexpected length of encrypted stage key",
                ));
            }
            writer.write(encrypted_stage_key);
        }

        let signature = provider
            .sign(writer.as_bytes(), signing_key)
            .map_err(ArtError::provider)?;
        writer.write(signature.as_bytes());

        Ok(writer.finish(size)?)
    }

    /// Decodes a snapshot. The caller decides if an encrypted stage secret is expected.
    ///
    /// The signature is not checked here, use [`Snapshot::signed_bytes`] to verify it.
    pub fn decode<P: CryptoProvider>(
        provider: &P,
        bytes: &[u8],
        with_stage_key: bool,
    ) -> ArtResult<Self> {
        let mut reader = Reader::new(bytes);
        let tree = read_tree(provider, &mut reader)?;
        let exchange_key = reader.read_public_key::<P>()?;
        let encrypted_stage_key = if with_stage_key {
            Some(reader.read(encrypted_stage_key_size::<P>())?.to_vec())
        } else {
            None
        };
        let signature = reader.read_signature::<P>()?;
        reader.finish()?;

        Ok(Self {
            tree,
            exchange_key,
            encrypted_stage_key,
            signature,
        })
    }

    /// Bytes covered by the snapshot signature and the signature itself.
    pub fn signed_bytes<P: CryptoProvider>(bytes: &[u8]) -> ArtResult<(&[u8], Signature)> {
        let Some(split_at) = bytes.len().checked_sub(P::SIGNATURE_SIZE) else {
            return Err(EncodingError::UnexpectedEnd {
                offset: bytes.len(),
                needed: P::SIGNATURE_SIZE - bytes.len(),
            }
            .into());
        };
        let (payload, signature) = bytes.split_at(split_at);
        Ok((payload, Signature::from_bytes(signature.to_vec())))
    }
}

/// Announces a split to existing members and, together with the snapshot, to the new member.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SplitMessage {
    /// Public key of the leaf which was split.
    pub at: PublicKey,
    pub identity_key: PublicKey,
    pub ephemeral_key: PublicKey,
    pub ephemeral_signature: Signature,
    /// Public keys of the new leaf, the new node and all ancestors up to the root.
    pub path_keys: Vec<PublicKey>,
    /// Signature by the splitting member's ephemeral key.
    pub splitter_signature: Signature,
    /// Signature by the stage key before the split.
    pub signature: Signature,
}

impl SplitMessage {
    fn min_size<P: CryptoProvider>() -> usize {
        P::PUBLIC_KEY_SIZE * 3 + P::SIGNATURE_SIZE * 3
    }

    /// Encodes and signs a split message, first with the splitter's ephemeral key, then with the
    /// current stage key.
    pub fn encode<P: CryptoProvider>(
        provider: &P,
        at: &PublicKey,
        peer: &Peer,
        path_keys: &[PublicKey],
        splitter_key: &SecretKey,
        stage_key: &SecretKey,
    ) -> ArtResult<Vec<u8>> {
        let size = Self::min_size::<P>() + path_keys.len() * P::PUBLIC_KEY_SIZE;
        let mut writer = Writer::with_capacity(size);

        writer.write(at.as_bytes());
        writer.write(peer.identity_key().as_bytes());
        writer.write(peer.ephemeral_key().as_bytes());
        writer.write(peer.ephemeral_signature().as_bytes());
        for public_key in path_keys {
            writer.write(public_key.as_bytes());
        }

        let splitter_signature = provider
            .sign(writer.as_bytes(), splitter_key)
            .map_err(ArtError::provider)?;
        writer.write(splitter_signature.as_bytes());

        let signature = provider
            .sign(writer.as_bytes(), stage_key)
            .map_err(ArtError::provider)?;
        writer.write(signature.as_bytes());

        Ok(writer.finish(size)?)
    }

    pub fn decode<P: CryptoProvider>(bytes: &[u8]) -> ArtResult<Self> {
        if bytes.len() < Self::min_size::<P>() {
            return Err(ArtError::InvalidArgument("invalid split message length"));
        }
        let path_bytes = bytes.len() - Self::min_size::<P>();
        if path_bytes % P::PUBLIC_KEY_SIZE != 0 {
            return Err(ArtError::InvalidArgument("invalid split message length"));
        }

        let mut reader = Reader::new(bytes);
        let at = reader.read_public_key::<P>()?;
        let identity_key = reader.read_public_key::<P>()?;
        let ephemeral_key = reader.read_public_key::<P>()?;
        let ephemeral_signature = reader.read_signature::<P>()?;
        let path_keys = (0..path_bytes / P::PUBLIC_KEY_SIZE)
            .map(|_| reader.read_public_key::<P>())
            .collect::<Result<Vec<_>, _>>()?;
        let splitter_signature = reader.read_signature::<P>()?;
        let signature = reader.read_signature::<P>()?;
        reader.finish()?;

        Ok(Self {
            at,
            identity_key,
            ephemeral_key,
            ephemeral_signature,
            path_keys,
            splitter_signature,
            signature,
        })
    }

    /// Bytes covered by the outer signature.
    pub fn signed_bytes<P: CryptoProvider>(bytes: &[u8]) -> &[u8] {
        &bytes[..bytes.len().saturating_sub(P::SIGNATURE_SIZE)]
    }

    /// Bytes covered by the splitter signature.
    pub fn splitter_signed_bytes<P: CryptoProvider>(bytes: &[u8]) -> &[u8] {
        &bytes[..bytes.len().saturating_sub(P::SIGNATURE_SIZE * 2)]
    }
}

/// Announces the new public keys along the path of a member who rotated their leaf key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyUpdateMessage {
    /// Old and new public key for the leaf and every ancestor, bottom-up.
    pub path_keys: Vec<(PublicKey, PublicKey)>,
    /// Signature of the new ephemeral key by the member's identity key.
    pub ephemeral_signature: Signature,
    /// Signature by the stage key before the update.
    pub signature: Signature,
}

impl KeyUpdateMessage {
    pub fn encode<P: CryptoProvider>(
        provider: &P,
        path_keys: &[(PublicKey, PublicKey)],
        ephemeral_signature: &Signature,
        stage_key: &SecretKey,
    ) -> ArtResult<Vec<u8>> {
        let size = path_keys.len() * 2 * P::PUBLIC_KEY_SIZE + P::SIGNATURE_SIZE * 2;
        let mut writer = Writer::with_capacity(size);

        for (old, new) in path_keys {
            writer.write(old.as_bytes());
            writer.write(new.as_bytes());
        }
        writer.write(ephemeral_signature.as_bytes());

        let signature = provider
            .sign(writer.as_bytes(), stage_key)
            .map_err(ArtError::provider)?;
        writer.write(signature.as_bytes());

        Ok(writer.finish(size)?)
    }

    pub fn decode<P: CryptoProvider>(bytes: &[u8]) -> ArtResult<Self> {
        let Some(keys_bytes) = bytes.len().checked_sub(P::SIGNATURE_SIZE * 2) else {
            return Err(ArtError::InvalidArgument("invalid key update message length"));
        };
        if keys_bytes % P::PUBLIC_KEY_SIZE != 0 {
            return Err(ArtError::InvalidArgument("invalid key update message length"));
        }
        let key_count = keys_bytes / P::PUBLIC_KEY_SIZE;
        if key_count == 0 || key_count % 2 != 0 {
            return Err(ArtError::InvalidArgument("invalid number of public keys"));
        }

        let mut reader = Reader::new(bytes);
        let mut path_keys = Vec::with_capacity(key_count / 2);
        for _ in 0..key_count / 2 {
            let old = reader.read_public_key::<P>()?;
            let new = reader.read_public_key::<P>()?;
            path_keys.push((old, new));
        }
        let ephemeral_signature = reader.read_signature::<P>()?;
        let signature = reader.read_signature::<P>()?;
        reader.finish()?;

        Ok(Self {
            path_keys,
            ephemeral_signature,
            signature,
        })
    }

    /// Bytes covered by the outer signature.
    pub fn signed_bytes<P: CryptoProvider>(bytes: &[u8]) -> &[u8] {
        &bytes[..bytes.len().saturating_sub(P::SIGNATURE_SIZE)]
    }
}
