// SPDX-License-Identifier: MIT OR Apache-2.0

//! Members of a tree: remote peers known by their public keys and the local peer holding secrets.
use crate::error::{ArtError, ArtResult};
use crate::key_pair::{KeyPair, PublicKey, Signature};
use crate::traits::CryptoProvider;

/// Public view of a group member.
///
/// A peer binds a rotating ephemeral key to a long-term identity key with a signature. A `Peer` can
/// only be constructed when this signature is valid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Peer {
    identity_key: PublicKey,
    ephemeral_key: PublicKey,
    ephemeral_signature: Signature,
}

impl Peer {
    pub fn new<P: CryptoProvider>(
        provider: &P,
        identity_key: PublicKey,
        ephemeral_key: PublicKey,
        ephemeral_signature: Signature,
    ) -> ArtResult<Self> {
        if !provider.verify(
            ephemeral_key.as_bytes(),
            &identity_key,
            &ephemeral_signature,
        ) {
            return Err(ArtError::InvalidSignature("invalid ephemeral key signature"));
        }

        Ok(Self {
            identity_key,
            ephemeral_key,
            ephemeral_signature,
        })
    }

    pub fn identity_key(&self) -> &PublicKey {
        &self.identity_key
    }

    pub fn ephemeral_key(&self) -> &PublicKey {
        &self.ephemeral_key
    }

    pub fn ephemeral_signature(&self) -> &Signature {
        &self.ephemeral_signature
    }

    /// Returns `true` if both identity and ephemeral key are the same.
    ///
    /// Signatures are randomized and not compared.
    pub fn is_same(&self, other: &Peer) -> bool {
        self.identity_key == other.identity_key && self.ephemeral_key == other.ephemeral_key
    }
}

/// The local group member, holding the secret parts of its identity and ephemeral key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalPeer {
    identity: KeyPair,
    ephemeral: KeyPair,
    ephemeral_signature: Signature,
}

impl LocalPeer {
    /// Signs the ephemeral key with the identity key.
    pub fn new<P: CryptoProvider>(
        provider: &P,
        identity: KeyPair,
        ephemeral: KeyPair,
    ) -> ArtResult<Self> {
        let ephemeral_signature = provider
            .sign(ephemeral.public_key.as_bytes(), &identity.secret_key)
            .map_err(ArtError::provider)?;
        Ok(Self {
            identity,
            ephemeral,
            ephemeral_signature,
        })
    }

    /// Generates a fresh identity and ephemeral key.
    pub fn generate<P: CryptoProvider>(provider: &P) -> ArtResult<Self> {
        let identity = KeyPair::generate(provider).map_err(ArtError::provider)?;
        let ephemeral = KeyPair::generate(provider).map_err(ArtError::provider)?;
        Self::new(provider, identity, ephemeral)
    }

    /// Another device of the same identity with a fresh ephemeral key.
    pub fn new_device<P: CryptoProvider>(&self, provider: &P) -> ArtResult<Self> {
        let ephemeral = KeyPair::generate(provider).map_err(ArtError::provider)?;
        Self::new(provider, self.identity.clone(), ephemeral)
    }

    pub fn identity(&self) -> &KeyPair {
        &self.identity
    }

    pub fn ephemeral(&self) -> &KeyPair {
        &self.ephemeral
    }

    pub fn ephemeral_signature(&self) -> &Signature {
        &self.ephemeral_signature
    }

    pub fn peer(&self) -> Peer {
        Peer {
            identity_key: self.identity.public_key.clone(),
            ephemeral_key: self.ephemeral.public_key.clone(),
            ephemeral_signature: self.ephemeral_signature.clone(),
        }
    }

    /// Returns `true` if the given peer describes this local peer.
    pub fn is(&self, peer: &Peer) -> bool {
        self.identity.public_key == peer.identity_key
            && self.ephemeral.public_key == peer.ephemeral_key
    }

    /// Replaces the ephemeral key and signs it with the identity key.
    pub(crate) fn rotate_ephemeral<P: CryptoProvider>(
        &mut self,
        provider: &P,
        ephemeral: KeyPair,
    ) -> ArtResult<()> {
        let ephemeral_signature = provider
            .sign(ephemeral.public_key.as_bytes(), &self.identity.secret_key)
            .map_err(ArtError::provider)?;
        self.ephemeral = ephemeral;
        self.ephemeral_signature = ephemeral_signature;
        Ok(())
    }
}
