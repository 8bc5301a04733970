// SPDX-License-Identifier: MIT OR Apache-2.0

//! Key material handled by the tree: public keys, secret keys, signatures and key pairs.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crypto::Secret;
use crate::traits::CryptoProvider;

/// Public key bytes as encoded by the crypto provider.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "serde_bytes")] Vec<u8>);

impl PublicKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Secret key bytes, zeroized on drop and never printed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretKey(Secret);

impl SecretKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(Secret::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.0.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.as_bytes().is_empty()
    }
}

/// Signature bytes as encoded by the crypto provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(#[serde(with = "serde_bytes")] Vec<u8>);

impl Signature {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Public key with its secret counter-part.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    pub public_key: PublicKey,
    pub secret_key: SecretKey,
}

impl KeyPair {
    /// Generates a fresh random key pair.
    pub fn generate<P: CryptoProvider>(provider: &P) -> Result<Self, P::Error> {
        let secret_key = provider.generate_secret_key()?;
        Self::from_secret_key(provider, secret_key)
    }

    /// Derives the public key for the given secret key.
    pub fn from_secret_key<P: CryptoProvider>(
        provider: &P,
        secret_key: SecretKey,
    ) -> Result<Self, P::Error> {
        let public_key = provider.public_key(&secret_key)?;
        Ok(Self {
            public_key,
            secret_key,
        })
    }
}
