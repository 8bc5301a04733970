// SPDX-License-Identifier: MIT OR Apache-2.0

use std::error::Error;

use crate::key_pair::{PublicKey, SecretKey, Signature};

/// Provider for Diffie-Hellman key agreement, digital signatures on the same key pairs,
/// cryptographically secure hashing, key derivation (HKDF) and authenticated symmetric
/// encryption.
///
/// Every tree operation receives the provider as an explicit argument, the tree itself never keeps
/// a reference to it. Key sizes are fixed per provider and all byte layouts of the wire formats
/// are derived from them.
pub trait CryptoProvider {
    type Error: Error + Send + Sync + 'static;

    /// Length of an encoded public key in bytes.
    const PUBLIC_KEY_SIZE: usize;

    /// Length of a secret key in bytes.
    const SECRET_KEY_SIZE: usize;

    /// Length of an encoded signature in bytes.
    const SIGNATURE_SIZE: usize;

    /// Bytes added in front of every ciphertext (for example a nonce).
    const ENCRYPTION_PREFIX_SIZE: usize;

    /// Bytes added after every ciphertext (for example an authentication tag).
    const ENCRYPTION_SUFFIX_SIZE: usize;

    /// Generates a fresh, uniformly random secret key.
    fn generate_secret_key(&self) -> Result<SecretKey, Self::Error>;

    /// Returns the public key matching any secret key of the right size.
    ///
    /// Arbitrary bytes (for example HKDF output) are accepted as secret keys.
    fn public_key(&self, secret_key: &SecretKey) -> Result<PublicKey, Self::Error>;

    /// Diffie-Hellman agreement between a secret key and someone else's public key.
    fn calculate_agreement(
        &self,
        secret_key: &SecretKey,
        public_key: &PublicKey,
    ) -> Result<SecretKey, Self::Error>;

    fn sign(&self, bytes: &[u8], secret_key: &SecretKey) -> Result<Signature, Self::Error>;

    /// Returns `true` if the signature was created over the bytes by the secret counter-part of
    /// the given public key.
    fn verify(&self, bytes: &[u8], public_key: &PublicKey, signature: &Signature) -> bool;

    /// Hashes the concatenation of all given byte slices.
    fn hash(&self, bytes: &[&[u8]]) -> Result<Vec<u8>, Self::Error>;

    fn hkdf(
        &self,
        salt: Option<&[u8]>,
        ikm: &[u8],
        info: Option<&[u8]>,
        length: usize,
    ) -> Result<Vec<u8>, Self::Error>;

    /// Encrypts the plaintext with a symmetric key.
    ///
    /// The returned ciphertext is exactly `ENCRYPTION_PREFIX_SIZE + plaintext.len() +
    /// ENCRYPTION_SUFFIX_SIZE` bytes long.
    fn encrypt(&self, plaintext: &[u8], key: &SecretKey) -> Result<Vec<u8>, Self::Error>;

    /// Decrypts a ciphertext created by `encrypt`, returns `None` if authentication failed.
    fn decrypt(&self, ciphertext: &[u8], key: &SecretKey) -> Option<Vec<u8>>;
}
