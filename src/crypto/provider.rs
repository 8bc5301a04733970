// SPDX-License-Identifier: MIT OR Apache-2.0

//! Default cryptographic provider for the asynchronous ratcheting tree.
//!
//! Following algorithms are used:
//! * ChaCha random number generator with 20 rounds
//! * ECDH key agreement with X25519
//! * XEdDSA signatures on the same X25519 key pairs
//! * SHA2-256 hashing function
//! * HKDF with SHA256
//! * XChaCha20-Poly1305 AEAD with random nonces
use thiserror::Error;
use zeroize::Zeroizing;

use crate::crypto::hkdf::{self, HkdfError};
use crate::crypto::rng::{Rng, RngError};
use crate::crypto::sha2::sha2_256;
use crate::crypto::x25519::{self, X25519Error};
use crate::crypto::xchacha20::{self, XAeadError, XAeadNonce};
use crate::crypto::xeddsa::{self, XEdDSAError};
use crate::key_pair::{PublicKey, SecretKey, Signature};
use crate::traits::CryptoProvider;

#[derive(Debug, Default)]
pub struct Crypto {
    rng: Rng,
}

impl Crypto {
    pub fn new(rng: Rng) -> Self {
        Self { rng }
    }
}

#[cfg(any(test, feature = "test_utils"))]
impl Crypto {
    /// Deterministic provider for tests, never use this in production.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            rng: Rng::from_seed(seed),
        }
    }
}

fn to_array<const N: usize>(bytes: &[u8]) -> Result<Zeroizing<[u8; N]>, CryptoError> {
    if bytes.len() != N {
        return Err(CryptoError::InvalidKeySize {
            expected: N,
            actual: bytes.len(),
        });
    }
    let mut out = Zeroizing::new([0u8; N]);
    out.copy_from_slice(bytes);
    Ok(out)
}

impl CryptoProvider for Crypto {
    type Error = CryptoError;

    const PUBLIC_KEY_SIZE: usize = x25519::PUBLIC_KEY_SIZE;

    const SECRET_KEY_SIZE: usize = x25519::SECRET_KEY_SIZE;

    const SIGNATURE_SIZE: usize = xeddsa::SIGNATURE_SIZE;

    const ENCRYPTION_PREFIX_SIZE: usize = xchacha20::NONCE_SIZE;

    const ENCRYPTION_SUFFIX_SIZE: usize = xchacha20::TAG_SIZE;

    fn generate_secret_key(&self) -> Result<SecretKey, Self::Error> {
        let bytes = Zeroizing::new(self.rng.random_array::<{ x25519::SECRET_KEY_SIZE }>()?);
        Ok(SecretKey::from_bytes(bytes.to_vec()))
    }

    fn public_key(&self, secret_key: &SecretKey) -> Result<PublicKey, Self::Error> {
        let secret_key = to_array::<{ x25519::SECRET_KEY_SIZE }>(secret_key.as_bytes())?;
        Ok(PublicKey::from_bytes(
            x25519::public_key(&secret_key).to_vec(),
        ))
    }

    fn calculate_agreement(
        &self,
        secret_key: &SecretKey,
        public_key: &PublicKey,
    ) -> Result<SecretKey, Self::Error> {
        let secret_key = to_array::<{ x25519::SECRET_KEY_SIZE }>(secret_key.as_bytes())?;
        let public_key = to_array::<{ x25519::PUBLIC_KEY_SIZE }>(public_key.as_bytes())?;
        let shared_secret = Zeroizing::new(x25519::calculate_agreement(&secret_key, &public_key)?);
        Ok(SecretKey::from_bytes(shared_secret.to_vec()))
    }

    fn sign(&self, bytes: &[u8], secret_key: &SecretKey) -> Result<Signature, Self::Error> {
        let secret_key = to_array::<{ x25519::SECRET_KEY_SIZE }>(secret_key.as_bytes())?;
        let signature = xeddsa::xeddsa_sign(bytes, &secret_key, &self.rng)?;
        Ok(Signature::from_bytes(signature.to_vec()))
    }

    fn verify(&self, bytes: &[u8], public_key: &PublicKey, signature: &Signature) -> bool {
        let Ok(public_key) = to_array::<{ x25519::PUBLIC_KEY_SIZE }>(public_key.as_bytes()) else {
            return false;
        };
        let Ok(signature) = to_array::<{ xeddsa::SIGNATURE_SIZE }>(signature.as_bytes()) else {
            return false;
        };
        xeddsa::xeddsa_verify(bytes, &public_key, &signature).is_ok()
    }

    fn hash(&self, bytes: &[&[u8]]) -> Result<Vec<u8>, Self::Error> {
        Ok(sha2_256(bytes).to_vec())
    }

    fn hkdf(
        &self,
        salt: Option<&[u8]>,
        ikm: &[u8],
        info: Option<&[u8]>,
        length: usize,
    ) -> Result<Vec<u8>, Self::Error> {
        let key_material = hkdf::hkdf(salt, ikm, info, length)?;
        Ok(key_material)
    }

    fn encrypt(&self, plaintext: &[u8], key: &SecretKey) -> Result<Vec<u8>, Self::Error> {
        let key = to_array::<{ x25519::SECRET_KEY_SIZE }>(key.as_bytes())?;
        let nonce: XAeadNonce = self.rng.random_array()?;
        let ciphertext_tag = xchacha20::x_aead_encrypt(&key, plaintext, nonce, None)?;

        let mut ciphertext = Vec::with_capacity(nonce.len() + ciphertext_tag.len());
        ciphertext.extend_from_slice(&nonce);
        ciphertext.extend_from_slice(&ciphertext_tag);
        Ok(ciphertext)
    }

    fn decrypt(&self, ciphertext: &[u8], key: &SecretKey) -> Option<Vec<u8>> {
        if ciphertext.len() < xchacha20::NONCE_SIZE + xchacha20::TAG_SIZE {
            return None;
        }
        let key = to_array::<{ x25519::SECRET_KEY_SIZE }>(key.as_bytes()).ok()?;
        let (nonce, ciphertext_tag) = ciphertext.split_at(xchacha20::NONCE_SIZE);
        let mut nonce_bytes: XAeadNonce = [0u8; xchacha20::NONCE_SIZE];
        nonce_bytes.copy_from_slice(nonce);
        xchacha20::x_aead_decrypt(&key, ciphertext_tag, nonce_bytes, None).ok()
    }
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error(transparent)]
    Rng(#[from] RngError),

    #[error(transparent)]
    X25519(#[from] X25519Error),

    #[error(transparent)]
    XEdDSA(#[from] XEdDSAError),

    #[error(transparent)]
    XAead(#[from] XAeadError),

    #[error(transparent)]
    Hkdf(#[from] HkdfError),

    #[error("invalid key size, expected {expected} bytes but got {actual}")]
    InvalidKeySize { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use crate::key_pair::{KeyPair, PublicKey, SecretKey, Signature};
    use crate::traits::CryptoProvider;

    use super::{Crypto, CryptoError};

    #[test]
    fn agreement() {
        let crypto = Crypto::from_seed([1; 32]);

        let alice = KeyPair::generate(&crypto).unwrap();
        let bob = KeyPair::generate(&crypto).unwrap();

        let alice_shared = crypto
            .calculate_agreement(&alice.secret_key, &bob.public_key)
            .unwrap();
        let bob_shared = crypto
            .calculate_agreement(&bob.secret_key, &alice.public_key)
            .unwrap();
        assert_eq!(alice_shared, bob_shared);
        assert_eq!(alice_shared.len(), Crypto::SECRET_KEY_SIZE);
    }

    #[test]
    fn sign_and_verify() {
        let crypto = Crypto::from_seed([1; 32]);
        let key_pair = KeyPair::generate(&crypto).unwrap();

        let signature = crypto.sign(b"Hello, Panda!", &key_pair.secret_key).unwrap();
        assert_eq!(signature.as_bytes().len(), Crypto::SIGNATURE_SIZE);
        assert!(crypto.verify(b"Hello, Panda!", &key_pair.public_key, &signature));
        assert!(!crypto.verify(b"Hello, Penguin!", &key_pair.public_key, &signature));

        // Malformed inputs never verify.
        assert!(!crypto.verify(
            b"Hello, Panda!",
            &PublicKey::from_bytes(vec![1, 2, 3]),
            &signature
        ));
        assert!(!crypto.verify(
            b"Hello, Panda!",
            &key_pair.public_key,
            &Signature::from_bytes(vec![0; 12])
        ));
    }

    #[test]
    fn encrypt_and_decrypt() {
        let crypto = Crypto::from_seed([1; 32]);
        let key = crypto.generate_secret_key().unwrap();

        let ciphertext = crypto.encrypt(b"Hello, Panda!", &key).unwrap();
        assert_eq!(
            ciphertext.len(),
            Crypto::ENCRYPTION_PREFIX_SIZE + 13 + Crypto::ENCRYPTION_SUFFIX_SIZE
        );
        assert_eq!(
            crypto.decrypt(&ciphertext, &key),
            Some(b"Hello, Panda!".to_vec())
        );

        let other_key = crypto.generate_secret_key().unwrap();
        assert_eq!(crypto.decrypt(&ciphertext, &other_key), None);
        assert_eq!(crypto.decrypt(&ciphertext[..20], &key), None);

        let mut tampered = ciphertext.clone();
        tampered[30] ^= 1;
        assert_eq!(crypto.decrypt(&tampered, &key), None);
    }

    #[test]
    fn invalid_key_size() {
        let crypto = Crypto::from_seed([1; 32]);
        assert!(matches!(
            crypto.public_key(&SecretKey::from_bytes(vec![1; 16])),
            Err(CryptoError::InvalidKeySize {
                expected: 32,
                actual: 16
            })
        ));
    }

    #[test]
    fn hkdf_any_length() {
        let crypto = Crypto::from_seed([1; 32]);
        let okm = crypto.hkdf(None, b"ikm", Some(b"info"), 77).unwrap();
        assert_eq!(okm.len(), 77);
        assert_eq!(crypto.hash(&[b"a", b"b"]).unwrap().len(), 32);
    }
}
