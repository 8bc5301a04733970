// SPDX-License-Identifier: MIT OR Apache-2.0

//! Elliptic-curve Diffie–Hellman (ECDH) key agreement scheme (X25519).
use thiserror::Error;
use x25519_dalek::{PublicKey as DalekPublicKey, StaticSecret};

/// 256-bit secret key size.
pub const SECRET_KEY_SIZE: usize = 32;

/// 256-bit public key size.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Clamps arbitrary 32 bytes into a valid Curve25519 scalar.
///
/// Secret keys in the tree are derived with HKDF, so they are clamped whenever they get used
/// instead of when they get created.
pub fn clamp(bytes: [u8; SECRET_KEY_SIZE]) -> [u8; SECRET_KEY_SIZE] {
    let mut bytes = bytes;
    bytes[0] &= 248u8;
    bytes[31] &= 127u8;
    bytes[31] |= 64u8;
    bytes
}

pub fn public_key(secret_key: &[u8; SECRET_KEY_SIZE]) -> [u8; PUBLIC_KEY_SIZE] {
    let secret = StaticSecret::from(clamp(*secret_key));
    DalekPublicKey::from(&secret).to_bytes()
}

pub fn calculate_agreement(
    secret_key: &[u8; SECRET_KEY_SIZE],
    their_public_key: &[u8; PUBLIC_KEY_SIZE],
) -> Result<[u8; SECRET_KEY_SIZE], X25519Error> {
    let secret = StaticSecret::from(clamp(*secret_key));
    let shared_secret = secret.diffie_hellman(&DalekPublicKey::from(*their_public_key));

    // Reject low-order points which would force the shared secret to zero.
    if !shared_secret.was_contributory() {
        return Err(X25519Error::NonContributory);
    }

    Ok(shared_secret.to_bytes())
}

#[derive(Debug, Error)]
pub enum X25519Error {
    #[error("diffie-hellman with low-order public key is not contributory")]
    NonContributory,
}

#[cfg(test)]
mod tests {
    use crate::crypto::Rng;

    use super::{X25519Error, calculate_agreement, clamp, public_key};

    #[test]
    fn diffie_hellmann() {
        let rng = Rng::from_seed([1; 32]);

        let alice_secret_key = rng.random_array().unwrap();
        let alice_public_key = public_key(&alice_secret_key);

        let bob_secret_key = rng.random_array().unwrap();
        let bob_public_key = public_key(&bob_secret_key);

        let alice_shared_secret = calculate_agreement(&alice_secret_key, &bob_public_key).unwrap();
        let bob_shared_secret = calculate_agreement(&bob_secret_key, &alice_public_key).unwrap();

        assert_eq!(alice_shared_secret, bob_shared_secret);
    }

    #[test]
    fn clamping_is_idempotent() {
        let rng = Rng::from_seed([2; 32]);
        let secret_key: [u8; 32] = rng.random_array().unwrap();
        assert_eq!(public_key(&secret_key), public_key(&clamp(secret_key)));
        assert_eq!(clamp(secret_key), clamp(clamp(secret_key)));
    }

    #[test]
    fn low_order_point() {
        let rng = Rng::from_seed([3; 32]);
        let secret_key = rng.random_array().unwrap();
        assert!(matches!(
            calculate_agreement(&secret_key, &[0u8; 32]),
            Err(X25519Error::NonContributory)
        ));
    }
}
