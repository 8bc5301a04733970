// SPDX-License-Identifier: MIT OR Apache-2.0

//! X3DH-style key exchange deriving the blinded leaf keys and shared secrets for new members.
//!
//! Both sides combine four Diffie-Hellman agreements between two identity keys, the member's
//! ephemeral key and a fresh exchange key of the sender. The result is only reproducible with the
//! secret part of the exchange key, which is discarded by the sender after use, or with the secret
//! ephemeral key of the receiver.
use crate::error::{ArtError, ArtResult};
use crate::key_pair::{KeyPair, PublicKey, SecretKey};
use crate::traits::CryptoProvider;

/// Derives a shared secret towards a remote member.
///
/// ```text
/// H(DH(IK_a, IK_b) || DH(IK_a, EK_b) || DH(XK_a, IK_b) || DH(XK_a, EK_b))
/// ```
pub fn key_exchange_send<P: CryptoProvider>(
    provider: &P,
    our_identity: &KeyPair,
    their_identity_key: &PublicKey,
    exchange: &KeyPair,
    their_ephemeral_key: &PublicKey,
) -> ArtResult<SecretKey> {
    let agreements = [
        (&our_identity.secret_key, their_identity_key),
        (&our_identity.secret_key, their_ephemeral_key),
        (&exchange.secret_key, their_identity_key),
        (&exchange.secret_key, their_ephemeral_key),
    ];
    combine(provider, &agreements)
}

/// Derives the same shared secret as [`key_exchange_send`] on the receiving side.
///
/// ```text
/// H(DH(IK_b, IK_a) || DH(EK_b, IK_a) || DH(IK_b, XK_a) || DH(EK_b, XK_a))
/// ```
pub fn key_exchange_receive<P: CryptoProvider>(
    provider: &P,
    our_identity: &KeyPair,
    their_identity_key: &PublicKey,
    our_ephemeral: &KeyPair,
    their_exchange_key: &PublicKey,
) -> ArtResult<SecretKey> {
    let agreements = [
        (&our_identity.secret_key, their_identity_key),
        (&our_ephemeral.secret_key, their_identity_key),
        (&our_identity.secret_key, their_exchange_key),
        (&our_ephemeral.secret_key, their_exchange_key),
    ];
    combine(provider, &agreements)
}

fn combine<P: CryptoProvider>(
    provider: &P,
    agreements: &[(&SecretKey, &PublicKey); 4],
) -> ArtResult<SecretKey> {
    let mut shared_secrets = Vec::with_capacity(agreements.len());
    for (secret_key, public_key) in agreements {
        let shared_secret = provider
            .calculate_agreement(secret_key, public_key)
            .map_err(ArtError::provider)?;
        shared_secrets.push(shared_secret);
    }

    let inputs: Vec<&[u8]> = shared_secrets.iter().map(|s| s.as_bytes()).collect();
    let digest = provider.hash(&inputs).map_err(ArtError::provider)?;

    // The digest is used as a secret key directly.
    if digest.len() != P::SECRET_KEY_SIZE {
        return Err(ArtError::InconsistentState(
            "hash output length does not match secret key size",
        ));
    }

    Ok(SecretKey::from_bytes(digest))
}
