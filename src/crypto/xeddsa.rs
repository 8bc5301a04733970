// SPDX-License-Identifier: MIT OR Apache-2.0

//! XEdDSA enables use of a single key pair format for both x25519 elliptic curve Diffie-Hellman
//! and Ed25199 signatures.
//!
//! <https://signal.org/docs/specifications/xeddsa/>
use curve25519_dalek::constants::ED25519_BASEPOINT_TABLE;
use curve25519_dalek::edwards::CompressedEdwardsY;
use curve25519_dalek::{EdwardsPoint, MontgomeryPoint, Scalar};
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::crypto::sha2::sha2_512;
use crate::crypto::x25519::{PUBLIC_KEY_SIZE, SECRET_KEY_SIZE, clamp};
use crate::crypto::{Rng, RngError};

/// 512-bit signature.
pub const SIGNATURE_SIZE: usize = 64;

/// Domain separation for hash1: 0xFE followed by 31 bytes of 0xFF.
const HASH_1_PREFIX: [u8; 32] = {
    let mut prefix = [0xFF; 32];
    prefix[0] = 0xFE;
    prefix
};

/// Edwards public key with sign bit cleared and the matching private scalar.
///
/// The scalar is negated when the Edwards point has its sign bit set, so that signatures verify
/// against the Montgomery public key alone.
fn calculate_key_pair(secret_key: &[u8; SECRET_KEY_SIZE]) -> (CompressedEdwardsY, Scalar) {
    let k = Scalar::from_bytes_mod_order(clamp(*secret_key));
    let mut public_key = (&k * ED25519_BASEPOINT_TABLE).compress();
    let sign_bit = public_key.0[31] >> 7;
    public_key.0[31] &= 0b0111_1111_u8;
    let private_scalar = if sign_bit == 1 { -k } else { k };
    (public_key, private_scalar)
}

/// Calculates an XEdDSA signature using the X25519 secret key directly.
pub fn xeddsa_sign(
    bytes: &[u8],
    secret_key: &[u8; SECRET_KEY_SIZE],
    rng: &Rng,
) -> Result<[u8; SIGNATURE_SIZE], XEdDSAError> {
    let (public_key, a) = calculate_key_pair(secret_key);
    let nonce: [u8; SIGNATURE_SIZE] = rng.random_array()?;

    // r = hash1(a || M || Z)
    let r = Scalar::from_bytes_mod_order_wide(&sha2_512(&[
        &HASH_1_PREFIX,
        a.as_bytes(),
        bytes,
        &nonce,
    ]));
    let cap_r = (&r * ED25519_BASEPOINT_TABLE).compress();

    // s = r + hash(R || A || M) * a
    let h = Scalar::from_bytes_mod_order_wide(&sha2_512(&[
        cap_r.as_bytes(),
        public_key.as_bytes(),
        bytes,
    ]));
    let s = r + h * a;

    let mut signature = [0u8; SIGNATURE_SIZE];
    signature[..32].copy_from_slice(cap_r.as_bytes());
    signature[32..].copy_from_slice(s.as_bytes());
    Ok(signature)
}

/// Verifies a XEdDSA signature on provided data using the X25519 public counter-part.
pub fn xeddsa_verify(
    bytes: &[u8],
    their_public_key: &[u8; PUBLIC_KEY_SIZE],
    signature: &[u8; SIGNATURE_SIZE],
) -> Result<(), XEdDSAError> {
    let (cap_r, s) = signature.split_at(32);
    let mut s_bytes = [0u8; 32];
    s_bytes.copy_from_slice(s);

    // s must be reduced, excess bits are rejected.
    if s_bytes[31] & 0b1110_0000_u8 != 0 {
        return Err(XEdDSAError::InvalidArgument);
    }

    // Montgomery u-coordinate to Edwards point with positive sign.
    let a = MontgomeryPoint(*their_public_key)
        .to_edwards(0)
        .ok_or(XEdDSAError::InvalidArgument)?;

    let h = Scalar::from_bytes_mod_order_wide(&sha2_512(&[
        cap_r,
        a.compress().as_bytes(),
        bytes,
    ]));

    // R == sB - hA
    let cap_r_check = EdwardsPoint::vartime_double_scalar_mul_basepoint(
        &h,
        &-a,
        &Scalar::from_bytes_mod_order(s_bytes),
    )
    .compress();

    if bool::from(cap_r_check.as_bytes().ct_eq(cap_r)) {
        Ok(())
    } else {
        Err(XEdDSAError::VerificationFailed)
    }
}

#[derive(Debug, Error)]
pub enum XEdDSAError {
    #[error(transparent)]
    Rng(#[from] RngError),

    #[error("invalid xeddsa public key or signature")]
    InvalidArgument,

    #[error("signature does not match public key and bytes")]
    VerificationFailed,
}

#[cfg(test)]
mod tests {
    use crate::crypto::Rng;
    use crate::crypto::x25519::public_key;

    use super::{XEdDSAError, xeddsa_sign, xeddsa_verify};

    #[test]
    fn xeddsa_signatures() {
        let rng = Rng::from_seed([1; 32]);

        let secret_key = rng.random_array().unwrap();
        let public_key = public_key(&secret_key);

        let signature = xeddsa_sign(b"Hello, Panda!", &secret_key, &rng).unwrap();
        assert!(xeddsa_verify(b"Hello, Panda!", &public_key, &signature).is_ok());
    }

    #[test]
    fn unclamped_secret_keys() {
        let rng = Rng::from_seed([4; 32]);

        // Raw HKDF output is used as secret key, clamping happens internally.
        let secret_key = [0xFFu8; 32];
        let public_key = public_key(&secret_key);

        let signature = xeddsa_sign(b"Hello, Panda!", &secret_key, &rng).unwrap();
        assert!(xeddsa_verify(b"Hello, Panda!", &public_key, &signature).is_ok());
    }

    #[test]
    fn failed_verify() {
        let rng = Rng::from_seed([1; 32]);

        let secret_key = rng.random_array().unwrap();
        let valid_public_key = public_key(&secret_key);
        let signature = xeddsa_sign(b"Hello, Panda!", &secret_key, &rng).unwrap();

        let invalid_secret_key = rng.random_array().unwrap();
        let invalid_public_key = public_key(&invalid_secret_key);
        let invalid_signature = xeddsa_sign(b"Hello, Panda!", &invalid_secret_key, &rng).unwrap();

        assert_ne!(valid_public_key, invalid_public_key);
        assert_ne!(signature, invalid_signature);

        assert!(matches!(
            xeddsa_verify(b"Invalid Data", &valid_public_key, &signature),
            Err(XEdDSAError::VerificationFailed)
        ));
        assert!(matches!(
            xeddsa_verify(b"Hello, Panda!", &invalid_public_key, &signature),
            Err(XEdDSAError::VerificationFailed)
        ));
        assert!(matches!(
            xeddsa_verify(b"Hello, Panda!", &valid_public_key, &invalid_signature),
            Err(XEdDSAError::VerificationFailed)
        ));
    }
}
