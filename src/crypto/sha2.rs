// SPDX-License-Identifier: MIT OR Apache-2.0

//! SHA2 hashing functions.
use sha2::{Digest, Sha256, Sha512};

pub const SHA512_DIGEST_SIZE: usize = 64;

pub const SHA256_DIGEST_SIZE: usize = 32;

/// SHA2-512 hashing function, used internally by XEdDSA.
pub fn sha2_512(messages: &[&[u8]]) -> [u8; SHA512_DIGEST_SIZE] {
    let mut hasher = Sha512::new();
    for message in messages {
        hasher.update(message);
    }
    let mut out = [0u8; SHA512_DIGEST_SIZE];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// SHA2-256 hashing function.
pub fn sha2_256(messages: &[&[u8]]) -> [u8; SHA256_DIGEST_SIZE] {
    let mut hasher = Sha256::new();
    for message in messages {
        hasher.update(message);
    }
    let mut out = [0u8; SHA256_DIGEST_SIZE];
    out.copy_from_slice(&hasher.finalize());
    out
}

#[cfg(test)]
mod tests {
    use super::sha2_256;

    #[test]
    fn hashes_concatenation() {
        assert_eq!(
            sha2_256(&[b"Hello, ", b"Panda!"]),
            sha2_256(&[b"Hello, Panda!"])
        );
        assert_ne!(sha2_256(&[b"Hello"]), sha2_256(&[b"Panda"]));
    }
}
