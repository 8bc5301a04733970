// SPDX-License-Identifier: MIT OR Apache-2.0

#[cfg(not(test))]
use std::fmt;

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::ZeroizeOnDrop;

/// Generic container for sensitive bytes with best-effort security measures.
///
/// In particular this implementation provides:
/// 1. Zeroise memory on drop.
/// 2. Hide bytes value when printing debug info.
/// 3. Constant-time comparison implementation to prevent timing attacks.
///
/// Key lengths are defined by the crypto provider and not known at compile time, which is why the
/// bytes are kept on the heap.
#[derive(Clone, Eq, Serialize, Deserialize, ZeroizeOnDrop)]
#[cfg_attr(test, derive(Debug))]
pub struct Secret(#[serde(with = "serde_bytes")] Vec<u8>);

impl Secret {
    pub(crate) fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        // Constant-time comparison, slices of different length are never equal.
        bool::from(self.0.as_slice().ct_eq(other.0.as_slice()))
    }
}

#[cfg(not(test))]
impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Do not reveal secret values when printing debug info.
        f.debug_struct("Secret").field("value", &"***").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::Secret;

    #[test]
    fn constant_time_equality() {
        let secret_1 = Secret::from_bytes(vec![1, 2, 3]);
        let secret_2 = Secret::from_bytes(vec![1, 2, 3]);
        let secret_3 = Secret::from_bytes(vec![1, 2, 4]);
        let secret_4 = Secret::from_bytes(vec![1, 2]);

        assert_eq!(secret_1, secret_2);
        assert_ne!(secret_1, secret_3);
        assert_ne!(secret_1, secret_4);
    }
}
