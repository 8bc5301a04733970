// SPDX-License-Identifier: MIT OR Apache-2.0

//! Interfaces to plug cryptographic primitives into the asynchronous ratcheting tree.
mod provider;

pub use provider::CryptoProvider;
