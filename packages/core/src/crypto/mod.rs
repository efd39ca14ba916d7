//! Field Encryption Primitives
//!
//! The [`FieldCipher`] trait is the narrow key-material contract the
//! encryption adapter depends on: encrypt/decrypt a string, randomized or
//! deterministic. [`AesFieldCipher`] is the bundled implementation. Where the
//! master key comes from (file, vault, environment) is left to the caller;
//! see [`crate::config::StoreConfig::cipher`].

mod cipher;
mod error;

pub use cipher::{AesFieldCipher, FieldCipher, KEY_LENGTH};
pub use error::CryptoError;
