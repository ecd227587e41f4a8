//! Envelope encryption engine for the Arx secrets service.
//!
//! Payloads are encrypted with AES-256-GCM under a Data-Encryption-Key
//! (DEK); DEKs are wrapped by a Key-Encryption-Key (KEK) held in a file
//! outside the database. Both keys are versioned: rotation introduces a new
//! version without invalidating ciphertexts written under older DEKs.
//!
//! Unwrapped key material never leaves this crate. Key containers zeroize
//! on drop, and failures surface only their typed kind.

mod engine;
mod keyfile;
mod keys;
mod recipient;

pub use engine::{ChunkingOptions, CryptoEngine, CryptoOptions, CryptoStatus};
pub use keyfile::{audit_key_file, fix_key_file_mode, KeyFileReport};
pub use recipient::{DerivedRecipientMaterial, RecipientMaterial};

/// Symmetric key size (AES-256).
pub const KEY_SIZE: usize = 32;

/// AES-GCM nonce size.
pub const NONCE_SIZE: usize = 12;
