//! Payload decryption
//!
//! Recovers plaintext bodies from captured ciphertext. The key is the
//! SHA-256 digest of the session secret followed by the per-exchange
//! nonce; the body is an RC4 keystream XOR under that key.

mod cipher;
mod record;

pub use cipher::{decrypt, derive_key, encrypt, SessionCipher};
pub use record::{DecryptedExchange, ExchangeRecord};
