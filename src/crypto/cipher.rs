//! Key derivation and the RC4 keystream

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rc4::cipher::consts::U32;
use rc4::cipher::generic_array::GenericArray;
use rc4::{KeyInit, Rc4, StreamCipher};
use sha2::{Digest, Sha256};

use crate::error::DecryptError;

/// Derive the 32-byte RC4 key: `SHA-256(secret ++ nonce)`.
pub fn derive_key(secret: &[u8], nonce: &[u8]) -> [u8; 32] {
    let digest = Sha256::new()
        .chain_update(secret)
        .chain_update(nonce)
        .finalize();

    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    key
}

/// RC4 with an optional number of leading keystream bytes discarded.
///
/// `keystream_drop = 0` is plain RC4 as the companion app's offline
/// tooling uses it. Some deployments of the same protocol discard the
/// first 1024 bytes; that variant is selected here rather than by
/// swapping the cipher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCipher {
    keystream_drop: usize,
}

impl SessionCipher {
    pub fn new(keystream_drop: usize) -> Self {
        Self { keystream_drop }
    }

    pub fn keystream_drop(&self) -> usize {
        self.keystream_drop
    }

    /// XOR `data` in place with a fresh keystream for `key`
    pub fn apply(&self, key: &[u8; 32], data: &mut [u8]) {
        let mut rc4 = Rc4::<U32>::new(GenericArray::from_slice(key));

        if self.keystream_drop > 0 {
            let mut discard = vec![0u8; self.keystream_drop];
            rc4.apply_keystream(&mut discard);
        }

        rc4.apply_keystream(data);
    }

    /// Decrypt base64 ciphertext with base64 secret and nonce.
    ///
    /// All three inputs are decoded before any keystream is produced, so
    /// a decode failure never yields partial output.
    pub fn decrypt(
        &self,
        ciphertext_b64: &str,
        secret_b64: &str,
        nonce_b64: &str,
    ) -> Result<Vec<u8>, DecryptError> {
        let mut data = decode_field("ciphertext", ciphertext_b64)?;
        let secret = decode_field("ssecurity", secret_b64)?;
        let nonce = decode_field("nonce", nonce_b64)?;

        let key = derive_key(&secret, &nonce);
        self.apply(&key, &mut data);
        Ok(data)
    }

    /// Encrypt raw bytes, returning base64 ciphertext
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        secret_b64: &str,
        nonce_b64: &str,
    ) -> Result<String, DecryptError> {
        let secret = decode_field("ssecurity", secret_b64)?;
        let nonce = decode_field("nonce", nonce_b64)?;

        let key = derive_key(&secret, &nonce);
        let mut data = plaintext.to_vec();
        self.apply(&key, &mut data);
        Ok(BASE64.encode(data))
    }
}

/// Decrypt with plain RC4 (no keystream drop).
pub fn decrypt(
    ciphertext_b64: &str,
    secret_b64: &str,
    nonce_b64: &str,
) -> Result<Vec<u8>, DecryptError> {
    SessionCipher::default().decrypt(ciphertext_b64, secret_b64, nonce_b64)
}

/// Encrypt with plain RC4 (no keystream drop).
pub fn encrypt(plaintext: &[u8], secret_b64: &str, nonce_b64: &str) -> Result<String, DecryptError> {
    SessionCipher::default().encrypt(plaintext, secret_b64, nonce_b64)
}

fn decode_field(field: &'static str, value: &str) -> Result<Vec<u8>, DecryptError> {
    BASE64
        .decode(value)
        .map_err(|source| DecryptError::Decode { field, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "c2Vzc2lvbi1zZWNyZXQ=";
    const NONCE: &str = "AAECAwQFBgc=";

    #[test]
    fn test_derive_key_is_sha256_of_concatenation() {
        let key = derive_key(b"ab", b"c");
        let expected = Sha256::digest(b"abc");
        assert_eq!(&key[..], &expected[..]);

        // Order matters: secret first, then nonce
        assert_ne!(derive_key(b"c", b"ab"), key);
    }

    #[test]
    fn test_rc4_known_vector() {
        // RFC 6229-style check through the crate: key "Key", plaintext "Plaintext"
        let mut rc4 = Rc4::<rc4::cipher::consts::U3>::new(GenericArray::from_slice(b"Key"));
        let mut data = b"Plaintext".to_vec();
        rc4.apply_keystream(&mut data);
        assert_eq!(data, [0xBB, 0xF3, 0x16, 0xE8, 0xD9, 0x40, 0xAF, 0x0A, 0xD3]);
    }

    #[test]
    fn test_decrypt_recovers_plaintext() {
        let plaintext = br#"{"code":0,"result":{"list":[]}}"#;
        let ciphertext = encrypt(plaintext, SECRET, NONCE).unwrap();
        assert_ne!(ciphertext.as_bytes(), plaintext);

        let recovered = decrypt(&ciphertext, SECRET, NONCE).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn test_decrypt_empty_plaintext() {
        let ciphertext = encrypt(b"", SECRET, NONCE).unwrap();
        assert_eq!(ciphertext, "");
        assert!(decrypt("", SECRET, NONCE).unwrap().is_empty());
    }

    #[test]
    fn test_decrypt_matches_manual_keystream() {
        let secret = BASE64.decode(SECRET).unwrap();
        let nonce = BASE64.decode(NONCE).unwrap();
        let key = derive_key(&secret, &nonce);

        let mut expected = b"hello".to_vec();
        let mut rc4 = Rc4::<U32>::new(GenericArray::from_slice(&key));
        rc4.apply_keystream(&mut expected);

        let decrypted = decrypt(&BASE64.encode(&expected), SECRET, NONCE).unwrap();
        assert_eq!(decrypted, b"hello");
    }

    #[test]
    fn test_invalid_base64_is_rejected() {
        let err = decrypt("!!!", SECRET, NONCE).unwrap_err();
        assert!(matches!(err, DecryptError::Decode { field: "ciphertext", .. }));

        let err = decrypt("AAAA", "!!!", NONCE).unwrap_err();
        assert!(matches!(err, DecryptError::Decode { field: "ssecurity", .. }));

        let err = decrypt("AAAA", SECRET, "not base64!").unwrap_err();
        assert!(matches!(err, DecryptError::Decode { field: "nonce", .. }));
    }

    #[test]
    fn test_keystream_drop_changes_output() {
        let plain = SessionCipher::default();
        let dropped = SessionCipher::new(1024);

        let ciphertext = dropped.encrypt(b"payload", SECRET, NONCE).unwrap();
        assert_ne!(plain.decrypt(&ciphertext, SECRET, NONCE).unwrap(), b"payload");
        assert_eq!(dropped.decrypt(&ciphertext, SECRET, NONCE).unwrap(), b"payload");
    }
}
