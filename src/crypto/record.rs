//! Offline exchange records

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::SessionCipher;
use crate::error::DecryptError;

/// A captured exchange as stored for offline decryption
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeRecord {
    /// Session secret (base64)
    pub ssecurity: String,

    /// Cryptographic nonce (base64). Not the correlation token.
    pub nonce: String,

    /// Request ciphertext (base64)
    pub req_data: String,

    /// Response ciphertext (base64)
    pub res_data: String,
}

/// Both plaintexts of one exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptedExchange {
    pub request: Vec<u8>,
    pub response: Vec<u8>,
}

impl ExchangeRecord {
    /// Read a record from a JSON file
    pub fn from_path(path: &Path) -> Result<Self, DecryptError> {
        let contents = std::fs::read_to_string(path).map_err(|source| DecryptError::ReadRecord {
            path: path.display().to_string(),
            source,
        })?;

        Ok(serde_json::from_str(&contents)?)
    }

    /// Decrypt both directions with the record's single secret/nonce pair
    pub fn decrypt(&self, cipher: &SessionCipher) -> Result<DecryptedExchange, DecryptError> {
        let request = cipher.decrypt(&self.req_data, &self.ssecurity, &self.nonce)?;
        let response = cipher.decrypt(&self.res_data, &self.ssecurity, &self.nonce)?;

        Ok(DecryptedExchange { request, response })
    }
}

impl DecryptedExchange {
    pub fn request_text(&self) -> String {
        String::from_utf8_lossy(&self.request).to_string()
    }

    pub fn response_text(&self) -> String {
        String::from_utf8_lossy(&self.response).to_string()
    }
}
