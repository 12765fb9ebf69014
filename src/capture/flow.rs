//! Correlated request/response exchange

use chrono::{DateTime, Duration, Utc};

use crate::crypto::{DecryptedExchange, SessionCipher};
use crate::error::DecryptError;

/// One request/response exchange, keyed by its correlation token
#[derive(Debug, Clone)]
pub struct Flow {
    /// Correlation token assigned by the capture script
    pub token: String,

    /// HTTP method
    pub method: String,

    /// Request route
    pub route: String,

    /// Body captured at request time
    pub request_body: String,

    /// Body captured at response time (None until the response arrives)
    pub response_body: Option<String>,

    /// Session secret (`ssecurity`) seen with either message
    pub session_secret: Option<String>,

    /// When the request was seen
    pub opened_at: DateTime<Utc>,

    /// When the response was seen
    pub completed_at: Option<DateTime<Utc>>,

    /// Decrypted bodies, when body decryption is enabled
    pub plaintext: Option<DecryptedExchange>,
}

impl Flow {
    pub fn open(token: &str, method: &str, route: &str, request_body: &str) -> Self {
        Self {
            token: token.to_string(),
            method: method.to_string(),
            route: route.to_string(),
            request_body: request_body.to_string(),
            response_body: None,
            session_secret: None,
            opened_at: Utc::now(),
            completed_at: None,
            plaintext: None,
        }
    }

    /// Attach the response half
    pub(crate) fn complete(&mut self, response_body: String, session_secret: Option<String>) {
        self.response_body = Some(response_body);
        if self.session_secret.is_none() {
            self.session_secret = session_secret;
        }
        self.completed_at = Some(Utc::now());
    }

    pub fn is_complete(&self) -> bool {
        self.response_body.is_some()
    }

    /// Time between request and response, if complete
    pub fn elapsed(&self) -> Option<Duration> {
        self.completed_at.map(|done| done - self.opened_at)
    }

    /// Decrypt both bodies with this flow's session secret and the given
    /// cryptographic nonce (base64).
    pub fn decrypt_bodies(
        &self,
        cipher: &SessionCipher,
        nonce_b64: &str,
    ) -> Result<DecryptedExchange, DecryptError> {
        let secret = self
            .session_secret
            .as_deref()
            .ok_or_else(|| DecryptError::MissingSessionSecret {
                token: self.token.clone(),
            })?;

        let request = cipher.decrypt(&self.request_body, secret, nonce_b64)?;
        let response = match &self.response_body {
            Some(body) => cipher.decrypt(body, secret, nonce_b64)?,
            None => Vec::new(),
        };

        Ok(DecryptedExchange { request, response })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::encrypt;

    #[test]
    fn test_open_and_complete() {
        let mut flow = Flow::open("abc", "GET", "/user/get_bound_devices", "Q0lQSEVS");
        assert!(!flow.is_complete());
        assert!(flow.elapsed().is_none());

        flow.complete("UkVTVUxU".to_string(), Some("c2Vj".to_string()));
        assert!(flow.is_complete());
        assert_eq!(flow.response_body.as_deref(), Some("UkVTVUxU"));
        assert_eq!(flow.session_secret.as_deref(), Some("c2Vj"));
        assert!(flow.elapsed().unwrap() >= Duration::zero());
    }

    #[test]
    fn test_request_secret_is_kept() {
        let mut flow = Flow::open("abc", "POST", "/r", "");
        flow.session_secret = Some("first".to_string());
        flow.complete(String::new(), Some("second".to_string()));
        assert_eq!(flow.session_secret.as_deref(), Some("first"));
    }

    #[test]
    fn test_decrypt_bodies() {
        let secret = "c2Vzc2lvbg==";
        let nonce = "AAECAwQFBgc=";

        let mut flow = Flow::open("t", "POST", "/r", &encrypt(b"ping", secret, nonce).unwrap());
        flow.complete(encrypt(b"pong", secret, nonce).unwrap(), Some(secret.to_string()));

        let plain = flow.decrypt_bodies(&SessionCipher::default(), nonce).unwrap();
        assert_eq!(plain.request, b"ping");
        assert_eq!(plain.response, b"pong");
    }

    #[test]
    fn test_decrypt_without_secret() {
        let flow = Flow::open("t", "GET", "/r", "");
        assert!(matches!(
            flow.decrypt_bodies(&SessionCipher::default(), "AA=="),
            Err(DecryptError::MissingSessionSecret { .. })
        ));
    }
}
