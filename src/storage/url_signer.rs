//! HMAC-SHA256 signatures for time-limited asset URLs.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature expired")]
    Expired,
    #[error("signature mismatch")]
    Mismatch,
}

/// Signs `(path, expires)` pairs with a server-side secret.
#[derive(Clone)]
pub struct UrlSigner {
    mac: HmacSha256,
}

impl UrlSigner {
    pub fn new(secret: &[u8]) -> Self {
        UrlSigner {
            mac: HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length"),
        }
    }

    fn keyed(&self, path: &str, expires: i64) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(format!("{}\n{}", path, expires).as_bytes());
        mac
    }

    /// URL-safe base64 signature of `path` valid until `expires` (epoch seconds).
    pub fn sign(&self, path: &str, expires: i64) -> String {
        URL_SAFE_NO_PAD.encode(self.keyed(path, expires).finalize().into_bytes())
    }

    pub fn verify(
        &self,
        path: &str,
        expires: i64,
        signature: &str,
        now: i64,
    ) -> Result<(), SignatureError> {
        let provided = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| SignatureError::Mismatch)?;
        self.keyed(path, expires)
            .verify_slice(&provided)
            .map_err(|_| SignatureError::Mismatch)?;
        if now > expires {
            return Err(SignatureError::Expired);
        }
        Ok(())
    }
}
