//! Signed delivery URLs in the edge server's `secure_link` format.
//!
//! `<base><path>?md5=<base64url(md5("{expires}{path} {secret}"))>&expires=<unix>`
//!
//! Nothing is stored per URL. The edge recomputes the digest from the path and
//! the presented expiry, so rotating the secret invalidates every outstanding
//! link.

use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("resource path must start with '/' and contain no query or fragment")]
    InvalidPath,
    #[error("signed url is missing the {0} parameter")]
    MissingParameter(&'static str),
    #[error("signature does not match")]
    Mismatch,
    #[error("signed url has expired")]
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

pub struct UrlSigner {
    secret: String,
    base_url: String,
}

fn normalize_path(resource_path: &str) -> Result<String, SignatureError> {
    if resource_path.is_empty() || resource_path.contains(['?', '#']) {
        return Err(SignatureError::InvalidPath);
    }
    if resource_path.starts_with('/') {
        Ok(resource_path.to_string())
    } else {
        Ok(format!("/{resource_path}"))
    }
}

impl UrlSigner {
    pub fn new(secret: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Digest the edge expects for `path` valid until `expires` (unix seconds).
    pub fn signature(&self, path: &str, expires: i64) -> String {
        let digest = md5::compute(format!("{}{} {}", expires, path, self.secret));
        URL_SAFE_NO_PAD.encode(digest.0)
    }

    pub fn sign(&self, resource_path: &str, ttl: Duration) -> Result<SignedUrl, SignatureError> {
        self.sign_at(resource_path, ttl, Utc::now())
    }

    pub fn sign_at(
        &self,
        resource_path: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<SignedUrl, SignatureError> {
        let path = normalize_path(resource_path)?;
        let expires = now.timestamp() + ttl.as_secs() as i64;
        let expires_at = DateTime::from_timestamp(expires, 0).ok_or(SignatureError::InvalidPath)?;

        let url = format!(
            "{}{}?md5={}&expires={}",
            self.base_url,
            path,
            self.signature(&path, expires),
            expires
        );
        Ok(SignedUrl { url, expires_at })
    }

    /// The edge-side check: the digest must match and `now` must not be past
    /// `expires`.
    pub fn verify(
        &self,
        path: &str,
        md5: &str,
        expires: i64,
        now: DateTime<Utc>,
    ) -> Result<(), SignatureError> {
        let expected = self.signature(path, expires);
        if !constant_time_eq(expected.as_bytes(), md5.as_bytes()) {
            return Err(SignatureError::Mismatch);
        }
        if now.timestamp() > expires {
            return Err(SignatureError::Expired);
        }
        Ok(())
    }

    /// Splits a URL produced by [`sign`](Self::sign) and verifies it.
    pub fn verify_url(&self, url: &str, now: DateTime<Utc>) -> Result<(), SignatureError> {
        let rest = url.strip_prefix(self.base_url.as_str()).unwrap_or(url);
        let (path, query) = rest
            .split_once('?')
            .ok_or(SignatureError::MissingParameter("md5"))?;

        let mut md5 = None;
        let mut expires = None;
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("md5", value)) => md5 = Some(value),
                Some(("expires", value)) => expires = value.parse::<i64>().ok(),
                _ => {}
            }
        }

        self.verify(
            path,
            md5.ok_or(SignatureError::MissingParameter("md5"))?,
            expires.ok_or(SignatureError::MissingParameter("expires"))?,
            now,
        )
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn url_has_edge_format() {
        let signer = UrlSigner::new("s3cret", "https://cdn.example.com/");
        let signed = signer
            .sign_at("media/42/master.m3u8", Duration::from_secs(600), now())
            .unwrap();

        let expires = now().timestamp() + 600;
        assert_eq!(signed.expires_at.timestamp(), expires);
        assert!(signed.url.starts_with("https://cdn.example.com/media/42/master.m3u8?md5="));
        assert!(signed.url.ends_with(&format!("&expires={expires}")));

        let md5 = signed.url.split("md5=").nth(1).unwrap().split('&').next().unwrap();
        assert_eq!(md5.len(), 22);
        assert!(!md5.contains(['+', '/', '=']));
    }

    #[test]
    fn signature_matches_reference_digest() {
        let signer = UrlSigner::new("secret", "");
        let digest = md5::compute("2147483647/s/link secret");
        assert_eq!(
            signer.signature("/s/link", 2_147_483_647),
            URL_SAFE_NO_PAD.encode(digest.0)
        );
    }

    #[test]
    fn signed_url_verifies_until_expiry() {
        let signer = UrlSigner::new("s3cret", "https://cdn.example.com");
        let signed = signer.sign_at("/v/1.mp4", Duration::from_secs(60), now()).unwrap();

        assert_eq!(signer.verify_url(&signed.url, now()), Ok(()));
        assert_eq!(signer.verify_url(&signed.url, signed.expires_at), Ok(()));
        assert_eq!(
            signer.verify_url(&signed.url, signed.expires_at + chrono::Duration::seconds(1)),
            Err(SignatureError::Expired)
        );
    }

    #[test]
    fn changing_any_input_breaks_the_signature() {
        let signer = UrlSigner::new("s3cret", "");
        let expires = now().timestamp() + 60;
        let md5 = signer.signature("/v/1.mp4", expires);

        assert_eq!(signer.verify("/v/1.mp4", &md5, expires, now()), Ok(()));
        assert_eq!(
            signer.verify("/v/2.mp4", &md5, expires, now()),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            signer.verify("/v/1.mp4", &md5, expires + 1, now()),
            Err(SignatureError::Mismatch)
        );
        let rotated = UrlSigner::new("rotated", "");
        assert_eq!(
            rotated.verify("/v/1.mp4", &md5, expires, now()),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn relative_paths_are_rooted_and_queries_rejected() {
        let signer = UrlSigner::new("s", "");
        let signed = signer.sign_at("a/b", Duration::from_secs(1), now()).unwrap();
        assert!(signed.url.starts_with("/a/b?md5="));
        assert_eq!(
            signer.sign_at("/a?x=1", Duration::from_secs(1), now()),
            Err(SignatureError::InvalidPath)
        );
    }
}
