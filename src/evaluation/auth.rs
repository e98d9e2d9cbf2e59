//! # Connection URL Signing
//!
//! The remote service authorizes a WebSocket handshake through query
//! parameters: a base64 authorization descriptor, the RFC-1123 date the
//! signature was computed over, and the host. The signature is HMAC-SHA256
//! over a three-line canonical string and is only accepted within the
//! service's clock-skew window, so a URL must be generated fresh for every
//! connection attempt and never cached.

use crate::error::{AppError, AppResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// A connection URL valid for one handshake attempt.
#[derive(Debug, Clone)]
pub struct SignedUrl {
    pub url: String,
    /// The timestamp the signature covers, also usable as a `date` header.
    pub date: String,
}

/// Builds signed connection URLs from the configured key pair.
#[derive(Debug, Clone)]
pub struct AuthSigner {
    api_key: String,
    api_secret: String,
}

impl AuthSigner {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    /// Sign a handshake for `wss://<host><path>` at the current time.
    pub fn sign(&self, host: &str, path: &str) -> AppResult<SignedUrl> {
        self.sign_at(host, path, Utc::now())
    }

    /// Timestamp granularity is one second: two calls within the same second
    /// produce identical URLs, a second apart they must differ.
    pub(crate) fn sign_at(
        &self,
        host: &str,
        path: &str,
        at: DateTime<Utc>,
    ) -> AppResult<SignedUrl> {
        let date = at.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let canonical = canonical_string(host, path, &date);

        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| AppError::Auth(format!("invalid signing key: {}", e)))?;
        mac.update(canonical.as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());

        let descriptor = format!(
            "api_key=\"{}\", algorithm=\"hmac-sha256\", headers=\"host date request-line\", signature=\"{}\"",
            self.api_key, signature
        );
        let authorization = BASE64.encode(descriptor.as_bytes());

        let url = format!(
            "wss://{}{}?authorization={}&date={}&host={}",
            host,
            path,
            urlencoding::encode(&authorization),
            urlencoding::encode(&date),
            host
        );

        Ok(SignedUrl { url, date })
    }
}

/// The canonical signing string: host line, date line, request line, joined
/// by newlines with no trailing newline.
fn canonical_string(host: &str, path: &str, date: &str) -> String {
    format!("host: {}\ndate: {}\nGET {} HTTP/1.1", host, date, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const HOST: &str = "ise-api.xfyun.cn";
    const PATH: &str = "/v2/open-ise";

    fn signer() -> AuthSigner {
        AuthSigner::new("test_key", "test_secret")
    }

    #[test]
    fn test_canonical_string_layout() {
        let canonical = canonical_string(HOST, PATH, "Fri, 03 May 2024 10:00:00 GMT");
        assert_eq!(
            canonical,
            "host: ise-api.xfyun.cn\ndate: Fri, 03 May 2024 10:00:00 GMT\nGET /v2/open-ise HTTP/1.1"
        );
        assert!(!canonical.ends_with('\n'));
    }

    #[test]
    fn test_timestamp_format() {
        let at = Utc.with_ymd_and_hms(2024, 5, 3, 10, 0, 0).unwrap();
        let signed = signer().sign_at(HOST, PATH, at).unwrap();
        assert_eq!(signed.date, "Fri, 03 May 2024 10:00:00 GMT");
    }

    #[test]
    fn test_token_decodes_to_descriptor() {
        let at = Utc.with_ymd_and_hms(2024, 5, 3, 10, 0, 0).unwrap();
        let signed = signer().sign_at(HOST, PATH, at).unwrap();

        let token = signed
            .url
            .split("authorization=")
            .nth(1)
            .and_then(|rest| rest.split('&').next())
            .unwrap();
        let decoded_token = urlencoding::decode(token).unwrap();
        let descriptor = String::from_utf8(BASE64.decode(decoded_token.as_bytes()).unwrap()).unwrap();

        assert!(descriptor.contains("api_key=\"test_key\""));
        assert!(descriptor.contains("algorithm=\"hmac-sha256\""));
        assert!(descriptor.contains("headers=\"host date request-line\""));
        assert!(descriptor.contains("signature=\""));
    }

    #[test]
    fn test_url_shape() {
        let at = Utc.with_ymd_and_hms(2024, 5, 3, 10, 0, 0).unwrap();
        let signed = signer().sign_at(HOST, PATH, at).unwrap();

        assert!(signed.url.starts_with("wss://ise-api.xfyun.cn/v2/open-ise?authorization="));
        assert!(signed.url.ends_with("&host=ise-api.xfyun.cn"));
        // the date contains spaces and a comma, both must be escaped
        assert!(signed.url.contains("date=Fri%2C%2003%20May%202024%2010%3A00%3A00%20GMT"));
    }

    #[test]
    fn test_same_second_is_deterministic() {
        let at = Utc.with_ymd_and_hms(2024, 5, 3, 10, 0, 0).unwrap();
        let a = signer().sign_at(HOST, PATH, at).unwrap();
        let b = signer().sign_at(HOST, PATH, at).unwrap();
        assert_eq!(a.url, b.url);
    }

    #[test]
    fn test_one_second_apart_differs() {
        let at = Utc.with_ymd_and_hms(2024, 5, 3, 10, 0, 0).unwrap();
        let a = signer().sign_at(HOST, PATH, at).unwrap();
        let b = signer()
            .sign_at(HOST, PATH, at + chrono::Duration::seconds(1))
            .unwrap();
        assert_ne!(a.url, b.url);
        assert_ne!(a.date, b.date);
    }

    #[test]
    fn test_secret_changes_signature() {
        let at = Utc.with_ymd_and_hms(2024, 5, 3, 10, 0, 0).unwrap();
        let a = AuthSigner::new("test_key", "secret_one")
            .sign_at(HOST, PATH, at)
            .unwrap();
        let b = AuthSigner::new("test_key", "secret_two")
            .sign_at(HOST, PATH, at)
            .unwrap();
        assert_ne!(a.url, b.url);
    }
}
