//! Credential engines
//!
//! Two independent schemes are supported:
//!
//! - WS-Security `UsernameToken` with `PasswordDigest`, placed in the SOAP
//!   header of every request. The `Created` timestamp follows the device
//!   clock, so callers pass in the device-relative "now".
//! - HTTP Digest (RFC 2617, MD5), computed after the device answers 401 with a
//!   `WWW-Authenticate` challenge.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use md5::Md5;
use rand::RngCore;
use sha1::{Digest, Sha1};

use onvif_core::soap::xml_escape;

use crate::error::{OnvifError, Result};

const PASSWORD_DIGEST_TYPE: &str = "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordDigest";
const NONCE_ENCODING_TYPE: &str = "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-soap-message-security-1.0#Base64Binary";

/// Nonce counter wraps back to 1 after this value
const MAX_NONCE_COUNT: u32 = 99_999_999;

/// WS-Security UsernameToken material for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsernameToken {
    pub username: String,
    /// `base64(SHA1(nonce ++ created ++ password))`
    pub password_digest: String,
    /// Base64 nonce
    pub nonce: String,
    /// `YYYY-MM-DDTHH:MM:SS.mmmZ`
    pub created: String,
}

impl UsernameToken {
    /// Generate a token with a fresh 16-byte random nonce
    pub fn generate(username: &str, password: &str, now: DateTime<Utc>) -> Self {
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);
        Self::with_nonce(username, password, &nonce, now)
    }

    /// Build a token from an explicit nonce
    pub fn with_nonce(username: &str, password: &str, nonce: &[u8], now: DateTime<Utc>) -> Self {
        let created = format_created(now);

        let mut sha = Sha1::new();
        sha.update(nonce);
        sha.update(created.as_bytes());
        sha.update(password.as_bytes());

        Self {
            username: username.to_string(),
            password_digest: BASE64.encode(sha.finalize()),
            nonce: BASE64.encode(nonce),
            created,
        }
    }

    /// Render the `wsse:Security` header element
    pub fn to_header(&self) -> String {
        format!(
            concat!(
                r#"<wsse:Security s:mustUnderstand="1">"#,
                "<wsse:UsernameToken>",
                "<wsse:Username>{}</wsse:Username>",
                r#"<wsse:Password Type="{}">{}</wsse:Password>"#,
                r#"<wsse:Nonce EncodingType="{}">{}</wsse:Nonce>"#,
                "<wsu:Created>{}</wsu:Created>",
                "</wsse:UsernameToken>",
                "</wsse:Security>"
            ),
            xml_escape(&self.username),
            PASSWORD_DIGEST_TYPE,
            self.password_digest,
            NONCE_ENCODING_TYPE,
            self.nonce,
            self.created,
        )
    }
}

/// Format a WS-Security `Created` timestamp
pub fn format_created(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Parsed `WWW-Authenticate: Digest ...` challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub qop: Option<String>,
    pub opaque: Option<String>,
    pub algorithm: Option<String>,
}

impl DigestChallenge {
    /// Parse a challenge header value.
    ///
    /// Accepts quoted and unquoted values, and commas inside quoted values
    /// (`qop="auth,auth-int"`). Fails with [`OnvifError::Auth`] if `realm` or
    /// `nonce` is missing.
    pub fn parse(header: &str) -> Result<Self> {
        let header = header.trim();
        let params = match header.split_once(char::is_whitespace) {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("digest") => rest,
            _ => {
                return Err(OnvifError::Auth(format!(
                    "unsupported authentication challenge: {}",
                    header
                )))
            }
        };

        let mut fields: HashMap<String, String> = HashMap::new();
        for part in split_unquoted_commas(params) {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            fields.insert(key.trim().to_ascii_lowercase(), value.to_string());
        }

        let realm = fields
            .remove("realm")
            .ok_or_else(|| OnvifError::Auth("digest challenge is missing realm".to_string()))?;
        let nonce = fields
            .remove("nonce")
            .ok_or_else(|| OnvifError::Auth("digest challenge is missing nonce".to_string()))?;

        Ok(Self {
            realm,
            nonce,
            qop: fields.remove("qop").map(|qop| select_qop(&qop)),
            opaque: fields.remove("opaque"),
            algorithm: fields.remove("algorithm"),
        })
    }
}

fn split_unquoted_commas(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(input[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(input[start..].trim());
    parts.retain(|p| !p.is_empty());
    parts
}

fn select_qop(offered: &str) -> String {
    let options: Vec<&str> = offered
        .split(',')
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .collect();
    if options.iter().any(|q| q.eq_ignore_ascii_case("auth")) {
        "auth".to_string()
    } else {
        options.first().copied().unwrap_or("auth").to_string()
    }
}

fn hex_md5(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

/// HTTP Digest responder with a client-wide nonce counter
#[derive(Debug, Default)]
pub struct DigestEngine {
    nonce_count: AtomicU32,
}

impl DigestEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the nonce counter, wrapping after 99999999 back to 1
    fn next_nonce_count(&self) -> u32 {
        let previous = self
            .nonce_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some(if n >= MAX_NONCE_COUNT { 1 } else { n + 1 })
            })
            .unwrap_or(0);
        if previous >= MAX_NONCE_COUNT {
            1
        } else {
            previous + 1
        }
    }

    /// Build an `Authorization` header value with a random client nonce
    pub fn authorize(
        &self,
        challenge: &DigestChallenge,
        username: &str,
        password: &str,
        method: &str,
        uri: &str,
    ) -> String {
        let cnonce = format!("{:08x}", rand::random::<u32>());
        self.authorize_with_cnonce(challenge, username, password, method, uri, &cnonce)
    }

    /// Build an `Authorization` header value with an explicit client nonce
    pub fn authorize_with_cnonce(
        &self,
        challenge: &DigestChallenge,
        username: &str,
        password: &str,
        method: &str,
        uri: &str,
        cnonce: &str,
    ) -> String {
        let ha1 = hex_md5(&format!("{}:{}:{}", username, challenge.realm, password));
        let ha2 = hex_md5(&format!("{}:{}", method, uri));

        let mut header = format!(
            r#"Digest username="{}", realm="{}", nonce="{}", uri="{}""#,
            username, challenge.realm, challenge.nonce, uri
        );

        match &challenge.qop {
            Some(qop) => {
                let nc = format!("{:08}", self.next_nonce_count());
                let response = hex_md5(&format!(
                    "{}:{}:{}:{}:{}:{}",
                    ha1, challenge.nonce, nc, cnonce, qop, ha2
                ));
                header.push_str(&format!(
                    r#", qop={}, nc={}, cnonce="{}", response="{}""#,
                    qop, nc, cnonce, response
                ));
            }
            None => {
                let response = hex_md5(&format!("{}:{}:{}", ha1, challenge.nonce, ha2));
                header.push_str(&format!(r#", response="{}""#, response));
            }
        }

        if let Some(opaque) = &challenge.opaque {
            header.push_str(&format!(r#", opaque="{}""#, opaque));
        }
        if let Some(algorithm) = &challenge.algorithm {
            header.push_str(&format!(", algorithm={}", algorithm));
        }
        header
    }
}

/// Split an `Authorization: Digest ...` header into its fields.
///
/// Used by the mock device to verify requests.
pub fn parse_authorization(header: &str) -> Option<HashMap<String, String>> {
    let (scheme, rest) = header.trim().split_once(char::is_whitespace)?;
    if !scheme.eq_ignore_ascii_case("digest") {
        return None;
    }
    Some(
        split_unquoted_commas(rest)
            .into_iter()
            .filter_map(|part| {
                let (key, value) = part.split_once('=')?;
                let value = value.trim();
                let value = value
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .unwrap_or(value);
                Some((key.trim().to_ascii_lowercase(), value.to_string()))
            })
            .collect(),
    )
}

/// Expected `response` field for a digest authorization, given the password
pub fn expected_digest_response(
    fields: &HashMap<String, String>,
    password: &str,
    method: &str,
) -> Option<String> {
    let username = fields.get("username")?;
    let realm = fields.get("realm")?;
    let nonce = fields.get("nonce")?;
    let uri = fields.get("uri")?;
    let ha1 = hex_md5(&format!("{}:{}:{}", username, realm, password));
    let ha2 = hex_md5(&format!("{}:{}", method, uri));
    Some(match fields.get("qop") {
        Some(qop) => hex_md5(&format!(
            "{}:{}:{}:{}:{}:{}",
            ha1,
            nonce,
            fields.get("nc")?,
            fields.get("cnonce")?,
            qop,
            ha2
        )),
        None => hex_md5(&format!("{}:{}:{}", ha1, nonce, ha2)),
    })
}
