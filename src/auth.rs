// ABOUTME: Shared-key request signing for the compute and storage REST APIs
// ABOUTME: HMAC-SHA256 over a canonicalized request using the decoded account key

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Url;
use sha2::Sha256;

use crate::error::{Result, RunnerError};

type HmacSha256 = Hmac<Sha256>;

/// Date format required by the `ocp-date` and `x-ms-date` headers.
pub fn http_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// The parts of an outgoing request that participate in the signature.
pub struct CanonicalRequest<'a> {
    pub method: &'a str,
    pub url: &'a Url,
    pub content_length: usize,
    pub content_type: Option<&'a str>,
    /// Service-prefixed headers (`ocp-*` or `x-ms-*`).
    pub headers: Vec<(String, String)>,
}

#[derive(Clone)]
pub struct SharedKeySigner {
    account: String,
    mac: HmacSha256,
}

impl SharedKeySigner {
    pub fn new(account: &str, base64_key: &str) -> Result<Self> {
        let key = STANDARD
            .decode(base64_key.trim())
            .map_err(|_| RunnerError::config(format!("account key for {} is not valid base64", account)))?;
        let mac = HmacSha256::new_from_slice(&key)
            .map_err(|e| RunnerError::config(format!("unusable account key for {}: {}", account, e)))?;
        Ok(Self {
            account: account.to_string(),
            mac,
        })
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// Base64 HMAC-SHA256 of `payload`.
    pub fn sign(&self, payload: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        STANDARD.encode(mac.finalize().into_bytes())
    }

    pub fn authorization(&self, request: &CanonicalRequest<'_>) -> String {
        let signature = self.sign(&self.string_to_sign(request));
        format!("SharedKey {}:{}", self.account, signature)
    }

    pub fn string_to_sign(&self, request: &CanonicalRequest<'_>) -> String {
        let content_length = if request.content_length == 0 {
            String::new()
        } else {
            request.content_length.to_string()
        };

        // verb, content-encoding, content-language, content-length, content-md5,
        // content-type, date, if-modified-since, if-match, if-none-match,
        // if-unmodified-since, range
        let mut out = format!(
            "{}\n\n\n{}\n\n{}\n\n\n\n\n\n\n",
            request.method.to_uppercase(),
            content_length,
            request.content_type.unwrap_or_default()
        );
        out.push_str(&canonicalized_headers(&request.headers));
        out.push_str(&self.canonicalized_resource(request.url));
        out
    }

    fn canonicalized_resource(&self, url: &Url) -> String {
        let mut out = format!("/{}{}", self.account, url.path());
        let mut params: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.to_lowercase(), v.into_owned()))
            .collect();
        params.sort();
        let mut iter = params.into_iter().peekable();
        while let Some((name, value)) = iter.next() {
            let mut values = vec![value];
            while let Some((next, _)) = iter.peek() {
                if *next != name {
                    break;
                }
                if let Some((_, v)) = iter.next() {
                    values.push(v);
                }
            }
            out.push_str(&format!("\n{}:{}", name, values.join(",")));
        }
        out
    }
}

fn canonicalized_headers(headers: &[(String, String)]) -> String {
    let mut sorted: Vec<(String, String)> = headers
        .iter()
        .map(|(k, v)| (k.to_lowercase(), v.trim().to_string()))
        .collect();
    sorted.sort();
    sorted
        .into_iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect()
}
