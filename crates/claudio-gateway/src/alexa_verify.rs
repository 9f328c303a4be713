//! Alexa Smart Home / Custom Skill request verification: the five checks
//! Amazon's request-verification contract requires before a skill may trust
//! a `POST /alexa` body. All five must pass; any single failure rejects the
//! request.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use reqwest::Client;
use ring::signature::{self, UnparsedPublicKey};
use tracing::warn;
use x509_parser::prelude::*;

use crate::error::{GatewayError, Result};

const MAX_TIMESTAMP_SKEW: Duration = Duration::from_secs(150);
const CERT_CACHE_TTL: Duration = Duration::from_secs(3600);
const REQUIRED_SAN: &str = "echo-api.amazon.com";

struct CachedCert {
    der: Vec<u8>,
    fetched_at: Instant,
}

pub struct AlexaVerifier {
    http: Client,
    cache: Mutex<HashMap<String, CachedCert>>,
}

impl AlexaVerifier {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn verify(&self, raw_body: &[u8], cert_url: &str, signature_b64: &str, request_timestamp: &str) -> Result<()> {
        check_cert_url(cert_url)?;
        check_timestamp(request_timestamp)?;

        let der = self.fetch_cert(cert_url).await?;
        check_san(&der)?;
        check_validity(&der)?;
        check_signature(&der, raw_body, signature_b64)?;

        Ok(())
    }

    async fn fetch_cert(&self, cert_url: &str) -> Result<Vec<u8>> {
        if let Some(cached) = self.cache.lock().unwrap().get(cert_url) {
            if cached.fetched_at.elapsed() < CERT_CACHE_TTL {
                return Ok(cached.der.clone());
            }
        }

        let pem = self
            .http
            .get(cert_url)
            .send()
            .await
            .map_err(|e| GatewayError::AlexaVerification(format!("cert fetch failed: {e}")))?
            .text()
            .await
            .map_err(|e| GatewayError::AlexaVerification(format!("cert fetch body error: {e}")))?;

        let (_, pem_block) = x509_parser::pem::parse_x509_pem(pem.as_bytes())
            .map_err(|e| GatewayError::AlexaVerification(format!("invalid cert PEM: {e}")))?;
        let der = pem_block.contents;

        self.cache.lock().unwrap().insert(
            cert_url.to_string(),
            CachedCert {
                der: der.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(der)
    }
}

/// (a) the cert chain URL must be an HTTPS `s3.amazonaws.com` URL, default
/// port, with a path under `/echo.api/`.
fn check_cert_url(cert_url: &str) -> Result<()> {
    let url = reqwest::Url::parse(cert_url)
        .map_err(|_| GatewayError::AlexaVerification("cert url is not a valid URL".to_string()))?;

    let host_ok = url.host_str() == Some("s3.amazonaws.com");
    let scheme_ok = url.scheme() == "https";
    let port_ok = matches!(url.port(), None | Some(443));
    let path_ok = url.path().starts_with("/echo.api/");

    if host_ok && scheme_ok && port_ok && path_ok {
        Ok(())
    } else {
        Err(GatewayError::AlexaVerification(format!("cert url fails origin check: {cert_url}")))
    }
}

/// (b) the request timestamp must be within 150 seconds of now.
fn check_timestamp(request_timestamp: &str) -> Result<()> {
    let ts: DateTime<Utc> = request_timestamp
        .parse()
        .map_err(|_| GatewayError::AlexaVerification("unparseable request timestamp".to_string()))?;
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64;
    let skew = (now - ts.timestamp()).unsigned_abs();
    if Duration::from_secs(skew) <= MAX_TIMESTAMP_SKEW {
        Ok(())
    } else {
        Err(GatewayError::AlexaVerification(format!("request timestamp skew {skew}s exceeds limit")))
    }
}

/// (c) the leaf cert's subject alternative names must include
/// `echo-api.amazon.com`.
fn check_san(der: &[u8]) -> Result<()> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| GatewayError::AlexaVerification(format!("invalid cert DER: {e}")))?;
    let has_san = cert
        .subject_alternative_name()
        .ok()
        .flatten()
        .map(|ext| {
            ext.value
                .general_names
                .iter()
                .any(|name| matches!(name, GeneralName::DNSName(dns) if *dns == REQUIRED_SAN))
        })
        .unwrap_or(false);
    if has_san {
        Ok(())
    } else {
        Err(GatewayError::AlexaVerification("cert SAN missing echo-api.amazon.com".to_string()))
    }
}

/// (d) the cert's validity window must cover the current time.
fn check_validity(der: &[u8]) -> Result<()> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| GatewayError::AlexaVerification(format!("invalid cert DER: {e}")))?;
    if cert.validity().is_valid() {
        Ok(())
    } else {
        Err(GatewayError::AlexaVerification("cert is outside its validity window".to_string()))
    }
}

/// (e) the `Signature` header, base64-decoded, must verify as an
/// RSA/PKCS1v1.5/SHA-256 signature over the raw request body using the
/// cert's public key.
fn check_signature(der: &[u8], raw_body: &[u8], signature_b64: &str) -> Result<()> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| GatewayError::AlexaVerification(format!("invalid cert DER: {e}")))?;
    let public_key_bytes = cert.public_key().raw;

    let signature_bytes = base64_decode(signature_b64)
        .ok_or_else(|| GatewayError::AlexaVerification("signature header is not valid base64".to_string()))?;

    let key = UnparsedPublicKey::new(&signature::RSA_PKCS1_2048_8192_SHA256, public_key_bytes);
    key.verify(raw_body, &signature_bytes)
        .map_err(|_| GatewayError::AlexaVerification("request signature does not verify".to_string()))?;

    Ok(())
}

fn base64_decode(s: &str) -> Option<Vec<u8>> {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.decode(s).ok().or_else(|| {
        warn!("signature header did not decode as standard base64");
        None
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_cert_url_on_wrong_host() {
        let err = check_cert_url("https://evil.example.com/echo.api/cert.pem").unwrap_err();
        assert!(matches!(err, GatewayError::AlexaVerification(_)));
    }

    #[test]
    fn rejects_cert_url_missing_echo_api_path() {
        assert!(check_cert_url("https://s3.amazonaws.com/some/other/path/cert.pem").is_err());
    }

    #[test]
    fn accepts_well_formed_cert_url() {
        assert!(check_cert_url("https://s3.amazonaws.com/echo.api/echo-api-cert-6-ats.pem").is_ok());
    }

    #[test]
    fn rejects_stale_timestamp() {
        let stale = "2000-01-01T00:00:00Z";
        assert!(check_timestamp(stale).is_err());
    }
}
