use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Verify a WhatsApp-style `X-Hub-Signature-256: sha256=<hex>` header against
/// the raw request body, keyed by the bot's app secret.
pub fn verify_hmac_sha256(app_secret: &str, body: &[u8], header_value: &str) -> bool {
    let Some(hex_sig) = header_value.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected_bytes) = hex::decode(hex_sig) else {
        return false;
    };

    let mut mac = match HmacSha256::new_from_slice(app_secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(body);
    let computed = mac.finalize().into_bytes();

    bool::from(computed.as_slice().ct_eq(&expected_bytes))
}

/// Telegram's secret-token header check: simple constant-time string equality.
pub fn verify_secret_token(expected: &str, presented: &str) -> bool {
    bool::from(expected.as_bytes().ct_eq(presented.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifies_matching_hmac() {
        let secret = "app-secret";
        let body = b"{\"field\":\"value\"}";
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let sig = hex::encode(mac.finalize().into_bytes());
        let header = format!("sha256={sig}");
        assert!(verify_hmac_sha256(secret, body, &header));
    }

    #[test]
    fn rejects_wrong_secret() {
        let body = b"payload";
        let mut mac = HmacSha256::new_from_slice(b"right").unwrap();
        mac.update(body);
        let sig = hex::encode(mac.finalize().into_bytes());
        let header = format!("sha256={sig}");
        assert!(!verify_hmac_sha256("wrong", body, &header));
    }

    #[test]
    fn rejects_malformed_header() {
        assert!(!verify_hmac_sha256("secret", b"body", "not-a-signature"));
        assert!(!verify_hmac_sha256("secret", b"body", "sha256=not-hex!!"));
    }

    #[test]
    fn secret_token_equality() {
        assert!(verify_secret_token("abc123", "abc123"));
        assert!(!verify_secret_token("abc123", "abc124"));
    }
}
