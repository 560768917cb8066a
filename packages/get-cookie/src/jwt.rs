//! Minimal inspection of compact JWTs, enough to honour the require-jwt
//! post-filter without pulling in a full JOSE stack. Signatures are not
//! verified; only the `exp` claim matters here.

use base64ct::{Base64UrlUnpadded, Encoding};
use serde_json::{Map, Value};

/// Decode the claims of a compact JWT (`header.payload.signature`).
/// Returns `None` when the value is not JWT-shaped.
pub fn decode_claims(token: &str) -> Option<Map<String, Value>> {
    let mut parts = token.split('.');
    let header = parts.next()?;
    let payload = parts.next()?;
    parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    let header: Value = serde_json::from_slice(&Base64UrlUnpadded::decode_vec(header).ok()?).ok()?;
    header.get("alg")?;

    let claims: Value = serde_json::from_slice(&Base64UrlUnpadded::decode_vec(payload).ok()?).ok()?;
    claims.as_object().cloned()
}

/// True when `value` is a JWT whose `exp` claim is absent or in the future.
pub fn is_unexpired_jwt(value: &str, now_seconds: i64) -> bool {
    match decode_claims(value) {
        None => false,
        Some(claims) => match claims.get("exp").and_then(Value::as_i64) {
            None => true,
            Some(exp) => exp > now_seconds,
        },
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// An unsigned token with the given JSON payload.
    pub(crate) fn make_jwt(claims: &Value) -> String {
        let header = Base64UrlUnpadded::encode_string(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = Base64UrlUnpadded::encode_string(claims.to_string().as_bytes());
        format!("{header}.{payload}.sig")
    }

    #[test]
    fn decodes_a_well_formed_token() {
        let token = make_jwt(&serde_json::json!({"sub": "user", "exp": 32503680000i64}));
        let claims = decode_claims(&token).unwrap();
        assert_eq!(claims.get("sub").and_then(Value::as_str), Some("user"));
    }

    #[test]
    fn rejects_non_jwt_values() {
        assert!(decode_claims("plain-session-value").is_none());
        assert!(decode_claims("a.b").is_none());
        assert!(decode_claims("a.b.c.d").is_none());
        assert!(decode_claims("!!!.###.$$$").is_none());
    }

    #[test]
    fn expiry_claim_governs_freshness() {
        let now = 1_700_000_000i64;

        let fresh = make_jwt(&serde_json::json!({"exp": now + 3600}));
        assert!(is_unexpired_jwt(&fresh, now));

        let stale = make_jwt(&serde_json::json!({"exp": now - 1}));
        assert!(!is_unexpired_jwt(&stale, now));

        let no_exp = make_jwt(&serde_json::json!({"sub": "user"}));
        assert!(is_unexpired_jwt(&no_exp, now));

        assert!(!is_unexpired_jwt("not-a-jwt", now));
    }
}
