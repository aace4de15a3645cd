//! Account identity extraction from access tokens.
//!
//! The access token is a JWT issued moments ago over a trusted channel, so
//! only the payload is decoded. The signature is not verified.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::Value;

use crate::error::{AuthEngineError, Result};

/// Read the account id found at `claim_path` in the token's payload.
///
/// # Errors
///
/// Returns [`AuthEngineError::NoAccountId`] if the token is not a JWT, the
/// payload does not decode, or the claim is absent or empty.
pub fn extract_account_id<S: AsRef<str>>(access_token: &str, claim_path: &[S]) -> Result<String> {
    let payload = decode_payload(access_token).ok_or(AuthEngineError::NoAccountId)?;

    let claim = claim_path
        .iter()
        .try_fold(&payload, |node, key| node.get(key.as_ref()))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or(AuthEngineError::NoAccountId)?;

    Ok(claim.to_string())
}

/// Decode the middle segment of a JWT into JSON.
fn decode_payload(token: &str) -> Option<Value> {
    let mut segments = token.split('.');
    let (_header, payload, _signature) = (segments.next()?, segments.next()?, segments.next()?);
    if segments.next().is_some() {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::oauth::{DEFAULT_ACCOUNT_CLAIM_FIELD, DEFAULT_ACCOUNT_CLAIM_NAMESPACE};

    const CLAIM: [&str; 2] = [DEFAULT_ACCOUNT_CLAIM_NAMESPACE, DEFAULT_ACCOUNT_CLAIM_FIELD];

    fn jwt(payload: &Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("{header}.{body}.signature")
    }

    #[test]
    fn extracts_nested_claim() {
        let token = jwt(&json!({
            "sub": "user-1",
            "https://api.openai.com/auth": { "chatgpt_account_id": "acct_123" }
        }));
        assert_eq!(extract_account_id(&token, &CLAIM).unwrap(), "acct_123");
    }

    #[test]
    fn tolerates_padded_payload() {
        let header = URL_SAFE_NO_PAD.encode(b"{}");
        let payload = json!({ "https://api.openai.com/auth": { "chatgpt_account_id": "a" } });
        let mut body = URL_SAFE_NO_PAD.encode(payload.to_string());
        while body.len() % 4 != 0 {
            body.push('=');
        }
        let token = format!("{header}.{body}.sig");
        assert_eq!(extract_account_id(&token, &CLAIM).unwrap(), "a");
    }

    #[test]
    fn missing_claim_is_an_error() {
        let token = jwt(&json!({ "sub": "user-1" }));
        assert!(matches!(
            extract_account_id(&token, &CLAIM),
            Err(AuthEngineError::NoAccountId)
        ));
    }

    #[test]
    fn empty_or_non_string_claim_is_an_error() {
        let empty = jwt(&json!({ "https://api.openai.com/auth": { "chatgpt_account_id": "" } }));
        let number = jwt(&json!({ "https://api.openai.com/auth": { "chatgpt_account_id": 42 } }));
        assert!(extract_account_id(&empty, &CLAIM).is_err());
        assert!(extract_account_id(&number, &CLAIM).is_err());
    }

    #[test]
    fn non_jwt_tokens_are_errors() {
        for token in ["opaque-token", "a.b", "a.b.c.d", "a.!!!.c", ""] {
            assert!(
                matches!(
                    extract_account_id(token, &CLAIM),
                    Err(AuthEngineError::NoAccountId)
                ),
                "token {token:?} should not yield an account id"
            );
        }
    }

    #[test]
    fn payload_must_be_json() {
        let body = URL_SAFE_NO_PAD.encode(b"not json");
        let token = format!("h.{body}.s");
        assert!(extract_account_id(&token, &CLAIM).is_err());
    }

    #[test]
    fn custom_claim_path() {
        let token = jwt(&json!({ "acct": "flat-id" }));
        assert_eq!(extract_account_id(&token, &["acct"]).unwrap(), "flat-id");
    }
}
