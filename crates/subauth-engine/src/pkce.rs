//! PKCE (RFC 7636) verifier/challenge generation and CSRF state tokens.
//!
//! The verifier is 32 bytes from the system CSPRNG, base64url encoded. The
//! challenge is `BASE64URL(SHA256(verifier))`, sent with method `S256`.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{AuthEngineError, Result};

/// Length of the PKCE code verifier in bytes (before base64 encoding).
const PKCE_VERIFIER_BYTES: usize = 32;

/// Length of the anti-CSRF state token in bytes (before base64 encoding).
const STATE_BYTES: usize = 32;

/// The PKCE transform this crate uses.
pub const CHALLENGE_METHOD: &str = "S256";

/// A PKCE verifier and the challenge derived from it.
///
/// The verifier only ever lives in memory for a single exchange.
#[derive(Clone)]
pub struct PkcePair {
    /// `BASE64URL(SHA256(verifier))`.
    pub challenge: String,
    /// The secret sent with the code exchange.
    pub verifier: String,
}

impl std::fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkcePair")
            .field("challenge", &self.challenge)
            .field("verifier", &"<redacted>")
            .finish()
    }
}

/// Generate a fresh verifier/challenge pair.
///
/// # Errors
///
/// Returns [`AuthEngineError::Entropy`] if the system CSPRNG fails.
pub fn generate() -> Result<PkcePair> {
    let verifier = random_token(PKCE_VERIFIER_BYTES)?;
    let challenge = challenge_for(&verifier);
    Ok(PkcePair {
        challenge,
        verifier,
    })
}

/// Derive the PKCE code challenge from a code verifier.
pub fn challenge_for(verifier: &str) -> String {
    let hash = digest::digest(&digest::SHA256, verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash.as_ref())
}

/// Generate an opaque random `state` value for one login attempt.
///
/// # Errors
///
/// Returns [`AuthEngineError::Entropy`] if the system CSPRNG fails.
pub fn generate_state() -> Result<String> {
    random_token(STATE_BYTES)
}

fn random_token(len: usize) -> Result<String> {
    let rng = SystemRandom::new();
    let mut bytes = vec![0u8; len];
    rng.fill(&mut bytes).map_err(|_| AuthEngineError::Entropy)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
