use std::num::NonZeroU32;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use portrait_common::{Error, Result};
use ring::digest::SHA256_OUTPUT_LEN;
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};

const SCHEME: &str = "pbkdf2-sha256";
const SALT_LEN: usize = 16;
const DEFAULT_ITERATIONS: u32 = 100_000;

/// One-way credential hashing with verification.
pub trait CredentialHasher: Send + Sync {
    /// Hash `secret` into a self-describing encoded string.
    fn hash(&self, secret: &str) -> Result<String>;

    /// Check `secret` against a value previously produced by `hash`.
    fn verify(&self, secret: &str, encoded: &str) -> Result<bool>;
}

/// PBKDF2-HMAC-SHA256 hasher.
///
/// Output format: `pbkdf2-sha256$<iterations>$<salt b64>$<hash b64>`. The
/// iteration count is read back from the stored value, so raising it only
/// affects newly hashed credentials.
pub struct Pbkdf2Hasher {
    iterations: NonZeroU32,
    rng: SystemRandom,
}

impl Pbkdf2Hasher {
    pub fn new(iterations: NonZeroU32) -> Self {
        Self {
            iterations,
            rng: SystemRandom::new(),
        }
    }
}

impl Default for Pbkdf2Hasher {
    fn default() -> Self {
        Self::new(NonZeroU32::new(DEFAULT_ITERATIONS).unwrap_or(NonZeroU32::MIN))
    }
}

impl CredentialHasher for Pbkdf2Hasher {
    fn hash(&self, secret: &str) -> Result<String> {
        let mut salt = [0u8; SALT_LEN];
        self.rng
            .fill(&mut salt)
            .map_err(|_| Error::Security("failed to generate salt".into()))?;

        let mut derived = [0u8; SHA256_OUTPUT_LEN];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            self.iterations,
            &salt,
            secret.as_bytes(),
            &mut derived,
        );

        Ok(format!(
            "{SCHEME}${}${}${}",
            self.iterations,
            STANDARD.encode(salt),
            STANDARD.encode(derived)
        ))
    }

    fn verify(&self, secret: &str, encoded: &str) -> Result<bool> {
        let mut parts = encoded.split('$');
        let (Some(scheme), Some(iterations), Some(salt), Some(hash), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(Error::Security("malformed credential hash".into()));
        };

        if scheme != SCHEME {
            return Err(Error::Security(format!(
                "unsupported credential scheme: {scheme}"
            )));
        }

        let iterations = iterations
            .parse::<u32>()
            .ok()
            .and_then(NonZeroU32::new)
            .ok_or_else(|| Error::Security("invalid iteration count".into()))?;
        let salt = STANDARD
            .decode(salt)
            .map_err(|e| Error::Security(format!("invalid salt encoding: {e}")))?;
        let hash = STANDARD
            .decode(hash)
            .map_err(|e| Error::Security(format!("invalid hash encoding: {e}")))?;

        Ok(pbkdf2::verify(
            pbkdf2::PBKDF2_HMAC_SHA256,
            iterations,
            &salt,
            secret.as_bytes(),
            &hash,
        )
        .is_ok())
    }
}
