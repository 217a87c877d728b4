use std::fmt;
use std::str::FromStr;

use rand::{rngs::OsRng, RngCore};
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Random salt length in bytes (hex-encoded to twice this many chars)
pub const SALT_LEN: usize = 16;

/// scrypt output length in bytes
pub const DIGEST_LEN: usize = 64;

const DELIMITER: char = '.';

/// Salt used when burning a derivation for an unknown user
const BURN_SALT: &str = "00000000000000000000000000000000";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Malformed credential: {0}")]
    Malformed(&'static str),

    #[error("Key derivation failed: {0}")]
    Derivation(String),
}

/// scrypt cost parameters. N = 2^log_n.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub log_n: u8,
    pub r: u32,
    pub p: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            log_n: 14,
            r: 8,
            p: 1,
        }
    }
}

impl KdfParams {
    fn to_scrypt(self) -> Result<scrypt::Params, CredentialError> {
        scrypt::Params::new(self.log_n, self.r, self.p, DIGEST_LEN)
            .map_err(|e| CredentialError::Derivation(format!("Invalid scrypt parameters: {}", e)))
    }

    pub fn validate(&self) -> Result<(), CredentialError> {
        self.to_scrypt().map(|_| ())
    }
}

/// A stored credential: `<digest-hex>.<salt-hex>`.
///
/// The salt is kept as its hex text because that text, not the decoded
/// bytes, is what the KDF consumes.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    digest: [u8; DIGEST_LEN],
    salt: String,
}

impl Credential {
    pub fn digest(&self) -> &[u8] {
        &self.digest
    }

    pub fn salt(&self) -> &str {
        &self.salt
    }
}

impl FromStr for Credential {
    type Err = CredentialError;

    fn from_str(stored: &str) -> Result<Self, Self::Err> {
        let (digest_hex, salt_hex) = stored
            .split_once(DELIMITER)
            .ok_or(CredentialError::Malformed("missing delimiter"))?;

        let digest_bytes = hex::decode(digest_hex)
            .map_err(|_| CredentialError::Malformed("digest is not hex"))?;
        let digest: [u8; DIGEST_LEN] = digest_bytes
            .try_into()
            .map_err(|_| CredentialError::Malformed("digest has the wrong length"))?;

        let salt_bytes =
            hex::decode(salt_hex).map_err(|_| CredentialError::Malformed("salt is not hex"))?;
        if salt_bytes.len() != SALT_LEN {
            return Err(CredentialError::Malformed("salt has the wrong length"));
        }

        Ok(Credential {
            digest,
            salt: salt_hex.to_string(),
        })
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", hex::encode(self.digest), DELIMITER, self.salt)
    }
}

// Keep digests out of logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("salt", &self.salt)
            .finish_non_exhaustive()
    }
}

/// Derives and checks salted scrypt credentials.
///
/// Every call re-derives from scratch and owns its buffers, so a verifier is
/// freely shared between requests. Derivation is slow by construction; async
/// callers should run it on a blocking thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct CredentialVerifier {
    params: KdfParams,
}

impl CredentialVerifier {
    pub fn new(params: KdfParams) -> Self {
        Self { params }
    }

    /// Derive a fresh credential for `password` under a new random salt
    pub fn derive(&self, password: &str) -> Result<Credential, CredentialError> {
        let salt = generate_salt();
        let digest = self.stretch(password.as_bytes(), salt.as_bytes())?;
        Ok(Credential { digest, salt })
    }

    /// Check `password` against a stored credential string.
    ///
    /// A stored value that does not parse is an error, never `false`.
    pub fn verify(&self, password: &str, stored: &str) -> Result<bool, CredentialError> {
        let credential: Credential = stored.parse()?;
        let candidate = self.stretch(password.as_bytes(), credential.salt.as_bytes())?;
        Ok(constant_time_eq(&candidate, &credential.digest))
    }

    /// Like [`verify`](Self::verify), but a malformed credential still costs
    /// one derivation before the error comes back.
    pub fn verify_or_burn(&self, password: &str, stored: &str) -> Result<bool, CredentialError> {
        let outcome = self.verify(password, stored);
        if let Err(CredentialError::Malformed(_)) = outcome {
            self.burn(password)?;
        }
        outcome
    }

    /// Spend one derivation and discard it.
    pub fn burn(&self, password: &str) -> Result<(), CredentialError> {
        self.stretch(password.as_bytes(), BURN_SALT.as_bytes())
            .map(|_| ())
    }

    fn stretch(&self, password: &[u8], salt: &[u8]) -> Result<[u8; DIGEST_LEN], CredentialError> {
        let params = self.params.to_scrypt()?;
        let mut digest = [0u8; DIGEST_LEN];

        scrypt::scrypt(password, salt, &params, &mut digest)
            .map_err(|e| CredentialError::Derivation(e.to_string()))?;

        Ok(digest)
    }
}

/// Generate a hex-encoded salt from the OS CSPRNG
pub fn generate_salt() -> String {
    let mut bytes = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}
