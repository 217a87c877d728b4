pub mod password;

pub use password::{
    generate_salt, Credential, CredentialError, CredentialVerifier, KdfParams, DIGEST_LEN,
    SALT_LEN,
};
