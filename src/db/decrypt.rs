//! Credential decryption for registered data sources.
//!
//! A provider registered with `decrypt = true` hands its stored password to a
//! [`CredentialDecryptor`] before its first connection is opened.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Turns a stored (encrypted) credential into its plain form.
pub trait CredentialDecryptor: Send + Sync {
    /// Returns `Ok(None)` when `value` is not something this decryptor
    /// understands, in which case the value is used as-is. A value that is
    /// marked as encrypted but cannot be decrypted is an error.
    fn decrypt(&self, value: &str) -> Result<Option<String>, String>;
}

/// Decrypts values of the form `ENC(<base64>)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64Decryptor;

impl Base64Decryptor {
    const PREFIX: &'static str = "ENC(";
    const SUFFIX: &'static str = ")";

    /// Wrap a plain value so it round-trips through this decryptor.
    pub fn encrypt(value: &str) -> String {
        format!("{}{}{}", Self::PREFIX, STANDARD.encode(value), Self::SUFFIX)
    }
}

impl CredentialDecryptor for Base64Decryptor {
    fn decrypt(&self, value: &str) -> Result<Option<String>, String> {
        let Some(inner) = value
            .strip_prefix(Self::PREFIX)
            .and_then(|rest| rest.strip_suffix(Self::SUFFIX))
        else {
            return Ok(None);
        };
        let bytes = STANDARD
            .decode(inner)
            .map_err(|e| format!("Invalid base64 in ENC(...): {e}"))?;
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|_| "Decrypted value is not valid UTF-8".to_string())
    }
}
