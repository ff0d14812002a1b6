//! Shared secrets which must never appear in logs.
//!
//! The job service authenticates to the core service with a single shared
//! secret. [Secret] keeps that value out of `Debug` output, zeroizes owned
//! copies on drop, and knows how to render itself as an `Authorization`
//! header value.

use std::{borrow::Cow, env::VarError, fmt, ops::Deref};

use http::{header::InvalidHeaderValue, HeaderValue};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Authorization scheme used for service-to-service calls authenticated by a shared secret.
pub const SECRET_SCHEME: &str = "Harbor-Secret";

/// A semi-secret value, such as the internal service secret or a registry password.
///
/// Use [Secret::revealed] to get the underlying value.
#[derive(Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
pub struct Secret(Cow<'static, str>);

impl Secret {
    /// Read a secret from an environment variable.
    pub fn from_env(var: &str) -> Result<Self, VarError> {
        let value = std::env::var(var)?;
        Ok(Secret(value.into()))
    }

    /// Expose the underlying value.
    pub fn revealed(&self) -> &str {
        self.0.deref()
    }

    /// True when the secret holds no characters.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Render the secret as `<scheme> <secret>`, marked sensitive.
    pub fn authorization(&self, scheme: &str) -> Result<HeaderValue, InvalidHeaderValue> {
        let mut header = HeaderValue::try_from(format!("{scheme} {}", self.revealed()))?;
        header.set_sensitive(true);
        Ok(header)
    }

    /// Header value for internal service calls.
    pub fn service_header(&self) -> Result<HeaderValue, InvalidHeaderValue> {
        self.authorization(SECRET_SCHEME)
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        if let Cow::Owned(ref mut s) = self.0 {
            s.zeroize()
        }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(****)")
    }
}

impl From<Cow<'static, str>> for Secret {
    fn from(inner: Cow<'static, str>) -> Self {
        Secret(inner)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Secret(value.into())
    }
}

impl From<&'static str> for Secret {
    fn from(value: &'static str) -> Self {
        Secret(value.into())
    }
}

impl From<Secret> for String {
    fn from(value: Secret) -> Self {
        value.revealed().to_owned()
    }
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn secret_hidden_debug() {
        let secret = Secret::from("jobservice-secret");

        assert!(!format!("{secret:?}").contains("jobservice-secret"));
        assert_eq!(&format!("{secret:?}"), "Secret(****)");
        assert_eq!(secret.revealed(), "jobservice-secret");
    }

    #[test]
    fn service_header_uses_secret_scheme() {
        let secret = Secret::from("abc123");
        let header = secret.service_header().unwrap();

        assert!(header.is_sensitive());
        assert_eq!(header.to_str().unwrap(), "Harbor-Secret abc123");
    }

    #[test]
    fn invalid_header_characters_are_rejected() {
        let secret = Secret::from(String::from("line\nbreak"));
        assert!(secret.service_header().is_err());
    }

    #[test]
    fn round_trips_through_serde_as_plain_string() {
        let secret: Secret = serde_json::from_str("\"hunter2\"").unwrap();
        assert_eq!(secret.revealed(), "hunter2");
        assert_eq!(serde_json::to_string(&secret).unwrap(), "\"hunter2\"");
    }
}
