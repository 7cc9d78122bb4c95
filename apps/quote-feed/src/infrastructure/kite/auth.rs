//! Kite Connect Credentials
//!
//! Kite authenticates both surfaces with the same pair: REST calls carry
//! `Authorization: token <api_key>:<access_token>` and the ticker takes the
//! pair as query parameters.

/// Errors building credentials.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialsError {
    /// A required part was empty.
    #[error("{0} cannot be empty")]
    Empty(&'static str),
}

/// API key plus the day's access token.
///
/// `Debug` and `Display` redact the token.
#[derive(Clone, PartialEq, Eq)]
pub struct KiteCredentials {
    api_key: String,
    access_token: String,
}

impl KiteCredentials {
    /// Create credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if either part is empty.
    pub fn new(
        api_key: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Result<Self, CredentialsError> {
        let api_key = api_key.into();
        let access_token = access_token.into();

        if api_key.trim().is_empty() {
            return Err(CredentialsError::Empty("api key"));
        }
        if access_token.trim().is_empty() {
            return Err(CredentialsError::Empty("access token"));
        }

        Ok(Self {
            api_key,
            access_token,
        })
    }

    /// API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Access token.
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Value of the REST `Authorization` header.
    #[must_use]
    pub fn authorization_header(&self) -> String {
        format!("token {}:{}", self.api_key, self.access_token)
    }

    /// Ticker URL with the credentials attached.
    #[must_use]
    pub fn ticker_url(&self, base: &str) -> String {
        let separator = if base.contains('?') { '&' } else { '?' };
        format!(
            "{base}{separator}api_key={}&access_token={}",
            self.api_key, self.access_token
        )
    }
}

impl std::fmt::Debug for KiteCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KiteCredentials")
            .field("api_key", &self.api_key)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

impl std::fmt::Display for KiteCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KiteCredentials(api_key={})", self.api_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_parts() {
        assert_eq!(
            KiteCredentials::new("", "tok"),
            Err(CredentialsError::Empty("api key"))
        );
        assert_eq!(
            KiteCredentials::new("key", "  "),
            Err(CredentialsError::Empty("access token"))
        );
    }

    #[test]
    fn debug_and_display_redact_token() {
        let creds = KiteCredentials::new("key123", "secret-token").unwrap();
        let debug = format!("{creds:?}");
        assert!(debug.contains("key123"));
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("[REDACTED]"));
        assert!(!creds.to_string().contains("secret-token"));
    }

    #[test]
    fn header_and_url() {
        let creds = KiteCredentials::new("k", "t").unwrap();
        assert_eq!(creds.authorization_header(), "token k:t");
        assert_eq!(
            creds.ticker_url("wss://ws.kite.trade"),
            "wss://ws.kite.trade?api_key=k&access_token=t"
        );
        assert_eq!(
            creds.ticker_url("wss://ws.kite.trade?v=3"),
            "wss://ws.kite.trade?v=3&api_key=k&access_token=t"
        );
    }
}
