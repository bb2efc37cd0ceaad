//! User agent validation for the version message.

use std::fmt;

/// Ways a user agent can fail validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAgentError {
    /// Not wrapped as `/name:version/`.
    InvalidFormat,
    /// Empty name.
    MissingName,
    /// Empty version.
    MissingVersion,
}

impl fmt::Display for UserAgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserAgentError::InvalidFormat => {
                write!(f, "User agent must look like '/name:version/'")
            }
            UserAgentError::MissingName => {
                write!(f, "User agent has an empty name")
            }
            UserAgentError::MissingVersion => {
                write!(f, "User agent has an empty version")
            }
        }
    }
}

impl std::error::Error for UserAgentError {}

/// A user agent advertised in version messages, in the `/name:version/` form
/// used by Bitcoin Core and most other implementations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserAgent(String);

impl UserAgent {
    /// Validate and wrap a user agent string.
    ///
    /// # Example
    ///
    /// ```
    /// use peer_seeder_session::{UserAgent, UserAgentError};
    ///
    /// assert!(UserAgent::new("/peer-seeder:0.1.0/".to_string()).is_ok());
    /// assert_eq!(
    ///     UserAgent::new("/:0.1.0/".to_string()),
    ///     Err(UserAgentError::MissingName)
    /// );
    /// ```
    pub fn new(user_agent: String) -> Result<Self, UserAgentError> {
        let contents = user_agent
            .strip_prefix('/')
            .and_then(|rest| rest.strip_suffix('/'))
            .ok_or(UserAgentError::InvalidFormat)?;

        let (name, version) = contents
            .split_once(':')
            .ok_or(UserAgentError::InvalidFormat)?;

        if version.contains(':') {
            return Err(UserAgentError::InvalidFormat);
        }
        if name.is_empty() {
            return Err(UserAgentError::MissingName);
        }
        if version.is_empty() {
            return Err(UserAgentError::MissingVersion);
        }

        Ok(UserAgent(user_agent))
    }

    /// Build a user agent from its components without further validation.
    pub fn from_name_version(name: &str, version: &str) -> Self {
        UserAgent(format!("/{name}:{version}/"))
    }

    /// The raw user agent string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for UserAgent {
    /// `/peer-seeder:$VERSION/`.
    fn default() -> Self {
        UserAgent::from_name_version("peer-seeder", env!("CARGO_PKG_VERSION"))
    }
}

impl fmt::Display for UserAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_user_agents() {
        assert!(UserAgent::new("/peer-seeder:0.1.0/".to_string()).is_ok());
        assert!(UserAgent::new("/Satoshi:27.0.0/".to_string()).is_ok());
        assert!(UserAgent::new("/vhcpeersniffer:0.0.1/".to_string()).is_ok());
    }

    #[test]
    fn test_invalid_format() {
        for candidate in [
            "peer-seeder:0.1.0/",
            "/peer-seeder:0.1.0",
            "peer-seeder:0.1.0",
            "/peer-seeder/",
            "/peer:seeder:0.1.0/",
            "/",
        ] {
            assert_eq!(
                UserAgent::new(candidate.to_string()),
                Err(UserAgentError::InvalidFormat),
                "{candidate} should be rejected"
            );
        }
    }

    #[test]
    fn test_missing_components() {
        assert_eq!(
            UserAgent::new("/:0.1.0/".to_string()),
            Err(UserAgentError::MissingName)
        );
        assert_eq!(
            UserAgent::new("/peer-seeder:/".to_string()),
            Err(UserAgentError::MissingVersion)
        );
    }

    #[test]
    fn test_default_is_valid() {
        let user_agent = UserAgent::default();
        assert!(user_agent.as_str().starts_with("/peer-seeder:"));
        assert!(UserAgent::new(user_agent.to_string()).is_ok());
    }
}
