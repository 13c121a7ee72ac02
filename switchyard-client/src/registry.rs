//! Environment-aware base URL registry.
//!
//! Requests name a logical target key (`"api"`, `"upload"`) instead of a base
//! URL. A [`DomainRegistry`] maps each key to one base URL per
//! [`Environment`] and resolves keys against the active environment.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, OnceLock, RwLock};

use crate::ClientError;

/// A deployment environment.
///
/// Develop and test environments are named, so several of each can coexist
/// (`develop:d1`, `develop:d2`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Environment {
    Develop(String),
    Test(String),
    #[default]
    Release,
}

impl Environment {
    pub fn develop(name: impl Into<String>) -> Self {
        Environment::Develop(name.into())
    }

    pub fn test(name: impl Into<String>) -> Self {
        Environment::Test(name.into())
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Develop(name) => write!(f, "develop:{}", name),
            Environment::Test(name) => write!(f, "test:{}", name),
            Environment::Release => f.write_str("release"),
        }
    }
}

/// Error returned when parsing an [`Environment`] from a string fails.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid environment {0:?}, expected `release`, `develop:<name>` or `test:<name>`")]
pub struct ParseEnvironmentError(String);

impl FromStr for Environment {
    type Err = ParseEnvironmentError;

    /// Parse `release`, `develop:<name>` or `test:<name>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("release") {
            return Ok(Environment::Release);
        }
        match s.split_once(':') {
            Some((kind, name)) if !name.is_empty() => {
                if kind.eq_ignore_ascii_case("develop") {
                    Ok(Environment::Develop(name.to_string()))
                } else if kind.eq_ignore_ascii_case("test") {
                    Ok(Environment::Test(name.to_string()))
                } else {
                    Err(ParseEnvironmentError(s.to_string()))
                }
            }
            _ => Err(ParseEnvironmentError(s.to_string())),
        }
    }
}

/// The base URLs of one target key across environments.
///
/// Lookups match the environment exactly; there is no fallback from a
/// develop environment to release.
///
/// # Example
///
/// ```
/// use switchyard_client::{DomainTarget, Environment};
///
/// let api = DomainTarget::new()
///     .develop("d1", "https://x.test")
///     .release("https://api.example.com");
///
/// assert_eq!(api.url_for(&Environment::develop("d1")), Some("https://x.test"));
/// assert_eq!(api.url_for(&Environment::develop("d2")), None);
/// ```
#[derive(Clone, Debug, Default)]
pub struct DomainTarget {
    urls: HashMap<Environment, String>,
}

impl DomainTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base URL for an environment.
    pub fn url(mut self, environment: Environment, url: impl Into<String>) -> Self {
        self.urls.insert(environment, url.into());
        self
    }

    pub fn develop(self, name: impl Into<String>, url: impl Into<String>) -> Self {
        self.url(Environment::Develop(name.into()), url)
    }

    pub fn test(self, name: impl Into<String>, url: impl Into<String>) -> Self {
        self.url(Environment::Test(name.into()), url)
    }

    pub fn release(self, url: impl Into<String>) -> Self {
        self.url(Environment::Release, url)
    }

    /// The base URL for an environment, if one is registered.
    pub fn url_for(&self, environment: &Environment) -> Option<&str> {
        self.urls.get(environment).map(String::as_str)
    }
}

#[derive(Default)]
struct RegistryState {
    environment: Environment,
    targets: HashMap<String, DomainTarget>,
}

/// Maps logical target keys to base URLs for the active environment.
///
/// The registry is safe to share; switching the environment takes effect for
/// every request built afterwards, including the rebuilt second pass of a
/// call already in flight.
#[derive(Clone, Default)]
pub struct DomainRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl std::fmt::Debug for DomainRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("DomainRegistry")
            .field("environment", &state.environment)
            .field("targets", &state.targets.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl DomainRegistry {
    /// Create an empty registry in the release environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty registry in the given environment.
    pub fn with_environment(environment: Environment) -> Self {
        let registry = Self::new();
        registry.set_environment(environment);
        registry
    }

    /// The process-wide registry.
    pub fn global() -> &'static DomainRegistry {
        static GLOBAL: OnceLock<DomainRegistry> = OnceLock::new();
        GLOBAL.get_or_init(DomainRegistry::new)
    }

    /// Register or replace the URLs of a target key.
    pub fn register(&self, key: impl Into<String>, target: DomainTarget) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.targets.insert(key.into(), target);
    }

    /// Switch the active environment.
    pub fn set_environment(&self, environment: Environment) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        tracing::debug!(from = %state.environment, to = %environment, "switching environment");
        state.environment = environment;
    }

    /// The active environment.
    pub fn environment(&self) -> Environment {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .environment
            .clone()
    }

    /// Resolve a target key to its base URL in the active environment.
    pub fn resolve(&self, key: &str) -> Result<String, ClientError> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state
            .targets
            .get(key)
            .and_then(|target| target.url_for(&state.environment))
            .map(str::to_string)
            .ok_or_else(|| ClientError::invalid_target(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_core::ErrorKind;

    #[test]
    fn test_environment_parse() {
        assert_eq!("release".parse::<Environment>(), Ok(Environment::Release));
        assert_eq!("develop:d1".parse::<Environment>(), Ok(Environment::develop("d1")));
        assert_eq!(" TEST:qa ".parse::<Environment>(), Ok(Environment::test("qa")));
        assert!("develop".parse::<Environment>().is_err());
        assert!("develop:".parse::<Environment>().is_err());
        assert!("staging:s1".parse::<Environment>().is_err());
    }

    #[test]
    fn test_environment_display_round_trips() {
        for env in [
            Environment::Release,
            Environment::develop("d1"),
            Environment::test("t2"),
        ] {
            assert_eq!(env.to_string().parse::<Environment>(), Ok(env));
        }
    }

    #[test]
    fn test_resolve_active_environment() {
        let registry = DomainRegistry::with_environment(Environment::develop("d1"));
        registry.register(
            "api",
            DomainTarget::new()
                .develop("d1", "https://x.test")
                .release("https://api.example.com"),
        );

        assert_eq!(registry.resolve("api").unwrap(), "https://x.test");

        registry.set_environment(Environment::Release);
        assert_eq!(registry.resolve("api").unwrap(), "https://api.example.com");
    }

    #[test]
    fn test_resolve_failures() {
        let registry = DomainRegistry::with_environment(Environment::develop("d2"));
        registry.register("api", DomainTarget::new().develop("d1", "https://x.test"));

        let err = registry.resolve("api").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTarget);

        let err = registry.resolve("missing").unwrap_err();
        assert!(matches!(err, ClientError::InvalidTarget { key } if key == "missing"));
    }
}
