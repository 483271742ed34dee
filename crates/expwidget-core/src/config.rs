//! Widget configuration.
//!
//! A [`WidgetConfig`] is built either in code or from the `data-*`
//! attributes of the script tag that loaded the widget. Validation happens
//! here; everything downstream can assume a well-formed config.

use std::time::Duration;
use thiserror::Error;

/// How long a cached creative stays fresh unless configured otherwise.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Script tag attribute carrying the API base URL.
pub const ATTR_API_BASE: &str = "data-api-base";
/// Script tag attribute carrying the experiment identifier.
pub const ATTR_EXPERIMENT_ID: &str = "data-experiment-id";
/// Script tag attribute carrying a stable user key.
pub const ATTR_USER_KEY: &str = "data-user-key";
/// Script tag attribute enabling per-load random assignment.
pub const ATTR_RANDOM_ASSIGNMENT: &str = "data-random-assignment";
/// Script tag attribute overriding the cache TTL (milliseconds).
pub const ATTR_CACHE_TTL: &str = "data-cache-ttl";
/// Script tag attribute disabling the creative cache.
pub const ATTR_DISABLE_CACHE: &str = "data-disable-cache";

/// Every attribute [`WidgetConfig::from_attributes`] understands.
pub const ATTRIBUTES: [&str; 6] = [
    ATTR_API_BASE,
    ATTR_EXPERIMENT_ID,
    ATTR_USER_KEY,
    ATTR_RANDOM_ASSIGNMENT,
    ATTR_CACHE_TTL,
    ATTR_DISABLE_CACHE,
];

/// Configuration errors. All of them are fatal at initialization.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A required attribute is absent or blank
    #[error("missing required attribute: {0}")]
    Missing(&'static str),
    /// An attribute could not be parsed
    #[error("invalid value for {attribute}: {value:?}")]
    Invalid {
        /// Attribute name
        attribute: &'static str,
        /// Offending value
        value: String,
    },
}

/// Immutable widget configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidgetConfig {
    api_base: String,
    experiment_id: String,
    user_key: Option<String>,
    random_assignment: bool,
    cache_ttl: Duration,
    disable_cache: bool,
}

impl WidgetConfig {
    /// Create a config with the two required fields.
    ///
    /// A single trailing `/` on the API base is dropped so paths can be
    /// appended verbatim.
    pub fn new(
        api_base: impl Into<String>,
        experiment_id: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let api_base = api_base.into();
        let experiment_id = experiment_id.into();

        if api_base.trim().is_empty() {
            return Err(ConfigError::Missing(ATTR_API_BASE));
        }
        if experiment_id.trim().is_empty() {
            return Err(ConfigError::Missing(ATTR_EXPERIMENT_ID));
        }

        let api_base = api_base
            .strip_suffix('/')
            .map_or_else(|| api_base.clone(), str::to_string);

        Ok(Self {
            api_base,
            experiment_id,
            user_key: None,
            random_assignment: false,
            cache_ttl: DEFAULT_CACHE_TTL,
            disable_cache: false,
        })
    }

    /// Parse the script tag's data attributes.
    ///
    /// Unknown attributes are ignored. Booleans follow the tag convention:
    /// only the literal `true` enables a flag.
    pub fn from_attributes<'a, I>(attributes: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut api_base = None;
        let mut experiment_id = None;
        let mut user_key = None;
        let mut random_assignment = false;
        let mut cache_ttl = None;
        let mut disable_cache = false;

        for (name, value) in attributes {
            match name {
                ATTR_API_BASE => api_base = Some(value),
                ATTR_EXPERIMENT_ID => experiment_id = Some(value),
                ATTR_USER_KEY => user_key = Some(value),
                ATTR_RANDOM_ASSIGNMENT => random_assignment = value == "true",
                ATTR_DISABLE_CACHE => disable_cache = value == "true",
                ATTR_CACHE_TTL => {
                    let ms = value.trim().parse::<u64>().map_err(|_| ConfigError::Invalid {
                        attribute: ATTR_CACHE_TTL,
                        value: value.to_string(),
                    })?;
                    cache_ttl = Some(Duration::from_millis(ms));
                }
                _ => {}
            }
        }

        let mut config = Self::new(
            api_base.ok_or(ConfigError::Missing(ATTR_API_BASE))?,
            experiment_id.ok_or(ConfigError::Missing(ATTR_EXPERIMENT_ID))?,
        )?
        .with_random_assignment(random_assignment)
        .with_cache_disabled(disable_cache);

        if let Some(key) = user_key {
            config = config.with_user_key(key);
        }
        if let Some(ttl) = cache_ttl {
            config = config.with_cache_ttl(ttl);
        }
        Ok(config)
    }

    /// Use a stable user key instead of the anonymous id. Blank keys are ignored.
    #[must_use]
    pub fn with_user_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.user_key = if key.trim().is_empty() { None } else { Some(key) };
        self
    }

    /// Request a fresh random assignment on every load.
    #[must_use]
    pub fn with_random_assignment(mut self, enabled: bool) -> Self {
        self.random_assignment = enabled;
        self
    }

    /// Override the cache TTL. Zero disables caching.
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Disable the creative cache explicitly.
    #[must_use]
    pub fn with_cache_disabled(mut self, disabled: bool) -> Self {
        self.disable_cache = disabled;
        self
    }

    /// API base URL without trailing slash.
    #[must_use]
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Experiment identifier.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Configured stable user key, if any.
    #[must_use]
    pub fn user_key(&self) -> Option<&str> {
        self.user_key.as_deref()
    }

    /// Whether every load gets a random assignment.
    #[must_use]
    pub const fn random_assignment(&self) -> bool {
        self.random_assignment
    }

    /// Cache TTL.
    #[must_use]
    pub const fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    /// Whether the creative cache applies.
    ///
    /// Random assignment always disables caching, whatever the TTL says.
    #[must_use]
    pub const fn caching_enabled(&self) -> bool {
        !self.disable_cache && !self.random_assignment && !self.cache_ttl.is_zero()
    }
}
