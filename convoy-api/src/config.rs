//! API Configuration Module
//!
//! CORS and request-shaping settings for the HTTP layer. Loaded from
//! environment variables with development-friendly defaults.

// ============================================================================
// API CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    // ========================================================================
    // CORS Configuration
    // ========================================================================
    /// Allowed CORS origins (comma-separated in env var).
    /// Empty means allow all origins (dev mode).
    /// Example: "https://convoy.dev,https://*.convoy.dev"
    pub cors_origins: Vec<String>,

    /// Whether to allow credentials in CORS requests.
    pub cors_allow_credentials: bool,

    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,

    // ========================================================================
    // Reads
    // ========================================================================
    /// Upper bound on `limit` for event reads and searches.
    pub max_page_size: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            cors_origins: Vec::new(),
            cors_allow_credentials: false,
            cors_max_age_secs: 86400,
            max_page_size: 1000,
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `CONVOY_CORS_ORIGINS`: Comma-separated allowed origins (empty = allow all)
    /// - `CONVOY_CORS_ALLOW_CREDENTIALS`: "true" or "false" (default: false)
    /// - `CONVOY_CORS_MAX_AGE_SECS`: Preflight cache duration (default: 86400)
    /// - `CONVOY_API_MAX_PAGE_SIZE`: Largest accepted `limit` (default: 1000)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cors_origins = std::env::var("CONVOY_CORS_ORIGINS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let cors_allow_credentials = std::env::var("CONVOY_CORS_ALLOW_CREDENTIALS")
            .ok()
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(defaults.cors_allow_credentials);

        let cors_max_age_secs = std::env::var("CONVOY_CORS_MAX_AGE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.cors_max_age_secs);

        let max_page_size = std::env::var("CONVOY_API_MAX_PAGE_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(defaults.max_page_size);

        Self {
            cors_origins,
            cors_allow_credentials,
            cors_max_age_secs,
            max_page_size,
        }
    }

    /// Check if running in production mode (strict CORS).
    pub fn is_production(&self) -> bool {
        !self.cors_origins.is_empty()
    }

    /// Clamp a requested page size to `1..=max_page_size`.
    pub fn clamp_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.max_page_size)
            .clamp(1, self.max_page_size)
    }

    /// Check if a given origin is allowed.
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        if self.cors_origins.is_empty() {
            return true;
        }

        self.cors_origins.iter().any(|allowed| {
            if allowed == origin {
                return true;
            }
            // Wildcard subdomains: *.convoy.dev
            if let Some(domain) = allowed.strip_prefix("*.") {
                if let Some(host) = origin.strip_prefix("https://") {
                    return host
                        .strip_suffix(domain)
                        .is_some_and(|sub| sub.ends_with('.') && sub.len() > 1);
                }
            }
            false
        })
    }
}
