//! Server configuration, loaded from a TOML file.

use serde::Deserialize;
use thiserror::Error;

use warden_core::is_full_user_id_of_domain;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration from {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode configuration: {0}")]
    Decode(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration for the warden server.
#[derive(Debug, Deserialize)]
pub struct WardenConfig {
    pub matrix: MatrixConfig,

    pub reconciliation: ReconciliationConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub admin_api: AdminApiConfig,

    #[serde(default)]
    pub policy_provider: PolicyProviderConfig,

    #[serde(default)]
    pub misc: MiscConfig,
}

/// The homeserver being fronted.
#[derive(Debug, Deserialize)]
pub struct MatrixConfig {
    /// The domain user ids live on (`example.com` of `@user:example.com`).
    pub homeserver_domain_name: String,

    /// Where the homeserver's APIs are reachable (e.g.
    /// `http://localhost:8008`). Client traffic should *not* go there
    /// directly; it goes through the gateway.
    pub homeserver_api_endpoint: String,

    /// The secret shared with the homeserver's shared-secret-auth plugin.
    pub auth_shared_secret: String,

    /// The secret for the admin registration API.
    pub registration_shared_secret: String,

    /// Upper bound on any single homeserver call.
    #[serde(default = "default_matrix_timeout_ms")]
    pub timeout_milliseconds: u64,
}

#[derive(Debug, Deserialize)]
pub struct ReconciliationConfig {
    /// The internal user reconciliation acts as. Must be hosted on the
    /// managed domain and registered upstream (admin rights included).
    pub user_id: String,

    /// How long to wait before retrying a failed reconciliation pass.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_milliseconds: u64,
}

#[derive(Debug, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_listen_address")]
    pub listen_address: String,

    /// Upper bound on a proxied exchange. Needs headroom above the matrix
    /// timeout, or proxied calls die before their upstream legs do.
    #[serde(default = "default_gateway_timeout_ms")]
    pub timeout_milliseconds: u64,

    #[serde(default)]
    pub internal_auth: InternalAuthConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_address: default_gateway_listen_address(),
            timeout_milliseconds: default_gateway_timeout_ms(),
            internal_auth: InternalAuthConfig::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct InternalAuthConfig {
    #[serde(default)]
    pub enabled: bool,

    /// CIDRs allowed to call the internal auth endpoint. Unset: local and
    /// private networks. Explicitly empty: everything.
    #[serde(default)]
    pub ip_network_allowlist: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct AdminApiConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_admin_listen_address")]
    pub listen_address: String,

    /// The bearer token admin calls must present.
    #[serde(default)]
    pub authorization_bearer_token: String,
}

impl Default for AdminApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_address: default_admin_listen_address(),
            authorization_bearer_token: String::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PolicyProviderConfig {
    /// `static_file` or `last_seen_store_policy`.
    #[serde(rename = "type", default = "default_provider_type")]
    pub provider_type: String,

    /// Policy file path for the static-file provider.
    #[serde(default)]
    pub path: Option<String>,

    /// Cache file path for the last-seen provider.
    #[serde(default)]
    pub cache_path: Option<String>,
}

impl Default for PolicyProviderConfig {
    fn default() -> Self {
        Self {
            provider_type: default_provider_type(),
            path: None,
            cache_path: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct MiscConfig {
    /// Raises the default log level to debug.
    #[serde(default)]
    pub debug: bool,
}

fn default_matrix_timeout_ms() -> u64 {
    25_000
}

fn default_retry_interval_ms() -> u64 {
    30_000
}

fn default_gateway_listen_address() -> String {
    "127.0.0.1:41080".to_owned()
}

fn default_gateway_timeout_ms() -> u64 {
    40_000
}

fn default_admin_listen_address() -> String {
    "127.0.0.1:41081".to_owned()
}

fn default_provider_type() -> String {
    "static_file".to_owned()
}

impl WardenConfig {
    /// Reads and validates the configuration file.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;

        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !is_full_user_id_of_domain(
            &self.reconciliation.user_id,
            &self.matrix.homeserver_domain_name,
        ) {
            return Err(ConfigError::Invalid(format!(
                "reconciliation user `{}` is not hosted on the managed homeserver domain ({})",
                self.reconciliation.user_id, self.matrix.homeserver_domain_name
            )));
        }

        if self.matrix.timeout_milliseconds == 0 {
            return Err(ConfigError::Invalid(
                "matrix.timeout_milliseconds needs to be a positive number".to_owned(),
            ));
        }

        if self.reconciliation.retry_interval_milliseconds == 0 {
            return Err(ConfigError::Invalid(
                "reconciliation.retry_interval_milliseconds needs to be a positive number"
                    .to_owned(),
            ));
        }

        if self.gateway.timeout_milliseconds < self.matrix.timeout_milliseconds {
            return Err(ConfigError::Invalid(format!(
                "gateway.timeout_milliseconds ({}) needs to be larger than matrix.timeout_milliseconds ({})",
                self.gateway.timeout_milliseconds, self.matrix.timeout_milliseconds
            )));
        }

        if self.admin_api.enabled && self.admin_api.authorization_bearer_token.is_empty() {
            return Err(ConfigError::Invalid(
                "admin_api.authorization_bearer_token must be set when the admin API is enabled"
                    .to_owned(),
            ));
        }

        match self.policy_provider.provider_type.as_str() {
            "static_file" => {
                if self.policy_provider.path.is_none() {
                    return Err(ConfigError::Invalid(
                        "policy_provider.path is required for the static_file provider".to_owned(),
                    ));
                }
            }
            "last_seen_store_policy" => {
                if self.policy_provider.cache_path.is_none() {
                    return Err(ConfigError::Invalid(
                        "policy_provider.cache_path is required for the last_seen_store_policy provider"
                            .to_owned(),
                    ));
                }
            }
            other => {
                return Err(ConfigError::Invalid(format!(
                    "unknown policy provider type `{other}`"
                )));
            }
        }

        Ok(())
    }
}
