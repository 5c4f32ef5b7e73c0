//! Layered configuration.
//!
//! Each source (CLI flags with their environment fallbacks, an optional YAML
//! file) is parsed into a [`ConfigLayer`] whose fields are all optional.
//! Layers are merged highest-precedence first and then resolved once into an
//! [`ActionConfig`], which every component receives by reference.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::paths::{default_nix_user_conf, default_state_dir, StateLayout};
use crate::types::{
    Credentials, Endpoint, InitializeMode, InitializeParams, Repository, TuningParams,
};

/// Run id used when neither the host nor the caller provides one.
pub const LOCAL_RUN_ID: &str = "local";

// ---------------------------------------------------------------------------
// Layer
// ---------------------------------------------------------------------------

/// One configuration source. `None` means "not set here".
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigLayer {
    pub registry: Option<String>,
    pub repository_part1: Option<String>,
    pub repository_part2: Option<String>,
    /// Static proxy URL.
    pub endpoint: Option<String>,
    /// Container whose network address serves the proxy.
    pub endpoint_container: Option<String>,
    pub anonymous: Option<bool>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub signing_key: Option<String>,
    pub persist_signing_key: Option<bool>,
    pub parallel: Option<u32>,
    pub max_retry: Option<u32>,
    pub zstd_level: Option<i32>,
    pub no_closure: Option<bool>,
    pub extra_push_args: Option<Vec<String>>,
    pub initialize: Option<InitializeMode>,
    pub initialize_priority: Option<u32>,
    pub no_mass_query: Option<bool>,
    pub substituter_priority: Option<u32>,
    pub state_dir: Option<PathBuf>,
    pub nix_bin: Option<String>,
    pub docker_bin: Option<String>,
    pub utility_bin: Option<String>,
    pub utility_installable: Option<String>,
    pub nix_user_conf: Option<PathBuf>,
    pub run_id: Option<String>,
}

impl ConfigLayer {
    /// Parse a YAML config file.
    pub fn load_yaml(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Fill every field unset in `self` from `lower`.
    pub fn merge(self, lower: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            registry: self.registry.or(lower.registry),
            repository_part1: self.repository_part1.or(lower.repository_part1),
            repository_part2: self.repository_part2.or(lower.repository_part2),
            endpoint: self.endpoint.or(lower.endpoint),
            endpoint_container: self.endpoint_container.or(lower.endpoint_container),
            anonymous: self.anonymous.or(lower.anonymous),
            username: self.username.or(lower.username),
            password: self.password.or(lower.password),
            signing_key: self.signing_key.or(lower.signing_key),
            persist_signing_key: self.persist_signing_key.or(lower.persist_signing_key),
            parallel: self.parallel.or(lower.parallel),
            max_retry: self.max_retry.or(lower.max_retry),
            zstd_level: self.zstd_level.or(lower.zstd_level),
            no_closure: self.no_closure.or(lower.no_closure),
            extra_push_args: self.extra_push_args.or(lower.extra_push_args),
            initialize: self.initialize.or(lower.initialize),
            initialize_priority: self.initialize_priority.or(lower.initialize_priority),
            no_mass_query: self.no_mass_query.or(lower.no_mass_query),
            substituter_priority: self.substituter_priority.or(lower.substituter_priority),
            state_dir: self.state_dir.or(lower.state_dir),
            nix_bin: self.nix_bin.or(lower.nix_bin),
            docker_bin: self.docker_bin.or(lower.docker_bin),
            utility_bin: self.utility_bin.or(lower.utility_bin),
            utility_installable: self.utility_installable.or(lower.utility_installable),
            nix_user_conf: self.nix_user_conf.or(lower.nix_user_conf),
            run_id: self.run_id.or(lower.run_id),
        }
    }
}

// ---------------------------------------------------------------------------
// Raw-value parsing (CLI / environment inputs arrive as strings)
// ---------------------------------------------------------------------------

/// Blank input counts as unset.
pub fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Parse a boolean input (`true/false`, `yes/no`, `1/0`, `on/off`).
pub fn parse_flag(field: &'static str, value: Option<&str>) -> Result<Option<bool>, ConfigError> {
    let Some(raw) = non_blank(value) else {
        return Ok(None);
    };
    match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(Some(true)),
        "false" | "no" | "0" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::Invalid {
            field,
            reason: format!("expected a boolean, got '{raw}'"),
        }),
    }
}

/// Parse a numeric (or other `FromStr`) input.
pub fn parse_value<T>(field: &'static str, value: Option<&str>) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = non_blank(value) else {
        return Ok(None);
    };
    raw.parse::<T>()
        .map(Some)
        .map_err(|err| ConfigError::Invalid {
            field,
            reason: format!("'{raw}': {err}"),
        })
}

// ---------------------------------------------------------------------------
// Resolved config
// ---------------------------------------------------------------------------

/// Where the cache proxy lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointSource {
    Url(Endpoint),
    /// Resolved at setup time from the container's network address.
    Container(String),
}

/// Where the push utility comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UtilitySource {
    /// A program on `PATH` or an absolute path.
    Program(String),
    /// A flake reference built with `nix build`.
    Installable(String),
}

/// Fully resolved configuration, built once at process start.
#[derive(Debug, Clone)]
pub struct ActionConfig {
    pub repository: Repository,
    pub endpoint: EndpointSource,
    /// `None` in anonymous mode.
    pub credentials: Option<Credentials>,
    pub signing_key: Option<String>,
    pub persist_signing_key: bool,
    pub tuning: TuningParams,
    pub push_closure: bool,
    pub extra_push_args: Vec<String>,
    pub initialize: InitializeParams,
    pub substituter_priority: Option<u32>,
    pub state_dir: PathBuf,
    pub nix_bin: String,
    pub docker_bin: String,
    pub utility: UtilitySource,
    pub nix_user_conf: Option<PathBuf>,
    pub run_id: String,
}

impl ActionConfig {
    /// Validate a merged layer and apply defaults.
    pub fn from_layer(layer: ConfigLayer) -> Result<Self, ConfigError> {
        let registry = required("registry", layer.registry)?;
        let part1 = required("repository_part1", layer.repository_part1)?;
        let part2 = required("repository_part2", layer.repository_part2)?;
        for (field, value) in [("repository_part1", &part1), ("repository_part2", &part2)] {
            if value.contains('/') {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("'{value}' must not contain '/'"),
                });
            }
        }

        let endpoint = match (
            non_blank(layer.endpoint.as_deref()),
            non_blank(layer.endpoint_container.as_deref()),
        ) {
            (Some(url), None) => {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(ConfigError::Invalid {
                        field: "endpoint",
                        reason: format!("'{url}' is not an http(s) URL"),
                    });
                }
                EndpointSource::Url(Endpoint::new(url))
            }
            (None, Some(container)) => EndpointSource::Container(container),
            (Some(_), Some(_)) => {
                return Err(ConfigError::Invalid {
                    field: "endpoint",
                    reason: "set either an endpoint URL or an endpoint container, not both"
                        .to_string(),
                })
            }
            (None, None) => return Err(ConfigError::Missing("endpoint")),
        };

        let anonymous = layer.anonymous.unwrap_or(false);
        let credentials = if anonymous {
            None
        } else {
            Some(Credentials {
                username: required("username", layer.username)?,
                password: required("password", layer.password)?,
            })
        };

        let tuning = TuningParams {
            parallel: layer.parallel.unwrap_or(TuningParams::default().parallel),
            max_retry: layer.max_retry.unwrap_or(TuningParams::default().max_retry),
            zstd_level: layer.zstd_level.unwrap_or(TuningParams::default().zstd_level),
        };
        if tuning.parallel == 0 {
            return Err(ConfigError::Invalid {
                field: "parallel",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(-7..=22).contains(&tuning.zstd_level) {
            return Err(ConfigError::Invalid {
                field: "zstd_level",
                reason: format!("{} is outside the zstd range -7..=22", tuning.zstd_level),
            });
        }

        let defaults = InitializeParams::default();
        let initialize = InitializeParams {
            mode: layer.initialize.unwrap_or(defaults.mode),
            priority: layer.initialize_priority.unwrap_or(defaults.priority),
            mass_query: !layer.no_mass_query.unwrap_or(false),
        };

        let utility = match non_blank(layer.utility_installable.as_deref()) {
            Some(installable) => UtilitySource::Installable(installable),
            None => UtilitySource::Program(
                non_blank(layer.utility_bin.as_deref()).unwrap_or_else(|| "oranc".to_string()),
            ),
        };

        Ok(Self {
            repository: Repository {
                registry,
                part1,
                part2,
            },
            endpoint,
            credentials,
            signing_key: non_blank(layer.signing_key.as_deref()),
            persist_signing_key: layer.persist_signing_key.unwrap_or(false),
            tuning,
            push_closure: !layer.no_closure.unwrap_or(false),
            extra_push_args: layer
                .extra_push_args
                .unwrap_or_default()
                .into_iter()
                .filter(|arg| !arg.trim().is_empty())
                .collect(),
            initialize,
            substituter_priority: layer.substituter_priority,
            state_dir: layer.state_dir.unwrap_or_else(default_state_dir),
            nix_bin: non_blank(layer.nix_bin.as_deref()).unwrap_or_else(|| "nix".to_string()),
            docker_bin: non_blank(layer.docker_bin.as_deref())
                .unwrap_or_else(|| "docker".to_string()),
            utility,
            nix_user_conf: layer.nix_user_conf,
            run_id: non_blank(layer.run_id.as_deref()).unwrap_or_else(|| LOCAL_RUN_ID.to_string()),
        })
    }

    pub fn state(&self) -> StateLayout {
        StateLayout::new(&self.state_dir)
    }

    /// User-level `nix.conf` that includes the generated fragment.
    pub fn nix_user_conf(&self) -> Result<PathBuf, ConfigError> {
        self.nix_user_conf
            .clone()
            .or_else(default_nix_user_conf)
            .ok_or(ConfigError::Missing("nix_user_conf"))
    }
}

fn required(field: &'static str, value: Option<String>) -> Result<String, ConfigError> {
    non_blank(value.as_deref()).ok_or(ConfigError::Missing(field))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
