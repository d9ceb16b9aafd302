//! Startup configuration from `NSM_*` environment variables.
//!
//! The configuration is read and validated once, before any network I/O, and
//! then passed by reference to whatever needs it.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chain::elements::TokenPools;
use networkservice::{ClientName, NetworkServiceDescriptor, NscError};
use thiserror::Error;
use transport::{IdentityFiles, Target};

use crate::nsurl;

const DEFAULT_NAME: &str = "nsc";
const DEFAULT_CONNECT_TO: &str = "unix:///var/lib/networkservicemesh/nsm.io.sock";
const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_CERT_FILE: &str = "/run/nsm/identity/cert.pem";
const DEFAULT_KEY_FILE: &str = "/run/nsm/identity/key.pem";
const DEFAULT_BUNDLE_FILE: &str = "/run/nsm/identity/bundle.pem";
const DEFAULT_CGROUP_DIR: &str = "/sys/fs/cgroup/devices";

/// Configuration problems, each naming the offending variable or URL.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable is present but malformed.
    #[error("{variable}: {reason}")]
    Invalid {
        /// Variable name.
        variable: &'static str,
        /// Why its value was refused.
        reason: String,
    },

    /// A network-service URL is malformed.
    #[error("network service '{url}': {reason}")]
    NetworkService {
        /// URL as given.
        url: String,
        /// Why it was refused.
        reason: String,
    },
}

impl From<ConfigError> for NscError {
    fn from(err: ConfigError) -> Self {
        NscError::config(err.to_string())
    }
}

/// Validated startup configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Client name; connection ids are `<name>-<index>`.
    pub name: ClientName,
    /// Manager address.
    pub connect_to: Target,
    /// Bound on dial plus handshake.
    pub dial_timeout: Duration,
    /// Bound on each request and each close.
    pub request_timeout: Duration,
    /// Upper bound on minted bearer tokens.
    pub max_token_lifetime: Duration,
    /// Services to connect to, in request order.
    pub network_services: Vec<NetworkServiceDescriptor>,
    /// Identity PEM files.
    pub identity: IdentityFiles,
    /// SR-IOV token pools by name.
    pub sriov_tokens: TokenPools,
    /// cgroup directory offered with vfio preferences.
    pub cgroup_dir: String,
}

impl Config {
    /// Reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads variables through `lookup`; unset and empty values take defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let name = get("NSM_NAME").unwrap_or_else(|| DEFAULT_NAME.to_string());
        let name = ClientName::new(name.trim()).ok_or_else(|| ConfigError::Invalid {
            variable: "NSM_NAME",
            reason: "must not be empty".into(),
        })?;

        let connect_to = get("NSM_CONNECT_TO")
            .unwrap_or_else(|| DEFAULT_CONNECT_TO.to_string())
            .trim()
            .parse::<Target>()
            .map_err(|err| ConfigError::Invalid {
                variable: "NSM_CONNECT_TO",
                reason: err.to_string(),
            })?;

        let duration =
            |variable: &'static str, default: Duration| -> Result<Duration, ConfigError> {
                let Some(value) = get(variable) else {
                    return Ok(default);
                };
                let parsed =
                    humantime::parse_duration(value.trim()).map_err(|err| ConfigError::Invalid {
                        variable,
                        reason: err.to_string(),
                    })?;
                if parsed.is_zero() {
                    return Err(ConfigError::Invalid {
                        variable,
                        reason: "must be greater than zero".into(),
                    });
                }
                Ok(parsed)
            };

        let network_services = get("NSM_NETWORK_SERVICES")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|url| !url.is_empty())
                    .map(nsurl::parse)
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default();

        let path = |variable: &str, default: &str| {
            PathBuf::from(get(variable).unwrap_or_else(|| default.to_string()))
        };

        Ok(Self {
            name,
            connect_to,
            dial_timeout: duration("NSM_DIAL_TIMEOUT", DEFAULT_DIAL_TIMEOUT)?,
            request_timeout: duration("NSM_REQUEST_TIMEOUT", DEFAULT_REQUEST_TIMEOUT)?,
            max_token_lifetime: duration("NSM_MAX_TOKEN_LIFETIME", DEFAULT_MAX_TOKEN_LIFETIME)?,
            network_services,
            identity: IdentityFiles {
                cert: path("NSM_IDENTITY_CERT_FILE", DEFAULT_CERT_FILE),
                key: path("NSM_IDENTITY_KEY_FILE", DEFAULT_KEY_FILE),
                bundle: path("NSM_IDENTITY_BUNDLE_FILE", DEFAULT_BUNDLE_FILE),
            },
            sriov_tokens: get("NSM_SRIOV_TOKENS")
                .map(|pools| parse_token_pools(&pools))
                .transpose()?
                .unwrap_or_default(),
            cgroup_dir: get("NSM_CGROUP_DIR").unwrap_or_else(|| DEFAULT_CGROUP_DIR.to_string()),
        })
    }
}

/// Parses `pool=id1,id2;pool2=id3`.
fn parse_token_pools(pools_var: &str) -> Result<TokenPools, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        variable: "NSM_SRIOV_TOKENS",
        reason,
    };
    let mut pools = BTreeMap::new();
    for entry in pools_var.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let (pool, ids) = entry
            .split_once('=')
            .ok_or_else(|| invalid(format!("'{entry}' is not <pool>=<id>[,<id>...]")))?;
        let pool = pool.trim();
        if pool.is_empty() {
            return Err(invalid(format!("'{entry}' has no pool name")));
        }
        let ids: Vec<String> = ids
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();
        if ids.is_empty() {
            return Err(invalid(format!("pool '{pool}' has no token ids")));
        }
        if pools.insert(pool.to_string(), ids).is_some() {
            return Err(invalid(format!("pool '{pool}' listed twice")));
        }
    }
    Ok(pools)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config(&[]).unwrap();
        assert_eq!(config.name.as_str(), "nsc");
        assert_eq!(
            config.connect_to,
            Target::Unix(PathBuf::from("/var/lib/networkservicemesh/nsm.io.sock"))
        );
        assert_eq!(config.dial_timeout, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert_eq!(config.max_token_lifetime, Duration::from_secs(86_400));
        assert!(config.network_services.is_empty());
        assert!(config.sriov_tokens.is_empty());
        assert_eq!(config.identity.key, PathBuf::from("/run/nsm/identity/key.pem"));
    }

    #[test]
    fn reads_every_variable() {
        let config = config(&[
            ("NSM_NAME", "client-7"),
            ("NSM_CONNECT_TO", "tcp://10.0.0.2:5001"),
            ("NSM_DIAL_TIMEOUT", "500ms"),
            ("NSM_REQUEST_TIMEOUT", "1m"),
            ("NSM_MAX_TOKEN_LIFETIME", "10m"),
            ("NSM_NETWORK_SERVICES", "kernel://svc-a, vfio+kernel://svc-b?app=x"),
            ("NSM_SRIOV_TOKENS", "intel/10G=t1,t2; mlx/25G=t3"),
            ("NSM_CGROUP_DIR", "/tmp/cgroup"),
        ])
        .unwrap();

        assert_eq!(config.name.as_str(), "client-7");
        assert_eq!(
            config.connect_to,
            Target::Tcp {
                host: "10.0.0.2".into(),
                port: 5001
            }
        );
        assert_eq!(config.dial_timeout, Duration::from_millis(500));
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.max_token_lifetime, Duration::from_secs(600));
        assert_eq!(config.network_services.len(), 2);
        assert_eq!(config.network_services[1].labels["app"], "x");
        assert_eq!(config.sriov_tokens["intel/10G"], vec!["t1", "t2"]);
        assert_eq!(config.sriov_tokens["mlx/25G"], vec!["t3"]);
        assert_eq!(config.cgroup_dir, "/tmp/cgroup");
    }

    #[test]
    fn malformed_values_name_their_variable() {
        let cases = [
            ("NSM_CONNECT_TO", "http://nsmgr"),
            ("NSM_DIAL_TIMEOUT", "soon"),
            ("NSM_REQUEST_TIMEOUT", "0s"),
            ("NSM_SRIOV_TOKENS", "intel/10G"),
            ("NSM_SRIOV_TOKENS", "a=t1;a=t2"),
        ];
        for (variable, value) in cases {
            let err = config(&[(variable, value)]).unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { variable: v, .. } if v == variable),
                "{variable}={value} gave {err}"
            );
        }
    }

    #[test]
    fn bad_network_service_is_a_config_error() {
        let err = config(&[("NSM_NETWORK_SERVICES", "kernel://svc-a,svc-b")]).unwrap_err();
        assert!(matches!(err, ConfigError::NetworkService { ref url, .. } if url == "svc-b"));

        let err: NscError = err.into();
        assert!(matches!(err, NscError::Config { .. }));
    }
}
