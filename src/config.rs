//! Environment-driven configuration, mirroring the upstream agent's
//! `internal/config` package: every value has a default except
//! `POLICY_SERVER_URL`, which is fatal to omit.

use std::time::Duration;

pub const DEFAULT_NAMESPACE: &str = "cf-workloads";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_PER_PAGE_SECURITY_GROUPS: u32 = 100;
pub const DEFAULT_TLS_CERT_PATH: &str = "/etc/ssl/certs/policy-agent/tls.crt";
pub const DEFAULT_TLS_KEY_PATH: &str = "/etc/ssl/certs/policy-agent/tls.key";
pub const DEFAULT_TLS_CA_PATH: &str = "/etc/ssl/certs/policy-agent/ca.crt";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub policy_server_url: String,
    pub namespace: String,
    pub poll_interval: Duration,
    pub per_page_security_groups: u32,
    pub tls_cert_path: String,
    pub tls_key_path: String,
    pub tls_ca_path: String,
}

impl Config {
    /// Loads configuration from the process environment.
    ///
    /// # Panics
    ///
    /// Panics if `POLICY_SERVER_URL` is unset or empty — this mirrors the
    /// upstream agent, which treats a missing policy server URL as a
    /// startup-fatal misconfiguration rather than something to recover from.
    pub fn load() -> Self {
        Self {
            policy_server_url: env_or_die("POLICY_SERVER_URL"),
            namespace: env_or_default("NAMESPACE", DEFAULT_NAMESPACE),
            poll_interval: poll_interval_or_default("POLL_INTERVAL", DEFAULT_POLL_INTERVAL),
            per_page_security_groups: per_page_or_default(
                "PER_PAGE_SECURITY_GROUPS",
                DEFAULT_PER_PAGE_SECURITY_GROUPS,
            ),
            tls_cert_path: env_or_default("TLS_CERT_PATH", DEFAULT_TLS_CERT_PATH),
            tls_key_path: env_or_default("TLS_KEY_PATH", DEFAULT_TLS_KEY_PATH),
            tls_ca_path: env_or_default("TLS_CA_PATH", DEFAULT_TLS_CA_PATH),
        }
    }
}

fn env_or_default(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_or_die(key: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => panic!("'{key}' environment variable is required but not set"),
    }
}

fn poll_interval_or_default(key: &str, default: Duration) -> Duration {
    let raw = match std::env::var(key) {
        Ok(raw) => raw,
        Err(_) => return default,
    };

    match humantime::parse_duration(&raw) {
        Ok(dur) if dur.is_zero() => {
            eprintln!("poll interval must be positive, falling back to {default:?}");
            default
        }
        Ok(dur) => dur,
        Err(err) => {
            eprintln!("error reading poll interval from '{key}': {err}, falling back to {default:?}");
            default
        }
    }
}

fn per_page_or_default(key: &str, default: u32) -> u32 {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|err| {
            eprintln!("error reading per page security groups from env: {err}, falling back to {default}");
            default
        }),
        Err(_) => default,
    }
}
