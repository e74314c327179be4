use std::{env, fmt::Display, fs::read_to_string, str::FromStr};

use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "redis" => Ok(StoreBackend::Redis),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown store backend '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub redis_url: String,
    pub store_backend: StoreBackend,
    /// The one address granted the admin claim at signup/login.
    pub admin_email: String,
    /// Display string for the fixed fee, e.g. "N500".
    pub fee_amount: String,
    pub session_ttl_secs: u64,
    /// Bound on the optimistic vote retry loop.
    pub cast_attempts: u32,
    pub password_pepper: String,
}

impl Config {
    pub fn load() -> Self {
        Self {
            port: try_load("VOTE_PORT", "1111"),
            redis_url: try_load("VOTE_REDIS_URL", "redis://127.0.0.1:6379"),
            store_backend: try_load("VOTE_STORE", "redis"),
            admin_email: try_load("VOTE_ADMIN_EMAIL", "admin@naotems.edu"),
            fee_amount: try_load("VOTE_FEE_AMOUNT", "N500"),
            session_ttl_secs: try_load("VOTE_SESSION_TTL", "2592000"),
            cast_attempts: try_load("VOTE_CAST_ATTEMPTS", "5"),
            password_pepper: read_secret_or_env("VOTE_PEPPER"),
        }
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        warn!("Environment variable {key} not found, using default");
    })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
        })
        .expect("Environment misconfigured!")
}

fn read_secret_or_env(secret_name: &str) -> String {
    let path = format!("/run/secrets/{secret_name}");

    if let Ok(s) = read_to_string(&path) {
        return s.trim().to_string();
    }

    warn!("No secret file for {secret_name}, falling back to environment");
    env::var(secret_name)
        .map_err(|_| {
            warn!("{secret_name} not set anywhere");
        })
        .expect("Secrets misconfigured!")
}
