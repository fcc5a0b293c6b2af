//! Environment-driven configuration, read once at start-up.

use crate::auth::DEFAULT_HASH_COST;
use crate::storage::cloudinary::{CloudinaryCredentials, SignatureAlgorithm};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("{0} is required by the selected storage backend")]
    Missing(&'static str),
}

/// Which of the two deployment variants this process serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Accounts with PINs; files are scoped to their owner.
    Authenticated,
    /// No accounts; every file lives in one global namespace.
    Anonymous,
}

impl FromStr for AccessMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "authenticated" | "auth" => Ok(AccessMode::Authenticated),
            "anonymous" | "anon" => Ok(AccessMode::Anonymous),
            other => Err(format!("expected `authenticated` or `anonymous`, got `{}`", other)),
        }
    }
}

impl AccessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::Authenticated => "authenticated",
            AccessMode::Anonymous => "anonymous",
        }
    }
}

#[derive(Debug, Clone)]
pub enum StorageConfig {
    Cloudinary(CloudinaryCredentials),
    Local { dir: String, public_base_url: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub frontend_url: Option<String>,
    pub storage: StorageConfig,
    /// `None` means a random per-process secret.
    pub jwt_secret: Option<String>,
    pub port: u16,
    pub access_mode: AccessMode,
    pub hash_cost: u32,
}

impl Config {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Err(e) if !e.not_found() => {
                return Err(ConfigError::Invalid {
                    name: ".env",
                    reason: e.to_string(),
                })
            }
            _ => {}
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let port = parse_or(&var, "PORT", 5000u16)?;
        let access_mode = parse_or(&var, "ACCESS_MODE", AccessMode::Authenticated)?;
        let hash_cost = parse_or(&var, "HASH_COST", DEFAULT_HASH_COST)?;
        if !(4..=31).contains(&hash_cost) {
            return Err(ConfigError::Invalid {
                name: "HASH_COST",
                reason: "must be between 4 and 31".into(),
            });
        }

        let cloud_name = var("CLOUDINARY_CLOUD_NAME");
        let api_key = var("CLOUDINARY_API_KEY");
        let api_secret = var("CLOUDINARY_API_SECRET");
        let has_cloudinary = cloud_name.is_some() && api_key.is_some() && api_secret.is_some();

        let backend = var("STORAGE_BACKEND")
            .map(|b| b.trim().to_ascii_lowercase())
            .unwrap_or_else(|| if has_cloudinary { "cloudinary" } else { "local" }.to_string());

        let storage = match backend.as_str() {
            "cloudinary" => StorageConfig::Cloudinary(CloudinaryCredentials {
                cloud_name: cloud_name.ok_or(ConfigError::Missing("CLOUDINARY_CLOUD_NAME"))?,
                api_key: api_key.ok_or(ConfigError::Missing("CLOUDINARY_API_KEY"))?,
                api_secret: api_secret.ok_or(ConfigError::Missing("CLOUDINARY_API_SECRET"))?,
                signature_algorithm: parse_or(
                    &var,
                    "CLOUDINARY_SIGNATURE_ALGORITHM",
                    SignatureAlgorithm::Sha1,
                )?,
            }),
            "local" => StorageConfig::Local {
                dir: var("LOCAL_STORAGE_DIR").unwrap_or_else(|| "files".to_string()),
                public_base_url: var("PUBLIC_BASE_URL")
                    .unwrap_or_else(|| format!("http://localhost:{}", port)),
            },
            other => {
                return Err(ConfigError::Invalid {
                    name: "STORAGE_BACKEND",
                    reason: format!("expected `cloudinary` or `local`, got `{}`", other),
                })
            }
        };

        Ok(Self {
            database_url: var("DATABASE_URL").unwrap_or_else(|| "file_share.db".to_string()),
            frontend_url: var("FRONTEND_URL"),
            storage,
            jwt_secret: var("JWT_SECRET"),
            port,
            access_mode,
            hash_cost,
        })
    }
}

fn parse_or<T, F>(var: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
