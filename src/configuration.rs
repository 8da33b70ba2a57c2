use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, File};
use secrecy::{ExposeSecret, Secret};
use serde_aux::field_attributes::deserialize_number_from_string;
use sqlx::postgres::{PgConnectOptions, PgSslMode};

/// Plain environment variables recognised on top of the layered configuration,
/// paired with the key they override.
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("POSTGRES_HOST", "database.host"),
    ("POSTGRES_PORT", "database.port"),
    ("POSTGRES_DB", "database.database_name"),
    ("POSTGRES_USER", "database.username"),
    ("POSTGRES_PASSWORD", "database.password"),
    ("API_PORT", "application.port"),
    ("ALLOWED_ORIGINS", "application.allowed_origins"),
    ("SUPABASE_URL", "supabase.uri"),
    ("SUPABASE_SERVICE_KEY", "supabase.key"),
];

#[derive(serde::Deserialize, Clone, Debug)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub database: DatabaseSettings,
    #[serde(default)]
    pub supabase: Option<SupabaseSettings>,
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct ApplicationSettings {
    pub host: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub allowed_origins: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub request_timeout_secs: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub health_check_timeout_secs: u64,
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct DatabaseSettings {
    pub host: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub database_name: String,
    pub username: String,
    pub password: Secret<String>,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_connections: u32,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub acquire_timeout_secs: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub acquire_retry_backoff_ms: u64,
    pub require_ssl: bool,
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct SupabaseSettings {
    pub uri: String,
    pub key: Secret<String>,
}

/// CORS allow-list parsed from the comma separated `allowed_origins` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedOrigins {
    Any,
    List(Vec<String>),
}

impl ApplicationSettings {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_secs)
    }

    pub fn origins(&self) -> AllowedOrigins {
        let origins: Vec<String> = self
            .allowed_origins
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(String::from)
            .collect();
        if origins.iter().any(|origin| origin == "*") {
            AllowedOrigins::Any
        } else {
            AllowedOrigins::List(origins)
        }
    }
}

impl DatabaseSettings {
    pub fn connect_options(&self) -> PgConnectOptions {
        let ssl_mode = if self.require_ssl {
            PgSslMode::Require
        } else {
            PgSslMode::Prefer
        };
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .password(self.password.expose_secret())
            .database(&self.database_name)
            .ssl_mode(ssl_mode)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn acquire_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.acquire_retry_backoff_ms)
    }
}

impl SupabaseSettings {
    /// PostgREST endpoint of the project.
    pub fn rest_url(&self) -> String {
        format!("{}/rest/v1", self.uri.trim_end_matches('/'))
    }
}

pub fn get_configuration() -> Result<Settings, ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| ConfigError::Message(format!("Failed to determine the current directory: {}", e)))?;
    let configuration_directory = base_path.join("configuration");
    let vars: HashMap<String, String> = std::env::vars().collect();

    let environment: Environment = vars
        .get("APP_ENVIRONMENT")
        .cloned()
        .unwrap_or_else(|| "local".into())
        .try_into()
        .map_err(ConfigError::Message)?;

    load_configuration(&configuration_directory, environment, &vars)
}

/// Builds the settings from defaults, the optional `base` and per-environment
/// files under `directory`, `APP_`-prefixed variables and finally the plain
/// variables listed in [`ENV_OVERRIDES`].
pub fn load_configuration(
    directory: &Path,
    environment: Environment,
    vars: &HashMap<String, String>,
) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder()
        .set_default("application.host", "0.0.0.0")?
        .set_default("application.port", 8000)?
        .set_default("application.allowed_origins", "*")?
        .set_default("application.request_timeout_secs", 30)?
        .set_default("application.health_check_timeout_secs", 2)?
        .set_default("database.host", "postgres")?
        .set_default("database.port", 5432)?
        .set_default("database.database_name", "airquality")?
        .set_default("database.username", "airuser")?
        .set_default("database.password", "airpassword")?
        .set_default("database.max_connections", 10)?
        .set_default("database.acquire_timeout_secs", 5)?
        .set_default("database.acquire_retry_backoff_ms", 250)?
        .set_default("database.require_ssl", false)?
        .add_source(File::from(directory.join("base")).required(false))
        .add_source(File::from(directory.join(environment.as_str())).required(false))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(Some(vars.clone())),
        );

    match (
        non_empty_var(vars, "SUPABASE_URL"),
        non_empty_var(vars, "SUPABASE_SERVICE_KEY"),
    ) {
        (Some(_), None) => {
            return Err(ConfigError::Message(
                "SUPABASE_URL is set but SUPABASE_SERVICE_KEY is missing".into(),
            ))
        }
        (None, Some(_)) => {
            return Err(ConfigError::Message(
                "SUPABASE_SERVICE_KEY is set but SUPABASE_URL is missing".into(),
            ))
        }
        _ => {}
    }

    for (var, key) in ENV_OVERRIDES {
        builder = builder.set_override_option(*key, non_empty_var(vars, var))?;
    }

    builder.build()?.try_deserialize()
}

fn non_empty_var(vars: &HashMap<String, String>, name: &str) -> Option<String> {
    vars.get(name).filter(|value| !value.is_empty()).cloned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Local,
    Production,
}
impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}
impl TryFrom<String> for Environment {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}
