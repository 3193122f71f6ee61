use crate::error::ConfigError;

const MIN_SECRET_LENGTH: usize = 32;
const MAX_GRACE_PERIOD_SECONDS: i64 = 300;
/// One year. Keeps every lifetime well inside `chrono::Duration` range.
const MAX_LIFETIME_SECONDS: i64 = 31_536_000;

#[derive(serde::Deserialize, Clone)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub database: DatabaseSettings,
    pub jwt: JwtSettings,
    pub session: SessionSettings,
    pub storage: StorageSettings,
    pub rate_limit: RateLimitSettings,
}

#[derive(serde::Deserialize, Clone)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
}

#[derive(serde::Deserialize, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub port: u16,
    pub host: String,
    pub database_name: String,
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database_name
        )
    }
}

/// JWT signing settings. Access and refresh tokens use distinct secrets.
#[derive(serde::Deserialize, Clone)]
pub struct JwtSettings {
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_token_expiry: i64,   // seconds (e.g., 900 for 15 minutes)
    pub refresh_token_expiry: i64,  // seconds (e.g., 604800 for 7 days)
    pub issuer: String,
}

/// Session lifecycle settings
#[derive(serde::Deserialize, Clone)]
pub struct SessionSettings {
    /// How long a just-superseded refresh token is still honored
    pub grace_period_seconds: i64,
    /// Hard lifetime of a token family, counted from login
    pub family_lifetime_seconds: i64,
    /// Upper bound on any single store or cache call
    pub operation_timeout_ms: u64,
    pub sweep_interval_seconds: u64,
    pub bcrypt_cost: u32,
}

#[derive(serde::Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

#[derive(serde::Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum RevocationBackend {
    Memory,
    Redis,
}

#[derive(serde::Deserialize, Clone)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub revocation_backend: RevocationBackend,
    pub redis_url: Option<String>,
}

/// Per-IP throttling of the credential endpoints (register, login)
#[derive(serde::Deserialize, Clone, Debug)]
pub struct RateLimitSettings {
    pub requests_per_minute: u32,
}

impl Settings {
    /// Rejects settings the token authority cannot run safely with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let jwt = &self.jwt;
        if jwt.access_secret.len() < MIN_SECRET_LENGTH {
            return Err(ConfigError::InvalidValue(format!(
                "jwt.access_secret must be at least {} bytes",
                MIN_SECRET_LENGTH
            )));
        }
        if jwt.refresh_secret.len() < MIN_SECRET_LENGTH {
            return Err(ConfigError::InvalidValue(format!(
                "jwt.refresh_secret must be at least {} bytes",
                MIN_SECRET_LENGTH
            )));
        }
        if jwt.access_secret == jwt.refresh_secret {
            return Err(ConfigError::InvalidValue(
                "jwt.access_secret and jwt.refresh_secret must differ".to_string(),
            ));
        }
        for (name, value) in [
            ("jwt.access_token_expiry", jwt.access_token_expiry),
            ("jwt.refresh_token_expiry", jwt.refresh_token_expiry),
            ("session.family_lifetime_seconds", self.session.family_lifetime_seconds),
        ] {
            if value <= 0 || value > MAX_LIFETIME_SECONDS {
                return Err(ConfigError::InvalidValue(format!(
                    "{} must be in 1..={}",
                    name, MAX_LIFETIME_SECONDS
                )));
            }
        }

        let session = &self.session;
        if session.grace_period_seconds <= 0 || session.grace_period_seconds > MAX_GRACE_PERIOD_SECONDS {
            return Err(ConfigError::InvalidValue(format!(
                "session.grace_period_seconds must be in 1..={}",
                MAX_GRACE_PERIOD_SECONDS
            )));
        }
        if !(4..=31).contains(&session.bcrypt_cost) {
            return Err(ConfigError::InvalidValue(
                "session.bcrypt_cost must be in 4..=31".to_string(),
            ));
        }
        if session.operation_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "session.operation_timeout_ms must be positive".to_string(),
            ));
        }

        if self.rate_limit.requests_per_minute == 0 {
            return Err(ConfigError::InvalidValue(
                "rate_limit.requests_per_minute must be positive".to_string(),
            ));
        }

        if self.storage.revocation_backend == RevocationBackend::Redis
            && self.storage.redis_url.is_none()
        {
            return Err(ConfigError::MissingRequired("storage.redis_url".to_string()));
        }

        Ok(())
    }
}

/// Loads `configuration.yaml` (optional) and `APP_*` environment overrides,
/// e.g. `APP_JWT__ACCESS_SECRET`.
pub fn get_configuration() -> Result<Settings, ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;
    let settings = settings.try_deserialize::<Settings>()?;
    settings.validate()?;
    Ok(settings)
}
