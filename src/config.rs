use dotenv::dotenv;
use std::env;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Runtime configuration, read once at cold start.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_pool_size: u32,
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub resend_api_key: String,
    pub email_from: String,
    pub app_url: String,
    pub allowed_origins: Vec<String>,
    pub account_country: String,
    /// Users allowed to move platform balance to connected accounts.
    pub transfer_operators: Vec<Uuid>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from any variable source. `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        let database_pool_size = match lookup("DATABASE_POOL_SIZE") {
            Some(raw) => raw.parse::<u32>().map_err(|e| ConfigError::Invalid {
                name: "DATABASE_POOL_SIZE",
                reason: e.to_string(),
            })?,
            None => 5,
        };

        let allowed_origins = lookup("ALLOWED_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|o| !o.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        let transfer_operators = lookup("TRANSFER_OPERATOR_IDS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(|id| {
                        id.parse::<Uuid>().map_err(|e| ConfigError::Invalid {
                            name: "TRANSFER_OPERATOR_IDS",
                            reason: format!("{id}: {e}"),
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            database_pool_size,
            stripe_secret_key: required("STRIPE_SECRET_KEY")?,
            stripe_webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
            supabase_url: required("SUPABASE_URL")?.trim_end_matches('/').to_string(),
            supabase_anon_key: required("SUPABASE_ANON_KEY")?,
            resend_api_key: required("RESEND_API_KEY")?,
            email_from: lookup("EMAIL_FROM").unwrap_or_else(|| "no-reply@localhost".to_string()),
            app_url: lookup("APP_URL")
                .unwrap_or_else(|| "http://localhost:3000".to_string())
                .trim_end_matches('/')
                .to_string(),
            allowed_origins,
            account_country: lookup("ACCOUNT_COUNTRY").unwrap_or_else(|| "US".to_string()),
            transfer_operators,
        })
    }
}
