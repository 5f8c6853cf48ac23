use std::sync::Arc;

use lambda_http::run;
use practitioner_payments_lambda::{
    app,
    auth::SupabaseAuth,
    config::Config,
    database::{create_db_pool, PgStore},
    email::ResendMailer,
    processor::StripeProcessor,
    AppState,
};
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer()
        .compact()
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_writer(std::io::stdout);
    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .init();

    info!("Starting practitioner payments Lambda");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {e}");
            return Err(e.into());
        }
    };

    let db_pool = match create_db_pool(&config) {
        Ok(pool) => {
            info!("Database connection pool created successfully");
            pool
        }
        Err(e) => {
            error!("Failed to create database connection pool: {e}");
            return Err(e.into());
        }
    };

    let http = reqwest::Client::new();
    let state = AppState {
        store: Arc::new(PgStore::new(db_pool)),
        processor: Arc::new(StripeProcessor::new(config.stripe_secret_key.clone())),
        auth: Arc::new(SupabaseAuth::new(
            http,
            config.supabase_url.clone(),
            config.supabase_anon_key.clone(),
        )),
        mailer: Arc::new(ResendMailer::new(config.resend_api_key.clone())?),
        config: Arc::new(config),
    };

    match run(app(state)).await {
        Ok(()) => info!("Lambda executed successfully"),
        Err(e) => error!("Lambda execution error: {e}"),
    }
    Ok(())
}
