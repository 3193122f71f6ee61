use std::net::TcpListener;
use std::time::Duration;
use token_authority::configuration::get_configuration;
use token_authority::maintenance::spawn_sweeper;
use token_authority::startup::{build_authority, run};
use token_authority::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_telemetry("info");

    tracing::info!("Starting application");

    let configuration = match get_configuration() {
        Ok(config) => {
            tracing::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!("Failed to read configuration: {}", e);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Configuration error",
            ));
        }
    };

    let authority = build_authority(&configuration).await.map_err(|e| {
        tracing::error!("Failed to initialize token authority: {}", e);
        std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "Backing store error")
    })?;

    spawn_sweeper(
        authority.clone(),
        Duration::from_secs(configuration.session.sweep_interval_seconds),
    );

    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(&address)?;
    tracing::info!("Server listening on: {}", address);

    run(listener, authority, &configuration.rate_limit)?.await
}
