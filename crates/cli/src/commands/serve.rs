//! `pursuit serve`: start the HTTP gateway.

use pursuit_config::AppConfig;

pub async fn run(mut config: AppConfig, port: Option<u16>, host: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(port) = port {
        config.gateway.port = port;
    }
    if let Some(host) = host {
        config.gateway.host = host;
    }
    if !config.has_api_key() {
        tracing::warn!("No API key configured; planning and answering will degrade");
    }

    println!("Pursuit gateway");
    println!("  Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("  Store:     {}", config.store.backend);
    println!("  Workers:   {}", config.service.workers);

    pursuit_gateway::start(config).await
}
