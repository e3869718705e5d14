#![cfg_attr(not(test), deny(clippy::panic))]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use rhythm_fish_server::config;
use rhythm_fish_server::directory::{LobbyDirectory, ShortCodeRegistry};
use rhythm_fish_server::http::{self, AppState};
use rhythm_fish_server::logging;
use rhythm_fish_server::punch::PunchCoordinator;
use rhythm_fish_server::relay::RelayServer;

/// Rhythm Fish -- rendezvous and relay backplane for P2P rhythm game networking
#[derive(Parser, Debug)]
#[command(name = "rhythm-fish-server")]
#[command(about = "Lobby directory, NAT-punch coordinator and UDP relay in one process")]
#[command(version)]
struct Cli {
    /// Validate configuration and exit without starting the server.
    /// Useful for CI/CD pipelines and pre-deployment checks.
    #[arg(long, short = 'c', conflicts_with = "print_config")]
    validate_config: bool,

    /// Print the loaded configuration to stdout (as JSON) and exit.
    #[arg(long, conflicts_with = "validate_config")]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = Arc::new(config::load());

    if cli.print_config {
        let json = serde_json::to_string_pretty(&*cfg)
            .map_err(|e| anyhow::anyhow!("Failed to serialize config: {e}"))?;
        println!("{json}");
        return Ok(());
    }

    // load() only warns on validation problems; here they become fatal.
    let validation_result = config::validate_config(&cfg);

    if cli.validate_config {
        match validation_result {
            Ok(()) => {
                println!("Configuration validation passed");
                println!();
                println!("Configuration summary:");
                println!("  HTTP port: {}", cfg.port);
                println!("  Punch enabled: {} (port {})", cfg.punch.enabled, cfg.punch.port);
                println!("  Relay enabled: {} (port {})", cfg.relay.enabled, cfg.relay.port);
                println!("  Lobby TTL: {}s", cfg.server.lobby_ttl_secs);
                println!("  Protocol version: {}", cfg.protocol.protocol_version);
                return Ok(());
            }
            Err(e) => {
                eprintln!("Configuration validation failed:\n{e}");
                std::process::exit(1);
            }
        }
    }

    validation_result.map_err(|e| anyhow::anyhow!("invalid configuration:\n{e}"))?;

    logging::init_with_config(&cfg.logging);

    if let Some(app) = &cfg.diagnostics.fly_app_name {
        tracing::info!(
            app,
            alloc = cfg.diagnostics.fly_alloc_id.as_deref().unwrap_or("-"),
            public_ip = cfg.diagnostics.fly_public_ip.as_deref().unwrap_or("-"),
            "Deployment diagnostics"
        );
    }

    let cancel = CancellationToken::new();
    let directory = Arc::new(LobbyDirectory::new(cfg.server.lobby_ttl_secs));
    let codes = Arc::new(ShortCodeRegistry::new());

    // Background purge keeps the directory tidy even without read traffic.
    {
        let directory = directory.clone();
        let cancel = cancel.clone();
        let interval = Duration::from_secs(cfg.server.purge_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => { directory.purge_stale(); }
                }
            }
        });
    }

    let punch = if cfg.punch.enabled {
        let coordinator = PunchCoordinator::bind(cfg.punch.clone()).await?;
        tokio::spawn(coordinator.clone().run(cancel.clone()));
        Some(coordinator)
    } else {
        tracing::info!("NAT-punch coordinator disabled by configuration");
        None
    };

    let relay = if cfg.relay.enabled {
        let relay = RelayServer::bind(cfg.relay.clone()).await?;
        tokio::spawn(relay.clone().run(cancel.clone()));
        Some(relay)
    } else {
        tracing::info!("UDP relay disabled by configuration");
        None
    };

    let state = AppState::new(cfg.clone(), directory, codes, punch, relay);
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    tracing::info!(%addr, "Starting Rhythm Fish rendezvous");

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            shutdown.cancel();
        }
    });

    http::serve(state, addr, cancel.clone()).await?;

    // Give the UDP loops a moment to observe the cancellation.
    cancel.cancel();
    tokio::time::sleep(Duration::from_millis(100)).await;
    tracing::info!("Rendezvous stopped");
    Ok(())
}
