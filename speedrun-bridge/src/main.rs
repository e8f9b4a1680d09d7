//! Speedrun Bridge
//!
//! Headless bridge process. Logs in, starts networking and relays between
//! the local game and the match service until interrupted.

use anyhow::{bail, Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use speedrun_bridge::{spawn_bridge, BridgeConfig, BridgeEvent, VERSION};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Speedrun Bridge v{}", VERSION);

    let config = BridgeConfig::from_env().context("invalid configuration")?;
    info!("Match service: {}", config.server_url);
    info!("Game link: {} -> {}", config.game.bind_addr, config.game.game_addr);

    let player_id = match std::env::var("SPEEDRUN_PLAYER_ID").ok().or_else(|| std::env::args().nth(1)) {
        Some(id) => id,
        None => bail!("player id required (SPEEDRUN_PLAYER_ID or first argument)"),
    };
    let player_name = std::env::var("SPEEDRUN_PLAYER_NAME").ok();

    let (bridge, mut events) = spawn_bridge(config).context("failed to build bridge")?;
    bridge.login(player_id.clone());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, logging out");
                bridge.logout();
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    BridgeEvent::LoginSucceeded(profile) => {
                        info!("Logged in as {}", profile.player_name);
                        bridge.start_networking();
                    }
                    BridgeEvent::RegistrationNeeded { player_id } => match &player_name {
                        Some(name) => bridge.register(player_id, name.clone()),
                        None => {
                            error!("New player; set SPEEDRUN_PLAYER_NAME to register");
                            break;
                        }
                    },
                    BridgeEvent::LoginFailed(message) | BridgeEvent::RegistrationFailed(message) => {
                        error!("{}", message);
                        break;
                    }
                    BridgeEvent::BridgeVersionMismatch { download_url } => {
                        error!("Bridge is outdated, download: {}", download_url);
                        break;
                    }
                    BridgeEvent::GameVersionMismatch { download_url } => {
                        error!("Game mod is outdated, download: {}", download_url);
                        break;
                    }
                    BridgeEvent::NetworkingFailed(message) => {
                        error!("Networking failed: {}", message);
                        break;
                    }
                    BridgeEvent::MatchRecorded(record) => info!("Match recorded: {}", record),
                    BridgeEvent::PlayerBanned => warn!("Player is banned from matchmaking"),
                    BridgeEvent::SessionChanged(snapshot) => {
                        if let Ok(json) = serde_json::to_string(&snapshot) {
                            info!("Session: {}", json);
                        }
                    }
                    other => info!("{:?}", other),
                }
            }
        }
    }

    bridge.shutdown().await;
    Ok(())
}
