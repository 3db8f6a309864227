//! `matchchat-devserver` -- local backend for trying the client.
//!
//! Seeds demo users `1..=N` with fixed tokens `dev-token-<id>` and
//! `dev-refresh-<id>`, plus a conversation between users 1 and 2.
//!
//! ```bash
//! cargo run --bin matchchat-devserver -- --bind 127.0.0.1:8080
//! ```

use std::sync::Arc;

use clap::Parser;
use matchchat_devserver::config::{DevCliArgs, DevServerConfig};
use matchchat_devserver::server::{self, DevState};
use matchchat_proto::message::UserId;
use matchchat_proto::profile::CandidateProfile;

#[tokio::main]
async fn main() {
    let cli = DevCliArgs::parse();

    let config = match DevServerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let state = Arc::new(DevState::with_token_lifetime(config.token_lifetime));
    if let Err(e) = seed_demo(&state, &config).await {
        tracing::error!(error = %e, "failed to seed demo data");
        std::process::exit(1);
    }

    match server::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "dev server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "dev server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start dev server");
            std::process::exit(1);
        }
    }
}

async fn seed_demo(
    state: &DevState,
    config: &DevServerConfig,
) -> Result<(), matchchat_devserver::store::StoreError> {
    let ages = [24, 29, 33, 41, 27];
    for n in 1..=config.demo_users {
        let Ok(raw) = i64::try_from(n) else { break };
        let id = UserId::new(raw);
        state
            .store
            .add_user(CandidateProfile {
                id,
                display_name: Some(format!("Demo {n}")),
                age: Some(ages[n % ages.len()]),
                location: None,
                bio: None,
            })
            .await;
        state
            .install_tokens(id, &format!("dev-token-{n}"), &format!("dev-refresh-{n}"))
            .await;
        tracing::info!(user = %id, token = %format!("dev-token-{n}"), "demo user");
    }

    if config.demo_users >= 2 {
        let chat = state
            .store
            .create_conversation(UserId::new(1), UserId::new(2))
            .await;
        state.store.seed_history(chat, config.demo_messages).await?;
        tracing::info!(conversation = %chat, messages = config.demo_messages, "demo conversation");
    }
    Ok(())
}
