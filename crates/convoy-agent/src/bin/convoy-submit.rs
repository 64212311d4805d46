//! Submit a campaign to the local Convoy agent
//!
//! ```text
//! convoy-submit campaign.json
//! ```
//!
//! The agent address and timeouts come from `CONVOY_AGENT_ADDR`,
//! `CONVOY_SEND_TIMEOUT_MS` and `CONVOY_RECV_TIMEOUT_MS`. Campaigns that move
//! credentialed data read their tokens from `CONVOY_TOKEN_FILE`.

use anyhow::{bail, Context, Result};
use convoy_agent::{CampaignDescription, DispatchConfig, DispatchOutcome, TokenFileProvider};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let Some(path) = std::env::args().nth(1) else {
        bail!("usage: convoy-submit <campaign.json>");
    };
    let raw = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("cannot read {path}"))?;

    let mut campaign = CampaignDescription::from_json(&raw)?
        .into_campaign()
        .with_dispatch_config(DispatchConfig::from_env()?);
    if let Ok(token_file) = std::env::var("CONVOY_TOKEN_FILE") {
        campaign = campaign.with_credentials(Arc::new(TokenFileProvider::new(token_file)));
    }

    info!(
        campaign_id = %campaign.campaign_id(),
        activities = campaign.activities().len(),
        "Submitting campaign"
    );
    match campaign.dispatch().await {
        DispatchOutcome::Acknowledged => {
            println!("{}", campaign.campaign_id());
            Ok(())
        }
        outcome => {
            // Details were already logged by dispatch.
            eprintln!("campaign not submitted: {outcome:?}");
            std::process::exit(1);
        }
    }
}
