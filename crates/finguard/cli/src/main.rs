use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use finguard_adapters::{GatewayCapabilityService, SignalCapabilityService};
use finguard_pipeline::{
    AutoApprove, ConfirmationHandler, EscalationProposal, EscalationVerdict, FinalDecision,
    FinalVerdict, FixedConfirmation, Orchestrator, PipelineConfig, SessionId,
};
use serde_json::Value;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "finguard", version, about = "Run one FinGuard authorization session")]
struct Cli {
    /// Decoded input content to analyse.
    input: String,
    /// One of text, image, audio, video, document.
    #[arg(long, default_value = "text")]
    media_type: String,
    /// ASK consults the confirmation flags below; COMMAND runs unattended.
    #[arg(long, default_value = "COMMAND", env = "FINGUARD_MODE")]
    mode: String,
    /// JSON object passed to every stage, e.g. '{"risk_score": 85}'.
    #[arg(long)]
    metadata: Option<String>,
    /// TOML pipeline configuration.
    #[arg(long, env = "FINGUARD_CONFIG")]
    config: Option<PathBuf>,
    /// Capability gateway base URL. Without it the in-process signal service is used.
    #[arg(long, env = "FINGUARD_GATEWAY_URL")]
    gateway_url: Option<String>,
    /// ASK mode: decline every proposed escalation.
    #[arg(long, default_value_t = false)]
    decline_escalations: bool,
    /// ASK mode: replace the final decision, e.g. REQUIRE_MANUAL_REVIEW.
    #[arg(long)]
    override_decision: Option<String>,
    /// Print the report on a single line.
    #[arg(long, default_value_t = false)]
    compact: bool,
}

impl Cli {
    fn metadata(&self) -> anyhow::Result<Value> {
        match &self.metadata {
            Some(raw) => serde_json::from_str(raw).context("--metadata must be valid JSON"),
            None => Ok(Value::Null),
        }
    }

    fn pipeline_config(&self) -> anyhow::Result<PipelineConfig> {
        match &self.config {
            Some(path) => PipelineConfig::load(path)
                .with_context(|| format!("loading configuration from {}", path.display())),
            None => Ok(PipelineConfig::default()),
        }
    }

    fn confirmation(&self) -> anyhow::Result<Arc<dyn ConfirmationHandler>> {
        let final_decision = match &self.override_decision {
            Some(raw) => {
                let decision: FinalDecision =
                    serde_json::from_value(Value::String(raw.trim().to_ascii_uppercase()))
                        .with_context(|| format!("unknown decision '{raw}'"))?;
                FinalVerdict::Override {
                    decision,
                    rationale: "override from command line".to_string(),
                }
            }
            None => FinalVerdict::Accept,
        };
        let escalation = if self.decline_escalations {
            EscalationVerdict::Block {
                rationale: "declined from command line".to_string(),
            }
        } else {
            EscalationVerdict::Proceed
        };

        if escalation == EscalationVerdict::Proceed && final_decision == FinalVerdict::Accept {
            return Ok(Arc::new(AutoApprove));
        }
        Ok(Arc::new(LoggedConfirmation(FixedConfirmation {
            escalation,
            final_decision,
        })))
    }
}

/// Fixed answers, with each confirmation point logged.
struct LoggedConfirmation(FixedConfirmation);

#[async_trait::async_trait]
impl ConfirmationHandler for LoggedConfirmation {
    async fn confirm_escalation(&self, proposal: &EscalationProposal) -> EscalationVerdict {
        let verdict = self.0.confirm_escalation(proposal).await;
        info!(from = %proposal.from, to = %proposal.to, ?verdict, "Escalation confirmation");
        verdict
    }

    async fn confirm_final(
        &self,
        session_id: &SessionId,
        proposed: FinalDecision,
    ) -> FinalVerdict {
        let verdict = self.0.confirm_final(session_id, proposed).await;
        info!(%proposed, ?verdict, "Final decision confirmation");
        verdict
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "finguard=info,warn".to_string()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.pipeline_config()?;
    let metadata = cli.metadata()?;

    let builder = match &cli.gateway_url {
        Some(url) => {
            let timeout = Duration::from_millis(config.service.timeout_ms);
            let gateway = GatewayCapabilityService::new(url, timeout)?;
            info!(gateway = %gateway.base_url(), "Using capability gateway");
            Orchestrator::builder(Arc::new(gateway))
        }
        None => {
            info!("Using in-process signal service");
            Orchestrator::builder(Arc::new(SignalCapabilityService::new()))
        }
    };
    let orchestrator = builder
        .config(config)
        .confirmation(cli.confirmation()?)
        .build()?;

    let report = orchestrator
        .run(&cli.input, &cli.media_type, &cli.mode, metadata)
        .await?;

    let rendered = if cli.compact {
        serde_json::to_string(&report)?
    } else {
        serde_json::to_string_pretty(&report)?
    };
    println!("{rendered}");
    Ok(())
}
