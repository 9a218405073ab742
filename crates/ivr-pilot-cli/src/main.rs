use std::fmt::Write as _;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use ivr_pilot_core::config::Config;
use ivr_pilot_core::dtmf::DtmfDigits;
use ivr_pilot_core::error::FlowError;
use ivr_pilot_core::flow::{FlowDefinition, StepAction};
use ivr_pilot_gateway::GatewayState;

mod logging;

#[derive(Parser)]
#[command(
    name = "ivr-pilot",
    about = "Listens to IVR prompts on live calls and answers them with touch tones",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Port to listen on (default: config, then $PORT, then 3000)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Flow inspection
    Flow {
        #[command(subcommand)]
        action: FlowAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show active calls on a running server
    Status {
        /// Server base URL (default: http://127.0.0.1:<port>)
        #[arg(long)]
        url: Option<String>,
    },
}

#[derive(Subcommand)]
enum FlowAction {
    /// Validate the flow and print its chain of steps
    Check,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a specific config value
    Get { key: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config
    let config_path = cli
        .config
        .map(std::path::PathBuf::from)
        .unwrap_or_else(Config::config_path);

    let config = Config::load(&config_path)?;

    logging::init(&config.logging(), cli.verbose)?;
    tracing::debug!(path = %config_path.display(), "Config loaded");

    match cli.command {
        Commands::Serve { port } => {
            let (warnings, errors) = config.validate();
            for warning in &warnings {
                tracing::warn!("{warning}");
            }
            if !errors.is_empty() {
                for error in &errors {
                    tracing::error!("{error}");
                }
                anyhow::bail!("Configuration has {} error(s)", errors.len());
            }

            let port = port.unwrap_or_else(|| config.gateway_port());
            let state = GatewayState::from_config(config)?;

            #[cfg(feature = "prometheus")]
            let state = state.with_metrics(ivr_pilot_gateway::metrics::install_prometheus_recorder()?);

            tracing::info!(
                steps = state.runtime.flow().len(),
                initial = %state.runtime.flow().initial().id,
                "Starting IVR Pilot gateway on port {port}"
            );
            ivr_pilot_gateway::start_gateway(Arc::new(state), port).await?;
        }
        Commands::Flow {
            action: FlowAction::Check,
        } => match config.flow_definition() {
            Ok(flow) => print!("{}", describe_flow(&flow)),
            Err(e) => {
                eprintln!("Invalid flow: {e}");
                if let Some(fixed) = suggest_digits(&e) {
                    eprintln!("Suggested digits: \"{fixed}\"");
                }
                anyhow::bail!("Flow check failed");
            }
        },
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => anyhow::bail!("No config value at '{key}'"),
            },
        },
        Commands::Status { url } => {
            let base = url.unwrap_or_else(|| format!("http://127.0.0.1:{}", config.gateway_port()));
            let status: serde_json::Value =
                reqwest::get(format!("{}/status", base.trim_end_matches('/')))
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;
            print!("{}", describe_status(&status));
        }
    }

    Ok(())
}

/// Human-readable chain from the initial step to `complete`.
fn describe_flow(flow: &FlowDefinition) -> String {
    let mut out = String::new();
    let path = flow.path();

    for (i, id) in path.iter().enumerate() {
        let Some(step) = flow.lookup(id) else { continue };
        let action = match &step.action {
            StepAction::SendDigits(digits) => format!("send {digits}"),
            StepAction::WaitOnly => "wait".to_string(),
            StepAction::MarkSuccess => "mark success".to_string(),
        };
        let phrases: Vec<String> = step
            .trigger_phrases
            .iter()
            .map(|p| format!("\"{p}\""))
            .collect();
        let _ = writeln!(out, "{}. {} -> {} ({action})", i + 1, step.id, step.next);
        let _ = writeln!(out, "   listens for {}", phrases.join(", "));
    }

    for step in flow.steps() {
        if !path.contains(&step.id.as_str()) {
            let _ = writeln!(out, "unreachable: {}", step.id);
        }
    }
    let _ = writeln!(out, "{} step(s), valid", flow.len());
    out
}

/// A well-formed replacement for a rejected digit string, if one exists.
fn suggest_digits(error: &FlowError) -> Option<String> {
    let FlowError::InvalidDigits { digits, .. } = error else {
        return None;
    };
    let fixed = DtmfDigits::normalize(digits);
    DtmfDigits::parse(&fixed).ok().map(|d| d.to_string())
}

fn describe_status(status: &serde_json::Value) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Active calls: {}", status["active_calls"]);
    if let Some(sessions) = status["sessions"].as_array() {
        for s in sessions {
            let _ = writeln!(
                out,
                "  {}  step={}  outcome={}  transcription={}  started={}  last_match={}",
                s["call_id"].as_str().unwrap_or("?"),
                s["current_step"].as_str().unwrap_or("?"),
                s["outcome"].as_str().unwrap_or("?"),
                s["transcription"].as_str().unwrap_or("?"),
                s["started_at"].as_str().unwrap_or("-"),
                s["last_match_at"].as_str().unwrap_or("-"),
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ivr_pilot_core::flow::{default_steps, ActionConfig, StepConfig};

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["ivr-pilot", "serve", "--port", "8080", "-v"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Serve { port: Some(8080) }));

        let cli = Cli::try_parse_from(["ivr-pilot", "--config", "/tmp/c.json", "flow", "check"]).unwrap();
        assert_eq!(cli.config.as_deref(), Some("/tmp/c.json"));
        assert!(matches!(cli.command, Commands::Flow { action: FlowAction::Check }));
    }

    #[test]
    fn test_describe_default_flow() {
        let flow = FlowDefinition::from_steps(default_steps()).unwrap();
        let text = describe_flow(&flow);
        assert!(text.starts_with("1. step1 -> step2 (send 1w2w3w4)"));
        assert!(text.contains("6. step6 -> complete (mark success)"));
        assert!(text.contains("\"employee id\""));
        assert!(!text.contains("unreachable"));
    }

    #[test]
    fn test_describe_flow_flags_steps_after_success() {
        let steps = vec![
            StepConfig {
                id: "done".into(),
                listen_for: vec!["time".into()],
                action: ActionConfig::MarkSuccess,
                next: "after".into(),
            },
            StepConfig {
                id: "after".into(),
                listen_for: vec!["goodbye".into()],
                action: ActionConfig::WaitOnly,
                next: "complete".into(),
            },
        ];
        let flow = FlowDefinition::from_steps(steps).unwrap();
        let text = describe_flow(&flow);
        assert!(text.contains("1. done -> after (mark success)"));
        assert!(text.contains("unreachable: after"));
    }

    #[test]
    fn test_suggest_digits_for_bad_pauses() {
        let steps = vec![StepConfig {
            id: "step1".into(),
            listen_for: vec!["employee id".into()],
            action: ActionConfig::SendDigits {
                digits: "w1ww2w".into(),
            },
            next: "complete".into(),
        }];
        let err = FlowDefinition::from_steps(steps).unwrap_err();
        assert_eq!(suggest_digits(&err).as_deref(), Some("1w2"));
        assert_eq!(suggest_digits(&FlowError::Empty), None);
    }

    #[test]
    fn test_describe_status() {
        let status = serde_json::json!({
            "active_calls": 1,
            "sessions": [{
                "call_id": "CA1",
                "current_step": "step2",
                "outcome": "in_progress",
                "transcription": "open",
                "started_at": "2024-01-01T00:00:00Z",
                "last_match_at": null
            }]
        });
        let text = describe_status(&status);
        assert!(text.starts_with("Active calls: 1"));
        assert!(text.contains("CA1  step=step2  outcome=in_progress"));
        assert!(text.contains("last_match=-"));
    }
}
