#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use orgpulse::alerts::evaluate_conditions;
use orgpulse::causality::{
    simulate_counterfactual, CausalityService, InterventionDirection, SignalTrend,
};
use orgpulse::constructs::Construct;
use orgpulse::norms::NormProfile;
use orgpulse::ontology::OntologyGraph;
use orgpulse::pipeline::{attach_narrative, build_canonical_input, PipelineConfig, PipelineRunner, TeamWeekInput};
use orgpulse::provider::{
    generate_or_fallback, HttpNarrativeProvider, NarrativeRequest, RetryingGateway,
};
use orgpulse::store::{AggregateStore, LeaseStore, SqliteStore};

#[derive(Parser)]
#[command(name = "orgpulse", version, about = "Weekly team-health pipeline CLI")]
struct Cli {
    /// SQLite store path.
    #[arg(long, default_value = ".orgpulse.sqlite")]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline for every team in an input file, then roll up.
    Run {
        /// JSON file: array of TeamWeekInput.
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        org: String,
        /// Week start date (YYYY-MM-DD, a Monday).
        #[arg(long)]
        week: NaiveDate,
        /// Also generate narratives (uses the LLM provider when configured,
        /// the deterministic template otherwise).
        #[arg(long)]
        narrate: bool,
    },
    /// Recompute the org rollup from already-persisted team rows.
    Rollup {
        #[arg(long)]
        org: String,
        #[arg(long)]
        week: NaiveDate,
    },
    /// Print rows, rollup, and alert conditions for an org/week.
    Status {
        #[arg(long)]
        org: String,
        #[arg(long)]
        week: NaiveDate,
    },
    /// Explain a construct's causal reach: score against engagement and
    /// simulate an intervention.
    Explain {
        /// Construct id, e.g. "workload" or "psychological_safety".
        #[arg(long)]
        construct: String,
        /// Current signal strength of the construct, 0..=1.
        #[arg(long, default_value_t = 0.5)]
        signal: f64,
        /// Intervention direction to simulate: "increase" or "decrease".
        #[arg(long, default_value = "increase")]
        direction: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "orgpulse=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let store = Arc::new(SqliteStore::new(&cli.db)?);

    match cli.command {
        Commands::Run {
            input,
            org,
            week,
            narrate,
        } => {
            // One batch run per store at a time on this machine.
            let _lock = store.lock_exclusive()?;

            let text = std::fs::read_to_string(&input)?;
            let inputs: Vec<TeamWeekInput> = serde_json::from_str(&text)?;

            let runner = PipelineRunner::new(
                store.clone(),
                NormProfile::global_benchmark(),
                PipelineConfig::default(),
            );
            let rollup = runner.run_org_week(&org, week, &inputs).await?;
            println!(
                "rollup written: {} teams, {} systemic driver(s)",
                rollup.risk_distribution.healthy
                    + rollup.risk_distribution.at_risk
                    + rollup.risk_distribution.critical
                    + rollup.risk_distribution.unknown,
                rollup.systemic_drivers.len()
            );

            if narrate {
                narrate_rows(store.as_ref(), &inputs).await?;
            }
        }
        Commands::Rollup { org, week } => {
            let runner = PipelineRunner::new(
                store.clone(),
                NormProfile::global_benchmark(),
                PipelineConfig::default(),
            );
            let rollup = runner.rollup_org(&org, week).await?;
            println!("{}", serde_json::to_string_pretty(&rollup)?);
        }
        Commands::Status { org, week } => {
            let rows = store.rows_for_week(&org, week).await?;
            for row in &rows {
                println!(
                    "{}/{} {}: status={} state={} hash={}",
                    row.org_id,
                    row.team_id,
                    row.week_start,
                    row.status.as_str(),
                    row.team_state.state.as_str(),
                    row.input_hash
                );
            }
            if let Some(rollup) = store.get_rollup(&org, week).await? {
                println!(
                    "rollup: {} systemic driver(s), distribution {:?}",
                    rollup.systemic_drivers.len(),
                    rollup.risk_distribution
                );
            }
            let leases = store.lease_ages().await?;
            for condition in evaluate_conditions(&rows, &leases) {
                println!("alert: {}", serde_json::to_string(&condition)?);
            }
        }
        Commands::Explain {
            construct,
            signal,
            direction,
        } => {
            let Some(driver) = Construct::from_id(&construct) else {
                return Err(format!("unknown construct {construct:?}").into());
            };
            let direction = match direction.as_str() {
                "increase" => InterventionDirection::Increase,
                "decrease" => InterventionDirection::Decrease,
                other => return Err(format!("unknown direction {other:?}").into()),
            };

            let graph = OntologyGraph::compiled();
            let service = CausalityService::new(&graph);
            let analysis =
                service.analyze(driver, Construct::Engagement, SignalTrend::Flat, signal);
            println!(
                "{} -> engagement: score {:.2} ({})",
                driver.id(),
                analysis.score,
                serde_json::to_string(&analysis.tier)?
            );
            for reason in &analysis.reasons {
                println!("  - {reason}");
            }

            let counterfactual = simulate_counterfactual(&graph, driver, direction);
            if counterfactual.no_modeled_consequence {
                println!("no modeled downstream consequence");
            }
            for effect in &counterfactual.effects {
                println!(
                    "  depth {} {} {} (confidence {:.2})",
                    effect.depth,
                    effect.construct.id(),
                    serde_json::to_string(&effect.predicted_direction)?,
                    effect.confidence
                );
            }
        }
    }

    Ok(())
}

async fn narrate_rows(
    store: &SqliteStore,
    inputs: &[TeamWeekInput],
) -> Result<(), Box<dyn std::error::Error>> {
    for input in inputs {
        let Some(row) = store
            .get_row(&input.org_id, &input.team_id, input.week_start)
            .await?
        else {
            continue;
        };

        let canonical = build_canonical_input(input);
        let req = NarrativeRequest {
            canonical: canonical.clone(),
            team_state: row.team_state.state.as_str().to_string(),
            top_drivers: row
                .attribution
                .iter()
                .map(|d| d.parameter.id().to_string())
                .collect(),
        };

        let draft = match HttpNarrativeProvider::from_env() {
            Ok(provider) => generate_or_fallback(&RetryingGateway::new(provider), &req).await,
            // No provider configured: deterministic template, no network.
            Err(_) => orgpulse::provider::template_draft(
                &req.canonical,
                &req.team_state,
                &req.top_drivers,
            ),
        };

        let updated = attach_narrative(store, &row, &canonical, &draft.narrative, &draft.claims)
            .await?;
        println!(
            "{}/{}: narrative {}",
            updated.org_id,
            updated.team_id,
            if updated.narrative.is_some() {
                "attached"
            } else {
                "withheld"
            }
        );
    }
    Ok(())
}
