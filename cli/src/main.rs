//! Dismissal Coordinator CLI.
//!
//! Runs a scenario (preset or JSON file) for a number of episodes, prints a
//! per-episode summary and optionally writes the full reports as JSON. With
//! `--sweep` it instead compares several variations of the scenario.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use dismissal_coordinator_core::orchestrator::{
    ablation_variations, run_sweep, threshold_variations, EpisodeSimulator, JsonFileStore,
    Scenario, StateStore, SweepRow, PRESET_NAMES,
};
use dismissal_coordinator_core::EpisodeReport;

#[derive(Parser)]
#[command(name = "dismissal-coordinator")]
#[command(about = "Coordinate classroom dismissals around a shared hallway bottleneck")]
struct Cli {
    /// Built-in scenario: demo, stress, balanced, extreme
    #[arg(long, conflicts_with = "scenario")]
    preset: Option<String>,

    /// Scenario JSON file
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Number of episodes to run (defaults to the scenario's episode_count)
    #[arg(short, long)]
    episodes: Option<usize>,

    /// Days between consecutive episodes
    #[arg(long)]
    interval_days: Option<u32>,

    /// Output file for episode reports (JSON)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Checkpoint file: resumed from if present, rewritten after every episode
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Compare variations of the scenario instead of running it once
    #[arg(long, value_enum, conflicts_with = "checkpoint")]
    sweep: Option<SweepKind>,

    /// Risk thresholds for `--sweep thresholds`
    #[arg(long, value_delimiter = ',', default_value = "0.5,0.7,0.9,1.1")]
    thresholds: Vec<f64>,

    /// Enable verbose output
    #[arg(long, short)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum SweepKind {
    /// Policies and negotiation switches
    Ablation,
    /// Risk threshold sensitivity
    Thresholds,
}

fn load_scenario(cli: &Cli) -> Result<Scenario> {
    let mut scenario = match (&cli.preset, &cli.scenario) {
        (_, Some(path)) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("read scenario {}", path.display()))?;
            Scenario::from_json(&json).with_context(|| format!("load scenario {}", path.display()))?
        }
        (Some(name), None) => Scenario::preset(name)
            .with_context(|| format!("available presets: {}", PRESET_NAMES.join(", ")))?,
        (None, None) => Scenario::preset("demo")?,
    };

    if let Some(days) = cli.interval_days {
        if days == 0 {
            bail!("--interval-days must be positive");
        }
        scenario.episodes.interval_days = days;
    }
    Ok(scenario)
}

fn print_report(report: &EpisodeReport) {
    println!("\n=== Episode {} ({}) ===", report.episode, report.date);
    println!(
        "Risk: {:.2} -> {:.2} (Δ{:.2}) [{:?} -> {:?}]",
        report.initial_risk,
        report.final_risk,
        report.risk_reduction,
        report.initial_level,
        report.final_level
    );
    println!(
        "Rounds: {} ({:?}), success: {}, performance: {:?}",
        report.rounds, report.conclusion, report.success, report.performance
    );
    for offer in &report.accepted_offers {
        println!(
            "  • {} {} -> {} ({:+} min, round {})",
            offer.classroom_id,
            offer.before.format("%H:%M"),
            offer.after.format("%H:%M"),
            offer.delta,
            offer.round
        );
    }
    for commitment in &report.commitments_resolved {
        let applied = commitment.applied_delta.unwrap_or(0);
        match &commitment.carried_forward_as {
            None if !commitment.fulfilled => println!(
                "  ↺ {} owes {:+} min to {}, no room this episode, due {}",
                commitment.debtor_id,
                commitment.owed_delta,
                commitment.creditor_id,
                commitment.due_episode
            ),
            None => println!(
                "  ↺ {} repaid {:+} min to {}",
                commitment.debtor_id, applied, commitment.creditor_id
            ),
            Some(carried) => println!(
                "  ↺ {} repaid {:+} min to {}, remainder carried as {}",
                commitment.debtor_id, applied, commitment.creditor_id, carried
            ),
        }
    }
    for commitment in &report.commitments_created {
        println!(
            "  ✎ {} owes {} {:+} min by {}",
            commitment.debtor_id, commitment.creditor_id, commitment.owed_delta, commitment.due_episode
        );
    }
    for id in &report.flagged_classrooms {
        println!("  ⚑ {} flagged for repeated violations", id);
    }
    for issue in &report.issues {
        println!("  ! {}", issue.kind());
    }
}

fn print_sweep(rows: &[SweepRow]) {
    println!(
        "\n{:<20} {:>8} {:>8} {:>10} {:>9} {:>7} {:>8}",
        "Variation", "Initial", "Final", "Mean Δ", "Success", "Agents", "Owed"
    );
    println!("{}", "-".repeat(76));
    for row in rows {
        println!(
            "{:<20} {:>8.2} {:>8.2} {:>10.2} {:>5}/{:<3} {:>7} {:>8}",
            row.name,
            row.initial_risk,
            row.final_risk,
            row.mean_risk_reduction,
            row.successes,
            row.episodes,
            row.agents_participated,
            row.commitments_outstanding
        );
    }
}

fn write_json<T: serde::Serialize>(output: &Path, value: &T) -> Result<()> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(output, json).with_context(|| format!("write {}", output.display()))?;
    println!("Reports written to {}", output.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let scenario = load_scenario(&cli)?;
    println!(
        "{}: {} classrooms, {} students/min capacity",
        scenario.name,
        scenario.classrooms.len(),
        scenario.bottleneck_capacity
    );

    if let Some(kind) = cli.sweep {
        let variations = match kind {
            SweepKind::Ablation => ablation_variations(),
            SweepKind::Thresholds => threshold_variations(&cli.thresholds),
        };
        let episodes = cli.episodes.unwrap_or(scenario.episodes.episode_count);
        info!(variations = variations.len(), episodes, "Running sweep");

        let rows = run_sweep(&scenario, &variations, episodes).await?;
        print_sweep(&rows);
        if let Some(output) = &cli.output {
            write_json(output, &rows)?;
        }
        return Ok(());
    }

    let mut simulator = match &cli.checkpoint {
        Some(path) => {
            let store: Arc<dyn StateStore> = Arc::new(JsonFileStore::new(path.clone()));
            EpisodeSimulator::resume(scenario, store)?
        }
        None => EpisodeSimulator::new(scenario)?,
    };

    let count = cli
        .episodes
        .unwrap_or_else(|| simulator.remaining_episodes());
    info!(
        run_id = %simulator.run_id(),
        from = simulator.next_episode_index(),
        count,
        "Running episodes"
    );

    let mut reports = Vec::with_capacity(count);
    for _ in 0..count {
        let episode = simulator.next_episode().await?;
        let report = episode.report();
        print_report(&report);
        reports.push(report);
    }

    let pending = simulator.ledger().pending_count();
    println!("\nOutstanding commitments: {}", pending);

    if let Some(output) = &cli.output {
        write_json(output, &reports)?;
    }

    Ok(())
}
