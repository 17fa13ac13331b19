use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use aiv_forecast::elasticity::ElasticityLedger;
use aiv_forecast::forecast;
use aiv_forecast::models::{BaselineSignals, Interval, ScenarioAction};
use aiv_forecast::{Engine, EngineConfig, PipelineOutput};

mod db;
mod report;

#[derive(Parser)]
#[command(name = "aiv-forecast")]
#[command(about = "Composite AI visibility scoring and revenue forecasting", long_about = None)]
struct Cli {
    /// Tenant slug the command operates on
    #[arg(long, global = true, default_value = "demo-dealer")]
    tenant: String,
    /// JSON file overriding engine defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ImportKind {
    Observations,
    Geo,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a demo tenant with weekly history
    Seed,
    /// Import observations or geo snapshots from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long, value_enum, default_value = "observations")]
        kind: ImportKind,
    },
    /// Smooth history and score the latest observation
    Score,
    /// Update the versioned revenue elasticity estimate
    Elasticity {
        /// Record a new version even when no history was added
        #[arg(long)]
        force: bool,
    },
    /// Run a Monte Carlo what-if scenario from a JSON file
    Simulate {
        #[arg(long)]
        scenario: PathBuf,
        #[arg(long)]
        trials: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Compare predictions against observed values from a CSV file
    Validate {
        #[arg(long)]
        csv: PathBuf,
        /// Period label such as 2026-09
        #[arg(long)]
        period: String,
        /// Nominal coverage of the intervals in the file
        #[arg(long, default_value_t = 0.95)]
        nominal: f64,
    },
    /// Project the smoothed index forward
    Forecast {
        #[arg(long, default_value_t = 4)]
        horizon: u32,
        #[arg(long, default_value_t = 0.95)]
        level: f64,
    },
    /// Generate a markdown report
    Report {
        #[arg(long, default_value_t = 4)]
        horizon: u32,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[derive(Deserialize)]
struct ScenarioFile {
    baseline: BaselineSignals,
    actions: Vec<ScenarioAction>,
}

#[derive(Deserialize)]
struct ValidationRow {
    observed: f64,
    predicted: f64,
    lower: Option<f64>,
    upper: Option<f64>,
    revenue_at_risk: Option<f64>,
}

#[derive(Serialize)]
struct ValidationOutcome {
    report: aiv_forecast::models::ValidationReport,
    benchmarks: Vec<aiv_forecast::models::BenchmarkResult>,
    coverage: Option<aiv_forecast::models::CoverageReport>,
    revenue_correlation: Option<f64>,
}

fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            EngineConfig::from_json(&raw).with_context(|| format!("invalid config {}", path.display()))
        }
        None => Ok(EngineConfig::default()),
    }
}

async fn run_pipeline(
    pool: &PgPool,
    engine: &Engine,
    tenant: Uuid,
) -> anyhow::Result<(Vec<aiv_forecast::models::Observation>, PipelineOutput)> {
    let history = db::fetch_observations(pool, tenant).await?;
    let geo_history = db::fetch_geo_snapshots(pool, tenant).await?;
    let output = engine
        .run(&history, &geo_history)
        .context("scoring pipeline failed")?;
    Ok((history, output))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let engine = Engine::new(load_config(cli.config.as_deref())?)?;
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv, kind } => {
            let tenant = db::ensure_tenant(&pool, &cli.tenant).await?;
            let (inserted, label) = match kind {
                ImportKind::Observations => {
                    (db::import_observations(&pool, tenant, &csv).await?, "observations")
                }
                ImportKind::Geo => (db::import_geo_snapshots(&pool, tenant, &csv).await?, "geo snapshots"),
            };
            println!("Inserted {inserted} {label} from {}.", csv.display());
        }
        Commands::Score => {
            let tenant = db::tenant_id(&pool, &cli.tenant).await?;
            let (_, output) = run_pipeline(&pool, &engine, tenant).await?;
            let Some(score) = output.latest_score() else {
                println!("No observations found for {}.", cli.tenant);
                return Ok(());
            };
            println!(
                "AIV {:.1} / ATI {:.1} / CRS {:.1}{}",
                score.aiv,
                score.ati,
                score.crs,
                if output.provisional { " (provisional)" } else { "" }
            );
            println!("Revenue risk index {:.1}", score.revenue_risk);
            for (component, contribution) in &score.breakdown {
                println!("- {component}: {contribution:.2}");
            }
            println!("{}", output.stability.recommendation);
            db::record_result(&pool, tenant, "score", &output).await?;
        }
        Commands::Elasticity { force } => {
            let tenant = db::tenant_id(&pool, &cli.tenant).await?;
            let (history, output) = run_pipeline(&pool, &engine, tenant).await?;
            let pairs: Vec<(f64, f64, chrono::DateTime<Utc>)> = history
                .iter()
                .zip(&output.scores)
                .filter_map(|(obs, score)| {
                    obs.revenue_at_risk
                        .map(|revenue| (score.aiv, revenue, obs.observed_at))
                })
                .collect();

            let (last_version, known) = match db::latest_elasticity(&pool, tenant).await? {
                Some((estimate, points)) => (estimate.version, points.min(pairs.len())),
                None => (0, 0),
            };
            let mut ledger = ElasticityLedger::resume(
                engine.elasticity().clone(),
                pairs[..known].iter().map(|(index, revenue, _)| (*index, *revenue)).collect(),
                last_version,
            );

            for (index, revenue, observed_at) in &pairs[known..] {
                let estimate = ledger.append(*index, *revenue, *observed_at)?.clone();
                let estimate = engine.stabilize_elasticity(estimate, output.provisional);
                db::insert_elasticity(&pool, tenant, &estimate, ledger.history().len()).await?;
            }
            if force || (known == pairs.len() && last_version == 0) {
                let estimate = ledger.force_recompute(Utc::now()).clone();
                let estimate = engine.stabilize_elasticity(estimate, output.provisional);
                db::insert_elasticity(&pool, tenant, &estimate, ledger.history().len()).await?;
            }

            match ledger.latest() {
                Some(estimate) if estimate.is_insufficient() => {
                    println!(
                        "v{}: insufficient history ({} points).",
                        estimate.version, estimate.sample_size
                    );
                }
                Some(estimate) => {
                    println!(
                        "v{}: ${:.0} per point (${:.0} to ${:.0}), confidence {:.2} ({})",
                        estimate.version,
                        estimate.usd_per_point,
                        estimate.confidence_interval[0],
                        estimate.confidence_interval[1],
                        estimate.confidence,
                        estimate.confidence_label.as_str()
                    );
                }
                None => println!("No new history since v{last_version}; use --force to recompute."),
            }
        }
        Commands::Simulate {
            scenario,
            trials,
            seed,
        } => {
            let tenant = db::tenant_id(&pool, &cli.tenant).await?;
            let raw = std::fs::read_to_string(&scenario)
                .with_context(|| format!("failed to read {}", scenario.display()))?;
            let scenario_file: ScenarioFile = serde_json::from_str(&raw)
                .with_context(|| format!("invalid scenario {}", scenario.display()))?;

            let history = db::fetch_observations(&pool, tenant).await?;
            let elasticity = if history.is_empty() {
                None
            } else {
                let geo_history = db::fetch_geo_snapshots(&pool, tenant).await?;
                Some(engine.run(&history, &geo_history)?.elasticity)
            };
            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            let result = engine.simulate(
                &scenario_file.baseline,
                &scenario_file.actions,
                trials,
                elasticity.as_ref(),
                &mut rng,
            )?;

            println!(
                "Scenario {}: {:.1} -> {:.1} ({:+.1}) over {} trials",
                result.scenario_id,
                result.current_score,
                result.expected_score,
                result.improvement,
                result.trials
            );
            let d = result.distribution;
            println!(
                "Distribution min {:.1} / p25 {:.1} / median {:.1} / p75 {:.1} / max {:.1}",
                d.min, d.p25, d.median, d.p75, d.max
            );
            if let Some(roi) = result.roi {
                println!(
                    "ROI {:.0}% (value ${:.0} on cost ${:.0})",
                    roi.roi_percent, roi.expected_value, roi.total_cost
                );
            }
            for recommendation in &result.recommendations {
                println!("- {recommendation}");
            }
            db::record_result(&pool, tenant, "scenario", &result).await?;
        }
        Commands::Validate {
            csv,
            period,
            nominal,
        } => {
            let tenant = db::ensure_tenant(&pool, &cli.tenant).await?;
            let mut reader = csv::Reader::from_path(&csv)
                .with_context(|| format!("failed to open {}", csv.display()))?;
            let rows = reader
                .deserialize::<ValidationRow>()
                .collect::<Result<Vec<_>, _>>()
                .with_context(|| format!("bad validation row in {}", csv.display()))?;

            let observed: Vec<f64> = rows.iter().map(|row| row.observed).collect();
            let predicted: Vec<f64> = rows.iter().map(|row| row.predicted).collect();
            let validator = engine.validator();
            let report = validator.validate(&observed, &predicted, &period)?;
            let benchmarks = validator.benchmarks(&report);

            let intervals: Option<Vec<Interval>> = rows
                .iter()
                .map(|row| Some(Interval { lower: row.lower?, upper: row.upper? }))
                .collect();
            let coverage = match intervals {
                Some(intervals) => Some(validator.coverage(&observed, &intervals, nominal)?),
                None => None,
            };
            let revenue: Option<Vec<f64>> = rows.iter().map(|row| row.revenue_at_risk).collect();
            let revenue_correlation = match revenue {
                Some(revenue) => Some(validator.revenue_correlation(&predicted, &revenue)?),
                None => None,
            };

            println!(
                "{}: rmse {:.2} / mae {:.2} / mape {:.1}% / r² {:.3} over {} points",
                report.month, report.rmse, report.mae, report.mape, report.r2, report.sample_size
            );
            for benchmark in &benchmarks {
                println!(
                    "- {} {:.3} (target {:.2}): {:?}",
                    benchmark.metric, benchmark.actual, benchmark.target, benchmark.status
                );
            }
            if let Some(coverage) = &coverage {
                println!(
                    "Coverage {:.0}% vs nominal {:.0}% ({:?})",
                    coverage.coverage * 100.0,
                    coverage.nominal * 100.0,
                    coverage.calibration
                );
            }
            if let Some(correlation) = revenue_correlation {
                println!("Revenue correlation {correlation:.2}");
            }

            let outcome = ValidationOutcome {
                report,
                benchmarks,
                coverage,
                revenue_correlation,
            };
            db::record_result(&pool, tenant, "validation", &outcome).await?;
        }
        Commands::Forecast { horizon, level } => {
            let tenant = db::tenant_id(&pool, &cli.tenant).await?;
            let (history, output) = run_pipeline(&pool, &engine, tenant).await?;
            let raw: Vec<f64> = history.iter().map(|obs| obs.index).collect();
            let points = forecast::project(&output.smoothed, &raw, horizon, level)?;
            for point in &points {
                let lag = point
                    .components
                    .lag_regression
                    .map(|value| format!("{value:.1}"))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}: {:.1} ({:.1} to {:.1}, confidence {:.2}) trend {:.1} lag {}",
                    point.target_at.format("%Y-%m-%d"),
                    point.value,
                    point.lower,
                    point.upper,
                    point.confidence,
                    point.components.trend,
                    lag
                );
            }
            db::record_result(&pool, tenant, "forecast", &points).await?;
        }
        Commands::Report { horizon, out } => {
            let tenant = db::tenant_id(&pool, &cli.tenant).await?;
            let (history, output) = run_pipeline(&pool, &engine, tenant).await?;
            let raw: Vec<f64> = history.iter().map(|obs| obs.index).collect();
            let projection = forecast::project(&output.smoothed, &raw, horizon, 0.95)?;
            let report = report::build_report(&cli.tenant, Utc::now(), &output, &projection);
            std::fs::write(&out, report)?;
            info!(tenant = %cli.tenant, path = %out.display(), "report written");
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
