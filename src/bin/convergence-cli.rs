//! convergence CLI - inspect budgets, combine step scores, and simulate
//! early-stopping self-consistency against a scripted generator.

use clap::{Parser, Subcommand, ValueEnum};
use convergence::core::matcher::{answer_matcher, default_matcher};
use convergence::core::prm::{self, PrmMethod};
use convergence::core::{
    Candidate, ConsensusChecker, DifficultyEstimator, DifficultyLevel,
    KeywordDifficultyEstimator, MajorityVoteAggregator, MockGenerator, SelfConsistencyConfig,
    UsageStats,
};
use convergence::events::observers::Metrics;
use convergence::verification::VerificationContext;
use convergence::{
    AdaptiveSelfConsistency, ConfigError, EventBus, LoggingObserver, MetricsObserver, Pipeline,
    PipelineConfig,
};
use serde::Serialize;
use serde_json::Value;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Adaptive compute allocation and answer consensus
#[derive(Parser)]
#[command(name = "convergence-cli")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value = "text", global = true)]
    format: OutputFormat,

    /// Increase verbosity (-v, -vv); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for CLI responses
#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output for programmatic use
    Json,
}

#[derive(Clone, Copy, ValueEnum, Default)]
enum MatcherKind {
    /// Compare extracted final answers
    #[default]
    Answer,
    /// Compare whitespace-normalized text
    Exact,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the budget allocated for a difficulty level
    Budget {
        /// easy, medium, hard, or a custom level from --config
        level: String,

        /// Cap on cumulative cost
        #[arg(long)]
        global_limit: Option<f64>,

        /// Pipeline config providing presets and custom levels
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Combine step scores with a PRM method
    Prm {
        /// sum, product, min, max or average
        method: String,

        /// Step scores
        #[arg(allow_negative_numbers = true)]
        scores: Vec<f64>,
    },

    /// Measure agreement among answers
    Consensus {
        /// Candidate answers
        #[arg(required = true)]
        answers: Vec<String>,

        /// Agreement required to report consensus
        #[arg(short, long, default_value = "0.8")]
        threshold: f64,

        #[arg(short, long, value_enum, default_value = "answer")]
        matcher: MatcherKind,
    },

    /// Run self-consistency over a scripted generator
    Simulate {
        /// Answers the generator cycles through
        #[arg(short, long, value_delimiter = ',', required = true)]
        answers: Vec<String>,

        /// easy, medium or hard
        #[arg(short, long, default_value = "medium")]
        difficulty: String,

        #[arg(long)]
        min_candidates: Option<usize>,

        #[arg(long)]
        max_candidates: Option<usize>,

        #[arg(long)]
        batch_size: Option<usize>,

        /// Agreement needed to stop early
        #[arg(short, long)]
        threshold: Option<f64>,

        /// Delay per generator call, in milliseconds
        #[arg(long, default_value = "0")]
        delay_ms: u64,

        /// Pipeline config supplying the self_consistency section
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print collected metrics to stderr
        #[arg(long)]
        metrics: bool,
    },

    /// Run budget, sampling and verification end to end
    Pipeline {
        /// Query to answer; its wording drives the difficulty estimate
        #[arg(short, long)]
        query: String,

        /// Answers the generator cycles through
        #[arg(short, long, value_delimiter = ',', required = true)]
        answers: Vec<String>,

        /// Known-good answer for reference_match verifiers
        #[arg(short, long)]
        reference: Option<String>,

        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print collected metrics to stderr
        #[arg(long)]
        metrics: bool,
    },

    /// Validate a pipeline config file
    CheckConfig {
        path: PathBuf,
    },
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize)]
struct BudgetResponse {
    level: String,
    budget: Value,
    usage: UsageStats,
}

#[derive(Serialize)]
struct PrmResponse {
    method: String,
    scores: Vec<f64>,
    result: Option<f64>,
}

#[derive(Serialize)]
struct ConsensusResponse {
    total: usize,
    threshold: f64,
    reached: bool,
    agreement: f64,
    leader: Option<String>,
}

#[derive(Serialize)]
struct CheckConfigResponse {
    valid: bool,
    path: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = match cli.verbose {
        0 => "info,convergence=debug",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let result = match cli.command {
        Commands::Budget {
            level,
            global_limit,
            config,
        } => execute_budget(cli.format, &level, global_limit, config),

        Commands::Prm { method, scores } => execute_prm(cli.format, &method, scores),

        Commands::Consensus {
            answers,
            threshold,
            matcher,
        } => execute_consensus(cli.format, answers, threshold, matcher),

        Commands::Simulate {
            answers,
            difficulty,
            min_candidates,
            max_candidates,
            batch_size,
            threshold,
            delay_ms,
            config,
            metrics,
        } => {
            let mut sc = match load_config(config) {
                Ok(c) => c.self_consistency,
                Err(e) => return fail(e),
            };
            if let Some(min) = min_candidates {
                sc.min_candidates = min;
            }
            if let Some(max) = max_candidates {
                sc.max_candidates = max;
            }
            if let Some(batch) = batch_size {
                sc.batch_size = batch;
            }
            if let Some(threshold) = threshold {
                sc.early_stop_threshold = threshold;
            }
            execute_simulate(
                cli.format,
                answers,
                &difficulty,
                sc,
                Duration::from_millis(delay_ms),
                metrics,
            )
        }

        Commands::Pipeline {
            query,
            answers,
            reference,
            config,
            metrics,
        } => execute_pipeline(cli.format, &query, answers, reference, config, metrics),

        Commands::CheckConfig { path } => execute_check_config(cli.format, path),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(e),
    }
}

fn fail(message: String) -> ExitCode {
    eprintln!("Error: {}", message);
    ExitCode::FAILURE
}

fn load_config(path: Option<PathBuf>) -> Result<PipelineConfig, String> {
    let config = match path {
        Some(path) => PipelineConfig::from_path(path).map_err(|e| e.to_string())?,
        None => PipelineConfig::default(),
    };
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn runtime() -> Result<tokio::runtime::Runtime, String> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("failed to start runtime: {}", e))
}

// ============================================================================
// Command Implementations
// ============================================================================

fn execute_budget(
    format: OutputFormat,
    level: &str,
    global_limit: Option<f64>,
    config: Option<PathBuf>,
) -> Result<(), String> {
    let mut budgeter = load_config(config)?
        .budgeter()
        .map_err(|e| e.to_string())?;
    if let Some(limit) = global_limit {
        budgeter = budgeter
            .with_global_limit(limit)
            .map_err(|e| e.to_string())?;
    }

    let (budget, budgeter) = budgeter.allocate(level).map_err(|e| e.to_string())?;
    output_response(
        format,
        &BudgetResponse {
            level: level.to_string(),
            budget: Value::Object(budget.to_map()),
            usage: budgeter.usage_stats(),
        },
    )
}

fn execute_prm(format: OutputFormat, method: &str, scores: Vec<f64>) -> Result<(), String> {
    let parsed: PrmMethod = method.parse().map_err(|e: prm::PrmError| e.to_string())?;
    let result = prm::aggregate(parsed, &scores);
    output_response(
        format,
        &PrmResponse {
            method: parsed.to_string(),
            scores,
            result,
        },
    )
}

fn execute_consensus(
    format: OutputFormat,
    answers: Vec<String>,
    threshold: f64,
    matcher: MatcherKind,
) -> Result<(), String> {
    let matcher = match matcher {
        MatcherKind::Answer => answer_matcher(),
        MatcherKind::Exact => default_matcher(),
    };
    let checker = ConsensusChecker::with_aggregator(Arc::new(
        MajorityVoteAggregator::new().with_matcher(matcher),
    ));
    let candidates: Vec<Candidate> = answers
        .into_iter()
        .enumerate()
        .map(|(i, answer)| Candidate::new(format!("cand-{}", i), answer))
        .collect();

    let check = checker
        .check(&candidates, Some(threshold))
        .map_err(|e| e.to_string())?;
    output_response(
        format,
        &ConsensusResponse {
            total: candidates.len(),
            threshold,
            reached: check.reached,
            agreement: check.agreement,
            leader: check.leader,
        },
    )
}

fn execute_simulate(
    format: OutputFormat,
    answers: Vec<String>,
    difficulty: &str,
    config: SelfConsistencyConfig,
    delay: Duration,
    show_metrics: bool,
) -> Result<(), String> {
    let level: DifficultyLevel = difficulty.parse()?;
    let sampler = AdaptiveSelfConsistency::new(config).map_err(|e| e.to_string())?;
    let generator = Arc::new(MockGenerator::new(answers).with_delay(delay));

    let runtime = runtime()?;
    let (result, metrics) = runtime.block_on(async {
        let (bus, mut observer) = observe();
        let result = sampler
            .with_event_bus(bus)
            .run("simulate", generator, Some(level))
            .await;
        observer.drain();
        (result, observer.metrics())
    });
    let result = result.map_err(|e| e.to_string())?;

    output_response(format, &result.to_value())?;
    if show_metrics {
        print_metrics(&metrics);
    }
    Ok(())
}

fn execute_pipeline(
    format: OutputFormat,
    query: &str,
    answers: Vec<String>,
    reference: Option<String>,
    config: Option<PathBuf>,
    show_metrics: bool,
) -> Result<(), String> {
    let config = load_config(config)?;
    let budgeter = config.budgeter().map_err(|e| e.to_string())?;
    let pipeline = Pipeline::from_config(&config).map_err(|e: ConfigError| e.to_string())?;
    let generator = Arc::new(MockGenerator::new(answers));
    let estimator = KeywordDifficultyEstimator::new();
    let mut context = VerificationContext::new().with_query(query);
    if let Some(reference) = reference {
        context = context.with_reference(reference);
    }

    let runtime = runtime()?;
    let (result, metrics) = runtime.block_on(async {
        let (bus, mut observer) = observe();
        let result = pipeline
            .with_event_bus(bus)
            .run(
                &budgeter,
                query,
                generator,
                Some(&estimator as &dyn DifficultyEstimator),
                &context,
            )
            .await;
        observer.drain();
        (result, observer.metrics())
    });
    let (outcome, budgeter) = result;
    let outcome = outcome.map_err(|e| {
        format!("{} (used budget {})", e, budgeter.used_budget())
    })?;

    let mut value = outcome.to_value();
    value["usage"] = serde_json::to_value(budgeter.usage_stats()).map_err(|e| e.to_string())?;
    output_response(format, &value)?;
    if show_metrics {
        print_metrics(&metrics);
    }
    Ok(())
}

fn execute_check_config(format: OutputFormat, path: PathBuf) -> Result<(), String> {
    let config = PipelineConfig::from_path(&path).map_err(|e| e.to_string())?;
    if let Err(ConfigError::Invalid { errors }) = config.validate() {
        eprintln!("Configuration errors:");
        for error in &errors {
            eprintln!("  - {}", error);
        }
        return Err(format!("{} problem(s) in {}", errors.len(), path.display()));
    }
    output_response(
        format,
        &CheckConfigResponse {
            valid: true,
            path: path.display().to_string(),
        },
    )
}

/// Event bus with a spawned logging observer and a drainable metrics observer
fn observe() -> (EventBus, MetricsObserver) {
    let bus = EventBus::with_default_capacity();
    tokio::spawn(LoggingObserver::new(&bus).run());
    let metrics = MetricsObserver::new(&bus);
    (bus, metrics)
}

fn print_metrics(metrics: &std::sync::Mutex<Metrics>) {
    let metrics = metrics.lock().unwrap_or_else(PoisonError::into_inner);
    eprintln!("{}", metrics.report());
}

// ============================================================================
// Output Helpers
// ============================================================================

/// Print `response` as pretty JSON or as indented text
fn output_response<T: Serialize>(format: OutputFormat, response: &T) -> Result<(), String> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(response)
                .map_err(|e| format!("Failed to serialize response: {}", e))?;
            println!("{}", json);
        }
        OutputFormat::Text => {
            let value = serde_json::to_value(response)
                .map_err(|e| format!("Failed to serialize response: {}", e))?;
            print_value(&value, 0);
        }
    }
    Ok(())
}

fn print_value(value: &Value, indent: usize) {
    let prefix = "  ".repeat(indent);
    match value {
        Value::Object(map) => {
            for (key, val) in map {
                match val {
                    Value::Object(_) | Value::Array(_) => {
                        println!("{}{}:", prefix, key);
                        print_value(val, indent + 1);
                    }
                    _ => println!("{}{}: {}", prefix, key, format_simple_value(val)),
                }
            }
        }
        Value::Array(arr) => {
            for (i, val) in arr.iter().enumerate() {
                match val {
                    Value::Object(_) | Value::Array(_) => {
                        println!("{}[{}]:", prefix, i);
                        print_value(val, indent + 1);
                    }
                    _ => println!("{}- {}", prefix, format_simple_value(val)),
                }
            }
        }
        _ => println!("{}{}", prefix, format_simple_value(value)),
    }
}

fn format_simple_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        _ => value.to_string(),
    }
}
