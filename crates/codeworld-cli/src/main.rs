//! CodeWorld - sandboxed strategy evaluation CLI
//!
//! The `codeworld` command vets candidate programs, scores outputs with the
//! canonical judge, and runs whole tasks through the sandbox runners.
//!
//! ## Commands
//!
//! - `validate`: Statically vet a candidate program
//! - `judge`: Score one candidate's outputs with the canonical rubric
//! - `rank`: Order already-scored candidates into a leaderboard
//! - `eval`: Run every variant of a task file and print the report

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, Level};

use codeworld_core::judge::rubric::retain_metrics;
use codeworld_core::{
    aggregate_judge, evaluate, judge_score, lexicographic_aggregate, rank, validate, EvalOptions,
    EvalReport, LeaderboardEntry, MetricSet, RankingMode, RunnerBinary, RunnerKind,
    ScoredCandidate, SupervisorConfig, TaskSpec, METRICS,
};

#[derive(Parser)]
#[command(name = "codeworld")]
#[command(author = "CodeWorld Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Sandboxed strategy execution and deterministic judging", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Statically vet a candidate program (exit 1 when rejected)
    Validate {
        /// Program file
        path: PathBuf,
    },

    /// Score outputs with the canonical rubric
    Judge {
        /// JSON payload with task, context, outputs, timings (default: stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Rank scored candidates into a leaderboard
    Rank {
        /// JSON array of candidates (default: stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Ranking mode: weighted or lexicographic
        #[arg(short, long, default_value = "weighted")]
        mode: RankingMode,
    },

    /// Evaluate every variant of a task file
    Eval {
        /// Task file (JSON)
        task: PathBuf,

        /// Override the task's ranking mode
        #[arg(short, long)]
        mode: Option<RankingMode>,

        /// Wall-clock budget per runner process
        #[arg(long, default_value = "3000")]
        timeout_ms: u64,

        /// Directory holding strategy-runner and scoring-runner
        /// (default: next to this executable)
        #[arg(long)]
        runner_dir: Option<PathBuf>,

        /// Write the report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    codeworld_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Validate { path } => {
            if !cmd_validate(&path)? {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Judge { input } => cmd_judge(input.as_deref()),
        Commands::Rank { input, mode } => cmd_rank(input.as_deref(), mode),
        Commands::Eval {
            task,
            mode,
            timeout_ms,
            runner_dir,
            output,
        } => {
            cmd_eval(
                &task,
                mode,
                timeout_ms,
                runner_dir.as_deref(),
                output.as_deref(),
            )
            .await
        }
    }
}

// ---------------------------------------------------------------------------
// Input helpers
// ---------------------------------------------------------------------------

/// Read a JSON document from `path`, or from stdin when absent or `-`.
fn read_json(path: Option<&Path>) -> Result<Value> {
    let text = match path {
        Some(p) if p != Path::new("-") => {
            std::fs::read_to_string(p).with_context(|| format!("Failed to read {:?}", p))?
        }
        _ => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            buf
        }
    };
    serde_json::from_str(&text).context("Input is not valid JSON")
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, PartialEq)]
struct ValidationReport {
    accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

fn validation_report(source: &str) -> ValidationReport {
    match validate(source) {
        Ok(_) => ValidationReport {
            accepted: true,
            reason: None,
        },
        Err(e) => ValidationReport {
            accepted: false,
            reason: Some(e.to_string()),
        },
    }
}

/// Validate a program file. Returns whether it was accepted.
fn cmd_validate(path: &Path) -> Result<bool> {
    let source =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    let report = validation_report(&source);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(report.accepted)
}

// ---------------------------------------------------------------------------
// judge
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct JudgeRequest {
    #[serde(default)]
    task: Value,
    #[serde(default)]
    context: Value,
    #[serde(default)]
    outputs: Value,
    #[serde(default)]
    timings: Value,
    #[serde(default)]
    metrics: Option<Vec<String>>,
}

#[derive(Debug, Serialize, PartialEq)]
struct JudgeResponse {
    metrics: MetricSet,
    aggregate: f64,
    lexicographic: [f64; 3],
}

fn judge_request(request: JudgeRequest) -> Result<JudgeResponse> {
    let mut metrics = judge_score(
        &request.task,
        &request.context,
        &request.outputs,
        &request.timings,
    );
    if let Some(keep) = &request.metrics {
        retain_metrics(&mut metrics, keep)?;
    }
    Ok(JudgeResponse {
        aggregate: (aggregate_judge(&metrics) * 1000.0).round() / 1000.0,
        lexicographic: lexicographic_aggregate(&metrics),
        metrics,
    })
}

fn cmd_judge(input: Option<&Path>) -> Result<()> {
    let request: JudgeRequest =
        serde_json::from_value(read_json(input)?).context("Malformed judge request")?;
    let response = judge_request(request)?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// rank
// ---------------------------------------------------------------------------

fn rank_candidates(doc: Value, mode: RankingMode) -> Result<Vec<LeaderboardEntry>> {
    let candidates: Vec<ScoredCandidate> =
        serde_json::from_value(doc).context("Expected a JSON array of candidates")?;
    let strategy = mode.strategy();
    Ok(rank(candidates, strategy.as_ref())?)
}

fn cmd_rank(input: Option<&Path>, mode: RankingMode) -> Result<()> {
    let entries = rank_candidates(read_json(input)?, mode)?;
    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// eval
// ---------------------------------------------------------------------------

fn eval_options(timeout_ms: u64, runner_dir: Option<&Path>) -> Result<EvalOptions> {
    let supervisor = SupervisorConfig { timeout_ms };
    match runner_dir {
        Some(dir) => Ok(EvalOptions {
            strategy_runner: RunnerBinary::new(
                RunnerKind::Strategy,
                dir.join(RunnerKind::Strategy.binary_name()),
            ),
            scoring_runner: RunnerBinary::new(
                RunnerKind::Scoring,
                dir.join(RunnerKind::Scoring.binary_name()),
            ),
            supervisor,
        }),
        None => Ok(EvalOptions::from_current_exe(supervisor)?),
    }
}

fn load_task(path: &Path, mode: Option<RankingMode>) -> Result<TaskSpec> {
    let mut spec: TaskSpec = serde_json::from_value(read_json(Some(path))?)
        .with_context(|| format!("Malformed task file {:?}", path))?;
    if let Some(mode) = mode {
        spec.mode = mode;
    }
    Ok(spec)
}

fn write_report(report: &EvalReport, output: Option<&Path>) -> Result<()> {
    let content = serde_json::to_string_pretty(report).context("serialize eval report")?;
    if let Some(path) = output {
        std::fs::write(path, &content).with_context(|| format!("Failed to write to {:?}", path))?;
        println!("Wrote report for '{}' to {:?}", report.task, path);
    } else {
        println!("{}", content);
    }
    Ok(())
}

async fn cmd_eval(
    task: &Path,
    mode: Option<RankingMode>,
    timeout_ms: u64,
    runner_dir: Option<&Path>,
    output: Option<&Path>,
) -> Result<()> {
    let spec = load_task(task, mode)?;
    let opts = eval_options(timeout_ms, runner_dir)?;
    info!(task = %spec.task, variants = spec.variants.len(), "Evaluating task");

    let report = evaluate(&spec, &opts).await?;
    METRICS.flush();

    if let Some(leader) = report.leaderboard.first() {
        info!(leader = %leader.candidate_name, "Evaluation complete");
    }
    write_report(&report, output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validation_report_accepts_pure_program() {
        let report = validation_report("def solve(xs):\n    return sum(xs)\n");
        assert_eq!(
            report,
            ValidationReport {
                accepted: true,
                reason: None
            }
        );
    }

    #[test]
    fn test_cmd_validate_rejects_import() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.cw");
        std::fs::write(&path, "import os\n").unwrap();
        assert!(!cmd_validate(&path).unwrap());

        let report = validation_report("import os\n");
        assert_eq!(report.reason.as_deref(), Some("node_forbidden:Import"));
    }

    #[test]
    fn test_validation_report_rejects_deep_nesting() {
        let source = format!("x = {}1\n", "not ".repeat(100_000));
        let report = validation_report(&source);
        assert!(!report.accepted);
        assert_eq!(
            report.reason.as_deref(),
            Some("syntax_error: line 1: too many nested expressions")
        );
    }

    #[test]
    fn test_cmd_validate_missing_file_errors() {
        assert!(cmd_validate(Path::new("/nonexistent/program.cw")).is_err());
    }

    #[test]
    fn test_judge_request_full_marks() {
        let request: JudgeRequest = serde_json::from_value(json!({
            "task": "sort",
            "context": {"expected": [1, 2, 3]},
            "outputs": {"result": [1, 2, 3], "loc": 0},
            "timings": {"duration_ms": 0}
        }))
        .unwrap();
        let response = judge_request(request).unwrap();
        assert_eq!(response.metrics["correctness"], 1.0);
        assert_eq!(response.aggregate, 1.0);
        assert_eq!(response.lexicographic, [1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_judge_request_metric_filter() {
        let request: JudgeRequest = serde_json::from_value(json!({
            "context": {"expected": 1},
            "outputs": {"result": 1, "loc": 0},
            "timings": {"duration_ms": 0},
            "metrics": ["correctness"]
        }))
        .unwrap();
        let response = judge_request(request).unwrap();
        assert_eq!(response.metrics.len(), 1);
        assert_eq!(response.aggregate, 1.0);

        let unknown: JudgeRequest =
            serde_json::from_value(json!({"metrics": ["elegance"]})).unwrap();
        assert!(judge_request(unknown).is_err());
    }

    #[test]
    fn test_rank_candidates_modes() {
        let doc = json!([
            {"name": "a", "metrics": {"correctness": 0.4, "speed": 1.0, "brevity": 1.0}},
            {"name": "b", "metrics": {"correctness": 0.5, "speed": 0.0, "brevity": 0.0}}
        ]);
        let weighted = rank_candidates(doc.clone(), RankingMode::Weighted).unwrap();
        assert_eq!(weighted[0].candidate_name, "a");
        let lex = rank_candidates(doc, RankingMode::Lexicographic).unwrap();
        assert_eq!(lex[0].candidate_name, "b");
    }

    #[test]
    fn test_rank_candidates_rejects_out_of_range() {
        let doc = json!([{"name": "x", "metrics": {"correctness": 1.5}}]);
        assert!(rank_candidates(doc, RankingMode::Weighted).is_err());
    }

    #[test]
    fn test_load_task_mode_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("task.json");
        std::fs::write(
            &path,
            r#"{"task": "t", "variants": {"a": "def solve(x):\n    return x\n"}}"#,
        )
        .unwrap();
        let spec = load_task(&path, Some(RankingMode::Lexicographic)).unwrap();
        assert_eq!(spec.mode, RankingMode::Lexicographic);
        assert_eq!(spec.variants.len(), 1);
    }

    #[test]
    fn test_eval_options_runner_dir() {
        let opts = eval_options(500, Some(Path::new("/opt/codeworld/bin"))).unwrap();
        assert_eq!(
            opts.strategy_runner.path,
            PathBuf::from("/opt/codeworld/bin/strategy-runner")
        );
        assert_eq!(opts.scoring_runner.kind, RunnerKind::Scoring);
        assert_eq!(opts.supervisor.timeout_ms, 500);
    }
}
