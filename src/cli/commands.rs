//! CLI command implementations

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};

use crate::graph::{GraphQueryEngine, MemoryGraph};
use crate::lazy::{BatchError, EngineConfig, LazyEngine};
use crate::observability::{log_event_with_fields, Event, Logger};

use super::args::{Command, Strategy};
use super::errors::{CliError, CliResult};
use super::io::{read_graph, read_queries, write_error, write_line, write_response};

/// Interval between batch-formation attempts while propagation runs
const FORM_INTERVAL: Duration = Duration::from_millis(1);

/// Main CLI entry point
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    // Unlocked handle: propagation workers log to stdout concurrently
    let mut out = io::stdout();
    match cmd {
        Command::Run {
            config,
            graph,
            queries,
            strategy,
        } => run_queries(&mut out, config.as_deref(), &graph, &queries, strategy),
        Command::CheckConfig { config } => check_config(&mut out, &config),
    }
}

/// Load configuration (defaults when no path is given) and apply its
/// log level
fn load_config(path: Option<&Path>) -> CliResult<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    Logger::set_min_severity(config.log_severity()?);
    log_event_with_fields(
        Event::ConfigLoaded,
        &[(
            "source",
            &path.map_or_else(|| "defaults".to_string(), |p| p.display().to_string()),
        )],
    );
    Ok(config)
}

/// Print the effective configuration
pub fn check_config<W: Write>(out: &mut W, config_path: &Path) -> CliResult<()> {
    let config = load_config(Some(config_path))?;
    write_response(out, serde_json::to_value(&config)?)
}

/// Defer every query, drive the batches to completion, print outcomes.
///
/// One line per query in file order: the outcome with its latency, or the
/// error that kept it from being accepted. A final line carries the
/// metrics snapshot.
pub fn run_queries<W: Write>(
    out: &mut W,
    config_path: Option<&Path>,
    graph_path: &Path,
    queries_path: &Path,
    strategy: Strategy,
) -> CliResult<()> {
    let config = load_config(config_path)?;
    let graph = Arc::new(MemoryGraph::from_file(read_graph(graph_path)?));
    let queries = read_queries(queries_path)?;
    let engine = LazyEngine::new(config, Arc::new(GraphQueryEngine::new(graph)))?;

    let mut accepted = Vec::with_capacity(queries.len());
    for query in &queries {
        accepted.push(engine.lazy_execute(query));
    }

    match strategy {
        Strategy::Scan => drive_with_scan_loop(&engine)?,
        Strategy::Dispatch => engine.dispatch_until_drained()?,
    }

    for (query, result) in queries.iter().zip(accepted) {
        match result {
            Ok(sequence) => write_outcome(out, &engine, sequence)?,
            Err(e) => write_line(
                out,
                &json!({
                    "status": "rejected",
                    "query": query,
                    "code": e.code(),
                    "message": e.to_string(),
                }),
            )?,
        }
    }

    write_response(out, json!({ "metrics": engine.metrics() }))?;
    engine.shutdown();
    Ok(())
}

fn write_outcome<W: Write>(out: &mut W, engine: &LazyEngine, sequence: u64) -> CliResult<()> {
    let Some(outcome) = engine.take_outcome(sequence) else {
        return write_error(
            out,
            "AERO_CLI_ENGINE_ERROR",
            &format!("no outcome for operation {}", sequence),
        );
    };
    let latency_us: Option<i64> = engine
        .operation_time(sequence)
        .ok()
        .and_then(|d| d.num_microseconds());

    let mut line = serde_json::to_value(&outcome)?;
    if let Value::Object(fields) = &mut line {
        fields.insert("latency_us".into(), json!(latency_us));
    }
    write_line(out, &line)
}

/// Run scan-loop propagation while forming batches from the pending queue
fn drive_with_scan_loop(engine: &LazyEngine) -> CliResult<()> {
    engine.start_propagation()?;
    while engine.operations_remaining() > 0 {
        match engine.form_batch() {
            Ok(Some(_)) => continue,
            // Members of a rejected batch already completed as failed
            Ok(None) | Err(BatchError::RegistryFull { .. }) | Err(BatchError::Executor(_)) => {
                thread::sleep(FORM_INTERVAL)
            }
            Err(e) => {
                engine.stop_propagation();
                return Err(CliError::from(e));
            }
        }
    }
    engine.stop_propagation();
    Ok(())
}
