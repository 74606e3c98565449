//! gradeflow - score and rank a student batch against a pipeline document.
//!
//! Reads a pipeline JSON document, a JSON array of student contexts and an
//! optional token-menu document, then writes the ranked results as JSON
//! lines through the persistence sink.

use clap::Parser;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use u_gradeflow::batch::{persist_results, BatchConfig, BatchRunner, JsonLinesSink};
use u_gradeflow::block::{validate, PipelineDef};
use u_gradeflow::error::LoadError;
use u_gradeflow::model::{Context, TokenMenuStore};
use u_gradeflow::telemetry;

/// Block-pipeline scoring engine for admissions transcripts
#[derive(Parser, Debug)]
#[command(name = "gradeflow")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Pipeline definition (JSON)
    #[arg(long, env = "GRADEFLOW_PIPELINE")]
    pipeline: PathBuf,

    /// Student contexts (JSON array)
    #[arg(long, env = "GRADEFLOW_STUDENTS")]
    students: PathBuf,

    /// Token menus (JSON object of menu key to items)
    #[arg(long, env = "GRADEFLOW_MENUS")]
    menus: Option<PathBuf>,

    /// Output file for JSON lines; `-` writes to stdout
    #[arg(long, env = "GRADEFLOW_OUTPUT", default_value = "-")]
    output: PathBuf,

    /// Students per execution chunk
    #[arg(long, env = "GRADEFLOW_CHUNK_SIZE", default_value_t = 100)]
    chunk_size: usize,

    /// Rows per persistence chunk (1-5000)
    #[arg(long, env = "GRADEFLOW_PERSIST_CHUNK_SIZE", default_value_t = 500)]
    persist_chunk_size: usize,

    /// Run students one at a time
    #[arg(long, env = "GRADEFLOW_SEQUENTIAL")]
    sequential: bool,

    /// Skip snapshot capture
    #[arg(long, env = "GRADEFLOW_NO_SNAPSHOTS")]
    no_snapshots: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, env = "GRADEFLOW_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = telemetry::init(&cli.log_level) {
        eprintln!("Warning: Failed to initialize logging: {e}");
    }

    match run(&cli) {
        Ok(failed) if failed > 0 => {
            eprintln!("{failed} student(s) failed; see log for details");
            ExitCode::from(2)
        }
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Returns the number of failed students.
fn run(cli: &Cli) -> Result<usize, Box<dyn std::error::Error>> {
    let def: PipelineDef = read_json(&cli.pipeline)?;
    let pipeline = validate(&def).map_err(|e| {
        for v in &e.violations {
            tracing::error!(violation = %v, "pipeline violation");
        }
        LoadError::Validation(e)
    })?;

    let students: Vec<Context> = read_json(&cli.students)?;
    let menus = match &cli.menus {
        Some(path) => read_json::<TokenMenuStore>(path)?,
        None => TokenMenuStore::new(),
    };

    let config = BatchConfig::default()
        .with_chunk_size(cli.chunk_size)
        .with_persist_chunk_size(cli.persist_chunk_size)
        .with_parallel(!cli.sequential)
        .with_capture_snapshots(!cli.no_snapshots);

    let result = BatchRunner::run(&pipeline, &menus, students, &config)?;

    let out: Box<dyn Write> = if cli.output.as_os_str() == "-" {
        Box::new(io::stdout().lock())
    } else {
        let file = File::create(&cli.output).map_err(|source| LoadError::Io {
            path: cli.output.clone(),
            source,
        })?;
        Box::new(file)
    };
    let mut sink = JsonLinesSink::new(BufWriter::new(out));
    persist_results(&mut sink, pipeline.id, &result.results, config.persist_chunk_size)?;
    sink.into_inner().flush()?;

    Ok(result.failures.len())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, LoadError> {
    let text = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&text)?)
}
