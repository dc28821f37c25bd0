// Entry point and high-level CLI flow.
//
// Each subcommand loads the long file once and then generates one workbook
// per key (state, or year + subject-grade) from a fresh template copy:
// - `state`   per-state trend tables
// - `snake`   snake charts for every year and subject-grade
// - `profile` state profiles with the rebuilt note block
// - `preview` prints mapped rows without writing anything
mod error;
mod generators;
mod layout;
mod loader;
mod mapper;
mod output;
mod types;
mod util;
mod xlsx;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use generators::{
    ProfileTableGenerator, SnakeKey, SnakeTableGenerator, StateTableGenerator, TableGenerator,
};
use loader::{Dataset, LoadReport, PostProcess};
use types::{RunSummary, SubjectGrade};

const DEFAULT_DATA: &str = "long file.xlsx";
const DEFAULT_STATE_TEMPLATE: &str = "source_state.xlsx";
const DEFAULT_SNAKE_TEMPLATE: &str = "source_snakechart.xlsx";
const DEFAULT_PROFILE_TEMPLATE: &str = "template_state.xlsx";
const DEFAULT_STATE_OUT: &str = "output/state";
const DEFAULT_SNAKE_OUT: &str = "output/snakechart";
const DEFAULT_PROFILE_OUT: &str = "output/profile";
const PREVIEW_ROWS: usize = 60;

#[derive(Parser)]
#[command(name = "naep-tables")]
#[command(author, version, about = "Fill NAEP mapping-study Excel templates from the long file")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Per-state trend tables, one workbook per state
    State {
        /// Long file (csv or xlsx)
        #[arg(long, default_value = DEFAULT_DATA)]
        data: PathBuf,

        #[arg(long, default_value = DEFAULT_STATE_TEMPLATE)]
        template: PathBuf,

        #[arg(long, default_value = DEFAULT_STATE_OUT)]
        out_dir: PathBuf,

        /// Only generate this state
        #[arg(long)]
        state: Option<String>,
    },

    /// Snake charts, one workbook per year and subject-grade
    Snake {
        #[arg(long, default_value = DEFAULT_DATA)]
        data: PathBuf,

        #[arg(long, default_value = DEFAULT_SNAKE_TEMPLATE)]
        template: PathBuf,

        #[arg(long, default_value = DEFAULT_SNAKE_OUT)]
        out_dir: PathBuf,

        /// Only generate this year
        #[arg(long)]
        year: Option<i32>,
    },

    /// State profiles with state and consortium tables
    Profile {
        #[arg(long, default_value = DEFAULT_DATA)]
        data: PathBuf,

        #[arg(long, default_value = DEFAULT_PROFILE_TEMPLATE)]
        template: PathBuf,

        #[arg(long, default_value = DEFAULT_PROFILE_OUT)]
        out_dir: PathBuf,

        #[arg(long)]
        state: Option<String>,
    },

    /// Print mapped rows for one state, or for one year and subject-grade
    Preview {
        #[arg(long, default_value = DEFAULT_DATA)]
        data: PathBuf,

        #[arg(long, conflicts_with_all = ["year", "subjgrade"])]
        state: Option<String>,

        #[arg(long, requires = "subjgrade")]
        year: Option<i32>,

        /// Subject-grade code: R4, M4, R8 or M8
        #[arg(long, requires = "year")]
        subjgrade: Option<String>,
    },
}

fn init_logging() {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(env).init();
}

fn load(path: &Path, post: Option<PostProcess>) -> Result<(Dataset, LoadReport)> {
    loader::load_dataset(path, post).with_context(|| format!("loading {}", path.display()))
}

fn summary(mode: &str, input: &Path, data: &Dataset, report: &LoadReport, files: Vec<String>) -> RunSummary {
    RunSummary {
        mode: mode.to_string(),
        input: input.display().to_string(),
        total_rows: report.total_rows,
        included_rows: report.included_rows,
        skipped_rows: report.parse_errors,
        states: data.states.len(),
        consortia: data.consortia.len(),
        years: data.years.clone(),
        files,
    }
}

fn finish(out_dir: &Path, summary: &RunSummary) -> Result<()> {
    let path = out_dir.join("summary.json");
    output::write_json(&path, summary).with_context(|| format!("writing {}", path.display()))?;
    info!(
        files = %util::format_int(summary.files.len()),
        summary = %path.display(),
        "done"
    );
    Ok(())
}

fn run_state(data_path: &Path, template: &Path, out_dir: &Path, only: Option<String>) -> Result<()> {
    let (data, report) = load(data_path, None)?;
    let gen = StateTableGenerator::new(&data, template);
    let states = only.map(|s| vec![s]).unwrap_or_else(|| data.states.clone());

    let mut files = Vec::new();
    for state in &states {
        let wb = gen
            .generate(state)
            .with_context(|| format!("generating state table for {state}"))?;
        let path = output::state_report_path(out_dir, state);
        output::write_workbook(&path, &wb).with_context(|| format!("writing {}", path.display()))?;
        files.push(path.display().to_string());
    }
    finish(out_dir, &summary("state", data_path, &data, &report, files))
}

fn run_snake(data_path: &Path, template: &Path, out_dir: &Path, only: Option<i32>) -> Result<()> {
    let (data, report) = load(data_path, Some(loader::snake_chart_inclusion_fixups))?;
    let gen = SnakeTableGenerator::new(&data, template);
    let years = only.map(|y| vec![y]).unwrap_or_else(|| data.state_years());

    let mut files = Vec::new();
    for year in years {
        for subjgrade in SubjectGrade::ALL {
            let key = SnakeKey { year, subjgrade };
            let wb = gen
                .generate(&key)
                .with_context(|| format!("generating snake chart {year} {subjgrade}"))?;
            let path = output::snake_chart_path(out_dir, &key);
            output::write_workbook(&path, &wb).with_context(|| format!("writing {}", path.display()))?;
            files.push(path.display().to_string());
        }
    }
    finish(out_dir, &summary("snake", data_path, &data, &report, files))
}

fn run_profile(data_path: &Path, template: &Path, out_dir: &Path, only: Option<String>) -> Result<()> {
    let (data, report) = load(data_path, None)?;
    let gen = ProfileTableGenerator::new(&data, template);
    let states = only.map(|s| vec![s]).unwrap_or_else(|| data.all_states());

    let mut files = Vec::new();
    for state in &states {
        let wb = gen
            .generate(state)
            .with_context(|| format!("generating state profile for {state}"))?;
        let path = output::state_report_path(out_dir, state);
        output::write_workbook(&path, &wb).with_context(|| format!("writing {}", path.display()))?;
        files.push(path.display().to_string());
    }
    finish(out_dir, &summary("profile", data_path, &data, &report, files))
}

fn run_preview(
    data_path: &Path,
    state: Option<String>,
    year: Option<i32>,
    subjgrade: Option<String>,
) -> Result<()> {
    match (state, year, subjgrade) {
        (Some(state), _, _) => {
            let (data, _) = load(data_path, None)?;
            let rows = StateTableGenerator::new(&data, DEFAULT_STATE_TEMPLATE).preview(&state);
            output::preview_table_rows(&format!("State table: {state}"), &rows, PREVIEW_ROWS);
        }
        (None, Some(year), Some(code)) => {
            let subjgrade: SubjectGrade = code.parse()?;
            let (data, _) = load(data_path, Some(loader::snake_chart_inclusion_fixups))?;
            let key = SnakeKey { year, subjgrade };
            let rows = SnakeTableGenerator::new(&data, DEFAULT_SNAKE_TEMPLATE).preview(&key);
            let title = format!(
                "Snake chart {year}{}: {} grade {}",
                subjgrade.letter(),
                subjgrade.subject.label(),
                subjgrade.grade
            );
            output::preview_table_rows(&title, &rows, PREVIEW_ROWS);
        }
        _ => anyhow::bail!("preview needs --state, or --year together with --subjgrade"),
    }
    Ok(())
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::State {
            data,
            template,
            out_dir,
            state,
        } => run_state(&data, &template, &out_dir, state),
        Commands::Snake {
            data,
            template,
            out_dir,
            year,
        } => run_snake(&data, &template, &out_dir, year),
        Commands::Profile {
            data,
            template,
            out_dir,
            state,
        } => run_profile(&data, &template, &out_dir, state),
        Commands::Preview {
            data,
            state,
            year,
            subjgrade,
        } => run_preview(&data, state, year, subjgrade),
    }
}
