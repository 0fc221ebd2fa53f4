use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use butterfly_tch::formats::btch::BtchOutputFile;
use butterfly_tch::formats::hist::{read_edges, TimeType};
use butterfly_tch::graph::{DynamicGraph, OrderEdgeData};
use butterfly_tch::interval::{DaySchedule, SECONDS_PER_DAY};
use butterfly_tch::ordering::{Ordering, OrderingConfig};
use butterfly_tch::witness::ProfileWitnessSearch;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TimeTypeArg {
    /// One histogram per edge for the whole day
    Alldata,
    /// Peak/off-peak weekday intervals plus a weekend slice
    Peak,
    /// Quarter-hour histograms, weekdays and weekends separately
    Days,
}

impl From<TimeTypeArg> for TimeType {
    fn from(arg: TimeTypeArg) -> Self {
        match arg {
            TimeTypeArg::Alldata => TimeType::AllData,
            TimeTypeArg::Peak => TimeType::Peak,
            TimeTypeArg::Days => TimeType::Days,
        }
    }
}

#[derive(Parser)]
#[command(name = "butterfly-tch")]
#[command(about = "Build a time-dependent contraction hierarchy from travel-time measurements", long_about = None)]
struct Cli {
    /// Input measurement file
    input: PathBuf,

    /// Output .btch file
    output: PathBuf,

    /// Day partition for histogram aggregation
    #[arg(long, value_enum, default_value = "alldata")]
    time_type: TimeTypeArg,

    /// Worker threads for the parallel phases (0 = hardware concurrency)
    #[arg(short, long, default_value_t = 0)]
    threads: usize,

    /// Seed for the contraction tie-break permutation
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let schedule = DaySchedule::default();
    let records = read_edges(&cli.input, cli.time_type.into(), &schedule)
        .with_context(|| format!("Failed to read {}", cli.input.display()))?;
    log::info!("read {} edges from {}", records.len(), cli.input.display());

    let n_nodes = records
        .iter()
        .map(|r| r.source.max(r.target) as usize + 1)
        .max()
        .unwrap_or(0);
    let n_input_edges = records.len();

    let mut graph = DynamicGraph::with_nodes(n_nodes);
    for record in records {
        graph.insert_edge(record.source, record.target, OrderEdgeData::new(record.cost, 1));
    }

    let writer = BtchOutputFile::create(&cli.output, n_nodes, SECONDS_PER_DAY, n_input_edges)
        .with_context(|| format!("Failed to create {}", cli.output.display()))?;

    let mut config = OrderingConfig { n_threads: cli.threads, ..OrderingConfig::default() };
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }

    let run = Ordering::new(graph, writer, ProfileWitnessSearch::default(), config)
        .run()
        .context("Ordering failed")?;

    log::info!(
        "wrote {} edges and {} levels to {} ({} shortcuts, {} rounds)",
        run.writer.n_edges_written(),
        run.node_to_level.len(),
        cli.output.display(),
        run.n_shortcuts,
        run.n_rounds
    );
    Ok(())
}
