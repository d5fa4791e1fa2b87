/// Change records for one ARD tile, one JSON file per tile row.
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Builder;
use log::LevelFilter;

use chipmap_core::config::MapConfig;
use chipmap_core::grid::TileId;
use chipmap_core::logging::LogContext;
use chipmap_core::records::RecordExporter;
use chipmap_core::source::{DirectorySource, HttpSource, ResultSource};

#[derive(Parser, Debug)]
#[command(name = "records", about = "Export per-segment change records for an ARD tile")]
struct Args {
    /// Output directory for record_change{row}.json files
    output: PathBuf,

    /// ARD tile horizontal index
    h: u32,

    /// ARD tile vertical index
    v: u32,

    /// Results algorithm identifier used by the API [default: from config]
    #[arg(short, long)]
    algorithm: Option<String>,

    /// Directory of saved chip documents; the results API is used when absent
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Run configuration (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Parallel row bands
    #[arg(short, long, default_value = "1")]
    procs: usize,

    /// More output per occurrence (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| writeln!(buf, "[{}] {}", record.level(), record.args()))
        .init();
}

fn load_config(args: &Args) -> Result<MapConfig> {
    let mut config = match &args.config {
        Some(path) => MapConfig::from_file(path).with_context(|| format!("Cannot load {}", path.display()))?,
        None => MapConfig::default(),
    };
    if let Some(algorithm) = &args.algorithm {
        config.algorithm = algorithm.clone();
    }
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = load_config(&args)?;
    let tile = TileId::new(args.h, args.v);
    let log = LogContext::new(tile.to_string());

    let source: Box<dyn ResultSource> = match &args.input {
        Some(dir) => Box::new(DirectorySource::new(dir, config.grid.clone())),
        None => Box::new(
            HttpSource::new(&config.host, &config.algorithm, config.grid.clone(), config.retry_policy(), log.child("http"))
                .context("Cannot build HTTP client")?,
        ),
    };
    let exporter = RecordExporter::new(source, config.grid.clone(), &args.output, log)
        .with_context(|| format!("Cannot prepare {}", args.output.display()))?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(args.procs.max(1))
        .build()
        .context("Cannot start thread pool")?;
    let report = pool.install(|| exporter.export_tile(tile));

    eprintln!(
        "[records] {tile}: {} records in {} rows ({} chips failed)",
        report.records, report.rows, report.failed_chips
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algorithm_comes_from_config_unless_given() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(&path, r#"{"algorithm": "ccdc:2.0"}"#).unwrap();
        let config = path.to_str().unwrap();

        let args = Args::parse_from(["records", "out", "5", "2", "-c", config]);
        assert_eq!(load_config(&args).unwrap().algorithm, "ccdc:2.0");

        let args = Args::parse_from(["records", "out", "5", "2", "-c", config, "-a", "pyccd:9"]);
        assert_eq!(load_config(&args).unwrap().algorithm, "pyccd:9");
    }
}
