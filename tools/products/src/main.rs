/// Annual product mosaics for one ARD tile.
///
/// Chip results come from a directory of saved chip documents (`--input`) or,
/// without one, from the results API. One grid per product and year is written
/// to the output directory, plus the tile's coverage mask.
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use env_logger::Builder;
use log::LevelFilter;

use chipmap_core::config::MapConfig;
use chipmap_core::generator::AnnualGenerator;
use chipmap_core::grid::TileId;
use chipmap_core::logging::LogContext;
use chipmap_core::mosaic::MosaicWriter;
use chipmap_core::pipeline::{run_pipeline, ChipBuilder};
use chipmap_core::product::{ProductFamily, ProductTable};
use chipmap_core::source::{DirectorySource, HttpSource, ResultSource};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Family {
    Change,
    Class,
}

impl From<Family> for ProductFamily {
    fn from(f: Family) -> Self {
        match f {
            Family::Change => ProductFamily::Change,
            Family::Class => ProductFamily::Class,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "products", about = "Build annual change or class product mosaics for an ARD tile")]
struct Args {
    /// Output directory for the mosaic grids (created if absent)
    output: PathBuf,

    /// ARD tile horizontal index
    h: u32,

    /// ARD tile vertical index
    v: u32,

    /// Product family to build
    #[arg(short, long, value_enum, default_value = "change")]
    family: Family,

    /// Directory of saved chip documents; the results API is used when absent
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Run configuration (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Worker threads
    #[arg(short, long)]
    procs: Option<usize>,

    #[arg(long)]
    first_year: Option<i32>,

    #[arg(long)]
    last_year: Option<i32>,

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
    if let Some(n) = args.procs {
        config.workers = n;
    }
    if let Some(y) = args.first_year {
        config.first_year = y;
    }
    if let Some(y) = args.last_year {
        config.last_year = y;
    }
    config.validate().context("Invalid configuration")?;
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
            HttpSource::new(
                &config.host,
                &config.algorithm,
                config.grid.clone(),
                config.retry_policy(),
                log.child("http"),
            )
            .context("Cannot build HTTP client")?,
        ),
    };

    let table = ProductTable::for_family(args.family.into())?;
    let generator = AnnualGenerator::new(table, config.years(), config.grid.chip_pixels)?;
    let builder = ChipBuilder::new(source, generator, log.child("build"));
    let mut writer = MosaicWriter::new(&args.output, config.grid.clone(), config.retry_policy(), log.child("mosaic"))
        .with_context(|| format!("Cannot prepare {}", args.output.display()))?;

    let chips = config.grid.chips(tile);
    let report = run_pipeline(chips, &builder, &mut writer, config.pipeline_options(), &log)?;
    let grids = writer.finish().context("Failed to sync mosaic grids")?;

    eprintln!(
        "[products] {tile}: {}/{} chips written to {grids} grids ({} failed, {} write failures)",
        report.written, report.dispatched, report.worker_failures, report.write_failures
    );
    Ok(())
}
