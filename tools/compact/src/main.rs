/// Rewrite saved chip documents compactly.
///
/// Each result's boolean processing mask becomes 0/1 integers and all
/// insignificant whitespace is dropped. Documents without entries are skipped.
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Builder;
use log::{debug, error, LevelFilter};
use rayon::prelude::*;

use chipmap_core::payload::compact_document;

#[derive(Parser, Debug)]
#[command(name = "compact", about = "Compact saved chip result documents")]
struct Args {
    /// Directory of chip documents
    input: PathBuf,

    /// Output directory (created if absent); file names are kept
    output: PathBuf,

    /// Parallel files
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

/// Returns whether a compacted file was written.
fn compact_file(path: &Path, out_dir: &Path) -> Result<bool> {
    let name = path.file_name().context("Input path has no file name")?;
    let bytes = fs::read(path).with_context(|| format!("Read failed: {}", path.display()))?;
    let Some(text) = compact_document(&bytes).with_context(|| format!("Cannot compact {}", path.display()))? else {
        debug!("No results in {}", path.display());
        return Ok(false);
    };
    let out = out_dir.join(name);
    fs::write(&out, text).with_context(|| format!("Write failed: {}", out.display()))?;
    debug!("Saved {}", out.display());
    Ok(true)
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    fs::create_dir_all(&args.output).with_context(|| format!("Cannot create {}", args.output.display()))?;
    let mut files = Vec::new();
    for entry in fs::read_dir(&args.input).with_context(|| format!("Cannot list {}", args.input.display()))? {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(args.procs.max(1))
        .build()
        .context("Cannot start thread pool")?;
    let outcomes: Vec<Result<bool>> =
        pool.install(|| files.par_iter().map(|f| compact_file(f, &args.output)).collect());

    let mut written = 0usize;
    let mut failed = 0usize;
    for (file, outcome) in files.iter().zip(outcomes) {
        match outcome {
            Ok(true) => written += 1,
            Ok(false) => {}
            Err(e) => {
                failed += 1;
                error!("{}: {e:#}", file.display());
            }
        }
    }

    eprintln!("[compact] {written}/{} documents written, {failed} failed", files.len());
    Ok(())
}
