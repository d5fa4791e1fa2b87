//! Dispatcher → workers → collector.
//!
//! The dispatcher pushes one [`WorkItem::Chip`] per chip into a bounded
//! channel and then one [`WorkItem::Stop`] per worker. Workers build chip
//! blocks and forward them as [`Message::Data`]; each worker sends exactly one
//! [`Message::Done`] when it stops. The collector runs on the calling thread,
//! is the only holder of the sink, and returns once it has seen every worker's
//! `Done`.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use crate::chip::ChipBlock;
use crate::error::Result;
use crate::generator::AnnualGenerator;
use crate::grid::Chip;
use crate::logging::LogContext;
use crate::mosaic::MosaicSink;
use crate::payload::ChipPayload;
use crate::segment::count_overlaps;
use crate::source::ResultSource;

pub enum WorkItem {
    Chip(Chip),
    Stop,
}

pub enum Message {
    Data(Box<ChipBlock>),
    Done,
}

/// Turns a chip into its block. Shared by every worker.
pub trait ChipProcessor: Sync {
    fn process(&self, chip: &Chip) -> Result<ChipBlock>;
}

/// Fetch → parse → generate.
pub struct ChipBuilder {
    source: Box<dyn ResultSource>,
    generator: AnnualGenerator,
    log: LogContext,
}

impl ChipBuilder {
    pub fn new(source: Box<dyn ResultSource>, generator: AnnualGenerator, log: LogContext) -> Self {
        Self { source, generator, log }
    }
}

impl ChipProcessor for ChipBuilder {
    fn process(&self, chip: &Chip) -> Result<ChipBlock> {
        let payload = match self.source.fetch(chip)? {
            Some(p) => p,
            None => {
                self.log.debug(format_args!("{chip}: no results"));
                ChipPayload::empty(self.generator.chip_pixels())
            }
        };
        let overlaps: usize = payload.pixels.iter().map(|s| count_overlaps(s)).sum();
        if overlaps > 0 {
            self.log.debug(format_args!("{chip}: {overlaps} overlapping segment pair(s)"));
        }
        self.generator.generate(*chip, &payload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub workers: usize,
    /// Capacity of the work channel.
    pub queue_capacity: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        let cores = thread::available_parallelism().map_or(1, |n| n.get());
        Self { workers: cores.saturating_sub(1).max(1), queue_capacity: 64 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub dispatched: usize,
    pub written: usize,
    pub worker_failures: usize,
    pub write_failures: usize,
    /// `Done` messages the collector received.
    pub terminations: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct WorkerReport {
    processed: usize,
    failed: usize,
}

/// Process every chip and hand the blocks to `sink`. Per-chip failures are
/// logged and counted, never returned; only a failure to start the threads is
/// an error.
pub fn run_pipeline<P, S>(
    chips: Vec<Chip>,
    processor: &P,
    sink: &mut S,
    options: PipelineOptions,
    log: &LogContext,
) -> Result<PipelineReport>
where
    P: ChipProcessor + ?Sized,
    S: MosaicSink + ?Sized,
{
    let workers = options.workers.max(1);
    log.info(format_args!("{} chips, {workers} workers", chips.len()));

    thread::scope(|scope| -> Result<PipelineReport> {
        let (work_tx, work_rx) = bounded::<WorkItem>(options.queue_capacity.max(1));
        let (result_tx, result_rx) = unbounded::<Message>();

        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let rx = work_rx.clone();
            let tx = result_tx.clone();
            let wlog = log.child(format!("worker-{id}"));
            let handle = thread::Builder::new()
                .name(format!("worker-{id}"))
                .spawn_scoped(scope, move || work(processor, &rx, &tx, &wlog))?;
            handles.push(handle);
        }
        // Only workers hold these now, so a dead worker pool ends the
        // collector's receive loop instead of hanging it.
        drop(work_rx);
        drop(result_tx);

        let dlog = log.child("dispatcher");
        let dispatcher = thread::Builder::new()
            .name("dispatcher".into())
            .spawn_scoped(scope, move || dispatch(chips, workers, &work_tx, &dlog))?;

        let mut report = collect(&result_rx, sink, workers, &log.child("collector"));

        report.dispatched = dispatcher.join().unwrap_or_else(|p| {
            log.error(format_args!("dispatcher panicked: {}", panic_message(&*p)));
            0
        });
        for handle in handles {
            match handle.join() {
                Ok(w) => report.worker_failures += w.failed,
                Err(p) => log.error(format_args!("worker panicked: {}", panic_message(&*p))),
            }
        }

        log.info(format_args!(
            "{} dispatched, {} written, {} failed, {} write failures",
            report.dispatched, report.written, report.worker_failures, report.write_failures
        ));
        Ok(report)
    })
}

fn dispatch(chips: Vec<Chip>, workers: usize, tx: &Sender<WorkItem>, log: &LogContext) -> usize {
    let mut sent = 0;
    for chip in chips {
        if tx.send(WorkItem::Chip(chip)).is_err() {
            log.warn(format_args!("workers gone after {sent} chips"));
            return sent;
        }
        sent += 1;
    }
    for _ in 0..workers {
        if tx.send(WorkItem::Stop).is_err() {
            break;
        }
    }
    log.debug(format_args!("{sent} chips dispatched"));
    sent
}

fn work<P: ChipProcessor + ?Sized>(
    processor: &P,
    rx: &Receiver<WorkItem>,
    tx: &Sender<Message>,
    log: &LogContext,
) -> WorkerReport {
    let mut report = WorkerReport::default();
    while let Ok(WorkItem::Chip(chip)) = rx.recv() {
        match panic::catch_unwind(AssertUnwindSafe(|| processor.process(&chip))) {
            Ok(Ok(block)) => {
                report.processed += 1;
                if tx.send(Message::Data(Box::new(block))).is_err() {
                    break;
                }
            }
            Ok(Err(e)) => {
                report.failed += 1;
                log.error(format_args!("{chip}: {e}"));
            }
            Err(p) => {
                report.failed += 1;
                log.error(format_args!("{chip}: panicked: {}", panic_message(&*p)));
            }
        }
    }
    let _ = tx.send(Message::Done);
    log.debug(format_args!("stopped after {} chips ({} failed)", report.processed, report.failed));
    report
}

fn collect<S: MosaicSink + ?Sized>(
    rx: &Receiver<Message>,
    sink: &mut S,
    workers: usize,
    log: &LogContext,
) -> PipelineReport {
    let mut report = PipelineReport::default();
    while report.terminations < workers {
        match rx.recv() {
            Ok(Message::Data(block)) => match sink.write_block(&block) {
                Ok(()) => {
                    report.written += 1;
                    log.debug(format_args!("{} written", block.chip));
                }
                Err(e) => {
                    report.write_failures += 1;
                    log.error(format_args!("{}: write failed: {e}", block.chip));
                }
            },
            Ok(Message::Done) => report.terminations += 1,
            Err(_) => {
                log.warn(format_args!(
                    "result channel closed after {} of {workers} workers finished",
                    report.terminations
                ));
                break;
            }
        }
    }
    report
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
