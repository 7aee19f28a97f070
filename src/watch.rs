//! Directory watcher feeding the ingestion pipeline.
//!
//! The `notify` callback does nothing but push paths onto a bounded queue.
//! A single tokio task drains the queue and runs
//! [`IngestPipeline::process_file`] one path at a time, so slow inserts
//! never stall event delivery and two events for the same file never race
//! each other through the dedup check.
//!
//! A file is read only once its writer is done with it. On inotify that is
//! the close-after-write event or a rename into the directory; creation and
//! data writes are not triggers there, since a file can be created empty
//! and filled over several flushes. Backends without close events (FSEvents,
//! kqueue, Windows) fall back to creation and data writes, and a path is
//! processed only after it has been quiet for [`SETTLE`]. Repeated triggers
//! for one file are no-ops through dedup-by-source.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use notify::event::{AccessKind, AccessMode, CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::ingest::IngestPipeline;

const QUEUE_CAPACITY: usize = 256;

/// Quiet period before a file seen only through create or data events is read.
pub const SETTLE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    /// The writer is done; read now.
    Ready,
    /// The file is changing; read once it has been quiet for [`SETTLE`].
    Settle,
}

fn classify(kind: &EventKind) -> Option<Trigger> {
    let has_close_events = cfg!(target_os = "linux");
    match kind {
        EventKind::Access(AccessKind::Close(AccessMode::Write))
        | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(Trigger::Ready),
        EventKind::Create(CreateKind::File | CreateKind::Any)
        | EventKind::Modify(
            ModifyKind::Data(_) | ModifyKind::Any | ModifyKind::Name(RenameMode::Any),
        ) if !has_close_events => Some(Trigger::Settle),
        _ => None,
    }
}

/// Paths waiting for their writer to go quiet.
#[derive(Default)]
struct Pending {
    due: HashMap<PathBuf, Instant>,
}

impl Pending {
    fn touch(&mut self, path: PathBuf, now: Instant) {
        self.due.insert(path, now + SETTLE);
    }

    fn forget(&mut self, path: &Path) {
        self.due.remove(path);
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.due.values().min().copied()
    }

    /// Remove and return every path whose quiet period has elapsed, by name.
    fn take_due(&mut self, now: Instant) -> Vec<PathBuf> {
        let mut ready: Vec<PathBuf> = self
            .due
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(p, _)| p.clone())
            .collect();
        ready.sort();
        for path in &ready {
            self.due.remove(path);
        }
        ready
    }

    fn drain(&mut self) -> Vec<PathBuf> {
        let mut rest: Vec<PathBuf> = self.due.drain().map(|(p, _)| p).collect();
        rest.sort();
        rest
    }
}

/// Regular files directly inside `dir`, sorted by name.
pub fn backfill_paths(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) if e.file_type().is_file() => Some(e.into_path()),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry");
                None
            }
        })
        .collect()
}

async fn handle(pipeline: &IngestPipeline, path: &Path) {
    if let Err(e) = pipeline.process_file(path).await {
        warn!(path = %path.display(), error = %format!("{:#}", e), "ingestion failed, event dropped");
    }
}

/// Watch `dir` until Ctrl-C or until `shutdown` resolves.
///
/// With `backfill`, files already in the directory go through the pipeline
/// before any live event.
pub async fn run<F>(
    pipeline: Arc<IngestPipeline>,
    dir: &Path,
    backfill: bool,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create watch directory: {}", dir.display()))?;

    let (tx, mut rx) = mpsc::channel::<(PathBuf, Trigger)>(QUEUE_CAPACITY);

    let mut watcher = RecommendedWatcher::new(
        move |result: notify::Result<Event>| match result {
            Ok(event) => {
                let Some(trigger) = classify(&event.kind) else {
                    return;
                };
                for path in event.paths {
                    if tx.blocking_send((path, trigger)).is_err() {
                        return;
                    }
                }
            }
            Err(e) => warn!(error = %e, "watcher error"),
        },
        notify::Config::default(),
    )
    .context("Failed to create filesystem watcher")?;

    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("Failed to watch {}", dir.display()))?;

    let initial = if backfill {
        backfill_paths(dir)
    } else {
        Vec::new()
    };
    info!(dir = %dir.display(), backfill = initial.len(), "watcher started");

    let consumer = tokio::spawn(async move {
        for path in initial {
            handle(&pipeline, &path).await;
        }
        let mut pending = Pending::default();
        loop {
            let deadline = pending.next_deadline();
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some((path, Trigger::Ready)) => {
                        pending.forget(&path);
                        handle(&pipeline, &path).await;
                    }
                    Some((path, Trigger::Settle)) => pending.touch(path, Instant::now()),
                    None => break,
                },
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    for path in pending.take_due(Instant::now()) {
                        handle(&pipeline, &path).await;
                    }
                }
            }
        }
        for path in pending.drain() {
            handle(&pipeline, &path).await;
        }
    });

    tokio::select! {
        _ = shutdown => {}
        _ = tokio::signal::ctrl_c() => {}
    }

    // Dropping the watcher closes the queue; the consumer drains what is
    // already queued and exits.
    drop(watcher);
    if let Err(e) = consumer.await {
        warn!(error = %e, "ingestion task ended abnormally");
    }
    info!(dir = %dir.display(), "watcher stopped");
    Ok(())
}
