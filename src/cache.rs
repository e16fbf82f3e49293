//! Single-flight result cache keyed by file identity.
//!
//! The change-event path and the transport path can ask for the same file at
//! the same time. The first request spawns the pipeline run; every other
//! request, concurrent or later, gets a clone of the same shared future or
//! its stored result. The run itself is a spawned task, so it completes even
//! if every waiter goes away.
//!
//! The table never keeps a source file alive: entries hold a weak handle
//! and are dropped once the source is gone and the run has finished.
//! Reconstructions produced here are remembered too, so a rebuilt file that
//! comes back through another path is recognised and not rebuilt again.

use crate::error::SanitizeError;
use crate::file::{FileId, UploadFile, WeakUploadFile};
use crate::pipeline::{Outcome, SanitizationResult};
use crate::sync::mutex_lock;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

type SharedResult = Shared<BoxFuture<'static, SanitizationResult>>;

/// A finished run, stored without a strong handle to its source.
#[derive(Clone)]
struct Stored {
    replacement: Option<UploadFile>,
    outcome: Outcome,
}

impl Stored {
    fn from_result(source: FileId, result: &SanitizationResult) -> Self {
        let replacement = (result.file.id() != source).then(|| result.file.clone());
        Self {
            replacement,
            outcome: result.outcome.clone(),
        }
    }

    fn result_for(&self, source: &UploadFile) -> SanitizationResult {
        let file = self.replacement.clone().unwrap_or_else(|| source.clone());
        SanitizationResult::passthrough(file, self.outcome.clone())
    }
}

enum Slot {
    InFlight(SharedResult),
    Ready(Stored),
}

struct Entry {
    source: WeakUploadFile,
    slot: Slot,
}

#[derive(Default)]
struct Table {
    entries: HashMap<FileId, Entry>,
    /// Files this cache produced, so they pass straight through.
    outputs: HashMap<FileId, WeakUploadFile>,
}

impl Table {
    fn purge(&mut self) {
        self.entries
            .retain(|_, e| e.source.is_alive() || matches!(e.slot, Slot::InFlight(_)));
        self.outputs.retain(|_, w| w.is_alive());
    }

    fn is_output(&self, file: &UploadFile) -> bool {
        self.outputs.contains_key(&file.id())
    }

    fn complete(&mut self, source: FileId, result: &SanitizationResult) {
        if let Some(entry) = self.entries.get_mut(&source) {
            entry.slot = Slot::Ready(Stored::from_result(source, result));
        }
        if result.is_sanitized() {
            self.outputs.insert(result.file.id(), result.file.downgrade());
        }
    }
}

/// Deduplicates pipeline runs per file.
#[derive(Clone)]
pub struct SingleFlight {
    table: Arc<Mutex<Table>>,
    log_errors: bool,
}

impl Default for SingleFlight {
    fn default() -> Self {
        Self::new(true)
    }
}

impl SingleFlight {
    pub fn new(log_errors: bool) -> Self {
        Self {
            table: Arc::new(Mutex::new(Table::default())),
            log_errors,
        }
    }

    /// Return the result for `file`, running `producer` only if no run for
    /// this file has started yet.
    ///
    /// A panicking producer resolves to the original file with
    /// [`Outcome::Failed`].
    pub async fn obtain<F, Fut>(&self, file: &UploadFile, producer: F) -> SanitizationResult
    where
        F: FnOnce(UploadFile) -> Fut + Send,
        Fut: Future<Output = SanitizationResult> + Send + 'static,
    {
        let shared = {
            let mut table = mutex_lock(&self.table, "single_flight.obtain");
            table.purge();

            if table.is_output(file) {
                log_gated!(self.log_errors, debug, "{} is already a sanitized output", file.id());
                return SanitizationResult::passthrough(file.clone(), Outcome::AlreadySanitized);
            }

            match table.entries.get(&file.id()) {
                Some(Entry {
                    slot: Slot::Ready(stored),
                    ..
                }) => {
                    log_gated!(self.log_errors, debug, "Reusing stored result for {}", file.id());
                    return stored.result_for(file);
                }
                Some(Entry {
                    slot: Slot::InFlight(shared),
                    ..
                }) => {
                    log_gated!(self.log_errors, debug, "Joining in-flight run for {}", file.id());
                    shared.clone()
                }
                None => {
                    let shared = self.start(file, producer);
                    table.entries.insert(
                        file.id(),
                        Entry {
                            source: file.downgrade(),
                            slot: Slot::InFlight(shared.clone()),
                        },
                    );
                    shared
                }
            }
        };
        shared.await
    }

    fn start<F, Fut>(&self, file: &UploadFile, producer: F) -> SharedResult
    where
        F: FnOnce(UploadFile) -> Fut,
        Fut: Future<Output = SanitizationResult> + Send + 'static,
    {
        let source = file.id();
        let original = file.downgrade();
        let table = Arc::clone(&self.table);
        let log_errors = self.log_errors;
        let handle = tokio::spawn(producer(file.clone()));

        async move {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    log_gated!(log_errors, error, "Sanitize task for {} failed: {}", source, e);
                    let outcome = Outcome::Failed(SanitizeError::Internal(e.to_string()));
                    match original.upgrade() {
                        Some(file) => SanitizationResult::passthrough(file, outcome),
                        // Nobody holds the source any more; the result is unobservable.
                        None => SanitizationResult::passthrough(
                            UploadFile::new("", "", Vec::<u8>::new()),
                            outcome,
                        ),
                    }
                }
            };
            mutex_lock(&table, "single_flight.complete").complete(source, &result);
            result
        }
        .boxed()
        .shared()
    }

    /// The stored result for `file`, if its run has finished.
    pub fn peek(&self, file: &UploadFile) -> Option<SanitizationResult> {
        let mut table = mutex_lock(&self.table, "single_flight.peek");
        table.purge();
        if table.is_output(file) {
            return Some(SanitizationResult::passthrough(
                file.clone(),
                Outcome::AlreadySanitized,
            ));
        }
        match table.entries.get(&file.id()) {
            Some(Entry {
                slot: Slot::Ready(stored),
                ..
            }) => Some(stored.result_for(file)),
            _ => None,
        }
    }

    /// Drop whatever is stored for `file`. An in-flight run still completes
    /// for its current waiters.
    pub fn forget(&self, file: &UploadFile) {
        mutex_lock(&self.table, "single_flight.forget")
            .entries
            .remove(&file.id());
    }

    /// Number of tracked source files.
    pub fn len(&self) -> usize {
        let mut table = mutex_lock(&self.table, "single_flight.len");
        table.purge();
        table.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
