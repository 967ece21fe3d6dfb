//! Audit session
//!
//! Owns the registry store, filesystem probe and backup service, runs
//! scans on a background thread and publishes each result as an
//! immutable snapshot. Only one scan or mutation runs at a time; a second
//! request while one is active is rejected with [`SessionError::Busy`].

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

use crate::backup::BackupService;
use crate::error::SessionError;
use crate::model::{AppEntry, AppStatus};
use crate::remover::{DeletionOrchestrator, RemovalReceipt};
use crate::resolver::PathProbe;
use crate::scanner::{default_roots, ExclusionCounts, RegistryScanner, ScanFailure, ScanRoot};
use crate::store::RegistryStore;

/// Result of one completed scan, shared read-only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSnapshot {
    /// Increases by one with every completed scan
    pub generation: u64,
    pub entries: Vec<AppEntry>,
    pub failures: Vec<ScanFailure>,
    pub excluded: ExclusionCounts,
    pub duration: Duration,
    pub completed_at: DateTime<Local>,
}

/// Presentation filter over a snapshot
#[derive(Debug, Clone, Default)]
pub struct AppFilter {
    pub ghosts_only: bool,
    /// Case-insensitive substring of the display name
    pub search: Option<String>,
}

impl AppFilter {
    pub fn matches(&self, entry: &AppEntry) -> bool {
        if self.ghosts_only && !entry.is_ghost() {
            return false;
        }
        match self.search.as_deref().map(str::trim) {
            Some(needle) if !needle.is_empty() => entry
                .display_name()
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            _ => true,
        }
    }
}

impl ScanSnapshot {
    pub fn filter(&self, filter: &AppFilter) -> Vec<&AppEntry> {
        self.entries.iter().filter(|e| filter.matches(e)).collect()
    }

    pub fn count(&self, status: AppStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }

    /// Entries matching `query`.
    ///
    /// A full identity (`HKLM\SOFTWARE\...\Key`) matches at most one entry.
    /// Otherwise the query is compared against display names and key names,
    /// ignoring case, and every match is returned.
    pub fn lookup(&self, query: &str) -> Vec<&AppEntry> {
        let query = query.trim();
        if let Some(entry) = self
            .entries
            .iter()
            .find(|e| e.id().eq_ignore_ascii_case(query))
        {
            return vec![entry];
        }

        self.entries
            .iter()
            .filter(|e| {
                e.display_name().eq_ignore_ascii_case(query) || e.key_name.eq_ignore_ascii_case(query)
            })
            .collect()
    }
}

type ActivitySlot = Arc<Mutex<Option<&'static str>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds the session's single activity slot until dropped
struct ActivityGuard {
    slot: ActivitySlot,
}

impl ActivityGuard {
    fn claim(slot: &ActivitySlot, activity: &'static str) -> Result<Self, SessionError> {
        let mut current = lock(slot);
        if let Some(active) = *current {
            debug!(requested = activity, active, "session busy");
            return Err(SessionError::Busy(active));
        }
        *current = Some(activity);
        Ok(ActivityGuard { slot: slot.clone() })
    }
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        *lock(&self.slot) = None;
    }
}

/// Handle to a scan running on the background worker
pub struct ScanJob {
    receiver: mpsc::Receiver<Arc<ScanSnapshot>>,
    handle: Option<JoinHandle<()>>,
}

impl ScanJob {
    /// Blocks until the worker delivers its snapshot
    pub fn wait(mut self) -> Result<Arc<ScanSnapshot>, SessionError> {
        let result = self.receiver.recv().map_err(|_| SessionError::WorkerLost);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        result
    }

    /// Non-blocking poll; `None` while the scan is still running
    pub fn try_result(&self) -> Option<Result<Arc<ScanSnapshot>, SessionError>> {
        match self.receiver.try_recv() {
            Ok(snapshot) => Some(Ok(snapshot)),
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => Some(Err(SessionError::WorkerLost)),
        }
    }
}

/// Serializes scans and mutations over one registry
pub struct AuditSession<S, P, B> {
    store: Arc<S>,
    probe: Arc<P>,
    backup: Arc<B>,
    roots: Vec<ScanRoot>,
    activity: ActivitySlot,
    latest: Arc<Mutex<Option<Arc<ScanSnapshot>>>>,
    generation: Arc<AtomicU64>,
}

impl<S, P, B> AuditSession<S, P, B>
where
    S: RegistryStore + Send + Sync + 'static,
    P: PathProbe + Send + Sync + 'static,
    B: BackupService,
{
    pub fn new(store: Arc<S>, probe: P, backup: Arc<B>) -> Self {
        AuditSession {
            store,
            probe: Arc::new(probe),
            backup,
            roots: default_roots(),
            activity: Arc::new(Mutex::new(None)),
            latest: Arc::new(Mutex::new(None)),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Replace the roots scanned by subsequent scans
    #[must_use]
    pub fn with_roots(mut self, roots: Vec<ScanRoot>) -> Self {
        self.roots = roots;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Name of the running activity, if any
    pub fn active(&self) -> Option<&'static str> {
        *lock(&self.activity)
    }

    /// Most recently published snapshot
    pub fn snapshot(&self) -> Option<Arc<ScanSnapshot>> {
        lock(&self.latest).clone()
    }

    /// Starts a scan on a background thread
    pub fn start_scan(&self) -> Result<ScanJob, SessionError> {
        let guard = ActivityGuard::claim(&self.activity, "scan")?;

        let store = self.store.clone();
        let probe = self.probe.clone();
        let roots = self.roots.clone();
        let latest = self.latest.clone();
        let generation = self.generation.clone();
        let (tx, rx) = mpsc::channel();

        let handle = thread::spawn(move || {
            let report = RegistryScanner::new(store.as_ref(), probe.as_ref())
                .with_roots(roots)
                .scan();

            let snapshot = Arc::new(ScanSnapshot {
                generation: generation.fetch_add(1, Ordering::SeqCst) + 1,
                entries: report.entries,
                failures: report.failures,
                excluded: report.excluded,
                duration: report.duration,
                completed_at: Local::now(),
            });
            *lock(&latest) = Some(snapshot.clone());
            info!(generation = snapshot.generation, entries = snapshot.entries.len(), "snapshot published");

            // Free the slot before delivering so the receiver can act at once
            drop(guard);
            let _ = tx.send(snapshot);
        });

        Ok(ScanJob {
            receiver: rx,
            handle: Some(handle),
        })
    }

    /// Runs a scan and waits for it
    pub fn scan_blocking(&self) -> Result<Arc<ScanSnapshot>, SessionError> {
        self.start_scan()?.wait()
    }

    /// Backs up and deletes one entry
    pub fn remove(&self, entry: &AppEntry) -> Result<RemovalReceipt, SessionError> {
        let _guard = ActivityGuard::claim(&self.activity, "removal")?;
        let receipt =
            DeletionOrchestrator::new(self.store.as_ref(), self.backup.as_ref()).remove(entry)?;
        Ok(receipt)
    }

    /// Imports a backup file
    pub fn restore(&self, file: &Path) -> Result<(), SessionError> {
        let _guard = ActivityGuard::claim(&self.activity, "restore")?;
        DeletionOrchestrator::new(self.store.as_ref(), self.backup.as_ref()).restore(file)?;
        Ok(())
    }
}
