//! Per-(session, uid) filesystem workers.
//!
//! A worker owns one [`AdvancedLinkFs`] instance together with the state
//! that only makes sense next to it: the open-file table, the directory
//! enumeration cursors handed out to READDIR, the attribute cache, and a
//! random `session_verifier` that doubles as the WRITE verifier and as an
//! ingredient of the `change` attribute, so that stateids and cookies stop
//! validating when the worker is reincarnated.
//!
//! Acquisition is counted: the compound runtime takes a [`WorkerGuard`]
//! per operation and the guard releases on drop. A worker marked discarded
//! refuses new acquisitions; once the count reaches zero its cleanup runs,
//! closing every lister, every open file (dropping the owning client's
//! busy count) and finally the filesystem. Discard happens on fatal backend
//! errors, on credential changes for the same key, after five idle minutes,
//! and on server shutdown.

use std::collections::{HashMap, HashSet};
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tracing::{error, warn};

use crate::auth::Creds;
use crate::clients::{rand_u64, Clients};
use crate::clock;
use crate::vfs::{AdvancedLinkFs, FileIo, FileInfo, ListerAt};

/// How long a cached attribute entry stays valid.
pub const CACHE_TIMEOUT: Duration = Duration::from_secs(30);

/// Cadence of the lister sweep and the idle check.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

/// Workers unused for this long are discarded.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Listers not consulted for this long are closed by the sweep.
pub const LISTER_EXPIRATION: Duration = Duration::from_secs(60);

/// Cookie verifier announcing a finished enumeration.
pub const EOF_LISTER: u64 = u64::MAX;

/// An entry in the open-file table.
#[derive(Clone)]
pub struct File {
    pub file: Arc<dyn FileIo>,
    /// The filehandle OPEN resolved; READ/WRITE require the current
    /// filehandle to match it.
    pub handle: Vec<u8>,
    pub client_id: u64,
    /// The OPEN sequence id the client used; replayed OPENs are recognised
    /// by it.
    pub client_seq_id: u32,
}

struct Lister {
    lister: Arc<dyn ListerAt>,
    last_seen: SystemTime,
}

struct Tables {
    listers: HashMap<u64, Lister>,
    files: HashMap<u64, File>,
    closed_files: HashSet<u64>,
    in_use: u64,
    discarded: bool,
    last_use: SystemTime,
}

/// The per-(session, uid) adapter around one filesystem instance.
pub struct Worker {
    fs: Box<dyn AdvancedLinkFs>,
    pub cache: Cache,
    pub creds: Creds,
    pub session_verifier: u64,
    clients: Arc<Clients>,
    tables: Mutex<Tables>,
}

impl Worker {
    /// Wraps a filesystem instance and starts the background sweeps. The
    /// new worker is already acquired once on behalf of the caller.
    pub fn new(
        fs: Box<dyn AdvancedLinkFs>,
        creds: Creds,
        clients: Arc<Clients>,
        shutdown: watch::Receiver<bool>,
    ) -> Arc<Worker> {
        let worker = Arc::new(Worker {
            fs,
            cache: Cache::new(CACHE_TIMEOUT),
            creds,
            session_verifier: rand_u64(),
            clients,
            tables: Mutex::new(Tables {
                listers: HashMap::new(),
                files: HashMap::new(),
                closed_files: HashSet::new(),
                in_use: 1,
                discarded: false,
                last_use: clock::now(),
            }),
        });

        worker.spawn_auto_discard(shutdown);
        worker.spawn_lister_sweep();

        worker
    }

    /// The filesystem behind this worker.
    pub fn fs(&self) -> &dyn AdvancedLinkFs {
        &*self.fs
    }

    /// Acquires the worker for one more caller; refused once discarded.
    pub fn try_use(self: &Arc<Self>) -> Option<WorkerGuard> {
        let mut tables = self.lock();

        if tables.discarded {
            return None;
        }

        tables.in_use += 1;
        tables.last_use = clock::now();

        Some(WorkerGuard { worker: Arc::clone(self) })
    }

    /// Wraps the initial acquisition made by [`Worker::new`].
    pub fn initial_guard(self: &Arc<Self>) -> WorkerGuard {
        WorkerGuard { worker: Arc::clone(self) }
    }

    /// Marks the worker dead. New acquisitions fail immediately; cleanup
    /// runs as soon as the acquisition count reaches zero.
    pub fn discard(self: &Arc<Self>) {
        let mut tables = self.lock();

        if tables.discarded {
            return;
        }

        tables.discarded = true;

        if tables.in_use == 0 {
            self.spawn_cleanup();
        }
    }

    fn release(self: &Arc<Self>) {
        let mut tables = self.lock();

        tables.in_use = tables.in_use.saturating_sub(1);

        if tables.discarded && tables.in_use == 0 {
            self.spawn_cleanup();
        }
    }

    /// Registers an open file under a fresh random id and bumps the owning
    /// client's busy count.
    pub fn add_file(&self, file: File) -> u64 {
        let client_id = file.client_id;

        let index = {
            let mut tables = self.lock();
            let mut index = rand_u64();
            while tables.files.contains_key(&index) {
                index = rand_u64();
            }
            tables.files.insert(index, file);
            index
        };

        self.clients.add_busy(client_id, 1);

        index
    }

    pub fn get_file(&self, index: u64) -> Option<File> {
        self.lock().files.get(&index).cloned()
    }

    /// Finds an already-open file for (client, OPEN seq-id): the OPEN
    /// replay path.
    pub fn get_file_by_client_seq_id(&self, client_id: u64, client_seq_id: u32) -> Option<u64> {
        self.lock()
            .files
            .iter()
            .find(|(_, f)| f.client_id == client_id && f.client_seq_id == client_seq_id)
            .map(|(index, _)| *index)
    }

    /// Removes a file from the table, remembering its id so a replayed
    /// CLOSE still succeeds. Drops the client's busy count.
    pub fn remove_file(&self, index: u64) -> Option<File> {
        let file = {
            let mut tables = self.lock();
            let file = tables.files.remove(&index)?;
            tables.closed_files.insert(index);
            file
        };

        self.clients.done(file.client_id);

        Some(file)
    }

    pub fn is_removed_file(&self, index: u64) -> bool {
        self.lock().closed_files.contains(&index)
    }

    /// Registers a directory enumeration and returns its cookie verifier.
    pub fn add_lister(&self, lister: Arc<dyn ListerAt>) -> u64 {
        let mut tables = self.lock();

        let mut index = rand_u64();
        while index == EOF_LISTER || tables.listers.contains_key(&index) {
            index = rand_u64();
        }

        tables.listers.insert(index, Lister { lister, last_seen: clock::now() });

        index
    }

    pub fn get_lister(&self, index: u64) -> Option<Arc<dyn ListerAt>> {
        let mut tables = self.lock();

        let lister = tables.listers.get_mut(&index)?;
        lister.last_seen = clock::now();

        Some(Arc::clone(&lister.lister))
    }

    /// Drops a lister from the table and closes it.
    pub async fn close_lister(&self, index: u64) -> Result<(), crate::vfs::FsError> {
        let lister = self.lock().listers.remove(&index);

        match lister {
            Some(l) => l.lister.close().await,
            None => Ok(()),
        }
    }

    async fn cleanup(&self) {
        let (listers, files) = {
            let mut tables = self.lock();
            let listers: Vec<_> = tables.listers.drain().map(|(_, l)| l.lister).collect();
            let files: Vec<_> = tables.files.drain().map(|(_, f)| f).collect();
            tables.closed_files.clear();
            (listers, files)
        };

        for lister in listers {
            if let Err(err) = lister.close().await {
                error!("failed to close lister: {err}");
            }
        }

        for file in files {
            if let Err(err) = file.file.close().await {
                error!("failed to close file: {err}");
            }
            self.clients.done(file.client_id);
        }

        if let Err(err) = self.fs.close().await {
            error!("failed to close worker filesystem: {err}");
        }
    }

    fn spawn_cleanup(self: &Arc<Self>) {
        let worker = Arc::clone(self);
        tokio::spawn(async move { worker.cleanup().await });
    }

    /// Discards the worker after [`IDLE_TIMEOUT`] without acquisitions, or
    /// immediately on shutdown.
    fn spawn_auto_discard(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let worker = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                let must_discard = tokio::select! {
                    _ = ticker.tick() => false,
                    _ = shutdown.changed() => true,
                };

                {
                    let mut tables = worker.lock();

                    if tables.discarded {
                        return;
                    }

                    if clock::since(tables.last_use) <= IDLE_TIMEOUT && !must_discard {
                        continue;
                    }

                    tables.discarded = true;

                    if tables.in_use > 0 {
                        return;
                    }
                }

                worker.spawn_cleanup();
                return;
            }
        });
    }

    /// Closes listers that have not been consulted within
    /// [`LISTER_EXPIRATION`], and expires stale attribute-cache entries.
    fn spawn_lister_sweep(self: &Arc<Self>) {
        let worker = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let expired: Vec<Arc<dyn ListerAt>> = {
                    let mut tables = worker.lock();

                    if tables.discarded {
                        return;
                    }

                    let stale: Vec<u64> = tables
                        .listers
                        .iter()
                        .filter(|(_, l)| clock::since(l.last_seen) > LISTER_EXPIRATION)
                        .map(|(index, _)| *index)
                        .collect();

                    stale
                        .into_iter()
                        .filter_map(|index| tables.listers.remove(&index))
                        .map(|l| l.lister)
                        .collect()
                };

                for lister in expired {
                    if let Err(err) = lister.close().await {
                        error!("failed to close lister: {err}");
                    }
                }

                worker.cache.expire();
            }
        });
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        match self.tables.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("worker table mutex poisoned");
                poisoned.into_inner()
            }
        }
    }
}

/// Supplies acquired workers to the compound runtime: one worker per
/// (session id, uid), created on demand and replaced when credentials
/// change or the previous instance was discarded.
#[async_trait::async_trait]
pub trait WorkerSource: Send + Sync {
    /// Returns an acquired worker for the caller. Never fails: a backend
    /// that cannot be loaded is replaced by one that reports the load
    /// error on every operation.
    async fn acquire(&self, creds: &Creds, session_id: [u8; 16]) -> WorkerGuard;
}

/// Counted acquisition of a worker; releases on drop.
pub struct WorkerGuard {
    worker: Arc<Worker>,
}

impl Deref for WorkerGuard {
    type Target = Worker;

    fn deref(&self) -> &Worker {
        &self.worker
    }
}

impl WorkerGuard {
    /// The shared worker behind this acquisition.
    pub fn shared(&self) -> &Arc<Worker> {
        &self.worker
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        Worker::release(&self.worker);
    }
}

/// A cached (path, file-info) pair.
#[derive(Clone)]
pub struct Entry {
    pub path: String,
    pub info: FileInfo,
}

struct SavedEntry {
    at: SystemTime,
    entry: Entry,
}

/// Attribute cache keyed by filehandle bytes. Entries answer GETATTR,
/// ACCESS, VERIFY and friends for up to [`CACHE_TIMEOUT`]; every mutating
/// operation invalidates the entry for the handle it touched.
pub struct Cache {
    timeout: Duration,
    entries: Mutex<HashMap<Vec<u8>, SavedEntry>>,
}

impl Cache {
    pub fn new(timeout: Duration) -> Self {
        Cache { timeout, entries: Mutex::new(HashMap::new()) }
    }

    pub fn get(&self, handle: &[u8]) -> Option<Entry> {
        let entries = self.lock();
        let saved = entries.get(handle)?;

        if clock::since(saved.at) > self.timeout {
            return None;
        }

        Some(saved.entry.clone())
    }

    pub fn put(&self, handle: &[u8], entry: Entry) {
        self.lock()
            .insert(handle.to_vec(), SavedEntry { at: clock::now(), entry });
    }

    pub fn invalidate(&self, handle: &[u8]) {
        self.lock().remove(handle);
    }

    /// Drops entries past their timeout.
    pub fn expire(&self) {
        let timeout = self.timeout;
        self.lock().retain(|_, saved| clock::since(saved.at) <= timeout);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Vec<u8>, SavedEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
