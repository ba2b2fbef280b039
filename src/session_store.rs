//! Filesystem-backed, session-scoped storage for uploaded documents.
//!
//! Each session owns `<root>/<token>/`. Writers (`add_files`,
//! `clear_session`) hold the session's lock exclusively; readers
//! (`list_session_files`, [`SessionStore::with_shared`]) hold it shared, so a
//! search never walks a directory that is being cleared.

use std::{
    collections::HashMap,
    io::Read,
    path::{Path, PathBuf},
    sync::{
        Arc,
        Mutex,
        PoisonError,
        RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, SystemTime},
};

use tracing::{debug, info, warn};

use crate::{
    error::{Error, Result},
    session_id::SessionId,
    walker,
};

/// Marker embedded in the names of directories being cleared.
const TRASH_MARKER: &str = ".trash-";

/// A file handed to [`SessionStore::add_files`].
#[derive(Debug)]
pub struct Upload<R> {
    /// Name as supplied by the client. Only the base name is kept.
    pub name: String,
    pub content: R,
}

impl<R: Read> Upload<R> {
    pub fn new(name: impl Into<String>, content: R) -> Self {
        Self {
            name: name.into(),
            content,
        }
    }
}

struct SessionEntry {
    lock: RwLock<()>,
    last_access: Mutex<SystemTime>,
    generation: AtomicU64,
}

impl SessionEntry {
    fn new() -> Self {
        Self::with_last_access(SystemTime::now())
    }

    fn with_last_access(at: SystemTime) -> Self {
        Self {
            lock: RwLock::new(()),
            last_access: Mutex::new(at),
            generation: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        *self.last_access.lock().unwrap_or_else(PoisonError::into_inner) =
            SystemTime::now();
    }

    fn last_access(&self) -> SystemTime {
        *self.last_access.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct SessionStore {
    root: PathBuf,
    sessions: Mutex<HashMap<SessionId, Arc<SessionEntry>>>,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory owned by a session. Does not create it.
    pub fn session_dir(&self, id: &SessionId) -> PathBuf {
        self.root.join(id.as_str())
    }

    fn entry(&self, id: &SessionId) -> Arc<SessionEntry> {
        let mut sessions =
            self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = sessions
            .entry(id.clone())
            .or_insert_with(|| Arc::new(SessionEntry::new()))
            .clone();
        entry.touch();
        entry
    }

    /// Return the session's directory, creating it and any parent first.
    pub fn get_or_create_session_dir(&self, id: &SessionId) -> Result<PathBuf> {
        self.entry(id);
        self.ensure_dir(id)
    }

    fn ensure_dir(&self, id: &SessionId) -> Result<PathBuf> {
        let dir = self.session_dir(id);
        std::fs::create_dir_all(&dir).map_err(|e| Error::storage(&dir, e))?;
        Ok(dir)
    }

    /// Write every upload into the session directory, replacing files with
    /// the same name. All names are validated before anything is written.
    pub fn add_files<R: Read>(
        &self,
        id: &SessionId,
        files: Vec<Upload<R>>,
    ) -> Result<usize> {
        let names = files
            .iter()
            .map(|f| sanitize_file_name(&f.name))
            .collect::<Result<Vec<_>>>()?;

        let entry = self.entry(id);
        let _guard = entry.lock.write().unwrap_or_else(PoisonError::into_inner);
        let dir = self.ensure_dir(id)?;

        let mut written = 0;
        for (name, mut upload) in names.into_iter().zip(files) {
            let dest = dir.join(&name);
            let mut out = std::fs::File::create(&dest)
                .map_err(|e| Error::storage(&dest, e))?;
            let bytes = std::io::copy(&mut upload.content, &mut out)
                .map_err(|e| Error::storage(&dest, e))?;
            debug!(session = id.short(), file = %name, bytes, "stored upload");
            written += 1;
        }

        entry.generation.fetch_add(1, Ordering::SeqCst);
        info!(session = id.short(), count = written, "added files");
        Ok(written)
    }

    /// Remove every file of a session and leave an empty directory behind.
    ///
    /// The directory is first renamed out of the way and an empty one is
    /// created in its place, so the session is empty as soon as this
    /// returns, even when deleting the old contents fails part way.
    pub fn clear_session(&self, id: &SessionId) -> Result<()> {
        let entry = self.entry(id);
        let _guard = entry.lock.write().unwrap_or_else(PoisonError::into_inner);
        let dir = self.session_dir(id);

        if !dir.exists() {
            std::fs::create_dir_all(&dir)
                .map_err(|e| Error::storage(&dir, e))?;
            return Ok(());
        }

        let trash = self.root.join(format!(
            ".{id}{TRASH_MARKER}{:08x}",
            rand::random::<u32>()
        ));
        std::fs::rename(&dir, &trash).map_err(|e| Error::storage(&dir, e))?;

        if let Err(e) = std::fs::create_dir_all(&dir) {
            // Put the old contents back rather than leave no directory.
            let _ = std::fs::rename(&trash, &dir);
            return Err(Error::storage(&dir, e));
        }
        entry.generation.fetch_add(1, Ordering::SeqCst);

        remove_trash(&trash)?;

        info!(session = id.short(), "cleared session");
        Ok(())
    }

    /// Every regular file currently stored for the session.
    pub fn list_session_files(&self, id: &SessionId) -> Result<Vec<PathBuf>> {
        self.with_shared(id, |dir| {
            Ok(walker::discover_files(dir)?
                .into_iter()
                .map(|f| f.absolute_path)
                .collect())
        })
    }

    /// Run `f` on the session directory while holding the session's lock in
    /// shared mode.
    pub fn with_shared<T>(
        &self,
        id: &SessionId,
        f: impl FnOnce(&Path) -> Result<T>,
    ) -> Result<T> {
        let entry = self.entry(id);
        let _guard = entry.lock.read().unwrap_or_else(PoisonError::into_inner);
        let dir = self.ensure_dir(id)?;
        f(&dir)
    }

    /// Counter bumped by every write to the session.
    pub fn generation(&self, id: &SessionId) -> u64 {
        self.entry(id).generation.load(Ordering::SeqCst)
    }

    /// Ids of every session directory under the root.
    pub fn sessions(&self) -> Result<Vec<SessionId>> {
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.root)
            .map_err(|e| Error::storage(&self.root, e))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<SessionId>().ok())
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// When the session was last used by this process, or its directory's
    /// modification time for sessions left over from an earlier run.
    pub fn last_access(&self, id: &SessionId) -> Option<SystemTime> {
        let sessions =
            self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = sessions.get(id) {
            return Some(entry.last_access());
        }
        drop(sessions);

        std::fs::metadata(self.session_dir(id))
            .and_then(|m| m.modified())
            .ok()
    }

    /// Delete sessions that have not been used for `max_idle`, along with
    /// any trash left behind by interrupted clears.
    ///
    /// Failures are logged and skipped so one stuck directory does not
    /// block the sweep.
    pub fn evict_idle(&self, max_idle: Duration) -> Result<Vec<SessionId>> {
        let mut evicted = Vec::new();

        for id in self.sessions()? {
            let Some(last) = self.last_access(&id) else {
                continue;
            };
            if idle_since(last) < max_idle {
                continue;
            }

            let entry = self
                .sessions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(id.clone())
                .or_insert_with(|| Arc::new(SessionEntry::with_last_access(last)))
                .clone();
            let guard =
                entry.lock.write().unwrap_or_else(PoisonError::into_inner);

            // Used while we waited for the lock.
            let idle = idle_since(entry.last_access());
            if idle < max_idle {
                debug!(session = id.short(), "session became active, kept");
                continue;
            }

            let dir = self.session_dir(&id);
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => {
                    let mut sessions = self
                        .sessions
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                    // Holders of the entry keep sharing its lock; the
                    // directory is recreated on their next write.
                    if Arc::strong_count(&entry) == 2 {
                        sessions.remove(&id);
                    }
                    drop(sessions);
                    info!(session = id.short(), idle_secs = idle.as_secs(), "evicted idle session");
                    evicted.push(id);
                }
                Err(e) => {
                    warn!(session = id.short(), error = %e, "failed to evict session");
                }
            }
            drop(guard);
        }

        self.remove_stale_trash();
        Ok(evicted)
    }

    fn remove_stale_trash(&self) {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            if name.to_string_lossy().contains(TRASH_MARKER)
                && let Err(e) = std::fs::remove_dir_all(entry.path())
            {
                warn!(path = %entry.path().display(), error = %e, "failed to remove trash");
            }
        }
    }
}

fn idle_since(at: SystemTime) -> Duration {
    SystemTime::now().duration_since(at).unwrap_or_default()
}

/// Delete a cleared directory. A sweep may already have removed it.
fn remove_trash(trash: &Path) -> Result<()> {
    match std::fs::remove_dir_all(trash) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::storage(trash, e)),
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

/// Reduce a client-supplied file name to a safe base name.
///
/// Anything before the last `/` or `\` is dropped. Names that are empty,
/// hidden, `.`/`..`, or contain control characters are rejected.
pub fn sanitize_file_name(name: &str) -> Result<String> {
    let base = name.rsplit(|c| c == '/' || c == '\\').next().unwrap_or("");

    if base.is_empty()
        || base.starts_with('.')
        || base.chars().any(char::is_control)
    {
        return Err(Error::InvalidFileName(name.to_string()));
    }

    Ok(base.to_string())
}
