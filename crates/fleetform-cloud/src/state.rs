//! State management for managed resources
//!
//! Tracks the last live attributes of every resource under management.
//! The file-backed store keeps `.fleetform/state.json` (plus a backup of the
//! previous revision) and a `lock.json` guarding plan/apply sessions.

use crate::error::{EngineError, Result};
use crate::provider::Attributes;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use fleetform_core::{ResourceAddress, ResourceFlags};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const STATE_VERSION: u32 = 1;
const STATE_DIR: &str = ".fleetform";
const STATE_FILE: &str = "state.json";
const STATE_BACKUP: &str = "state.json.backup";
const LOCK_FILE: &str = "lock.json";

/// Default age after which a held lock is reported as stale
pub const DEFAULT_LOCK_TIMEOUT_SECS: i64 = 3600;

/// Token reported for a lock file whose content cannot be parsed;
/// `force_unlock` accepts it to clear such a file
pub const UNREADABLE_LOCK_TOKEN: &str = "unreadable";

/// Everything the engine knows about managed resources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalState {
    /// State file format version
    pub version: u32,

    /// Bumped on every commit
    pub serial: u64,

    /// Last modified timestamp
    pub updated_at: DateTime<Utc>,

    /// Records indexed by `type.name`
    pub resources: BTreeMap<String, LiveRecord>,
}

impl Default for GlobalState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            serial: 0,
            updated_at: Utc::now(),
            resources: BTreeMap::new(),
        }
    }
}

impl GlobalState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, address: &ResourceAddress) -> Option<&LiveRecord> {
        self.resources.get(&address.key())
    }

    pub fn contains(&self, address: &ResourceAddress) -> bool {
        self.resources.contains_key(&address.key())
    }

    /// Add or update a record
    pub fn set(&mut self, record: LiveRecord) {
        self.resources.insert(record.address().key(), record);
        self.updated_at = Utc::now();
    }

    /// Remove a record
    pub fn remove(&mut self, address: &ResourceAddress) -> Option<LiveRecord> {
        let result = self.resources.remove(&address.key());
        if result.is_some() {
            self.updated_at = Utc::now();
        }
        result
    }

    pub fn records(&self) -> impl Iterator<Item = &LiveRecord> {
        self.resources.values()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    fn apply(&mut self, address: &ResourceAddress, commit: Commit) {
        match commit {
            Commit::Record(record) => self.set(*record),
            Commit::Tombstone => {
                self.remove(address);
            }
        }
        self.serial += 1;
    }
}

/// Last known live state of one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveRecord {
    /// Provider-assigned resource ID
    pub id: String,

    /// Resource type
    pub resource_type: String,

    /// Name within the configuration
    pub name: String,

    /// Attributes read back after the last successful operation
    pub attributes: Attributes,

    /// Incremented on every write of this record
    pub version: u64,

    #[serde(default)]
    pub flags: ResourceFlags,

    /// Resources this one depended on when it was last applied;
    /// used to order destroys once it leaves the configuration
    #[serde(default)]
    pub dependencies: Vec<ResourceAddress>,

    /// When the resource was created
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl LiveRecord {
    pub fn new(address: &ResourceAddress, id: impl Into<String>, attributes: Attributes) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            resource_type: address.resource_type.clone(),
            name: address.name.clone(),
            attributes,
            version: 1,
            flags: ResourceFlags::default(),
            dependencies: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn address(&self) -> ResourceAddress {
        ResourceAddress::new(&self.resource_type, &self.name)
    }

    pub fn with_flags(mut self, flags: ResourceFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<ResourceAddress>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Successor record after an in-place change
    pub fn next_version(&self, attributes: Attributes) -> Self {
        Self {
            attributes,
            version: self.version + 1,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    pub fn get_attribute<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.attributes
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// A change written by one plan step
#[derive(Debug, Clone)]
pub enum Commit {
    Record(Box<LiveRecord>),
    /// The resource no longer exists
    Tombstone,
}

/// Lock information persisted while a session is active
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockInfo {
    pub token: String,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
}

impl LockInfo {
    fn acquire() -> Self {
        Self {
            token: uuid::Uuid::new_v4().to_string(),
            holder: holder_identity(),
            acquired_at: Utc::now(),
        }
    }

    pub fn is_stale(&self, timeout: Duration) -> bool {
        Utc::now().signed_duration_since(self.acquired_at) >= timeout
    }

    fn held_error(&self, timeout: Duration) -> EngineError {
        EngineError::LockHeld {
            holder: self.holder.clone(),
            token: self.token.clone(),
            acquired_at: self.acquired_at,
            stale: self.is_stale(timeout),
        }
    }
}

fn holder_identity() -> String {
    let host = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("HOST"))
        .unwrap_or_else(|_| "unknown".to_string());
    format!("{}:{}", host, std::process::id())
}

/// Proof of an exclusive plan/apply session
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub lock: LockInfo,
    /// State serial when the session began
    pub base_serial: u64,
}

impl Session {
    pub fn token(&self) -> &str {
        &self.lock.token
    }
}

/// Durable storage for `LiveRecord`s.
///
/// Writes happen only inside a session, and every commit is durable once it
/// returns, so an interrupted apply leaves the state of every finished step.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self) -> Result<GlobalState>;

    /// Acquires the exclusive lock or fails with `EngineError::LockHeld`
    async fn begin_session(&self) -> Result<Session>;

    /// Persists one step's result; returns the new state serial
    async fn commit_step(
        &self,
        session: &Session,
        address: &ResourceAddress,
        commit: Commit,
    ) -> Result<u64>;

    async fn end_session(&self, session: Session) -> Result<()>;

    /// Current lock holder, if any
    async fn lock_info(&self) -> Result<Option<LockInfo>>;

    /// Removes a lock left behind by a crashed session
    async fn force_unlock(&self, token: &str) -> Result<()>;
}

/// State store backed by files under `<project>/.fleetform/`
pub struct FileStateStore {
    /// Project root directory
    project_root: PathBuf,

    lock_timeout: Duration,

    /// Serial expected by the active session in this process
    session: Mutex<Option<(String, u64)>>,
}

impl FileStateStore {
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            project_root: project_root.as_ref().to_path_buf(),
            lock_timeout: Duration::seconds(DEFAULT_LOCK_TIMEOUT_SECS),
            session: Mutex::new(None),
        }
    }

    pub fn with_lock_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.lock_timeout =
            Duration::from_std(timeout).unwrap_or(Duration::seconds(DEFAULT_LOCK_TIMEOUT_SECS));
        self
    }

    /// Get the state directory path
    fn state_dir(&self) -> PathBuf {
        self.project_root.join(STATE_DIR)
    }

    /// Get the state file path
    pub fn state_path(&self) -> PathBuf {
        self.state_dir().join(STATE_FILE)
    }

    /// Get the backup file path
    fn backup_path(&self) -> PathBuf {
        self.state_dir().join(STATE_BACKUP)
    }

    /// Get the lock file path
    pub fn lock_path(&self) -> PathBuf {
        self.state_dir().join(LOCK_FILE)
    }

    /// Ensure the state directory exists
    async fn ensure_state_dir(&self) -> Result<()> {
        let dir = self.state_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir).await?;
            tracing::debug!("Created state directory: {}", dir.display());
        }
        Ok(())
    }

    async fn read_lock(&self) -> Result<Option<LockInfo>> {
        let lock_path = self.lock_path();
        if !lock_path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&lock_path).await?;
        match serde_json::from_str(&content) {
            Ok(lock) => Ok(Some(lock)),
            // empty while its holder is still writing it, or left half written
            Err(e) => {
                tracing::warn!("Lock file {} is unreadable: {}", lock_path.display(), e);
                let acquired_at = fs::metadata(&lock_path)
                    .await
                    .and_then(|m| m.modified())
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                Ok(Some(LockInfo {
                    token: UNREADABLE_LOCK_TOKEN.to_string(),
                    holder: "unknown (unreadable lock file)".to_string(),
                    acquired_at,
                }))
            }
        }
    }

    async fn read_state(&self) -> Result<GlobalState> {
        let path = self.state_path();
        if !path.exists() {
            tracing::debug!("State file not found, returning empty state");
            return Ok(GlobalState::new());
        }

        let content = fs::read_to_string(&path).await?;
        let state: GlobalState = serde_json::from_str(&content)?;

        // Version check
        if state.version > STATE_VERSION {
            return Err(EngineError::StateError(format!(
                "State file version {} is newer than supported version {}",
                state.version, STATE_VERSION
            )));
        }

        tracing::debug!("Loaded state with {} resources", state.resources.len());
        Ok(state)
    }

    async fn write_state(&self, state: &GlobalState) -> Result<()> {
        self.ensure_state_dir().await?;

        let path = self.state_path();
        let backup = self.backup_path();
        let tmp = self.state_dir().join(format!("{}.tmp", STATE_FILE));

        let content = serde_json::to_string_pretty(state)?;
        fs::write(&tmp, content).await?;

        // Keep the previous revision around
        if path.exists() {
            fs::copy(&path, &backup).await?;
        }
        fs::rename(&tmp, &path).await?;

        tracing::debug!(
            "Saved state serial {} with {} resources",
            state.serial,
            state.resources.len()
        );
        Ok(())
    }

    /// Writes a whole state; used to seed or import state outside a session
    pub async fn save(&self, state: &GlobalState) -> Result<()> {
        if let Some(lock) = self.read_lock().await? {
            return Err(lock.held_error(self.lock_timeout));
        }
        self.write_state(state).await
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self) -> Result<GlobalState> {
        self.read_state().await
    }

    async fn begin_session(&self) -> Result<Session> {
        self.ensure_state_dir().await?;

        let lock = LockInfo::acquire();
        let content = serde_json::to_string_pretty(&lock)?;

        // create_new makes acquisition atomic across processes
        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.lock_path())
            .await;
        let mut file = match file {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let existing = self.read_lock().await?.ok_or_else(|| {
                    EngineError::StateError("lock file disappeared while reading it".to_string())
                })?;
                if existing.is_stale(self.lock_timeout) {
                    tracing::warn!(
                        "State lock held by {} since {} is older than the timeout",
                        existing.holder,
                        existing.acquired_at
                    );
                }
                return Err(existing.held_error(self.lock_timeout));
            }
            Err(e) => return Err(e.into()),
        };
        let written = async {
            file.write_all(content.as_bytes()).await?;
            file.flush().await
        }
        .await;
        if let Err(e) = written {
            drop(file);
            if let Err(cleanup) = fs::remove_file(self.lock_path()).await {
                tracing::warn!(
                    "Could not remove partially written lock {}: {}",
                    self.lock_path().display(),
                    cleanup
                );
            }
            return Err(e.into());
        }

        let base_serial = self.read_state().await?.serial;
        *self.session.lock().await = Some((lock.token.clone(), base_serial));

        tracing::debug!("Acquired state lock {}", lock.token);
        Ok(Session { lock, base_serial })
    }

    async fn commit_step(
        &self,
        session: &Session,
        address: &ResourceAddress,
        commit: Commit,
    ) -> Result<u64> {
        let mut active = self.session.lock().await;
        let expected = match active.as_ref() {
            Some((token, serial)) if token == session.token() => *serial,
            _ => return Err(EngineError::LockMismatch(session.token().to_string())),
        };

        match self.read_lock().await? {
            Some(lock) if lock.token == session.token() => {}
            _ => {
                return Err(EngineError::LockMismatch(format!(
                    "session {} no longer holds {}",
                    session.token(),
                    self.lock_path().display()
                )));
            }
        }

        let mut state = self.read_state().await?;
        if state.serial != expected {
            return Err(EngineError::StateConflict {
                expected,
                found: state.serial,
            });
        }

        state.apply(address, commit);
        self.write_state(&state).await?;
        *active = Some((session.token().to_string(), state.serial));
        Ok(state.serial)
    }

    async fn end_session(&self, session: Session) -> Result<()> {
        let mut active = self.session.lock().await;
        match self.read_lock().await? {
            Some(lock) if lock.token == session.token() => {
                fs::remove_file(self.lock_path()).await?;
                tracing::debug!("Released state lock {}", lock.token);
            }
            Some(lock) => {
                return Err(EngineError::LockMismatch(format!(
                    "lock is now held by {} ({})",
                    lock.holder, lock.token
                )));
            }
            None => {}
        }
        *active = None;
        Ok(())
    }

    async fn lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock().await
    }

    async fn force_unlock(&self, token: &str) -> Result<()> {
        match self.read_lock().await? {
            Some(lock) if lock.token == token => {
                tracing::warn!("Force-unlocking state held by {}", lock.holder);
                fs::remove_file(self.lock_path()).await?;
                Ok(())
            }
            Some(lock) => Err(EngineError::LockMismatch(format!(
                "lock is held with token {}, not {}",
                lock.token, token
            ))),
            None => Err(EngineError::LockMismatch("state is not locked".to_string())),
        }
    }
}

/// In-memory state store for tests and embedding
#[derive(Default)]
pub struct MemoryStateStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    state: GlobalState,
    lock: Option<LockInfo>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: GlobalState) -> Self {
        Self {
            inner: Mutex::new(MemoryInner { state, lock: None }),
        }
    }

    /// Copy of the current state
    pub async fn snapshot(&self) -> GlobalState {
        self.inner.lock().await.state.clone()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<GlobalState> {
        Ok(self.inner.lock().await.state.clone())
    }

    async fn begin_session(&self) -> Result<Session> {
        let mut inner = self.inner.lock().await;
        if let Some(lock) = &inner.lock {
            return Err(lock.held_error(Duration::seconds(DEFAULT_LOCK_TIMEOUT_SECS)));
        }
        let lock = LockInfo::acquire();
        inner.lock = Some(lock.clone());
        Ok(Session {
            lock,
            base_serial: inner.state.serial,
        })
    }

    async fn commit_step(
        &self,
        session: &Session,
        address: &ResourceAddress,
        commit: Commit,
    ) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        match &inner.lock {
            Some(lock) if lock.token == session.token() => {}
            _ => return Err(EngineError::LockMismatch(session.token().to_string())),
        }
        inner.state.apply(address, commit);
        Ok(inner.state.serial)
    }

    async fn end_session(&self, session: Session) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match &inner.lock {
            Some(lock) if lock.token == session.token() => {
                inner.lock = None;
                Ok(())
            }
            Some(lock) => Err(EngineError::LockMismatch(lock.token.clone())),
            None => Ok(()),
        }
    }

    async fn lock_info(&self) -> Result<Option<LockInfo>> {
        Ok(self.inner.lock().await.lock.clone())
    }

    async fn force_unlock(&self, token: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match &inner.lock {
            Some(lock) if lock.token == token => {
                inner.lock = None;
                Ok(())
            }
            _ => Err(EngineError::LockMismatch(token.to_string())),
        }
    }
}
