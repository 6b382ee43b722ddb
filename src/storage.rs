use crate::error::StorageError;
use crate::protocol::CourseGuide;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

pub const COURSE_KEY: &str = "aceai_course";
pub const SESSION_KEY: &str = "aceai_session";

pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

#[cfg(test)]
impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// One `<key>.json` file per key, replaced by write-then-rename.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        match std::fs::read_to_string(self.path(key)) {
            Ok(value) => Some(value),
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(key, error = %err, "failed to read stored value");
                }
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        std::fs::create_dir_all(&self.dir)?;
        let target = self.path(key);
        let staging = self.dir.join(format!(".{}.{}.tmp", key, Uuid::new_v4()));
        std::fs::write(&staging, value)?;
        std::fs::rename(&staging, &target)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    pub key: String,
    pub origin: Uuid,
}

pub type ChangeListener = Arc<dyn Fn(&StorageChange) + Send + Sync>;

pub trait ChangeSignal: Send + Sync {
    fn publish(&self, change: StorageChange);
    fn listen(&self, listener: ChangeListener) -> u64;
    fn unlisten(&self, id: u64);
}

/// Each listener runs on its own task, so `listen` needs a runtime; without
/// one the listener is not registered.
pub struct BroadcastSignal {
    events: broadcast::Sender<StorageChange>,
    tasks: Mutex<HashMap<u64, JoinHandle<()>>>,
    next_id: Mutex<u64>,
}

impl BroadcastSignal {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            events,
            tasks: Mutex::new(HashMap::new()),
            next_id: Mutex::new(0),
        }
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<u64, JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn allocate_id(&self) -> u64 {
        let mut next = self.next_id.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *next += 1;
        *next
    }
}

impl Default for BroadcastSignal {
    fn default() -> Self {
        Self::new(64)
    }
}

impl ChangeSignal for BroadcastSignal {
    fn publish(&self, change: StorageChange) {
        // No receivers is not an error.
        let _ = self.events.send(change);
    }

    fn listen(&self, listener: ChangeListener) -> u64 {
        let id = self.allocate_id();
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("no async runtime; cross-context changes will not be observed");
                return id;
            }
        };

        let mut receiver = self.events.subscribe();
        let task = handle.spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(change) => listener(&change),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "change listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.tasks().insert(id, task);
        id
    }

    fn unlisten(&self, id: u64) {
        if let Some(task) = self.tasks().remove(&id) {
            task.abort();
        }
    }
}

impl Drop for BroadcastSignal {
    fn drop(&mut self) {
        for (_, task) in self.tasks().drain() {
            task.abort();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockInterviewSession {
    pub job_title: String,
    pub questions: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredSession {
    #[serde(default)]
    job_title: String,
    questions: Option<Vec<String>>,
    mock_interview_questions: Option<Vec<String>>,
}

pub fn save_course(storage: &dyn Storage, course: &CourseGuide) -> Result<(), StorageError> {
    let value = serde_json::to_string(course)?;
    storage.set(COURSE_KEY, &value)
}

pub fn load_course(storage: &dyn Storage) -> Option<CourseGuide> {
    let raw = storage.get(COURSE_KEY)?;
    match serde_json::from_str(&raw) {
        Ok(course) => Some(course),
        Err(err) => {
            debug!(error = %err, "stored course is unreadable");
            None
        }
    }
}

pub fn save_session(
    storage: &dyn Storage,
    session: &MockInterviewSession,
) -> Result<(), StorageError> {
    let value = serde_json::to_string(session)?;
    storage.set(SESSION_KEY, &value)
}

/// Prefers the dedicated session key, falling back to the stored course.
pub fn load_session(storage: &dyn Storage) -> Option<MockInterviewSession> {
    let raw = storage
        .get(SESSION_KEY)
        .or_else(|| storage.get(COURSE_KEY))?;
    let parsed: StoredSession = match serde_json::from_str(&raw) {
        Ok(parsed) => parsed,
        Err(err) => {
            debug!(error = %err, "stored session is unreadable");
            return None;
        }
    };

    let questions = parsed
        .questions
        .or(parsed.mock_interview_questions)
        .unwrap_or_default();
    Some(MockInterviewSession {
        job_title: parsed.job_title,
        questions,
    })
}
