//! Per-user conversation state.
//!
//! A [`Session`] owns everything that changes while a user talks to the bot:
//! the active topic, the variable store, the last reply (for `%` rules), the
//! last captures and the RNG used for weighted choices. The compiled corpus
//! is never mutated; any number of sessions can share one through an `Arc`.
//!
//! [`SessionRegistry`] keys sessions by id and serializes `respond` calls per
//! session. Calls for different ids run in parallel.
//!
//! ```text
//! registry.respond("alice", ..) ──▶ sessions["alice"] (Mutex) ──▶ respond_with
//! registry.respond("bob", ..)   ──▶ sessions["bob"]   (Mutex) ──▶ respond_with
//! ```

use crate::api::{DefaultFallback, Fallback, Options, respond_with};
use crate::engine::CompiledCorpus;
use crate::error::{EngineError, StoreError};
use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

/// Value read for an unset variable or a missing capture.
pub const UNDEFINED: &str = "undefined";

/// Storage for user variables (`<set>`, `<get>`, math tags).
///
/// Both operations are synchronous and fallible; a failure aborts the
/// current `respond` call with [`EngineError::Store`].
pub trait VariableStore: Send {
    fn get(&self, name: &str) -> Result<Option<String>, StoreError>;

    /// `None` deletes the variable.
    fn set(&mut self, name: &str, value: Option<&str>) -> Result<(), StoreError>;

    /// Every variable, for inspection. Backends that cannot enumerate return
    /// an empty list.
    fn entries(&self) -> Result<Vec<(String, String)>, StoreError> {
        Ok(Vec::new())
    }
}

/// In-memory [`VariableStore`].
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    vars: BTreeMap<String, String>,
}

impl VariableStore for MemoryStore {
    fn get(&self, name: &str) -> Result<Option<String>, StoreError> {
        Ok(self.vars.get(name).cloned())
    }

    fn set(&mut self, name: &str, value: Option<&str>) -> Result<(), StoreError> {
        match value {
            Some(value) => {
                self.vars.insert(name.to_string(), value.to_string());
            }
            None => {
                self.vars.remove(name);
            }
        }
        Ok(())
    }

    fn entries(&self) -> Result<Vec<(String, String)>, StoreError> {
        Ok(self.vars.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

/// One user's conversation state.
pub struct Session {
    pub(crate) id: String,
    pub(crate) topic: String,
    pub(crate) store: Box<dyn VariableStore>,
    pub(crate) stars: Vec<String>,
    pub(crate) last_reply: Option<String>,
    pub(crate) rng: StdRng,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) last_active: DateTime<Utc>,
}

impl Session {
    /// A fresh session with an in-memory store.
    pub fn new(id: impl Into<String>, options: &Options) -> Self {
        Self::with_store(id, options, Box::new(MemoryStore::default()))
    }

    /// A fresh session backed by `store`.
    pub fn with_store(id: impl Into<String>, options: &Options, store: Box<dyn VariableStore>) -> Self {
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let now = Utc::now();
        Session {
            id: id.into(),
            topic: options.initial_topic.clone(),
            store,
            stars: Vec::new(),
            last_reply: None,
            rng,
            started_at: now,
            last_active: now,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The active topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Move the session to another topic. Unknown topics are allowed; the
    /// matcher falls back to `random` for them.
    pub fn set_topic(&mut self, topic: &str) {
        self.topic = topic.to_lowercase();
    }

    /// The reply produced by the previous `respond` call.
    pub fn last_reply(&self) -> Option<&str> {
        self.last_reply.as_deref()
    }

    /// Captures bound by the last matched trigger.
    pub fn stars(&self) -> &[String] {
        &self.stars
    }

    pub fn variable(&self, name: &str) -> Result<Option<String>, StoreError> {
        self.store.get(name)
    }

    pub fn set_variable(&mut self, name: &str, value: Option<&str>) -> Result<(), StoreError> {
        self.store.set(name, value)
    }

    pub fn variables(&self) -> Result<Vec<(String, String)>, StoreError> {
        self.store.entries()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn last_active(&self) -> DateTime<Utc> {
        self.last_active
    }

    pub(crate) fn touch(&mut self) {
        self.last_active = Utc::now();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("stars", &self.stars)
            .field("last_reply", &self.last_reply)
            .field("started_at", &self.started_at)
            .field("last_active", &self.last_active)
            .finish_non_exhaustive()
    }
}

/// Sessions keyed by id over one shared corpus.
pub struct SessionRegistry {
    corpus: Arc<CompiledCorpus>,
    options: Options,
    fallback: Box<dyn Fallback + Send + Sync>,
    sessions: Mutex<HashMap<String, Arc<Mutex<Session>>>>,
}

impl SessionRegistry {
    pub fn new(corpus: Arc<CompiledCorpus>, options: Options) -> Self {
        SessionRegistry { corpus, options, fallback: Box::new(DefaultFallback), sessions: Mutex::new(HashMap::new()) }
    }

    /// Replace the no-match hook.
    pub fn with_fallback(mut self, fallback: impl Fallback + Send + Sync + 'static) -> Self {
        self.fallback = Box::new(fallback);
        self
    }

    pub fn corpus(&self) -> &Arc<CompiledCorpus> {
        &self.corpus
    }

    /// Answer `utterance` for session `id`, creating the session on first
    /// use. Waits for any call already running for the same id.
    pub fn respond(&self, id: &str, utterance: &str) -> Result<String, EngineError> {
        let session = self.session(id);
        let mut guard = session.lock().unwrap_or_else(PoisonError::into_inner);
        self.answer(&mut guard, utterance)
    }

    /// Like [`respond`](Self::respond) but fails with
    /// [`EngineError::SessionBusy`] instead of waiting.
    pub fn try_respond(&self, id: &str, utterance: &str) -> Result<String, EngineError> {
        let session = self.session(id);
        let mut guard = match session.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Err(EngineError::SessionBusy(id.to_string())),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        self.answer(&mut guard, utterance)
    }

    /// Run `f` against session `id`, creating it if needed.
    pub fn with_session<T>(&self, id: &str, f: impl FnOnce(&mut Session) -> T) -> T {
        let session = self.session(id);
        let mut guard = session.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Drop session `id`. Returns whether it existed.
    pub fn end(&self, id: &str) -> bool {
        self.map().remove(id).is_some()
    }

    /// Drop every session idle for longer than `max_idle`; returns how many
    /// were dropped. Sessions busy answering are kept.
    pub fn expire_idle(&self, max_idle: chrono::Duration) -> usize {
        let cutoff = Utc::now() - max_idle;
        let mut sessions = self.map();
        let before = sessions.len();
        sessions.retain(|id, session| match session.try_lock() {
            Ok(guard) => guard.last_active >= cutoff,
            Err(TryLockError::WouldBlock) => true,
            Err(TryLockError::Poisoned(_)) => {
                tracing::warn!(session = %id, "dropping poisoned session");
                false
            }
        });
        let dropped = before - sessions.len();
        if dropped > 0 {
            tracing::debug!(dropped, "expired idle sessions");
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }

    fn answer(&self, session: &mut Session, utterance: &str) -> Result<String, EngineError> {
        respond_with(&self.corpus, session, utterance, &self.options, self.fallback.as_ref()).map(|reply| reply.text)
    }

    fn session(&self, id: &str) -> Arc<Mutex<Session>> {
        self.map()
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Session::new(id, &self.options))))
            .clone()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, Arc<Mutex<Session>>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
