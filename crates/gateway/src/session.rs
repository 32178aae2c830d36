//! Sessions: per-participant state with a TTL-driven lifecycle.
//!
//! ```text
//! ACTIVE ──idle timeout──▶ IDLE ──activity──▶ ACTIVE
//! ACTIVE | IDLE ──suspend──▶ SUSPENDED ──resume──▶ ACTIVE
//! ACTIVE | IDLE | SUSPENDED ──close / TTL──▶ CLOSED (terminal, evicted)
//! ```
//!
//! At most one non-closed session exists per `(platform, participant)`.
//! Every mutation of a session happens under that session's own lock, so
//! activity refreshes and the sweep's expiry check never interleave. All
//! expiry arithmetic uses the monotonic `tokio::time::Instant`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use conduit_config::SessionConfig;
use conduit_core::SessionError;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Idle,
    Suspended,
    Closed,
}

impl SessionState {
    pub fn can_transition_to(self, to: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, to),
            (Active, Idle)
                | (Idle, Active)
                | (Active | Idle, Suspended)
                | (Suspended, Active)
                | (Active | Idle | Suspended, Closed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Active => "active",
            SessionState::Idle => "idle",
            SessionState::Suspended => "suspended",
            SessionState::Closed => "closed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A participant's session.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub participant_id: String,
    pub platform: String,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    /// Wall-clock time of the last activity, for display only.
    pub last_activity_at: DateTime<Utc>,
    #[serde(skip)]
    pub last_activity: Instant,
    pub ttl: Duration,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Inbound messages seen on this session
    pub message_count: u64,
}

impl Session {
    fn new(platform: &str, participant_id: &str, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            participant_id: participant_id.to_string(),
            platform: platform.to_string(),
            state: SessionState::Active,
            created_at: now,
            last_activity_at: now,
            last_activity: Instant::now(),
            ttl,
            metadata: serde_json::Map::new(),
            message_count: 0,
        }
    }

    /// Time since the last activity.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.idle_for(now) > self.ttl
    }

    fn refresh(&mut self) {
        self.last_activity = Instant::now();
        self.last_activity_at = Utc::now();
        if self.state == SessionState::Idle {
            self.state = SessionState::Active;
        }
    }

    fn transition(&mut self, to: SessionState) -> Result<(), SessionError> {
        if self.state == SessionState::Closed {
            return Err(SessionError::Closed(self.id.clone()));
        }
        if !self.state.can_transition_to(to) {
            return Err(SessionError::InvalidTransition {
                session_id: self.id.clone(),
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        self.state = to;
        Ok(())
    }
}

/// Result of resolving a packet's participant to a session.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub session: Session,
    pub created: bool,
}

/// Sessions changed by one sweep pass.
#[derive(Debug, Clone, Default)]
pub struct SweepOutcome {
    /// Sessions that went ACTIVE -> IDLE
    pub idled: Vec<String>,
    /// Sessions closed by TTL and evicted (state is CLOSED)
    pub expired: Vec<Session>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStats {
    pub created: u64,
    pub closed: u64,
    pub expired: u64,
    pub active: usize,
    pub idle: usize,
    pub suspended: usize,
}

type SessionRef = Arc<Mutex<Session>>;

#[derive(Default)]
struct SessionTable {
    by_id: HashMap<String, SessionRef>,
    by_participant: HashMap<(String, String), String>,
}

impl SessionTable {
    fn evict(&mut self, session: &Session) {
        self.by_id.remove(&session.id);
        let key = (session.platform.clone(), session.participant_id.clone());
        if self.by_participant.get(&key) == Some(&session.id) {
            self.by_participant.remove(&key);
        }
    }
}

/// Bounded memory of recently closed ids, so close stays idempotent after
/// eviction.
struct Tombstones {
    order: VecDeque<String>,
    ids: HashSet<String>,
    capacity: usize,
}

impl Tombstones {
    fn insert(&mut self, id: String) {
        if self.capacity == 0 || !self.ids.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.ids.remove(&old);
            }
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }
}

pub struct SessionManager {
    // Lock order: table, then an individual session.
    table: RwLock<SessionTable>,
    tombstones: Mutex<Tombstones>,
    ttl: Duration,
    idle_timeout: Duration,
    max_sessions: usize,
    accepting: AtomicBool,
    created: AtomicU64,
    closed: AtomicU64,
    expired: AtomicU64,
}

impl SessionManager {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            table: RwLock::new(SessionTable::default()),
            tombstones: Mutex::new(Tombstones {
                order: VecDeque::new(),
                ids: HashSet::new(),
                capacity: config.tombstone_capacity,
            }),
            ttl: config.ttl(),
            idle_timeout: config.idle_timeout(),
            max_sessions: config.max_sessions,
            accepting: AtomicBool::new(true),
            created: AtomicU64::new(0),
            closed: AtomicU64::new(0),
            expired: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Stop (or resume) creating sessions; existing ones are unaffected.
    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Find the live session for a participant, or create one. Counts as
    /// activity on an existing session.
    pub fn resolve(&self, platform: &str, participant_id: &str) -> Result<Resolved, SessionError> {
        self.open(platform, participant_id, true)
    }

    /// Explicitly create a session. Returns the existing live session for
    /// the participant when there is one.
    pub fn create_session(&self, platform: &str, participant_id: &str) -> Result<Resolved, SessionError> {
        self.open(platform, participant_id, false)
    }

    fn open(&self, platform: &str, participant_id: &str, inbound: bool) -> Result<Resolved, SessionError> {
        let mut table = self.table.write().unwrap_or_else(|e| e.into_inner());
        let key = (platform.to_string(), participant_id.to_string());

        if let Some(existing) = table
            .by_participant
            .get(&key)
            .and_then(|id| table.by_id.get(id))
            .cloned()
        {
            let mut session = existing.lock().unwrap_or_else(|e| e.into_inner());
            if session.state != SessionState::Closed {
                if inbound {
                    session.refresh();
                    session.message_count += 1;
                }
                return Ok(Resolved {
                    session: session.clone(),
                    created: false,
                });
            }
            let stale = session.clone();
            drop(session);
            table.evict(&stale);
        }

        if !self.is_accepting() {
            return Err(SessionError::NotAccepting);
        }
        if table.by_id.len() >= self.max_sessions {
            return Err(SessionError::CapacityExceeded {
                max: self.max_sessions,
            });
        }

        let mut session = Session::new(platform, participant_id, self.ttl);
        if inbound {
            session.message_count = 1;
        }
        table.by_participant.insert(key, session.id.clone());
        table
            .by_id
            .insert(session.id.clone(), Arc::new(Mutex::new(session.clone())));
        self.created.fetch_add(1, Ordering::Relaxed);
        info!(
            session_id = %session.id,
            platform = %platform,
            participant = %participant_id,
            "Session created"
        );
        Ok(Resolved {
            session,
            created: true,
        })
    }

    fn lookup(&self, session_id: &str) -> Result<SessionRef, SessionError> {
        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        if let Some(session) = table.by_id.get(session_id) {
            return Ok(session.clone());
        }
        drop(table);
        if self.is_tombstoned(session_id) {
            Err(SessionError::Closed(session_id.to_string()))
        } else {
            Err(SessionError::NotFound(session_id.to_string()))
        }
    }

    fn is_tombstoned(&self, session_id: &str) -> bool {
        self.tombstones
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(session_id)
    }

    /// A snapshot of a live session.
    pub fn get(&self, session_id: &str) -> Result<Session, SessionError> {
        let session = self.lookup(session_id)?;
        let session = session.lock().unwrap_or_else(|e| e.into_inner());
        if session.state == SessionState::Closed {
            return Err(SessionError::Closed(session_id.to_string()));
        }
        Ok(session.clone())
    }

    /// Record activity. Idle sessions become active; suspended ones stay
    /// suspended.
    pub fn touch(&self, session_id: &str) -> Result<Session, SessionError> {
        let session = self.lookup(session_id)?;
        let mut session = session.lock().unwrap_or_else(|e| e.into_inner());
        if session.state == SessionState::Closed {
            return Err(SessionError::Closed(session_id.to_string()));
        }
        session.refresh();
        Ok(session.clone())
    }

    pub fn set_metadata(
        &self,
        session_id: &str,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Result<(), SessionError> {
        let session = self.lookup(session_id)?;
        let mut session = session.lock().unwrap_or_else(|e| e.into_inner());
        if session.state == SessionState::Closed {
            return Err(SessionError::Closed(session_id.to_string()));
        }
        session.metadata.insert(key.into(), value.into());
        Ok(())
    }

    pub fn suspend(&self, session_id: &str) -> Result<Session, SessionError> {
        let session = self.lookup(session_id)?;
        let mut session = session.lock().unwrap_or_else(|e| e.into_inner());
        session.transition(SessionState::Suspended)?;
        info!(session_id = %session_id, "Session suspended");
        Ok(session.clone())
    }

    pub fn resume(&self, session_id: &str) -> Result<Session, SessionError> {
        let session = self.lookup(session_id)?;
        let mut session = session.lock().unwrap_or_else(|e| e.into_inner());
        session.transition(SessionState::Active)?;
        session.refresh();
        info!(session_id = %session_id, "Session resumed");
        Ok(session.clone())
    }

    /// Close a session. `Ok(Some(_))` when this call closed it, `Ok(None)`
    /// when it was already closed.
    pub fn close(&self, session_id: &str) -> Result<Option<Session>, SessionError> {
        let mut table = self.table.write().unwrap_or_else(|e| e.into_inner());
        let Some(entry) = table.by_id.get(session_id).cloned() else {
            drop(table);
            if self.is_tombstoned(session_id) {
                return Ok(None);
            }
            return Err(SessionError::NotFound(session_id.to_string()));
        };

        let closed = {
            let mut session = entry.lock().unwrap_or_else(|e| e.into_inner());
            if session.state == SessionState::Closed {
                None
            } else {
                session.state = SessionState::Closed;
                Some(session.clone())
            }
        };
        let Some(session) = closed else {
            return Ok(None);
        };
        table.evict(&session);
        drop(table);

        self.remember(&session.id);
        self.closed.fetch_add(1, Ordering::Relaxed);
        info!(session_id = %session.id, platform = %session.platform, "Session closed");
        Ok(Some(session))
    }

    /// Close every live session (shutdown).
    pub fn close_all(&self) -> Vec<Session> {
        let ids: Vec<String> = self
            .table
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .by_id
            .keys()
            .cloned()
            .collect();
        ids.iter()
            .filter_map(|id| self.close(id).ok().flatten())
            .collect()
    }

    /// One sweep pass at `now`: idle sessions past the idle timeout, close and
    /// evict sessions past their TTL.
    pub fn sweep(&self, now: Instant) -> SweepOutcome {
        let entries: Vec<SessionRef> = self
            .table
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .by_id
            .values()
            .cloned()
            .collect();

        let mut outcome = SweepOutcome::default();
        for entry in entries {
            let mut session = entry.lock().unwrap_or_else(|e| e.into_inner());
            let state = session.state;
            match state {
                SessionState::Closed => continue,
                _ if session.is_expired(now) => {
                    session.state = SessionState::Closed;
                    outcome.expired.push(session.clone());
                }
                SessionState::Active if session.idle_for(now) > self.idle_timeout => {
                    session.state = SessionState::Idle;
                    debug!(session_id = %session.id, "Session idle");
                    outcome.idled.push(session.id.clone());
                }
                _ => {}
            }
        }

        if !outcome.expired.is_empty() {
            let mut table = self.table.write().unwrap_or_else(|e| e.into_inner());
            for session in &outcome.expired {
                table.evict(session);
            }
            drop(table);
            for session in &outcome.expired {
                self.remember(&session.id);
                self.expired.fetch_add(1, Ordering::Relaxed);
                info!(
                    session_id = %session.id,
                    platform = %session.platform,
                    idle_ms = session.idle_for(now).as_millis() as u64,
                    "Session expired"
                );
            }
        }
        outcome
    }

    fn remember(&self, session_id: &str) {
        self.tombstones
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session_id.to_string());
    }

    /// Number of live (non-closed) sessions.
    pub fn len(&self) -> usize {
        self.table.read().unwrap_or_else(|e| e.into_inner()).by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> SessionStats {
        let mut stats = SessionStats {
            created: self.created.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            ..Default::default()
        };
        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        for entry in table.by_id.values() {
            match entry.lock().unwrap_or_else(|e| e.into_inner()).state {
                SessionState::Active => stats.active += 1,
                SessionState::Idle => stats.idle += 1,
                SessionState::Suspended => stats.suspended += 1,
                SessionState::Closed => {}
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(ttl_secs: u64, idle_secs: u64) -> SessionConfig {
        SessionConfig {
            ttl_secs,
            idle_timeout_secs: idle_secs,
            sweep_interval_secs: 1,
            max_sessions: 3,
            tombstone_capacity: 2,
        }
    }

    fn manager() -> SessionManager {
        SessionManager::new(&config(60, 10))
    }

    #[test]
    fn state_edges() {
        use SessionState::*;
        assert!(Active.can_transition_to(Idle));
        assert!(Idle.can_transition_to(Active));
        assert!(Idle.can_transition_to(Suspended));
        assert!(Suspended.can_transition_to(Active));
        assert!(Suspended.can_transition_to(Closed));
        assert!(!Suspended.can_transition_to(Idle));
        assert!(!Closed.can_transition_to(Active));
        assert!(!Closed.can_transition_to(Closed));
    }

    #[tokio::test]
    async fn one_live_session_per_participant() {
        let m = manager();
        let first = m.resolve("telegram", "alice").unwrap();
        assert!(first.created);
        assert_eq!(first.session.message_count, 1);

        let again = m.resolve("telegram", "alice").unwrap();
        assert!(!again.created);
        assert_eq!(again.session.id, first.session.id);
        assert_eq!(again.session.message_count, 2);

        let other_platform = m.resolve("discord", "alice").unwrap();
        assert!(other_platform.created);
        assert_ne!(other_platform.session.id, first.session.id);

        let explicit = m.create_session("telegram", "alice").unwrap();
        assert!(!explicit.created);
        assert_eq!(m.len(), 2);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let m = manager();
        let id = m.resolve("web", "bob").unwrap().session.id;

        let closed = m.close(&id).unwrap().unwrap();
        assert_eq!(closed.state, SessionState::Closed);
        assert!(m.close(&id).unwrap().is_none());
        assert!(matches!(m.get(&id), Err(SessionError::Closed(_))));
        assert!(matches!(m.touch(&id), Err(SessionError::Closed(_))));
        assert!(matches!(m.close("nope"), Err(SessionError::NotFound(_))));
        assert_eq!(m.stats().closed, 1);

        // A new packet from the same participant opens a fresh session.
        let fresh = m.resolve("web", "bob").unwrap();
        assert!(fresh.created);
        assert_ne!(fresh.session.id, id);
    }

    #[tokio::test]
    async fn tombstones_are_bounded() {
        let m = manager();
        let ids: Vec<String> = ["a", "b", "c"]
            .iter()
            .map(|p| m.resolve("web", p).unwrap().session.id)
            .collect();
        for id in &ids {
            m.close(id).unwrap();
        }
        // Capacity 2: the oldest id is forgotten.
        assert!(matches!(m.close(&ids[0]), Err(SessionError::NotFound(_))));
        assert!(m.close(&ids[2]).unwrap().is_none());
    }

    #[tokio::test]
    async fn suspend_and_resume() {
        let m = manager();
        let id = m.resolve("web", "carol").unwrap().session.id;

        assert_eq!(m.suspend(&id).unwrap().state, SessionState::Suspended);
        assert!(matches!(
            m.suspend(&id),
            Err(SessionError::InvalidTransition { .. })
        ));

        // Activity on a suspended session does not resume it.
        let touched = m.resolve("web", "carol").unwrap();
        assert_eq!(touched.session.state, SessionState::Suspended);

        assert_eq!(m.resume(&id).unwrap().state, SessionState::Active);
        assert!(matches!(
            m.resume(&id),
            Err(SessionError::InvalidTransition { .. })
        ));
        assert_eq!(m.stats().active, 1);
    }

    #[tokio::test]
    async fn capacity_and_accepting() {
        let m = manager();
        for p in ["a", "b", "c"] {
            m.resolve("web", p).unwrap();
        }
        assert!(matches!(
            m.resolve("web", "d"),
            Err(SessionError::CapacityExceeded { max: 3 })
        ));

        let m = manager();
        let existing = m.resolve("web", "a").unwrap().session.id;
        m.set_accepting(false);
        assert!(matches!(m.resolve("web", "b"), Err(SessionError::NotAccepting)));
        assert_eq!(m.resolve("web", "a").unwrap().session.id, existing);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_idles_then_expires() {
        let m = SessionManager::new(&config(60, 10));
        let id = m.resolve("web", "dave").unwrap().session.id;

        tokio::time::advance(Duration::from_secs(11)).await;
        let outcome = m.sweep(Instant::now());
        assert_eq!(outcome.idled, vec![id.clone()]);
        assert_eq!(m.get(&id).unwrap().state, SessionState::Idle);

        // Activity wakes it up again.
        assert_eq!(m.touch(&id).unwrap().state, SessionState::Active);

        tokio::time::advance(Duration::from_secs(61)).await;
        let outcome = m.sweep(Instant::now());
        assert_eq!(outcome.expired.len(), 1);
        assert_eq!(outcome.expired[0].state, SessionState::Closed);
        assert!(matches!(m.get(&id), Err(SessionError::Closed(_))));
        assert!(m.is_empty());
        assert_eq!(m.stats().expired, 1);

        // Nothing left to expire.
        assert!(m.sweep(Instant::now()).expired.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn activity_defers_expiry() {
        let m = SessionManager::new(&config(1, 0));
        let id = m.resolve("web", "erin").unwrap().session.id;

        tokio::time::advance(Duration::from_millis(900)).await;
        m.touch(&id).unwrap();
        tokio::time::advance(Duration::from_millis(900)).await;
        assert!(m.sweep(Instant::now()).expired.is_empty());

        tokio::time::advance(Duration::from_millis(200)).await;
        assert_eq!(m.sweep(Instant::now()).expired.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn suspended_sessions_still_expire() {
        let m = manager();
        let id = m.resolve("web", "frank").unwrap().session.id;
        m.suspend(&id).unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        let outcome = m.sweep(Instant::now());
        assert!(outcome.idled.is_empty());
        assert_eq!(outcome.expired[0].id, id);
    }
}
