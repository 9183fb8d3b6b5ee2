//! Reservation / lock manager: glob-aware conflict detection and
//! CAS-backed durable locks with TTL.

use crate::core::error::HiveError;
use crate::core::event_store::{EventStore, EventType};
use crate::core::glob;
use crate::core::time;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::sync::{Arc, Mutex};
use ulid::Ulid;

/// Bounded retry budget for CAS lock acquisition before surfacing
/// `LockTimeout`.
const MAX_LOCK_ATTEMPTS: u32 = 8;
const LOCK_RETRY_BACKOFF: std::time::Duration = std::time::Duration::from_millis(25);

const DEFAULT_TTL_SECONDS: i64 = 3600;

#[derive(Debug, Clone)]
pub struct Conflict {
    pub path: String,
    pub holder: String,
    pub pattern: String,
}

#[derive(Debug, Clone)]
pub struct Grant {
    pub reservation_id: String,
    pub path: String,
    pub expires_at: String,
}

#[derive(Debug, Clone, Default)]
pub struct ReserveOutcome {
    pub granted: Vec<Grant>,
    pub conflicts: Vec<Conflict>,
}

#[derive(Debug, Clone)]
pub struct ReserveRequest {
    pub project_key: String,
    pub agent: String,
    pub paths: Vec<String>,
    pub reason: Option<String>,
    pub exclusive: bool,
    pub ttl_seconds: i64,
    pub force: bool,
}

impl ReserveRequest {
    pub fn new(project_key: impl Into<String>, agent: impl Into<String>, paths: Vec<String>) -> Self {
        Self {
            project_key: project_key.into(),
            agent: agent.into(),
            paths,
            reason: None,
            exclusive: true,
            ttl_seconds: DEFAULT_TTL_SECONDS,
            force: false,
        }
    }
}

/// What to release: specific reservation ids, specific path patterns, or
/// every active reservation the agent currently holds.
#[derive(Debug, Clone)]
pub enum ReleaseFilter {
    ReservationIds(Vec<String>),
    Paths(Vec<String>),
    All,
}

#[derive(Debug, Clone)]
pub struct ReleaseOutcome {
    pub released: usize,
    pub released_at: String,
}

pub struct ReservationManager {
    conn: Arc<Mutex<Connection>>,
    event_store: Arc<EventStore>,
}

impl ReservationManager {
    pub fn new(conn: Arc<Mutex<Connection>>, event_store: Arc<EventStore>) -> Self {
        Self { conn, event_store }
    }

    /// Fetch active exclusive reservations held by other agents and return
    /// every `(path, pattern)` pair that glob-matches one of `paths`.
    pub fn check_conflicts(
        &self,
        project_key: &str,
        agent: &str,
        paths: &[String],
    ) -> Result<Vec<Conflict>, HiveError> {
        let active = {
            let conn = self.lock_conn()?;
            let now = time::now_epoch_secs();
            let mut stmt = conn.prepare(
                "SELECT agent_name, path_pattern FROM reservations
                 WHERE project_key = ?1 AND agent_name != ?2 AND exclusive = 1
                   AND released_at IS NULL AND expires_at > ?3",
            )?;
            stmt.query_map(rusqlite::params![project_key, agent, now], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?
        };

        let mut conflicts = Vec::new();
        for path in paths {
            for (holder, pattern) in &active {
                if glob::matches(pattern, path) {
                    conflicts.push(Conflict {
                        path: path.clone(),
                        holder: holder.clone(),
                        pattern: pattern.clone(),
                    });
                }
            }
        }
        Ok(conflicts)
    }

    /// See spec.md §4.4's `reserve` algorithm.
    pub fn reserve(&self, req: ReserveRequest) -> Result<ReserveOutcome, HiveError> {
        if req.paths.is_empty() {
            return Ok(ReserveOutcome::default());
        }

        let conflicts = self.check_conflicts(&req.project_key, &req.agent, &req.paths)?;
        if !conflicts.is_empty() && !req.force {
            return Ok(ReserveOutcome {
                granted: vec![],
                conflicts,
            });
        }

        let expires_at = time::now_epoch_secs() + req.ttl_seconds;
        let mut acquired_locks: Vec<(String, String)> = Vec::new(); // (resource, holder_id)
        let mut grants = Vec::new();

        if req.exclusive {
            for path in &req.paths {
                let holder_id = format!("lock_{}", Ulid::new());
                match self.acquire_lock_with_retry(path, &holder_id, expires_at, req.force) {
                    Ok(()) => acquired_locks.push((path.clone(), holder_id)),
                    Err(err) => {
                        // Best-effort: release whatever this call already acquired.
                        for (resource, holder) in &acquired_locks {
                            let _ = self.release_lock(resource, holder);
                        }
                        return Err(err);
                    }
                }
            }
        }

        let grant_payloads: Vec<_> = req
            .paths
            .iter()
            .map(|path| {
                let reservation_id = format!("res_{}", Ulid::new());
                let holder_id = acquired_locks
                    .iter()
                    .find(|(resource, _)| resource == path)
                    .map(|(_, holder)| holder.clone());
                grants.push(Grant {
                    reservation_id: reservation_id.clone(),
                    path: path.clone(),
                    expires_at: time::epoch_secs_to_iso8601(expires_at),
                });
                json!({
                    "reservation_id": reservation_id,
                    "path": path,
                    "holder_id": holder_id,
                })
            })
            .collect();

        let payload = json!({
            "agent": req.agent,
            "exclusive": req.exclusive,
            "expires_at": expires_at,
            "reason": req.reason,
            "grants": grant_payloads,
        });

        self.event_store
            .append(&req.project_key, EventType::FileReserved, &req.agent, payload)?;

        if crate::core::debug_enabled("reservations") {
            eprintln!(
                "[hive:reservations] {} granted {} of {} paths to {}",
                req.project_key,
                grants.len(),
                req.paths.len(),
                req.agent
            );
        }

        Ok(ReserveOutcome { granted: grants, conflicts })
    }

    /// See spec.md §4.4's `release` algorithm.
    pub fn release(
        &self,
        project_key: &str,
        agent: &str,
        filter: ReleaseFilter,
    ) -> Result<ReleaseOutcome, HiveError> {
        let rows = self.active_reservations_matching(project_key, agent, &filter)?;

        for (_, path_pattern, holder_id) in &rows {
            if let Some(holder_id) = holder_id {
                let _ = self.release_lock(path_pattern, holder_id);
            }
        }

        let reservation_ids: Vec<String> = rows.iter().map(|(id, _, _)| id.clone()).collect();
        let payload = json!({
            "agent": agent,
            "reservation_ids": reservation_ids,
        });
        self.event_store
            .append(project_key, EventType::FileReleased, agent, payload)?;

        Ok(ReleaseOutcome {
            released: rows.len(),
            released_at: time::now_iso8601(),
        })
    }

    fn active_reservations_matching(
        &self,
        project_key: &str,
        agent: &str,
        filter: &ReleaseFilter,
    ) -> Result<Vec<(String, String, Option<String>)>, HiveError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT reservation_id, path_pattern, lock_holder_id FROM reservations
             WHERE project_key = ?1 AND agent_name = ?2 AND released_at IS NULL",
        )?;
        let all: Vec<(String, String, Option<String>)> = stmt
            .query_map(rusqlite::params![project_key, agent], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(match filter {
            ReleaseFilter::All => all,
            ReleaseFilter::ReservationIds(ids) => all
                .into_iter()
                .filter(|(id, _, _)| ids.contains(id))
                .collect(),
            ReleaseFilter::Paths(paths) => all
                .into_iter()
                .filter(|(_, pattern, _)| paths.contains(pattern))
                .collect(),
        })
    }

    fn acquire_lock_with_retry(
        &self,
        resource: &str,
        holder_id: &str,
        expires_at: i64,
        force: bool,
    ) -> Result<(), HiveError> {
        for attempt in 0..MAX_LOCK_ATTEMPTS {
            if self.try_acquire_lock(resource, holder_id, expires_at, force)? {
                return Ok(());
            }
            if attempt + 1 < MAX_LOCK_ATTEMPTS {
                std::thread::sleep(LOCK_RETRY_BACKOFF);
            }
        }
        Err(HiveError::LockTimeout {
            resource: resource.to_string(),
            attempts: MAX_LOCK_ATTEMPTS,
        })
    }

    /// CAS-acquire `resource` for `holder_id`. Normally only succeeds when
    /// the existing row (if any) has already expired; `force` steals the
    /// lock from its current holder regardless of expiry, per spec.md
    /// §4.4's `reserve(force=true)` contract.
    fn try_acquire_lock(
        &self,
        resource: &str,
        holder_id: &str,
        expires_at: i64,
        force: bool,
    ) -> Result<bool, HiveError> {
        let conn = self.lock_conn()?;
        let now = time::now_epoch_secs();
        let changed = conn.execute(
            "INSERT INTO locks (resource, holder_id, expires_at, cas_version) VALUES (?1, ?2, ?3, 1)
             ON CONFLICT(resource) DO UPDATE SET
                holder_id = excluded.holder_id,
                expires_at = excluded.expires_at,
                cas_version = locks.cas_version + 1
             WHERE locks.expires_at <= ?4 OR ?5",
            rusqlite::params![resource, holder_id, expires_at, now, force],
        )?;
        Ok(changed > 0)
    }

    /// Release a lock by holder id; a no-op (never fatal) if the lock is
    /// already gone or held by a different holder (e.g. already expired and
    /// re-acquired by someone else).
    fn release_lock(&self, resource: &str, holder_id: &str) -> Result<(), HiveError> {
        let conn = self.lock_conn()?;
        conn.execute(
            "DELETE FROM locks WHERE resource = ?1 AND holder_id = ?2",
            rusqlite::params![resource, holder_id],
        )?;
        Ok(())
    }

    /// Current holder of `resource`, if any and unexpired.
    pub fn current_holder(&self, resource: &str) -> Result<Option<String>, HiveError> {
        let conn = self.lock_conn()?;
        let now = time::now_epoch_secs();
        let holder: Option<String> = conn
            .query_row(
                "SELECT holder_id FROM locks WHERE resource = ?1 AND expires_at > ?2",
                rusqlite::params![resource, now],
                |row| row.get(0),
            )
            .optional()?;
        Ok(holder)
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, HiveError> {
        self.conn
            .lock()
            .map_err(|_| HiveError::Integrity("reservation manager connection poisoned".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schemas;

    fn manager() -> ReservationManager {
        let conn = Connection::open_in_memory().unwrap();
        for statement in schemas::ALL_STATEMENTS {
            conn.execute(statement, []).unwrap();
        }
        let conn = Arc::new(Mutex::new(conn));
        let event_store = Arc::new(EventStore::new(conn.clone()));
        ReservationManager::new(conn, event_store)
    }

    #[test]
    fn test_reserve_empty_paths_is_a_noop() {
        let mgr = manager();
        let outcome = mgr
            .reserve(ReserveRequest::new("p1", "agent1", vec![]))
            .unwrap();
        assert!(outcome.granted.is_empty());
        assert!(outcome.conflicts.is_empty());
    }

    #[test]
    fn test_second_exclusive_reservation_conflicts() {
        let mgr = manager();
        let r1 = mgr
            .reserve(ReserveRequest::new(
                "p1",
                "agent1",
                vec!["src/**".to_string()],
            ))
            .unwrap();
        assert_eq!(r1.granted.len(), 1);
        assert!(r1.conflicts.is_empty());

        let r2 = mgr
            .reserve(ReserveRequest::new(
                "p1",
                "agent2",
                vec!["src/file.ts".to_string()],
            ))
            .unwrap();
        assert!(r2.granted.is_empty());
        assert_eq!(r2.conflicts.len(), 1);
        assert_eq!(r2.conflicts[0].holder, "agent1");
        assert_eq!(r2.conflicts[0].pattern, "src/**");
    }

    #[test]
    fn test_release_then_reserve_succeeds() {
        let mgr = manager();
        mgr.reserve(ReserveRequest::new("p1", "agent1", vec!["src/**".to_string()]))
            .unwrap();
        mgr.release("p1", "agent1", ReleaseFilter::All).unwrap();

        let r2 = mgr
            .reserve(ReserveRequest::new(
                "p1",
                "agent2",
                vec!["src/file.ts".to_string()],
            ))
            .unwrap();
        assert_eq!(r2.granted.len(), 1);
        assert!(r2.conflicts.is_empty());
    }

    #[test]
    fn test_force_reserve_grants_despite_conflict() {
        let mgr = manager();
        mgr.reserve(ReserveRequest::new("p1", "agent1", vec!["src/file.ts".to_string()]))
            .unwrap();

        let mut req = ReserveRequest::new("p1", "agent2", vec!["src/file.ts".to_string()]);
        req.force = true;
        let outcome = mgr.reserve(req).unwrap();
        assert_eq!(outcome.granted.len(), 1);
        assert_eq!(outcome.conflicts.len(), 1);
    }
}
