use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use fleet_types::events::AgentServiceReport;
use fleet_types::{
    Agent, AgentId, AgentKey, AgentRegistration, Clock, CodeGen, RegId, RegistrationState,
    RegistrationStatus, Service, ServiceStatus, UserId, UuidGen,
};
use rusqlite::{Connection, OptionalExtension, Row, ToSql, params};

use crate::error::StoreError;
use crate::{RegistrationPoll, Store};

const REGISTRATION_TTL_SECS: i64 = 60;
const MAX_FAILED_ATTEMPTS: i64 = 5;

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE agents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        key TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        owner INTEGER,
        registration_status TEXT NOT NULL,
        ip_address TEXT,
        created_at TEXT NOT NULL,
        last_seen TEXT,
        is_online INTEGER NOT NULL DEFAULT 0,
        grace_period_secs INTEGER NOT NULL
    );
    CREATE INDEX idx_agents_owner ON agents(owner);
    "#,
    r#"
    CREATE TABLE services (
        agent_id INTEGER NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
        service_id TEXT NOT NULL,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        version TEXT NOT NULL DEFAULT '',
        schedule TEXT NOT NULL DEFAULT '',
        last_status TEXT NOT NULL DEFAULT 'unknown',
        last_message TEXT NOT NULL DEFAULT '',
        last_seen TEXT,
        PRIMARY KEY (agent_id, service_id)
    );
    "#,
    r#"
    CREATE TABLE agent_registrations (
        reg_id TEXT PRIMARY KEY,
        code TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL,
        expires_at TEXT NOT NULL,
        failed_attempts INTEGER NOT NULL DEFAULT 0,
        agent_key TEXT
    );
    CREATE UNIQUE INDEX idx_pending_code ON agent_registrations(code) WHERE status = 'pending';
    "#,
];

/// `rusqlite`-backed `Store`, one `Mutex<Connection>` behind an `Arc`
/// (grounded on `hr-auth/src/sessions.rs`'s `SessionStore`). Every
/// multi-step mutation runs inside a single `conn.transaction()`, and
/// the pre-image a change notification needs is read inside that same
/// transaction, never via a second connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
    code_gen: Arc<dyn CodeGen>,
    uuid_gen: Arc<dyn UuidGen>,
    default_grace_period_secs: u64,
}

impl SqliteStore {
    pub fn open(
        path: &Path,
        clock: Arc<dyn Clock>,
        code_gen: Arc<dyn CodeGen>,
        uuid_gen: Arc<dyn UuidGen>,
        default_grace_period_secs: u64,
    ) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn, clock, code_gen, uuid_gen, default_grace_period_secs)
    }

    pub fn open_in_memory(
        clock: Arc<dyn Clock>,
        code_gen: Arc<dyn CodeGen>,
        uuid_gen: Arc<dyn UuidGen>,
        default_grace_period_secs: u64,
    ) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, clock, code_gen, uuid_gen, default_grace_period_secs)
    }

    fn from_connection(
        conn: Connection,
        clock: Arc<dyn Clock>,
        code_gen: Arc<dyn CodeGen>,
        uuid_gen: Arc<dyn UuidGen>,
        default_grace_period_secs: u64,
    ) -> Result<Self, StoreError> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON")?;
        apply_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            clock,
            code_gen,
            uuid_gen,
            default_grace_period_secs,
        })
    }

    fn fetch_agent(conn: &Connection, id: AgentId) -> Result<Agent, StoreError> {
        conn.query_row(
            "SELECT id, key, name, owner, registration_status, ip_address, created_at,
                    last_seen, is_online, grace_period_secs
             FROM agents WHERE id = ?1",
            params![id],
            row_to_agent,
        )
        .optional()?
        .ok_or(StoreError::NotFound)
    }

    fn fetch_service(conn: &Connection, agent_id: AgentId, service_id: &str) -> Result<Service, StoreError> {
        conn.query_row(
            "SELECT agent_id, service_id, name, description, version, schedule,
                    last_status, last_message, last_seen
             FROM services WHERE agent_id = ?1 AND service_id = ?2",
            params![agent_id, service_id],
            row_to_service,
        )
        .optional()?
        .ok_or(StoreError::NotFound)
    }

    fn fetch_services(conn: &Connection, agent_id: AgentId) -> Result<Vec<Service>, StoreError> {
        let mut stmt = conn.prepare(
            "SELECT agent_id, service_id, name, description, version, schedule,
                    last_status, last_message, last_seen
             FROM services WHERE agent_id = ?1 ORDER BY service_id",
        )?;
        let rows = stmt.query_map(params![agent_id], row_to_service)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn is_online(conn: &Connection, agent_id: AgentId) -> Result<bool, StoreError> {
        let online: i64 = conn
            .query_row(
                "SELECT is_online FROM agents WHERE id = ?1",
                params![agent_id],
                |r| r.get(0),
            )
            .optional()?
            .ok_or(StoreError::NotFound)?;
        Ok(online != 0)
    }
}

impl Store for SqliteStore {
    fn get_agent_by_key(&self, key: AgentKey) -> Result<Agent, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, key, name, owner, registration_status, ip_address, created_at,
                    last_seen, is_online, grace_period_secs
             FROM agents WHERE key = ?1 AND registration_status = 'registered'",
            params![key.to_string()],
            row_to_agent,
        )
        .optional()?
        .ok_or(StoreError::NotFound)
    }

    fn get_agent_by_key_any(&self, key: AgentKey) -> Result<Agent, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, key, name, owner, registration_status, ip_address, created_at,
                    last_seen, is_online, grace_period_secs
             FROM agents WHERE key = ?1",
            params![key.to_string()],
            row_to_agent,
        )
        .optional()?
        .ok_or(StoreError::NotFound)
    }

    fn get_agent(&self, id: AgentId) -> Result<Agent, StoreError> {
        let conn = self.conn.lock().unwrap();
        Self::fetch_agent(&conn, id)
    }

    fn get_agent_owned(&self, id: AgentId, owner: UserId) -> Result<Agent, StoreError> {
        let conn = self.conn.lock().unwrap();
        let agent = Self::fetch_agent(&conn, id)?;
        if agent.owner != Some(owner) {
            return Err(StoreError::NotFound);
        }
        Ok(agent)
    }

    fn list_user_agents(&self, owner: UserId) -> Result<Vec<(Agent, Vec<Service>)>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, key, name, owner, registration_status, ip_address, created_at,
                    last_seen, is_online, grace_period_secs
             FROM agents WHERE owner = ?1 AND registration_status = 'registered'
             ORDER BY id",
        )?;
        let agents = stmt
            .query_map(params![owner], row_to_agent)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut out = Vec::with_capacity(agents.len());
        for agent in agents {
            let services = Self::fetch_services(&conn, agent.id)?;
            out.push((agent, services));
        }
        Ok(out)
    }

    fn list_services(&self, agent_id: AgentId) -> Result<Vec<Service>, StoreError> {
        let conn = self.conn.lock().unwrap();
        Self::fetch_services(&conn, agent_id)
    }

    fn rename_agent(&self, id: AgentId, owner: UserId, name: &str) -> Result<Agent, StoreError> {
        let conn = self.conn.lock().unwrap();
        let agent = Self::fetch_agent(&conn, id)?;
        if agent.owner != Some(owner) {
            return Err(StoreError::NotFound);
        }
        conn.execute("UPDATE agents SET name = ?1 WHERE id = ?2", params![name, id])?;
        Self::fetch_agent(&conn, id)
    }

    fn create_registration(&self) -> Result<AgentRegistration, StoreError> {
        let conn = self.conn.lock().unwrap();
        let now = self.clock.now();
        let expires_at = now + chrono::Duration::seconds(REGISTRATION_TTL_SECS);
        let reg_id: RegId = self.uuid_gen.new_uuid();

        loop {
            let code = self.code_gen.digits(6);
            let collides: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM agent_registrations WHERE code = ?1 AND status = 'pending'",
                    params![code],
                    |r| r.get(0),
                )
                .optional()?;
            if collides.is_some() {
                continue;
            }
            conn.execute(
                "INSERT INTO agent_registrations
                    (reg_id, code, status, created_at, expires_at, failed_attempts, agent_key)
                 VALUES (?1, ?2, 'pending', ?3, ?4, 0, NULL)",
                params![reg_id.to_string(), code, now.to_rfc3339(), expires_at.to_rfc3339()],
            )?;
            return Ok(AgentRegistration {
                reg_id,
                code,
                status: RegistrationState::Pending,
                created_at: now,
                expires_at,
                failed_attempts: 0,
                agent_key: None,
            });
        }
    }

    fn claim_registration(&self, code: &str, user: UserId) -> Result<Agent, StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = self.clock.now();

        let matched: Option<String> = tx
            .query_row(
                "SELECT reg_id FROM agent_registrations
                 WHERE code = ?1 AND status = 'pending' AND expires_at > ?2",
                params![code, now.to_rfc3339()],
                |r| r.get(0),
            )
            .optional()?;

        if let Some(reg_id) = matched {
            let key: AgentKey = self.uuid_gen.new_uuid();
            let name = Agent::default_name(&key);
            tx.execute(
                "INSERT INTO agents
                    (key, name, owner, registration_status, ip_address, created_at, last_seen,
                     is_online, grace_period_secs)
                 VALUES (?1, ?2, ?3, 'pending', NULL, ?4, ?5, 0, ?6)",
                params![
                    key.to_string(),
                    name,
                    user,
                    now.to_rfc3339(),
                    now.to_rfc3339(),
                    self.default_grace_period_secs as i64
                ],
            )?;
            let agent_id = tx.last_insert_rowid();
            tx.execute(
                "UPDATE agent_registrations SET status = 'completed', agent_key = ?1 WHERE reg_id = ?2",
                params![key.to_string(), reg_id],
            )?;
            let agent = Self::fetch_agent(&tx, agent_id)?;
            tx.commit()?;
            return Ok(agent);
        }

        // No registration's code matches. There is no row to key the
        // failed attempt on unless exactly one registration is
        // currently outstanding — see lib.rs's doc comment on this
        // method for why that's the chosen scoping.
        let victim: Option<(String, i64)> = tx
            .query_row(
                "SELECT reg_id, failed_attempts FROM agent_registrations
                 WHERE status = 'pending' AND expires_at > ?1
                 ORDER BY created_at DESC LIMIT 1",
                params![now.to_rfc3339()],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;

        let Some((reg_id, attempts)) = victim else {
            tx.commit()?;
            return Err(StoreError::InvalidCode);
        };

        let attempts = attempts + 1;
        if attempts >= MAX_FAILED_ATTEMPTS {
            tx.execute(
                "UPDATE agent_registrations SET failed_attempts = ?1, status = 'expired' WHERE reg_id = ?2",
                params![attempts, reg_id],
            )?;
            tx.commit()?;
            return Err(StoreError::TooManyAttempts);
        }
        tx.execute(
            "UPDATE agent_registrations SET failed_attempts = ?1 WHERE reg_id = ?2",
            params![attempts, reg_id],
        )?;
        tx.commit()?;
        Err(StoreError::InvalidCode)
    }

    fn finalize_registration(&self, agent_id: AgentId) -> Result<Agent, StoreError> {
        let conn = self.conn.lock().unwrap();
        let agent = Self::fetch_agent(&conn, agent_id)?;
        if agent.registration_status != RegistrationStatus::Pending {
            return Err(StoreError::NotPending);
        }
        conn.execute(
            "UPDATE agents SET registration_status = 'registered' WHERE id = ?1",
            params![agent_id],
        )?;
        Self::fetch_agent(&conn, agent_id)
    }

    fn poll_registration(&self, reg_id: RegId) -> Result<RegistrationPoll, StoreError> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(String, String, Option<String>)> = conn
            .query_row(
                "SELECT status, expires_at, agent_key FROM agent_registrations WHERE reg_id = ?1",
                params![reg_id.to_string()],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;
        let Some((status, expires_at, agent_key)) = row else {
            return Err(StoreError::NotFound);
        };

        if status == "completed" {
            conn.execute(
                "DELETE FROM agent_registrations WHERE reg_id = ?1",
                params![reg_id.to_string()],
            )?;
            let key = agent_key.ok_or(StoreError::NotFound)?;
            let key: AgentKey = key.parse().map_err(|_| StoreError::NotFound)?;
            return Ok(RegistrationPoll::Completed { key });
        }

        let expires_at = parse_dt(&expires_at)?;
        if status == "expired" || expires_at < self.clock.now() {
            conn.execute(
                "DELETE FROM agent_registrations WHERE reg_id = ?1",
                params![reg_id.to_string()],
            )?;
            return Ok(RegistrationPoll::Expired);
        }

        Ok(RegistrationPoll::Pending)
    }

    fn unregister(&self, agent_id: AgentId) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM services WHERE agent_id = ?1", params![agent_id])?;
        tx.execute(
            "UPDATE agents SET registration_status = 'unregistered' WHERE id = ?1",
            params![agent_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn update_agent_ip(&self, agent_id: AgentId, ip: Option<&str>) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let current: Option<String> = conn
            .query_row(
                "SELECT ip_address FROM agents WHERE id = ?1",
                params![agent_id],
                |r| r.get(0),
            )
            .optional()?
            .ok_or(StoreError::NotFound)?;
        if current.as_deref() == ip {
            return Ok(());
        }
        conn.execute(
            "UPDATE agents SET ip_address = ?1 WHERE id = ?2",
            params![ip, agent_id],
        )?;
        Ok(())
    }

    fn mark_connected(&self, agent_id: AgentId) -> Result<(Agent, bool), StoreError> {
        let conn = self.conn.lock().unwrap();
        let was_online = Self::is_online(&conn, agent_id)?;
        conn.execute(
            "UPDATE agents SET last_seen = NULL, is_online = 1 WHERE id = ?1",
            params![agent_id],
        )?;
        let agent = Self::fetch_agent(&conn, agent_id)?;
        Ok((agent, !was_online))
    }

    fn mark_disconnected(&self, agent_id: AgentId) -> Result<(Agent, bool), StoreError> {
        let conn = self.conn.lock().unwrap();
        let was_online = Self::is_online(&conn, agent_id)?;
        conn.execute(
            "UPDATE agents SET last_seen = ?1, is_online = 0 WHERE id = ?2",
            params![self.clock.now().to_rfc3339(), agent_id],
        )?;
        let agent = Self::fetch_agent(&conn, agent_id)?;
        Ok((agent, was_online))
    }

    fn sync_services_and_connect(
        &self,
        agent_id: AgentId,
        incoming: &[AgentServiceReport],
    ) -> Result<(Agent, Vec<Service>, bool), StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        for svc in incoming {
            tx.execute(
                "INSERT INTO services (agent_id, service_id, name, description, version, schedule,
                                        last_status, last_message, last_seen)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'unknown', '', NULL)
                 ON CONFLICT(agent_id, service_id) DO UPDATE SET
                    name = excluded.name,
                    description = excluded.description,
                    version = excluded.version,
                    schedule = excluded.schedule",
                params![agent_id, svc.id, svc.name, svc.description, svc.version, svc.schedule],
            )?;
        }

        if incoming.is_empty() {
            tx.execute("DELETE FROM services WHERE agent_id = ?1", params![agent_id])?;
        } else {
            let placeholders = incoming.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
            let sql = format!(
                "DELETE FROM services WHERE agent_id = ? AND service_id NOT IN ({placeholders})"
            );
            let mut stmt = tx.prepare(&sql)?;
            let mut values: Vec<&dyn ToSql> = Vec::with_capacity(incoming.len() + 1);
            values.push(&agent_id);
            for svc in incoming {
                values.push(&svc.id);
            }
            stmt.execute(values.as_slice())?;
        }

        let was_online = {
            let online: i64 = tx.query_row(
                "SELECT is_online FROM agents WHERE id = ?1",
                params![agent_id],
                |r| r.get(0),
            )?;
            online != 0
        };
        tx.execute(
            "UPDATE agents SET last_seen = NULL, is_online = 1 WHERE id = ?1",
            params![agent_id],
        )?;
        let services = Self::fetch_services(&tx, agent_id)?;
        let agent = Self::fetch_agent(&tx, agent_id)?;
        tx.commit()?;
        Ok((agent, services, !was_online))
    }

    fn add_service(&self, agent_id: AgentId, service: &AgentServiceReport) -> Result<Service, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO services (agent_id, service_id, name, description, version, schedule,
                                    last_status, last_message, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'unknown', '', NULL)
             ON CONFLICT(agent_id, service_id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                version = excluded.version,
                schedule = excluded.schedule",
            params![agent_id, service.id, service.name, service.description, service.version, service.schedule],
        )?;
        Self::fetch_service(&conn, agent_id, &service.id)
    }

    fn remove_service(&self, agent_id: AgentId, service_id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute(
            "DELETE FROM services WHERE agent_id = ?1 AND service_id = ?2",
            params![agent_id, service_id],
        )?;
        if affected == 0 {
            tracing::warn!(agent_id, service_id, "service not found for agent, ignoring remove");
        }
        Ok(affected > 0)
    }

    fn update_service_status(
        &self,
        agent_id: AgentId,
        service_id: &str,
        status: ServiceStatus,
        message: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<(Service, ServiceStatus)>, StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let old_status: Option<String> = tx
            .query_row(
                "SELECT last_status FROM services WHERE agent_id = ?1 AND service_id = ?2",
                params![agent_id, service_id],
                |r| r.get(0),
            )
            .optional()?;
        let Some(old_status) = old_status else {
            tracing::warn!(agent_id, service_id, "service not found for agent, ignoring status update");
            tx.commit()?;
            return Ok(None);
        };

        tx.execute(
            "UPDATE services SET last_status = ?1, last_message = ?2, last_seen = ?3
             WHERE agent_id = ?4 AND service_id = ?5",
            params![status_to_str(status), message, timestamp.to_rfc3339(), agent_id, service_id],
        )?;
        let service = Self::fetch_service(&tx, agent_id, service_id)?;
        tx.commit()?;
        Ok(Some((service, parse_service_status(&old_status)?)))
    }
}

fn apply_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")?;
    let current: i64 = conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;
    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i64;
        if version <= current {
            continue;
        }
        conn.execute_batch(migration)?;
        conn.execute("INSERT INTO schema_version (version) VALUES (?1)", params![version])?;
    }
    Ok(())
}

fn row_to_agent(row: &Row) -> rusqlite::Result<Agent> {
    let key: String = row.get(1)?;
    let status: String = row.get(4)?;
    let created_at: String = row.get(6)?;
    let last_seen: Option<String> = row.get(7)?;
    Ok(Agent {
        id: row.get(0)?,
        key: key.parse().map_err(|_| invalid_text(1))?,
        name: row.get(2)?,
        owner: row.get(3)?,
        registration_status: parse_registration_status(&status)?,
        ip_address: row.get(5)?,
        created_at: parse_dt_sql(&created_at)?,
        last_seen: last_seen.map(|s| parse_dt_sql(&s)).transpose()?,
        is_online: row.get::<_, i64>(8)? != 0,
        grace_period_secs: row.get::<_, i64>(9)? as u64,
    })
}

fn row_to_service(row: &Row) -> rusqlite::Result<Service> {
    let status: String = row.get(6)?;
    let last_seen: Option<String> = row.get(8)?;
    Ok(Service {
        agent_id: row.get(0)?,
        service_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        version: row.get(4)?,
        schedule: row.get(5)?,
        last_status: parse_service_status(&status)?,
        last_message: row.get(7)?,
        last_seen: last_seen.map(|s| parse_dt_sql(&s)).transpose()?,
    })
}

fn status_to_str(s: ServiceStatus) -> &'static str {
    match s {
        ServiceStatus::Ok => "ok",
        ServiceStatus::Warning => "warning",
        ServiceStatus::Error => "error",
        ServiceStatus::Update => "update",
        ServiceStatus::Failure => "failure",
        ServiceStatus::Unknown => "unknown",
    }
}

fn parse_service_status(s: &str) -> rusqlite::Result<ServiceStatus> {
    Ok(match s {
        "ok" => ServiceStatus::Ok,
        "warning" => ServiceStatus::Warning,
        "error" => ServiceStatus::Error,
        "update" => ServiceStatus::Update,
        "failure" => ServiceStatus::Failure,
        _ => ServiceStatus::Unknown,
    })
}

fn parse_registration_status(s: &str) -> rusqlite::Result<RegistrationStatus> {
    match s {
        "pending" => Ok(RegistrationStatus::Pending),
        "registered" => Ok(RegistrationStatus::Registered),
        "unregistered" => Ok(RegistrationStatus::Unregistered),
        _ => Err(invalid_text(4)),
    }
}

fn parse_dt_sql(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|_| invalid_text(0))
}

fn parse_dt(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|_| StoreError::Db(invalid_text(0)))
}

fn invalid_text(col: usize) -> rusqlite::Error {
    rusqlite::Error::InvalidColumnType(col, "expected well-formed text".into(), rusqlite::types::Type::Text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_types::collaborators::fakes::{FixedClock, SequentialCodeGen, SequentialUuidGen};
    use fleet_types::ServiceStatus;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory(
            Arc::new(FixedClock::new(Utc::now())),
            Arc::new(SequentialCodeGen::default()),
            Arc::new(SequentialUuidGen::default()),
            30,
        )
        .unwrap()
    }

    fn service_report(id: &str) -> AgentServiceReport {
        AgentServiceReport {
            id: id.into(),
            name: "nginx".into(),
            description: String::new(),
            version: "1.0".into(),
            schedule: String::new(),
        }
    }

    #[test]
    fn registration_round_trip_completes_and_polls_once() {
        let store = store();
        let reg = store.create_registration().unwrap();
        let agent = store.claim_registration(&reg.code, 7).unwrap();
        assert_eq!(agent.owner, Some(7));
        assert_eq!(agent.registration_status, RegistrationStatus::Pending);

        let agent = store.finalize_registration(agent.id).unwrap();
        assert_eq!(agent.registration_status, RegistrationStatus::Registered);

        match store.poll_registration(reg.reg_id).unwrap() {
            RegistrationPoll::Completed { key } => assert_eq!(key, agent.key),
            other => panic!("expected Completed, got {other:?}"),
        }
        assert!(matches!(
            store.poll_registration(reg.reg_id),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn five_wrong_codes_expire_the_outstanding_registration() {
        let store = store();
        let reg = store.create_registration().unwrap();

        for _ in 0..4 {
            assert!(matches!(
                store.claim_registration("000000", 7),
                Err(StoreError::InvalidCode)
            ));
        }
        assert!(matches!(
            store.claim_registration("000000", 7),
            Err(StoreError::TooManyAttempts)
        ));
        // even the correct code now fails, the registration expired.
        assert!(matches!(
            store.claim_registration(&reg.code, 7),
            Err(StoreError::InvalidCode)
        ));
    }

    #[test]
    fn sync_services_is_idempotent_and_marks_connected() {
        let store = store();
        let reg = store.create_registration().unwrap();
        let agent = store.claim_registration(&reg.code, 7).unwrap();
        store.finalize_registration(agent.id).unwrap();
        store.mark_disconnected(agent.id).unwrap();

        let reports = vec![service_report("svc-a"), service_report("svc-b")];
        let (_, services, became_online) = store.sync_services_and_connect(agent.id, &reports).unwrap();
        assert!(became_online);
        assert_eq!(services.len(), 2);

        // re-delivery of the same roster changes nothing.
        let (_, services2, became_online2) = store.sync_services_and_connect(agent.id, &reports).unwrap();
        assert!(!became_online2);
        assert_eq!(services2.len(), 2);

        // dropping svc-b removes exactly that row.
        let (_, services3, _) = store
            .sync_services_and_connect(agent.id, &[service_report("svc-a")])
            .unwrap();
        assert_eq!(services3.len(), 1);
        assert_eq!(services3[0].service_id, "svc-a");
    }

    #[test]
    fn update_service_status_returns_pre_image() {
        let store = store();
        let reg = store.create_registration().unwrap();
        let agent = store.claim_registration(&reg.code, 7).unwrap();
        store.finalize_registration(agent.id).unwrap();
        store
            .sync_services_and_connect(agent.id, &[service_report("svc-a")])
            .unwrap();

        let (service, old) = store
            .update_service_status(agent.id, "svc-a", ServiceStatus::Error, "crash", Utc::now())
            .unwrap()
            .expect("service exists");
        assert_eq!(old, ServiceStatus::Unknown);
        assert_eq!(service.last_status, ServiceStatus::Error);

        assert!(
            store
                .update_service_status(agent.id, "missing", ServiceStatus::Ok, "", Utc::now())
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn remove_service_is_idempotent() {
        let store = store();
        let reg = store.create_registration().unwrap();
        let agent = store.claim_registration(&reg.code, 7).unwrap();
        store.finalize_registration(agent.id).unwrap();
        store
            .sync_services_and_connect(agent.id, &[service_report("svc-a")])
            .unwrap();

        assert!(store.remove_service(agent.id, "svc-a").unwrap());
        assert!(!store.remove_service(agent.id, "svc-a").unwrap());
        assert!(store.list_services(agent.id).unwrap().is_empty());
    }

    #[test]
    fn unregister_twice_is_equivalent_to_once() {
        let store = store();
        let reg = store.create_registration().unwrap();
        let agent = store.claim_registration(&reg.code, 7).unwrap();
        store.finalize_registration(agent.id).unwrap();
        store
            .sync_services_and_connect(agent.id, &[service_report("svc-a")])
            .unwrap();

        store.unregister(agent.id).unwrap();
        store.unregister(agent.id).unwrap();
        let agent = store.get_agent(agent.id).unwrap();
        assert_eq!(agent.registration_status, RegistrationStatus::Unregistered);
        assert!(store.list_services(agent.id).unwrap().is_empty());
    }
}
