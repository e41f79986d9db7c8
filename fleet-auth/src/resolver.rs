//! `Auth.ResolveUser` (spec §6): request → `UserID | Unauthenticated`.
//! Grounded on `hr-auth/src/middleware.rs`'s `AuthUser` extractor
//! (cookie lookup → store validate → user) and `hr-auth/src/sessions.rs`'s
//! `SessionStore` (`Mutex<Connection>`, expiry + inactivity timeout,
//! periodic cleanup). This system doesn't own user accounts — sessions
//! are handed out by an external identity provider and merely need to
//! resolve to a `UserId` here — so unlike the teacher there is no
//! `UserStore`/password/groups layer, only the session→user mapping.

use std::sync::Mutex;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::Json;
use axum_extra::extract::CookieJar;
use fleet_types::UserId;
use rusqlite::{params, Connection};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

pub const SESSION_COOKIE: &str = "fleet_session";
pub const SESSION_HEADER: &str = "X-Session-Token";

/// `Auth.ResolveUser` as a trait, so the core stays testable against a
/// fake resolver (spec.md §9's "constructor-injected collaborators").
#[async_trait::async_trait]
pub trait UserResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> Option<UserId>;
}

/// Default `UserResolver`: opaque session tokens in a sqlite table,
/// same shape as `hr-auth::sessions::SessionStore` minus the
/// displayname/groups/password fields this system has no use for.
pub struct SessionAuth {
    conn: Mutex<Connection>,
}

impl SessionAuth {
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, rusqlite::Error> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                token TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions(expires_at);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Issues a session token for `user_id`, valid for `ttl_secs`.
    /// Exercised by tests and by whatever external login flow mints
    /// sessions ahead of this module (out of scope per spec.md §1's
    /// "authorization beyond ownership of a record").
    pub fn issue(&self, user_id: UserId, ttl_secs: i64, token: &str) -> Result<(), rusqlite::Error> {
        let expires_at = chrono::Utc::now().timestamp() + ttl_secs;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO sessions (token, user_id, expires_at) VALUES (?1, ?2, ?3)",
            params![token, user_id, expires_at],
        )?;
        Ok(())
    }

    pub fn revoke(&self, token: &str) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
        Ok(())
    }

    fn lookup(&self, token: &str) -> Option<UserId> {
        let conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().timestamp();
        let result: Result<(UserId, i64), _> = conn.query_row(
            "SELECT user_id, expires_at FROM sessions WHERE token = ?1",
            params![token],
            |row| Ok((row.get(0)?, row.get(1)?)),
        );
        match result {
            Ok((user_id, expires_at)) if expires_at >= now => Some(user_id),
            Ok(_) => {
                drop(conn);
                let _ = self.revoke(token);
                None
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(err) => {
                tracing::warn!(%err, "session lookup failed");
                None
            }
        }
    }

    /// Mirrors `AuthService::start_cleanup_task`'s periodic sweep.
    pub fn cleanup_expired(&self) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM sessions WHERE expires_at < ?1",
            params![chrono::Utc::now().timestamp()],
        )?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl UserResolver for SessionAuth {
    async fn resolve(&self, token: &str) -> Option<UserId> {
        self.lookup(token)
    }
}

/// Extracted authenticated user, resolved from either the session
/// cookie or the `X-Session-Token` header (spec.md §6), mirroring
/// `hr-auth::middleware::AuthUser`'s `FromRequestParts` shape.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub UserId);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    Arc<dyn UserResolver>: FromRef<S>,
{
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let token = jar
            .get(SESSION_COOKIE)
            .map(|c| c.value().to_string())
            .or_else(|| {
                parts
                    .headers
                    .get(SESSION_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            });

        let Some(token) = token else {
            return Err(unauthenticated());
        };

        let resolver = Arc::<dyn UserResolver>::from_ref(state);

        resolver
            .resolve(&token)
            .await
            .map(AuthUser)
            .ok_or_else(unauthenticated)
    }
}

fn unauthenticated() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "unauthenticated" })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_a_freshly_issued_token() {
        let auth = SessionAuth::open_in_memory().unwrap();
        auth.issue(42, 3600, "tok-1").unwrap();
        assert_eq!(auth.resolve("tok-1").await, Some(42));
    }

    #[tokio::test]
    async fn rejects_unknown_token() {
        let auth = SessionAuth::open_in_memory().unwrap();
        assert_eq!(auth.resolve("nope").await, None);
    }

    #[tokio::test]
    async fn expired_token_is_revoked_on_lookup() {
        let auth = SessionAuth::open_in_memory().unwrap();
        auth.issue(7, -1, "stale").unwrap();
        assert_eq!(auth.resolve("stale").await, None);
        // Second lookup finds no row at all (already swept by the first).
        assert_eq!(auth.resolve("stale").await, None);
    }
}
