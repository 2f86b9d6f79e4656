use std::sync::Arc;

use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use tracing::warn;
use ulid::Ulid;

use crate::engine::Engine;
use crate::observability;
use crate::session::Session;

/// Map a login name to a session: the configured admin user, or the ULID of a
/// registered profile. Anything else has no session.
pub fn resolve_session(engine: &Engine, admin_user: &str, login: &str) -> Option<Session> {
    if login == admin_user {
        return Some(Session::Admin);
    }
    let id = Ulid::from_string(login).ok()?;
    let profile = engine.get_profile(&id)?;
    Some(Session::User { id, role: profile.role })
}

/// Shared-password auth that also refuses logins with no session.
#[derive(Clone)]
pub struct CarebookAuthSource {
    password: String,
    admin_user: String,
    engine: Arc<Engine>,
}

impl CarebookAuthSource {
    pub fn new(engine: Arc<Engine>, password: String, admin_user: String) -> Self {
        Self { password, admin_user, engine }
    }
}

impl std::fmt::Debug for CarebookAuthSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CarebookAuthSource")
            .field("admin_user", &self.admin_user)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AuthSource for CarebookAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        let user = login.user().unwrap_or_default();
        if resolve_session(&self.engine, &self.admin_user, user).is_none() {
            warn!("login refused for unknown user {user:?}");
            metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
            return Err(PgWireError::UserError(Box::new(ErrorInfo::new(
                "FATAL".into(),
                "28000".into(),
                format!("unknown user {user}"),
            ))));
        }
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
