//! Request context threaded through every domain call.
//!
//! Principal extraction happens exactly once, at the pipeline boundary; the
//! context is read-only afterwards. Services check the deadline before
//! opening a transaction so a cancelled caller never commits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ArxError, Result};

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: i64,
    pub username: String,
}

impl Principal {
    pub fn new(user_id: i64, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
        }
    }
}

/// Opaque per-request value carrying the principal and an optional deadline.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    principal: Option<Principal>,
    deadline: Option<DateTime<Utc>>,
}

impl RequestContext {
    /// Context for an unauthenticated request (health checks, login flows).
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated(principal: Principal) -> Self {
        Self {
            principal: Some(principal),
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    /// The principal, or `Unauthenticated` if the request carries none.
    pub fn require_principal(&self) -> Result<&Principal> {
        self.principal
            .as_ref()
            .ok_or_else(|| ArxError::unauthenticated("no credential presented"))
    }

    pub fn user_id(&self) -> Option<i64> {
        self.principal.as_ref().map(|p| p.user_id)
    }

    /// Errors with `Cancelled` once the deadline has passed. Checked before
    /// transaction commit so cancellation never produces a success audit.
    pub fn check_deadline(&self) -> Result<()> {
        match self.deadline {
            Some(deadline) if Utc::now() >= deadline => Err(ArxError::Cancelled),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn anonymous_has_no_principal() {
        let ctx = RequestContext::anonymous();
        assert!(ctx.principal().is_none());
        assert!(ctx.require_principal().is_err());
    }

    #[test]
    fn deadline_in_future_passes() {
        let ctx = RequestContext::authenticated(Principal::new(1, "alice"))
            .with_deadline(Utc::now() + Duration::seconds(30));
        assert!(ctx.check_deadline().is_ok());
    }

    #[test]
    fn deadline_in_past_cancels() {
        let ctx = RequestContext::authenticated(Principal::new(1, "alice"))
            .with_deadline(Utc::now() - Duration::seconds(1));
        assert!(matches!(ctx.check_deadline(), Err(ArxError::Cancelled)));
    }
}
