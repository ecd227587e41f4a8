//! Audit recorder queries. Appends happen inside the other services; this
//! service only reads, gated on `audit.read`.

use arx_rbac::Rbac;
use arx_store::Store;
use arx_types::{
    Action, AuditEvent, AuditFilter, Page, Permission, RbacAuditEvent, RequestContext, Resource,
    Result,
};

#[derive(Clone)]
pub struct AuditService {
    store: Store,
    rbac: Rbac,
}

impl AuditService {
    pub fn new(store: Store, rbac: Rbac) -> Self {
        Self { store, rbac }
    }

    fn require_read(&self, ctx: &RequestContext, namespace_id: Option<i64>) -> Result<()> {
        self.rbac.require(
            ctx,
            Permission::new(Resource::Audit, Action::Read),
            namespace_id,
        )
    }

    /// General stream: `secret_*`, `share_*`, and authentication events.
    pub fn query(&self, ctx: &RequestContext, filter: &AuditFilter) -> Result<Page<AuditEvent>> {
        self.require_read(ctx, filter.namespace_id)?;
        self.store.query_events(ctx, filter, false)
    }

    /// RBAC stream: role lifecycle and assignment changes.
    pub fn query_rbac(
        &self,
        ctx: &RequestContext,
        filter: &AuditFilter,
    ) -> Result<Page<RbacAuditEvent>> {
        self.require_read(ctx, filter.namespace_id)?;
        let page = self.store.query_events(ctx, filter, true)?;
        Ok(page.map(RbacAuditEvent::from))
    }

    /// Batch for the streaming tail: events with id greater than
    /// `after_id`, oldest first.
    pub fn tail(&self, ctx: &RequestContext, after_id: i64, limit: u32) -> Result<Vec<AuditEvent>> {
        self.require_read(ctx, None)?;
        self.store.events_after(ctx, after_id, limit.clamp(1, 500))
    }
}
