//! Breadcrumb collaborator port
//!
//! UI trace capture lives entirely outside the pipeline; the worker pulls
//! a session's trace entries right before a record leaves the machine, so
//! the crash path never pays for breadcrumb serialization.

use crate::domain::{Breadcrumb, SessionId};

/// Supplies the ordered UI trace entries recorded for a session
pub trait BreadcrumbSource: Send + Sync {
    /// Returns the trace entries for `session_id`, oldest first.
    fn traces_report(&self, session_id: &SessionId) -> Vec<Breadcrumb>;
}

/// Default source for hosts without UI tracing; reports nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBreadcrumbs;

impl BreadcrumbSource for NoBreadcrumbs {
    fn traces_report(&self, _session_id: &SessionId) -> Vec<Breadcrumb> {
        Vec::new()
    }
}
