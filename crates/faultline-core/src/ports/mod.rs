//! Port definitions (hexagonal architecture interfaces)
//!
//! Several collaborators live outside the pipeline core: the HTTP
//! transport, UI breadcrumb capture, host lifecycle detection and OS-level
//! periodic scheduling. Each is represented here as a trait the host (or an
//! adapter crate) implements; the pipeline only ever sees the interface.
//!
//! ## Ports Overview
//!
//! - [`CollectorClient`] - asynchronous submission to the remote collector
//! - [`BreadcrumbSource`] - UI trace entries pulled at delivery time
//! - [`CrashListener`] / [`PreviousReportsListener`] - host callbacks
//! - [`PeriodicScheduler`] - periodic delivery trigger registration
//! - [`LifecycleProbe`] - foreground/background observation
//! - [`ThreadDumpSource`] - stacks of other live threads at capture time

pub mod breadcrumbs;
pub mod collector;
pub mod host;
pub mod scheduler;

pub use breadcrumbs::{BreadcrumbSource, NoBreadcrumbs};
pub use collector::{CollectorClient, CollectorResponse, Disposition};
pub use host::{
    AlwaysForeground, CrashListener, LifecycleProbe, NoThreadDump, PreviousReportsListener,
    ThreadDumpSource,
};
pub use scheduler::{DeliveryTrigger, NoScheduler, PeriodicScheduler};
