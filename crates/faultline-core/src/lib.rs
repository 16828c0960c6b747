//! Faultline Core - Domain model and port definitions
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `Record`, `Origin`, `ThreadSnapshot`, `Breadcrumb`
//! - **Configuration** - typed config with YAML loading and validation
//! - **Error taxonomy** - `TelemetryError` covering the pipeline's failure modes
//! - **Port definitions** - Traits for adapters: `CollectorClient`,
//!   `BreadcrumbSource`, `PeriodicScheduler`, host listeners
//!
//! # Architecture
//!
//! The domain module contains pure data types with no I/O. Ports define
//! trait interfaces for the external collaborators the pipeline talks to
//! (remote collector, breadcrumb tracer, host scheduler); their
//! implementations live in adapter crates or in the host application.

pub mod config;
pub mod domain;
pub mod ports;
