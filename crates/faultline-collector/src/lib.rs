//! Faultline Collector - HTTP adapter for the collector-client port
//!
//! Default [`CollectorClient`](faultline_core::ports::CollectorClient)
//! implementation over `reqwest`. The delivery worker is the only caller;
//! nothing here ever runs on the crash path.

pub mod client;

pub use client::HttpCollector;
