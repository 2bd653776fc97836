//! Consent crawler: CMP presence probing, browser-driven consent extraction
//! and cookie/purpose matching for privacy measurement.
//!
//! The three engines share one [`fingerprint::FingerprintRegistry`] and one
//! persisted record schema ([`store`]):
//!
//! - [`probe`] classifies CMP presence from plain HTTP responses, running each
//!   domain in an isolated worker.
//! - [`extract`] drives one browser session per domain through a fixed
//!   sequence of phases and captures cookies and declared purposes.
//! - [`matcher`] joins the stored cookies with their declarations into
//!   canonical, normalised export records.

pub mod config;
pub mod error;
pub mod extract;
pub mod fingerprint;
pub mod matcher;
pub mod probe;
pub mod resolve;
pub mod shutdown;
pub mod store;
pub mod types;

pub use config::{ExtractorConfig, MatchConfig, ProbeConfig};
pub use error::{CrawlError, Result};
pub use fingerprint::FingerprintRegistry;
pub use shutdown::{Shutdown, ShutdownTrigger};
pub use types::*;
