//! rewebz-pipeline: provisioning and promotion for rewebz tenant sites.
//!
//! Tenants move through a stage machine, one batch runner per phase:
//! - DNS assignment: slug + preview CNAME
//! - Design and build: agent-written brief and page, stamped with a build marker
//! - Live verification: the preview really serves the marked page
//! - Promotion: preview → production cutover with rollback on failure

pub mod agent;
pub mod config;
pub mod dns;
pub mod domain;
pub mod error;
pub mod marker;
pub mod notify;
pub mod probe;
pub mod promote;
pub mod record;
pub mod resolve;
pub mod retry;
pub mod runners;
pub mod slug;
pub mod source;
pub mod stage;
pub mod store;
pub mod verify;

pub use error::{ProvisionError, Result};
