//! Preview → production promotion.
//!
//! Steps, strictly in order: resolve the target, verify the preview source,
//! upsert the production CNAME, attach the production domain, wait for the
//! domain to be ready, HEAD-probe production, verify production content,
//! persist. Anything that fails after the CNAME step unwinds what this run
//! created.

mod orchestrator;
mod saga;

pub use orchestrator::{PromotionConfig, PromotionFailure, PromotionReport, Promoter};
pub use saga::{Compensation, CompensationStack, CreatedResources, RollbackOutcome};
