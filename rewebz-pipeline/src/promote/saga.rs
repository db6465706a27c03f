//! Compensation stack for the promotion saga.
//!
//! Each step that brings a resource into existence pushes the action that
//! undoes it. On failure the stack is popped in reverse. Resources that
//! already existed are never pushed, so they are never undone.

use std::fmt;

use crate::dns::DnsRecordManager;
use crate::domain::DomainAttachmentManager;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    DeleteDnsRecord { host: String, record_id: String },
    DetachDomain { host: String },
}

impl fmt::Display for Compensation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compensation::DeleteDnsRecord { host, record_id } => {
                write!(f, "delete dns record {record_id} ({host})")
            }
            Compensation::DetachDomain { host } => write!(f, "detach domain {host}"),
        }
    }
}

/// Resources this run created, as reported on failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreatedResources {
    pub dns_record_id: Option<String>,
    pub domain_host: Option<String>,
}

impl CreatedResources {
    pub fn is_empty(&self) -> bool {
        self.dns_record_id.is_none() && self.domain_host.is_none()
    }
}

impl fmt::Display for CreatedResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dns_record={}, domain_attachment={}",
            self.dns_record_id.as_deref().unwrap_or("none"),
            self.domain_host.as_deref().unwrap_or("none"),
        )
    }
}

/// What rollback managed to undo.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackOutcome {
    pub undone: Vec<Compensation>,
    pub failed: Vec<(Compensation, String)>,
}

impl RollbackOutcome {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

impl fmt::Display for RollbackOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.undone.is_empty() && self.failed.is_empty() {
            return write!(f, "nothing to undo");
        }
        let mut parts: Vec<String> = self.undone.iter().map(|c| format!("{c}: ok")).collect();
        parts.extend(self.failed.iter().map(|(c, e)| format!("{c}: failed ({e})")));
        write!(f, "{}", parts.join("; "))
    }
}

#[derive(Debug, Default)]
pub struct CompensationStack {
    actions: Vec<Compensation>,
}

impl CompensationStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: Compensation) {
        self.actions.push(action);
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn created(&self) -> CreatedResources {
        let mut out = CreatedResources::default();
        for action in &self.actions {
            match action {
                Compensation::DeleteDnsRecord { record_id, .. } => {
                    out.dns_record_id = Some(record_id.clone());
                }
                Compensation::DetachDomain { host } => out.domain_host = Some(host.clone()),
            }
        }
        out
    }

    /// Pop and run every compensation. Failures are logged and collected,
    /// never returned as errors.
    pub async fn unwind(
        &mut self,
        dns: &DnsRecordManager,
        domains: &DomainAttachmentManager,
    ) -> RollbackOutcome {
        let mut outcome = RollbackOutcome::default();
        while let Some(action) = self.actions.pop() {
            let result = match &action {
                Compensation::DetachDomain { host } => domains.remove(host).await,
                Compensation::DeleteDnsRecord { record_id, .. } => {
                    dns.delete_record(record_id).await
                }
            };
            match result {
                Ok(()) => {
                    tracing::info!(action = %action, "Rolled back");
                    outcome.undone.push(action);
                }
                Err(e) => {
                    tracing::warn!(action = %action, error = %e, "Rollback step failed");
                    outcome.failed.push((action, e.to_string()));
                }
            }
        }
        outcome
    }
}
