//! Tenant record stages and the promotion state machine.

use std::fmt;
use std::str::FromStr;

/// Pipeline stage persisted on a tenant record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    New,
    DnsDone,
    DnsError,
    DesignDone,
    DesignError,
    DevDone,
    DevError,
    /// Legacy stage from before the verification runner existed.
    OpenDone,
    VerifyError,
    Live,
    PromoteError,
    Promoted,
}

impl Stage {
    pub const ALL: [Stage; 12] = [
        Stage::New,
        Stage::DnsDone,
        Stage::DnsError,
        Stage::DesignDone,
        Stage::DesignError,
        Stage::DevDone,
        Stage::DevError,
        Stage::OpenDone,
        Stage::VerifyError,
        Stage::Live,
        Stage::PromoteError,
        Stage::Promoted,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Stage::New => "NEW",
            Stage::DnsDone => "DNS_DONE",
            Stage::DnsError => "DNS_ERROR",
            Stage::DesignDone => "DESIGN_DONE",
            Stage::DesignError => "DESIGN_ERROR",
            Stage::DevDone => "DEV_DONE",
            Stage::DevError => "DEV_ERROR",
            Stage::OpenDone => "OPEN_DONE",
            Stage::VerifyError => "VERIFY_ERROR",
            Stage::Live => "LIVE",
            Stage::PromoteError => "PROMOTE_ERROR",
            Stage::Promoted => "PROMOTED",
        }
    }

    /// Stages reachable in one write from `self`. Staying put is always
    /// allowed and is not listed.
    pub const fn successors(self) -> &'static [Stage] {
        match self {
            Stage::New => &[Stage::DnsDone, Stage::DnsError],
            Stage::DnsError => &[Stage::DnsDone, Stage::New],
            Stage::DnsDone => &[Stage::DesignDone, Stage::DesignError],
            Stage::DesignError => &[Stage::DesignDone, Stage::DnsDone],
            Stage::DesignDone => &[Stage::DevDone, Stage::DevError],
            Stage::DevError => &[Stage::DevDone, Stage::DesignDone],
            Stage::DevDone | Stage::OpenDone => &[
                Stage::Live,
                Stage::VerifyError,
                Stage::Promoted,
                Stage::PromoteError,
            ],
            Stage::VerifyError => &[Stage::Live, Stage::DevDone],
            Stage::Live => &[Stage::Promoted, Stage::PromoteError],
            Stage::PromoteError => &[Stage::Promoted, Stage::Live],
            Stage::Promoted => &[],
        }
    }

    pub fn can_transition(self, to: Stage) -> bool {
        self == to || self.successors().contains(&to)
    }

    /// Whether content at this stage has been built and may be cut over to
    /// production. The orchestrator re-verifies preview content itself, so
    /// `DEV_DONE` qualifies alongside `LIVE`.
    pub const fn is_promotable(self) -> bool {
        matches!(
            self,
            Stage::DevDone | Stage::Live | Stage::PromoteError | Stage::Promoted
        )
    }

    pub const fn is_error(self) -> bool {
        matches!(
            self,
            Stage::DnsError
                | Stage::DesignError
                | Stage::DevError
                | Stage::VerifyError
                | Stage::PromoteError
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown stage: {0}")]
pub struct UnknownStage(pub String);

impl FromStr for Stage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Stage::ALL
            .into_iter()
            .find(|st| st.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownStage(s.to_string()))
    }
}

/// Steps of a single promotion run, in the order they must happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PromotionStep {
    Resolve,
    SourceVerify,
    Dns,
    DomainAttach,
    DomainReady,
    Health,
    ProdVerify,
    Persist,
}

impl fmt::Display for PromotionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PromotionStep::Resolve => "resolve",
            PromotionStep::SourceVerify => "source-verify",
            PromotionStep::Dns => "dns",
            PromotionStep::DomainAttach => "domain-attach",
            PromotionStep::DomainReady => "domain-ready",
            PromotionStep::Health => "health",
            PromotionStep::ProdVerify => "prod-verify",
            PromotionStep::Persist => "persist",
        };
        f.write_str(s)
    }
}

/// Promotion state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromotionState {
    Unstarted,
    SourceVerified,
    DnsReady,
    DomainAttached,
    DomainConfigReady,
    HealthVerified,
    Promoted,
    Failed { at: PromotionStep, reason: String },
}

impl PromotionState {
    /// The only non-failure state that may follow this one.
    pub fn next(&self) -> Option<PromotionState> {
        match self {
            PromotionState::Unstarted => Some(PromotionState::SourceVerified),
            PromotionState::SourceVerified => Some(PromotionState::DnsReady),
            PromotionState::DnsReady => Some(PromotionState::DomainAttached),
            PromotionState::DomainAttached => Some(PromotionState::DomainConfigReady),
            PromotionState::DomainConfigReady => Some(PromotionState::HealthVerified),
            PromotionState::HealthVerified => Some(PromotionState::Promoted),
            PromotionState::Promoted | PromotionState::Failed { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PromotionState::Promoted | PromotionState::Failed { .. })
    }

    /// Move to `to`. Skipping a state or leaving a terminal state is a bug in
    /// the caller, reported as a validation error.
    pub fn advance(&mut self, to: PromotionState) -> Result<(), crate::error::ProvisionError> {
        let allowed = match &to {
            PromotionState::Failed { .. } => !self.is_terminal(),
            other => self.next().as_ref() == Some(other),
        };
        if !allowed {
            return Err(crate::error::ProvisionError::Validation(format!(
                "illegal promotion transition {self} -> {to}"
            )));
        }
        *self = to;
        Ok(())
    }
}

impl fmt::Display for PromotionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromotionState::Unstarted => write!(f, "UNSTARTED"),
            PromotionState::SourceVerified => write!(f, "SOURCE_VERIFIED"),
            PromotionState::DnsReady => write!(f, "DNS_READY"),
            PromotionState::DomainAttached => write!(f, "DOMAIN_ATTACHED"),
            PromotionState::DomainConfigReady => write!(f, "DOMAIN_CONFIG_READY"),
            PromotionState::HealthVerified => write!(f, "HEALTH_VERIFIED"),
            PromotionState::Promoted => write!(f, "PROMOTED"),
            PromotionState::Failed { at, reason } => write!(f, "FAILED({at}: {reason})"),
        }
    }
}
