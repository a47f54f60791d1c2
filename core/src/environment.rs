//! Collaborators the scheduler consumes but does not own.
//!
//! - [`Clock`]: time source, swapped for a fixed clock in tests
//! - [`Operator`]: the authenticated agent acting on a request

use crate::error::SchedulingError;
use crate::types::AgentId;
use chrono::{DateTime, Utc};

/// Clock trait - abstracts time operations for testability
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// The authenticated operator performing a booking or reschedule.
///
/// Identity issuance happens upstream; the scheduler only reads the agent's
/// registration number from it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Operator {
    agent_id: AgentId,
}

impl Operator {
    /// Operator acting as `agent_id`.
    #[must_use]
    pub const fn new(agent_id: AgentId) -> Self {
        Self { agent_id }
    }

    /// Resolve the operator from the caller's registration-number claim.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulingError::ValidationFailed`] when the claim is absent, not an
    /// integer, or not a valid agent key.
    pub fn from_registration_claim(claim: Option<&str>) -> Result<Self, SchedulingError> {
        let raw = claim
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| SchedulingError::validation("operator registration claim is missing"))?;

        let agent_id = raw.parse::<i64>().map(AgentId::new).map_err(|_| {
            SchedulingError::validation(format!("operator registration `{raw}` is not a number"))
        })?;

        if !agent_id.is_valid() {
            return Err(SchedulingError::validation(format!(
                "operator registration must be positive, got {agent_id}"
            )));
        }

        Ok(Self::new(agent_id))
    }

    /// The acting agent.
    #[must_use]
    pub const fn agent_id(&self) -> AgentId {
        self.agent_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_registration_claim() {
        let operator = Operator::from_registration_claim(Some(" 4821 "));
        assert_eq!(operator.ok().map(|o| o.agent_id()), Some(AgentId::new(4821)));
    }

    #[test]
    fn rejects_missing_or_malformed_claims() {
        for claim in [None, Some(""), Some("abc"), Some("-2"), Some("0")] {
            assert!(
                matches!(
                    Operator::from_registration_claim(claim),
                    Err(SchedulingError::ValidationFailed(_))
                ),
                "claim {claim:?} should be rejected"
            );
        }
    }
}
