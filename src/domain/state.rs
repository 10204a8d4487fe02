use serde::{Deserialize, Serialize};
use std::fmt;

/// Healing state machine, one instance per ErrorEvent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HealingPhase {
    /// Event classified, nothing attempted yet
    Detected,
    /// Ranking candidate strategies
    Selecting,
    /// Running a strategy
    Applying,
    /// Confirming the strategy actually fixed the endpoint
    Verifying,
    /// A strategy succeeded and was verified
    Resolved,
    /// No strategy succeeded within the attempt budget
    Exhausted,
}

impl HealingPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealingPhase::Detected => "DETECTED",
            HealingPhase::Selecting => "SELECTING",
            HealingPhase::Applying => "APPLYING",
            HealingPhase::Verifying => "VERIFYING",
            HealingPhase::Resolved => "RESOLVED",
            HealingPhase::Exhausted => "EXHAUSTED",
        }
    }

    /// Check if this phase can transition to another phase
    pub fn can_transition_to(&self, target: HealingPhase) -> bool {
        use HealingPhase::*;

        match (self, target) {
            (Detected, Selecting) => true,

            (Selecting, Applying) => true,
            (Selecting, Exhausted) => true, // No candidates

            (Applying, Verifying) => true,  // Strategy reported success
            (Applying, Applying) => true,   // Failed, next candidate
            (Applying, Exhausted) => true,  // Budget spent or cancelled

            (Verifying, Resolved) => true,
            (Verifying, Applying) => true,  // Verification failed, next candidate
            (Verifying, Exhausted) => true, // Verification failed on last attempt

            _ => false,
        }
    }

    /// Get valid next phases from the current phase
    pub fn valid_transitions(&self) -> Vec<HealingPhase> {
        use HealingPhase::*;

        match self {
            Detected => vec![Selecting],
            Selecting => vec![Applying, Exhausted],
            Applying => vec![Verifying, Applying, Exhausted],
            Verifying => vec![Resolved, Applying, Exhausted],
            Resolved | Exhausted => vec![],
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, HealingPhase::Resolved | HealingPhase::Exhausted)
    }
}

impl fmt::Display for HealingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for HealingPhase {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "DETECTED" => Ok(HealingPhase::Detected),
            "SELECTING" => Ok(HealingPhase::Selecting),
            "APPLYING" => Ok(HealingPhase::Applying),
            "VERIFYING" => Ok(HealingPhase::Verifying),
            "RESOLVED" => Ok(HealingPhase::Resolved),
            "EXHAUSTED" => Ok(HealingPhase::Exhausted),
            _ => Err(format!("Unknown healing phase: {}", s)),
        }
    }
}

/// Phase transition record (for logging/debugging)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: HealingPhase,
    pub to: HealingPhase,
    pub reason: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl PhaseTransition {
    pub fn new(from: HealingPhase, to: HealingPhase, reason: impl Into<String>) -> Self {
        Self {
            from,
            to,
            reason: reason.into(),
            timestamp: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        use HealingPhase::*;

        assert!(Detected.can_transition_to(Selecting));
        assert!(Selecting.can_transition_to(Applying));
        assert!(Selecting.can_transition_to(Exhausted));
        assert!(Applying.can_transition_to(Verifying));
        assert!(Applying.can_transition_to(Applying));
        assert!(Verifying.can_transition_to(Resolved));
        assert!(Verifying.can_transition_to(Applying));

        assert!(!Detected.can_transition_to(Resolved));
        assert!(!Applying.can_transition_to(Resolved));
        assert!(!Resolved.can_transition_to(Applying));
        assert!(!Exhausted.can_transition_to(Selecting));
    }

    #[test]
    fn test_valid_transitions_agree_with_can_transition() {
        use HealingPhase::*;

        for from in [Detected, Selecting, Applying, Verifying, Resolved, Exhausted] {
            for to in from.valid_transitions() {
                assert!(from.can_transition_to(to), "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn test_phase_from_str() {
        assert_eq!(
            HealingPhase::try_from("verifying").unwrap(),
            HealingPhase::Verifying
        );
        assert!(HealingPhase::try_from("INVALID").is_err());
    }

    #[test]
    fn test_terminal_phases() {
        assert!(HealingPhase::Resolved.is_terminal());
        assert!(HealingPhase::Exhausted.is_terminal());
        assert!(!HealingPhase::Applying.is_terminal());
    }
}
