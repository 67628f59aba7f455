//! Hysteretic escalation counters.
//!
//! Two independent counters live in every session. The emergency counter
//! needs a sustained signal before it fires; the manual-call counter fires on
//! a single button press with the default threshold.

use crate::collector::types::SampleFlags;
use crate::core::identity::PatientIdentity;
use serde::{Deserialize, Serialize};

/// Default number of emergency-flagged messages needed to escalate.
pub const DEFAULT_EMERGENCY_THRESHOLD: u32 = 3;

/// Default number of manual-call messages needed to escalate.
pub const DEFAULT_CALL_THRESHOLD: u32 = 1;

/// What happens to a counter on a message without its flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterDecay {
    /// Step one toward zero
    #[default]
    Decay,
    /// Drop straight to zero
    Reset,
}

impl CounterDecay {
    /// Parse `decay` / `reset` (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "decay" => Some(CounterDecay::Decay),
            "reset" => Some(CounterDecay::Reset),
            _ => None,
        }
    }

    fn apply(self, counter: u32) -> u32 {
        match self {
            CounterDecay::Decay => counter.saturating_sub(1),
            CounterDecay::Reset => 0,
        }
    }
}

/// Thresholds and decay policy shared by all sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    pub emergency_threshold: u32,
    pub call_threshold: u32,
    pub decay: CounterDecay,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            emergency_threshold: DEFAULT_EMERGENCY_THRESHOLD,
            call_threshold: DEFAULT_CALL_THRESHOLD,
            decay: CounterDecay::Decay,
        }
    }
}

/// Which threshold was crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationKind {
    Emergency,
    Call,
}

impl EscalationKind {
    pub fn priority(self) -> Priority {
        match self {
            EscalationKind::Emergency => Priority::High,
            EscalationKind::Call => Priority::Normal,
        }
    }
}

impl std::fmt::Display for EscalationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EscalationKind::Emergency => write!(f, "emergency"),
            EscalationKind::Call => write!(f, "call"),
        }
    }
}

/// Urgency requested from the peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Normal,
    High,
}

/// A crossed threshold bound to the number that should be dialled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationDecision {
    pub kind: EscalationKind,
    /// Emergency contact, else doctor, else none
    pub phone: Option<String>,
    pub priority: Priority,
}

impl EscalationDecision {
    /// Bind `kind` to the best contact number `identity` offers.
    pub fn for_identity(kind: EscalationKind, identity: &PatientIdentity) -> Self {
        Self {
            kind,
            phone: identity.preferred_phone().map(str::to_string),
            priority: kind.priority(),
        }
    }
}

/// Per-session emergency and manual-call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EscalationTracker {
    emergency: u32,
    call: u32,
}

impl EscalationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one message's flags into the counters.
    ///
    /// A crossed counter resets to zero before returning, whatever happens to
    /// the resulting actuation. When both cross on the same message a single
    /// emergency escalation is returned and both counters reset.
    pub fn update(&mut self, flags: &SampleFlags, policy: &EscalationPolicy) -> Option<EscalationKind> {
        self.emergency = if flags.emergency {
            self.emergency.saturating_add(1)
        } else {
            policy.decay.apply(self.emergency)
        };

        self.call = if flags.manual_call {
            self.call.saturating_add(1)
        } else {
            policy.decay.apply(self.call)
        };

        let emergency_crossed = self.emergency >= policy.emergency_threshold.max(1);
        let call_crossed = self.call >= policy.call_threshold.max(1);

        tracing::debug!(
            emergency = self.emergency,
            call = self.call,
            "escalation counters updated"
        );

        if emergency_crossed {
            self.emergency = 0;
            if call_crossed {
                self.call = 0;
            }
            Some(EscalationKind::Emergency)
        } else if call_crossed {
            self.call = 0;
            Some(EscalationKind::Call)
        } else {
            None
        }
    }

    pub fn emergency_count(&self) -> u32 {
        self.emergency
    }

    pub fn call_count(&self) -> u32 {
        self.call
    }
}
