//! Response selection over a complete outcome set.

use serde::{Deserialize, Serialize};

use crate::dispatch::UpstreamOutcome;

/// Which non-2xx response to relay when no endpoint answered successfully.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackPolicy {
    /// The endpoint listed first by discovery. Stable across runs.
    #[default]
    DiscoveryOrder,
    /// The response that arrived last.
    LastCompleted,
}

/// What the handler should send back.
#[derive(Debug)]
pub enum ProxyDecision {
    Relay(UpstreamOutcome),
    /// No endpoint is usable; answered with an empty 404.
    NotFound,
}

impl ProxyDecision {
    /// True when there is nothing to relay.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProxyDecision::NotFound)
    }

    pub fn outcome(&self) -> Option<&UpstreamOutcome> {
        match self {
            ProxyDecision::Relay(outcome) => Some(outcome),
            ProxyDecision::NotFound => None,
        }
    }
}

/// Picks one outcome to relay.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseSelector {
    fallback: FallbackPolicy,
}

impl ResponseSelector {
    pub fn new(fallback: FallbackPolicy) -> Self {
        Self { fallback }
    }

    /// Select from a finished outcome set.
    ///
    /// The first 2xx by completion order wins. Without one, a response with
    /// any other status is chosen by the fallback policy. Outcomes that never
    /// produced a response (network error, timeout) are never relayed.
    pub fn select(&self, mut outcomes: Vec<UpstreamOutcome>) -> ProxyDecision {
        outcomes.sort_by_key(|o| o.completion_rank);

        if let Some(pos) = outcomes.iter().position(UpstreamOutcome::is_success) {
            return ProxyDecision::Relay(outcomes.swap_remove(pos));
        }

        let responded = outcomes.iter().enumerate().filter(|(_, o)| o.result.is_ok());
        let chosen = match self.fallback {
            FallbackPolicy::DiscoveryOrder => responded.min_by_key(|(_, o)| o.slot),
            FallbackPolicy::LastCompleted => responded.max_by_key(|(_, o)| o.completion_rank),
        }
        .map(|(pos, _)| pos);

        match chosen {
            Some(pos) => ProxyDecision::Relay(outcomes.swap_remove(pos)),
            None => ProxyDecision::NotFound,
        }
    }
}
