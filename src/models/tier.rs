//! Cost/capability tiers
//!
//! Models are grouped into three tiers. Escalation always moves one step up
//! (free → cheap → premium) and never down.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Cost/capability class of a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Zero listed price
    Free,
    /// Priced at or under the configured cheap ceiling
    Cheap,
    /// Everything else; planning calls run here
    Premium,
}

impl Tier {
    /// All tiers, cheapest first
    pub const ALL: [Tier; 3] = [Tier::Free, Tier::Cheap, Tier::Premium];

    /// Label used in logs, metrics and JSON
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Cheap => "cheap",
            Tier::Premium => "premium",
        }
    }

    /// The tier a request escalates to when this one has no usable candidate
    pub fn escalate(self) -> Option<Tier> {
        match self {
            Tier::Free => Some(Tier::Cheap),
            Tier::Cheap => Some(Tier::Premium),
            Tier::Premium => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
