use serde::{Deserialize, Serialize};

/// Result of a nested mutation.
///
/// Updates and deletes that target a missing node, container, phase or task
/// are silent no-ops on the wire. Internally they report `NoMatchFound` so
/// callers and tests can tell the two apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Applied,
    NoMatchFound,
}

impl Outcome {
    pub fn from_matches(count: usize) -> Self {
        if count > 0 {
            Outcome::Applied
        } else {
            Outcome::NoMatchFound
        }
    }

    pub fn is_applied(self) -> bool {
        self == Outcome::Applied
    }
}
