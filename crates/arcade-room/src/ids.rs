//! String identifiers issued by the match service.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier.
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            /// Borrow the raw identifier.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self(raw.to_string())
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self(raw)
            }
        }
    };
}

string_id!(
    /// Identifies one room (one running mini-game instance).
    RoomId
);
string_id!(
    /// Identifies an entity that can move, be voted on, or be eliminated:
    /// a racer, a movie card, a wheel sector.
    ParticipantId
);
string_id!(
    /// Identifies a signed-in user.
    UserId
);
string_id!(
    /// Opaque round token, strictly increasing per room.
    RoundId
);

impl RoundId {
    /// The token an initiator allocates for round `number`.
    pub fn for_number(number: u32) -> Self {
        Self(format!("r{number}"))
    }

    /// Round number encoded by a [`for_number`](Self::for_number) token.
    pub fn number(&self) -> Option<u32> {
        self.0.strip_prefix('r')?.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_serialize_transparently() {
        let id = RoomId::new("R1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"R1\"");
        let back: RoomId = serde_json::from_str("\"R1\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_round_id_for_number() {
        assert_eq!(RoundId::for_number(1).as_str(), "r1");
        assert_eq!(RoundId::for_number(12).to_string(), "r12");
        assert_eq!(RoundId::for_number(12).number(), Some(12));
        assert_eq!(RoundId::new("opaque-7").number(), None);
        assert_eq!(RoundId::new("r").number(), None);
    }
}
