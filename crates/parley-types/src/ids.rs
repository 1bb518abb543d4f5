use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub const fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

typed_id!(
    /// Identity of a registered user. Also the key of the connection registry.
    UserId
);
typed_id!(ServerId);
typed_id!(ChannelId);
typed_id!(CategoryId);
typed_id!(MessageId);
typed_id!(InvitationId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_round_trips_through_from_str() {
        let id = ServerId::new();
        let parsed: ServerId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_serializes_as_plain_uuid_string() {
        let raw = Uuid::new_v4();
        let json = serde_json::to_string(&UserId::from_uuid(raw)).unwrap();
        assert_eq!(json, format!("\"{}\"", raw));
    }

    #[test]
    fn test_display_is_the_wrapped_uuid() {
        let raw = Uuid::new_v4();
        assert_eq!(ChannelId::from_uuid(raw).to_string(), raw.to_string());
    }

    #[test]
    fn test_rejects_non_uuid() {
        assert!("me".parse::<ServerId>().is_err());
    }
}
