use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

// The server keys rows by integer primary keys but clients echo them back as
// strings, so both encodings are accepted on the way in.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Int(i64),
}

impl From<RawId> for String {
    fn from(value: RawId) -> Self {
        match value {
            RawId::Text(text) => text,
            RawId::Int(n) => n.to_string(),
        }
    }
}

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

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
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                RawId::deserialize(deserializer).map(|raw| Self(raw.into()))
            }
        }
    };
}

id_newtype!(MessageId);
id_newtype!(UserId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Away,
    Offline,
    #[serde(other)]
    Unknown,
}

impl PresenceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Away => "away",
            PresenceStatus::Offline => "offline",
            PresenceStatus::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_accept_integer_and_string_encodings() {
        let from_int: MessageId = serde_json::from_str("42").expect("int id");
        let from_text: MessageId = serde_json::from_str("\"42\"").expect("text id");
        assert_eq!(from_int, from_text);
        assert_eq!(serde_json::to_string(&from_int).expect("encode"), "\"42\"");
    }

    #[test]
    fn unknown_presence_values_do_not_fail_decoding() {
        let status: PresenceStatus = serde_json::from_str("\"busy\"").expect("status");
        assert_eq!(status, PresenceStatus::Unknown);
        let status: PresenceStatus = serde_json::from_str("\"away\"").expect("status");
        assert_eq!(status, PresenceStatus::Away);
    }
}
