use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Implements the string-newtype plumbing shared by every identifier.
macro_rules! string_id {
    ($name:ident) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
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

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

/// Identifier minted by the coordinator itself, prefixed and time-ordered.
macro_rules! branded_id {
    ($name:ident, $prefix:expr) => {
        string_id!($name);

        impl $name {
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

branded_id!(SessionId, "pps");

// Owned by the surrounding board application; the coordinator only echoes them.
string_id!(ProjectId);
string_id!(BoardId);
string_id!(ListId);
string_id!(CardId);
string_id!(UserId);

/// Scope of a planning poker session: at most one live session per key.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKey {
    pub project_id: ProjectId,
    pub board_id: BoardId,
}

impl SessionKey {
    pub fn new(project_id: impl Into<ProjectId>, board_id: impl Into<BoardId>) -> Self {
        Self {
            project_id: project_id.into(),
            board_id: board_id.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project_id, self.board_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_has_prefix() {
        let id = SessionId::new();
        assert!(id.as_str().starts_with("pps_"), "got: {id}");
    }

    #[test]
    fn session_ids_are_unique_and_ordered() {
        let ids: Vec<SessionId> = (0..50).map(|_| SessionId::new()).collect();
        for w in ids.windows(2) {
            assert!(w[0].as_str() < w[1].as_str(), "not monotonic: {} >= {}", w[0], w[1]);
        }
    }

    #[test]
    fn external_ids_are_transparent_in_json() {
        let user = UserId::from_raw("u-42");
        assert_eq!(serde_json::to_string(&user).unwrap(), "\"u-42\"");
        let parsed: CardId = serde_json::from_str("\"card-7\"").unwrap();
        assert_eq!(parsed.as_str(), "card-7");
    }

    #[test]
    fn session_key_serializes_camel_case() {
        let key = SessionKey::new("p1", "b1");
        let json = serde_json::to_value(&key).unwrap();
        assert_eq!(json["projectId"], "p1");
        assert_eq!(json["boardId"], "b1");
        assert_eq!(key.to_string(), "p1/b1");
    }
}
