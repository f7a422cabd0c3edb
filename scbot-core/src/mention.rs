//! Mention records as delivered by the platform, the bot's own identity, and reply text.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Replies echo at most this many characters of the definition.
pub const REPLY_ECHO_CHARS: usize = 100;

#[derive(Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Text(String),
    Number(u64),
}

impl IdRepr {
    fn into_string(self) -> String {
        match self {
            IdRepr::Text(s) => s,
            IdRepr::Number(n) => n.to_string(),
        }
    }
}

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                IdRepr::deserialize(deserializer).map(|id| Self(id.into_string()))
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

opaque_id!(
    /// Post id. Accepts JSON strings or numbers.
    MentionId
);
opaque_id!(
    /// Account id. Accepts JSON strings or numbers.
    UserId
);

/// A shortened link and the text the platform shows in its place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlEntity {
    pub url: String,
    pub display_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entities {
    #[serde(default)]
    pub urls: Vec<UrlEntity>,
}

/// One inbound mention: `{id, author_id, text, entities.urls[*]{url, display_url}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MentionRecord {
    pub id: MentionId,
    pub author_id: UserId,
    /// Handle to address the reply to, when the source provides it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_screen_name: Option<String>,
    pub text: String,
    #[serde(default)]
    pub entities: Entities,
}

impl MentionRecord {
    pub fn urls(&self) -> &[UrlEntity] {
        &self.entities.urls
    }
}

/// Who the bot is. Resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    pub screen_name: String,
    pub own_id: UserId,
}

impl BotIdentity {
    pub fn new(screen_name: impl Into<String>, own_id: impl Into<UserId>) -> Self {
        Self {
            screen_name: screen_name.into(),
            own_id: own_id.into(),
        }
    }

    /// Whether the bot's own posts can be told apart. Without an id nothing is self-authored.
    pub fn knows_own_id(&self) -> bool {
        !self.own_id.as_str().is_empty()
    }

    pub fn is_self(&self, record: &MentionRecord) -> bool {
        self.knows_own_id() && record.author_id == self.own_id
    }

    /// Stream rule matching mentions of this bot.
    pub fn mention_rule(&self) -> String {
        format!("@{}", self.screen_name)
    }
}

/// First [`REPLY_ECHO_CHARS`] characters, with `...` appended when cut.
pub fn truncate_definition(definition: &str) -> String {
    match definition.char_indices().nth(REPLY_ECHO_CHARS) {
        Some((cut, _)) => format!("{}...", &definition[..cut]),
        None => definition.to_string(),
    }
}

/// Reply body: `@<author> <definition>`, or just the definition when the author handle is unknown.
pub fn compose_reply(record: &MentionRecord, definition: &str) -> String {
    let mention = record
        .author_screen_name
        .as_deref()
        .map(|name| format!("@{name}"))
        .unwrap_or_default();
    format!("{mention} {}", truncate_definition(definition))
        .trim()
        .to_string()
}
