//! Data models for archived group messages.
//!
//! `Message` and `Attachment` mirror the upstream feed's JSON so a page can be
//! decoded straight into them. `MessageView` is the hydrated read shape the
//! query layer hands back to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Charmap ranges: `[offset, length]` pairs for mentions, `[pack, index]` for emoji.
pub type Charmap = Vec<[i64; 2]>;

/// A message as delivered by the upstream feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub source_guid: String,
    pub created_at: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub user_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub group_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub system: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub favorited_by: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub attachments: Vec<Attachment>,
}

/// An attachment. The `type` tag decides which of the optional fields carry meaning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lng: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub charmap: Charmap,
}

/// Known attachment variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentKind<'a> {
    Image { url: Option<&'a str> },
    Location {
        lat: Option<&'a str>,
        lng: Option<&'a str>,
        name: Option<&'a str>,
    },
    Emoji {
        placeholder: Option<&'a str>,
        charmap: &'a [[i64; 2]],
    },
    Other(&'a str),
}

impl Attachment {
    /// Create an image attachment.
    pub fn image(url: impl Into<String>) -> Self {
        Self {
            kind: "image".to_string(),
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Create a location attachment.
    pub fn location(lat: impl Into<String>, lng: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: "location".to_string(),
            lat: Some(lat.into()),
            lng: Some(lng.into()),
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Create an emoji attachment with its placeholder and charmap.
    pub fn emoji(placeholder: impl Into<String>, charmap: Charmap) -> Self {
        Self {
            kind: "emoji".to_string(),
            placeholder: Some(placeholder.into()),
            charmap,
            ..Self::default()
        }
    }

    /// Borrow this attachment as its typed variant.
    #[must_use]
    pub fn variant(&self) -> AttachmentKind<'_> {
        match self.kind.as_str() {
            "image" | "linked_image" | "video" => AttachmentKind::Image {
                url: self.url.as_deref(),
            },
            "location" => AttachmentKind::Location {
                lat: self.lat.as_deref(),
                lng: self.lng.as_deref(),
                name: self.name.as_deref(),
            },
            "emoji" => AttachmentKind::Emoji {
                placeholder: self.placeholder.as_deref(),
                charmap: &self.charmap,
            },
            other => AttachmentKind::Other(other),
        }
    }
}

/// One page of the upstream feed, newest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedPage {
    #[serde(default)]
    pub count: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub messages: Vec<Message>,
}

/// Side of an anchor for pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Before,
    After,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Before => write!(f, "before"),
            Self::After => write!(f, "after"),
        }
    }
}

/// Non-fatal problem found while hydrating a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HydrationWarning {
    pub message_id: String,
    pub field: String,
    pub reason: String,
}

/// A stored message with its attachments and derived favorite count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageView {
    pub id: String,
    pub created_at: i64,
    pub user_id: String,
    pub name: String,
    pub avatar_url: Option<String>,
    pub text: Option<String>,
    pub system: bool,
    pub favorite_count: i64,
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<HydrationWarning>,
}

impl MessageView {
    /// `created_at` as a UTC timestamp, if representable.
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp(self.created_at, 0)
    }
}

/// Detail composite: one message and the windows on either side of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDetail {
    pub message: MessageView,
    pub before_messages: Vec<MessageView>,
    pub after_messages: Vec<MessageView>,
}

/// Statistics about the archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveStats {
    pub messages_count: i64,
    pub attachments_count: i64,
    pub favorites_count: i64,
    pub fts_count: i64,
    pub first_message_at: Option<DateTime<Utc>>,
    pub last_message_at: Option<DateTime<Utc>>,
}

/// Drift between the messages table and its full-text index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FtsConsistency {
    /// Messages with no index row.
    pub missing: i64,
    /// Index rows with no message.
    pub orphaned: i64,
}

impl FtsConsistency {
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        self.missing == 0 && self.orphaned == 0
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
