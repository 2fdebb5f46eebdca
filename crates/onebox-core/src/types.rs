//! Core data model — normalized and classified emails, plus the small set of
//! transport types the sync engine passes between the mailbox client and the
//! ingestion pipeline.
//!
//! Index documents use **camelCase** keys; the category is stored under
//! `aiCategory` so manual corrections from the frontend land on the same field.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────
// Category
// ─────────────────────────────────────────────

/// Closed label set produced by the classifier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Interested,
    #[serde(rename = "Meeting Booked")]
    MeetingBooked,
    #[serde(rename = "Not Interested")]
    NotInterested,
    Spam,
    #[serde(rename = "Out of Office")]
    OutOfOffice,
    #[default]
    Uncategorized,
}

impl Category {
    /// Every label, in display order.
    pub const ALL: [Category; 6] = [
        Category::Interested,
        Category::MeetingBooked,
        Category::NotInterested,
        Category::Spam,
        Category::OutOfOffice,
        Category::Uncategorized,
    ];

    /// Wire/display name (e.g. `"Meeting Booked"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Interested => "Interested",
            Category::MeetingBooked => "Meeting Booked",
            Category::NotInterested => "Not Interested",
            Category::Spam => "Spam",
            Category::OutOfOffice => "Out of Office",
            Category::Uncategorized => "Uncategorized",
        }
    }

    /// Lenient lookup: case-insensitive, ignores surrounding whitespace,
    /// quotes, and `-`/`_` separators (`"meeting_booked"` → `MeetingBooked`).
    pub fn parse_label(label: &str) -> Option<Category> {
        let wanted = normalize_label(label);
        Category::ALL
            .into_iter()
            .find(|c| normalize_label(c.as_str()) == wanted)
    }
}

fn normalize_label(label: &str) -> String {
    label
        .trim()
        .trim_matches('"')
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
        .flat_map(|c| c.to_lowercase())
        .collect()
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::parse_label(s).ok_or_else(|| format!("unknown category '{s}'"))
    }
}

// ─────────────────────────────────────────────
// Emails
// ─────────────────────────────────────────────

/// Subject used when a message has none.
pub const NO_SUBJECT: &str = "(No Subject)";

/// Parser output: one message, normalized and ready to classify.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedEmail {
    /// `<accountId>-<messageId>`, see [`email_id`].
    pub id: String,
    pub account_id: String,
    pub folder: String,
    pub subject: String,
    pub body: String,
    pub from: String,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    pub date: DateTime<Utc>,
    /// Raw `Message-ID` header value (empty when absent).
    #[serde(default)]
    pub message_id: String,
    pub has_attachments: bool,
    pub indexed_at: DateTime<Utc>,
}

/// A normalized email plus its classifier label. This is the index document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedEmail {
    #[serde(flatten)]
    pub email: NormalizedEmail,
    #[serde(rename = "aiCategory", default)]
    pub category: Category,
}

impl ClassifiedEmail {
    pub fn new(email: NormalizedEmail, category: Category) -> Self {
        Self { email, category }
    }

    pub fn id(&self) -> &str {
        &self.email.id
    }
}

/// Derive the deterministic document id for a message.
///
/// Uses the protocol Message-ID (angle brackets stripped) so re-ingesting the
/// same message always targets the same document. Messages without a
/// Message-ID fall back to the ingestion timestamp plus the UID, so two
/// such messages ingested in the same millisecond still get distinct ids.
pub fn email_id(
    account_id: &str,
    message_id: &str,
    uid: u32,
    ingested_at: DateTime<Utc>,
) -> String {
    let trimmed = message_id.trim().trim_start_matches('<').trim_end_matches('>').trim();
    if trimmed.is_empty() {
        format!("{}-{}-{}", account_id, ingested_at.timestamp_millis(), uid)
    } else {
        format!("{}-{}", account_id, trimmed)
    }
}

// ─────────────────────────────────────────────
// Mailbox transport types
// ─────────────────────────────────────────────

/// Stable per-message handle inside one mailbox (IMAP UID).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageRef(pub u32);

impl MessageRef {
    pub fn uid(&self) -> u32 {
        self.0
    }
}

/// One fetched message, scoped to a single pipeline invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct RawMessage {
    pub uid: u32,
    pub bytes: Vec<u8>,
}

impl RawMessage {
    pub fn new(uid: u32, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            uid,
            bytes: bytes.into(),
        }
    }
}

/// What the server reported when the mailbox was opened.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MailboxInfo {
    /// Number of messages in the mailbox.
    pub exists: u32,
    /// UIDVALIDITY, when the server reports one.
    pub uid_validity: Option<u32>,
}

/// Last processed message position for one account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    #[serde(default)]
    pub uid_validity: Option<u32>,
    pub last_uid: u32,
}

impl Cursor {
    pub fn new(uid_validity: Option<u32>, last_uid: u32) -> Self {
        Self {
            uid_validity,
            last_uid,
        }
    }

    /// Whether this cursor still addresses the mailbox described by `info`.
    ///
    /// A changed UIDVALIDITY means every UID was reassigned.
    pub fn is_valid_for(&self, info: &MailboxInfo) -> bool {
        match (self.uid_validity, info.uid_validity) {
            (Some(ours), Some(theirs)) => ours == theirs,
            _ => true,
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
