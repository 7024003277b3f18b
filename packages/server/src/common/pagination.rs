//! Keyset pagination over chat history.
//!
//! Pages are anchored on a `(created_at, message_id)` pair. Each page holds the
//! messages strictly older than the anchor, newest first. The id tie-break keeps
//! page boundaries stable when several messages share a timestamp.
//!
//! # Usage
//!
//! ```rust,ignore
//! // First page
//! let page = get_messages(user_id, chat_id, None, 50, &deps).await?;
//!
//! // Next page, anchored on the oldest message returned so far
//! let anchor = page.last().map(MessageCursor::from_message);
//! let older = get_messages(user_id, chat_id, anchor, 50, &deps).await?;
//! ```

use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use std::cmp::Ordering;

use super::MessageId;

/// Largest page a caller may request.
pub const MAX_PAGE_SIZE: i64 = 100;

// ============================================================================
// Cursor
// ============================================================================

/// Exclusive `(created_at, id)` boundary for the next page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageCursor {
    pub created_at: DateTime<Utc>,
    pub message_id: MessageId,
}

impl MessageCursor {
    pub fn new(created_at: DateTime<Utc>, message_id: MessageId) -> Self {
        Self {
            created_at,
            message_id,
        }
    }

    /// Anchor on a message already returned to the client.
    pub fn from_message(message: &crate::domains::messages::Message) -> Self {
        Self::new(message.created_at, message.id.clone())
    }

    /// Build a cursor from the `before_time` / `before_id` query pair.
    ///
    /// A time without an id anchors strictly before that instant. An id
    /// without a time is rejected, since ids carry no ordering of their own.
    pub fn from_parts(
        before_time: Option<DateTime<Utc>>,
        before_id: Option<String>,
    ) -> Result<Option<Self>, &'static str> {
        match (before_time, before_id) {
            (None, None) => Ok(None),
            (None, Some(_)) => Err("before_id requires before_time"),
            (Some(time), id) => Ok(Some(Self::new(
                time,
                MessageId::new(id.unwrap_or_default()),
            ))),
        }
    }

    /// Encode the cursor as an opaque base64 string.
    pub fn encode(&self) -> String {
        let raw = format!(
            "{}|{}",
            self.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
            self.message_id
        );
        URL_SAFE_NO_PAD.encode(raw.as_bytes())
    }

    /// Decode an opaque cursor string.
    pub fn decode(s: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(s)
            .context("Invalid cursor: not valid base64")?;
        let raw = String::from_utf8(bytes).context("Invalid cursor: not valid UTF-8")?;
        let (time, id) = raw
            .split_once('|')
            .context("Invalid cursor: missing separator")?;
        let created_at = DateTime::parse_from_rfc3339(time)
            .context("Invalid cursor: bad timestamp")?
            .with_timezone(&Utc);
        Ok(Self::new(created_at, MessageId::new(id)))
    }

    /// Whether a message at `(created_at, id)` sorts strictly before this anchor
    /// in newest-first order, i.e. belongs on a later page.
    pub fn admits(&self, created_at: &DateTime<Utc>, id: &MessageId) -> bool {
        compare_desc_key((created_at, id), (&self.created_at, &self.message_id)) == Ordering::Less
    }
}

/// Compare two `(created_at, id)` keys in ascending order.
pub fn compare_desc_key(
    a: (&DateTime<Utc>, &MessageId),
    b: (&DateTime<Utc>, &MessageId),
) -> Ordering {
    a.0.cmp(b.0).then_with(|| a.1.cmp(b.1))
}

/// Clamp a validated (positive) limit to the page size ceiling.
pub fn clamp_limit(limit: i64) -> i64 {
    limit.min(MAX_PAGE_SIZE)
}
