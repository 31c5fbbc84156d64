//! Turns an ordered thread into display rows.
//!
//! Rows are grouped by sender and time: consecutive messages from the same
//! sender within the grouping window share one header. A day separator
//! precedes the first message of each calendar day. Own messages carry a
//! status glyph; failed ones are flagged retryable.

use std::fmt::Write as _;

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};

use homechat_proto::message::{DeliveryStatus, Message, MessageKey, Timestamp, UserId};

/// Formatting options for [`render_thread`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    /// Maximum gap between two messages of one group, in milliseconds.
    pub group_window_ms: u64,
    /// `strftime` pattern for message times.
    pub time_format: String,
    /// `strftime` pattern for day separators.
    pub day_format: String,
    /// Offset used to compute local times and day boundaries.
    pub utc_offset: FixedOffset,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            group_window_ms: 5 * 60 * 1000,
            time_format: "%H:%M".to_string(),
            day_format: "%Y-%m-%d".to_string(),
            utc_offset: Utc.fix(),
        }
    }
}

/// One display row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Row {
    /// Calendar day boundary.
    DaySeparator {
        /// Formatted day.
        label: String,
    },
    /// A message bubble.
    Message(MessageRow),
}

/// A message as displayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRow {
    /// Identity of the underlying message.
    pub key: MessageKey,
    /// Authored by the viewer.
    pub own: bool,
    /// Message text.
    pub text: String,
    /// Formatted local time.
    pub time_label: String,
    /// Delivery glyph, only on own messages.
    pub status_glyph: Option<&'static str>,
    /// Starts a new sender/time group.
    pub first_in_group: bool,
    /// Shows the retry and discard affordance.
    pub retryable: bool,
}

/// Glyph shown next to an own message.
#[must_use]
pub const fn status_glyph(status: DeliveryStatus) -> &'static str {
    match status {
        DeliveryStatus::Sending => "\u{22ef}",
        DeliveryStatus::Sent => "\u{2713}",
        DeliveryStatus::Delivered => "\u{2713}\u{2713}",
        DeliveryStatus::Read => "\u{2713}\u{2713}\u{2022}",
        DeliveryStatus::Failed => "\u{2717}",
    }
}

/// Render a thread (oldest first) for `viewer`.
#[must_use]
pub fn render_thread(messages: &[Message], viewer: UserId, options: &RenderOptions) -> Vec<Row> {
    let mut rows = Vec::with_capacity(messages.len() + 1);
    let mut previous: Option<(&Message, Option<NaiveDate>)> = None;

    for message in messages {
        let local = to_local(message.timestamp, options.utc_offset);
        let day = local.map(|dt| dt.date_naive());

        let new_day = previous.is_none_or(|(_, prev_day)| prev_day != day);
        if new_day && let Some(dt) = local {
            rows.push(Row::DaySeparator {
                label: format_or_raw(&dt, &options.day_format),
            });
        }

        let first_in_group = new_day
            || previous.is_none_or(|(prev, _)| {
                prev.sender_id != message.sender_id
                    || message
                        .timestamp
                        .as_millis()
                        .saturating_sub(prev.timestamp.as_millis())
                        > options.group_window_ms
            });

        let own = message.sender_id == viewer;
        rows.push(Row::Message(MessageRow {
            key: message.key,
            own,
            text: message.text.clone(),
            time_label: local.map_or_else(String::new, |dt| {
                format_or_raw(&dt, &options.time_format)
            }),
            status_glyph: own.then(|| status_glyph(message.status)),
            first_in_group,
            retryable: own && message.status == DeliveryStatus::Failed,
        }));
        previous = Some((message, day));
    }
    rows
}

fn to_local(timestamp: Timestamp, offset: FixedOffset) -> Option<DateTime<FixedOffset>> {
    let millis = i64::try_from(timestamp.as_millis()).ok()?;
    DateTime::<Utc>::from_timestamp_millis(millis).map(|dt| dt.with_timezone(&offset))
}

/// Format with a user-supplied pattern, falling back to RFC 3339 when the
/// pattern is invalid.
fn format_or_raw(dt: &DateTime<FixedOffset>, pattern: &str) -> String {
    let mut out = String::new();
    if write!(out, "{}", dt.format(pattern)).is_err() {
        tracing::debug!(pattern, "invalid time format, using RFC 3339");
        return dt.to_rfc3339();
    }
    out
}
