use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use std::fmt;

/// Placeholder shown when the gateway returns no subject
pub const NO_SUBJECT: &str = "No Subject";

/// Go's zero `time.Time`, emitted for a non-nullable `read_at` that was never set
const GO_ZERO_TIME_PREFIX: &str = "0001-01-01";

/// Represents one received email in the active mailbox
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Gateway-assigned identifier, immutable once created
    pub id: String,
    pub from: String,
    pub subject: String,
    /// Raw body. Sanitizing for display is the view's job.
    pub body: String,
    pub received_at: DateTime<Utc>,
    /// The only field the core mutates between polls
    pub read: bool,
    pub attachments: Vec<Attachment>,
}

/// Describes an attachment without its content
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Attachment {
    pub name: String,
    /// Human-readable size. Byte counts are formatted on decode.
    #[serde(default, deserialize_with = "size_text")]
    pub size: String,
    /// Display hint for the view (file kind, icon name)
    #[serde(default, alias = "icon")]
    pub hint: Option<String>,
}

impl Message {
    /// Maps a wire record into the local shape.
    ///
    /// Read policy: a message is read only when `read_at` carries a real
    /// timestamp. Null, missing, empty and Go zero-time values all mean unread.
    pub fn from_wire(wire: WireMessage) -> Self {
        let subject = wire
            .subject
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| NO_SUBJECT.to_string());

        let body = wire
            .body
            .or(wire.body_html)
            .or(wire.body_plain)
            .unwrap_or_default();

        let received_at = parse_received_at(&wire.received_at).unwrap_or_else(|| {
            crate::debug_log!(
                "message {}: unparseable received_at {:?}, using epoch",
                wire.id,
                wire.received_at
            );
            DateTime::<Utc>::UNIX_EPOCH
        });

        Self {
            id: wire.id.to_string(),
            from: wire.from_address,
            subject,
            body,
            received_at,
            read: is_read(wire.read_at.as_deref()),
            attachments: wire.attachments,
        }
    }

    /// Case-insensitive substring match across sender, subject and body.
    /// `needle` must already be lowercase.
    fn matches(&self, needle: &str) -> bool {
        self.from.to_lowercase().contains(needle)
            || self.subject.to_lowercase().contains(needle)
            || self.body.to_lowercase().contains(needle)
    }
}

/// Attachment sizes arrive as display text ("2.4 MB") or as a byte count
#[derive(Deserialize)]
#[serde(untagged)]
enum WireSize {
    Bytes(u64),
    Text(String),
}

fn size_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Option::<WireSize>::deserialize(deserializer)? {
        Some(WireSize::Bytes(bytes)) => format_bytes(bytes),
        Some(WireSize::Text(text)) => text,
        None => String::new(),
    })
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    match bytes {
        b if b < KB => format!("{b} B"),
        b if b < MB => format!("{} KB", b / KB),
        b => format!("{:.1} MB", b as f64 / MB as f64),
    }
}

/// Filters a collection by a free-text query, keeping gateway order.
/// An empty query returns every message; whitespace is matched literally.
pub fn search<'a>(messages: &'a [Message], query: &str) -> Vec<&'a Message> {
    let needle = query.to_lowercase();
    if needle.is_empty() {
        return messages.iter().collect();
    }
    messages.iter().filter(|m| m.matches(&needle)).collect()
}

/// Gateway ids are numeric but some deployments send them as strings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WireId {
    Number(u64),
    Text(String),
}

impl fmt::Display for WireId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireId::Number(n) => write!(f, "{n}"),
            WireId::Text(s) => f.write_str(s),
        }
    }
}

/// A message record exactly as the gateway lists it
#[derive(Debug, Clone, Deserialize)]
pub struct WireMessage {
    pub id: WireId,
    pub from_address: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub body_html: Option<String>,
    #[serde(default)]
    pub body_plain: Option<String>,
    pub received_at: String,
    #[serde(default)]
    pub read_at: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

fn is_read(read_at: Option<&str>) -> bool {
    match read_at.map(str::trim) {
        Some(ts) => !ts.is_empty() && !ts.starts_with(GO_ZERO_TIME_PREFIX),
        None => false,
    }
}

/// Parses the gateway's received timestamp into a DateTime
pub fn parse_received_at(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    // Timestamps straight out of Postgres, no offset: treat as UTC
    let formats = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];
    for fmt in &formats {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }

    if let Ok(ts) = raw.parse::<i64>() {
        return Utc.timestamp_opt(ts, 0).single();
    }

    None
}

/// Builder for creating Message instances
#[derive(Default)]
pub struct MessageBuilder {
    id: String,
    from: String,
    subject: String,
    body: String,
    received_at: Option<DateTime<Utc>>,
    read: bool,
    attachments: Vec<Attachment>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.from = from.into();
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = Some(received_at);
        self
    }

    pub fn read(mut self, read: bool) -> Self {
        self.read = read;
        self
    }

    pub fn attachment(mut self, name: impl Into<String>, size: impl Into<String>) -> Self {
        self.attachments.push(Attachment {
            name: name.into(),
            size: size.into(),
            hint: None,
        });
        self
    }

    pub fn build(self) -> Message {
        Message {
            id: self.id,
            from: self.from,
            subject: if self.subject.is_empty() {
                NO_SUBJECT.to_string()
            } else {
                self.subject
            },
            body: self.body,
            received_at: self.received_at.unwrap_or_else(Utc::now),
            read: self.read,
            attachments: self.attachments,
        }
    }
}
