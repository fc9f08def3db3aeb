use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

/// Payload carried over the data channel once the peers are connected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApplicationMessage {
    Text {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Gif {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Reaction {
        id: String,
        reaction: String,
    },
}

impl ApplicationMessage {
    pub fn text(content: impl Into<String>) -> Self {
        ApplicationMessage::Text {
            content: content.into(),
            id: Some(Uuid::new_v4().to_string()),
        }
    }

    pub fn gif(url: impl Into<String>) -> Self {
        ApplicationMessage::Gif {
            content: url.into(),
            id: Some(Uuid::new_v4().to_string()),
        }
    }

    pub fn reaction(id: impl Into<String>, reaction: ReactionKind) -> Self {
        ApplicationMessage::Reaction {
            id: id.into(),
            reaction: reaction.as_str().to_string(),
        }
    }

    /// Turns a line typed by the user into a message. Blank input yields
    /// nothing; a bare Tenor share link becomes a GIF.
    pub fn from_input(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return None;
        }
        match tenor_gif_url(trimmed) {
            Some(url) => Some(ApplicationMessage::gif(url)),
            None => Some(ApplicationMessage::text(trimmed)),
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            ApplicationMessage::Text { id, .. } | ApplicationMessage::Gif { id, .. } => {
                id.as_deref()
            }
            ApplicationMessage::Reaction { id, .. } => Some(id),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApplicationMessage::Text { .. } => "text",
            ApplicationMessage::Gif { .. } => "gif",
            ApplicationMessage::Reaction { .. } => "reaction",
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

/// Returns the direct GIF URL when `input` is exactly one Tenor share link
/// (`https://tenor.com/view/<slug>-<digits>`, optionally under a locale
/// prefix such as `/en-GB/view/...`).
pub fn tenor_gif_url(input: &str) -> Option<String> {
    if input.chars().any(char::is_whitespace) {
        return None;
    }
    let url = Url::parse(input).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?.to_ascii_lowercase();
    if host != "tenor.com" && host != "www.tenor.com" {
        return None;
    }
    if url.query().is_some() || url.fragment().is_some() {
        return None;
    }
    let segments: Vec<&str> = url.path_segments()?.collect();
    let (slug, rest) = segments.split_last()?;
    if !rest.last().is_some_and(|segment| segment.ends_with("view")) {
        return None;
    }
    let (name, digits) = slug.rsplit_once('-')?;
    let valid_name = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    let valid_digits = !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit());
    if !(valid_name && valid_digits) {
        return None;
    }
    Some(format!("{input}.gif"))
}

/// The sticker set offered by the reaction picker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReactionKind {
    Kekw,
    Laughing,
    Thumbsup,
    Huh,
    Nickyoung,
    Surprisedpikachu,
    Huhcat,
    Tomdelonge,
    Blink,
    Rookienumbers,
}

impl ReactionKind {
    pub const ALL: [ReactionKind; 10] = [
        ReactionKind::Kekw,
        ReactionKind::Laughing,
        ReactionKind::Thumbsup,
        ReactionKind::Huh,
        ReactionKind::Nickyoung,
        ReactionKind::Surprisedpikachu,
        ReactionKind::Huhcat,
        ReactionKind::Tomdelonge,
        ReactionKind::Blink,
        ReactionKind::Rookienumbers,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ReactionKind::Kekw => "kekw",
            ReactionKind::Laughing => "laughing",
            ReactionKind::Thumbsup => "thumbsup",
            ReactionKind::Huh => "huh",
            ReactionKind::Nickyoung => "nickyoung",
            ReactionKind::Surprisedpikachu => "surprisedpikachu",
            ReactionKind::Huhcat => "huhcat",
            ReactionKind::Tomdelonge => "tomdelonge",
            ReactionKind::Blink => "blink",
            ReactionKind::Rookienumbers => "rookienumbers",
        }
    }
}

impl fmt::Display for ReactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown reaction '{0}'")]
pub struct UnknownReaction(pub String);

impl FromStr for ReactionKind {
    type Err = UnknownReaction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        ReactionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == needle)
            .ok_or_else(|| UnknownReaction(s.to_string()))
    }
}
