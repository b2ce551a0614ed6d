//! Shared message types flowing through the dispatcher: inbound chat
//! messages, the [`Context`] unit of work, and the [`Reply`] it produces.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Category of an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    Text,
    Voice,
    Image,
    /// Text that asked for an image to be generated.
    ImageCreate,
    File,
    Video,
    Sharing,
    Xml,
    AcceptFriend,
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Text => "TEXT",
            Self::Voice => "VOICE",
            Self::Image => "IMAGE",
            Self::ImageCreate => "IMAGE_CREATE",
            Self::File => "FILE",
            Self::Video => "VIDEO",
            Self::Sharing => "SHARING",
            Self::Xml => "XML",
            Self::AcceptFriend => "ACCEPT_FRIEND",
        };
        f.write_str(name)
    }
}

/// Category of an outbound reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyKind {
    Text,
    Voice,
    Image,
    ImageUrl,
    File,
    Video,
    VideoUrl,
    Info,
    Error,
    AcceptFriend,
}

impl ReplyKind {
    /// Media replies are delivered as-is by the decorate stage.
    pub fn is_media(self) -> bool {
        matches!(
            self,
            Self::Voice
                | Self::Image
                | Self::ImageUrl
                | Self::File
                | Self::Video
                | Self::VideoUrl
        )
    }
}

impl fmt::Display for ReplyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Text => "TEXT",
            Self::Voice => "VOICE",
            Self::Image => "IMAGE",
            Self::ImageUrl => "IMAGE_URL",
            Self::File => "FILE",
            Self::Video => "VIDEO",
            Self::VideoUrl => "VIDEO_URL",
            Self::Info => "INFO",
            Self::Error => "ERROR",
            Self::AcceptFriend => "ACCEPT_FRIEND",
        };
        f.write_str(name)
    }
}

/// A raw message as delivered by a chat transport.
///
/// `other_user_*` is the conversation peer: the group for group messages, the
/// sender for private ones. `actual_user_*` is the member who spoke inside a
/// group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatMessage {
    pub msg_id: String,
    pub from_user_id: String,
    pub from_user_nickname: Option<String>,
    pub to_user_id: String,
    pub other_user_id: String,
    pub other_user_nickname: Option<String>,
    pub actual_user_id: String,
    pub actual_user_nickname: Option<String>,
    pub is_group: bool,
    pub is_at: bool,
    pub at_list: Vec<String>,
    /// The bot's display name inside this group, if it differs from its
    /// account name.
    pub self_display_name: Option<String>,
    pub create_time: i64,
}

/// Metadata side-channel of a [`Context`].
///
/// Set once by the composer. Pipeline stages clone it rather than mutating a
/// shared copy, so concurrent runs of the same session never observe each
/// other's edits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextMeta {
    pub session_id: Option<String>,
    pub receiver: Option<String>,
    pub is_group: bool,
    pub group_name: Option<String>,
    pub is_shared_session_group: bool,
    /// Kind of the message that started this chain (a voice message keeps
    /// `Voice` here after it is transcribed to text).
    pub origin_kind: Option<ContextKind>,
    pub desire_reply: Option<ReplyKind>,
    pub msg: Option<ChatMessage>,
    /// Free-form values attached by hooks.
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One unit of inbound work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub kind: ContextKind,
    pub content: String,
    pub meta: ContextMeta,
}

impl Context {
    pub fn new(kind: ContextKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            meta: ContextMeta::default(),
        }
    }

    #[must_use]
    pub fn with_meta(mut self, meta: ContextMeta) -> Self {
        self.meta = meta;
        self
    }

    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.meta.session_id = Some(session_id.into());
        self
    }

    pub fn session_id(&self) -> Option<&str> {
        self.meta.session_id.as_deref()
    }

    pub fn is_group(&self) -> bool {
        self.meta.is_group
    }

    /// Whether this is a text command starting with `prefix`.
    pub fn is_command(&self, prefix: &str) -> bool {
        !prefix.is_empty() && self.kind == ContextKind::Text && self.content.starts_with(prefix)
    }
}

/// The output of processing a [`Context`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub kind: ReplyKind,
    pub content: String,
}

impl Reply {
    pub fn new(kind: ReplyKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::new(ReplyKind::Text, content)
    }

    pub fn info(content: impl Into<String>) -> Self {
        Self::new(ReplyKind::Info, content)
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(ReplyKind::Error, content)
    }

    pub fn accept_friend(accept: bool) -> Self {
        Self::new(ReplyKind::AcceptFriend, accept.to_string())
    }

    /// Accept/reject decision carried by an `AcceptFriend` reply.
    pub fn accepted(&self) -> Option<bool> {
        match self.kind {
            ReplyKind::AcceptFriend => self.content.parse().ok(),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_detection_requires_text_kind() {
        let cmd = Context::new(ContextKind::Text, "#status");
        assert!(cmd.is_command("#"));
        assert!(!cmd.is_command(""));

        let voice = Context::new(ContextKind::Voice, "#status");
        assert!(!voice.is_command("#"));

        let plain = Context::new(ContextKind::Text, "status #1");
        assert!(!plain.is_command("#"));
    }

    #[test]
    fn cloned_meta_is_independent() {
        let original = Context::new(ContextKind::Text, "hi").with_session("s1");
        let mut copy = original.clone();
        copy.meta
            .extra
            .insert("touched".into(), serde_json::Value::Bool(true));
        copy.meta.session_id = Some("s2".into());
        assert!(original.meta.extra.is_empty());
        assert_eq!(original.session_id(), Some("s1"));
    }

    #[test]
    fn accept_friend_reply_round_trips_decision() {
        assert_eq!(Reply::accept_friend(true).accepted(), Some(true));
        assert_eq!(Reply::accept_friend(false).accepted(), Some(false));
        assert_eq!(Reply::text("true").accepted(), None);
    }

    #[test]
    fn kinds_display_upper_snake() {
        assert_eq!(ReplyKind::ImageUrl.to_string(), "IMAGE_URL");
        assert_eq!(ContextKind::AcceptFriend.to_string(), "ACCEPT_FRIEND");
        assert!(ReplyKind::Voice.is_media());
        assert!(!ReplyKind::Info.is_media());
    }
}
