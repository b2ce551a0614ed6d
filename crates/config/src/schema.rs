//! Config schema types for the dispatcher and the chat filtering rules.

use serde::{Deserialize, Serialize};

/// Sentinel in group lists that matches every group.
pub const ALL_GROUP: &str = "ALL_GROUP";

/// Upper bound on `dispatch.concurrency_in_session`.
pub const MAX_CONCURRENCY_IN_SESSION: usize = 1_024;

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub dispatch: DispatchConfig,
    pub chat: ChatConfig,
}

/// Limits and timings of the per-session dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Maximum contexts of one session processed at the same time.
    pub concurrency_in_session: usize,
    /// Worker tasks shared by all sessions.
    pub pool_size: usize,
    /// Dispatch loop tick in milliseconds.
    pub tick_ms: u64,
    /// Text starting with this prefix is an admin command and jumps the queue.
    pub admin_prefix: String,
    /// Extra send attempts after the first failure.
    pub send_retries: u32,
    /// Base of the linear send backoff (`base * (attempt + 1)`).
    pub send_retry_backoff_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency_in_session: 4,
            pool_size: 8,
            tick_ms: 200,
            admin_prefix: "#".into(),
            send_retries: 2,
            send_retry_backoff_ms: 3000,
        }
    }
}

/// Which messages get a reply, and how replies are framed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Private messages must start with one of these (stripped). An empty
    /// entry accepts everything.
    pub single_chat_prefix: Vec<String>,
    pub single_chat_reply_prefix: String,
    pub single_chat_reply_suffix: String,
    /// Group messages starting with one of these are addressed to the bot.
    pub group_chat_prefix: Vec<String>,
    /// Group messages containing one of these are addressed to the bot.
    pub group_chat_keyword: Vec<String>,
    /// Groups the bot answers in (exact names, or [`ALL_GROUP`]).
    pub group_name_white_list: Vec<String>,
    /// Groups whose name contains one of these are also answered.
    pub group_name_keyword_white_list: Vec<String>,
    /// Groups where all members share one session.
    pub group_chat_in_one_session: Vec<String>,
    /// Ignore @-mentions as a trigger in groups.
    pub group_at_off: bool,
    pub group_chat_reply_prefix: String,
    pub group_chat_reply_suffix: String,
    pub nick_name_black_list: Vec<String>,
    /// Text starting with one of these asks for an image.
    pub image_create_prefix: Vec<String>,
    /// Process messages the bot sent itself.
    pub trigger_by_self: bool,
    pub always_reply_voice: bool,
    pub voice_reply_voice: bool,
    /// Friend request texts that are accepted automatically.
    pub accept_friend_commands: Vec<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            single_chat_prefix: vec![String::new()],
            single_chat_reply_prefix: String::new(),
            single_chat_reply_suffix: String::new(),
            group_chat_prefix: Vec::new(),
            group_chat_keyword: Vec::new(),
            group_name_white_list: Vec::new(),
            group_name_keyword_white_list: Vec::new(),
            group_chat_in_one_session: Vec::new(),
            group_at_off: false,
            group_chat_reply_prefix: String::new(),
            group_chat_reply_suffix: String::new(),
            nick_name_black_list: Vec::new(),
            image_create_prefix: Vec::new(),
            trigger_by_self: true,
            always_reply_voice: false,
            voice_reply_voice: false,
            accept_friend_commands: Vec::new(),
        }
    }
}

impl ChatConfig {
    /// Whether the bot answers in the named group.
    pub fn group_allowed(&self, group_name: &str) -> bool {
        list_matches(&self.group_name_white_list, group_name)
            || self
                .group_name_keyword_white_list
                .iter()
                .any(|k| group_name.contains(k.as_str()))
    }

    /// Whether all members of the named group share one session.
    pub fn group_shares_session(&self, group_name: &str) -> bool {
        list_matches(&self.group_chat_in_one_session, group_name)
    }

    pub fn is_blacklisted(&self, nick_name: &str) -> bool {
        self.nick_name_black_list.iter().any(|n| n == nick_name)
    }
}

fn list_matches(list: &[String], group_name: &str) -> bool {
    list.iter().any(|g| g == group_name || g == ALL_GROUP)
}
