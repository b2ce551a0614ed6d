//! Default configuration template with all options documented.

/// Generate the default config template.
pub fn default_config_template() -> String {
    r##"# Courier Configuration
# =====================
# All available options with their defaults.
# Changes require a restart to take effect.
#
# Environment variable substitution is supported: ${ENV_VAR} or ${ENV_VAR:-default}
# COURIER_POOL_SIZE, COURIER_TICK_MS, COURIER_CONCURRENCY_IN_SESSION,
# COURIER_ADMIN_PREFIX, COURIER_SEND_RETRIES and COURIER_SEND_RETRY_BACKOFF_MS
# override the [dispatch] values below.

# ══════════════════════════════════════════════════════════════════════════════
# DISPATCH
# ══════════════════════════════════════════════════════════════════════════════

[dispatch]
concurrency_in_session = 4        # Contexts of one conversation processed at once (max 1024)
pool_size = 8                     # Worker tasks shared by all conversations
tick_ms = 200                     # Dispatch loop interval (also bounds reaping latency)
admin_prefix = "#"                # Text starting with this jumps to the front of its queue
send_retries = 2                  # Extra delivery attempts after a failed send
send_retry_backoff_ms = 3000      # Linear backoff base: 3s, 6s, ...

# ══════════════════════════════════════════════════════════════════════════════
# CHAT
# ══════════════════════════════════════════════════════════════════════════════
# "ALL_GROUP" in a group list matches every group.

[chat]
single_chat_prefix = [""]         # Private messages must start with one of these ("" accepts all)
single_chat_reply_prefix = ""
single_chat_reply_suffix = ""
group_chat_prefix = []            # e.g. ["@bot"]
group_chat_keyword = []
group_name_white_list = []        # e.g. ["ALL_GROUP"]
group_name_keyword_white_list = []
group_chat_in_one_session = []    # Groups whose members share one session
group_at_off = false              # true = an @-mention alone does not trigger a reply
group_chat_reply_prefix = ""
group_chat_reply_suffix = ""
nick_name_black_list = []
image_create_prefix = []          # e.g. ["draw "]
trigger_by_self = true            # Process messages sent by the bot account itself
always_reply_voice = false
voice_reply_voice = false         # Answer voice messages with voice
accept_friend_commands = []       # Friend requests with this text are accepted
"##
    .to_string()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::CourierConfig;

    #[test]
    fn template_parses_to_defaults() {
        let parsed: CourierConfig = toml::from_str(&default_config_template()).unwrap();
        assert_eq!(parsed, CourierConfig::default());
    }
}
