//! Text matching used to decide whether a message is addressed to the bot.

/// Separators a chat client puts after an @-mention.
const MENTION_SEPARATORS: [char; 2] = ['\u{2005}', ' '];

/// First prefix in `prefixes` that `content` starts with.
///
/// An empty entry matches every message. An empty list matches nothing.
pub fn match_prefix<'a>(content: &str, prefixes: &'a [String]) -> Option<&'a str> {
    prefixes
        .iter()
        .map(String::as_str)
        .find(|p| content.starts_with(p))
}

/// Whether `content` contains any of `keywords`.
pub fn contains_keyword(content: &str, keywords: &[String]) -> bool {
    keywords.iter().any(|k| content.contains(k.as_str()))
}

/// Remove a matched leading prefix and surrounding whitespace.
pub fn strip_prefix(content: &str, prefix: &str) -> String {
    content
        .strip_prefix(prefix)
        .unwrap_or(content)
        .trim()
        .to_string()
}

/// Remove every `@name` mention followed by a mention separator.
pub fn strip_mention(content: &str, name: &str) -> String {
    let needle = format!("@{name}");
    let mut out = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(idx) = rest.find(&needle) {
        let after = &rest[idx + needle.len()..];
        match after.chars().next() {
            Some(sep) if MENTION_SEPARATORS.contains(&sep) => {
                out.push_str(&rest[..idx]);
                rest = &after[sep.len_utf8()..];
            },
            _ => {
                out.push_str(&rest[..idx + needle.len()]);
                rest = after;
            },
        }
    }
    out.push_str(rest);
    out
}

/// Remove mentions of the bot from a group message.
///
/// The bot's account name and every name in `at_list` are stripped. If that
/// changes nothing, the bot's group display name is tried instead.
pub fn strip_bot_mentions(
    content: &str,
    bot_name: &str,
    at_list: &[String],
    self_display_name: Option<&str>,
) -> String {
    let mut stripped = if bot_name.is_empty() {
        content.to_string()
    } else {
        strip_mention(content, bot_name)
    };
    for name in at_list.iter().filter(|n| !n.is_empty()) {
        stripped = strip_mention(&stripped, name);
    }
    match self_display_name {
        Some(display) if stripped == content && !display.is_empty() => {
            strip_mention(content, display)
        },
        _ => stripped,
    }
}
