//! XP-side text shaping: the reply-stripping parser for inbound
//! groupchat bodies, the prefix-quote builder for outbound replies,
//! and a memoized actor-resource name cache.

use std::sync::OnceLock;

use chatbridge_cache::LruCache;
use chatbridge_core::text::build_actor_resource;
use regex::Regex;

/// `YYYY-MM-DD  HH:MM (GMT±NN)` — the timestamp marker some mobile XP
/// clients prepend to a quoted reply line.
fn mobile_timestamp_marker() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\d{4}-\d{2}-\d{2}\s+\d{2}:\d{2}\s*\(GMT[+-]\d{1,2}\)$")
            .expect("mobile timestamp marker is a valid pattern")
    })
}

/// The result of parsing an inbound groupchat body into its quoted
/// reply and its own content. Either half may be empty.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedBody {
    pub reply: Option<String>,
    pub body: String,
}

/// Applies the reply-stripping rules line by line: `"> "` lines are
/// the quote (a following mobile-timestamp marker discards the
/// *previous* reply line — clients that prepend a sender-name header
/// to the quote also prepend this marker), bare `">"` and nested
/// `"> >"` lines are ignored, everything else is body.
pub fn parse_body(text: &str) -> ParsedBody {
    let mut reply_lines: Vec<&str> = Vec::new();
    let mut body_lines: Vec<&str> = Vec::new();

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("> ") {
            if rest.starts_with('>') {
                continue;
            }
            if mobile_timestamp_marker().is_match(rest.trim()) {
                reply_lines.pop();
                continue;
            }
            reply_lines.push(rest);
        } else if line.starts_with('>') {
            continue;
        } else {
            body_lines.push(line);
        }
    }

    let reply = if reply_lines.is_empty() {
        None
    } else {
        Some(reply_lines.join("\n"))
    };

    ParsedBody {
        reply,
        body: body_lines.join("\n"),
    }
}

/// Builds the outbound groupchat body for a message carrying a reply:
/// every reply line prefixed with `"> "`, followed by the plain body.
pub fn build_reply_prefixed_body(reply: &str, body: &str) -> String {
    format!("{}\n{body}", build_quote_body(reply))
}

/// Just the quoted lines, with no trailing body — used for the
/// standalone reply-preview message sent ahead of an attachment.
pub fn build_quote_body(reply: &str) -> String {
    reply
        .lines()
        .map(|line| format!("> {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Memoizes `display_name -> XP resource string` so the
/// transliterate-then-filter pipeline runs once per distinct name
/// rather than on every outbound message.
pub struct ActorNameCache {
    cache: LruCache<String, String>,
}

impl ActorNameCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: LruCache::new(capacity),
        }
    }

    pub fn resource_for(&mut self, display_name: &str) -> String {
        if let Some(cached) = self.cache.get(&display_name.to_string()) {
            return cached.clone();
        }
        let resource = build_actor_resource(display_name);
        self.cache.add(display_name.to_string(), resource.clone());
        resource
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- parse_body ---

    #[test]
    fn plain_body_has_no_reply() {
        let parsed = parse_body("hello there");
        assert_eq!(parsed.reply, None);
        assert_eq!(parsed.body, "hello there");
    }

    #[test]
    fn strips_quote_prefix_into_reply() {
        let parsed = parse_body("> quoted line\nresponse");
        assert_eq!(parsed.reply, Some("quoted line".to_string()));
        assert_eq!(parsed.body, "response");
    }

    #[test]
    fn mobile_timestamp_marker_discards_previous_reply_line() {
        let parsed = parse_body("> Alice\n> 2024-05-01  14:30 (GMT+2)\nresponse");
        assert_eq!(parsed.reply, None);
        assert_eq!(parsed.body, "response");
    }

    #[test]
    fn nested_quote_is_ignored() {
        let parsed = parse_body("> > nested\n> top\nresponse");
        assert_eq!(parsed.reply, Some("top".to_string()));
        assert_eq!(parsed.body, "response");
    }

    #[test]
    fn bare_gt_with_no_space_is_ignored() {
        let parsed = parse_body(">no-space\nresponse");
        assert_eq!(parsed.reply, None);
        assert_eq!(parsed.body, "response");
    }

    #[test]
    fn multi_line_reply_and_body_join_with_newlines() {
        let parsed = parse_body("> line one\n> line two\nbody one\nbody two");
        assert_eq!(parsed.reply, Some("line one\nline two".to_string()));
        assert_eq!(parsed.body, "body one\nbody two");
    }

    // --- build_reply_prefixed_body ---

    #[test]
    fn prefixes_every_reply_line() {
        let built = build_reply_prefixed_body("a\nb", "c");
        assert_eq!(built, "> a\n> b\nc");
    }

    // --- ActorNameCache ---

    #[test]
    fn memoizes_resource_for_repeated_name() {
        let mut cache = ActorNameCache::new(4);
        let first = cache.resource_for("Alice");
        let second = cache.resource_for("Alice");
        assert_eq!(first, second);
        assert!(first.ends_with(" (Telegram)"));
    }
}
