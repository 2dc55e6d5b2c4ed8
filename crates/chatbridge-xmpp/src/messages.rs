//! Canned groupchat notices.

pub const UNBRIDGE_XMPP_MESSAGE: &str =
    "This chat was automatically unbridged due to a bot kick in Telegram.";
