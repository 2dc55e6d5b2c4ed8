//! Text helpers shared by both networks: sender-name normalization for
//! XP resource strings, and the SHA-256 body digest used to key reply
//! lookups.

use sha2::{Digest, Sha256};

/// Suffix appended to every impersonation actor's resource so that TG
/// senders are recognizable on the XP side.
pub const TELEGRAM_SUFFIX: &str = " (Telegram)";

/// `hashlib.sha256(body.encode()).hexdigest()` equivalent: a lowercase
/// 64-character hex digest of the UTF-8 message text, persisted in
/// place of the plaintext body.
pub fn body_digest(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    hex::encode(hasher.finalize())
}

/// A best-effort, deterministic ASCII transliteration of common RTL
/// scripts (Hebrew, Arabic), used so that resource strings built from
/// non-Latin display names still contain recognizable characters
/// rather than being stripped to nothing by the resource-profile
/// filter. Characters outside the mapped ranges pass through
/// unchanged; the subsequent filter strips anything the XMPP resource
/// profile disallows.
pub fn transliterate_rtl(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            // Hebrew block: approximate consonant mapping.
            '\u{05D0}' => 'a',
            '\u{05D1}' => 'b',
            '\u{05D2}' => 'g',
            '\u{05D3}' => 'd',
            '\u{05D4}' => 'h',
            '\u{05D5}' => 'v',
            '\u{05D6}' => 'z',
            '\u{05D7}' => 'x',
            '\u{05D8}' => 't',
            '\u{05D9}' => 'y',
            '\u{05DB}' | '\u{05DA}' => 'k',
            '\u{05DC}' => 'l',
            '\u{05DE}' | '\u{05DD}' => 'm',
            '\u{05E0}' | '\u{05DF}' => 'n',
            '\u{05E1}' => 's',
            '\u{05E2}' => 'e',
            '\u{05E4}' | '\u{05E3}' => 'p',
            '\u{05E6}' | '\u{05E5}' => 'c',
            '\u{05E7}' => 'q',
            '\u{05E8}' => 'r',
            '\u{05E9}' => 'w',
            '\u{05EA}' => 'u',
            // Arabic block: approximate consonant mapping.
            '\u{0627}' => 'a',
            '\u{0628}' => 'b',
            '\u{062A}' => 't',
            '\u{062B}' => 'v',
            '\u{062C}' => 'j',
            '\u{062D}' => 'h',
            '\u{062E}' => 'x',
            '\u{062F}' => 'd',
            '\u{0630}' => 'z',
            '\u{0631}' => 'r',
            '\u{0632}' => 'z',
            '\u{0633}' => 's',
            '\u{0634}' => 'c',
            '\u{0635}' => 's',
            '\u{0636}' => 'd',
            '\u{0637}' => 't',
            '\u{0638}' => 'z',
            '\u{0639}' => 'e',
            '\u{063A}' => 'g',
            '\u{0641}' => 'f',
            '\u{0642}' => 'q',
            '\u{0643}' => 'k',
            '\u{0644}' => 'l',
            '\u{0645}' => 'm',
            '\u{0646}' => 'n',
            '\u{0647}' => 'h',
            '\u{0648}' => 'w',
            '\u{064A}' => 'y',
            other => other,
        })
        .collect()
}

/// Strips characters disallowed by the XMPP resourcepart profile:
/// control characters, combining marks, and other formatting
/// characters that would make the resource ambiguous or invalid.
/// Applied after [`transliterate_rtl`].
pub fn filter_resource_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| {
            !c.is_control()
                && !matches!(
                    unicode_category(*c),
                    UnicodeCategory::Format | UnicodeCategory::Mark
                )
        })
        .collect()
}

/// Coarse category check sufficient to exclude combining marks and
/// bidi/format controls without pulling in a full Unicode database.
enum UnicodeCategory {
    Format,
    Mark,
    Other,
}

fn unicode_category(c: char) -> UnicodeCategory {
    match c as u32 {
        // Combining diacritical marks and extensions.
        0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0x20D0..=0x20FF => {
            UnicodeCategory::Mark
        }
        // Bidi formatting controls (LRM, RLM, ALM, embedding/override/isolate marks).
        0x200E | 0x200F | 0x061C | 0x202A..=0x202E | 0x2066..=0x2069 => UnicodeCategory::Format,
        _ => UnicodeCategory::Other,
    }
}

/// Builds the XP resource string for a TG sender: transliterate,
/// filter, then append the Telegram marker.
pub fn build_actor_resource(display_name: &str) -> String {
    let transliterated = transliterate_rtl(display_name);
    let filtered = filter_resource_chars(&transliterated);
    format!("{filtered}{TELEGRAM_SUFFIX}")
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- body_digest ---

    #[test]
    fn body_digest_is_sha256_hex() {
        let digest = body_digest("hi");
        assert_eq!(digest.len(), 64);
        assert_eq!(
            digest,
            "8f434346648f6b96df89dda901c5176b10a6d83961dd3c1ac88b59b2dc327aa"
        );
    }

    #[test]
    fn body_digest_is_deterministic() {
        assert_eq!(body_digest("same"), body_digest("same"));
    }

    #[test]
    fn body_digest_distinguishes_bodies() {
        assert_ne!(body_digest("a"), body_digest("b"));
    }

    // --- transliterate_rtl ---

    #[test]
    fn transliterate_rtl_passes_ascii_through() {
        assert_eq!(transliterate_rtl("Al"), "Al");
    }

    #[test]
    fn transliterate_rtl_maps_hebrew_consonants() {
        assert_eq!(transliterate_rtl("\u{05D0}\u{05D1}"), "ab");
    }

    // --- filter_resource_chars ---

    #[test]
    fn filter_resource_chars_strips_bidi_marks() {
        let input = format!("Al{}", '\u{200E}');
        assert_eq!(filter_resource_chars(&input), "Al");
    }

    #[test]
    fn filter_resource_chars_strips_combining_marks() {
        let input = format!("e{}", '\u{0301}');
        assert_eq!(filter_resource_chars(&input), "e");
    }

    // --- build_actor_resource ---

    #[test]
    fn build_actor_resource_appends_suffix() {
        assert_eq!(build_actor_resource("Al"), "Al (Telegram)");
    }
}
