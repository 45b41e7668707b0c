//! Pre-parse repair of bare ampersands.
//!
//! Real-world XML (scraper payloads, hand-edited configs, URLs pasted into
//! attributes) routinely contains `&` characters that start no entity at all.
//! A conforming parser rejects the whole document over them, so before any
//! parse attempt every `&` is checked against the small set of references XML
//! actually defines, and each offender is rewritten to `&amp;` by inserting
//! `amp;` right after it. Text that is already well-formed passes through
//! byte-identical, which also makes the rewrite idempotent.

use std::borrow::Cow;

use memchr::memchr;

/// An entity reference is at most 8 bytes including `&` and `;`
/// (`&#xFFFF;` and `&#65535;` are the longest legal forms).
const MAX_ENTITY_LEN: usize = 8;

/// Returns true when `window` (the bytes immediately following a `&`) begins
/// with a complete legal reference: one of the five named entities, a decimal
/// character reference of 1-5 digits, or a hex reference of 1-4 digits.
fn is_legal_reference(window: &[u8]) -> bool {
    match window.first() {
        Some(b'a') => window.starts_with(b"amp;") || window.starts_with(b"apos;"),
        Some(b'l') => window.starts_with(b"lt;"),
        Some(b'g') => window.starts_with(b"gt;"),
        Some(b'q') => window.starts_with(b"quot;"),
        Some(b'#') => match window.get(1) {
            Some(b'x') => terminated_run(&window[2..], 4, |b| b.is_ascii_hexdigit()),
            Some(_) => terminated_run(&window[1..], 5, |b| b.is_ascii_digit()),
            None => false,
        },
        _ => false,
    }
}

/// True when `bytes` starts with 1..=`max` bytes accepted by `is_digit`,
/// immediately followed by `;`.
fn terminated_run(bytes: &[u8], max: usize, is_digit: impl Fn(u8) -> bool) -> bool {
    let mut count = 0;
    for &b in bytes {
        if b == b';' {
            return count > 0;
        }
        if count == max || !is_digit(b) {
            return false;
        }
        count += 1;
    }
    false
}

#[inline]
fn window_after(data: &[u8], amp: usize) -> &[u8] {
    &data[amp + 1..data.len().min(amp + MAX_ENTITY_LEN)]
}

/// Rewrites every `&` that does not begin a legal reference to `&amp;`.
///
/// Returns the input unchanged (and unallocated) when nothing needs fixing.
/// Legal references, including those produced by an earlier repair pass, are
/// never touched.
pub fn repair_entities(data: &[u8]) -> Cow<'_, [u8]> {
    // Find the first offending `&` without copying anything.
    let mut amp = match memchr(b'&', data) {
        Some(pos) => pos,
        None => return Cow::Borrowed(data),
    };
    loop {
        if !is_legal_reference(window_after(data, amp)) {
            break;
        }
        match memchr(b'&', &data[amp + 1..]) {
            Some(offset) => amp = amp + 1 + offset,
            None => return Cow::Borrowed(data),
        }
    }

    let mut out = data.to_vec();
    let mut next = Some(amp);
    while let Some(amp) = next {
        if !is_legal_reference(window_after(&out, amp)) {
            // The inserted text contains no `&`, so the scan below resumes
            // past it and cannot loop.
            out.splice(amp + 1..amp + 1, *b"amp;");
        }
        next = memchr(b'&', &out[amp + 1..]).map(|offset| amp + 1 + offset);
    }
    Cow::Owned(out)
}

/// [`repair_entities`] for text that is already known to be valid UTF-8.
pub fn repair_entities_str(text: &str) -> Cow<'_, str> {
    match repair_entities(text.as_bytes()) {
        Cow::Borrowed(_) => Cow::Borrowed(text),
        // Safety: insertions are ASCII and happen at ASCII boundaries, so the
        // buffer remains valid UTF-8.
        Cow::Owned(bytes) => Cow::Owned(unsafe { String::from_utf8_unchecked(bytes) }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn repaired(input: &str) -> String {
        repair_entities_str(input).into_owned()
    }

    #[test]
    fn legal_references_pass_through_unchanged() {
        let input = "a &amp; b &lt; c &gt; d &quot;e&quot; &apos;f&apos;";
        assert!(matches!(
            repair_entities(input.as_bytes()),
            Cow::Borrowed(_)
        ));
    }

    #[test]
    fn numeric_references_pass_through_unchanged() {
        for input in ["&#1;", "&#63;", "&#65535;", "&#x3f;", "&#xFFFF;", "&#x003F;"] {
            assert!(matches!(repair_entities(input.as_bytes()), Cow::Borrowed(_)));
        }
    }

    #[test]
    fn bare_ampersand_becomes_amp() {
        assert_eq!(repaired("fish & chips"), "fish &amp; chips");
    }

    #[test]
    fn ampersand_at_end_of_input() {
        assert_eq!(repaired("dangling &"), "dangling &amp;");
    }

    #[test]
    fn consecutive_ampersands() {
        assert_eq!(repaired("&&"), "&amp;&amp;");
        assert_eq!(repaired("&&amp;&"), "&amp;&amp;&amp;");
    }

    #[test]
    fn query_string_mixed_with_references() {
        assert_eq!(
            repaired("?key=ABC&language=en&#x3f;"),
            "?key=ABC&amp;language=en&#x3f;"
        );
    }

    #[test]
    fn too_many_digits_is_not_a_reference() {
        // Six decimal digits: the terminator can no longer fall inside the
        // 8-byte window.
        assert_eq!(repaired("&#123456;"), "&amp;#123456;");
        // Five hex digits exceed the four allowed.
        assert_eq!(repaired("&#x12345;"), "&amp;#x12345;");
    }

    #[test]
    fn empty_or_malformed_numeric_forms() {
        assert_eq!(repaired("&#;"), "&amp;#;");
        assert_eq!(repaired("&#x;"), "&amp;#x;");
        assert_eq!(repaired("&#"), "&amp;#");
        assert_eq!(repaired("&#xg;"), "&amp;#xg;");
    }

    #[test]
    fn named_prefix_without_terminator() {
        assert_eq!(repaired("&amp"), "&amp;amp");
        assert_eq!(repaired("&ap;"), "&amp;ap;");
        assert_eq!(repaired("&ampersand"), "&amp;ampersand");
    }

    #[test]
    fn repair_is_idempotent() {
        for input in [
            "fish & chips",
            "&&",
            "a=1&b=2&c=3",
            "&#123456;",
            "mixed &amp; bare & refs &#63;",
        ] {
            let once = repaired(input);
            assert_eq!(repaired(&once), once);
        }
    }

    #[test]
    fn no_ampersand_is_borrowed() {
        assert!(matches!(repair_entities(b"plain text"), Cow::Borrowed(_)));
        assert!(matches!(repair_entities(b""), Cow::Borrowed(_)));
    }

    #[test]
    fn multibyte_text_around_ampersand() {
        assert_eq!(repaired("caf\u{e9} & bar"), "caf\u{e9} &amp; bar");
    }
}
