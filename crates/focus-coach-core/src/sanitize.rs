//! Text sanitizer for model- and tool-originated strings.
//!
//! Everything that crosses the model or tool boundary passes through here
//! before it is stored in the transcript or serialized into a request.
//!
//! Rust `&str` values are always valid UTF-8, so the damage this module
//! repairs happens at the points where untyped data becomes text:
//!
//! - [`sanitize_bytes`]: raw bytes (HTTP bodies) with invalid UTF-8
//!   sequences removed.
//! - [`sanitize_utf16`]: UTF-16 code units with unpaired surrogates removed.
//! - [`strip_lone_surrogate_escapes`]: JSON text whose `\uXXXX` escapes
//!   encode an unpaired surrogate, which `serde_json` refuses to decode.
//! - [`sanitize`]: already-decoded text. A `&str` can never hold an
//!   unencodable code unit, so every character is kept.
//!
//! Control characters, the byte-order mark and noncharacters are valid
//! scalar values and survive untouched; JSON encoders escape them.
//!
//! All functions are total and idempotent: `f(f(x)) == f(x)`.

use std::borrow::Cow;

/// Normalize decoded text so it can be stored and re-sent safely.
///
/// Every character of a `&str` is independently encodable, so this is the
/// identity: non-Latin scripts, emoji, punctuation and control characters
/// are all preserved.
///
/// ```rust
/// use focus_coach_core::sanitize::sanitize;
///
/// assert_eq!(sanitize("¡Terminé el informe! ✅"), "¡Terminé el informe! ✅");
/// assert_eq!(sanitize("a\u{1}b\u{feff}"), "a\u{1}b\u{feff}");
/// ```
pub fn sanitize(text: &str) -> String {
    text.to_string()
}

/// [`sanitize`] for optional text. Absent input yields an empty string.
pub fn sanitize_opt(text: Option<&str>) -> String {
    text.map(sanitize).unwrap_or_default()
}

/// Decode raw bytes as UTF-8, dropping every invalid sequence.
pub fn sanitize_bytes(bytes: &[u8]) -> String {
    let mut decoded = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        decoded.push_str(chunk.valid());
    }
    sanitize(&decoded)
}

/// Decode UTF-16 code units, dropping unpaired surrogates.
pub fn sanitize_utf16(units: &[u16]) -> String {
    let decoded: String = char::decode_utf16(units.iter().copied())
        .filter_map(Result::ok)
        .collect();
    sanitize(&decoded)
}

fn parse_hex4(bytes: &[u8]) -> Option<u16> {
    if bytes.len() < 4 || !bytes[..4].iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    let s = std::str::from_utf8(&bytes[..4]).ok()?;
    u16::from_str_radix(s, 16).ok()
}

fn is_high_surrogate(v: u16) -> bool {
    (0xD800..=0xDBFF).contains(&v)
}

fn is_low_surrogate(v: u16) -> bool {
    (0xDC00..=0xDFFF).contains(&v)
}

/// Remove JSON `\uXXXX` escapes that encode unpaired surrogates.
///
/// Properly paired escapes (`\uD83D\uDE00`) and escaped backslashes
/// (`\\uD800`, which is the literal text `\uD800`) are left alone. Returns
/// the input unchanged (borrowed) when nothing needed removing.
///
/// ```rust
/// use focus_coach_core::sanitize::strip_lone_surrogate_escapes;
///
/// let raw = r#"{"content":"hola \ud800mundo"}"#;
/// assert_eq!(strip_lone_surrogate_escapes(raw), r#"{"content":"hola mundo"}"#);
/// ```
pub fn strip_lone_surrogate_escapes(raw: &str) -> Cow<'_, str> {
    let bytes = raw.as_bytes();
    let mut out: Option<String> = None;
    let mut copied_to = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'\\' {
            i += 1;
            continue;
        }
        if bytes.get(i + 1) != Some(&b'u') {
            // Any other escape, including `\\`, is two bytes long.
            i += 2;
            continue;
        }
        let Some(value) = parse_hex4(&bytes[i + 2..]) else {
            i += 2;
            continue;
        };

        if is_high_surrogate(value) {
            let paired = bytes.get(i + 6) == Some(&b'\\')
                && bytes.get(i + 7) == Some(&b'u')
                && parse_hex4(&bytes[(i + 8).min(bytes.len())..])
                    .is_some_and(is_low_surrogate);
            if paired {
                i += 12;
                continue;
            }
        } else if !is_low_surrogate(value) {
            i += 6;
            continue;
        }

        // Lone surrogate escape: skip its six bytes.
        let buf = out.get_or_insert_with(|| String::with_capacity(raw.len()));
        buf.push_str(&raw[copied_to..i]);
        i += 6;
        copied_to = i;
    }

    match out {
        Some(mut buf) => {
            buf.push_str(&raw[copied_to..]);
            Cow::Owned(buf)
        }
        None => Cow::Borrowed(raw),
    }
}
