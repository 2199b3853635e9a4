//! Text normalization for mail payloads and headers.
//!
//! Every function here is total: whatever bytes come in, some text comes
//! out. Charset guessing uses chardetng, conversion uses encoding_rs, and
//! transfer encodings go through mail-parser's decoders.

use std::borrow::Cow;

use encoding_rs::Encoding;
use mail_parser::decoders::base64::base64_decode;
use mail_parser::decoders::quoted_printable::quoted_printable_decode;

/// Labels tried after the detector's guess, in order.
pub const FALLBACK_CHARSETS: &[&str] = &[
    "utf-8",
    "iso-8859-1",
    "windows-1252",
    "ascii",
    "latin-1",
    "cp1252",
];

// ── Charsets ────────────────────────────────────────────────────────

/// A resolved character set.
///
/// Latin-1 and ASCII are handled directly because the WHATWG registry
/// folds both labels into windows-1252, which is not byte-exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    /// ISO-8859-1: every byte maps to the code point of the same value.
    Latin1,
    /// Strict 7-bit ASCII.
    Ascii,
    /// Any encoding from the WHATWG registry.
    Whatwg(&'static Encoding),
}

impl Charset {
    /// Resolve a charset label (case-insensitive, surrounding whitespace
    /// and quotes ignored). Returns `None` for unknown labels.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim().trim_matches('"').to_ascii_lowercase();
        match label.as_str() {
            "iso-8859-1" | "iso8859-1" | "iso_8859-1" | "latin-1" | "latin1" | "l1" => {
                Some(Self::Latin1)
            }
            "ascii" | "us-ascii" => Some(Self::Ascii),
            "cp1252" => Some(Self::Whatwg(encoding_rs::WINDOWS_1252)),
            other => Encoding::for_label(other.as_bytes()).map(Self::Whatwg),
        }
    }

    /// Decode strictly: `None` if the bytes are not valid in this charset.
    pub fn decode_strict(self, bytes: &[u8]) -> Option<String> {
        match self {
            Self::Latin1 => Some(bytes.iter().map(|&b| char::from(b)).collect()),
            Self::Ascii => bytes
                .is_ascii()
                .then(|| bytes.iter().map(|&b| char::from(b)).collect()),
            Self::Whatwg(encoding) => encoding
                .decode_without_bom_handling_and_without_replacement(bytes)
                .map(Cow::into_owned),
        }
    }
}

/// Ask the statistical detector for its best guess.
fn detect(bytes: &[u8]) -> Charset {
    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(bytes, true);
    Charset::Whatwg(detector.guess(None, true))
}

// ── Payload decoding ────────────────────────────────────────────────

/// Decode a payload to text. Never fails; `None` decodes to `""`.
pub fn decode(payload: Option<&[u8]>) -> String {
    decode_with_hint(payload, None)
}

/// Decode a payload. The detector's guess is tried first, then the
/// declared charset (from a MIME header or an encoded word), then the
/// fallback chain. A mislabelled part therefore still decodes to what
/// the detector sees.
pub fn decode_with_hint(payload: Option<&[u8]>, declared: Option<&str>) -> String {
    let Some(bytes) = payload else {
        return String::new();
    };

    let mut tried: Vec<Charset> = Vec::with_capacity(FALLBACK_CHARSETS.len() + 2);
    let candidates = std::iter::once(detect(bytes))
        .chain(declared.and_then(Charset::from_label))
        .chain(FALLBACK_CHARSETS.iter().filter_map(|l| Charset::from_label(l)));

    for charset in candidates {
        if tried.contains(&charset) {
            continue;
        }
        tried.push(charset);
        if let Some(text) = charset.decode_strict(bytes) {
            return text;
        }
    }

    String::from_utf8_lossy(bytes).into_owned()
}

// ── Transfer encodings ──────────────────────────────────────────────

/// Undo a Content-Transfer-Encoding. Unknown encodings and undecodable
/// input come back unchanged.
pub fn decode_transfer(encoding: Option<&str>, bytes: &[u8]) -> Vec<u8> {
    let encoding = encoding.map(|e| e.trim().to_ascii_lowercase());
    let decoded = match encoding.as_deref() {
        Some("base64") => base64_decode(bytes),
        Some("quoted-printable") => quoted_printable_decode(bytes),
        _ => None,
    };
    decoded.unwrap_or_else(|| bytes.to_vec())
}

/// RFC 2047 "Q" text: quoted-printable where `_` stands for a space.
fn decode_q_word(text: &[u8]) -> Option<Vec<u8>> {
    let spaced: Vec<u8> = text
        .iter()
        .map(|&b| if b == b'_' { b' ' } else { b })
        .collect();
    quoted_printable_decode(&spaced)
}

// ── Header decoding ─────────────────────────────────────────────────

/// Decode a raw header value: unfold, then decode every RFC 2047
/// encoded word. Whitespace between adjacent encoded words is dropped.
pub fn decode_header(raw: &[u8]) -> String {
    let text = decode(Some(raw));
    let unfolded = unfold(&text);

    let mut out = String::with_capacity(unfolded.len());
    let mut pending_ws = String::new();
    let mut last_was_word = false;
    let mut rest = unfolded.as_str();

    while !rest.is_empty() {
        if rest.starts_with("=?")
            && let Some((decoded, consumed)) = parse_encoded_word(rest)
        {
            if !last_was_word {
                out.push_str(&pending_ws);
            }
            pending_ws.clear();
            out.push_str(&decoded);
            last_was_word = true;
            rest = &rest[consumed..];
            continue;
        }

        let ch = rest.chars().next().unwrap_or(' ');
        if ch == ' ' || ch == '\t' {
            pending_ws.push(ch);
        } else {
            out.push_str(&pending_ws);
            pending_ws.clear();
            out.push(ch);
            last_was_word = false;
        }
        rest = &rest[ch.len_utf8()..];
    }
    out.push_str(&pending_ws);

    out.trim().to_string()
}

/// Remove header folding (CRLF or LF followed by whitespace).
fn unfold(text: &str) -> String {
    text.replace("\r\n", "\n")
        .split('\n')
        .map(|line| line.trim_end_matches('\r'))
        .collect::<Vec<_>>()
        .join("")
}

/// Parse `=?charset?enc?text?=` at the start of `input`.
/// Returns the decoded text and the number of bytes consumed.
fn parse_encoded_word(input: &str) -> Option<(String, usize)> {
    let body = input.strip_prefix("=?")?;
    let charset_end = body.find('?')?;
    let charset = &body[..charset_end];
    let after_charset = &body[charset_end + 1..];
    let encoding_end = after_charset.find('?')?;
    let encoding = &after_charset[..encoding_end];
    let after_encoding = &after_charset[encoding_end + 1..];
    let text_end = after_encoding.find("?=")?;
    let text = &after_encoding[..text_end];

    if charset.is_empty() || text.contains(' ') {
        return None;
    }

    // RFC 2231 language suffix: charset*lang
    let charset = charset.split('*').next().unwrap_or(charset);

    let bytes = match encoding {
        "B" | "b" => base64_decode(text.as_bytes())?,
        "Q" | "q" => decode_q_word(text.as_bytes())?,
        _ => return None,
    };

    let consumed = 2 + charset_end + 1 + encoding_end + 1 + text_end + 2;
    Some((decode_with_hint(Some(bytes.as_slice()), Some(charset)), consumed))
}
