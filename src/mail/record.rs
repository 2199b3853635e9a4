//! Mail record builder: one raw RFC 822 message in, one normalized record out.

use mail_parser::{HeaderName, Message, MessageParser, MessagePart, MimeHeaders, PartType};
use serde::{Deserialize, Serialize};

use crate::error::BuildError;
use crate::mail::decode::{decode_header, decode_transfer, decode_with_hint};

/// A message exactly as the mail source delivered it.
#[derive(Debug, Clone)]
pub struct RawMessage {
    /// Mailbox-local identifier (IMAP sequence number).
    pub id: String,
    /// Full message: headers and body.
    pub bytes: Vec<u8>,
}

impl RawMessage {
    pub fn new(id: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            bytes: bytes.into(),
        }
    }
}

/// A message reduced to the text the classifiers look at.
///
/// `subject` and `body` are always valid text, possibly empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedMessage {
    pub id: String,
    pub subject: String,
    pub body: String,
    /// Decoded `From` header, if the message had one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
}

impl NormalizedMessage {
    pub fn new(id: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            subject: subject.into(),
            body: body.into(),
            sender: None,
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }
}

/// Build a normalized record from a raw message.
pub fn build(raw: &RawMessage) -> Result<NormalizedMessage, BuildError> {
    if raw.bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(BuildError::Empty { id: raw.id.clone() });
    }

    let parsed = MessageParser::default()
        .parse(raw.bytes.as_slice())
        .ok_or_else(|| BuildError::Unparseable { id: raw.id.clone() })?;

    let root = parsed
        .parts
        .first()
        .ok_or_else(|| BuildError::Unparseable { id: raw.id.clone() })?;
    if root.headers.is_empty() {
        return Err(BuildError::NoHeaders { id: raw.id.clone() });
    }

    let subject = raw_header(&parsed, root, HeaderName::Subject)
        .map(decode_header)
        .unwrap_or_default();
    let sender = raw_header(&parsed, root, HeaderName::From)
        .map(decode_header)
        .filter(|s| !s.is_empty());
    let body = extract_body(&parsed);

    Ok(NormalizedMessage {
        id: raw.id.clone(),
        subject,
        body,
        sender,
    })
}

/// Raw bytes of the first header named `name` on `part`.
fn raw_header<'a>(
    message: &'a Message<'_>,
    part: &MessagePart<'_>,
    name: HeaderName<'static>,
) -> Option<&'a [u8]> {
    let header = part.headers.iter().find(|h| h.name == name)?;
    message
        .raw_message
        .get(header.offset_start as usize..header.offset_end as usize)
}

/// Body text: the first `text/plain` part of a multipart message, or the
/// sole payload of a single-part message.
fn extract_body(message: &Message<'_>) -> String {
    let Some(root) = message.parts.first() else {
        return String::new();
    };

    if !matches!(root.body, PartType::Multipart(_)) {
        return decode_part(message, root);
    }

    message
        .parts
        .iter()
        .skip(1)
        .find(|part| is_text_plain(part))
        .map(|part| decode_part(message, part))
        .unwrap_or_default()
}

/// A part with no Content-Type is treated as text/plain.
fn is_text_plain(part: &MessagePart<'_>) -> bool {
    if matches!(part.body, PartType::Multipart(_)) {
        return false;
    }
    match part.content_type() {
        None => true,
        Some(ct) => {
            ct.ctype().eq_ignore_ascii_case("text")
                && ct
                    .subtype()
                    .is_some_and(|sub| sub.eq_ignore_ascii_case("plain"))
        }
    }
}

/// Transfer-decode and charset-decode one part's raw body.
fn decode_part(message: &Message<'_>, part: &MessagePart<'_>) -> String {
    let Some(encoded) = message
        .raw_message
        .get(part.offset_body as usize..part.offset_end as usize)
    else {
        return String::new();
    };
    let bytes = decode_transfer(part.content_transfer_encoding(), encoded);
    let charset = part.content_type().and_then(|ct| ct.attribute("charset"));
    decode_with_hint(Some(bytes.as_slice()), charset)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(id: &str, text: &str) -> RawMessage {
        RawMessage::new(id, text.replace('\n', "\r\n").into_bytes())
    }

    #[test]
    fn single_part_plain_text() {
        let msg = raw(
            "1",
            "From: Alice <alice@example.com>\n\
             Subject: Lunch on Friday?\n\
             Content-Type: text/plain; charset=utf-8\n\
             \n\
             Are you free at noon?\n",
        );
        let record = build(&msg).unwrap();
        assert_eq!(record.id, "1");
        assert_eq!(record.subject, "Lunch on Friday?");
        assert_eq!(record.body.trim_end(), "Are you free at noon?");
        assert_eq!(record.sender.as_deref(), Some("Alice <alice@example.com>"));
    }

    #[test]
    fn multipart_first_text_plain_wins() {
        let msg = raw(
            "2",
            "Subject: Report\n\
             MIME-Version: 1.0\n\
             Content-Type: multipart/alternative; boundary=\"b1\"\n\
             \n\
             --b1\n\
             Content-Type: text/html; charset=utf-8\n\
             \n\
             <p>html version</p>\n\
             --b1\n\
             Content-Type: text/plain; charset=utf-8\n\
             \n\
             first plain part\n\
             --b1\n\
             Content-Type: text/plain; charset=utf-8\n\
             \n\
             second plain part\n\
             --b1--\n",
        );
        let record = build(&msg).unwrap();
        assert_eq!(record.body.trim_end(), "first plain part");
        assert!(!record.body.contains("second"));
        assert!(!record.body.contains("html"));
    }

    #[test]
    fn html_only_multipart_has_empty_body() {
        let msg = raw(
            "3",
            "Subject: Newsletter\n\
             MIME-Version: 1.0\n\
             Content-Type: multipart/mixed; boundary=\"zz\"\n\
             \n\
             --zz\n\
             Content-Type: text/html; charset=utf-8\n\
             \n\
             <h1>Big sale</h1>\n\
             --zz--\n",
        );
        let record = build(&msg).unwrap();
        assert_eq!(record.subject, "Newsletter");
        assert_eq!(record.body, "");
    }

    #[test]
    fn base64_part_with_declared_charset() {
        // ISO-8859-1 French, base64-encoded
        let msg = raw(
            "4",
            "Subject: Coffee\n\
             MIME-Version: 1.0\n\
             Content-Type: multipart/mixed; boundary=\"q\"\n\
             \n\
             --q\n\
             Content-Type: text/plain; charset=iso-8859-1\n\
             Content-Transfer-Encoding: base64\n\
             \n\
             TGUgY2Fm6SBlc3QgcHLqdCwg4CBiaWVudPR0IOAgbGEgY2Fm6XTpcmlhLg==\n\
             --q--\n",
        );
        let record = build(&msg).unwrap();
        assert_eq!(record.body, "Le café est prêt, à bientôt à la cafétéria.");
    }

    #[test]
    fn utf8_part_mislabelled_as_latin1() {
        let msg = raw(
            "4b",
            "Subject: Meeting\n\
             Content-Type: text/plain; charset=iso-8859-1\n\
             Content-Transfer-Encoding: base64\n\
             \n\
             UsOpdW5pb24gw6AgMTBoLCBtZXJjaSBkZSBjb25maXJtZXIgdm90cmUgcHLDqXNlbmNlLg==\n",
        );
        let record = build(&msg).unwrap();
        assert_eq!(
            record.body,
            "Réunion à 10h, merci de confirmer votre présence."
        );
    }

    #[test]
    fn quoted_printable_single_part() {
        let msg = raw(
            "5",
            "Subject: QP\n\
             Content-Type: text/plain; charset=utf-8\n\
             Content-Transfer-Encoding: quoted-printable\n\
             \n\
             Caf=C3=A9 au lait\n",
        );
        let record = build(&msg).unwrap();
        assert_eq!(record.body.trim_end(), "Café au lait");
    }

    #[test]
    fn multi_fragment_subject_fully_decoded() {
        let msg = raw(
            "6",
            "Subject: =?UTF-8?Q?Interview_request?=\n =?UTF-8?Q?_for_role?=\n\
             \n\
             body\n",
        );
        let record = build(&msg).unwrap();
        assert_eq!(record.subject, "Interview request for role");
    }

    #[test]
    fn missing_subject_is_empty_string() {
        let msg = raw("7", "From: bob@example.com\n\nno subject here\n");
        let record = build(&msg).unwrap();
        assert_eq!(record.subject, "");
        assert_eq!(record.body.trim_end(), "no subject here");
    }

    #[test]
    fn missing_from_is_none() {
        let msg = raw("8", "Subject: anon\n\nhello\n");
        let record = build(&msg).unwrap();
        assert!(record.sender.is_none());
    }

    #[test]
    fn empty_message_is_rejected() {
        let err = build(&RawMessage::new("9", b"  \r\n".to_vec())).unwrap_err();
        assert!(matches!(err, BuildError::Empty { ref id } if id == "9"));
    }
}
