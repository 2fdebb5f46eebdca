//! RFC 5322 message parser on top of `mailparse`.
//!
//! Body extraction prefers `text/plain` parts and falls back to `text/html`
//! converted to text. Attachment parts are skipped but flagged.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use mailparse::{DispositionType, MailAddr, MailHeaderMap, ParsedMail};
use regex::Regex;

use onebox_core::error::ParseError;
use onebox_core::types::{email_id, NormalizedEmail, RawMessage, NO_SUBJECT};
use onebox_sync::traits::MessageParser;

/// Stateless `MessageParser` implementation.
#[derive(Clone, Copy, Debug, Default)]
pub struct MailParser;

impl MailParser {
    pub fn new() -> Self {
        Self
    }
}

impl MessageParser for MailParser {
    fn parse(
        &self,
        account_id: &str,
        folder: &str,
        raw: &RawMessage,
    ) -> Result<NormalizedEmail, ParseError> {
        if raw.bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(ParseError::Empty { uid: raw.uid });
        }

        let parsed = mailparse::parse_mail(&raw.bytes).map_err(|e| ParseError::Malformed {
            uid: raw.uid,
            reason: e.to_string(),
        })?;
        if parsed.headers.is_empty() {
            return Err(ParseError::Malformed {
                uid: raw.uid,
                reason: "no headers".to_string(),
            });
        }

        let header = |name: &str| -> String {
            parsed
                .headers
                .get_first_value(name)
                .map(|v| v.trim().to_string())
                .unwrap_or_default()
        };

        let now = Utc::now();
        let subject = match header("Subject") {
            s if s.is_empty() => NO_SUBJECT.to_string(),
            s => s,
        };
        let message_id = header("Message-ID");
        let date = parse_date(&header("Date")).unwrap_or(now);

        Ok(NormalizedEmail {
            id: email_id(account_id, &message_id, raw.uid, now),
            account_id: account_id.to_string(),
            folder: folder.to_string(),
            subject,
            body: extract_body(&parsed),
            from: header("From"),
            to: addresses(&parsed, "To"),
            cc: addresses(&parsed, "Cc"),
            bcc: addresses(&parsed, "Bcc"),
            date,
            message_id,
            has_attachments: has_attachments(&parsed),
            indexed_at: now,
        })
    }
}

// ─────────────────────────────────────────────
// Headers
// ─────────────────────────────────────────────

fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    if value.is_empty() {
        return None;
    }
    let secs = mailparse::dateparse(value).ok()?;
    DateTime::from_timestamp(secs, 0)
}

/// Bare addresses from an address-list header; groups are flattened.
fn addresses(mail: &ParsedMail, name: &str) -> Vec<String> {
    let Some(header) = mail.headers.get_first_header(name) else {
        return Vec::new();
    };
    let Ok(list) = mailparse::addrparse_header(header) else {
        return vec![header.get_value().trim().to_string()];
    };

    let mut out = Vec::new();
    for addr in list.iter() {
        match addr {
            MailAddr::Single(info) => out.push(info.addr.clone()),
            MailAddr::Group(group) => out.extend(group.addrs.iter().map(|a| a.addr.clone())),
        }
    }
    out
}

// ─────────────────────────────────────────────
// Body
// ─────────────────────────────────────────────

/// Extract text body (prefer text/plain, fallback HTML).
fn extract_body(mail: &ParsedMail) -> String {
    if mail.subparts.is_empty() {
        let body = mail.get_body().unwrap_or_default();
        return if mail.ctype.mimetype.eq_ignore_ascii_case("text/html") {
            html_to_text(&body)
        } else {
            body.trim().to_string()
        };
    }

    let mut plain = Vec::new();
    let mut html = Vec::new();
    collect_text_parts(mail, &mut plain, &mut html);

    if !plain.is_empty() {
        plain.join("\n").trim().to_string()
    } else {
        html.iter()
            .map(|h| html_to_text(h))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Recursively collect inline text parts from a multipart message.
fn collect_text_parts(mail: &ParsedMail, plain: &mut Vec<String>, html: &mut Vec<String>) {
    for part in &mail.subparts {
        if part.get_content_disposition().disposition == DispositionType::Attachment {
            continue;
        }
        if !part.subparts.is_empty() {
            collect_text_parts(part, plain, html);
            continue;
        }
        let Ok(body) = part.get_body() else {
            continue;
        };
        match part.ctype.mimetype.to_ascii_lowercase().as_str() {
            "text/plain" => plain.push(body),
            "text/html" => html.push(body),
            _ => {}
        }
    }
}

fn has_attachments(mail: &ParsedMail) -> bool {
    mail.subparts.iter().any(|part| {
        let disposition = part.get_content_disposition();
        disposition.disposition == DispositionType::Attachment
            || disposition.params.contains_key("filename")
            || has_attachments(part)
    })
}

fn pattern(cell: &'static OnceLock<Option<Regex>>, source: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(source).ok()).as_ref()
}

/// Convert minimal HTML to plain text.
pub fn html_to_text(html: &str) -> String {
    static BREAK: OnceLock<Option<Regex>> = OnceLock::new();
    static PARAGRAPH: OnceLock<Option<Regex>> = OnceLock::new();
    static TAG: OnceLock<Option<Regex>> = OnceLock::new();

    let mut text = html.to_string();
    for (cell, source, with) in [
        (&BREAK, r"(?i)<br\s*/?>", "\n"),
        (&PARAGRAPH, r"(?i)</p>", "\n"),
        (&TAG, r"<[^>]+>", ""),
    ] {
        if let Some(re) = pattern(cell, source) {
            text = re.replace_all(&text, with).into_owned();
        }
    }

    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
