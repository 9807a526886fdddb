//! Internal module turning raw fetched messages into [`Email`] values.

use crate::error::{Error, Result};
use crate::model::Email;
use crate::source::FetchedMessage;
use chrono::{DateTime, TimeZone, Utc};
use mailparse::{parse_mail, DispositionType, MailHeaderMap, ParsedMail};
use tracing::debug;

/// Maximum number of characters kept in [`Email::preview`].
const PREVIEW_CHARS: usize = 100;

/// Parses a fetched message into an [`Email`].
///
/// The body is the concatenation of every inline `text/*` part; attachments are
/// skipped. The received timestamp prefers the server's INTERNALDATE, then the
/// `Date` header, then the current time.
pub(crate) fn parse_email(message: &FetchedMessage) -> Result<Email> {
    if message.raw.is_empty() {
        return Err(Error::EmptyMessage { uid: message.uid });
    }

    let parsed = parse_mail(&message.raw).map_err(|source| Error::ParseEmail {
        uid: message.uid,
        source,
    })?;

    let mut parts = Vec::new();
    collect_inline_text(&parsed, &mut parts).map_err(|source| Error::ParseEmail {
        uid: message.uid,
        source,
    })?;
    let body = parts.join("\n");

    let header = |name: &str| parsed.headers.get_first_value(name).unwrap_or_default();

    let received_at = message
        .internal_date
        .or_else(|| date_header(&parsed))
        .unwrap_or_else(Utc::now);

    debug!(uid = message.uid, parts = parts.len(), "Parsed email");

    Ok(Email {
        uid: message.uid,
        subject: header("Subject"),
        sender: header("From"),
        recipient: header("To"),
        preview: preview(&body),
        body,
        received_at,
    })
}

/// Recursively collects the decoded text of inline parts.
fn collect_inline_text(
    part: &ParsedMail<'_>,
    out: &mut Vec<String>,
) -> std::result::Result<(), mailparse::MailParseError> {
    if part.get_content_disposition().disposition == DispositionType::Attachment {
        return Ok(());
    }

    if part.subparts.is_empty() {
        if part.ctype.mimetype.to_lowercase().starts_with("text/") {
            out.push(part.get_body()?);
        }
        return Ok(());
    }

    for sub in &part.subparts {
        collect_inline_text(sub, out)?;
    }
    Ok(())
}

fn date_header(parsed: &ParsedMail<'_>) -> Option<DateTime<Utc>> {
    let raw = parsed.headers.get_first_value("Date")?;
    let timestamp = mailparse::dateparse(&raw).ok()?;
    Utc.timestamp_opt(timestamp, 0).single()
}

fn preview(body: &str) -> String {
    let collapsed = body.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(PREVIEW_CHARS).collect()
}
