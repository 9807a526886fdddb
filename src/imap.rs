//! Internal IMAP command wrappers.
//!
//! This module wraps async-imap operations with proper error handling.

use crate::connection::MailStream;
use crate::error::{Error, Result};
use crate::source::{FetchedMessage, MailboxStatus};
use async_imap::Session;
use chrono::Utc;
use futures::StreamExt;
use tracing::{debug, instrument, warn};

/// Type alias for an IMAP session over the selected transport.
pub(crate) type ImapSession = Session<MailStream>;

/// Fetch attributes: UID, server receive time and the full message without setting `\Seen`.
const FETCH_QUERY: &str = "(UID INTERNALDATE BODY.PEEK[])";

/// Authenticates to IMAP server and returns a session.
#[instrument(name = "imap::authenticate", skip_all, fields(username = %username))]
pub(crate) async fn authenticate(
    stream: MailStream,
    username: &str,
    password: &str,
) -> Result<ImapSession> {
    let client = async_imap::Client::new(stream);

    debug!("Authenticating to IMAP server");

    client
        .login(username, password)
        .await
        .map_err(|e| Error::ImapLogin {
            username: username.to_string(),
            source: e.0,
        })
}

/// Selects a mailbox (typically "INBOX").
#[instrument(name = "imap::select", skip(session), fields(mailbox = %mailbox))]
pub(crate) async fn select_mailbox(
    session: &mut ImapSession,
    mailbox: &str,
) -> Result<MailboxStatus> {
    debug!("Selecting mailbox");

    let selected = session
        .select(mailbox)
        .await
        .map_err(|source| Error::SelectMailbox {
            mailbox: mailbox.to_string(),
            source,
        })?;

    Ok(MailboxStatus {
        uid_validity: selected.uid_validity,
        exists: selected.exists,
    })
}

/// Lists every UID in the selected mailbox, ascending.
#[instrument(name = "imap::list_uids", skip(session))]
pub(crate) async fn list_uids(session: &mut ImapSession) -> Result<Vec<u32>> {
    // NOOP to ensure we have latest state
    session
        .noop()
        .await
        .map_err(|source| Error::ImapNoop { source })?;

    let uids = session
        .uid_search("ALL")
        .await
        .map_err(|source| Error::ImapSearch { source })?;

    let mut uids: Vec<u32> = uids.into_iter().collect();
    uids.sort_unstable();

    debug!(uid_count = uids.len(), max_uid = uids.last().copied(), "Listed UIDs");

    Ok(uids)
}

/// Fetches messages for a UID set, skipping responses that fail to decode.
#[instrument(name = "imap::fetch", skip(session), fields(uid_range = %uid_range))]
pub(crate) async fn fetch_messages(
    session: &mut ImapSession,
    uid_range: &str,
) -> Result<Vec<FetchedMessage>> {
    let mut stream = session
        .uid_fetch(uid_range, FETCH_QUERY)
        .await
        .map_err(|source| Error::ImapFetch {
            uid_range: uid_range.to_string(),
            source,
        })?;

    let mut messages = Vec::new();
    while let Some(item) = stream.next().await {
        let fetch = match item {
            Ok(fetch) => fetch,
            Err(e) => {
                warn!(error = %e, "Failed to read fetch response, skipping message");
                continue;
            }
        };

        let Some(uid) = fetch.uid else {
            warn!(seq = fetch.message, "Fetch response without UID, skipping message");
            continue;
        };

        messages.push(FetchedMessage {
            uid,
            raw: fetch.body().map(<[u8]>::to_vec).unwrap_or_default(),
            internal_date: fetch.internal_date().map(|d| d.with_timezone(&Utc)),
        });
    }

    debug!(fetched = messages.len(), "Fetched messages");

    Ok(messages)
}

/// Logs out from IMAP session.
#[instrument(name = "imap::logout", skip(session))]
pub(crate) async fn logout(session: &mut ImapSession) -> Result<()> {
    debug!("Logging out");

    session
        .logout()
        .await
        .map_err(|source| Error::ImapLogout { source })?;

    Ok(())
}
