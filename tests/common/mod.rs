//! In-memory mailbox shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use email_auth_flow::{Error, FetchedMessage, MailSource, MailboxStatus, Result};
use std::sync::{Arc, Mutex, MutexGuard};

/// Server-side state of the fake mailbox.
#[derive(Debug)]
pub struct FakeMailbox {
    pub messages: Vec<FetchedMessage>,
    pub uid_validity: u32,
    pub next_uid: u32,
    pub open: bool,
    pub open_calls: usize,
    pub fetched_sets: Vec<String>,
    /// Number of upcoming `open` calls that fail.
    pub failing_opens: usize,
    /// Number of upcoming `list_uids` calls that fail.
    pub failing_lists: usize,
}

impl Default for FakeMailbox {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            uid_validity: 1,
            next_uid: 1,
            open: false,
            open_calls: 0,
            fetched_sets: Vec::new(),
            failing_opens: 0,
            failing_lists: 0,
        }
    }
}

/// A [`MailSource`] over a [`FakeMailbox`]. Clones share the mailbox, so a test can
/// deliver mail while a monitor owns the source.
#[derive(Debug, Clone, Default)]
pub struct FakeSource {
    mailbox: Arc<Mutex<FakeMailbox>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mailbox(&self) -> MutexGuard<'_, FakeMailbox> {
        self.mailbox.lock().unwrap()
    }

    /// Delivers a plain-text message and returns its UID.
    pub fn deliver(&self, to: &str, subject: &str, body: &str) -> u32 {
        let raw = format!(
            "From: no-reply@app.example.com\r\nTo: {to}\r\nSubject: {subject}\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{body}\r\n"
        );
        self.deliver_raw(raw.into_bytes())
    }

    /// Delivers raw bytes as a message and returns its UID.
    pub fn deliver_raw(&self, raw: Vec<u8>) -> u32 {
        let mut mailbox = self.mailbox();
        let uid = mailbox.next_uid;
        mailbox.next_uid += 1;
        mailbox.messages.push(FetchedMessage {
            uid,
            raw,
            internal_date: Some(Utc::now()),
        });
        uid
    }

    /// Delivers `count` filler messages.
    pub fn deliver_many(&self, count: usize) {
        for i in 0..count {
            self.deliver("someone@example.com", &format!("Newsletter {i}"), "Nothing to see.");
        }
    }
}

#[async_trait]
impl MailSource for FakeSource {
    async fn open(&mut self) -> Result<MailboxStatus> {
        let mut mailbox = self.mailbox();
        mailbox.open_calls += 1;
        if mailbox.failing_opens > 0 {
            mailbox.failing_opens -= 1;
            mailbox.open = false;
            return Err(Error::NotConnected);
        }
        mailbox.open = true;
        Ok(MailboxStatus {
            uid_validity: Some(mailbox.uid_validity),
            exists: u32::try_from(mailbox.messages.len()).unwrap(),
        })
    }

    async fn list_uids(&mut self) -> Result<Vec<u32>> {
        let mut mailbox = self.mailbox();
        if !mailbox.open {
            return Err(Error::NotConnected);
        }
        if mailbox.failing_lists > 0 {
            mailbox.failing_lists -= 1;
            mailbox.open = false;
            return Err(Error::NotConnected);
        }
        Ok(mailbox.messages.iter().map(|m| m.uid).collect())
    }

    async fn fetch(&mut self, uid_set: &str) -> Result<Vec<FetchedMessage>> {
        let mut mailbox = self.mailbox();
        if !mailbox.open {
            return Err(Error::NotConnected);
        }
        mailbox.fetched_sets.push(uid_set.to_string());
        let wanted = |uid: u32| {
            uid_set.split(',').any(|part| match part.split_once(':') {
                Some((lo, "*")) => uid >= lo.parse().unwrap(),
                Some((lo, hi)) => uid >= lo.parse().unwrap() && uid <= hi.parse().unwrap(),
                None => uid == part.parse::<u32>().unwrap(),
            })
        };
        Ok(mailbox
            .messages
            .iter()
            .filter(|m| wanted(m.uid))
            .cloned()
            .collect())
    }

    async fn close(&mut self) -> Result<()> {
        self.mailbox().open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.mailbox().open
    }

    fn describe(&self) -> String {
        "fake://inbox".to_string()
    }
}
