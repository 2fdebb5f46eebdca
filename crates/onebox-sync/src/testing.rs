//! In-process fakes for every collaborator, shared by the engine's tests.
//!
//! Fake messages are plain text: `message-id`, RFC 3339 date, subject, then
//! body, one per line. `FakeParser` rejects anything else.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use onebox_core::config::AccountConfig;
use onebox_core::error::{ClassificationError, IndexError, NotifyError, ParseError, TransportError};
use onebox_core::types::{
    email_id, Category, ClassifiedEmail, MailboxInfo, MessageRef, NormalizedEmail, RawMessage,
};

use crate::traits::{
    Classifier, IndexField, MailboxConnector, MailboxSession, MessageParser, Notifier,
    SearchFilters, SearchIndex, SearchPage, WatchEvent,
};

pub(crate) fn fake_bytes(message_id: &str, date: DateTime<Utc>, subject: &str, body: &str) -> Vec<u8> {
    format!("{}\n{}\n{}\n{}", message_id, date.to_rfc3339(), subject, body).into_bytes()
}

pub(crate) fn fake_raw(uid: u32, message_id: &str, subject: &str, body: &str) -> RawMessage {
    RawMessage::new(uid, fake_bytes(message_id, Utc::now(), subject, body))
}

pub(crate) fn account(id: &str) -> AccountConfig {
    AccountConfig {
        account_id: id.to_string(),
        username: id.to_string(),
        password: "secret".into(),
        host: "imap.test".into(),
        ..AccountConfig::default()
    }
}

// ─────────────────────────────────────────────
// Mailbox
// ─────────────────────────────────────────────

struct StoredMessage {
    uid: u32,
    date: DateTime<Utc>,
    bytes: Vec<u8>,
}

/// Server-side state shared by every connection to one fake account.
pub(crate) struct FakeMailbox {
    messages: Mutex<Vec<StoredMessage>>,
    next_uid: AtomicU32,
    uid_validity: AtomicU32,
    activity: Notify,
    fetch_delay: Mutex<Duration>,
    pub connects: AtomicU32,
    pub connect_failures: AtomicU32,
    pub fail_next_watch: AtomicBool,
    pub fail_renewal: AtomicBool,
    pub hang_on_close: AtomicBool,
    pub renewals: AtomicU32,
    pub closes: AtomicU32,
    pub fetch_calls: AtomicU32,
    pub fetched: Mutex<Vec<u32>>,
}

impl FakeMailbox {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            messages: Mutex::new(Vec::new()),
            next_uid: AtomicU32::new(1),
            uid_validity: AtomicU32::new(1),
            activity: Notify::new(),
            fetch_delay: Mutex::new(Duration::ZERO),
            connects: AtomicU32::new(0),
            connect_failures: AtomicU32::new(0),
            fail_next_watch: AtomicBool::new(false),
            fail_renewal: AtomicBool::new(false),
            hang_on_close: AtomicBool::new(false),
            renewals: AtomicU32::new(0),
            closes: AtomicU32::new(0),
            fetch_calls: AtomicU32::new(0),
            fetched: Mutex::new(Vec::new()),
        })
    }

    /// Store a message without signalling activity. Returns its UID.
    pub fn add(&self, message_id: &str, date: DateTime<Utc>, subject: &str, body: &str) -> u32 {
        let uid = self.next_uid.fetch_add(1, Ordering::SeqCst);
        self.messages.lock().unwrap().push(StoredMessage {
            uid,
            date,
            bytes: fake_bytes(message_id, date, subject, body),
        });
        uid
    }

    /// Store a raw, possibly unparseable message.
    pub fn add_raw(&self, date: DateTime<Utc>, bytes: &[u8]) -> u32 {
        let uid = self.next_uid.fetch_add(1, Ordering::SeqCst);
        self.messages.lock().unwrap().push(StoredMessage {
            uid,
            date,
            bytes: bytes.to_vec(),
        });
        uid
    }

    /// Store a message dated now and wake any pending watch.
    pub fn deliver(&self, message_id: &str, subject: &str, body: &str) -> u32 {
        let uid = self.add(message_id, Utc::now(), subject, body);
        self.activity.notify_one();
        uid
    }

    pub fn set_uid_validity(&self, value: u32) {
        self.uid_validity.store(value, Ordering::SeqCst);
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = delay;
    }

    pub fn fetched_uids(&self) -> Vec<u32> {
        self.fetched.lock().unwrap().clone()
    }
}

pub(crate) struct FakeConnector {
    pub mailbox: Arc<FakeMailbox>,
}

impl FakeConnector {
    pub fn new(mailbox: Arc<FakeMailbox>) -> Arc<Self> {
        Arc::new(Self { mailbox })
    }
}

#[async_trait]
impl MailboxConnector for FakeConnector {
    async fn connect(&self, account: &AccountConfig) -> Result<Box<dyn MailboxSession>, TransportError> {
        self.mailbox.connects.fetch_add(1, Ordering::SeqCst);
        let remaining = self.mailbox.connect_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.mailbox
                .connect_failures
                .store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::Connect {
                host: account.host.clone(),
                port: account.port,
                reason: "connection refused".into(),
            });
        }
        Ok(Box::new(FakeSession {
            mailbox: self.mailbox.clone(),
        }))
    }
}

/// Routes each account id to its own mailbox; unknown ids fail to connect.
pub(crate) struct RoutingConnector {
    pub mailboxes: HashMap<String, Arc<FakeMailbox>>,
}

#[async_trait]
impl MailboxConnector for RoutingConnector {
    async fn connect(&self, account: &AccountConfig) -> Result<Box<dyn MailboxSession>, TransportError> {
        match self.mailboxes.get(account.id()) {
            Some(mailbox) => FakeConnector { mailbox: mailbox.clone() }.connect(account).await,
            None => Err(TransportError::Auth(format!("no such user {}", account.id()))),
        }
    }
}

struct FakeSession {
    mailbox: Arc<FakeMailbox>,
}

#[async_trait]
impl MailboxSession for FakeSession {
    async fn open_mailbox(&mut self, _name: &str) -> Result<MailboxInfo, TransportError> {
        Ok(MailboxInfo {
            exists: self.mailbox.messages.lock().unwrap().len() as u32,
            uid_validity: Some(self.mailbox.uid_validity.load(Ordering::SeqCst)),
        })
    }

    async fn search_since(&mut self, since: DateTime<Utc>) -> Result<Vec<MessageRef>, TransportError> {
        Ok(self
            .mailbox
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.date >= since)
            .map(|m| MessageRef(m.uid))
            .collect())
    }

    async fn search_all(&mut self) -> Result<Vec<MessageRef>, TransportError> {
        Ok(self
            .mailbox
            .messages
            .lock()
            .unwrap()
            .iter()
            .map(|m| MessageRef(m.uid))
            .collect())
    }

    async fn fetch(&mut self, refs: &[MessageRef]) -> Result<Vec<RawMessage>, TransportError> {
        self.mailbox.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.mailbox.fetch_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let raws: Vec<RawMessage> = {
            let messages = self.mailbox.messages.lock().unwrap();
            refs.iter()
                .filter_map(|r| messages.iter().find(|m| m.uid == r.uid()))
                .map(|m| RawMessage::new(m.uid, m.bytes.clone()))
                .collect()
        };
        self.mailbox
            .fetched
            .lock()
            .unwrap()
            .extend(raws.iter().map(|r| r.uid));
        Ok(raws)
    }

    async fn watch(&mut self) -> Result<WatchEvent, TransportError> {
        if self.mailbox.fail_next_watch.swap(false, Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.mailbox.activity.notified().await;
        Ok(WatchEvent::Activity)
    }

    async fn renew_watch(&mut self) -> Result<(), TransportError> {
        self.mailbox.renewals.fetch_add(1, Ordering::SeqCst);
        if self.mailbox.fail_renewal.load(Ordering::SeqCst) {
            return Err(TransportError::Protocol("IDLE rejected".into()));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.mailbox.closes.fetch_add(1, Ordering::SeqCst);
        if self.mailbox.hang_on_close.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────
// Pipeline stages
// ─────────────────────────────────────────────

pub(crate) struct FakeParser;

impl MessageParser for FakeParser {
    fn parse(&self, account_id: &str, folder: &str, raw: &RawMessage) -> Result<NormalizedEmail, ParseError> {
        if raw.bytes.is_empty() {
            return Err(ParseError::Empty { uid: raw.uid });
        }
        let text = String::from_utf8_lossy(&raw.bytes);
        let mut parts = text.splitn(4, '\n');
        let (Some(message_id), Some(date), Some(subject), Some(body)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ParseError::Malformed {
                uid: raw.uid,
                reason: "expected four lines".into(),
            });
        };
        let date = DateTime::parse_from_rfc3339(date)
            .map_err(|e| ParseError::Malformed {
                uid: raw.uid,
                reason: e.to_string(),
            })?
            .with_timezone(&Utc);
        let now = Utc::now();
        Ok(NormalizedEmail {
            id: email_id(account_id, message_id, raw.uid, now),
            account_id: account_id.to_string(),
            folder: folder.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            from: "sender@example.com".into(),
            to: vec![account_id.to_string()],
            cc: Vec::new(),
            bcc: Vec::new(),
            date,
            message_id: message_id.to_string(),
            has_attachments: false,
            indexed_at: now,
        })
    }
}

/// Labels by subject keyword; "classifier-down" fails.
pub(crate) struct FakeClassifier {
    pub calls: AtomicU32,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    delay: Duration,
}

impl FakeClassifier {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            delay,
        })
    }
}

#[async_trait]
impl Classifier for FakeClassifier {
    async fn classify(&self, subject: &str, _body: &str) -> Result<Category, ClassificationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let subject = subject.to_lowercase();
        if subject.contains("classifier-down") {
            return Err(ClassificationError::Request("503 service unavailable".into()));
        }
        if subject.contains("meeting") {
            Ok(Category::MeetingBooked)
        } else if subject.contains("interested") {
            Ok(Category::Interested)
        } else {
            Ok(Category::NotInterested)
        }
    }
}

// ─────────────────────────────────────────────
// Index
// ─────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct RecordingIndex {
    docs: Mutex<HashMap<String, ClassifiedEmail>>,
    pub upserts: AtomicU32,
    pub fail: AtomicBool,
}

impl RecordingIndex {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn len(&self) -> usize {
        self.docs.lock().unwrap().len()
    }

    pub fn doc(&self, id: &str) -> Option<ClassifiedEmail> {
        self.docs.lock().unwrap().get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.docs.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl SearchIndex for RecordingIndex {
    async fn upsert(&self, id: &str, record: &ClassifiedEmail) -> Result<(), IndexError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(IndexError::Backend("index unavailable".into()));
        }
        self.docs
            .lock()
            .unwrap()
            .insert(id.to_string(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<ClassifiedEmail>, IndexError> {
        Ok(self.doc(id))
    }

    async fn query(&self, filters: &SearchFilters, page: usize, limit: usize) -> Result<SearchPage, IndexError> {
        let docs = self.docs.lock().unwrap();
        let items: Vec<ClassifiedEmail> = docs
            .values()
            .filter(|d| filters.account_id.as_deref().map_or(true, |a| d.email.account_id == a))
            .filter(|d| filters.category.map_or(true, |c| d.category == c))
            .cloned()
            .collect();
        Ok(SearchPage {
            total: items.len(),
            items,
            page,
            limit,
        })
    }

    async fn distinct_values(&self, field: IndexField, _filter: Option<&SearchFilters>) -> Result<Vec<String>, IndexError> {
        let docs = self.docs.lock().unwrap();
        let mut values: Vec<String> = docs
            .values()
            .map(|d| match field {
                IndexField::AccountId => d.email.account_id.clone(),
                IndexField::Folder => d.email.folder.clone(),
                IndexField::Category => d.category.to_string(),
            })
            .collect();
        values.sort();
        values.dedup();
        Ok(values)
    }

    async fn update_field(&self, id: &str, _field: IndexField, _value: &str) -> Result<(), IndexError> {
        Err(IndexError::NotFound(id.to_string()))
    }
}

// ─────────────────────────────────────────────
// Notifier
// ─────────────────────────────────────────────

pub(crate) struct RecordingNotifier {
    name: String,
    fail: bool,
    pub sent: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            fail: false,
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            fail: true,
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn sent_ids(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn notify(&self, email: &ClassifiedEmail) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(email.id().to_string());
        if self.fail {
            return Err(NotifyError::new(&self.name, "HTTP 500"));
        }
        Ok(())
    }
}
