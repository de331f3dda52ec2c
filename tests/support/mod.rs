use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use studykit::{
    Account, CodeSender, Config, Course, Destination, GeneratedBlock, IdentityResolver,
    InMemoryKvStore, InMemoryProfileLabels, InMemoryRecordStore, ProgressRecord, RecordError,
    RecordStore, SendError, SessionTokens,
};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_id(prefix: &str) -> String {
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}", prefix, id)
}

/// Sender that remembers every code it was asked to deliver.
#[derive(Clone, Default)]
pub struct RecordingSender {
    sent: Arc<Mutex<Vec<(Destination, String)>>>,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_code(&self) -> Option<String> {
        self.sent
            .lock()
            .unwrap()
            .last()
            .map(|(_, code)| code.clone())
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl CodeSender for RecordingSender {
    fn send_code(&self, destination: &Destination, code: &str) -> Result<(), SendError> {
        self.sent
            .lock()
            .unwrap()
            .push((destination.clone(), code.to_string()));
        Ok(())
    }
}

/// A resolver wired onto shared in-memory stores, with handles kept for
/// seeding and inspection.
pub struct Deps {
    pub records: InMemoryRecordStore,
    pub labels: InMemoryProfileLabels,
    pub sender: RecordingSender,
    pub resolver: IdentityResolver<InMemoryKvStore, InMemoryRecordStore>,
}

pub fn deps() -> Deps {
    deps_with(Config::default())
}

pub fn deps_with(config: Config) -> Deps {
    let kv = InMemoryKvStore::new();
    let records = InMemoryRecordStore::new();
    let labels = InMemoryProfileLabels::new();
    let sender = RecordingSender::new();
    let tokens = SessionTokens::new(kv.clone(), &config);
    let resolver = IdentityResolver::new(
        config,
        kv,
        records.clone(),
        Box::new(sender.clone()),
        Box::new(labels.clone()),
        Box::new(tokens),
    );
    Deps {
        records,
        labels,
        sender,
        resolver,
    }
}

impl Deps {
    pub fn seed_account(&self, account: Account) -> Account {
        self.records
            .transaction(move |session| -> Result<Account, RecordError> {
                session.insert_account(account)
            })
            .unwrap()
    }

    pub fn seed_course(&self, course: Course) -> Course {
        self.records
            .transaction(move |session| -> Result<Course, RecordError> {
                session.insert_course(course)
            })
            .unwrap()
    }

    pub fn seed_progress(&self, record: ProgressRecord) -> ProgressRecord {
        self.records
            .transaction(move |session| -> Result<ProgressRecord, RecordError> {
                session.insert_progress(record)
            })
            .unwrap()
    }

    pub fn seed_block(&self, block: GeneratedBlock) -> GeneratedBlock {
        self.records
            .transaction(move |session| -> Result<GeneratedBlock, RecordError> {
                session.insert_generated_block(block)
            })
            .unwrap()
    }

    pub fn account(&self, account_id: &str) -> Option<Account> {
        let account_id = account_id.to_string();
        self.records
            .transaction(move |session| -> Result<Option<Account>, RecordError> {
                session.account_by_id(&account_id)
            })
            .unwrap()
    }

    pub fn first_course(&self) -> Option<Course> {
        self.records
            .transaction(|session| -> Result<Option<Course>, RecordError> {
                session.first_active_course()
            })
            .unwrap()
    }

    pub fn active_progress(&self, account_id: &str, course_id: &str) -> Vec<ProgressRecord> {
        let account_id = account_id.to_string();
        let course_id = course_id.to_string();
        self.records
            .transaction(
                move |session| -> Result<Vec<ProgressRecord>, RecordError> {
                    session.active_progress(&account_id, &course_id)
                },
            )
            .unwrap()
    }

    pub fn blocks_for(&self, account_id: &str) -> Vec<GeneratedBlock> {
        let account_id = account_id.to_string();
        self.records
            .transaction(
                move |session| -> Result<Vec<GeneratedBlock>, RecordError> {
                    session.generated_blocks_for_account(&account_id)
                },
            )
            .unwrap()
    }
}
