mod account;
mod cache;
mod config;
mod identity;
mod kv;
mod mutex;
mod notify;
mod profile;
mod progress;
mod records;
mod token;

pub use account::{Account, AccountState, AccountView, Destination};
pub use cache::{SingleFlightCache, StructCache};
pub use config::{Config, DEFAULT_KEY_PREFIX};
pub use identity::{CodeDelivery, CodeStatus, IdentityResolver, VerifiedSession, VerifyError};
pub use kv::{InMemoryKvStore, KeyValueStore, KvError};
pub use mutex::{run_exclusive, DistributedMutex};
pub use notify::{CodeSender, LogCodeSender, SendError};
pub use profile::{InMemoryProfileLabels, ProfileError, ProfileLabel, ProfileLabels};
pub use progress::{
    migrate_progress, GeneratedBlock, MigrationReport, ProgressRecord, ProgressStatus,
};
pub use records::{Course, InMemoryRecordStore, RecordError, RecordSession, RecordStore};
pub use token::{SessionTokens, TokenError, TokenIssuer};

// Re-export the networked store when the redis feature is on
#[cfg(feature = "redis")]
pub use kv::RedisKvStore;
