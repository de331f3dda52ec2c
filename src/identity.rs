//! One-time-code verification and account resolution.
//!
//! A destination (phone number or mail address) is proven by echoing back a
//! short-lived code. Proof resolves to exactly one account: the canonical
//! holder of the destination when one exists, the acting account otherwise,
//! or a freshly created one. Resolution runs inside a single record-store
//! transaction; the session token is only minted after it commits.

use std::fmt;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use crate::account::{Account, AccountState, AccountView, Destination};
use crate::config::Config;
use crate::kv::{KeyValueStore, KvError};
use crate::notify::CodeSender;
use crate::profile::{ProfileError, ProfileLabels};
use crate::progress::migrate_progress;
use crate::records::{RecordError, RecordSession, RecordStore};
use crate::token::{TokenError, TokenIssuer};

/// Error type for verification operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    /// No live code is stored for the destination.
    CodeExpired,
    /// A live code exists but the submitted one does not match it.
    CodeMismatch,
    /// The named account does not exist.
    NotFound(String),
    /// The key-value store failed.
    Store(KvError),
    /// The record store failed.
    Records(RecordError),
    /// The profile-label store failed.
    Profile(ProfileError),
    /// The token issuer failed.
    Token(TokenError),
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyError::CodeExpired => write!(f, "verification code expired"),
            VerifyError::CodeMismatch => write!(f, "verification code does not match"),
            VerifyError::NotFound(id) => write!(f, "account not found: {}", id),
            VerifyError::Store(err) => write!(f, "verification store error: {}", err),
            VerifyError::Records(err) => write!(f, "{}", err),
            VerifyError::Profile(err) => write!(f, "{}", err),
            VerifyError::Token(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for VerifyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            VerifyError::Store(err) => Some(err),
            VerifyError::Records(err) => Some(err),
            VerifyError::Profile(err) => Some(err),
            VerifyError::Token(err) => Some(err),
            _ => None,
        }
    }
}

impl From<KvError> for VerifyError {
    fn from(err: KvError) -> Self {
        VerifyError::Store(err)
    }
}

impl From<RecordError> for VerifyError {
    fn from(err: RecordError) -> Self {
        VerifyError::Records(err)
    }
}

impl From<ProfileError> for VerifyError {
    fn from(err: ProfileError) -> Self {
        VerifyError::Profile(err)
    }
}

impl From<TokenError> for VerifyError {
    fn from(err: TokenError) -> Self {
        VerifyError::Token(err)
    }
}

/// Outcome of a successful verification.
#[derive(Debug, Clone)]
pub struct VerifiedSession {
    /// The account the destination resolved to, after any merge or promotion.
    pub account: AccountView,
    /// Session token bound to that account.
    pub token: String,
}

/// Where a code went and how long it stays valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeDelivery {
    pub destination: Destination,
    pub expires_in: Duration,
}

/// Remaining validity of an already-issued code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeStatus {
    pub destination: Destination,
    /// Zero when no live code exists.
    pub expires_in: Duration,
}

/// Verifies destination ownership and resolves each proof to one account.
///
/// Every backend is injected: the key-value store holds codes and pending
/// destinations, the record store holds accounts, courses, and progress, and
/// the sender, profile, and token seams wrap deployment-specific services.
pub struct IdentityResolver<S: KeyValueStore + Clone, R: RecordStore> {
    kv: S,
    records: R,
    sender: Box<dyn CodeSender>,
    profiles: Box<dyn ProfileLabels>,
    tokens: Box<dyn TokenIssuer>,
    config: Config,
}

impl<S: KeyValueStore + Clone, R: RecordStore> IdentityResolver<S, R> {
    pub fn new(
        config: Config,
        kv: S,
        records: R,
        sender: Box<dyn CodeSender>,
        profiles: Box<dyn ProfileLabels>,
        tokens: Box<dyn TokenIssuer>,
    ) -> Self {
        Self {
            kv,
            records,
            sender,
            profiles,
            tokens,
            config,
        }
    }

    fn code_key(&self, destination: &Destination) -> String {
        format!(
            "{}code:{}:{}",
            self.config.key_prefix,
            destination.kind(),
            destination.value()
        )
    }

    fn pending_key(&self, account_id: &str) -> String {
        format!("{}pending:{}", self.config.key_prefix, account_id)
    }

    /// Issue a one-time code for `destination` on behalf of `account_id`.
    ///
    /// The acting account, when it exists, is re-bound to the destination
    /// before the code goes out. The destination is also remembered against
    /// the account so `code_status` and `verify_pending` can recover it.
    /// Delivery failures are logged and do not fail the call.
    pub fn send_code(
        &self,
        account_id: &str,
        destination: &Destination,
    ) -> Result<CodeDelivery, VerifyError> {
        self.records
            .transaction(|session| -> Result<(), VerifyError> {
                if let Some(mut account) = session.account_by_id(account_id)? {
                    account.bind_destination(destination);
                    session.update_account(&account)?;
                }
                Ok(())
            })?;

        let code = format!("{:04}", rand::thread_rng().gen_range(0..10_000));
        let pending = encode_destination(destination)?;
        self.kv.set(
            &self.pending_key(account_id),
            &pending,
            Some(self.config.pending_ttl),
        )?;
        self.kv.set(
            &self.code_key(destination),
            code.as_bytes(),
            Some(self.config.code_ttl),
        )?;

        if let Err(err) = self.sender.send_code(destination, &code) {
            warn!(destination = %destination, error = %err, "code delivery failed");
        }

        info!(account = account_id, destination = %destination, "one-time code issued");
        Ok(CodeDelivery {
            destination: destination.clone(),
            expires_in: self.config.code_ttl,
        })
    }

    /// Where the last code for `account_id` went and how long it stays valid.
    pub fn code_status(&self, account_id: &str) -> Result<CodeStatus, VerifyError> {
        let destination = self.pending_destination(account_id)?;
        let expires_in = self
            .kv
            .ttl(&self.code_key(&destination))?
            .unwrap_or(Duration::ZERO);
        Ok(CodeStatus {
            destination,
            expires_in,
        })
    }

    /// Verify `destination` with `submitted_code` and resolve the account.
    ///
    /// On success the code is consumed and a session token is issued for the
    /// resolved account. A mismatch leaves the code in place for another try.
    /// `course_id` enables progress migration when the proof lands on a
    /// different account than the acting one; `language` is recorded on
    /// accounts that verify for the first time.
    pub fn verify(
        &self,
        acting_account_id: &str,
        destination: &Destination,
        submitted_code: &str,
        course_id: Option<&str>,
        language: Option<&str>,
    ) -> Result<VerifiedSession, VerifyError> {
        self.check_code(destination, submitted_code)?;

        let account = self
            .records
            .transaction(|session| -> Result<Account, VerifyError> {
                self.resolve_account(session, acting_account_id, destination, course_id, language)
            })?;

        // Token only after the transaction commits.
        let token = self.tokens.issue(&account.account_id)?;
        info!(account = %account.account_id, destination = %destination, "destination verified");
        Ok(VerifiedSession {
            account: account.to_view(),
            token,
        })
    }

    /// Verify against the destination remembered by the last `send_code`.
    ///
    /// When the pending destination is still on file, the proof is performed
    /// for the earliest account bound to it, falling back to the acting
    /// account when nobody is bound yet. When it has expired, the acting
    /// account's own binding is used instead.
    pub fn verify_pending(
        &self,
        acting_account_id: &str,
        submitted_code: &str,
        course_id: Option<&str>,
        language: Option<&str>,
    ) -> Result<VerifiedSession, VerifyError> {
        let pending = self.kv.get(&self.pending_key(acting_account_id))?;
        let (account_id, destination) = match pending {
            Some(bytes) => {
                let destination = decode_destination(&bytes)?;
                let earliest = self.records.transaction(
                    |session| -> Result<Option<Account>, VerifyError> {
                        let mut bound = session.accounts_by_binding(&destination)?;
                        bound.sort_by_key(|account| account.row_id);
                        Ok(bound.into_iter().next())
                    },
                )?;
                let account_id = match earliest {
                    Some(account) => account.account_id,
                    None => acting_account_id.to_string(),
                };
                (account_id, destination)
            }
            None => {
                let destination = self
                    .records
                    .transaction(|session| -> Result<Option<Account>, VerifyError> {
                        Ok(session.account_by_id(acting_account_id)?)
                    })?
                    .and_then(|account| account.bound_destination())
                    .ok_or_else(|| VerifyError::NotFound(acting_account_id.to_string()))?;
                (acting_account_id.to_string(), destination)
            }
        };

        self.verify(&account_id, &destination, submitted_code, course_id, language)
    }

    /// Resolve a session token back to its account.
    pub fn authenticate(&self, token: &str) -> Result<AccountView, VerifyError> {
        let account_id = self.tokens.validate(token)?;
        let account = self
            .records
            .transaction(|session| -> Result<Option<Account>, VerifyError> {
                Ok(session.account_by_id(&account_id)?)
            })?
            .ok_or_else(|| VerifyError::NotFound(account_id.clone()))?;
        Ok(account.to_view())
    }

    fn check_code(&self, destination: &Destination, submitted: &str) -> Result<(), VerifyError> {
        let override_ok = match &self.config.override_code {
            Some(code) => code == submitted,
            None => false,
        };
        let key = self.code_key(destination);
        let stored = self.kv.get(&key)?;
        if !override_ok {
            match &stored {
                None => return Err(VerifyError::CodeExpired),
                Some(bytes) => {
                    if bytes.as_slice() != submitted.as_bytes() {
                        return Err(VerifyError::CodeMismatch);
                    }
                }
            }
        }
        // One code, one successful attempt.
        self.kv.delete(&key)?;
        Ok(())
    }

    fn pending_destination(&self, account_id: &str) -> Result<Destination, VerifyError> {
        if let Some(bytes) = self.kv.get(&self.pending_key(account_id))? {
            return decode_destination(&bytes);
        }
        self.records
            .transaction(|session| -> Result<Option<Account>, VerifyError> {
                Ok(session.account_by_id(account_id)?)
            })?
            .and_then(|account| account.bound_destination())
            .ok_or_else(|| VerifyError::NotFound(account_id.to_string()))
    }

    /// Pick the account a verified destination lands on and bring it to
    /// `Verified`. Canonical holder first: among accounts already bound to
    /// the destination, verified ones beat unverified ones and the earliest
    /// row wins. Without one, the acting account is used; without that, a
    /// new account is created.
    fn resolve_account(
        &self,
        session: &mut dyn RecordSession,
        acting_account_id: &str,
        destination: &Destination,
        course_id: Option<&str>,
        language: Option<&str>,
    ) -> Result<Account, VerifyError> {
        let canonical = {
            let mut bound = session.accounts_by_binding(destination)?;
            bound.sort_by(|a, b| {
                b.state
                    .rank()
                    .cmp(&a.state.rank())
                    .then(a.row_id.cmp(&b.row_id))
            });
            bound.into_iter().next()
        };

        let mut account = match canonical {
            Some(existing) => {
                if existing.account_id != acting_account_id {
                    match course_id {
                        Some(course_id) => {
                            self.merge_accounts(session, acting_account_id, existing, course_id)?
                        }
                        None => existing,
                    }
                } else {
                    existing
                }
            }
            None => match session.account_by_id(acting_account_id)? {
                Some(account) => account,
                None => return self.create_account(session, destination, language),
            },
        };

        if account.state == AccountState::Unverified {
            account.bind_destination(destination);
            account.state = AccountState::Verified;
            account.language = language.map(str::to_string);
            session.update_account(&account)?;
            info!(account = %account.account_id, "account verified");
        }

        Ok(account)
    }

    /// Fold the acting account's course work into the canonical one: profile
    /// labels are copied, study progress migrates with per-item dedup, and
    /// the external binding is copied only when the canonical account has
    /// none. The acting row itself is left in place.
    fn merge_accounts(
        &self,
        session: &mut dyn RecordSession,
        acting_account_id: &str,
        mut canonical: Account,
        course_id: &str,
    ) -> Result<Account, VerifyError> {
        let labels = self.profiles.labels_for(acting_account_id, course_id)?;
        self.profiles
            .apply_labels(&canonical.account_id, &labels, course_id)?;

        let report =
            migrate_progress(session, acting_account_id, &canonical.account_id, course_id)?;

        if canonical.external_id.is_empty() {
            if let Some(acting) = session.account_by_id(acting_account_id)? {
                if !acting.external_id.is_empty() {
                    canonical.external_id = acting.external_id;
                    session.update_account(&canonical)?;
                }
            }
        }

        info!(
            from = acting_account_id,
            to = %canonical.account_id,
            course = course_id,
            migrated = report.migrated,
            skipped = report.skipped,
            "merged into canonical account"
        );
        Ok(canonical)
    }

    fn create_account(
        &self,
        session: &mut dyn RecordSession,
        destination: &Destination,
        language: Option<&str>,
    ) -> Result<Account, VerifyError> {
        let account_id = Uuid::new_v4().simple().to_string();
        let mut account = Account::new(account_id, AccountState::Verified);
        account.bind_destination(destination);
        account.language = language.map(str::to_string);
        let account = session.insert_account(account)?;
        info!(account = %account.account_id, destination = %destination, "created account");
        self.bootstrap_first_install(session, account)
    }

    /// First-install bootstrap: when the account just created is the only
    /// verified one and exactly one active course exists, the account becomes
    /// admin and creator and is stamped as that course's owner.
    fn bootstrap_first_install(
        &self,
        session: &mut dyn RecordSession,
        mut account: Account,
    ) -> Result<Account, VerifyError> {
        if session.verified_account_count()? == 1 && session.active_course_count()? == 1 {
            account.is_admin = true;
            account.is_creator = true;
            session.update_account(&account)?;
            if let Some(mut course) = session.first_active_course()? {
                course.owner_account_id = account.account_id.clone();
                session.update_course(&course)?;
            }
            info!(account = %account.account_id, "first account promoted to install admin");
        }
        Ok(account)
    }
}

fn encode_destination(destination: &Destination) -> Result<Vec<u8>, VerifyError> {
    serde_json::to_vec(destination)
        .map_err(|err| VerifyError::Store(KvError::Value(err.to_string())))
}

fn decode_destination(bytes: &[u8]) -> Result<Destination, VerifyError> {
    serde_json::from_slice(bytes)
        .map_err(|err| VerifyError::Store(KvError::Value(err.to_string())))
}
