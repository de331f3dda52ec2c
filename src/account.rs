//! Accounts, verification destinations, and the immutable account view.

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Verification lifecycle of an account. The transition is one-way:
/// Unverified accounts become Verified and never go back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountState {
    Unverified,
    Verified,
}

impl AccountState {
    /// Sort weight for canonical resolution: Verified outranks Unverified.
    pub(crate) fn rank(self) -> u8 {
        match self {
            AccountState::Verified => 1,
            AccountState::Unverified => 0,
        }
    }
}

/// A verification target: where a one-time code is delivered, and the
/// binding recorded on the account once verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Destination {
    Phone(String),
    Mail(String),
}

impl Destination {
    /// Key fragment naming the channel.
    pub fn kind(&self) -> &'static str {
        match self {
            Destination::Phone(_) => "phone",
            Destination::Mail(_) => "mail",
        }
    }

    /// The raw address the code is sent to.
    pub fn value(&self) -> &str {
        match self {
            Destination::Phone(value) | Destination::Mail(value) => value,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.value())
    }
}

/// An account row.
///
/// Empty strings mean "unbound" for phone, mail, and the external identity.
/// `row_id` is storage-assigned and drives the created-first tie-break during
/// canonical resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub row_id: u64,
    pub account_id: String,
    pub username: String,
    pub name: String,
    pub phone: String,
    pub mail: String,
    pub state: AccountState,
    /// Social-login identity bound to this account.
    pub external_id: String,
    pub language: Option<String>,
    pub avatar: String,
    pub is_admin: bool,
    pub is_creator: bool,
    pub created_at: SystemTime,
}

impl Account {
    /// A fresh, unbound account in the given state.
    pub fn new(account_id: impl Into<String>, state: AccountState) -> Self {
        Self {
            row_id: 0,
            account_id: account_id.into(),
            username: String::new(),
            name: String::new(),
            phone: String::new(),
            mail: String::new(),
            state,
            external_id: String::new(),
            language: None,
            avatar: String::new(),
            is_admin: false,
            is_creator: false,
            created_at: SystemTime::now(),
        }
    }

    /// Record the destination on the matching binding column.
    pub fn bind_destination(&mut self, destination: &Destination) {
        match destination {
            Destination::Phone(value) => self.phone = value.clone(),
            Destination::Mail(value) => self.mail = value.clone(),
        }
    }

    /// Whether this account carries exactly the given binding.
    pub fn is_bound_to(&self, destination: &Destination) -> bool {
        match destination {
            Destination::Phone(value) => self.phone == *value,
            Destination::Mail(value) => self.mail == *value,
        }
    }

    /// The account's current binding, phone first.
    pub fn bound_destination(&self) -> Option<Destination> {
        if !self.phone.is_empty() {
            Some(Destination::Phone(self.phone.clone()))
        } else if !self.mail.is_empty() {
            Some(Destination::Mail(self.mail.clone()))
        } else {
            None
        }
    }

    /// Map to the immutable view handed to callers, every field written out.
    pub fn to_view(&self) -> AccountView {
        AccountView {
            account_id: self.account_id.clone(),
            username: self.username.clone(),
            name: self.name.clone(),
            phone: self.phone.clone(),
            mail: self.mail.clone(),
            state: self.state,
            external_id: self.external_id.clone(),
            language: self.language.clone(),
            avatar: self.avatar.clone(),
            is_admin: self.is_admin,
            is_creator: self.is_creator,
        }
    }
}

/// Immutable account snapshot returned from verification and lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountView {
    pub account_id: String,
    pub username: String,
    pub name: String,
    pub phone: String,
    pub mail: String,
    pub state: AccountState,
    pub external_id: String,
    pub language: Option<String>,
    pub avatar: String,
    pub is_admin: bool,
    pub is_creator: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_renders_kind_and_value() {
        let phone = Destination::Phone("15550100".to_string());
        assert_eq!(phone.kind(), "phone");
        assert_eq!(phone.value(), "15550100");
        assert_eq!(phone.to_string(), "phone:15550100");

        let mail = Destination::Mail("a@example.com".to_string());
        assert_eq!(mail.to_string(), "mail:a@example.com");
    }

    #[test]
    fn bind_and_check_destination() {
        let mut account = Account::new("u1", AccountState::Unverified);
        let dest = Destination::Mail("a@example.com".to_string());
        assert!(!account.is_bound_to(&dest));

        account.bind_destination(&dest);
        assert!(account.is_bound_to(&dest));
        assert_eq!(account.mail, "a@example.com");
        assert_eq!(account.phone, "");
    }

    #[test]
    fn bound_destination_prefers_phone() {
        let mut account = Account::new("u1", AccountState::Verified);
        assert_eq!(account.bound_destination(), None);

        account.mail = "a@example.com".to_string();
        account.phone = "15550100".to_string();
        assert_eq!(
            account.bound_destination(),
            Some(Destination::Phone("15550100".to_string()))
        );
    }

    #[test]
    fn view_carries_every_field() {
        let mut account = Account::new("u1", AccountState::Verified);
        account.username = "kim".to_string();
        account.phone = "15550100".to_string();
        account.language = Some("en-US".to_string());
        account.is_admin = true;

        let view = account.to_view();
        assert_eq!(view.account_id, "u1");
        assert_eq!(view.username, "kim");
        assert_eq!(view.phone, "15550100");
        assert_eq!(view.state, AccountState::Verified);
        assert_eq!(view.language.as_deref(), Some("en-US"));
        assert!(view.is_admin);
        assert!(!view.is_creator);
    }
}
