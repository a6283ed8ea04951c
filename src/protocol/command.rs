//! Control channel commands and acknowledgements
//!
//! Session open is `##CN;`, answered by `##CN1;` (accepted) or `##CN0;`.
//! Login is `##ID` + account type + two-digit account length + two-digit
//! password length + account + password + `;`, answered by `##ID1;` or
//! `##ID0;`.

use serde::{Deserialize, Serialize};

use crate::error::{CredentialError, CredentialField};

/// Session open request
pub const OPEN_COMMAND: &str = "##CN;";

/// Read-only power status query used as keepalive
pub const KEEPALIVE_COMMAND: &str = "PS;";

const OPEN_PREFIX: &str = "##CN";
const LOGIN_PREFIX: &str = "##ID";

/// Longest accepted account name or password in bytes
pub const MAX_CREDENTIAL_LEN: usize = 32;

/// Account class sent with the login command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    #[default]
    Administrator,
    User,
}

impl AccountType {
    fn code(self) -> char {
        match self {
            AccountType::Administrator => '0',
            AccountType::User => '1',
        }
    }
}

/// Validated login credentials
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    account_type: AccountType,
    account: String,
    password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("account_type", &self.account_type)
            .field("account", &self.account)
            .field("password", &"***")
            .finish()
    }
}

impl Credentials {
    /// Validate account and password: 1 to 32 bytes of printable ASCII each
    pub fn new(
        account_type: AccountType,
        account: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, CredentialError> {
        let account = account.into();
        let password = password.into();
        validate(CredentialField::Account, &account)?;
        validate(CredentialField::Password, &password)?;
        Ok(Self {
            account_type,
            account,
            password,
        })
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn account_type(&self) -> AccountType {
        self.account_type
    }

    /// Build the login command
    pub fn login_command(&self) -> String {
        format!(
            "{LOGIN_PREFIX}{}{:02}{:02}{}{};",
            self.account_type.code(),
            self.account.len(),
            self.password.len(),
            self.account,
            self.password
        )
    }
}

fn validate(field: CredentialField, value: &str) -> Result<(), CredentialError> {
    if value.is_empty() {
        return Err(CredentialError::Empty(field));
    }
    if value.len() > MAX_CREDENTIAL_LEN {
        return Err(CredentialError::TooLong {
            field,
            len: value.len(),
            max: MAX_CREDENTIAL_LEN,
        });
    }
    if !value.bytes().all(|b| b.is_ascii_graphic() || b == b' ') {
        return Err(CredentialError::NotPrintableAscii(field));
    }
    Ok(())
}

/// Handshake acknowledgements recognized in received frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Open(bool),
    Login(bool),
}

impl Ack {
    /// Classify a decoded frame (including its trailing `;`)
    pub fn parse(frame: &str) -> Option<Ack> {
        let body = frame.strip_suffix(';')?;
        if let Some(rest) = body.strip_prefix(OPEN_PREFIX) {
            return Self::flag(rest).map(Ack::Open);
        }
        if let Some(rest) = body.strip_prefix(LOGIN_PREFIX) {
            return Self::flag(rest).map(Ack::Login);
        }
        None
    }

    fn flag(rest: &str) -> Option<bool> {
        match rest {
            "1" => Some(true),
            "0" => Some(false),
            _ => None,
        }
    }
}

/// Mask credentials in a command before it reaches any log or observer
pub fn redact(command: &str) -> String {
    match command.strip_prefix(LOGIN_PREFIX) {
        Some(rest) if !rest.is_empty() && rest != ";" => format!("{LOGIN_PREFIX}<redacted>;"),
        _ => command.to_string(),
    }
}
