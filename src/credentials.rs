use crate::auth::Hasher;
use crate::db::{is_unique_violation, Database, StoreError};
use crate::models::Account;
use bcrypt::BcryptError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("{0}")]
    InvalidFormat(&'static str),

    #[error("This PIN is already taken. Please choose another.")]
    DuplicatePin,

    #[error("Invalid PIN")]
    InvalidCredential,

    #[error("failed to hash PIN: {0}")]
    Hash(#[from] BcryptError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<rusqlite::Error> for CredentialError {
    fn from(err: rusqlite::Error) -> Self {
        CredentialError::Store(err.into())
    }
}

impl From<tokio::task::JoinError> for CredentialError {
    fn from(err: tokio::task::JoinError) -> Self {
        CredentialError::Store(err.into())
    }
}

/// A PIN is 4 to 6 ASCII digits.
pub fn validate_pin(pin: &str) -> Result<(), CredentialError> {
    let len = pin.chars().count();
    if !(4..=6).contains(&len) {
        return Err(CredentialError::InvalidFormat("PIN must be 4-6 digits"));
    }
    if !pin.chars().all(|c| c.is_ascii_digit()) {
        return Err(CredentialError::InvalidFormat("PIN must contain only numbers"));
    }
    Ok(())
}

/// Accounts identified by nothing but a hashed PIN.
///
/// Salted hashes cannot be looked up, so both signup and login compare the
/// candidate against every stored hash. This is linear in the number of
/// accounts.
#[derive(Clone)]
pub struct CredentialStore {
    db: Database,
    hasher: Hasher,
    /// Held for a whole signup; the database lock is only taken for reads and the insert.
    signups: Arc<Mutex<()>>,
}

impl CredentialStore {
    pub fn new(db: Database, hasher: Hasher) -> Self {
        Self {
            db,
            hasher,
            signups: Arc::new(Mutex::new(())),
        }
    }

    /// Creates an account for a PIN nobody else holds.
    ///
    /// Signups run one at a time, so two concurrent signups with one PIN
    /// cannot both pass the scan. The bcrypt work happens without the
    /// database lock.
    pub async fn create_account(&self, pin: &str) -> Result<Account, CredentialError> {
        validate_pin(pin)?;

        let _signup = self.signups.lock().await;

        let existing = {
            let conn = self.db.lock().await;
            load_accounts(&conn)?
        };

        let hasher = self.hasher;
        let candidate = pin.to_owned();
        let pin_hash = tokio::task::spawn_blocking(move || -> Result<String, CredentialError> {
            if existing.iter().any(|a| hasher.verify(&candidate, &a.pin_hash)) {
                return Err(CredentialError::DuplicatePin);
            }
            Ok(hasher.hash(&candidate)?)
        })
        .await??;

        let account = Account {
            id: Uuid::new_v4(),
            pin_hash,
            created_at: Utc::now(),
        };

        let conn = self.db.lock().await;
        conn.execute(
            "INSERT INTO accounts (id, pin_hash, created_at) VALUES (?, ?, ?)",
            params![
                account.id.to_string(),
                account.pin_hash,
                account.created_at.to_rfc3339()
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                CredentialError::DuplicatePin
            } else {
                e.into()
            }
        })?;

        Ok(account)
    }

    /// Returns the first account, in signup order, whose hash matches `candidate`.
    pub async fn verify_pin(&self, candidate: &str) -> Result<Account, CredentialError> {
        let accounts = {
            let conn = self.db.lock().await;
            load_accounts(&conn)?
        };

        let hasher = self.hasher;
        let candidate = candidate.to_owned();
        let scanned = accounts.len();

        let matched = tokio::task::spawn_blocking(move || {
            accounts
                .into_iter()
                .find(|a| hasher.verify(&candidate, &a.pin_hash))
        })
        .await?;

        match matched {
            Some(account) => Ok(account),
            None => {
                tracing::debug!(scanned, "no account matched PIN");
                Err(CredentialError::InvalidCredential)
            }
        }
    }
}

fn load_accounts(conn: &Connection) -> Result<Vec<Account>, StoreError> {
    let mut stmt =
        conn.prepare("SELECT id, pin_hash, created_at FROM accounts ORDER BY rowid")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut accounts = Vec::new();
    for row in rows {
        let (id, pin_hash, created_at) = row?;
        accounts.push(Account {
            id: Uuid::parse_str(&id).map_err(|e| StoreError::Corrupt(e.to_string()))?,
            pin_hash,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?
                .with_timezone(&Utc),
        });
    }
    Ok(accounts)
}
