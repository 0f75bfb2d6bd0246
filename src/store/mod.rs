//! Hierarchical key-value store consumed by the ledger.
//!
//! Records live under `users/{id}`, `codes/{code}` and `accounts/{id}`. Every write goes
//! through [`CredentialStore::commit`], which applies a [`Transaction`] only if each of its
//! paths still matches the caller's expectation. Single-path helpers (`conditional_set`,
//! `delete`) are one-mutation transactions.

pub mod database;
pub mod memory;

pub use database::DatabaseStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A path no longer matched its expected prior value; nothing was written.
    #[error("Conflicting write on {path}")]
    Conflict { path: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt record at {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("Invalid store path: {0}")]
    InvalidPath(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Collection {
    Users,
    Codes,
    Accounts,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Codes => "codes",
            Collection::Accounts => "accounts",
        }
    }

    /// `"accounts/"`, used for prefix scans.
    pub fn prefix(&self) -> String {
        format!("{}/", self.as_str())
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `collection/key`. Keys are single path segments.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorePath {
    collection: Collection,
    key: String,
}

impl StorePath {
    pub fn new(collection: Collection, key: &str) -> StoreResult<Self> {
        if key.is_empty() || key.contains('/') || key.chars().any(char::is_whitespace) {
            return Err(StoreError::InvalidPath(format!("{collection}/{key}")));
        }
        Ok(Self {
            collection,
            key: key.to_string(),
        })
    }

    pub fn user(user_id: i64) -> Self {
        Self {
            collection: Collection::Users,
            key: user_id.to_string(),
        }
    }

    pub fn code(code: &str) -> StoreResult<Self> {
        Self::new(Collection::Codes, code)
    }

    pub fn account(account_id: &str) -> StoreResult<Self> {
        Self::new(Collection::Accounts, account_id)
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.key)
    }
}

/// What a path must hold for a mutation to apply.
#[derive(Debug, Clone, PartialEq)]
pub enum Expectation {
    Any,
    Absent,
    Equals(Value),
}

impl Expectation {
    pub fn from_prior(prior: Option<Value>) -> Self {
        match prior {
            Some(v) => Expectation::Equals(v),
            None => Expectation::Absent,
        }
    }

    pub fn matches(&self, current: Option<&Value>) -> bool {
        match self {
            Expectation::Any => true,
            Expectation::Absent => current.is_none(),
            Expectation::Equals(expected) => current == Some(expected),
        }
    }
}

/// `new = None` removes the path.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub path: StorePath,
    pub expected: Expectation,
    pub new: Option<Value>,
}

/// An all-or-nothing batch of conditional mutations. A path appears at most once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transaction {
    mutations: Vec<Mutation>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, mutation: Mutation) -> Self {
        self.mutations.push(mutation);
        self
    }

    /// Writes `value` only if the path does not exist yet.
    pub fn insert(self, path: StorePath, value: Value) -> Self {
        self.push(Mutation {
            path,
            expected: Expectation::Absent,
            new: Some(value),
        })
    }

    /// Writes `value` only if the path still holds `prior` (`None` meaning absent).
    pub fn put(self, path: StorePath, prior: Option<Value>, value: Value) -> Self {
        self.push(Mutation {
            path,
            expected: Expectation::from_prior(prior),
            new: Some(value),
        })
    }

    /// Removes the path only if it still holds `prior`.
    pub fn remove(self, path: StorePath, prior: Value) -> Self {
        self.push(Mutation {
            path,
            expected: Expectation::Equals(prior),
            new: None,
        })
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub fn into_mutations(self) -> Vec<Mutation> {
        self.mutations
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, path: &StorePath) -> StoreResult<Option<Value>>;

    /// All `(key, value)` pairs of a collection, ordered by key.
    async fn list(&self, collection: Collection) -> StoreResult<Vec<(String, Value)>>;

    /// Applies every mutation or none. Fails with [`StoreError::Conflict`] naming the first
    /// path whose expectation did not hold.
    async fn commit(&self, transaction: Transaction) -> StoreResult<()>;

    /// Entry with the smallest key in a collection.
    async fn first(&self, collection: Collection) -> StoreResult<Option<(String, Value)>> {
        Ok(self.list(collection).await?.into_iter().next())
    }

    async fn conditional_set(
        &self,
        path: &StorePath,
        expected: Option<Value>,
        value: Value,
    ) -> StoreResult<()> {
        self.commit(Transaction::new().put(path.clone(), expected, value))
            .await
    }

    async fn delete(&self, path: &StorePath) -> StoreResult<()> {
        self.commit(Transaction::new().push(Mutation {
            path: path.clone(),
            expected: Expectation::Any,
            new: None,
        }))
        .await
    }
}
