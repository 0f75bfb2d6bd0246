use super::{Collection, CredentialStore, StoreError, StorePath, StoreResult, Transaction};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// In-process store. A commit validates and applies under a single write guard, so
/// concurrent commits are serialized without holding anything across caller I/O.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every `(path, value)` pair, ordered by path.
    pub async fn snapshot(&self) -> Vec<(String, Value)> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get(&self, path: &StorePath) -> StoreResult<Option<Value>> {
        Ok(self.entries.read().await.get(&path.to_string()).cloned())
    }

    async fn list(&self, collection: Collection) -> StoreResult<Vec<(String, Value)>> {
        let prefix = collection.prefix();
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .map(|(path, value)| (path[prefix.len()..].to_string(), value.clone()))
            .collect())
    }

    async fn commit(&self, transaction: Transaction) -> StoreResult<()> {
        let mut entries = self.entries.write().await;

        for mutation in transaction.mutations() {
            let key = mutation.path.to_string();
            if !mutation.expected.matches(entries.get(&key)) {
                return Err(StoreError::Conflict { path: key });
            }
        }

        for mutation in transaction.into_mutations() {
            let key = mutation.path.to_string();
            match mutation.new {
                Some(value) => {
                    entries.insert(key, value);
                }
                None => {
                    entries.remove(&key);
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_then_conflicting_insert() {
        let store = MemoryStore::new();
        let path = StorePath::code("HELLO").unwrap();

        store
            .commit(Transaction::new().insert(path.clone(), json!({"points": 5, "used": false})))
            .await
            .unwrap();

        let err = store
            .commit(Transaction::new().insert(path.clone(), json!({"points": 9, "used": false})))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::Conflict {
                path: "codes/HELLO".to_string()
            }
        );
        assert_eq!(
            store.get(&path).await.unwrap(),
            Some(json!({"points": 5, "used": false}))
        );
    }

    #[tokio::test]
    async fn test_failed_transaction_applies_nothing() {
        let store = MemoryStore::new();
        let user = StorePath::user(1);
        let account = StorePath::account("a").unwrap();
        store
            .commit(Transaction::new().insert(user.clone(), json!({"points": 10})))
            .await
            .unwrap();

        // account path does not hold the expected value, so the user debit must not land
        let err = store
            .commit(
                Transaction::new()
                    .put(user.clone(), Some(json!({"points": 10})), json!({"points": 0}))
                    .remove(account, json!({"credentials": "a:1"})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert_eq!(store.get(&user).await.unwrap(), Some(json!({"points": 10})));
    }

    #[tokio::test]
    async fn test_list_and_first_are_scoped_and_ordered() {
        let store = MemoryStore::new();
        for id in ["carol", "alice", "bob"] {
            store
                .commit(Transaction::new().insert(
                    StorePath::account(id).unwrap(),
                    json!({"credentials": format!("{id}:pw")}),
                ))
                .await
                .unwrap();
        }
        store
            .commit(Transaction::new().insert(StorePath::user(7), json!({"points": 0})))
            .await
            .unwrap();

        let keys: Vec<String> = store
            .list(Collection::Accounts)
            .await
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["alice", "bob", "carol"]);

        let (first, _) = store.first(Collection::Accounts).await.unwrap().unwrap();
        assert_eq!(first, "alice");
        assert!(store.first(Collection::Codes).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_conditional_set_and_delete_helpers() {
        let store = MemoryStore::new();
        let path = StorePath::user(3);

        store.conditional_set(&path, None, json!({"points": 1})).await.unwrap();
        assert!(store
            .conditional_set(&path, Some(json!({"points": 2})), json!({"points": 3}))
            .await
            .is_err());
        store
            .conditional_set(&path, Some(json!({"points": 1})), json!({"points": 3}))
            .await
            .unwrap();
        assert_eq!(store.get(&path).await.unwrap(), Some(json!({"points": 3})));

        store.delete(&path).await.unwrap();
        assert_eq!(store.get(&path).await.unwrap(), None);
    }
}
