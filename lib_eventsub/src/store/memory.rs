//! In-process store. Records live in a map guarded by a short synchronous
//! lock; a transaction is applied to a copy and swapped in whole.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::collaborators::{StoreOp, SubscriptionStore, TokenSource};
use crate::error::{StoreError, TokenError};
use crate::models::{PersistedSubscription, SubscriptionFilter};
use crate::utils::lock;

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<String, PersistedSubscription>>,
    tokens: Mutex<HashMap<String, String>>,
    /// Handed out for authorizers without an entry of their own.
    fallback_token: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store answering every token request with `token`.
    pub fn with_static_token(token: impl Into<String>) -> Self {
        Self {
            fallback_token: Some(token.into()),
            ..Self::default()
        }
    }

    pub fn insert_token(&self, authorizer_id: &str, token: &str) {
        lock(&self.tokens).insert(authorizer_id.to_string(), token.to_string());
    }

    pub fn remove_token(&self, authorizer_id: &str) {
        lock(&self.tokens).remove(authorizer_id);
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every record, oldest first.
    pub fn records(&self) -> Vec<PersistedSubscription> {
        let mut records: Vec<_> = lock(&self.records).values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        records
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<PersistedSubscription>, StoreError> {
        Ok(lock(&self.records).get(id).cloned())
    }

    async fn find_by_filter(
        &self,
        filter: &SubscriptionFilter,
    ) -> Result<Vec<PersistedSubscription>, StoreError> {
        Ok(self
            .records()
            .into_iter()
            .filter(|record| filter.matches(record))
            .collect())
    }

    async fn save(&self, record: &PersistedSubscription) -> Result<(), StoreError> {
        lock(&self.records).insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        lock(&self.records).remove(id);
        Ok(())
    }

    async fn run_in_transaction(&self, ops: Vec<StoreOp>) -> Result<(), StoreError> {
        let mut records = lock(&self.records);
        let mut staged = records.clone();
        for op in ops {
            match op {
                StoreOp::Save(record) => {
                    staged.insert(record.id.clone(), record);
                }
                StoreOp::Delete(id) => {
                    staged.remove(&id);
                }
            }
        }
        *records = staged;
        Ok(())
    }
}

#[async_trait]
impl TokenSource for MemoryStore {
    async fn access_token(&self, authorizer_id: &str) -> Result<String, TokenError> {
        lock(&self.tokens)
            .get(authorizer_id)
            .cloned()
            .or_else(|| self.fallback_token.clone())
            .ok_or_else(|| TokenError::Missing(authorizer_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{catalog, LiveBinding};

    #[tokio::test]
    async fn filters_and_transactions() {
        let store = MemoryStore::new();
        let mut online = PersistedSubscription::pending("a", catalog::stream_online("1"));
        let offline = PersistedSubscription::pending("a", catalog::stream_offline("1"));
        online.set_binding(LiveBinding::Subscribed("live-1".into()));
        store.save(&online).await.unwrap();
        store.save(&offline).await.unwrap();

        let bound = store
            .find_by_filter(&SubscriptionFilter::LiveId("live-1".into()))
            .await
            .unwrap();
        assert_eq!(bound.len(), 1);
        assert_eq!(bound[0].id, online.id);

        let mut cleared = online.clone();
        cleared.set_binding(LiveBinding::Unsubscribed);
        store
            .run_in_transaction(vec![StoreOp::Save(cleared), StoreOp::Delete(offline.id.clone())])
            .await
            .unwrap();
        assert_eq!(store.len(), 1);
        let stored = store.find_by_id(&online.id).await.unwrap().unwrap();
        assert_eq!(stored.binding, LiveBinding::Unsubscribed);
    }

    #[tokio::test]
    async fn tokens_fall_back_to_static() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.access_token("x").await,
            Err(TokenError::Missing(_))
        ));
        store.insert_token("x", "tok");
        assert_eq!(store.access_token("x").await.unwrap(), "tok");

        let fixed = MemoryStore::with_static_token("static");
        assert_eq!(fixed.access_token("anyone").await.unwrap(), "static");
    }
}
