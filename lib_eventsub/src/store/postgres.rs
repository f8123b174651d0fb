//! # PostgreSQL Store
//!
//! Subscription records and authorizer tokens in Postgres, through a
//! `deadpool-postgres` connection pool. Conditions are kept as JSONB; the
//! live binding is split into a state column plus the live id or failure
//! reason so `LiveId` lookups can use an index.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{GenericClient, Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::types::ToSql;
use tokio_postgres::{NoTls, Row};
use tracing::{debug, info};

use crate::collaborators::{StoreOp, SubscriptionStore, TokenSource};
use crate::error::{StoreError, TokenError};
use crate::models::{LiveBinding, PersistedSubscription, SubscriptionConfig, SubscriptionFilter};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS eventsub_subscriptions (
    id                  TEXT PRIMARY KEY,
    authorizer_id       TEXT NOT NULL,
    subscription_type   TEXT NOT NULL,
    version             TEXT NOT NULL,
    condition           JSONB NOT NULL,
    broadcaster_user_id TEXT,
    binding_state       TEXT NOT NULL,
    live_id             TEXT,
    failure_reason      TEXT,
    created_at          TIMESTAMPTZ NOT NULL,
    updated_at          TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS eventsub_subscriptions_live_id ON eventsub_subscriptions (live_id);
CREATE INDEX IF NOT EXISTS eventsub_subscriptions_dedupe
    ON eventsub_subscriptions (subscription_type, broadcaster_user_id);
CREATE TABLE IF NOT EXISTS eventsub_tokens (
    authorizer_id TEXT PRIMARY KEY,
    access_token  TEXT NOT NULL,
    updated_at    TIMESTAMPTZ NOT NULL
);
"#;

const COLUMNS: &str = "id, authorizer_id, subscription_type, version, condition, \
                       binding_state, live_id, failure_reason, created_at, updated_at";

const UPSERT: &str = "INSERT INTO eventsub_subscriptions \
    (id, authorizer_id, subscription_type, version, condition, broadcaster_user_id, \
     binding_state, live_id, failure_reason, created_at, updated_at) \
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
    ON CONFLICT (id) DO UPDATE SET \
     authorizer_id = EXCLUDED.authorizer_id, subscription_type = EXCLUDED.subscription_type, \
     version = EXCLUDED.version, condition = EXCLUDED.condition, \
     broadcaster_user_id = EXCLUDED.broadcaster_user_id, binding_state = EXCLUDED.binding_state, \
     live_id = EXCLUDED.live_id, failure_reason = EXCLUDED.failure_reason, \
     updated_at = EXCLUDED.updated_at";

const DELETE: &str = "DELETE FROM eventsub_subscriptions WHERE id = $1";

fn query_err(e: tokio_postgres::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    /// Builds the pool and checks one connection within `connect_timeout`.
    pub async fn connect(
        database_url: &str,
        max_connections: usize,
        connect_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pg_config: tokio_postgres::Config = database_url
            .parse()
            .map_err(|e: tokio_postgres::Error| StoreError::Connection(e.to_string()))?;
        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(max_connections)
            .build()
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let store = Self { pool };
        tokio::time::timeout(connect_timeout, store.ping())
            .await
            .map_err(|_| StoreError::Connection(format!("no connection within {connect_timeout:?}")))??;
        info!(max_connections, "postgres store connected");
        Ok(store)
    }

    async fn client(&self) -> Result<deadpool_postgres::Object, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        self.client()
            .await?
            .simple_query("SELECT 1")
            .await
            .map_err(query_err)?;
        Ok(())
    }

    /// Creates the tables and indexes if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        self.client().await?.batch_execute(SCHEMA).await.map_err(query_err)?;
        debug!("eventsub schema ensured");
        Ok(())
    }

    /// Stores or replaces the access token for `authorizer_id`.
    pub async fn put_token(&self, authorizer_id: &str, access_token: &str) -> Result<(), StoreError> {
        self.client()
            .await?
            .execute(
                "INSERT INTO eventsub_tokens (authorizer_id, access_token, updated_at) \
                 VALUES ($1, $2, $3) \
                 ON CONFLICT (authorizer_id) DO UPDATE SET \
                 access_token = EXCLUDED.access_token, updated_at = EXCLUDED.updated_at",
                &[&authorizer_id, &access_token, &Utc::now()],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }
}

async fn upsert<C: GenericClient + Sync>(client: &C, record: &PersistedSubscription) -> Result<(), StoreError> {
    let condition = serde_json::to_value(&record.config.condition)
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;
    let (state, live_id, failure_reason) = match &record.binding {
        LiveBinding::Subscribed(id) => (record.binding.state_name(), Some(id.as_str()), None),
        LiveBinding::Failed(reason) => (record.binding.state_name(), None, Some(reason.as_str())),
        _ => (record.binding.state_name(), None, None),
    };
    let broadcaster = record.config.broadcaster_user_id();
    let params: [&(dyn ToSql + Sync); 11] = [
        &record.id,
        &record.authorizer_id,
        &record.config.subscription_type,
        &record.config.version,
        &condition,
        &broadcaster,
        &state,
        &live_id,
        &failure_reason,
        &record.created_at,
        &record.updated_at,
    ];
    client.execute(UPSERT, &params).await.map_err(query_err)?;
    Ok(())
}

fn binding_from_columns(
    state: &str,
    live_id: Option<String>,
    failure_reason: Option<String>,
) -> Result<LiveBinding, StoreError> {
    match state {
        "unsubscribed" => Ok(LiveBinding::Unsubscribed),
        "pending" => Ok(LiveBinding::Pending),
        "subscribed" => live_id
            .map(LiveBinding::Subscribed)
            .ok_or_else(|| StoreError::Corrupt("subscribed record without live_id".into())),
        "failed" => Ok(LiveBinding::Failed(failure_reason.unwrap_or_default())),
        other => Err(StoreError::Corrupt(format!("unknown binding state `{other}`"))),
    }
}

fn record_from_row(row: &Row) -> Result<PersistedSubscription, StoreError> {
    let condition: serde_json::Value = row.try_get("condition").map_err(query_err)?;
    let condition: BTreeMap<String, String> =
        serde_json::from_value(condition).map_err(|e| StoreError::Corrupt(e.to_string()))?;
    let state: String = row.try_get("binding_state").map_err(query_err)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(query_err)?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(query_err)?;
    Ok(PersistedSubscription {
        id: row.try_get("id").map_err(query_err)?,
        authorizer_id: row.try_get("authorizer_id").map_err(query_err)?,
        config: SubscriptionConfig {
            version: row.try_get("version").map_err(query_err)?,
            subscription_type: row.try_get("subscription_type").map_err(query_err)?,
            condition,
        },
        binding: binding_from_columns(
            &state,
            row.try_get("live_id").map_err(query_err)?,
            row.try_get("failure_reason").map_err(query_err)?,
        )?,
        created_at,
        updated_at,
    })
}

#[async_trait]
impl SubscriptionStore for PgStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<PersistedSubscription>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM eventsub_subscriptions WHERE id = $1");
        let row = self
            .client()
            .await?
            .query_opt(sql.as_str(), &[&id])
            .await
            .map_err(query_err)?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn find_by_filter(
        &self,
        filter: &SubscriptionFilter,
    ) -> Result<Vec<PersistedSubscription>, StoreError> {
        let client = self.client().await?;
        let order = "ORDER BY created_at, id";
        let rows = match filter {
            SubscriptionFilter::All => {
                let sql = format!("SELECT {COLUMNS} FROM eventsub_subscriptions {order}");
                client.query(sql.as_str(), &[]).await
            }
            SubscriptionFilter::TypeAndBroadcaster {
                subscription_type,
                broadcaster_user_id,
            } => {
                let sql = format!(
                    "SELECT {COLUMNS} FROM eventsub_subscriptions \
                     WHERE subscription_type = $1 AND broadcaster_user_id = $2 {order}"
                );
                client
                    .query(sql.as_str(), &[subscription_type, broadcaster_user_id])
                    .await
            }
            SubscriptionFilter::LiveId(live_id) => {
                let sql = format!("SELECT {COLUMNS} FROM eventsub_subscriptions WHERE live_id = $1 {order}");
                client.query(sql.as_str(), &[live_id]).await
            }
            SubscriptionFilter::Authorizer(authorizer_id) => {
                let sql = format!(
                    "SELECT {COLUMNS} FROM eventsub_subscriptions WHERE authorizer_id = $1 {order}"
                );
                client.query(sql.as_str(), &[authorizer_id]).await
            }
        }
        .map_err(query_err)?;
        rows.iter().map(record_from_row).collect()
    }

    async fn save(&self, record: &PersistedSubscription) -> Result<(), StoreError> {
        let client = self.client().await?;
        upsert(&client, record).await
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.client()
            .await?
            .execute(DELETE, &[&id])
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn run_in_transaction(&self, ops: Vec<StoreOp>) -> Result<(), StoreError> {
        let mut client = self.client().await?;
        let tx = client.transaction().await.map_err(query_err)?;
        for op in &ops {
            match op {
                StoreOp::Save(record) => upsert(&tx, record).await?,
                StoreOp::Delete(id) => {
                    tx.execute(DELETE, &[id]).await.map_err(query_err)?;
                }
            }
        }
        tx.commit().await.map_err(query_err)?;
        debug!(ops = ops.len(), "store transaction committed");
        Ok(())
    }
}

#[async_trait]
impl TokenSource for PgStore {
    async fn access_token(&self, authorizer_id: &str) -> Result<String, TokenError> {
        let refresh = |reason: String| TokenError::Refresh {
            authorizer_id: authorizer_id.to_string(),
            reason,
        };
        let client = self.client().await.map_err(|e| refresh(e.to_string()))?;
        let row = client
            .query_opt(
                "SELECT access_token FROM eventsub_tokens WHERE authorizer_id = $1",
                &[&authorizer_id],
            )
            .await
            .map_err(|e| refresh(e.to_string()))?
            .ok_or_else(|| TokenError::Missing(authorizer_id.to_string()))?;
        row.try_get("access_token").map_err(|e| refresh(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_columns_round_into_variants() {
        assert_eq!(
            binding_from_columns("subscribed", Some("abc".into()), None).unwrap(),
            LiveBinding::Subscribed("abc".into())
        );
        assert_eq!(
            binding_from_columns("failed", None, Some("revoked: x".into())).unwrap(),
            LiveBinding::Failed("revoked: x".into())
        );
        assert!(matches!(
            binding_from_columns("subscribed", None, None),
            Err(StoreError::Corrupt(_))
        ));
        assert!(binding_from_columns("bogus", None, None).is_err());
    }
}
