use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};

use crate::jobs::JobRecord;
use crate::store::{JobStore, StoreError};

const RECORD_KEY_PREFIX: &str = "eval:job:";

/// Compare-and-set overwrite: replaces the record only if the stored
/// revision still matches the revision the caller read.
const CAS_UPDATE_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
  return -1
end
local stored = cjson.decode(current)
if stored['revision'] ~= tonumber(ARGV[1]) then
  return 0
end
redis.call('SET', KEYS[1], ARGV[2])
return 1
"#;

/// Redis-backed Job Record Store. Records are stored as JSON strings under
/// `eval:job:{id}`; updates go through a Lua script for atomic CAS.
pub struct RedisJobStore {
    conn: MultiplexedConnection,
    cas_update: Script,
}

impl RedisJobStore {
    pub async fn connect(client: &redis::Client) -> Result<Self, StoreError> {
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn,
            cas_update: Script::new(CAS_UPDATE_SCRIPT),
        })
    }

    fn key(id: &str) -> String {
        format!("{RECORD_KEY_PREFIX}{id}")
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn create(&self, record: &JobRecord) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(record)?;
        let created: bool = conn.set_nx(Self::key(&record.id), payload).await?;
        if !created {
            return Err(StoreError::AlreadyExists(record.id.clone()));
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<JobRecord, StoreError> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.get(Self::key(id)).await?;
        let payload = payload.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Ok(serde_json::from_str(&payload)?)
    }

    async fn update(&self, record: &JobRecord) -> Result<JobRecord, StoreError> {
        let mut conn = self.conn.clone();
        let mut next = record.clone();
        next.revision += 1;
        let payload = serde_json::to_string(&next)?;

        let outcome: i64 = self
            .cas_update
            .key(Self::key(&record.id))
            .arg(record.revision)
            .arg(payload)
            .invoke_async(&mut conn)
            .await?;

        match outcome {
            1 => Ok(next),
            0 => Err(StoreError::Conflict(record.id.clone())),
            _ => Err(StoreError::NotFound(record.id.clone())),
        }
    }
}
