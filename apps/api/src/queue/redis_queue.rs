use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use uuid::Uuid;

use crate::queue::{JobQueue, Lease, QueueError, StallSweep};

const PENDING_KEY: &str = "eval:queue:pending";
const LEASES_KEY: &str = "eval:queue:leases";
const DEADLINES_KEY: &str = "eval:queue:deadlines";
const STALLS_KEY: &str = "eval:queue:stalls";

/// Pops the oldest pending job and records its lease atomically.
/// ARGV: token, deadline_ms. Returns the job id or nil.
const CLAIM_SCRIPT: &str = r#"
local job = redis.call('RPOP', KEYS[1])
if not job then
  return nil
end
redis.call('HSET', KEYS[2], job, ARGV[1])
redis.call('ZADD', KEYS[3], ARGV[2], job)
return job
"#;

/// Releases a lease only while it is still held under the caller's token.
/// ARGV: job_id, token. Returns 1 on release, 0 when fenced out.
const RELEASE_SCRIPT: &str = r#"
local held = redis.call('HGET', KEYS[1], ARGV[1])
if held ~= ARGV[2] then
  return 0
end
redis.call('HDEL', KEYS[1], ARGV[1])
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('HDEL', KEYS[3], ARGV[1])
return 1
"#;

/// Sweeps leases whose deadline has passed. Each stalled job is requeued
/// unless its stall count now exceeds the cap.
/// ARGV: now_ms, max_stalls. Returns {requeued, exhausted}.
const REAP_SCRIPT: &str = r#"
local expired = redis.call('ZRANGEBYSCORE', KEYS[3], '-inf', ARGV[1])
local requeued = {}
local exhausted = {}
for _, job in ipairs(expired) do
  redis.call('HDEL', KEYS[2], job)
  redis.call('ZREM', KEYS[3], job)
  local count = redis.call('HINCRBY', KEYS[4], job, 1)
  if count > tonumber(ARGV[2]) then
    redis.call('HDEL', KEYS[4], job)
    table.insert(exhausted, job)
  else
    redis.call('LPUSH', KEYS[1], job)
    table.insert(requeued, job)
  end
end
return {requeued, exhausted}
"#;

/// Redis-backed work queue shared by consumer processes. Pending jobs live
/// on a list; active leases are a hash (job → token) plus a deadline zset;
/// stall counts survive redelivery in their own hash. All multi-key
/// transitions run as Lua scripts so concurrent consumers stay consistent.
pub struct RedisJobQueue {
    conn: MultiplexedConnection,
    claim: Script,
    release: Script,
    reap: Script,
}

impl RedisJobQueue {
    pub async fn connect(client: &redis::Client) -> Result<Self, QueueError> {
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn,
            claim: Script::new(CLAIM_SCRIPT),
            release: Script::new(RELEASE_SCRIPT),
            reap: Script::new(REAP_SCRIPT),
        })
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job_id: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.lpush(PENDING_KEY, job_id).await?;
        Ok(())
    }

    async fn claim(&self, lease_ttl: Duration) -> Result<Option<Lease>, QueueError> {
        let mut conn = self.conn.clone();
        let token = Uuid::new_v4().to_string();
        let deadline_ms = Utc::now().timestamp_millis() + lease_ttl.as_millis() as i64;

        let job_id: Option<String> = self
            .claim
            .key(PENDING_KEY)
            .key(LEASES_KEY)
            .key(DEADLINES_KEY)
            .arg(&token)
            .arg(deadline_ms)
            .invoke_async(&mut conn)
            .await?;

        Ok(job_id.map(|job_id| Lease {
            job_id,
            token,
            deadline: millis_to_datetime(deadline_ms),
        }))
    }

    async fn ack(&self, lease: &Lease) -> Result<(), QueueError> {
        self.release_lease(lease).await
    }

    async fn nack(&self, lease: &Lease) -> Result<(), QueueError> {
        self.release_lease(lease).await
    }

    async fn reap_stalled(&self, max_stalls: u32) -> Result<StallSweep, QueueError> {
        let mut conn = self.conn.clone();
        let now_ms = Utc::now().timestamp_millis();

        let (requeued, exhausted): (Vec<String>, Vec<String>) = self
            .reap
            .key(PENDING_KEY)
            .key(LEASES_KEY)
            .key(DEADLINES_KEY)
            .key(STALLS_KEY)
            .arg(now_ms)
            .arg(max_stalls)
            .invoke_async(&mut conn)
            .await?;

        Ok(StallSweep {
            requeued,
            exhausted,
        })
    }
}

impl RedisJobQueue {
    async fn release_lease(&self, lease: &Lease) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let released: i64 = self
            .release
            .key(LEASES_KEY)
            .key(DEADLINES_KEY)
            .key(STALLS_KEY)
            .arg(&lease.job_id)
            .arg(&lease.token)
            .invoke_async(&mut conn)
            .await?;
        if released == 1 {
            Ok(())
        } else {
            Err(QueueError::LeaseLost(lease.job_id.clone()))
        }
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}
