use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::Script;
use redis::Value;
use redis::aio::ConnectionManager;

use crate::bucket::BucketStore;
use crate::bucket::Transition;
use crate::bucket::TransitionArgs;
use crate::config::StoreAddresses;
use crate::error::ConfigurationError;
use crate::error::TransitionError;

/// How long to wait for a shard to answer its first `PING`.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Error code the script replies with when the stored bucket is corrupt.
const MALFORMED_CODE: &str = "MALFORMED";

/// Refill, consume and write back in one atomic script.
///
/// `tokens` is returned as a string: Redis truncates Lua numbers to integers
/// on the way out, which would lose the fractional remainder. Stored fields
/// that are present but not numeric fail with a `MALFORMED` error reply.
const TOKEN_BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local rate = tonumber(ARGV[1])
local capacity = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local requested = tonumber(ARGV[4])
local ttl = tonumber(ARGV[5])

local bucket = redis.call('HMGET', key, 'tokens', 'lastRefill')

-- HMGET yields false for a missing field; anything present must be numeric.
local function field(raw, default, name)
    if not raw then
        return default
    end
    local value = tonumber(raw)
    if value == nil then
        error({err = 'MALFORMED stored ' .. name .. ' is not a number'})
    end
    return value
end

local tokens = field(bucket[1], capacity, 'tokens')
local last_refill = field(bucket[2], now, 'lastRefill')

local elapsed = now - last_refill
if elapsed > 0 then
    tokens = math.min(capacity, tokens + elapsed * rate)
end

local allowed = 0
if tokens >= requested then
    tokens = tokens - requested
    allowed = 1
end

redis.call('HSET', key, 'tokens', tokens, 'lastRefill', now)
redis.call('EXPIRE', key, ttl)

return {allowed, tostring(tokens)}
"#;

/// A [`BucketStore`] backed by a single Redis instance.
///
/// The underlying [`ConnectionManager`] multiplexes every caller over one
/// connection and reconnects on failure, so a store can be shared freely.
#[derive(Clone)]
pub struct RedisStore {
    addr: String,
    connection: ConnectionManager,
    script: Script,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to `url` and verify the server answers.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] if the URL is invalid or the server does
    /// not answer a `PING` within [`DIAL_TIMEOUT`].
    pub async fn connect(url: &str) -> Result<Self, ConfigurationError> {
        let client =
            redis::Client::open(url).map_err(|source| ConfigurationError::InvalidAddress {
                addr: url.to_string(),
                source,
            })?;

        let connect = async {
            let mut connection = client.get_connection_manager().await?;
            redis::cmd("PING")
                .query_async::<String>(&mut connection)
                .await?;
            Ok::<_, redis::RedisError>(connection)
        };

        let connection = match tokio::time::timeout(DIAL_TIMEOUT, connect).await {
            Ok(Ok(connection)) => connection,
            Ok(Err(err)) => {
                tracing::error!(addr = url, error = %err, "store connection failed");
                return Err(ConfigurationError::Connect {
                    addr: url.to_string(),
                    reason: err.to_string(),
                });
            }
            Err(_) => {
                tracing::error!(addr = url, "store connection timed out");
                return Err(ConfigurationError::Connect {
                    addr: url.to_string(),
                    reason: format!("no answer within {DIAL_TIMEOUT:?}"),
                });
            }
        };

        tracing::info!(addr = url, "connected to store");

        Ok(Self {
            addr: url.to_string(),
            connection,
            script: Script::new(TOKEN_BUCKET_SCRIPT),
        })
    }

    /// Connect to every shard in order. The first failure aborts startup.
    pub async fn connect_all(addresses: &StoreAddresses) -> Result<Vec<Self>, ConfigurationError> {
        let mut shards = Vec::with_capacity(addresses.len());
        for url in addresses.urls() {
            shards.push(Self::connect(&url).await?);
        }
        Ok(shards)
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl BucketStore for RedisStore {
    async fn transition(
        &self,
        key: &str,
        args: &TransitionArgs,
    ) -> Result<Transition, TransitionError> {
        let mut connection = self.connection.clone();
        let reply: Value = self
            .script
            .key(key)
            .arg(args.rate)
            .arg(args.capacity)
            .arg(args.now)
            .arg(args.requested)
            .arg(args.idle_ttl.as_secs().max(1))
            .invoke_async(&mut connection)
            .await
            .map_err(|err| {
                if err.code() == Some(MALFORMED_CODE) {
                    TransitionError::MalformedResult(err.to_string())
                } else {
                    TransitionError::Store(err)
                }
            })?;

        parse_reply(reply)
    }
}

/// Interpret the script's `{allowed, tokens}` reply.
fn parse_reply(reply: Value) -> Result<Transition, TransitionError> {
    let items = match reply {
        Value::Array(items) => items,
        other => {
            return Err(TransitionError::MalformedResult(format!(
                "expected a two element array, got {other:?}"
            )));
        }
    };

    let [allowed, remaining] = items.as_slice() else {
        return Err(TransitionError::MalformedResult(format!(
            "expected two elements, got {}",
            items.len()
        )));
    };

    let allowed = match number(allowed) {
        Some(flag) if flag == 1.0 => true,
        Some(flag) if flag == 0.0 => false,
        _ => {
            return Err(TransitionError::MalformedResult(format!(
                "allowed flag is not 0 or 1: {allowed:?}"
            )));
        }
    };

    let remaining = number(remaining)
        .filter(|tokens| tokens.is_finite() && *tokens >= 0.0)
        .ok_or_else(|| {
            TransitionError::MalformedResult(format!("unreadable token count: {remaining:?}"))
        })?;

    Ok(Transition { allowed, remaining })
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Int(n) => Some(*n as f64),
        Value::Double(n) => Some(*n),
        Value::BulkString(bytes) => std::str::from_utf8(bytes).ok()?.trim().parse().ok(),
        Value::SimpleString(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use tokio::task::JoinSet;

    use super::*;
    use crate::LimiterConfig;
    use crate::RateLimiter;
    use crate::WallClock;

    fn bulk(s: &str) -> Value {
        Value::BulkString(s.as_bytes().to_vec())
    }

    #[test]
    fn it_parses_well_formed_replies() {
        let t = parse_reply(Value::Array(vec![Value::Int(1), bulk("8.25")])).unwrap();
        assert_eq!(
            t,
            Transition {
                allowed: true,
                remaining: 8.25
            }
        );

        let t = parse_reply(Value::Array(vec![Value::Int(0), Value::Int(0)])).unwrap();
        assert!(!t.allowed);
        assert_eq!(t.remaining, 0.0);
    }

    #[test]
    fn it_rejects_malformed_replies() {
        let cases = [
            Value::Nil,
            Value::Int(1),
            Value::Array(vec![Value::Int(1)]),
            Value::Array(vec![Value::Int(1), bulk("2"), bulk("3")]),
            Value::Array(vec![Value::Int(2), bulk("2")]),
            Value::Array(vec![Value::Int(1), bulk("lots")]),
            Value::Array(vec![Value::Int(1), bulk("-1")]),
            Value::Array(vec![Value::Nil, bulk("1")]),
        ];
        for reply in cases {
            let err = parse_reply(reply.clone()).unwrap_err();
            assert!(err.is_malformed(), "{reply:?} gave {err}");
        }
    }

    #[tokio::test]
    async fn it_refuses_invalid_addresses() {
        assert!(matches!(
            RedisStore::connect("not a url").await,
            Err(ConfigurationError::InvalidAddress { .. })
        ));
    }

    fn redis_url() -> String {
        StoreAddresses::parse(&std::env::var("REDIS_ADDR").unwrap_or_default())
            .urls()
            .next()
            .unwrap_or_default()
    }

    async fn live_limiter(rate: f64, capacity: f64, prefix: &str) -> RateLimiter<RedisStore> {
        let store = RedisStore::connect(&redis_url())
            .await
            .expect("a redis server at REDIS_ADDR");
        let config = LimiterConfig::new(rate, capacity)
            .unwrap()
            .with_key_prefix(prefix);
        RateLimiter::new(vec![store], config).unwrap()
    }

    async fn clear(limiter: &RateLimiter<RedisStore>, key: &str) {
        let mut connection = limiter.router().shards()[0].connection.clone();
        let _: () = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut connection)
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    #[ignore = "needs a redis server at REDIS_ADDR"]
    async fn redis_grants_exactly_capacity_under_contention() {
        // Every caller shares one instant, so refill cannot hand out extra tokens.
        let (clock, _mock) = quanta::Clock::mock();
        let limiter = live_limiter(1000.0, 10.0, "test:contention:")
            .await
            .with_clock(WallClock::with_clock(clock, 1_000_000.0));
        let limiter = Arc::new(limiter);
        clear(&limiter, "test:contention:user").await;

        let allowed = Arc::new(AtomicUsize::new(0));
        let mut tasks = JoinSet::new();
        for _ in 0..100 {
            let limiter = limiter.clone();
            let allowed = allowed.clone();
            tasks.spawn(async move {
                let decision = limiter.try_decide("user").await.unwrap();
                if decision.allowed {
                    allowed.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
        while let Some(res) = tasks.join_next().await {
            res.unwrap();
        }

        assert_eq!(allowed.load(Ordering::SeqCst), 10);
        clear(&limiter, "test:contention:user").await;
    }

    #[tokio::test]
    #[ignore = "needs a redis server at REDIS_ADDR"]
    async fn redis_refills_at_the_configured_rate() {
        let limiter = live_limiter(5.0, 10.0, "test:refill:").await;
        clear(&limiter, "test:refill:user").await;

        for i in 0..10 {
            assert!(limiter.try_decide("user").await.unwrap().allowed, "request {i}");
        }
        assert!(!limiter.try_decide("user").await.unwrap().allowed);

        tokio::time::sleep(Duration::from_secs(1)).await;

        let mut allowed = 0;
        while limiter.try_decide("user").await.unwrap().allowed {
            allowed += 1;
        }
        assert_eq!(allowed, 5);
        clear(&limiter, "test:refill:user").await;
    }

    #[tokio::test]
    #[ignore = "needs a redis server at REDIS_ADDR"]
    async fn redis_reports_corrupt_bucket_state() {
        let limiter = live_limiter(5.0, 10.0, "test:corrupt:").await;
        let key = "test:corrupt:user";
        clear(&limiter, key).await;

        let mut connection = limiter.router().shards()[0].connection.clone();
        let _: () = redis::cmd("HSET")
            .arg(key)
            .arg("tokens")
            .arg("abc")
            .query_async(&mut connection)
            .await
            .unwrap();

        let err = limiter.try_decide("user").await.unwrap_err();
        assert!(err.is_malformed(), "{err}");

        // The corrupt field is left alone rather than silently refilled.
        let tokens: String = redis::cmd("HGET")
            .arg(key)
            .arg("tokens")
            .query_async(&mut connection)
            .await
            .unwrap();
        assert_eq!(tokens, "abc");
        clear(&limiter, key).await;
    }
}
