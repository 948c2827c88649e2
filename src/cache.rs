use crate::{database::Database, redis_client::RedisClient};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::info;

// Listing cache entries live for an hour; taken-seat sets are short-lived and
// also invalidated explicitly after every reservation commit. The cache never
// participates in booking correctness, it only absorbs read traffic.
const LISTING_TTL_SECONDS: u64 = 3600;
const SEATS_TTL_SECONDS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TakenSeat {
    pub row: i32,
    pub seat: i32,
}

#[derive(Clone)]
pub struct CacheService {
    redis: RedisClient,
    db: Database,
}

impl CacheService {
    pub fn new(redis: RedisClient, db: Database) -> Self {
        Self { redis, db }
    }

    // Cache warmup at startup
    pub async fn warmup_cache(&self) {
        info!("Starting cache warmup...");

        let upcoming: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM performances WHERE show_time > NOW() ORDER BY show_time LIMIT 20",
        )
        .fetch_all(&self.db.pool)
        .await
        .unwrap_or_default();

        for performance_id in &upcoming {
            let _ = self.get_taken_seats(*performance_id).await;
        }

        info!("Cache warmup done ({} performances)", upcoming.len());
    }

    /* ---------- listing cache (keyed by query string) ---------- */

    pub async fn get_cached_listing(&self, key: &str) -> Result<Option<String>, redis::RedisError> {
        let mut conn = self.redis.conn.clone();
        conn.get(key).await
    }

    pub async fn cache_listing(&self, key: &str, value: &str) -> Result<(), redis::RedisError> {
        let mut conn = self.redis.conn.clone();
        conn.set_ex(key, value, LISTING_TTL_SECONDS).await
    }

    // Drop every cached performance listing (after create/delete)
    pub async fn invalidate_listings(&self) {
        let mut conn = self.redis.conn.clone();
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg("performances:*")
            .query_async(&mut conn)
            .await
            .unwrap_or_default();
        if !keys.is_empty() {
            let _: Result<(), _> = conn.del(keys).await;
        }
    }

    /* ---------- taken seats per performance ---------- */

    // Taken coordinates with cache-aside; falls back to the DB on any cache
    // failure and returns the live set.
    pub async fn get_taken_seats(&self, performance_id: i64) -> Result<Vec<TakenSeat>, sqlx::Error> {
        if let Ok(seats) = self.get_seats_from_cache(performance_id).await {
            return Ok(seats);
        }

        let seats = self.load_taken_seats_from_db(performance_id).await?;
        let _ = self.save_seats_to_cache(performance_id, &seats).await;
        Ok(seats)
    }

    pub async fn invalidate_seats(&self, performance_id: i64) {
        let key = format!("performance:{}:taken", performance_id);
        let mut conn = self.redis.conn.clone();
        let _: Result<(), _> = conn.del(&key).await;
        info!("Invalidated seat cache for performance {}", performance_id);
    }

    async fn load_taken_seats_from_db(
        &self,
        performance_id: i64,
    ) -> Result<Vec<TakenSeat>, sqlx::Error> {
        sqlx::query_as::<_, TakenSeat>(
            "SELECT row, seat FROM tickets WHERE performance_id = $1 ORDER BY row, seat",
        )
        .bind(performance_id)
        .fetch_all(&self.db.pool)
        .await
    }

    async fn get_seats_from_cache(
        &self,
        performance_id: i64,
    ) -> Result<Vec<TakenSeat>, redis::RedisError> {
        let mut conn = self.redis.conn.clone();
        let key = format!("performance:{}:taken", performance_id);
        let data: String = conn.get(key).await?;
        let seats: Vec<TakenSeat> = serde_json::from_str(&data).map_err(|_| {
            redis::RedisError::from((redis::ErrorKind::TypeError, "Parse error"))
        })?;
        Ok(seats)
    }

    async fn save_seats_to_cache(
        &self,
        performance_id: i64,
        seats: &[TakenSeat],
    ) -> Result<(), redis::RedisError> {
        let data = serde_json::to_string(seats).map_err(|_| {
            redis::RedisError::from((redis::ErrorKind::TypeError, "Serialize error"))
        })?;
        let key = format!("performance:{}:taken", performance_id);
        let mut conn = self.redis.conn.clone();
        conn.set_ex(key, data, SEATS_TTL_SECONDS).await
    }
}
