//! SQLite implementation of the attempt store.

use std::net::IpAddr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use portcullis_core::{
    AccountCounter, AccountId, AddressCounter, AttemptStore, Error, FailureOutcome, LockoutPolicy,
    error::StorageError, error::utilities::DatabaseResultExt,
};
use sqlx::SqliteConnection;

use crate::SqliteAttemptStore;

/// Internal struct for account query results
#[derive(Debug, sqlx::FromRow)]
struct SqliteAccountCounter {
    account: String,
    failed_count: i64,
    locked_until: Option<i64>,
    last_failure_at: Option<i64>,
}

impl TryFrom<SqliteAccountCounter> for AccountCounter {
    type Error = Error;

    fn try_from(row: SqliteAccountCounter) -> Result<Self, Self::Error> {
        Ok(AccountCounter {
            account: AccountId::parse(&row.account)
                .map_err(|e| StorageError::Database(format!("Corrupt account key: {e}")))?,
            failed_count: count_from_row(row.failed_count)?,
            locked_until: timestamp_from_row(row.locked_until)?,
            last_failure_at: timestamp_from_row(row.last_failure_at)?,
        })
    }
}

/// Internal struct for address query results
#[derive(Debug, sqlx::FromRow)]
struct SqliteAddressCounter {
    address: String,
    failed_count: i64,
    blocked: bool,
    blocked_at: Option<i64>,
    blocked_until: Option<i64>,
    last_failure_at: Option<i64>,
}

impl TryFrom<SqliteAddressCounter> for AddressCounter {
    type Error = Error;

    fn try_from(row: SqliteAddressCounter) -> Result<Self, Self::Error> {
        Ok(AddressCounter {
            address: row
                .address
                .parse()
                .map_err(|e| StorageError::Database(format!("Corrupt address key: {e}")))?,
            failed_count: count_from_row(row.failed_count)?,
            blocked: row.blocked,
            blocked_at: timestamp_from_row(row.blocked_at)?,
            blocked_until: timestamp_from_row(row.blocked_until)?,
            last_failure_at: timestamp_from_row(row.last_failure_at)?,
        })
    }
}

fn count_from_row(count: i64) -> Result<u32, Error> {
    u32::try_from(count)
        .map_err(|_| Error::from(StorageError::Database(format!("Invalid failure count: {count}"))))
}

fn timestamp_from_row(millis: Option<i64>) -> Result<Option<DateTime<Utc>>, Error> {
    millis
        .map(|ms| {
            DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| Error::from(StorageError::Database(format!("Invalid timestamp: {ms}"))))
        })
        .transpose()
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Logs the driver error and folds it into a storage error.
///
/// Pool exhaustion and I/O errors mean the database cannot be reached at all.
fn storage_error(context: &'static str) -> impl FnOnce(sqlx::Error) -> Error {
    move |e| {
        tracing::error!(error = %e, "{context}");
        match e {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StorageError::Unavailable(context.to_string()).into()
            }
            _ => StorageError::Database(context.to_string()).into(),
        }
    }
}

const SELECT_ACCOUNT: &str = r#"
    SELECT account, failed_count, locked_until, last_failure_at
    FROM account_attempts
    WHERE account = ?
"#;

const SELECT_ADDRESS: &str = r#"
    SELECT address, failed_count, blocked, blocked_at, blocked_until, last_failure_at
    FROM address_attempts
    WHERE address = ?
"#;

async fn fetch_account(
    conn: &mut SqliteConnection,
    account: &AccountId,
) -> Result<AccountCounter, Error> {
    let row = sqlx::query_as::<_, SqliteAccountCounter>(SELECT_ACCOUNT)
        .bind(account.as_str())
        .fetch_optional(conn)
        .await
        .map_err(storage_error("Failed to get account counter"))?;

    match row {
        Some(row) => row.try_into(),
        None => Ok(AccountCounter::new(account.clone())),
    }
}

async fn fetch_address(
    conn: &mut SqliteConnection,
    address: IpAddr,
) -> Result<AddressCounter, Error> {
    let row = sqlx::query_as::<_, SqliteAddressCounter>(SELECT_ADDRESS)
        .bind(address.to_string())
        .fetch_optional(conn)
        .await
        .map_err(storage_error("Failed to get address counter"))?;

    match row {
        Some(row) => row.try_into(),
        None => Ok(AddressCounter::new(address)),
    }
}

async fn upsert_account(conn: &mut SqliteConnection, counter: &AccountCounter) -> Result<(), Error> {
    sqlx::query(
        r#"
        INSERT INTO account_attempts (account, failed_count, locked_until, last_failure_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(account) DO UPDATE SET
            failed_count = excluded.failed_count,
            locked_until = excluded.locked_until,
            last_failure_at = excluded.last_failure_at
        "#,
    )
    .bind(counter.account.as_str())
    .bind(i64::from(counter.failed_count))
    .bind(counter.locked_until.map(millis))
    .bind(counter.last_failure_at.map(millis))
    .execute(conn)
    .await
    .map_err(storage_error("Failed to store account counter"))?;

    Ok(())
}

async fn upsert_address(conn: &mut SqliteConnection, counter: &AddressCounter) -> Result<(), Error> {
    sqlx::query(
        r#"
        INSERT INTO address_attempts
            (address, failed_count, blocked, blocked_at, blocked_until, last_failure_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(address) DO UPDATE SET
            failed_count = excluded.failed_count,
            blocked = excluded.blocked,
            blocked_at = excluded.blocked_at,
            blocked_until = excluded.blocked_until,
            last_failure_at = excluded.last_failure_at
        "#,
    )
    .bind(counter.address.to_string())
    .bind(i64::from(counter.failed_count))
    .bind(counter.blocked)
    .bind(counter.blocked_at.map(millis))
    .bind(counter.blocked_until.map(millis))
    .bind(counter.last_failure_at.map(millis))
    .execute(conn)
    .await
    .map_err(storage_error("Failed to store address counter"))?;

    Ok(())
}

#[async_trait]
impl AttemptStore for SqliteAttemptStore {
    async fn get_account(&self, account: &AccountId) -> Result<AccountCounter, Error> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(storage_error("Failed to acquire connection"))?;
        fetch_account(&mut conn, account).await
    }

    async fn get_address(&self, address: IpAddr) -> Result<AddressCounter, Error> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(storage_error("Failed to acquire connection"))?;
        fetch_address(&mut conn, address).await
    }

    async fn record_failure(
        &self,
        account: &AccountId,
        address: IpAddr,
        now: DateTime<Utc>,
        policy: &LockoutPolicy,
    ) -> Result<FailureOutcome, Error> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(storage_error("Failed to begin transaction"))?;

        // Write first so the transaction holds the write lock before it reads.
        // Concurrent failures then queue on the busy timeout instead of
        // reading the same count.
        sqlx::query("INSERT INTO account_attempts (account) VALUES (?) ON CONFLICT(account) DO NOTHING")
            .bind(account.as_str())
            .execute(&mut *tx)
            .await
            .map_err(storage_error("Failed to record failed login attempt"))?;

        let mut account_counter = fetch_account(&mut tx, account).await?;
        let account_locked = account_counter.apply_failure(now, policy);
        upsert_account(&mut tx, &account_counter).await?;

        let mut address_counter = fetch_address(&mut tx, address).await?;
        let address_blocked = address_counter.apply_failure(now, policy);
        upsert_address(&mut tx, &address_counter).await?;

        tx.commit()
            .await
            .map_err(storage_error("Failed to commit failed login attempt"))?;

        Ok(FailureOutcome {
            account: account_counter,
            address: address_counter,
            account_locked,
            address_blocked,
        })
    }

    async fn record_success(
        &self,
        account: &AccountId,
        _now: DateTime<Utc>,
    ) -> Result<AccountCounter, Error> {
        let row = sqlx::query_as::<_, SqliteAccountCounter>(
            r#"
            UPDATE account_attempts
            SET failed_count = 0, locked_until = NULL
            WHERE account = ?
            RETURNING account, failed_count, locked_until, last_failure_at
            "#,
        )
        .bind(account.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error("Failed to reset account after success"))?;

        match row {
            Some(row) => row.try_into(),
            None => Ok(AccountCounter::new(account.clone())),
        }
    }

    async fn set_account_lock(
        &self,
        account: &AccountId,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), Error> {
        let query = match until {
            Some(until) => sqlx::query(
                r#"
                INSERT INTO account_attempts (account, locked_until) VALUES (?, ?)
                ON CONFLICT(account) DO UPDATE SET locked_until = excluded.locked_until
                "#,
            )
            .bind(account.as_str())
            .bind(millis(until)),
            None => sqlx::query(
                "UPDATE account_attempts SET failed_count = 0, locked_until = NULL WHERE account = ?",
            )
            .bind(account.as_str()),
        };

        query
            .execute(&self.pool)
            .await
            .map_err(storage_error("Failed to set account lock"))?;

        Ok(())
    }

    async fn set_address_blocked(
        &self,
        address: IpAddr,
        blocked: bool,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        let query = if blocked {
            sqlx::query(
                r#"
                INSERT INTO address_attempts (address, blocked, blocked_at, blocked_until)
                VALUES (?, 1, ?, NULL)
                ON CONFLICT(address) DO UPDATE SET
                    blocked = 1,
                    blocked_at = excluded.blocked_at,
                    blocked_until = NULL
                "#,
            )
            .bind(address.to_string())
            .bind(millis(now))
        } else {
            sqlx::query(
                r#"
                UPDATE address_attempts
                SET failed_count = 0, blocked = 0, blocked_at = NULL, blocked_until = NULL
                WHERE address = ?
                "#,
            )
            .bind(address.to_string())
        };

        query
            .execute(&self.pool)
            .await
            .map_err(storage_error("Failed to set address block"))?;

        Ok(())
    }

    async fn clear_expired_account_lock(
        &self,
        account: &AccountId,
        now: DateTime<Utc>,
    ) -> Result<bool, Error> {
        let result = sqlx::query(
            r#"
            UPDATE account_attempts
            SET failed_count = 0, locked_until = NULL
            WHERE account = ? AND locked_until IS NOT NULL AND locked_until <= ?
            "#,
        )
        .bind(account.as_str())
        .bind(millis(now))
        .execute(&self.pool)
        .await
        .map_err(storage_error("Failed to clear expired account lock"))?;

        Ok(result.rows_affected() > 0)
    }

    async fn clear_expired_address_block(
        &self,
        address: IpAddr,
        now: DateTime<Utc>,
    ) -> Result<bool, Error> {
        let result = sqlx::query(
            r#"
            UPDATE address_attempts
            SET failed_count = 0, blocked = 0, blocked_at = NULL, blocked_until = NULL
            WHERE address = ?
              AND blocked = 1
              AND blocked_until IS NOT NULL
              AND blocked_until <= ?
            "#,
        )
        .bind(address.to_string())
        .bind(millis(now))
        .execute(&self.pool)
        .await
        .map_err(storage_error("Failed to clear expired address block"))?;

        Ok(result.rows_affected() > 0)
    }

    async fn reset_account(&self, account: &AccountId) -> Result<AccountCounter, Error> {
        let row = sqlx::query_as::<_, SqliteAccountCounter>(
            r#"
            DELETE FROM account_attempts
            WHERE account = ?
            RETURNING account, failed_count, locked_until, last_failure_at
            "#,
        )
        .bind(account.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error("Failed to reset account"))?;

        match row {
            Some(row) => row.try_into(),
            None => Ok(AccountCounter::new(account.clone())),
        }
    }

    async fn reset_address(&self, address: IpAddr) -> Result<AddressCounter, Error> {
        let row = sqlx::query_as::<_, SqliteAddressCounter>(
            r#"
            DELETE FROM address_attempts
            WHERE address = ?
            RETURNING address, failed_count, blocked, blocked_at, blocked_until, last_failure_at
            "#,
        )
        .bind(address.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error("Failed to reset address"))?;

        match row {
            Some(row) => row.try_into(),
            None => Ok(AddressCounter::new(address)),
        }
    }

    async fn evict_idle(&self, before: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64, Error> {
        let accounts = sqlx::query(
            r#"
            DELETE FROM account_attempts
            WHERE (locked_until IS NULL OR locked_until <= ?)
              AND (last_failure_at IS NULL OR last_failure_at < ?)
            "#,
        )
        .bind(millis(now))
        .bind(millis(before))
        .execute(&self.pool)
        .await
        .map_err(storage_error("Failed to evict idle account counters"))?;

        // Blocked addresses stay until reset, whatever their age
        let addresses = sqlx::query(
            r#"
            DELETE FROM address_attempts
            WHERE NOT (blocked = 1 AND (blocked_until IS NULL OR blocked_until > ?))
              AND (last_failure_at IS NULL OR last_failure_at < ?)
            "#,
        )
        .bind(millis(now))
        .bind(millis(before))
        .execute(&self.pool)
        .await
        .map_err(storage_error("Failed to evict idle address counters"))?;

        Ok(accounts.rows_affected() + addresses.rows_affected())
    }

    async fn health_check(&self) -> Result<(), Error> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_unavailable("SQLite health check failed")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use portcullis_core::ProtectionConfig;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn alice() -> AccountId {
        AccountId::parse("alice@example.com").unwrap()
    }

    fn addr(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    async fn setup_test_store() -> SqliteAttemptStore {
        let _ = tracing_subscriber::fmt().try_init();

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create pool");
        let store = SqliteAttemptStore::new(pool);
        store.migrate().await.expect("Failed to run migrations");
        store
    }

    #[tokio::test]
    async fn test_unknown_keys_read_as_zero() {
        let store = setup_test_store().await;

        let account = store.get_account(&alice()).await.unwrap();
        assert_eq!(account, AccountCounter::new(alice()));

        let address = store.get_address(addr("10.0.0.1")).await.unwrap();
        assert_eq!(address, AddressCounter::new(addr("10.0.0.1")));
    }

    #[tokio::test]
    async fn test_record_failure_locks_at_threshold() {
        let store = setup_test_store().await;
        let policy = LockoutPolicy::default();

        for i in 1..=4 {
            let outcome = store
                .record_failure(&alice(), addr("10.0.0.1"), t0(), &policy)
                .await
                .unwrap();
            assert_eq!(outcome.account.failed_count, i);
            assert!(!outcome.account_locked);
        }

        let outcome = store
            .record_failure(&alice(), addr("10.0.0.1"), t0(), &policy)
            .await
            .unwrap();
        assert!(outcome.account_locked);
        assert_eq!(outcome.account.locked_until, Some(t0() + Duration::minutes(15)));

        let stored = store.get_account(&alice()).await.unwrap();
        assert_eq!(stored, outcome.account);

        let address = store.get_address(addr("10.0.0.1")).await.unwrap();
        assert_eq!(address.failed_count, 5);
        assert_eq!(address.last_failure_at, Some(t0()));
    }

    #[tokio::test]
    async fn test_address_block_persists_with_timestamps() {
        let store = setup_test_store().await;
        let policy = LockoutPolicy::from(&ProtectionConfig::default().with_address_threshold(2));

        store
            .record_failure(&alice(), addr("203.0.113.5"), t0(), &policy)
            .await
            .unwrap();
        let outcome = store
            .record_failure(&alice(), addr("203.0.113.5"), t0(), &policy)
            .await
            .unwrap();
        assert!(outcome.address_blocked);

        let address = store.get_address(addr("203.0.113.5")).await.unwrap();
        assert!(address.blocked);
        assert_eq!(address.blocked_at, Some(t0()));
        assert_eq!(address.blocked_until, None);
        assert!(address.is_blocked_at(t0() + Duration::days(365)));
    }

    #[tokio::test]
    async fn test_ipv6_addresses_round_trip() {
        let store = setup_test_store().await;
        let policy = LockoutPolicy::default();
        let v6 = addr("2001:db8::1");

        store
            .record_failure(&alice(), v6, t0(), &policy)
            .await
            .unwrap();
        assert_eq!(store.get_address(v6).await.unwrap().failed_count, 1);
    }

    #[tokio::test]
    async fn test_record_success_resets_account_only() {
        let store = setup_test_store().await;
        let policy = LockoutPolicy::default();

        for _ in 0..3 {
            store
                .record_failure(&alice(), addr("10.0.0.1"), t0(), &policy)
                .await
                .unwrap();
        }

        let counter = store.record_success(&alice(), t0()).await.unwrap();
        assert_eq!(counter.failed_count, 0);
        assert_eq!(counter.last_failure_at, Some(t0()));

        let address = store.get_address(addr("10.0.0.1")).await.unwrap();
        assert_eq!(address.failed_count, 3);

        // Unknown accounts are not inserted
        let bob = AccountId::parse("bob@example.com").unwrap();
        store.record_success(&bob, t0()).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM account_attempts")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_clear_expired_account_lock_is_compare_and_reset() {
        let store = setup_test_store().await;
        let policy = LockoutPolicy::default();

        for _ in 0..5 {
            store
                .record_failure(&alice(), addr("10.0.0.1"), t0(), &policy)
                .await
                .unwrap();
        }

        let before_expiry = t0() + Duration::minutes(14);
        assert!(!store.clear_expired_account_lock(&alice(), before_expiry).await.unwrap());
        assert!(store.get_account(&alice()).await.unwrap().is_locked_at(before_expiry));

        let after_expiry = t0() + Duration::minutes(15);
        assert!(store.clear_expired_account_lock(&alice(), after_expiry).await.unwrap());
        assert!(!store.clear_expired_account_lock(&alice(), after_expiry).await.unwrap());

        let counter = store.get_account(&alice()).await.unwrap();
        assert_eq!(counter.failed_count, 0);
        assert_eq!(counter.locked_until, None);
    }

    #[tokio::test]
    async fn test_clear_expired_address_block_requires_duration() {
        let store = setup_test_store().await;
        let permanent = LockoutPolicy::from(&ProtectionConfig::default().with_address_threshold(1));

        store
            .record_failure(&alice(), addr("10.0.0.1"), t0(), &permanent)
            .await
            .unwrap();
        assert!(
            !store
                .clear_expired_address_block(addr("10.0.0.1"), t0() + Duration::days(30))
                .await
                .unwrap()
        );

        let timed = LockoutPolicy::from(
            &ProtectionConfig::default()
                .with_address_threshold(1)
                .with_address_block_duration(Some(Duration::minutes(5))),
        );
        store
            .record_failure(&alice(), addr("10.0.0.2"), t0(), &timed)
            .await
            .unwrap();
        assert!(
            store
                .clear_expired_address_block(addr("10.0.0.2"), t0() + Duration::minutes(5))
                .await
                .unwrap()
        );
        assert!(!store.get_address(addr("10.0.0.2")).await.unwrap().blocked);
    }

    #[tokio::test]
    async fn test_admin_lock_block_and_reset() {
        let store = setup_test_store().await;
        let until = t0() + Duration::hours(1);

        store.set_account_lock(&alice(), Some(until)).await.unwrap();
        assert_eq!(store.get_account(&alice()).await.unwrap().locked_until, Some(until));

        let previous = store.reset_account(&alice()).await.unwrap();
        assert!(previous.is_locked_at(t0()));
        assert_eq!(store.get_account(&alice()).await.unwrap().locked_until, None);

        store
            .set_address_blocked(addr("10.0.0.1"), true, t0())
            .await
            .unwrap();
        assert!(store.get_address(addr("10.0.0.1")).await.unwrap().is_blocked_at(t0()));

        store
            .set_address_blocked(addr("10.0.0.1"), false, t0())
            .await
            .unwrap();
        assert!(!store.get_address(addr("10.0.0.1")).await.unwrap().blocked);

        let previous = store.reset_address(addr("10.0.0.9")).await.unwrap();
        assert_eq!(previous, AddressCounter::new(addr("10.0.0.9")));
    }

    #[tokio::test]
    async fn test_evict_idle_keeps_locked_and_blocked() {
        let store = setup_test_store().await;
        let policy = LockoutPolicy::from(&ProtectionConfig::default().with_address_threshold(5));

        // Locked account and blocked address
        for _ in 0..5 {
            store
                .record_failure(&alice(), addr("10.0.0.1"), t0(), &policy)
                .await
                .unwrap();
        }
        // Idle account and address
        let bob = AccountId::parse("bob@example.com").unwrap();
        store
            .record_failure(&bob, addr("10.0.0.2"), t0(), &policy)
            .await
            .unwrap();

        let now = t0() + Duration::minutes(10);
        let removed = store.evict_idle(now, now).await.unwrap();
        assert_eq!(removed, 2);

        assert_eq!(store.get_account(&alice()).await.unwrap().failed_count, 5);
        assert!(store.get_address(addr("10.0.0.1")).await.unwrap().blocked);
        assert_eq!(store.get_account(&bob).await.unwrap().failed_count, 0);

        // Once the lock has lapsed the account becomes evictable
        let later = t0() + Duration::hours(1);
        assert_eq!(store.evict_idle(later, later).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_health_check() {
        let store = setup_test_store().await;
        store.health_check().await.unwrap();

        store.pool().close().await;
        let err = store.health_check().await.unwrap_err();
        assert!(err.is_storage_error());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failures_on_file_database() {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let path = std::env::temp_dir().join(format!(
            "portcullis-test-{}-{nanos}.db",
            std::process::id()
        ));
        let url = format!("sqlite://{}", path.display());

        let store = Arc::new(SqliteAttemptStore::connect(&url).await.unwrap());
        store.migrate().await.unwrap();
        let policy = LockoutPolicy::default();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .record_failure(&alice(), addr("10.0.0.1"), t0(), &policy)
                    .await
                    .unwrap()
            }));
        }

        let mut locks = 0;
        for handle in handles {
            if handle.await.unwrap().account_locked {
                locks += 1;
            }
        }

        assert_eq!(locks, 1);
        assert_eq!(store.get_account(&alice()).await.unwrap().failed_count, 32);
        assert_eq!(store.get_address(addr("10.0.0.1")).await.unwrap().failed_count, 32);

        store.pool().close().await;
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
        }
    }
}
