use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use sqlx::mysql::MySqlPool;
use tokio::sync::watch;

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Reaps operation-lock rows whose owner died mid-flight: any row older than
/// the configured operation timeout is fair game. Runs until the shutdown
/// signal flips.
pub struct PurgeService {
    pool: MySqlPool,
    operation_timeout: Duration,
}

impl PurgeService {
    pub fn new(pool: MySqlPool, operation_timeout: Duration) -> PurgeService {
        PurgeService {
            pool,
            operation_timeout,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(PURGE_INTERVAL);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.purge_operation_locks().await {
                        Ok(0) => {}
                        Ok(purged) => info!("purged {purged} expired operation lock(s)"),
                        Err(err) => error!("purge operation locks failed: {err}"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("purge task stopped");
                    break;
                }
            }
        }
    }

    pub async fn purge_operation_locks(&self) -> Result<u64, sqlx::Error> {
        let cutoff = expiry_cutoff(Utc::now().naive_utc(), self.operation_timeout);

        let result = sqlx::query("DELETE FROM t_mysql_operation_lock WHERE last_update_time < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

fn expiry_cutoff(now: NaiveDateTime, operation_timeout: Duration) -> NaiveDateTime {
    now - chrono::Duration::from_std(operation_timeout).unwrap_or(chrono::Duration::zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_expiry_cutoff_subtracts_timeout() {
        let now = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 2, 0)
            .unwrap();

        let cutoff = expiry_cutoff(now, Duration::from_secs(60));
        assert_eq!(cutoff, now - chrono::Duration::seconds(60));

        // a lock updated 120s ago is older than the 60s cutoff and purged
        let lock_time = now - chrono::Duration::seconds(120);
        assert!(lock_time < cutoff);

        // a fresh lock survives
        let lock_time = now - chrono::Duration::seconds(30);
        assert!(lock_time > cutoff);
    }
}
