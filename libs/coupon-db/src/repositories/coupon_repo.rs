use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use thiserror::Error;

use crate::models::coupon::{Coupon, CouponCounts, NewCoupon};

const COUPON_COLUMNS: &str =
    "id, code, email, domain, client, qr_path, redeemed, redeemed_at, created_at, expires_at";

#[derive(Debug, Error)]
pub enum CouponRepoError {
    #[error("coupon code {0} already exists")]
    DuplicateCode(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type RepoResult<T> = Result<T, CouponRepoError>;

#[derive(Debug, Clone)]
pub struct CouponRepository {
    pool: SqlitePool,
}

impl CouponRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, coupon: &NewCoupon) -> RepoResult<Coupon> {
        let sql = format!(
            "INSERT INTO coupons (code, email, domain, client, created_at, expires_at) \
             VALUES (?, ?, ?, ?, ?, ?) RETURNING {COUPON_COLUMNS}"
        );
        sqlx::query_as::<_, Coupon>(&sql)
            .bind(&coupon.code)
            .bind(&coupon.email)
            .bind(&coupon.domain)
            .bind(&coupon.client)
            .bind(coupon.created_at)
            .bind(coupon.expires_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    CouponRepoError::DuplicateCode(coupon.code.clone())
                }
                other => CouponRepoError::Database(other),
            })
    }

    pub async fn find_by_code(&self, code: &str) -> RepoResult<Option<Coupon>> {
        let sql = format!("SELECT {COUPON_COLUMNS} FROM coupons WHERE code = ?");
        let coupon = sqlx::query_as::<_, Coupon>(&sql)
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(coupon)
    }

    /// Flips `redeemed` only if the coupon is still unredeemed and unexpired at `now`.
    /// The check and the write are one statement, so two callers can never both win.
    pub async fn mark_redeemed(&self, code: &str, now: DateTime<Utc>) -> RepoResult<bool> {
        let result = sqlx::query(
            "UPDATE coupons SET redeemed = 1, redeemed_at = ? \
             WHERE code = ? AND redeemed = 0 AND expires_at > ?",
        )
        .bind(now)
        .bind(code)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn set_qr_path(&self, id: i64, qr_path: &str) -> RepoResult<()> {
        sqlx::query("UPDATE coupons SET qr_path = ? WHERE id = ?")
            .bind(qr_path)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list(&self, client: Option<&str>) -> RepoResult<Vec<Coupon>> {
        let sql = format!(
            "SELECT {COUPON_COLUMNS} FROM coupons \
             WHERE (? IS NULL OR client = ?) \
             ORDER BY created_at DESC, id DESC"
        );
        let coupons = sqlx::query_as::<_, Coupon>(&sql)
            .bind(client)
            .bind(client)
            .fetch_all(&self.pool)
            .await?;
        Ok(coupons)
    }

    pub async fn list_clients(&self) -> RepoResult<Vec<String>> {
        let clients: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT client FROM coupons WHERE client IS NOT NULL ORDER BY client",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(clients)
    }

    pub async fn delete_by_code(&self, code: &str) -> RepoResult<bool> {
        let result = sqlx::query("DELETE FROM coupons WHERE code = ?")
            .bind(code)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count_by_status(
        &self,
        client: Option<&str>,
        now: DateTime<Utc>,
    ) -> RepoResult<CouponCounts> {
        let (total, redeemed, expired): (i64, i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), \
                    COALESCE(SUM(CASE WHEN redeemed = 1 THEN 1 ELSE 0 END), 0), \
                    COALESCE(SUM(CASE WHEN redeemed = 0 AND expires_at < ? THEN 1 ELSE 0 END), 0) \
             FROM coupons WHERE (? IS NULL OR client = ?)",
        )
        .bind(now)
        .bind(client)
        .bind(client)
        .fetch_one(&self.pool)
        .await?;

        Ok(CouponCounts {
            total,
            active: total - redeemed - expired,
            redeemed,
            expired,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_db;
    use chrono::Duration;

    fn new_coupon(code: &str, client: Option<&str>, now: DateTime<Utc>) -> NewCoupon {
        NewCoupon {
            code: code.to_string(),
            email: None,
            domain: None,
            client: client.map(str::to_string),
            created_at: now,
            expires_at: now + Duration::days(30),
        }
    }

    async fn repo() -> CouponRepository {
        CouponRepository::new(init_memory_db().await.unwrap())
    }

    #[tokio::test]
    async fn insert_and_find_round_trip() {
        let repo = repo().await;
        let now = Utc::now();
        let mut c = new_coupon("VIPAAAA", Some("acme"), now);
        c.email = Some("a@example.com".into());
        let stored = repo.insert(&c).await.unwrap();
        assert!(!stored.redeemed);
        assert_eq!(stored.redeemed_at, None);

        let found = repo.find_by_code("VIPAAAA").await.unwrap().unwrap();
        assert_eq!(found.id, stored.id);
        assert_eq!(found.email.as_deref(), Some("a@example.com"));
        assert_eq!(found.client.as_deref(), Some("acme"));
        assert_eq!(found.expires_at - found.created_at, Duration::days(30));
        assert!(repo.find_by_code("VIPZZZZ").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_code_is_reported() {
        let repo = repo().await;
        let now = Utc::now();
        repo.insert(&new_coupon("VIPDUP1", None, now)).await.unwrap();
        let err = repo.insert(&new_coupon("VIPDUP1", None, now)).await.unwrap_err();
        assert!(matches!(err, CouponRepoError::DuplicateCode(code) if code == "VIPDUP1"));
    }

    #[tokio::test]
    async fn mark_redeemed_only_succeeds_once() {
        let repo = repo().await;
        let now = Utc::now();
        repo.insert(&new_coupon("VIPONCE", None, now)).await.unwrap();

        assert!(repo.mark_redeemed("VIPONCE", now).await.unwrap());
        assert!(!repo.mark_redeemed("VIPONCE", now).await.unwrap());

        let c = repo.find_by_code("VIPONCE").await.unwrap().unwrap();
        assert!(c.redeemed);
        assert!(c.redeemed_at.is_some());
    }

    #[tokio::test]
    async fn mark_redeemed_refuses_expired() {
        let repo = repo().await;
        let past = Utc::now() - Duration::days(40);
        repo.insert(&new_coupon("VIPOLD1", None, past)).await.unwrap();
        assert!(!repo.mark_redeemed("VIPOLD1", Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn list_filters_by_client_and_counts_statuses() {
        let repo = repo().await;
        let now = Utc::now();
        repo.insert(&new_coupon("VIPACM1", Some("acme"), now)).await.unwrap();
        repo.insert(&new_coupon("VIPACM2", Some("acme"), now)).await.unwrap();
        repo.insert(&new_coupon("VIPGLB1", Some("globex"), now)).await.unwrap();
        repo.insert(&new_coupon("VIPOLD2", Some("acme"), now - Duration::days(31)))
            .await
            .unwrap();
        repo.mark_redeemed("VIPACM1", now).await.unwrap();

        assert_eq!(repo.list(None).await.unwrap().len(), 4);
        let acme = repo.list(Some("acme")).await.unwrap();
        assert_eq!(acme.len(), 3);
        assert!(acme.iter().all(|c| c.client.as_deref() == Some("acme")));

        assert_eq!(repo.list_clients().await.unwrap(), vec!["acme", "globex"]);

        let counts = repo.count_by_status(Some("acme"), now).await.unwrap();
        assert_eq!(
            counts,
            CouponCounts { total: 3, active: 1, redeemed: 1, expired: 1 }
        );
    }

    #[tokio::test]
    async fn delete_removes_row() {
        let repo = repo().await;
        repo.insert(&new_coupon("VIPDEL1", None, Utc::now())).await.unwrap();
        assert!(repo.delete_by_code("VIPDEL1").await.unwrap());
        assert!(!repo.delete_by_code("VIPDEL1").await.unwrap());
        assert!(repo.find_by_code("VIPDEL1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn qr_path_is_persisted() {
        let repo = repo().await;
        let c = repo.insert(&new_coupon("VIPQR01", None, Utc::now())).await.unwrap();
        repo.set_qr_path(c.id, "qr/VIPQR01.png").await.unwrap();
        let c = repo.find_by_code("VIPQR01").await.unwrap().unwrap();
        assert_eq!(c.qr_path.as_deref(), Some("qr/VIPQR01.png"));
    }
}
