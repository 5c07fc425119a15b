use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const CODE_PREFIX: &str = "VIP";
pub const CODE_SUFFIX_LEN: usize = 4;
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const COUPON_TTL_DAYS: i64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Coupon {
    pub id: i64,
    pub code: String,
    pub email: Option<String>,
    pub domain: Option<String>,
    pub client: Option<String>,
    pub qr_path: Option<String>,
    pub redeemed: bool,
    pub redeemed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CouponStatus {
    Active,
    Redeemed,
    Expired,
}

impl CouponStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CouponStatus::Active => "active",
            CouponStatus::Redeemed => "redeemed",
            CouponStatus::Expired => "expired",
        }
    }
}

impl Coupon {
    /// Redeemed wins over expired: a coupon used before its expiry stays "redeemed".
    pub fn status(&self, now: DateTime<Utc>) -> CouponStatus {
        if self.redeemed {
            CouponStatus::Redeemed
        } else if self.expires_at < now {
            CouponStatus::Expired
        } else {
            CouponStatus::Active
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewCoupon {
    pub code: String,
    pub email: Option<String>,
    pub domain: Option<String>,
    pub client: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl NewCoupon {
    /// Draws a fresh code and stamps the fixed expiry window.
    pub fn draw<R: Rng + ?Sized>(
        rng: &mut R,
        email: Option<String>,
        domain: Option<String>,
        client: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            code: generate_code(rng),
            email,
            domain: blank_to_none(domain),
            client: blank_to_none(client),
            created_at: now,
            expires_at: now + Duration::days(COUPON_TTL_DAYS),
        }
    }

    pub fn redraw<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.code = generate_code(rng);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CouponCounts {
    pub total: i64,
    pub active: i64,
    pub redeemed: i64,
    pub expired: i64,
}

pub fn generate_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    let mut code = String::with_capacity(CODE_PREFIX.len() + CODE_SUFFIX_LEN);
    code.push_str(CODE_PREFIX);
    for _ in 0..CODE_SUFFIX_LEN {
        let idx = rng.random_range(0..CODE_ALPHABET.len());
        code.push(CODE_ALPHABET[idx] as char);
    }
    code
}

pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_uppercase()
}

pub fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(redeemed: bool, expires_in_days: i64) -> Coupon {
        let now = Utc::now();
        Coupon {
            id: 1,
            code: "VIPAB12".to_string(),
            email: None,
            domain: None,
            client: None,
            qr_path: None,
            redeemed,
            redeemed_at: None,
            created_at: now,
            expires_at: now + Duration::days(expires_in_days),
        }
    }

    #[test]
    fn generated_code_has_prefix_and_alphabet() {
        let mut rng = rand::rng();
        for _ in 0..200 {
            let code = generate_code(&mut rng);
            assert_eq!(code.len(), 7);
            assert!(code.starts_with("VIP"));
            assert!(code[3..].bytes().all(|b| CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn draw_sets_thirty_day_expiry_and_drops_blank_labels() {
        let now = Utc::now();
        let mut rng = rand::rng();
        let c = NewCoupon::draw(&mut rng, None, Some("  ".into()), Some(" acme ".into()), now);
        assert_eq!(c.expires_at - c.created_at, Duration::days(30));
        assert_eq!(c.domain, None);
        assert_eq!(c.client.as_deref(), Some("acme"));
    }

    #[test]
    fn status_prefers_redeemed_over_expired() {
        let now = Utc::now();
        assert_eq!(sample(false, 5).status(now), CouponStatus::Active);
        assert_eq!(sample(false, -1).status(now), CouponStatus::Expired);
        assert_eq!(sample(true, -1).status(now), CouponStatus::Redeemed);
    }

    #[test]
    fn normalize_trims_and_uppercases() {
        assert_eq!(normalize_code("  vipab12 \n"), "VIPAB12");
    }
}
