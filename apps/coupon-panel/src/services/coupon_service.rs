use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use coupon_db::models::coupon::{Coupon, CouponCounts, NewCoupon, blank_to_none, normalize_code};
use coupon_db::repositories::coupon_repo::{CouponRepoError, CouponRepository};

use super::export_service::ExportService;
use super::qr_service::{QrMode, QrRef, QrService};

/// Fresh draws per coupon before giving up on a unique code.
pub const MAX_CODE_ATTEMPTS: usize = 10;

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("Provide either a CSV file of emails or a number of coupons")]
    MissingInput,
    #[error("Count must be a whole number between 1 and {max}, got '{value}'")]
    InvalidCount { value: String, max: usize },
    #[error("Malformed CSV: {0}")]
    MalformedCsv(String),
    #[error("Invalid email on line {line}: '{value}'")]
    InvalidEmail { line: u64, value: String },
    #[error("{0}")]
    InvalidQrMode(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl GenerateError {
    /// Bad input from the caller, as opposed to a storage or I/O failure.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, GenerateError::Internal(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CouponSource {
    Count(usize),
    Emails(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub source: CouponSource,
    pub client: Option<String>,
    pub domain: Option<String>,
    pub qr_mode: Option<QrMode>,
}

impl GenerateRequest {
    /// Builds a request from raw form values. A non-empty file wins over `count`.
    pub fn from_inputs(
        count: Option<&str>,
        file: Option<&[u8]>,
        client: Option<String>,
        domain: Option<String>,
        qr_mode: Option<&str>,
        max_batch: usize,
    ) -> Result<Self, GenerateError> {
        let source = match (file.filter(|f| !f.is_empty()), count.map(str::trim).filter(|c| !c.is_empty())) {
            (Some(bytes), _) => {
                let emails = parse_email_csv(bytes)?;
                if emails.len() > max_batch {
                    return Err(GenerateError::InvalidCount {
                        value: emails.len().to_string(),
                        max: max_batch,
                    });
                }
                CouponSource::Emails(emails)
            }
            (None, Some(raw)) => CouponSource::Count(parse_count(raw, max_batch)?),
            (None, None) => return Err(GenerateError::MissingInput),
        };

        let qr_mode = match qr_mode.map(str::trim).filter(|m| !m.is_empty()) {
            Some(m) => Some(m.parse::<QrMode>().map_err(|e: anyhow::Error| GenerateError::InvalidQrMode(e.to_string()))?),
            None => None,
        };

        Ok(Self {
            source,
            client: blank_to_none(client),
            domain: blank_to_none(domain),
            qr_mode,
        })
    }
}

pub fn parse_count(raw: &str, max_batch: usize) -> Result<usize, GenerateError> {
    match raw.trim().parse::<usize>() {
        Ok(n) if n >= 1 && n <= max_batch => Ok(n),
        _ => Err(GenerateError::InvalidCount { value: raw.trim().to_string(), max: max_batch }),
    }
}

/// Reads emails from the first column. A leading `email` header and blank rows are skipped.
pub fn parse_email_csv(bytes: &[u8]) -> Result<Vec<String>, GenerateError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let mut emails = Vec::new();
    let mut seen_row = false;
    for (idx, record) in rdr.records().enumerate() {
        let record = record.map_err(|e| GenerateError::MalformedCsv(e.to_string()))?;
        let line = record.position().map(|p| p.line()).unwrap_or(idx as u64 + 1);
        let first = record.get(0).unwrap_or("").trim();

        if first.is_empty() {
            continue;
        }
        // The header, if any, is the first row with content.
        let is_first_row = !seen_row;
        seen_row = true;
        if is_first_row && first.eq_ignore_ascii_case("email") {
            continue;
        }
        if !first.contains('@') {
            return Err(GenerateError::InvalidEmail { line, value: first.to_string() });
        }
        emails.push(first.to_string());
    }

    if emails.is_empty() {
        return Err(GenerateError::MalformedCsv("no email addresses found".to_string()));
    }
    Ok(emails)
}

#[derive(Debug, Clone)]
pub struct IssuedCoupon {
    pub coupon: Coupon,
    pub qr: QrRef,
}

#[derive(Debug, Clone)]
pub struct GeneratedBatch {
    pub coupons: Vec<IssuedCoupon>,
    pub csv_file: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedeemOutcome {
    NotFound,
    AlreadyRedeemed,
    Expired,
    /// Looked up without redeeming; still usable.
    Valid,
    Redeemed,
}

impl RedeemOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            RedeemOutcome::NotFound => "Coupon code not found.",
            RedeemOutcome::AlreadyRedeemed => "This coupon has already been redeemed.",
            RedeemOutcome::Expired => "This coupon has expired.",
            RedeemOutcome::Valid => "This coupon is valid and can be redeemed.",
            RedeemOutcome::Redeemed => "This coupon is valid and now redeemed!",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RedeemOutcome::Valid | RedeemOutcome::Redeemed)
    }
}

#[derive(Debug, Clone)]
pub struct History {
    pub coupons: Vec<Coupon>,
    pub counts: CouponCounts,
    pub clients: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CouponService {
    repo: CouponRepository,
    qr: Arc<QrService>,
    export: Arc<ExportService>,
    default_qr_mode: QrMode,
    max_batch: usize,
}

impl CouponService {
    pub fn new(
        repo: CouponRepository,
        qr: Arc<QrService>,
        export: Arc<ExportService>,
        default_qr_mode: QrMode,
        max_batch: usize,
    ) -> Self {
        Self { repo, qr, export, default_qr_mode, max_batch }
    }

    pub fn max_batch(&self) -> usize {
        self.max_batch
    }

    pub fn default_qr_mode(&self) -> QrMode {
        self.default_qr_mode
    }

    pub fn export(&self) -> &ExportService {
        &self.export
    }

    pub async fn generate(&self, req: GenerateRequest) -> Result<GeneratedBatch, GenerateError> {
        let now = Utc::now();
        let mode = req.qr_mode.unwrap_or(self.default_qr_mode);
        let emails: Vec<Option<String>> = match req.source {
            CouponSource::Count(n) => vec![None; n],
            CouponSource::Emails(list) => list.into_iter().map(Some).collect(),
        };

        info!(
            "Generating {} coupons (client={:?}, domain={:?}, qr={})",
            emails.len(),
            req.client,
            req.domain,
            mode.as_str()
        );

        let mut inserted = Vec::with_capacity(emails.len());
        let batch = self
            .issue_batch(emails, req.client.as_deref(), req.domain.as_deref(), mode, now, &mut inserted)
            .await;
        match batch {
            Ok(batch) => Ok(batch),
            Err(e) => {
                warn!(
                    "Batch generation failed after {} coupons were stored, discarding them: {}",
                    inserted.len(),
                    e
                );
                self.discard(&inserted, mode).await;
                Err(e)
            }
        }
    }

    /// Inserts and renders the whole batch. Each code lands in `inserted` as soon as its row exists.
    async fn issue_batch(
        &self,
        emails: Vec<Option<String>>,
        client: Option<&str>,
        domain: Option<&str>,
        mode: QrMode,
        now: DateTime<Utc>,
        inserted: &mut Vec<String>,
    ) -> Result<GeneratedBatch, GenerateError> {
        let mut issued = Vec::with_capacity(emails.len());
        for email in emails {
            let draft = NewCoupon::draw(
                &mut rand::rng(),
                email,
                domain.map(str::to_string),
                client.map(str::to_string),
                now,
            );
            let mut coupon = self.insert_unique(draft).await?;
            inserted.push(coupon.code.clone());

            let qr = self
                .qr
                .issue(&coupon.code, mode)
                .await
                .with_context(|| format!("Failed to render QR for {}", coupon.code))?;
            if let QrRef::File { file_name } = &qr {
                self.repo
                    .set_qr_path(coupon.id, file_name)
                    .await
                    .context("Failed to store QR path")?;
                coupon.qr_path = Some(file_name.clone());
            }

            issued.push(IssuedCoupon { coupon, qr });
        }

        let csv_file = self
            .export
            .write_batch_csv(&issued, client, now)
            .await?;

        Ok(GeneratedBatch { coupons: issued, csv_file })
    }

    async fn discard(&self, codes: &[String], mode: QrMode) {
        for code in codes {
            if let Err(e) = self.repo.delete_by_code(code).await {
                warn!("Could not discard coupon {}: {}", code, e);
            }
            if mode == QrMode::File {
                self.qr.remove_file(&format!("{}.png", code)).await;
            }
        }
    }

    async fn insert_unique(&self, mut draft: NewCoupon) -> Result<Coupon> {
        for attempt in 1..=MAX_CODE_ATTEMPTS {
            match self.repo.insert(&draft).await {
                Ok(coupon) => return Ok(coupon),
                Err(CouponRepoError::DuplicateCode(code)) => {
                    debug!("Code {} already taken (attempt {}), drawing again", code, attempt);
                    draft.redraw(&mut rand::rng());
                }
                Err(e) => return Err(anyhow::Error::new(e).context("Failed to insert coupon")),
            }
        }
        Err(anyhow::anyhow!(
            "Could not draw a unique coupon code after {} attempts",
            MAX_CODE_ATTEMPTS
        ))
    }

    /// Classifies a code without consuming it.
    pub async fn check(&self, code: &str) -> Result<RedeemOutcome> {
        let code = normalize_code(code);
        if code.is_empty() {
            return Ok(RedeemOutcome::NotFound);
        }
        let coupon = self.repo.find_by_code(&code).await.context("Failed to look up coupon")?;
        Ok(match coupon {
            None => RedeemOutcome::NotFound,
            Some(c) if c.redeemed => RedeemOutcome::AlreadyRedeemed,
            Some(c) if c.expires_at < Utc::now() => RedeemOutcome::Expired,
            Some(_) => RedeemOutcome::Valid,
        })
    }

    pub async fn redeem(&self, code: &str) -> Result<RedeemOutcome> {
        let code = normalize_code(code);
        match self.check(&code).await? {
            RedeemOutcome::Valid => {}
            other => {
                debug!("Redemption of {} refused: {:?}", code, other);
                return Ok(other);
            }
        }

        let now = Utc::now();
        if self.repo.mark_redeemed(&code, now).await.context("Failed to redeem coupon")? {
            info!("Coupon {} redeemed", code);
            return Ok(RedeemOutcome::Redeemed);
        }

        // Lost a race with another redemption or crossed the expiry between read and write.
        let outcome = match self.check(&code).await? {
            RedeemOutcome::Valid => RedeemOutcome::AlreadyRedeemed,
            other => other,
        };
        warn!("Coupon {} changed state during redemption: {:?}", code, outcome);
        Ok(outcome)
    }

    pub async fn history(&self, client: Option<&str>) -> Result<History> {
        let client = client.map(str::trim).filter(|c| !c.is_empty());
        let coupons = self.repo.list(client).await.context("Failed to list coupons")?;
        let counts = self
            .repo
            .count_by_status(client, Utc::now())
            .await
            .context("Failed to count coupons")?;
        let clients = self.repo.list_clients().await.context("Failed to list clients")?;
        Ok(History { coupons, counts, clients })
    }

    pub async fn delete(&self, code: &str) -> Result<bool> {
        let code = normalize_code(code);
        let Some(coupon) = self.repo.find_by_code(&code).await.context("Failed to look up coupon")? else {
            return Ok(false);
        };
        let deleted = self.repo.delete_by_code(&code).await.context("Failed to delete coupon")?;
        if deleted {
            info!("Coupon {} deleted", code);
            if let Some(file_name) = coupon.qr_path.as_deref() {
                self.qr.remove_file(file_name).await;
            }
        }
        Ok(deleted)
    }
}
