use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::info;

use coupon_db::models::coupon::Coupon;

use super::coupon_service::IssuedCoupon;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const BATCH_CSV_HEADER: [&str; 5] = ["email", "code", "qr", "created_at", "expires_at"];
pub const HISTORY_CSV_HEADER: [&str; 9] = [
    "code",
    "email",
    "domain",
    "client",
    "redeemed",
    "redeemed_at",
    "created_at",
    "expires_at",
    "qr",
];

pub fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Writes CSV artifacts for generated batches and history downloads.
#[derive(Debug, Clone)]
pub struct ExportService {
    export_dir: PathBuf,
}

impl ExportService {
    pub fn new(export_dir: PathBuf) -> Self {
        Self { export_dir }
    }

    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    pub fn batch_csv(&self, coupons: &[IssuedCoupon]) -> Result<Vec<u8>> {
        let mut wtr = csv::Writer::from_writer(Vec::new());
        wtr.write_record(BATCH_CSV_HEADER)?;
        for issued in coupons {
            let c = &issued.coupon;
            wtr.write_record([
                c.email.clone().unwrap_or_default(),
                c.code.clone(),
                issued.qr.csv_value(),
                format_ts(&c.created_at),
                format_ts(&c.expires_at),
            ])?;
        }
        wtr.into_inner()
            .map_err(|e| anyhow::anyhow!("Failed to flush batch CSV: {}", e))
    }

    /// Saves the batch CSV under the export directory and returns its file name.
    pub async fn write_batch_csv(
        &self,
        coupons: &[IssuedCoupon],
        label: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let data = self.batch_csv(coupons)?;
        let file_name = format!(
            "coupons_{}_{}.csv",
            sanitize_label(label.unwrap_or("batch")),
            now.format("%Y%m%d_%H%M%S_%3f")
        );

        tokio::fs::create_dir_all(&self.export_dir)
            .await
            .with_context(|| format!("Failed to create export directory {}", self.export_dir.display()))?;
        let path = self.export_dir.join(&file_name);
        tokio::fs::write(&path, data)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        info!("Batch CSV with {} coupons written to {}", coupons.len(), path.display());
        Ok(file_name)
    }

    pub fn history_csv(&self, coupons: &[Coupon]) -> Result<Vec<u8>> {
        let mut wtr = csv::Writer::from_writer(Vec::new());
        wtr.write_record(HISTORY_CSV_HEADER)?;
        for c in coupons {
            wtr.write_record([
                c.code.clone(),
                c.email.clone().unwrap_or_default(),
                c.domain.clone().unwrap_or_default(),
                c.client.clone().unwrap_or_default(),
                c.redeemed.to_string(),
                c.redeemed_at.as_ref().map(format_ts).unwrap_or_default(),
                format_ts(&c.created_at),
                format_ts(&c.expires_at),
                c.qr_path.as_ref().map(|f| format!("/qr/{}", f)).unwrap_or_default(),
            ])?;
        }
        wtr.into_inner()
            .map_err(|e| anyhow::anyhow!("Failed to flush history CSV: {}", e))
    }
}

fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .take(40)
        .collect();
    if cleaned.is_empty() { "batch".to_string() } else { cleaned }
}
