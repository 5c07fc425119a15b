use anyhow::{Context, Result};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::services::qr_service::QrMode;

pub const DEFAULT_MAX_BATCH: usize = 1000;

/// Runtime configuration, read from the environment after `.env` has been loaded.
#[derive(Debug, Clone)]
pub struct PanelConfig {
    pub database_url: String,
    pub bind_addr: IpAddr,
    pub port: u16,
    pub qr_dir: PathBuf,
    pub export_dir: PathBuf,
    pub qr_mode: QrMode,
    pub public_base_url: Option<String>,
    pub max_batch: usize,
}

impl PanelConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port = match var("PANEL_PORT") {
            Some(p) => p.parse().context("PANEL_PORT must be a number")?,
            None => 3000,
        };
        let bind_addr = match var("BIND_ADDR") {
            Some(a) => a.parse().context("BIND_ADDR must be an IP address")?,
            None => IpAddr::from([0, 0, 0, 0]),
        };
        let max_batch = match var("MAX_BATCH") {
            Some(n) => n.parse().context("MAX_BATCH must be a number")?,
            None => DEFAULT_MAX_BATCH,
        };
        let qr_mode = match var("QR_MODE") {
            Some(m) => m.parse()?,
            None => QrMode::File,
        };

        Ok(Self {
            database_url: var("DATABASE_URL").unwrap_or_else(|| "sqlite://coupons.db".to_string()),
            bind_addr,
            port,
            qr_dir: var("QR_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("static/qr")),
            export_dir: var("EXPORT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("exports")),
            qr_mode,
            public_base_url: var("PUBLIC_BASE_URL").map(|u| u.trim_end_matches('/').to_string()),
            max_batch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = PanelConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.database_url, "sqlite://coupons.db");
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.qr_mode, QrMode::File);
        assert_eq!(cfg.max_batch, DEFAULT_MAX_BATCH);
        assert_eq!(cfg.public_base_url, None);
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = PanelConfig::from_lookup(lookup(&[
            ("PANEL_PORT", "8088"),
            ("QR_MODE", "inline"),
            ("PUBLIC_BASE_URL", "https://shop.example.com/"),
            ("MAX_BATCH", "50"),
        ]))
        .unwrap();
        assert_eq!(cfg.port, 8088);
        assert_eq!(cfg.qr_mode, QrMode::Inline);
        assert_eq!(cfg.public_base_url.as_deref(), Some("https://shop.example.com"));
        assert_eq!(cfg.max_batch, 50);
    }

    #[test]
    fn bad_port_is_an_error() {
        let err = PanelConfig::from_lookup(lookup(&[("PANEL_PORT", "http")])).unwrap_err();
        assert!(err.to_string().contains("PANEL_PORT"));
    }
}
