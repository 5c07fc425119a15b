use anyhow::{Context, Result};
use chrono::Utc;
use std::env;
use std::fs;
use std::path::Path;

use crate::services::coupon_service::{CouponService, GenerateRequest};
use crate::services::export_service::format_ts;

pub async fn generate(
    service: &CouponService,
    count: Option<&str>,
    file: Option<&[u8]>,
    client: Option<String>,
    domain: Option<String>,
    qr_mode: Option<&str>,
) -> Result<()> {
    let request = GenerateRequest::from_inputs(count, file, client, domain, qr_mode, service.max_batch())?;
    let batch = service.generate(request).await?;

    for issued in &batch.coupons {
        println!(
            "{}\t{}\t{}",
            issued.coupon.code,
            issued.coupon.email.as_deref().unwrap_or("-"),
            format_ts(&issued.coupon.expires_at)
        );
    }
    println!(
        "\n{} coupons issued. CSV: {}",
        batch.coupons.len(),
        service.export().export_dir().join(&batch.csv_file).display()
    );
    Ok(())
}

pub async fn redeem(service: &CouponService, code: &str) -> Result<()> {
    let outcome = service.redeem(code).await?;
    println!("{}", outcome.message());
    if !outcome.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

pub async fn list(service: &CouponService, client: Option<&str>) -> Result<()> {
    let history = service.history(client).await?;
    let now = Utc::now();
    println!("{:<8} {:<9} {:<20} {:<28} {}", "CODE", "STATUS", "EXPIRES", "EMAIL", "CLIENT");
    for c in &history.coupons {
        println!(
            "{:<8} {:<9} {:<20} {:<28} {}",
            c.code,
            c.status(now).as_str(),
            format_ts(&c.expires_at),
            c.email.as_deref().unwrap_or("-"),
            c.client.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

pub async fn stats(service: &CouponService, client: Option<&str>) -> Result<()> {
    let counts = service.history(client).await?.counts;
    println!("\n=== COUPONS{} ===", client.map(|c| format!(" ({})", c)).unwrap_or_default());
    println!("Issued:   {}", counts.total);
    println!("Active:   {}", counts.active);
    println!("Redeemed: {}", counts.redeemed);
    println!("Expired:  {}", counts.expired);
    Ok(())
}

const UNIT_NAME: &str = "coupon-panel";

/// Renders the systemd unit for a panel binary at `exe_path` serving from `working_dir`.
pub fn systemd_unit(exe_path: &Path, working_dir: &Path) -> String {
    format!(
        r#"[Unit]
Description=Coupon Desk panel
After=network-online.target
Wants=network-online.target

[Service]
Type=simple
WorkingDirectory={dir}
EnvironmentFile=-{dir}/.env
Environment=RUST_LOG=coupon_panel=info,coupon_db=info,tower_http=warn,sqlx=warn
ExecStart={exe} serve
Restart=on-failure
RestartSec=5
NoNewPrivileges=true
ProtectSystem=full
ReadWritePaths={dir}

[Install]
WantedBy=multi-user.target
"#,
        dir = working_dir.display(),
        exe = exe_path.display(),
    )
}

pub fn install_service() -> Result<()> {
    if unsafe { libc::getuid() } != 0 {
        return Err(anyhow::anyhow!("Run `coupon-panel install` as root to write the systemd unit."));
    }

    let exe_path = env::current_exe().context("Cannot locate the panel binary")?;
    let working_dir = env::current_dir()?;
    let service_path = format!("/etc/systemd/system/{}.service", UNIT_NAME);

    fs::write(&service_path, systemd_unit(&exe_path, &working_dir))
        .with_context(|| format!("Failed to write service file to {}", service_path))?;

    println!("Systemd unit written to {}", service_path);
    println!("The panel reads {}/.env and keeps its database, QR images and exports there.", working_dir.display());
    println!("Start it with:");
    println!("  systemctl daemon-reload");
    println!("  systemctl enable --now {}", UNIT_NAME);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_runs_serve_from_working_dir() {
        let unit = systemd_unit(Path::new("/opt/coupons/coupon-panel"), Path::new("/srv/coupons"));
        assert!(unit.contains("ExecStart=/opt/coupons/coupon-panel serve\n"));
        assert!(unit.contains("WorkingDirectory=/srv/coupons\n"));
        assert!(unit.contains("EnvironmentFile=-/srv/coupons/.env\n"));
        assert!(unit.contains("ReadWritePaths=/srv/coupons\n"));
        assert!(unit.contains("Restart=on-failure"));
    }
}
