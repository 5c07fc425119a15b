use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{DynamicImage, ImageFormat, Luma};
use qrcode::QrCode;
use std::io::Cursor;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, warn};

const QR_MIN_SIZE: u32 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QrMode {
    None,
    #[default]
    File,
    Inline,
}

impl QrMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            QrMode::None => "none",
            QrMode::File => "file",
            QrMode::Inline => "inline",
        }
    }
}

impl FromStr for QrMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(QrMode::None),
            "file" => Ok(QrMode::File),
            "inline" | "base64" => Ok(QrMode::Inline),
            other => Err(anyhow::anyhow!("Unknown QR mode '{}' (expected none, file or inline)", other)),
        }
    }
}

/// Where a coupon's QR image ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QrRef {
    None,
    File { file_name: String },
    Inline { data_url: String },
}

impl QrRef {
    pub fn img_src(&self) -> Option<String> {
        match self {
            QrRef::None => None,
            QrRef::File { file_name } => Some(format!("/qr/{}", file_name)),
            QrRef::Inline { data_url } => Some(data_url.clone()),
        }
    }

    /// Value written into the `qr` column of exported CSVs.
    pub fn csv_value(&self) -> String {
        match self {
            QrRef::None => String::new(),
            QrRef::File { file_name } => format!("/qr/{}", file_name),
            QrRef::Inline { data_url } => data_url.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QrService {
    qr_dir: PathBuf,
    public_base_url: Option<String>,
}

impl QrService {
    pub fn new(qr_dir: PathBuf, public_base_url: Option<String>) -> Self {
        Self { qr_dir, public_base_url }
    }

    /// What the QR encodes: a lookup link when the panel has a public URL, the bare code otherwise.
    pub fn payload(&self, code: &str) -> String {
        match &self.public_base_url {
            Some(base) => format!("{}/validate_coupon?code={}", base, urlencoding::encode(code)),
            None => code.to_string(),
        }
    }

    pub fn render_png(&self, payload: &str) -> Result<Vec<u8>> {
        let qr = QrCode::new(payload.as_bytes()).context("Failed to encode QR payload")?;
        let img = qr
            .render::<Luma<u8>>()
            .min_dimensions(QR_MIN_SIZE, QR_MIN_SIZE)
            .build();

        let mut bytes = Vec::new();
        DynamicImage::ImageLuma8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .context("Failed to encode QR as PNG")?;
        Ok(bytes)
    }

    pub fn data_url(&self, payload: &str) -> Result<String> {
        let png = self.render_png(payload)?;
        Ok(format!("data:image/png;base64,{}", STANDARD.encode(png)))
    }

    pub async fn write_file(&self, code: &str, payload: &str) -> Result<String> {
        let png = self.render_png(payload)?;
        let file_name = format!("{}.png", code);
        tokio::fs::create_dir_all(&self.qr_dir)
            .await
            .with_context(|| format!("Failed to create QR directory {}", self.qr_dir.display()))?;
        let path = self.qr_dir.join(&file_name);
        tokio::fs::write(&path, png)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        debug!("QR written to {}", path.display());
        Ok(file_name)
    }

    pub async fn issue(&self, code: &str, mode: QrMode) -> Result<QrRef> {
        let payload = self.payload(code);
        match mode {
            QrMode::None => Ok(QrRef::None),
            QrMode::File => Ok(QrRef::File { file_name: self.write_file(code, &payload).await? }),
            QrMode::Inline => Ok(QrRef::Inline { data_url: self.data_url(&payload)? }),
        }
    }

    pub async fn remove_file(&self, file_name: &str) {
        // Only plain file names are ever stored; refuse anything that walks out of qr_dir.
        if file_name.contains('/') || file_name.contains('\\') || file_name.contains("..") {
            warn!("Refusing to remove suspicious QR path {}", file_name);
            return;
        }
        let path = self.qr_dir.join(file_name);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            warn!("Could not remove QR file {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

    #[test]
    fn mode_parses_aliases() {
        assert_eq!("FILE".parse::<QrMode>().unwrap(), QrMode::File);
        assert_eq!("base64".parse::<QrMode>().unwrap(), QrMode::Inline);
        assert_eq!("off".parse::<QrMode>().unwrap(), QrMode::None);
        assert!("svg".parse::<QrMode>().is_err());
    }

    #[test]
    fn payload_uses_public_url_when_configured() {
        let bare = QrService::new(PathBuf::from("qr"), None);
        assert_eq!(bare.payload("VIPAB12"), "VIPAB12");

        let linked = QrService::new(PathBuf::from("qr"), Some("https://shop.example.com".into()));
        assert_eq!(
            linked.payload("VIPAB12"),
            "https://shop.example.com/validate_coupon?code=VIPAB12"
        );
    }

    #[test]
    fn png_and_data_url_are_well_formed() {
        let svc = QrService::new(PathBuf::from("qr"), None);
        let png = svc.render_png("VIPAB12").unwrap();
        assert!(png.starts_with(PNG_MAGIC));

        let url = svc.data_url("VIPAB12").unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
        let decoded = STANDARD.decode(&url["data:image/png;base64,".len()..]).unwrap();
        assert_eq!(decoded, png);
    }

    #[tokio::test]
    async fn file_mode_writes_and_removes_png() {
        let dir = tempfile::tempdir().unwrap();
        let svc = QrService::new(dir.path().join("qr"), None);

        let qr = svc.issue("VIPFILE", QrMode::File).await.unwrap();
        assert_eq!(qr, QrRef::File { file_name: "VIPFILE.png".into() });
        assert_eq!(qr.img_src().as_deref(), Some("/qr/VIPFILE.png"));

        let on_disk = std::fs::read(dir.path().join("qr/VIPFILE.png")).unwrap();
        assert!(on_disk.starts_with(PNG_MAGIC));

        svc.remove_file("VIPFILE.png").await;
        assert!(!dir.path().join("qr/VIPFILE.png").exists());
    }

    #[tokio::test]
    async fn none_mode_renders_nothing() {
        let svc = QrService::new(PathBuf::from("unused"), None);
        let qr = svc.issue("VIPNONE", QrMode::None).await.unwrap();
        assert_eq!(qr, QrRef::None);
        assert_eq!(qr.csv_value(), "");
    }
}
