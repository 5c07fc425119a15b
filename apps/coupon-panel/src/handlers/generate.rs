// Coupon batch generation: form page and multipart submit

use askama::Template;
use askama_web::WebTemplate;
use axum::{
    extract::{Multipart, State},
    response::IntoResponse,
};
use tracing::{info, warn};

use super::{bad_request, internal_error};
use crate::AppState;
use crate::services::coupon_service::{GenerateRequest, IssuedCoupon};
use crate::services::export_service::format_ts;

// ============================================================================
// Templates
// ============================================================================

#[derive(Template, WebTemplate)]
#[template(path = "generate.html")]
pub struct GenerateTemplate {
    pub active_page: String,
    pub max_batch: usize,
    pub default_qr_mode: String,
}

pub struct IssuedRow {
    pub code: String,
    pub email: String,
    pub expires_at: String,
    pub qr_src: Option<String>,
}

impl From<&IssuedCoupon> for IssuedRow {
    fn from(issued: &IssuedCoupon) -> Self {
        Self {
            code: issued.coupon.code.clone(),
            email: issued.coupon.email.clone().unwrap_or_default(),
            expires_at: format_ts(&issued.coupon.expires_at),
            qr_src: issued.qr.img_src(),
        }
    }
}

#[derive(Template, WebTemplate)]
#[template(path = "generate_result.html")]
pub struct GenerateResultTemplate {
    pub active_page: String,
    pub rows: Vec<IssuedRow>,
    pub client: String,
    pub csv_url: String,
}

// ============================================================================
// Route Handlers
// ============================================================================

pub async fn get_generate(State(state): State<AppState>) -> impl IntoResponse {
    GenerateTemplate {
        active_page: "generate".to_string(),
        max_batch: state.coupon_service.max_batch(),
        default_qr_mode: state.coupon_service.default_qr_mode().as_str().to_string(),
    }
}

#[derive(Default)]
struct GenerateFields {
    count: Option<String>,
    file: Option<Vec<u8>>,
    client: Option<String>,
    domain: Option<String>,
    qr_mode: Option<String>,
}

async fn read_fields(mut multipart: Multipart) -> Result<GenerateFields, axum::extract::multipart::MultipartError> {
    let mut fields = GenerateFields::default();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => fields.file = Some(field.bytes().await?.to_vec()),
            "count" => fields.count = Some(field.text().await?),
            "client" => fields.client = Some(field.text().await?),
            "domain" => fields.domain = Some(field.text().await?),
            "qr_mode" => fields.qr_mode = Some(field.text().await?),
            _ => {}
        }
    }
    Ok(fields)
}

pub async fn post_generate(
    State(state): State<AppState>,
    multipart: Multipart,
) -> axum::response::Response {
    let fields = match read_fields(multipart).await {
        Ok(f) => f,
        Err(e) => {
            warn!("Rejected generate form: {}", e);
            return bad_request(format!("Malformed form data: {}", e));
        }
    };

    let request = match GenerateRequest::from_inputs(
        fields.count.as_deref(),
        fields.file.as_deref(),
        fields.client,
        fields.domain,
        fields.qr_mode.as_deref(),
        state.coupon_service.max_batch(),
    ) {
        Ok(r) => r,
        Err(e) => return bad_request(e.to_string()),
    };

    let client = request.client.clone().unwrap_or_default();
    match state.coupon_service.generate(request).await {
        Ok(batch) => {
            info!("Generated {} coupons, CSV {}", batch.coupons.len(), batch.csv_file);
            GenerateResultTemplate {
                active_page: "generate".to_string(),
                rows: batch.coupons.iter().map(IssuedRow::from).collect(),
                client,
                csv_url: format!("/exports/{}", urlencoding::encode(&batch.csv_file)),
            }
            .into_response()
        }
        Err(e) if e.is_client_error() => bad_request(e.to_string()),
        Err(e) => internal_error("Coupon generation", e),
    }
}
