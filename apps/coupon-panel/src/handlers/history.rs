use askama::Template;
use askama_web::WebTemplate;
use axum::{
    extract::{Form, Query, State},
    http::header,
    response::{IntoResponse, Redirect, Response},
};
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};

use coupon_db::models::coupon::{Coupon, CouponCounts};

use super::{bad_request, internal_error};
use crate::AppState;
use crate::services::export_service::format_ts;

pub struct HistoryRow {
    pub code: String,
    pub email: String,
    pub domain: String,
    pub client: String,
    pub status: String,
    pub created_at: String,
    pub expires_at: String,
    pub redeemed_at: String,
    pub qr_src: Option<String>,
}

impl HistoryRow {
    fn new(c: &Coupon, now: chrono::DateTime<Utc>) -> Self {
        Self {
            code: c.code.clone(),
            email: c.email.clone().unwrap_or_default(),
            domain: c.domain.clone().unwrap_or_default(),
            client: c.client.clone().unwrap_or_default(),
            status: c.status(now).as_str().to_string(),
            created_at: format_ts(&c.created_at),
            expires_at: format_ts(&c.expires_at),
            redeemed_at: c.redeemed_at.as_ref().map(format_ts).unwrap_or_default(),
            qr_src: c.qr_path.as_ref().map(|f| format!("/qr/{}", f)),
        }
    }
}

pub struct ClientOption {
    pub name: String,
    pub selected: bool,
}

#[derive(Template, WebTemplate)]
#[template(path = "history.html")]
pub struct HistoryTemplate {
    pub active_page: String,
    pub rows: Vec<HistoryRow>,
    pub counts: CouponCounts,
    pub clients: Vec<ClientOption>,
    pub client: String,
    pub export_url: String,
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub client: Option<String>,
}

#[derive(Deserialize)]
pub struct DeleteForm {
    pub code: Option<String>,
    pub client: Option<String>,
}

fn selected_client(raw: Option<String>) -> Option<String> {
    raw.map(|c| c.trim().to_string()).filter(|c| !c.is_empty())
}

fn with_client(path: &str, client: Option<&str>) -> String {
    match client {
        Some(c) => format!("{}?client={}", path, urlencoding::encode(c)),
        None => path.to_string(),
    }
}

pub async fn get_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let client = selected_client(query.client);
    let history = match state.coupon_service.history(client.as_deref()).await {
        Ok(h) => h,
        Err(e) => return internal_error("Loading history", e),
    };

    let now = Utc::now();
    let selected = client.clone().unwrap_or_default();
    HistoryTemplate {
        active_page: "history".to_string(),
        rows: history.coupons.iter().map(|c| HistoryRow::new(c, now)).collect(),
        counts: history.counts,
        clients: history
            .clients
            .into_iter()
            .map(|name| ClientOption { selected: name == selected, name })
            .collect(),
        export_url: with_client("/history/export.csv", client.as_deref()),
        client: selected,
    }
    .into_response()
}

pub async fn export_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let client = selected_client(query.client);
    let csv = state
        .coupon_service
        .history(client.as_deref())
        .await
        .and_then(|h| state.coupon_service.export().history_csv(&h.coupons));

    match csv {
        Ok(bytes) => (
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
                (header::CONTENT_DISPOSITION, "attachment; filename=\"coupons.csv\""),
            ],
            bytes,
        )
            .into_response(),
        Err(e) => internal_error("History export", e),
    }
}

pub async fn delete_coupon(
    State(state): State<AppState>,
    Form(form): Form<DeleteForm>,
) -> Response {
    let Some(code) = form.code.filter(|c| !c.trim().is_empty()) else {
        return bad_request("Missing coupon code");
    };
    let client = selected_client(form.client);

    match state.coupon_service.delete(&code).await {
        Ok(true) => info!("Deleted coupon {} from history", code.trim()),
        Ok(false) => warn!("Delete requested for unknown coupon {}", code.trim()),
        Err(e) => return internal_error("Coupon deletion", e),
    }

    Redirect::to(&with_client("/history", client.as_deref())).into_response()
}
