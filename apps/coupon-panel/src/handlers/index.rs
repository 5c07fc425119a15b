use askama::Template;
use askama_web::WebTemplate;
use axum::{extract::State, response::IntoResponse};

use coupon_db::models::coupon::CouponCounts;

use super::internal_error;
use crate::AppState;

#[derive(Template, WebTemplate)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub active_page: String,
    pub counts: CouponCounts,
}

pub async fn get_index(State(state): State<AppState>) -> impl IntoResponse {
    match state.coupon_service.history(None).await {
        Ok(history) => IndexTemplate {
            active_page: "home".to_string(),
            counts: history.counts,
        }
        .into_response(),
        Err(e) => internal_error("Loading coupon summary", e),
    }
}
