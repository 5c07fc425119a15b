// Front-of-house lookup and redemption

use askama::Template;
use askama_web::WebTemplate;
use axum::{
    extract::{Form, Query, State},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use coupon_db::models::coupon::normalize_code;

use super::{bad_request, internal_error};
use crate::AppState;
use crate::services::coupon_service::RedeemOutcome;

#[derive(Template, WebTemplate)]
#[template(path = "validate.html")]
pub struct ValidateTemplate {
    pub active_page: String,
    pub code: String,
    pub message: Option<String>,
    pub success: bool,
    /// Set when the page only looked the code up; the form then offers to redeem it.
    pub can_redeem: bool,
}

impl ValidateTemplate {
    fn blank() -> Self {
        Self {
            active_page: "validate".to_string(),
            code: String::new(),
            message: None,
            success: false,
            can_redeem: false,
        }
    }

    fn with_outcome(code: String, outcome: RedeemOutcome) -> Self {
        Self {
            code,
            message: Some(outcome.message().to_string()),
            success: outcome.is_success(),
            can_redeem: outcome == RedeemOutcome::Valid,
            ..Self::blank()
        }
    }
}

#[derive(Deserialize)]
pub struct ValidateQuery {
    pub code: Option<String>,
}

#[derive(Deserialize)]
pub struct ValidateForm {
    pub code: Option<String>,
}

pub async fn get_validate(
    State(state): State<AppState>,
    Query(query): Query<ValidateQuery>,
) -> Response {
    let Some(code) = query.code.map(|c| normalize_code(&c)).filter(|c| !c.is_empty()) else {
        return ValidateTemplate::blank().into_response();
    };

    match state.coupon_service.check(&code).await {
        Ok(outcome) => ValidateTemplate::with_outcome(code, outcome).into_response(),
        Err(e) => internal_error("Coupon lookup", e),
    }
}

pub async fn post_validate(
    State(state): State<AppState>,
    Form(form): Form<ValidateForm>,
) -> Response {
    let Some(code) = form.code else {
        return bad_request("Missing coupon code");
    };
    let code = normalize_code(&code);

    match state.coupon_service.redeem(&code).await {
        Ok(outcome) => ValidateTemplate::with_outcome(code, outcome).into_response(),
        Err(e) => internal_error("Coupon redemption", e),
    }
}
