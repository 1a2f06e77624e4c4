use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use fieldstock_core::{BusinessId, UserId};

use crate::app::errors;
use crate::context::{ActorContext, BusinessContext};

pub const BUSINESS_HEADER: &str = "x-business-id";
pub const USER_HEADER: &str = "x-user-id";

/// Resolve the business and actor from request headers.
///
/// The business header is mandatory; the user header is optional but must
/// be a valid id when present.
pub async fn business_context_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let business_id = match extract_business(req.headers()) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let user_id = match extract_user(req.headers()) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    req.extensions_mut().insert(BusinessContext::new(business_id));
    req.extensions_mut().insert(ActorContext::new(user_id));

    next.run(req).await
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn extract_business(headers: &HeaderMap) -> Result<BusinessId, Response> {
    let raw = header_str(headers, BUSINESS_HEADER).ok_or_else(|| {
        errors::json_error(
            StatusCode::BAD_REQUEST,
            "missing_business",
            "X-Business-Id header is required",
        )
    })?;
    raw.parse()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid X-Business-Id"))
}

fn extract_user(headers: &HeaderMap) -> Result<Option<UserId>, Response> {
    header_str(headers, USER_HEADER)
        .map(|raw| {
            raw.parse()
                .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid X-User-Id"))
        })
        .transpose()
}
