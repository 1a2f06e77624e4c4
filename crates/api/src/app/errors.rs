use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use fieldstock_core::DomainError;
use fieldstock_infra::DispatchError;

pub fn dispatch_error_to_response(err: DispatchError) -> axum::response::Response {
    match err {
        DispatchError::Domain(e) => domain_error_to_response(e),
        DispatchError::ConcurrentModification(msg) => {
            json_error(StatusCode::CONFLICT, "concurrent_modification", msg)
        }
        DispatchError::TenantIsolation(msg) => json_error(StatusCode::FORBIDDEN, "tenant_isolation", msg),
        DispatchError::Deserialize(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "deserialize_error", msg)
        }
        DispatchError::Store(e) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string()),
        DispatchError::Publish(msg) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "publish_error", msg),
    }
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    let message = err.to_string();
    match err {
        DomainError::Validation(_) => json_error(StatusCode::BAD_REQUEST, "validation_error", message),
        DomainError::InvalidId(_) => json_error(StatusCode::BAD_REQUEST, "invalid_id", message),
        DomainError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", message),
        DomainError::Conflict(_) => json_error(StatusCode::CONFLICT, "conflict", message),
        DomainError::AlreadyReversed(_) => json_error(StatusCode::CONFLICT, "already_reversed", message),
        DomainError::InvalidMovement(_) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invalid_movement", message)
        }
        DomainError::ApprovalPending => json_error(StatusCode::UNPROCESSABLE_ENTITY, "approval_pending", message),
        DomainError::ApprovalRejected => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "approval_rejected", message)
        }
        DomainError::OverReceipt { .. } => json_error(StatusCode::UNPROCESSABLE_ENTITY, "over_receipt", message),
        DomainError::InvariantViolation(_) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", message)
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn not_found(what: &str) -> axum::response::Response {
    json_error(StatusCode::NOT_FOUND, "not_found", format!("{what} not found"))
}

/// Parse a path or body identifier, answering 400 on garbage.
pub fn parse_id<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T, axum::response::Response> {
    raw.trim()
        .parse()
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid {what}")))
}

/// Parse an enum-valued field, answering 400 with the domain's message.
pub fn parse_field<T>(raw: &str) -> Result<T, axum::response::Response>
where
    T: std::str::FromStr<Err = DomainError>,
{
    raw.trim().parse().map_err(domain_error_to_response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_to_stable_statuses() {
        let cases = [
            (DomainError::validation("x"), StatusCode::BAD_REQUEST),
            (DomainError::invalid_id("x"), StatusCode::BAD_REQUEST),
            (DomainError::NotFound, StatusCode::NOT_FOUND),
            (DomainError::conflict("x"), StatusCode::CONFLICT),
            (DomainError::already_reversed("m"), StatusCode::CONFLICT),
            (DomainError::invalid_movement("x"), StatusCode::UNPROCESSABLE_ENTITY),
            (DomainError::ApprovalPending, StatusCode::UNPROCESSABLE_ENTITY),
            (DomainError::ApprovalRejected, StatusCode::UNPROCESSABLE_ENTITY),
            (DomainError::over_receipt(5, 4), StatusCode::UNPROCESSABLE_ENTITY),
            (DomainError::invariant("x"), StatusCode::UNPROCESSABLE_ENTITY),
        ];
        for (err, status) in cases {
            assert_eq!(domain_error_to_response(err).status(), status);
        }
    }

    #[test]
    fn concurrency_is_a_conflict_and_storage_is_internal() {
        assert_eq!(
            dispatch_error_to_response(DispatchError::ConcurrentModification("stale".into())).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            dispatch_error_to_response(DispatchError::Publish("down".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
