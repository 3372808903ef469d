use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::error;

use gatehouse_auth::Denial;
use gatehouse_core::DomainError;
use gatehouse_infra::StoreError;

pub fn json_error(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "status": status.as_u16(),
            "code": code.into(),
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Render a gate denial with the status its kind carries.
pub fn denial_response(denial: &Denial) -> axum::response::Response {
    let status =
        StatusCode::from_u16(denial.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    json_error(status, denial.code.clone(), denial.message.clone())
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    match err {
        StoreError::Domain(e) => {
            let status = match &e {
                DomainError::Validation(_) | DomainError::InvalidId(_) => StatusCode::BAD_REQUEST,
                DomainError::NotFound(_) => StatusCode::NOT_FOUND,
                DomainError::Duplicate(_) | DomainError::OrderingInvalid(_) => StatusCode::CONFLICT,
            };
            json_error(status, e.code(), e.to_string())
        }
        StoreError::Timeout(msg) | StoreError::Backend(msg) => {
            error!(error = %msg, "authorization store failure");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "authorization data is temporarily unavailable",
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_auth::{DenyCause, ErrorCatalog};

    #[test]
    fn store_errors_map_to_statuses() {
        let cases = [
            (StoreError::Domain(DomainError::validation("bad")), StatusCode::BAD_REQUEST),
            (StoreError::Domain(DomainError::not_found("rule")), StatusCode::NOT_FOUND),
            (StoreError::Domain(DomainError::duplicate("dup")), StatusCode::CONFLICT),
            (StoreError::Domain(DomainError::ordering("order")), StatusCode::CONFLICT),
            (StoreError::Timeout("slow".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (StoreError::Backend("down".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(store_error_to_response(err).status(), status);
        }
    }

    #[test]
    fn denials_use_their_kind_status() {
        let catalog = ErrorCatalog::default();
        assert_eq!(
            denial_response(&catalog.deny(DenyCause::MissingPrincipal)).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            denial_response(&catalog.deny(DenyCause::MissingPermission)).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            denial_response(&catalog.deny(DenyCause::StoreUnavailable)).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
