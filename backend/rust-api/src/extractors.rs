use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// JSON body extractor whose rejections are JSON too, shaped like the other
/// API errors (`{"message", "status"}`).
pub struct AppJson<T>(pub T);

fn rejection_response(rejection: JsonRejection) -> Response {
    let status = rejection.status();
    let message = format!("Invalid request body: {}", rejection.body_text());
    tracing::warn!("{}", message);
    (
        status,
        Json(json!({
            "message": message,
            "status": status.as_u16()
        })),
    )
        .into_response()
}

impl<T, S> FromRequest<S> for AppJson<T>
where
    T: serde::de::DeserializeOwned + 'static,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        Json::<T>::from_request(req, state)
            .await
            .map(|Json(value)| AppJson(value))
            .map_err(rejection_response)
    }
}
