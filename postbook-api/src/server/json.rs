use crate::server::ServerError;
use axum::{
    Json as AxumJson,
    extract::FromRequest,
    response::{IntoResponse, Response},
};
use axum_extra::TypedHeader;
use headers::ContentType;
use serde::Serialize;

/// JSON body extractor and responder.
///
/// Unlike [`axum::Json`], a body that is missing fields or fails validation is
/// rejected with a [`ServerError`], so clients get the same error shape as for
/// every other failure.
#[derive(FromRequest, Debug, Clone, Copy, Default)]
#[from_request(via(AxumJson), rejection(ServerError))]
pub struct Json<T>(pub T);

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response {
        match serde_json::to_vec(&self.0) {
            Ok(json) => (TypedHeader(ContentType::json()), json).into_response(),
            Err(err) => ServerError::JsonResponse(err).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::server::json::Json;
    use axum::{
        body::{Body, to_bytes},
        extract::FromRequest,
        http::{Request, StatusCode, header::CONTENT_TYPE},
        response::IntoResponse,
    };
    use postbook_common::model::post::PostContent;

    fn request(body: &'static str) -> Request<Body> {
        Request::builder()
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn invalid_bodies_are_bad_requests() {
        let bodies = [
            r#"{"user_id": 1}"#,
            r#"{"body": "", "user_id": 1}"#,
            r#"{"body": "hi", "user_id": "one"}"#,
            "not json",
        ];

        for body in bodies {
            let err = Json::<PostContent>::from_request(request(body), &())
                .await
                .unwrap_err();
            assert_eq!(err.status(), StatusCode::BAD_REQUEST, "{body}");
        }

        let Json(content) =
            Json::<PostContent>::from_request(request(r#"{"body": "hi", "user_id": 1}"#), &())
                .await
                .unwrap();
        assert_eq!(content.body.get(), "hi");
    }

    #[tokio::test]
    async fn responds_with_json_content_type() {
        let response = Json(serde_json::json!({"id": 1})).into_response();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], br#"{"id":1}"#);
    }
}
