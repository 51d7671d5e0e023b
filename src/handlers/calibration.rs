use crate::analysis::calibration::estimate_latency;
use crate::error::{AppError, AppResult};
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct LatencyRequest {
    pub sample_rate: u32,
    /// Signal as sent to the speaker.
    pub original: Vec<f64>,
    /// The same signal as captured by the microphone.
    pub recorded: Vec<f64>,
    #[serde(default)]
    pub include_correlation: bool,
}

/// `POST /api/v1/calibration/latency`
pub async fn estimate_device_latency(
    body: web::Json<LatencyRequest>,
) -> AppResult<HttpResponse> {
    let request = body.into_inner();
    debug!(
        sample_rate = request.sample_rate,
        original = request.original.len(),
        recorded = request.recorded.len(),
        "Estimating latency"
    );

    let estimate = web::block(move || {
        estimate_latency(
            &request.original,
            &request.recorded,
            request.sample_rate,
            request.include_correlation,
        )
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(HttpResponse::Ok().json(estimate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};
    use serde_json::json;

    #[actix_web::test]
    async fn test_latency_endpoint() {
        let app = test::init_service(
            App::new().route("/latency", web::post().to(estimate_device_latency)),
        )
        .await;

        let original = vec![0.0, 1.0, 0.5, -0.25, 0.0, 0.0];
        let mut recorded = vec![0.0; 3];
        recorded.extend_from_slice(&original);

        let req = test::TestRequest::post()
            .uri("/latency")
            .set_json(json!({"sample_rate": 1000, "original": original, "recorded": recorded}))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["lag_samples"], 3);
        assert_eq!(body["latency_seconds"], 0.003);
        assert!(body.get("correlation").is_none());

        let req = test::TestRequest::post()
            .uri("/latency")
            .set_json(json!({"sample_rate": 1000, "original": [0.0, 0.0], "recorded": [1.0]}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
    }
}
