//! One-shot analysis of an impulse response supplied by the client.

use crate::analysis::filter_bank::OctaveBandFilterBank;
use crate::analysis::parameters::{AcousticParameterCalculator, AcousticParameters};
use crate::error::{AppError, AppResult};
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct ImpulseResponseRequest {
    pub sample_rate: u32,
    pub signal: Vec<f64>,
}

#[derive(Debug, Serialize)]
pub struct ImpulseResponseAnalysis {
    pub samples: usize,
    pub duration_s: f64,
    pub center_frequencies: Vec<f64>,
    pub parameters: AcousticParameters,
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

fn analyze(request: ImpulseResponseRequest) -> Result<ImpulseResponseAnalysis, AppError> {
    if request.sample_rate == 0 {
        return Err(AppError::ValidationError(
            "sample_rate must be greater than 0".to_string(),
        ));
    }
    if request.signal.is_empty() {
        return Err(AppError::ValidationError("signal must not be empty".to_string()));
    }
    if request.signal.iter().any(|v| !v.is_finite()) {
        return Err(AppError::ValidationError(
            "signal must only contain finite samples".to_string(),
        ));
    }

    let bank = OctaveBandFilterBank::new(request.sample_rate)?;
    let center_frequencies = bank.center_frequencies().to_vec();
    let parameters = AcousticParameterCalculator::new(bank).compute(&request.signal, false);

    Ok(ImpulseResponseAnalysis {
        samples: request.signal.len(),
        duration_s: round_to(request.signal.len() as f64 / request.sample_rate as f64, 3),
        center_frequencies,
        parameters,
    })
}

/// `POST /api/v1/analysis/impulse-response`
pub async fn analyze_impulse_response(
    body: web::Json<ImpulseResponseRequest>,
) -> AppResult<HttpResponse> {
    let request = body.into_inner();
    debug!(
        sample_rate = request.sample_rate,
        samples = request.signal.len(),
        "Analysing impulse response"
    );

    let analysis = web::block(move || analyze(request))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(HttpResponse::Ok().json(analysis))
}
