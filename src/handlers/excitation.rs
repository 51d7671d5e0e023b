use crate::analysis::decode::encode_wav;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use actix_web::{http::header, web, HttpResponse};
use tracing::debug;

/// `GET /api/v1/excitation`: the reference sweep as a 32-bit float mono WAV.
///
/// Speaker devices download this once and play it on every `play_sound`.
pub async fn get_excitation(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let excitation = state.get_config().excitation;
    let sweep = excitation.sweep();

    let wav = web::block(move || encode_wav(&sweep.generate(), sweep.sample_rate))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;
    debug!(
        sample_rate = excitation.sample_rate,
        duration_secs = excitation.duration_secs,
        bytes = wav.len(),
        "Serving excitation"
    );

    Ok(HttpResponse::Ok()
        .content_type("audio/wav")
        .insert_header((
            header::CONTENT_DISPOSITION,
            "attachment; filename=\"excitation.wav\"",
        ))
        .body(wav))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::decode::decode_wav;
    use crate::handlers::tests_support::test_state;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_excitation_matches_configured_sweep() {
        let state = web::Data::new(test_state());
        let expected = state.get_config().excitation.sweep();
        let app = test::init_service(
            App::new()
                .app_data(state)
                .route("/excitation", web::get().to(get_excitation)),
        )
        .await;

        let req = test::TestRequest::get().uri("/excitation").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
        assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "audio/wav");

        let body = test::read_body(resp).await;
        let decoded = decode_wav(&body).unwrap();
        assert_eq!(decoded.sample_rate, expected.sample_rate);
        assert_eq!(decoded.samples.len(), expected.len());
    }
}
