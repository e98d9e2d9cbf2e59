use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Effective configuration with credentials redacted. There is no mutation
/// counterpart: credentials are immutable after startup.
pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": {
                "host": config.server.host,
                "port": config.server.port
            },
            "iflytek": {
                "app_id": config.iflytek.app_id,
                "api_key": "<redacted>",
                "api_secret": "<redacted>",
                "host": config.iflytek.host,
                "path": config.iflytek.path
            },
            "evaluation": {
                "language": config.evaluation.language,
                "category": config.evaluation.category,
                "ent": config.evaluation.ent,
                "session_timeout_secs": config.evaluation.session_timeout_secs
            },
            "performance": {
                "max_concurrent_sessions": config.performance.max_concurrent_sessions,
                "max_audio_bytes": config.performance.max_audio_bytes
            }
        }
    })))
}
