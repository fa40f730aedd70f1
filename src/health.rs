use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn root() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "message": "Voice bridge is running"
    }))
}

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let sessions = state.get_metrics_snapshot();
    let max_sessions = state.config.server.max_concurrent_sessions;

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "persona": state.config.session.persona,
            "voice": state.config.upstream.voice
        },
        "sessions": {
            "active": sessions.active,
            "max_concurrent": max_sessions,
            "total": sessions.total,
            "failed": sessions.failed,
            "connect_failures": sessions.connect_failures,
            "ended_by_client": sessions.ended_by_client,
            "turns_delivered": sessions.turns_delivered,
            "audio_bytes_in": sessions.audio_bytes_in,
            "audio_bytes_out": sessions.audio_bytes_out,
            "load": load_status(sessions.active, max_sessions)
        }
    }))
}

fn load_status(active: u32, max_sessions: usize) -> &'static str {
    let usage = if max_sessions > 0 {
        active as f64 / max_sessions as f64
    } else {
        0.0
    };

    if usage >= 1.0 {
        "full"
    } else if usage > 0.7 {
        "high_load"
    } else {
        "normal"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_state;
    use actix_web::test::{call_and_read_body_json, init_service, TestRequest};
    use actix_web::App;
    use serde_json::Value;

    #[actix_web::test]
    async fn test_root() {
        let app = init_service(App::new().route("/", web::get().to(root))).await;
        let req = TestRequest::get().uri("/").to_request();
        let body: Value = call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "ok");
        assert!(body["message"].is_string());
    }

    #[actix_web::test]
    async fn test_health_reports_sessions() {
        let state = test_state(4);
        assert!(state.try_open_session());

        let app = init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/health", web::get().to(health_check)),
        )
        .await;
        let req = TestRequest::get().uri("/health").to_request();
        let body: Value = call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"]["name"], "voice-bridge");
        assert_eq!(body["sessions"]["active"], 1);
        assert_eq!(body["sessions"]["max_concurrent"], 4);
        assert_eq!(body["sessions"]["load"], "normal");
    }

    #[test]
    fn test_load_status() {
        assert_eq!(load_status(0, 10), "normal");
        assert_eq!(load_status(8, 10), "high_load");
        assert_eq!(load_status(10, 10), "full");
    }
}
