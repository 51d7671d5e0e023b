use crate::state::{AppMetrics, AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();
    let lobbies = state.store.lobby_count();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": "acoustic-lobby-backend",
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": error_rate(&metrics)
        },
        "lobbies": {
            "active": lobbies,
            "running_measurements": state.store.running_measurements(),
            "connections": state.hub.connection_count()
        },
        "memory": get_memory_info(),
        "system": get_system_status(lobbies, config.measurement.max_concurrent_lobbies)
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();
    let config = state.get_config();

    let endpoint_stats: Vec<_> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": error_rate(&metrics),
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "endpoints": endpoint_stats,
        "measurements": state.stats.snapshot(),
        "lobbies": {
            "active": state.store.lobby_count(),
            "sessions": state.store.session_count(),
            "running_measurements": state.store.running_measurements(),
            "max_concurrent_lobbies": config.measurement.max_concurrent_lobbies
        },
        "analysis": {
            "sample_rate": config.excitation.sample_rate,
            "center_frequencies": state.pipeline().center_frequencies()
        },
        "memory": get_memory_info()
    }))
}

fn error_rate(metrics: &AppMetrics) -> f64 {
    if metrics.request_count > 0 {
        metrics.error_count as f64 / metrics.request_count as f64
    } else {
        0.0
    }
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        let pid = std::process::id();
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            let field = |name: &str| {
                status
                    .lines()
                    .find(|line| line.starts_with(name))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .unwrap_or(0)
                    * 1024
            };

            return json!({
                "resident_memory_bytes": field("VmRSS:"),
                "virtual_memory_bytes": field("VmSize:"),
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": "Memory info not available on this platform"
    })
}

fn get_system_status(lobbies: usize, max_lobbies: usize) -> serde_json::Value {
    let usage = if max_lobbies > 0 {
        lobbies as f64 / max_lobbies as f64
    } else {
        0.0
    };

    let status = if usage > 0.9 {
        "high_load"
    } else if usage > 0.7 {
        "moderate_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "lobby_usage_percent": (usage * 100.0).round(),
        "max_lobbies": max_lobbies,
        "current_lobbies": lobbies,
        "load_warnings": if usage > 0.8 {
            vec!["High lobby usage - consider increasing max_concurrent_lobbies"]
        } else {
            vec![]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_status_thresholds() {
        assert_eq!(get_system_status(1, 10)["status"], "normal");
        assert_eq!(get_system_status(8, 10)["status"], "moderate_load");
        assert_eq!(get_system_status(10, 10)["status"], "high_load");
        assert_eq!(get_system_status(9, 10)["load_warnings"].as_array().unwrap().len(), 1);
    }
}
