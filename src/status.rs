//! Liveness and build information endpoints.

use axum::response::Json as JsonResponse;
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthStatus {
    status: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    name: &'static str,
    version: &'static str,
    commit: &'static str,
    build_time: &'static str,
    build_env: String,
}

/// Liveness check for load balancers.
pub async fn healthcheck() -> JsonResponse<HealthStatus> {
    JsonResponse(HealthStatus { status: "ok" })
}

pub async fn get_version_info() -> JsonResponse<VersionInfo> {
    JsonResponse(VersionInfo {
        name: crate::build::PROJECT_NAME,
        version: crate::build::PKG_VERSION,
        commit: crate::build::SHORT_COMMIT,
        build_time: crate::build::BUILD_TIME,
        build_env: format!(
            "{},{}",
            crate::build::RUST_VERSION,
            crate::build::RUST_CHANNEL
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn healthcheck_reports_ok() {
        let JsonResponse(health) = healthcheck().await;
        assert_eq!(health.status, "ok");
    }

    #[tokio::test]
    async fn version_matches_package() {
        let JsonResponse(info) = get_version_info().await;
        assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
    }
}
