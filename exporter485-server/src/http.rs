use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;

use exporter485::{
    render, CollectError, Collector, ConfigError, ErrorKind, Modules, Transport, UnitId,
};

/// highest unit id a serial slave may use
const MAX_TARGET: u8 = 247;

struct Exporter<T> {
    modules: Modules,
    // one collection at a time owns the bus
    collector: Arc<tokio::sync::Mutex<Collector<T>>>,
}

pub(crate) struct AppState<T> {
    exporter: Arc<Exporter<T>>,
}

impl<T> Clone for AppState<T> {
    fn clone(&self) -> Self {
        Self {
            exporter: self.exporter.clone(),
        }
    }
}

pub(crate) fn router<T>(modules: Modules, collector: Collector<T>) -> Router
where
    T: Transport + 'static,
{
    let state = AppState {
        exporter: Arc::new(Exporter {
            modules,
            collector: Arc::new(tokio::sync::Mutex::new(collector)),
        }),
    };

    Router::new()
        .route("/metrics", get(metrics::<T>))
        .route("/config", get(config::<T>))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub(crate) struct MetricsQuery {
    module: Option<String>,
    target: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ScrapeError {
    // reserved for exporter self-metrics
    #[error("Not Implemented")]
    MissingModule,
    #[error("Module not found")]
    UnknownModule,
    #[error("Missing target")]
    MissingTarget,
    #[error("Invalid target id")]
    InvalidTarget,
    #[error("Failed to collect metrics")]
    Unavailable(#[source] CollectError),
    #[error("Module cannot be collected")]
    Misconfigured(#[source] CollectError),
    #[error("Failed to render configuration")]
    Config(#[source] ConfigError),
    #[error("Collection task failed")]
    Task(#[source] tokio::task::JoinError),
}

impl ScrapeError {
    fn status(&self) -> StatusCode {
        match self {
            ScrapeError::MissingModule => StatusCode::NOT_IMPLEMENTED,
            ScrapeError::UnknownModule => StatusCode::BAD_REQUEST,
            ScrapeError::MissingTarget => StatusCode::BAD_REQUEST,
            ScrapeError::InvalidTarget => StatusCode::BAD_REQUEST,
            ScrapeError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ScrapeError::Misconfigured(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ScrapeError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ScrapeError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CollectError> for ScrapeError {
    fn from(err: CollectError) -> Self {
        match err.kind() {
            ErrorKind::Configuration => ScrapeError::Misconfigured(err),
            ErrorKind::Transport | ErrorKind::Integrity => ScrapeError::Unavailable(err),
        }
    }
}

impl IntoResponse for ScrapeError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

fn parse_target(value: Option<&str>) -> Result<UnitId, ScrapeError> {
    let value = value.ok_or(ScrapeError::MissingTarget)?;
    let id: u8 = value
        .trim()
        .parse()
        .map_err(|_| ScrapeError::InvalidTarget)?;

    if !(1..=MAX_TARGET).contains(&id) {
        return Err(ScrapeError::InvalidTarget);
    }

    Ok(UnitId::new(id))
}

async fn metrics<T>(
    State(state): State<AppState<T>>,
    Query(query): Query<MetricsQuery>,
) -> Result<Response, ScrapeError>
where
    T: Transport + 'static,
{
    let name = query.module.ok_or(ScrapeError::MissingModule)?;
    let class = state
        .exporter
        .modules
        .get(&name)
        .ok_or(ScrapeError::UnknownModule)?;
    let target = parse_target(query.target.as_deref())?;

    // runs to completion even when the request is dropped
    let collector = state.exporter.collector.clone();
    let owned = class.clone();
    let task = tokio::spawn(async move {
        let mut collector = collector.lock_owned().await;
        collector.collect(&owned, target).await
    });

    let values = task.await.map_err(ScrapeError::Task)?.map_err(|err| {
        tracing::warn!("failed to collect {} from unit {}: {}", name, target, err);
        ScrapeError::from(err)
    })?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain")],
        render(class, &values),
    )
        .into_response())
}

async fn config<T>(State(state): State<AppState<T>>) -> Result<String, ScrapeError>
where
    T: Transport + 'static,
{
    state.exporter.modules.to_yaml().map_err(ScrapeError::Config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use exporter485::{AddressRange, LinkError, RegisterKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tower::util::ServiceExt;

    const CONFIG: &str = r#"
modules:
  - name: sdm
    metrics:
      - name: voltage
        help: Line voltage
        metricType: gauge
        inputType: inputRegister
        dataType: uint16
        address: 0
      - name: energy
        metricType: counter
        inputType: holdingRegister
        dataType: uint32
        address: 10
  - name: broken
    metrics:
      - name: voltage
        metricType: gauge
        inputType: payloadOffset
        dataType: uint16
        address: 0
"#;

    /// a bus on which no device ever answers
    struct DeadLink;

    impl Transport for DeadLink {
        fn set_target(&mut self, _unit: UnitId) {}

        async fn read_registers(
            &mut self,
            _kind: RegisterKind,
            range: AddressRange,
        ) -> Result<Vec<u16>, LinkError> {
            Err(LinkError::Timeout {
                received: 0,
                expected: 5 + 2 * usize::from(range.count),
            })
        }

        async fn write_raw(&mut self, _data: &[u8]) -> Result<(), LinkError> {
            Ok(())
        }

        async fn read_raw(&mut self, buffer: &mut [u8]) -> Result<(), LinkError> {
            Err(LinkError::Timeout {
                received: 0,
                expected: buffer.len(),
            })
        }
    }

    /// a device that takes a second to answer and counts its answers
    struct SlowLink {
        answered: Arc<AtomicUsize>,
    }

    impl Transport for SlowLink {
        fn set_target(&mut self, _unit: UnitId) {}

        async fn read_registers(
            &mut self,
            _kind: RegisterKind,
            range: AddressRange,
        ) -> Result<Vec<u16>, LinkError> {
            tokio::time::sleep(Duration::from_secs(1)).await;
            self.answered.fetch_add(1, Ordering::SeqCst);
            Ok(vec![7; usize::from(range.count)])
        }

        async fn write_raw(&mut self, _data: &[u8]) -> Result<(), LinkError> {
            Ok(())
        }

        async fn read_raw(&mut self, _buffer: &mut [u8]) -> Result<(), LinkError> {
            Ok(())
        }
    }

    fn modules() -> Modules {
        Modules::from_yaml(CONFIG).unwrap()
    }

    async fn fetch(app: Router, uri: &str) -> (StatusCode, Option<String>, String) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|x| x.to_str().ok())
            .map(str::to_string);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (
            status,
            content_type,
            String::from_utf8(bytes.to_vec()).unwrap(),
        )
    }

    fn simulated() -> Router {
        router(modules(), Collector::<DeadLink>::simulated())
    }

    #[tokio::test]
    async fn serves_simulated_exposition() {
        let (status, content_type, body) = fetch(simulated(), "/metrics?module=sdm&target=1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("text/plain"));
        assert_eq!(
            body,
            "# HELP sdm_voltage Line voltage\n\
             # TYPE sdm_voltage gauge\n\
             sdm_voltage 0\n\
             # TYPE sdm_energy counter\n\
             sdm_energy 131073\n"
        );
    }

    #[tokio::test]
    async fn missing_module_is_not_implemented() {
        let (status, _, _) = fetch(simulated(), "/metrics?target=1").await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn unknown_module_is_a_bad_request() {
        let (status, _, body) = fetch(simulated(), "/metrics?module=nope&target=1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Module not found");
    }

    #[tokio::test]
    async fn target_must_be_present_and_in_range() {
        let (status, _, body) = fetch(simulated(), "/metrics?module=sdm").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Missing target");

        for target in ["0", "248", "300", "-1", "abc", ""] {
            let uri = format!("/metrics?module=sdm&target={target}");
            let (status, _, body) = fetch(simulated(), &uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "target {target}");
            assert_eq!(body, "Invalid target id");
        }

        let (status, _, _) = fetch(simulated(), "/metrics?module=sdm&target=247").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn collection_failure_is_unavailable() {
        let app = router(modules(), Collector::new(DeadLink));
        let (status, _, body) = fetch(app, "/metrics?module=sdm&target=5").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "Failed to collect metrics");
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_scrape_still_completes_its_collection() {
        let answered = Arc::new(AtomicUsize::new(0));
        let link = SlowLink {
            answered: answered.clone(),
        };
        let app = router(modules(), Collector::new(link));

        // the scraper gives up while the first metric is still being read
        let abandoned = tokio::time::timeout(
            Duration::from_millis(500),
            fetch(app.clone(), "/metrics?module=sdm&target=1"),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(answered.load(Ordering::SeqCst), 0);

        // the next scrape waits for the abandoned collection to finish first
        let (status, _, body) = fetch(app, "/metrics?module=sdm&target=2").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("sdm_voltage 7\n"));
        assert_eq!(answered.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn misconfigured_module_is_an_internal_error() {
        let (status, _, _) = fetch(simulated(), "/metrics?module=broken&target=1").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn serves_loaded_configuration() {
        let (status, _, body) = fetch(simulated(), "/config").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(Modules::from_yaml(&body).unwrap(), modules());
    }

    #[test]
    fn parses_targets() {
        assert_eq!(parse_target(Some("1")).unwrap(), UnitId::new(1));
        assert_eq!(parse_target(Some(" 247 ")).unwrap(), UnitId::new(247));
        assert!(matches!(parse_target(None), Err(ScrapeError::MissingTarget)));
        assert!(matches!(
            parse_target(Some("248")),
            Err(ScrapeError::InvalidTarget)
        ));
    }
}
