mod catalog;
mod ebay;
mod http;
mod images;
mod metrics;
mod models;
mod parser;
mod price_cache;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use catalog::SetCatalog;
use chrono::Utc;
use ebay::{PriceClient, PriceOutcome};
use images::ImageResolver;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{
    ApiError, EnrichRequest, EnrichResponse, FetchPriceRequest, FetchPriceResponse, UploadResponse,
};
use price_cache::PriceCache;
use serde_json::json;
use std::{net::SocketAddr, sync::Arc, time::Instant};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "poketrack.api", "server crashed: {err}");
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();
    init_tracing();

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("prom recorder");
    let state = AppState {
        catalog: Arc::new(SetCatalog::from_reference()?),
        resolver: Arc::new(ImageResolver::from_env()),
        prices: Arc::new(PriceClient::from_env()),
        cache: Arc::new(PriceCache::from_env().await),
        openapi: Arc::new(load_openapi()),
        prometheus_handle,
    };

    let app = build_router(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(3001);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "poketrack.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    catalog: Arc<SetCatalog>,
    resolver: Arc<ImageResolver>,
    prices: Arc<PriceClient>,
    cache: Arc<PriceCache>,
    openapi: Arc<serde_json::Value>,
    prometheus_handle: PrometheusHandle,
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .nest(
            "/api",
            Router::new()
                .route("/upload-cards", post(upload_cards))
                .route("/enrich-cards", post(enrich_cards))
                .route("/fetch-price", post(fetch_price))
                .route("/all-prices", get(all_prices)),
        )
        .with_state(state)
        .layer(cors_from_env())
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit_from_env()))
}

/// Liveness check.
///
/// - Method: `GET`
/// - Path: `/health`
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// Parse an uploaded want-list export.
///
/// - Method: `POST`
/// - Path: `/api/upload-cards`
/// - Body: multipart form, text content in the `file` field
/// - Response: `{ message, totalCards, cards }`
async fn upload_cards(mut multipart: Multipart) -> Result<Json<UploadResponse>, AppError> {
    metrics::inc_requests("/api/upload-cards");

    let mut content: Option<String> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::Internal(err.to_string()))?
    {
        if field.name() == Some("file") {
            let bytes = field
                .bytes()
                .await
                .map_err(|err| AppError::Internal(err.to_string()))?;
            content = Some(String::from_utf8_lossy(&bytes).into_owned());
        }
    }

    let Some(content) = content else {
        return Err(AppError::InvalidInput("No file uploaded".to_string()));
    };

    let cards = parser::parse_card_list(&content);
    info!(
        target = "poketrack.api",
        count = cards.len(),
        "parsed want list"
    );

    Ok(Json(UploadResponse {
        message: "File parsed successfully".to_string(),
        total_cards: cards.len(),
        cards,
    }))
}

/// Resolve card images for a whole batch.
///
/// - Method: `POST`
/// - Path: `/api/enrich-cards`
/// - Body: `{ cards: [CardRecord] }`
/// - Response: `{ cards: [CardRecord] }`, each augmented with `imageUrl`
///   or a `reason`; per-card failures never fail the batch.
async fn enrich_cards(
    State(state): State<AppState>,
    Json(payload): Json<EnrichRequest>,
) -> Json<EnrichResponse> {
    metrics::inc_requests("/api/enrich-cards");
    let started = Instant::now();
    let total = payload.cards.len();

    let cards = images::enrich_batch(&state.resolver, &state.catalog, payload.cards).await;

    let with_images = cards.iter().filter(|card| card.image_url.is_some()).count();
    metrics::enrich_summary(total, with_images, started.elapsed().as_millis());
    info!(
        target = "poketrack.api",
        total,
        with_images,
        missing = total - with_images,
        "image enrichment finished"
    );

    Json(EnrichResponse { cards })
}

/// Look up the average resale price for one card.
///
/// - Method: `POST`
/// - Path: `/api/fetch-price`
/// - Body: `{ card: CardRecord }`
/// - Response: `{ price }`; 429 with a distinct body when the marketplace
///   quota is exhausted.
async fn fetch_price(
    State(state): State<AppState>,
    Json(payload): Json<FetchPriceRequest>,
) -> Result<Json<FetchPriceResponse>, AppError> {
    metrics::inc_requests("/api/fetch-price");

    let Some(card) = payload.card else {
        return Err(AppError::InvalidInput("Card data required".to_string()));
    };

    let query = ebay::price::build_search_query(&card);
    info!(
        target = "poketrack.api",
        name = %card.name,
        set = %card.set,
        number = %card.number,
        "price lookup requested"
    );

    if let Some(price) = state.cache.get(&query).await {
        info!(target = "poketrack.api", query = %query, "price served from cache");
        return Ok(Json(FetchPriceResponse { price }));
    }

    if !state.cache.allow_remote(&query).await {
        return Err(AppError::DuplicateLookup);
    }

    match state.prices.fetch_query(&query).await {
        PriceOutcome::QuotaExceeded => Err(AppError::QuotaExceeded),
        outcome => {
            let price = outcome.render();
            if outcome.is_cacheable() {
                state.cache.insert(&query, &price).await;
            }
            Ok(Json(FetchPriceResponse { price }))
        }
    }
}

/// Dump the full price cache.
///
/// - Method: `GET`
/// - Path: `/api/all-prices`
async fn all_prices(State(state): State<AppState>) -> Json<serde_json::Value> {
    metrics::inc_requests("/api/all-prices");
    Json(json!(state.cache.snapshot().await))
}

async fn openapi_json(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    if let Ok(key) = std::env::var("OPENAPI_KEY") {
        let presented = headers
            .get("X-Docs-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != key {
            return Err(AppError::InvalidInput("unauthorized".to_string()));
        }
    }
    Ok(Json((*state.openapi).clone()))
}

async fn swagger_ui() -> axum::http::Response<String> {
    let html = r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Poketrack API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#;
    axum::http::Response::builder()
        .header("Content-Type", "text/html; charset=utf-8")
        .body(html.to_string())
        .unwrap()
}

async fn metrics_endpoint(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> axum::http::Response<String> {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return axum::http::Response::builder()
                .status(StatusCode::UNAUTHORIZED)
                .body("unauthorized".into())
                .unwrap();
        }
    }
    let body = state.prometheus_handle.render();
    axum::http::Response::builder()
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(body)
        .unwrap()
}

#[derive(Debug)]
enum AppError {
    InvalidInput(String),
    QuotaExceeded,
    DuplicateLookup,
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, payload) = match self {
            AppError::InvalidInput(message) => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    error: message,
                    message: None,
                },
            ),
            AppError::QuotaExceeded => (
                StatusCode::TOO_MANY_REQUESTS,
                ApiError {
                    error: "RATE_LIMIT_EXCEEDED".to_string(),
                    message: Some(
                        "eBay API rate limit reached. Please try again tomorrow.".to_string(),
                    ),
                },
            ),
            AppError::DuplicateLookup => (
                StatusCode::TOO_MANY_REQUESTS,
                ApiError {
                    error: "DUPLICATE_LOOKUP".to_string(),
                    message: Some(
                        "Identical lookup attempted too quickly. Retry in a few seconds."
                            .to_string(),
                    ),
                },
            ),
            AppError::Internal(detail) => {
                error!(target = "poketrack.api", error = %detail, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError {
                        error: "Internal server error".to_string(),
                        message: None,
                    },
                )
            }
        };
        (status, Json(payload)).into_response()
    }
}

fn load_openapi() -> serde_json::Value {
    serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
        .unwrap_or(serde_json::json!({"openapi": "3.0.3"}))
}

fn cors_from_env() -> CorsLayer {
    let layer = CorsLayer::new().allow_headers(Any).allow_methods(Any);
    let origins: Vec<_> = std::env::var("ALLOWED_ORIGINS")
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .filter_map(|origin| origin.parse().ok())
                .collect()
        })
        .unwrap_or_default();
    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(origins))
    }
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(50 * 1024 * 1024)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use crate::ebay::{BrowseClient, CredentialCache};
    use std::time::Duration;
    use tower::ServiceExt;

    async fn test_state(api_base: &str, cache_dir: &tempfile::TempDir) -> AppState {
        let cache = PriceCache::load(cache_dir.path().join("price_cache.json"), Duration::ZERO).await;
        AppState {
            catalog: Arc::new(SetCatalog::from_reference().expect("catalog")),
            resolver: Arc::new(ImageResolver::with_base_url(api_base)),
            prices: Arc::new(PriceClient::new(
                BrowseClient::new(api_base, "EBAY_FR", "contextualLocation=country=FR"),
                CredentialCache::new(
                    format!("{api_base}/identity/v1/oauth2/token"),
                    "app",
                    "secret",
                    Duration::from_secs(3600),
                ),
                3,
                Duration::ZERO,
            )),
            cache: Arc::new(cache),
            openapi: Arc::new(load_openapi()),
            prometheus_handle: PrometheusBuilder::new().build_recorder().handle(),
        }
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    fn multipart_body(field: &str, content: &str) -> (String, String) {
        let boundary = "poketrack-test-boundary";
        let body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"cards.txt\"\r\nContent-Type: text/plain\r\n\r\n{content}\r\n--{boundary}--\r\n"
        );
        (
            format!("multipart/form-data; boundary={boundary}"),
            body,
        )
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = build_router(test_state("http://127.0.0.1:1", &dir).await);
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn upload_parses_want_list() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = build_router(test_state("http://127.0.0.1:1", &dir).await);
        let (content_type, body) =
            multipart_body("file", "[u]Base Set[/u]\n:rare: 4/102 Charizard\n");
        let response = app
            .oneshot(
                Request::post("/api/upload-cards")
                    .header("content-type", content_type)
                    .body(Body::from(body))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["totalCards"], 1);
        assert_eq!(body["cards"][0]["name"], "Charizard");
        assert_eq!(body["cards"][0]["rarity"], "Rare");
        assert!(body["cards"][0]["imageUrl"].is_null());
    }

    #[tokio::test]
    async fn upload_without_file_field_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = build_router(test_state("http://127.0.0.1:1", &dir).await);
        let (content_type, body) = multipart_body("other", "whatever");
        let response = app
            .oneshot(
                Request::post("/api/upload-cards")
                    .header("content-type", content_type)
                    .body(Body::from(body))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "No file uploaded");
    }

    #[tokio::test]
    async fn fetch_price_requires_card() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = build_router(test_state("http://127.0.0.1:1", &dir).await);
        let response = app
            .oneshot(
                Request::post("/api/fetch-price")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "Card data required");
    }

    fn card_payload(name: &str, number: &str) -> String {
        serde_json::json!({
            "card": {
                "set": "Base Set",
                "setCode": "BS",
                "setImageUrl": null,
                "number": number,
                "name": name,
                "rarity": "Holo",
                "imageUrl": null,
                "price": null,
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn fetch_price_serves_cached_entry_without_network() {
        let dir = tempfile::tempdir().expect("tempdir");
        // unroutable API base: any network attempt would settle as "Erreur"
        let app = build_router(test_state("http://127.0.0.1:1", &dir).await);
        let response = app
            .oneshot(
                Request::post("/api/fetch-price")
                    .header("content-type", "application/json")
                    .body(Body::from(card_payload("Dracaufeu", "4/102")))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["price"], "321.74 €");
    }

    #[tokio::test]
    async fn fetch_price_maps_quota_to_429() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/identity/v1/oauth2/token")
            .with_status(200)
            .with_body(r#"{"access_token":"tok","expires_in":7200}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/buy/browse/v1/item_summary/search")
            .match_query(mockito::Matcher::Any)
            .with_status(429)
            .create_async()
            .await;
        let dir = tempfile::tempdir().expect("tempdir");
        let app = build_router(test_state(&server.url(), &dir).await);

        let response = app
            .oneshot(
                Request::post("/api/fetch-price")
                    .header("content-type", "application/json")
                    .body(Body::from(card_payload("Zekrom", "50/114")))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = body_json(response).await;
        assert_eq!(body["error"], "RATE_LIMIT_EXCEEDED");
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn fetch_price_stores_fresh_result() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/identity/v1/oauth2/token")
            .with_status(200)
            .with_body(r#"{"access_token":"tok","expires_in":7200}"#)
            .create_async()
            .await;
        let search = server
            .mock("GET", "/buy/browse/v1/item_summary/search")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"{"itemSummaries":[{"price":{"value":"12.00","currency":"EUR"}}]}"#)
            .expect(1)
            .create_async()
            .await;
        let dir = tempfile::tempdir().expect("tempdir");
        let state = test_state(&server.url(), &dir).await;
        let app = build_router(state.clone());

        let request = |app: Router| async move {
            app.oneshot(
                Request::post("/api/fetch-price")
                    .header("content-type", "application/json")
                    .body(Body::from(card_payload("Reshiram", "26/114")))
                    .expect("request"),
            )
            .await
            .expect("response")
        };

        let first = request(app.clone()).await;
        assert_eq!(body_json(first).await["price"], "12.00 €");
        // second call must come out of the cache, not the marketplace
        let second = request(app).await;
        assert_eq!(body_json(second).await["price"], "12.00 €");
        search.assert_async().await;
    }

    #[tokio::test]
    async fn enrich_endpoint_keeps_already_resolved_cards() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = build_router(test_state("http://127.0.0.1:1", &dir).await);
        let payload = serde_json::json!({
            "cards": [{
                "set": "Base Set",
                "setCode": "BS",
                "setImageUrl": null,
                "number": "4/102",
                "name": "Charizard",
                "rarity": "Holo",
                "imageUrl": "https://images.example/base1/4_hires.png",
                "price": null,
            }]
        });
        let response = app
            .oneshot(
                Request::post("/api/enrich-cards")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(
            body["cards"][0]["imageUrl"],
            "https://images.example/base1/4_hires.png"
        );
    }

    #[tokio::test]
    async fn all_prices_dumps_cache() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = build_router(test_state("http://127.0.0.1:1", &dir).await);
        let response = app
            .oneshot(
                Request::get("/api/all-prices")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["pokemon Dracaufeu 4 102"], "321.74 €");
    }
}
