//! REST API for the load planner.
//!
//! Provides HTTP endpoints for planning container loads from order lines.
//! Uses Axum as the web framework and supports CORS.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Json, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{
    Router,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::OnceLock;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};
use utoipa::{OpenApi, ToSchema};

use crate::config::{ApiConfig, PlannerConfig};
use crate::engine::{
    EngineError, PackingConfig, PackingResult, PlanEvent, TerminationReason,
    plan_containers_with_config, plan_containers_with_progress,
};
use crate::intake::{IntakeError, OrderLine, expand_orders};
use crate::model::{Container, Item, ValidationError};
use crate::report::{PlanSummary, ProductSummary};
use crate::selector::{CancelToken, SearchStats, SelectionError, StrategyKind};

#[derive(Clone)]
pub struct ApiState {
    planner_config: PlannerConfig,
}

impl ApiState {
    pub fn new(planner_config: PlannerConfig) -> Self {
        Self { planner_config }
    }
}

static OPENAPI_DOC: OnceLock<utoipa::openapi::OpenApi> = OnceLock::new();

// SRI hashes verified against https://unpkg.com/swagger-ui-dist@5.17.14/ on 2025-10-29.
const SWAGGER_UI_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
    <head>
        <meta charset="utf-8" />
        <title>coil-load-planner API Docs</title>
        <link
            rel="stylesheet"
            href="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui.css"
            integrity="sha384-wxLW6kwyHktdDGr6Pv1zgm/VGJh99lfUbzSn6HNHBENZlCN7W602k9VkGdxuFvPn"
            crossorigin="anonymous"
        />
    </head>
    <body>
        <div id="swagger-ui"></div>
        <script
            src="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui-bundle.js"
            integrity="sha384-wmyclcVGX/WhUkdkATwhaK1X1JtiNrr2EoYJ+diV3vj4v6OC5yCeSu+yW13SYJep"
            crossorigin="anonymous"
        ></script>
        <script
            src="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui-standalone-preset.js"
            integrity="sha384-2YH8WDRaj7V2OqU/trsmzSagmk/E2SutiCsGkdgoQwC9pNUJV1u/141DHB6jgs8t"
            crossorigin="anonymous"
        ></script>
        <script>
            window.onload = function () {
                const ui = SwaggerUIBundle({
                    url: "/docs/openapi.json",
                    dom_id: "#swagger-ui",
                    presets: [SwaggerUIBundle.presets.apis, SwaggerUIStandalonePreset],
                    layout: "StandaloneLayout",
                });
                window.ui = ui;
            };
        </script>
    </body>
    </html>"##;

fn openapi_doc() -> &'static utoipa::openapi::OpenApi {
    OPENAPI_DOC.get_or_init(ApiDoc::openapi)
}

/// Optional per-request overrides of the configured planner settings.
#[derive(Deserialize, Clone, Debug, Default, ToSchema)]
#[serde(default)]
pub struct PlanParameters {
    #[schema(nullable = true)]
    pub max_container_weight: Option<f64>,
    #[schema(nullable = true)]
    pub min_acceptable_weight: Option<f64>,
    #[schema(nullable = true)]
    pub max_paired_length: Option<f64>,
    #[schema(nullable = true)]
    pub max_bottom_slots: Option<usize>,
    #[schema(nullable = true)]
    pub max_top_slots: Option<usize>,
    /// `0` disables the target.
    #[schema(nullable = true)]
    pub target_container_count: Option<usize>,
    #[schema(nullable = true)]
    pub height_score_weight: Option<f64>,
    #[schema(nullable = true)]
    pub weight_score_weight: Option<f64>,
    #[schema(nullable = true)]
    pub strategy: Option<StrategyKind>,
    #[schema(nullable = true)]
    pub search_node_limit: Option<u64>,
    #[schema(nullable = true)]
    pub parallel: Option<bool>,
}

impl PlanParameters {
    /// Applies the overrides on top of `base`.
    fn apply(&self, base: PackingConfig) -> PackingConfig {
        let mut config = base;
        if let Some(value) = self.max_container_weight {
            config.max_container_weight = value;
        }
        if let Some(value) = self.min_acceptable_weight {
            config.min_acceptable_weight = value;
        }
        if let Some(value) = self.max_paired_length {
            config.max_paired_length = value;
        }
        if let Some(value) = self.max_bottom_slots {
            config.max_bottom_slots = value;
        }
        if let Some(value) = self.max_top_slots {
            config.max_top_slots = value;
        }
        if let Some(value) = self.target_container_count {
            config.target_container_count = (value > 0).then_some(value);
        }
        if let Some(value) = self.height_score_weight {
            config.height_score_weight = value;
        }
        if let Some(value) = self.weight_score_weight {
            config.weight_score_weight = value;
        }
        if let Some(value) = self.strategy {
            config.strategy = value;
        }
        if let Some(value) = self.search_node_limit {
            config.search_node_limit = value;
        }
        if let Some(value) = self.parallel {
            config.parallel = value;
        }
        config
    }
}

#[derive(Deserialize, ToSchema)]
#[schema(
    example = json!({
        "orders": [
            { "product_code": "HRC/2.0/1000", "order_weight": 11500.0 },
            { "product_code": "HRC/3.0/1500", "order_weight": 17250.0 }
        ],
        "parameters": { "strategy": "bounded", "target_container_count": 0 }
    })
)]
pub struct PlanRequest {
    pub orders: Vec<OrderLine>,
    #[serde(default)]
    #[schema(nullable = true)]
    pub parameters: Option<PlanParameters>,
}

#[derive(Debug)]
struct ValidatedPlanRequest {
    orders: Vec<OrderLine>,
    items: Vec<Item>,
    config: PackingConfig,
}

#[derive(Debug)]
enum PlanRequestValidationError {
    MissingOrders,
    InvalidOrder(IntakeError),
    InvalidParameters(ValidationError),
}

impl PlanRequest {
    fn into_validated(
        self,
        base: PackingConfig,
        max_items: usize,
    ) -> Result<ValidatedPlanRequest, PlanRequestValidationError> {
        if self.orders.is_empty() {
            return Err(PlanRequestValidationError::MissingOrders);
        }

        let config = match &self.parameters {
            Some(parameters) => parameters.apply(base),
            None => base,
        };
        config
            .validate()
            .map_err(PlanRequestValidationError::InvalidParameters)?;

        let items = expand_orders(&self.orders, max_items)
            .map_err(PlanRequestValidationError::InvalidOrder)?;

        Ok(ValidatedPlanRequest {
            orders: self.orders,
            items,
            config,
        })
    }
}

/// Response with all planned containers and the remaining coils.
#[derive(Serialize, ToSchema)]
pub struct PlanResponse {
    pub containers: Vec<PlannedContainer>,
    pub leftover: Vec<PlannedItem>,
    pub is_complete: bool,
    pub termination: TerminationReason,
    pub summary: PlanSummary,
    pub stats: SearchStats,
}

/// Single container with both tiers in pairing order.
///
/// # Fields
/// * `id` - Container number (1-based)
/// * `label` - Report heading with the rounded total weight
/// * `paired_heights` - Combined length of each bottom/top pair
#[derive(Serialize, ToSchema)]
pub struct PlannedContainer {
    pub id: usize,
    pub label: String,
    pub total_weight: f64,
    pub score: f64,
    pub bottom: Vec<PlannedItem>,
    pub top: Vec<PlannedItem>,
    pub paired_heights: Vec<f64>,
}

#[derive(Serialize, ToSchema)]
pub struct PlannedItem {
    pub id: usize,
    pub product_code: String,
    pub length: f64,
    pub weight: f64,
    pub top_eligible: bool,
}

impl From<&Item> for PlannedItem {
    fn from(item: &Item) -> Self {
        Self {
            id: item.id().0,
            product_code: item.product_id().to_string(),
            length: item.length(),
            weight: item.weight(),
            top_eligible: item.is_top_eligible(),
        }
    }
}

impl From<&Container> for PlannedContainer {
    fn from(container: &Container) -> Self {
        Self {
            id: container.number,
            label: container.label(),
            total_weight: container.total_weight,
            score: container.score,
            bottom: container.bottom.iter().map(PlannedItem::from).collect(),
            top: container.top.iter().map(PlannedItem::from).collect(),
            paired_heights: container.paired_heights(),
        }
    }
}

impl PlanResponse {
    /// Creates a PlanResponse from a PackingResult.
    pub fn from_packing_result(orders: &[OrderLine], result: &PackingResult) -> Self {
        Self {
            containers: result.containers.iter().map(PlannedContainer::from).collect(),
            leftover: result.leftover.iter().map(PlannedItem::from).collect(),
            is_complete: result.is_complete(),
            termination: result.termination,
            summary: PlanSummary::from_result(orders, result),
            stats: result.stats,
        }
    }
}

#[derive(Serialize, ToSchema)]
struct ErrorResponse {
    error: String,
    details: String,
}

impl ErrorResponse {
    fn new(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: details.into(),
        }
    }
}

fn error_response(
    status: StatusCode,
    error: impl Into<String>,
    details: impl Into<String>,
) -> Response {
    (status, Json(ErrorResponse::new(error, details))).into_response()
}

fn json_deserialize_error(err: JsonRejection) -> Response {
    error_response(
        StatusCode::UNPROCESSABLE_ENTITY,
        "Invalid JSON data",
        err.to_string(),
    )
}

fn validation_error(details: impl Into<String>) -> Response {
    error_response(
        StatusCode::UNPROCESSABLE_ENTITY,
        "Invalid input data",
        details,
    )
}

fn parameter_error(details: impl Into<String>) -> Response {
    error_response(
        StatusCode::UNPROCESSABLE_ENTITY,
        "Invalid planning parameters",
        details,
    )
}

fn engine_error(err: EngineError) -> Response {
    match err {
        EngineError::Selection(SelectionError::SearchSpaceTooLarge { .. }) => error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            "Search space too large",
            err.to_string(),
        ),
        EngineError::InvalidConfiguration(_) => parameter_error(err.to_string()),
        other => {
            error!(error = %other, "planning failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Planning failed",
                other.to_string(),
            )
        }
    }
}

fn parse_plan_request(
    state: &ApiState,
    payload: Result<Json<PlanRequest>, JsonRejection>,
) -> Result<ValidatedPlanRequest, Response> {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(err) => return Err(json_deserialize_error(err)),
    };

    match payload.into_validated(
        state.planner_config.packing_config(),
        state.planner_config.max_request_items(),
    ) {
        Ok(validated) => Ok(validated),
        Err(PlanRequestValidationError::MissingOrders) => Err(validation_error(
            "At least one order line must be specified",
        )),
        Err(PlanRequestValidationError::InvalidOrder(err)) => Err(validation_error(err.to_string())),
        Err(PlanRequestValidationError::InvalidParameters(err)) => {
            Err(parameter_error(err.to_string()))
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(handle_plan, handle_plan_stream),
    components(
        schemas(
            PlanRequest,
            PlanParameters,
            OrderLine,
            StrategyKind,
            PlanResponse,
            PlannedContainer,
            PlannedItem,
            PlanSummary,
            ProductSummary,
            TerminationReason,
            SearchStats,
            ErrorResponse
        )
    ),
    tags((name = "planning", description = "Endpoints for container load planning"))
)]
struct ApiDoc;

/// Builds the router with all endpoints and the CORS layer.
pub fn build_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        .route("/plan", post(handle_plan))
        .route("/plan_stream", post(handle_plan_stream))
        .route("/docs/openapi.json", get(serve_openapi_json))
        .route("/docs", get(serve_openapi_ui))
        .layer(cors)
        .with_state(state)
}

/// Starts the API server.
///
/// Blocks until the server is terminated.
pub async fn start_api_server(
    config: ApiConfig,
    planner_config: PlannerConfig,
) -> std::io::Result<()> {
    let app = build_router(ApiState::new(planner_config));

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!(
        "Server running on http://{}:{}",
        config.display_host(),
        config.port()
    );
    if config.binds_to_all_interfaces() {
        info!("Local access: http://localhost:{}", config.port());
    }
    info!("API endpoints: POST /plan, POST /plan_stream");
    info!("Documentation: GET /docs, GET /docs/openapi.json");

    axum::serve(listener, app).await
}

/// Handler for POST /plan endpoint.
///
/// Expands the order lines into coils and plans containers for them.
///
/// # Parameters
/// * `payload` - JSON payload with order lines and optional parameters
///
/// # Returns
/// JSON response with the planned containers, leftover coils and a summary
#[utoipa::path(
    post,
    path = "/plan",
    request_body = PlanRequest,
    responses(
        (status = 200, description = "Containers planned", body = PlanResponse),
        (
            status = UNPROCESSABLE_ENTITY,
            description = "Invalid orders or planning parameters",
            body = ErrorResponse
        )
    ),
    tag = "planning"
)]
async fn handle_plan(
    State(state): State<ApiState>,
    payload: Result<Json<PlanRequest>, JsonRejection>,
) -> Response {
    let request = match parse_plan_request(&state, payload) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let ValidatedPlanRequest {
        orders,
        items,
        config,
    } = request;
    info!(
        orders = orders.len(),
        items = items.len(),
        strategy = %config.strategy,
        "new plan request"
    );

    let outcome =
        tokio::task::spawn_blocking(move || plan_containers_with_config(items, config)).await;
    let result = match outcome {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => return engine_error(err),
        Err(err) => {
            error!(error = %err, "planning task failed");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Planning failed",
                err.to_string(),
            );
        }
    };
    info!(
        containers = result.container_count(),
        leftover = result.leftover_count(),
        termination = result.termination.code(),
        "plan finished"
    );

    let response = PlanResponse::from_packing_result(&orders, &result);
    (StatusCode::OK, Json(response)).into_response()
}

/// Handler for POST /plan_stream endpoint (SSE).
///
/// Streams plan events as Server-Sent Events (text/event-stream). The search
/// is cancelled once the client disconnects.
#[utoipa::path(
    post,
    path = "/plan_stream",
    request_body = PlanRequest,
    responses(
        (
            status = 200,
            description = "Streams plan events in real-time",
            content_type = "text/event-stream",
            body = String
        ),
        (
            status = UNPROCESSABLE_ENTITY,
            description = "Invalid orders or planning parameters",
            body = ErrorResponse
        )
    ),
    tag = "planning"
)]
async fn handle_plan_stream(
    State(state): State<ApiState>,
    payload: Result<Json<PlanRequest>, JsonRejection>,
) -> Response {
    let request = match parse_plan_request(&state, payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let ValidatedPlanRequest { items, config, .. } = request;

    let (tx, rx) = mpsc::channel::<String>(32);

    tokio::task::spawn_blocking(move || {
        let _ = stream_plan(items, config, &tx);
    });

    let stream = ReceiverStream::new(rx)
        .map(|msg| Ok::<_, std::convert::Infallible>(Event::default().data(msg)));
    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(std::time::Duration::from_secs(10))
                .text("keep-alive"),
        )
        .into_response()
}

/// Plans on the calling (blocking) thread and forwards every event to `tx`.
///
/// The search is cancelled as soon as the receiving side is gone. Engine
/// errors are forwarded as an `Error` event.
fn stream_plan(
    items: Vec<Item>,
    config: PackingConfig,
    tx: &mpsc::Sender<String>,
) -> Result<PackingResult, EngineError> {
    let cancel = CancelToken::new();
    let on_event = |event: &PlanEvent| {
        if let Ok(json) = serde_json::to_string(event) {
            if tx.blocking_send(json).is_err() {
                // Receiver has closed the stream.
                cancel.cancel();
            }
        }
    };
    let result = plan_containers_with_progress(items, config, Some(&cancel), on_event);
    if let Err(err) = &result {
        warn!(error = %err, "streamed planning failed");
        let payload = json!({ "type": "Error", "error": err.to_string() }).to_string();
        let _ = tx.blocking_send(payload);
    }
    result
}

async fn serve_openapi_json(State(_state): State<ApiState>) -> impl IntoResponse {
    Json(openapi_doc())
}

async fn serve_openapi_ui(State(_state): State<ApiState>) -> impl IntoResponse {
    Html(SWAGGER_UI_HTML)
}
