//! HTTP 服务器模块

use crate::assembler::RecordAssembler;
use crate::batch::BatchCoordinator;
use crate::client::PlatformClient;
use crate::prediction::PredictionClient;
use crate::state::{SharedState, VideoRecord};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// 路由共享的上下文
pub struct AppContext {
    pub state: Arc<SharedState>,
    pub client: Arc<PlatformClient>,
    pub coordinator: Arc<BatchCoordinator<PlatformClient>>,
    pub max_concurrency: usize,
    predictor: RwLock<Option<Arc<PredictionClient>>>,
}

impl AppContext {
    pub fn new(
        state: Arc<SharedState>,
        client: Arc<PlatformClient>,
        predictor: Option<PredictionClient>,
        max_concurrency: usize,
    ) -> Self {
        let assembler = Arc::new(RecordAssembler::new(Arc::clone(&client)));
        Self {
            state,
            client,
            coordinator: Arc::new(BatchCoordinator::new(assembler)),
            max_concurrency,
            predictor: RwLock::new(predictor.map(Arc::new)),
        }
    }

    pub fn predictor(&self) -> Option<Arc<PredictionClient>> {
        self.predictor.read().clone()
    }

    /// 替换预测服务，`None` 表示关闭
    pub fn set_predictor(&self, predictor: Option<PredictionClient>) {
        *self.predictor.write() = predictor.map(Arc::new);
    }
}

type AppState = Arc<AppContext>;

#[derive(Debug, Deserialize)]
struct AddVideoRequest {
    bvid: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RefreshRequest {
    #[serde(default)]
    bvids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CookieRequest {
    cookie: String,
}

#[derive(Debug, Deserialize)]
struct ViewsightRequest {
    #[serde(default)]
    viewsight_server_url: String,
}

pub fn build_router(ctx: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/videos", get(list_videos_handler).post(add_video_handler))
        .route("/api/videos/refresh", post(refresh_handler))
        .route("/api/videos/{bvid}", delete(delete_video_handler))
        .route("/api/videos/{bvid}/prediction", get(video_prediction_handler))
        .route("/api/config", get(config_handler))
        .route("/api/config/cookie", put(cookie_handler))
        .route(
            "/api/config/viewsight",
            get(get_viewsight_handler).post(update_viewsight_handler),
        )
        .route("/api/predict/{bvid}", get(predict_handler))
        .route("/progress", get(progress_handler))
        .route("/status", get(progress_handler))
        .layer(cors)
        .with_state(ctx)
}

/// 启动 HTTP 服务器
pub async fn run_server(
    ctx: AppState,
    host: &str,
    port: u16,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = build_router(ctx);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("[bili] HTTP server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn no_store<T: IntoResponse>(status: StatusCode, body: T) -> Response {
    (status, [(header::CACHE_CONTROL, "no-store")], body).into_response()
}

/// 已跟踪的视频列表
async fn list_videos_handler(State(ctx): State<AppState>) -> Response {
    let mut response = no_store(StatusCode::OK, Json(ctx.state.list_videos()));

    let last_modified = ctx.state.last_modified();
    if !last_modified.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&last_modified) {
            response.headers_mut().insert(header::LAST_MODIFIED, value);
        }
    }

    response
}

/// 新增视频：立即抓取一次
async fn add_video_handler(
    State(ctx): State<AppState>,
    Json(request): Json<AddVideoRequest>,
) -> Response {
    let bvid = match request.bvid.map(|b| b.trim().to_string()) {
        Some(bvid) if !bvid.is_empty() => bvid,
        _ => return json_error(StatusCode::BAD_REQUEST, "缺少视频BV号"),
    };

    if ctx.state.contains(&bvid) {
        return json_error(StatusCode::CONFLICT, format!("视频 {} 已存在", bvid));
    }

    let record = match ctx.coordinator.assembler().assemble(&bvid).await {
        Ok(record) => record,
        Err(e) => {
            warn!("[bili] add video {} failed: {}", bvid, e);
            return json_error(StatusCode::BAD_GATEWAY, format!("获取视频 {} 信息失败", bvid));
        }
    };

    match ctx.state.insert_new(record) {
        Some(record) => (StatusCode::CREATED, Json(record)).into_response(),
        None => json_error(StatusCode::CONFLICT, format!("视频 {} 已存在", bvid)),
    }
}

async fn delete_video_handler(
    State(ctx): State<AppState>,
    Path(bvid): Path<String>,
) -> Response {
    match ctx.state.remove(&bvid) {
        Some(_) => Json(json!({ "message": format!("视频 {} 已删除", bvid) })).into_response(),
        None => json_error(StatusCode::NOT_FOUND, format!("视频 {} 不存在", bvid)),
    }
}

/// 刷新指定视频，未指定时刷新全部已跟踪视频
async fn refresh_handler(State(ctx): State<AppState>, body: Bytes) -> Response {
    let request: RefreshRequest = if body.is_empty() {
        RefreshRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(e) => return json_error(StatusCode::BAD_REQUEST, format!("invalid body: {}", e)),
        }
    };

    let bvids = if request.bvids.is_empty() {
        ctx.state.tracked_ids()
    } else {
        request.bvids
    };

    if bvids.is_empty() {
        return Json(json!({ "message": "没有需要刷新的视频", "videos": [] })).into_response();
    }

    let Some(updated) = refresh_batch(&ctx, &bvids).await else {
        return json_error(StatusCode::CONFLICT, "refresh already in progress");
    };

    Json(json!({
        "message": format!("成功刷新 {}/{} 个视频", updated.len(), bvids.len()),
        "videos": updated,
    }))
    .into_response()
}

/// 批量抓取并写回共享状态，已有刷新在进行时返回 `None`
pub async fn refresh_batch(ctx: &AppContext, bvids: &[String]) -> Option<Vec<VideoRecord>> {
    let records = ctx
        .coordinator
        .process_batch_tracked(bvids, ctx.max_concurrency, &ctx.state)
        .await?;
    Some(
        records
            .into_iter()
            .map(|record| ctx.state.upsert(record))
            .collect(),
    )
}

/// 当前配置，不回显 Cookie 内容
async fn config_handler(State(ctx): State<AppState>) -> Response {
    Json(json!({
        "bilibili_cookie_configured": ctx.client.cookie().is_some(),
        "viewsight_server_url": ctx.predictor().map(|p| p.server_url().to_string()),
        "max_concurrency": ctx.max_concurrency,
    }))
    .into_response()
}

async fn cookie_handler(
    State(ctx): State<AppState>,
    Json(request): Json<CookieRequest>,
) -> Response {
    ctx.client.set_credential_cookie(&request.cookie);
    info!("[bili] credential cookie updated");
    Json(json!({ "message": "cookie updated" })).into_response()
}

async fn get_viewsight_handler(State(ctx): State<AppState>) -> Response {
    Json(json!({
        "viewsight_server_url": ctx.predictor().map(|p| p.server_url().to_string()),
    }))
    .into_response()
}

/// 运行时更换预测服务地址，空串表示关闭
async fn update_viewsight_handler(
    State(ctx): State<AppState>,
    Json(request): Json<ViewsightRequest>,
) -> Response {
    let url = request.viewsight_server_url.trim();
    if url.is_empty() {
        ctx.set_predictor(None);
        info!("[predict] prediction service disabled");
        return Json(json!({ "message": "预测服务已关闭" })).into_response();
    }

    match PredictionClient::new(url) {
        Ok(predictor) => {
            info!("[predict] prediction service set to {}", predictor.server_url());
            ctx.set_predictor(Some(predictor));
            Json(json!({ "message": "预测服务配置已更新" })).into_response()
        }
        Err(e) => {
            warn!("[predict] failed to build prediction client: {}", e);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, format!("预测服务配置失败: {}", e))
        }
    }
}

async fn predict_handler(State(ctx): State<AppState>, Path(bvid): Path<String>) -> Response {
    predict_response(&ctx, &bvid).await
}

/// 只为已跟踪的视频做预测
async fn video_prediction_handler(
    State(ctx): State<AppState>,
    Path(bvid): Path<String>,
) -> Response {
    if !ctx.state.contains(&bvid) {
        return json_error(StatusCode::NOT_FOUND, format!("未找到视频 {}", bvid));
    }
    predict_response(&ctx, &bvid).await
}

async fn predict_response(ctx: &AppContext, bvid: &str) -> Response {
    let Some(predictor) = ctx.predictor() else {
        return json_error(StatusCode::SERVICE_UNAVAILABLE, "prediction service not configured");
    };

    let cookie = ctx.client.cookie();
    match predictor.predict(bvid, cookie.as_deref()).await {
        Ok(prediction) => Json(prediction).into_response(),
        Err(e) => {
            warn!("[predict] prediction for {} failed: {}", bvid, e);
            json_error(StatusCode::BAD_GATEWAY, format!("预测视频播放量失败: {}", e))
        }
    }
}

/// 进度接口处理
async fn progress_handler(State(ctx): State<AppState>) -> Response {
    no_store(StatusCode::OK, Json(ctx.state.get_progress()))
}
