use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::Query,
    http::StatusCode,
    routing::{get, get_service, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::services::ServeDir;

use crate::completion::Completer;
use crate::config::{
    self, validate_config, ApiType, ConfigForm, ConfigStore, KEY_PROMPTS, LANGUAGES,
};
use crate::db::{self, SqliteConfigStore, SqliteHistoryStore};
use crate::error::CompletionError;
use crate::history;
use crate::menu::{build_menu_tree, flatten_menu_tree, MenuNode};
use crate::models::{HistoryRecord, MenuClick, PromptDefinition};
use crate::prompt::{resolve_catalog, validate_overlay};
use crate::telemetry;

/**
 * \brief 启动本地 HTTP 服务，提供静态页面（配置页、历史页）与 API。
 * \param addr 监听地址，如 "127.0.0.1:5173"
 */
pub async fn run(addr: &str) -> Result<()> {
    let ui_root = std::env::var("BR1EFLY_UI_DIR").unwrap_or_else(|_| "ui/dist".to_string());
    let fallback_root =
        std::env::var("BR1EFLY_UI_FALLBACK").unwrap_or_else(|_| "web".to_string());

    let static_handler = if std::path::Path::new(&ui_root).exists() {
        ServeDir::new(ui_root)
    } else {
        ServeDir::new(fallback_root)
    }
    .append_index_html_on_directories(true);

    let app = router().fallback_service(get_service(static_handler));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Server listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/**
 * \brief API 路由表（不含静态文件）。
 */
pub fn router() -> Router {
    Router::new()
        .route("/api/completions", post(create_completion))
        .route("/api/menus", get(get_menus))
        .route("/api/menus/flat", get(get_flat_menus))
        .route("/api/prompts", get(get_prompts))
        .route("/api/prompts/validate", post(check_prompts))
        .route("/api/config", get(get_config).post(set_config))
        .route("/api/models", get(get_models))
        .route("/api/languages", get(get_languages))
        .route("/api/history", get(get_history))
        .route("/api/health", get(health_check))
}

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

#[derive(Serialize, Debug)]
struct CompletionResponse {
    result: String,
}

#[derive(Deserialize, Debug)]
struct PromptsInput {
    /** \brief 待校验的 YAML 文本 */
    #[serde(default)]
    prompts: String,
}

#[derive(Serialize, Debug)]
struct ValidationResponse {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize, Debug)]
struct ConfigResponse {
    config: ConfigForm,
    api_key_set: bool,
    telemetry_enabled: bool,
}

#[derive(Deserialize, Debug)]
struct ConfigInput {
    #[serde(flatten)]
    form: ConfigForm,
    #[serde(default)]
    telemetry_enabled: Option<bool>,
}

#[derive(Deserialize, Debug)]
struct ModelQuery {
    #[serde(default)]
    api_type: Option<String>,
}

/**
 * \brief 同步遥测开关，读取失败时保持原状态。
 */
fn sync_telemetry() {
    let enabled = db::open_db(db::LOCAL_DB_FILE)
        .and_then(|conn| {
            db::migrate(&conn)?;
            db::get_telemetry_enabled(&conn)
        })
        .unwrap_or_else(|_| telemetry::is_enabled());
    telemetry::set_enabled(enabled);
}

fn config_store() -> Result<SqliteConfigStore, (StatusCode, String)> {
    SqliteConfigStore::open_default().map_err(internal_err)
}

async fn load_prompts(store: &dyn ConfigStore) -> Result<Option<String>, (StatusCode, String)> {
    let raw = store.get(KEY_PROMPTS).await.map_err(internal_err)?;
    Ok(if raw.trim().is_empty() { None } else { Some(raw) })
}

/**
 * \brief 菜单点击入口：POST /api/completions，body 为 `{type, text, url?}`。
 */
async fn create_completion(Json(click): Json<MenuClick>) -> ApiResult<CompletionResponse> {
    sync_telemetry();
    let config = config_store()?;
    let history = SqliteHistoryStore::open_default().map_err(internal_err)?;
    let completer = Completer::new(Arc::new(config), Arc::new(history));

    match completer.run_click(&click).await {
        Ok(result) => Ok(Json(CompletionResponse { result })),
        Err(err) => {
            telemetry::log_error(
                "server.completion",
                &format!("action={} failed: {}", click.action, err),
            );
            Err(completion_err(err))
        }
    }
}

/**
 * \brief 当前菜单树；配置保存后前端重新拉取即可刷新菜单。
 */
async fn get_menus() -> ApiResult<Vec<MenuNode>> {
    let store = config_store()?;
    let prompts = load_prompts(&store).await?;
    Ok(Json(build_menu_tree(prompts.as_deref())))
}

async fn get_flat_menus() -> ApiResult<Vec<MenuNode>> {
    let store = config_store()?;
    let prompts = load_prompts(&store).await?;
    Ok(Json(flatten_menu_tree(&build_menu_tree(prompts.as_deref()))))
}

async fn get_prompts() -> ApiResult<Vec<PromptDefinition>> {
    let store = config_store()?;
    let prompts = load_prompts(&store).await?;
    Ok(Json(
        resolve_catalog(prompts.as_deref()).into_values().collect(),
    ))
}

async fn check_prompts(Json(input): Json<PromptsInput>) -> ApiResult<ValidationResponse> {
    let resp = match validate_overlay(&input.prompts) {
        Ok(_) => ValidationResponse {
            ok: true,
            error: None,
        },
        Err(e) => ValidationResponse {
            ok: false,
            error: Some(e.to_string()),
        },
    };
    Ok(Json(resp))
}

/**
 * \brief 读取配置，API Key 不回传明文。
 */
async fn get_config() -> ApiResult<ConfigResponse> {
    sync_telemetry();
    let store = config_store()?;
    let mut form = ConfigForm::load(&store).await.map_err(internal_err)?;
    let api_key_set = !form.api_key.is_empty();
    form.api_key.clear();
    Ok(Json(ConfigResponse {
        config: form,
        api_key_set,
        telemetry_enabled: telemetry::is_enabled(),
    }))
}

/**
 * \brief 校验并保存配置；校验失败返回 400。
 */
async fn set_config(Json(mut input): Json<ConfigInput>) -> ApiResult<ConfigResponse> {
    let store = config_store()?;
    // 页面拿到的是掩码后的表单，Key 留空表示沿用已保存的值
    if input.form.api_key.is_empty() {
        input.form.api_key = store.get(config::KEY_API_KEY).await.map_err(internal_err)?;
    }
    validate_config(&input.form).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    config::save_config(&store, &input.form)
        .await
        .map_err(internal_err)?;
    if let Some(enabled) = input.telemetry_enabled {
        let conn = db::open_db(db::LOCAL_DB_FILE).map_err(internal_err)?;
        db::migrate(&conn).map_err(internal_err)?;
        db::set_telemetry_enabled(&conn, enabled).map_err(internal_err)?;
        telemetry::set_enabled(enabled);
    }
    telemetry::log_event(
        "server.config",
        &format!(
            "saved api_type={} model={}",
            input.form.api_type, input.form.model
        ),
    );
    get_config().await
}

async fn get_models(Query(q): Query<ModelQuery>) -> ApiResult<Vec<&'static str>> {
    let api_type = ApiType::from_config_value(q.api_type.as_deref().unwrap_or(""));
    Ok(Json(api_type.models().to_vec()))
}

async fn get_languages() -> ApiResult<Vec<&'static str>> {
    Ok(Json(LANGUAGES.to_vec()))
}

async fn get_history() -> ApiResult<Vec<HistoryRecord>> {
    let store = SqliteHistoryStore::open_default().map_err(internal_err)?;
    let list = history::list_history(&store).await.map_err(internal_err)?;
    Ok(Json(list))
}

async fn health_check() -> ApiResult<serde_json::Value> {
    Ok(Json(serde_json::json!({
        "ok": true,
        "version": env!("CARGO_PKG_VERSION"),
    })))
}

fn completion_err(err: CompletionError) -> (StatusCode, String) {
    let status = match &err {
        e if e.is_precondition() => StatusCode::BAD_REQUEST,
        CompletionError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_GATEWAY,
    };
    (status, err.to_string())
}

fn internal_err<E: std::fmt::Display>(e: E) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}
