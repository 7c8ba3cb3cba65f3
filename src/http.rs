//! Optional HTTP dashboard (§4.8, §10.5): a static page, `GET /api/state`
//! serving the latest live-state snapshot, and — in "web prompt" mode —
//! `POST /api/start` to kick off a run exactly once.

use anyhow::Result;

use crate::RunTemplate;

#[cfg(feature = "web")]
pub fn serve(template: RunTemplate, task: String, run_id: String, port: u16) -> Result<i32> {
    web::serve(template, task, run_id, port)
}

#[cfg(not(feature = "web"))]
pub fn serve(_template: RunTemplate, _task: String, _run_id: String, _port: u16) -> Result<i32> {
    anyhow::bail!("crewctl was built without the 'web' feature; rerun with --ui tui, or rebuild with the 'web' feature")
}

#[cfg(feature = "web")]
mod web {
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::{Html, IntoResponse};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::Value;

    use crate::error::OrchestratorError;
    use crate::RunTemplate;

    const INDEX_HTML: &str = include_str!("dashboard.html");

    struct AppState {
        template: RunTemplate,
        active_coord_root: Mutex<Option<PathBuf>>,
        started: Mutex<bool>,
    }

    /// Serve the dashboard until the process is killed. In "web prompt" mode
    /// (empty `task`) the run does not start — and the planner does not run —
    /// until a client posts a task via `/api/start`; otherwise it starts
    /// immediately in the background against a freshly built [`RunConfig`].
    pub fn serve(template: RunTemplate, task: String, run_id: String, port: u16) -> anyhow::Result<i32> {
        let have_task = !task.is_empty();
        let state = Arc::new(AppState {
            template,
            active_coord_root: Mutex::new(None),
            started: Mutex::new(have_task),
        });

        if have_task {
            let run_config = state.template.build(task, run_id)?;
            *state.active_coord_root.lock().unwrap_or_else(std::sync::PoisonError::into_inner) =
                Some(run_config.coord_root.clone());
            spawn_run(run_config);
        }

        let runtime = tokio::runtime::Builder::new_current_thread().enable_io().enable_time().build()?;

        runtime.block_on(async move {
            let app = Router::new()
                .route("/", get(index))
                .route("/api/state", get(api_state))
                .route("/api/start", post(api_start))
                .with_state(state);

            let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
                .await
                .map_err(|e| OrchestratorError::HttpBindFailed { port, detail: e.to_string() })?;
            axum::serve(listener, app).await?;
            Ok(0)
        })
    }

    fn spawn_run(run_config: crew_core::RunConfig) {
        std::thread::spawn(move || {
            let _ = crew_core::run_ticket(&run_config);
        });
    }

    async fn index() -> Html<&'static str> {
        Html(INDEX_HTML)
    }

    async fn api_state(State(state): State<Arc<AppState>>) -> impl IntoResponse {
        let guard = state.active_coord_root.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(coord_root) = guard.clone() else {
            return (StatusCode::OK, Json(serde_json::json!({"overallState": "AWAITING_TASK"}))).into_response();
        };
        drop(guard);

        let path = coord_root.join("live-state.json");
        match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<Value>(&text) {
                Ok(value) => (StatusCode::OK, Json(value)).into_response(),
                Err(_) => {
                    (StatusCode::OK, Json(serde_json::json!({"error": "snapshot is not valid JSON"}))).into_response()
                }
            },
            Err(_) => (StatusCode::OK, Json(serde_json::json!({"overallState": "PLANNING"}))).into_response(),
        }
    }

    async fn api_start(State(state): State<Arc<AppState>>, body: Json<Value>) -> impl IntoResponse {
        let Some(task) = body.get("task").and_then(Value::as_str).filter(|t| !t.trim().is_empty()) else {
            return (StatusCode::BAD_REQUEST, Json(serde_json::json!({"error": "task must be a non-empty string"})))
                .into_response();
        };

        let mut started = state.started.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if *started {
            return (StatusCode::CONFLICT, Json(serde_json::json!({"error": "a run has already been started"})))
                .into_response();
        }
        *started = true;
        drop(started);

        let run_id = crate::generate_run_id();
        let run_config = match state.template.build(task.to_owned(), run_id.clone()) {
            Ok(run_config) => run_config,
            Err(e) => {
                *state.started.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = false;
                return (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({"error": e.to_string()})))
                    .into_response();
            }
        };

        *state.active_coord_root.lock().unwrap_or_else(std::sync::PoisonError::into_inner) =
            Some(run_config.coord_root.clone());
        spawn_run(run_config);

        (StatusCode::ACCEPTED, Json(serde_json::json!({"runId": run_id, "status": "started"}))).into_response()
    }
}
