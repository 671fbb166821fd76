//! Control-plane handlers.
//!
//! POST handlers redirect back to `/` with a URL-encoded `message` query so
//! the status page can show what happened; they never return JSON errors for
//! user mistakes, only for malformed routes.

use axum::extract::{Form, Path, Query, State};
use axum::http::header;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::Json;
use serde::Deserialize;
use std::fmt::Write as _;

use modelpull_core::{ProgressSnapshot, TaskState};

use crate::error::HttpError;
use crate::state::AppState;

/// Query parameters of the status page.
#[derive(Debug, Deserialize)]
pub struct IndexParams {
    #[serde(default)]
    pub message: String,
}

/// Form body of `POST /queue/add`.
#[derive(Debug, Deserialize)]
pub struct QueueAddForm {
    #[serde(default)]
    pub model: String,
}

/// Form body of `POST /queue/action`.
#[derive(Debug, Deserialize)]
pub struct QueueActionForm {
    pub id: u64,
    pub action: String,
}

fn redirect_with_message(message: &str) -> Redirect {
    Redirect::to(&format!("/?message={}", urlencoding::encode(message)))
}

/// `GET /`: minimal status page listing all tasks.
pub async fn index(
    State(state): State<AppState>,
    Query(params): Query<IndexParams>,
) -> Html<String> {
    let tasks = state.manager.snapshot_tasks().await;

    let mut page = String::from(
        "<!doctype html><html><head><title>modelpull</title></head><body>\
         <h1>modelpull</h1>",
    );
    if !params.message.is_empty() {
        let _ = write!(page, "<p><em>{}</em></p>", escape_html(&params.message));
    }
    page.push_str(
        "<form method=\"post\" action=\"/queue/add\">\
         <input name=\"model\" placeholder=\"owner/model:tag\">\
         <button type=\"submit\">Pull</button></form>\
         <table border=\"1\"><tr><th>id</th><th>model</th><th>state</th>\
         <th>progress</th><th>message</th><th>archive</th></tr>",
    );
    for task in &tasks {
        let archive = if task.state == TaskState::Done {
            format!(
                "<a href=\"/download/{name}\">{name}</a>",
                name = escape_html(&task.zip_name)
            )
        } else {
            String::new()
        };
        let _ = write!(
            page,
            "<tr><td>{id}</td><td>{model}</td><td>{state}</td>\
             <td>{percent:.1}%</td><td>{message}</td><td>{archive}</td></tr>",
            id = task.id,
            model = escape_html(&task.model),
            state = task.state,
            percent = task.progress.percent,
            message = escape_html(&task.message),
        );
    }
    page.push_str("</table></body></html>");
    Html(page)
}

/// `POST /queue/add`: enqueue a model reference.
pub async fn queue_add(
    State(state): State<AppState>,
    Form(form): Form<QueueAddForm>,
) -> Redirect {
    let model = form.model.trim();
    if model.is_empty() {
        return redirect_with_message("model must not be empty");
    }

    match state.manager.enqueue(model).await {
        Ok(id) => redirect_with_message(&format!("queued {model} as task {id}")),
        Err(err) => redirect_with_message(&format!("enqueue failed: {err}")),
    }
}

/// `POST /queue/action`: pause, resume, or cancel a task.
pub async fn queue_action(
    State(state): State<AppState>,
    Form(form): Form<QueueActionForm>,
) -> Redirect {
    let result = match form.action.as_str() {
        "pause" => state.manager.pause(form.id).await,
        "resume" => state.manager.resume(form.id).await,
        "cancel" => state.manager.cancel(form.id).await,
        other => {
            return redirect_with_message(&format!("unknown action {other:?}"));
        }
    };

    match result {
        Ok(()) => redirect_with_message(&format!("{} task {}", form.action, form.id)),
        Err(err) => redirect_with_message(&format!("{} failed: {err}", form.action)),
    }
}

/// `GET /progress`: snapshot of the active pull.
pub async fn progress(State(state): State<AppState>) -> Json<ProgressSnapshot> {
    Json(state.manager.active_progress().await)
}

/// `GET /download/{name}`: serve a finished archive.
///
/// The name must resolve to a direct child of the downloads directory;
/// anything that escapes it after path cleaning is rejected.
pub async fn download(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, HttpError> {
    let candidate = state.downloads_dir.join(&name);
    let cleaned = clean_path(&candidate);

    let is_child = cleaned.parent() == Some(state.downloads_dir.as_path())
        && cleaned
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n == name);
    if !is_child {
        return Err(HttpError::BadRequest(format!("invalid archive name {name:?}")));
    }

    let bytes = tokio::fs::read(&cleaned)
        .await
        .map_err(|_| HttpError::NotFound(format!("no archive named {name:?}")))?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{name}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}

/// Lexically normalize a path: drop `.`, resolve `..` without touching the
/// filesystem.
fn clean_path(path: &std::path::Path) -> std::path::PathBuf {
    use std::path::Component;
    let mut cleaned = std::path::PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other),
        }
    }
    cleaned
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
