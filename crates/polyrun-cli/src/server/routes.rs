use axum::{
    Json,
    body::Bytes,
    extract::{Multipart, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use polyrun::{DependencyRequest, FailureKind, SubmissionRequest};
use serde::{Deserialize, Serialize};

use crate::server::AppState;
use crate::server::error::ApiError;
use crate::server::request_log::LoggedRequest;

/// Body returned for every accepted request
#[derive(Debug, Serialize)]
pub struct OutcomeBody {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureKind>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

impl OutcomeBody {
    fn new(
        success: bool,
        output: String,
        error: Option<String>,
        reason: Option<FailureKind>,
        truncated: bool,
    ) -> Self {
        if success {
            Self {
                success,
                output: Some(output),
                error: None,
                reason: None,
                truncated,
            }
        } else {
            Self {
                success,
                output: None,
                error,
                reason,
                truncated,
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct InstallBody {
    lang: Option<String>,
    #[serde(default)]
    dependencies: Vec<String>,
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

pub async fn languages(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "languages": state.runner.registry().ids() }))
}

/// `POST /compile`: multipart `lang` plus one code file
pub async fn compile(State(state): State<AppState>, multipart: Multipart) -> Response {
    let mut logged = LoggedRequest::default();
    let mut response = submit(&state, multipart, &mut logged)
        .await
        .into_response();
    response.extensions_mut().insert(logged);
    response
}

async fn submit(
    state: &AppState,
    mut multipart: Multipart,
    logged: &mut LoggedRequest,
) -> Result<Json<OutcomeBody>, ApiError> {
    let mut language: Option<String> = None;
    let mut code: Option<(Bytes, Option<String>)> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_owned();
        let file_name = field.file_name().map(str::to_owned);

        if name == "lang" {
            let value = field.text().await?;
            logged.language = Some(value.trim().to_owned());
            language = Some(value);
        } else if name == "code" || (code.is_none() && file_name.is_some() && name != "input") {
            let bytes = field.bytes().await?;
            logged.upload_bytes += bytes.len() as u64;
            code = Some((bytes, file_name));
        } else {
            // Other parts (e.g. an `input` file) only count toward the upload size
            logged.upload_bytes += field.bytes().await?.len() as u64;
        }
    }

    let (Some(language), Some((source, file_name))) = (language, code) else {
        return Err(ApiError::BadRequest(
            "missing language or code file".to_owned(),
        ));
    };

    let mut request = SubmissionRequest::new(language, source.to_vec());
    request.file_name = file_name;
    let outcome = state.runner.compile_and_run(request).await?;

    Ok(Json(OutcomeBody::new(
        outcome.success,
        outcome.output,
        outcome.error,
        outcome.failure,
        outcome.truncated,
    )))
}

/// `POST /install`: JSON `{lang, dependencies}`
pub async fn install(
    State(state): State<AppState>,
    payload: Result<Json<InstallBody>, JsonRejection>,
) -> Response {
    let body = match payload {
        Ok(Json(body)) => body,
        Err(rejection) => {
            let mut response = ApiError::from(rejection).into_response();
            response.extensions_mut().insert(LoggedRequest::default());
            return response;
        }
    };
    let logged = LoggedRequest {
        language: body.lang.as_deref().map(|lang| lang.trim().to_owned()),
        upload_bytes: 0,
    };
    let request = DependencyRequest {
        language: body.lang,
        dependencies: body.dependencies,
    };

    let mut response = match state.runner.installer().install(request).await {
        Ok(outcome) => {
            let status = if outcome.success {
                StatusCode::OK
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            let body = OutcomeBody::new(
                outcome.success,
                outcome.output,
                outcome.error,
                outcome.failure,
                outcome.truncated,
            );
            (status, Json(body)).into_response()
        }
        Err(e) => ApiError::from(e).into_response(),
    };
    response.extensions_mut().insert(logged);
    response
}
