//! Admission front-end.
//!
//! One route, `POST /v1/completions`, following the handler shape the
//! teacher uses throughout `src/ai/*_api.rs`: a `web::Json<T>` body, a
//! `web::Data<AppState>` handle into shared state, returning
//! `actix_web::Result<HttpResponse>`.

use std::sync::Arc;

use actix_web::{get, post, web, HttpRequest, HttpResponse};
use serde::Serialize;

use crate::config::Config;
use crate::scheduler::params::{CompletionRequestBody, SharedParams};
use crate::scheduler::Scheduler;
use crate::store::{Store, UsageKind};
use crate::tokenizer::count_tokens;

pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub store: Store,
    pub model: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: actix_web::http::StatusCode, message: impl Into<String>) -> HttpResponse {
    HttpResponse::build(status).json(ErrorBody { error: message.into() })
}

fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get("Authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

#[post("/v1/completions")]
pub async fn completions(
    req: HttpRequest,
    body: web::Json<CompletionRequestBody>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let Some(token) = bearer_token(&req) else {
        return error_response(actix_web::http::StatusCode::UNAUTHORIZED, "Invalid API key");
    };

    let key = match state.store.lookup(token).await {
        Ok(Some(key)) => key,
        Ok(None) => {
            return error_response(actix_web::http::StatusCode::UNAUTHORIZED, "Invalid API key")
        }
        Err(e) => {
            tracing::error!("identity store lookup failed: {e}");
            return error_response(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    let Some(prompt_input) = body.prompt.clone() else {
        return error_response(actix_web::http::StatusCode::BAD_REQUEST, "prompt is required");
    };
    let prompts = prompt_input.into_prompts();

    let shared_params = SharedParams::from_request(&body, &state.model);

    let input_tokens: usize = prompts
        .iter()
        .map(|p| count_tokens(shared_params.model(), p))
        .sum();
    if let Err(e) = state
        .store
        .record_usage(&key.name, input_tokens as i64, UsageKind::Prompt)
        .await
    {
        tracing::warn!("failed to record prompt usage for {}: {e}", key.name);
    }

    let mut handles = Vec::with_capacity(prompts.len());
    for prompt in prompts {
        match state.scheduler.submit(prompt, shared_params.clone()).await {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                tracing::warn!("submit rejected: {e}");
                return error_response(actix_web::http::StatusCode::SERVICE_UNAVAILABLE, e.to_string());
            }
        }
    }

    let mut choices = Vec::new();
    for handle in handles {
        match handle.await {
            Ok(Ok(group)) => choices.extend(group),
            Ok(Err(e)) => {
                let status = match e {
                    crate::error::SchedulerError::ShuttingDown => {
                        actix_web::http::StatusCode::SERVICE_UNAVAILABLE
                    }
                    _ => actix_web::http::StatusCode::BAD_GATEWAY,
                };
                return error_response(status, e.to_string());
            }
            Err(_) => {
                return error_response(
                    actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                    "scheduler dropped the response channel",
                )
            }
        }
    }

    let output_tokens: usize = choices
        .iter()
        .map(|c| {
            c.get("text")
                .and_then(|v| v.as_str())
                .map(|t| count_tokens(shared_params.model(), t))
                .unwrap_or(0)
        })
        .sum();
    if let Err(e) = state
        .store
        .record_usage(&key.name, output_tokens as i64, UsageKind::Completion)
        .await
    {
        tracing::warn!("failed to record completion usage for {}: {e}", key.name);
    }

    HttpResponse::Ok().json(serde_json::json!({ "choices": choices }))
}

#[get("/healthz")]
pub async fn healthz() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(completions).service(healthz);
}

pub fn model_name(config: &Config) -> String {
    config.upstream.model.clone()
}
