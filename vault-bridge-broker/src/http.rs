use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware;
use axum::response::IntoResponse;
use axum::{Extension, Json, Router, routing::get, routing::post};
use tracing::Instrument;
use vault_bridge_core::{KeyService, OperationKind, RequestContext};

use crate::auth::{self, Identity};
use crate::error::{AppError, attach_correlation};
use crate::models::{
    CreateKeyRequest, DecryptRequest, DecryptResponse, EncryptRequest, EncryptResponse,
    ExportKeyResponse, ReadKeyResponse, StatusResponse, WriteKeyRequest,
};
use crate::state::AppState;
use crate::telemetry::{CorrelationId, correlation_layer, parent_from_headers, request_span};

pub fn router(state: AppState) -> Router {
    let api = api_routes().layer(middleware::from_fn_with_state(
        state.clone(),
        auth::http_layer,
    ));

    Router::new()
        .route("/healthz", get(health_check))
        .merge(api)
        .layer(middleware::from_fn(correlation_layer))
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/key/{*path}", get(read_key).post(write_key))
        .route("/createkey/{name}", post(create_key))
        .route("/exportkey/{*path}", get(export_key))
        .route("/encrypt/{name}", post(encrypt))
        .route("/decrypt/{name}", post(decrypt))
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// Per-request inputs shared by every handler.
struct Inbound {
    correlation: CorrelationId,
    identity: Identity,
    headers: HeaderMap,
}

/// Runs one operation on a blocking worker inside the transport and
/// endpoint spans. The inner `Result` is the operation's own outcome.
async fn dispatch<T, F>(
    state: &AppState,
    kind: OperationKind,
    inbound: Inbound,
    op: F,
) -> Result<vault_bridge_core::Result<T>, AppError>
where
    T: Send + 'static,
    F: FnOnce(&dyn KeyService, &RequestContext) -> vault_bridge_core::Result<T> + Send + 'static,
{
    let Inbound {
        correlation,
        identity,
        headers,
    } = inbound;

    let mut active = parent_from_headers(&headers);
    let mut spans = Vec::new();
    if let Some(tracer) = &state.tracer {
        for level in ["transport", "endpoint"] {
            let mut span = tracer.start_span(&format!("{kind}_{level}"), active.as_ref());
            span.set_tag("operation", kind.as_str());
            span.set_tag("level", level);
            span.set_tag("correlation_id", &correlation.0);
            active = Some(span.context().clone());
            spans.push(span);
        }
    }

    let ctx = RequestContext::new()
        .with_claims(identity.0)
        .with_span(active)
        .with_correlation_id(correlation.0.clone());
    let service = state.service.clone();
    let result = tokio::task::spawn_blocking(move || op(service.as_ref(), &ctx))
        .await
        .map_err(|err| {
            attach_correlation(
                AppError::internal(format!("{kind} worker failed: {err}")),
                &correlation,
            )
        });

    let failed = !matches!(result, Ok(Ok(_)));
    for mut span in spans.into_iter().rev() {
        if failed {
            span.set_tag("error", "true");
        }
        span.finish();
    }
    result
}

fn decode_body<T>(
    body: Result<Json<T>, JsonRejection>,
    correlation: &CorrelationId,
) -> Result<T, AppError> {
    body.map(|Json(value)| value)
        .map_err(|err| attach_correlation(AppError::from(err), correlation))
}

async fn write_key(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    Path(path): Path<String>,
    body: Result<Json<WriteKeyRequest>, JsonRejection>,
) -> Result<Json<StatusResponse>, AppError> {
    let span = request_span("writekey", &correlation.0);
    async move {
        let request = decode_body(body, &correlation)?;
        let inbound = Inbound {
            correlation,
            identity,
            headers,
        };
        let outcome = dispatch(&state, OperationKind::WriteKey, inbound, move |svc, ctx| {
            svc.write_key(ctx, &path, &request.key)
        })
        .await?;
        Ok(Json(StatusResponse {
            err: outcome.err().map(|err| err.to_string()),
        }))
    }
    .instrument(span)
    .await
}

async fn read_key(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    Path(path): Path<String>,
) -> Result<Json<ReadKeyResponse>, AppError> {
    let span = request_span("readkey", &correlation.0);
    async move {
        let inbound = Inbound {
            correlation,
            identity,
            headers,
        };
        let outcome = dispatch(&state, OperationKind::ReadKey, inbound, move |svc, ctx| {
            svc.read_key(ctx, &path)
        })
        .await?;
        Ok(Json(match outcome {
            Ok(key) => ReadKeyResponse { key, err: None },
            Err(err) => ReadKeyResponse {
                key: String::new(),
                err: Some(err.to_string()),
            },
        }))
    }
    .instrument(span)
    .await
}

async fn create_key(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    Path(name): Path<String>,
    body: Result<Json<CreateKeyRequest>, JsonRejection>,
) -> Result<Json<StatusResponse>, AppError> {
    let span = request_span("createkey", &correlation.0);
    async move {
        let request = decode_body(body, &correlation)?;
        let inbound = Inbound {
            correlation,
            identity,
            headers,
        };
        let outcome = dispatch(&state, OperationKind::CreateKey, inbound, move |svc, ctx| {
            svc.create_key(ctx, &name, &request.params)
        })
        .await?;
        Ok(Json(StatusResponse {
            err: outcome.err().map(|err| err.to_string()),
        }))
    }
    .instrument(span)
    .await
}

async fn export_key(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    Path(path): Path<String>,
) -> Result<Json<ExportKeyResponse>, AppError> {
    let span = request_span("exportkey", &correlation.0);
    async move {
        let inbound = Inbound {
            correlation,
            identity,
            headers,
        };
        let outcome = dispatch(&state, OperationKind::ExportKey, inbound, move |svc, ctx| {
            svc.export_key(ctx, &path)
        })
        .await?;
        Ok(Json(match outcome {
            Ok(keys) => ExportKeyResponse {
                keys: Some(keys),
                err: None,
            },
            Err(err) => ExportKeyResponse {
                keys: None,
                err: Some(err.to_string()),
            },
        }))
    }
    .instrument(span)
    .await
}

async fn encrypt(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    Path(name): Path<String>,
    body: Result<Json<EncryptRequest>, JsonRejection>,
) -> Result<Json<EncryptResponse>, AppError> {
    let span = request_span("encrypt", &correlation.0);
    async move {
        let request = decode_body(body, &correlation)?;
        let inbound = Inbound {
            correlation,
            identity,
            headers,
        };
        let outcome = dispatch(&state, OperationKind::Encrypt, inbound, move |svc, ctx| {
            svc.encrypt(ctx, &name, &request.params)
        })
        .await?;
        Ok(Json(match outcome {
            Ok(ciphertext) => EncryptResponse {
                ciphertext,
                err: None,
            },
            Err(err) => EncryptResponse {
                ciphertext: String::new(),
                err: Some(err.to_string()),
            },
        }))
    }
    .instrument(span)
    .await
}

async fn decrypt(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    Path(name): Path<String>,
    body: Result<Json<DecryptRequest>, JsonRejection>,
) -> Result<Json<DecryptResponse>, AppError> {
    let span = request_span("decrypt", &correlation.0);
    async move {
        let request = decode_body(body, &correlation)?;
        let inbound = Inbound {
            correlation,
            identity,
            headers,
        };
        let outcome = dispatch(&state, OperationKind::Decrypt, inbound, move |svc, ctx| {
            svc.decrypt(ctx, &name, &request.params)
        })
        .await?;
        Ok(Json(match outcome {
            Ok(plaintext) => DecryptResponse {
                plaintext,
                err: None,
            },
            Err(err) => DecryptResponse {
                plaintext: String::new(),
                err: Some(err.to_string()),
            },
        }))
    }
    .instrument(span)
    .await
}
