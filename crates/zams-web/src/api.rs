//! Upload and datasource endpoint handlers, plus the shared state and error
//! shape every handler uses.

use std::sync::Arc;

use axum::Json;
use axum::extract::multipart::{Field, Multipart, MultipartRejection};
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{debug, error, warn};
use zams_rs::chat::ErrorBody;
use zams_rs::client::UploadReceipt;
use zams_rs::context::{DatasourceQuery, DatasourceSource};
use zams_rs::provider::CompletionProvider;

/// Shared application state passed to all handlers via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<dyn CompletionProvider>,
    pub datasources: Arc<dyn DatasourceSource>,
    pub max_upload_bytes: u64,
}

/// A non-streamed `{error}` response.
pub(crate) fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

/// POST /api/upload: Accept one file in the multipart field `file`.
///
/// Returns 400 when the request is not multipart, has no `file` field, or
/// the file is larger than the configured ceiling. The file content is
/// counted, not stored.
pub async fn post_upload(
    State(app): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let mut multipart = match multipart {
        Ok(m) => m,
        Err(e) => {
            debug!("Upload rejected: {e}");
            return json_error(
                StatusCode::BAD_REQUEST,
                "Request must be multipart/form-data",
            );
        }
    };

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return json_error(StatusCode::BAD_REQUEST, "No file provided"),
            Err(e) => {
                warn!("Malformed upload body: {e}");
                return json_error(StatusCode::BAD_REQUEST, e.body_text());
            }
        };
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().unwrap_or_default().to_string();
        return match measure_field(field, app.max_upload_bytes).await {
            Ok(Some(size)) => {
                debug!("Upload accepted: {filename} ({size} bytes, {content_type})");
                Json(UploadReceipt {
                    success: true,
                    filename,
                    size,
                    content_type,
                })
                .into_response()
            }
            Ok(None) => {
                drain(&mut multipart).await;
                debug!("Upload rejected: {filename} exceeds {} bytes", app.max_upload_bytes);
                json_error(StatusCode::BAD_REQUEST, "File size exceeds limit (5MB)")
            }
            Err(e) => {
                warn!("Upload read failed: {e}");
                json_error(StatusCode::BAD_REQUEST, e)
            }
        };
    }
}

/// Count the bytes of `field`, reading chunk by chunk.
///
/// Returns `Ok(None)` once the count exceeds `limit`. The rest of the field
/// is read and discarded so the client sees the response rather than a
/// reset connection.
async fn measure_field(mut field: Field<'_>, limit: u64) -> Result<Option<u64>, String> {
    let mut size: u64 = 0;
    let mut over = false;
    while let Some(chunk) = field.chunk().await.map_err(|e| e.body_text())? {
        size += chunk.len() as u64;
        over |= size > limit;
    }
    Ok((!over).then_some(size))
}

async fn drain(multipart: &mut Multipart) {
    while let Ok(Some(mut field)) = multipart.next_field().await {
        while let Ok(Some(_)) = field.chunk().await {}
    }
}

/// GET /api/datasources: The datasource table, filtered and sorted.
pub async fn get_datasources(
    State(app): State<AppState>,
    query: Result<Query<DatasourceQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(q) => q,
        Err(e) => return json_error(StatusCode::BAD_REQUEST, e.body_text()),
    };

    match app.datasources.snapshot().await {
        Ok(records) => Json(query.apply(&records)).into_response(),
        Err(e) => {
            error!("Datasource snapshot failed: {e}");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to load datasources: {e}"),
            )
        }
    }
}
