// src/routes/process.rs
//! Upload-and-process endpoints.
//!
//! `POST /process` accepts a multipart form with the SQM data file in the
//! `file` field and optional per-request threshold overrides. The upload is
//! streamed to the upload directory, run through the stream processor and the
//! kept records written to `processed_<name>` in the download directory.
//! `GET /download/{name}` serves those results back.

use std::path::{Path, PathBuf};

use axum::{
    extract::{Multipart, Path as UrlPath, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use super::AppState;
use crate::{
    process_file, MilkyWayModel, ProcessError, ProcessParams, StreamProcessor, StreamSummary,
};

// ---

const PROCESSED_PREFIX: &str = "processed_";

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/process", post(handler))
        .route("/download/{name}", get(download))
}

#[derive(Debug, Error)]
enum ApiError {
    #[error("malformed multipart body: {0}")]
    Multipart(#[from] axum::extract::multipart::MultipartError),

    #[error("no file uploaded")]
    MissingFile,

    #[error("invalid value '{value}' for {field}")]
    BadField { field: String, value: String },

    #[error("cannot store upload: {0}")]
    Upload(std::io::Error),

    #[error("{0}")]
    Process(#[from] ProcessError),

    #[error("file not found")]
    NotFound,
}

impl ApiError {
    // ---
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Multipart(_) | ApiError::MissingFile | ApiError::BadField { .. } => {
                StatusCode::BAD_REQUEST
            }
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Upload(_) | ApiError::Process(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn class(&self) -> &'static str {
        match self {
            ApiError::Multipart(_) => "multipart",
            ApiError::MissingFile => "missing_file",
            ApiError::BadField { .. } => "bad_field",
            ApiError::Upload(_) => "upload",
            ApiError::Process(e) => e.class(),
            ApiError::NotFound => "not_found",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    status: &'static str,
    class: &'static str,
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // ---
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            debug!("Rejected request: {}", self);
        }

        let body = ErrorBody {
            status: "error",
            class: self.class(),
            detail: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Successful `POST /process` response.
#[derive(Serialize)]
struct ProcessResponse {
    status: &'static str,
    filename: String,
    size_bytes: u64,
    download: String,
    summary: StreamSummary,
}

/// Optional form fields that replace configured defaults for one request.
#[derive(Debug, Default, Clone, PartialEq)]
struct Overrides {
    sun_max_alt: Option<f64>,
    moon_max_alt: Option<f64>,
    stdev_threshold: Option<f64>,
    mpsas_limit: Option<f64>,
    mw_sb_threshold: Option<f64>,
    /// Default window span in minutes.
    roll_duration: Option<f64>,
}

impl Overrides {
    // ---
    /// Record `value` for `field`; returns `Ok(false)` for unknown fields.
    fn set(&mut self, field: &str, value: &str) -> Result<bool, ApiError> {
        // ---
        let slot = match field {
            "sun_max_alt" => &mut self.sun_max_alt,
            "moon_max_alt" => &mut self.moon_max_alt,
            "stdev_threshold" => &mut self.stdev_threshold,
            "mpsas_limit" => &mut self.mpsas_limit,
            "mw_sb_threshold" => &mut self.mw_sb_threshold,
            "roll_duration" => &mut self.roll_duration,
            _ => return Ok(false),
        };

        let value = value.trim();
        if value.is_empty() {
            return Ok(true);
        }

        let bad = || ApiError::BadField {
            field: field.to_string(),
            value: value.to_string(),
        };
        let parsed: f64 = value.parse().map_err(|_| bad())?;
        if !parsed.is_finite()
            || (field == "roll_duration" && !ProcessParams::is_valid_span(parsed))
        {
            return Err(bad());
        }

        *slot = Some(parsed);
        Ok(true)
    }

    fn apply(&self, params: ProcessParams, model: MilkyWayModel) -> (ProcessParams, MilkyWayModel) {
        // ---
        let params = ProcessParams {
            sun_max_alt: self.sun_max_alt.unwrap_or(params.sun_max_alt),
            moon_max_alt: self.moon_max_alt.unwrap_or(params.moon_max_alt),
            stdev_threshold: self.stdev_threshold.unwrap_or(params.stdev_threshold),
            mpsas_limit: self.mpsas_limit.unwrap_or(params.mpsas_limit),
            default_span_min: self.roll_duration.unwrap_or(params.default_span_min),
        };
        let model = MilkyWayModel {
            visibility_threshold: self.mw_sb_threshold.unwrap_or(model.visibility_threshold),
            ..model
        };
        (params, model)
    }
}

/// Reduce a client-supplied file name to a safe basename.
fn sanitize_filename(raw: &str) -> String {
    // ---
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');

    if cleaned.is_empty() {
        "upload.dat".to_string()
    } else {
        cleaned.to_string()
    }
}

async fn handler(
    State((cache, cfg)): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ProcessResponse>, ApiError> {
    // ---
    info!("POST /process - receiving upload");

    let mut overrides = Overrides::default();
    let mut upload: Option<(String, PathBuf, u64)> = None;

    while let Some(mut field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();

        if name == "file" {
            let filename = sanitize_filename(field.file_name().unwrap_or_default());
            let path = cfg.upload_dir.join(&filename);

            let mut out = tokio::fs::File::create(&path).await.map_err(ApiError::Upload)?;
            let mut size = 0u64;
            while let Some(chunk) = field.chunk().await? {
                out.write_all(&chunk).await.map_err(ApiError::Upload)?;
                size += chunk.len() as u64;
            }
            out.flush().await.map_err(ApiError::Upload)?;

            debug!("Stored upload {} ({} bytes)", path.display(), size);
            upload = Some((filename, path, size));
        } else {
            let value = field.text().await?;
            if !overrides.set(&name, &value)? {
                warn!("Ignoring unknown form field '{}'", name);
            }
        }
    }

    let (filename, input, size_bytes) = upload.ok_or(ApiError::MissingFile)?;
    let (params, model) = overrides.apply(cfg.params, cfg.model);
    debug!("Effective parameters: {:?}, model {}", params, model.model_tag());

    let output_name = format!("{PROCESSED_PREFIX}{filename}");
    let output = cfg.download_dir.join(&output_name);

    let processor = StreamProcessor::new(params, model, &cache)
        .with_quota(&cfg.quota)
        .with_bucket(cfg.cache_bucket());
    let summary = process_file(processor, &input, &output, cfg.default_location).await?;

    info!(
        "Processed {}: {} of {} lines kept",
        filename, summary.kept_count, summary.total_lines_seen
    );

    Ok(Json(ProcessResponse {
        status: "ok",
        filename,
        size_bytes,
        download: format!("/download/{output_name}"),
        summary,
    }))
}

/// Serve a processed file from the download directory.
async fn download(
    State((_, cfg)): State<AppState>,
    UrlPath(name): UrlPath<String>,
) -> Result<Response, ApiError> {
    // ---
    let name = sanitize_filename(&name);
    if !name.starts_with(PROCESSED_PREFIX) {
        return Err(ApiError::NotFound);
    }

    let path: &Path = &cfg.download_dir.join(&name);
    let body = tokio::fs::read(path).await.map_err(|_| ApiError::NotFound)?;

    let disposition = format!("attachment; filename=\"{name}\"");
    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        // ---
        assert_eq!(sanitize_filename("night 1.dat"), "night_1.dat");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\logs\\sqm.dat"), "sqm.dat");
        assert_eq!(sanitize_filename("..hidden"), "hidden");
        assert_eq!(sanitize_filename(""), "upload.dat");
    }

    #[test]
    fn test_overrides_apply() {
        // ---
        let mut overrides = Overrides::default();
        assert!(overrides.set("sun_max_alt", "-18").unwrap());
        assert!(overrides.set("mw_sb_threshold", " 21.0 ").unwrap());
        assert!(overrides.set("roll_duration", "30").unwrap());
        assert!(overrides.set("moon_max_alt", "").unwrap());
        assert!(!overrides.set("colour", "blue").unwrap());

        let (params, model) = overrides.apply(ProcessParams::default(), MilkyWayModel::default());
        assert_eq!(params.sun_max_alt, -18.0);
        assert_eq!(params.moon_max_alt, ProcessParams::default().moon_max_alt);
        assert_eq!(params.default_span_min, 30.0);
        assert_eq!(model.visibility_threshold, 21.0);
        assert_eq!(model.base_at_plane, MilkyWayModel::default().base_at_plane);
    }

    #[test]
    fn test_overrides_reject_bad_values() {
        // ---
        let mut overrides = Overrides::default();
        assert!(matches!(
            overrides.set("stdev_threshold", "low"),
            Err(ApiError::BadField { .. })
        ));
        assert!(overrides.set("roll_duration", "0").is_err());
        assert!(overrides.set("roll_duration", "-15").is_err());
        assert!(overrides.set("roll_duration", "1e12").is_err());
        assert!(overrides.set("mpsas_limit", "NaN").is_err());
        assert_eq!(overrides, Overrides::default());
    }

    #[test]
    fn test_error_body_shape() {
        // ---
        let err = ApiError::BadField {
            field: "roll_duration".to_string(),
            value: "-1".to_string(),
        };
        let body = ErrorBody {
            status: "error",
            class: err.class(),
            detail: err.to_string(),
        };

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["class"], "bad_field");
        assert_eq!(json["detail"], "invalid value '-1' for roll_duration");
    }

    #[test]
    fn test_error_status_mapping() {
        // ---
        assert_eq!(ApiError::MissingFile.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::NotFound.status(), StatusCode::NOT_FOUND);

        let err = ApiError::Process(ProcessError::Io(std::io::Error::other("disk full")));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.class(), "io");
    }
}
