//! HTTP handlers for file operations.
//! Streams bodies in both directions and delegates storage concerns to the
//! pooled `GridFsClient`.

use crate::{errors::AppError, state::AppState};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::StreamExt;
use gridfs_store::{FileDescriptor, FileKey, Metadata, NewFile};
use serde::Deserialize;
use serde_json::json;
use std::io;
use tokio::io::AsyncRead;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::warn;
use uuid::Uuid;

const CHECKSUM_HEADER: &str = "x-checksum";
const META_HEADER_PREFIX: &str = "x-meta-";
const STREAM_BUFFER: usize = 64 * 1024;

/// Query params accepted by `POST /files`.
#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub filename: Option<String>,
}

/// Query params accepted by `PATCH /files/{id}`.
#[derive(Debug, Deserialize)]
pub struct ModifyQuery {
    pub offset: u64,
}

/// `POST /files?filename=`: create a file from the request body.
///
/// `Content-Length` declares the file length. The checksum comes from
/// `x-checksum`; without it the body is buffered so its MD5 can be computed
/// before the descriptor is written. `x-meta-<key>` headers become metadata.
pub async fn upload_file(
    State(state): State<AppState>,
    Query(q): Query<UploadQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let length = content_length(&headers)?;
    let filename = q.filename.unwrap_or_default();
    let metadata = metadata_from_headers(&headers);
    let checksum = headers
        .get(CHECKSUM_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let id = match checksum {
        Some(md5) => {
            let file = NewFile::new(filename, md5, length).with_metadata(metadata);
            state.client.write_from(file, body_reader(body)).await?
        }
        None => {
            let limit = usize::try_from(length)
                .unwrap_or(usize::MAX)
                .saturating_add(1);
            let bytes: Bytes = axum::body::to_bytes(body, limit).await.map_err(|err| {
                AppError::new(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    format!("reading body of declared length {}: {}", length, err),
                )
            })?;
            let md5 = format!("{:x}", md5::compute(&bytes));
            let file = NewFile::new(filename, md5, length).with_metadata(metadata);
            state.client.write(file, bytes.to_vec()).await?
        }
    };

    Ok((StatusCode::CREATED, Json(json!({ "id": id }))).into_response())
}

/// `GET /files/{id}`: stream the file; honours a single `Range: bytes=` header.
pub async fn get_file(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let meta = require(&state, FileKey::Id(id)).await?;
    stream_file(&state, meta, &headers).await
}

/// `HEAD /files/{id}`: same headers as GET but no body.
pub async fn head_file(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let meta = require(&state, FileKey::Id(id)).await?;
    let mut response = Response::new(Body::empty());
    set_file_headers(response.headers_mut(), &meta, meta.length);
    Ok(response)
}

/// `PATCH /files/{id}?offset=`: overwrite bytes in place with the body.
pub async fn modify_file(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(q): Query<ModifyQuery>,
    body: Body,
) -> Result<Response, AppError> {
    let written = state
        .client
        .write_range_from(id, q.offset, body_reader(body))
        .await?;
    Ok(Json(json!({ "id": id, "offset": q.offset, "written": written })).into_response())
}

/// `DELETE /files/{id}`
pub async fn delete_file(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if state.client.delete(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found(format!("file [id={}] not found", id)))
    }
}

/// `GET /checksums/{md5}`: descriptor as JSON.
pub async fn get_by_checksum(
    State(state): State<AppState>,
    Path(md5): Path<String>,
) -> Result<Json<FileDescriptor>, AppError> {
    Ok(Json(require(&state, FileKey::checksum(md5)).await?))
}

/// `GET /checksums/{md5}/content`
pub async fn get_content_by_checksum(
    State(state): State<AppState>,
    Path(md5): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let meta = require(&state, FileKey::checksum(md5)).await?;
    stream_file(&state, meta, &headers).await
}

/// `DELETE /checksums/{md5}`
pub async fn delete_by_checksum(
    State(state): State<AppState>,
    Path(md5): Path<String>,
) -> Result<StatusCode, AppError> {
    if state.client.delete(FileKey::checksum(md5.clone())).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found(format!("file [md5={}] not found", md5)))
    }
}

async fn require(state: &AppState, key: FileKey) -> Result<FileDescriptor, AppError> {
    state
        .client
        .get(key.clone())
        .await?
        .ok_or_else(|| AppError::not_found(format!("file [{}] not found", key)))
}

/// Pipe the file (or the requested range) through an in-memory duplex so the
/// response can start before the read finishes.
///
/// The chunks are verified first, so a file that is still being written or
/// lost a chunk gets a 409 instead of a success status with a short body.
async fn stream_file(
    state: &AppState,
    meta: FileDescriptor,
    headers: &HeaderMap,
) -> Result<Response, AppError> {
    let range = match headers.get(header::RANGE) {
        Some(value) => {
            let value = value
                .to_str()
                .map_err(|_| AppError::bad_request("invalid Range header"))?;
            Some(parse_range(value, meta.length)?)
        }
        None => None,
    };

    let meta = match range {
        Some((offset, size)) => state.client.verify_range(meta.id, offset, size).await?,
        None => state.client.verify(meta.id).await?,
    };
    let id = meta.id;

    let (reader, writer) = tokio::io::duplex(STREAM_BUFFER);
    let (status, pending) = match range {
        Some((offset, size)) => (
            StatusCode::PARTIAL_CONTENT,
            state.client.read_range_to(id, offset, size, writer),
        ),
        None => (StatusCode::OK, state.client.read_to(id, writer)),
    };
    tokio::spawn(async move {
        if let Err(err) = pending.await {
            warn!("streaming file {} failed: {}", id, err);
        }
    });

    let mut response = Response::new(Body::from_stream(ReaderStream::new(reader)));
    *response.status_mut() = status;
    let len = range.map_or(meta.length, |(_, size)| size);
    set_file_headers(response.headers_mut(), &meta, len);
    if let Some((offset, size)) = range {
        let value = format!("bytes {}-{}/{}", offset, offset + size - 1, meta.length);
        if let Ok(value) = HeaderValue::from_str(&value) {
            response.headers_mut().insert(header::CONTENT_RANGE, value);
        }
    }
    Ok(response)
}

fn body_reader(body: Body) -> impl AsyncRead + Unpin + Send + 'static {
    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(|err| io::Error::new(io::ErrorKind::Other, err)));
    StreamReader::new(Box::pin(stream))
}

fn content_length(headers: &HeaderMap) -> Result<u64, AppError> {
    headers
        .get(header::CONTENT_LENGTH)
        .ok_or_else(|| AppError::new(StatusCode::LENGTH_REQUIRED, "Content-Length is required"))?
        .to_str()
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .ok_or_else(|| AppError::bad_request("invalid Content-Length"))
}

fn metadata_from_headers(headers: &HeaderMap) -> Metadata {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let key = name.as_str().strip_prefix(META_HEADER_PREFIX)?;
            let value = value.to_str().ok()?;
            Some((key.to_string(), json!(value)))
        })
        .collect()
}

/// Parse a single `bytes=` range into `(offset, size)` against `length`.
fn parse_range(value: &str, length: u64) -> Result<(u64, u64), AppError> {
    let unsatisfiable = || {
        AppError::new(
            StatusCode::RANGE_NOT_SATISFIABLE,
            format!("range `{}` not satisfiable for length {}", value, length),
        )
    };

    let bounds = value
        .trim()
        .strip_prefix("bytes=")
        .ok_or_else(unsatisfiable)?;
    if bounds.contains(',') {
        return Err(unsatisfiable());
    }
    let (start, end) = bounds.split_once('-').ok_or_else(unsatisfiable)?;
    let (start, end) = (start.trim(), end.trim());
    let last_byte = length.checked_sub(1).ok_or_else(unsatisfiable)?;

    let (first, last) = if start.is_empty() {
        let suffix: u64 = end.parse().map_err(|_| unsatisfiable())?;
        if suffix == 0 {
            return Err(unsatisfiable());
        }
        (length.saturating_sub(suffix), last_byte)
    } else {
        let first: u64 = start.parse().map_err(|_| unsatisfiable())?;
        let last = if end.is_empty() {
            last_byte
        } else {
            end.parse::<u64>().map_err(|_| unsatisfiable())?.min(last_byte)
        };
        (first, last)
    };

    if first > last {
        return Err(unsatisfiable());
    }
    Ok((first, last - first + 1))
}

fn set_file_headers(headers: &mut HeaderMap, meta: &FileDescriptor, len: u64) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));

    if !meta.md5.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", meta.md5)) {
            headers.insert(header::ETAG, value);
        }
    }
    if let Ok(value) = HeaderValue::from_str(&meta.upload_date.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }

    for (key, value) in &meta.metadata {
        let Some(text) = value.as_str() else {
            continue;
        };
        let name = HeaderName::try_from(format!("{}{}", META_HEADER_PREFIX, key));
        if let (Ok(name), Ok(value)) = (name, HeaderValue::from_str(text)) {
            headers.insert(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::memory_state;

    fn upload_headers(len: usize) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
        headers
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    async fn upload(state: &AppState, data: &[u8], headers: HeaderMap) -> Uuid {
        let response = upload_file(
            State(state.clone()),
            Query(UploadQuery {
                filename: Some("notes.txt".into()),
            }),
            headers,
            Body::from(data.to_vec()),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        body["id"].as_str().unwrap().parse().unwrap()
    }

    #[test]
    fn test_parse_range_forms() {
        assert_eq!(parse_range("bytes=0-9", 100).unwrap(), (0, 10));
        assert_eq!(parse_range("bytes=90-", 100).unwrap(), (90, 10));
        assert_eq!(parse_range("bytes=-5", 100).unwrap(), (95, 5));
        assert_eq!(parse_range("bytes=-500", 100).unwrap(), (0, 100));
        assert_eq!(parse_range("bytes=50-500", 100).unwrap(), (50, 50));
    }

    #[test]
    fn test_parse_range_rejects_unsatisfiable() {
        for value in ["bytes=100-", "bytes=5-2", "items=0-1", "bytes=0-1,4-5", "bytes=-0"] {
            let err = parse_range(value, 100).unwrap_err();
            assert_eq!(err.status, StatusCode::RANGE_NOT_SATISFIABLE, "{value}");
        }
        assert!(parse_range("bytes=0-", 0).is_err());
    }

    #[test]
    fn test_metadata_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-meta-owner", HeaderValue::from_static("ops"));
        headers.insert("x-other", HeaderValue::from_static("skip"));
        let metadata = metadata_from_headers(&headers);
        assert_eq!(metadata.len(), 1);
        assert_eq!(metadata.get("owner"), Some(&json!("ops")));
    }

    #[tokio::test]
    async fn test_upload_then_ranged_download() {
        let state = memory_state().await;
        let data = b"the quick brown fox jumps".to_vec();
        let mut headers = upload_headers(data.len());
        headers.insert(CHECKSUM_HEADER, HeaderValue::from_static("fox"));
        let id = upload(&state, &data, headers).await;

        let response = get_file(State(state.clone()), Path(id), HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, data);

        let mut range = HeaderMap::new();
        range.insert(header::RANGE, HeaderValue::from_static("bytes=4-14"));
        let response = get_file(State(state.clone()), Path(id), range).await.unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            response.headers()[header::CONTENT_RANGE],
            format!("bytes 4-14/{}", data.len()).as_str()
        );
        assert_eq!(body_bytes(response).await, &data[4..15]);
    }

    #[tokio::test]
    async fn test_upload_without_checksum_computes_md5() {
        let state = memory_state().await;
        let data = b"hello".to_vec();
        let id = upload(&state, &data, upload_headers(data.len())).await;

        let md5 = format!("{:x}", md5::compute(&data));
        let Json(meta) = get_by_checksum(State(state.clone()), Path(md5.clone()))
            .await
            .unwrap();
        assert_eq!(meta.id, id);
        assert_eq!(meta.filename, "notes.txt");

        let status = delete_by_checksum(State(state.clone()), Path(md5))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
        let err = head_file(State(state), Path(id)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_patch_overwrites_in_place() {
        let state = memory_state().await;
        let data = b"0123456789abcdefghij".to_vec();
        let mut headers = upload_headers(data.len());
        headers.insert(CHECKSUM_HEADER, HeaderValue::from_static("digits"));
        let id = upload(&state, &data, headers).await;

        modify_file(
            State(state.clone()),
            Path(id),
            Query(ModifyQuery { offset: 6 }),
            Body::from("XYZW"),
        )
        .await
        .unwrap();

        let response = get_file(State(state.clone()), Path(id), HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(body_bytes(response).await, b"012345XYZWabcdefghij");

        let err = modify_file(
            State(state.clone()),
            Path(id),
            Query(ModifyQuery { offset: 19 }),
            Body::from("XY"),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::RANGE_NOT_SATISFIABLE);

        assert_eq!(
            delete_file(State(state), Path(id)).await.unwrap(),
            StatusCode::NO_CONTENT
        );
    }

    #[tokio::test]
    async fn test_upload_requires_content_length() {
        let state = memory_state().await;
        let err = upload_file(
            State(state),
            Query(UploadQuery { filename: None }),
            HeaderMap::new(),
            Body::from("abc"),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::LENGTH_REQUIRED);
    }

    #[tokio::test]
    async fn test_sparse_file_is_conflict_not_short_body() {
        let state = memory_state().await;
        let mut headers = upload_headers(20);
        headers.insert(CHECKSUM_HEADER, HeaderValue::from_static("sparse"));
        let data = b"0123456789".to_vec();
        let id = upload(&state, &data, headers).await;

        let err = get_file(State(state.clone()), Path(id), HeaderMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::CONFLICT);

        // chunk 0 is whole; chunk 1 holds 2 of 8 bytes
        let mut range = HeaderMap::new();
        range.insert(header::RANGE, HeaderValue::from_static("bytes=0-7"));
        let response = get_file(State(state.clone()), Path(id), range).await.unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(body_bytes(response).await, &data[..8]);

        let mut range = HeaderMap::new();
        range.insert(header::RANGE, HeaderValue::from_static("bytes=6-9"));
        let err = get_file(State(state.clone()), Path(id), range).await.unwrap_err();
        assert_eq!(err.status, StatusCode::CONFLICT);

        let err = get_content_by_checksum(State(state), Path("sparse".into()), HeaderMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::CONFLICT);
    }
}
