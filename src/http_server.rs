//! Request handling of the image API, independent of the HTTP server.
//!
//! The firmware's server hands every request (or body chunk) to
//! [`ImageHttpApi`] and writes the returned [`ApiResponse`] back.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use anyhow::{anyhow, Result};
use log::*;
use serde_json::{json, Value};

use crate::{
    coordinator::{ImageUploadCoordinator, StripRequest, UploadTicket},
    error::ImageApiError,
    pixel::PixelOrder,
    utils::{optional_param, query_params, required_param, uri_path},
};

pub const CONTENT_TYPE_JSON: &str = "application/json; charset=utf-8";

/// Rejected requests remembered for dropping their trailing chunks
const MAX_REJECTED_REQUESTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    pub fn message(status: u16, success: bool, message: &str) -> Self {
        Self {
            status,
            body: json!({ "success": success, "message": message }),
        }
    }

    pub fn error(err: &ImageApiError) -> Self {
        Self::message(err.status_code(), false, &err.to_string())
    }

    pub fn content_type(&self) -> &'static str {
        CONTENT_TYPE_JSON
    }

    pub fn body_string(&self) -> String {
        self.body.to_string()
    }
}

#[derive(Default)]
struct ChunkedUploads {
    tickets: HashMap<u64, UploadTicket>,
    /// Requests already answered with an error, their remaining chunks are dropped
    rejected: BTreeSet<u64>,
}

impl ChunkedUploads {
    fn remember_rejected(&mut self, request_id: u64) {
        self.rejected.insert(request_id);
        while self.rejected.len() > MAX_REJECTED_REQUESTS {
            self.rejected.pop_first();
        }
    }
}

pub struct ImageHttpApi {
    coordinator: Arc<ImageUploadCoordinator>,
    uploads: Mutex<ChunkedUploads>,
    next_request_id: AtomicU64,
}

impl ImageHttpApi {
    pub fn new(coordinator: Arc<ImageUploadCoordinator>) -> Self {
        Self {
            coordinator,
            uploads: Mutex::new(ChunkedUploads::default()),
            next_request_id: AtomicU64::new(1),
        }
    }

    /// Id tying the body chunks of one request together
    pub fn next_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Requests with a complete body
    pub fn handle(&self, method: Method, uri: &str, body: &[u8]) -> ApiResponse {
        let response = match (method, uri_path(uri)) {
            (Method::Post, "/api/display/image") => {
                let request_id = self.next_request_id();
                self.handle_image_chunk(request_id, uri, body, 0, body.len())
                    .unwrap_or_else(|| ApiResponse::message(500, false, "upload incomplete"))
            }
            (Method::Post, "/api/display/strip") => self.upload_strip(uri, body),
            (Method::Delete, "/api/display/image") => {
                let operation = self.coordinator.dismiss();
                ApiResponse::ok(json!({ "success": true, "message": "image dismissed", "operation": operation }))
            }
            (Method::Get, "/api/display/status") => self.status(),
            (Method::Get, "/api/brightness") => {
                ApiResponse::ok(json!({ "success": true, "brightness": self.coordinator.brightness() }))
            }
            (Method::Post, "/api/brightness") => self.set_brightness(body),
            (_, path) => {
                warn!("No route for {method:?} {path}");
                ApiResponse::message(404, false, "not found")
            }
        };
        if response.status != 200 {
            info!("{method:?} {uri} -> {} {}", response.status, response.body);
        }
        response
    }

    /// One body chunk of `POST /api/display/image?timeout=<seconds>`.
    ///
    /// `index` is the offset of `data` in the body and `total` the declared
    /// body length. Returns the response once the request is answered; chunks
    /// after an early rejection yield `None`.
    pub fn handle_image_chunk(
        &self,
        request_id: u64,
        uri: &str,
        data: &[u8],
        index: usize,
        total: usize,
    ) -> Option<ApiResponse> {
        let is_last = index + data.len() >= total;

        if self.uploads().rejected.contains(&request_id) {
            if is_last {
                self.uploads().rejected.remove(&request_id);
            }
            return None;
        }

        if index == 0 {
            let ticket = match self.begin_upload(uri, total) {
                Ok(ticket) => ticket,
                Err(err) => return Some(self.reject(request_id, &err, is_last)),
            };
            let mut uploads = self.uploads();
            // tickets of abandoned or evicted requests
            uploads.tickets.retain(|id, ticket| {
                let active = self.coordinator.is_upload_active(ticket);
                if !active {
                    debug!("Dropping ticket of request {id}");
                }
                active
            });
            uploads.tickets.insert(request_id, ticket);
        }

        let ticket = self.uploads().tickets.remove(&request_id);
        let Some(ticket) = ticket else {
            let err = ImageApiError::Conflict("no upload in progress for this request".to_string());
            return Some(self.reject(request_id, &err, is_last));
        };

        if let Err(err) = self.coordinator.continue_image_upload(&ticket, data) {
            self.coordinator.abort_image_upload(ticket);
            return Some(self.reject(request_id, &err, is_last));
        }

        if !is_last {
            self.uploads().tickets.insert(request_id, ticket);
            return None;
        }

        match self.coordinator.end_image_upload(ticket) {
            Ok(operation) => Some(ApiResponse::ok(json!({
                "success": true,
                "message": "image queued",
                "operation": operation,
            }))),
            Err(err) => Some(ApiResponse::error(&err)),
        }
    }

    /// The transport lost the request before its last chunk
    pub fn abort_request(&self, request_id: u64) {
        let ticket = {
            let mut uploads = self.uploads();
            uploads.rejected.remove(&request_id);
            uploads.tickets.remove(&request_id)
        };
        if let Some(ticket) = ticket {
            info!("Image upload request {request_id} aborted");
            self.coordinator.abort_image_upload(ticket);
        }
    }

    /// Requests with an open ticket or a rejection still remembered
    pub fn tracked_requests(&self) -> usize {
        let uploads = self.uploads();
        uploads.tickets.len() + uploads.rejected.len()
    }

    fn begin_upload(&self, uri: &str, total: usize) -> Result<UploadTicket, ImageApiError> {
        let params = query_params(uri).map_err(malformed)?;
        let timeout_ms = optional_param::<u64>(&params, "timeout")
            .map_err(malformed)?
            .map(|secs| secs.saturating_mul(1000));
        self.coordinator.begin_image_upload(total, timeout_ms)
    }

    fn reject(&self, request_id: u64, err: &ImageApiError, is_last: bool) -> ApiResponse {
        warn!("Image upload request {request_id} rejected: {err}");
        if !is_last {
            self.uploads().remember_rejected(request_id);
        }
        ApiResponse::error(err)
    }

    fn uploads(&self) -> std::sync::MutexGuard<'_, ChunkedUploads> {
        self.uploads.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn upload_strip(&self, uri: &str, body: &[u8]) -> ApiResponse {
        let request = match parse_strip_request(uri) {
            Ok(request) => request,
            Err(err) => return ApiResponse::error(&malformed(err)),
        };
        match self.coordinator.upload_strip(request, body) {
            Ok(outcome) => ApiResponse::ok(json!({
                "success": true,
                "index": outcome.index,
                "total": outcome.total,
                "cursor": outcome.cursor,
                "complete": outcome.complete,
            })),
            Err(err) => ApiResponse::error(&err),
        }
    }

    fn status(&self) -> ApiResponse {
        match serde_json::to_value(self.coordinator.status()) {
            Ok(mut body) => {
                body["success"] = json!(true);
                ApiResponse::ok(body)
            }
            Err(err) => ApiResponse::message(500, false, &format!("{err:?}")),
        }
    }

    fn set_brightness(&self, body: &[u8]) -> ApiResponse {
        let value = match serde_json::from_slice::<Value>(body) {
            Ok(value) => value,
            Err(_) => return ApiResponse::message(400, false, "Invalid JSON"),
        };
        let brightness = match value.get("brightness") {
            Some(v) => match v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)) {
                Some(b) => b,
                None => return ApiResponse::message(400, false, "brightness must be a number"),
            },
            None => return ApiResponse::message(400, false, "Missing brightness field"),
        };
        match self.coordinator.set_brightness(brightness) {
            Ok(brightness) => ApiResponse::ok(json!({ "success": true, "brightness": brightness })),
            Err(err) => {
                error!("set brightness: {err:?}");
                ApiResponse::message(500, false, &format!("{err}"))
            }
        }
    }
}

fn malformed(err: anyhow::Error) -> ImageApiError {
    ImageApiError::Malformed(err.to_string())
}

/// `index`, `total`, `width` and `height` are required; `timeout` is in seconds
fn parse_strip_request(uri: &str) -> Result<StripRequest> {
    let params = query_params(uri)?;
    let order = match params.get("order").map(|s| s.to_ascii_lowercase()) {
        None => None,
        Some(s) if s == "bgr" || s == "bgr565" => Some(PixelOrder::Bgr565),
        Some(s) if s == "rgb" || s == "rgb565" => Some(PixelOrder::Rgb565),
        Some(other) => return Err(anyhow!("invalid parameter order: `{other}`")),
    };
    Ok(StripRequest {
        index: required_param(&params, "index")?,
        total: required_param(&params, "total")?,
        width: required_param(&params, "width")?,
        height: required_param(&params, "height")?,
        timeout_ms: optional_param::<u64>(&params, "timeout")?.map(|secs| secs.saturating_mul(1000)),
        order,
    })
}
