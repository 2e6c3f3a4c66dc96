//! Upload protocol and lifecycle of the image on screen.
//!
//! Two contexts share one coordinator: the transport handler feeds uploads
//! and strips in, the display loop drains the pending operation and polls
//! the dismiss timeout. Lock order is upload, then pending, then screen.

use std::{
    mem,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering},
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
    },
    time::{Duration, Instant},
};

use anyhow::anyhow;
use log::{debug, error, info, warn};
use serde::Serialize;

use crate::{
    config::ImageApiConfig,
    direct_image::DirectImageScreen,
    display::{DisplaySurface, ScreenLayer},
    error::ImageApiError,
    jpeg_preflight,
    pixel::PixelOrder,
    system::{Clock, HeapProbe, SystemClock, UnlimitedHeap},
};

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle of a whole-image upload in the `Receiving` state
#[derive(Debug, PartialEq, Eq)]
pub struct UploadTicket {
    id: u64,
}

impl UploadTicket {
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Debug)]
struct ReceivingUpload {
    id: u64,
    buffer: Vec<u8>,
    declared_len: usize,
    timeout_ms: u64,
    last_activity_ms: u64,
}

#[derive(Debug)]
enum UploadState {
    Idle,
    Receiving(ReceivingUpload),
    ReadyToProcess,
}

#[derive(Debug)]
pub enum PendingKind {
    Show {
        image: Vec<u8>,
        timeout_ms: u64,
        /// Upload completion, where the dismiss timeout counts from
        completed_at_ms: u64,
    },
    Dismiss,
}

#[derive(Debug)]
pub struct PendingDisplayOperation {
    pub id: u64,
    pub kind: PendingKind,
}

#[derive(Debug, Default)]
struct PendingSlot {
    op: Option<PendingDisplayOperation>,
    last_id: u64,
}

/// Where the strips of the current image stand
#[derive(Debug, Clone, Copy)]
struct StripSequence {
    total: u16,
    next_index: u16,
}

struct ScreenState {
    screen: DirectImageScreen,
    strips: Option<StripSequence>,
}

/// One strip upload as declared by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripRequest {
    pub index: u16,
    pub total: u16,
    /// Size of the full image, not of this strip
    pub width: u16,
    pub height: u16,
    pub timeout_ms: Option<u64>,
    /// Overrides the configured color order
    pub order: Option<PixelOrder>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StripOutcome {
    pub index: u16,
    pub total: u16,
    pub cursor: u16,
    pub complete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Nothing pending and nothing expired
    Idle,
    /// An update is running, the pending operation waits
    Deferred,
    Shown { operation: u64, height: u16 },
    Dismissed { operation: u64, was_visible: bool },
    Failed { operation: u64, reason: String },
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageStatus {
    pub visible: bool,
    pub width: u16,
    pub height: u16,
    pub cursor: u16,
    pub timeout_ms: u64,
    pub upload_in_progress: bool,
    pub pending_operation: Option<u64>,
    pub update_in_progress: bool,
    pub brightness: u8,
}

pub struct ImageUploadCoordinator {
    config: ImageApiConfig,
    clock: Arc<dyn Clock>,
    heap: Arc<dyn HeapProbe>,
    upload: Mutex<UploadState>,
    upload_done: Condvar,
    pending: Mutex<PendingSlot>,
    screen: Mutex<ScreenState>,
    update_in_progress: AtomicBool,
    next_upload_id: AtomicU64,
    brightness: AtomicU8,
}

impl ImageUploadCoordinator {
    pub fn new(
        config: ImageApiConfig,
        surface: Box<dyn DisplaySurface + Send>,
        layer: Box<dyn ScreenLayer + Send>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let (panel_width, panel_height) = (surface.width(), surface.height());
        if panel_width < config.lcd_width || panel_height < config.lcd_height {
            return Err(anyhow!(
                "surface {panel_width}x{panel_height} smaller than configured panel {}x{}",
                config.lcd_width,
                config.lcd_height
            ));
        }
        let screen = DirectImageScreen::new(surface, layer, config.default_timeout_ms);
        let brightness = config.brightness;
        Ok(Self {
            config,
            clock: Arc::new(SystemClock),
            heap: Arc::new(UnlimitedHeap),
            upload: Mutex::new(UploadState::Idle),
            upload_done: Condvar::new(),
            pending: Mutex::new(PendingSlot::default()),
            screen: Mutex::new(ScreenState { screen, strips: None }),
            update_in_progress: AtomicBool::new(false),
            next_upload_id: AtomicU64::new(0),
            brightness: AtomicU8::new(brightness),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_heap(mut self, heap: Arc<dyn HeapProbe>) -> Self {
        self.heap = heap;
        self
    }

    pub fn config(&self) -> &ImageApiConfig {
        &self.config
    }

    pub fn set_update_in_progress(&self, in_progress: bool) {
        info!("Update in progress: {in_progress}");
        self.update_in_progress.store(in_progress, Ordering::SeqCst);
    }

    pub fn is_update_in_progress(&self) -> bool {
        self.update_in_progress.load(Ordering::SeqCst)
    }

    fn check_not_updating(&self) -> Result<(), ImageApiError> {
        if self.is_update_in_progress() {
            warn!("Image upload refused: update in progress");
            return Err(ImageApiError::Busy);
        }
        Ok(())
    }

    // ---- whole image ----

    /// Start receiving an image of `total_len` bytes.
    ///
    /// Waits up to `upload_wait_ms` for an upload that is still receiving.
    pub fn begin_image_upload(&self, total_len: usize, timeout_ms: Option<u64>) -> Result<UploadTicket, ImageApiError> {
        self.check_not_updating()?;
        if total_len == 0 {
            return Err(ImageApiError::Malformed("empty upload".to_string()));
        }
        let max = self.config.max_image_size_bytes;
        if total_len > max {
            warn!("Image too large: {total_len} > {max}");
            return Err(ImageApiError::TooLarge { size: total_len, max });
        }
        let free_heap = self.heap.free_heap();
        let required = total_len.saturating_add(self.config.decode_headroom_bytes);
        if free_heap < required {
            warn!("Insufficient memory: need {required}, free {free_heap}");
            return Err(ImageApiError::InsufficientResources(format!(
                "need {required} bytes free, {free_heap} available"
            )));
        }

        let mut state = self.wait_for_upload_slot()?;

        let mut buffer = Vec::new();
        if buffer.try_reserve_exact(total_len).is_err() {
            error!("Failed to allocate {total_len} byte receive buffer");
            return Err(ImageApiError::InsufficientResources(format!(
                "failed to allocate {total_len} byte receive buffer"
            )));
        }
        let id = self.next_upload_id.fetch_add(1, Ordering::SeqCst) + 1;
        let timeout_ms = self.config.resolve_timeout(timeout_ms);
        *state = UploadState::Receiving(ReceivingUpload {
            id,
            buffer,
            declared_len: total_len,
            timeout_ms,
            last_activity_ms: self.clock.now_ms(),
        });
        info!("Upload {id} started: {total_len} bytes, timeout {timeout_ms}ms");
        Ok(UploadTicket { id })
    }

    fn wait_for_upload_slot(&self) -> Result<MutexGuard<'_, UploadState>, ImageApiError> {
        let wait_limit = Duration::from_millis(self.config.upload_wait_ms);
        let started = Instant::now();
        let mut state = lock(&self.upload);
        loop {
            let UploadState::Receiving(current) = &*state else {
                return Ok(state);
            };
            let idle_ms = self.clock.now_ms().saturating_sub(current.last_activity_ms);
            if idle_ms >= self.config.stale_upload_ms {
                warn!("Evicting stale upload {} (idle {idle_ms}ms)", current.id);
                *state = UploadState::Idle;
                return Ok(state);
            }
            let waited = started.elapsed();
            if waited >= wait_limit {
                warn!("Upload {} still receiving, rejecting new upload", current.id);
                return Err(ImageApiError::Conflict("another upload is in progress".to_string()));
            }
            debug!("Waiting for upload {} to finish", current.id);
            state = self
                .upload_done
                .wait_timeout(state, wait_limit - waited)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Append bytes, returns the number received so far
    pub fn continue_image_upload(&self, ticket: &UploadTicket, data: &[u8]) -> Result<usize, ImageApiError> {
        let mut state = lock(&self.upload);
        let upload = match &mut *state {
            UploadState::Receiving(upload) if upload.id == ticket.id => upload,
            _ => return Err(ImageApiError::Conflict(format!("upload {} is no longer active", ticket.id))),
        };
        let received = upload.buffer.len() + data.len();
        if received > upload.declared_len {
            let declared = upload.declared_len;
            warn!("Upload {} overflow: {received} > {declared}", ticket.id);
            *state = UploadState::Idle;
            self.upload_done.notify_all();
            return Err(ImageApiError::Malformed(format!(
                "received {received} bytes, more than the declared {declared}"
            )));
        }
        upload.buffer.extend_from_slice(data);
        upload.last_activity_ms = self.clock.now_ms();
        Ok(received)
    }

    /// Validate the received image and queue it for display.
    /// Returns the id of the queued operation.
    pub fn end_image_upload(&self, ticket: UploadTicket) -> Result<u64, ImageApiError> {
        let mut state = lock(&self.upload);
        let upload = match mem::replace(&mut *state, UploadState::Idle) {
            UploadState::Receiving(upload) if upload.id == ticket.id => upload,
            other => {
                *state = other;
                return Err(ImageApiError::Conflict(format!("upload {} is no longer active", ticket.id)));
            }
        };
        self.upload_done.notify_all();

        if let Err(err) = self.validate_upload(&upload) {
            warn!("Upload {} rejected: {err}", upload.id);
            return Err(err);
        }

        let completed_at_ms = self.clock.now_ms();
        let operation = self.queue(PendingKind::Show {
            image: upload.buffer,
            timeout_ms: upload.timeout_ms,
            completed_at_ms,
        });
        *state = UploadState::ReadyToProcess;
        info!("Upload {} complete, queued as operation {operation}", upload.id);
        Ok(operation)
    }

    fn validate_upload(&self, upload: &ReceivingUpload) -> Result<(), ImageApiError> {
        if upload.buffer.len() != upload.declared_len {
            return Err(ImageApiError::Malformed(format!(
                "size mismatch: declared {}, received {}",
                upload.declared_len,
                upload.buffer.len()
            )));
        }
        if !upload.buffer.starts_with(&JPEG_SOI) {
            return Err(ImageApiError::Malformed("not a JPEG (missing SOI marker)".to_string()));
        }
        jpeg_preflight::validate_full_frame(&upload.buffer, self.config.lcd_width, self.config.lcd_height)?;
        Ok(())
    }

    /// Drop an upload that will not be completed
    pub fn abort_image_upload(&self, ticket: UploadTicket) {
        let mut state = lock(&self.upload);
        if matches!(&*state, UploadState::Receiving(upload) if upload.id == ticket.id) {
            *state = UploadState::Idle;
            self.upload_done.notify_all();
            info!("Upload {} aborted", ticket.id);
        }
    }

    /// Whether `ticket` still owns the receiving upload
    pub fn is_upload_active(&self, ticket: &UploadTicket) -> bool {
        matches!(&*lock(&self.upload), UploadState::Receiving(upload) if upload.id == ticket.id)
    }

    /// Receive a whole image from a sequence of chunks
    pub fn receive_image<'a, I>(&self, total_len: usize, chunks: I, timeout_ms: Option<u64>) -> Result<u64, ImageApiError>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let ticket = self.begin_image_upload(total_len, timeout_ms)?;
        for chunk in chunks {
            if let Err(err) = self.continue_image_upload(&ticket, chunk) {
                self.abort_image_upload(ticket);
                return Err(err);
            }
        }
        self.end_image_upload(ticket)
    }

    /// Put an operation in the slot, replacing one not yet processed
    fn queue(&self, kind: PendingKind) -> u64 {
        let mut slot = lock(&self.pending);
        slot.last_id += 1;
        let id = slot.last_id;
        if let Some(previous) = slot.op.replace(PendingDisplayOperation { id, kind }) {
            info!("Operation {} replaced by {id} before processing", previous.id);
        }
        id
    }

    // ---- strips ----

    /// Validate and draw one strip within the calling request
    pub fn upload_strip(&self, request: StripRequest, data: &[u8]) -> Result<StripOutcome, ImageApiError> {
        self.check_not_updating()?;
        self.validate_strip_request(&request, data)?;

        let mut state = lock(&self.screen);
        let now = self.clock.now_ms();
        let StripRequest { index, total, width, height, .. } = request;

        if index == 0 {
            if width > self.config.lcd_width || height > self.config.lcd_height {
                return Err(ImageApiError::Unsupported(format!(
                    "image {width}x{height} exceeds panel {}x{}",
                    self.config.lcd_width, self.config.lcd_height
                )));
            }
            // The current image stays up until the new first strip passes preflight
            jpeg_preflight::validate_fragment(data, width, height, self.config.lcd_height)?;
            state.screen.hide();
            state.screen.begin_strip_session(width, height);
            state.screen.set_timeout(self.config.resolve_timeout(request.timeout_ms));
            state.screen.show(now);
            state.strips = Some(StripSequence { total, next_index: 0 });
        } else {
            let session = state.screen.session();
            if !session.is_active() {
                warn!("Strip {index}/{total} without an active session");
                return Err(ImageApiError::Malformed("no active strip session; send strip 0 first".to_string()));
            }
            if width != session.width() {
                warn!("Strip {index}: width mismatch {width} != {}", session.width());
                return Err(ImageApiError::Unsupported(format!(
                    "width mismatch: expected {}, got {width}",
                    session.width()
                )));
            }
            if height != session.height() {
                return Err(ImageApiError::Unsupported(format!(
                    "height mismatch: expected {}, got {height}",
                    session.height()
                )));
            }
            jpeg_preflight::validate_fragment(data, session.width(), session.remaining(), self.config.lcd_height)?;
            if let Some(sequence) = state.strips {
                if index != sequence.next_index {
                    warn!("Strip {index} out of order, expected {}", sequence.next_index);
                }
            }
        }

        let order = request.order.unwrap_or_else(|| self.config.pixel_order());
        match state.screen.decode_strip(data, index, order) {
            Ok(fragment) => {
                state.screen.set_start_time(now);
                if let Some(sequence) = state.strips.as_mut() {
                    sequence.next_index = index.saturating_add(1);
                }
                let complete = index.saturating_add(1) >= total;
                if complete {
                    info!("Strip sequence complete: {width}x{height}, cursor {}", fragment.cursor);
                }
                Ok(StripOutcome {
                    index,
                    total,
                    cursor: fragment.cursor,
                    complete,
                })
            }
            Err(err) => {
                if !self.config.keep_partial_on_error {
                    state.screen.hide();
                    state.strips = None;
                }
                Err(err)
            }
        }
    }

    fn validate_strip_request(&self, request: &StripRequest, data: &[u8]) -> Result<(), ImageApiError> {
        if request.total == 0 || request.index >= request.total {
            return Err(ImageApiError::Malformed(format!(
                "invalid strip index {} of {}",
                request.index, request.total
            )));
        }
        if request.width == 0 || request.height == 0 {
            return Err(ImageApiError::Malformed(format!(
                "invalid image size {}x{}",
                request.width, request.height
            )));
        }
        if data.is_empty() {
            return Err(ImageApiError::Malformed("empty strip".to_string()));
        }
        let max = self.config.max_image_size_bytes;
        if data.len() > max {
            return Err(ImageApiError::TooLarge { size: data.len(), max });
        }
        if !data.starts_with(&JPEG_SOI) {
            return Err(ImageApiError::Malformed("not a JPEG (missing SOI marker)".to_string()));
        }
        Ok(())
    }

    // ---- dismiss, processing ----

    /// Always accepted. Aborts a receiving upload and replaces the pending
    /// operation with a dismiss.
    pub fn dismiss(&self) -> u64 {
        let mut state = lock(&self.upload);
        if let UploadState::Receiving(upload) = &*state {
            warn!("Dismiss aborts upload {}", upload.id);
        }
        let operation = self.queue(PendingKind::Dismiss);
        *state = UploadState::ReadyToProcess;
        self.upload_done.notify_all();
        info!("Dismiss queued as operation {operation}");
        operation
    }

    /// Run at most one pending operation, then check the dismiss timeout
    pub fn process_pending(&self, update_in_progress: bool) -> ProcessOutcome {
        if update_in_progress || self.is_update_in_progress() {
            return ProcessOutcome::Deferred;
        }

        let op = lock(&self.pending).op.take();
        if let Some(op) = op {
            let outcome = self.execute(op);
            self.settle_after_execute();
            return outcome;
        }

        let mut state = lock(&self.screen);
        if state.screen.is_visible() && state.screen.is_timeout_expired(self.clock.now_ms()) {
            info!("Direct image timeout after {}ms", state.screen.timeout_ms());
            state.screen.hide();
            state.strips = None;
            return ProcessOutcome::TimedOut;
        }
        ProcessOutcome::Idle
    }

    /// An upload finished during execute may have queued the next operation
    fn settle_after_execute(&self) {
        let mut state = lock(&self.upload);
        if matches!(&*state, UploadState::ReadyToProcess) && lock(&self.pending).op.is_none() {
            *state = UploadState::Idle;
        }
    }

    fn execute(&self, op: PendingDisplayOperation) -> ProcessOutcome {
        let operation = op.id;
        let mut state = lock(&self.screen);
        match op.kind {
            PendingKind::Dismiss => {
                let was_visible = state.screen.is_visible();
                state.screen.hide();
                state.strips = None;
                info!("Operation {operation}: dismissed (visible: {was_visible})");
                ProcessOutcome::Dismissed { operation, was_visible }
            }
            PendingKind::Show {
                image,
                timeout_ms,
                completed_at_ms,
            } => {
                state.screen.hide();
                state.strips = None;
                state
                    .screen
                    .begin_strip_session(self.config.lcd_width, self.config.lcd_height);
                state.screen.set_timeout(timeout_ms);
                state.screen.set_start_time(completed_at_ms);
                state.screen.show(self.clock.now_ms());

                match state.screen.decode_strip(&image, 0, self.config.pixel_order()) {
                    Ok(fragment) => {
                        info!("Operation {operation}: image shown, {} bytes", image.len());
                        ProcessOutcome::Shown {
                            operation,
                            height: fragment.height,
                        }
                    }
                    Err(err) => {
                        error!("Operation {operation}: decode failed: {err}");
                        if !self.config.keep_partial_on_error {
                            state.screen.hide();
                        }
                        ProcessOutcome::Failed {
                            operation,
                            reason: err.to_string(),
                        }
                    }
                }
            }
        }
    }

    // ---- backlight, status ----

    pub fn brightness(&self) -> u8 {
        self.brightness.load(Ordering::SeqCst)
    }

    /// Clamp to 0..=100 and apply, returns the level set
    pub fn set_brightness(&self, percent: i64) -> anyhow::Result<u8> {
        let percent = percent.clamp(0, 100) as u8;
        lock(&self.screen).screen.surface_mut().set_backlight(percent)?;
        self.brightness.store(percent, Ordering::SeqCst);
        info!("Brightness set to {percent}");
        Ok(percent)
    }

    pub fn status(&self) -> ImageStatus {
        let upload_in_progress = matches!(&*lock(&self.upload), UploadState::Receiving(_));
        let pending_operation = lock(&self.pending).op.as_ref().map(|op| op.id);
        let state = lock(&self.screen);
        let session = state.screen.session();
        ImageStatus {
            visible: state.screen.is_visible(),
            width: session.width(),
            height: session.height(),
            cursor: session.cursor(),
            timeout_ms: state.screen.timeout_ms(),
            upload_in_progress,
            pending_operation,
            update_in_progress: self.is_update_in_progress(),
            brightness: self.brightness(),
        }
    }
}
