//! Strip-based JPEG image pipeline of the power monitor display.
//!
//! Clients upload a JPEG either whole or as horizontal strips. Every strip is
//! checked by [`jpeg_preflight`], decoded on its own by [`strip_decoder`] and
//! written row by row to the panel, so the working memory stays constant
//! whatever the size of the image. [`coordinator`] runs the upload protocol
//! and owns the image shown on screen; [`http_server`] maps it onto the HTTP
//! routes and [`runtime`] drives the deferred work.

pub mod config;
pub mod coordinator;
pub mod direct_image;
pub mod display;
pub mod error;
pub mod http_server;
pub mod jpeg_preflight;
pub mod pixel;
pub mod runtime;
pub mod strip_decoder;
pub mod system;
mod utils;

pub use config::{parse_image_api_config, DisplayColorOrder, ImageApiConfig};
pub use coordinator::{
    ImageStatus, ImageUploadCoordinator, ProcessOutcome, StripOutcome, StripRequest, UploadTicket,
};
pub use direct_image::DirectImageScreen;
pub use display::{DisplaySurface, DrawTargetSurface, FrameBuffer, LayerVisibility, ScreenLayer};
pub use error::ImageApiError;
pub use http_server::{ApiResponse, ImageHttpApi, Method};
pub use jpeg_preflight::{validate_fragment, validate_full_frame, JpegFrameInfo, PreflightError};
pub use pixel::PixelOrder;
pub use runtime::{DisplayLoop, DisplayLoopHandle};
pub use strip_decoder::{DecodedFragment, StripDecodeSession};
pub use system::{Clock, HeapProbe, ManualClock, SystemClock, UnlimitedHeap};
