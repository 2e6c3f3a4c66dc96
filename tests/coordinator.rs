mod common;

use std::{
    sync::Arc,
    thread,
    time::Duration,
};

use common::*;
use powermon_display::{
    FrameBuffer, ImageApiConfig, ImageApiError, ImageUploadCoordinator, LayerVisibility, ProcessOutcome,
    StripRequest,
};

fn strip(index: u16, total: u16, width: u16, height: u16) -> StripRequest {
    StripRequest {
        index,
        total,
        width,
        height,
        timeout_ms: None,
        order: None,
    }
}

#[test]
fn whole_image_is_shown_and_dismissed_after_timeout() {
    let rig = Rig::new();
    let image = solid_jpeg(240, 280, BLUE);

    rig.clock.set(1000);
    let operation = rig.coordinator.receive_image(image.len(), image.chunks(1000), None).unwrap();
    let status = rig.coordinator.status();
    assert_eq!(status.pending_operation, Some(operation));
    assert!(!status.visible);

    rig.clock.set(1500);
    assert_eq!(
        rig.coordinator.process_pending(false),
        ProcessOutcome::Shown { operation, height: 280 }
    );
    assert!(rig.widgets.is_obscured());
    assert_bgr565_close(rig.pixel(0, 0), BLUE);
    assert_bgr565_close(rig.pixel(239, 279), BLUE);

    let status = rig.coordinator.status();
    assert!(status.visible);
    assert_eq!(status.cursor, 280);
    assert_eq!(status.timeout_ms, 10_000);

    // counted from upload completion, not from processing
    rig.clock.set(10_999);
    assert_eq!(rig.coordinator.process_pending(false), ProcessOutcome::Idle);
    rig.clock.set(11_000);
    assert_eq!(rig.coordinator.process_pending(false), ProcessOutcome::TimedOut);
    assert!(!rig.widgets.is_obscured());
    assert!(!rig.coordinator.status().visible);
}

#[test]
fn progressive_upload_is_rejected_at_preflight() {
    let rig = Rig::new();
    let image = progressive_jpeg(240, 280);
    let err = rig
        .coordinator
        .receive_image(image.len(), [image.as_slice()], None)
        .unwrap_err();

    assert!(matches!(err, ImageApiError::Unsupported(_)));
    assert_eq!(err.status_code(), 400);
    let message = err.to_string();
    assert!(message.contains("progressive encoding"), "{message}");
    assert!(message.contains("use baseline JPEG"), "{message}");

    let status = rig.coordinator.status();
    assert!(!status.upload_in_progress);
    assert_eq!(status.pending_operation, None);
    assert_eq!(rig.coordinator.process_pending(false), ProcessOutcome::Idle);
}

#[test]
fn wrong_dimensions_are_rejected_at_preflight() {
    let rig = Rig::new();
    let image = solid_jpeg(240, 200, RED);
    let err = rig.coordinator.receive_image(image.len(), [image.as_slice()], None).unwrap_err();
    assert!(err.to_string().contains("height mismatch: expected 280, got 200"), "{err}");

    let image = solid_jpeg(200, 280, RED);
    let err = rig.coordinator.receive_image(image.len(), [image.as_slice()], None).unwrap_err();
    assert!(err.to_string().contains("expected 240, got 200"), "{err}");
}

#[test]
fn strip_width_mismatch_keeps_the_cursor() {
    let rig = Rig::new();

    let outcome = rig
        .coordinator
        .upload_strip(strip(0, 3, 240, 48), &solid_jpeg(240, 16, RED))
        .unwrap();
    assert_eq!(outcome.cursor, 16);
    assert!(!outcome.complete);

    let err = rig
        .coordinator
        .upload_strip(strip(1, 3, 241, 48), &solid_jpeg(241, 16, GREEN))
        .unwrap_err();
    assert!(err.to_string().contains("width mismatch: expected 240, got 241"), "{err}");

    assert_eq!(rig.coordinator.status().cursor, 16);
    assert_bgr565_close(rig.pixel(0, 0), RED);
    assert_bgr565_close(rig.pixel(239, 15), RED);
    assert_eq!(rig.pixel(0, 16), 0);
}

#[test]
fn rejected_first_strip_leaves_the_current_image() {
    let rig = Rig::new();
    for (index, color) in [RED, GREEN, BLUE].into_iter().enumerate() {
        let request = StripRequest { timeout_ms: Some(30_000), ..strip(index as u16, 3, 240, 48) };
        rig.coordinator.upload_strip(request, &solid_jpeg(240, 16, color)).unwrap();
    }

    let err = rig
        .coordinator
        .upload_strip(strip(0, 2, 240, 32), &progressive_jpeg(240, 16))
        .unwrap_err();
    assert!(err.to_string().contains("progressive encoding"), "{err}");

    let status = rig.coordinator.status();
    assert!(status.visible);
    assert_eq!((status.width, status.height, status.cursor), (240, 48, 48));
    assert_eq!(status.timeout_ms, 30_000);
    assert!(rig.widgets.is_obscured());
    assert_bgr565_close(rig.pixel(10, 40), BLUE);

    // a strip 0 past the panel is refused before anything changes too
    let err = rig
        .coordinator
        .upload_strip(strip(0, 1, 240, 281), &solid_jpeg(240, 16, RED))
        .unwrap_err();
    assert!(err.to_string().contains("exceeds panel"), "{err}");
    assert_eq!(rig.coordinator.status().cursor, 48);
}

#[test]
fn strip_sequence_completes() {
    let rig = Rig::new();
    let colors = [RED, GREEN, BLUE];
    for (index, color) in colors.into_iter().enumerate() {
        let outcome = rig
            .coordinator
            .upload_strip(strip(index as u16, 3, 240, 48), &solid_jpeg(240, 16, color))
            .unwrap();
        assert_eq!(outcome.cursor, 16 * (index as u16 + 1));
        assert_eq!(outcome.complete, index == 2);
    }
    assert!(rig.widgets.is_obscured());
    assert_bgr565_close(rig.pixel(10, 40), BLUE);

    // a fourth strip has no room left
    let err = rig
        .coordinator
        .upload_strip(strip(2, 3, 240, 48), &solid_jpeg(240, 16, RED))
        .unwrap_err();
    assert!(err.to_string().contains("exceeds remaining image height 0"), "{err}");
}

#[test]
fn out_of_order_strip_is_drawn_at_the_cursor() {
    let rig = Rig::new();
    rig.coordinator
        .upload_strip(strip(0, 3, 240, 48), &solid_jpeg(240, 16, RED))
        .unwrap();
    let outcome = rig
        .coordinator
        .upload_strip(strip(2, 3, 240, 48), &solid_jpeg(240, 16, BLUE))
        .unwrap();
    assert_eq!(outcome.cursor, 32);
    assert!(outcome.complete);
    assert_bgr565_close(rig.pixel(0, 16), BLUE);
}

#[test]
fn strip_zero_restarts_the_session() {
    let rig = Rig::new();
    rig.coordinator
        .upload_strip(strip(0, 2, 240, 32), &solid_jpeg(240, 16, RED))
        .unwrap();
    let outcome = rig
        .coordinator
        .upload_strip(strip(0, 2, 240, 32), &solid_jpeg(240, 16, GREEN))
        .unwrap();
    assert_eq!(outcome.cursor, 16);
    assert_bgr565_close(rig.pixel(0, 0), GREEN);
}

#[test]
fn strip_timeout_counts_from_the_last_strip() {
    let rig = Rig::new();
    let first = StripRequest {
        timeout_ms: Some(5000),
        ..strip(0, 2, 240, 32)
    };
    rig.coordinator.upload_strip(first, &solid_jpeg(240, 16, RED)).unwrap();
    rig.clock.set(4000);
    rig.coordinator
        .upload_strip(strip(1, 2, 240, 32), &solid_jpeg(240, 16, RED))
        .unwrap();

    rig.clock.set(8999);
    assert_eq!(rig.coordinator.process_pending(false), ProcessOutcome::Idle);
    rig.clock.set(9000);
    assert_eq!(rig.coordinator.process_pending(false), ProcessOutcome::TimedOut);
    assert!(!rig.coordinator.status().visible);
}

#[test]
fn zero_timeout_never_dismisses() {
    let rig = Rig::new();
    let image = solid_jpeg(240, 280, GREEN);
    rig.coordinator.receive_image(image.len(), [image.as_slice()], Some(0)).unwrap();
    assert!(matches!(rig.coordinator.process_pending(false), ProcessOutcome::Shown { .. }));
    rig.clock.set(u64::MAX / 2);
    assert_eq!(rig.coordinator.process_pending(false), ProcessOutcome::Idle);
    assert!(rig.coordinator.status().visible);
}

#[test]
fn broken_strip_keeps_partial_image_by_default() {
    let rig = Rig::new();
    rig.coordinator
        .upload_strip(strip(0, 2, 240, 32), &solid_jpeg(240, 16, RED))
        .unwrap();
    let err = rig
        .coordinator
        .upload_strip(strip(1, 2, 240, 32), &truncated(&solid_jpeg(240, 16, BLUE)))
        .unwrap_err();
    assert!(matches!(err, ImageApiError::Decode(_)));

    let status = rig.coordinator.status();
    assert!(status.visible);
    assert_eq!(status.cursor, 16);
    assert_bgr565_close(rig.pixel(0, 0), RED);
}

#[test]
fn broken_strip_can_drop_the_image() {
    let rig = Rig::with_config(ImageApiConfig {
        keep_partial_on_error: false,
        ..Default::default()
    });
    rig.coordinator
        .upload_strip(strip(0, 2, 240, 32), &solid_jpeg(240, 16, RED))
        .unwrap();
    rig.coordinator
        .upload_strip(strip(1, 2, 240, 32), &truncated(&solid_jpeg(240, 16, BLUE)))
        .unwrap_err();

    let status = rig.coordinator.status();
    assert!(!status.visible);
    assert_eq!(status.cursor, 0);
    assert!(!rig.widgets.is_obscured());
}

#[test]
fn broken_whole_image_fails_when_processed() {
    let rig = Rig::new();
    let image = truncated(&solid_jpeg(240, 280, RED));
    let operation = rig.coordinator.receive_image(image.len(), [image.as_slice()], None).unwrap();
    match rig.coordinator.process_pending(false) {
        ProcessOutcome::Failed { operation: failed, reason } => {
            assert_eq!(failed, operation);
            assert!(reason.contains("decode failed"), "{reason}");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(rig.coordinator.process_pending(false), ProcessOutcome::Idle);
}

#[test]
fn second_pending_upload_replaces_the_first() {
    let rig = Rig::new();
    let first = solid_jpeg(240, 280, RED);
    let second = solid_jpeg(240, 280, GREEN);
    rig.coordinator.receive_image(first.len(), [first.as_slice()], None).unwrap();
    let operation = rig.coordinator.receive_image(second.len(), [second.as_slice()], None).unwrap();

    assert_eq!(
        rig.coordinator.process_pending(false),
        ProcessOutcome::Shown { operation, height: 280 }
    );
    assert_eq!(rig.coordinator.process_pending(false), ProcessOutcome::Idle);
    assert_bgr565_close(rig.pixel(100, 100), GREEN);
}

#[test]
fn dismiss_hides_the_image_and_is_idempotent() {
    let rig = Rig::new();
    let image = solid_jpeg(240, 280, RED);
    rig.coordinator.receive_image(image.len(), [image.as_slice()], None).unwrap();
    rig.coordinator.process_pending(false);
    assert!(rig.widgets.is_obscured());

    let operation = rig.coordinator.dismiss();
    assert_eq!(
        rig.coordinator.process_pending(false),
        ProcessOutcome::Dismissed { operation, was_visible: true }
    );
    assert!(!rig.widgets.is_obscured());

    let operation = rig.coordinator.dismiss();
    assert_eq!(
        rig.coordinator.process_pending(false),
        ProcessOutcome::Dismissed { operation, was_visible: false }
    );
}

#[test]
fn dismiss_replaces_an_unprocessed_image() {
    let rig = Rig::new();
    let image = solid_jpeg(240, 280, RED);
    rig.coordinator.receive_image(image.len(), [image.as_slice()], None).unwrap();
    let operation = rig.coordinator.dismiss();
    assert_eq!(
        rig.coordinator.process_pending(false),
        ProcessOutcome::Dismissed { operation, was_visible: false }
    );
    assert_eq!(rig.pixel(0, 0), 0);
}

#[test]
fn update_in_progress_blocks_uploads_and_defers_processing() {
    let rig = Rig::new();
    let image = solid_jpeg(240, 280, RED);
    rig.coordinator.receive_image(image.len(), [image.as_slice()], None).unwrap();

    assert_eq!(rig.coordinator.process_pending(true), ProcessOutcome::Deferred);
    rig.coordinator.set_update_in_progress(true);
    let err = rig
        .coordinator
        .upload_strip(strip(0, 1, 240, 16), &solid_jpeg(240, 16, RED))
        .unwrap_err();
    assert_eq!(err.status_code(), 503);
    assert!(rig.coordinator.status().pending_operation.is_some());

    rig.coordinator.set_update_in_progress(false);
    assert!(matches!(rig.coordinator.process_pending(false), ProcessOutcome::Shown { .. }));
}

fn threaded_coordinator(upload_wait_ms: u64) -> (Arc<ImageUploadCoordinator>, Arc<std::sync::Mutex<FrameBuffer>>) {
    let panel = Arc::new(std::sync::Mutex::new(FrameBuffer::new(240, 280)));
    let config = ImageApiConfig {
        upload_wait_ms,
        ..Default::default()
    };
    let coordinator = ImageUploadCoordinator::new(config, Box::new(panel.clone()), Box::new(LayerVisibility::new())).unwrap();
    (Arc::new(coordinator), panel)
}

#[test]
fn concurrent_upload_waits_for_the_first() {
    let (coordinator, panel) = threaded_coordinator(1000);
    let first = solid_jpeg(240, 280, RED);
    let second = solid_jpeg(240, 280, GREEN);

    let ticket = coordinator.begin_image_upload(first.len(), None).unwrap();
    let uploader = {
        let coordinator = coordinator.clone();
        thread::spawn(move || {
            let (head, tail) = first.split_at(first.len() / 2);
            coordinator.continue_image_upload(&ticket, head).unwrap();
            thread::sleep(Duration::from_millis(200));
            coordinator.continue_image_upload(&ticket, tail).unwrap();
            coordinator.end_image_upload(ticket)
        })
    };

    thread::sleep(Duration::from_millis(50));
    let second_op = coordinator.receive_image(second.len(), [second.as_slice()], None).unwrap();
    let first_op = uploader.join().unwrap().unwrap();
    assert!(second_op > first_op);

    assert_eq!(
        coordinator.process_pending(false),
        ProcessOutcome::Shown { operation: second_op, height: 280 }
    );
    assert_eq!(coordinator.process_pending(false), ProcessOutcome::Idle);
    assert_bgr565_close(panel.lock().unwrap().pixel(120, 140), GREEN);
}

#[test]
fn concurrent_upload_conflicts_after_the_wait() {
    let (coordinator, panel) = threaded_coordinator(100);
    let first = solid_jpeg(240, 280, RED);
    let second = solid_jpeg(240, 280, GREEN);

    let ticket = coordinator.begin_image_upload(first.len(), None).unwrap();
    let uploader = {
        let coordinator = coordinator.clone();
        thread::spawn(move || {
            let (head, tail) = first.split_at(first.len() / 2);
            coordinator.continue_image_upload(&ticket, head).unwrap();
            thread::sleep(Duration::from_millis(400));
            coordinator.continue_image_upload(&ticket, tail).unwrap();
            coordinator.end_image_upload(ticket)
        })
    };

    thread::sleep(Duration::from_millis(50));
    let err = coordinator
        .receive_image(second.len(), [second.as_slice()], None)
        .unwrap_err();
    assert!(matches!(err, ImageApiError::Conflict(_)));
    assert_eq!(err.status_code(), 409);

    let first_op = uploader.join().unwrap().unwrap();
    assert_eq!(
        coordinator.process_pending(false),
        ProcessOutcome::Shown { operation: first_op, height: 280 }
    );
    assert_bgr565_close(panel.lock().unwrap().pixel(120, 140), RED);
}
