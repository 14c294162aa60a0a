//! Integration tests for handshake, dispatch, and fire-and-forget sends.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use glyphline_codec::{AudioClip, Envelope, OcrResult, Payload, decode, encode};
use glyphline_core::{EncodedImage, ImageFormat};
use glyphline_transport::{
    InboundActivity, MemorySocketHandle, MessageHandlers, ScreenshotSource, TransportError,
    TransportSession, memory_socket_pair, SCREENSHOT_KEY,
};

const POLL: Duration = Duration::from_millis(1);
const HANDSHAKE: Duration = Duration::from_millis(20);

struct FixedScreenshots(Option<EncodedImage>);

impl ScreenshotSource for FixedScreenshots {
    fn capture_screenshot(&mut self) -> Option<EncodedImage> {
        self.0.clone()
    }
}

fn envelope_frame(payload: Payload<'_>) -> Vec<u8> {
    encode(&Envelope {
        timestamp_ms: 1_000,
        payload,
    })
    .expect("encode should succeed")
}

fn acked_session(handle: &MemorySocketHandle) {
    handle.push_inbound(envelope_frame(Payload::Init));
}

fn connect(
    screenshots: Option<EncodedImage>,
) -> (TransportSession, MemorySocketHandle) {
    let (socket, handle) = memory_socket_pair();
    acked_session(&handle);
    let session = TransportSession::connect_with_timeout(
        Box::new(socket),
        Box::new(FixedScreenshots(screenshots)),
        HANDSHAKE,
    )
    .expect("handshake should complete");
    (session, handle)
}

#[test]
fn dispatch_tests_init_is_first_outbound_frame() {
    let (session, handle) = connect(None);
    assert!(session.is_connected());

    let sent = handle.sent_frames();
    assert_eq!(sent.len(), 1);
    let envelope = decode(&sent[0]).expect("init frame should decode");
    assert!(matches!(envelope.payload, Payload::Init));
}

#[test]
fn dispatch_tests_silent_peer_times_out() {
    let (socket, handle) = memory_socket_pair();
    let result = TransportSession::connect_with_timeout(
        Box::new(socket),
        Box::new(FixedScreenshots(None)),
        HANDSHAKE,
    );

    assert!(matches!(result, Err(TransportError::HandshakeTimeout)));
    assert!(!handle.is_open(), "failed handshake should close the socket");
}

#[test]
fn dispatch_tests_non_init_ack_is_served_on_first_poll() {
    let (socket, handle) = memory_socket_pair();
    handle.push_inbound(envelope_frame(Payload::OcrResult(OcrResult {
        text: "early",
    })));

    let mut session = TransportSession::connect_with_timeout(
        Box::new(socket),
        Box::new(FixedScreenshots(None)),
        HANDSHAKE,
    )
    .expect("any inbound envelope should complete the handshake");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    session.set_message_handler(MessageHandlers {
        on_ocr_result: Box::new(move |text| sink.lock().unwrap().push(text.to_string())),
        ..MessageHandlers::default()
    });

    let activity = session.poll_inbound(POLL).expect("poll should succeed");
    assert_eq!(activity, InboundActivity::Handled);
    assert_eq!(seen.lock().unwrap().as_slice(), ["early".to_string()]);
}

#[test]
fn dispatch_tests_screenshot_request_yields_exactly_one_response() {
    let image = EncodedImage {
        format: ImageFormat::Png,
        bytes: vec![1, 2, 3, 4],
    };
    let (mut session, handle) = connect(Some(image));

    handle.push_inbound(envelope_frame(Payload::RequestScreenshot));
    session.poll_inbound(POLL).expect("poll should succeed");

    let sent = handle.sent_frames();
    // Init plus the single screenshot response.
    assert_eq!(sent.len(), 2);
    let envelope = decode(&sent[1]).expect("response frame should decode");
    match envelope.payload {
        Payload::ResponseScreenshot(reply) => {
            assert_eq!(reply.key, SCREENSHOT_KEY);
            assert_eq!(reply.format, ImageFormat::Png);
            assert_eq!(reply.image, [1, 2, 3, 4]);
        }
        other => panic!("expected a screenshot response, got {other:?}"),
    }
}

#[test]
fn dispatch_tests_failed_capture_sends_nothing() {
    let (mut session, handle) = connect(None);

    handle.push_inbound(envelope_frame(Payload::RequestScreenshot));
    session.poll_inbound(POLL).expect("poll should succeed");

    assert_eq!(handle.sent_frames().len(), 1, "only init should be sent");
}

#[test]
fn dispatch_tests_audio_reaches_handler() {
    let (mut session, handle) = connect(None);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    session.set_message_handler(MessageHandlers {
        on_audio: Box::new(move |bytes, mime| {
            sink.lock().unwrap().push((bytes.to_vec(), mime.to_string()));
        }),
        ..MessageHandlers::default()
    });

    handle.push_inbound(envelope_frame(Payload::Audio(AudioClip {
        audio: &[9, 9, 9],
        mime: "audio/mpeg",
    })));
    session.poll_inbound(POLL).expect("poll should succeed");

    assert_eq!(
        seen.lock().unwrap().as_slice(),
        [(vec![9, 9, 9], "audio/mpeg".to_string())]
    );
}

#[test]
fn dispatch_tests_malformed_frame_is_dropped_and_session_survives() {
    let (mut session, handle) = connect(None);

    let errors = Arc::new(Mutex::new(0_usize));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let error_sink = Arc::clone(&errors);
    let text_sink = Arc::clone(&seen);
    session.set_message_handler(MessageHandlers {
        on_ocr_result: Box::new(move |text| text_sink.lock().unwrap().push(text.to_string())),
        on_error: Box::new(move |_| *error_sink.lock().unwrap() += 1),
        ..MessageHandlers::default()
    });

    handle.push_inbound(vec![0xAA, 0xBB]);
    handle.push_inbound(envelope_frame(Payload::OcrResult(OcrResult {
        text: "after",
    })));

    assert_eq!(
        session.poll_inbound(POLL).expect("poll should succeed"),
        InboundActivity::Dropped
    );
    assert_eq!(
        session.poll_inbound(POLL).expect("poll should succeed"),
        InboundActivity::Handled
    );
    assert_eq!(*errors.lock().unwrap(), 1);
    assert_eq!(seen.lock().unwrap().as_slice(), ["after".to_string()]);
}

#[test]
fn dispatch_tests_send_failure_reports_through_error_handler() {
    let (mut session, handle) = connect(None);

    let errors = Arc::new(Mutex::new(0_usize));
    let error_sink = Arc::clone(&errors);
    session.set_message_handler(MessageHandlers {
        on_error: Box::new(move |_| *error_sink.lock().unwrap() += 1),
        ..MessageHandlers::default()
    });

    handle.set_fail_sends(true);
    session.send_screenshot_response(ImageFormat::Jpeg, &[1]);

    assert_eq!(*errors.lock().unwrap(), 1);
}

#[test]
fn dispatch_tests_sends_after_disconnect_are_no_ops() {
    let (mut session, handle) = connect(None);

    session.disconnect();
    assert!(!session.is_connected());

    session.send_screenshot_response(ImageFormat::Png, &[1, 2]);
    assert_eq!(handle.sent_frames().len(), 1, "only init should be sent");
}

#[test]
fn dispatch_tests_remote_close_surfaces_as_closed() {
    let (mut session, handle) = connect(None);

    handle.close_remote();
    assert!(matches!(
        session.poll_inbound(POLL),
        Err(TransportError::Closed)
    ));
    assert!(!session.is_connected());
}
