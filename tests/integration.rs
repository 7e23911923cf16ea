//! Pipeline integration tests: real HTTP against a local axum server that
//! speaks the recognition, chat and speech wire formats.
//!
//! Run with: `cargo test --test integration`

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use bytes::Bytes;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use voice_agent_rs::PipelineError;
use voice_agent_rs::audio::{AudioFormat, AudioSink, PlaybackEvent, RecordingPlayback};
use voice_agent_rs::config::{Config, PlaybackMode};
use voice_agent_rs::pipeline::Orchestrator;

struct MockBackends {
    recognition_body: &'static str,
    chat_status: StatusCode,
    speech_frames: Vec<&'static [u8]>,
    speech_delay: Duration,
    recognize_hits: AtomicUsize,
    chat_hits: AtomicUsize,
    speech_hits: AtomicUsize,
    recognized_requests: Mutex<Vec<Value>>,
    chat_auth: Mutex<Option<String>>,
    chat_group: Mutex<Option<String>>,
    speech_texts: Mutex<Vec<String>>,
}

impl MockBackends {
    fn new(recognition_body: &'static str) -> Self {
        Self {
            recognition_body,
            chat_status: StatusCode::OK,
            speech_frames: vec![
                b"data: {\"data\":{\"audio\":\"0a0b\",\"status\":1}}\n\n",
                b"data: {\"data\":{\"audio\":\"\",\"status\":2},\"base_resp\":{\"status_code\":0}}\n\n",
            ],
            speech_delay: Duration::ZERO,
            recognize_hits: AtomicUsize::new(0),
            chat_hits: AtomicUsize::new(0),
            speech_hits: AtomicUsize::new(0),
            recognized_requests: Mutex::new(Vec::new()),
            chat_auth: Mutex::new(None),
            chat_group: Mutex::new(None),
            speech_texts: Mutex::new(Vec::new()),
        }
    }
}

async fn recognize(State(mock): State<Arc<MockBackends>>, Json(body): Json<Value>) -> Response {
    mock.recognize_hits.fetch_add(1, Ordering::SeqCst);
    mock.recognized_requests.lock().unwrap().push(body);
    mock.recognition_body.into_response()
}

async fn chat(
    State(mock): State<Arc<MockBackends>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(_body): Json<Value>,
) -> Response {
    mock.chat_hits.fetch_add(1, Ordering::SeqCst);
    *mock.chat_auth.lock().unwrap() = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    *mock.chat_group.lock().unwrap() = query.get("GroupId").cloned();

    if mock.chat_status != StatusCode::OK {
        return (mock.chat_status, "upstream unavailable").into_response();
    }
    r#"{"reply":"hi there","base_resp":{"status_code":0,"status_msg":"success"}}"#.into_response()
}

async fn speech(State(mock): State<Arc<MockBackends>>, Json(body): Json<Value>) -> Response {
    mock.speech_hits.fetch_add(1, Ordering::SeqCst);
    if let Some(text) = body["text"].as_str() {
        mock.speech_texts.lock().unwrap().push(text.to_string());
    }
    tokio::time::sleep(mock.speech_delay).await;

    let frames: Vec<Result<Bytes, std::io::Error>> = mock
        .speech_frames
        .iter()
        .map(|frame| Ok(Bytes::from_static(frame)))
        .collect();
    Body::from_stream(futures_util::stream::iter(frames)).into_response()
}

/// Serve the mock backends on a free port and point a config at them.
async fn start(mock: Arc<MockBackends>) -> Config {
    let app = Router::new()
        .route("/server_api", post(recognize))
        .route("/v1/text/chatcompletion_pro", post(chat))
        .route("/v1/t2a_v2", post(speech))
        .with_state(mock);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let mut config = Config::new().unwrap();
    config.recognition.url = format!("http://127.0.0.1:{port}/server_api");
    config.generation.url = format!("http://127.0.0.1:{port}/v1/text/chatcompletion_pro");
    config.synthesis.url = format!("http://127.0.0.1:{port}/v1/t2a_v2");
    config.generation.api_key = "test-key".to_string();
    config.generation.group_id = "group-1".to_string();
    config.device.cuid = "test-box".to_string();
    config.synthesis.stream = true;
    config.validate().unwrap();
    config
}

fn recording_sink(config: &Config, recorder: &RecordingPlayback) -> AudioSink {
    AudioSink::new(
        PlaybackMode::Stream,
        Box::new(recorder.clone()),
        AudioFormat::from_synthesis(&config.synthesis),
        &config.playback.file_path,
    )
}

#[tokio::test]
async fn test_end_to_end_streams_reply_audio() {
    let mock = Arc::new(MockBackends::new(r#"{"corpus_no":"1","err_msg":"success.","err_no":0,"result":["hello"]}"#));
    let config = start(mock.clone()).await;
    let orchestrator = Orchestrator::from_config(&config).unwrap();
    let recorder = RecordingPlayback::new();
    let mut sink = recording_sink(&config, &recorder);

    let outcome = orchestrator
        .run(vec![0x01, 0x02, 0x03], &mut sink, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.recognized, "hello");
    assert_eq!(outcome.reply, "hi there");
    assert_eq!(*mock.speech_texts.lock().unwrap(), vec!["hi there".to_string()]);
    assert_eq!(recorder.writes(), vec![vec![0x0a, 0x0b]]);
    assert_eq!(outcome.report.decode.frames, 2);

    // codec is muted while it is reconfigured
    let events = recorder.events();
    assert_eq!(events[0], PlaybackEvent::Mute(true));
    assert!(matches!(events[1], PlaybackEvent::Configure(_)));
    assert_eq!(events[2], PlaybackEvent::Mute(false));

    let request = mock.recognized_requests.lock().unwrap()[0].clone();
    assert_eq!(request["speech"], "AQID");
    assert_eq!(request["len"], 3);
    assert_eq!(request["cuid"], "test-box");
    assert_eq!(mock.chat_auth.lock().unwrap().as_deref(), Some("Bearer test-key"));
    assert_eq!(mock.chat_group.lock().unwrap().as_deref(), Some("group-1"));
}

#[tokio::test]
async fn test_empty_recognition_never_reaches_later_stages() {
    let mock = Arc::new(MockBackends::new(r#"{"result":[]}"#));
    let config = start(mock.clone()).await;
    let orchestrator = Orchestrator::from_config(&config).unwrap();
    let recorder = RecordingPlayback::new();
    let mut sink = recording_sink(&config, &recorder);

    let err = orchestrator
        .run(vec![0; 64], &mut sink, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::RecognitionError(_)));
    assert_eq!(mock.recognize_hits.load(Ordering::SeqCst), 1);
    assert_eq!(mock.chat_hits.load(Ordering::SeqCst), 0);
    assert_eq!(mock.speech_hits.load(Ordering::SeqCst), 0);
    assert!(recorder.events().is_empty());
}

#[tokio::test]
async fn test_oversized_speech_response_fails_synthesis() {
    let mock = Arc::new(MockBackends::new(r#"{"result":["hello"]}"#));
    let mut config = start(mock.clone()).await;
    config.synthesis.response_buffer_size = 16;
    let orchestrator = Orchestrator::from_config(&config).unwrap();
    let recorder = RecordingPlayback::new();
    let mut sink = recording_sink(&config, &recorder);

    let err = orchestrator
        .run(vec![0; 64], &mut sink, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::OverflowDropped { capacity: 16, .. }));
    assert!(recorder.writes().is_empty());
    assert_eq!(recorder.events().last(), Some(&PlaybackEvent::Stop));
}

#[tokio::test]
async fn test_http_error_is_a_protocol_error() {
    let mut mock = MockBackends::new(r#"{"result":["hello"]}"#);
    mock.chat_status = StatusCode::SERVICE_UNAVAILABLE;
    let mock = Arc::new(mock);
    let config = start(mock.clone()).await;
    let orchestrator = Orchestrator::from_config(&config).unwrap();
    let recorder = RecordingPlayback::new();
    let mut sink = recording_sink(&config, &recorder);

    let err = orchestrator
        .run(vec![0; 64], &mut sink, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::ProtocolError { .. }));
    assert!(err.to_string().contains("503"));
    // status errors are not retried
    assert_eq!(mock.chat_hits.load(Ordering::SeqCst), 1);
    assert_eq!(mock.speech_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_slow_speech_backend_times_out() {
    let mut mock = MockBackends::new(r#"{"result":["hello"]}"#);
    mock.speech_delay = Duration::from_secs(5);
    let mock = Arc::new(mock);
    let mut config = start(mock.clone()).await;
    config.synthesis.timeout_ms = 200;
    let orchestrator = Orchestrator::from_config(&config).unwrap();
    let recorder = RecordingPlayback::new();
    let mut sink = recording_sink(&config, &recorder);

    let err = orchestrator
        .run(vec![0; 64], &mut sink, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Timeout { .. }));
    assert!(recorder.events().is_empty());
}
