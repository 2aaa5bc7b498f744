use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use flightchat::{
    ConversationSession, ErrorCategory, HttpBackend, LogFile, Role, SendOutcome,
    UploadController, UploadError, UploadStatus,
};
use serde::Deserialize;
use serde_json::json;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[derive(Debug, Clone, PartialEq)]
struct RecordedChat {
    log_id: String,
    conversation_id: Option<String>,
    message: String,
}

#[derive(Default)]
struct StubState {
    uploads: Mutex<Vec<(String, usize)>>,
    chats: Mutex<Vec<RecordedChat>>,
    clears: Mutex<Vec<(String, String)>>,
}

#[derive(Deserialize)]
struct ConversationQuery {
    conversation_id: Option<String>,
}

async fn upload(State(state): State<Arc<StubState>>, mut multipart: Multipart) -> impl IntoResponse {
    let mut received = None;
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        let len = field.bytes().await.map(|b| b.len()).unwrap_or(0);
        received = Some((name, len));
    }

    let Some((name, len)) = received else {
        return (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({"detail": "file missing"})));
    };
    state.uploads.lock().unwrap().push((name.clone(), len));

    match name.as_str() {
        "corrupt.bin" => (
            StatusCode::BAD_REQUEST,
            Json(json!({"detail": "Only .bin files are supported"})),
        ),
        "crash.bin" => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"detail": "parser exploded"})),
        ),
        _ => (
            StatusCode::OK,
            Json(json!({
                "log_id": "abc123",
                "message": "Log file uploaded and parsed successfully",
                "summary": {
                    "max_altitude": 120.5,
                    "flight_time": 340.2,
                    "message_types": ["GPS", "BAT"]
                }
            })),
        ),
    }
}

async fn chat(
    State(state): State<Arc<StubState>>,
    Path(log_id): Path<String>,
    Query(query): Query<ConversationQuery>,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    if log_id != "abc123" {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"detail": "Log file not found"})),
        );
    }

    let message = body["message"].as_str().unwrap_or_default().to_string();
    state.chats.lock().unwrap().push(RecordedChat {
        log_id,
        conversation_id: query.conversation_id.clone(),
        message: message.clone(),
    });

    if message == "crash" {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"detail": "model unavailable"})),
        );
    }

    let response = if message.contains("altitude") {
        "120.5 meters".to_string()
    } else {
        format!("You asked: {}", message)
    };
    (
        StatusCode::OK,
        Json(json!({
            "conversation_id": query.conversation_id.unwrap_or_else(|| "c1".to_string()),
            "response": response
        })),
    )
}

async fn clear_chat(
    State(state): State<Arc<StubState>>,
    Path(log_id): Path<String>,
    Query(query): Query<ConversationQuery>,
) -> impl IntoResponse {
    state
        .clears
        .lock()
        .unwrap()
        .push((log_id, query.conversation_id.unwrap_or_default()));
    Json(json!({"message": "Chat history cleared successfully"}))
}

async fn spawn_stub() -> (String, Arc<StubState>) {
    let state = Arc::new(StubState::default());
    let app = Router::new()
        .route("/api/upload", post(upload))
        .route("/api/chat/:log_id", post(chat).delete(clear_chat))
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), state)
}

fn write_log(dir: &TempDir, name: &str, len: usize) -> LogFile {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(&vec![0x95; len]).unwrap();
    LogFile::from_path(&path).unwrap()
}

#[tokio::test]
async fn test_upload_then_threaded_chat() {
    let (url, stub) = spawn_stub().await;
    let backend = HttpBackend::new(&url).unwrap();
    let dir = TempDir::new().unwrap();
    let file = write_log(&dir, "flight.bin", 200 * 1024);

    let controller = UploadController::new(backend.clone());
    let mut progress = controller.subscribe();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&seen);
    let recorder = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let percent = *progress.borrow_and_update();
            recorded.lock().unwrap().push(percent);
        }
    });

    let result = controller.submit(&[file]).await.unwrap();
    tokio::task::yield_now().await;

    assert_eq!(result.log_id, "abc123");
    assert_eq!(result.summary.max_altitude, Some(120.5));
    assert_eq!(result.summary.flight_time_seconds, Some(340.2));
    assert_eq!(
        result.summary.message_types,
        Some(vec!["GPS".to_string(), "BAT".to_string()])
    );
    assert_eq!(
        stub.uploads.lock().unwrap().as_slice(),
        &[("flight.bin".to_string(), 200 * 1024)]
    );

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.status, UploadStatus::Succeeded);
    assert_eq!(snapshot.progress_percent, 0);

    recorder.abort();
    let seen = seen.lock().unwrap().clone();
    let (last, uploading) = seen.split_last().unwrap();
    assert_eq!(*last, 0);
    assert!(uploading.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");

    let session = ConversationSession::bound_to(result.log_id);

    let mut draft = "What was the max altitude?".to_string();
    assert_eq!(session.send(&backend, &mut draft).await, SendOutcome::Replied);
    let messages: Vec<_> = session
        .messages()
        .into_iter()
        .map(|m| (m.role, m.content))
        .collect();
    assert_eq!(
        messages,
        vec![
            (Role::User, "What was the max altitude?".to_string()),
            (Role::Assistant, "120.5 meters".to_string()),
        ]
    );
    assert_eq!(session.conversation_id().as_deref(), Some("c1"));

    let mut draft = "And battery?".to_string();
    assert_eq!(session.send(&backend, &mut draft).await, SendOutcome::Replied);

    let chats = stub.chats.lock().unwrap().clone();
    assert_eq!(
        chats,
        vec![
            RecordedChat {
                log_id: "abc123".to_string(),
                conversation_id: None,
                message: "What was the max altitude?".to_string(),
            },
            RecordedChat {
                log_id: "abc123".to_string(),
                conversation_id: Some("c1".to_string()),
                message: "And battery?".to_string(),
            },
        ]
    );
}

#[tokio::test]
async fn test_upload_failures_are_classified() {
    let (url, stub) = spawn_stub().await;
    let dir = TempDir::new().unwrap();

    let cases = [
        ("corrupt.bin", ErrorCategory::InvalidInput),
        ("crash.bin", ErrorCategory::ServerError),
    ];
    for (name, expected) in cases {
        let controller = UploadController::new(HttpBackend::new(&url).unwrap());
        let file = write_log(&dir, name, 1024);

        match controller.submit(&[file]).await {
            Err(UploadError::Request(classified)) => assert_eq!(classified.category, expected),
            other => panic!("{name}: unexpected outcome {other:?}"),
        }
        assert_eq!(controller.status(), UploadStatus::Failed);
        assert_eq!(controller.snapshot().progress_percent, 0);
    }

    assert_eq!(stub.uploads.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_non_bin_file_never_reaches_the_server() {
    let (url, stub) = spawn_stub().await;
    let dir = TempDir::new().unwrap();
    let file = write_log(&dir, "flight.tlog", 1024);

    let controller = UploadController::new(HttpBackend::new(&url).unwrap());
    let err = controller.submit(&[file]).await.unwrap_err();

    assert!(matches!(err, UploadError::Validation(_)));
    assert!(stub.uploads.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_chat_not_found_and_server_error() {
    let (url, _stub) = spawn_stub().await;
    let backend = HttpBackend::new(&url).unwrap();

    let unknown = ConversationSession::bound_to("nope");
    let outcome = unknown.send(&backend, &mut "hello".to_string()).await;
    assert!(matches!(
        outcome,
        SendOutcome::Failed(ref c) if c.category == ErrorCategory::NotFound
    ));
    let last = unknown.messages().pop().unwrap();
    assert_eq!(last.role, Role::Error);
    assert_eq!(last.content, "Log file not found. Please upload a file first.");
    assert_eq!(unknown.conversation_id(), None);

    let session = ConversationSession::bound_to("abc123");
    session.send(&backend, &mut "hello".to_string()).await;
    let outcome = session.send(&backend, &mut "crash".to_string()).await;
    assert!(matches!(
        outcome,
        SendOutcome::Failed(ref c) if c.category == ErrorCategory::ServerError
    ));
    assert_eq!(session.conversation_id().as_deref(), Some("c1"));
}

#[tokio::test]
async fn test_unreachable_backend() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let backend = HttpBackend::new(&url).unwrap();
    let session = ConversationSession::bound_to("abc123");

    let outcome = session.send(&backend, &mut "anyone there?".to_string()).await;
    assert!(matches!(
        outcome,
        SendOutcome::Failed(ref c) if c.category == ErrorCategory::BackendUnreachable
    ));
    assert!(!session.is_awaiting_reply());

    let outcome = session.send(&backend, &mut "retry".to_string()).await;
    assert!(matches!(outcome, SendOutcome::Failed(_)));
    assert_eq!(session.messages().len(), 4);

    let dir = TempDir::new().unwrap();
    let controller = UploadController::new(backend);
    let err = controller
        .submit(&[write_log(&dir, "flight.bin", 64)])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        UploadError::Request(ref c) if c.category == ErrorCategory::BackendUnreachable
    ));
}

#[tokio::test]
async fn test_clear_sends_conversation_id() {
    let (url, stub) = spawn_stub().await;
    let backend = HttpBackend::new(&url).unwrap();
    let session = ConversationSession::bound_to("abc123");

    session.send(&backend, &mut "hello".to_string()).await;
    assert_eq!(session.clear(&backend).await, SendOutcome::Cleared);

    assert_eq!(
        stub.clears.lock().unwrap().as_slice(),
        &[("abc123".to_string(), "c1".to_string())]
    );
    assert!(session.messages().is_empty());
    assert_eq!(session.conversation_id(), None);
}

#[tokio::test]
async fn test_truncated_reply_is_not_unreachable() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());

    // Answers 200 with a body shorter than its Content-Length, then hangs up
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        while !request.ends_with(b"}") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }
        socket
            .write_all(
                b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 200\r\n\r\n{\"conversation_id\": \"c1\", \"resp",
            )
            .await
            .unwrap();
        socket.shutdown().await.unwrap();
    });

    let backend = HttpBackend::new(&url).unwrap();
    let session = ConversationSession::bound_to("abc123");
    let outcome = session.send(&backend, &mut "hello".to_string()).await;

    assert!(matches!(
        outcome,
        SendOutcome::Failed(ref c) if c.category == ErrorCategory::Unknown
    ));
    assert_eq!(session.conversation_id(), None);
    assert!(!session.is_awaiting_reply());
}
