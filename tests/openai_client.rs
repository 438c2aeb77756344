//! `OpenAiClient` against a local mock of the OpenAI HTTP API.
//!
//!   cargo test --test openai_client

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use dishcovery::upstream::{ImageGenerator, OpenAiClient, StreamRequest, TextStreamer};
use dishcovery::{AnalysisConfig, UpstreamError};
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

// ── Mock server ──────────────────────────────────────────────────────────────

/// What the mock answers on `/chat/completions`.
#[derive(Clone)]
enum ChatReply {
    Sse(String),
    Status(u16, &'static str, Option<&'static str>),
}

#[derive(Clone)]
struct Mock {
    chat: ChatReply,
    image: Value,
    seen: Arc<Mutex<Vec<(Value, Option<String>)>>>,
}

async fn start(chat: ChatReply, image: Value) -> (String, Arc<Mutex<Vec<(Value, Option<String>)>>>) {
    let mock = Mock {
        chat,
        image,
        seen: Arc::new(Mutex::new(Vec::new())),
    };
    let seen = mock.seen.clone();

    let chat_mock = mock.clone();
    let image_mock = mock.clone();
    let app = Router::new()
        .route(
            "/v1/chat/completions",
            post(move |headers: HeaderMap, Json(body): Json<Value>| {
                let mock = chat_mock.clone();
                async move { record(&mock, &headers, body); chat_response(&mock.chat) }
            }),
        )
        .route(
            "/v1/images/generations",
            post(move |headers: HeaderMap, Json(body): Json<Value>| {
                let mock = image_mock.clone();
                async move {
                    record(&mock, &headers, body);
                    Json(mock.image.clone())
                }
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/v1"), seen)
}

fn record(mock: &Mock, headers: &HeaderMap, body: Value) {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    mock.seen.lock().unwrap().push((body, auth));
}

fn chat_response(reply: &ChatReply) -> Response {
    match reply {
        ChatReply::Sse(body) => (
            [("content-type", "text/event-stream")],
            body.clone(),
        )
            .into_response(),
        ChatReply::Status(code, body, retry_after) => {
            let status = StatusCode::from_u16(*code).unwrap();
            let mut resp = (status, body.to_string()).into_response();
            if let Some(secs) = retry_after {
                resp.headers_mut()
                    .insert("retry-after", secs.parse().unwrap());
            }
            resp
        }
    }
}

fn chunk(content: &str) -> String {
    format!(
        "data: {}\n\n",
        json!({"object": "chat.completion.chunk", "choices": [{"index": 0, "delta": {"content": content}, "finish_reason": null}]})
    )
}

fn finish_chunk() -> String {
    format!(
        "data: {}\n\n",
        json!({"choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]})
    )
}

fn client(base: &str) -> OpenAiClient {
    OpenAiClient::new(base, "sk-test", &AnalysisConfig::default()).unwrap()
}

fn text_request() -> StreamRequest {
    StreamRequest {
        model: "gpt-4o-mini".into(),
        system: "system".into(),
        user: "user".into(),
        image: None,
        max_tokens: 256,
        temperature: 0.1,
    }
}

async fn collect(client: &OpenAiClient) -> Vec<Result<String, UpstreamError>> {
    client
        .open_stream(text_request())
        .await
        .expect("stream opens")
        .collect()
        .await
}

// ── Chat streaming ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_streams_deltas_until_done() {
    let body = format!(
        ": keep-alive\n\n{}{}{}{}data: [DONE]\n\n",
        chunk("## 前菜"),
        chunk("\n- Edamame"),
        chunk(""),
        finish_chunk()
    );
    let (base, seen) = start(ChatReply::Sse(body), json!({})).await;
    let items = collect(&client(&base)).await;
    assert_eq!(
        items,
        vec![Ok("## 前菜".to_string()), Ok("\n- Edamame".to_string())]
    );

    let seen = seen.lock().unwrap();
    let (body, auth) = &seen[0];
    assert_eq!(auth.as_deref(), Some("Bearer sk-test"));
    assert_eq!(body["stream"], true);
    assert_eq!(body["model"], "gpt-4o-mini");
    assert_eq!(body["messages"][1]["content"], "user");
}

#[tokio::test]
async fn test_finish_reason_without_done_is_complete() {
    let body = format!("{}{}", chunk("tail"), finish_chunk());
    let (base, _) = start(ChatReply::Sse(body), json!({})).await;
    let items = collect(&client(&base)).await;
    assert_eq!(items, vec![Ok("tail".to_string())]);
}

#[tokio::test]
async fn test_cut_off_stream_is_malformed() {
    let body = format!("{}{}", chunk("half a me"), chunk("nu"));
    let (base, _) = start(ChatReply::Sse(body), json!({})).await;
    let items = collect(&client(&base)).await;
    assert_eq!(items.len(), 3);
    assert!(matches!(items[2], Err(UpstreamError::Malformed(_))));
}

#[tokio::test]
async fn test_error_chunk_ends_stream() {
    let body = format!(
        "{}data: {}\n\n",
        chunk("# Me"),
        json!({"error": {"message": "The server had an error", "type": "server_error"}})
    );
    let (base, _) = start(ChatReply::Sse(body), json!({})).await;
    let items = collect(&client(&base)).await;
    assert_eq!(
        items,
        vec![
            Ok("# Me".to_string()),
            Err(UpstreamError::Provider("The server had an error".into()))
        ]
    );
}

#[tokio::test]
async fn test_unauthorized_fails_on_open() {
    let (base, _) = start(
        ChatReply::Status(401, r#"{"error":{"message":"Incorrect API key provided"}}"#, None),
        json!({}),
    )
    .await;
    let err = client(&base).open_stream(text_request()).await.err().unwrap();
    assert_eq!(
        err,
        UpstreamError::Auth {
            status: 401,
            detail: "Incorrect API key provided".into()
        }
    );
}

#[tokio::test]
async fn test_rate_limit_carries_retry_after() {
    let (base, _) = start(
        ChatReply::Status(429, r#"{"error":{"message":"slow down"}}"#, Some("17")),
        json!({}),
    )
    .await;
    let err = client(&base).open_stream(text_request()).await.err().unwrap();
    assert_eq!(
        err,
        UpstreamError::RateLimited {
            retry_after_secs: Some(17)
        }
    );
}

// ── Images ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_image_generation_returns_first_url() {
    let (base, seen) = start(
        ChatReply::Sse(String::new()),
        json!({"created": 1, "data": [{"revised_prompt": "x"}, {"url": "https://cdn.test/a.png"}]}),
    )
    .await;
    let url = client(&base).generate("ramen, professional food photography").await.unwrap();
    assert_eq!(url, "https://cdn.test/a.png");

    let seen = seen.lock().unwrap();
    let body = &seen[0].0;
    assert_eq!(body["model"], "dall-e-3");
    assert_eq!(body["n"], 1);
    assert_eq!(body["size"], "1024x1024");
    assert_eq!(body["prompt"], "ramen, professional food photography");
}

#[tokio::test]
async fn test_image_response_without_url_is_malformed() {
    let (base, _) = start(ChatReply::Sse(String::new()), json!({"data": []})).await;
    let err = client(&base).generate("ramen").await.unwrap_err();
    assert!(matches!(err, UpstreamError::Malformed(_)));
}
