use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, error, info, warn};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::error::{ChatError, Result};
use crate::models::{UploadFile, UploadedDocument};
use super::config_service::EffectiveConfig;
use super::voice_service::AudioClip;

// Relative, so a base URL with a path prefix keeps it.
const UPLOAD_PATH: &str = "api/upload";
const VOICE_QUERY_PATH: &str = "api/voice-query";
const CONVERSE_PATH: &str = "api/converse";

const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Receives upload progress as whole percentages.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// Body of `POST /api/converse`. Absent ids are left out of the JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseRequest {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

#[async_trait]
pub trait FileUpload: Send + Sync {
    async fn upload(&self, file: UploadFile, progress: ProgressFn) -> Result<UploadedDocument>;
}

#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// The transcript, or `None` when the service heard nothing.
    async fn transcribe(&self, clip: AudioClip, doc_id: Option<String>) -> Result<Option<String>>;
}

#[async_trait]
pub trait QueryEndpoint: Send + Sync {
    async fn converse(&self, request: ConverseRequest) -> Result<String>;
}

/// Client for the document QA backend.
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChatError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: with_trailing_slash(base_url),
        })
    }

    pub fn from_effective(config: &EffectiveConfig) -> Result<Self> {
        Self::new(config.base_url.clone(), config.request_timeout)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| ChatError::Config(format!("Invalid endpoint {}: {}", path, e)))
    }

    /// Sends the request and returns the body text of a 2xx response.
    async fn send(&self, request: reqwest::RequestBuilder, url: &Url) -> Result<String> {
        debug!("POST {}", url);

        let response = request.send().await.map_err(|e| {
            error!("Request to {} failed: {}", url, e);
            ChatError::Network(e.to_string())
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ChatError::Network(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            error!("{} returned {}: {}", url, status, body);
            return Err(ChatError::Transport {
                status: status.as_u16(),
                body,
            });
        }

        Ok(body)
    }
}

#[async_trait]
impl FileUpload for ApiClient {
    async fn upload(&self, file: UploadFile, progress: ProgressFn) -> Result<UploadedDocument> {
        let url = self.endpoint(UPLOAD_PATH)?;
        let tracker = Arc::new(ProgressTracker::new(progress));
        let total = file.bytes.len();
        let mime = guess_mime(&file.name);

        tracker.report(0);
        let part = Part::stream_with_length(progress_body(file.bytes, tracker.clone()), total as u64)
            .file_name(file.name.clone())
            .mime_str(mime)
            .map_err(|e| ChatError::Network(format!("Failed to build upload part: {}", e)))?;
        let form = Form::new().part("file", part);

        let body = self.send(self.client.post(url.clone()).multipart(form), &url).await?;
        tracker.report(100);

        let document = parse_upload_response(&body, &file.name)?;
        info!("Uploaded {} as document {}", document.name, document.id);
        Ok(document)
    }
}

#[async_trait]
impl SpeechToText for ApiClient {
    async fn transcribe(&self, clip: AudioClip, doc_id: Option<String>) -> Result<Option<String>> {
        let url = self.endpoint(VOICE_QUERY_PATH)?;

        let audio = Part::bytes(clip.bytes)
            .file_name(clip.file_name)
            .mime_str(&clip.mime)
            .map_err(|e| ChatError::Audio(format!("Failed to build audio part: {}", e)))?;
        let mut form = Form::new().part("audio", audio);
        if let Some(id) = doc_id {
            form = form.text("docId", id);
        }

        let body = self.send(self.client.post(url.clone()).multipart(form), &url).await?;
        parse_transcript_response(&body)
    }
}

#[async_trait]
impl QueryEndpoint for ApiClient {
    async fn converse(&self, request: ConverseRequest) -> Result<String> {
        let url = self.endpoint(CONVERSE_PATH)?;
        let body = self
            .send(self.client.post(url.clone()).json(&request), &url)
            .await?;
        parse_answer_response(&body)
    }
}

/// Emits each percentage at most once and never goes backwards, even if
/// the stream and the caller report concurrently.
struct ProgressTracker {
    last: AtomicU8,
    sink: ProgressFn,
}

impl ProgressTracker {
    fn new(sink: ProgressFn) -> Self {
        Self {
            // Sentinel so the initial 0 is still emitted.
            last: AtomicU8::new(u8::MAX),
            sink,
        }
    }

    fn report(&self, percent: u8) {
        let percent = percent.min(100);
        let prev = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
                (prev == u8::MAX || percent > prev).then_some(percent)
            });
        if prev.is_ok() {
            (self.sink)(percent);
        }
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

fn percent_of(sent: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((sent.min(total) * 100) / total) as u8
}

/// Streams the file in chunks, reporting progress as the transport pulls
/// each chunk.
fn progress_body(bytes: Vec<u8>, tracker: Arc<ProgressTracker>) -> Body {
    let total = bytes.len();
    let chunks: Vec<Vec<u8>> = bytes.chunks(UPLOAD_CHUNK_SIZE).map(<[u8]>::to_vec).collect();
    let mut sent = 0usize;

    let stream = futures::stream::iter(chunks).map(move |chunk| {
        sent += chunk.len();
        tracker.report(percent_of(sent, total));
        Ok::<_, std::io::Error>(chunk)
    });

    Body::wrap_stream(stream)
}

fn guess_mime(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}

fn parse_json(body: &str) -> Result<Value> {
    serde_json::from_str(body)
        .map_err(|e| ChatError::MalformedResponse(format!("Invalid JSON: {}", e)))
}

/// Ids occasionally come back as numbers.
fn id_field(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn text_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

/// `file.id` is the canonical shape; top-level `docId` and `id` are older
/// server versions and are still read, with a warning.
pub fn parse_upload_response(body: &str, local_name: &str) -> Result<UploadedDocument> {
    let value = parse_json(body)?;
    let file = value.get("file");

    let id = match id_field(file.and_then(|f| f.get("id"))) {
        Some(id) => id,
        None => {
            let legacy = id_field(value.get("docId")).or_else(|| id_field(value.get("id")));
            match legacy {
                Some(id) => {
                    warn!("Upload response uses a legacy id field");
                    id
                }
                None => {
                    return Err(ChatError::MalformedResponse(
                        "Upload response has no document id".to_string(),
                    ))
                }
            }
        }
    };

    let name = file
        .and_then(|f| text_field(f, "name"))
        .filter(|n| !n.trim().is_empty())
        .unwrap_or(local_name)
        .to_string();

    Ok(UploadedDocument { id, name })
}

/// `question` is canonical, `transcript` legacy. Missing or blank means
/// nothing was heard, which is not an error.
pub fn parse_transcript_response(body: &str) -> Result<Option<String>> {
    let value = parse_json(body)?;

    let transcript = match text_field(&value, "question").filter(|q| !q.trim().is_empty()) {
        Some(q) => Some(q),
        None => {
            let legacy = text_field(&value, "transcript").filter(|t| !t.trim().is_empty());
            if legacy.is_some() {
                warn!("Voice response uses the legacy 'transcript' field");
            }
            legacy
        }
    };

    Ok(transcript
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string))
}

/// `answer` is canonical, `assistantText` legacy; a bare string body (JSON
/// or plain text) is taken as the answer itself.
pub fn parse_answer_response(body: &str) -> Result<String> {
    let answer = match serde_json::from_str::<Value>(body) {
        Ok(Value::String(s)) => Some(s),
        Ok(value @ Value::Object(_)) => match text_field(&value, "answer").filter(|a| !a.is_empty()) {
            Some(a) => Some(a.to_string()),
            None => {
                let legacy = text_field(&value, "assistantText")
                    .filter(|a| !a.is_empty())
                    .map(str::to_string);
                if legacy.is_some() {
                    warn!("Converse response uses the legacy 'assistantText' field");
                }
                legacy
            }
        },
        Ok(_) => None,
        Err(_) => Some(body.to_string()),
    };

    answer
        .filter(|a| !a.trim().is_empty())
        .ok_or_else(|| ChatError::MalformedResponse("Response has no answer".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;
    use std::sync::Mutex;

    fn client_for(server: &mockito::ServerGuard) -> ApiClient {
        ApiClient::new(Url::parse(&server.url()).unwrap(), Duration::from_secs(5)).unwrap()
    }

    fn recording_progress() -> (ProgressFn, Arc<Mutex<Vec<u8>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (Arc::new(move |p: u8| sink.lock().unwrap().push(p)), seen)
    }

    #[test]
    fn upload_response_shapes() {
        let doc = parse_upload_response(r#"{"file":{"id":"d1","name":"a.pdf"}}"#, "local.pdf").unwrap();
        assert_eq!(doc, UploadedDocument { id: "d1".into(), name: "a.pdf".into() });

        let doc = parse_upload_response(r#"{"docId":"d2"}"#, "local.pdf").unwrap();
        assert_eq!(doc, UploadedDocument { id: "d2".into(), name: "local.pdf".into() });

        let doc = parse_upload_response(r#"{"id":17}"#, "n.txt").unwrap();
        assert_eq!(doc.id, "17");

        assert!(matches!(
            parse_upload_response(r#"{"file":{"name":"a.pdf"}}"#, "a.pdf"),
            Err(ChatError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_upload_response("<html>", "a.pdf"),
            Err(ChatError::MalformedResponse(_))
        ));
    }

    #[test]
    fn transcript_response_shapes() {
        assert_eq!(
            parse_transcript_response(r#"{"question":" What is x? "}"#).unwrap().as_deref(),
            Some("What is x?")
        );
        assert_eq!(
            parse_transcript_response(r#"{"transcript":"hello"}"#).unwrap().as_deref(),
            Some("hello")
        );
        assert_eq!(parse_transcript_response(r#"{"question":"  "}"#).unwrap(), None);
        assert_eq!(
            parse_transcript_response(r#"{"question":"","transcript":"What is x?"}"#)
                .unwrap()
                .as_deref(),
            Some("What is x?")
        );
        assert_eq!(parse_transcript_response("{}").unwrap(), None);
    }

    #[test]
    fn answer_response_shapes() {
        assert_eq!(parse_answer_response(r#"{"answer":"42"}"#).unwrap(), "42");
        assert_eq!(parse_answer_response(r#"{"assistantText":"legacy"}"#).unwrap(), "legacy");
        assert_eq!(
            parse_answer_response(r#"{"answer":"","assistantText":"legacy"}"#).unwrap(),
            "legacy"
        );
        assert_eq!(parse_answer_response(r#""bare json string""#).unwrap(), "bare json string");
        assert_eq!(parse_answer_response("plain text answer").unwrap(), "plain text answer");
        assert!(matches!(
            parse_answer_response(r#"{"other":1}"#),
            Err(ChatError::MalformedResponse(_))
        ));
        assert!(matches!(parse_answer_response(""), Err(ChatError::MalformedResponse(_))));
    }

    #[test]
    fn converse_request_omits_missing_ids() {
        let body = serde_json::to_value(ConverseRequest {
            query: "What is x?".into(),
            doc_id: None,
            conversation_id: Some("c1".into()),
        })
        .unwrap();
        assert_eq!(body, json!({"query": "What is x?", "conversationId": "c1"}));
    }

    #[test]
    fn progress_is_monotonic_and_deduplicated() {
        let (sink, seen) = recording_progress();
        let tracker = ProgressTracker::new(sink);
        for p in [0, 0, 10, 5, 50, 50, 100, 100] {
            tracker.report(p);
        }
        assert_eq!(*seen.lock().unwrap(), vec![0, 10, 50, 100]);
    }

    #[test]
    fn percent_handles_empty_files() {
        assert_eq!(percent_of(0, 0), 100);
        assert_eq!(percent_of(50, 200), 25);
        assert_eq!(percent_of(300, 200), 100);
    }

    #[tokio::test]
    async fn upload_reports_progress_and_parses_document() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/upload")
            .match_header("content-type", Matcher::Regex("multipart/form-data".into()))
            .match_body(Matcher::Regex(r#"name="file"; filename="a.pdf""#.into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"file":{"id":"d1","name":"a.pdf"}}"#)
            .create_async()
            .await;

        let (sink, seen) = recording_progress();
        let file = UploadFile::new("a.pdf", vec![b'x'; UPLOAD_CHUNK_SIZE * 3 + 10]);
        let doc = client_for(&server).upload(file, sink).await.unwrap();

        mock.assert_async().await;
        assert_eq!(doc, UploadedDocument { id: "d1".into(), name: "a.pdf".into() });

        let seen = seen.lock().unwrap();
        assert_eq!(seen.first(), Some(&0));
        assert_eq!(seen.last(), Some(&100));
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn upload_failure_carries_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/upload")
            .with_status(413)
            .with_body("too large")
            .create_async()
            .await;

        let (sink, _) = recording_progress();
        let err = client_for(&server)
            .upload(UploadFile::new("big.pdf", vec![0; 16]), sink)
            .await
            .unwrap_err();

        match err {
            ChatError::Transport { status, body } => {
                assert_eq!(status, 413);
                assert_eq!(body, "too large");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_server_is_network_error() {
        let client = ApiClient::new(
            Url::parse("http://127.0.0.1:1").unwrap(),
            Duration::from_secs(2),
        )
        .unwrap();
        let err = client
            .converse(ConverseRequest {
                query: "hi".into(),
                doc_id: None,
                conversation_id: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Network(_)));
    }

    #[tokio::test]
    async fn converse_sends_json_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/converse")
            .match_body(Matcher::Json(json!({
                "query": "What is x?",
                "docId": "d1",
                "conversationId": "c1"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"answer":"x is $2$"}"#)
            .create_async()
            .await;

        let answer = client_for(&server)
            .converse(ConverseRequest {
                query: "What is x?".into(),
                doc_id: Some("d1".into()),
                conversation_id: Some("c1".into()),
            })
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(answer, "x is $2$");
    }

    #[tokio::test]
    async fn voice_query_sends_audio_and_doc_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/voice-query")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r#"name="audio"; filename="recording.webm""#.into()),
                Matcher::Regex("(?i)content-type: audio/webm".into()),
                Matcher::Regex(r#"name="docId""#.into()),
            ]))
            .with_status(200)
            .with_body(r#"{"question":"what is a matrix"}"#)
            .create_async()
            .await;

        let clip = AudioClip::from_samples(&[0.1; 320], 16000).unwrap();
        let transcript = client_for(&server)
            .transcribe(clip, Some("d1".into()))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(transcript.as_deref(), Some("what is a matrix"));
    }

    #[test]
    fn endpoints_keep_base_path_prefix() {
        let client =
            ApiClient::new(Url::parse("http://host/chat").unwrap(), Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.endpoint(UPLOAD_PATH).unwrap().as_str(),
            "http://host/chat/api/upload"
        );

        let client =
            ApiClient::new(Url::parse("http://host:3000").unwrap(), Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.endpoint(CONVERSE_PATH).unwrap().as_str(),
            "http://host:3000/api/converse"
        );
    }

    #[tokio::test]
    async fn converse_under_path_prefix() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/api/converse")
            .with_status(200)
            .with_body(r#"{"answer":"prefixed"}"#)
            .create_async()
            .await;

        let base = Url::parse(&format!("{}/chat/", server.url())).unwrap();
        let answer = ApiClient::new(base, Duration::from_secs(5))
            .unwrap()
            .converse(ConverseRequest {
                query: "q".into(),
                doc_id: None,
                conversation_id: None,
            })
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(answer, "prefixed");
    }
}
