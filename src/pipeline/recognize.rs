//! VLM interaction: build the `generateContent` request and walk the key pool.
//!
//! Prompt wording lives in [`crate::prompts`]; this module owns the wire
//! format, the transport seam and the failover loop.
//!
//! ## Failover Strategy
//!
//! Keys are tried strictly in pool order and each key gets exactly one
//! request. The first usable answer wins. Every failure is recorded as an
//! [`AttemptError`] tagged by class:
//!
//! | outcome                              | tag                | then            |
//! |--------------------------------------|--------------------|-----------------|
//! | no HTTP response                     | `network`          | next key        |
//! | 200 without candidate text           | `parse`            | next key        |
//! | 429 / 500 / 503                      | `server-transient` | pause, next key |
//! | any other status                     | `client`           | next key        |
//!
//! A safety block on one key is still a per-key `parse` failure: content
//! filtering can differ between keys/projects, so the remaining keys are
//! tried rather than failing fast.

use crate::config::ExtractionConfig;
use crate::credentials::{resolve_credentials, CredentialPool, CredentialSource};
use crate::error::{AttemptError, AttendanceError};
use crate::pipeline::encode::{encode_image, EncodedImage};
use crate::progress::ProgressCallback;
use crate::prompts::attendance_prompt;
use async_trait::async_trait;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Longest response-body excerpt kept in a `client` attempt error.
const MAX_ERROR_BODY_CHARS: usize = 1000;

// ── Wire format ──────────────────────────────────────────────────────────

/// Body of a `models/{model}:generateContent` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<RequestContent>,
    pub generation_config: GenerationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestContent {
    pub parts: Vec<RequestPart>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RequestPart {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// `application/json` switches the model into structured-output mode.
    pub response_mime_type: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

// ── Transport seam ───────────────────────────────────────────────────────

/// Status and body of an HTTP exchange that did complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

/// The request never produced a response. The message must not contain
/// the API key.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Sends one JSON POST. Implemented over `reqwest` in production and by
/// scripted fakes in tests.
#[async_trait]
pub trait InferenceTransport: Send + Sync {
    async fn post_json(
        &self,
        url: &str,
        api_key: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<HttpReply, TransportError>;
}

/// `reqwest`-backed transport. Builds a fresh client per request so no
/// connection state outlives a call.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpTransport;

#[async_trait]
impl InferenceTransport for HttpTransport {
    async fn post_json(
        &self,
        url: &str,
        api_key: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<HttpReply, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError(e.without_url().to_string()))?;

        // `without_url` keeps the `?key=` query out of error messages.
        let response = client
            .post(url)
            .query(&[("key", api_key)])
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError(e.without_url().to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError(e.without_url().to_string()))?;

        Ok(HttpReply { status, body })
    }
}

// ── Client ───────────────────────────────────────────────────────────────

/// Calls the model with failover across a credential pool.
///
/// Holds only configuration; every [`recognize`](Self::recognize) call
/// builds its own pool, request and error log.
pub struct RecognitionClient {
    model: String,
    endpoint: String,
    temperature: f32,
    max_output_tokens: u32,
    timeout: Duration,
    transient_backoff: Duration,
    credential_sources: Vec<Arc<dyn CredentialSource>>,
    transport: Arc<dyn InferenceTransport>,
    progress: Option<ProgressCallback>,
}

impl RecognitionClient {
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            model: config.model.clone(),
            endpoint: config.endpoint.clone(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            timeout: Duration::from_secs(config.api_timeout_secs),
            transient_backoff: Duration::from_millis(config.transient_backoff_ms),
            credential_sources: config.credential_sources.clone(),
            transport: config
                .transport
                .clone()
                .unwrap_or_else(|| Arc::new(HttpTransport)),
            progress: config.progress_callback.clone(),
        }
    }

    /// `{endpoint}/v1beta/models/{model}:generateContent`, without the key.
    pub fn endpoint_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.endpoint, self.model
        )
    }

    /// Assemble the structured-output request for an encoded sheet.
    pub fn build_request(&self, image: &EncodedImage, expected_columns: usize) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![RequestContent {
                parts: vec![
                    RequestPart::Text {
                        text: attendance_prompt(expected_columns),
                    },
                    RequestPart::InlineData {
                        inline_data: InlineData {
                            mime_type: image.mime_type.clone(),
                            data: image.data.clone(),
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
                response_mime_type: "application/json".to_string(),
            },
        }
    }

    /// Recognise a sheet and return the model's raw (expected JSON) text.
    ///
    /// # Errors
    /// * [`AttendanceError::NoCredentials`] — checked before any encoding or I/O
    /// * [`AttendanceError::ImageEncoding`] — the image could not be serialised
    /// * [`AttendanceError::AllCredentialsFailed`] — every key failed
    pub async fn recognize(
        &self,
        image: &DynamicImage,
        expected_columns: usize,
        file_name: &str,
        explicit_credential: Option<&str>,
    ) -> Result<String, AttendanceError> {
        let pool = resolve_credentials(explicit_credential, &self.credential_sources)?;
        let encoded = encode_image(image, file_name)?;
        let request = self.build_request(&encoded, expected_columns);
        let body = serde_json::to_value(&request)
            .map_err(|e| AttendanceError::Internal(format!("request serialisation: {e}")))?;

        self.send_with_failover(&pool, &body)
            .await
            .map_err(|attempts| AttendanceError::AllCredentialsFailed { attempts })
    }

    /// Try each key once, in order. `Err` carries one entry per key.
    pub async fn send_with_failover(
        &self,
        pool: &CredentialPool,
        body: &serde_json::Value,
    ) -> Result<String, Vec<AttemptError>> {
        let url = self.endpoint_url();
        let total = pool.len();
        let mut attempts = Vec::with_capacity(total);

        info!("Recognising with {} ({} key(s) available)", self.model, total);
        if let Some(cb) = &self.progress {
            cb.on_recognition_start(total);
        }

        for (index, key) in pool.iter().enumerate() {
            let position = index + 1;
            if let Some(cb) = &self.progress {
                cb.on_attempt_start(position, total);
            }

            let start = Instant::now();
            let outcome = match self.transport.post_json(&url, key, body, self.timeout).await {
                Ok(reply) => classify_reply(position, reply),
                Err(e) => Err(AttemptError::Network {
                    key: position,
                    detail: e.to_string(),
                }),
            };

            match outcome {
                Ok(text) => {
                    debug!(
                        "Key #{}: {} chars in {:?}",
                        position,
                        text.len(),
                        start.elapsed()
                    );
                    if let Some(cb) = &self.progress {
                        cb.on_recognition_complete(position, total, text.len());
                    }
                    return Ok(text);
                }
                Err(err) => {
                    warn!("Key #{}/{} failed — {}", position, total, err);
                    if let Some(cb) = &self.progress {
                        cb.on_attempt_failed(position, total, &err);
                    }
                    let transient = matches!(err, AttemptError::ServerTransient { .. });
                    attempts.push(err);
                    if transient && !self.transient_backoff.is_zero() {
                        sleep(self.transient_backoff).await;
                    }
                }
            }
        }

        Err(attempts)
    }
}

/// HTTP statuses treated as temporary server trouble.
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 503)
}

/// Turn one HTTP reply into candidate text or a tagged attempt error.
pub fn classify_reply(key: usize, reply: HttpReply) -> Result<String, AttemptError> {
    match reply.status {
        200 => extract_candidate_text(&reply.body).map_err(|reason| AttemptError::Parse { key, reason }),
        status if is_transient_status(status) => Err(AttemptError::ServerTransient { key, status }),
        status => Err(AttemptError::Client {
            key,
            status,
            body: reply.body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
        }),
    }
}

/// `candidates[0].content.parts[0].text`; a part without text yields `""`.
/// `Err` carries the block/finish reason, or `UNKNOWN`.
fn extract_candidate_text(body: &str) -> Result<String, String> {
    let parsed: GenerateContentResponse =
        serde_json::from_str(body).map_err(|e| format!("UNKNOWN (invalid response body: {e})"))?;

    let Some(first) = parsed.candidates.first() else {
        return Err(parsed
            .prompt_feedback
            .and_then(|f| f.block_reason)
            .unwrap_or_else(|| "UNKNOWN".to_string()));
    };

    let part = first
        .content
        .as_ref()
        .and_then(|c| c.parts.first());

    match part {
        Some(part) => Ok(part.text.clone().unwrap_or_default()),
        None => Err(first
            .finish_reason
            .clone()
            .unwrap_or_else(|| "UNKNOWN".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentials;
    use image::{Rgb, RgbImage};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted outcomes and records which keys were used.
    #[derive(Default)]
    struct ScriptedTransport {
        replies: Mutex<VecDeque<Result<HttpReply, TransportError>>>,
        keys_seen: Mutex<Vec<String>>,
        bodies: Mutex<Vec<serde_json::Value>>,
        timeouts: Mutex<Vec<Duration>>,
        sent_at: Mutex<Vec<tokio::time::Instant>>,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Result<HttpReply, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl InferenceTransport for ScriptedTransport {
        async fn post_json(
            &self,
            _url: &str,
            api_key: &str,
            body: &serde_json::Value,
            timeout: Duration,
        ) -> Result<HttpReply, TransportError> {
            self.sent_at.lock().unwrap().push(tokio::time::Instant::now());
            self.timeouts.lock().unwrap().push(timeout);
            self.keys_seen.lock().unwrap().push(api_key.to_string());
            self.bodies.lock().unwrap().push(body.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError("script exhausted".into())))
        }
    }

    fn ok(text: &str) -> Result<HttpReply, TransportError> {
        let body = serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": text}]}, "finishReason": "STOP"}]
        });
        Ok(HttpReply { status: 200, body: body.to_string() })
    }

    fn status(code: u16) -> Result<HttpReply, TransportError> {
        Ok(HttpReply { status: code, body: format!("{{\"error\":{{\"code\":{code}}}}}") })
    }

    fn client(keys: &str, transport: Arc<ScriptedTransport>) -> RecognitionClient {
        client_with_backoff(keys, 0, transport)
    }

    fn client_with_backoff(
        keys: &str,
        backoff_ms: u64,
        transport: Arc<ScriptedTransport>,
    ) -> RecognitionClient {
        let config = ExtractionConfig::builder()
            .credential_sources(vec![Arc::new(StaticCredentials::new(keys))])
            .transient_backoff_ms(backoff_ms)
            .transport(transport)
            .build()
            .unwrap();
        RecognitionClient::new(&config)
    }

    /// Gaps between consecutive requests.
    fn gaps(t: &ScriptedTransport) -> Vec<Duration> {
        t.sent_at
            .lock()
            .unwrap()
            .windows(2)
            .map(|w| w[1] - w[0])
            .collect()
    }

    /// The paused clock advances in whole-millisecond timer ticks.
    fn assert_pause(actual: Duration, expected: Duration) {
        assert!(
            actual >= expected && actual <= expected + Duration::from_millis(2),
            "expected a pause of {expected:?}, got {actual:?}"
        );
    }

    fn sheet() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([255, 255, 255])))
    }

    #[test]
    fn endpoint_url_has_model_and_no_key() {
        let c = client("k", ScriptedTransport::new(vec![]));
        assert_eq!(
            c.endpoint_url(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }

    #[test]
    fn request_body_matches_wire_format() {
        let c = client("k", ScriptedTransport::new(vec![]));
        let img = EncodedImage { mime_type: "image/png".into(), data: "QUJD".into() };
        let v = serde_json::to_value(c.build_request(&img, 4)).unwrap();

        let parts = &v["contents"][0]["parts"];
        assert!(parts[0]["text"].as_str().unwrap().contains("exactly 4 dates/columns"));
        assert_eq!(parts[1]["inline_data"]["mime_type"], "image/png");
        assert_eq!(parts[1]["inline_data"]["data"], "QUJD");
        assert_eq!(v["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(v["generationConfig"]["maxOutputTokens"], 8192);
        assert!((v["generationConfig"]["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
    }

    #[test]
    fn classify_statuses() {
        let r = |s| classify_reply(2, HttpReply { status: s, body: "nope".into() }).unwrap_err();
        assert_eq!(r(429).kind(), "server-transient");
        assert_eq!(r(500).kind(), "server-transient");
        assert_eq!(r(503).kind(), "server-transient");
        assert_eq!(r(400).kind(), "client");
        assert_eq!(r(403).kind(), "client");
        assert_eq!(r(502).kind(), "client");
        assert_eq!(r(200).kind(), "parse");
        assert_eq!(r(400).key(), 2);
    }

    #[test]
    fn blocked_prompt_reports_block_reason() {
        let body = r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#;
        let err = classify_reply(1, HttpReply { status: 200, body: body.into() }).unwrap_err();
        assert_eq!(err, AttemptError::Parse { key: 1, reason: "SAFETY".into() });
    }

    #[test]
    fn empty_candidate_reports_finish_reason() {
        let body = r#"{"candidates":[{"finishReason":"RECITATION"}]}"#;
        let err = classify_reply(1, HttpReply { status: 200, body: body.into() }).unwrap_err();
        assert_eq!(err, AttemptError::Parse { key: 1, reason: "RECITATION".into() });

        let body = r#"{"candidates":[{"content":{"parts":[]}}]}"#;
        let err = classify_reply(1, HttpReply { status: 200, body: body.into() }).unwrap_err();
        assert_eq!(err, AttemptError::Parse { key: 1, reason: "UNKNOWN".into() });
    }

    #[test]
    fn part_without_text_yields_empty_string() {
        let body = r#"{"candidates":[{"content":{"parts":[{"inlineData":{}}]}}]}"#;
        let text = classify_reply(1, HttpReply { status: 200, body: body.into() }).unwrap();
        assert_eq!(text, "");
    }

    #[test]
    fn client_error_body_is_truncated() {
        let long = "x".repeat(5000);
        let err = classify_reply(1, HttpReply { status: 400, body: long }).unwrap_err();
        match err {
            AttemptError::Client { body, .. } => assert_eq!(body.len(), MAX_ERROR_BODY_CHARS),
            other => panic!("unexpected: {other}"),
        }
    }

    #[tokio::test]
    async fn first_success_wins() {
        let t = ScriptedTransport::new(vec![ok("{\"records\":[]}"), ok("second")]);
        let c = client("A,B", t.clone());
        let text = c.recognize(&sheet(), 2, "s.png", None).await.unwrap();
        assert_eq!(text, "{\"records\":[]}");
        assert_eq!(*t.keys_seen.lock().unwrap(), vec!["A"]);
    }

    #[tokio::test]
    async fn fails_over_through_every_class() {
        let t = ScriptedTransport::new(vec![
            Err(TransportError("connection reset".into())),
            status(429),
            Ok(HttpReply { status: 200, body: r#"{"candidates":[]}"#.into() }),
            status(401),
            ok("winner"),
        ]);
        let c = client("k1,k2,k3,k4,k5", t.clone());
        let text = c.recognize(&sheet(), 1, "s.jpg", None).await.unwrap();
        assert_eq!(text, "winner");
        assert_eq!(t.keys_seen.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn all_network_failures_logged_in_key_order() {
        let t = ScriptedTransport::new(vec![
            Err(TransportError("dns".into())),
            Err(TransportError("tls".into())),
            Err(TransportError("timeout".into())),
        ]);
        let c = client("A,B,A,C", t.clone());
        let err = c.recognize(&sheet(), 3, "s.jpg", None).await.unwrap_err();

        let AttendanceError::AllCredentialsFailed { attempts } = err else {
            panic!("expected AllCredentialsFailed");
        };
        assert_eq!(attempts.len(), 3);
        assert!(attempts.iter().all(|a| a.kind() == "network"));
        assert_eq!(attempts.iter().map(AttemptError::key).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(*t.keys_seen.lock().unwrap(), vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn explicit_key_goes_first() {
        let t = ScriptedTransport::new(vec![status(500), ok("ok")]);
        let c = client("configured", t.clone());
        c.recognize(&sheet(), 1, "s.jpg", Some(" mine ")).await.unwrap();
        assert_eq!(*t.keys_seen.lock().unwrap(), vec!["mine", "configured"]);
    }

    #[tokio::test]
    async fn no_credentials_means_no_request() {
        let t = ScriptedTransport::new(vec![ok("unused")]);
        let c = client(" , ", t.clone());
        let err = c.recognize(&sheet(), 1, "s.jpg", Some("")).await.unwrap_err();
        assert!(matches!(err, AttendanceError::NoCredentials { .. }));
        assert!(t.keys_seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn encoding_failure_means_no_request() {
        let t = ScriptedTransport::new(vec![ok("unused")]);
        let c = client("k", t.clone());
        let err = c.recognize(&sheet(), 1, "anim.gif", None).await.unwrap_err();
        assert!(matches!(err, AttendanceError::ImageEncoding { .. }));
        assert!(t.keys_seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn request_carries_upload_mime_type() {
        let t = ScriptedTransport::new(vec![ok("{}")]);
        let c = client("k", t.clone());
        c.recognize(&sheet(), 2, "scan.png", None).await.unwrap();
        let bodies = t.bodies.lock().unwrap();
        assert_eq!(bodies[0]["contents"][0]["parts"][1]["inline_data"]["mime_type"], "image/png");
    }

    #[tokio::test(start_paused = true)]
    async fn pauses_only_after_transient_server_errors() {
        let t = ScriptedTransport::new(vec![
            status(401),
            Err(TransportError("connection reset".into())),
            status(503),
            ok("done"),
        ]);
        let c = client_with_backoff("A,B,C,D", 300, t.clone());
        let start = tokio::time::Instant::now();
        let text = c.recognize(&sheet(), 1, "s.jpg", None).await.unwrap();

        assert_eq!(text, "done");
        let gaps = gaps(&t);
        assert_eq!(gaps.len(), 3);
        assert_eq!(gaps[0], Duration::ZERO, "no pause after a client error");
        assert_eq!(gaps[1], Duration::ZERO, "no pause after a network error");
        assert_pause(gaps[2], Duration::from_millis(300));
        assert_pause(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn every_transient_status_triggers_the_pause() {
        let t = ScriptedTransport::new(vec![status(429), status(500), ok("x")]);
        let c = client_with_backoff("A,B,C", 1000, t.clone());
        c.recognize(&sheet(), 1, "s.jpg", None).await.unwrap();
        let gaps = gaps(&t);
        assert_eq!(gaps.len(), 2);
        assert_pause(gaps[0], Duration::from_secs(1));
        assert_pause(gaps[1], Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn last_key_transient_failure_still_pauses() {
        let t = ScriptedTransport::new(vec![status(503)]);
        let c = client_with_backoff("only", 250, t.clone());
        let start = tokio::time::Instant::now();
        let err = c.recognize(&sheet(), 1, "s.jpg", None).await.unwrap_err();
        assert!(matches!(err, AttendanceError::AllCredentialsFailed { .. }));
        assert_pause(start.elapsed(), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn default_timeout_reaches_every_request() {
        let t = ScriptedTransport::new(vec![
            status(401),
            Err(TransportError("reset".into())),
            ok("x"),
        ]);
        let c = client("A,B,C", t.clone());
        c.recognize(&sheet(), 1, "s.jpg", None).await.unwrap();
        assert_eq!(*t.timeouts.lock().unwrap(), vec![Duration::from_secs(60); 3]);
    }

    #[tokio::test]
    async fn configured_timeout_reaches_the_transport() {
        let t = ScriptedTransport::new(vec![ok("x")]);
        let config = ExtractionConfig::builder()
            .credential_sources(vec![Arc::new(StaticCredentials::new("k"))])
            .api_timeout_secs(7)
            .transport(t.clone())
            .build()
            .unwrap();
        RecognitionClient::new(&config)
            .recognize(&sheet(), 1, "s.jpg", None)
            .await
            .unwrap();
        assert_eq!(*t.timeouts.lock().unwrap(), vec![Duration::from_secs(7)]);
    }
}
