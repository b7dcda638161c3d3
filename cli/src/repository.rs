use std::time::Duration;

use async_trait::async_trait;
use cropdoc_core::symptoms::ResolveResponse;
use cropdoc_core::{CropId, Resolution, Symptom, SymptomId, SymptomRepository, TransportError};
use reqwest::Url;
use serde::de::DeserializeOwned;

const RETRY_BACKOFF: Duration = Duration::from_millis(250);
const MAX_ERROR_MESSAGE_CHARS: usize = 200;

/// Connection settings for the crop knowledge base.
#[derive(Debug, Clone)]
pub struct KnowledgeBaseConfig {
    pub api_url: String,
    pub auth_token: Option<String>,
    pub language: String,
    pub timeout: Duration,
    pub retries: u32,
}

/// Knowledge base client over HTTP.
///
/// Endpoints:
/// - `GET /crops/{cid}/symptom/level/{level}`
/// - `GET /crops/{cid}/symptom/{level}/children/{sid}`
/// - `GET /algo?cid={cid}&sel[]=[...]`
pub struct HttpSymptomRepository {
    client: reqwest::Client,
    base_url: Url,
    auth_token: Option<String>,
    language: String,
    retries: u32,
}

impl HttpSymptomRepository {
    pub fn new(config: &KnowledgeBaseConfig) -> Result<Self, String> {
        let base_url = Url::parse(&config.api_url)
            .map_err(|e| format!("Invalid knowledge base URL '{}': {e}", config.api_url))?;
        if base_url.cannot_be_a_base() {
            return Err(format!(
                "Knowledge base URL '{}' cannot carry a path",
                config.api_url
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {e}"))?;

        Ok(Self {
            client,
            base_url,
            auth_token: config
                .auth_token
                .as_deref()
                .map(str::trim)
                .filter(|token| !token.is_empty())
                .map(str::to_string),
            language: config.language.clone(),
            retries: config.retries,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // Checked in `new`: the base URL always accepts path segments.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn level_url(&self, crop: CropId, level: u32) -> Url {
        self.endpoint(&["crops", &crop.to_string(), "symptom", "level", &level.to_string()])
    }

    fn children_url(&self, crop: CropId, level: u32, parent: &SymptomId) -> Url {
        self.endpoint(&[
            "crops",
            &crop.to_string(),
            "symptom",
            &level.to_string(),
            "children",
            &parent.to_string(),
        ])
    }

    fn resolve_url(&self, crop: CropId, confirmed: &[SymptomId]) -> Result<Url, TransportError> {
        let selected = serde_json::to_string(confirmed)
            .map_err(|e| TransportError::Malformed(format!("cannot encode symptom ids: {e}")))?;
        let mut url = self.endpoint(&["algo"]);
        url.query_pairs_mut()
            .append_pair("cid", &crop.to_string())
            .append_pair("sel[]", &selected);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, TransportError> {
        let mut attempt = 0;
        loop {
            match self.get_once(&url).await {
                Err(err) if err.is_retryable() && attempt < self.retries => {
                    attempt += 1;
                    tracing::warn!(
                        url = %url,
                        attempt,
                        error = %err,
                        "knowledge base request failed, retrying"
                    );
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                }
                result => return result,
            }
        }
    }

    async fn get_once<T: DeserializeOwned>(&self, url: &Url) -> Result<T, TransportError> {
        let request_id = uuid::Uuid::now_v7().to_string();
        let mut req = self
            .client
            .get(url.clone())
            .header("accept-language", &self.language)
            .header("x-request-id", &request_id);
        if let Some(token) = &self.auth_token {
            req = req.header("auth-token", token);
        }

        tracing::debug!(url = %url, request_id = %request_id, "knowledge base request");
        let resp = req
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                message: error_message(&body, status.canonical_reason()),
            });
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;
        serde_json::from_slice(&body)
            .map_err(|e| TransportError::Malformed(format!("{}: {e}", url.path())))
    }
}

/// Best human-readable message from an error body: its `message` field if the
/// body is JSON, otherwise the leading text, otherwise the status reason.
fn error_message(body: &str, reason: Option<&str>) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(message) = value.get("message").and_then(|m| m.as_str()) {
            return message.to_string();
        }
    }
    let text = body.trim();
    if text.is_empty() {
        return reason.unwrap_or("no details").to_string();
    }
    text.chars().take(MAX_ERROR_MESSAGE_CHARS).collect()
}

#[async_trait]
impl SymptomRepository for HttpSymptomRepository {
    async fn symptoms_at_level(
        &self,
        crop: CropId,
        level: u32,
    ) -> Result<Vec<Symptom>, TransportError> {
        self.get_json(self.level_url(crop, level)).await
    }

    async fn children_of(
        &self,
        crop: CropId,
        level: u32,
        parent: &SymptomId,
    ) -> Result<Vec<Symptom>, TransportError> {
        self.get_json(self.children_url(crop, level, parent)).await
    }

    async fn resolve(
        &self,
        crop: CropId,
        confirmed: &[SymptomId],
    ) -> Result<Resolution, TransportError> {
        let url = self.resolve_url(crop, confirmed)?;
        let response: ResolveResponse = self.get_json(url).await?;
        Resolution::try_from(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cropdoc_core::Id;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn repository(api_url: &str) -> HttpSymptomRepository {
        configured(api_url, 0, Some("  "))
    }

    fn configured(api_url: &str, retries: u32, auth_token: Option<&str>) -> HttpSymptomRepository {
        HttpSymptomRepository::new(&KnowledgeBaseConfig {
            api_url: api_url.to_string(),
            auth_token: auth_token.map(str::to_string),
            language: "en_IN".to_string(),
            timeout: Duration::from_secs(5),
            retries,
        })
        .unwrap()
    }

    /// Local knowledge base that answers one connection per canned response,
    /// in order, and records the raw request heads it saw.
    async fn canned_server(
        responses: Vec<(u16, &'static str)>,
    ) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        tokio::spawn(async move {
            for (status, body) in responses {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = vec![0u8; 8192];
                let n = stream.read(&mut buf).await.unwrap_or(0);
                log.lock()
                    .unwrap()
                    .push(String::from_utf8_lossy(&buf[..n]).to_lowercase());
                let response = format!(
                    "HTTP/1.1 {status} Canned\r\nContent-Type: application/json\r\n\
                     Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });
        (base, seen)
    }

    fn hits(seen: &Arc<Mutex<Vec<String>>>) -> usize {
        seen.lock().unwrap().len()
    }

    const LEVEL_ONE: &str = r#"[{"sid":1,"qn":"Leaf yellowing?","level":1}]"#;

    #[tokio::test]
    async fn server_errors_are_retried_until_success() {
        let (base, seen) = canned_server(vec![
            (503, r#"{"message":"warming up"}"#),
            (502, ""),
            (200, LEVEL_ONE),
        ])
        .await;
        let repo = configured(&base, 2, None);

        let symptoms = repo.symptoms_at_level(CropId(1), 1).await.unwrap();
        assert_eq!(symptoms.len(), 1);
        assert_eq!(symptoms[0].sid, Id::Int(1));
        assert_eq!(hits(&seen), 3);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let (base, seen) = canned_server(vec![
            (500, r#"{"message":"database down"}"#),
            (500, r#"{"message":"database down"}"#),
            (200, LEVEL_ONE),
        ])
        .await;
        let repo = configured(&base, 1, None);

        let err = repo.symptoms_at_level(CropId(1), 1).await.unwrap_err();
        assert_eq!(
            err,
            TransportError::Status {
                status: 500,
                message: "database down".to_string(),
            }
        );
        assert_eq!(hits(&seen), 2);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let (base, seen) = canned_server(vec![
            (404, r#"{"error":"not_found","message":"no crop"}"#),
            (200, "[]"),
        ])
        .await;
        let repo = configured(&base, 2, None);

        let err = repo
            .children_of(CropId(9), 2, &Id::Int(10))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TransportError::Status {
                status: 404,
                message: "no crop".to_string(),
            }
        );
        assert!(!err.is_retryable());
        assert_eq!(hits(&seen), 1);
        assert!(seen.lock().unwrap()[0].starts_with("get /crops/9/symptom/2/children/10 "));
    }

    #[tokio::test]
    async fn malformed_bodies_are_not_retried() {
        let (base, seen) = canned_server(vec![(200, "<html>oops</html>"), (200, "[]")]).await;
        let repo = configured(&base, 2, None);

        let err = repo.symptoms_at_level(CropId(1), 1).await.unwrap_err();
        assert!(matches!(err, TransportError::Malformed(_)), "got {err:?}");
        assert_eq!(hits(&seen), 1);
    }

    #[tokio::test]
    async fn level_zero_symptom_is_malformed() {
        let (base, _seen) =
            canned_server(vec![(200, r#"[{"sid":1,"qn":"Rot?","level":0}]"#)]).await;
        let repo = configured(&base, 0, None);

        let err = repo.symptoms_at_level(CropId(1), 1).await.unwrap_err();
        assert!(matches!(err, TransportError::Malformed(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn resolver_claiming_a_disease_without_one_is_malformed() {
        let (base, seen) = canned_server(vec![(200, r#"{"diseaseFound":true}"#)]).await;
        let repo = configured(&base, 2, None);

        let err = repo.resolve(CropId(1), &[Id::Int(10)]).await.unwrap_err();
        assert!(matches!(err, TransportError::Malformed(_)), "got {err:?}");
        assert_eq!(hits(&seen), 1);
        assert!(seen.lock().unwrap()[0].starts_with("get /algo?cid=1&"));
    }

    #[tokio::test]
    async fn resolver_diagnosis_is_returned() {
        let (base, _seen) = canned_server(vec![(
            200,
            r#"{"diseaseFound":true,"disease":{"id":5,"name":"Blast"}}"#,
        )])
        .await;
        let repo = configured(&base, 0, None);

        match repo.resolve(CropId(1), &[Id::Int(10)]).await.unwrap() {
            Resolution::Diagnosis(disease) => assert_eq!(disease.name, "Blast"),
            other => panic!("expected a diagnosis, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn sends_language_token_and_request_id() {
        let (base, seen) = canned_server(vec![(200, "[]")]).await;
        let repo = configured(&base, 0, Some(" secret "));

        let symptoms = repo.symptoms_at_level(CropId(1), 1).await.unwrap();
        assert!(symptoms.is_empty());
        let request = seen.lock().unwrap()[0].clone();
        assert!(request.contains("accept-language: en_in\r\n"));
        assert!(request.contains("auth-token: secret\r\n"));
        assert!(request.contains("x-request-id: "));
    }

    #[tokio::test]
    async fn connection_failures_are_retried_then_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let repo = configured(&base, 1, None);

        let err = repo.symptoms_at_level(CropId(1), 1).await.unwrap_err();
        assert!(matches!(err, TransportError::Request(_)), "got {err:?}");
        assert!(err.is_retryable());
    }

    #[test]
    fn level_endpoint() {
        let repo = repository("http://kb.local:3000");
        assert_eq!(
            repo.level_url(CropId(1), 1).as_str(),
            "http://kb.local:3000/crops/1/symptom/level/1"
        );
    }

    #[test]
    fn children_endpoint_keeps_base_path() {
        let repo = repository("http://kb.local/api/");
        assert_eq!(
            repo.children_url(CropId(2), 3, &Id::Int(10)).as_str(),
            "http://kb.local/api/crops/2/symptom/3/children/10"
        );
    }

    #[test]
    fn children_endpoint_escapes_text_ids() {
        let repo = repository("http://kb.local");
        let url = repo.children_url(CropId(2), 2, &Id::from("leaf/spot"));
        assert_eq!(url.path(), "/crops/2/symptom/2/children/leaf%2Fspot");
    }

    #[test]
    fn resolve_endpoint_sends_id_array() {
        let repo = repository("http://kb.local");
        let url = repo
            .resolve_url(CropId(1), &[Id::Int(10), Id::from("x")])
            .unwrap();
        assert_eq!(url.path(), "/algo");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("cid".to_string(), "1".to_string()),
                ("sel[]".to_string(), r#"[10,"x"]"#.to_string()),
            ]
        );
    }

    #[test]
    fn blank_auth_token_is_dropped() {
        assert!(repository("http://kb.local").auth_token.is_none());
    }

    #[test]
    fn rejects_unusable_base_urls() {
        let config = KnowledgeBaseConfig {
            api_url: "mailto:kb@example.com".to_string(),
            auth_token: None,
            language: "en_IN".to_string(),
            timeout: Duration::from_secs(5),
            retries: 0,
        };
        assert!(HttpSymptomRepository::new(&config).is_err());
        let config = KnowledgeBaseConfig {
            api_url: "not a url".to_string(),
            ..config
        };
        assert!(HttpSymptomRepository::new(&config).is_err());
    }

    #[test]
    fn error_message_prefers_json_message() {
        assert_eq!(
            error_message(r#"{"error":"not_found","message":"Crop 9 not found"}"#, None),
            "Crop 9 not found"
        );
        assert_eq!(error_message("  upstream timeout \n", None), "upstream timeout");
        assert_eq!(error_message("", Some("Bad Gateway")), "Bad Gateway");
        assert_eq!(error_message(&"x".repeat(500), None).len(), 200);
    }
}
