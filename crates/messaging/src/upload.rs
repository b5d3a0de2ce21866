use std::sync::Arc;

use async_trait::async_trait;
use cxbridge_core::message::{Media, UNKNOWN_MIME_TYPE};
use cxbridge_core::policy::{CallPolicy, TimedOut};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::frames::{ClientFrame, UploadEvent};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("attachment `{0}` has no content to upload")]
    MissingContent(String),
    #[error("could not encode attachment frame: {0}")]
    Encode(String),
    #[error("presigned url request rejected: {0}")]
    GenerateUrl(String),
    #[error("binary upload failed: {0}")]
    Put(String),
    #[error("platform rejected upload: {0}")]
    Rejected(String),
    #[error("upload exchange interrupted: {0}")]
    Interrupted(String),
    #[error(transparent)]
    TimedOut(#[from] TimedOut),
}

/// Writes attachment bytes to a presigned URL.
#[async_trait]
pub trait BinaryUpload: Send + Sync {
    async fn put(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: Vec<u8>,
    ) -> Result<(), UploadError>;
}

#[derive(Clone, Debug, Default)]
pub struct HttpBinaryUpload {
    client: reqwest::Client,
}

impl HttpBinaryUpload {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BinaryUpload for HttpBinaryUpload {
    async fn put(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: Vec<u8>,
    ) -> Result<(), UploadError> {
        let mut request = self.client.put(url).body(body);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response =
            request.send().await.map_err(|error| UploadError::Put(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::Put(format!("presigned url answered {status}")));
        }
        Ok(())
    }
}

/// Runs the three-step attachment exchange over an open session socket.
#[derive(Clone)]
pub struct AttachmentUploader {
    http: Arc<dyn BinaryUpload>,
    policy: CallPolicy,
}

impl AttachmentUploader {
    pub fn new(http: Arc<dyn BinaryUpload>, policy: CallPolicy) -> Self {
        Self { http, policy }
    }

    /// Uploads `media` and returns the platform attachment id.
    ///
    /// `events` must only carry upload-exchange frames; events of the wrong step are skipped.
    pub async fn upload(
        &self,
        token: &str,
        outbound: &mpsc::UnboundedSender<String>,
        events: &mut mpsc::UnboundedReceiver<UploadEvent>,
        media: &Media,
    ) -> Result<String, UploadError> {
        let content =
            media.content.as_ref().ok_or_else(|| UploadError::MissingContent(media.uri.clone()))?;
        let mime_type = media.mime_type.as_deref().unwrap_or(UNKNOWN_MIME_TYPE);
        let file_name = media.file_name();

        let frame = ClientFrame::OnAttachment {
            file_name: file_name.to_owned(),
            file_type: mime_type.to_owned(),
            file_size: content.len(),
            token: token.to_owned(),
        }
        .encode()
        .map_err(|error| UploadError::Encode(error.to_string()))?;
        outbound
            .send(frame)
            .map_err(|_| UploadError::Interrupted("socket writer closed".to_owned()))?;
        debug!(
            event_name = "messaging.upload.requested",
            conversation_id = token,
            file_name,
            file_size = content.len(),
            "requested presigned upload url"
        );

        let (url, mut headers) = loop {
            match self.next_event(events).await? {
                UploadEvent::PresignedUrl { url, headers } => break (url, headers),
                UploadEvent::GenerateUrlError(body) => return Err(UploadError::GenerateUrl(body)),
                other => debug!(?other, "ignoring upload event while awaiting presigned url"),
            }
        };

        let has_content_type =
            headers.iter().any(|(name, _)| name.eq_ignore_ascii_case("content-type"));
        if !has_content_type {
            headers.push(("Content-Type".to_owned(), mime_type.to_owned()));
        }

        let http = &self.http;
        let url_ref = url.as_str();
        let headers_ref = headers.as_slice();
        self.policy
            .run("attachment.put", move || async move {
                http.put(url_ref, headers_ref, content.clone()).await
            })
            .await?;

        loop {
            match self.next_event(events).await? {
                UploadEvent::Succeeded { attachment_id } => {
                    info!(
                        event_name = "messaging.upload.completed",
                        conversation_id = token,
                        file_name,
                        attachment_id = %attachment_id,
                        "attachment uploaded"
                    );
                    return Ok(attachment_id);
                }
                UploadEvent::Failed(body) => return Err(UploadError::Rejected(body)),
                other => debug!(?other, "ignoring upload event while awaiting upload result"),
            }
        }
    }

    async fn next_event(
        &self,
        events: &mut mpsc::UnboundedReceiver<UploadEvent>,
    ) -> Result<UploadEvent, UploadError> {
        self.policy
            .deadline(events.recv())
            .await?
            .ok_or_else(|| UploadError::Interrupted("session reader stopped".to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use cxbridge_core::message::Media;
    use cxbridge_core::policy::CallPolicy;
    use serde_json::Value;
    use tokio::sync::{mpsc, Mutex};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{AttachmentUploader, BinaryUpload, HttpBinaryUpload, UploadError};
    use crate::frames::UploadEvent;

    #[derive(Default)]
    struct RecordingUpload {
        calls: Mutex<Vec<(String, Vec<(String, String)>, Vec<u8>)>>,
    }

    #[async_trait]
    impl BinaryUpload for RecordingUpload {
        async fn put(
            &self,
            url: &str,
            headers: &[(String, String)],
            body: Vec<u8>,
        ) -> Result<(), UploadError> {
            self.calls.lock().await.push((url.to_owned(), headers.to_vec(), body));
            Ok(())
        }
    }

    fn media() -> Media {
        Media::attachment("/tmp/uploads/photo.png", "image/png", vec![1, 2, 3])
    }

    #[tokio::test]
    async fn three_step_exchange_returns_attachment_id() {
        let http = Arc::new(RecordingUpload::default());
        let uploader = AttachmentUploader::new(http.clone(), CallPolicy::default());
        let (outbound, mut sent) = mpsc::unbounded_channel();
        let (events_tx, mut events) = mpsc::unbounded_channel();

        events_tx
            .send(UploadEvent::Succeeded { attachment_id: "stale".to_owned() })
            .expect("queue");
        events_tx
            .send(UploadEvent::PresignedUrl {
                url: "https://upload.test/put".to_owned(),
                headers: vec![("x-amz-tagging".to_owned(), "a=b".to_owned())],
            })
            .expect("queue");
        events_tx
            .send(UploadEvent::Succeeded { attachment_id: "att-9".to_owned() })
            .expect("queue");

        let attachment_id =
            uploader.upload("conv-1", &outbound, &mut events, &media()).await.expect("upload");
        assert_eq!(attachment_id, "att-9");

        let frame: Value = serde_json::from_str(&sent.recv().await.expect("frame")).expect("json");
        assert_eq!(frame["action"], "onAttachment");
        assert_eq!(frame["fileName"], "photo.png");
        assert_eq!(frame["fileSize"], 3);
        assert_eq!(frame["token"], "conv-1");

        let calls = http.calls.lock().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "https://upload.test/put");
        assert!(calls[0].1.contains(&("Content-Type".to_owned(), "image/png".to_owned())));
        assert_eq!(calls[0].2, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn generate_url_error_fails_before_put() {
        let http = Arc::new(RecordingUpload::default());
        let uploader = AttachmentUploader::new(http.clone(), CallPolicy::default());
        let (outbound, _sent) = mpsc::unbounded_channel();
        let (events_tx, mut events) = mpsc::unbounded_channel();
        events_tx.send(UploadEvent::GenerateUrlError("file too large".to_owned())).expect("queue");

        let error = uploader
            .upload("conv-1", &outbound, &mut events, &media())
            .await
            .expect_err("upload should fail");
        assert_eq!(error, UploadError::GenerateUrl("file too large".to_owned()));
        assert!(http.calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn media_without_bytes_is_rejected() {
        let uploader = AttachmentUploader::new(
            Arc::new(RecordingUpload::default()),
            CallPolicy::default(),
        );
        let (outbound, _sent) = mpsc::unbounded_channel();
        let (_events_tx, mut events) = mpsc::unbounded_channel();

        let error = uploader
            .upload("conv-1", &outbound, &mut events, &Media::remote("https://cdn.test/a.png", None))
            .await
            .expect_err("upload should fail");
        assert!(matches!(error, UploadError::MissingContent(_)));
    }

    #[tokio::test]
    async fn http_upload_keeps_platform_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/bucket/object"))
            .and(header("content-type", "text/plain"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let upload = HttpBinaryUpload::default();
        upload
            .put(
                &format!("{}/bucket/object", server.uri()),
                &[("Content-Type".to_owned(), "text/plain".to_owned())],
                b"hello".to_vec(),
            )
            .await
            .expect("put should succeed");
    }

    #[tokio::test]
    async fn http_upload_reports_non_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let error = HttpBinaryUpload::default()
            .put(&format!("{}/bucket/object", server.uri()), &[], b"hello".to_vec())
            .await
            .expect_err("put should fail");
        assert!(matches!(error, UploadError::Put(message) if message.contains("403")));
    }
}
