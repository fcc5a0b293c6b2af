use super::{ObjectStore, StorageError, StoredObject};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://api.cloudinary.com";
pub const UPLOAD_FOLDER: &str = "file-share-app";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Digest used for request signatures. Must match the product environment's setting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    #[default]
    Sha1,
    Sha256,
}

impl FromStr for SignatureAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha1" => Ok(SignatureAlgorithm::Sha1),
            "sha256" => Ok(SignatureAlgorithm::Sha256),
            other => Err(format!("expected `sha1` or `sha256`, got `{}`", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CloudinaryCredentials {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
    pub signature_algorithm: SignatureAlgorithm,
}

/// Signed uploads to Cloudinary's upload API with `resource_type=auto`.
#[derive(Clone)]
pub struct CloudinaryStorage {
    client: reqwest::Client,
    credentials: CloudinaryCredentials,
    api_base: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    secure_url: String,
    public_id: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorMessage,
}

#[derive(Deserialize)]
struct ErrorMessage {
    message: String,
}

impl CloudinaryStorage {
    pub fn new(credentials: CloudinaryCredentials) -> Result<Self, StorageError> {
        Self::with_api_base(credentials, DEFAULT_API_BASE)
    }

    pub fn with_api_base(
        credentials: CloudinaryCredentials,
        api_base: impl Into<String>,
    ) -> Result<Self, StorageError> {
        Self::with_timeout(credentials, api_base, DEFAULT_TIMEOUT)
    }

    fn with_timeout(
        credentials: CloudinaryCredentials,
        api_base: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            credentials,
            api_base: api_base.into(),
        })
    }

    fn upload_url(&self) -> String {
        format!(
            "{}/v1_1/{}/auto/upload",
            self.api_base.trim_end_matches('/'),
            self.credentials.cloud_name
        )
    }

    fn sign(&self, params: &[(&str, String)]) -> String {
        let mut to_sign = string_to_sign(params);
        to_sign.push_str(&self.credentials.api_secret);
        match self.credentials.signature_algorithm {
            SignatureAlgorithm::Sha1 => format!("{:x}", Sha1::digest(to_sign.as_bytes())),
            SignatureAlgorithm::Sha256 => format!("{:x}", Sha256::digest(to_sign.as_bytes())),
        }
    }
}

/// `key=value` pairs sorted by key and joined with `&`.
fn string_to_sign(params: &[(&str, String)]) -> String {
    let mut sorted: Vec<_> = params.iter().collect();
    sorted.sort_by_key(|(key, _)| *key);
    sorted
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("&")
}

#[async_trait]
impl ObjectStore for CloudinaryStorage {
    async fn store(
        &self,
        data: Bytes,
        file_name: &str,
        mime_type: &str,
    ) -> Result<StoredObject, StorageError> {
        let size = data.len();
        let params = [
            ("folder", UPLOAD_FOLDER.to_string()),
            ("timestamp", Utc::now().timestamp().to_string()),
        ];
        let signature = self.sign(&params);

        let file = Part::bytes(data.to_vec())
            .file_name(file_name.to_owned())
            .mime_str(mime_type)?;

        let mut form = Form::new()
            .part("file", file)
            .text("api_key", self.credentials.api_key.clone())
            .text("signature", signature);
        for (key, value) in params {
            form = form.text(key, value);
        }

        let response = self.client.post(self.upload_url()).multipart(form).send().await?;
        let status = response.status();

        if !status.is_success() {
            let message = match response.json::<ErrorResponse>().await {
                Ok(body) => body.error.message,
                Err(_) => format!("cloudinary returned {}", status),
            };
            return Err(StorageError::UploadFailed(message));
        }

        let uploaded: UploadResponse = response.json().await?;
        tracing::info!(
            public_id = %uploaded.public_id,
            size_bytes = size,
            "stored object on cloudinary"
        );

        Ok(StoredObject {
            url: uploaded.secure_url,
            object_id: uploaded.public_id,
        })
    }

    fn backend_name(&self) -> &'static str {
        "cloudinary"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn credentials(signature_algorithm: SignatureAlgorithm) -> CloudinaryCredentials {
        CloudinaryCredentials {
            cloud_name: "demo".into(),
            api_key: "key".into(),
            api_secret: "secret".into(),
            signature_algorithm,
        }
    }

    fn storage() -> CloudinaryStorage {
        CloudinaryStorage::with_api_base(
            credentials(SignatureAlgorithm::default()),
            "https://api.example.com/",
        )
        .unwrap()
    }

    #[test]
    fn params_are_signed_in_key_order() {
        let params = [
            ("timestamp", "1700000000".to_string()),
            ("folder", UPLOAD_FOLDER.to_string()),
        ];
        assert_eq!(
            string_to_sign(&params),
            "folder=file-share-app&timestamp=1700000000"
        );
    }

    #[test]
    fn signatures_default_to_sha1() {
        assert_eq!(
            storage().sign(&[("timestamp", "1".to_string())]),
            "b9da37620b7e9b0fd6843ce32ac1eff2e5478d4c"
        );
    }

    #[test]
    fn sha256_signatures_when_configured() {
        let storage = CloudinaryStorage::with_api_base(
            credentials(SignatureAlgorithm::Sha256),
            "https://api.example.com",
        )
        .unwrap();
        assert_eq!(
            storage.sign(&[("timestamp", "1".to_string())]),
            "88ef28d4ec1f9ed2a6ce52623b6cb45d0a168bf735d08bcc7dd569b676e41cb7"
        );
    }

    #[test]
    fn algorithm_names_parse() {
        assert_eq!("SHA256".parse::<SignatureAlgorithm>(), Ok(SignatureAlgorithm::Sha256));
        assert_eq!("sha1".parse::<SignatureAlgorithm>(), Ok(SignatureAlgorithm::Sha1));
        assert!("md5".parse::<SignatureAlgorithm>().is_err());
    }

    #[test]
    fn upload_url_uses_cloud_name() {
        assert_eq!(
            storage().upload_url(),
            "https://api.example.com/v1_1/demo/auto/upload"
        );
    }

    #[tokio::test]
    async fn upload_posts_a_signed_form() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1_1/demo/auto/upload")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r#"name="folder"\s+file-share-app"#.into()),
                Matcher::Regex(r#"name="api_key"\s+key"#.into()),
                Matcher::Regex(r#"name="timestamp"\s+\d+"#.into()),
                Matcher::Regex(r#"name="signature"\s+[0-9a-f]{40}\s"#.into()),
                Matcher::Regex(r#"filename="notes.txt""#.into()),
                Matcher::Regex("hello cloud".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"secure_url":"https://res.cloudinary.com/demo/raw/upload/v1/file-share-app/abc","public_id":"file-share-app/abc"}"#,
            )
            .create_async()
            .await;

        let storage =
            CloudinaryStorage::with_api_base(credentials(SignatureAlgorithm::Sha1), server.url())
                .unwrap();
        let stored = storage
            .store(Bytes::from_static(b"hello cloud"), "notes.txt", "text/plain")
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(
            stored.url,
            "https://res.cloudinary.com/demo/raw/upload/v1/file-share-app/abc"
        );
        assert_eq!(stored.object_id, "file-share-app/abc");
    }

    #[tokio::test]
    async fn provider_errors_become_upload_failures() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1_1/demo/auto/upload")
            .with_status(401)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":{"message":"Invalid Signature 1234"}}"#)
            .create_async()
            .await;

        let storage =
            CloudinaryStorage::with_api_base(credentials(SignatureAlgorithm::Sha1), server.url())
                .unwrap();
        let err = storage
            .store(Bytes::from_static(b"x"), "x.txt", "text/plain")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::UploadFailed(ref m) if m == "Invalid Signature 1234"));
    }

    #[tokio::test]
    async fn unreadable_error_bodies_report_the_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1_1/demo/auto/upload")
            .with_status(502)
            .with_body("<html>bad gateway</html>")
            .create_async()
            .await;

        let storage =
            CloudinaryStorage::with_api_base(credentials(SignatureAlgorithm::Sha1), server.url())
                .unwrap();
        let err = storage
            .store(Bytes::from_static(b"x"), "x.txt", "text/plain")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::UploadFailed(ref m) if m.contains("502")));
    }

    #[tokio::test]
    async fn silent_providers_time_out() {
        // Accepts connections through the backlog but never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let storage = CloudinaryStorage::with_timeout(
            credentials(SignatureAlgorithm::Sha1),
            format!("http://{}", addr),
            Duration::from_millis(200),
        )
        .unwrap();
        let err = tokio::time::timeout(
            Duration::from_secs(5),
            storage.store(Bytes::from_static(b"x"), "x.txt", "text/plain"),
        )
        .await
        .expect("request should give up on its own")
        .unwrap_err();
        assert!(matches!(err, StorageError::Http(ref e) if e.is_timeout()));
        drop(listener);
    }
}
