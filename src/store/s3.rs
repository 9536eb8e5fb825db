//! Descriptors as JSON objects in an S3/MinIO bucket

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::Client;
use tracing::{debug, info};

use super::{is_safe_exercise_id, parse_descriptor, ExerciseStore};
use crate::rules::ValidationDescriptor;

#[derive(Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3Store {
    /// Connect using the MINIO_* environment variables
    pub async fn from_env(prefix: &str) -> Result<Self> {
        let endpoint = std::env::var("MINIO_ENDPOINT").unwrap_or_else(|_| "localhost".into());
        let port = std::env::var("MINIO_PORT").unwrap_or_else(|_| "9000".into());
        let access_key = std::env::var("MINIO_ACCESS_KEY").unwrap_or_else(|_| "minioadmin".into());
        let secret_key = std::env::var("MINIO_SECRET_KEY").unwrap_or_else(|_| "minioadmin".into());
        let bucket = std::env::var("MINIO_BUCKET").unwrap_or_else(|_| "grader-exercises".into());
        let use_ssl = std::env::var("MINIO_USE_SSL")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let protocol = if use_ssl { "https" } else { "http" };
        let endpoint_url = format!("{}://{}:{}", protocol, endpoint, port);

        info!("Exercise store at {}/{}/{}", endpoint_url, bucket, prefix);

        let credentials = Credentials::new(access_key, secret_key, None, None, "minio");

        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .endpoint_url(&endpoint_url)
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(config),
            bucket,
            prefix: prefix.trim_matches('/').to_string(),
        })
    }

    fn key(&self, exercise_id: &str) -> String {
        if self.prefix.is_empty() {
            format!("{}.json", exercise_id)
        } else {
            format!("{}/{}.json", self.prefix, exercise_id)
        }
    }
}

#[async_trait]
impl ExerciseStore for S3Store {
    async fn fetch_validation_descriptor(
        &self,
        exercise_id: &str,
    ) -> Result<Option<ValidationDescriptor>> {
        if !is_safe_exercise_id(exercise_id) {
            return Ok(None);
        }
        let key = self.key(exercise_id);
        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let err = e.into_service_error();
                if err.is_no_such_key() {
                    debug!("No descriptor object {}", key);
                    return Ok(None);
                }
                return Err(err).with_context(|| format!("Failed to download {}", key));
            }
        };

        let data = response.body.collect().await?;
        let raw = String::from_utf8(data.into_bytes().to_vec()).context("Invalid UTF-8 content")?;
        parse_descriptor(exercise_id, &raw).map(Some)
    }
}
