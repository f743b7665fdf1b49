//! S3-compatible object store (AWS, MinIO, Ceph, R2).

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{ObjectCannedAcl, ServerSideEncryption};
use bytes::Bytes;
use stash_core::{Error, ObjectStore, Result, S3Settings};
use std::io;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

/// Service error codes worth retrying.
const RETRYABLE_CODES: &[&str] = &[
    "InternalError",
    "RequestTimeout",
    "ServiceUnavailable",
    "SlowDown",
    "Throttling",
];

/// Object store backed by an S3 bucket.
pub struct S3Store {
    client: Client,
    bucket: String,
    acl: Option<ObjectCannedAcl>,
    encryption: Option<ServerSideEncryption>,
}

impl S3Store {
    /// Build a client from connection settings.
    ///
    /// Static credentials are used when both keys are set, otherwise the
    /// default AWS provider chain (env, profile, instance metadata).
    pub async fn connect(settings: &S3Settings) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()));

        if let (Some(access_key), Some(secret_key)) = (&settings.access_key, &settings.secret_key)
        {
            loader = loader.credentials_provider(Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None,
                None,
                "stash",
            ));
        }

        let shared = loader.load().await;
        let mut s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(settings.path_style);
        if let Some(endpoint) = &settings.endpoint {
            s3_config = s3_config.endpoint_url(endpoint_url(endpoint));
        }

        let client = Client::from_conf(s3_config.build());
        info!(
            bucket = %settings.bucket,
            region = %settings.region,
            endpoint = settings.endpoint.as_deref().unwrap_or("aws"),
            path_style = settings.path_style,
            "S3 client initialised"
        );
        Ok(Self::from_client(client, settings))
    }

    /// Wrap an already configured client.
    pub fn from_client(client: Client, settings: &S3Settings) -> Self {
        let acl = Some(settings.acl.trim())
            .filter(|a| !a.is_empty())
            .map(ObjectCannedAcl::from);
        let encryption = settings
            .encryption
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(ServerSideEncryption::from);

        Self {
            client,
            bucket: settings.bucket.clone(),
            acl,
            encryption,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

/// Endpoints given as bare `host:port` are plain HTTP, as with a local MinIO.
fn endpoint_url(endpoint: &str) -> String {
    if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("http://{}", endpoint)
    }
}

impl S3Store {
    async fn put(&self, key: &str, body: ByteStream) -> Result<()> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body);
        if let Some(acl) = &self.acl {
            request = request.acl(acl.clone());
        }
        if let Some(sse) = &self.encryption {
            request = request.server_side_encryption(sse.clone());
        }

        request
            .send()
            .await
            .map_err(|e| classify("PutObject", key, e))?;

        debug!("object uploaded");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<ByteStream> {
        match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => Ok(response.body),
            Err(err) => {
                let missing = err
                    .as_service_error()
                    .is_some_and(|e| e.is_no_such_key())
                    || status_of(&err) == Some(404);
                if missing {
                    Err(Error::NotFound(key.to_string()))
                } else {
                    Err(classify("GetObject", key, err))
                }
            }
        }
    }
}

/// A body that breaks off mid-transfer is worth another attempt.
fn body_error(key: &str, e: impl std::fmt::Display) -> Error {
    Error::transient(format!("S3 GetObject {}: reading body: {}", key, e))
}

fn status_of<E>(err: &SdkError<E, HttpResponse>) -> Option<u16> {
    err.raw_response().map(|r| r.status().as_u16())
}

/// Map an SDK failure onto the transport taxonomy.
fn classify<E>(operation: &str, key: &str, err: SdkError<E, HttpResponse>) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let transient = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            true
        }
        SdkError::ServiceError(ctx) => {
            let status = ctx.raw().status().as_u16();
            status >= 500
                || status == 429
                || ctx
                    .err()
                    .code()
                    .is_some_and(|code| RETRYABLE_CODES.contains(&code))
        }
        _ => false,
    };

    let message = format!("S3 {} {}: {}", operation, key, DisplayErrorContext(&err));
    if transient {
        Error::transient(message)
    } else {
        Error::permanent(message)
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    #[instrument(skip(self, body), fields(bucket = %self.bucket, bytes = body.len()))]
    async fn upload(&self, key: &str, body: Bytes) -> Result<()> {
        self.put(key, ByteStream::from(body)).await
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn upload_file(&self, key: &str, source: &Path) -> Result<u64> {
        let size = tokio::fs::metadata(source)
            .await
            .map_err(|e| Error::filesystem(source, e))?
            .len();
        let body = ByteStream::from_path(source)
            .await
            .map_err(|e| Error::filesystem(source, io::Error::other(e)))?;
        self.put(key, body).await?;
        Ok(size)
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn download(&self, key: &str) -> Result<Bytes> {
        let body = self
            .get(key)
            .await?
            .collect()
            .await
            .map_err(|e| body_error(key, e))?
            .into_bytes();

        debug!(bytes = body.len(), "object downloaded");
        Ok(body)
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn download_file(&self, key: &str, dest: &Path) -> Result<u64> {
        let mut body = self.get(key).await?;
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| Error::filesystem(dest, e))?;

        let mut size = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| body_error(key, e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| Error::filesystem(dest, e))?;
            size += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| Error::filesystem(dest, e))?;

        debug!(bytes = size, "object downloaded");
        Ok(size)
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn exists(&self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                let missing = err.as_service_error().is_some_and(|e| e.is_not_found())
                    || status_of(&err) == Some(404);
                if missing {
                    debug!("object does not exist");
                    Ok(false)
                } else {
                    Err(classify("HeadObject", key, err))
                }
            }
        }
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify("DeleteObject", key, e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| classify("ListObjectsV2", prefix, e))?;

            for object in response.contents() {
                if let Some(k) = object.key() {
                    keys.push(k.to_string());
                }
            }

            match response.next_continuation_token() {
                Some(token) => continuation_token = Some(token.to_string()),
                None => break,
            }
        }

        keys.sort();
        debug!(count = keys.len(), "listed objects");
        Ok(keys)
    }

    fn name(&self) -> &str {
        "s3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_without_scheme_is_plain_http() {
        assert_eq!(endpoint_url("127.0.0.1:9000"), "http://127.0.0.1:9000");
        assert_eq!(endpoint_url("minio:9000"), "http://minio:9000");
        assert_eq!(
            endpoint_url("https://s3.example.com"),
            "https://s3.example.com"
        );
    }

    #[test]
    fn test_acl_and_encryption_pass_through() {
        let client = Client::from_conf(
            aws_sdk_s3::config::Builder::new()
                .behavior_version(BehaviorVersion::latest())
                .region(Region::new("eu-west-1"))
                .build(),
        );

        let mut settings = S3Settings::new("bucket");
        settings.encryption = Some("AES256".to_string());
        let store = S3Store::from_client(client.clone(), &settings);
        assert_eq!(store.acl, Some(ObjectCannedAcl::Private));
        assert_eq!(store.encryption, Some(ServerSideEncryption::Aes256));

        settings.acl = String::new();
        settings.encryption = Some(" ".to_string());
        let store = S3Store::from_client(client, &settings);
        assert_eq!(store.acl, None);
        assert_eq!(store.encryption, None);
        assert_eq!(store.bucket(), "bucket");
    }
}
