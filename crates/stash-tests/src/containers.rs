//! Testcontainer configurations for integration tests.

use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::minio::MinIO;

/// MinIO container serving the S3 API.
pub struct MinioContainer {
    #[allow(dead_code)] // Kept to maintain container lifetime
    container: ContainerAsync<MinIO>,
    endpoint: String,
    access_key: String,
    secret_key: String,
}

impl MinioContainer {
    pub async fn start() -> anyhow::Result<Self> {
        let container = MinIO::default().with_tag("latest").start().await?;

        let host = container.get_host().await?;
        let port = container.get_host_port_ipv4(9000).await?;

        Ok(Self {
            container,
            endpoint: format!("http://{}:{}", host, port),
            access_key: "minioadmin".to_string(),
            secret_key: "minioadmin".to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }
}
