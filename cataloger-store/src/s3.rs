//! S3 (and S3-compatible) implementation of [`ObjectStore`].

use crate::error::StoreError;
use crate::object::{Listing, ObjectStore};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;

/// Connection settings for an S3-compatible backend.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Bucket holding all run artifacts.
    pub bucket: String,
    /// Region; backends that ignore regions still want one on the wire.
    pub region: String,
    /// Static credentials; `None` falls back to the ambient provider chain.
    pub access_key_id: Option<String>,
    /// Secret half of the static credentials.
    pub secret_access_key: Option<String>,
    /// Endpoint override for local-compatible backends (minio, localstack).
    pub endpoint: Option<String>,
}

/// S3-backed object store.
pub struct S3Store {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Store {
    /// Build a store from connection settings.
    ///
    /// An endpoint override switches the client to path-style addressing,
    /// which local S3-compatible backends expect.
    pub async fn new(config: S3Config) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));
        if let (Some(access_key), Some(secret_key)) =
            (config.access_key_id.clone(), config.secret_access_key.clone())
        {
            loader = loader.credentials_provider(Credentials::new(
                access_key, secret_key, None, None, "cataloger",
            ));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint.clone()).force_path_style(true);
        }
        let client = aws_sdk_s3::Client::from_conf(builder.build());

        Self {
            client,
            bucket: config.bucket,
        }
    }

    /// The bucket this store writes into.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => {
                let bytes = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| StoreError::Transport(e.to_string()))?
                    .into_bytes();
                Ok(Some(bytes.to_vec()))
            }
            Err(e) => {
                if e.as_service_error().is_some_and(|s| s.is_no_such_key()) {
                    return Ok(None);
                }
                Err(map_sdk_error(e))
            }
        }
    }

    async fn list(&self, prefix: &str, delimiter: Option<&str>) -> Result<Listing, StoreError> {
        let mut request = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix);
        if let Some(delim) = delimiter {
            request = request.delimiter(delim);
        }
        let output = request.send().await.map_err(map_sdk_error)?;

        let keys = output
            .contents()
            .iter()
            .filter_map(|obj| obj.key().map(str::to_string))
            .collect();
        let common_prefixes = output
            .common_prefixes()
            .iter()
            .filter_map(|cp| cp.prefix().map(str::to_string))
            .collect();

        Ok(Listing {
            keys,
            common_prefixes,
        })
    }

    fn uri(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }
}

/// Map an SDK error, surfacing access-denied verbatim and everything else
/// as transport failure.
fn map_sdk_error<E>(err: SdkError<E>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    match err.meta().code() {
        Some("AccessDenied") => StoreError::AccessDenied(err.to_string()),
        _ => StoreError::Transport(err.to_string()),
    }
}
