use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::{
    config::{BehaviorVersion, Credentials, Region},
    types::{Delete, ObjectIdentifier},
    Client,
};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument};
use url::Url;

use super::{FileManager, FileManagerFactory, FileManagerSettings};
use crate::config::RudderStorageConfig;
use crate::model::ObjectStorageProvider;

/// DeleteObjects accepts at most this many keys per request.
const MAX_DELETE_OBJECTS: usize = 1000;

const GCS_ENDPOINT: &str = "https://storage.googleapis.com";
const DEFAULT_REGION: &str = "us-east-1";

/// Connection settings for an S3-compatible bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Settings {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub path_style: bool,
}

fn setting(config: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| config.get(*k).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl S3Settings {
    pub fn from_destination_config(
        provider: ObjectStorageProvider,
        config: &Map<String, Value>,
    ) -> Result<Self> {
        let bucket = setting(config, &["bucketName", "bucket"])
            .ok_or_else(|| anyhow!("bucket name missing from destination config"))?;

        let mut endpoint = setting(config, &["endPoint", "endpoint"]);
        if provider == ObjectStorageProvider::Gcs && endpoint.is_none() {
            endpoint = Some(GCS_ENDPOINT.to_string());
        }
        if let Some(ep) = endpoint.as_mut() {
            if !ep.starts_with("http://") && !ep.starts_with("https://") {
                let secure = config.get("useSSL").and_then(Value::as_bool).unwrap_or(true);
                *ep = format!("{}://{}", if secure { "https" } else { "http" }, ep);
            }
        }

        Ok(Self {
            bucket,
            region: setting(config, &["region"]).unwrap_or_else(|| DEFAULT_REGION.to_string()),
            endpoint,
            access_key: setting(config, &["accessKeyID", "accessKey"]),
            secret_key: setting(config, &["secretAccessKey", "secretKey"]),
            path_style: provider == ObjectStorageProvider::Minio
                || config.get("s3ForcePathStyle").and_then(Value::as_bool).unwrap_or(false),
        })
    }

    pub fn from_rudder_storage(config: &RudderStorageConfig) -> Self {
        Self {
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            endpoint: None,
            access_key: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
            path_style: false,
        }
    }
}

#[derive(Clone)]
pub struct S3FileManager {
    client: Client,
    bucket: String,
    batch_delete: bool,
}

impl S3FileManager {
    pub async fn new(settings: S3Settings, batch_delete: bool) -> Result<Self> {
        debug!(bucket = %settings.bucket, endpoint = ?settings.endpoint, "Initializing object storage client");

        let mut builder = match (&settings.access_key, &settings.secret_key) {
            (Some(access_key), Some(secret_key)) => {
                let credentials =
                    Credentials::new(access_key, secret_key, None, None, "wh-router-storage");
                aws_sdk_s3::Config::builder()
                    .behavior_version(BehaviorVersion::latest())
                    .credentials_provider(credentials)
            },
            _ => {
                let sdk_config = aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(settings.region.clone()))
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&sdk_config)
            },
        };

        builder = builder
            .region(Region::new(settings.region.clone()))
            .force_path_style(settings.path_style);
        if let Some(endpoint) = &settings.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(builder.build());
        info!("Object storage client initialized for bucket: {}", settings.bucket);

        Ok(Self {
            client,
            bucket: settings.bucket,
            batch_delete,
        })
    }

    async fn delete_batch(&self, keys: &[String]) -> Result<()> {
        let objects = keys
            .iter()
            .map(|k| ObjectIdentifier::builder().key(k).build())
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to build object identifiers")?;
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .context("Failed to build delete request")?;

        let output = self
            .client
            .delete_objects()
            .bucket(&self.bucket)
            .delete(delete)
            .send()
            .await
            .context(format!("Failed to delete {} objects from {}", keys.len(), self.bucket))?;

        if let Some(first) = output.errors().first() {
            bail!(
                "Failed to delete {} of {} objects, first {}: {}",
                output.errors().len(),
                keys.len(),
                first.key().unwrap_or_default(),
                first.message().unwrap_or_default()
            );
        }
        Ok(())
    }

    async fn delete_one(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .context(format!("Failed to delete from object storage: {}", key))?;
        Ok(())
    }
}

/// Object key of `location`. Understands `s3://` and `gs://` URIs as well as
/// virtual-host and path-style HTTP URLs; anything else is taken as a key.
pub fn object_key(bucket: &str, location: &str) -> String {
    let Ok(url) = Url::parse(location) else {
        return location.trim_start_matches('/').to_string();
    };
    let path = url.path().trim_start_matches('/');

    match url.scheme() {
        "s3" | "gs" | "gcs" => path.to_string(),
        _ => {
            let virtual_host = url
                .host_str()
                .is_some_and(|host| host.starts_with(&format!("{bucket}.")));
            if virtual_host {
                path.to_string()
            } else {
                path.strip_prefix(&format!("{bucket}/"))
                    .unwrap_or(path)
                    .to_string()
            }
        },
    }
}

#[async_trait]
impl FileManager for S3FileManager {
    fn download_key(&self, location: &str) -> String {
        object_key(&self.bucket, location)
    }

    #[instrument(skip(self, keys), fields(bucket = %self.bucket, keys = keys.len()))]
    async fn delete(&self, keys: &[String]) -> Result<()> {
        if self.batch_delete {
            for batch in keys.chunks(MAX_DELETE_OBJECTS) {
                self.delete_batch(batch).await?;
            }
        } else {
            for key in keys {
                self.delete_one(key).await?;
            }
        }
        debug!("Deleted {} objects from {}", keys.len(), self.bucket);
        Ok(())
    }
}

/// Builds S3-compatible file managers for destinations and rudder storage.
#[derive(Debug, Clone, Default)]
pub struct S3FileManagerFactory {
    rudder_storage: Option<RudderStorageConfig>,
}

impl S3FileManagerFactory {
    pub fn new(rudder_storage: Option<RudderStorageConfig>) -> Self {
        Self { rudder_storage }
    }

    fn settings(&self, settings: &FileManagerSettings) -> Result<S3Settings> {
        if settings.use_rudder_storage {
            let rudder = self
                .rudder_storage
                .as_ref()
                .ok_or_else(|| anyhow!("rudder storage is not configured"))?;
            return Ok(S3Settings::from_rudder_storage(rudder));
        }
        if settings.provider == ObjectStorageProvider::AzureBlob {
            bail!("object storage provider {} is not supported", settings.provider);
        }
        S3Settings::from_destination_config(settings.provider, &settings.config)
    }
}

#[async_trait]
impl FileManagerFactory for S3FileManagerFactory {
    async fn create(&self, settings: &FileManagerSettings) -> Result<Arc<dyn FileManager>> {
        let s3 = self.settings(settings)?;
        let fm = S3FileManager::new(s3, settings.provider.supports_batch_delete()).await?;
        Ok(Arc::new(fm))
    }
}
