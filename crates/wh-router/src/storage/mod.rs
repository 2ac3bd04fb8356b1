//! Object storage access for upload cleanup.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::model::ObjectStorageProvider;

pub mod s3;

pub use s3::{S3FileManager, S3FileManagerFactory};

/// Deletes objects of one bucket.
#[async_trait]
pub trait FileManager: Send + Sync {
    /// Object key of a staging or load file location.
    fn download_key(&self, location: &str) -> String;

    async fn delete(&self, keys: &[String]) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileManagerSettings {
    pub provider: ObjectStorageProvider,
    pub config: Map<String, Value>,
    pub workspace_id: String,
    pub use_rudder_storage: bool,
}

#[async_trait]
pub trait FileManagerFactory: Send + Sync {
    async fn create(&self, settings: &FileManagerSettings) -> anyhow::Result<Arc<dyn FileManager>>;
}

/// Deletes `keys` in chunks of `chunk_size`, at most `concurrency` chunks in
/// flight. The first failing chunk cancels the rest and is returned.
pub async fn delete_in_chunks(
    fm: Arc<dyn FileManager>,
    keys: Vec<String>,
    concurrency: usize,
    chunk_size: usize,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let concurrency = concurrency.max(1);
    let chunk_size = chunk_size.max(1);
    let token = cancel.child_token();

    let mut chunks = keys
        .chunks(chunk_size)
        .map(<[String]>::to_vec)
        .enumerate()
        .collect::<Vec<_>>()
        .into_iter();
    let mut tasks: JoinSet<anyhow::Result<()>> = JoinSet::new();

    loop {
        while tasks.len() < concurrency {
            let Some((index, chunk)) = chunks.next() else {
                break;
            };
            let fm = fm.clone();
            let token = token.clone();
            tasks.spawn(async move {
                debug!(chunk = index, keys = chunk.len(), "Deleting object chunk");
                tokio::select! {
                    _ = token.cancelled() => Err(anyhow::anyhow!("chunk {index}: cancelled")),
                    res = fm.delete(&chunk) => {
                        res.map_err(|e| e.context(format!("chunk {index}")))
                    }
                }
            });
        }

        let Some(joined) = tasks.join_next().await else {
            return Ok(());
        };
        let outcome = joined
            .map_err(anyhow::Error::from)
            .and_then(|res| res);
        if let Err(e) = outcome {
            token.cancel();
            tasks.abort_all();
            return Err(e);
        }
    }
}
