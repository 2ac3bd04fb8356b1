use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const RS: &str = "RS";
pub const BQ: &str = "BQ";
pub const SNOWFLAKE: &str = "SNOWFLAKE";
pub const POSTGRES: &str = "POSTGRES";
pub const CLICKHOUSE: &str = "CLICKHOUSE";
pub const MSSQL: &str = "MSSQL";
pub const AZURE_SYNAPSE: &str = "AZURE_SYNAPSE";
pub const DELTALAKE: &str = "DELTALAKE";
pub const S3_DATALAKE: &str = "S3_DATALAKE";
pub const GCS_DATALAKE: &str = "GCS_DATALAKE";
pub const AZURE_DATALAKE: &str = "AZURE_DATALAKE";

pub const DISCARDS_TABLE: &str = "rudder_discards";
pub const IDENTIFIES_TABLE: &str = "identifies";
pub const USERS_TABLE: &str = "users";

pub const CLEANUP_OBJECT_STORAGE_FILES_SETTING: &str = "cleanupObjectStorageFiles";
pub const BUCKET_PROVIDER_SETTING: &str = "bucketProvider";

/// Lake destinations keep their files, load files are never cleaned up.
pub fn is_datalake(destination_type: &str) -> bool {
    matches!(destination_type, S3_DATALAKE | GCS_DATALAKE | AZURE_DATALAKE)
}

/// Destinations whose load files are always rebuilt on resume.
pub fn always_regenerates_load_files(destination_type: &str) -> bool {
    matches!(destination_type, SNOWFLAKE | BQ)
}

/// Applies the destination's identifier casing to a table name.
pub fn to_provider_case(destination_type: &str, name: &str) -> String {
    if destination_type == SNOWFLAKE {
        name.to_uppercase()
    } else {
        name.to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub name: String,
    pub source_type: String,
    pub category: String,
    pub original_id: Option<String>,
}

impl Source {
    /// Replays carry the id of the source they replay.
    pub fn is_replay_source(&self) -> bool {
        self.original_id.as_deref().is_some_and(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub id: String,
    pub name: String,
    pub destination_type: String,
    pub config: Map<String, Value>,
}

impl Destination {
    pub fn bool_setting(&self, key: &str) -> bool {
        match self.config.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    pub fn string_setting(&self, key: &str) -> Option<&str> {
        self.config
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// A destination namespace fed by one source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Warehouse {
    pub workspace_id: String,
    pub source: Source,
    pub destination: Destination,
    pub namespace: String,
    /// `{dest_type}:{source_id}:{destination_id}`
    pub identifier: String,
}

impl Warehouse {
    pub fn destination_type(&self) -> &str {
        &self.destination.destination_type
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectStorageProvider {
    S3,
    Gcs,
    AzureBlob,
    Minio,
    DigitalOceanSpaces,
}

impl ObjectStorageProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectStorageProvider::S3 => "S3",
            ObjectStorageProvider::Gcs => "GCS",
            ObjectStorageProvider::AzureBlob => "AZURE_BLOB",
            ObjectStorageProvider::Minio => "MINIO",
            ObjectStorageProvider::DigitalOceanSpaces => "DIGITAL_OCEAN_SPACES",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "S3" => Some(ObjectStorageProvider::S3),
            "GCS" => Some(ObjectStorageProvider::Gcs),
            "AZURE_BLOB" => Some(ObjectStorageProvider::AzureBlob),
            "MINIO" => Some(ObjectStorageProvider::Minio),
            "DIGITAL_OCEAN_SPACES" => Some(ObjectStorageProvider::DigitalOceanSpaces),
            _ => None,
        }
    }

    /// GCS has no multi-object delete; everything else does.
    pub fn supports_batch_delete(&self) -> bool {
        !matches!(self, ObjectStorageProvider::Gcs)
    }

    /// Storage holding a destination's staging and load files.
    pub fn for_destination(
        destination_type: &str,
        config: &Map<String, Value>,
        use_rudder_storage: bool,
    ) -> Self {
        if use_rudder_storage {
            return ObjectStorageProvider::S3;
        }
        match destination_type {
            RS | S3_DATALAKE => ObjectStorageProvider::S3,
            BQ | GCS_DATALAKE => ObjectStorageProvider::Gcs,
            AZURE_DATALAKE => ObjectStorageProvider::AzureBlob,
            _ => config
                .get(BUCKET_PROVIDER_SETTING)
                .and_then(Value::as_str)
                .and_then(Self::parse)
                .unwrap_or(ObjectStorageProvider::S3),
        }
    }
}

impl std::fmt::Display for ObjectStorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
