//! Domain types shared by the job, the repositories and the loaders.

pub mod load_file;
pub mod schema;
pub mod staging_file;
pub mod table_upload;
pub mod upload;
pub mod warehouse;

pub use load_file::{LoadFile, LoadFileRange};
pub use schema::{Schema, TableSchema, TableSchemaDiff, WhSchema};
pub use staging_file::{EventTimeRange, StagingFile};
pub use table_upload::{PendingTableUpload, TableUpload, TableUploadStatus, TableUploadUpdate};
pub use upload::{StateErrors, Timings, Upload, UploadErrors, UploadMetadata};
pub use warehouse::{Destination, ObjectStorageProvider, Source, Warehouse};

/// Everything needed to build an upload job: the persisted upload, its
/// staging files and the warehouse it targets.
#[derive(Debug, Clone)]
pub struct UploadJobDescriptor {
    pub upload: Upload,
    pub warehouse: Warehouse,
    pub staging_files: Vec<StagingFile>,
}
