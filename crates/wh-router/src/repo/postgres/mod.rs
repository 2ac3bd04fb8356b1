//! Postgres repositories (runtime-checked queries, no offline metadata).

mod load_files;
mod staging_files;
mod table_uploads;
mod uploads;
mod wh_schemas;

pub use load_files::PgLoadFiles;
pub use staging_files::PgStagingFiles;
pub use table_uploads::PgTableUploads;
pub use uploads::PgUploads;
pub use wh_schemas::PgWhSchemas;
