pub mod import_job;
pub mod query;
pub mod record;
