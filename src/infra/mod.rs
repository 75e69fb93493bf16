pub mod http;
pub mod import;
