pub mod config_service;
pub mod http_credential_endpoint;
pub mod in_memory_backend;
pub mod paths;
pub mod static_credential_endpoint;
pub mod telemetry;

pub use crate::config_service::ConfigService;
pub use crate::http_credential_endpoint::HttpCredentialEndpoint;
pub use crate::in_memory_backend::InMemoryRecordBackend;
pub use crate::static_credential_endpoint::StaticCredentialEndpoint;
