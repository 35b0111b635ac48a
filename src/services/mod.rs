pub mod archive_service;
pub mod build_service;
pub mod github_client;
pub mod media_client;
pub mod staging_service;
pub mod upstream;
