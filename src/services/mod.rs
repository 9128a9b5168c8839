pub mod metadata_service;
pub mod session_store;
pub mod share_service;
pub mod storage_service;
pub mod sweeper;
pub mod thumbnail;
