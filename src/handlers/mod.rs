pub mod cleanup_handlers;
pub mod health_handlers;
pub mod session;
pub mod share_handlers;
