//! 业务服务层

pub mod key_store;
pub mod server_service;

pub use key_store::{KeyMaterialStore, LocalKeyStore};
pub use server_service::{ExecSettings, ServerService};
