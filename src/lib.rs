pub mod app;
pub mod backup;
pub mod config;
pub mod crm;
pub mod disposition;
pub mod error;
pub mod handler;
pub mod models;
pub mod normalize;
pub mod storage;
pub mod submission;
pub mod telephony;
pub mod timestamp;
pub mod utils;
pub mod version;
pub mod webhook;

pub use error::{SyncError, SyncResult};

