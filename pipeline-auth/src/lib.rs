//! Bearer/JWT authentication strategy and service-to-service actor
//! impersonation (`X-Actor-User-Id`) for the studio pipeline.

pub mod error;
pub mod options;
pub mod core;
pub mod strategy;
pub mod jwt;
pub mod hooks;
pub mod service;
pub mod service_adapter;

pub use error::*;
pub use options::*;
pub use core::*;
pub use strategy::*;
pub use jwt::*;
pub use hooks::*;
pub use service::*;
pub use service_adapter::*;
