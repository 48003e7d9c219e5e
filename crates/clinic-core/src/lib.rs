//! # Clinic Core
//!
//! 诊所工作流的核心模块，提供数据模型、错误定义、存储接口和通用工具。

pub mod error;
pub mod models;
pub mod repository;
pub mod utils;

#[cfg(feature = "database")]
mod sqlx_error;

pub use error::{ClinicError, ErrorKind, Result};
pub use models::*;
pub use repository::{
    settle, ClinicStore, ClinicTx, DirectoryRepository, EncounterRepository, OrderRepository,
    PaymentRepository, QueueRepository,
};
