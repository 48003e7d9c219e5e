//! # 诊所数据库模块
//!
//! 基于 PostgreSQL 的存储实现：连接池、建表、行模型，以及实现全部存储接口的 `PgClinicStore`。

pub mod connection;
pub mod models;
pub mod queries;
pub mod store;

// 重新导出主要类型
pub use connection::{DatabasePool, PoolSettings};
pub use models::DbEnum;
pub use queries::DatabaseQueries;
pub use store::{PgClinicStore, PgClinicTx};
