//! sqlx 错误映射

use crate::error::ClinicError;

const UNIQUE_VIOLATION: &str = "23505";

impl From<sqlx::Error> for ClinicError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => ClinicError::NotFound(err.to_string()),
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                ClinicError::Conflict(db_err.message().to_string())
            }
            _ => ClinicError::Persistence(err.to_string()),
        }
    }
}
