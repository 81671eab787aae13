use std::backtrace::Backtrace;
use rocket::http::Status;
use rocket::response::status::Custom;
use crate::event::EventError;

pub(crate) fn sqlx_to_custom_error(err: sqlx::Error) -> Custom<String> {
    match err {
        sqlx::Error::RowNotFound => Custom(Status::NotFound, "Record not found".to_string()),
        err => {
            error!("SQL Error: {err}\nbacktrace: {}", Backtrace::capture());
            Custom(Status::InternalServerError, format!("SQLx error: {err}"))
        }
    }
}
pub(crate) fn anyhow_to_custom_error(err: anyhow::Error) -> Custom<String> {
    error!("Error: {err}\nbacktrace: {}", Backtrace::capture());
    Custom(Status::InternalServerError, format!("Error: {err}"))
}
pub(crate) fn event_to_custom_error(err: EventError) -> Custom<String> {
    let status = match &err {
        EventError::UnknownClub(_) | EventError::InvalidDate { .. } | EventError::EndBeforeStart { .. } => Status::UnprocessableEntity,
        EventError::EmptyName | EventError::NothingToUpdate => Status::UnprocessableEntity,
        EventError::NotOwner => Status::Forbidden,
    };
    info!("Event rejected: {err}");
    Custom(status, err.to_string())
}
pub(crate) fn sqlx_to_anyhow(err: sqlx::Error) -> anyhow::Error {
    error!("SQL Error: {err}\nbacktrace: {}", Backtrace::capture());
    anyhow::anyhow!("SQL error: {err}")
}
