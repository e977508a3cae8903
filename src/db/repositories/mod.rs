use crate::error::Error;

pub mod cameras;
pub mod dashboards;
pub mod detections;

#[cfg(test)]
mod tests;

/// Wrap a sqlx error with the failed action, keeping not-found and
/// duplicate-key errors distinguishable for the API layer.
pub(crate) fn db_error(action: &str, err: sqlx::Error) -> Error {
    match Error::from(err) {
        Error::Database(msg) => Error::Database(format!("Failed to {}: {}", action, msg)),
        other => other,
    }
}
