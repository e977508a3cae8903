use anyhow::Result;
use sqlx::PgPool;
use tracing::info;

use crate::error::Error;

/// Migrations compiled into the binary, applied in numeric-prefix order.
const MIGRATIONS: &[(&str, &str)] = &[
    ("001_cameras.sql", include_str!("sql/001_cameras.sql")),
    ("002_detections.sql", include_str!("sql/002_detections.sql")),
    ("003_dashboards.sql", include_str!("sql/003_dashboards.sql")),
    ("004_risk_changes.sql", include_str!("sql/004_risk_changes.sql")),
];

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::raw_sql(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            name TEXT PRIMARY KEY,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| Error::Database(format!("Failed to create migrations table: {}", e)))?;

    let applied: Vec<String> = sqlx::query_scalar("SELECT name FROM schema_migrations")
        .fetch_all(pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to read applied migrations: {}", e)))?;

    for (name, sql) in ordered_migrations() {
        if applied.iter().any(|done| done == name) {
            continue;
        }

        let mut tx = pool.begin().await?;
        sqlx::raw_sql(sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Database(format!("Migration {} failed: {}", name, e)))?;
        sqlx::query("INSERT INTO schema_migrations (name) VALUES ($1)")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!("Applied migration: {}", name);
    }

    Ok(())
}

fn ordered_migrations() -> Vec<(&'static str, &'static str)> {
    let mut entries = MIGRATIONS.to_vec();
    entries.sort_by_key(|(name, _)| order_value(name));
    entries
}

fn order_value(name: &str) -> usize {
    name.split('_')
        .next()
        .and_then(|prefix| prefix.parse::<usize>().ok())
        .unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_numbered_and_ordered() {
        let ordered = ordered_migrations();
        let prefixes: Vec<usize> = ordered.iter().map(|(name, _)| order_value(name)).collect();
        assert!(prefixes.iter().all(|p| *p != usize::MAX));
        assert!(prefixes.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn cameras_table_precedes_its_dependents() {
        let ordered = ordered_migrations();
        let position = |needle: &str| {
            ordered
                .iter()
                .position(|(_, sql)| sql.contains(needle))
                .unwrap()
        };
        assert!(position("CREATE TABLE IF NOT EXISTS cameras") < position("REFERENCES cameras(id)"));
    }
}
