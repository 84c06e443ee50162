//! Database configuration module.
//!
//! This module handles `SQLite` database connection and table creation using `SeaORM`.
//! Tables are generated from the entity definitions with `Schema::create_table_from_entity`,
//! so the schema always matches the Rust structs. Composite uniqueness that the
//! entity derive cannot express is added as explicit indexes; the upserts in
//! `core` rely on them.

use crate::entities::{
    Allocation, CategoryRoute, Envelope, EnvelopeTransfer, LedgerTransaction, OverflowReserve,
    OverflowTransaction, PayCycle, PayCycleInstance, QuickAddShortcut, RecurringRule, allocation,
    category_route, pay_cycle_instance,
};
use crate::errors::Result;
use sea_orm::{
    ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema,
    sea_query::{Index, IndexCreateStatement, TableCreateStatement},
};
use tracing::debug;

const DEFAULT_DATABASE_URL: &str = "sqlite://data/sahod.sqlite?mode=rwc";

/// Gets the database URL from environment variable or returns default `SQLite` path.
///
/// This function looks for `DATABASE_URL` in the environment and falls back to
/// a local `SQLite` file, created on first connect.
#[must_use]
pub fn get_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string())
}

/// Establishes a connection to the `SQLite` database named by [`get_database_url`].
pub async fn create_connection() -> Result<DatabaseConnection> {
    let database_url = get_database_url();
    debug!(%database_url, "Connecting to database");
    if let Some(parent) = sqlite_file_dir(&database_url) {
        std::fs::create_dir_all(parent)?;
    }
    Database::connect(&database_url).await.map_err(Into::into)
}

/// Directory holding a file-backed `SQLite` database, if it has one.
fn sqlite_file_dir(database_url: &str) -> Option<&std::path::Path> {
    let path = database_url.strip_prefix("sqlite://")?;
    let path = path.split('?').next()?;
    std::path::Path::new(path)
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
}

/// Creates every table and unique index if missing.
///
/// Safe to call on every start.
pub async fn create_tables(db: &DatabaseConnection) -> Result<()> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let tables: [TableCreateStatement; 11] = [
        table(&schema, Envelope),
        table(&schema, CategoryRoute),
        table(&schema, PayCycle),
        table(&schema, PayCycleInstance),
        table(&schema, LedgerTransaction),
        table(&schema, Allocation),
        table(&schema, OverflowReserve),
        table(&schema, OverflowTransaction),
        table(&schema, EnvelopeTransfer),
        table(&schema, QuickAddShortcut),
        table(&schema, RecurringRule),
    ];
    for statement in &tables {
        db.execute(builder.build(statement)).await?;
    }

    for index in unique_indexes() {
        db.execute(builder.build(&index)).await?;
    }
    Ok(())
}

fn table<E: EntityTrait>(schema: &Schema, entity: E) -> TableCreateStatement {
    schema.create_table_from_entity(entity).if_not_exists().to_owned()
}

fn unique_indexes() -> Vec<IndexCreateStatement> {
    vec![
        Index::create()
            .name("idx_instances_cycle_start")
            .table(PayCycleInstance)
            .col(pay_cycle_instance::Column::PayCycleId)
            .col(pay_cycle_instance::Column::PeriodStart)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_allocations_instance_envelope")
            .table(Allocation)
            .col(allocation::Column::PayCycleInstanceId)
            .col(allocation::Column::EnvelopeId)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_category_routes_user_category")
            .table(CategoryRoute)
            .col(category_route::Column::UserId)
            .col(category_route::Column::Category)
            .unique()
            .if_not_exists()
            .to_owned(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TEST_USER, create_test_envelope, setup_with_period};
    use sea_orm::{ActiveModelTrait, QuerySelect, Set};

    #[test]
    fn test_sqlite_file_dir() {
        assert_eq!(
            sqlite_file_dir("sqlite://data/sahod.sqlite?mode=rwc"),
            Some(std::path::Path::new("data"))
        );
        assert_eq!(sqlite_file_dir("sqlite://sahod.sqlite"), None);
        assert_eq!(sqlite_file_dir("sqlite::memory:"), None);
    }

    #[tokio::test]
    async fn test_create_tables() -> Result<()> {
        let db = Database::connect("sqlite::memory:").await?;
        create_tables(&db).await?;

        // Test that tables exist by querying them
        Envelope::find().limit(1).all(&db).await?;
        PayCycleInstance::find().limit(1).all(&db).await?;
        LedgerTransaction::find().limit(1).all(&db).await?;
        Allocation::find().limit(1).all(&db).await?;
        OverflowReserve::find().limit(1).all(&db).await?;
        RecurringRule::find().limit(1).all(&db).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_create_tables_is_idempotent() -> Result<()> {
        let db = Database::connect("sqlite::memory:").await?;
        create_tables(&db).await?;
        create_tables(&db).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_allocation_pair_is_unique() -> Result<()> {
        let (db, instance) = setup_with_period(1000.0).await?;
        let envelope = create_test_envelope(&db, "Food").await?;

        let row = || allocation::ActiveModel {
            user_id: Set(TEST_USER.into()),
            pay_cycle_instance_id: Set(instance.id),
            envelope_id: Set(envelope.id),
            target_percentage: Set(None),
            allocated_amount: Set(10.0),
            cached_spent: Set(0.0),
            rollover_amount: Set(0.0),
            rollover_settled: Set(false),
            ..Default::default()
        };
        row().insert(&db).await?;
        assert!(row().insert(&db).await.is_err());
        Ok(())
    }
}
