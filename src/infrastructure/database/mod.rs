pub mod entities;
pub mod migrator;
pub mod repositories;

pub use repositories::SeaOrmRepositoryProvider;

use sea_orm::{Database, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use tracing::info;

use self::migrator::Migrator;
use crate::config::DatabaseConfig;

/// Initialize database connection, applying pending migrations when
/// `auto_migrate` is set.
pub async fn init_database(config: &DatabaseConfig) -> Result<DatabaseConnection, DbErr> {
    info!("Connecting to database: {}", config.url);
    let db = Database::connect(&config.url).await?;
    info!("Database connected successfully");

    if config.auto_migrate {
        Migrator::up(&db, None).await?;
        info!("Database migrations applied");
    }
    Ok(db)
}
