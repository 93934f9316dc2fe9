use std::path::Path;

/// Verify the database answers a trivial query.
///
/// # Errors
///
/// Returns an error if the database cannot be reached.
pub(crate) async fn run_ping(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    tgnet_db::health_check(pool).await?;
    println!("database: ok");
    Ok(())
}

/// Apply pending migrations and report how many ran.
///
/// # Errors
///
/// Returns an error if any migration fails.
pub(crate) async fn run_migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    let applied = tgnet_db::run_migrations(pool).await?;
    if applied == 0 {
        println!("migrations: already up to date");
    } else {
        println!("migrations: applied {applied}");
    }
    Ok(())
}

/// Load the channel seed file and upsert every entry.
///
/// # Errors
///
/// Returns an error if the file is missing or invalid, or the upsert fails.
pub(crate) async fn run_seed(pool: &sqlx::PgPool, path: &Path) -> anyhow::Result<()> {
    let file = tgnet_core::load_channels(path)?;
    let count = tgnet_db::seed_channels(pool, &file.channels).await?;
    tracing::info!(count, path = %path.display(), "channels seeded");
    println!("seeded {count} channels from {}", path.display());
    Ok(())
}
