//! Seed the permission catalogue, system roles and the bootstrap admin.
//!
//! Uses PostgreSQL when `MEDSTOCK_DATABASE_URL` is set (creating missing
//! tables first), otherwise a throwaway in-memory store.

use anyhow::Context;
use serde::Serialize;

use medstock_auth::User;
use medstock_infra::config::AppConfig;
use medstock_infra::services::{RbacSeedSummary, ensure_admin_user, seed_rbac};
use medstock_infra::store::{Database, InMemoryDatabase, PostgresDatabase};

#[derive(Serialize)]
struct SeedReport {
    backend: &'static str,
    rbac: RbacSeedSummary,
    admin: User,
}

async fn seed<D: Database>(
    db: &D,
    config: &AppConfig,
    backend: &'static str,
) -> anyhow::Result<SeedReport> {
    let rbac = seed_rbac(db).await.context("seeding roles and permissions")?;
    let admin = ensure_admin_user(db, &config.default_admin_email)
        .await
        .context("ensuring admin user")?;
    Ok(SeedReport { backend, rbac, admin })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("loading configuration")?;
    medstock_observability::init(config.log_format);

    let report = match config.database_url.as_deref() {
        Some(url) => {
            let db = PostgresDatabase::connect(url, config.max_connections, config.lock_timeout())
                .await
                .context("connecting to postgres")?;
            db.apply_schema().await.context("applying schema")?;
            seed(&db, &config, "postgres").await?
        }
        None => {
            tracing::warn!("MEDSTOCK_DATABASE_URL not set; seeding an in-memory store");
            let db = InMemoryDatabase::with_lock_timeout(config.lock_timeout());
            seed(&db, &config, "in_memory").await?
        }
    };

    tracing::info!(
        backend = report.backend,
        admin = %report.admin.email,
        roles_created = report.rbac.roles_created,
        "seed complete"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
