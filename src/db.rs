use anyhow::Result;
use async_trait::async_trait;
use sqlx::Pool;
use sqlx::Postgres;
use sqlx::Row;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use tracing::instrument;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Durable string-keyed store. Conversation state tags, cached catalog
/// cards, and customer-id mappings all live behind this contract.
#[async_trait]
pub trait StateStore: Send + Sync {
  async fn get(&self, key: &str) -> Result<Option<String>>;
  async fn set(&self, key: &str, value: &str) -> Result<()>;
  async fn delete(&self, key: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct Db {
  pool: Pool<Postgres>,
}

impl Db {
  pub async fn connect(database_url: &str) -> Result<Self> {
    let pool = PgPoolOptions::new().max_connections(10).connect(database_url).await?;
    MIGRATOR.run(&pool).await?;
    Ok(Self { pool })
  }
}

#[async_trait]
impl StateStore for Db {
  #[instrument(skip(self))]
  async fn get(&self, key: &str) -> Result<Option<String>> {
    let row = sqlx::query("SELECT value FROM kv_store WHERE key = $1")
      .bind(key)
      .fetch_optional(&self.pool)
      .await?;
    match row {
      Some(row) => Ok(Some(row.try_get("value")?)),
      None => Ok(None),
    }
  }

  #[instrument(skip(self, value))]
  async fn set(&self, key: &str, value: &str) -> Result<()> {
    sqlx::query(
      r#"
      INSERT INTO kv_store (key, value)
      VALUES ($1, $2)
      ON CONFLICT (key) DO UPDATE SET
        value = EXCLUDED.value,
        updated_at = now()
      "#,
    )
    .bind(key)
    .bind(value)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  #[instrument(skip(self))]
  async fn delete(&self, key: &str) -> Result<()> {
    sqlx::query("DELETE FROM kv_store WHERE key = $1")
      .bind(key)
      .execute(&self.pool)
      .await?;
    Ok(())
  }
}
