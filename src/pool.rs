//! Database configuration and a handle pool keyed by DSN

use crate::{may_replace_localhost, BarrierDb, BarrierError, InMemoryLedger};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Supported database drivers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    /// MySQL / MariaDB
    Mysql,
    /// PostgreSQL
    Postgres,
}

impl Driver {
    /// Driver name as used in configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mysql => "mysql",
            Self::Postgres => "postgres",
        }
    }
}

impl FromStr for Driver {
    type Err = BarrierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mysql" => Ok(Self::Mysql),
            "postgres" => Ok(Self::Postgres),
            other => Err(BarrierError::Config(format!("unknown driver: {}", other).into())),
        }
    }
}

impl std::fmt::Display for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection settings for the database holding the barrier ledger
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbConfig {
    /// Driver selecting the DSN format
    pub driver: Driver,
    /// Host name, `localhost` is rewritten inside docker
    pub host: String,
    /// TCP port
    pub port: u16,
    /// User name
    pub user: String,
    /// Password
    pub password: String,
    /// Database (schema) name
    pub database: String,
}

impl DbConfig {
    /// Connection string for the driver
    pub fn dsn(&self) -> String {
        self.dsn_for_host(&may_replace_localhost(&self.host))
    }

    /// Connection string with the password replaced by `****`
    pub fn masked_dsn(&self) -> String {
        let dsn = self.dsn();
        if self.password.is_empty() {
            dsn
        } else {
            dsn.replacen(&self.password, "****", 1)
        }
    }

    fn dsn_for_host(&self, host: &str) -> String {
        match self.driver {
            Driver::Mysql => format!(
                "{}:{}@tcp({}:{})/{}?charset=utf8mb4&parseTime=true&loc=Local",
                self.user, self.password, host, self.port, self.database
            ),
            Driver::Postgres => format!(
                "host={} user={} password={} dbname='{}' port={} sslmode=disable TimeZone=Asia/Shanghai",
                host, self.user, self.password, self.database, self.port
            ),
        }
    }
}

impl std::fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConfig")
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("database", &self.database)
            .finish()
    }
}

/// Opens database handles for a [`DbPool`]
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Handle type produced by this connector
    type Db: BarrierDb;

    /// Open a standalone handle
    async fn open(&self, config: &DbConfig, dsn: &str) -> Result<Self::Db, BarrierError>;

    /// Release a handle drained by [`DbPool::shutdown`]
    async fn close(&self, _db: Arc<Self::Db>) {}
}

/// Handle pool keyed by DSN.
///
/// Callers asking for the same DSN share one handle, opened once. Callers
/// asking for different DSNs never wait on each other.
pub struct DbPool<C: Connector> {
    connector: C,
    handles: Mutex<HashMap<String, Arc<OnceCell<Arc<C::Db>>>>>,
}

impl<C: Connector> DbPool<C> {
    /// Create an empty pool
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Connector used to open handles
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Shared handle for `config`, opened on first use
    pub async fn get(&self, config: &DbConfig) -> Result<Arc<C::Db>, BarrierError> {
        let dsn = config.dsn();
        let cell = {
            let mut handles = self.handles.lock();
            handles.entry(dsn.clone()).or_default().clone()
        };
        let db = cell
            .get_or_try_init(|| async {
                tracing::info!(driver = %config.driver, dsn = %config.masked_dsn(), "opening database");
                self.connector.open(config, &dsn).await.map(Arc::new)
            })
            .await?;
        Ok(db.clone())
    }

    /// Open a handle that is not shared through the pool
    pub async fn open_standalone(&self, config: &DbConfig) -> Result<C::Db, BarrierError> {
        let dsn = config.dsn();
        tracing::info!(driver = %config.driver, dsn = %config.masked_dsn(), "opening standalone database");
        self.connector.open(config, &dsn).await
    }

    /// Number of opened handles
    pub fn len(&self) -> usize {
        self.handles
            .lock()
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    /// True when no handle is open
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain the pool and close every opened handle. Returns how many were closed.
    pub async fn shutdown(&self) -> usize {
        let drained: Vec<_> = self.handles.lock().drain().collect();
        let mut closed = 0;
        for (_, cell) in drained {
            if let Some(db) = cell.get() {
                self.connector.close(db.clone()).await;
                closed += 1;
            }
        }
        tracing::info!(closed, "database pool shut down");
        closed
    }
}

/// Connector producing [`InMemoryLedger`] handles
#[derive(Default)]
pub struct InMemoryConnector {
    opened: AtomicUsize,
    closed: AtomicUsize,
}

impl InMemoryConnector {
    /// Create a connector
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handles opened so far
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Number of handles closed so far
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for InMemoryConnector {
    type Db = InMemoryLedger;

    async fn open(&self, _config: &DbConfig, _dsn: &str) -> Result<InMemoryLedger, BarrierError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(InMemoryLedger::new())
    }

    async fn close(&self, _db: Arc<InMemoryLedger>) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(driver: Driver, database: &str) -> DbConfig {
        DbConfig {
            driver,
            host: "db.internal".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: "secret".to_string(),
            database: database.to_string(),
        }
    }

    #[test]
    fn test_mysql_dsn() {
        assert_eq!(
            config(Driver::Mysql, "dtm_busi").dsn(),
            "root:secret@tcp(db.internal:3306)/dtm_busi?charset=utf8mb4&parseTime=true&loc=Local"
        );
    }

    #[test]
    fn test_postgres_dsn() {
        let mut conf = config(Driver::Postgres, "dtm_busi");
        conf.port = 5432;
        assert_eq!(
            conf.dsn(),
            "host=db.internal user=root password=secret dbname='dtm_busi' port=5432 sslmode=disable TimeZone=Asia/Shanghai"
        );
    }

    #[test]
    fn test_masked_dsn_hides_password() {
        let conf = config(Driver::Mysql, "dtm_busi");
        assert!(!conf.masked_dsn().contains("secret"));
        assert!(conf.masked_dsn().starts_with("root:****@tcp("));
        assert!(!format!("{:?}", conf).contains("secret"));
    }

    #[test]
    fn test_unknown_driver_is_rejected() {
        assert!(matches!("sqlite".parse::<Driver>(), Err(BarrierError::Config(_))));
        assert_eq!("postgres".parse::<Driver>().unwrap(), Driver::Postgres);
        let parsed: Result<DbConfig, _> = serde_json::from_value(serde_json::json!({
            "driver": "oracle", "host": "h", "port": 1, "user": "u", "password": "p", "database": "d"
        }));
        assert!(parsed.is_err());
    }

    #[tokio::test]
    async fn test_same_dsn_shares_one_handle() {
        let pool = Arc::new(DbPool::new(InMemoryConnector::new()));
        let conf = config(Driver::Mysql, "a");

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            let conf = conf.clone();
            tasks.push(tokio::spawn(async move { pool.get(&conf).await.unwrap() }));
        }
        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap());
        }

        assert_eq!(pool.connector().opened(), 1);
        assert!(handles.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[tokio::test]
    async fn test_distinct_dsns_get_distinct_handles() {
        let pool = DbPool::new(InMemoryConnector::new());
        let a = pool.get(&config(Driver::Mysql, "a")).await.unwrap();
        let b = pool.get(&config(Driver::Mysql, "b")).await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(pool.len(), 2);

        let standalone = pool.open_standalone(&config(Driver::Mysql, "a")).await.unwrap();
        assert_eq!(standalone.barrier_count().await, 0);
        assert_eq!(pool.len(), 2);
    }

    struct SlowConnector;

    #[async_trait]
    impl Connector for SlowConnector {
        type Db = InMemoryLedger;

        async fn open(&self, config: &DbConfig, _dsn: &str) -> Result<InMemoryLedger, BarrierError> {
            if config.database == "slow" {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(InMemoryLedger::new())
        }
    }

    #[tokio::test]
    async fn test_slow_open_does_not_block_other_dsns() {
        let pool = Arc::new(DbPool::new(SlowConnector));
        let slow = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.get(&config(Driver::Mysql, "slow")).await })
        };
        tokio::task::yield_now().await;

        let fast = tokio::time::timeout(
            Duration::from_secs(5),
            pool.get(&config(Driver::Mysql, "fast")),
        )
        .await;
        assert!(fast.is_ok());
        slow.abort();
    }

    #[tokio::test]
    async fn test_shutdown_closes_every_handle() {
        let pool = DbPool::new(InMemoryConnector::new());
        pool.get(&config(Driver::Mysql, "a")).await.unwrap();
        pool.get(&config(Driver::Postgres, "b")).await.unwrap();

        assert_eq!(pool.shutdown().await, 2);
        assert!(pool.is_empty());
        assert_eq!(pool.connector().closed(), 2);

        pool.get(&config(Driver::Mysql, "a")).await.unwrap();
        assert_eq!(pool.connector().opened(), 3);
    }
}
