//! Queries over the runs store.
//!
//! The store is written by the test runner and only read here. It holds two tables:
//!
//! ```sql
//! runs(run_id BIGINT, start_time DATETIME, is_complete BOOLEAN)
//! results(run_id BIGINT, url VARCHAR(2048), score DOUBLE, total_resource_bytes BIGINT)
//! ```

use crate::{settings::Settings, ResultSummary, Run, ScoreAverage};
use anyhow::{format_err, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use log::info;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use std::sync::{Arc, Mutex};

const MAX_CONNECTIONS: u32 = 5;

const LATEST_COMPLETE_RUN: &str = "SELECT run_id, start_time FROM runs \
     WHERE is_complete = 1 \
     ORDER BY start_time DESC, run_id DESC LIMIT 1";

const TOP_RESULTS: &str = "SELECT run_id, url, score, total_resource_bytes FROM results \
     WHERE run_id = ? \
     ORDER BY score DESC, url ASC LIMIT ?";

const WORST_RESULTS: &str = "SELECT run_id, url, score, total_resource_bytes FROM results \
     WHERE run_id = ? \
     ORDER BY score ASC, url ASC LIMIT ?";

const BIGGEST_BY_TOTAL_RESOURCES: &str =
    "SELECT run_id, url, score, total_resource_bytes FROM results \
     WHERE run_id = ? \
     ORDER BY total_resource_bytes DESC, url ASC LIMIT ?";

const SCORE_AVERAGES: &str = "SELECT runs.run_id AS run_id, runs.start_time AS start_time, \
     AVG(results.score) AS average_score \
     FROM runs JOIN results ON results.run_id = runs.run_id \
     WHERE runs.is_complete = 1 AND runs.start_time >= ? \
     GROUP BY runs.run_id, runs.start_time \
     ORDER BY runs.start_time ASC";

#[async_trait]
pub trait RunsRepository: Send + Sync {
    async fn latest_complete_run(&self) -> Result<Run>;

    /// Best scoring pages first.
    async fn top_results_for_run(&self, run_id: i64, count: u32) -> Result<Vec<ResultSummary>>;

    /// Worst scoring pages first.
    async fn worst_results_for_run(&self, run_id: i64, count: u32) -> Result<Vec<ResultSummary>>;

    /// One average per completed run started in the last `days` days, oldest first.
    async fn previous_score_averages(&self, days: u32) -> Result<Vec<ScoreAverage>>;

    async fn biggest_pages_by_total_resources(
        &self,
        run_id: i64,
        count: u32,
    ) -> Result<Vec<ResultSummary>>;
}

/// Hands out a repository for the current connection settings.
pub trait RepositoryProvider: Send + Sync {
    fn repository(&self, settings: &Settings) -> Result<Arc<dyn RunsRepository>>;
}

#[derive(Debug, Clone)]
enum RunsPool {
    MySql(MySqlPool),
    #[cfg(test)]
    Sqlite(sqlx::SqlitePool),
}

// Runs the same query text against whichever pool backs the repository.
macro_rules! on_pool {
    ($pool:expr, $query:expr, $fetch:ident) => {
        match $pool {
            RunsPool::MySql(pool) => $query.$fetch(pool).await,
            #[cfg(test)]
            RunsPool::Sqlite(pool) => $query.$fetch(pool).await,
        }
    };
}

#[derive(Debug, Clone)]
pub struct SqlRuns {
    pool: RunsPool,
}

impl SqlRuns {
    pub fn mysql(pool: MySqlPool) -> Self {
        Self {
            pool: RunsPool::MySql(pool),
        }
    }

    #[cfg(test)]
    pub async fn sqlite_in_memory() -> Result<Self, sqlx::Error> {
        // A single connection, otherwise every connection gets its own empty database
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        Ok(Self {
            pool: RunsPool::Sqlite(pool),
        })
    }

    async fn ranked_results(
        &self,
        sql: &'static str,
        run_id: i64,
        count: u32,
    ) -> Result<Vec<ResultSummary>> {
        let results = on_pool!(
            &self.pool,
            sqlx::query_as::<_, ResultSummary>(sql)
                .bind(run_id)
                .bind(i64::from(count)),
            fetch_all
        )?;
        Ok(results)
    }
}

#[async_trait]
impl RunsRepository for SqlRuns {
    async fn latest_complete_run(&self) -> Result<Run> {
        let run = on_pool!(
            &self.pool,
            sqlx::query_as::<_, Run>(LATEST_COMPLETE_RUN),
            fetch_optional
        )?;
        run.ok_or_else(|| format_err!("no completed runs found"))
    }

    async fn top_results_for_run(&self, run_id: i64, count: u32) -> Result<Vec<ResultSummary>> {
        self.ranked_results(TOP_RESULTS, run_id, count).await
    }

    async fn worst_results_for_run(&self, run_id: i64, count: u32) -> Result<Vec<ResultSummary>> {
        self.ranked_results(WORST_RESULTS, run_id, count).await
    }

    async fn previous_score_averages(&self, days: u32) -> Result<Vec<ScoreAverage>> {
        let cutoff = Utc::now().naive_utc() - Duration::days(i64::from(days));
        let averages = on_pool!(
            &self.pool,
            sqlx::query_as::<_, ScoreAverage>(SCORE_AVERAGES).bind(cutoff),
            fetch_all
        )?;
        Ok(averages)
    }

    async fn biggest_pages_by_total_resources(
        &self,
        run_id: i64,
        count: u32,
    ) -> Result<Vec<ResultSummary>> {
        self.ranked_results(BIGGEST_BY_TOTAL_RESOURCES, run_id, count)
            .await
    }
}

/// Connects lazily to MySQL and reuses the pool until the settings change.
#[derive(Default)]
pub struct MySqlProvider {
    cached: Mutex<Option<(Settings, Arc<dyn RunsRepository>)>>,
}

impl MySqlProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RepositoryProvider for MySqlProvider {
    fn repository(&self, settings: &Settings) -> Result<Arc<dyn RunsRepository>> {
        let mut cached = self
            .cached
            .lock()
            .map_err(|_| format_err!("repository cache lock poisoned"))?;

        if let Some((cached_settings, runs)) = cached.as_ref() {
            if cached_settings == settings {
                return Ok(runs.clone());
            }
        }

        info!(
            "Connecting to MySQL database {} at {}:{}",
            settings.database_name, settings.database_hostname, settings.database_port_num
        );
        let options = MySqlConnectOptions::new()
            .host(&settings.database_hostname)
            .port(settings.database_port_num)
            .username(&settings.database_username)
            .password(&settings.database_password)
            .database(&settings.database_name);
        let pool = MySqlPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_lazy_with(options);

        let runs: Arc<dyn RunsRepository> = Arc::new(SqlRuns::mysql(pool));
        *cached = Some((settings.clone(), runs.clone()));
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::{MySqlProvider, RepositoryProvider, RunsPool, RunsRepository, SqlRuns};
    use crate::settings::Settings;
    use chrono::{Duration, NaiveDateTime, Utc};
    use std::sync::Arc;

    async fn execute(runs: &SqlRuns, sql: &str) {
        let RunsPool::Sqlite(pool) = &runs.pool else {
            panic!("expected a sqlite pool");
        };
        sqlx::query(sql).execute(pool).await.unwrap();
    }

    async fn insert_run(runs: &SqlRuns, run_id: i64, start_time: NaiveDateTime, complete: bool) {
        let RunsPool::Sqlite(pool) = &runs.pool else {
            panic!("expected a sqlite pool");
        };
        sqlx::query("INSERT INTO runs (run_id, start_time, is_complete) VALUES (?, ?, ?)")
            .bind(run_id)
            .bind(start_time)
            .bind(complete)
            .execute(pool)
            .await
            .unwrap();
    }

    async fn insert_result(runs: &SqlRuns, run_id: i64, url: &str, score: f64, bytes: i64) {
        let RunsPool::Sqlite(pool) = &runs.pool else {
            panic!("expected a sqlite pool");
        };
        sqlx::query(
            "INSERT INTO results (run_id, url, score, total_resource_bytes) VALUES (?, ?, ?, ?)",
        )
        .bind(run_id)
        .bind(url)
        .bind(score)
        .bind(bytes)
        .execute(pool)
        .await
        .unwrap();
    }

    async fn setup() -> SqlRuns {
        let runs = SqlRuns::sqlite_in_memory().await.unwrap();
        execute(
            &runs,
            "CREATE TABLE runs (run_id BIGINT, start_time DATETIME, is_complete BOOLEAN)",
        )
        .await;
        execute(
            &runs,
            "CREATE TABLE results (run_id BIGINT, url TEXT, score DOUBLE, total_resource_bytes BIGINT)",
        )
        .await;
        runs
    }

    fn days_ago(days: i64) -> NaiveDateTime {
        Utc::now().naive_utc() - Duration::days(days)
    }

    async fn seed(runs: &SqlRuns) {
        insert_run(runs, 1, days_ago(200), true).await;
        insert_run(runs, 2, days_ago(10), true).await;
        insert_run(runs, 3, days_ago(1), true).await;
        // still running, never shown
        insert_run(runs, 4, days_ago(0), false).await;

        insert_result(runs, 1, "https://example.com/", 10., 1_000).await;
        insert_result(runs, 2, "https://example.com/", 40., 1_000).await;
        insert_result(runs, 2, "https://example.com/a", 60., 1_000).await;
        for (url, score, bytes) in [
            ("https://example.com/", 91., 250_000),
            ("https://example.com/about", 75., 900_000),
            ("https://example.com/blog", 42., 3_200_000),
            ("https://example.com/contact", 88., 120_000),
            ("https://example.com/shop", 12., 5_400_000),
        ] {
            insert_result(runs, 3, url, score, bytes).await;
        }
        insert_result(runs, 4, "https://example.com/", 99., 1).await;
    }

    #[tokio::test]
    pub async fn test_latest_complete_run_skips_incomplete() {
        let runs = setup().await;
        seed(&runs).await;
        let run = runs.latest_complete_run().await.unwrap();
        assert_eq!(run.run_id, 3);
    }

    #[tokio::test]
    pub async fn test_no_complete_runs_is_an_error() {
        let runs = setup().await;
        insert_run(&runs, 1, days_ago(0), false).await;
        assert!(runs.latest_complete_run().await.is_err());
    }

    #[tokio::test]
    pub async fn test_top_results_are_bounded_and_ordered() {
        let runs = setup().await;
        seed(&runs).await;
        let top = runs.top_results_for_run(3, 3).await.unwrap();
        let scores: Vec<_> = top.iter().map(|r| r.score).collect();
        assert_eq!(scores, [91., 88., 75.]);
        assert!(top.iter().all(|r| r.run_id == 3));
    }

    #[tokio::test]
    pub async fn test_worst_results_are_bounded_and_ordered() {
        let runs = setup().await;
        seed(&runs).await;
        let worst = runs.worst_results_for_run(3, 3).await.unwrap();
        let urls: Vec<_> = worst.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(
            urls,
            [
                "https://example.com/shop",
                "https://example.com/blog",
                "https://example.com/about"
            ]
        );
    }

    #[tokio::test]
    pub async fn test_biggest_pages_by_total_resources() {
        let runs = setup().await;
        seed(&runs).await;
        let biggest = runs.biggest_pages_by_total_resources(3, 2).await.unwrap();
        let bytes: Vec<_> = biggest.iter().map(|r| r.total_resource_bytes).collect();
        assert_eq!(bytes, [5_400_000, 3_200_000]);
    }

    #[tokio::test]
    pub async fn test_score_averages_only_cover_the_window() {
        let runs = setup().await;
        seed(&runs).await;
        let averages = runs.previous_score_averages(90).await.unwrap();
        let ids: Vec<_> = averages.iter().map(|a| a.run_id).collect();
        assert_eq!(ids, [2, 3]);
        assert_eq!(averages[0].average_score, 50.);
        assert!((averages[1].average_score - 61.6).abs() < 1e-9);
    }

    #[tokio::test]
    pub async fn test_provider_reuses_pool_until_settings_change() {
        let provider = MySqlProvider::new();
        let mut settings = Settings {
            database_hostname: "db.internal".to_string(),
            ..Settings::default()
        };

        let first = provider.repository(&settings).unwrap();
        let again = provider.repository(&settings.clone()).unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        settings.database_port_num = 3307;
        let changed = provider.repository(&settings).unwrap();
        assert!(!Arc::ptr_eq(&first, &changed));
        assert!(Arc::ptr_eq(
            &changed,
            &provider.repository(&settings).unwrap()
        ));
    }
}
