use chrono::NaiveDateTime;

pub mod config;
pub mod controller;
pub mod runs;
pub mod settings;
pub mod views;

/// A completed sweep over the sitemap.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Run {
    pub run_id: i64,
    pub start_time: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ResultSummary {
    pub run_id: i64,
    pub url: String,
    pub score: f64,
    pub total_resource_bytes: i64,
}

impl ResultSummary {
    pub fn total_resource_kb(&self) -> f64 {
        self.total_resource_bytes as f64 / 1024.
    }
}

/// Mean page score for one completed run.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ScoreAverage {
    pub run_id: i64,
    pub start_time: NaiveDateTime,
    pub average_score: f64,
}
