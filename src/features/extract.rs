use chrono::{DateTime, Datelike, Utc};

use super::FeatureSet;
use crate::models::RawRepo;

/// Repositories updated within this many days count as recently updated.
pub const RECENT_UPDATE_DAYS: f64 = 7.0;

/// Raw columns that also get a `log1p_` companion column.
pub const LOG_COLUMNS: [&str; 11] = [
    "stars",
    "forks",
    "issues",
    "size_kb",
    "topics",
    "commits",
    "commits_per_day",
    "forks_per_day",
    "watchers",
    "watchers_per_fork",
    "days_since_update",
];

/// Numeric columns of the feature table, in output order (before the
/// `log1p_` and `lang_` columns).
pub const NUMERIC_COLUMNS: [&str; 20] = [
    "stars",
    "forks",
    "watchers",
    "issues",
    "size_kb",
    "topics",
    "commits",
    "has_homepage",
    "watchers_per_fork",
    "age_days",
    "days_since_update",
    "recently_updated",
    "activity_ratio",
    "fork_star_ratio",
    "issues_per_size",
    "avg_growth_rate",
    "creation_year",
    "creation_month",
    "commits_per_day",
    "forks_per_day",
];

/// Features derived from one repository record at a given instant.
///
/// Age and recency depend on `now`, so extracting the same record twice at
/// different times gives different rows.
#[derive(Debug, Clone, PartialEq)]
pub struct RepoFeatures {
    pub full_name: String,
    /// Primary language, `"None"` when GitHub reports none
    pub language: String,
    pub stars: f64,
    pub forks: f64,
    pub watchers: f64,
    pub issues: f64,
    pub size_kb: f64,
    pub topics: f64,
    pub commits: f64,
    pub has_homepage: f64,
    pub age_days: f64,
    pub days_since_update: f64,
    pub recently_updated: f64,
    pub watchers_per_fork: f64,
    pub activity_ratio: f64,
    pub fork_star_ratio: f64,
    pub issues_per_size: f64,
    pub avg_growth_rate: f64,
    pub creation_year: f64,
    pub creation_month: f64,
    /// `None` when the repository is less than a day old
    pub commits_per_day: Option<f64>,
    /// `None` when the repository is less than a day old
    pub forks_per_day: Option<f64>,
}

impl RepoFeatures {
    pub fn extract(repo: &RawRepo, commits: u64, now: DateTime<Utc>) -> Self {
        let stars = repo.stargazers_count as f64;
        let forks = repo.forks_count as f64;
        let watchers = repo.watchers_count as f64;
        let issues = repo.open_issues_count as f64;
        let size_kb = repo.size as f64;
        let commits = commits as f64;

        let age_days = whole_days_between(repo.created_at, now);
        let days_since_update = whole_days_between(repo.updated_at, now);

        Self {
            full_name: repo.full_name.clone(),
            language: repo
                .language
                .clone()
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| "None".to_string()),
            stars,
            forks,
            watchers,
            issues,
            size_kb,
            topics: repo.topics.len() as f64,
            commits,
            has_homepage: bool_flag(repo.has_homepage()),
            age_days,
            days_since_update,
            recently_updated: bool_flag(days_since_update <= RECENT_UPDATE_DAYS),
            watchers_per_fork: if forks > 0.0 { watchers / forks } else { 0.0 },
            activity_ratio: days_since_update / (age_days + 1.0),
            fork_star_ratio: forks / (stars + 1.0),
            issues_per_size: issues / (size_kb + 1.0),
            avg_growth_rate: stars / (age_days + 1.0),
            creation_year: repo.created_at.year() as f64,
            creation_month: repo.created_at.month() as f64,
            commits_per_day: rate(commits, age_days),
            forks_per_day: rate(forks, age_days),
        }
    }

    /// Raw value of a column; undefined rates come back as NaN.
    fn raw(&self, name: &str) -> Option<f64> {
        let value = match name {
            "stars" => self.stars,
            "forks" => self.forks,
            "watchers" => self.watchers,
            "issues" => self.issues,
            "size_kb" => self.size_kb,
            "topics" => self.topics,
            "commits" => self.commits,
            "has_homepage" => self.has_homepage,
            "watchers_per_fork" => self.watchers_per_fork,
            "age_days" => self.age_days,
            "days_since_update" => self.days_since_update,
            "recently_updated" => self.recently_updated,
            "activity_ratio" => self.activity_ratio,
            "fork_star_ratio" => self.fork_star_ratio,
            "issues_per_size" => self.issues_per_size,
            "avg_growth_rate" => self.avg_growth_rate,
            "creation_year" => self.creation_year,
            "creation_month" => self.creation_month,
            "commits_per_day" => self.commits_per_day.unwrap_or(f64::NAN),
            "forks_per_day" => self.forks_per_day.unwrap_or(f64::NAN),
            _ => return None,
        };
        Some(value)
    }

    /// Value of a named table column, with undefined values filled with 0.
    ///
    /// Accepts the plain numeric columns and their `log1p_` companions.
    pub fn column(&self, name: &str) -> Option<f64> {
        if let Some(base) = name.strip_prefix("log1p_") {
            if !LOG_COLUMNS.contains(&base) {
                return None;
            }
            return self.raw(base).map(log1p_filled);
        }
        self.raw(name).map(|v| if v.is_nan() { 0.0 } else { v })
    }

    /// Model input vector for a feature set, in the set's column order.
    pub fn vector(&self, set: FeatureSet) -> Vec<f64> {
        set.columns()
            .iter()
            .map(|c| self.column(c).unwrap_or(0.0))
            .collect()
    }
}

/// `ln(1 + x)` with NaN treated as 0.
pub fn log1p_filled(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.ln_1p()
    }
}

/// Whole days elapsed from `then` to `now`, never negative.
fn whole_days_between(then: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - then).num_days().max(0) as f64
}

/// `numerator / denominator`, undefined for a zero denominator.
fn rate(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator == 0.0 {
        None
    } else {
        Some(numerator / denominator)
    }
}

fn bool_flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}
