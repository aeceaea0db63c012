// Query rewriting applied to generated SQL before submission.
//
// Three passes, each safe to repeat: table qualification, local-time to UTC
// conversion of timestamp ranges, and expansion of year-only range bounds.

use chrono::{Duration as ChronoDuration, NaiveDateTime};
use regex::{Captures, Regex};

use crate::config::AthenaConfig;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A table name that is known to live in a given catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct TableBinding {
    pub catalog: String,
    pub table: String,
}

impl TableBinding {
    pub fn new(catalog: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            catalog: catalog.into(),
            table: table.into(),
        }
    }

    fn qualified(&self) -> String {
        format!("{}.{}", self.catalog, self.table)
    }
}

#[derive(Debug, Clone, Copy)]
enum RangeBound {
    Lower,
    Upper,
}

/// Normalizes and regionalizes SQL text. Total: input that matches no pattern
/// comes back unchanged apart from surrounding whitespace.
#[derive(Debug, Clone)]
pub struct QueryRewriter {
    bindings: Vec<TableBinding>,
    timestamp_column: String,
    utc_offset: ChronoDuration,
    column_range: Regex,
    any_range: Regex,
}

impl QueryRewriter {
    pub fn new(
        bindings: Vec<TableBinding>,
        timestamp_column: &str,
        local_utc_offset_hours: i64,
    ) -> Result<Self, regex::Error> {
        let column_range = Regex::new(&format!(
            r"{}\s+BETWEEN\s+'([^']+)'\s+AND\s+'([^']+)'",
            regex::escape(timestamp_column)
        ))?;
        let any_range = Regex::new(r"BETWEEN\s+'([^']+)'\s+AND\s+'([^']+)'")?;

        Ok(Self {
            bindings,
            timestamp_column: timestamp_column.to_string(),
            utc_offset: ChronoDuration::hours(local_utc_offset_hours),
            column_range,
            any_range,
        })
    }

    pub fn from_config(config: &AthenaConfig) -> Result<Self, regex::Error> {
        let bindings = [&config.primary, &config.secondary]
            .into_iter()
            .map(|region| TableBinding::new(&region.catalog, &region.table))
            .collect();
        Self::new(bindings, &config.timestamp_column, config.local_utc_offset_hours)
    }

    pub fn rewrite(&self, sql: &str) -> String {
        let query = self.qualify_tables(sql.trim().to_string());
        let query = self.normalize_timestamp_range(&query);
        let query = self.expand_year_bounds(query);

        tracing::debug!("Rewritten query: {}", query);
        query
    }

    /// Prefix bare table names with their catalog unless the catalog is already referenced.
    fn qualify_tables(&self, mut query: String) -> String {
        for binding in &self.bindings {
            if query.contains(&binding.table) && !query.contains(&binding.catalog) {
                query = query.replace(&binding.table, &binding.qualified());
                tracing::debug!("Qualified table {} with catalog {}", binding.table, binding.catalog);
            }
        }
        query
    }

    /// `<ts_col> BETWEEN '<a>' AND '<b>'` becomes a typed UTC range.
    fn normalize_timestamp_range(&self, query: &str) -> String {
        self.column_range
            .replace_all(query, |caps: &Captures| {
                let lower = self.to_utc_literal(&caps[1], RangeBound::Lower);
                let upper = self.to_utc_literal(&caps[2], RangeBound::Upper);
                format!(
                    "{} BETWEEN TIMESTAMP '{}' AND TIMESTAMP '{}'",
                    self.timestamp_column, lower, upper
                )
            })
            .into_owned()
    }

    fn to_utc_literal(&self, literal: &str, bound: RangeBound) -> String {
        if is_year(literal) {
            return expand_year(literal, bound);
        }
        if literal.contains('+') || literal.contains('Z') {
            return literal.to_string();
        }
        match NaiveDateTime::parse_from_str(literal, TIMESTAMP_FORMAT) {
            Ok(local) => {
                let utc = (local - self.utc_offset).format(TIMESTAMP_FORMAT).to_string();
                tracing::debug!("Local to UTC conversion: {} -> {}", literal, utc);
                utc
            }
            Err(_) => literal.to_string(),
        }
    }

    /// Year-only range bounds on any column. Replaces the first textual
    /// occurrence of each quoted literal, wherever it is in the query.
    fn expand_year_bounds(&self, mut query: String) -> String {
        let ranges: Vec<(String, String)> = self
            .any_range
            .captures_iter(&query)
            .map(|caps| (caps[1].to_string(), caps[2].to_string()))
            .collect();

        for (lower, upper) in ranges {
            query = expand_first_year(query, &lower, RangeBound::Lower);
            query = expand_first_year(query, &upper, RangeBound::Upper);
        }
        query
    }
}

/// Replace the first quoted `literal` with its expanded timestamp, unless that
/// expansion is already present from an earlier pass.
fn expand_first_year(query: String, literal: &str, bound: RangeBound) -> String {
    if !is_year(literal) {
        return query;
    }
    let typed = format!("TIMESTAMP '{}'", expand_year(literal, bound));
    if query.contains(&typed) {
        return query;
    }
    query.replacen(&format!("'{}'", literal), &typed, 1)
}

fn is_year(literal: &str) -> bool {
    literal.len() == 4 && literal.bytes().all(|b| b.is_ascii_digit())
}

fn expand_year(year: &str, bound: RangeBound) -> String {
    match bound {
        RangeBound::Lower => format!("{}-01-01 00:00:00", year),
        RangeBound::Upper => format!("{}-12-31 23:59:59", year),
    }
}
