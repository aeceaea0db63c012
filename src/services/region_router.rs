use crate::config::AthenaConfig;
use crate::models::RegionTag;

/// SQL fragments that point at the global (frontend) WAF regardless of catalog naming.
const GLOBAL_WAF_SQL_MARKERS: [&str; 2] = ["frontend", "global/webacl"];

/// Words in a user's question that suggest the frontend (global) WAF.
const US_EAST_1_QUESTION_HINTS: [&str; 6] = [
    "frontend",
    "front-end",
    "front end",
    "global",
    "us-east-1",
    "us east 1",
];

/// Picks the Athena region for a query.
#[derive(Debug, Clone)]
pub struct RegionRouter {
    /// Fragments that only appear in us-east-1 queries. Matched case-sensitively.
    us_east_1_markers: Vec<String>,
}

impl RegionRouter {
    pub fn new(us_east_1_markers: Vec<String>) -> Self {
        Self { us_east_1_markers }
    }

    /// Markers are the secondary catalog and table plus the global WAF fragments.
    pub fn from_config(config: &AthenaConfig) -> Self {
        let mut markers = vec![config.secondary.catalog.clone(), config.secondary.table.clone()];
        markers.extend(GLOBAL_WAF_SQL_MARKERS.iter().map(|m| m.to_string()));
        markers.retain(|m| !m.is_empty());
        Self::new(markers)
    }

    /// Region the SQL must run in. Defaults to ap-northeast-1.
    pub fn select_region(&self, sql: &str) -> RegionTag {
        match self.us_east_1_markers.iter().find(|marker| sql.contains(marker.as_str())) {
            Some(marker) => {
                tracing::info!("Region detection: us-east-1 (matched '{}')", marker);
                RegionTag::UsEast1
            }
            None => {
                tracing::info!("Region detection: ap-northeast-1 (default)");
                RegionTag::ApNortheast1
            }
        }
    }

    /// Whether free-form question text mentions the us-east-1 deployment.
    /// Advisory only; execution routing always uses `select_region`.
    pub fn contains_region_hint(text: &str) -> bool {
        let lower = text.to_lowercase();
        match US_EAST_1_QUESTION_HINTS.iter().find(|hint| lower.contains(*hint)) {
            Some(hint) => {
                tracing::debug!("Detected us-east-1 keyword '{}' in question", hint);
                true
            }
            None => false,
        }
    }
}
