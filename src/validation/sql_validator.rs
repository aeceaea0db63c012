/// Keywords that reject a query outright. Matched as substrings of the
/// upper-cased text, so `updated_at` is rejected too. Best-effort only.
const DENIED_KEYWORDS: [&str; 4] = ["DROP", "DELETE", "INSERT", "UPDATE"];

/// Guard applied to generated SQL before anything is submitted.
pub struct SqlValidator;

impl SqlValidator {
    /// Returns the first denied keyword found in `sql`, if any.
    pub fn find_denied_keyword(sql: &str) -> Option<&'static str> {
        let upper = sql.to_uppercase();
        DENIED_KEYWORDS
            .iter()
            .copied()
            .find(|keyword| upper.contains(keyword))
    }

    /// Reject mutating statements with a descriptive message.
    pub fn reject_mutations(sql: &str) -> Result<(), String> {
        match Self::find_denied_keyword(sql) {
            Some(keyword) => Err(format!(
                "Invalid SQL command detected: {} is not allowed, only read queries are executed",
                keyword
            )),
            None => Ok(()),
        }
    }
}
