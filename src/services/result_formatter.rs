// Fixed-width text rendering of result rows for chat and for summarization prompts.

use crate::models::ResultTable;

/// Prefix Athena uses for unnamed expression columns (`_col0`, `_col1`, ...).
const ANONYMOUS_PREFIX: &str = "_col";
const NO_COLUMNS: &str = "No displayable columns found";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatMode {
    /// Chat output: code block, 20 data rows.
    Display,
    /// LLM input: plain text, 50 data rows.
    Summarize,
}

impl FormatMode {
    pub fn row_cap(&self) -> usize {
        match self {
            FormatMode::Display => 20,
            FormatMode::Summarize => 50,
        }
    }
}

pub struct ResultFormatter;

impl ResultFormatter {
    pub fn format_table(table: &ResultTable, mode: FormatMode) -> String {
        Self::format(&table.rows, mode)
    }

    /// Render `rows`, where row 0 holds the header labels.
    pub fn format(rows: &[Vec<Option<String>>], mode: FormatMode) -> String {
        let Some((header, data)) = rows.split_first() else {
            return match mode {
                FormatMode::Display => "No results found".to_string(),
                FormatMode::Summarize => "No data available".to_string(),
            };
        };

        let columns = Self::select_columns(header);
        if columns.is_empty() {
            return NO_COLUMNS.to_string();
        }

        let cap = mode.row_cap();
        let window = &data[..data.len().min(cap)];

        let rendered: Vec<Vec<String>> = window
            .iter()
            .map(|row| columns.iter().map(|(idx, _)| cell_text(row, *idx)).collect())
            .collect();

        let mut widths: Vec<usize> = columns.iter().map(|(_, label)| label.chars().count()).collect();
        for row in &rendered {
            for (width, value) in widths.iter_mut().zip(row) {
                *width = (*width).max(value.chars().count());
            }
        }

        let mut out = String::new();
        if mode == FormatMode::Display {
            out.push_str("```\n");
        }

        for ((_, label), width) in columns.iter().zip(&widths) {
            out.push_str(&pad(label, *width));
        }
        out.push('\n');
        for width in &widths {
            out.push_str(&"-".repeat(width + 2));
        }
        out.push('\n');

        for row in &rendered {
            for (value, width) in row.iter().zip(&widths) {
                out.push_str(&pad(value, *width));
            }
            out.push('\n');
        }

        match mode {
            FormatMode::Display => {
                if data.len() > cap {
                    out.push_str(&format!("...(Results limited to {} rows)\n", cap));
                }
                out.push_str("```\n");
            }
            FormatMode::Summarize => {
                if data.len() > cap {
                    out.push_str(&format!("\n... ({} more rows not displayed)", data.len() - cap));
                }
            }
        }
        out
    }

    /// Columns to show, as (position, label), in positional order.
    ///
    /// Named columns win. Without any, anonymous columns except position 0 (a row
    /// counter by convention). Failing that, every labeled column.
    pub fn select_columns(header: &[Option<String>]) -> Vec<(usize, String)> {
        let labeled: Vec<(usize, &String)> = header
            .iter()
            .enumerate()
            .filter_map(|(idx, label)| label.as_ref().map(|l| (idx, l)))
            .collect();

        let named: Vec<(usize, String)> = labeled
            .iter()
            .filter(|(_, label)| !label.starts_with(ANONYMOUS_PREFIX))
            .map(|(idx, label)| (*idx, label.to_string()))
            .collect();
        if !named.is_empty() {
            return named;
        }

        let anonymous: Vec<(usize, String)> = labeled
            .iter()
            .filter(|(idx, label)| *idx != 0 && label.starts_with(ANONYMOUS_PREFIX))
            .map(|(idx, label)| (*idx, label.to_string()))
            .collect();
        if !anonymous.is_empty() {
            tracing::debug!("No named columns found, using anonymous columns");
            return anonymous;
        }

        labeled.into_iter().map(|(idx, label)| (idx, label.clone())).collect()
    }
}

fn cell_text(row: &[Option<String>], idx: usize) -> String {
    match row.get(idx) {
        Some(Some(value)) => value.clone(),
        Some(None) => "NULL".to_string(),
        None => "N/A".to_string(),
    }
}

fn pad(value: &str, width: usize) -> String {
    format!("{:<width$}", value, width = width + 2)
}
