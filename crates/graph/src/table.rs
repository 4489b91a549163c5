//! Pipe-delimited context sections under a token budget.

use graphchat_core::context::{ContextRecord, ContextTable};
use graphchat_core::token::estimate_tokens;

/// Renders one `-----Title-----` section, row by row, until its budget
/// runs out. Every rendered row is also kept as a provenance record.
pub(crate) struct SectionWriter {
    table: ContextTable,
    columns: Vec<&'static str>,
    text: String,
    tokens: usize,
    budget: usize,
}

impl SectionWriter {
    pub(crate) fn new(title: &str, columns: Vec<&'static str>, budget: usize) -> Self {
        let text = format!("-----{title}-----\n{}\n", columns.join("|"));
        Self {
            table: ContextTable::new(title.to_lowercase()),
            tokens: estimate_tokens(&text),
            columns,
            text,
            budget,
        }
    }

    /// Append a row. Returns `false`, leaving the section unchanged, when
    /// the row would push the section over budget.
    pub(crate) fn push(&mut self, cells: Vec<String>) -> bool {
        let line = format!("{}\n", cells.join("|"));
        let cost = estimate_tokens(&line);
        if self.tokens + cost > self.budget {
            return false;
        }
        self.tokens += cost;
        self.text.push_str(&line);

        let mut record = ContextRecord::new();
        for (column, cell) in self.columns.iter().zip(cells) {
            record.insert((*column).to_string(), cell.into());
        }
        self.table.rows.push(record);
        true
    }

    pub(crate) fn tokens(&self) -> usize {
        self.tokens
    }

    /// The rendered section and its records, or `None` if no row fit.
    pub(crate) fn finish(self) -> Option<(String, ContextTable)> {
        if self.table.rows.is_empty() {
            return None;
        }
        Some((self.text.trim_end().to_string(), self.table))
    }
}

/// Collapse a cell onto one line so it cannot break the table.
pub(crate) fn cell(text: &str) -> String {
    text.replace(['\n', '\r'], " ").replace('|', "/")
}

pub(crate) fn number(value: f32) -> String {
    format!("{value}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_become_records() {
        let mut section = SectionWriter::new("Entities", vec!["id", "entity"], 1_000);
        assert!(section.push(vec!["1".into(), "COMPANY A".into()]));

        let (text, table) = section.finish().unwrap();
        assert_eq!(text, "-----Entities-----\nid|entity\n1|COMPANY A");
        assert_eq!(table.name, "entities");
        assert_eq!(table.rows[0]["entity"], "COMPANY A");
    }

    #[test]
    fn row_over_budget_is_rejected() {
        let mut section = SectionWriter::new("Sources", vec!["id", "text"], 12);
        assert!(!section.push(vec!["1".into(), "x".repeat(200)]));
        assert!(section.finish().is_none());
    }

    #[test]
    fn cells_are_single_line() {
        assert_eq!(cell("a|b\nc"), "a/b c");
        assert_eq!(number(2.0), "2");
        assert_eq!(number(0.5), "0.5");
    }
}
