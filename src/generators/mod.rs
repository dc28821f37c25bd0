// Template population. Each generator borrows the shared dataset, loads a
// fresh copy of its template per call and returns the edited workbook; saving
// is left to the caller.
mod profile;
mod snake;
mod state;

pub use profile::ProfileTableGenerator;
pub use snake::{SnakeKey, SnakeTableGenerator};
pub use state::StateTableGenerator;

use tracing::warn;

use crate::error::Result;
use crate::mapper::DisplayRow;
use crate::types::AssessmentRecord;
use crate::xlsx::{Workbook, Worksheet};

pub trait TableGenerator {
    /// What one generated workbook is keyed by.
    type Key;

    fn map_row(&self, record: &AssessmentRecord) -> DisplayRow;

    fn generate(&self, key: &Self::Key) -> Result<Workbook>;
}

/// Replace each `(token, value)` pair in the text of one cell.
///
/// Tokens that are not present are skipped; a cell without text is left
/// alone. Returns whether anything changed.
pub(crate) fn substitute_tokens(ws: &mut Worksheet, row: u32, col: u32, pairs: &[(&str, &str)]) -> bool {
    let Some(text) = ws.text(row, col) else {
        warn!(sheet = ws.name(), row, col, "no text to substitute into");
        return false;
    };
    let mut out = text.to_string();
    for (token, value) in pairs {
        if out.contains(token) {
            out = out.replace(token, value);
        } else {
            warn!(sheet = ws.name(), token, "placeholder not found");
        }
    }
    if out == text {
        return false;
    }
    ws.set_value(row, col, out);
    true
}

/// Rename every sheet whose name carries `token`.
pub(crate) fn rename_sheets(wb: &mut Workbook, token: &str, value: &str) {
    for ws in wb.worksheets_mut() {
        if ws.name().contains(token) {
            let renamed = ws.name().replace(token, value);
            ws.set_name(renamed);
        }
    }
}

/// Write a display row into consecutive cells starting at `col`.
pub(crate) fn write_row(ws: &mut Worksheet, row: u32, col: u32, cells: &DisplayRow) {
    for (offset, value) in cells.cells().iter().enumerate() {
        ws.set_value(row, col + offset as u32, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xlsx::testing::{inline, row, PackageBuilder};

    fn book() -> Workbook {
        let bytes = PackageBuilder::new()
            .sheet(
                "A_ST_",
                &format!(
                    "<sheetData>{}</sheetData>",
                    row(1, &[inline("A1", "Scores for [STATE] in [YEAR]", None)])
                ),
            )
            .sheet("Other", "<sheetData/>")
            .build();
        Workbook::from_bytes(&bytes).unwrap()
    }

    #[test]
    fn substitution_is_best_effort() {
        let mut wb = book();
        let ws = wb.sheet_mut("A_ST_").unwrap();
        assert!(substitute_tokens(ws, 1, 1, &[("[STATE]", "Vermont"), ("[MISSING]", "x")]));
        assert_eq!(ws.text(1, 1), Some("Scores for Vermont in [YEAR]"));
        assert!(!substitute_tokens(ws, 1, 1, &[("[STATE]", "Maine")]));
        assert!(!substitute_tokens(ws, 9, 9, &[("[YEAR]", "2019")]));
    }

    #[test]
    fn renames_only_tokenised_sheets() {
        let mut wb = book();
        rename_sheets(&mut wb, "_ST_", "VT");
        assert_eq!(wb.sheet_names(), vec!["AVT".to_string(), "Other".to_string()]);
    }
}
