// Per-state trend tables: one workbook per state, one sheet per grade with a
// reading block and a mathematics block side by side.
use std::path::PathBuf;

use tracing::{debug, info};

use super::{rename_sheets, substitute_tokens, write_row, TableGenerator};
use crate::error::{ReportError, Result};
use crate::layout::{StateLayout, STATE_ABBR_TOKEN, STATE_LAYOUT};
use crate::loader::Dataset;
use crate::mapper::{map_state_row, DisplayRow};
use crate::types::{AssessmentRecord, StatePreviewRow, Subject};
use crate::xlsx::Workbook;

pub const STATE_NAME_TOKEN: &str = "[STATE_NAME]";

pub struct StateTableGenerator<'a> {
    data: &'a Dataset,
    template: PathBuf,
    layout: StateLayout,
}

#[derive(Debug, Default)]
struct NotesSeen {
    no_data: bool,
    not_applicable: bool,
    flag: bool,
}

impl NotesSeen {
    fn record(&mut self, row: &DisplayRow) {
        self.no_data |= row.has_no_data();
        self.not_applicable |= row.has_not_applicable();
        self.flag |= row.has_flag();
    }
}

impl<'a> StateTableGenerator<'a> {
    pub fn new(data: &'a Dataset, template: impl Into<PathBuf>) -> Self {
        Self {
            data,
            template: template.into(),
            layout: STATE_LAYOUT,
        }
    }

    /// Included rows for one state and grade, sorted by (year, subjgrade).
    fn grade_records(&self, state: &str, grade: char) -> Vec<&'a AssessmentRecord> {
        let mut rows: Vec<&AssessmentRecord> = self
            .data
            .state_records
            .iter()
            .filter(|r| r.state == state && r.is_grade(grade))
            .collect();
        rows.sort_by(|a, b| (a.year, &a.subjgrade).cmp(&(b.year, &b.subjgrade)));
        rows
    }

    /// Most rows any subject block of this state needs.
    fn rows_needed(&self, state: &str) -> usize {
        let per_block = self
            .layout
            .grade_sheets
            .iter()
            .flat_map(|&(grade, _)| {
                let rows = self.grade_records(state, grade);
                Subject::ALL
                    .map(|s| rows.iter().filter(|r| r.subject() == Some(s)).count())
            })
            .max()
            .unwrap_or(0);
        per_block.max(self.data.years.len())
    }

    pub fn preview(&self, state: &str) -> Vec<StatePreviewRow> {
        self.layout
            .grade_sheets
            .iter()
            .flat_map(|&(grade, _)| self.grade_records(state, grade))
            .map(|r| {
                let cells = self.map_row(r);
                let text = |i: usize| cells.cells().get(i).map(ToString::to_string).unwrap_or_default();
                StatePreviewRow {
                    year: r.year,
                    subjgrade: r.subjgrade.clone(),
                    nse: text(0),
                    nse_se: text(1),
                    nse_re: text(2),
                    mark: text(3),
                }
            })
            .collect()
    }
}

impl TableGenerator for StateTableGenerator<'_> {
    type Key = String;

    fn map_row(&self, record: &AssessmentRecord) -> DisplayRow {
        map_state_row(record.nse, record.nse_se, record.nse_re, &record.mark)
    }

    fn generate(&self, state: &String) -> Result<Workbook> {
        let mut wb = Workbook::open(&self.template)?;
        self.layout.validate(&wb, self.rows_needed(state))?;

        let abbr = self.data.abbreviation(state);
        rename_sheets(&mut wb, STATE_ABBR_TOKEN, &abbr);

        let layout = &self.layout;
        for &(grade, sheet) in &layout.grade_sheets {
            let ws = wb
                .sheet_mut(sheet)
                .ok_or_else(|| ReportError::template(format!("sheet `{sheet}` not found")))?;
            substitute_tokens(ws, layout.title.row, layout.title.col, &[(STATE_NAME_TOKEN, state.as_str())]);

            for (i, year) in self.data.years.iter().enumerate() {
                ws.set_value(layout.first_data_row + i as u32, layout.year_col, *year);
            }

            let records = self.grade_records(state, grade);
            let mut seen = NotesSeen::default();
            for subject in Subject::ALL {
                let col = layout.subject_col(subject);
                let block = records.iter().filter(|r| r.subject() == Some(subject));
                for (i, record) in block.enumerate() {
                    let row = self.map_row(record);
                    seen.record(&row);
                    write_row(ws, layout.first_data_row + i as u32, col, &row);
                }
            }

            let [no_data_row, not_applicable_row, flag_row] = layout.note_rows;
            ws.set_row_hidden(no_data_row, !seen.no_data);
            ws.set_row_hidden(not_applicable_row, !seen.not_applicable);
            ws.set_row_hidden(flag_row, !seen.flag);
            debug!(sheet, rows = records.len(), ?seen, "grade sheet filled");
        }

        info!(state = state.as_str(), abbr = abbr.as_str(), "state table generated");
        Ok(wb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::tests::record;
    use crate::xlsx::testing::state_template;
    use crate::xlsx::CellValue;
    use pretty_assertions::assert_eq;

    fn dataset() -> Dataset {
        let mut flagged = record(2013, "R4", "Vermont", Some("NECAP"), Some(263.0), true);
        flagged.nse_se = None;
        flagged.mark = "!".into();
        let mut missing = record(2005, "M4", "Vermont", None, None, true);
        missing.nse_se = Some(1.0);
        Dataset::from_records(
            vec![
                record(2009, "R4", "Vermont", None, Some(253.5), true),
                flagged,
                missing,
                record(2009, "M4", "Vermont", None, Some(240.0), true),
                record(2009, "R8", "Vermont", None, Some(270.0), true),
                record(2009, "R4", "Maine", None, Some(250.0), true),
                record(2013, "R4", "NECAP", None, Some(251.0), true),
            ],
            None,
        )
    }

    fn template_dir() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("source_state.xlsx");
        std::fs::write(&path, state_template()).unwrap();
        (dir, path)
    }

    #[test]
    fn fills_grade_sheets_and_hides_unused_notes() {
        let data = dataset();
        let (_dir, path) = template_dir();
        let gen = StateTableGenerator::new(&data, &path);
        let wb = gen.generate(&"Vermont".to_string()).unwrap();

        assert_eq!(
            wb.sheet_names(),
            vec!["G4".to_string(), "G8".to_string(), "NotesVT".to_string()]
        );

        let g4 = wb.sheet("G4").unwrap();
        assert_eq!(g4.text(5, 2), Some("Table A. NSE for Vermont, grade 4"));
        let years: Vec<Option<&CellValue>> = (9..12).map(|r| g4.value(r, 2)).collect();
        assert_eq!(
            years,
            vec![
                Some(&CellValue::Number(2005.0)),
                Some(&CellValue::Number(2009.0)),
                Some(&CellValue::Number(2013.0)),
            ]
        );

        // Reading block: 2009 then 2013.
        assert_eq!(g4.value(9, 3), Some(&CellValue::Number(253.5)));
        assert_eq!(g4.text(10, 4), Some("\u{2013}"));
        assert_eq!(g4.text(10, 6), Some("!"));
        // Mathematics block: 2005 (missing) then 2009.
        assert_eq!(g4.text(9, 7), Some("\u{2013}"));
        assert_eq!(g4.text(9, 8), Some("\u{2020}"));
        assert_eq!(g4.value(10, 7), Some(&CellValue::Number(240.0)));

        assert!(!g4.is_row_hidden(16));
        assert!(!g4.is_row_hidden(17));
        assert!(!g4.is_row_hidden(18));

        let g8 = wb.sheet("G8").unwrap();
        assert_eq!(g8.value(9, 3), Some(&CellValue::Number(270.0)));
        assert!(g8.is_row_hidden(16));
        assert!(g8.is_row_hidden(17));
        assert!(g8.is_row_hidden(18));
    }

    #[test]
    fn output_survives_a_save() {
        let data = dataset();
        let (_dir, path) = template_dir();
        let wb = StateTableGenerator::new(&data, &path)
            .generate(&"Maine".to_string())
            .unwrap();
        let reopened = Workbook::from_bytes(&wb.to_bytes().unwrap()).unwrap();
        let g4 = reopened.sheet("G4").unwrap();
        assert_eq!(g4.text(5, 2), Some("Table A. NSE for Maine, grade 4"));
        assert_eq!(g4.value(9, 3), Some(&CellValue::Number(250.0)));
        assert!(reopened.sheet("NotesME").is_some());
    }

    #[test]
    fn missing_grade_sheet_is_a_template_error() {
        let data = dataset();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snake.xlsx");
        std::fs::write(&path, crate::xlsx::testing::snake_template()).unwrap();
        let err = StateTableGenerator::new(&data, &path)
            .generate(&"Vermont".to_string())
            .unwrap_err();
        assert!(matches!(err, ReportError::Template(_)));
    }

    #[test]
    fn preview_lists_mapped_rows() {
        let data = dataset();
        let gen = StateTableGenerator::new(&data, "unused.xlsx");
        let rows = gen.preview("Vermont");
        assert_eq!(rows.len(), 5);
        assert_eq!((rows[0].year, rows[0].subjgrade.as_str(), rows[0].nse.as_str()), (2005, "M4", "\u{2013}"));
        assert_eq!(rows[2].mark, "");
        assert_eq!(rows[3].mark, "!");
    }
}
