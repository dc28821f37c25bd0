// Snake charts: every state (then every consortium) for one year and one
// subject-grade, in a single table.
use std::path::PathBuf;

use tracing::{debug, info};

use super::{substitute_tokens, write_row, TableGenerator};
use crate::error::Result;
use crate::layout::{SnakeLayout, SNAKE_LAYOUT};
use crate::loader::Dataset;
use crate::mapper::{map_cross_state_row, DisplayRow};
use crate::types::{AssessmentRecord, SnakePreviewRow, SubjectGrade};
use crate::xlsx::Workbook;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnakeKey {
    pub year: i32,
    pub subjgrade: SubjectGrade,
}

pub struct SnakeTableGenerator<'a> {
    data: &'a Dataset,
    template: PathBuf,
    layout: SnakeLayout,
}

impl<'a> SnakeTableGenerator<'a> {
    pub fn new(data: &'a Dataset, template: impl Into<PathBuf>) -> Self {
        Self {
            data,
            template: template.into(),
            layout: SNAKE_LAYOUT,
        }
    }

    /// Non-empty row groups in output order: states, then consortia, each
    /// sorted by name.
    fn groups(&self, key: &SnakeKey) -> Vec<Vec<DisplayRow>> {
        let code = key.subjgrade.code();
        [&self.data.state_records, &self.data.consortium_records]
            .into_iter()
            .filter_map(|records| {
                let mut matching: Vec<&AssessmentRecord> = records
                    .iter()
                    .filter(|r| r.year == key.year && r.subjgrade == code)
                    .collect();
                if matching.is_empty() {
                    return None;
                }
                matching.sort_by(|a, b| a.state.cmp(&b.state));
                Some(matching.into_iter().map(|r| self.map_row(r)).collect())
            })
            .collect()
    }

    pub fn preview(&self, key: &SnakeKey) -> Vec<SnakePreviewRow> {
        self.groups(key)
            .into_iter()
            .flatten()
            .map(|row| {
                let text = |i: usize| row.cells().get(i).map(ToString::to_string).unwrap_or_default();
                SnakePreviewRow {
                    state: text(0),
                    consortium: text(1),
                    nse: text(2),
                    nse_se: text(3),
                    nse_re: text(4),
                }
            })
            .collect()
    }
}

impl TableGenerator for SnakeTableGenerator<'_> {
    type Key = SnakeKey;

    fn map_row(&self, record: &AssessmentRecord) -> DisplayRow {
        map_cross_state_row(
            &record.state,
            record.consortium.as_deref(),
            record.nse,
            record.nse_se,
            record.nse_re,
        )
    }

    fn generate(&self, key: &SnakeKey) -> Result<Workbook> {
        let mut wb = Workbook::open(&self.template)?;
        let layout = &self.layout;
        layout.validate(&wb)?;
        let (ws, styles) = wb.sheet_with_styles_mut(layout.sheet)?;

        // Formats of the reference row, reused for every written cell.
        let formats: Vec<u32> = layout
            .columns()
            .map(|col| ws.style(layout.style_row, col).unwrap_or(0))
            .collect();

        let year = key.year.to_string();
        let letter = key.subjgrade.letter().to_string();
        let grade = key.subjgrade.grade.to_string();
        substitute_tokens(
            ws,
            layout.title.row,
            layout.title.col,
            &[
                ("[YEAR]", year.as_str()),
                ("[LETTER]", letter.as_str()),
                ("[GRADE]", grade.as_str()),
                ("[SUBJECT]", key.subjgrade.subject.label()),
            ],
        );

        let mut next_row = layout.first_row;
        let mut group_ends = Vec::new();
        for group in self.groups(key) {
            for row in &group {
                write_row(ws, next_row, layout.first_col, row);
                for (col, format) in layout.columns().zip(&formats) {
                    ws.set_style(next_row, col, *format);
                }
                next_row += 1;
            }
            group_ends.push(next_row - 1);
        }

        for &end in &group_ends {
            for col in layout.columns() {
                let base = ws.style(end, col).unwrap_or(0);
                let bordered = styles.with_bottom_border(base)?;
                ws.set_style(end, col, bordered);
            }
        }
        debug!(?group_ends, "group borders applied");

        info!(
            year = key.year,
            subjgrade = %key.subjgrade,
            rows = next_row - layout.first_row,
            "snake chart generated"
        );
        Ok(wb)
    }
}
