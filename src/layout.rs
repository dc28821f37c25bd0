// Cell positions each generator writes to, one table per template kind.
//
// Rows and columns are 1-based, as in the spreadsheet UI. Every layout is
// checked against the freshly loaded template before anything is written so
// a drifted template fails loudly instead of producing a corrupt workbook.
use crate::error::{ReportError, Result};
use crate::types::Subject;
use crate::xlsx::{cell_ref, Workbook, Worksheet};

/// Sheet-name token replaced with the state abbreviation.
pub const STATE_ABBR_TOKEN: &str = "_ST_";

#[derive(Debug, Clone, Copy)]
pub struct CellPos {
    pub row: u32,
    pub col: u32,
}

impl CellPos {
    pub const fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

fn require_sheet<'a>(wb: &'a Workbook, name: &str) -> Result<&'a Worksheet> {
    wb.sheet(name)
        .ok_or_else(|| ReportError::template(format!("sheet `{name}` not found")))
}

fn require_text(ws: &Worksheet, pos: CellPos) -> Result<()> {
    match ws.text(pos.row, pos.col) {
        Some(_) => Ok(()),
        None => Err(ReportError::template(format!(
            "sheet `{}` has no text in {}",
            ws.name(),
            cell_ref(pos.row, pos.col)
        ))),
    }
}

/// Per-state trend workbook (`source_state.xlsx`).
#[derive(Debug, Clone)]
pub struct StateLayout {
    pub grade_sheets: [(char, &'static str); 2],
    pub title: CellPos,
    pub year_col: u32,
    pub first_data_row: u32,
    pub reading_col: u32,
    pub math_col: u32,
    /// Note rows for: no data, not applicable, flagged.
    pub note_rows: [u32; 3],
}

pub const STATE_LAYOUT: StateLayout = StateLayout {
    grade_sheets: [('4', "G4"), ('8', "G8")],
    title: CellPos::new(5, 2),
    year_col: 2,
    first_data_row: 9,
    reading_col: 3,
    math_col: 7,
    note_rows: [16, 17, 18],
};

impl StateLayout {
    pub fn subject_col(&self, subject: Subject) -> u32 {
        match subject {
            Subject::Reading => self.reading_col,
            Subject::Mathematics => self.math_col,
        }
    }

    /// Data rows available above the first note row.
    pub fn capacity(&self) -> usize {
        let first_note = self.note_rows.iter().copied().min().unwrap_or(self.first_data_row);
        first_note.saturating_sub(self.first_data_row) as usize
    }

    pub fn validate(&self, wb: &Workbook, rows: usize) -> Result<()> {
        for (_, name) in self.grade_sheets {
            let ws = require_sheet(wb, name)?;
            require_text(ws, self.title)?;
        }
        if rows > self.capacity() {
            return Err(ReportError::template(format!(
                "{rows} data rows do not fit above the notes (room for {})",
                self.capacity()
            )));
        }
        Ok(())
    }
}

/// Cross-state snake chart (`source_snakechart.xlsx`).
#[derive(Debug, Clone)]
pub struct SnakeLayout {
    pub sheet: &'static str,
    pub title: CellPos,
    pub first_row: u32,
    pub first_col: u32,
    pub width: u32,
    /// Row whose cell formats are reused for every written row.
    pub style_row: u32,
}

pub const SNAKE_LAYOUT: SnakeLayout = SnakeLayout {
    sheet: "Sheet1",
    title: CellPos::new(5, 2),
    first_row: 8,
    first_col: 2,
    width: 5,
    style_row: 8,
};

impl SnakeLayout {
    pub fn columns(&self) -> std::ops::Range<u32> {
        self.first_col..self.first_col + self.width
    }

    pub fn validate(&self, wb: &Workbook) -> Result<()> {
        let ws = require_sheet(wb, self.sheet)?;
        require_text(ws, self.title)?;
        if !wb.has_styles() {
            return Err(ReportError::template("workbook has no styles part"));
        }
        Ok(())
    }
}

/// Which rows a state-profile sheet carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileSheet {
    State { grade: char },
    Consortium { grade: char },
}

/// State profile workbook (`template_state.xlsx`).
#[derive(Debug, Clone)]
pub struct ProfileLayout {
    /// Sheet kinds in workbook order.
    pub sheets: [ProfileSheet; 4],
    pub title: CellPos,
    pub header_row: u32,
    pub first_data_row: u32,
    pub first_note_row: u32,
    pub note_count: u32,
    /// Tables this wide get their notes merged through column I, wider ones
    /// through column J.
    pub narrow_width: u32,
    /// Height of one extra wrapped line in a note row, in points.
    pub note_line_height: f64,
}

pub const PROFILE_LAYOUT: ProfileLayout = ProfileLayout {
    sheets: [
        ProfileSheet::State { grade: '4' },
        ProfileSheet::State { grade: '8' },
        ProfileSheet::Consortium { grade: '4' },
        ProfileSheet::Consortium { grade: '8' },
    ],
    title: CellPos::new(4, 1),
    header_row: 6,
    first_data_row: 7,
    first_note_row: 14,
    note_count: 5,
    narrow_width: 9,
    note_line_height: 13.0,
};

impl ProfileLayout {
    pub fn note_rows(&self) -> std::ops::Range<u32> {
        self.first_note_row..self.first_note_row + self.note_count
    }

    pub fn note_end_col(&self, max_column: u32) -> u32 {
        if max_column == self.narrow_width {
            self.narrow_width
        } else {
            self.narrow_width + 1
        }
    }

    pub fn validate(&self, wb: &Workbook) -> Result<()> {
        if wb.sheet_count() < self.sheets.len() {
            return Err(ReportError::template(format!(
                "expected {} sheets, found {}",
                self.sheets.len(),
                wb.sheet_count()
            )));
        }
        for i in 0..self.sheets.len() {
            let Some(ws) = wb.sheet_at(i) else { continue };
            require_text(ws, self.title)?;
            for r in self.note_rows() {
                require_text(ws, CellPos::new(r, 1))?;
            }
            if ws.tables().is_empty() {
                return Err(ReportError::template(format!(
                    "sheet `{}` has no table",
                    ws.name()
                )));
            }
        }
        Ok(())
    }
}
