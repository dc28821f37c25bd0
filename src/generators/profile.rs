// State profiles: one workbook per state with its own grade 4 / grade 8 trend
// tables and the matching tables for the consortia it tested with. Sheets
// without rows are dropped and the note block is rebuilt under each table.
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use tracing::{debug, info, warn};

use super::{rename_sheets, substitute_tokens, write_row, TableGenerator};
use crate::error::{ReportError, Result};
use crate::layout::{ProfileLayout, ProfileSheet, PROFILE_LAYOUT, STATE_ABBR_TOKEN};
use crate::loader::Dataset;
use crate::mapper::{map_profile_cells, DisplayRow, DisplayValue};
use crate::types::{AssessmentRecord, Subject};
use crate::xlsx::{CellRange, Stylesheet, Workbook, Worksheet};

/// Earliest assessment year shown in a profile.
pub const FIRST_PROFILE_YEAR: i32 = 2007;

const STATE_TOKEN: &str = "[STATE]";
const YEARS_TOKEN: &str = "[YEARS]";
const CONSORTIUM_NOTES_TOKEN: &str = "[CONSORTIUM_NOTES]";
const YEARS_NAEP_TOKEN: &str = "[YEARS_NAEP]";
const YEARS_EDFACTS_TOKEN: &str = "[YEARS_EDFACTS]";

const CONSORTIUM_NOTES: &[(&str, &str)] = &[
    ("ACT", "ACT refers to ACT Aspire."),
    ("NECAP", "NECAP refers to New England Common Assessment Program."),
    (
        "PARCC",
        "PARCC refers to Partnership for Assessment of Readiness for College and Careers.",
    ),
    ("SBAC", "SBAC refers to Smarter Balanced Assessment Consortium."),
];

/// Source-note rewrites for Puerto Rico, which only has 2017 and 2019
/// mathematics results.
const PUERTO_RICO_NOTE_EDITS: &[(&str, &str)] = &[
    (
        "2007, 2009, 2011, 2013, 2015, 2017, and 2019 Reading and ",
        "2017 and 2019 ",
    ),
    (
        "2006\u{2013}07, 2008\u{2013}09, 2010\u{2013}11, 2012\u{2013}13, 2014\u{2013}15, 2016\u{2013}17, ",
        "2016-17 ",
    ),
];

/// Rows for one profile sheet plus the values its titles and notes need.
#[derive(Debug, Default)]
struct ProfileRows {
    rows: Vec<DisplayRow>,
    years: BTreeSet<i32>,
    consortia: BTreeSet<String>,
}

#[derive(Debug, Clone)]
struct NoteRow {
    text: String,
    style: u32,
    height: Option<f64>,
}

pub struct ProfileTableGenerator<'a> {
    data: &'a Dataset,
    template: PathBuf,
    layout: ProfileLayout,
}

pub fn year_title_text(years: &[i32]) -> String {
    match years {
        [] => String::new(),
        [only] => only.to_string(),
        [first, second] => format!("{first} and {second}"),
        [first, .., last] => {
            let last = last.to_string();
            let short = &last[last.len().saturating_sub(2)..];
            format!("Various years, {first}\u{2013}{short}")
        }
    }
}

/// `2007, 2009, and 2011`; the EDFacts form names school years (`2006-07`).
pub fn year_note_text(years: &[i32], edfacts: bool) -> String {
    let labels: Vec<String> = years
        .iter()
        .map(|&y| {
            if edfacts {
                format!("{}-{:02}", y - 1, y.rem_euclid(100))
            } else {
                y.to_string()
            }
        })
        .collect();
    match labels.as_slice() {
        [] => String::new(),
        [only] => only.clone(),
        [first, second] => format!("{first} and {second}"),
        [init @ .., last] => format!("{}, and {last}", init.join(", ")),
    }
}

pub fn consortium_note_text<'c>(consortia: impl IntoIterator<Item = &'c str>) -> String {
    consortia
        .into_iter()
        .map(|c| {
            CONSORTIUM_NOTES
                .iter()
                .find(|(name, _)| *name == c)
                .map(|(_, note)| *note)
                .unwrap_or("")
        })
        .collect::<Vec<_>>()
        .join(" ")
}

impl<'a> ProfileTableGenerator<'a> {
    pub fn new(data: &'a Dataset, template: impl Into<PathBuf>) -> Self {
        Self {
            data,
            template: template.into(),
            layout: PROFILE_LAYOUT,
        }
    }

    /// All of a state's own records for a grade from the profile years on,
    /// regardless of the inclusion flag.
    fn state_grade_records(&self, state: &str, grade: char) -> Vec<&'a AssessmentRecord> {
        if self.data.is_consortium(state) {
            return Vec::new();
        }
        self.data
            .records
            .iter()
            .filter(|r| r.state == state && r.year >= FIRST_PROFILE_YEAR && r.is_grade(grade))
            .collect()
    }

    fn by_year(records: &[&'a AssessmentRecord], subject: Subject) -> BTreeMap<i32, &'a AssessmentRecord> {
        records
            .iter()
            .filter(|r| r.subject() == Some(subject))
            .map(|r| (r.year, *r))
            .collect()
    }

    /// Year, reading block, mathematics block; years present in both subjects.
    fn state_rows(&self, state: &str, grade: char) -> ProfileRows {
        let records = self.state_grade_records(state, grade);
        let reading = Self::by_year(&records, Subject::Reading);
        let math = Self::by_year(&records, Subject::Mathematics);

        let mut out = ProfileRows::default();
        for (year, r) in &reading {
            let Some(m) = math.get(year) else { continue };
            let mut cells = vec![DisplayValue::Number(f64::from(*year))];
            cells.extend(self.map_row(r).0);
            cells.extend(self.map_row(m).0);
            out.rows.push(DisplayRow(cells));
            out.years.insert(*year);
        }
        out
    }

    /// One row per (year, consortium) the state tested with. A subject block
    /// is shown only when the state was in that consortium for that subject.
    fn consortium_rows(&self, state: &str, grade: char) -> ProfileRows {
        let records = self.state_grade_records(state, grade);
        let memberships: BTreeSet<(i32, &str)> = records
            .iter()
            .filter_map(|r| r.consortium.as_deref().map(|c| (r.year, c)))
            .collect();

        let mut out = ProfileRows::default();
        for &(year, consortium) in &memberships {
            let mut cells = vec![
                DisplayValue::Number(f64::from(year)),
                DisplayValue::Text(consortium.to_string()),
            ];
            for subject in Subject::ALL {
                let member = records.iter().any(|r| {
                    r.year == year
                        && r.subject() == Some(subject)
                        && r.consortium.as_deref() == Some(consortium)
                });
                if !member {
                    warn!(
                        state,
                        year,
                        consortium,
                        subject = subject.label(),
                        "consortium membership differs by subject, block left empty"
                    );
                }
                let entity = member
                    .then(|| {
                        let code = format!("{}{}", subject.code(), grade);
                        self.data
                            .records
                            .iter()
                            .find(|r| r.state == consortium && r.year == year && r.subjgrade == code)
                    })
                    .flatten();
                match entity {
                    Some(e) => cells.extend(self.map_row(e).0),
                    None => cells.extend(map_profile_cells(None, None, None)),
                }
            }
            out.rows.push(DisplayRow(cells));
            out.years.insert(year);
            out.consortia.insert(consortium.to_string());
        }
        out
    }

    fn sheet_rows(&self, state: &str, kind: ProfileSheet) -> ProfileRows {
        match kind {
            ProfileSheet::State { grade } => self.state_rows(state, grade),
            ProfileSheet::Consortium { grade } => self.consortium_rows(state, grade),
        }
    }

    fn capture_notes(&self, ws: &Worksheet) -> Vec<NoteRow> {
        self.layout
            .note_rows()
            .map(|r| NoteRow {
                text: ws.text(r, 1).unwrap_or_default().to_string(),
                style: ws.style(r, 1).unwrap_or(0),
                height: ws.row_height(r),
            })
            .collect()
    }

    /// Apply the note-text substitutions and return the notes to keep.
    fn prepare_notes(&self, mut notes: Vec<NoteRow>, abbr: &str, table: &ProfileRows) -> Vec<NoteRow> {
        let step = self.layout.note_line_height;
        let years: Vec<i32> = table.years.iter().copied().collect();

        if abbr == "PR" {
            if let Some(source) = notes.last_mut() {
                for (from, to) in PUERTO_RICO_NOTE_EDITS {
                    source.text = source.text.replace(from, to);
                }
                source.height = source.height.map(|h| h - step);
            }
        }

        if let Some(note) = notes.get_mut(3) {
            if note.text.contains(CONSORTIUM_NOTES_TOKEN) {
                // State sheets name no consortium; the token is dropped.
                let text = consortium_note_text(table.consortia.iter().map(String::as_str));
                note.text = note.text.replace(CONSORTIUM_NOTES_TOKEN, &text).trim_end().to_string();
                if !table.consortia.is_empty()
                    && (table.consortia.len() > 1 || note.text.contains("PARCC"))
                {
                    note.height = note.height.map(|h| h + step);
                }
            }
        }

        if let Some(note) = notes.get_mut(4) {
            if note.text.contains(YEARS_NAEP_TOKEN) {
                note.text = note
                    .text
                    .replace(YEARS_NAEP_TOKEN, &year_note_text(&years, false))
                    .replace(YEARS_EDFACTS_TOKEN, &year_note_text(&years, true));
            }
        }

        let keep = [
            table.rows.iter().any(DisplayRow::has_no_data),
            table.rows.iter().any(DisplayRow::has_not_applicable),
            table.rows.iter().any(DisplayRow::has_flag),
            true,
            true,
        ];
        notes
            .into_iter()
            .zip(keep)
            .filter_map(|(note, keep)| keep.then_some(note))
            .collect()
    }

    fn write_table(
        &self,
        ws: &mut Worksheet,
        styles: &mut Stylesheet,
        state: &str,
        abbr: &str,
        table: &ProfileRows,
    ) -> Result<()> {
        let layout = &self.layout;
        let years: Vec<i32> = table.years.iter().copied().collect();
        let years_text = year_title_text(&years);
        substitute_tokens(
            ws,
            layout.title.row,
            layout.title.col,
            &[(STATE_TOKEN, state), (YEARS_TOKEN, years_text.as_str())],
        );

        let notes = self.prepare_notes(self.capture_notes(ws), abbr, table);

        // The template note block may sit inside the rows about to be written.
        let note_band = layout.note_rows();
        let stale: Vec<CellRange> = ws
            .merged_ranges()
            .iter()
            .filter(|m| m.intersects_rows(note_band.start, note_band.end - 1))
            .copied()
            .collect();
        for range in &stale {
            ws.unmerge_cells(range);
        }

        let n = table.rows.len() as u32;
        for (i, row) in table.rows.iter().enumerate() {
            write_row(ws, layout.first_data_row + i as u32, 1, row);
        }

        let width = ws.max_column();
        let table_part = ws
            .tables_mut()
            .first_mut()
            .ok_or_else(|| ReportError::template("profile sheet has no table"))?;
        let old = table_part.range();
        let resized = CellRange::new(old.first_row, old.first_col, layout.header_row + n, old.last_col);
        let table_name = table_part.display_name();
        debug!(table = table_name.as_deref(), from = %old, to = %resized, "resizing table");
        table_part.set_range(resized);

        let end_col = layout.note_end_col(width);
        let notes_start = layout.first_data_row + n;
        for (i, note) in notes.iter().enumerate() {
            let r = notes_start + i as u32;
            ws.set_value(r, 1, note.text.as_str());
            ws.set_style(r, 1, styles.without_border(note.style)?);
            ws.set_row_height(r, note.height);
            ws.set_row_hidden(r, false);
            ws.merge_cells(CellRange::new(r, 1, r, end_col));
        }

        let first_unused = notes_start + notes.len() as u32;
        let last = ws.max_row();
        if last >= first_unused {
            ws.delete_rows(first_unused, last - first_unused + 1);
        }
        debug!(sheet = ws.name(), rows = n, notes = notes.len(), "profile table written");
        Ok(())
    }
}

impl TableGenerator for ProfileTableGenerator<'_> {
    type Key = String;

    /// Reading or mathematics block of a profile row.
    fn map_row(&self, record: &AssessmentRecord) -> DisplayRow {
        DisplayRow(map_profile_cells(record.nse, record.nse_se, record.nse_re).to_vec())
    }

    fn generate(&self, state: &String) -> Result<Workbook> {
        let mut wb = Workbook::open(&self.template)?;
        self.layout.validate(&wb)?;
        let abbr = self.data.abbreviation(state);
        let names = wb.sheet_names();

        let mut written = 0usize;
        for (name, kind) in names.iter().zip(self.layout.sheets) {
            let table = self.sheet_rows(state, kind);
            if table.rows.is_empty() {
                debug!(sheet = name.as_str(), "no rows, removing sheet");
                wb.remove_sheet(name);
                continue;
            }
            let (ws, styles) = wb.sheet_with_styles_mut(name)?;
            self.write_table(ws, styles, state, &abbr, &table)?;
            written += 1;
        }
        rename_sheets(&mut wb, STATE_ABBR_TOKEN, &abbr);

        info!(state = state.as_str(), sheets = written, "state profile generated");
        Ok(wb)
    }
}
