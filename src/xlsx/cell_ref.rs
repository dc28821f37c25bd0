// A1-style cell references and ranges. Rows and columns are 1-based.
use std::fmt;

/// Parse a reference like "B9" (or "$B$9") into `(row, col)`.
pub fn parse_cell_ref(cell_ref: &str) -> Option<(u32, u32)> {
    let mut col: u32 = 0;
    let mut row: u32 = 0;
    let mut saw_col = false;
    let mut saw_row = false;

    for ch in cell_ref.trim().chars() {
        if ch == '$' {
            continue;
        }
        if ch.is_ascii_alphabetic() {
            if saw_row {
                return None;
            }
            let upper = ch.to_ascii_uppercase();
            col = col.checked_mul(26)?.checked_add(upper as u32 - 'A' as u32 + 1)?;
            saw_col = true;
        } else if ch.is_ascii_digit() {
            row = row.checked_mul(10)?.checked_add(ch as u32 - '0' as u32)?;
            saw_row = true;
        } else {
            return None;
        }
    }

    if !saw_col || !saw_row || row == 0 {
        return None;
    }
    Some((row, col))
}

/// Column number to letters: 1 -> "A", 27 -> "AA".
pub fn col_to_letters(mut col: u32) -> String {
    let mut out = Vec::new();
    while col > 0 {
        let rem = (col - 1) % 26;
        out.push(b'A' + rem as u8);
        col = (col - 1) / 26;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

pub fn cell_ref(row: u32, col: u32) -> String {
    format!("{}{}", col_to_letters(col), row)
}

/// Inclusive rectangular range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRange {
    pub first_row: u32,
    pub first_col: u32,
    pub last_row: u32,
    pub last_col: u32,
}

impl CellRange {
    pub fn new(first_row: u32, first_col: u32, last_row: u32, last_col: u32) -> Self {
        Self {
            first_row: first_row.min(last_row),
            first_col: first_col.min(last_col),
            last_row: first_row.max(last_row),
            last_col: first_col.max(last_col),
        }
    }

    /// Parse "A1:I13" or a single-cell "A1".
    pub fn parse(range: &str) -> Option<Self> {
        match range.split_once(':') {
            Some((start, end)) => {
                let (r1, c1) = parse_cell_ref(start)?;
                let (r2, c2) = parse_cell_ref(end)?;
                Some(Self::new(r1, c1, r2, c2))
            }
            None => {
                let (r, c) = parse_cell_ref(range)?;
                Some(Self::new(r, c, r, c))
            }
        }
    }

    pub fn intersects_rows(&self, first: u32, last: u32) -> bool {
        self.first_row <= last && first <= self.last_row
    }

    pub fn intersects(&self, other: &CellRange) -> bool {
        self.intersects_rows(other.first_row, other.last_row)
            && self.first_col <= other.last_col
            && other.first_col <= self.last_col
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            cell_ref(self.first_row, self.first_col),
            cell_ref(self.last_row, self.last_col)
        )
    }
}
