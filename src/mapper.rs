// Record to display-row mapping.
//
// The sentinel characters are part of the published table format and must
// stay exactly as defined here.
use std::fmt;

use crate::xlsx::CellValue;

/// Estimate not available.
pub const NO_DATA: &str = "\u{2013}";
/// Statistic not applicable because the estimate itself is missing.
pub const NOT_APPLICABLE: &str = "\u{2020}";
/// Interpret with caution.
pub const FLAG: &str = "!";

/// Relative error at or above which a state-profile estimate is flagged.
pub const FLAG_RELATIVE_ERROR: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub enum DisplayValue {
    Number(f64),
    Text(String),
    Empty,
}

impl DisplayValue {
    fn text(s: &str) -> Self {
        DisplayValue::Text(s.to_string())
    }

    pub fn is_text(&self, s: &str) -> bool {
        matches!(self, DisplayValue::Text(t) if t == s)
    }
}

impl fmt::Display for DisplayValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayValue::Number(n) => write!(f, "{n}"),
            DisplayValue::Text(s) => f.write_str(s),
            DisplayValue::Empty => Ok(()),
        }
    }
}

impl From<&DisplayValue> for CellValue {
    fn from(v: &DisplayValue) -> Self {
        match v {
            DisplayValue::Number(n) => CellValue::Number(*n),
            DisplayValue::Text(s) => CellValue::Text(s.clone()),
            DisplayValue::Empty => CellValue::Empty,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DisplayRow(pub Vec<DisplayValue>);

impl DisplayRow {
    pub fn cells(&self) -> &[DisplayValue] {
        &self.0
    }

    pub fn has_no_data(&self) -> bool {
        self.0.iter().any(|v| v.is_text(NO_DATA))
    }

    pub fn has_not_applicable(&self) -> bool {
        self.0.iter().any(|v| v.is_text(NOT_APPLICABLE))
    }

    pub fn has_flag(&self) -> bool {
        self.0.iter().any(|v| v.is_text(FLAG))
    }
}

// NaN arriving from upstream is treated the same as a missing value.
fn present(v: Option<f64>) -> Option<f64> {
    v.filter(|x| !x.is_nan())
}

/// Point estimate plus its two dependent statistics.
fn estimate_cells(nse: Option<f64>, nse_se: Option<f64>, nse_re: Option<f64>) -> [DisplayValue; 3] {
    match present(nse) {
        None => [
            DisplayValue::text(NO_DATA),
            DisplayValue::text(NOT_APPLICABLE),
            DisplayValue::text(NOT_APPLICABLE),
        ],
        Some(n) => {
            let secondary = |v: Option<f64>| match present(v) {
                Some(x) => DisplayValue::Number(x),
                None => DisplayValue::text(NO_DATA),
            };
            [DisplayValue::Number(n), secondary(nse_se), secondary(nse_re)]
        }
    }
}

/// `(nse, se, re, mark)` for the per-state trend table.
pub fn map_state_row(nse: Option<f64>, nse_se: Option<f64>, nse_re: Option<f64>, mark: &str) -> DisplayRow {
    let mut cells = estimate_cells(nse, nse_se, nse_re).to_vec();
    cells.push(if mark == FLAG {
        DisplayValue::text(FLAG)
    } else {
        DisplayValue::Empty
    });
    DisplayRow(cells)
}

/// `(state, consortium, nse, se, re)` for cross-state tables. A state outside
/// any consortium shows the not-applicable mark.
pub fn map_cross_state_row(
    state: &str,
    consortium: Option<&str>,
    nse: Option<f64>,
    nse_se: Option<f64>,
    nse_re: Option<f64>,
) -> DisplayRow {
    let mut cells = vec![
        DisplayValue::text(state),
        DisplayValue::text(consortium.unwrap_or(NOT_APPLICABLE)),
    ];
    cells.extend(estimate_cells(nse, nse_se, nse_re));
    DisplayRow(cells)
}

/// `(nse, se, re, mark)` block of a state-profile row.
///
/// Here a missing secondary statistic is always shown as not applicable and
/// the flag is derived from the relative error instead of the mark column.
pub fn map_profile_cells(nse: Option<f64>, nse_se: Option<f64>, nse_re: Option<f64>) -> [DisplayValue; 4] {
    let nse = present(nse);
    let secondary = |v: Option<f64>| match (nse, present(v)) {
        (Some(_), Some(x)) => DisplayValue::Number(x),
        _ => DisplayValue::text(NOT_APPLICABLE),
    };
    let flag = match present(nse_re) {
        Some(re) if re >= FLAG_RELATIVE_ERROR => DisplayValue::text(FLAG),
        _ => DisplayValue::Empty,
    };
    [
        nse.map(DisplayValue::Number)
            .unwrap_or_else(|| DisplayValue::text(NO_DATA)),
        secondary(nse_se),
        secondary(nse_re),
        flag,
    ]
}
