// Data loading: read the long file, apply an optional correction step,
// filter by the inclusion flag and split states from consortium entities.
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use csv::{ReaderBuilder, StringRecord};
use tracing::{debug, info, warn};

use crate::error::{ReportError, Result};
use crate::types::{AssessmentRecord, RawRow};
use crate::util::{format_int, lookup_abbreviation, non_empty, parse_f64_safe, parse_i32_safe};
use crate::xlsx::Workbook;

/// Canonical column name followed by the header spellings accepted for it.
const REQUIRED_COLUMNS: &[(&str, &[&str])] = &[
    ("year", &["year"]),
    ("subjgrade", &["subjgrade"]),
    ("state", &["state"]),
    ("consortium", &["consortium", "Consortia"]),
    ("nse", &["nse"]),
    ("nse_se", &["nse_se"]),
    ("nse_re", &["nse_re"]),
    ("IN_SNAKECHART_FILE", &["IN_SNAKECHART_FILE", "inclusion_flag"]),
];

/// Literal inclusion-flag value; anything else excludes the row.
pub const INCLUDED: &str = "YES";

/// Correction step run on the full record set before the inclusion filter.
pub type PostProcess = fn(Vec<AssessmentRecord>) -> Vec<AssessmentRecord>;

#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub total_rows: usize,
    pub loaded_rows: usize,
    pub included_rows: usize,
    pub parse_errors: usize,
}

/// The loaded long file plus the derived partitions and axes. Read-only once
/// built; every generator borrows the same instance.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub records: Vec<AssessmentRecord>,
    pub state_records: Vec<AssessmentRecord>,
    pub consortium_records: Vec<AssessmentRecord>,
    pub states: Vec<String>,
    pub consortia: Vec<String>,
    pub years: Vec<i32>,
    consortium_set: BTreeSet<String>,
    abbreviations: HashMap<String, String>,
}

/// Corrections applied to the long file before building snake charts.
///
/// 2015 and 2019 rows are forced in so every state gets a row (blank when
/// there is no estimate). Puerto Rico is forced in, then dropped again for
/// years before 2017.
pub fn snake_chart_inclusion_fixups(mut records: Vec<AssessmentRecord>) -> Vec<AssessmentRecord> {
    for r in &mut records {
        if r.year == 2015 || r.year == 2019 {
            r.included = true;
        }
        if r.state == "Puerto Rico" {
            r.included = r.year >= 2017;
        }
    }
    records
}

pub fn load_dataset(path: &Path, post: Option<PostProcess>) -> Result<(Dataset, LoadReport)> {
    let is_xlsx = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("xlsx"));
    let (headers, rows) = if is_xlsx {
        read_xlsx_rows(path)?
    } else {
        read_csv_rows(path)?
    };
    check_schema(&headers)?;

    let (records, mut report) = parse_records(&headers, &rows);
    let dataset = Dataset::from_records(records, post);
    report.included_rows = dataset.state_records.len() + dataset.consortium_records.len();

    info!(
        path = %path.display(),
        rows = %format_int(report.total_rows),
        included = %format_int(report.included_rows),
        "loaded dataset"
    );
    if report.parse_errors > 0 {
        warn!(skipped = report.parse_errors, "rows without a usable year, subject-grade or state were skipped");
    }
    info!(
        states = dataset.states.len(),
        consortia = dataset.consortia.len(),
        years = dataset.years.len(),
        "axis sets built"
    );
    Ok((dataset, report))
}

fn read_csv_rows(path: &Path) -> Result<(StringRecord, Vec<StringRecord>)> {
    let mut rdr = ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers = rdr.headers()?.clone();
    let rows = rdr.records().collect::<std::result::Result<Vec<_>, _>>()?;
    Ok((headers, rows))
}

/// First worksheet; the first populated row is the header.
fn read_xlsx_rows(path: &Path) -> Result<(StringRecord, Vec<StringRecord>)> {
    let workbook = Workbook::open(path)?;
    let sheet = workbook
        .sheet_at(0)
        .ok_or_else(|| ReportError::Xlsx(format!("{} has no worksheets", path.display())))?;
    let width = sheet.max_column();
    let mut populated = sheet.populated_rows();
    let Some(header_row) = populated.next() else {
        return Ok((StringRecord::new(), Vec::new()));
    };
    let to_record = |r: u32| -> StringRecord {
        (1..=width)
            .map(|c| sheet.value(r, c).map(|v| v.to_plain_string()).unwrap_or_default())
            .collect()
    };
    let headers = to_record(header_row);
    let rows = populated.map(to_record).collect();
    Ok((headers, rows))
}

fn check_schema(headers: &StringRecord) -> Result<()> {
    for (column, spellings) in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| spellings.contains(&h.trim())) {
            return Err(ReportError::Schema {
                column: (*column).to_string(),
            });
        }
    }
    Ok(())
}

fn parse_records(headers: &StringRecord, rows: &[StringRecord]) -> (Vec<AssessmentRecord>, LoadReport) {
    let headers: StringRecord = headers.iter().map(str::trim).collect();
    let mut report = LoadReport {
        total_rows: rows.len(),
        ..LoadReport::default()
    };
    let mut records = Vec::with_capacity(rows.len());

    for row in rows {
        let raw: RawRow = match row.deserialize(Some(&headers)) {
            Ok(r) => r,
            Err(err) => {
                debug!(%err, "row could not be read");
                report.parse_errors += 1;
                continue;
            }
        };

        // Rows must be keyed by (year, subjgrade, state); anything else is
        // data noise and only counted.
        let (Some(year), Some(subjgrade), Some(state)) = (
            parse_i32_safe(raw.year.as_deref()),
            non_empty(raw.subjgrade.as_deref()),
            non_empty(raw.state.as_deref()),
        ) else {
            report.parse_errors += 1;
            continue;
        };

        records.push(AssessmentRecord {
            year,
            subjgrade,
            state,
            state_abbr: non_empty(raw.state_abbr.as_deref()),
            consortium: non_empty(raw.consortium.as_deref()),
            nse: parse_f64_safe(raw.nse.as_deref()),
            nse_se: parse_f64_safe(raw.nse_se.as_deref()),
            nse_re: parse_f64_safe(raw.nse_re.as_deref()),
            // Kept verbatim; only an exact `!` flags a row.
            mark: raw.mark.unwrap_or_default(),
            included: raw.inclusion.as_deref().map(str::trim) == Some(INCLUDED),
        });
    }

    report.loaded_rows = records.len();
    (records, report)
}

impl Dataset {
    pub fn from_records(records: Vec<AssessmentRecord>, post: Option<PostProcess>) -> Self {
        let records = match post {
            Some(f) => f(records),
            None => records,
        };

        let consortium_set: BTreeSet<String> =
            records.iter().filter_map(|r| r.consortium.clone()).collect();
        debug!(count = consortium_set.len(), "consortium entities detected");

        let (consortium_records, state_records): (Vec<_>, Vec<_>) = records
            .iter()
            .filter(|r| r.included)
            .cloned()
            .partition(|r| consortium_set.contains(&r.state));

        let states: BTreeSet<String> = state_records.iter().map(|r| r.state.clone()).collect();
        let consortia: BTreeSet<String> =
            consortium_records.iter().map(|r| r.state.clone()).collect();
        let years: BTreeSet<i32> = state_records
            .iter()
            .chain(&consortium_records)
            .map(|r| r.year)
            .collect();

        let mut abbreviations = HashMap::new();
        for r in &records {
            if let Some(abbr) = &r.state_abbr {
                abbreviations
                    .entry(r.state.clone())
                    .or_insert_with(|| abbr.clone());
            }
        }

        Self {
            records,
            state_records,
            consortium_records,
            states: states.into_iter().collect(),
            consortia: consortia.into_iter().collect(),
            years: years.into_iter().collect(),
            consortium_set,
            abbreviations,
        }
    }

    /// True for aggregate entities (values of the consortium column) that
    /// appear in the state column.
    pub fn is_consortium(&self, name: &str) -> bool {
        self.consortium_set.contains(name)
    }

    /// Years that have at least one included state row.
    pub fn state_years(&self) -> Vec<i32> {
        let years: BTreeSet<i32> = self.state_records.iter().map(|r| r.year).collect();
        years.into_iter().collect()
    }

    /// Abbreviation from the `state_abbr` column, then the built-in table,
    /// then the name itself.
    pub fn abbreviation(&self, state: &str) -> String {
        if let Some(abbr) = self.abbreviations.get(state) {
            return abbr.clone();
        }
        match lookup_abbreviation(state) {
            Some(abbr) => abbr.to_string(),
            None => {
                warn!(state, "no abbreviation known, using the state name");
                state.to_string()
            }
        }
    }

    /// All states with at least one row in the full record set, excluding
    /// consortium entities.
    pub fn all_states(&self) -> Vec<String> {
        let states: BTreeSet<&str> = self
            .records
            .iter()
            .filter(|r| !self.is_consortium(&r.state))
            .map(|r| r.state.as_str())
            .collect();
        states.into_iter().map(str::to_string).collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    pub(crate) fn record(
        year: i32,
        subjgrade: &str,
        state: &str,
        consortium: Option<&str>,
        nse: Option<f64>,
        included: bool,
    ) -> AssessmentRecord {
        AssessmentRecord {
            year,
            subjgrade: subjgrade.to_string(),
            state: state.to_string(),
            state_abbr: None,
            consortium: consortium.map(str::to_string),
            nse,
            nse_se: nse.map(|_| 0.5),
            nse_re: nse.map(|_| 0.2),
            mark: String::new(),
            included,
        }
    }

    const CSV: &str = "\
year,subjgrade,state,Consortia,nse,nse_se,nse_re,mark,IN_SNAKECHART_FILE
2009,R4,Vermont,,253.5,0.64,0.27,,YES
2013,R4,Vermont,NECAP,263,,0.1,!,YES
2013,R4,NECAP,,250,1.1,0.3,,YES
2011,M4,Vermont,NECAP,NaN,NaN,NaN,,NO
2005,R4,Alabama,,,,,,YES
abc,R4,Alabama,,1,1,1,,YES
";

    #[test]
    fn loads_csv_and_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long.csv");
        fs::write(&path, CSV).unwrap();

        let (data, report) = load_dataset(&path, None).unwrap();
        assert_eq!(report.total_rows, 6);
        assert_eq!(report.parse_errors, 1);
        assert_eq!(report.loaded_rows, 5);
        assert_eq!(report.included_rows, 4);

        assert_eq!(data.states, vec!["Alabama".to_string(), "Vermont".to_string()]);
        assert_eq!(data.consortia, vec!["NECAP".to_string()]);
        assert_eq!(data.years, vec![2005, 2009, 2013]);
        assert!(data.is_consortium("NECAP"));
        assert_eq!(data.consortium_records.len(), 1);

        let flagged = &data.state_records[1];
        assert_eq!(flagged.nse, Some(263.0));
        assert_eq!(flagged.nse_se, None);
        assert_eq!(flagged.mark, "!");
        assert_eq!(flagged.consortium.as_deref(), Some("NECAP"));
        assert_eq!(data.abbreviation("Vermont"), "VT");
    }

    #[test]
    fn keeps_scientific_notation_and_raw_marks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long.csv");
        fs::write(
            &path,
            "year,subjgrade,state,consortium,nse,nse_se,nse_re,mark,IN_SNAKECHART_FILE\n\
             2009,R4,Vermont,,253.5,6.4E-01,2.7e-1, !,YES\n",
        )
        .unwrap();

        let (data, _) = load_dataset(&path, None).unwrap();
        let r = &data.state_records[0];
        assert_eq!((r.nse, r.nse_se, r.nse_re), (Some(253.5), Some(0.64), Some(0.27)));
        assert_eq!(r.mark, " !");

        let row = crate::mapper::map_state_row(r.nse, r.nse_se, r.nse_re, &r.mark);
        assert!(!row.has_no_data());
        assert!(!row.has_flag());
    }

    #[test]
    fn missing_column_is_a_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long.csv");
        fs::write(&path, "year,subjgrade,state,consortium,nse,nse_se,IN_SNAKECHART_FILE\n").unwrap();
        match load_dataset(&path, None) {
            Err(ReportError::Schema { column }) => assert_eq!(column, "nse_re"),
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn fixups_run_before_inclusion_filter() {
        let records = vec![
            record(2015, "R4", "Vermont", None, None, false),
            record(2019, "M8", "Vermont", None, Some(280.0), false),
            record(2013, "R4", "Vermont", None, Some(250.0), false),
            record(2015, "R4", "Puerto Rico", None, None, true),
            record(2017, "M4", "Puerto Rico", None, None, false),
        ];
        let data = Dataset::from_records(records, Some(snake_chart_inclusion_fixups));
        let kept: Vec<(i32, &str)> = data
            .state_records
            .iter()
            .map(|r| (r.year, r.state.as_str()))
            .collect();
        assert_eq!(
            kept,
            vec![(2015, "Vermont"), (2019, "Vermont"), (2017, "Puerto Rico")]
        );
        assert_eq!(data.years, vec![2015, 2017, 2019]);
    }

    #[test]
    fn loads_first_sheet_of_a_workbook() {
        use crate::xlsx::testing::{inline, number, row, PackageBuilder};

        let header: Vec<String> = [
            "year", "subjgrade", "state", "consortium", "nse", "nse_se", "nse_re", "mark",
            "inclusion_flag", "state_abbr",
        ]
        .iter()
        .enumerate()
        .map(|(i, h)| inline(&format!("{}1", crate::xlsx::col_to_letters(i as u32 + 1)), h, None))
        .collect();
        let data_row = vec![
            number("A2", 2019.0, None),
            inline("B2", "M8", None),
            inline("C2", "Guam", None),
            number("E2", 281.25, None),
            number("F2", 0.8, None),
            number("G2", 0.3, None),
            inline("I2", "YES", None),
            inline("J2", "GU", None),
        ];
        let bytes = PackageBuilder::new()
            .sheet(
                "long",
                &format!("<sheetData>{}{}</sheetData>", row(1, &header), row(2, &data_row)),
            )
            .build();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long file.xlsx");
        fs::write(&path, bytes).unwrap();

        let (data, report) = load_dataset(&path, None).unwrap();
        assert_eq!(report.loaded_rows, 1);
        let r = &data.state_records[0];
        assert_eq!((r.year, r.subjgrade.as_str(), r.nse), (2019, "M8", Some(281.25)));
        assert_eq!(r.consortium, None);
        assert_eq!(data.abbreviation("Guam"), "GU");
    }
}
