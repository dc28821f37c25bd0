use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tabled::Tabled;

use crate::error::ReportError;

/// One input row as it comes out of the CSV/XLSX reader. Every field is kept
/// as text so malformed numbers can be turned into `None` instead of failing
/// the whole row.
#[derive(Debug, Deserialize)]
pub struct RawRow {
    pub year: Option<String>,
    pub subjgrade: Option<String>,
    pub state: Option<String>,
    #[serde(alias = "Consortia")]
    pub consortium: Option<String>,
    pub nse: Option<String>,
    pub nse_se: Option<String>,
    pub nse_re: Option<String>,
    #[serde(default)]
    pub mark: Option<String>,
    #[serde(rename = "IN_SNAKECHART_FILE", alias = "inclusion_flag")]
    pub inclusion: Option<String>,
    #[serde(default)]
    pub state_abbr: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssessmentRecord {
    pub year: i32,
    pub subjgrade: String,
    pub state: String,
    pub state_abbr: Option<String>,
    pub consortium: Option<String>,
    pub nse: Option<f64>,
    pub nse_se: Option<f64>,
    pub nse_re: Option<f64>,
    pub mark: String,
    pub included: bool,
}

impl AssessmentRecord {
    pub fn subject(&self) -> Option<Subject> {
        self.subjgrade.chars().next().and_then(Subject::from_code)
    }

    pub fn grade(&self) -> Option<char> {
        self.subjgrade.chars().nth(1)
    }

    pub fn is_grade(&self, grade: char) -> bool {
        self.grade() == Some(grade)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Subject {
    Reading,
    Mathematics,
}

impl Subject {
    pub const ALL: [Subject; 2] = [Subject::Reading, Subject::Mathematics];

    pub fn from_code(c: char) -> Option<Self> {
        match c {
            'R' => Some(Subject::Reading),
            'M' => Some(Subject::Mathematics),
            _ => None,
        }
    }

    pub fn code(self) -> char {
        match self {
            Subject::Reading => 'R',
            Subject::Mathematics => 'M',
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Subject::Reading => "reading",
            Subject::Mathematics => "mathematics",
        }
    }
}

/// Subject-grade code such as `R4` or `M8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubjectGrade {
    pub subject: Subject,
    pub grade: char,
}

impl SubjectGrade {
    /// Snake-chart generation order.
    pub const ALL: [SubjectGrade; 4] = [
        SubjectGrade { subject: Subject::Reading, grade: '4' },
        SubjectGrade { subject: Subject::Mathematics, grade: '4' },
        SubjectGrade { subject: Subject::Reading, grade: '8' },
        SubjectGrade { subject: Subject::Mathematics, grade: '8' },
    ];

    pub fn code(&self) -> String {
        format!("{}{}", self.subject.code(), self.grade)
    }

    /// Table letter used in snake-chart titles and file names.
    pub fn letter(&self) -> char {
        match (self.subject, self.grade) {
            (Subject::Reading, '4') => 'a',
            (Subject::Mathematics, '4') => 'b',
            (Subject::Reading, _) => 'c',
            (Subject::Mathematics, _) => 'd',
        }
    }
}

impl FromStr for SubjectGrade {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim();
        let mut chars = code.chars();
        match (chars.next().and_then(Subject::from_code), chars.next(), chars.next()) {
            (Some(subject), Some(grade @ ('4' | '8')), None) => Ok(SubjectGrade { subject, grade }),
            _ => Err(ReportError::UnknownSubjectGrade(code.to_string())),
        }
    }
}

impl fmt::Display for SubjectGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.subject.code(), self.grade)
    }
}

/// Console preview of a per-state trend row.
#[derive(Debug, Serialize, Tabled, Clone)]
pub struct StatePreviewRow {
    #[tabled(rename = "Year")]
    pub year: i32,
    #[tabled(rename = "SubjGrade")]
    pub subjgrade: String,
    #[tabled(rename = "NSE")]
    pub nse: String,
    #[tabled(rename = "SE")]
    pub nse_se: String,
    #[tabled(rename = "RE")]
    pub nse_re: String,
    #[tabled(rename = "Mark")]
    pub mark: String,
}

/// Console preview of a snake-chart row.
#[derive(Debug, Serialize, Tabled, Clone)]
pub struct SnakePreviewRow {
    #[tabled(rename = "State")]
    pub state: String,
    #[tabled(rename = "Consortium")]
    pub consortium: String,
    #[tabled(rename = "NSE")]
    pub nse: String,
    #[tabled(rename = "SE")]
    pub nse_se: String,
    #[tabled(rename = "RE")]
    pub nse_re: String,
}

/// Written next to the generated workbooks as `summary.json`.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub mode: String,
    pub input: String,
    pub total_rows: usize,
    pub included_rows: usize,
    pub skipped_rows: usize,
    pub states: usize,
    pub consortia: usize,
    pub years: Vec<i32>,
    pub files: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subject_grade_codes() {
        let sg: SubjectGrade = "M8".parse().unwrap();
        assert_eq!(sg.subject, Subject::Mathematics);
        assert_eq!(sg.grade, '8');
        assert_eq!(sg.letter(), 'd');
        assert_eq!(sg.to_string(), "M8");
        assert_eq!(" R4 ".parse::<SubjectGrade>().unwrap().letter(), 'a');

        for bad in ["S4", "R5", "R48", ""] {
            assert!(matches!(
                bad.parse::<SubjectGrade>(),
                Err(ReportError::UnknownSubjectGrade(_))
            ));
        }
    }

    #[test]
    fn generation_order_matches_letters() {
        let letters: String = SubjectGrade::ALL.iter().map(|sg| sg.letter()).collect();
        assert_eq!(letters, "abcd");
    }
}
