// Error types shared by the loader, the xlsx engine and the generators.
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReportError>;

#[derive(Debug, Error)]
pub enum ReportError {
    /// A required input column is absent.
    #[error("missing required column `{column}`")]
    Schema { column: String },

    /// The template lacks a sheet or cell the layout writes into.
    #[error("template error: {0}")]
    Template(String),

    #[error("unknown subject-grade code `{0}`")]
    UnknownSubjectGrade(String),

    /// Malformed package content that is not an XML syntax error.
    #[error("invalid xlsx: {0}")]
    Xlsx(String),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReportError {
    pub fn template(msg: impl Into<String>) -> Self {
        Self::Template(msg.into())
    }
}
