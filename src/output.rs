// Persistence of generated workbooks plus the JSON summary and console
// previews.
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};
use tracing::debug;

use crate::error::Result;
use crate::generators::SnakeKey;
use crate::xlsx::Workbook;

/// Save `wb` to `path`, creating the directory and replacing any existing file.
pub fn write_workbook(path: &Path, wb: &Workbook) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    wb.save(path)?;
    debug!(path = %path.display(), "workbook written");
    Ok(())
}

pub fn state_report_path(out_dir: &Path, state: &str) -> PathBuf {
    out_dir.join(format!("{state}.xlsx"))
}

pub fn snake_chart_path(out_dir: &Path, key: &SnakeKey) -> PathBuf {
    out_dir.join(format!(
        "snake_chart_table_{}{}.xlsx",
        key.year,
        key.subjgrade.letter()
    ))
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let s = serde_json::to_string_pretty(value)?;
    fs::write(path, s)?;
    Ok(())
}

pub fn preview_table_rows<T>(title: &str, rows: &[T], max_rows: usize)
where
    T: Tabled + Clone,
{
    println!("\n{}\n", title);
    let slice: Vec<T> = rows.iter().cloned().take(max_rows).collect();
    if slice.is_empty() {
        println!("(no rows)\n");
        return;
    }
    let table_str = Table::new(slice).with(Style::markdown()).to_string();
    println!("{}\n", table_str);
}
