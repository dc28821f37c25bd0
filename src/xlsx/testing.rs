// In-memory xlsx fixtures for unit tests.
use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const MAIN_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const REL_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const PKG_REL_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
const REL_BASE: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

/// cellXfs: 0 plain, 1 left border, 2 number with left border, 3 wrapped note text.
pub const STYLES: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">"#,
    r#"<fonts count="1"><font><sz val="11"/><name val="Calibri"/></font></fonts>"#,
    r#"<fills count="1"><fill><patternFill patternType="none"/></fill></fills>"#,
    r#"<borders count="2"><border><left/><right/><top/><bottom/><diagonal/></border>"#,
    r#"<border><left style="thin"><color rgb="FF000000"/></left><right/><top/><bottom/><diagonal/></border></borders>"#,
    r#"<cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs>"#,
    r#"<cellXfs count="4"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/>"#,
    r#"<xf numFmtId="0" fontId="0" fillId="0" borderId="1" xfId="0" applyBorder="1"/>"#,
    r#"<xf numFmtId="2" fontId="0" fillId="0" borderId="1" xfId="0" applyNumberFormat="1" applyBorder="1"/>"#,
    r#"<xf numFmtId="0" fontId="0" fillId="0" borderId="1" xfId="0" applyBorder="1" applyAlignment="1"><alignment wrapText="1"/></xf>"#,
    r#"</cellXfs></styleSheet>"#
);

struct SheetSpec {
    name: String,
    body: String,
    table: Option<String>,
}

#[derive(Default)]
pub struct PackageBuilder {
    sheets: Vec<SheetSpec>,
    defined_names: Vec<(String, Option<u32>, String)>,
    shared: Vec<String>,
}

impl PackageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// `body` is everything inside `<worksheet>`, starting with `<sheetData>`.
    pub fn sheet(mut self, name: &str, body: &str) -> Self {
        self.sheets.push(SheetSpec {
            name: name.to_string(),
            body: body.to_string(),
            table: None,
        });
        self
    }

    pub fn sheet_with_table(mut self, name: &str, body: &str, table_ref: &str) -> Self {
        self.sheets.push(SheetSpec {
            name: name.to_string(),
            body: body.to_string(),
            table: Some(table_ref.to_string()),
        });
        self
    }

    pub fn defined_name(mut self, name: &str, local_sheet: Option<u32>, formula: &str) -> Self {
        self.defined_names
            .push((name.to_string(), local_sheet, formula.to_string()));
        self
    }

    pub fn shared_strings(mut self, strings: &[&str]) -> Self {
        self.shared = strings.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut parts: Vec<(String, String)> = Vec::new();

        let mut overrides = String::from(
            r#"<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/>"#,
        );
        let mut workbook_rels = String::new();
        let mut sheet_list = String::new();
        let mut table_no = 0;

        for (i, sheet) in self.sheets.iter().enumerate() {
            let n = i + 1;
            overrides.push_str(&format!(
                r#"<Override PartName="/xl/worksheets/sheet{n}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#
            ));
            workbook_rels.push_str(&format!(
                r#"<Relationship Id="rId{n}" Type="{REL_BASE}/worksheet" Target="worksheets/sheet{n}.xml"/>"#
            ));
            sheet_list.push_str(&format!(
                r#"<sheet name="{}" sheetId="{n}" r:id="rId{n}"/>"#,
                sheet.name
            ));

            let mut body = sheet.body.clone();
            if let Some(table_ref) = &sheet.table {
                table_no += 1;
                body.push_str(r#"<tableParts count="1"><tablePart r:id="rId1"/></tableParts>"#);
                overrides.push_str(&format!(
                    r#"<Override PartName="/xl/tables/table{table_no}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.table+xml"/>"#
                ));
                parts.push((
                    format!("xl/worksheets/_rels/sheet{n}.xml.rels"),
                    format!(
                        r#"<Relationships xmlns="{PKG_REL_NS}"><Relationship Id="rId1" Type="{REL_BASE}/table" Target="../tables/table{table_no}.xml"/></Relationships>"#
                    ),
                ));
                parts.push((
                    format!("xl/tables/table{table_no}.xml"),
                    format!(
                        r#"<table xmlns="{MAIN_NS}" id="{table_no}" name="Table{table_no}" displayName="Table{table_no}" ref="{table_ref}" totalsRowShown="0"><autoFilter ref="{table_ref}"/><tableColumns count="1"><tableColumn id="1" name="Year"/></tableColumns></table>"#
                    ),
                ));
            }
            parts.push((
                format!("xl/worksheets/sheet{n}.xml"),
                format!(r#"<worksheet xmlns="{MAIN_NS}" xmlns:r="{REL_NS}">{body}</worksheet>"#),
            ));
        }

        let next = self.sheets.len() + 1;
        workbook_rels.push_str(&format!(
            r#"<Relationship Id="rId{next}" Type="{REL_BASE}/styles" Target="styles.xml"/>"#
        ));
        parts.push(("xl/styles.xml".to_string(), STYLES.to_string()));

        if !self.shared.is_empty() {
            let shared_id = next + 1;
            workbook_rels.push_str(&format!(
                r#"<Relationship Id="rId{shared_id}" Type="{REL_BASE}/sharedStrings" Target="sharedStrings.xml"/>"#
            ));
            overrides.push_str(r#"<Override PartName="/xl/sharedStrings.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml"/>"#);
            let items: String = self
                .shared
                .iter()
                .map(|s| format!("<si><t>{}</t></si>", escape(s)))
                .collect();
            parts.push((
                "xl/sharedStrings.xml".to_string(),
                format!(
                    r#"<sst xmlns="{MAIN_NS}" count="{0}" uniqueCount="{0}">{items}</sst>"#,
                    self.shared.len()
                ),
            ));
        }

        let defined: String = self
            .defined_names
            .iter()
            .map(|(name, local, formula)| match local {
                Some(id) => format!(r#"<definedName name="{name}" localSheetId="{id}">{formula}</definedName>"#),
                None => format!(r#"<definedName name="{name}">{formula}</definedName>"#),
            })
            .collect();
        let defined = if defined.is_empty() {
            String::new()
        } else {
            format!("<definedNames>{defined}</definedNames>")
        };

        let mut files = vec![
            (
                "[Content_Types].xml".to_string(),
                format!(
                    r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/>{overrides}</Types>"#
                ),
            ),
            (
                "_rels/.rels".to_string(),
                format!(
                    r#"<Relationships xmlns="{PKG_REL_NS}"><Relationship Id="rId1" Type="{REL_BASE}/officeDocument" Target="xl/workbook.xml"/></Relationships>"#
                ),
            ),
            (
                "xl/workbook.xml".to_string(),
                format!(
                    r#"<workbook xmlns="{MAIN_NS}" xmlns:r="{REL_NS}"><bookViews><workbookView activeTab="1"/></bookViews><sheets>{sheet_list}</sheets>{defined}</workbook>"#
                ),
            ),
            (
                "xl/_rels/workbook.xml.rels".to_string(),
                format!(r#"<Relationships xmlns="{PKG_REL_NS}">{workbook_rels}</Relationships>"#),
            ),
        ];
        files.extend(parts);

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for (name, data) in files {
            writer.start_file(name, options).unwrap();
            writer.write_all(data.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn style_attr(style: Option<u32>) -> String {
    style.map(|s| format!(r#" s="{s}""#)).unwrap_or_default()
}

pub fn inline(cell: &str, text: &str, style: Option<u32>) -> String {
    format!(
        r#"<c r="{cell}"{} t="inlineStr"><is><t>{}</t></is></c>"#,
        style_attr(style),
        escape(text)
    )
}

pub fn number(cell: &str, value: f64, style: Option<u32>) -> String {
    format!(r#"<c r="{cell}"{}><v>{value}</v></c>"#, style_attr(style))
}

pub fn blank(cell: &str, style: u32) -> String {
    format!(r#"<c r="{cell}" s="{style}"/>"#)
}

pub fn row(r: u32, cells: &[String]) -> String {
    format!(r#"<row r="{r}">{}</row>"#, cells.concat())
}

pub fn tall_row(r: u32, height: f64, cells: &[String]) -> String {
    format!(
        r#"<row r="{r}" ht="{height}" customHeight="1">{}</row>"#,
        cells.concat()
    )
}

fn merges(ranges: &[String]) -> String {
    if ranges.is_empty() {
        return String::new();
    }
    let items: String = ranges
        .iter()
        .map(|r| format!(r#"<mergeCell ref="{r}"/>"#))
        .collect();
    format!(r#"<mergeCells count="{}">{items}</mergeCells>"#, ranges.len())
}

const PAGE_MARGINS: &str =
    r#"<pageMargins left="0.7" right="0.7" top="0.75" bottom="0.75" header="0.3" footer="0.3"/>"#;

fn grade_sheet(title: &str) -> String {
    let mut rows = vec![
        row(5, &[inline("B5", title, None)]),
        row(8, &[inline("B8", "Year", Some(1))]),
    ];
    for r in 9..=15 {
        rows.push(row(r, &[blank(&format!("B{r}"), 1)]));
    }
    rows.push(row(16, &[inline("B16", "\u{2013} Not available.", None)]));
    rows.push(row(17, &[inline("B17", "\u{2020} Not applicable.", None)]));
    rows.push(row(18, &[inline("B18", "! Interpret with caution.", None)]));
    format!("<sheetData>{}</sheetData>{PAGE_MARGINS}", rows.concat())
}

/// Per-state trend template: `G4` and `G8` grade sheets plus a `Notes_ST_` sheet.
pub fn state_template() -> Vec<u8> {
    PackageBuilder::new()
        .sheet("G4", &grade_sheet("Table A. NSE for [STATE_NAME], grade 4"))
        .sheet("G8", &grade_sheet("Table B. NSE for [STATE_NAME], grade 8"))
        .sheet(
            "Notes_ST_",
            &format!(
                "<sheetData>{}</sheetData>",
                row(1, &[inline("A1", "Notes", None)])
            ),
        )
        .build()
}

/// Snake chart template: `Sheet1` with a styled reference row 8.
pub fn snake_template() -> Vec<u8> {
    let styled: Vec<String> = ["B8", "C8", "D8"]
        .iter()
        .map(|c| blank(c, 1))
        .chain(["E8", "F8"].iter().map(|c| blank(c, 2)))
        .collect();
    let body = format!(
        "<sheetData>{}{}{}</sheetData>{PAGE_MARGINS}",
        row(
            5,
            &[inline(
                "B5",
                "Table 1[LETTER]. NSE in [SUBJECT], grade [GRADE]: [YEAR]",
                None
            )]
        ),
        row(7, &[inline("B7", "State", Some(1))]),
        row(8, &styled)
    );
    PackageBuilder::new().sheet("Sheet1", &body).build()
}

pub const PROFILE_NOTES: [&str; 5] = [
    "\u{2013} Not available.",
    "\u{2020} Not applicable.",
    "! Interpret with caution.",
    "NOTE: [CONSORTIUM_NOTES]",
    "SOURCE: NAEP [YEARS_NAEP] Reading and Mathematics Assessments; EDFacts [YEARS_EDFACTS].",
];

fn profile_sheet(columns: u32, title: &str) -> (String, String) {
    let last = crate::xlsx::col_to_letters(columns);
    let mut rows = vec![
        row(4, &[inline("A4", title, None)]),
        row(6, &[inline("A6", "Year", Some(1))]),
    ];
    for r in 7..=13 {
        let cells: Vec<String> = (1..=columns)
            .map(|c| blank(&format!("{}{r}", crate::xlsx::col_to_letters(c)), 1))
            .collect();
        rows.push(row(r, &cells));
    }
    let mut ranges = Vec::new();
    for (i, note) in PROFILE_NOTES.iter().enumerate() {
        let r = 14 + i as u32;
        rows.push(tall_row(r, 15.0 + i as f64, &[inline(&format!("A{r}"), note, Some(3))]));
        ranges.push(format!("A{r}:{last}{r}"));
    }
    rows.push(row(20, &[inline("A20", "leftover", None)]));
    ranges.push("A20:C20".to_string());
    let body = format!(
        "<sheetData>{}</sheetData>{}{PAGE_MARGINS}",
        rows.concat(),
        merges(&ranges)
    );
    (body, format!("A6:{last}13"))
}

/// State profile template: grade 4 and 8 state sheets (9 columns) followed by
/// grade 4 and 8 consortium sheets (10 columns).
pub fn profile_template() -> Vec<u8> {
    let (g4, g4_ref) = profile_sheet(9, "Table 1. [STATE], grade 4: [YEARS]");
    let (g8, g8_ref) = profile_sheet(9, "Table 2. [STATE], grade 8: [YEARS]");
    let (c4, c4_ref) = profile_sheet(10, "Table 3. [STATE] consortium, grade 4: [YEARS]");
    let (c8, c8_ref) = profile_sheet(10, "Table 4. [STATE] consortium, grade 8: [YEARS]");
    PackageBuilder::new()
        .sheet_with_table("_ST_ G4", &g4, &g4_ref)
        .sheet_with_table("_ST_ G8", &g8, &g8_ref)
        .sheet_with_table("_ST_ G4 cons", &c4, &c4_ref)
        .sheet_with_table("_ST_ G8 cons", &c8, &c8_ref)
        .defined_name("_xlnm.Print_Area", Some(2), "'_ST_ G4 cons'!$A$1:$J$20")
        .build()
}
