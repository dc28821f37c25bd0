// Worksheet model.
//
// Only `<sheetData>` and `<mergeCells>` are modelled; every other element of
// the part is kept as raw events and written back where it was found.
use std::collections::BTreeMap;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use super::cell_ref::{cell_ref, parse_cell_ref, CellRange};
use super::table::Table;
use super::xml::{attr_bool, attr_string, attr_u32, other_attrs};
use crate::error::{ReportError, Result};

#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Number(f64),
    Text(String),
    /// Untouched shared-string cell; keeps its index so rich text survives.
    SharedString { index: usize, text: String },
    Bool(bool),
    Error(String),
}

impl CellValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) | CellValue::SharedString { text: s, .. } => Some(s),
            _ => None,
        }
    }

    /// Plain rendering used when the sheet is read as tabular input.
    pub fn to_plain_string(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Number(n) => format_number(*n),
            CellValue::Text(s) | CellValue::SharedString { text: s, .. } => s.clone(),
            CellValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            CellValue::Error(e) => e.clone(),
        }
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl From<i32> for CellValue {
    fn from(n: i32) -> Self {
        CellValue::Number(f64::from(n))
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}

#[derive(Debug, Clone, Default)]
struct Formula {
    attrs: Vec<(String, String)>,
    text: String,
}

#[derive(Debug, Clone, Default)]
pub struct Cell {
    pub value: CellValue,
    pub style: Option<u32>,
    formula: Option<Formula>,
    extra: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default)]
struct Row {
    height: Option<f64>,
    custom_height: bool,
    hidden: bool,
    extra: Vec<(String, String)>,
    cells: BTreeMap<u32, Cell>,
}

#[derive(Debug, Clone)]
enum Segment {
    Raw(Vec<Event<'static>>),
    SheetData,
    MergeCells,
}

#[derive(Debug, Clone)]
pub struct Worksheet {
    name: String,
    segments: Vec<Segment>,
    rows: BTreeMap<u32, Row>,
    merges: Vec<CellRange>,
    tables: Vec<Table>,
}

enum Marker {
    SheetData { empty: bool },
    MergeCells { empty: bool },
    Eof,
    Other,
}

/// Worksheet children that must come after `<mergeCells>`.
const AFTER_MERGE_CELLS: &[&[u8]] = &[
    b"phoneticPr",
    b"conditionalFormatting",
    b"dataValidations",
    b"hyperlinks",
    b"printOptions",
    b"pageMargins",
    b"pageSetup",
    b"headerFooter",
    b"rowBreaks",
    b"colBreaks",
    b"customProperties",
    b"cellWatches",
    b"ignoredErrors",
    b"smartTags",
    b"drawing",
    b"legacyDrawing",
    b"legacyDrawingHF",
    b"drawingHF",
    b"picture",
    b"oleObjects",
    b"controls",
    b"webPublishItems",
    b"tableParts",
    b"extLst",
];

impl Worksheet {
    pub(crate) fn parse(name: String, xml: &[u8], shared: &[String]) -> Result<Self> {
        let mut reader = Reader::from_reader(xml);
        let mut buf = Vec::new();
        let mut segments = Vec::new();
        let mut raw: Vec<Event<'static>> = Vec::new();
        let mut rows = BTreeMap::new();
        let mut merges = Vec::new();
        // A sheet without merges gets an empty slot at the schema position,
        // filled on save if merges were added.
        let mut seen_sheet_data = false;
        let mut merge_slot = false;
        let mut depth = 0usize;

        loop {
            let ev = reader.read_event_into(&mut buf)?;
            if seen_sheet_data && !merge_slot && depth == 1 {
                let follows = match &ev {
                    Event::Start(e) | Event::Empty(e) => {
                        let name = e.local_name();
                        AFTER_MERGE_CELLS.iter().any(|n| *n == name.as_ref())
                    }
                    Event::End(_) => true,
                    _ => false,
                };
                if follows {
                    segments.push(Segment::Raw(std::mem::take(&mut raw)));
                    segments.push(Segment::MergeCells);
                    merge_slot = true;
                }
            }
            let marker = match &ev {
                Event::Start(e) | Event::Empty(e) => {
                    let empty = matches!(ev, Event::Empty(_));
                    match e.local_name().as_ref() {
                        b"sheetData" => Marker::SheetData { empty },
                        b"mergeCells" => Marker::MergeCells { empty },
                        _ => Marker::Other,
                    }
                }
                Event::Eof => Marker::Eof,
                _ => Marker::Other,
            };
            match marker {
                Marker::SheetData { empty } => {
                    seen_sheet_data = true;
                    segments.push(Segment::Raw(std::mem::take(&mut raw)));
                    segments.push(Segment::SheetData);
                    if !empty {
                        parse_sheet_data(&mut reader, shared, &mut rows)?;
                    }
                }
                Marker::MergeCells { empty } => {
                    merge_slot = true;
                    segments.push(Segment::Raw(std::mem::take(&mut raw)));
                    segments.push(Segment::MergeCells);
                    if !empty {
                        parse_merges(&mut reader, &mut merges)?;
                    }
                }
                Marker::Eof => break,
                Marker::Other => {
                    match &ev {
                        Event::Start(_) => depth += 1,
                        Event::End(_) => depth = depth.saturating_sub(1),
                        _ => {}
                    }
                    raw.push(ev.into_owned());
                }
            }
            buf.clear();
        }
        segments.push(Segment::Raw(raw));

        if !segments.iter().any(|s| matches!(s, Segment::SheetData)) {
            return Err(ReportError::Xlsx(format!("worksheet `{name}` has no sheetData")));
        }

        Ok(Self {
            name,
            segments,
            rows,
            merges,
            tables: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn cell(&self, row: u32, col: u32) -> Option<&Cell> {
        self.rows.get(&row).and_then(|r| r.cells.get(&col))
    }

    fn cell_mut(&mut self, row: u32, col: u32) -> &mut Cell {
        self.rows
            .entry(row)
            .or_default()
            .cells
            .entry(col)
            .or_default()
    }

    pub fn value(&self, row: u32, col: u32) -> Option<&CellValue> {
        self.cell(row, col).map(|c| &c.value)
    }

    pub fn text(&self, row: u32, col: u32) -> Option<&str> {
        self.value(row, col).and_then(CellValue::as_text)
    }

    /// Set a cell value. Any formula on the cell is dropped.
    pub fn set_value(&mut self, row: u32, col: u32, value: impl Into<CellValue>) {
        let cell = self.cell_mut(row, col);
        cell.value = value.into();
        cell.formula = None;
    }

    pub fn style(&self, row: u32, col: u32) -> Option<u32> {
        self.cell(row, col).and_then(|c| c.style)
    }

    pub fn set_style(&mut self, row: u32, col: u32, style: u32) {
        self.cell_mut(row, col).style = Some(style);
    }

    pub fn row_height(&self, row: u32) -> Option<f64> {
        self.rows.get(&row).and_then(|r| r.height)
    }

    pub fn set_row_height(&mut self, row: u32, height: Option<f64>) {
        let r = self.rows.entry(row).or_default();
        r.height = height;
        r.custom_height = height.is_some();
    }

    pub fn is_row_hidden(&self, row: u32) -> bool {
        self.rows.get(&row).is_some_and(|r| r.hidden)
    }

    pub fn set_row_hidden(&mut self, row: u32, hidden: bool) {
        self.rows.entry(row).or_default().hidden = hidden;
    }

    /// Last row that has a `<row>` element, 0 for an empty sheet.
    pub fn max_row(&self) -> u32 {
        self.rows.keys().next_back().copied().unwrap_or(0)
    }

    /// Last column holding a cell, 0 for an empty sheet.
    pub fn max_column(&self) -> u32 {
        self.rows
            .values()
            .filter_map(|r| r.cells.keys().next_back())
            .copied()
            .max()
            .unwrap_or(0)
    }

    /// Row numbers that carry at least one cell, ascending.
    pub fn populated_rows(&self) -> impl Iterator<Item = u32> + '_ {
        self.rows
            .iter()
            .filter(|(_, r)| !r.cells.is_empty())
            .map(|(n, _)| *n)
    }

    pub fn merged_ranges(&self) -> &[CellRange] {
        &self.merges
    }

    /// Merge `range`, replacing any merged range it overlaps.
    pub fn merge_cells(&mut self, range: CellRange) {
        self.merges.retain(|m| !m.intersects(&range));
        self.merges.push(range);
    }

    pub fn unmerge_cells(&mut self, range: &CellRange) -> bool {
        let before = self.merges.len();
        self.merges.retain(|m| m != range);
        before != self.merges.len()
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn tables_mut(&mut self) -> &mut [Table] {
        &mut self.tables
    }

    pub(crate) fn push_table(&mut self, table: Table) {
        self.tables.push(table);
    }

    /// Delete `count` rows starting at `start` and shift the rows below up.
    ///
    /// Row heights and hidden flags travel with their rows. Merged ranges
    /// inside the deleted band are dropped, ranges below it are shifted and
    /// ranges straddling it are shortened. Table ranges below the band shift.
    pub fn delete_rows(&mut self, start: u32, count: u32) {
        if count == 0 || start == 0 {
            return;
        }
        let end = start + count;

        let old = std::mem::take(&mut self.rows);
        for (r, row) in old {
            if r < start {
                self.rows.insert(r, row);
            } else if r >= end {
                self.rows.insert(r - count, row);
            }
        }

        self.merges = self
            .merges
            .iter()
            .filter_map(|m| shift_range(m, start, count))
            .filter(|m| m.first_row != m.last_row || m.first_col != m.last_col)
            .collect();

        for table in &mut self.tables {
            if let Some(shifted) = shift_range(&table.range(), start, count) {
                table.set_range(shifted);
            }
        }
    }

    pub(crate) fn to_xml(&self) -> Result<Vec<u8>> {
        let mut writer = Writer::new(Vec::new());

        for segment in &self.segments {
            match segment {
                Segment::Raw(events) => {
                    for ev in events {
                        writer.write_event(ev)?;
                    }
                }
                Segment::SheetData => self.write_sheet_data(&mut writer)?,
                Segment::MergeCells => self.write_merges(&mut writer)?,
            }
        }
        Ok(writer.into_inner())
    }

    fn write_sheet_data(&self, writer: &mut Writer<Vec<u8>>) -> Result<()> {
        if self.rows.is_empty() {
            writer.write_event(Event::Empty(BytesStart::new("sheetData")))?;
            return Ok(());
        }
        writer.write_event(Event::Start(BytesStart::new("sheetData")))?;
        for (r, row) in &self.rows {
            let mut start = BytesStart::new("row");
            start.push_attribute(("r", r.to_string().as_str()));
            for (k, v) in &row.extra {
                start.push_attribute((k.as_str(), v.as_str()));
            }
            if let Some(h) = row.height {
                start.push_attribute(("ht", format_number(h).as_str()));
                if row.custom_height {
                    start.push_attribute(("customHeight", "1"));
                }
            }
            if row.hidden {
                start.push_attribute(("hidden", "1"));
            }
            if row.cells.is_empty() {
                writer.write_event(Event::Empty(start))?;
                continue;
            }
            writer.write_event(Event::Start(start))?;
            for (c, cell) in &row.cells {
                write_cell(writer, *r, *c, cell)?;
            }
            writer.write_event(Event::End(BytesEnd::new("row")))?;
        }
        writer.write_event(Event::End(BytesEnd::new("sheetData")))?;
        Ok(())
    }

    fn write_merges(&self, writer: &mut Writer<Vec<u8>>) -> Result<()> {
        if self.merges.is_empty() {
            return Ok(());
        }
        let mut start = BytesStart::new("mergeCells");
        start.push_attribute(("count", self.merges.len().to_string().as_str()));
        writer.write_event(Event::Start(start))?;
        for m in &self.merges {
            let mut cell = BytesStart::new("mergeCell");
            cell.push_attribute(("ref", m.to_string().as_str()));
            writer.write_event(Event::Empty(cell))?;
        }
        writer.write_event(Event::End(BytesEnd::new("mergeCells")))?;
        Ok(())
    }
}

/// Position of `m` after deleting `count` rows from `start`; `None` if it
/// falls entirely inside the deleted band.
fn shift_range(m: &CellRange, start: u32, count: u32) -> Option<CellRange> {
    let end = start + count;
    let map = |r: u32, upper: bool| -> u32 {
        if r < start {
            r
        } else if r >= end {
            r - count
        } else if upper {
            start
        } else {
            start.saturating_sub(1)
        }
    };
    let first = map(m.first_row, true);
    let last = map(m.last_row, false);
    if last < first || last == 0 {
        return None;
    }
    Some(CellRange {
        first_row: first,
        last_row: last,
        ..*m
    })
}

/// Integral values print without a fractional part.
pub(crate) fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn write_cell(writer: &mut Writer<Vec<u8>>, row: u32, col: u32, cell: &Cell) -> Result<()> {
    let mut start = BytesStart::new("c");
    start.push_attribute(("r", cell_ref(row, col).as_str()));
    if let Some(s) = cell.style {
        start.push_attribute(("s", s.to_string().as_str()));
    }
    let kind = match &cell.value {
        CellValue::Text(_) => Some("inlineStr"),
        CellValue::SharedString { .. } => Some("s"),
        CellValue::Bool(_) => Some("b"),
        CellValue::Error(_) => Some("e"),
        CellValue::Number(_) | CellValue::Empty => None,
    };
    // A formula with a string result is typed "str", not an inline string.
    let kind = match (&cell.formula, &cell.value) {
        (Some(_), CellValue::Text(_)) => Some("str"),
        _ => kind,
    };
    if let Some(t) = kind {
        start.push_attribute(("t", t));
    }
    for (k, v) in &cell.extra {
        start.push_attribute((k.as_str(), v.as_str()));
    }

    if cell.formula.is_none() && cell.value == CellValue::Empty {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }

    writer.write_event(Event::Start(start))?;
    if let Some(f) = &cell.formula {
        let mut fs = BytesStart::new("f");
        for (k, v) in &f.attrs {
            fs.push_attribute((k.as_str(), v.as_str()));
        }
        if f.text.is_empty() {
            writer.write_event(Event::Empty(fs))?;
        } else {
            writer.write_event(Event::Start(fs))?;
            writer.write_event(Event::Text(BytesText::new(&f.text)))?;
            writer.write_event(Event::End(BytesEnd::new("f")))?;
        }
    }
    match &cell.value {
        CellValue::Empty => {}
        CellValue::Text(s) if cell.formula.is_none() => {
            writer.write_event(Event::Start(BytesStart::new("is")))?;
            let mut t = BytesStart::new("t");
            t.push_attribute(("xml:space", "preserve"));
            writer.write_event(Event::Start(t))?;
            writer.write_event(Event::Text(BytesText::new(s)))?;
            writer.write_event(Event::End(BytesEnd::new("t")))?;
            writer.write_event(Event::End(BytesEnd::new("is")))?;
        }
        other => {
            let v = match other {
                CellValue::Number(n) => format_number(*n),
                CellValue::Text(s) | CellValue::Error(s) => s.clone(),
                CellValue::SharedString { index, .. } => index.to_string(),
                CellValue::Bool(b) => if *b { "1" } else { "0" }.to_string(),
                CellValue::Empty => String::new(),
            };
            writer.write_event(Event::Start(BytesStart::new("v")))?;
            writer.write_event(Event::Text(BytesText::new(&v)))?;
            writer.write_event(Event::End(BytesEnd::new("v")))?;
        }
    }
    writer.write_event(Event::End(BytesEnd::new("c")))?;
    Ok(())
}

fn parse_sheet_data(
    reader: &mut Reader<&[u8]>,
    shared: &[String],
    rows: &mut BTreeMap<u32, Row>,
) -> Result<()> {
    let mut buf = Vec::new();
    let mut current: Option<(u32, Row)> = None;
    let mut next_row = 1u32;
    let mut next_col = 1u32;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"row" => {
                let (r, row) = row_from_start(&e, next_row);
                next_row = r + 1;
                next_col = 1;
                current = Some((r, row));
            }
            Event::Empty(e) if e.local_name().as_ref() == b"row" => {
                let (r, row) = row_from_start(&e, next_row);
                next_row = r + 1;
                rows.insert(r, row);
            }
            Event::End(e) if e.local_name().as_ref() == b"row" => {
                if let Some((r, row)) = current.take() {
                    rows.insert(r, row);
                }
            }
            Event::Start(e) if e.local_name().as_ref() == b"c" => {
                let head = CellHead::from_start(&e, next_col);
                let col = head.col;
                let cell = parse_cell_body(reader, head, shared)?;
                next_col = col + 1;
                if let Some((_, row)) = current.as_mut() {
                    row.cells.insert(col, cell);
                }
            }
            Event::Empty(e) if e.local_name().as_ref() == b"c" => {
                let head = CellHead::from_start(&e, next_col);
                let col = head.col;
                let cell = head.finish(None, None, String::new(), shared);
                next_col = col + 1;
                if let Some((_, row)) = current.as_mut() {
                    row.cells.insert(col, cell);
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"sheetData" => break,
            Event::Eof => return Err(ReportError::Xlsx("unterminated sheetData".into())),
            _ => {}
        }
        buf.clear();
    }
    Ok(())
}

fn row_from_start(e: &BytesStart, fallback: u32) -> (u32, Row) {
    let r = attr_u32(e, b"r").unwrap_or(fallback);
    let height = attr_string(e, b"ht").and_then(|s| s.parse::<f64>().ok());
    let row = Row {
        height,
        custom_height: attr_bool(e, b"customHeight"),
        hidden: attr_bool(e, b"hidden"),
        extra: other_attrs(e, &[b"r", b"ht", b"customHeight", b"hidden"]),
        cells: BTreeMap::new(),
    };
    (r, row)
}

struct CellHead {
    col: u32,
    style: Option<u32>,
    kind: Option<String>,
    extra: Vec<(String, String)>,
}

impl CellHead {
    fn from_start(e: &BytesStart, fallback_col: u32) -> Self {
        let col = attr_string(e, b"r")
            .and_then(|r| parse_cell_ref(&r))
            .map(|(_, c)| c)
            .unwrap_or(fallback_col);
        Self {
            col,
            style: attr_u32(e, b"s"),
            kind: attr_string(e, b"t"),
            extra: other_attrs(e, &[b"r", b"s", b"t"]),
        }
    }

    fn finish(
        self,
        formula: Option<Formula>,
        v: Option<String>,
        inline: String,
        shared: &[String],
    ) -> Cell {
        let value = match (self.kind.as_deref(), v) {
            (Some("inlineStr"), _) => CellValue::Text(inline),
            (Some("s"), Some(v)) => {
                let index = v.trim().parse::<usize>().unwrap_or(0);
                let text = shared.get(index).cloned().unwrap_or_default();
                CellValue::SharedString { index, text }
            }
            (Some("str") | Some("d"), Some(v)) => CellValue::Text(v),
            (Some("b"), Some(v)) => CellValue::Bool(v.trim() == "1"),
            (Some("e"), Some(v)) => CellValue::Error(v),
            (_, Some(v)) => match v.trim().parse::<f64>() {
                Ok(n) => CellValue::Number(n),
                Err(_) => CellValue::Text(v),
            },
            (_, None) => CellValue::Empty,
        };
        Cell {
            value,
            style: self.style,
            formula,
            extra: self.extra,
        }
    }
}

fn parse_cell_body(reader: &mut Reader<&[u8]>, head: CellHead, shared: &[String]) -> Result<Cell> {
    #[derive(PartialEq)]
    enum In {
        Nothing,
        Formula,
        Value,
        InlineText,
        Phonetic,
    }

    let mut buf = Vec::new();
    let mut state = In::Nothing;
    let mut formula: Option<Formula> = None;
    let mut v: Option<String> = None;
    let mut inline = String::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"f" => {
                    formula = Some(Formula {
                        attrs: other_attrs(&e, &[]),
                        text: String::new(),
                    });
                    state = In::Formula;
                }
                b"v" => {
                    v = Some(String::new());
                    state = In::Value;
                }
                b"rPh" => state = In::Phonetic,
                b"t" if state != In::Phonetic => state = In::InlineText,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"f" => {
                formula = Some(Formula {
                    attrs: other_attrs(&e, &[]),
                    text: String::new(),
                });
            }
            Event::Text(t) => {
                let text = t.unescape()?;
                match state {
                    In::Formula => {
                        if let Some(f) = formula.as_mut() {
                            f.text.push_str(&text);
                        }
                    }
                    In::Value => {
                        if let Some(v) = v.as_mut() {
                            v.push_str(&text);
                        }
                    }
                    In::InlineText => inline.push_str(&text),
                    In::Nothing | In::Phonetic => {}
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"c" => break,
                b"rPh" => state = In::Nothing,
                b"f" | b"v" | b"t" => {
                    if state != In::Phonetic {
                        state = In::Nothing;
                    }
                }
                _ => {}
            },
            Event::Eof => return Err(ReportError::Xlsx("unterminated cell".into())),
            _ => {}
        }
        buf.clear();
    }

    Ok(head.finish(formula, v, inline, shared))
}

fn parse_merges(reader: &mut Reader<&[u8]>, merges: &mut Vec<CellRange>) -> Result<()> {
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"mergeCell" => {
                if let Some(range) = attr_string(&e, b"ref").and_then(|r| CellRange::parse(&r)) {
                    merges.push(range);
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"mergeCells" => break,
            Event::Eof => return Err(ReportError::Xlsx("unterminated mergeCells".into())),
            _ => {}
        }
        buf.clear();
    }
    Ok(())
}
