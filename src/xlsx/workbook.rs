// The xlsx package: zip entries plus the parts the generators edit.
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use quick_xml::escape::partial_escape;
use quick_xml::events::{BytesText, Event};
use quick_xml::Reader;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::styles::Stylesheet;
use super::table::Table;
use super::worksheet::Worksheet;
use super::xml::{attr_string, attr_string_local, attr_u32, read_events, with_attr, write_events};
use crate::error::{ReportError, Result};

const CONTENT_TYPES: &str = "[Content_Types].xml";
const ROOT_RELS: &str = "_rels/.rels";

#[derive(Debug, Clone)]
struct Relationship {
    id: String,
    rel_type: String,
    target: String,
}

#[derive(Debug, Clone)]
struct SheetEntry {
    rel_id: String,
    part: String,
    rels_part: String,
    original_name: String,
    worksheet: Worksheet,
}

#[derive(Debug, Clone)]
pub struct Workbook {
    parts: Vec<(String, Vec<u8>)>,
    workbook_part: String,
    sheets: Vec<SheetEntry>,
    removed: Vec<SheetEntry>,
    styles: Option<(String, Stylesheet)>,
}

impl Workbook {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = fs::read(path.as_ref())?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        let mut parts = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)?;
            parts.push((name, data));
        }

        let find = |name: &str| parts.iter().find(|(n, _)| n == name).map(|(_, d)| d.as_slice());

        if find(CONTENT_TYPES).is_none() {
            return Err(ReportError::Xlsx("missing [Content_Types].xml".into()));
        }

        let workbook_part = match find(ROOT_RELS) {
            Some(xml) => parse_relationships(xml, "")?
                .into_iter()
                .find(|r| r.rel_type.ends_with("/officeDocument"))
                .map(|r| r.target)
                .unwrap_or_else(|| "xl/workbook.xml".to_string()),
            None => "xl/workbook.xml".to_string(),
        };
        let workbook_xml = find(&workbook_part)
            .ok_or_else(|| ReportError::Xlsx(format!("missing part {workbook_part}")))?;
        let workbook_rels_part = rels_path_for(&workbook_part);
        let rels = match find(&workbook_rels_part) {
            Some(xml) => parse_relationships(xml, parent_dir(&workbook_part))?,
            None => Vec::new(),
        };

        let shared = match rels.iter().find(|r| r.rel_type.ends_with("/sharedStrings")) {
            Some(rel) => match find(&rel.target) {
                Some(xml) => parse_shared_strings(xml)?,
                None => Vec::new(),
            },
            None => Vec::new(),
        };

        let styles = match rels.iter().find(|r| r.rel_type.ends_with("/styles")) {
            Some(rel) => match find(&rel.target) {
                Some(xml) => Some((rel.target.clone(), Stylesheet::parse(xml)?)),
                None => None,
            },
            None => None,
        };

        let mut sheets = Vec::new();
        for (name, rel_id) in parse_sheet_list(workbook_xml)? {
            let Some(rel) = rels
                .iter()
                .find(|r| r.id == rel_id && r.rel_type.ends_with("/worksheet"))
            else {
                continue;
            };
            let xml = find(&rel.target)
                .ok_or_else(|| ReportError::Xlsx(format!("missing part {}", rel.target)))?;
            let mut worksheet = Worksheet::parse(name.clone(), xml, &shared)?;

            let rels_part = rels_path_for(&rel.target);
            if let Some(sheet_rels) = find(&rels_part) {
                for table_rel in parse_relationships(sheet_rels, parent_dir(&rel.target))?
                    .into_iter()
                    .filter(|r| r.rel_type.ends_with("/table"))
                {
                    if let Some(table_xml) = find(&table_rel.target) {
                        worksheet.push_table(Table::parse(table_rel.target.clone(), table_xml)?);
                    }
                }
            }

            sheets.push(SheetEntry {
                rel_id,
                part: rel.target.clone(),
                rels_part,
                original_name: name,
                worksheet,
            });
        }

        Ok(Self {
            parts,
            workbook_part,
            sheets,
            removed: Vec::new(),
            styles,
        })
    }

    pub fn sheet_count(&self) -> usize {
        self.sheets.len()
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets
            .iter()
            .map(|s| s.worksheet.name().to_string())
            .collect()
    }

    pub fn sheet(&self, name: &str) -> Option<&Worksheet> {
        self.sheets
            .iter()
            .map(|s| &s.worksheet)
            .find(|ws| ws.name() == name)
    }

    pub fn sheet_mut(&mut self, name: &str) -> Option<&mut Worksheet> {
        self.sheets
            .iter_mut()
            .map(|s| &mut s.worksheet)
            .find(|ws| ws.name() == name)
    }

    pub fn sheet_at(&self, index: usize) -> Option<&Worksheet> {
        self.sheets.get(index).map(|s| &s.worksheet)
    }

    pub fn worksheets_mut(&mut self) -> impl Iterator<Item = &mut Worksheet> {
        self.sheets.iter_mut().map(|s| &mut s.worksheet)
    }

    pub fn has_styles(&self) -> bool {
        self.styles.is_some()
    }

    /// A worksheet and the stylesheet, borrowed together for format edits.
    pub fn sheet_with_styles_mut(&mut self, name: &str) -> Result<(&mut Worksheet, &mut Stylesheet)> {
        let worksheet = self
            .sheets
            .iter_mut()
            .map(|s| &mut s.worksheet)
            .find(|ws| ws.name() == name)
            .ok_or_else(|| ReportError::template(format!("sheet `{name}` not found")))?;
        let styles = self
            .styles
            .as_mut()
            .map(|(_, s)| s)
            .ok_or_else(|| ReportError::template("workbook has no styles part"))?;
        Ok((worksheet, styles))
    }

    /// Drop a sheet together with its relationship, content-type override
    /// and sheet-local defined names.
    pub fn remove_sheet(&mut self, name: &str) -> bool {
        match self.sheets.iter().position(|s| s.worksheet.name() == name) {
            Some(idx) => {
                let entry = self.sheets.remove(idx);
                self.removed.push(entry);
                true
            }
            None => false,
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path.as_ref(), self.to_bytes()?)?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut dropped: HashSet<&str> = HashSet::new();
        for entry in &self.removed {
            dropped.insert(entry.part.as_str());
            dropped.insert(entry.rels_part.as_str());
            for table in entry.worksheet.tables() {
                dropped.insert(table.part());
            }
        }
        let workbook_rels_part = rels_path_for(&self.workbook_part);

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for (name, data) in &self.parts {
            if dropped.contains(name.as_str()) {
                continue;
            }
            let bytes: Cow<'_, [u8]> = if *name == self.workbook_part {
                Cow::Owned(self.rewrite_workbook_xml(data)?)
            } else if *name == workbook_rels_part && !self.removed.is_empty() {
                Cow::Owned(self.rewrite_workbook_rels(data)?)
            } else if name == CONTENT_TYPES && !dropped.is_empty() {
                Cow::Owned(rewrite_content_types(data, &dropped)?)
            } else if let Some(entry) = self.sheets.iter().find(|s| s.part == *name) {
                Cow::Owned(entry.worksheet.to_xml()?)
            } else if let Some((_, styles)) = self.styles.as_ref().filter(|(p, s)| p == name && s.is_dirty()) {
                Cow::Owned(styles.to_xml()?)
            } else if let Some(table) = self
                .sheets
                .iter()
                .flat_map(|s| s.worksheet.tables())
                .find(|t| t.part() == name && t.is_dirty())
            {
                Cow::Owned(table.to_xml()?)
            } else {
                Cow::Borrowed(data.as_slice())
            };
            writer.start_file(name.as_str(), options)?;
            writer.write_all(&bytes)?;
        }

        Ok(writer.finish()?.into_inner())
    }

    /// Apply sheet renames and removals to `workbook.xml`.
    fn rewrite_workbook_xml(&self, xml: &[u8]) -> Result<Vec<u8>> {
        let names: HashMap<&str, &str> = self
            .sheets
            .iter()
            .map(|s| (s.rel_id.as_str(), s.worksheet.name()))
            .collect();
        let renames: Vec<(&str, &str)> = self
            .sheets
            .iter()
            .filter(|s| s.original_name != s.worksheet.name())
            .map(|s| (s.original_name.as_str(), s.worksheet.name()))
            .collect();
        let removed_ids: HashSet<&str> = self.removed.iter().map(|s| s.rel_id.as_str()).collect();

        let events = read_events(xml)?;

        // Old sheet position -> new position, `None` for removed sheets.
        let mut positions: Vec<Option<usize>> = Vec::new();
        let mut kept = 0usize;
        for ev in &events {
            if let Event::Start(e) | Event::Empty(e) = ev {
                if e.local_name().as_ref() == b"sheet" {
                    let id = attr_string_local(e, b"id").unwrap_or_default();
                    if removed_ids.contains(id.as_str()) {
                        positions.push(None);
                    } else {
                        positions.push(Some(kept));
                        kept += 1;
                    }
                }
            }
        }

        let mut out: Vec<Event<'static>> = Vec::with_capacity(events.len());
        let mut skip_depth = 0usize;
        let mut in_defined_name = false;
        for ev in events {
            if skip_depth > 0 {
                match ev {
                    Event::Start(_) => skip_depth += 1,
                    Event::End(_) => skip_depth -= 1,
                    _ => {}
                }
                continue;
            }
            match &ev {
                Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                    let id = attr_string_local(e, b"id").unwrap_or_default();
                    if removed_ids.contains(id.as_str()) {
                        if matches!(ev, Event::Start(_)) {
                            skip_depth = 1;
                        }
                        continue;
                    }
                    let renamed = match names.get(id.as_str()) {
                        Some(name) => with_attr(e, "name", name),
                        None => e.clone().into_owned(),
                    };
                    out.push(match ev {
                        Event::Start(_) => Event::Start(renamed),
                        _ => Event::Empty(renamed),
                    });
                }
                Event::Start(e) if e.local_name().as_ref() == b"definedName" => {
                    match attr_u32(e, b"localSheetId") {
                        Some(old) => match positions.get(old as usize).copied().flatten() {
                            Some(new) => {
                                out.push(Event::Start(with_attr(e, "localSheetId", &new.to_string())));
                                in_defined_name = true;
                            }
                            None => skip_depth = 1,
                        },
                        None => {
                            out.push(ev.clone());
                            in_defined_name = true;
                        }
                    }
                }
                Event::End(e) if e.local_name().as_ref() == b"definedName" => {
                    in_defined_name = false;
                    out.push(ev.clone());
                }
                Event::Text(t) if in_defined_name && !renames.is_empty() => {
                    let mut formula = t.unescape()?.into_owned();
                    for (old, new) in &renames {
                        formula = formula
                            .replace(&format!("'{old}'!"), &format!("'{new}'!"))
                            .replace(&format!("{old}!"), &format!("'{new}'!"));
                    }
                    out.push(Event::Text(BytesText::from_escaped(partial_escape(&formula)).into_owned()));
                }
                Event::Empty(e) if e.local_name().as_ref() == b"workbookView" && kept > 0 => {
                    let mut view = e.clone().into_owned();
                    for key in ["activeTab", "firstSheet"] {
                        if attr_u32(&view, key.as_bytes()).is_some_and(|v| v as usize >= kept) {
                            view = with_attr(&view, key, "0");
                        }
                    }
                    out.push(Event::Empty(view));
                }
                _ => out.push(ev.clone()),
            }
        }
        write_events(&out)
    }

    fn rewrite_workbook_rels(&self, xml: &[u8]) -> Result<Vec<u8>> {
        let removed_ids: HashSet<&str> = self.removed.iter().map(|s| s.rel_id.as_str()).collect();
        let events: Vec<Event<'static>> = read_events(xml)?
            .into_iter()
            .filter(|ev| match ev {
                Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                    !attr_string(e, b"Id").is_some_and(|id| removed_ids.contains(id.as_str()))
                }
                _ => true,
            })
            .collect();
        write_events(&events)
    }
}

fn rewrite_content_types(xml: &[u8], dropped: &HashSet<&str>) -> Result<Vec<u8>> {
    let events: Vec<Event<'static>> = read_events(xml)?
        .into_iter()
        .filter(|ev| match ev {
            Event::Empty(e) if e.local_name().as_ref() == b"Override" => {
                !attr_string(e, b"PartName")
                    .is_some_and(|p| dropped.contains(p.trim_start_matches('/')))
            }
            _ => true,
        })
        .collect();
    write_events(&events)
}

fn parent_dir(part: &str) -> &str {
    part.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// `xl/worksheets/sheet1.xml` -> `xl/worksheets/_rels/sheet1.xml.rels`
fn rels_path_for(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

/// Resolve a relationship target against the directory of its source part.
fn resolve_target(base_dir: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut segments: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty()).collect();
    for seg in target.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

fn parse_relationships(xml: &[u8], base_dir: &str) -> Result<Vec<Relationship>> {
    let mut rels = Vec::new();
    for ev in read_events(xml)? {
        if let Event::Start(e) | Event::Empty(e) = &ev {
            if e.local_name().as_ref() != b"Relationship" {
                continue;
            }
            let external = attr_string(e, b"TargetMode").is_some_and(|m| m == "External");
            if external {
                continue;
            }
            if let (Some(id), Some(rel_type), Some(target)) = (
                attr_string(e, b"Id"),
                attr_string(e, b"Type"),
                attr_string(e, b"Target"),
            ) {
                rels.push(Relationship {
                    id,
                    rel_type,
                    target: resolve_target(base_dir, &target),
                });
            }
        }
    }
    Ok(rels)
}

/// `(name, relationship id)` for each `<sheet>` in workbook order.
fn parse_sheet_list(xml: &[u8]) -> Result<Vec<(String, String)>> {
    let mut sheets = Vec::new();
    for ev in read_events(xml)? {
        if let Event::Start(e) | Event::Empty(e) = &ev {
            if e.local_name().as_ref() == b"sheet" {
                if let (Some(name), Some(id)) = (attr_string(e, b"name"), attr_string_local(e, b"id")) {
                    sheets.push((name, id));
                }
            }
        }
    }
    Ok(sheets)
}

/// Plain text of each `<si>`; rich-text runs are concatenated, phonetic
/// runs skipped.
fn parse_shared_strings(xml: &[u8]) -> Result<Vec<String>> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_t = false;
    let mut in_phonetic = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"rPh" => in_phonetic = true,
                b"t" if !in_phonetic => in_t = true,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::Text(t) if in_t => current.push_str(&t.unescape()?),
            Event::End(e) => match e.local_name().as_ref() {
                b"si" => strings.push(std::mem::take(&mut current)),
                b"rPh" => in_phonetic = false,
                b"t" => in_t = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}
