// Worksheet table parts (`xl/tables/tableN.xml`).
use quick_xml::events::Event;

use super::cell_ref::CellRange;
use super::xml::{attr_string, read_events, with_attr, write_events};
use crate::error::{ReportError, Result};

#[derive(Debug, Clone)]
pub struct Table {
    part: String,
    events: Vec<Event<'static>>,
    range: CellRange,
    dirty: bool,
}

impl Table {
    pub(crate) fn parse(part: String, xml: &[u8]) -> Result<Self> {
        let events = read_events(xml)?;
        let range = events
            .iter()
            .find_map(|ev| match ev {
                Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"table" => {
                    attr_string(e, b"ref")
                }
                _ => None,
            })
            .and_then(|r| CellRange::parse(&r))
            .ok_or_else(|| ReportError::Xlsx(format!("table part `{part}` has no ref")))?;
        Ok(Self {
            part,
            events,
            range,
            dirty: false,
        })
    }

    pub fn display_name(&self) -> Option<String> {
        self.events.iter().find_map(|ev| match ev {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"table" => {
                attr_string(e, b"displayName")
            }
            _ => None,
        })
    }

    pub fn range(&self) -> CellRange {
        self.range
    }

    pub fn set_range(&mut self, range: CellRange) {
        if range != self.range {
            self.range = range;
            self.dirty = true;
        }
    }

    pub(crate) fn part(&self) -> &str {
        &self.part
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// The table and its auto-filter both take the new range.
    pub(crate) fn to_xml(&self) -> Result<Vec<u8>> {
        let range = self.range.to_string();
        let events: Vec<Event<'static>> = self
            .events
            .iter()
            .map(|ev| match ev {
                Event::Start(e) if is_ranged(e.local_name().as_ref()) => {
                    Event::Start(with_attr(e, "ref", &range))
                }
                Event::Empty(e) if is_ranged(e.local_name().as_ref()) => {
                    Event::Empty(with_attr(e, "ref", &range))
                }
                other => other.clone(),
            })
            .collect();
        write_events(&events)
    }
}

fn is_ranged(name: &[u8]) -> bool {
    name == b"table" || name == b"autoFilter"
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = concat!(
        r#"<table xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" id="1" "#,
        r#"name="Table1" displayName="Table1" ref="A6:I13" totalsRowShown="0">"#,
        r#"<autoFilter ref="A6:I13"/><tableColumns count="1"><tableColumn id="1" name="Year"/></tableColumns>"#,
        r#"</table>"#
    );

    #[test]
    fn resizes_table_and_filter() {
        let mut table = Table::parse("xl/tables/table1.xml".into(), TABLE.as_bytes()).unwrap();
        assert_eq!(table.range().to_string(), "A6:I13");
        assert_eq!(table.display_name().as_deref(), Some("Table1"));
        assert!(!table.is_dirty());

        table.set_range(CellRange::new(6, 1, 9, 9));
        assert!(table.is_dirty());
        let xml = String::from_utf8(table.to_xml().unwrap()).unwrap();
        assert!(xml.contains(r#"ref="A6:I9""#));
        assert!(xml.contains(r#"<autoFilter ref="A6:I9"/>"#));
        assert!(!xml.contains("A6:I13"));
    }

    #[test]
    fn table_without_ref_is_rejected() {
        assert!(Table::parse("t.xml".into(), b"<table id=\"1\"/>").is_err());
    }
}
