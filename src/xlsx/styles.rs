// Cell formats in `xl/styles.xml`.
//
// Formats are never rebuilt from scratch: a derived format is a copy of an
// existing `<xf>` pointing at a copy of its `<border>` with one edit applied.
use std::collections::HashMap;

use quick_xml::events::{BytesEnd, BytesStart, Event};

use super::xml::{attr_u32, child_spans, find_element, read_events, refresh_count, with_attr, write_events};
use crate::error::{ReportError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum BorderEdit {
    BottomThin,
    Cleared,
}

#[derive(Debug, Clone)]
pub struct Stylesheet {
    events: Vec<Event<'static>>,
    derived: HashMap<(u32, BorderEdit), u32>,
    dirty: bool,
}

impl Stylesheet {
    pub(crate) fn parse(xml: &[u8]) -> Result<Self> {
        Ok(Self {
            events: read_events(xml)?,
            derived: HashMap::new(),
            dirty: false,
        })
    }

    /// Number of entries in `<cellXfs>`.
    pub fn format_count(&self) -> usize {
        find_element(&self.events, b"cellXfs", 0)
            .map(|(s, e)| child_spans(&self.events, s, e).len())
            .unwrap_or(0)
    }

    /// Border id referenced by the cell format `xf`.
    pub fn border_id(&self, xf: u32) -> Option<u32> {
        let (s, e) = find_element(&self.events, b"cellXfs", 0)?;
        let (start, _) = *child_spans(&self.events, s, e).get(xf as usize)?;
        match &self.events[start] {
            Event::Start(x) | Event::Empty(x) => Some(attr_u32(x, b"borderId").unwrap_or(0)),
            _ => None,
        }
    }

    /// Serialized `<border>` element behind `xf`, mainly for inspection.
    pub fn border_xml(&self, xf: u32) -> Option<String> {
        let id = self.border_id(xf)?;
        let (s, e) = find_element(&self.events, b"borders", 0)?;
        let (bs, be) = *child_spans(&self.events, s, e).get(id as usize)?;
        write_events(&self.events[bs..=be])
            .ok()
            .and_then(|b| String::from_utf8(b).ok())
    }

    /// Format equal to `xf` with a thin black bottom border.
    pub fn with_bottom_border(&mut self, xf: u32) -> Result<u32> {
        self.derive(xf, BorderEdit::BottomThin)
    }

    /// Format equal to `xf` with no borders at all.
    pub fn without_border(&mut self, xf: u32) -> Result<u32> {
        self.derive(xf, BorderEdit::Cleared)
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn to_xml(&self) -> Result<Vec<u8>> {
        write_events(&self.events)
    }

    fn derive(&mut self, xf: u32, edit: BorderEdit) -> Result<u32> {
        if let Some(&id) = self.derived.get(&(xf, edit)) {
            return Ok(id);
        }

        let (xfs_start, xfs_end) = find_element(&self.events, b"cellXfs", 0)
            .ok_or_else(|| ReportError::Xlsx("styles part has no cellXfs".into()))?;
        let xfs = child_spans(&self.events, xfs_start, xfs_end);
        let &(xf_start, xf_end) = xfs
            .get(xf as usize)
            .ok_or_else(|| ReportError::Xlsx(format!("cell format {xf} out of range")))?;
        let (borders_start, borders_end) = find_element(&self.events, b"borders", 0)
            .ok_or_else(|| ReportError::Xlsx("styles part has no borders".into()))?;
        if borders_end == borders_start {
            return Err(ReportError::Xlsx("styles part has an empty borders element".into()));
        }
        let borders = child_spans(&self.events, borders_start, borders_end);

        let mut new_xf: Vec<Event<'static>> = self.events[xf_start..=xf_end].to_vec();
        let base_id = match &new_xf[0] {
            Event::Start(e) | Event::Empty(e) => attr_u32(e, b"borderId").unwrap_or(0),
            _ => 0,
        };
        let base_border = borders
            .get(base_id as usize)
            .map(|&(s, e)| self.events[s..=e].to_vec())
            .unwrap_or_else(empty_border);
        let new_border = match edit {
            BorderEdit::BottomThin => with_thin_bottom(base_border),
            BorderEdit::Cleared => empty_border(),
        };

        let new_border_id = borders.len().to_string();
        new_xf[0] = match &new_xf[0] {
            Event::Start(e) => Event::Start(with_attr(&with_attr(e, "borderId", &new_border_id), "applyBorder", "1")),
            Event::Empty(e) => Event::Empty(with_attr(&with_attr(e, "borderId", &new_border_id), "applyBorder", "1")),
            other => other.clone(),
        };
        let new_xf_id = xfs.len() as u32;

        // Insert at the later position first so the earlier index stays valid.
        let mut inserts = [(xfs_end, new_xf), (borders_end, new_border)];
        inserts.sort_by(|a, b| b.0.cmp(&a.0));
        for (at, events) in inserts {
            self.events.splice(at..at, events);
        }
        refresh_count(&mut self.events, b"borders");
        refresh_count(&mut self.events, b"cellXfs");

        self.dirty = true;
        self.derived.insert((xf, edit), new_xf_id);
        Ok(new_xf_id)
    }
}

fn empty_border() -> Vec<Event<'static>> {
    let mut out = vec![Event::Start(BytesStart::new("border"))];
    for side in ["left", "right", "top", "bottom", "diagonal"] {
        out.push(Event::Empty(BytesStart::new(side)));
    }
    out.push(Event::End(BytesEnd::new("border")));
    out
}

fn thin_bottom() -> Vec<Event<'static>> {
    let mut start = BytesStart::new("bottom");
    start.push_attribute(("style", "thin"));
    let mut color = BytesStart::new("color");
    color.push_attribute(("rgb", "FF000000"));
    vec![
        Event::Start(start),
        Event::Empty(color),
        Event::End(BytesEnd::new("bottom")),
    ]
}

fn with_thin_bottom(border: Vec<Event<'static>>) -> Vec<Event<'static>> {
    let Some(Event::Start(_)) = border.first() else {
        // `<border/>`: expand into a full element.
        let mut out = match border.first() {
            Some(Event::Empty(e)) => vec![Event::Start(e.clone())],
            _ => vec![Event::Start(BytesStart::new("border"))],
        };
        out.extend(thin_bottom());
        out.push(Event::End(BytesEnd::new("border")));
        return out;
    };

    let last = border.len() - 1;
    let children = child_spans(&border, 0, last);
    let named = |name: &[u8]| {
        children.iter().copied().find(|&(s, _)| match &border[s] {
            Event::Start(e) | Event::Empty(e) => e.local_name().as_ref() == name,
            _ => false,
        })
    };

    let mut out = border.clone();
    if let Some((s, e)) = named(b"bottom") {
        out.splice(s..=e, thin_bottom());
    } else {
        let at = named(b"diagonal").map(|(s, _)| s).unwrap_or(last);
        out.splice(at..at, thin_bottom());
    }
    out
}
