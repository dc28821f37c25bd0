// quick-xml helpers shared by the package parts.
//
// Parts that are only patched (styles, tables, workbook.xml) are held as an
// owned event list and written back event by event, so anything the engine
// does not model round-trips unchanged.
use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::error::Result;

/// Unescaped attribute value by exact key.
pub fn attr_string(e: &BytesStart, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == key)
        .and_then(|attr| attr.unescape_value().ok().map(|v| v.into_owned()))
}

/// Unescaped attribute value by local name, ignoring any namespace prefix.
pub fn attr_string_local(e: &BytesStart, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == key)
        .and_then(|attr| attr.unescape_value().ok().map(|v| v.into_owned()))
}

pub fn attr_u32(e: &BytesStart, key: &[u8]) -> Option<u32> {
    attr_string(e, key).and_then(|s| s.trim().parse().ok())
}

pub fn attr_bool(e: &BytesStart, key: &[u8]) -> bool {
    attr_string(e, key).is_some_and(|s| matches!(s.as_str(), "1" | "true"))
}

/// All attributes except the listed keys, unescaped, in document order.
pub fn other_attrs(e: &BytesStart, skip: &[&[u8]]) -> Vec<(String, String)> {
    e.attributes()
        .flatten()
        .filter(|attr| !skip.contains(&attr.key.as_ref()))
        .filter_map(|attr| {
            let key = std::str::from_utf8(attr.key.as_ref()).ok()?.to_string();
            let value = attr.unescape_value().ok()?.into_owned();
            Some((key, value))
        })
        .collect()
}

/// Copy of `e` with `key` set to `value`, replacing an existing value in place.
pub fn with_attr(e: &BytesStart, key: &str, value: &str) -> BytesStart<'static> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut out = BytesStart::new(name);
    let mut replaced = false;
    for attr in e.attributes().flatten() {
        if attr.key.as_ref() == key.as_bytes() {
            out.push_attribute((key, value));
            replaced = true;
        } else {
            out.push_attribute(attr);
        }
    }
    if !replaced {
        out.push_attribute((key, value));
    }
    out
}

pub fn read_events(xml: &[u8]) -> Result<Vec<Event<'static>>> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut events = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            ev => events.push(ev.into_owned()),
        }
        buf.clear();
    }
    Ok(events)
}

pub fn write_events(events: &[Event<'_>]) -> Result<Vec<u8>> {
    let mut writer = Writer::new(Vec::new());
    for ev in events {
        writer.write_event(ev)?;
    }
    Ok(writer.into_inner())
}

/// First element named `name` at or after `from`: `(start, end)` indices,
/// equal for an empty element.
pub fn find_element(events: &[Event<'_>], name: &[u8], from: usize) -> Option<(usize, usize)> {
    let start = (from..events.len()).find(|&i| {
        matches!(&events[i], Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == name)
    })?;
    if matches!(events[start], Event::Empty(_)) {
        return Some((start, start));
    }
    let mut depth = 0usize;
    for (i, ev) in events.iter().enumerate().skip(start) {
        match ev {
            Event::Start(e) if e.local_name().as_ref() == name => depth += 1,
            Event::End(e) if e.local_name().as_ref() == name => {
                depth -= 1;
                if depth == 0 {
                    return Some((start, i));
                }
            }
            _ => {}
        }
    }
    None
}

/// Spans of the direct child elements between a container's start and end.
pub fn child_spans(events: &[Event<'_>], start: usize, end: usize) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    if start >= end {
        return spans;
    }
    let mut depth = 0usize;
    let mut open = 0usize;
    for (i, ev) in events.iter().enumerate().take(end).skip(start + 1) {
        match ev {
            Event::Start(_) => {
                if depth == 0 {
                    open = i;
                }
                depth += 1;
            }
            Event::Empty(_) if depth == 0 => spans.push((i, i)),
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    spans.push((open, i));
                }
            }
            _ => {}
        }
    }
    spans
}

/// Rewrite the `count` attribute of the container `name` to its child count.
pub fn refresh_count(events: &mut [Event<'static>], name: &[u8]) {
    let Some((start, end)) = find_element(events, name, 0) else {
        return;
    };
    let count = child_spans(events, start, end).len().to_string();
    if let Event::Start(e) = &events[start] {
        events[start] = Event::Start(with_attr(e, "count", &count));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const XML: &str = r#"<root><list count="1"><item a="1"/><item a="2"><sub/></item></list><other/></root>"#;

    #[test]
    fn finds_elements_and_children() {
        let events = read_events(XML.as_bytes()).unwrap();
        let (start, end) = find_element(&events, b"list", 0).unwrap();
        let children = child_spans(&events, start, end);
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].0, children[0].1);
        assert!(children[1].1 > children[1].0);
        let (s, e) = find_element(&events, b"other", 0).unwrap();
        assert_eq!(s, e);
    }

    #[test]
    fn refresh_count_and_round_trip() {
        let mut events = read_events(XML.as_bytes()).unwrap();
        refresh_count(&mut events, b"list");
        let out = String::from_utf8(write_events(&events).unwrap()).unwrap();
        assert!(out.contains(r#"<list count="2">"#));
        assert!(out.contains(r#"<item a="2"><sub/></item>"#));
    }

    #[test]
    fn with_attr_replaces_in_place() {
        let events = read_events(br#"<xf fontId="0" borderId="0" applyFont="1"/>"#).unwrap();
        let Event::Empty(e) = &events[0] else { panic!("expected empty element") };
        let updated = with_attr(e, "borderId", "3");
        assert_eq!(attr_u32(&updated, b"borderId"), Some(3));
        assert_eq!(attr_string(&updated, b"applyFont").as_deref(), Some("1"));
        let added = with_attr(e, "applyBorder", "1");
        assert!(attr_bool(&added, b"applyBorder"));
    }
}
