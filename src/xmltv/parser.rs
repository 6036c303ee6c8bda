//! Quick-XML based XMLTV parser
//!
//! Builds an [`EpgDocument`] from raw (already decompressed) bytes. Only the
//! attributes needed for time-shifting are interpreted; children of
//! `<channel>` and `<programme>` are captured verbatim.

use quick_xml::Reader;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};

use crate::errors::{AppError, AppResult};
use crate::models::epg::{TimeLayout, parse_xmltv_time_layout};
use crate::models::{Channel, EpgDocument, Programme};

/// Parse a complete XMLTV document
pub fn parse_document(xml: &[u8]) -> AppResult<EpgDocument> {
    let mut reader = Reader::from_reader(xml);
    let mut document = EpgDocument::default();
    let mut root_seen = false;

    // Prolog, up to and including the root start tag
    loop {
        match next_event(&mut reader)? {
            Event::Start(e) => {
                expect_root(&e)?;
                document.root_attributes = parse_attributes(&e)?;
                root_seen = true;
                break;
            }
            Event::Empty(e) => {
                expect_root(&e)?;
                document.root_attributes = parse_attributes(&e)?;
                return finish(&mut reader, document);
            }
            Event::Text(e) if is_whitespace(&e) => {}
            Event::Text(_) | Event::CData(_) => {
                return Err(AppError::malformed("character data before the root element"));
            }
            Event::End(_) => return Err(AppError::malformed("unexpected closing tag before the root element")),
            Event::Eof => break,
            other => document.prolog.push(other.into_owned()),
        }
    }

    if !root_seen {
        return Err(AppError::malformed("document has no root element"));
    }

    // Children of <tv>
    loop {
        match next_event(&mut reader)? {
            Event::Start(e) => {
                let name = element_name(&e)?;
                let body = read_body(&mut reader, &name)?;
                match name.as_str() {
                    "channel" => document.channels.push(build_channel(&e, body)?),
                    "programme" => document.programmes.push(build_programme(&e, body)?),
                    _ => {
                        document.extras.push(Event::Start(e.into_owned()));
                        document.extras.extend(body);
                        document.extras.push(Event::End(BytesEnd::new(name.clone())));
                    }
                }
            }
            Event::Empty(e) => match element_name(&e)?.as_str() {
                "channel" => document.channels.push(build_channel(&e, Vec::new())?),
                "programme" => document.programmes.push(build_programme(&e, Vec::new())?),
                _ => document.extras.push(Event::Empty(e.into_owned())),
            },
            Event::End(_) => break,
            Event::Text(e) if is_whitespace(&e) => {}
            Event::Eof => return Err(AppError::malformed("unexpected end of document inside <tv>")),
            Event::Decl(_) | Event::DocType(_) => {
                return Err(AppError::malformed("declaration inside the root element"));
            }
            other => document.extras.push(other.into_owned()),
        }
    }

    finish(&mut reader, document)
}

/// Only comments, processing instructions and whitespace may follow the root
fn finish(reader: &mut Reader<&[u8]>, document: EpgDocument) -> AppResult<EpgDocument> {
    loop {
        match next_event(reader)? {
            Event::Eof => return Ok(document),
            Event::Comment(_) | Event::PI(_) => {}
            Event::Text(e) if is_whitespace(&e) => {}
            _ => return Err(AppError::malformed("content after the root element")),
        }
    }
}

fn next_event<'a>(reader: &mut Reader<&'a [u8]>) -> AppResult<Event<'a>> {
    reader.read_event().map_err(|e| {
        AppError::malformed(format!(
            "XML parsing error at byte {}: {e}",
            reader.buffer_position()
        ))
    })
}

fn expect_root(e: &BytesStart) -> AppResult<()> {
    if e.name().as_ref() == b"tv" {
        Ok(())
    } else {
        Err(AppError::malformed(format!(
            "root element is <{}>, expected <tv>",
            element_name(e)?
        )))
    }
}

fn element_name(e: &BytesStart) -> AppResult<String> {
    std::str::from_utf8(e.name().as_ref())
        .map(str::to_string)
        .map_err(|err| AppError::malformed(format!("Invalid UTF-8 in XML element name: {err}")))
}

fn is_whitespace(text: &BytesText) -> bool {
    text.iter().all(u8::is_ascii_whitespace)
}

/// Parse XML attributes in document order, unescaping values
fn parse_attributes(element: &BytesStart) -> AppResult<Vec<(String, String)>> {
    let mut attrs = Vec::new();
    for attr in element.attributes() {
        let attr = attr.map_err(|e| AppError::malformed(format!("Invalid attribute: {e}")))?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|e| AppError::malformed(format!("Invalid UTF-8 in attribute name: {e}")))?;
        let raw = std::str::from_utf8(&attr.value)
            .map_err(|e| AppError::malformed(format!("Invalid UTF-8 in attribute '{key}': {e}")))?;
        let value = quick_xml::escape::unescape(raw)
            .map_err(|e| AppError::malformed(format!("Invalid escape in attribute '{key}': {e}")))?;
        attrs.push((key.to_string(), value.into_owned()));
    }
    Ok(attrs)
}

fn take_attribute(attrs: &mut Vec<(String, String)>, key: &str) -> Option<String> {
    let index = attrs.iter().position(|(k, _)| k == key)?;
    Some(attrs.remove(index).1)
}

/// Capture every event up to the matching end tag of `name`
///
/// Text split around entity references is merged back into a single text
/// event; indentation-only text is dropped.
fn read_body(reader: &mut Reader<&[u8]>, name: &str) -> AppResult<Vec<Event<'static>>> {
    let mut body = Vec::new();
    let mut pending_text = String::new();
    let mut depth = 0usize;

    loop {
        match next_event(reader)? {
            Event::Text(e) => {
                let text = std::str::from_utf8(&e)
                    .map_err(|err| AppError::malformed(format!("Invalid UTF-8 in text: {err}")))?;
                pending_text.push_str(text);
            }
            Event::GeneralRef(e) => {
                let entity = std::str::from_utf8(&e)
                    .map_err(|err| AppError::malformed(format!("Invalid UTF-8 in entity: {err}")))?;
                match quick_xml::escape::unescape(&format!("&{entity};")) {
                    Ok(resolved) => pending_text.push_str(&resolved),
                    Err(_) => {
                        // Entity declared in a DTD; keep it as a reference
                        flush_text(&mut body, &mut pending_text);
                        body.push(Event::GeneralRef(e.into_owned()));
                    }
                }
            }
            Event::Start(e) => {
                flush_text(&mut body, &mut pending_text);
                depth += 1;
                body.push(Event::Start(e.into_owned()));
            }
            Event::End(e) => {
                flush_text(&mut body, &mut pending_text);
                if depth == 0 {
                    return Ok(body);
                }
                depth -= 1;
                body.push(Event::End(e.into_owned()));
            }
            Event::Eof => {
                return Err(AppError::malformed(format!(
                    "unexpected end of document inside <{name}>"
                )));
            }
            other => {
                flush_text(&mut body, &mut pending_text);
                body.push(other.into_owned());
            }
        }
    }
}

fn flush_text(body: &mut Vec<Event<'static>>, pending: &mut String) {
    if pending.is_empty() {
        return;
    }
    let indentation_only = pending.trim().is_empty() && pending.contains('\n');
    if !indentation_only {
        body.push(Event::Text(BytesText::new(pending.as_str()).into_owned()));
    }
    pending.clear();
}

/// Text content of the direct children named `child`, in order
pub fn child_texts(body: &[Event<'static>], child: &str) -> Vec<String> {
    let mut texts = Vec::new();
    let mut depth = 0usize;
    let mut current: Option<String> = None;

    for event in body {
        match event {
            Event::Start(e) => {
                if depth == 0 && e.name().as_ref() == child.as_bytes() {
                    current = Some(String::new());
                }
                depth += 1;
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    if let Some(text) = current.take() {
                        texts.push(text.trim().to_string());
                    }
                }
            }
            Event::Text(e) if depth == 1 => {
                if let (Some(current), Ok(raw)) = (current.as_mut(), std::str::from_utf8(e)) {
                    match quick_xml::escape::unescape(raw) {
                        Ok(text) => current.push_str(&text),
                        Err(_) => current.push_str(raw),
                    }
                }
            }
            Event::CData(e) if depth == 1 => {
                if let (Some(current), Ok(text)) = (current.as_mut(), std::str::from_utf8(e)) {
                    current.push_str(text);
                }
            }
            _ => {}
        }
    }
    texts
}

fn build_channel(start: &BytesStart, body: Vec<Event<'static>>) -> AppResult<Channel> {
    let mut attributes = parse_attributes(start)?;
    let id = take_attribute(&mut attributes, "id")
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AppError::malformed("<channel> without an id attribute"))?;

    Ok(Channel {
        display_names: child_texts(&body, "display-name"),
        id,
        attributes,
        body,
    })
}

fn build_programme(start: &BytesStart, body: Vec<Event<'static>>) -> AppResult<Programme> {
    let mut attributes = parse_attributes(start)?;
    let channel_id = take_attribute(&mut attributes, "channel")
        .ok_or_else(|| AppError::malformed("<programme> without a channel attribute"))?;

    let start_raw = take_attribute(&mut attributes, "start").ok_or_else(|| {
        AppError::malformed(format!("programme on channel '{channel_id}' has no start time"))
    })?;
    let (start_time, start_layout) = parse_xmltv_time_layout(&start_raw).ok_or_else(|| {
        AppError::malformed(format!(
            "programme on channel '{channel_id}' has invalid start time '{start_raw}'"
        ))
    })?;

    let (stop, stop_layout) = match take_attribute(&mut attributes, "stop") {
        Some(raw) => {
            let (time, layout) = parse_xmltv_time_layout(&raw).ok_or_else(|| {
                AppError::malformed(format!(
                    "programme on channel '{channel_id}' has invalid stop time '{raw}'"
                ))
            })?;
            (Some(time), layout)
        }
        None => (None, TimeLayout::default()),
    };

    Ok(Programme {
        title: child_texts(&body, "title").into_iter().next(),
        channel_id,
        start: start_time,
        stop,
        start_layout,
        stop_layout,
        attributes,
        body,
    })
}
