//! Entity header / multipart body parser for carousel modules.
//!
//! A module body is `*entity-header CRLF [entity-body]` (RFC 2068 header
//! grammar); `multipart/mixed` bodies follow RFC 1521 with `--boundary`
//! delimiters.

use crate::types::{MediaType, MediaTypeParameter};

const CR: u8 = b'\r';
const LF: u8 = b'\n';

fn is_ctl(c: u8) -> bool { c <= 31 || c == 127 }
fn is_lwsp(c: u8) -> bool { c == b' ' || c == b'\t' }
fn is_tspecial(c: u8) -> bool { b"()<>@,;:\\\"/[]?={} \t".contains(&c) }

/// One lexical item of a header field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Lws,
    Quoted(String),
    TSpecial(u8),
    Token(String),
}

impl FieldValue {
    fn push_to(&self, out: &mut String) {
        match self {
            FieldValue::Lws            => out.push(' '),
            FieldValue::Quoted(s)      => out.push_str(s),
            FieldValue::TSpecial(c)    => out.push(*c as char),
            FieldValue::Token(s)       => out.push_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityHeader {
    /// lower-cased field name
    pub name:          String,
    pub original_name: String,
    pub value:         Vec<FieldValue>,
}

impl EntityHeader {
    /// Field value with quoting removed and LWS collapsed.
    pub fn text(&self) -> String {
        let mut s = String::new();
        for v in &self.value { v.push_to(&mut s) }
        s
    }
}

#[derive(Debug, Clone)]
pub struct Entity<'a> {
    pub headers:        Vec<EntityHeader>,
    pub body:           &'a [u8],
    pub multipart_body: Option<Vec<Entity<'a>>>,
}

impl<'a> Entity<'a> {
    pub fn header(&self, name: &str) -> Option<&EntityHeader> {
        self.headers.iter().find(|h| h.name == name)
    }
}

pub struct EntityParser<'a> {
    buf:    &'a [u8],
    offset: usize,
}

impl<'a> EntityParser<'a> {
    pub fn new(buf: &'a [u8]) -> Self { Self { buf, offset: 0 } }

    fn peek(&self, at: usize) -> Option<u8> { self.buf.get(at).copied() }

    fn at_crlf(&self) -> bool {
        self.peek(self.offset) == Some(CR) && self.peek(self.offset + 1) == Some(LF)
    }

    /// `*entity-header CRLF [entity-body]`; `None` when the header block is
    /// not terminated.
    pub fn read_entity(&mut self) -> Option<Entity<'a>> {
        let mut headers = Vec::new();
        loop {
            if self.offset + 1 >= self.buf.len() { return None }
            if self.at_crlf() {
                self.offset += 2;
                break;
            }
            let header = self.read_entity_header();
            if !self.at_crlf() { return None }
            self.offset += 2;
            match header {
                Some(h) => headers.push(h),
                None    => break,
            }
        }

        let multipart_body = headers
            .iter()
            .find(|h| h.name == "content-type")
            .and_then(|h| parse_media_type(&h.value))
            .filter(|m| m.is_multipart_mixed())
            .and_then(|m| self.read_multipart_body(&m));

        Some(Entity { headers, body: &self.buf[self.offset.min(self.buf.len())..], multipart_body })
    }

    /// `discard-text 1*encapsulation close-delimiter discard-text`
    fn read_multipart_body(&mut self, media_type: &MediaType) -> Option<Vec<Entity<'a>>> {
        let boundary        = media_type.parameter("boundary")?;
        let delimiter       = format!("--{boundary}\r\n").into_bytes();
        let close_delimiter = format!("--{boundary}--\r\n").into_bytes();
        let next_part       = [b"\r\n".as_slice(), &delimiter].concat();
        let last_part       = [b"\r\n".as_slice(), &close_delimiter].concat();

        let mut entities = Vec::new();
        loop {
            let part_start = find(self.buf, &delimiter, self.offset)? + delimiter.len();
            self.offset = part_start;
            let (part_end, last) = match find(self.buf, &next_part, part_start) {
                Some(end) => {
                    self.offset = end + 2;
                    (end, false)
                }
                None => {
                    let end = find(self.buf, &last_part, part_start)?;
                    self.offset = end + last_part.len();
                    (end, true)
                }
            };
            entities.push(EntityParser::new(&self.buf[part_start..part_end]).read_entity()?);
            if last { break }
        }
        self.offset = self.buf.len();
        Some(entities)
    }

    /// `field-name ":" [ field-value ]`
    fn read_entity_header(&mut self) -> Option<EntityHeader> {
        let name = self.read_token()?;
        self.skip_lws();
        if self.peek(self.offset) != Some(b':') { return None }
        self.offset += 1;
        self.skip_lws();
        Some(EntityHeader {
            name:          name.to_ascii_lowercase(),
            original_name: name,
            value:         self.read_field_value(),
        })
    }

    fn read_field_value(&mut self) -> Vec<FieldValue> {
        let mut values = Vec::new();
        while let Some(c) = self.peek(self.offset) {
            if self.read_lws() {
                self.skip_lws();
                values.push(FieldValue::Lws);
                continue;
            }
            if let Some(q) = self.read_quoted_string() {
                values.push(FieldValue::Quoted(q));
                continue;
            }
            if is_tspecial(c) {
                values.push(FieldValue::TSpecial(c));
                self.offset += 1;
                continue;
            }
            match self.read_token() {
                Some(t) => values.push(FieldValue::Token(t)),
                None    => break,
            }
        }
        values
    }

    /// `1*<any CHAR except CTLs or tspecials>`
    fn read_token(&mut self) -> Option<String> {
        let begin = self.offset;
        while let Some(c) = self.peek(self.offset) {
            if is_ctl(c) || is_tspecial(c) || c >= 0x80 { break }
            self.offset += 1;
        }
        (self.offset > begin)
            .then(|| String::from_utf8_lossy(&self.buf[begin..self.offset]).into_owned())
    }

    fn skip_lws(&mut self) { while self.read_lws() {} }

    /// `[CRLF] 1*( SP | HT )`
    fn read_lws(&mut self) -> bool {
        let start = self.offset;
        if self.at_crlf() && self.peek(self.offset + 2).is_some_and(is_lwsp) {
            self.offset += 2;
        }
        if !self.peek(self.offset).is_some_and(is_lwsp) {
            self.offset = start;
            return false;
        }
        while self.peek(self.offset).is_some_and(is_lwsp) { self.offset += 1 }
        true
    }

    /// `<"> *(qdtext | quoted-pair) <">`; an unterminated string runs to the
    /// first control character.
    fn read_quoted_string(&mut self) -> Option<String> {
        if self.peek(self.offset) != Some(b'"') { return None }
        self.offset += 1;
        let mut out = Vec::new();
        while let Some(c) = self.peek(self.offset) {
            if c == b'"' {
                self.offset += 1;
                break;
            }
            if self.read_lws() {
                self.skip_lws();
                out.push(b' ');
                continue;
            }
            if is_ctl(c) { break }
            if c == b'\\' {
                if let Some(escaped) = self.peek(self.offset + 1) {
                    out.push(escaped);
                    self.offset += 1;
                }
                self.offset += 1;
                continue;
            }
            out.push(c);
            self.offset += 1;
        }
        Some(String::from_utf8_lossy(&out).into_owned())
    }
}

/// `type "/" subtype *( ";" parameter )` over lexed field values.
pub fn parse_media_type(tokens: &[FieldValue]) -> Option<MediaType> {
    let mut it = tokens.iter().filter(|v| !matches!(v, FieldValue::Lws)).peekable();

    let FieldValue::Token(ty) = it.next()? else { return None };
    if it.next()? != &FieldValue::TSpecial(b'/') { return None }
    let FieldValue::Token(subtype) = it.next()? else { return None };

    let mut parameters = Vec::new();
    while it.next_if_eq(&&FieldValue::TSpecial(b';')).is_some() {
        let FieldValue::Token(attribute) = it.next()? else { return None };
        if it.next()? != &FieldValue::TSpecial(b'=') { return None }
        let value = match it.next()? {
            FieldValue::Token(v) | FieldValue::Quoted(v) => v.clone(),
            _ => return None,
        };
        parameters.push(MediaTypeParameter {
            attribute:          attribute.to_ascii_lowercase(),
            original_attribute: attribute.clone(),
            value,
        });
    }

    Some(MediaType {
        r#type:           ty.to_ascii_lowercase(),
        original_type:    ty.clone(),
        subtype:          subtype.to_ascii_lowercase(),
        original_subtype: subtype.clone(),
        parameters,
    })
}

/// Media type from descriptor text such as the DII Type descriptor.
pub fn parse_media_type_str(text: &str) -> Option<MediaType> {
    let mut p = EntityParser::new(text.as_bytes());
    parse_media_type(&p.read_field_value())
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from > haystack.len() { return None }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_media_type_with_quoted_boundary() {
        let m = parse_media_type_str("Multipart/Mixed; Boundary=\"a b\"").unwrap();
        assert_eq!(m.r#type, "multipart");
        assert_eq!(m.original_type, "Multipart");
        assert_eq!(m.subtype, "mixed");
        assert_eq!(m.parameter("boundary"), Some("a b"));
        assert!(m.is_multipart_mixed());
    }

    #[test]
    fn rejects_media_type_without_subtype() {
        assert!(parse_media_type_str("text").is_none());
        assert!(parse_media_type_str("text/").is_none());
    }

    #[test]
    fn splits_multipart_module() {
        let body = b"Content-Type: multipart/mixed; boundary=BB\r\n\r\n\
preamble\r\n\
--BB\r\n\
Content-Location: startup.bml\r\n\
Content-Type: text/X-arib-bml; charset=euc-jp\r\n\
\r\n\
<bml/>\r\n\
--BB\r\n\
Content-Location: a.png\r\n\
Content-Type: image/png\r\n\
\r\n\
\x89PNG\r\n\
--BB--\r\n";
        let entity = EntityParser::new(body).read_entity().unwrap();
        let parts = entity.multipart_body.unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].header("content-location").unwrap().text(), "startup.bml");
        assert_eq!(parts[0].body, b"<bml/>");
        let ct = parse_media_type(&parts[0].header("content-type").unwrap().value).unwrap();
        assert_eq!(ct.original_subtype, "X-arib-bml");
        assert_eq!(ct.parameter("charset"), Some("euc-jp"));
        assert_eq!(parts[1].body, b"\x89PNG");
    }

    #[test]
    fn missing_close_delimiter_fails() {
        let body = b"Content-Type: multipart/mixed; boundary=BB\r\n\r\n--BB\r\n\r\nabc\r\n";
        let entity = EntityParser::new(body).read_entity().unwrap();
        assert!(entity.multipart_body.is_none());
    }

    #[test]
    fn folded_header_collapses_to_space() {
        let body = b"X-Note: a\r\n  b\r\n\r\n";
        let entity = EntityParser::new(body).read_entity().unwrap();
        assert_eq!(entity.headers[0].original_name, "X-Note");
        assert_eq!(entity.headers[0].text(), "a b");
    }
}
