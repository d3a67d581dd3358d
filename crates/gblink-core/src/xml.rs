//! Minimal XML document model for MANSCDP bodies.
//!
//! MANSCDP bodies are shallow element trees with text leaves and no
//! attributes, so the full serde machinery is unnecessary: parsing walks
//! quick-xml events into an [`XmlNode`] tree, and serialization writes
//! CRLF-separated element lines the way devices in the field emit them.

use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::charset::{Charset, Transcoder};
use crate::error::{CodecError, CodecResult};

/// One XML element: a name, attributes, optional text content, and children.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct XmlNode {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub text: Option<String>,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    /// A leaf element with text content.
    pub fn leaf(name: impl Into<String>, text: impl Into<String>) -> Self {
        XmlNode {
            name: name.into(),
            attrs: Vec::new(),
            text: Some(text.into()),
            children: Vec::new(),
        }
    }

    /// An element with child elements and no own text.
    pub fn branch(name: impl Into<String>, children: Vec<XmlNode>) -> Self {
        XmlNode { name: name.into(), attrs: Vec::new(), text: None, children }
    }

    /// Add an attribute, builder style.
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.push((name.into(), value.into()));
        self
    }

    /// Value of the named attribute.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
    }

    /// First direct child with the given name.
    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Trimmed text of the named direct child, if present and non-empty.
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name)
            .and_then(|c| c.text.as_deref())
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// Text of the named child parsed into `T`, or None if absent/unparsable.
    pub fn child_parse<T: std::str::FromStr>(&self, name: &str) -> Option<T> {
        self.child_text(name).and_then(|t| t.parse().ok())
    }

    fn write_open(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (name, value) in &self.attrs {
            out.push(' ');
            out.push_str(name);
            out.push_str("=\"");
            out.push_str(&escape(value.as_str()));
            out.push('"');
        }
    }

    fn write(&self, out: &mut String) {
        if self.children.is_empty() {
            match &self.text {
                Some(text) => {
                    self.write_open(out);
                    out.push('>');
                    out.push_str(&escape(text.as_str()));
                    out.push_str("</");
                    out.push_str(&self.name);
                    out.push_str(">\r\n");
                }
                None => {
                    self.write_open(out);
                    out.push_str("/>\r\n");
                }
            }
        } else {
            self.write_open(out);
            out.push_str(">\r\n");
            for child in &self.children {
                child.write(out);
            }
            out.push_str("</");
            out.push_str(&self.name);
            out.push_str(">\r\n");
        }
    }
}

/// A parsed or generated XML document: prolog charset plus the root element.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Document {
    /// Charset the prolog declares (or will declare when serialized).
    pub encoding: Option<Charset>,
    /// Root element.
    pub root: XmlNode,
}

impl Document {
    /// Parse a UTF-8 XML text into a document tree.
    pub fn parse(text: &str) -> CodecResult<Document> {
        let mut reader = Reader::from_str(text);
        reader.trim_text(true);

        let mut encoding = None;
        let mut stack: Vec<XmlNode> = Vec::new();
        let mut root: Option<XmlNode> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Decl(decl)) => {
                    if let Some(Ok(label)) = decl.encoding() {
                        encoding = Charset::from_label(&String::from_utf8_lossy(&label));
                    }
                }
                Ok(Event::Start(start)) => {
                    stack.push(node_from_start(&start)?);
                }
                Ok(Event::Empty(start)) => {
                    let node = node_from_start(&start)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(node),
                        None if root.is_none() => root = Some(node),
                        None => {
                            return Err(CodecError::malformed_xml("multiple root elements"));
                        }
                    }
                }
                Ok(Event::Text(text)) => {
                    let value = text
                        .unescape()
                        .map_err(|e| CodecError::malformed_xml(e.to_string()))?;
                    if let Some(node) = stack.last_mut() {
                        match &mut node.text {
                            Some(existing) => existing.push_str(&value),
                            None => node.text = Some(value.into_owned()),
                        }
                    }
                }
                Ok(Event::CData(data)) => {
                    let value = String::from_utf8_lossy(&data).into_owned();
                    if let Some(node) = stack.last_mut() {
                        match &mut node.text {
                            Some(existing) => existing.push_str(&value),
                            None => node.text = Some(value),
                        }
                    }
                }
                Ok(Event::End(_)) => {
                    let node = stack
                        .pop()
                        .ok_or_else(|| CodecError::malformed_xml("unbalanced end tag"))?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(node),
                        None if root.is_none() => root = Some(node),
                        None => {
                            return Err(CodecError::malformed_xml("multiple root elements"));
                        }
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(CodecError::malformed_xml(e.to_string())),
            }
        }

        if !stack.is_empty() {
            return Err(CodecError::malformed_xml("unclosed element"));
        }
        let root = root.ok_or_else(|| CodecError::malformed_xml("no root element"))?;
        Ok(Document { encoding, root })
    }

    /// Decode wire bytes into a document, converting to UTF-8 first.
    ///
    /// The prolog charset is sniffed from the raw bytes (the prolog itself is
    /// ASCII in every charset we handle) so the transcoder knows what to
    /// convert from.
    pub fn from_wire(bytes: &[u8], transcoder: &dyn Transcoder) -> CodecResult<Document> {
        let declared = sniff_encoding(bytes).unwrap_or(Charset::Utf8);
        let utf8 = transcoder.convert(bytes, declared, Charset::Utf8)?;
        let text = std::str::from_utf8(&utf8)
            .map_err(|e| CodecError::malformed_xml(format!("not valid UTF-8 after transcode: {e}")))?;
        let mut doc = Document::parse(text)?;
        // Keep the on-wire charset even though the tree is now UTF-8.
        doc.encoding = Some(declared);
        Ok(doc)
    }

    /// Serialize to UTF-8 text with the prolog reflecting `self.encoding`.
    pub fn serialize(&self) -> String {
        let charset = self.encoding.unwrap_or_default();
        let mut out = String::with_capacity(256);
        out.push_str("<?xml version=\"1.0\" encoding=\"");
        out.push_str(charset.label());
        out.push_str("\"?>\r\n");
        self.root.write(&mut out);
        out
    }
}

fn node_from_start(start: &quick_xml::events::BytesStart<'_>) -> CodecResult<XmlNode> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut attrs = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| CodecError::malformed_xml(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| CodecError::malformed_xml(e.to_string()))?
            .into_owned();
        attrs.push((key, value));
    }
    Ok(XmlNode { name, attrs, text: None, children: Vec::new() })
}

/// Pull the `encoding="..."` label out of the raw prolog bytes, if any.
///
/// Only the XML declaration is inspected; it is ASCII by definition, so the
/// scan stops at its closing `?>` and never touches document content, which
/// may be in the very charset being declared.
fn sniff_encoding(bytes: &[u8]) -> Option<Charset> {
    let bytes = bytes.strip_prefix(b"\xef\xbb\xbf").unwrap_or(bytes);
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace())?;
    let head = &bytes[start..];
    if !head.starts_with(b"<?xml") {
        return None;
    }
    let head = &head[..head.len().min(256)];
    let end = head.windows(2).position(|w| w == b"?>")?;
    let text = std::str::from_utf8(&head[..end]).ok()?;
    let at = text.find("encoding=")? + "encoding=".len();
    let rest = &text[at..];
    let quote = rest.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let rest = &rest[1..];
    let end = rest.find(quote)?;
    Charset::from_label(&rest[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charset::Utf8Transcoder;

    #[test]
    fn parse_simple_envelope() {
        let doc = Document::parse(
            "<?xml version=\"1.0\" encoding=\"GB2312\"?>\r\n\
             <Query>\r\n<CmdType>Catalog</CmdType>\r\n<SN>17430</SN>\r\n\
             <DeviceID>34020000001110000001</DeviceID>\r\n</Query>\r\n",
        )
        .unwrap();
        assert_eq!(doc.encoding, Some(Charset::Gb2312));
        assert_eq!(doc.root.name, "Query");
        assert_eq!(doc.root.child_text("CmdType"), Some("Catalog"));
        assert_eq!(doc.root.child_parse::<u32>("SN"), Some(17430));
    }

    #[test]
    fn parse_nested_and_escaped() {
        let doc = Document::parse(
            "<Response><CmdType>Catalog</CmdType><DeviceList Num=\"1\">\
             <Item><Name>A &amp; B</Name></Item></DeviceList></Response>",
        )
        .unwrap();
        let list = doc.root.child("DeviceList").unwrap();
        assert_eq!(list.attr("Num"), Some("1"));
        assert_eq!(list.children.len(), 1);
        assert_eq!(list.children[0].child_text("Name"), Some("A & B"));
    }

    #[test]
    fn serialize_escapes_text() {
        let doc = Document {
            encoding: Some(Charset::Utf8),
            root: XmlNode::branch("Notify", vec![XmlNode::leaf("Reason", "a<b")]),
        };
        let text = doc.serialize();
        assert!(text.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\r\n"));
        assert!(text.contains("<Reason>a&lt;b</Reason>"));
        // Serialized text parses back to the same tree.
        assert_eq!(Document::parse(&text).unwrap().root, doc.root);
    }

    #[test]
    fn malformed_input_is_rejected() {
        assert!(Document::parse("<Query><CmdType>Catalog</Query>").is_err());
        assert!(Document::parse("   ").is_err());
    }

    #[test]
    fn sniffs_wire_encoding() {
        let bytes = b"<?xml version=\"1.0\" encoding=\"GB2312\"?>\r\n<Query><CmdType>x</CmdType></Query>";
        assert_eq!(sniff_encoding(bytes), Some(Charset::Gb2312));
        // Utf8Transcoder refuses GB2312 -> UTF-8, which is surfaced as a charset error.
        assert!(Document::from_wire(bytes, &Utf8Transcoder).is_err());
    }

    #[test]
    fn sniff_survives_native_bytes_after_the_prolog() {
        // A GB2312 body carries high bytes right after the declaration; the
        // sniff must still read the declared charset.
        let mut bytes =
            b"<?xml version=\"1.0\" encoding=\"GB2312\"?>\r\n<Notify><DeviceName>".to_vec();
        bytes.extend_from_slice(&[0xC9, 0xE3, 0xCF, 0xF1, 0xBB, 0xFA]);
        bytes.extend_from_slice(b"</DeviceName></Notify>");
        assert_eq!(sniff_encoding(&bytes), Some(Charset::Gb2312));

        // No declaration at all falls through to the UTF-8 default.
        assert_eq!(sniff_encoding(b"<Notify/>"), None);
    }
}
