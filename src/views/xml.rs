//! Minimal XML document tree used by view fragments and module data files.
//!
//! This is deliberately not a general XML implementation: no namespaces, no
//! DTDs, no processing beyond an optional leading prolog. It parses the
//! element/attribute/text subset the platform's view and data files use,
//! tracks line numbers for error reporting, and serializes compactly.

use crate::core::error::ChassisError;

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub tag: String,
    /// Attributes in document order.
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
    /// 1-based source line of the opening tag (0 for synthetic elements).
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
}

impl Element {
    pub fn new(tag: &str) -> Element {
        Element {
            tag: tag.to_string(),
            attrs: Vec::new(),
            children: Vec::new(),
            line: 0,
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(el) => Some(el),
            Node::Text(_) => None,
        })
    }

    /// Serialize this element's children, without the enclosing tag.
    pub fn inner_markup(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            write_node(&mut out, child);
        }
        out
    }

    pub fn to_markup(&self) -> String {
        let mut out = String::new();
        write_element(&mut out, self);
        out
    }
}

fn write_node(out: &mut String, node: &Node) {
    match node {
        Node::Element(el) => write_element(out, el),
        Node::Text(text) => out.push_str(&escape_text(text)),
    }
}

fn write_element(out: &mut String, el: &Element) {
    out.push('<');
    out.push_str(&el.tag);
    for (name, value) in &el.attrs {
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        out.push_str(&escape_attr(value));
        out.push('"');
    }
    if el.children.is_empty() {
        out.push_str("/>");
    } else {
        out.push('>');
        for child in &el.children {
            write_node(out, child);
        }
        out.push_str("</");
        out.push_str(&el.tag);
        out.push('>');
    }
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(value: &str) -> String {
    escape_text(value).replace('"', "&quot;")
}

/// Parse a document with a single root element. `file` is used for error
/// messages only.
pub fn parse_document(input: &str, file: &str) -> Result<Element, ChassisError> {
    let mut parser = Parser {
        chars: input.chars().collect(),
        pos: 0,
        line: 1,
        file: file.to_string(),
    };
    parser.skip_misc()?;
    let root = parser.parse_element()?;
    parser.skip_misc()?;
    if !parser.at_end() {
        return Err(parser.error("unexpected content after document root"));
    }
    Ok(root)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    file: String,
}

impl Parser {
    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if let Some(c) = c {
            if c == '\n' {
                self.line += 1;
            }
            self.pos += 1;
        }
        c
    }

    fn starts_with(&self, s: &str) -> bool {
        let mut i = self.pos;
        for c in s.chars() {
            if self.chars.get(i) != Some(&c) {
                return false;
            }
            i += 1;
        }
        true
    }

    fn consume(&mut self, s: &str) -> bool {
        if self.starts_with(s) {
            for _ in s.chars() {
                self.bump();
            }
            true
        } else {
            false
        }
    }

    fn error(&self, message: &str) -> ChassisError {
        ChassisError::XmlImport {
            file: self.file.clone(),
            line: self.line,
            message: message.to_string(),
        }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    /// Skip whitespace, comments and an optional prolog between elements.
    fn skip_misc(&mut self) -> Result<(), ChassisError> {
        loop {
            self.skip_whitespace();
            if self.starts_with("<?") {
                while !self.at_end() && !self.consume("?>") {
                    self.bump();
                }
            } else if self.starts_with("<!--") {
                self.skip_comment()?;
            } else {
                return Ok(());
            }
        }
    }

    fn skip_comment(&mut self) -> Result<(), ChassisError> {
        let start_line = self.line;
        self.consume("<!--");
        while !self.at_end() {
            if self.consume("-->") {
                return Ok(());
            }
            self.bump();
        }
        Err(ChassisError::XmlImport {
            file: self.file.clone(),
            line: start_line,
            message: "unterminated comment".to_string(),
        })
    }

    fn parse_name(&mut self) -> Result<String, ChassisError> {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == '-' || c == '.' || c == ':' {
                name.push(c);
                self.bump();
            } else {
                break;
            }
        }
        if name.is_empty() {
            return Err(self.error("expected a name"));
        }
        Ok(name)
    }

    fn parse_element(&mut self) -> Result<Element, ChassisError> {
        let line = self.line;
        if !self.consume("<") {
            return Err(self.error("expected '<'"));
        }
        let tag = self.parse_name()?;
        let mut attrs = Vec::new();

        loop {
            self.skip_whitespace();
            match self.peek() {
                Some('/') => {
                    self.bump();
                    if !self.consume(">") {
                        return Err(self.error("expected '>' after '/'"));
                    }
                    return Ok(Element {
                        tag,
                        attrs,
                        children: Vec::new(),
                        line,
                    });
                }
                Some('>') => {
                    self.bump();
                    break;
                }
                Some(_) => {
                    let name = self.parse_name()?;
                    self.skip_whitespace();
                    if !self.consume("=") {
                        return Err(self.error("expected '=' after attribute name"));
                    }
                    self.skip_whitespace();
                    let value = self.parse_attr_value()?;
                    if attrs.iter().any(|(k, _)| *k == name) {
                        return Err(self.error(&format!("duplicate attribute '{}'", name)));
                    }
                    attrs.push((name, value));
                }
                None => return Err(self.error("unexpected end of input in tag")),
            }
        }

        let children = self.parse_children(&tag)?;
        Ok(Element {
            tag,
            attrs,
            children,
            line,
        })
    }

    fn parse_attr_value(&mut self) -> Result<String, ChassisError> {
        let quote = match self.peek() {
            Some(c @ ('"' | '\'')) => c,
            _ => return Err(self.error("expected quoted attribute value")),
        };
        self.bump();
        let mut value = String::new();
        loop {
            match self.bump() {
                Some(c) if c == quote => break,
                Some(c) => value.push(c),
                None => return Err(self.error("unterminated attribute value")),
            }
        }
        Ok(unescape(&value))
    }

    fn parse_children(&mut self, tag: &str) -> Result<Vec<Node>, ChassisError> {
        let mut children = Vec::new();
        let mut text = String::new();

        loop {
            if self.at_end() {
                return Err(self.error(&format!("unclosed element '{}'", tag)));
            }
            if self.starts_with("<!--") {
                flush_text(&mut children, &mut text);
                self.skip_comment()?;
            } else if self.starts_with("</") {
                flush_text(&mut children, &mut text);
                self.consume("</");
                let name = self.parse_name()?;
                if name != tag {
                    return Err(self.error(&format!(
                        "closing tag '</{}>' does not match '<{}>'",
                        name, tag
                    )));
                }
                self.skip_whitespace();
                if !self.consume(">") {
                    return Err(self.error("expected '>' in closing tag"));
                }
                return Ok(children);
            } else if self.starts_with("<") {
                flush_text(&mut children, &mut text);
                let child = self.parse_element()?;
                children.push(Node::Element(child));
            } else if let Some(c) = self.bump() {
                text.push(c);
            }
        }
    }
}

/// Inter-element whitespace is not significant for views; only keep text
/// nodes with visible content.
fn flush_text(children: &mut Vec<Node>, text: &mut String) {
    if !text.trim().is_empty() {
        children.push(Node::Text(unescape(text)));
    }
    text.clear();
}

fn unescape(input: &str) -> String {
    input
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
