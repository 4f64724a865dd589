// Lenient HTML element tree for the sandboxed preview document
// Parses generated markup into a mutable tree, supports the structural
// edits the runtime performs, and serializes back to HTML. Tolerant of
// the imperfect markup a model produces: unmatched close tags are
// dropped, unterminated elements are closed at end of input, and text
// is carried verbatim (entities are never decoded, so a parse/serialize
// round trip does not rewrite untouched content.)

/// Elements with no closing tag
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Elements whose content is raw text, not markup
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    /// Lowercase tag name
    pub tag: String,
    /// Attributes in document order
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, name: &str, value: &str) {
        if let Some(entry) = self
            .attrs
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            entry.1 = value.to_string();
        } else {
            self.attrs.push((name.to_ascii_lowercase(), value.to_string()));
        }
    }

    pub fn remove_attr(&mut self, name: &str) {
        self.attrs.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// Inline style declarations, parsed from the `style` attribute
    pub fn inline_styles(&self) -> Vec<(String, String)> {
        let Some(style) = self.attr("style") else {
            return Vec::new();
        };
        style
            .split(';')
            .filter_map(|decl| {
                let (prop, value) = decl.split_once(':')?;
                let prop = prop.trim().to_ascii_lowercase();
                let value = value.trim().to_string();
                if prop.is_empty() || value.is_empty() {
                    None
                } else {
                    Some((prop, value))
                }
            })
            .collect()
    }

    /// Set one inline style property, preserving the others
    pub fn set_style_property(&mut self, property: &str, value: &str) {
        let property = property.trim().to_ascii_lowercase();
        let mut styles = self.inline_styles();
        if let Some(entry) = styles.iter_mut().find(|(p, _)| *p == property) {
            entry.1 = value.trim().to_string();
        } else {
            styles.push((property, value.trim().to_string()));
        }
        let rendered = styles
            .iter()
            .map(|(p, v)| format!("{}: {}", p, v))
            .collect::<Vec<_>>()
            .join("; ");
        self.set_attr("style", &rendered);
    }

    /// Concatenated descendant text content
    pub fn inner_text(&self) -> String {
        let mut out = String::new();
        collect_text(&self.children, &mut out);
        out.trim().to_string()
    }

    /// Replace children with a single escaped text node
    pub fn set_inner_text(&mut self, text: &str) {
        self.children = vec![Node::Text(escape_text(text))];
    }

    pub fn inner_html(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            serialize_node(child, &mut out);
        }
        out
    }

    pub fn outer_html(&self) -> String {
        let mut out = String::new();
        serialize_node_element(self, &mut out);
        out
    }

    /// Drop an attribute from this element and every descendant
    pub fn remove_attr_recursive(&mut self, name: &str) {
        self.remove_attr(name);
        for child in &mut self.children {
            if let Node::Element(el) = child {
                el.remove_attr_recursive(name);
            }
        }
    }
}

fn collect_text(nodes: &[Node], out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    if !out.is_empty() {
                        out.push(' ');
                    }
                    out.push_str(trimmed);
                }
            }
            Node::Element(el) => collect_text(&el.children, out),
            Node::Comment(_) => {}
        }
    }
}

pub fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Path of child indices locating a node from the document root
pub type NodePath = Vec<usize>;

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Raw doctype line, kept verbatim
    pub doctype: Option<String>,
    pub nodes: Vec<Node>,
}

impl Document {
    pub fn parse(html: &str) -> Self {
        let mut parser = Parser::new(html);
        let nodes = parser.parse_all();
        Self {
            doctype: parser.doctype,
            nodes,
        }
    }

    /// Parse markup without document-level handling (no doctype capture)
    pub fn parse_fragment(html: &str) -> Vec<Node> {
        Parser::new(html).parse_all()
    }

    pub fn serialize(&self) -> String {
        let mut out = String::new();
        if let Some(doctype) = &self.doctype {
            // Whitespace after the doctype survives as a text node
            out.push_str(doctype);
        }
        for node in &self.nodes {
            serialize_node(node, &mut out);
        }
        out
    }

    /// Depth-first document-order search for the first matching element
    pub fn find_path<F>(&self, pred: F) -> Option<NodePath>
    where
        F: Fn(&Element) -> bool,
    {
        let mut path = Vec::new();
        if find_in(&self.nodes, &pred, &mut path) {
            Some(path)
        } else {
            None
        }
    }

    pub fn element(&self, path: &[usize]) -> Option<&Element> {
        match self.node(path)? {
            Node::Element(el) => Some(el),
            _ => None,
        }
    }

    pub fn element_mut(&mut self, path: &[usize]) -> Option<&mut Element> {
        match self.node_mut(path)? {
            Node::Element(el) => Some(el),
            _ => None,
        }
    }

    pub fn node(&self, path: &[usize]) -> Option<&Node> {
        let (&last, parents) = path.split_last()?;
        let mut nodes = &self.nodes;
        for &index in parents {
            match nodes.get(index)? {
                Node::Element(el) => nodes = &el.children,
                _ => return None,
            }
        }
        nodes.get(last)
    }

    pub fn node_mut(&mut self, path: &[usize]) -> Option<&mut Node> {
        let (&last, parents) = path.split_last()?;
        let mut nodes = &mut self.nodes;
        for &index in parents {
            match nodes.get_mut(index)? {
                Node::Element(el) => nodes = &mut el.children,
                _ => return None,
            }
        }
        nodes.get_mut(last)
    }

    /// The child list containing the node at `path`, plus its index
    pub fn siblings_mut(&mut self, path: &[usize]) -> Option<(&mut Vec<Node>, usize)> {
        let (&last, parents) = path.split_last()?;
        let mut nodes = &mut self.nodes;
        for &index in parents {
            match nodes.get_mut(index)? {
                Node::Element(el) => nodes = &mut el.children,
                _ => return None,
            }
        }
        if last < nodes.len() {
            Some((nodes, last))
        } else {
            None
        }
    }

    /// Element ancestors of the node at `path`, outermost first
    pub fn ancestor_elements(&self, path: &[usize]) -> Vec<&Element> {
        let mut ancestors = Vec::new();
        let mut nodes = &self.nodes;
        for &index in &path[..path.len().saturating_sub(1)] {
            match nodes.get(index) {
                Some(Node::Element(el)) => {
                    ancestors.push(el);
                    nodes = &el.children;
                }
                _ => break,
            }
        }
        ancestors
    }
}

fn find_in<F>(nodes: &[Node], pred: &F, path: &mut NodePath) -> bool
where
    F: Fn(&Element) -> bool,
{
    for (index, node) in nodes.iter().enumerate() {
        if let Node::Element(el) = node {
            path.push(index);
            if pred(el) || find_in(&el.children, pred, path) {
                return true;
            }
            path.pop();
        }
    }
    false
}

fn serialize_node(node: &Node, out: &mut String) {
    match node {
        Node::Text(text) => out.push_str(text),
        Node::Comment(comment) => {
            out.push_str("<!--");
            out.push_str(comment);
            out.push_str("-->");
        }
        Node::Element(el) => serialize_node_element(el, out),
    }
}

fn serialize_node_element(el: &Element, out: &mut String) {
    out.push('<');
    out.push_str(&el.tag);
    for (name, value) in &el.attrs {
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        out.push_str(&value.replace('"', "&quot;"));
        out.push('"');
    }
    out.push('>');
    if VOID_ELEMENTS.contains(&el.tag.as_str()) {
        return;
    }
    for child in &el.children {
        serialize_node(child, out);
    }
    out.push_str("</");
    out.push_str(&el.tag);
    out.push('>');
}

// ----------------------------------------------------------------------------
// Parser
// ----------------------------------------------------------------------------

struct Parser<'a> {
    input: &'a str,
    pos: usize,
    doctype: Option<String>,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            doctype: None,
        }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn parse_all(&mut self) -> Vec<Node> {
        let mut roots: Vec<Node> = Vec::new();
        let mut stack: Vec<Element> = Vec::new();

        while self.pos < self.input.len() {
            let rest = self.rest();
            if let Some(text_end) = rest.find('<') {
                if text_end > 0 {
                    push_node(&mut roots, &mut stack, Node::Text(rest[..text_end].to_string()));
                    self.pos += text_end;
                    continue;
                }
            } else {
                push_node(&mut roots, &mut stack, Node::Text(rest.to_string()));
                self.pos = self.input.len();
                break;
            }

            let rest = self.rest();
            if rest.starts_with("<!--") {
                let end = rest.find("-->").map(|i| i + 3).unwrap_or(rest.len());
                let comment = &rest[4..end.saturating_sub(3).max(4)];
                push_node(&mut roots, &mut stack, Node::Comment(comment.to_string()));
                self.pos += end;
            } else if rest.starts_with("<!") {
                let end = rest.find('>').map(|i| i + 1).unwrap_or(rest.len());
                let raw = &rest[..end];
                if self.doctype.is_none() && raw.to_ascii_lowercase().starts_with("<!doctype") {
                    self.doctype = Some(raw.to_string());
                }
                self.pos += end;
            } else if rest.starts_with("</") {
                let end = rest.find('>').map(|i| i + 1).unwrap_or(rest.len());
                let name = rest[2..end.saturating_sub(1)].trim().to_ascii_lowercase();
                self.pos += end;
                if let Some(open_index) = stack.iter().rposition(|el| el.tag == name) {
                    while stack.len() > open_index {
                        // Safe: loop condition guarantees a top element
                        if let Some(el) = stack.pop() {
                            push_node(&mut roots, &mut stack, Node::Element(el));
                        }
                    }
                }
                // Unmatched close tags are dropped
            } else if rest.len() > 1 && rest.as_bytes()[1].is_ascii_alphabetic() {
                self.parse_open_tag(&mut roots, &mut stack);
            } else {
                // Stray '<' that is not a tag; keep it as text
                push_node(&mut roots, &mut stack, Node::Text("<".to_string()));
                self.pos += 1;
            }
        }

        // Close anything left open at end of input
        while let Some(el) = stack.pop() {
            push_node(&mut roots, &mut stack, Node::Element(el));
        }
        roots
    }

    fn parse_open_tag(&mut self, roots: &mut Vec<Node>, stack: &mut Vec<Element>) {
        let rest = self.rest();
        let bytes = rest.as_bytes();
        let mut i = 1;
        while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'-') {
            i += 1;
        }
        let tag = rest[1..i].to_ascii_lowercase();
        let mut el = Element {
            tag: tag.clone(),
            attrs: Vec::new(),
            children: Vec::new(),
        };

        // Attributes
        let mut self_closing = false;
        loop {
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            if i >= bytes.len() {
                break;
            }
            if bytes[i] == b'>' {
                i += 1;
                break;
            }
            if bytes[i] == b'/' {
                self_closing = true;
                i += 1;
                continue;
            }
            let name_start = i;
            while i < bytes.len()
                && !bytes[i].is_ascii_whitespace()
                && bytes[i] != b'='
                && bytes[i] != b'>'
                && bytes[i] != b'/'
            {
                i += 1;
            }
            let name = rest[name_start..i].to_ascii_lowercase();
            let mut value = String::new();
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            if i < bytes.len() && bytes[i] == b'=' {
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                    i += 1;
                }
                if i < bytes.len() && (bytes[i] == b'"' || bytes[i] == b'\'') {
                    let quote = bytes[i];
                    i += 1;
                    let value_start = i;
                    while i < bytes.len() && bytes[i] != quote {
                        i += 1;
                    }
                    value = rest[value_start..i].to_string();
                    if i < bytes.len() {
                        i += 1;
                    }
                } else {
                    let value_start = i;
                    while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' {
                        i += 1;
                    }
                    value = rest[value_start..i].to_string();
                }
            }
            if !name.is_empty() {
                el.attrs.push((name, value));
            }
        }
        self.pos += i;

        if VOID_ELEMENTS.contains(&tag.as_str()) || self_closing {
            push_node(roots, stack, Node::Element(el));
        } else if RAW_TEXT_ELEMENTS.contains(&tag.as_str()) {
            // Raw content until the matching close tag
            let rest = self.rest();
            let close = format!("</{}", tag);
            let content_end = rest.to_ascii_lowercase().find(&close).unwrap_or(rest.len());
            if content_end > 0 {
                el.children.push(Node::Text(rest[..content_end].to_string()));
            }
            self.pos += content_end;
            let rest = self.rest();
            if let Some(end) = rest.find('>') {
                self.pos += end + 1;
            } else {
                self.pos = self.input.len();
            }
            push_node(roots, stack, Node::Element(el));
        } else {
            stack.push(el);
        }
    }
}

fn push_node(roots: &mut Vec<Node>, stack: &mut Vec<Element>, node: Node) {
    if let Some(top) = stack.last_mut() {
        top.children.push(node);
    } else {
        roots.push(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_serialize_roundtrip() {
        let html = "<!DOCTYPE html>\n<html><head><title>Hi</title></head><body><p class=\"lead\">Hello &amp; welcome</p></body></html>";
        let doc = Document::parse(html);
        assert_eq!(doc.doctype.as_deref(), Some("<!DOCTYPE html>"));
        assert_eq!(doc.serialize(), html);
    }

    #[test]
    fn test_void_elements_have_no_close_tag() {
        let doc = Document::parse("<div><img src=\"a.png\"><br></div>");
        assert_eq!(doc.serialize(), "<div><img src=\"a.png\"><br></div>");
    }

    #[test]
    fn test_unmatched_close_tag_is_dropped() {
        let doc = Document::parse("<div><p>text</span></p></div>");
        assert_eq!(doc.serialize(), "<div><p>text</p></div>");
    }

    #[test]
    fn test_unterminated_element_closed_at_eof() {
        let doc = Document::parse("<div><p>partial");
        assert_eq!(doc.serialize(), "<div><p>partial</p></div>");
    }

    #[test]
    fn test_script_content_is_raw() {
        let html = "<script>if (a < b) { go(); }</script>";
        let doc = Document::parse(html);
        assert_eq!(doc.serialize(), html);
    }

    #[test]
    fn test_find_path_and_ancestors() {
        let doc = Document::parse("<div id=\"outer\"><section><p id=\"target\">x</p></section></div>");
        let path = doc
            .find_path(|el| el.attr("id") == Some("target"))
            .unwrap();
        let ancestors = doc.ancestor_elements(&path);
        let tags: Vec<&str> = ancestors.iter().map(|el| el.tag.as_str()).collect();
        assert_eq!(tags, vec!["div", "section"]);
    }

    #[test]
    fn test_siblings_mut_reorder() {
        let mut doc = Document::parse("<ul><li>a</li><li>b</li></ul>");
        let path = doc.find_path(|el| el.inner_text() == "b").unwrap();
        let (siblings, index) = doc.siblings_mut(&path).unwrap();
        siblings.swap(index - 1, index);
        assert_eq!(doc.serialize(), "<ul><li>b</li><li>a</li></ul>");
    }

    #[test]
    fn test_style_property_set_preserves_others() {
        let mut el = Element::new("div");
        el.set_attr("style", "color: red; margin: 4px");
        el.set_style_property("color", "blue");
        el.set_style_property("padding", "2px");
        let styles = el.inline_styles();
        assert!(styles.contains(&("color".to_string(), "blue".to_string())));
        assert!(styles.contains(&("margin".to_string(), "4px".to_string())));
        assert!(styles.contains(&("padding".to_string(), "2px".to_string())));
    }

    #[test]
    fn test_inner_text_concatenates_descendants() {
        let doc = Document::parse("<div>Hello <b>brave</b> world</div>");
        let path = doc.find_path(|el| el.tag == "div").unwrap();
        assert_eq!(doc.element(&path).unwrap().inner_text(), "Hello brave world");
    }

    #[test]
    fn test_set_inner_text_escapes_markup() {
        let mut el = Element::new("p");
        el.set_inner_text("a < b & c");
        assert_eq!(el.inner_html(), "a &lt; b &amp; c");
    }

    #[test]
    fn test_unquoted_and_single_quoted_attrs() {
        let doc = Document::parse("<input type=text value='hi'>");
        let path = doc.find_path(|el| el.tag == "input").unwrap();
        let el = doc.element(&path).unwrap();
        assert_eq!(el.attr("type"), Some("text"));
        assert_eq!(el.attr("value"), Some("hi"));
    }
}
