mod node;
mod parse;

use std::{
    cell::RefCell,
    collections::HashMap,
    io::{Read, Write},
    rc::Rc,
};

use url::Url;

use crate::{
    CaseFolding, WhitespaceHandling,
    dtd::Dtd,
    entity::Entity,
    error::SgmlError,
    handler::{
        DefaultDtdResolver, DefaultEntityResolver, DtdResolver, EntityResolver, ErrorHandler,
        SilentErrorHandler, WriteErrorHandler,
    },
    save,
};

pub use node::{NodeType, XmlSpace};
pub(crate) use node::Node;
use node::HwStack;

/// Internal state of the pull machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub(crate) enum ReaderState {
    #[default]
    Initial,
    Markup,
    EndTag,
    PartialTag,
    PseudoStartTag,
    AutoClose,
    CData,
    Attr,
    AttrValue,
    Text,
    PartialText,
    Eof,
}

/// What to do once the scheduled EndElement events have all been emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum AfterClose {
    #[default]
    Markup,
    /// Push the detached pending start tag and report it.
    PushPending,
    /// End of input; every open element has been closed.
    Eof,
}

/// Deferred continuation for the CDATA-content parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum Pending {
    #[default]
    None,
    ResumeComment,
    ResumePi,
    ResumeEnd,
}

/// Coarse reader lifecycle, as seen by the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadState {
    Initial,
    Interactive,
    EndOfFile,
    Closed,
}

pub(crate) enum InputKind {
    Href(String),
    Stream(Box<dyn Read>),
    Content(String),
}

/// A pull-mode reader over SGML/HTML input producing a well-formed XML event
/// sequence, repairing malformed markup with DTD guidance.
///
/// Drive it with [`read`](Self::read); the accessor methods describe the
/// current node.
pub struct SgmlReader {
    // configuration
    resolver: Box<dyn EntityResolver>,
    dtd_resolver: Box<dyn DtdResolver>,
    pub(crate) error_handler: Box<dyn ErrorHandler>,
    doc_type: Option<String>,
    public_id: Option<String>,
    system_literal: Option<String>,
    internal_subset: Option<String>,
    ignore_dtd: bool,
    strip_doc_type: bool,
    folding: CaseFolding,
    whitespace_handling: WhitespaceHandling,
    proxy: Option<String>,
    base_uri: Option<Url>,
    default_encoding: Option<String>,

    // parse state
    dtd: Option<Rc<Dtd>>,
    pub(crate) current: Box<Entity>,
    input: Option<InputKind>,
    state: ReaderState,
    stack: HwStack,
    /// Start tag detached from the stack while auto-close runs.
    pending_node: Option<Node>,
    /// EndElement events still to be emitted by the close machinery.
    close_count: usize,
    after_close: AfterClose,
    pending: Pending,
    /// State to adopt once a pending leaf stashed for root injection has been
    /// attached and reported.
    pending_state: ReaderState,
    /// Lookahead stashed when text emission interrupts tag recognition.
    partial_char: char,
    /// Element name stashed while a simulated root is being reported.
    pseudo_name: String,
    root_found: bool,
    current_attribute: isize,
    sb: String,
    closed: bool,

    unknown_prefixes: RefCell<HashMap<String, String>>,
}

impl SgmlReader {
    pub fn new() -> Self {
        Self {
            resolver: Box::new(DefaultEntityResolver),
            dtd_resolver: Box::new(DefaultDtdResolver),
            error_handler: Box::new(SilentErrorHandler),
            doc_type: None,
            public_id: None,
            system_literal: None,
            internal_subset: None,
            ignore_dtd: false,
            strip_doc_type: false,
            folding: CaseFolding::default(),
            whitespace_handling: WhitespaceHandling::default(),
            proxy: None,
            base_uri: None,
            default_encoding: None,
            dtd: None,
            current: Box::new(Entity::default()),
            input: None,
            state: ReaderState::Initial,
            stack: HwStack::default(),
            pending_node: None,
            close_count: 0,
            after_close: AfterClose::Markup,
            pending: Pending::None,
            pending_state: ReaderState::Text,
            partial_char: '\0',
            pseudo_name: String::new(),
            root_found: false,
            current_attribute: -1,
            sb: String::new(),
            closed: false,
            unknown_prefixes: RefCell::new(HashMap::new()),
        }
    }

    /// Reset parse state, keeping configuration and any loaded DTD.
    fn reset_context(&mut self) {
        self.current = Box::new(Entity::default());
        self.input = None;
        self.state = ReaderState::Initial;
        self.stack.clear();
        self.pending_node = None;
        self.close_count = 0;
        self.after_close = AfterClose::Markup;
        self.pending = Pending::None;
        self.pending_state = ReaderState::Text;
        self.partial_char = '\0';
        self.pseudo_name.clear();
        self.root_found = false;
        self.current_attribute = -1;
        self.closed = false;
        self.unknown_prefixes.borrow_mut().clear();
    }

    /// Parse a document held in a string.
    pub fn parse_str(&mut self, content: &str) -> Result<(), SgmlError> {
        self.reset_context();
        self.input = Some(InputKind::Content(content.to_owned()));
        Ok(())
    }

    /// Parse the document the absolute or base-relative URI refers to.
    pub fn parse_uri(&mut self, uri: &str) -> Result<(), SgmlError> {
        self.reset_context();
        self.input = Some(InputKind::Href(uri.to_owned()));
        Ok(())
    }

    /// Parse a document supplied as a byte stream; the encoding is detected
    /// from its head.
    pub fn parse_reader(&mut self, reader: impl Read + 'static) -> Result<(), SgmlError> {
        self.reset_context();
        self.input = Some(InputKind::Stream(Box::new(reader)));
        Ok(())
    }

    /// The DTD in effect, once loaded.
    pub fn dtd(&self) -> Option<&Rc<Dtd>> {
        self.dtd.as_ref()
    }

    pub(crate) fn is_html(&self) -> bool {
        self.current.is_html()
            || self
                .doc_type
                .as_deref()
                .is_some_and(|d| d.eq_ignore_ascii_case("html"))
    }

    fn current_node(&self) -> Option<&Node> {
        self.stack
            .top()
            .filter(|node| node.node_type != NodeType::Document)
    }

    pub fn node_type(&self) -> NodeType {
        match self.state {
            ReaderState::Attr => NodeType::Attribute,
            ReaderState::AttrValue => NodeType::Text,
            _ => self
                .current_node()
                .map(|node| node.node_type)
                .unwrap_or_default(),
        }
    }

    pub fn name(&self) -> &str {
        if self.current_attribute >= 0 && self.state == ReaderState::Attr {
            return self
                .attribute(self.current_attribute as usize)
                .map(|a| a.name.as_str())
                .unwrap_or("");
        }
        self.current_node().map(|node| node.name.as_str()).unwrap_or("")
    }

    /// The part of the name after a namespace prefix, if any.
    pub fn local_name(&self) -> &str {
        let name = self.name();
        name.split_once(':').map(|(_, local)| local).unwrap_or(name)
    }

    /// The namespace prefix of the current name, or the empty string.
    pub fn prefix(&self) -> &str {
        self.name().split_once(':').map(|(p, _)| p).unwrap_or("")
    }

    /// Resolve the current name's prefix against `xmlns:*` declarations on the
    /// open-element stack.
    ///
    /// SGML has no namespaces; `xmlns` attributes pass through verbatim, and a
    /// prefix with no matching declaration receives the stable synthetic URI
    /// `#unknown` (`#unknownN` for the Nth distinct unknown prefix).
    pub fn namespace_uri(&self) -> Option<String> {
        let on_attribute = matches!(self.state, ReaderState::Attr | ReaderState::AttrValue);
        let name = if on_attribute {
            self.attribute(self.current_attribute.max(0) as usize)
                .map(|a| a.name.as_str())
                .unwrap_or("")
        } else {
            self.current_node().map(|n| n.name.as_str()).unwrap_or("")
        };
        if name == "xmlns" || name.starts_with("xmlns:") {
            return None;
        }
        match name.split_once(':') {
            Some((prefix, _)) => {
                let declaration = format!("xmlns:{prefix}");
                for i in (0..self.stack.len()).rev() {
                    let node = self.stack.get(i)?;
                    if node.node_type != NodeType::Element {
                        continue;
                    }
                    if let Some(a) = node.find_attribute(&declaration) {
                        return node.attributes()[a].value().map(ToOwned::to_owned);
                    }
                }
                let mut unknown = self.unknown_prefixes.borrow_mut();
                let next = unknown.len();
                Some(
                    unknown
                        .entry(prefix.to_owned())
                        .or_insert_with(|| {
                            if next == 0 {
                                "#unknown".to_owned()
                            } else {
                                format!("#unknown{next}")
                            }
                        })
                        .clone(),
                )
            }
            None if !on_attribute => {
                // default namespace applies to elements only
                for i in (0..self.stack.len()).rev() {
                    let node = self.stack.get(i)?;
                    if node.node_type != NodeType::Element {
                        continue;
                    }
                    if let Some(a) = node.find_attribute("xmlns") {
                        return node.attributes()[a].value().map(ToOwned::to_owned);
                    }
                }
                None
            }
            None => None,
        }
    }

    pub fn value(&self) -> &str {
        if self.current_attribute >= 0 {
            return self
                .attribute(self.current_attribute as usize)
                .and_then(|a| a.value())
                .unwrap_or("");
        }
        self.current_node().map(|node| node.value.as_str()).unwrap_or("")
    }

    /// Nesting depth of the current node; the root element is at depth 0.
    /// Attribute and attribute-value positions add one and two respectively.
    pub fn depth(&self) -> usize {
        let base = self.stack.len().saturating_sub(2);
        match self.state {
            ReaderState::Attr => base + 1,
            ReaderState::AttrValue => base + 2,
            _ => base,
        }
    }

    pub fn base_uri(&self) -> Option<&Url> {
        self.current.resolved_uri().or(self.base_uri.as_ref())
    }

    pub fn is_empty_element(&self) -> bool {
        self.current_node()
            .is_some_and(|node| node.node_type == NodeType::Element && node.is_empty)
    }

    /// True when a simulated wrapper (e.g. an injected `<html>`) is current.
    pub fn is_simulated(&self) -> bool {
        self.current_node().is_some_and(|node| node.simulated)
    }

    /// True when the current attribute reports a DTD default rather than a
    /// value present in the source.
    pub fn is_default(&self) -> bool {
        self.current_attribute >= 0
            && self
                .attribute(self.current_attribute as usize)
                .is_some_and(|a| a.is_default())
    }

    pub fn quote_char(&self) -> char {
        if self.current_attribute >= 0 {
            return self
                .attribute(self.current_attribute as usize)
                .map(|a| a.quote_char)
                .unwrap_or('"');
        }
        '"'
    }

    /// The `xml:space` scope in effect, inherited down the open-element stack.
    pub fn xml_space(&self) -> XmlSpace {
        for i in (0..self.stack.len()).rev() {
            if let Some(node) = self.stack.get(i)
                && node.space != XmlSpace::None
            {
                return node.space;
            }
        }
        XmlSpace::None
    }

    /// The `xml:lang` scope in effect, inherited down the open-element stack.
    pub fn xml_lang(&self) -> &str {
        for i in (0..self.stack.len()).rev() {
            if let Some(node) = self.stack.get(i)
                && !node.lang.is_empty()
            {
                return &node.lang;
            }
        }
        ""
    }

    fn attribute(&self, i: usize) -> Option<&node::Attribute> {
        self.current_node()
            .filter(|node| node.node_type == NodeType::Element)
            .and_then(|node| node.attributes().get(i))
    }

    pub fn attribute_count(&self) -> usize {
        self.current_node()
            .filter(|node| node.node_type == NodeType::Element)
            .map(|node| node.attributes().len())
            .unwrap_or(0)
    }

    /// The value of the `i`-th attribute, including DTD defaults.
    pub fn get_attribute(&self, i: usize) -> Option<&str> {
        self.attribute(i).and_then(|a| a.value())
    }

    /// The value of the named attribute (case-insensitive).
    pub fn get_attribute_by_name(&self, name: &str) -> Option<&str> {
        let node = self.current_node()?;
        let i = node.find_attribute(name)?;
        node.attributes()[i].value()
    }

    pub fn attribute_name(&self, i: usize) -> Option<&str> {
        self.attribute(i).map(|a| a.name.as_str())
    }

    pub fn move_to_attribute(&mut self, i: usize) -> bool {
        if i >= self.attribute_count() {
            return false;
        }
        if !matches!(self.state, ReaderState::Attr | ReaderState::AttrValue) {
            if let Some(node) = self.stack.top_mut() {
                node.state = self.state;
            }
        }
        self.state = ReaderState::Attr;
        self.current_attribute = i as isize;
        true
    }

    pub fn move_to_attribute_by_name(&mut self, name: &str) -> bool {
        match self.current_node().and_then(|node| node.find_attribute(name)) {
            Some(i) => self.move_to_attribute(i),
            None => false,
        }
    }

    pub fn move_to_first_attribute(&mut self) -> bool {
        self.move_to_attribute(0)
    }

    pub fn move_to_next_attribute(&mut self) -> bool {
        if self.current_attribute < 0 {
            return self.move_to_first_attribute();
        }
        self.move_to_attribute(self.current_attribute as usize + 1)
    }

    /// Return from attribute navigation to the owning element.
    pub fn move_to_element(&mut self) -> bool {
        if !matches!(self.state, ReaderState::Attr | ReaderState::AttrValue) {
            return false;
        }
        self.current_attribute = -1;
        self.state = self
            .stack
            .top()
            .map(|node| node.state)
            .unwrap_or(ReaderState::Markup);
        true
    }

    /// Position on the text of the current attribute.
    pub fn read_attribute_value(&mut self) -> bool {
        match self.state {
            ReaderState::Attr => {
                self.state = ReaderState::AttrValue;
                true
            }
            _ => false,
        }
    }

    pub fn eof(&self) -> bool {
        self.state == ReaderState::Eof
    }

    pub fn read_state(&self) -> ReadState {
        if self.closed {
            ReadState::Closed
        } else {
            match self.state {
                ReaderState::Initial => ReadState::Initial,
                ReaderState::Eof => ReadState::EndOfFile,
                _ => ReadState::Interactive,
            }
        }
    }

    /// Dispose the entity chain. Every entity is closed, in LIFO order.
    pub fn close(&mut self) {
        while self.current.parent.is_some() {
            Entity::pop(&mut self.current).ok();
        }
        self.current.close();
        self.state = ReaderState::Eof;
        self.closed = true;
    }

    /// The name of the encoding the current entity is being decoded with.
    pub fn get_encoding(&self) -> &'static str {
        self.current.encoding_name()
    }

    /// Concatenated text content from the current position up to the next
    /// non-text node.
    pub fn read_string(&mut self) -> Result<String, SgmlError> {
        self.move_to_element();
        let mut out = String::new();
        match self.node_type() {
            NodeType::Element if !self.is_empty_element() => {
                while self.read()? {
                    match self.node_type() {
                        NodeType::Text | NodeType::Whitespace | NodeType::CData => {
                            out.push_str(self.value());
                        }
                        _ => break,
                    }
                }
            }
            NodeType::Text | NodeType::Whitespace | NodeType::CData => loop {
                out.push_str(self.value());
                if !self.read()?
                    || !matches!(
                        self.node_type(),
                        NodeType::Text | NodeType::Whitespace | NodeType::CData
                    )
                {
                    break;
                }
            },
            _ => {}
        }
        Ok(out)
    }

    /// Serialize the current element's content as XML text, advancing past the
    /// element.
    pub fn read_inner_xml(&mut self) -> Result<String, SgmlError> {
        self.serialize_subtree(false)
    }

    /// Serialize the current node (markup included) as XML text, advancing
    /// past it.
    pub fn read_outer_xml(&mut self) -> Result<String, SgmlError> {
        self.serialize_subtree(true)
    }

    fn serialize_subtree(&mut self, outer: bool) -> Result<String, SgmlError> {
        self.move_to_element();
        let mut out = String::new();
        match self.node_type() {
            NodeType::Element => {
                let mut self_closed = Vec::new();
                let mut balance = 0usize;
                loop {
                    match self.node_type() {
                        NodeType::Element => {
                            let write = outer || balance > 0;
                            if write {
                                self.write_element_start(&mut out);
                            }
                            self_closed.push((write, self.is_empty_element()));
                            balance += 1;
                        }
                        NodeType::EndElement => {
                            balance -= 1;
                            if let Some((write, self_closed)) = self_closed.pop()
                                && write
                                && !self_closed
                            {
                                save::write_end_tag(&mut out, self.name());
                            }
                            if balance == 0 {
                                self.read()?;
                                break;
                            }
                        }
                        _ => self.write_leaf(&mut out),
                    }
                    if !self.read()? {
                        break;
                    }
                }
            }
            NodeType::None => {}
            _ => {
                if outer {
                    self.write_leaf(&mut out);
                }
                self.read()?;
            }
        }
        Ok(out)
    }

    fn write_element_start(&self, out: &mut String) {
        let node = match self.current_node() {
            Some(node) => node,
            None => return,
        };
        save::write_start_tag(
            out,
            &node.name,
            node.attributes()
                .iter()
                .filter_map(|a| a.value().map(|v| (a.name.as_str(), v))),
            node.is_empty,
        );
    }

    fn write_leaf(&self, out: &mut String) {
        let node = match self.current_node() {
            Some(node) => node,
            None => return,
        };
        save::write_leaf_node(out, node);
    }
}

impl Default for SgmlReader {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`SgmlReader`].
pub struct SgmlReaderBuilder {
    reader: SgmlReader,
}

impl SgmlReaderBuilder {
    pub fn new() -> Self {
        Self {
            reader: SgmlReader::new(),
        }
    }

    /// Override the document type root name. `"html"` selects the embedded
    /// HTML DTD and HTML repair behavior.
    pub fn doc_type(mut self, doc_type: &str) -> Self {
        self.reader.doc_type = Some(doc_type.to_owned());
        self
    }

    /// Override the DOCTYPE public identifier.
    pub fn public_identifier(mut self, public_id: &str) -> Self {
        self.reader.public_id = Some(public_id.to_owned());
        self
    }

    /// Override the DOCTYPE system literal (the DTD URI).
    pub fn system_literal(mut self, system_literal: &str) -> Self {
        self.reader.system_literal = Some(system_literal.to_owned());
        self
    }

    /// Override the DOCTYPE internal subset.
    pub fn internal_subset(mut self, subset: &str) -> Self {
        self.reader.internal_subset = Some(subset.to_owned());
        self
    }

    /// Skip DTD loading entirely; repair degrades to end-tag matching.
    pub fn ignore_dtd(mut self, ignore: bool) -> Self {
        self.reader.ignore_dtd = ignore;
        self
    }

    /// Suppress the DocumentType node.
    pub fn strip_doc_type(mut self, strip: bool) -> Self {
        self.reader.strip_doc_type = strip;
        self
    }

    pub fn case_folding(mut self, folding: CaseFolding) -> Self {
        self.reader.folding = folding;
        self
    }

    pub fn whitespace_handling(mut self, handling: WhitespaceHandling) -> Self {
        self.reader.whitespace_handling = handling;
        self
    }

    /// Opaque proxy string passed through to the entity resolver.
    pub fn web_proxy(mut self, proxy: &str) -> Self {
        self.reader.proxy = Some(proxy.to_owned());
        self
    }

    pub fn base_uri(mut self, base_uri: impl Into<Url>) -> Self {
        self.reader.base_uri = Some(base_uri.into());
        self
    }

    /// Encoding to assume when the input carries no byte order mark or
    /// in-stream declaration.
    pub fn encoding(mut self, encoding: &str) -> Self {
        self.reader.default_encoding = Some(encoding.to_owned());
        self
    }

    /// Report diagnostics line by line to `sink`.
    pub fn error_log(mut self, sink: impl Write + 'static) -> Self {
        self.reader.error_handler = Box::new(WriteErrorHandler::new(sink));
        self
    }

    /// Report diagnostics to the named file.
    pub fn error_log_file(mut self, path: &str) -> Result<Self, SgmlError> {
        let file = std::fs::File::create(path)?;
        self.reader.error_handler = Box::new(WriteErrorHandler::new(file));
        Ok(self)
    }

    pub fn entity_resolver(mut self, resolver: impl EntityResolver + 'static) -> Self {
        self.reader.resolver = Box::new(resolver);
        self
    }

    pub fn dtd_resolver(mut self, resolver: impl DtdResolver + 'static) -> Self {
        self.reader.dtd_resolver = Box::new(resolver);
        self
    }

    pub fn error_handler(mut self, handler: impl ErrorHandler + 'static) -> Self {
        self.reader.error_handler = Box::new(handler);
        self
    }

    /// Share a DTD parsed ahead of time; it is immutable after parse.
    pub fn dtd(mut self, dtd: Rc<Dtd>) -> Self {
        self.reader.dtd = Some(dtd);
        self
    }

    /// Read the document from a byte stream.
    pub fn input_stream(mut self, stream: impl Read + 'static) -> Self {
        self.reader.input = Some(InputKind::Stream(Box::new(stream)));
        self
    }

    /// Read the document from a URI.
    pub fn href(mut self, uri: &str) -> Self {
        self.reader.input = Some(InputKind::Href(uri.to_owned()));
        self
    }

    pub fn build(self) -> SgmlReader {
        self.reader
    }
}

impl Default for SgmlReaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}
