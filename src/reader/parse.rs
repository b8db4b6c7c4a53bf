use crate::{
    CaseFolding,
    dtd::{AttributePresence, Dtd, contentspec::DeclaredContent},
    entity::{EOF_CHAR, Entity},
    error::{SgmlError, error, fatal_error, warning},
    reader::{
        AfterClose, InputKind, Node, NodeType, Pending, ReaderState, SgmlReader, XmlSpace,
    },
};

/// Start-tag name terminators.
const TAG_TERM: &str = " \t\r\n=/><";
/// Attribute name terminators.
const A_TERM: &str = " \t\r\n='\"/>";
/// Unquoted attribute value terminators.
const AV_TERM: &str = " \t\r\n>";
/// End-tag name terminators.
const ENDTAG_TERM: &str = " \t\r\n>";
/// Processing instruction target terminators.
const PI_TERM: &str = " \t\r\n?>";

impl SgmlReader {
    /// Advance to the next node. Returns `false` at the end of the document.
    pub fn read(&mut self) -> Result<bool, SgmlError> {
        if self.closed {
            return Ok(false);
        }
        loop {
            let found = match self.state {
                ReaderState::Initial => {
                    self.open_input()?;
                    false
                }
                ReaderState::Eof => return Ok(false),
                ReaderState::Markup => self.parse_next()?,
                ReaderState::Text => {
                    self.pop_leaf();
                    self.state = ReaderState::Markup;
                    self.parse_next()?
                }
                ReaderState::PartialTag => {
                    self.pop_leaf();
                    self.state = ReaderState::Markup;
                    let c = self.partial_char;
                    self.parse_tag(c)?
                }
                ReaderState::PseudoStartTag => {
                    if let Some(node) = self.pending_node.take() {
                        let is_element = node.node_type == NodeType::Element;
                        self.stack.attach(node);
                        if is_element {
                            self.emit_started_element()?
                        } else {
                            self.root_found = true;
                            self.state = self.pending_state;
                            true
                        }
                    } else {
                        self.parse_start_tag(true)?
                    }
                }
                ReaderState::EndTag | ReaderState::AutoClose => self.continue_close()?,
                ReaderState::CData => {
                    self.pop_leaf();
                    self.parse_cdata()?
                }
                ReaderState::PartialText => self.continue_cdata_pending()?,
                ReaderState::Attr | ReaderState::AttrValue => {
                    self.move_to_element();
                    false
                }
            };
            if found {
                return Ok(true);
            }
        }
    }

    /// Pop a reported leaf node off the stack before moving on.
    fn pop_leaf(&mut self) {
        if let Some(node) = self.stack.top()
            && matches!(
                node.node_type,
                NodeType::Text
                    | NodeType::CData
                    | NodeType::Comment
                    | NodeType::ProcessingInstruction
                    | NodeType::Whitespace
                    | NodeType::DocumentType
            )
        {
            self.stack.pop();
        }
    }

    fn open_input(&mut self) -> Result<(), SgmlError> {
        let Some(input) = self.input.take() else {
            fatal_error!(
                self,
                DocMissingInput,
                "No input is set; provide an input stream, content, or an href."
            );
            return Err(SgmlError::DocMissingInput);
        };
        let mut entity = match input {
            InputKind::Href(href) => Box::new(Entity::external("[document]", None, &href)),
            InputKind::Stream(stream) => Box::new(Entity::from_reader("[document]", stream)),
            InputKind::Content(content) => {
                Box::new(Entity::internal("[document]", content, None))
            }
        };
        entity.set_proxy(self.proxy.as_deref());
        if self
            .doc_type
            .as_deref()
            .is_some_and(|d| d.eq_ignore_ascii_case("html"))
        {
            entity.set_html(true);
        }
        entity.open(
            self.resolver.as_ref(),
            self.base_uri.as_ref(),
            self.default_encoding.as_deref(),
        )?;
        self.current = entity;
        self.stack.clear();
        self.stack.push("", NodeType::Document, "");
        if self.doc_type.is_some() || self.system_literal.is_some() || self.internal_subset.is_some()
        {
            self.lazy_load_dtd()?;
        }
        self.state = ReaderState::Markup;
        Ok(())
    }

    /// Load the DTD named by the document type: the embedded HTML DTD for
    /// `html`, otherwise the system literal resolved against the base URI,
    /// plus any internal subset.
    fn lazy_load_dtd(&mut self) -> Result<(), SgmlError> {
        if self.dtd.is_some() || self.ignore_dtd {
            return Ok(());
        }
        let Some(doc_type) = self.doc_type.clone() else {
            return Ok(());
        };
        let is_html = doc_type.eq_ignore_ascii_case("html");
        let mut inline = String::new();
        let mut system = self.system_literal.clone();
        if is_html {
            system = None;
            if let Some(builtin) = self.dtd_resolver.built_in(&doc_type) {
                inline.push_str(builtin);
            }
        }
        if let Some(subset) = self.internal_subset.as_deref() {
            if !inline.is_empty() {
                inline.push('\n');
            }
            inline.push_str(subset);
        }
        if system.is_none() && inline.is_empty() {
            return Ok(());
        }
        let base = self.base_uri().cloned();
        match Dtd::parse(
            &doc_type,
            self.public_id.as_deref(),
            system.as_deref(),
            (!inline.is_empty()).then_some(inline.as_str()),
            base.as_ref(),
            self.proxy.as_deref(),
            self.resolver.as_ref(),
            self.error_handler.as_ref(),
        ) {
            Ok(dtd) => self.dtd = Some(std::rc::Rc::new(dtd)),
            Err(err) => {
                // The document can still be tokenized without its DTD; repair
                // degrades to end-tag matching.
                error!(
                    self,
                    DtdLoadFailed,
                    "The DTD for '{}' cannot be loaded: {}.",
                    doc_type,
                    err
                );
            }
        }
        if is_html {
            self.current.set_html(true);
        }
        Ok(())
    }

    /// Dispatch at content level on the current lookahead.
    fn parse_next(&mut self) -> Result<bool, SgmlError> {
        loop {
            match self.current.last_char() {
                EOF_CHAR => {
                    if self.current.parent.is_some() {
                        Entity::pop(&mut self.current)?;
                        continue;
                    }
                    if self.stack.len() > 1 {
                        // Close every element whose end tag was omitted.
                        return Ok(self.begin_close(self.stack.len() - 1, AfterClose::Eof));
                    }
                    self.state = ReaderState::Eof;
                    return Ok(false);
                }
                '<' => {
                    let next = self.current.read_char()?;
                    return self.parse_tag(next);
                }
                _ => return self.parse_text(""),
            }
        }
    }

    fn parse_tag(&mut self, c: char) -> Result<bool, SgmlError> {
        match c {
            '%' => self.parse_aspnet(),
            '!' => self.parse_declaration(),
            '?' => {
                self.current.read_char()?;
                self.parse_pi()
            }
            '/' => {
                self.current.read_char()?;
                self.parse_end_tag()
            }
            c if c == '_' || c.is_alphabetic() => self.parse_start_tag(false),
            // A stray '<' is literal text.
            _ => self.parse_text("<"),
        }
    }

    /// `<% ... %>` server-side block, passed through as CDATA.
    fn parse_aspnet(&mut self) -> Result<bool, SgmlError> {
        self.current.read_char()?;
        self.sb.clear();
        self.sb.push_str("<%");
        let mut body = String::new();
        self.current
            .scan_to_end(&mut body, "server-side block", "%>")
            .map_err(|err| {
                fatal_error!(
                    self,
                    DocUnclosedCDataSection,
                    "A '<%' block is not terminated by '%>'."
                );
                err
            })?;
        self.sb.push_str(&body);
        self.sb.push_str("%>");
        self.emit_content_leaf(NodeType::CData, ReaderState::Text)
    }

    fn parse_declaration(&mut self) -> Result<bool, SgmlError> {
        // last_char is '!'
        match self.current.read_char()? {
            '-' => {
                if self.current.read_char()? != '-' {
                    warning!(
                        self,
                        DocMalformedDeclaration,
                        "A '<!' declaration was malformed and skipped."
                    );
                    return self.recover_to_gt();
                }
                self.current.read_char()?;
                self.parse_comment()
            }
            '[' => {
                self.current.read_char()?;
                let mut keyword = String::new();
                self.current.scan_token(&mut keyword, "[ \t\r\n>", false)?;
                if keyword == "CDATA" && self.current.last_char() == '[' {
                    self.current.read_char()?;
                    self.sb.clear();
                    let mut body = String::new();
                    self.current
                        .scan_to_end(&mut body, "CDATA section", "]]>")
                        .map_err(|err| {
                            fatal_error!(
                                self,
                                DocUnclosedCDataSection,
                                "A CDATA section is not terminated by ']]>'."
                            );
                            err
                        })?;
                    self.sb.push_str(&body);
                    self.emit_content_leaf(NodeType::CData, ReaderState::Text)
                } else {
                    // IE downlevel-revealed conditionals (<![if ...]>, <![endif]>)
                    let mut discard = String::new();
                    self.current
                        .scan_to_end(&mut discard, "conditional section", "]>")
                        .map_err(|err| {
                            fatal_error!(
                                self,
                                DocUnclosedCDataSection,
                                "A marked section is not terminated by ']>'."
                            );
                            err
                        })?;
                    Ok(false)
                }
            }
            'D' | 'd' => {
                let mut keyword = String::new();
                self.current.scan_token(&mut keyword, " \t\r\n>[", false)?;
                if keyword.eq_ignore_ascii_case("DOCTYPE") {
                    self.parse_doctype()
                } else {
                    warning!(
                        self,
                        DocMalformedDeclaration,
                        "Declaration '<!{}' is not recognized and was skipped.",
                        keyword
                    );
                    self.recover_to_gt()
                }
            }
            _ => {
                warning!(
                    self,
                    DocMalformedDeclaration,
                    "A '<!' declaration was malformed and skipped."
                );
                self.recover_to_gt()
            }
        }
    }

    /// Skip to the closing `>` of a construct being abandoned.
    fn recover_to_gt(&mut self) -> Result<bool, SgmlError> {
        while !matches!(self.current.last_char(), '>' | EOF_CHAR) {
            self.current.read_char()?;
        }
        if self.current.last_char() == '>' {
            self.current.read_char()?;
        }
        Ok(false)
    }

    fn parse_comment(&mut self) -> Result<bool, SgmlError> {
        let mut value = String::new();
        self.current
            .scan_to_end(&mut value, "comment", "-->")
            .map_err(|err| {
                fatal_error!(self, DocUnclosedComment, "A comment is not terminated.");
                err
            })?;
        // XML comments may not contain '--' or end with '-'.
        while value.contains("--") {
            value = value.replace("--", "-");
        }
        if value.ends_with('-') {
            value.push(' ');
        }
        self.stack.push("", NodeType::Comment, &value);
        self.state = ReaderState::Text;
        Ok(true)
    }

    fn parse_pi(&mut self) -> Result<bool, SgmlError> {
        let mut name = String::new();
        self.current.scan_token(&mut name, PI_TERM, false)?;
        if name.is_empty() {
            warning!(
                self,
                DocMalformedDeclaration,
                "A processing instruction without a target was skipped."
            );
            return self.recover_to_gt();
        }
        let mut value = String::new();
        if self.current.last_char() != '>' {
            self.current.skip_whitespace()?;
            // SGML processing instructions end with '>', not '?>'.
            self.current
                .scan_to_end(&mut value, "processing instruction", ">")
                .map_err(|err| {
                    fatal_error!(
                        self,
                        DocUnclosedProcessingInstruction,
                        "A processing instruction is not terminated."
                    );
                    err
                })?;
            if value.ends_with('?') {
                value.pop();
            }
        } else {
            self.current.read_char()?;
        }
        // The XML declaration is suppressed; a serializer regenerates it.
        if name.eq_ignore_ascii_case("xml") {
            return Ok(false);
        }
        self.stack.push(&name, NodeType::ProcessingInstruction, &value);
        self.state = ReaderState::Text;
        Ok(true)
    }

    fn parse_doctype(&mut self) -> Result<bool, SgmlError> {
        self.current.skip_whitespace()?;
        let mut name = String::new();
        self.current.scan_token(&mut name, " \t\r\n>[", false)?;
        let mut public_id = None;
        let mut system_literal = None;
        let mut subset = None;
        loop {
            match self.current.skip_whitespace()? {
                '>' => {
                    self.current.read_char()?;
                    break;
                }
                EOF_CHAR => {
                    fatal_error!(
                        self,
                        DocUnclosedDoctype,
                        "The document type declaration is not closed."
                    );
                    return Err(SgmlError::DocUnclosedDoctype);
                }
                '[' => {
                    self.current.read_char()?;
                    subset = Some(self.scan_internal_subset()?);
                }
                _ => {
                    let mut keyword = String::new();
                    self.current.scan_token(&mut keyword, " \t\r\n>[", false)?;
                    if keyword.eq_ignore_ascii_case("PUBLIC") {
                        public_id = self.scan_doctype_literal("public identifier")?;
                        if matches!(self.current.skip_whitespace()?, '"' | '\'') {
                            system_literal = self.scan_doctype_literal("system literal")?;
                        }
                    } else if keyword.eq_ignore_ascii_case("SYSTEM") {
                        system_literal = self.scan_doctype_literal("system literal")?;
                    } else {
                        warning!(
                            self,
                            DocInvalidDoctype,
                            "'{}' is not valid in a document type declaration.",
                            keyword
                        );
                        if keyword.is_empty() {
                            self.current.read_char()?;
                        }
                    }
                }
            }
        }

        // Host-application overrides win over the in-document declaration.
        if self.doc_type.is_none() {
            self.doc_type = Some(name.clone());
        }
        if self.public_id.is_none() {
            self.public_id = public_id.clone();
        }
        if self.system_literal.is_none() {
            self.system_literal = system_literal.clone();
        }
        if self.internal_subset.is_none() {
            self.internal_subset = subset.clone();
        }
        self.lazy_load_dtd()?;

        if self.strip_doc_type {
            return Ok(false);
        }
        let node = self
            .stack
            .push(&name, NodeType::DocumentType, subset.as_deref().unwrap_or(""));
        if let Some(public_id) = &public_id {
            node.add_attribute("PUBLIC", Some(public_id), '"');
        }
        if let Some(system_literal) = &system_literal {
            node.add_attribute("SYSTEM", Some(system_literal), '"');
        }
        self.state = ReaderState::Text;
        Ok(true)
    }

    fn scan_doctype_literal(&mut self, what: &str) -> Result<Option<String>, SgmlError> {
        let quote = self.current.skip_whitespace()?;
        if quote != '"' && quote != '\'' {
            warning!(
                self,
                DocInvalidDoctype,
                "A {} must be quoted; the declaration was ignored.",
                what
            );
            return Ok(None);
        }
        let mut value = String::new();
        self.current.scan_literal(&mut value, quote).map_err(|err| {
            fatal_error!(
                self,
                DocUnclosedDoctype,
                "A {} is not terminated before the end of input.",
                what
            );
            err
        })?;
        Ok(Some(value))
    }

    /// Collect the internal subset up to the matching `]`, honoring quoted
    /// literals.
    fn scan_internal_subset(&mut self) -> Result<String, SgmlError> {
        let mut out = String::new();
        let mut quote = '\0';
        loop {
            let c = self.current.last_char();
            if c == EOF_CHAR {
                fatal_error!(
                    self,
                    DocUnclosedDoctype,
                    "The internal DTD subset is not closed by ']'."
                );
                return Err(SgmlError::DocUnclosedDoctype);
            }
            if quote == '\0' {
                if c == ']' {
                    self.current.read_char()?;
                    return Ok(out);
                }
                if c == '"' || c == '\'' {
                    quote = c;
                }
            } else if c == quote {
                quote = '\0';
            }
            out.push(c);
            self.current.read_char()?;
        }
    }

    fn parse_start_tag(&mut self, resumed: bool) -> Result<bool, SgmlError> {
        let mut name;
        if resumed {
            name = std::mem::take(&mut self.pseudo_name);
            self.state = ReaderState::Markup;
        } else {
            if self.root_found && self.stack.len() == 1 {
                // A document has exactly one root.
                self.state = ReaderState::Eof;
                return Ok(false);
            }
            name = String::new();
            self.current.scan_token(&mut name, TAG_TERM, false)?;
            self.folding.fold(&mut name);
            if !self.root_found
                && self.stack.len() == 1
                && self.is_html()
                && !name.eq_ignore_ascii_case("html")
            {
                // HTML input must be rooted in <html>; simulate it and come
                // back for the tag we started.
                self.pseudo_name = name;
                self.inject_root();
                self.state = ReaderState::PseudoStartTag;
                return Ok(true);
            }
        }

        let node = self.stack.push(&name, NodeType::Element, "");
        node.is_empty = false;

        loop {
            match self.current.skip_whitespace()? {
                '>' => {
                    self.current.read_char()?;
                    break;
                }
                EOF_CHAR => {
                    if self.current.parent.is_some() {
                        Entity::pop(&mut self.current)?;
                        continue;
                    }
                    warning!(
                        self,
                        DocUnclosedStartTag,
                        "Start tag '<{}' is not closed before the end of input.",
                        name
                    );
                    break;
                }
                '/' => {
                    if self.current.read_char()? == '>' {
                        self.current.read_char()?;
                        if let Some(node) = self.stack.top_mut() {
                            node.is_empty = true;
                        }
                        break;
                    }
                    // stray '/', ignored
                }
                ',' | '=' | ':' | ';' => {
                    // stray punctuation between attributes is tolerated
                    self.current.read_char()?;
                }
                _ => self.parse_attribute()?,
            }
        }

        self.finish_start_tag()
    }

    fn parse_attribute(&mut self) -> Result<(), SgmlError> {
        let mut name = String::new();
        self.current.scan_token(&mut name, A_TERM, false)?;
        if name.is_empty() {
            // an unexpected delimiter; skip it
            self.current.read_char()?;
            return Ok(());
        }
        self.folding.fold(&mut name);

        let mut value = None;
        let mut quote_char = '\0';
        if self.current.skip_whitespace()? == '=' {
            self.current.read_char()?;
            match self.current.skip_whitespace()? {
                q @ ('"' | '\'') => {
                    quote_char = q;
                    let mut literal = String::new();
                    self.current.scan_literal(&mut literal, q).map_err(|err| {
                        fatal_error!(
                            self,
                            LexUnterminatedLiteral,
                            "The value of attribute '{}' is not terminated.",
                            name
                        );
                        err
                    })?;
                    value = Some(literal);
                }
                EOF_CHAR => {}
                _ => {
                    let mut token = String::new();
                    self.current.scan_token(&mut token, AV_TERM, false)?;
                    value = Some(token);
                }
            }
        } else {
            // HTML-style boolean attribute: the value is the name itself
            value = Some(name.clone());
        }

        let valid = crate::verify_nmtoken(&name)
            && name
                .split_once(':')
                .is_none_or(|(_, local)| crate::verify_ncname(local));
        if !valid {
            warning!(
                self,
                DocInvalidAttributeName,
                "Attribute name '{}' is not a valid name and was dropped.",
                name
            );
            return Ok(());
        }
        let added = self
            .stack
            .top_mut()
            .map(|node| node.add_attribute(&name, value.as_deref(), quote_char).is_some())
            .unwrap_or(false);
        if !added {
            warning!(
                self,
                DocDuplicateAttribute,
                "Duplicate attribute '{}' was dropped.",
                name
            );
        }
        Ok(())
    }

    fn finish_start_tag(&mut self) -> Result<bool, SgmlError> {
        let name_ok = self
            .stack
            .top()
            .is_some_and(|node| crate::verify_name(&node.name));
        if !name_ok {
            // Not an XML name; re-emit the tag as literal text.
            let name = self.stack.top().map(|n| n.name.clone()).unwrap_or_default();
            warning!(
                self,
                DocInvalidElementName,
                "'{}' is not a valid element name; the tag becomes text.",
                name
            );
            self.stack.pop();
            self.sb.clear();
            self.sb.push('<');
            self.sb.push_str(&name);
            self.sb.push('>');
            return self.emit_content_leaf(NodeType::Text, ReaderState::Text);
        }

        if let Some(dtd) = self.dtd.clone() {
            let decl = self
                .stack
                .top()
                .and_then(|node| dtd.find_element(&node.name))
                .cloned();
            match decl {
                Some(decl) => {
                    let folding = self.folding;
                    let node = self.stack.top_mut().ok_or(SgmlError::InternalError)?;
                    node.decl = Some(decl.clone());
                    if decl.content_model.declared_content == DeclaredContent::Empty {
                        node.is_empty = true;
                    }
                    for attribute in node.attributes_mut() {
                        attribute.decl = decl.find_attribute(&attribute.name).cloned();
                    }
                    // Defaulted attributes not present in the source are
                    // reported with is_default set.
                    for attdef in decl.attributes() {
                        if attdef.default_value.is_some()
                            && matches!(
                                attdef.presence,
                                AttributePresence::Default | AttributePresence::Fixed
                            )
                        {
                            let mut name = attdef.name.to_lowercase();
                            if folding == CaseFolding::ToUpper {
                                name = attdef.name.to_string();
                            }
                            if node.find_attribute(&name).is_none()
                                && let Some(attribute) = node.add_attribute(&name, None, '\0')
                            {
                                attribute.decl = Some(attdef.clone());
                            }
                        }
                    }
                }
                None => {
                    let name = self.stack.top().map(|n| n.name.clone()).unwrap_or_default();
                    warning!(
                        self,
                        DocUndeclaredElement,
                        "Element '{}' is not declared in the DTD.",
                        name
                    );
                }
            }
        }

        if let Some(node) = self.stack.top_mut() {
            if let Some(i) = node.find_attribute("xml:space") {
                node.space = match node.attributes()[i].value() {
                    Some("preserve") => XmlSpace::Preserve,
                    Some("default") => XmlSpace::Default,
                    _ => XmlSpace::None,
                };
            }
            if let Some(i) = node.find_attribute("xml:lang") {
                let lang = node.attributes()[i].value().unwrap_or("").to_owned();
                node.lang = lang;
            }
        }

        if let Some(closes) = self.validate_content() {
            let pending = self.stack.detach_top();
            self.pending_node = Some(pending);
            return Ok(self.begin_close(closes, AfterClose::PushPending));
        }
        self.emit_started_element()
    }

    /// Search the open-element stack for an ancestor whose content model
    /// permits the element just pushed. Returns the number of intervening
    /// frames to auto-close, or `None` when the element stays where it is.
    ///
    /// The search stops at an ancestor with no DTD binding, at `<body>` near
    /// the root, at the DTD root element, and at any ancestor whose end tag is
    /// required.
    fn validate_content(&self) -> Option<usize> {
        let dtd = self.dtd.as_deref()?;
        let top = self.stack.len() - 1;
        if top < 2 {
            return None;
        }
        let node = self.stack.get(top)?;
        node.decl.as_ref()?;
        let name = node.name.to_uppercase();
        let parent_decl = self.stack.get(top - 1)?.decl.as_ref()?;
        if parent_decl.can_contain(&name, dtd) {
            return None;
        }

        let root_name = dtd.name().to_uppercase();
        let mut i = top - 1;
        loop {
            let ancestor = self.stack.get(i)?;
            let decl = ancestor.decl.as_ref()?;
            if decl.can_contain(&name, dtd) {
                return (i < top - 1).then(|| top - 1 - i);
            }
            if ancestor.name.eq_ignore_ascii_case("body") && i == 2 {
                return None;
            }
            if i == 1 && ancestor.name.to_uppercase() == root_name {
                return None;
            }
            if !decl.end_tag_optional {
                return None;
            }
            if i == 1 {
                // Every open element is closable; the new element becomes a
                // fresh root-level start.
                return Some(top - 1);
            }
            i -= 1;
        }
    }

    /// Report the element at the top of the stack and pick the follow-up
    /// state: an immediate synthetic end for empty elements, CDATA content
    /// for elements declared CDATA/RCDATA, plain markup otherwise.
    fn emit_started_element(&mut self) -> Result<bool, SgmlError> {
        let node = self.stack.top().ok_or(SgmlError::InternalError)?;
        let cdata_content = node.decl.as_ref().is_some_and(|decl| {
            matches!(
                decl.content_model.declared_content,
                DeclaredContent::Cdata | DeclaredContent::Rcdata
            )
        });
        if node.is_empty {
            self.close_count = 1;
            self.after_close = AfterClose::Markup;
            self.state = ReaderState::EndTag;
        } else if cdata_content {
            self.state = ReaderState::CData;
        } else {
            self.state = ReaderState::Markup;
        }
        if let Some(node) = self.stack.top_mut() {
            node.state = self.state;
        }
        self.root_found = true;
        Ok(true)
    }

    /// Push the simulated `<html>` wrapper and report it.
    fn inject_root(&mut self) {
        let mut name = String::from("html");
        self.folding.fold(&mut name);
        let decl = self
            .dtd
            .as_ref()
            .and_then(|dtd| dtd.find_element("HTML"))
            .cloned();
        let node = self.stack.push(&name, NodeType::Element, "");
        node.is_empty = false;
        node.simulated = true;
        node.decl = decl;
        node.state = ReaderState::Markup;
        self.root_found = true;
    }

    fn parse_end_tag(&mut self) -> Result<bool, SgmlError> {
        let mut name = String::new();
        self.current.scan_token(&mut name, ENDTAG_TERM, false)?;
        self.folding.fold(&mut name);
        loop {
            match self.current.skip_whitespace()? {
                '>' => {
                    self.current.read_char()?;
                    break;
                }
                EOF_CHAR => break,
                _ => {
                    self.current.read_char()?;
                }
            }
        }

        let mut matched = None;
        for i in (1..self.stack.len()).rev() {
            if let Some(node) = self.stack.get(i)
                && node.node_type == NodeType::Element
                && node.name.eq_ignore_ascii_case(&name)
            {
                matched = Some(i);
                break;
            }
        }
        let Some(i) = matched else {
            warning!(
                self,
                DocMismatchedEndTag,
                "End tag '</{}>' has no matching start tag and was dropped.",
                name
            );
            return Ok(false);
        };
        Ok(self.begin_close(self.stack.len() - i, AfterClose::Markup))
    }

    /// Mark the top element as EndElement and report it; `total - 1` more
    /// close events are scheduled.
    fn begin_close(&mut self, total: usize, after_close: AfterClose) -> bool {
        debug_assert!(total >= 1);
        self.close_count = total - 1;
        self.after_close = after_close;
        self.state = if after_close == AfterClose::PushPending {
            ReaderState::AutoClose
        } else {
            ReaderState::EndTag
        };
        if let Some(node) = self.stack.top_mut() {
            node.node_type = NodeType::EndElement;
        }
        true
    }

    fn continue_close(&mut self) -> Result<bool, SgmlError> {
        if self
            .stack
            .top()
            .is_some_and(|node| node.node_type == NodeType::EndElement)
        {
            self.stack.pop();
        }
        if self.close_count > 0 {
            self.close_count -= 1;
            let node = self.stack.top_mut().ok_or(SgmlError::InternalError)?;
            node.node_type = NodeType::EndElement;
            return Ok(true);
        }
        match self.after_close {
            AfterClose::Markup => {
                self.state = ReaderState::Markup;
                Ok(false)
            }
            AfterClose::Eof => {
                self.state = ReaderState::Eof;
                Ok(false)
            }
            AfterClose::PushPending => {
                let node = self.pending_node.take().ok_or(SgmlError::InternalError)?;
                self.stack.attach(node);
                self.emit_started_element()
            }
        }
    }

    fn parse_text(&mut self, prefix: &str) -> Result<bool, SgmlError> {
        self.sb.clear();
        self.sb.push_str(prefix);
        loop {
            match self.current.last_char() {
                EOF_CHAR => {
                    if self.current.parent.is_some() {
                        Entity::pop(&mut self.current)?;
                        continue;
                    }
                    return self.emit_text(ReaderState::Text);
                }
                '&' => self.expand_entity_into_text()?,
                '<' => {
                    let next = self.current.read_char()?;
                    if matches!(next, '/' | '!' | '?' | '%') || next == '_' || next.is_alphabetic()
                    {
                        if self.sb.is_empty() {
                            return self.parse_tag(next);
                        }
                        self.partial_char = next;
                        return self.emit_text(ReaderState::PartialTag);
                    }
                    self.sb.push('<');
                }
                c => {
                    self.sb.push(c);
                    self.current.read_char()?;
                }
            }
        }
    }

    /// Emit the accumulated text run as Text or Whitespace, applying the
    /// whitespace policy and the root rules.
    fn emit_text(&mut self, post: ReaderState) -> Result<bool, SgmlError> {
        if self.sb.is_empty() {
            self.state = ReaderState::Markup;
            return Ok(false);
        }
        let ws_only = self
            .sb
            .chars()
            .all(|c| matches!(c, ' ' | '\t' | '\r' | '\n'));
        if ws_only {
            let report = match self.whitespace_handling {
                crate::WhitespaceHandling::All => true,
                crate::WhitespaceHandling::None => false,
                crate::WhitespaceHandling::Significant => self.xml_space() == XmlSpace::Preserve,
            };
            if !report {
                if post == ReaderState::PartialTag {
                    let c = self.partial_char;
                    self.state = ReaderState::Markup;
                    return self.parse_tag(c);
                }
                self.state = ReaderState::Markup;
                return Ok(false);
            }
            self.stack.push("", NodeType::Whitespace, &self.sb.clone());
            self.state = post;
            return Ok(true);
        }
        self.emit_content_leaf(NodeType::Text, post)
    }

    /// Emit `self.sb` as a content leaf (Text or CDATA), enforcing the
    /// single-root rule and injecting `<html>` when HTML content starts with
    /// loose text.
    fn emit_content_leaf(
        &mut self,
        node_type: NodeType,
        post: ReaderState,
    ) -> Result<bool, SgmlError> {
        if self.stack.len() == 1 {
            if self.root_found {
                self.state = ReaderState::Eof;
                return Ok(false);
            }
            if self.is_html() {
                let mut node = Node::default();
                node.reset("", node_type, &self.sb);
                self.pending_node = Some(node);
                self.pending_state = post;
                self.inject_root();
                self.state = ReaderState::PseudoStartTag;
                return Ok(true);
            }
        }
        self.root_found = true;
        let value = std::mem::take(&mut self.sb);
        self.stack.push("", node_type, &value);
        self.sb = value;
        self.state = post;
        Ok(true)
    }

    /// Expand `&#...;` or `&name;` while accumulating text.
    fn expand_entity_into_text(&mut self) -> Result<(), SgmlError> {
        // last_char is '&'
        let c = self.current.read_char()?;
        if c == '#' {
            let mut expanded = String::new();
            match self.current.expand_char_entity(&mut expanded) {
                Ok(()) => self.sb.push_str(&expanded),
                Err(SgmlError::LexInvalidCharacterReference) => {
                    warning!(
                        self,
                        LexInvalidCharacterReference,
                        "An invalid character reference was left as literal text."
                    );
                    self.sb.push_str("&#");
                }
                Err(err) => return Err(err),
            }
            return Ok(());
        }
        if c != '_' && !c.is_alphabetic() {
            self.sb.push('&');
            return Ok(());
        }
        let mut name = String::new();
        self.current.scan_token(&mut name, "; \t\r\n&<", false)?;
        let had_semicolon = self.current.last_char() == ';';
        if had_semicolon {
            self.current.read_char()?;
        }

        match self
            .dtd
            .as_ref()
            .and_then(|dtd| dtd.find_entity(&name))
            .cloned()
        {
            Some(decl) if decl.is_internal() => {
                self.sb.push_str(decl.literal.as_deref().unwrap_or(""));
            }
            Some(decl) => {
                let Some(system_id) = decl.system_id.as_deref() else {
                    warning!(
                        self,
                        DocUndeclaredEntityReference,
                        "External entity '&{};' has no system identifier.",
                        name
                    );
                    self.push_literal_reference(&name, had_semicolon);
                    return Ok(());
                };
                let mut child = Box::new(Entity::external(
                    &name,
                    decl.public_id.as_deref(),
                    system_id,
                ));
                child.set_proxy(self.proxy.as_deref());
                let base = self.base_uri().cloned();
                match child.open(self.resolver.as_ref(), base.as_ref(), None) {
                    Ok(()) => Entity::push(&mut self.current, child),
                    Err(_) => {
                        warning!(
                            self,
                            DocUndeclaredEntityReference,
                            "External entity '&{};' cannot be resolved.",
                            name
                        );
                        self.push_literal_reference(&name, had_semicolon);
                    }
                }
            }
            None => {
                warning!(
                    self,
                    DocUndeclaredEntityReference,
                    "Reference to undeclared entity '&{};'.",
                    name
                );
                self.push_literal_reference(&name, had_semicolon);
            }
        }
        Ok(())
    }

    fn push_literal_reference(&mut self, name: &str, had_semicolon: bool) {
        self.sb.push('&');
        self.sb.push_str(name);
        if had_semicolon {
            self.sb.push(';');
        }
    }

    /// Parse the content of an element whose declared content is CDATA or
    /// RCDATA (`<script>`, `<style>`). Element markup is not recognized; only
    /// comments, processing instructions, and the matching end tag are.
    fn parse_cdata(&mut self) -> Result<bool, SgmlError> {
        self.sb.clear();
        let mut ws = true;
        loop {
            match self.current.last_char() {
                EOF_CHAR => {
                    if self.current.parent.is_some() {
                        Entity::pop(&mut self.current)?;
                        continue;
                    }
                    // The end tag never came; emit what we have and let the
                    // end-of-input close the element.
                    if self.sb.is_empty() {
                        self.state = ReaderState::Markup;
                        return Ok(false);
                    }
                    return self.emit_cdata(ReaderState::Markup);
                }
                '<' => {
                    match self.current.read_char()? {
                        '!' => {
                            let c2 = self.current.read_char()?;
                            if c2 != '-' {
                                self.sb.push_str("<!");
                                ws = false;
                                continue;
                            }
                            let c3 = self.current.read_char()?;
                            if c3 != '-' {
                                self.sb.push_str("<!-");
                                ws = false;
                                continue;
                            }
                            self.current.read_char()?;
                            if ws {
                                // Nothing but whitespace so far: the comment
                                // stands alone.
                                self.sb.clear();
                                let found = self.parse_comment()?;
                                self.state = ReaderState::CData;
                                return Ok(found);
                            }
                            self.pending = Pending::ResumeComment;
                            return self.emit_cdata(ReaderState::PartialText);
                        }
                        '?' => {
                            self.current.read_char()?;
                            if ws {
                                self.sb.clear();
                                let found = self.parse_pi()?;
                                self.state = ReaderState::CData;
                                if !found {
                                    continue;
                                }
                                return Ok(true);
                            }
                            self.pending = Pending::ResumePi;
                            return self.emit_cdata(ReaderState::PartialText);
                        }
                        '/' => {
                            self.current.read_char()?;
                            let mut name = String::new();
                            self.current.scan_token(&mut name, ENDTAG_TERM, false)?;
                            let enclosing = self
                                .stack
                                .top()
                                .map(|node| node.name.clone())
                                .unwrap_or_default();
                            if name.eq_ignore_ascii_case(&enclosing) {
                                loop {
                                    match self.current.skip_whitespace()? {
                                        '>' => {
                                            self.current.read_char()?;
                                            break;
                                        }
                                        EOF_CHAR => break,
                                        _ => {
                                            self.current.read_char()?;
                                        }
                                    }
                                }
                                if self.sb.is_empty() {
                                    return Ok(self.begin_close(1, AfterClose::Markup));
                                }
                                self.pending = Pending::ResumeEnd;
                                return self.emit_cdata(ReaderState::PartialText);
                            }
                            self.sb.push_str("</");
                            self.sb.push_str(&name);
                            ws = false;
                        }
                        _ => {
                            self.sb.push('<');
                            ws = false;
                        }
                    }
                }
                c => {
                    self.sb.push(c);
                    ws &= matches!(c, ' ' | '\t' | '\r' | '\n');
                    self.current.read_char()?;
                }
            }
        }
    }

    fn emit_cdata(&mut self, post: ReaderState) -> Result<bool, SgmlError> {
        // Strip doubled-up wrapping that HTML authors use to hide script.
        let mut value = std::mem::take(&mut self.sb);
        for token in ["<![CDATA[", "]]>", "/**/"] {
            while let Some(i) = value.find(token) {
                value.replace_range(i..i + token.len(), "");
            }
        }
        self.stack.push("", NodeType::CData, &value);
        self.state = post;
        Ok(true)
    }

    fn continue_cdata_pending(&mut self) -> Result<bool, SgmlError> {
        self.pop_leaf();
        match std::mem::take(&mut self.pending) {
            Pending::ResumeComment => {
                let found = self.parse_comment()?;
                self.state = ReaderState::CData;
                Ok(found)
            }
            Pending::ResumePi => {
                let found = self.parse_pi()?;
                self.state = ReaderState::CData;
                Ok(found)
            }
            Pending::ResumeEnd => Ok(self.begin_close(1, AfterClose::Markup)),
            Pending::None => {
                self.state = ReaderState::CData;
                Ok(false)
            }
        }
    }
}
