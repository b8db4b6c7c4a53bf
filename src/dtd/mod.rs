pub mod attlist_decl;
pub mod contentspec;
pub mod element_decl;
pub mod entity_decl;

use std::{collections::HashMap, rc::Rc};

use url::Url;

use crate::{
    dtd::contentspec::ContentModel,
    entity::{EOF_CHAR, Entity, LiteralKind},
    error::{SgmlError, fatal_error},
    handler::{EntityResolver, ErrorHandler},
};

/// Whitespace characters recognized by the DTD syntax.
pub(crate) const WS: &str = " \r\n\t";
/// Name group terminators.
pub(crate) const NG_TERM: &str = " \r\n\t|,)";
/// Model group terminators.
pub(crate) const CM_TERM: &str = " \r\n\t,&|()?+*";
/// Declared content terminators.
pub(crate) const DC_TERM: &str = " \r\n\t>";
/// Attribute definition terminators inside an ATTLIST declaration.
pub(crate) const PE_TERM: &str = " \t\r\n>";

/// SGML attribute declared types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum AttributeType {
    #[default]
    Cdata,
    Entity,
    Entities,
    Id,
    Idref,
    Idrefs,
    Name,
    Names,
    Nmtoken,
    Nmtokens,
    Number,
    Numbers,
    Nutoken,
    Nutokens,
    Enumeration,
    Notation,
}

impl AttributeType {
    fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "CDATA" => Some(Self::Cdata),
            "ENTITY" => Some(Self::Entity),
            "ENTITIES" => Some(Self::Entities),
            "ID" => Some(Self::Id),
            "IDREF" => Some(Self::Idref),
            "IDREFS" => Some(Self::Idrefs),
            "NAME" => Some(Self::Name),
            "NAMES" => Some(Self::Names),
            "NMTOKEN" => Some(Self::Nmtoken),
            "NMTOKENS" => Some(Self::Nmtokens),
            "NUMBER" => Some(Self::Number),
            "NUMBERS" => Some(Self::Numbers),
            "NUTOKEN" => Some(Self::Nutoken),
            "NUTOKENS" => Some(Self::Nutokens),
            "NOTATION" => Some(Self::Notation),
            _ => None,
        }
    }
}

/// Attribute default-value presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum AttributePresence {
    #[default]
    Default,
    Implied,
    Required,
    Fixed,
    Current,
    Conref,
}

/// One attribute definition from an ATTLIST declaration.
///
/// The enumerated value set is non-empty exactly when the type is
/// [`AttributeType::Enumeration`] or [`AttributeType::Notation`].
#[derive(Debug, Clone, Default)]
pub struct AttDef {
    pub name: Box<str>,
    pub att_type: AttributeType,
    pub enum_values: Vec<Box<str>>,
    pub presence: AttributePresence,
    pub default_value: Option<Box<str>>,
}

/// One element declaration.
#[derive(Debug, Clone, Default)]
pub struct ElementDecl {
    pub name: Box<str>,
    pub start_tag_optional: bool,
    pub end_tag_optional: bool,
    pub content_model: ContentModel,
    pub inclusions: Vec<Box<str>>,
    pub exclusions: Vec<Box<str>>,
    attributes: HashMap<Box<str>, Rc<AttDef>>,
}

impl ElementDecl {
    /// Case-insensitive attribute lookup.
    pub fn find_attribute(&self, name: &str) -> Option<&Rc<AttDef>> {
        self.attributes.get(name.to_uppercase().as_str())
    }

    pub fn attributes(&self) -> impl Iterator<Item = &Rc<AttDef>> {
        self.attributes.values()
    }

    /// Attach an attribute definition. A duplicate addition is silently
    /// ignored, the first definition wins.
    pub(crate) fn add_attribute(&mut self, attdef: Rc<AttDef>) {
        self.attributes.entry(attdef.name.clone()).or_insert(attdef);
    }

    /// Whether this element may directly contain `name` (upper-cased).
    ///
    /// Exclusion exceptions override the content model; inclusion exceptions
    /// extend it. A model member whose own start tag is omissible contains
    /// `name` transparently, so `<html><p>` places the `p` even though only
    /// `body` appears in the model of `html`.
    pub fn can_contain(&self, name: &str, dtd: &Dtd) -> bool {
        let mut visited = Vec::new();
        self.can_contain_guarded(name, dtd, &mut visited)
    }

    fn can_contain_guarded(&self, name: &str, dtd: &Dtd, visited: &mut Vec<Box<str>>) -> bool {
        if self.exclusions.iter().any(|e| e.as_ref() == name) {
            return false;
        }
        if self.inclusions.iter().any(|i| i.as_ref() == name) {
            return true;
        }
        if self.content_model.can_contain(name) {
            return true;
        }
        let mut members = Vec::new();
        self.content_model.group.collect_symbols(&mut members);
        for member in members {
            if visited.iter().any(|v| v.as_ref() == member) {
                continue;
            }
            if let Some(decl) = dtd.find_element(member)
                && decl.start_tag_optional
            {
                visited.push(member.into());
                if decl.can_contain_guarded(name, dtd, visited) {
                    return true;
                }
            }
        }
        false
    }
}

/// One general or parameter entity declaration. Internal entities carry their
/// replacement literal; external entities carry a public/system identifier
/// pair instead.
#[derive(Debug, Clone)]
pub struct EntityDecl {
    pub name: Box<str>,
    pub is_parameter: bool,
    pub literal: Option<Box<str>>,
    pub literal_kind: Option<LiteralKind>,
    pub public_id: Option<Box<str>>,
    pub system_id: Option<Box<str>>,
}

impl EntityDecl {
    pub fn is_internal(&self) -> bool {
        self.literal.is_some()
    }
}

/// A parsed document type definition: element declarations keyed by
/// upper-cased name, and general/parameter entities keyed by verbatim name.
///
/// A `Dtd` is immutable after parsing and may be shared between readers.
#[derive(Debug)]
pub struct Dtd {
    name: Box<str>,
    elements: HashMap<Box<str>, Rc<ElementDecl>>,
    entities: HashMap<Box<str>, Rc<EntityDecl>>,
    parameter_entities: HashMap<Box<str>, Rc<EntityDecl>>,
}

impl Dtd {
    /// The declared root element name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Case-insensitive element lookup.
    pub fn find_element(&self, name: &str) -> Option<&Rc<ElementDecl>> {
        self.elements.get(name.to_uppercase().as_str())
    }

    /// General entity lookup by verbatim name.
    pub fn find_entity(&self, name: &str) -> Option<&Rc<EntityDecl>> {
        self.entities.get(name)
    }

    /// Parse a DTD from an external subset URI, an inline subset, or both.
    /// The external subset, when present, is parsed first.
    #[allow(clippy::too_many_arguments)]
    pub fn parse(
        name: &str,
        public_id: Option<&str>,
        system_uri: Option<&str>,
        inline_subset: Option<&str>,
        base_uri: Option<&Url>,
        proxy: Option<&str>,
        resolver: &dyn EntityResolver,
        error_handler: &dyn ErrorHandler,
    ) -> Result<Dtd, SgmlError> {
        let mut parser = DtdParser::new(name, base_uri, proxy, resolver, error_handler);
        if let Some(uri) = system_uri {
            parser.run_external(public_id, uri)?;
        }
        if let Some(subset) = inline_subset {
            parser.run_literal(subset)?;
        }
        Ok(parser.dtd)
    }
}

/// Recursive descent parser over SGML DTD syntax.
///
/// Holds a single current entity; parameter entity references push a new
/// frame onto the chain and pop it transparently at its end of input.
pub(crate) struct DtdParser<'h> {
    pub(crate) dtd: Dtd,
    pub(crate) current: Box<Entity>,
    base_uri: Option<Url>,
    proxy: Option<Box<str>>,
    resolver: &'h dyn EntityResolver,
    pub(crate) error_handler: &'h dyn ErrorHandler,
}

impl<'h> DtdParser<'h> {
    fn new(
        name: &str,
        base_uri: Option<&Url>,
        proxy: Option<&str>,
        resolver: &'h dyn EntityResolver,
        error_handler: &'h dyn ErrorHandler,
    ) -> Self {
        Self {
            dtd: Dtd {
                name: name.into(),
                elements: HashMap::new(),
                entities: HashMap::new(),
                parameter_entities: HashMap::new(),
            },
            current: Box::new(Entity::default()),
            base_uri: base_uri.cloned(),
            proxy: proxy.map(Into::into),
            resolver,
            error_handler,
        }
    }

    fn run_external(&mut self, public_id: Option<&str>, uri: &str) -> Result<(), SgmlError> {
        let mut entity = Box::new(Entity::external(&self.dtd.name.clone(), public_id, uri));
        entity.set_proxy(self.proxy.as_deref());
        entity.open(self.resolver, self.base_uri.as_ref(), None)?;
        self.current = entity;
        let result = self.parse_subset();
        self.current.close();
        result
    }

    fn run_literal(&mut self, subset: &str) -> Result<(), SgmlError> {
        let mut entity = Box::new(Entity::internal(&self.dtd.name.clone(), subset, None));
        entity.open(self.resolver, None, None)?;
        self.current = entity;
        let result = self.parse_subset();
        self.current.close();
        result
    }

    /// The main loop, dispatching on the current lookahead.
    fn parse_subset(&mut self) -> Result<(), SgmlError> {
        loop {
            let c = self.current.last_char();
            if self.current.is_whitespace() {
                self.current.read_char()?;
                continue;
            }
            match c {
                EOF_CHAR => {
                    if self.current.parent.is_some() {
                        Entity::pop(&mut self.current)?;
                    } else {
                        return Ok(());
                    }
                }
                '<' => self.parse_markup_decl()?,
                '%' => self.push_parameter_entity(WS)?,
                _ => {
                    fatal_error!(
                        self,
                        DtdUnexpectedCharacter,
                        "Character '{}' is not valid at this point of a DTD.",
                        c
                    );
                    return Err(SgmlError::DtdUnexpectedCharacter);
                }
            }
        }
    }

    fn parse_markup_decl(&mut self) -> Result<(), SgmlError> {
        // last_char is '<'
        if self.current.read_char()? != '!' {
            fatal_error!(
                self,
                DtdInvalidDeclaration,
                "Markup declarations in a DTD must start with '<!'."
            );
            return Err(SgmlError::DtdInvalidDeclaration);
        }
        match self.current.read_char()? {
            '-' => {
                if self.current.read_char()? != '-' {
                    fatal_error!(self, DtdInvalidDeclaration, "Expected a '<!--' comment.");
                    return Err(SgmlError::DtdInvalidDeclaration);
                }
                self.current.read_char()?;
                let mut comment = String::new();
                self.current
                    .scan_to_end(&mut comment, "comment", "-->")
                    .map_err(|err| self.fatal_eof(err, "comment"))?;
                Ok(())
            }
            '[' => self.parse_marked_section(),
            _ => {
                let mut keyword = String::new();
                self.scan_name(&mut keyword, WS)?;
                match keyword.as_str() {
                    "ENTITY" => self.parse_entity_decl(),
                    "ELEMENT" => self.parse_element_decl(),
                    "ATTLIST" => self.parse_attlist_decl(),
                    _ => {
                        fatal_error!(
                            self,
                            DtdInvalidDeclaration,
                            "Declaration '<!{}' is not recognized in a DTD.",
                            keyword
                        );
                        Err(SgmlError::DtdInvalidDeclaration)
                    }
                }
            }
        }
    }

    /// ```text
    /// <![ KEYWORD [ ... ]]>
    /// ```
    ///
    /// Only `IGNORE` sections are handled (scanned and discarded); `INCLUDE`
    /// fails fast.
    fn parse_marked_section(&mut self) -> Result<(), SgmlError> {
        self.current.read_char()?;
        if self.skip_ws()? == '%' {
            self.push_parameter_entity(WS)?;
            self.skip_ws()?;
        }
        let mut keyword = String::new();
        self.scan_name(&mut keyword, " \r\n\t[")?;
        match keyword.as_str() {
            "IGNORE" => {
                self.skip_ws()?;
                if self.current.last_char() != '[' {
                    fatal_error!(
                        self,
                        DtdInvalidMarkedSection,
                        "An IGNORE marked section must open with '['."
                    );
                    return Err(SgmlError::DtdInvalidMarkedSection);
                }
                self.current.read_char()?;
                let mut discard = String::new();
                self.current
                    .scan_to_end(&mut discard, "IGNORE section", "]]>")
                    .map_err(|err| self.fatal_eof(err, "IGNORE section"))?;
                Ok(())
            }
            "INCLUDE" => {
                fatal_error!(
                    self,
                    DtdIncludeSectionUnsupported,
                    "INCLUDE marked sections are not supported."
                );
                Err(SgmlError::DtdIncludeSectionUnsupported)
            }
            _ => {
                fatal_error!(
                    self,
                    DtdInvalidMarkedSection,
                    "Marked section keyword '{}' is not supported.",
                    keyword
                );
                Err(SgmlError::DtdInvalidMarkedSection)
            }
        }
    }

    /// Expand a `%name;` reference by pushing its replacement text onto the
    /// entity chain. External parameter entities are rejected.
    pub(crate) fn push_parameter_entity(&mut self, term: &str) -> Result<(), SgmlError> {
        // last_char is '%'
        self.current.read_char()?;
        let mut name = String::new();
        let mut scan_term = String::with_capacity(term.len() + 1);
        scan_term.push_str(term);
        if !term.contains(';') {
            scan_term.push(';');
        }
        self.scan_name(&mut name, &scan_term)?;
        if self.current.last_char() == ';' {
            self.current.read_char()?;
        }

        let Some(decl) = self.dtd.parameter_entities.get(name.as_str()).cloned() else {
            fatal_error!(
                self,
                DtdUndefinedParameterEntity,
                "The parameter entity '%{};' is not declared.",
                name
            );
            return Err(SgmlError::DtdUndefinedParameterEntity);
        };
        let Some(literal) = decl.literal.as_deref() else {
            fatal_error!(
                self,
                DtdExternalParameterEntity,
                "The parameter entity '%{};' is external and cannot be expanded.",
                name
            );
            return Err(SgmlError::DtdExternalParameterEntity);
        };
        let mut child = Box::new(Entity::internal(
            &format!("%{name}"),
            literal,
            decl.literal_kind,
        ));
        child.open(self.resolver, None, None)?;
        Entity::push(&mut self.current, child);
        Ok(())
    }

    /// Skip whitespace, popping exhausted entity frames on the way.
    pub(crate) fn skip_ws(&mut self) -> Result<char, SgmlError> {
        loop {
            let c = self.current.skip_whitespace()?;
            if c == EOF_CHAR && self.current.parent.is_some() {
                Entity::pop(&mut self.current)?;
            } else {
                return Ok(c);
            }
        }
    }

    /// Skip whitespace, also expanding parameter entity references.
    pub(crate) fn skip_ws_pe(&mut self, term: &str) -> Result<char, SgmlError> {
        loop {
            let c = self.skip_ws()?;
            if c != '%' {
                return Ok(c);
            }
            self.push_parameter_entity(term)?;
        }
    }

    /// Scan a name token, reporting lexical failures through the handler.
    pub(crate) fn scan_name(&mut self, buf: &mut String, term: &str) -> Result<(), SgmlError> {
        self.current.scan_token(buf, term, true).map_err(|err| {
            fatal_error!(
                self,
                DtdUnexpectedCharacter,
                "Character '{}' is not valid in a name.",
                self.current.last_char()
            );
            err
        })
    }

    /// Parse a single name or a `(a | b | c)` name group, upper-casing every
    /// name.
    pub(crate) fn parse_name_group(&mut self, names: &mut Vec<String>) -> Result<(), SgmlError> {
        names.clear();
        if self.current.last_char() == '(' {
            self.current.read_char()?;
            loop {
                match self.skip_ws_pe(NG_TERM)? {
                    ')' => {
                        self.current.read_char()?;
                        return Ok(());
                    }
                    '|' | ',' | '&' => {
                        self.current.read_char()?;
                    }
                    EOF_CHAR => {
                        fatal_error!(self, DtdUnexpectedCharacter, "A name group is not closed.");
                        return Err(SgmlError::LexUnexpectedEOF);
                    }
                    _ => {
                        let mut name = String::new();
                        self.scan_name(&mut name, NG_TERM)?;
                        names.push(name.to_uppercase());
                    }
                }
            }
        } else {
            let mut name = String::new();
            self.scan_name(&mut name, DC_TERM)?;
            names.push(name.to_uppercase());
            Ok(())
        }
    }

    /// Expect the closing `>` of a declaration.
    pub(crate) fn expect_decl_end(&mut self, code: SgmlError) -> Result<(), SgmlError> {
        if self.skip_ws()? != '>' {
            fatal_error!(
                self,
                DtdInvalidDeclaration,
                "A declaration does not close with '>'."
            );
            return Err(code);
        }
        self.current.read_char()?;
        Ok(())
    }

    fn fatal_eof(&self, err: SgmlError, label: &str) -> SgmlError {
        fatal_error!(
            self,
            LexUnexpectedEOF,
            "Unexpected end of input while scanning a {}.",
            label
        );
        err
    }
}
