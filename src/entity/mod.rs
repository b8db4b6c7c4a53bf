use std::{
    io::Read,
    sync::atomic::{AtomicUsize, Ordering},
};

use url::Url;

use crate::{
    INPUT_CHUNK,
    encoding::{DecodeError, Decoder, UTF8Decoder, WINDOWS_1252, detect_bom, find_decoder},
    error::SgmlError,
    handler::EntityResolver,
};

/// Sentinel returned by [`Entity::read_char`] at end of stream.
pub(crate) const EOF_CHAR: char = '\u{FFFF}';

const GROW_THRESHOLD: usize = 64;

static ENTITY_ID: AtomicUsize = AtomicUsize::new(0);

/// Classification of an internal entity's literal, from the keyword between
/// the entity name and the literal in its declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LiteralKind {
    Cdata,
    Sdata,
    Pi,
}

/// One character source: an internal entity's literal, an external resource
/// resolved by URI, or a caller-supplied reader.
///
/// Entities form a parent chain while nested entities are being expanded; the
/// chain is cycle free by construction because a child owns its parent while
/// it is the current entity. Each entity is opened exactly once (resolving the
/// URI, detecting the encoding, and priming the one-character lookahead) and
/// closed exactly once when popped.
pub struct Entity {
    name: Box<str>,
    public_id: Option<Box<str>>,
    uri: Option<Box<str>>,
    resolved_uri: Option<Url>,
    pub(crate) parent: Option<Box<Entity>>,
    literal: Option<Box<str>>,
    literal_kind: Option<LiteralKind>,
    is_internal: bool,
    is_html: bool,
    proxy: Option<Box<str>>,
    /// Identity for markup-nesting checks; unique per entity instance.
    id: usize,

    source: Option<Box<dyn Read>>,
    buffer: Vec<u8>,
    buffer_next: usize,
    buffer_end: usize,
    source_eof: bool,
    /// When `false` the byte buffer retains everything read so decoding can
    /// restart from offset zero after an in-stream encoding declaration is
    /// sniffed. Non-seekable inputs are thereby buffered in memory until the
    /// encoding is settled.
    compact: bool,
    decoder: Box<dyn Decoder>,

    decoded: String,
    decoded_next: usize,

    last_char: char,
    whitespace: bool,
    line: u64,
    line_start: u64,
    absolute_offset: u64,

    opened: bool,
}

impl Entity {
    fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            public_id: None,
            uri: None,
            resolved_uri: None,
            parent: None,
            literal: None,
            literal_kind: None,
            is_internal: false,
            is_html: false,
            proxy: None,
            id: ENTITY_ID.fetch_add(1, Ordering::Relaxed),
            source: None,
            buffer: vec![],
            buffer_next: 0,
            buffer_end: 0,
            source_eof: false,
            compact: true,
            decoder: Box::new(UTF8Decoder),
            decoded: String::new(),
            decoded_next: 0,
            last_char: EOF_CHAR,
            whitespace: false,
            line: 1,
            line_start: 0,
            absolute_offset: 0,
            opened: false,
        }
    }

    /// An internal entity over a literal replacement text.
    pub fn internal(name: &str, literal: impl Into<Box<str>>, kind: Option<LiteralKind>) -> Self {
        Self {
            literal: Some(literal.into()),
            literal_kind: kind,
            is_internal: true,
            ..Self::new(name)
        }
    }

    /// An external entity to be resolved by URI when opened.
    pub fn external(name: &str, public_id: Option<&str>, uri: &str) -> Self {
        Self {
            public_id: public_id.map(Into::into),
            uri: Some(uri.into()),
            ..Self::new(name)
        }
    }

    /// An entity over a pre-existing byte stream. Encoding is detected from
    /// the stream contents when `open` is called.
    pub fn from_reader(name: &str, reader: impl Read + 'static) -> Self {
        Self {
            source: Some(Box::new(reader)),
            ..Self::new(name)
        }
    }

    pub fn set_html(&mut self, is_html: bool) {
        self.is_html = is_html;
    }

    pub fn is_html(&self) -> bool {
        self.is_html
    }

    pub fn set_proxy(&mut self, proxy: Option<&str>) {
        self.proxy = proxy.map(Into::into);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn public_id(&self) -> Option<&str> {
        self.public_id.as_deref()
    }

    pub fn resolved_uri(&self) -> Option<&Url> {
        self.resolved_uri.as_ref()
    }

    pub fn is_internal(&self) -> bool {
        self.is_internal
    }

    pub fn literal_kind(&self) -> Option<LiteralKind> {
        self.literal_kind
    }

    pub fn encoding_name(&self) -> &'static str {
        self.decoder.name()
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    pub fn line(&self) -> u64 {
        self.line
    }

    pub fn column(&self) -> u64 {
        (self.absolute_offset - self.line_start).max(1)
    }

    pub(crate) fn last_char(&self) -> char {
        self.last_char
    }

    pub(crate) fn is_whitespace(&self) -> bool {
        self.whitespace
    }

    /// Make `child` the current entity, suspending `current` as its parent.
    /// The HTML flag propagates down the chain.
    pub(crate) fn push(current: &mut Box<Entity>, mut child: Box<Entity>) {
        child.is_html |= current.is_html;
        std::mem::swap(current, &mut child);
        current.parent = Some(child);
    }

    /// Close the current entity and restore its parent.
    pub(crate) fn pop(current: &mut Box<Entity>) -> Result<(), SgmlError> {
        let parent = current.parent.take().ok_or(SgmlError::InternalError)?;
        let mut finished = std::mem::replace(current, parent);
        finished.close();
        Ok(())
    }

    /// Resolve and open the character source, detect the encoding, and prime
    /// the one-character lookahead.
    pub fn open(
        &mut self,
        resolver: &dyn EntityResolver,
        base_uri: Option<&Url>,
        default_encoding: Option<&str>,
    ) -> Result<(), SgmlError> {
        if self.opened {
            return Err(SgmlError::EntityAlreadyOpen);
        }
        self.opened = true;

        if let Some(literal) = &self.literal {
            self.decoded = literal.to_string();
            self.source_eof = true;
        } else {
            if self.source.is_none() {
                let uri = self.uri.as_deref().ok_or(SgmlError::EntityUnresolvedUri)?;
                let absolute = match base_uri {
                    Some(base) => base.join(uri)?,
                    None => Url::parse(uri)?,
                };
                let resolved = resolver.resolve(&absolute, self.proxy.as_deref())?;
                if resolved
                    .content_type
                    .as_deref()
                    .is_some_and(|mime| mime.starts_with("text/html"))
                {
                    self.is_html = true;
                }
                self.resolved_uri = Some(resolved.resolved_uri);
                self.source = Some(resolved.stream);
            }
            self.init_decoder(default_encoding)?;
        }

        self.read_char()?;
        Ok(())
    }

    /// Release the byte source. Safe to call more than once; only the first
    /// call has any effect.
    pub fn close(&mut self) {
        self.source = None;
        self.buffer = vec![];
        self.buffer_next = 0;
        self.buffer_end = 0;
        self.source_eof = true;
    }

    /// Fill the initial byte window, consult the BOM table, and failing that
    /// decode with the caller-supplied default (UTF-8 if none) and sniff an
    /// in-stream XML or HTML `<meta>` encoding declaration.
    fn init_decoder(&mut self, default_encoding: Option<&str>) -> Result<(), SgmlError> {
        self.buffer.resize(INPUT_CHUNK, 0);
        let source = match self.source.as_mut() {
            Some(source) => source,
            None => return Err(SgmlError::EntityNoInput),
        };
        let mut read = 1;
        while self.buffer_end < self.buffer.len() && read != 0 {
            read = source.read(&mut self.buffer[self.buffer_end..])?;
            self.buffer_end += read;
        }
        self.source_eof = read == 0;

        if let Some((decoder, skip)) = detect_bom(&self.buffer[..self.buffer_end]) {
            self.decoder = decoder;
            self.buffer_next = skip;
            return Ok(());
        }

        if let Some(encoding) = default_encoding {
            self.decoder = find_decoder(encoding).ok_or(SgmlError::UnsupportedEncoding)?;
        }

        // Decode an initial window with the provisional decoder, keeping every
        // byte so decoding can restart if the sniff succeeds.
        self.compact = false;
        self.grow()?;
        if let Some(declared) = sniff_encoding(&self.decoded)
            && !declared.eq_ignore_ascii_case(self.decoder.name())
            && let Some(decoder) = find_decoder(&declared)
        {
            self.decoder = decoder;
            self.decoded.clear();
            self.decoded_next = 0;
            self.buffer_next = 0;
            self.grow()?;
        }
        self.compact = true;
        Ok(())
    }

    fn grow(&mut self) -> Result<(), SgmlError> {
        if !self.source_eof && let Some(source) = self.source.as_mut() {
            let rem = self.buffer_end - self.buffer_next;
            if rem < GROW_THRESHOLD {
                if self.compact {
                    self.buffer
                        .copy_within(self.buffer_next..self.buffer_end, 0);
                    self.buffer_next = 0;
                    self.buffer_end = rem;
                    if self.buffer.len() > INPUT_CHUNK {
                        self.buffer.truncate(INPUT_CHUNK);
                        self.buffer.shrink_to_fit();
                    }
                } else {
                    self.buffer.resize(self.buffer.len() + INPUT_CHUNK, 0);
                }
                let mut read = 1;
                while self.buffer_end < self.buffer.len() && read != 0 {
                    read = source.read(&mut self.buffer[self.buffer_end..])?;
                    self.buffer_end += read;
                }
                self.source_eof = read == 0;
            }
        }

        if self.buffer_end > self.buffer_next {
            if self.compact && self.decoded_next > 0 && self.decoded_next * 2 >= self.decoded.len()
            {
                self.decoded.drain(..self.decoded_next);
                self.decoded_next = 0;
            }
            match self.decoder.decode(
                &self.buffer[self.buffer_next..self.buffer_end],
                &mut self.decoded,
                self.source_eof,
            ) {
                Ok((read, _)) => self.buffer_next += read,
                Err(
                    DecodeError::Malformed { read, .. }
                    | DecodeError::InvalidCodepoint { read, .. },
                ) => {
                    // Broken byte sequences are par for the course in found
                    // HTML; substitute and carry on.
                    self.buffer_next += read.max(1).min(self.buffer_end - self.buffer_next);
                    self.decoded.push('\u{FFFD}');
                }
                Err(DecodeError::InputIsEmpty) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn next_decoded(&mut self) -> Result<Option<char>, SgmlError> {
        loop {
            if let Some(c) = self.decoded[self.decoded_next..].chars().next() {
                self.decoded_next += c.len_utf8();
                return Ok(Some(c));
            }
            if self.source_eof && self.buffer_next >= self.buffer_end {
                return Ok(None);
            }
            let before = (self.buffer_end, self.decoded.len());
            self.grow()?;
            if before == (self.buffer_end, self.decoded.len()) && self.source_eof {
                return Ok(None);
            }
        }
    }

    fn peek_decoded(&mut self) -> Result<Option<char>, SgmlError> {
        if let Some(c) = self.decoded[self.decoded_next..].chars().next() {
            return Ok(Some(c));
        }
        self.grow()?;
        Ok(self.decoded[self.decoded_next..].chars().next())
    }

    /// Read one character, updating line/column accounting and the lookahead.
    ///
    /// Returns [`EOF_CHAR`] at end of stream. Embedded NUL characters are
    /// normalized to spaces. `CR LF` counts as a single line break; a lone
    /// `CR` or `LF` also advances the line counter.
    pub fn read_char(&mut self) -> Result<char, SgmlError> {
        let Some(mut c) = self.next_decoded()? else {
            self.last_char = EOF_CHAR;
            self.whitespace = false;
            return Ok(EOF_CHAR);
        };
        self.absolute_offset += 1;
        if c == '\n' {
            self.line += 1;
            self.line_start = self.absolute_offset;
        } else if c == '\r' {
            if self.peek_decoded()? != Some('\n') {
                self.line += 1;
                self.line_start = self.absolute_offset;
            }
        } else if c == '\0' {
            c = ' ';
        }
        self.last_char = c;
        self.whitespace = matches!(c, ' ' | '\t' | '\r' | '\n');
        Ok(c)
    }

    /// Advance until `last_char` is not whitespace and return it.
    pub fn skip_whitespace(&mut self) -> Result<char, SgmlError> {
        while self.whitespace {
            self.read_char()?;
        }
        Ok(self.last_char)
    }

    /// Read characters into `buf` until the next character lies in `term`.
    ///
    /// With `nmtoken` set, the first character must be `_` or a letter and
    /// every following character must be `_`, `.`, `-`, `:`, or alphanumeric.
    pub fn scan_token(
        &mut self,
        buf: &mut String,
        term: &str,
        nmtoken: bool,
    ) -> Result<(), SgmlError> {
        buf.clear();
        let mut c = self.last_char;
        if nmtoken && c != '_' && !c.is_alphabetic() {
            return Err(SgmlError::LexInvalidNameStartChar);
        }
        while c != EOF_CHAR && !term.contains(c) {
            if nmtoken && !matches!(c, '_' | '.' | '-' | ':') && !c.is_alphanumeric() {
                return Err(SgmlError::LexInvalidNameChar);
            }
            buf.push(c);
            c = self.read_char()?;
        }
        Ok(())
    }

    /// Read a quoted literal into `buf`, expanding numeric character
    /// references in place. `last_char` must be the opening quote; the closing
    /// quote is consumed.
    pub fn scan_literal(&mut self, buf: &mut String, quote: char) -> Result<(), SgmlError> {
        buf.clear();
        let mut c = self.read_char()?;
        while c != quote {
            match c {
                EOF_CHAR => return Err(SgmlError::LexUnterminatedLiteral),
                '&' => {
                    c = self.read_char()?;
                    if c == '#' {
                        self.expand_char_entity(buf)?;
                        c = self.last_char;
                    } else {
                        buf.push('&');
                    }
                }
                _ => {
                    buf.push(c);
                    c = self.read_char()?;
                }
            }
        }
        self.read_char()?;
        Ok(())
    }

    /// Read into `buf` until the literal multi-character `terminator` is
    /// matched; the terminator is consumed and excluded from `buf`.
    ///
    /// `label` names the construct being scanned for diagnostics.
    pub fn scan_to_end(
        &mut self,
        buf: &mut String,
        label: &str,
        terminator: &str,
    ) -> Result<(), SgmlError> {
        let _ = label;
        buf.clear();
        let mut c = self.last_char;
        loop {
            if c == EOF_CHAR {
                return Err(SgmlError::LexUnexpectedEOF);
            }
            buf.push(c);
            if buf.ends_with(terminator) {
                buf.truncate(buf.len() - terminator.len());
                self.read_char()?;
                return Ok(());
            }
            c = self.read_char()?;
        }
    }

    /// Expand a numeric character reference and append the result to `buf`.
    ///
    /// `last_char` must be the `#` following `&`. Both decimal (`#NNN;`) and
    /// hexadecimal (`#xHHHH;`) forms are accepted; a missing trailing `;` is
    /// tolerated. In HTML mode, code points in `0x80..=0x9F` are remapped
    /// through the Windows-1252 table.
    pub fn expand_char_entity(&mut self, buf: &mut String) -> Result<(), SgmlError> {
        let mut c = self.read_char()?;
        let radix = if c == 'x' || c == 'X' {
            c = self.read_char()?;
            16
        } else {
            10
        };
        let mut value: u32 = 0;
        let mut any = false;
        while let Some(digit) = c.to_digit(radix) {
            any = true;
            value = value.saturating_mul(radix).saturating_add(digit);
            c = self.read_char()?;
        }
        if !any {
            return Err(SgmlError::LexInvalidCharacterReference);
        }
        if c == ';' {
            self.read_char()?;
        }
        if self.is_html && (0x80..=0x9F).contains(&value) {
            buf.push(WINDOWS_1252[(value - 0x80) as usize]);
            return Ok(());
        }
        match char::from_u32(value) {
            Some(c) => {
                buf.push(c);
                Ok(())
            }
            None => Err(SgmlError::LexInvalidCharacterReference),
        }
    }

    /// A human-readable trace of the entity chain, innermost frame first.
    pub fn context(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let mut frame = Some(self);
        while let Some(entity) = frame {
            if !out.is_empty() {
                out.push('\n');
            }
            write!(
                out,
                "entity '{}' at line {}, column {}",
                entity.name,
                entity.line,
                entity.column()
            )
            .ok();
            if let Some(uri) = &entity.resolved_uri {
                write!(out, " ({uri})").ok();
            }
            frame = entity.parent.as_deref();
        }
        out
    }
}

impl Default for Entity {
    fn default() -> Self {
        let mut entity = Self::new("[empty]");
        entity.source_eof = true;
        entity.opened = true;
        entity
    }
}

/// Look for an encoding declaration in a freshly decoded initial window:
/// an `<?xml version=... encoding=...?>` declaration, or an HTML
/// `<meta http-equiv="content-type" content="...charset=NAME...">` before any
/// content characters.
fn sniff_encoding(window: &str) -> Option<String> {
    let head = window.trim_start_matches('\u{FEFF}');
    if let Some(decl) = head.strip_prefix("<?xml") {
        let decl = &decl[..decl.find("?>")?];
        let pos = decl.find("encoding")?;
        let rest = decl[pos + "encoding".len()..].trim_start();
        let rest = rest.strip_prefix('=')?.trim_start();
        let quote = rest.chars().next()?;
        if quote != '"' && quote != '\'' {
            return None;
        }
        let rest = &rest[1..];
        return Some(rest[..rest.find(quote)?].to_owned());
    }

    // Only markup may precede the <meta> declaration; give up at the first
    // non-whitespace text character.
    let lower = head.to_ascii_lowercase();
    let mut next = 0;
    while let Some(lt) = lower[next..].find('<') {
        let pos = next + lt;
        if lower[next..pos].chars().any(|c| !c.is_whitespace()) {
            return None;
        }
        let end = match lower[pos..].find('>') {
            Some(end) => pos + end,
            None => return None,
        };
        let tag = &lower[pos..end];
        if tag.starts_with("<meta")
            && tag.contains("http-equiv")
            && tag.contains("content-type")
            && let Some(charset) = tag.find("charset=")
        {
            let name = tag[charset + "charset=".len()..]
                .trim_start()
                .trim_start_matches(['"', '\'']);
            let len = name
                .find(|c: char| c.is_whitespace() || matches!(c, '"' | '\'' | ';' | '/'))
                .unwrap_or(name.len());
            if len > 0 {
                return Some(name[..len].to_owned());
            }
        }
        next = end + 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::DefaultEntityResolver;

    fn open_str(content: &str) -> Box<Entity> {
        let mut entity = Box::new(Entity::internal("[test]", content, None));
        entity.open(&DefaultEntityResolver, None, None).unwrap();
        entity
    }

    #[test]
    fn line_and_column_accounting() {
        let mut e = open_str("ab\ncd\r\nef\rgh");
        assert_eq!((e.line(), e.column()), (1, 1));
        for _ in 0..3 {
            e.read_char().unwrap();
        }
        // 'c' on line 2
        assert_eq!((e.last_char(), e.line(), e.column()), ('c', 2, 1));
        for _ in 0..4 {
            e.read_char().unwrap();
        }
        // CR LF consumed as one line break: 'e' on line 3
        assert_eq!((e.last_char(), e.line(), e.column()), ('e', 3, 1));
        for _ in 0..3 {
            e.read_char().unwrap();
        }
        // lone CR also breaks the line
        assert_eq!((e.last_char(), e.line(), e.column()), ('g', 4, 1));
        e.read_char().unwrap();
        e.read_char().unwrap();
        assert_eq!(e.last_char(), EOF_CHAR);
    }

    #[test]
    fn nul_normalized_to_space() {
        let mut e = open_str("a\0b");
        assert_eq!(e.read_char().unwrap(), ' ');
        assert!(e.is_whitespace());
    }

    #[test]
    fn scan_token_terminators_and_nmtoken() {
        let mut e = open_str("name=value");
        let mut buf = String::new();
        e.scan_token(&mut buf, "=", true).unwrap();
        assert_eq!(buf, "name");
        assert_eq!(e.last_char(), '=');

        let mut e = open_str("1bad");
        assert!(matches!(
            e.scan_token(&mut buf, "=", true),
            Err(SgmlError::LexInvalidNameStartChar)
        ));

        let mut e = open_str("a+b ");
        assert!(matches!(
            e.scan_token(&mut buf, " ", true),
            Err(SgmlError::LexInvalidNameChar)
        ));
    }

    #[test]
    fn scan_literal_expands_character_references() {
        let mut e = open_str("\"a&#65;&#x42;&amp;\" rest");
        let mut buf = String::new();
        e.scan_literal(&mut buf, '"').unwrap();
        // Named references stay untouched; numeric ones expand.
        assert_eq!(buf, "aAB&amp;");
        assert_eq!(e.last_char(), ' ');
    }

    #[test]
    fn scan_literal_win1252_remap_in_html_mode() {
        let mut e = Box::new(Entity::internal("[test]", "'&#x80;&#146;'", None));
        e.set_html(true);
        e.open(&DefaultEntityResolver, None, None).unwrap();
        let mut buf = String::new();
        e.scan_literal(&mut buf, '\'').unwrap();
        assert_eq!(buf, "€’");
    }

    #[test]
    fn scan_to_end_with_partial_terminator_matches() {
        let mut e = open_str("one -- two --->rest");
        let mut buf = String::new();
        e.scan_to_end(&mut buf, "comment", "-->").unwrap();
        assert_eq!(buf, "one -- two -");
        assert_eq!(e.last_char(), 'r');

        let mut e = open_str("never ends");
        assert!(matches!(
            e.scan_to_end(&mut buf, "comment", "-->"),
            Err(SgmlError::LexUnexpectedEOF)
        ));
    }

    #[test]
    fn entity_stack_push_pop_propagates_html() {
        let mut current = open_str("parent");
        current.set_html(true);
        let mut child = Box::new(Entity::internal("child", "xy", None));
        child.open(&DefaultEntityResolver, None, None).unwrap();
        Entity::push(&mut current, child);
        assert!(current.is_html());
        assert_eq!(current.last_char(), 'x');
        assert_eq!(current.context().lines().count(), 2);
        Entity::pop(&mut current).unwrap();
        assert_eq!(current.last_char(), 'p');
        assert!(Entity::pop(&mut current).is_err());
    }

    #[test]
    fn sniff_xml_declaration() {
        assert_eq!(
            sniff_encoding("<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><doc/>").as_deref(),
            Some("ISO-8859-1")
        );
        assert_eq!(sniff_encoding("<?xml version=\"1.0\"?><doc/>"), None);
    }

    #[test]
    fn sniff_html_meta() {
        let html = "<html><head>\n<META HTTP-EQUIV=\"Content-Type\" \
                    CONTENT=\"text/html; charset=windows-1252\"></head>";
        assert_eq!(sniff_encoding(html).as_deref(), Some("windows-1252"));
        // Text content before the meta element cancels the sniff.
        assert_eq!(
            sniff_encoding("hello <meta http-equiv=\"content-type\" content=\"charset=utf-8\">"),
            None
        );
    }
}
