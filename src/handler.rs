use std::{
    cell::RefCell,
    fs::File,
    io::{Read, Write},
};

use url::Url;

use crate::error::{SgmlError, SgmlParseError};

/// A byte stream produced by an [`EntityResolver`].
pub struct ResolvedEntity {
    pub stream: Box<dyn Read>,
    /// The URI the stream was actually served from. May differ from the
    /// requested URI after redirects.
    pub resolved_uri: Url,
    /// MIME type reported by the transport, if any. A `text/html` content type
    /// switches the entity into HTML mode.
    pub content_type: Option<String>,
}

/// Maps an absolute URI to a byte stream.
///
/// The core treats every scheme uniformly through this interface; transports
/// beyond `file:` are supplied by the host application.
pub trait EntityResolver {
    fn resolve(&self, uri: &Url, proxy: Option<&str>) -> Result<ResolvedEntity, SgmlError>;
}

/// Resolver for `file:` URIs via the local filesystem.
pub struct DefaultEntityResolver;

impl EntityResolver for DefaultEntityResolver {
    fn resolve(&self, uri: &Url, _proxy: Option<&str>) -> Result<ResolvedEntity, SgmlError> {
        if uri.scheme() != "file" {
            return Err(SgmlError::UnsupportedUriScheme);
        }
        let path = uri
            .to_file_path()
            .map_err(|_| SgmlError::EntityUnresolvedUri)?;
        let file = File::open(path)?;
        Ok(ResolvedEntity {
            stream: Box::new(file),
            resolved_uri: uri.clone(),
            content_type: None,
        })
    }
}

/// Supplies the source text of compiled-in DTDs by logical name.
pub trait DtdResolver {
    fn built_in(&self, name: &str) -> Option<&'static str>;
}

/// Serves the embedded HTML DTD for the logical name `HTML`.
pub struct DefaultDtdResolver;

impl DtdResolver for DefaultDtdResolver {
    fn built_in(&self, name: &str) -> Option<&'static str> {
        name.eq_ignore_ascii_case("html")
            .then_some(include_str!("../resources/html.dtd"))
    }
}

/// Receives parse diagnostics.
///
/// Fatal errors are also propagated to the caller as `Err` values; errors and
/// warnings are reported here and parsing continues.
pub trait ErrorHandler {
    fn error(&self, error: SgmlParseError) {
        let _ = error;
    }

    fn fatal_error(&self, error: SgmlParseError) {
        let _ = error;
    }

    fn warning(&self, error: SgmlParseError) {
        let _ = error;
    }
}

/// Discards all diagnostics.
pub struct SilentErrorHandler;

impl ErrorHandler for SilentErrorHandler {}

/// Writes one line per diagnostic to an arbitrary sink.
pub struct WriteErrorHandler {
    sink: RefCell<Box<dyn Write>>,
}

impl WriteErrorHandler {
    pub fn new(sink: impl Write + 'static) -> Self {
        Self {
            sink: RefCell::new(Box::new(sink)),
        }
    }

    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }

    fn write(&self, error: SgmlParseError) {
        writeln!(self.sink.borrow_mut(), "{error}").ok();
    }
}

impl ErrorHandler for WriteErrorHandler {
    fn error(&self, error: SgmlParseError) {
        self.write(error);
    }

    fn fatal_error(&self, error: SgmlParseError) {
        self.write(error);
    }

    fn warning(&self, error: SgmlParseError) {
        self.write(error);
    }
}
