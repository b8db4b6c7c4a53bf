use std::{borrow::Cow, sync::Arc};

use crate::encoding::DecodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SgmlErrorLevel {
    FatalError,
    Error,
    Warning,
}

impl std::fmt::Display for SgmlErrorLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::FatalError => write!(f, "fatal error"),
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum SgmlError {
    // general errors
    InternalError,
    UnsupportedFeature,
    // lexical errors in the entity stream
    LexInvalidNameStartChar,
    LexInvalidNameChar,
    LexInvalidCharacterReference,
    LexUnterminatedLiteral,
    LexUnexpectedEOF,
    // entity errors
    EntityNoInput,
    EntityAlreadyOpen,
    EntityNotOpen,
    EntityUnresolvedUri,
    UnsupportedUriScheme,
    // DTD structural errors
    DtdUnexpectedCharacter,
    DtdUndefinedParameterEntity,
    DtdExternalParameterEntity,
    DtdIncludeSectionUnsupported,
    DtdInvalidMarkedSection,
    DtdInvalidDeclaration,
    DtdInvalidEntityDecl,
    DtdInvalidElementDecl,
    DtdInvalidAttlistDecl,
    DtdUndeclaredElement,
    DtdUnclosedContentModel,
    DtdLoadFailed,
    // document structural errors
    DocUnexpectedCharacter,
    DocUnclosedComment,
    DocUnclosedCDataSection,
    DocUnclosedProcessingInstruction,
    DocUnclosedDoctype,
    DocInvalidDoctype,
    DocUnclosedStartTag,
    DocMissingInput,
    // recoverable conditions, reported through the error handler only
    DocDuplicateAttribute,
    DocInvalidAttributeName,
    DocInvalidElementName,
    DocMismatchedEndTag,
    DocUnplacedElement,
    DocUndeclaredElement,
    DocUndeclaredEntityReference,
    DocMalformedDeclaration,
    // I/O errors
    IOError(Arc<std::io::Error>),
    // encoding errors
    UnsupportedEncoding,
    DecodeError(DecodeError),
    // URI errors
    UriParseError(url::ParseError),
    BaseUriNotAbsolute,
}

impl std::fmt::Display for SgmlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for SgmlError {}

impl From<std::io::Error> for SgmlError {
    fn from(value: std::io::Error) -> Self {
        Self::IOError(Arc::new(value))
    }
}

impl From<DecodeError> for SgmlError {
    fn from(value: DecodeError) -> Self {
        Self::DecodeError(value)
    }
}

impl From<url::ParseError> for SgmlError {
    fn from(value: url::ParseError) -> Self {
        Self::UriParseError(value)
    }
}

/// A diagnostic produced while parsing a DTD or a document.
///
/// `context` is the entity-chain trace of the position where the condition was
/// detected, one frame per line, innermost first.
#[derive(Debug)]
pub struct SgmlParseError {
    pub error: SgmlError,
    pub level: SgmlErrorLevel,
    pub line: u64,
    pub column: u64,
    pub context: String,
    pub message: Cow<'static, str>,
}

impl std::fmt::Display for SgmlParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[line:{},column:{}][{}] {}",
            self.line, self.column, self.level, self.message
        )?;
        for frame in self.context.lines() {
            write!(f, "\n  in {frame}")?;
        }
        Ok(())
    }
}

impl std::error::Error for SgmlParseError {}

macro_rules! generic_error {
    ($method:ident, $reader:expr, $code:expr, $level:expr, $message:literal, $( $args:expr ),+) => {
        $reader.error_handler.$method($crate::error::SgmlParseError {
            error: $code,
            level: $level,
            line: $reader.current.line(),
            column: $reader.current.column(),
            context: $reader.current.context(),
            message: ::std::borrow::Cow::Owned(format!($message, $( $args ),+)),
        })
    };
    ($method:ident, $reader:expr, $code:expr, $level:expr, $message:literal) => {
        $reader.error_handler.$method($crate::error::SgmlParseError {
            error: $code,
            level: $level,
            line: $reader.current.line(),
            column: $reader.current.column(),
            context: $reader.current.context(),
            message: ::std::borrow::Cow::Borrowed($message),
        })
    };
}

macro_rules! fatal_error {
    ($reader:expr, $code:ident, $message:literal, $( $args:expr ),+) => {
        $crate::error::generic_error!(fatal_error, $reader, $crate::error::SgmlError::$code, $crate::error::SgmlErrorLevel::FatalError, $message, $( $args ),+);
    };
    ($reader:expr, $code:ident, $message:literal) => {
        $crate::error::generic_error!(fatal_error, $reader, $crate::error::SgmlError::$code, $crate::error::SgmlErrorLevel::FatalError, $message);
    };
}

macro_rules! error {
    ($reader:expr, $code:ident, $message:literal, $( $args:expr ),+) => {
        $crate::error::generic_error!(error, $reader, $crate::error::SgmlError::$code, $crate::error::SgmlErrorLevel::Error, $message, $( $args ),+);
    };
    ($reader:expr, $code:ident, $message:literal) => {
        $crate::error::generic_error!(error, $reader, $crate::error::SgmlError::$code, $crate::error::SgmlErrorLevel::Error, $message);
    };
}

macro_rules! warning {
    ($reader:expr, $code:ident, $message:literal, $( $args:expr ),+) => {
        $crate::error::generic_error!(warning, $reader, $crate::error::SgmlError::$code, $crate::error::SgmlErrorLevel::Warning, $message, $( $args ),+);
    };
    ($reader:expr, $code:ident, $message:literal) => {
        $crate::error::generic_error!(warning, $reader, $crate::error::SgmlError::$code, $crate::error::SgmlErrorLevel::Warning, $message);
    };
}

pub(crate) use {error, fatal_error, generic_error, warning};
