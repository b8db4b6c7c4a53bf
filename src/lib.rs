#![doc = include_str!("../README.md")]

pub mod dtd;
pub mod encoding;
pub mod entity;
pub mod error;
pub mod handler;
pub mod reader;
mod save;

/// Approximate chunk length for buffered reads from an entity's byte source.
pub(crate) const INPUT_CHUNK: usize = 4096;

pub use reader::{NodeType, SgmlReader, SgmlReaderBuilder};

/// Policy for normalizing element and attribute name casing.
///
/// SGML names are case-insensitive; XML names are not. The reader folds names
/// according to this policy before reporting them. With [`CaseFolding::None`]
/// the start-tag spelling is preserved and end tags are still matched
/// case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum CaseFolding {
    #[default]
    None,
    ToUpper,
    ToLower,
}

impl CaseFolding {
    pub(crate) fn fold(&self, name: &mut String) {
        match self {
            CaseFolding::None => {}
            CaseFolding::ToUpper => {
                if name.bytes().any(|b| b.is_ascii_lowercase()) {
                    *name = name.to_uppercase();
                }
            }
            CaseFolding::ToLower => {
                if name.bytes().any(|b| b.is_ascii_uppercase()) {
                    *name = name.to_lowercase();
                }
            }
        }
    }
}

/// Policy for reporting text runs that consist solely of whitespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum WhitespaceHandling {
    /// Report every whitespace run as a [`NodeType::Whitespace`] node.
    #[default]
    All,
    /// Report whitespace only within an `xml:space="preserve"` scope.
    Significant,
    /// Suppress whitespace-only runs entirely.
    None,
}

/// ```text
/// // XML 1.0
/// [4] NameStartChar ::= ":" | [A-Z] | "_" | [a-z] | [#xC0-#xD6] | [#xD8-#xF6] | [#xF8-#x2FF] | [#x370-#x37D] | [#x37F-#x1FFF] | [#x200C-#x200D] | [#x2070-#x218F] | [#x2C00-#x2FEF] | [#x3001-#xD7FF] | [#xF900-#xFDCF] | [#xFDF0-#xFFFD] | [#x10000-#xEFFFF]
/// ```
pub(crate) fn is_name_start_char(c: char) -> bool {
    matches!(c as u32,
        0x3A // ':'
        | 0x41..=0x5A // 'A'..='Z'
        | 0x5F // '_'
        | 0x61..=0x7A // 'a'..='z'
        | 0xC0..=0xD6
        | 0xD8..=0xF6
        | 0xF8..=0x2FF
        | 0x370..=0x37D
        | 0x37F..=0x1FFF
        | 0x200C..=0x200D
        | 0x2070..=0x218F
        | 0x2C00..=0x2FEF
        | 0x3001..=0xD7FF
        | 0xF900..=0xFDCF
        | 0xFDF0..=0xFFFD
        | 0x10000..=0xEFFFF
    )
}

/// ```text
/// // XML 1.0
/// [4a] NameChar ::= NameStartChar | "-" | "." | [0-9] | #xB7 | [#x0300-#x036F] | [#x203F-#x2040]
/// ```
pub(crate) fn is_name_char(c: char) -> bool {
    matches!(c as u32,
        0x2D..=0x2E // '-', '.'
        | 0x30..=0x3A // '0'..='9', ':'
        | 0x41..=0x5A // 'A'..='Z'
        | 0x5F // '_'
        | 0x61..=0x7A // 'a'..='z'
        | 0xB7
        | 0xC0..=0xD6
        | 0xD8..=0xF6
        | 0xF8..=0x37D
        | 0x37F..=0x1FFF
        | 0x200C..=0x200D
        | 0x203F..=0x2040
        | 0x2070..=0x218F
        | 0x2C00..=0x2FEF
        | 0x3001..=0xD7FF
        | 0xF900..=0xFDCF
        | 0xFDF0..=0xFFFD
        | 0x10000..=0xEFFFF
    )
}

/// ```text
/// // XML 1.0
/// [5] Name ::= NameStartChar (NameChar)*
/// ```
pub(crate) fn verify_name(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(is_name_start_char) && chars.all(is_name_char)
}

/// ```text
/// // XML 1.0
/// [7] Nmtoken ::= (NameChar)+
/// ```
pub(crate) fn verify_nmtoken(s: &str) -> bool {
    !s.is_empty() && s.chars().all(is_name_char)
}

/// ```text
/// // Namespaces in XML 1.0
/// [4] NCName ::= Name - (Char* ':' Char*) /* An XML Name, minus the ":" */
/// ```
pub(crate) fn verify_ncname(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c != ':' && is_name_start_char(c))
        && chars.all(|c| c != ':' && is_name_char(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_verification() {
        assert!(verify_name("html"));
        assert!(verify_name("_x-y.z"));
        assert!(verify_name("ns:local"));
        assert!(!verify_name("-leading-dash"));
        assert!(!verify_name("1digit"));
        assert!(!verify_name(""));

        assert!(verify_nmtoken("1digit"));
        assert!(verify_nmtoken("-dash"));
        assert!(!verify_nmtoken("a b"));
        assert!(!verify_nmtoken(""));

        assert!(verify_ncname("local"));
        assert!(!verify_ncname("ns:local"));
    }

    #[test]
    fn case_folding() {
        let mut name = "MiXeD".to_owned();
        CaseFolding::ToLower.fold(&mut name);
        assert_eq!(name, "mixed");
        CaseFolding::ToUpper.fold(&mut name);
        assert_eq!(name, "MIXED");
        let before = name.clone();
        CaseFolding::None.fold(&mut name);
        assert_eq!(name, before);
    }
}
