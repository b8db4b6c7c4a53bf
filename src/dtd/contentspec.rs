use std::fmt;

/// Declared content of an element declaration: either a model group
/// ([`DeclaredContent::ModelGroup`]) or one of the SGML declared-content
/// keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum DeclaredContent {
    #[default]
    ModelGroup,
    Cdata,
    Rcdata,
    Empty,
    Any,
}

/// Connector between the members of a model group.
///
/// Within one group every non-`None` connector is the same; the DTD parser
/// enforces this while building the group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum GroupType {
    #[default]
    None,
    /// `,`
    Sequence,
    /// `|`
    Or,
    /// `&`
    And,
}

impl GroupType {
    pub(crate) fn connector(c: char) -> Option<Self> {
        match c {
            ',' => Some(Self::Sequence),
            '|' => Some(Self::Or),
            '&' => Some(Self::And),
            _ => None,
        }
    }

    fn symbol(&self) -> char {
        match self {
            Self::None => ' ',
            Self::Sequence => ',',
            Self::Or => '|',
            Self::And => '&',
        }
    }
}

/// Occurrence indicator suffixed to a group or member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum Occurrence {
    #[default]
    Required,
    /// `?`
    Optional,
    /// `+`
    OneOrMore,
    /// `*`
    ZeroOrMore,
}

impl Occurrence {
    pub(crate) fn indicator(c: char) -> Option<Self> {
        match c {
            '?' => Some(Self::Optional),
            '+' => Some(Self::OneOrMore),
            '*' => Some(Self::ZeroOrMore),
            _ => None,
        }
    }
}

impl fmt::Display for Occurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Required => Ok(()),
            Self::Optional => write!(f, "?"),
            Self::OneOrMore => write!(f, "+"),
            Self::ZeroOrMore => write!(f, "*"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum GroupMember {
    /// An element name (upper-cased) or `#PCDATA`.
    Symbol(Box<str>),
    Group(Group),
}

/// One parenthesized model group: ordered members joined by a connector, with
/// an occurrence indicator.
#[derive(Debug, Clone, Default)]
pub struct Group {
    pub members: Vec<GroupMember>,
    pub group_type: GroupType,
    pub occurrence: Occurrence,
    /// Set when `#PCDATA` is a member.
    pub mixed: bool,
}

impl Group {
    /// Add a symbol member. `#PCDATA` sets the `mixed` flag instead of being
    /// stored as a member.
    pub(crate) fn add_symbol(&mut self, name: &str) {
        if name.eq_ignore_ascii_case("#PCDATA") {
            self.mixed = true;
        } else {
            self.members.push(GroupMember::Symbol(name.to_uppercase().into()));
        }
    }

    pub(crate) fn add_group(&mut self, group: Group) {
        self.members.push(GroupMember::Group(group));
    }

    /// Occurrence-insensitive containment: whether `name` (upper-cased) occurs
    /// anywhere in this group, transitively through nested groups.
    pub fn can_contain(&self, name: &str) -> bool {
        self.members.iter().any(|member| match member {
            GroupMember::Symbol(symbol) => symbol.as_ref() == name,
            GroupMember::Group(group) => group.can_contain(name),
        })
    }

    /// Collect every symbol name in this group, transitively through nested
    /// groups, in declaration order.
    pub fn collect_symbols<'a>(&'a self, out: &mut Vec<&'a str>) {
        for member in &self.members {
            match member {
                GroupMember::Symbol(symbol) => out.push(symbol),
                GroupMember::Group(group) => group.collect_symbols(out),
            }
        }
    }

    /// Whether `#PCDATA` occurs anywhere in this group.
    pub fn contains_pcdata(&self) -> bool {
        self.mixed
            || self
                .members
                .iter()
                .any(|member| matches!(member, GroupMember::Group(group) if group.contains_pcdata()))
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        let connector = self.group_type.symbol();
        if self.mixed {
            write!(f, "#PCDATA")?;
            if !self.members.is_empty() {
                write!(f, "{connector}")?;
            }
        }
        for (i, member) in self.members.iter().enumerate() {
            if i > 0 {
                write!(f, "{connector}")?;
            }
            match member {
                GroupMember::Symbol(symbol) => write!(f, "{symbol}")?,
                GroupMember::Group(group) => write!(f, "{group}")?,
            }
        }
        write!(f, "){}", self.occurrence)
    }
}

/// The content model of an element declaration.
///
/// When `declared_content` is not [`DeclaredContent::ModelGroup`], the group
/// is empty.
#[derive(Debug, Clone, Default)]
pub struct ContentModel {
    pub declared_content: DeclaredContent,
    pub group: Group,
}

impl ContentModel {
    pub(crate) fn declared(declared_content: DeclaredContent) -> Self {
        Self {
            declared_content,
            group: Group::default(),
        }
    }

    /// Whether an element with this model may directly contain `name`.
    ///
    /// `name` must be upper-cased. `EMPTY`, `CDATA`, and `RCDATA` content
    /// admits no elements; `ANY` admits all.
    pub fn can_contain(&self, name: &str) -> bool {
        match self.declared_content {
            DeclaredContent::Empty | DeclaredContent::Cdata | DeclaredContent::Rcdata => false,
            DeclaredContent::Any => true,
            DeclaredContent::ModelGroup => self.group.can_contain(name),
        }
    }

    /// Whether character data is permitted as direct content.
    pub fn can_contain_text(&self) -> bool {
        match self.declared_content {
            DeclaredContent::Empty => false,
            DeclaredContent::ModelGroup => self.group.contains_pcdata(),
            _ => true,
        }
    }
}

impl fmt::Display for ContentModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.declared_content {
            DeclaredContent::ModelGroup => write!(f, "{}", self.group),
            DeclaredContent::Cdata => write!(f, "CDATA"),
            DeclaredContent::Rcdata => write!(f, "RCDATA"),
            DeclaredContent::Empty => write!(f, "EMPTY"),
            DeclaredContent::Any => write!(f, "ANY"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_group() -> Group {
        // (HEAD, BODY | (#PCDATA | EM)*)
        let mut inner = Group {
            group_type: GroupType::Or,
            occurrence: Occurrence::ZeroOrMore,
            ..Default::default()
        };
        inner.add_symbol("#PCDATA");
        inner.add_symbol("em");

        let mut outer = Group {
            group_type: GroupType::Sequence,
            ..Default::default()
        };
        outer.add_symbol("head");
        outer.add_symbol("body");
        outer.add_group(inner);
        outer
    }

    #[test]
    fn containment_is_transitive_and_case_normalized() {
        let group = sample_group();
        assert!(group.can_contain("HEAD"));
        assert!(group.can_contain("EM"));
        assert!(!group.can_contain("DIV"));
        // lookups use upper-cased names
        assert!(!group.can_contain("em"));

        let mut symbols = Vec::new();
        group.collect_symbols(&mut symbols);
        assert_eq!(symbols, ["HEAD", "BODY", "EM"]);
    }

    #[test]
    fn declared_content_containment() {
        assert!(!ContentModel::declared(DeclaredContent::Empty).can_contain("X"));
        assert!(!ContentModel::declared(DeclaredContent::Cdata).can_contain("X"));
        assert!(ContentModel::declared(DeclaredContent::Any).can_contain("X"));
        assert!(!ContentModel::declared(DeclaredContent::Empty).can_contain_text());
        assert!(ContentModel::declared(DeclaredContent::Cdata).can_contain_text());

        let model = ContentModel {
            declared_content: DeclaredContent::ModelGroup,
            group: sample_group(),
        };
        assert!(model.can_contain("BODY"));
        assert!(model.can_contain_text());
    }

    #[test]
    fn display_reconstructs_model_source() {
        let model = ContentModel {
            declared_content: DeclaredContent::ModelGroup,
            group: sample_group(),
        };
        assert_eq!(model.to_string(), "(HEAD,BODY,(#PCDATA|EM)*)");
        assert_eq!(
            ContentModel::declared(DeclaredContent::Empty).to_string(),
            "EMPTY"
        );
    }
}
