use std::rc::Rc;

use crate::dtd::{AttDef, ElementDecl};

use super::ReaderState;

/// The kind of node the reader is positioned on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum NodeType {
    /// Nothing has been read yet.
    #[default]
    None,
    Element,
    EndElement,
    Text,
    CData,
    Comment,
    ProcessingInstruction,
    DocumentType,
    Whitespace,
    Attribute,
    /// The synthetic frame at the bottom of the open-element stack; never
    /// reported to the consumer.
    Document,
}

/// `xml:space` scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum XmlSpace {
    /// Not declared on this node or any ancestor.
    #[default]
    None,
    Default,
    Preserve,
}

/// One attribute of the current element. A `None` value means the attribute
/// was not present in the source and reports its DTD default.
#[derive(Debug, Default)]
pub(crate) struct Attribute {
    pub name: String,
    pub value: Option<String>,
    pub quote_char: char,
    pub decl: Option<Rc<AttDef>>,
}

impl Attribute {
    fn reset(&mut self, name: &str, value: Option<&str>, quote_char: char) {
        self.name.clear();
        self.name.push_str(name);
        self.value = value.map(Into::into);
        self.quote_char = quote_char;
        self.decl = None;
    }

    pub fn is_default(&self) -> bool {
        self.value.is_none()
    }

    /// The literal value, or the DTD default when the attribute was implied.
    pub fn value(&self) -> Option<&str> {
        self.value
            .as_deref()
            .or_else(|| self.decl.as_ref().and_then(|decl| decl.default_value.as_deref()))
    }
}

/// One frame of the open-element stack (also used for leaf nodes while they
/// are current).
#[derive(Debug, Default)]
pub(crate) struct Node {
    pub node_type: NodeType,
    pub name: String,
    pub value: String,
    pub space: XmlSpace,
    pub lang: String,
    pub is_empty: bool,
    pub decl: Option<Rc<ElementDecl>>,
    /// Reader state saved while attribute navigation is active.
    pub state: ReaderState,
    /// True for synthesized wrappers such as an injected `<html>`.
    pub simulated: bool,
    attributes: Vec<Attribute>,
    attribute_count: usize,
}

impl Node {
    /// Restore the slot to its invariant before it becomes visible as pushed:
    /// attribute count zeroed, DTD binding cleared, scopes cleared,
    /// `is_empty` true.
    pub fn reset(&mut self, name: &str, node_type: NodeType, value: &str) {
        self.node_type = node_type;
        self.name.clear();
        self.name.push_str(name);
        self.value.clear();
        self.value.push_str(value);
        self.space = XmlSpace::None;
        self.lang.clear();
        self.is_empty = true;
        self.decl = None;
        self.state = ReaderState::Markup;
        self.simulated = false;
        self.attribute_count = 0;
    }

    /// Add an attribute, reusing a retained slot when one is available.
    /// Returns `None` when an attribute of the same name (case-insensitive)
    /// is already present.
    pub fn add_attribute(
        &mut self,
        name: &str,
        value: Option<&str>,
        quote_char: char,
    ) -> Option<&mut Attribute> {
        if self.attributes[..self.attribute_count]
            .iter()
            .any(|a| a.name.eq_ignore_ascii_case(name))
        {
            return None;
        }
        if self.attribute_count == self.attributes.len() {
            self.attributes.push(Attribute::default());
        }
        let attribute = &mut self.attributes[self.attribute_count];
        self.attribute_count += 1;
        attribute.reset(name, value, quote_char);
        Some(attribute)
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes[..self.attribute_count]
    }

    pub fn attributes_mut(&mut self) -> &mut [Attribute] {
        &mut self.attributes[..self.attribute_count]
    }

    pub fn find_attribute(&self, name: &str) -> Option<usize> {
        self.attributes[..self.attribute_count]
            .iter()
            .position(|a| a.name.eq_ignore_ascii_case(name))
    }
}

/// A stack that retains allocated slots past logical pop, so pushes reuse the
/// previously grown `Node` and its attribute vector.
#[derive(Debug, Default)]
pub(crate) struct HwStack {
    items: Vec<Node>,
    count: usize,
}

impl HwStack {
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn clear(&mut self) {
        self.count = 0;
    }

    pub fn push(&mut self, name: &str, node_type: NodeType, value: &str) -> &mut Node {
        if self.count == self.items.len() {
            self.items.push(Node::default());
        }
        let node = &mut self.items[self.count];
        self.count += 1;
        node.reset(name, node_type, value);
        node
    }

    pub fn pop(&mut self) {
        debug_assert!(self.count > 0);
        self.count -= 1;
    }

    /// Move the top node out of the stack, leaving a fresh slot behind.
    pub fn detach_top(&mut self) -> Node {
        debug_assert!(self.count > 0);
        self.count -= 1;
        std::mem::take(&mut self.items[self.count])
    }

    /// Push a previously detached node back.
    pub fn attach(&mut self, node: Node) {
        if self.count == self.items.len() {
            self.items.push(node);
        } else {
            self.items[self.count] = node;
        }
        self.count += 1;
    }

    /// Insert a fresh node below existing frames, shifting them up.
    pub fn insert(&mut self, index: usize, name: &str, node_type: NodeType) -> &mut Node {
        debug_assert!(index <= self.count);
        self.items.insert(index, Node::default());
        self.count += 1;
        let node = &mut self.items[index];
        node.reset(name, node_type, "");
        node
    }

    pub fn top(&self) -> Option<&Node> {
        self.count.checked_sub(1).map(|i| &self.items[i])
    }

    pub fn top_mut(&mut self) -> Option<&mut Node> {
        self.count.checked_sub(1).map(|i| &mut self.items[i])
    }

    pub fn get(&self, index: usize) -> Option<&Node> {
        (index < self.count).then(|| &self.items[index])
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Node> {
        (index < self.count).then(|| &mut self.items[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_water_mark_slot_reuse() {
        let mut stack = HwStack::default();
        {
            let node = stack.push("div", NodeType::Element, "");
            node.add_attribute("class", Some("a"), '"').unwrap();
            node.is_empty = false;
            node.simulated = true;
        }
        stack.pop();
        // The slot is reused; reset must restore every invariant.
        let node = stack.push("p", NodeType::Element, "");
        assert_eq!(node.name, "p");
        assert_eq!(node.attributes().len(), 0);
        assert!(node.is_empty);
        assert!(!node.simulated);
        assert!(node.decl.is_none());
    }

    #[test]
    fn duplicate_attributes_are_rejected_case_insensitively() {
        let mut node = Node::default();
        node.reset("a", NodeType::Element, "");
        assert!(node.add_attribute("href", Some("x"), '"').is_some());
        assert!(node.add_attribute("HREF", Some("y"), '"').is_none());
        assert_eq!(node.attributes().len(), 1);
        assert_eq!(node.find_attribute("HrEf"), Some(0));
    }

    #[test]
    fn default_attribute_value_reporting() {
        let mut attribute = Attribute::default();
        attribute.reset("align", None, '\0');
        assert!(attribute.is_default());
        assert_eq!(attribute.value(), None);
        attribute.reset("align", Some("center"), '\'');
        assert!(!attribute.is_default());
        assert_eq!(attribute.value(), Some("center"));
    }
}
