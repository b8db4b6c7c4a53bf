use crate::reader::{Node, NodeType};

/// Write `value` to `f` escaping `\r`, `"`, `&`, `'`, `<`, and `>` as numeric
/// character references.
pub(crate) fn write_escaped_char_data(f: &mut String, data: &str) {
    let mut next = 0;
    for (i, b) in data.bytes().enumerate() {
        if matches!(b, b'\r' | b'"' | b'&' | b'\'' | b'<' | b'>') {
            f.push_str(&data[next..i]);
            f.push_str("&#");
            f.push((b / 10 + b'0') as char);
            f.push((b % 10 + b'0') as char);
            f.push(';');
            next = i + 1;
        }
    }
    if next < data.len() {
        f.push_str(&data[next..]);
    }
}

/// Write an attribute value with quotation, escaping `\r`, `&`, and the quote
/// character itself.
pub(crate) fn write_escaped_att_value(f: &mut String, value: &str) {
    let quote = if value.contains('"') { '\'' } else { '"' };
    f.push(quote);
    let mut next = 0;
    for (i, b) in value.bytes().enumerate() {
        if matches!(b, b'\r' | b'&' | b'<') || b == quote as u8 {
            f.push_str(&value[next..i]);
            f.push_str("&#");
            f.push((b / 10 + b'0') as char);
            f.push((b % 10 + b'0') as char);
            f.push(';');
            next = i + 1;
        }
    }
    if next < value.len() {
        f.push_str(&value[next..]);
    }
    f.push(quote);
}

pub(crate) fn write_start_tag<'a>(
    f: &mut String,
    name: &str,
    attributes: impl Iterator<Item = (&'a str, &'a str)>,
    empty: bool,
) {
    f.push('<');
    f.push_str(name);
    for (attr_name, attr_value) in attributes {
        f.push(' ');
        f.push_str(attr_name);
        f.push('=');
        write_escaped_att_value(f, attr_value);
    }
    if empty {
        f.push_str("/>");
    } else {
        f.push('>');
    }
}

pub(crate) fn write_end_tag(f: &mut String, name: &str) {
    f.push_str("</");
    f.push_str(name);
    f.push('>');
}

/// Serialize a non-element node the reader is positioned on.
pub(crate) fn write_leaf_node(f: &mut String, node: &Node) {
    match node.node_type {
        NodeType::Text => write_escaped_char_data(f, &node.value),
        NodeType::Whitespace => f.push_str(&node.value),
        NodeType::CData => {
            f.push_str("<![CDATA[");
            f.push_str(&node.value);
            f.push_str("]]>");
        }
        NodeType::Comment => {
            f.push_str("<!--");
            f.push_str(&node.value);
            f.push_str("-->");
        }
        NodeType::ProcessingInstruction => {
            f.push_str("<?");
            f.push_str(&node.name);
            if !node.value.is_empty() {
                f.push(' ');
                f.push_str(&node.value);
            }
            f.push_str("?>");
        }
        NodeType::DocumentType => {
            f.push_str("<!DOCTYPE ");
            f.push_str(&node.name);
            let public_id = node
                .find_attribute("PUBLIC")
                .and_then(|i| node.attributes()[i].value());
            let system_literal = node
                .find_attribute("SYSTEM")
                .and_then(|i| node.attributes()[i].value());
            if let Some(public_id) = public_id {
                f.push_str(" PUBLIC \"");
                f.push_str(public_id);
                f.push('"');
                if let Some(system_literal) = system_literal {
                    f.push_str(" \"");
                    f.push_str(system_literal);
                    f.push('"');
                }
            } else if let Some(system_literal) = system_literal {
                f.push_str(" SYSTEM \"");
                f.push_str(system_literal);
                f.push('"');
            }
            if !node.value.is_empty() {
                f.push_str(" [");
                f.push_str(&node.value);
                f.push(']');
            }
            f.push('>');
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn char_data_escaping() {
        let mut out = String::new();
        write_escaped_char_data(&mut out, "a<b & c>d");
        assert_eq!(out, "a&#60;b &#38; c&#62;d");
    }

    #[test]
    fn attribute_quoting_switches_on_embedded_quotes() {
        let mut out = String::new();
        write_escaped_att_value(&mut out, "say \"hi\"");
        assert_eq!(out, "'say \"hi\"'");

        out.clear();
        write_escaped_att_value(&mut out, "plain");
        assert_eq!(out, "\"plain\"");
    }

    #[test]
    fn start_tag_rendering() {
        let mut out = String::new();
        write_start_tag(&mut out, "img", [("src", "x.gif")].into_iter(), true);
        assert_eq!(out, "<img src=\"x.gif\"/>");
    }
}
