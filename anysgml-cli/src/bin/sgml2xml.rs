use std::{
    io::Write,
    path::{Path, PathBuf},
};

use anysgml::{
    CaseFolding, NodeType, SgmlReader, SgmlReaderBuilder, WhitespaceHandling,
    error::SgmlError,
};
use clap::Parser;
use url::Url;

#[derive(clap::Parser, Debug)]
#[command(name = "sgml2xml", about = "Convert SGML/HTML input to well-formed XML")]
struct Cli {
    #[arg(short = 'e', long = "log", help = "error log file, or $STDERR")]
    log: Option<String>,
    #[arg(short = 'f', long = "formatted", help = "pretty-print and suppress whitespace nodes")]
    formatted: bool,
    #[arg(long, help = "treat the input as HTML (use the built-in HTML DTD)")]
    html: bool,
    #[arg(long, value_name = "URL", help = "URL of the DTD to load")]
    dtd: Option<String>,
    #[arg(long = "no-xml-decl", help = "do not emit an XML declaration")]
    noxml: bool,
    #[arg(long = "keep-doctype", help = "keep the DOCTYPE declaration in the output")]
    doctype: bool,
    #[arg(long, help = "fold element and attribute names to lower case")]
    lower: bool,
    #[arg(long, conflicts_with = "lower", help = "fold element and attribute names to upper case")]
    upper: bool,
    #[arg(long, value_name = "SERVER:PORT", help = "proxy server for web fetches")]
    proxy: Option<String>,
    #[arg(long, value_name = "NAME", help = "assume this input encoding")]
    encoding: Option<String>,
    #[arg(value_name = "INPUT-URI", help = "input URI or file; wildcards iterate local files")]
    input: Option<String>,
    #[arg(value_name = "OUTPUT-FILE")]
    output: Option<String>,
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(&cli) {
        eprintln!("sgml2xml: {err}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let inputs = match cli.input.as_deref() {
        Some(pattern) if pattern.contains(['*', '?']) => expand_wildcards(pattern)?,
        Some(single) => vec![single.to_owned()],
        None => vec![],
    };

    if inputs.is_empty() {
        // read the document from standard input
        let mut reader = build_reader(cli)?;
        reader.parse_reader(std::io::stdin())?;
        let xml = convert(&mut reader, cli)?;
        write_output(cli.output.as_deref().map(Path::new), &xml)?;
        return Ok(());
    }

    let many = inputs.len() > 1;
    for input in inputs {
        let mut reader = build_reader(cli)?;
        reader.parse_uri(&to_uri(&input)?)?;
        let xml = convert(&mut reader, cli)?;
        let target = match cli.output.as_deref() {
            Some(output) if many => {
                // with multiple inputs the output argument names a directory
                let stem = Path::new(&input)
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "out".to_owned());
                Some(PathBuf::from(output).join(format!("{stem}.xml")))
            }
            Some(output) => Some(PathBuf::from(output)),
            None => None,
        };
        write_output(target.as_deref(), &xml)?;
    }
    Ok(())
}

fn build_reader(cli: &Cli) -> Result<SgmlReader, SgmlError> {
    let mut builder = SgmlReaderBuilder::new()
        .strip_doc_type(!cli.doctype)
        .whitespace_handling(if cli.formatted {
            WhitespaceHandling::None
        } else {
            WhitespaceHandling::All
        });
    if cli.html {
        builder = builder.doc_type("html");
    }
    if let Some(dtd) = &cli.dtd {
        builder = builder.system_literal(dtd);
    }
    if cli.lower {
        builder = builder.case_folding(CaseFolding::ToLower);
    } else if cli.upper {
        builder = builder.case_folding(CaseFolding::ToUpper);
    }
    if let Some(proxy) = &cli.proxy {
        builder = builder.web_proxy(proxy);
    }
    if let Some(encoding) = &cli.encoding {
        builder = builder.encoding(encoding);
    }
    match cli.log.as_deref() {
        Some("$STDERR") => builder = builder.error_log(std::io::stderr()),
        Some(path) => builder = builder.error_log_file(path)?,
        None => {}
    }
    Ok(builder.build())
}

/// Drain the reader into an XML document string.
fn convert(reader: &mut SgmlReader, cli: &Cli) -> Result<String, SgmlError> {
    let mut out = String::new();
    if !cli.noxml {
        out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    }
    let mut self_closed = Vec::new();
    while reader.read()? {
        match reader.node_type() {
            NodeType::Element => {
                if cli.formatted {
                    indent(&mut out, self_closed.len());
                }
                let empty = reader.is_empty_element();
                out.push('<');
                out.push_str(reader.name());
                for i in 0..reader.attribute_count() {
                    if let (Some(name), Some(value)) =
                        (reader.attribute_name(i), reader.get_attribute(i))
                    {
                        out.push(' ');
                        out.push_str(name);
                        out.push('=');
                        let quoted = if value.contains('"') { '\'' } else { '"' };
                        out.push(quoted);
                        for c in value.chars() {
                            match c {
                                '&' => out.push_str("&amp;"),
                                '<' => out.push_str("&lt;"),
                                c if c == quoted => {
                                    out.push_str(if c == '"' { "&quot;" } else { "&#39;" })
                                }
                                c => out.push(c),
                            }
                        }
                        out.push(quoted);
                    }
                }
                if empty {
                    out.push_str("/>");
                } else {
                    out.push('>');
                }
                self_closed.push(empty);
            }
            NodeType::EndElement => {
                let was_self_closed = self_closed.pop().unwrap_or(false);
                if !was_self_closed {
                    if cli.formatted {
                        indent(&mut out, self_closed.len());
                    }
                    out.push_str("</");
                    out.push_str(reader.name());
                    out.push('>');
                }
            }
            NodeType::Text => {
                for c in reader.value().chars() {
                    match c {
                        '&' => out.push_str("&amp;"),
                        '<' => out.push_str("&lt;"),
                        '>' => out.push_str("&gt;"),
                        c => out.push(c),
                    }
                }
            }
            NodeType::Whitespace => out.push_str(reader.value()),
            NodeType::CData => {
                out.push_str("<![CDATA[");
                out.push_str(reader.value());
                out.push_str("]]>");
            }
            NodeType::Comment => {
                if cli.formatted {
                    indent(&mut out, self_closed.len());
                }
                out.push_str("<!--");
                out.push_str(reader.value());
                out.push_str("-->");
            }
            NodeType::ProcessingInstruction => {
                out.push_str("<?");
                out.push_str(reader.name());
                if !reader.value().is_empty() {
                    out.push(' ');
                    out.push_str(reader.value());
                }
                out.push_str("?>");
            }
            NodeType::DocumentType => {
                out.push_str("<!DOCTYPE ");
                out.push_str(reader.name());
                if let Some(public_id) = reader.get_attribute_by_name("PUBLIC") {
                    out.push_str(" PUBLIC \"");
                    out.push_str(public_id);
                    out.push('"');
                    if let Some(system) = reader.get_attribute_by_name("SYSTEM") {
                        out.push_str(" \"");
                        out.push_str(system);
                        out.push('"');
                    }
                } else if let Some(system) = reader.get_attribute_by_name("SYSTEM") {
                    out.push_str(" SYSTEM \"");
                    out.push_str(system);
                    out.push('"');
                }
                if !reader.value().is_empty() {
                    out.push_str(" [");
                    out.push_str(reader.value());
                    out.push(']');
                }
                out.push('>');
            }
            _ => {}
        }
    }
    reader.close();
    out.push('\n');
    Ok(out)
}

fn indent(out: &mut String, level: usize) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    for _ in 0..level {
        out.push_str("  ");
    }
}

fn write_output(target: Option<&Path>, xml: &str) -> std::io::Result<()> {
    match target {
        Some(path) => std::fs::write(path, xml),
        None => std::io::stdout().write_all(xml.as_bytes()),
    }
}

fn to_uri(input: &str) -> Result<String, Box<dyn std::error::Error>> {
    if let Ok(url) = Url::parse(input) {
        return Ok(url.to_string());
    }
    let path = std::fs::canonicalize(input)?;
    let url = Url::from_file_path(&path)
        .map_err(|_| format!("cannot express '{}' as a file URI", path.display()))?;
    Ok(url.to_string())
}

/// Expand a `*`/`?` pattern in the file-name part of a path against the local
/// directory.
fn expand_wildcards(pattern: &str) -> Result<Vec<String>, std::io::Error> {
    let path = Path::new(pattern);
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let name_pattern = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut matches = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type()?.is_file() && glob_match(&name_pattern, &name) {
            matches.push(dir.join(&name).to_string_lossy().into_owned());
        }
    }
    matches.sort();
    Ok(matches)
}

fn glob_match(pattern: &str, name: &str) -> bool {
    fn matches(p: &[char], n: &[char]) -> bool {
        match (p.first(), n.first()) {
            (None, None) => true,
            (Some('*'), _) => {
                matches(&p[1..], n) || (!n.is_empty() && matches(p, &n[1..]))
            }
            (Some('?'), Some(_)) => matches(&p[1..], &n[1..]),
            (Some(c), Some(d)) if c == d => matches(&p[1..], &n[1..]),
            _ => false,
        }
    }
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    matches(&p, &n)
}
