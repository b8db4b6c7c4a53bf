use anysgml::{
    dtd::{AttributePresence, AttributeType, Dtd},
    error::SgmlError,
    handler::{DefaultDtdResolver, DefaultEntityResolver, DtdResolver, SilentErrorHandler},
};

fn parse(subset: &str) -> Result<Dtd, SgmlError> {
    Dtd::parse(
        "doc",
        None,
        None,
        Some(subset),
        None,
        None,
        &DefaultEntityResolver,
        &SilentErrorHandler,
    )
}

#[test]
fn element_declarations() {
    let dtd = parse(
        "<!ELEMENT doc O O (head, body)>\n\
         <!ELEMENT head - O (#PCDATA)>\n\
         <!ELEMENT body O O (p | note)* -(footer) +(marginal)>\n\
         <!ELEMENT (p|note) - O (#PCDATA)>\n\
         <!ELEMENT footer - - EMPTY>\n\
         <!ELEMENT marginal - - (#PCDATA)>",
    )
    .unwrap();

    // element lookup is case-insensitive; names are stored upper-cased
    let doc = dtd.find_element("dOc").unwrap();
    assert_eq!(doc.name.as_ref(), "DOC");
    assert!(doc.start_tag_optional);
    assert!(doc.end_tag_optional);
    let head = dtd.find_element("HEAD").unwrap();
    assert!(!head.start_tag_optional);
    assert!(head.end_tag_optional);

    assert!(doc.can_contain("HEAD", &dtd));
    assert!(doc.can_contain("BODY", &dtd));
    assert!(!doc.can_contain("P", &dtd));

    let body = dtd.find_element("body").unwrap();
    assert!(body.can_contain("P", &dtd));
    assert!(body.can_contain("NOTE", &dtd));
    // exclusion wins, inclusion extends
    assert!(!body.can_contain("FOOTER", &dtd));
    assert!(body.can_contain("MARGINAL", &dtd));

    let footer = dtd.find_element("footer").unwrap();
    assert!(!footer.content_model.can_contain("P"));
    assert!(!footer.content_model.can_contain_text());
}

#[test]
fn omitted_start_tags_contain_transitively() {
    let dtd = parse(
        "<!ELEMENT doc O O (section)*>\n\
         <!ELEMENT section O O (p)*>\n\
         <!ELEMENT p - O (#PCDATA)>",
    )
    .unwrap();
    // section's start tag may be omitted, so doc transparently contains p
    let doc = dtd.find_element("doc").unwrap();
    assert!(doc.can_contain("P", &dtd));
    assert!(!doc.can_contain("UNDECLARED", &dtd));
}

#[test]
fn content_model_display_round_trips_shape() {
    let dtd = parse(
        "<!ELEMENT doc O O (head, body?, (p | note)+)>\n\
         <!ELEMENT head - - ANY>\n\
         <!ELEMENT body - - EMPTY>\n\
         <!ELEMENT (p|note) - O (#PCDATA)>",
    )
    .unwrap();
    let doc = dtd.find_element("doc").unwrap();
    assert_eq!(doc.content_model.to_string(), "(HEAD,(BODY)?,(P|NOTE)+)");
    assert_eq!(
        dtd.find_element("p").unwrap().content_model.to_string(),
        "(#PCDATA)"
    );
    assert_eq!(dtd.find_element("head").unwrap().content_model.to_string(), "ANY");
}

#[test]
fn entity_declarations_and_first_writer_wins() {
    let dtd = parse(
        "<!ENTITY copy CDATA \"&#169;\">\n\
         <!ENTITY author \"Jane Doe\">\n\
         <!ENTITY author \"Someone Else\">\n\
         <!ENTITY chapter SYSTEM \"chapter.sgml\">\n\
         <!ELEMENT doc O O ANY>",
    )
    .unwrap();
    // character references inside literals are expanded at parse time
    assert_eq!(dtd.find_entity("copy").unwrap().literal.as_deref(), Some("©"));
    // general entity names are case-sensitive, and the first declaration wins
    assert_eq!(
        dtd.find_entity("author").unwrap().literal.as_deref(),
        Some("Jane Doe")
    );
    assert!(dtd.find_entity("AUTHOR").is_none());
    let chapter = dtd.find_entity("chapter").unwrap();
    assert!(!chapter.is_internal());
    assert_eq!(chapter.system_id.as_deref(), Some("chapter.sgml"));
}

#[test]
fn parameter_entities_expand_in_declarations() {
    let dtd = parse(
        "<!ENTITY % inline \"em | strong\">\n\
         <!ENTITY % common \"id ID #IMPLIED class CDATA #IMPLIED\">\n\
         <!ELEMENT doc O O (#PCDATA | %inline;)*>\n\
         <!ELEMENT (em|strong) - - (#PCDATA)>\n\
         <!ATTLIST doc %common; lang NAME #IMPLIED>",
    )
    .unwrap();
    let doc = dtd.find_element("doc").unwrap();
    assert!(doc.can_contain("EM", &dtd));
    assert!(doc.can_contain("STRONG", &dtd));
    assert!(doc.content_model.can_contain_text());
    assert!(doc.find_attribute("id").is_some());
    assert!(doc.find_attribute("CLASS").is_some());
    assert!(doc.find_attribute("lang").is_some());
}

#[test]
fn attribute_definitions() {
    let dtd = parse(
        "<!ELEMENT doc O O ANY>\n\
         <!ATTLIST doc\n\
             id      ID                     #IMPLIED\n\
             version CDATA                  #FIXED \"1.0\"\n\
             mode    (draft|final)          draft\n\
             count   NUMBER                 #REQUIRED>",
    )
    .unwrap();
    let doc = dtd.find_element("doc").unwrap();

    let id = doc.find_attribute("ID").unwrap();
    assert_eq!(id.att_type, AttributeType::Id);
    assert_eq!(id.presence, AttributePresence::Implied);
    assert!(id.enum_values.is_empty());

    let version = doc.find_attribute("version").unwrap();
    assert_eq!(version.presence, AttributePresence::Fixed);
    assert_eq!(version.default_value.as_deref(), Some("1.0"));

    let mode = doc.find_attribute("mode").unwrap();
    assert_eq!(mode.att_type, AttributeType::Enumeration);
    assert_eq!(mode.enum_values.len(), 2);
    assert!(mode.enum_values.iter().any(|v| v.as_ref() == "DRAFT"));
    assert_eq!(mode.default_value.as_deref(), Some("draft"));

    let count = doc.find_attribute("count").unwrap();
    assert_eq!(count.att_type, AttributeType::Number);
    assert_eq!(count.presence, AttributePresence::Required);
}

#[test]
fn attlist_for_undeclared_element_is_fatal() {
    let err = parse("<!ATTLIST nosuch id ID #IMPLIED>").unwrap_err();
    assert!(matches!(err, SgmlError::DtdUndeclaredElement));
}

#[test]
fn marked_sections() {
    // IGNORE sections are scanned and discarded
    let dtd = parse(
        "<![ IGNORE [ <!ELEMENT ghost - - ANY> ]]>\n\
         <!ELEMENT doc O O ANY>",
    )
    .unwrap();
    assert!(dtd.find_element("ghost").is_none());
    assert!(dtd.find_element("doc").is_some());

    // INCLUDE fails fast
    let err = parse("<![ INCLUDE [ <!ELEMENT x - - ANY> ]]>").unwrap_err();
    assert!(matches!(err, SgmlError::DtdIncludeSectionUnsupported));
}

#[test]
fn parameter_entity_errors() {
    let err = parse("<!ELEMENT doc O O (%nosuch;)*>").unwrap_err();
    assert!(matches!(err, SgmlError::DtdUndefinedParameterEntity));

    let err = parse(
        "<!ENTITY % ext SYSTEM \"other.dtd\">\n\
         <!ELEMENT doc O O (%ext;)*>",
    )
    .unwrap_err();
    assert!(matches!(err, SgmlError::DtdExternalParameterEntity));
}

#[test]
fn built_in_html_dtd_parses() {
    let source = DefaultDtdResolver.built_in("HTML").unwrap();
    let dtd = Dtd::parse(
        "html",
        None,
        None,
        Some(source),
        None,
        None,
        &DefaultEntityResolver,
        &SilentErrorHandler,
    )
    .unwrap();

    let img = dtd.find_element("img").unwrap();
    assert!(!img.content_model.can_contain_text());
    assert!(img.end_tag_optional);
    assert!(img.find_attribute("src").is_some());

    let script = dtd.find_element("script").unwrap();
    assert_eq!(script.content_model.to_string(), "CDATA");

    let html = dtd.find_element("html").unwrap();
    assert!(html.can_contain("BODY", &dtd));
    // body's start tag is omissible, so html contains flow content
    assert!(html.can_contain("P", &dtd));
    assert!(dtd.find_element("body").unwrap().end_tag_optional);

    // p cannot contain p, which drives the auto-close repair
    let p = dtd.find_element("p").unwrap();
    assert!(!p.can_contain("P", &dtd));
    assert!(p.can_contain("EM", &dtd));

    // anchors cannot nest
    assert!(!dtd.find_element("a").unwrap().can_contain("A", &dtd));

    assert_eq!(dtd.find_entity("amp").unwrap().literal.as_deref(), Some("&"));
    assert_eq!(dtd.find_entity("euro").unwrap().literal.as_deref(), Some("€"));
    assert_eq!(dtd.find_entity("nbsp").unwrap().literal.as_deref(), Some("\u{a0}"));
}
