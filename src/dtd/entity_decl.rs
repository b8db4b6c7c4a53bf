use std::rc::Rc;

use crate::{
    dtd::{DtdParser, WS},
    entity::LiteralKind,
    error::{SgmlError, fatal_error},
};

impl DtdParser<'_> {
    /// ```text
    /// <!ENTITY [%] name (literal | (CDATA|SDATA|PI) literal
    ///                    | PUBLIC pubid [uri] | SYSTEM uri)>
    /// ```
    pub(crate) fn parse_entity_decl(&mut self) -> Result<(), SgmlError> {
        let mut is_parameter = false;
        if self.skip_ws()? == '%' {
            self.current.read_char()?;
            is_parameter = true;
            self.skip_ws()?;
        }

        let mut name = String::new();
        self.scan_name(&mut name, WS)?;

        let mut literal = None;
        let mut literal_kind = None;
        let mut public_id = None;
        let mut system_id = None;

        match self.skip_ws()? {
            '"' | '\'' => {
                let mut value = String::new();
                self.scan_quoted(&mut value, "entity literal")?;
                literal = Some(value.into_boxed_str());
            }
            _ => {
                let mut keyword = String::new();
                self.scan_name(&mut keyword, WS)?;
                match keyword.as_str() {
                    "CDATA" | "SDATA" | "PI" => {
                        literal_kind = Some(match keyword.as_str() {
                            "CDATA" => LiteralKind::Cdata,
                            "SDATA" => LiteralKind::Sdata,
                            _ => LiteralKind::Pi,
                        });
                        self.skip_ws()?;
                        let mut value = String::new();
                        self.scan_quoted(&mut value, "entity literal")?;
                        literal = Some(value.into_boxed_str());
                    }
                    "PUBLIC" => {
                        self.skip_ws()?;
                        let mut pubid = String::new();
                        self.scan_quoted(&mut pubid, "public identifier")?;
                        public_id = Some(pubid.into_boxed_str());
                        if matches!(self.skip_ws()?, '"' | '\'') {
                            let mut uri = String::new();
                            self.scan_quoted(&mut uri, "system literal")?;
                            system_id = Some(uri.into_boxed_str());
                        }
                    }
                    "SYSTEM" => {
                        self.skip_ws()?;
                        let mut uri = String::new();
                        self.scan_quoted(&mut uri, "system literal")?;
                        system_id = Some(uri.into_boxed_str());
                    }
                    _ => {
                        fatal_error!(
                            self,
                            DtdInvalidEntityDecl,
                            "Keyword '{}' is not valid in an entity declaration.",
                            keyword
                        );
                        return Err(SgmlError::DtdInvalidEntityDecl);
                    }
                }
            }
        }

        self.expect_decl_end(SgmlError::DtdInvalidEntityDecl)?;

        let decl = super::EntityDecl {
            name: name.as_str().into(),
            is_parameter,
            literal,
            literal_kind,
            public_id,
            system_id,
        };
        // Standard SGML dictionary semantics: the first declaration wins.
        let table = if is_parameter {
            &mut self.dtd.parameter_entities
        } else {
            &mut self.dtd.entities
        };
        table.entry(name.into()).or_insert_with(|| Rc::new(decl));
        Ok(())
    }

    /// Scan a quoted literal; `last_char` must be the opening quote.
    pub(crate) fn scan_quoted(&mut self, buf: &mut String, what: &str) -> Result<(), SgmlError> {
        let quote = self.current.last_char();
        if quote != '"' && quote != '\'' {
            fatal_error!(
                self,
                DtdUnexpectedCharacter,
                "A {} must be quoted with '\"' or '\\''.",
                what
            );
            return Err(SgmlError::DtdUnexpectedCharacter);
        }
        self.current.scan_literal(buf, quote).map_err(|err| {
            fatal_error!(
                self,
                LexUnterminatedLiteral,
                "A {} is not terminated before the end of input.",
                what
            );
            err
        })
    }
}
