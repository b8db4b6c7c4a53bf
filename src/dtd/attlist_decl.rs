use std::rc::Rc;

use crate::{
    dtd::{AttDef, AttributePresence, AttributeType, DtdParser, PE_TERM, WS},
    entity::EOF_CHAR,
    error::{SgmlError, fatal_error},
};

impl DtdParser<'_> {
    /// ```text
    /// <!ATTLIST names (name type default)+ >
    /// ```
    pub(crate) fn parse_attlist_decl(&mut self) -> Result<(), SgmlError> {
        self.skip_ws_pe(WS)?;
        let mut names = Vec::new();
        self.parse_name_group(&mut names)?;

        for name in &names {
            if !self.dtd.elements.contains_key(name.as_str()) {
                fatal_error!(
                    self,
                    DtdUndeclaredElement,
                    "ATTLIST for element '{}', which is not declared.",
                    name
                );
                return Err(SgmlError::DtdUndeclaredElement);
            }
        }

        loop {
            match self.skip_ws_pe(PE_TERM)? {
                '>' => {
                    self.current.read_char()?;
                    return Ok(());
                }
                EOF_CHAR => {
                    fatal_error!(
                        self,
                        DtdInvalidAttlistDecl,
                        "An attribute list declaration is not closed before the end of input."
                    );
                    return Err(SgmlError::DtdInvalidAttlistDecl);
                }
                _ => {
                    let attdef = Rc::new(self.parse_attdef()?);
                    for name in &names {
                        if let Some(decl) = self.dtd.elements.get_mut(name.as_str())
                            && let Some(decl) = Rc::get_mut(decl)
                        {
                            decl.add_attribute(attdef.clone());
                        }
                    }
                }
            }
        }
    }

    /// One `name type default` triple.
    fn parse_attdef(&mut self) -> Result<AttDef, SgmlError> {
        let mut name = String::new();
        self.scan_name(&mut name, PE_TERM)?;
        let name = name.to_uppercase();

        let mut att_type = AttributeType::Cdata;
        let mut enum_values = Vec::new();
        match self.skip_ws_pe(WS)? {
            '(' => {
                att_type = AttributeType::Enumeration;
                let mut values = Vec::new();
                self.parse_name_group(&mut values)?;
                enum_values = values.into_iter().map(Into::into).collect();
            }
            _ => {
                let mut keyword = String::new();
                self.scan_name(&mut keyword, PE_TERM)?;
                match AttributeType::from_keyword(keyword.to_uppercase().as_str()) {
                    Some(AttributeType::Notation) => {
                        att_type = AttributeType::Notation;
                        if self.skip_ws_pe(WS)? != '(' {
                            fatal_error!(
                                self,
                                DtdInvalidAttlistDecl,
                                "A NOTATION attribute type requires a name group."
                            );
                            return Err(SgmlError::DtdInvalidAttlistDecl);
                        }
                        let mut values = Vec::new();
                        self.parse_name_group(&mut values)?;
                        enum_values = values.into_iter().map(Into::into).collect();
                    }
                    Some(keyword_type) => att_type = keyword_type,
                    None => {
                        fatal_error!(
                            self,
                            DtdInvalidAttlistDecl,
                            "'{}' is not an attribute type.",
                            keyword
                        );
                        return Err(SgmlError::DtdInvalidAttlistDecl);
                    }
                }
            }
        }

        let mut presence = AttributePresence::Default;
        let mut default_value = None;
        match self.skip_ws_pe(PE_TERM)? {
            '"' | '\'' => {
                let mut value = String::new();
                self.scan_quoted(&mut value, "default attribute value")?;
                default_value = Some(value.into_boxed_str());
            }
            '#' => {
                self.current.read_char()?;
                let mut keyword = String::new();
                self.scan_name(&mut keyword, PE_TERM)?;
                match keyword.to_uppercase().as_str() {
                    "REQUIRED" => presence = AttributePresence::Required,
                    "IMPLIED" => presence = AttributePresence::Implied,
                    "FIXED" => {
                        presence = AttributePresence::Fixed;
                        self.skip_ws_pe(PE_TERM)?;
                        let mut value = String::new();
                        self.scan_quoted(&mut value, "fixed attribute value")?;
                        default_value = Some(value.into_boxed_str());
                    }
                    "CURRENT" => presence = AttributePresence::Current,
                    "CONREF" => presence = AttributePresence::Conref,
                    _ => {
                        fatal_error!(
                            self,
                            DtdInvalidAttlistDecl,
                            "'#{}' is not a default value keyword.",
                            keyword
                        );
                        return Err(SgmlError::DtdInvalidAttlistDecl);
                    }
                }
            }
            _ => {
                let mut value = String::new();
                self.current
                    .scan_token(&mut value, PE_TERM, false)
                    .map_err(|err| {
                        fatal_error!(
                            self,
                            DtdInvalidAttlistDecl,
                            "A default attribute value is malformed."
                        );
                        err
                    })?;
                default_value = Some(value.into_boxed_str());
            }
        }

        Ok(AttDef {
            name: name.into(),
            att_type,
            enum_values,
            presence,
            default_value,
        })
    }
}
