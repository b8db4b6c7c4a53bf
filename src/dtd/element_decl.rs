use std::{collections::HashMap, rc::Rc};

use crate::{
    dtd::{
        CM_TERM, DC_TERM, DtdParser, ElementDecl, WS,
        contentspec::{ContentModel, DeclaredContent, Group, GroupMember, GroupType, Occurrence},
    },
    entity::EOF_CHAR,
    error::{SgmlError, error, fatal_error},
};

impl DtdParser<'_> {
    /// ```text
    /// <!ELEMENT names sto eto model [-(exclusions)] [+(inclusions)]>
    /// ```
    ///
    /// `names` is a single name or `(a|b|c)`; `sto`/`eto` are `-` (tag
    /// required) or `O` (omissible); `model` is declared content (`CDATA`,
    /// `RCDATA`, `EMPTY`, `ANY`) or a model group.
    pub(crate) fn parse_element_decl(&mut self) -> Result<(), SgmlError> {
        self.skip_ws_pe(WS)?;
        let mut names = Vec::new();
        self.parse_name_group(&mut names)?;

        let start_tag_optional = self.parse_omission_flag()?;
        let end_tag_optional = self.parse_omission_flag()?;

        let content_model = if self.skip_ws_pe(CM_TERM)? == '(' {
            ContentModel {
                declared_content: DeclaredContent::ModelGroup,
                group: self.parse_model_group()?,
            }
        } else {
            let mut keyword = String::new();
            self.scan_name(&mut keyword, DC_TERM)?;
            match keyword.to_uppercase().as_str() {
                "CDATA" => ContentModel::declared(DeclaredContent::Cdata),
                "RCDATA" => ContentModel::declared(DeclaredContent::Rcdata),
                "EMPTY" => ContentModel::declared(DeclaredContent::Empty),
                "ANY" => ContentModel::declared(DeclaredContent::Any),
                _ => {
                    fatal_error!(
                        self,
                        DtdInvalidElementDecl,
                        "'{}' is not a declared content keyword.",
                        keyword
                    );
                    return Err(SgmlError::DtdInvalidElementDecl);
                }
            }
        };

        // Exception lists may appear in either order.
        let mut inclusions = Vec::new();
        let mut exclusions = Vec::new();
        loop {
            match self.skip_ws()? {
                '-' => {
                    self.current.read_char()?;
                    self.parse_exception_group(&mut exclusions)?;
                }
                '+' => {
                    self.current.read_char()?;
                    self.parse_exception_group(&mut inclusions)?;
                }
                _ => break,
            }
        }

        self.expect_decl_end(SgmlError::DtdInvalidElementDecl)?;

        for name in names {
            let decl = ElementDecl {
                name: name.as_str().into(),
                start_tag_optional,
                end_tag_optional,
                content_model: content_model.clone(),
                inclusions: inclusions.iter().map(|i| i.as_str().into()).collect(),
                exclusions: exclusions.iter().map(|e| e.as_str().into()).collect(),
                attributes: HashMap::new(),
            };
            self.dtd
                .elements
                .entry(name.into())
                .or_insert_with(|| Rc::new(decl));
        }
        Ok(())
    }

    fn parse_omission_flag(&mut self) -> Result<bool, SgmlError> {
        match self.skip_ws_pe(WS)? {
            '-' => {
                self.current.read_char()?;
                Ok(false)
            }
            'O' | 'o' => {
                self.current.read_char()?;
                Ok(true)
            }
            c => {
                fatal_error!(
                    self,
                    DtdInvalidElementDecl,
                    "'{}' is not a tag omission flag; expected '-' or 'O'.",
                    c
                );
                Err(SgmlError::DtdInvalidElementDecl)
            }
        }
    }

    fn parse_exception_group(&mut self, names: &mut Vec<String>) -> Result<(), SgmlError> {
        if self.current.last_char() != '(' {
            fatal_error!(
                self,
                DtdInvalidElementDecl,
                "An exception list must be a parenthesized name group."
            );
            return Err(SgmlError::DtdInvalidElementDecl);
        }
        let mut group = Vec::new();
        self.parse_name_group(&mut group)?;
        names.extend(group);
        Ok(())
    }

    /// Parse one parenthesized model group; `last_char` must be `(`.
    ///
    /// A group opened inside a pushed parameter entity must also close inside
    /// it; a violation is reported but parsing continues.
    pub(crate) fn parse_model_group(&mut self) -> Result<Group, SgmlError> {
        let opened_in = self.current.id();
        self.current.read_char()?;

        let mut group = Group::default();
        loop {
            match self.skip_ws_pe(CM_TERM)? {
                '(' => {
                    let sub = self.parse_model_group()?;
                    group.add_group(sub);
                }
                ')' => break,
                c @ (',' | '|' | '&') => {
                    let connector = GroupType::connector(c).unwrap();
                    if group.group_type != GroupType::None && group.group_type != connector {
                        fatal_error!(
                            self,
                            DtdInvalidElementDecl,
                            "Connector '{}' is inconsistent with the rest of the model group.",
                            c
                        );
                        return Err(SgmlError::DtdInvalidElementDecl);
                    }
                    group.group_type = connector;
                    self.current.read_char()?;
                }
                c @ ('?' | '+' | '*') => {
                    self.apply_member_occurrence(&mut group, Occurrence::indicator(c).unwrap());
                    self.current.read_char()?;
                }
                EOF_CHAR => {
                    fatal_error!(
                        self,
                        DtdUnclosedContentModel,
                        "A model group is not closed before the end of input."
                    );
                    return Err(SgmlError::DtdUnclosedContentModel);
                }
                _ => {
                    let mut symbol = String::new();
                    self.current
                        .scan_token(&mut symbol, CM_TERM, false)
                        .map_err(|err| {
                            fatal_error!(
                                self,
                                DtdInvalidElementDecl,
                                "A model group contains an invalid token."
                            );
                            err
                        })?;
                    if symbol.is_empty() {
                        fatal_error!(
                            self,
                            DtdInvalidElementDecl,
                            "Character '{}' is not valid in a model group.",
                            self.current.last_char()
                        );
                        return Err(SgmlError::DtdInvalidElementDecl);
                    }
                    group.add_symbol(&symbol);
                }
            }
        }

        if self.current.id() != opened_in {
            error!(
                self,
                DtdInvalidElementDecl,
                "A model group crosses a parameter entity boundary."
            );
        }
        self.current.read_char()?;
        if let Some(occurrence) = Occurrence::indicator(self.current.last_char()) {
            group.occurrence = occurrence;
            self.current.read_char()?;
        }
        Ok(group)
    }

    /// Attach an occurrence indicator to the most recent member. A bare name
    /// is wrapped into a singleton group, which keeps occurrence a property of
    /// groups only.
    fn apply_member_occurrence(&mut self, group: &mut Group, occurrence: Occurrence) {
        match group.members.last_mut() {
            Some(GroupMember::Group(sub)) if sub.occurrence == Occurrence::Required => {
                sub.occurrence = occurrence;
            }
            Some(member @ GroupMember::Symbol(_)) => {
                let GroupMember::Symbol(name) =
                    std::mem::replace(member, GroupMember::Group(Group::default()))
                else {
                    unreachable!()
                };
                let mut wrap = Group {
                    occurrence,
                    ..Default::default()
                };
                wrap.members.push(GroupMember::Symbol(name));
                *member = GroupMember::Group(wrap);
            }
            _ => {
                error!(
                    self,
                    DtdInvalidElementDecl,
                    "An occurrence indicator has nothing to apply to."
                );
            }
        }
    }
}
