//! Recursive-descent parser for the XKB text grammar.
//!
//! The grammar is small and closed, so a hand-written descent with one
//! token of lookahead covers it. Error recovery is terminate-and-report:
//! any syntax error abandons the parse of the file with a located
//! diagnostic and no partial tree is returned.

use xkb_core::message::MessageCode;
use xkb_core::{log_err, log_warn, Atom, CompileError, Context, Keysym};

use crate::ast::{
    ActionDecl, BinOp, Decl, Expr, FileType, GroupCompatDef, IncludeStmt, InterpDef, KeyAliasDef,
    KeyTypeDef, KeycodeDef, LedMapDef, LedNameDef, MapFlags, MergeMode, ModMapDef, SymbolsDef,
    UnOp, VModDef, VarDef, XkbFile,
};
use crate::scanner::{Keyword, Scanner, Token};

/// Parses a buffer into its sequence of files/sections. A file may hold
/// one `xkb_keymap` composite or any number of bare component sections.
pub fn parse_string(
    ctx: &Context,
    input: &[u8],
    file_name: &str,
) -> Result<Vec<XkbFile>, CompileError> {
    let scanner = Scanner::new(ctx, input, file_name);
    if !scanner.check_supported_encoding() {
        log_err!(
            ctx,
            Some(MessageCode::InvalidFileEncoding),
            "{}: unexpected non-ASCII leading byte; supported encodings must be \
             backward compatible with ASCII",
            file_name
        );
        return Err(CompileError::Encoding {
            file: file_name.to_owned(),
        });
    }

    let mut parser = Parser::new(ctx, scanner)?;
    let mut files = Vec::new();
    while parser.tok != Token::End {
        files.push(parser.parse_file()?);
    }
    Ok(files)
}

struct Parser<'a> {
    ctx: Context,
    scanner: Scanner<'a>,
    tok: Token,
}

impl<'a> Parser<'a> {
    fn new(ctx: &Context, mut scanner: Scanner<'a>) -> Result<Self, CompileError> {
        let tok = scanner.next_token()?;
        Ok(Self {
            ctx: ctx.clone(),
            scanner,
            tok,
        })
    }

    /// Consumes the current token, returning it.
    fn advance(&mut self) -> Result<Token, CompileError> {
        let next = self.scanner.next_token()?;
        Ok(std::mem::replace(&mut self.tok, next))
    }

    fn error(&self, expected: &str) -> CompileError {
        let (line, column) = self.scanner.token_location();
        let message = format!("expected {expected}, got {:?}", self.tok);
        log_err!(
            self.ctx,
            Some(MessageCode::InvalidXkbSyntax),
            "{}:{}:{}: {}",
            self.scanner.file_name(),
            line,
            column,
            message
        );
        CompileError::Syntax {
            file: self.scanner.file_name().to_owned(),
            line,
            column,
            message,
        }
    }

    fn expect(&mut self, tok: Token, what: &str) -> Result<(), CompileError> {
        if self.tok == tok {
            self.advance()?;
            Ok(())
        } else {
            Err(self.error(what))
        }
    }

    /// An identifier, also accepting keywords in identifier position
    /// (`type`, `group`, `default`, ...).
    fn ident_text(&mut self) -> Result<String, CompileError> {
        match &self.tok {
            Token::Ident(s) => {
                let s = s.clone();
                self.advance()?;
                Ok(s)
            }
            Token::Keyword(kw) => {
                let s = kw.lexeme().to_owned();
                self.advance()?;
                Ok(s)
            }
            _ => Err(self.error("an identifier")),
        }
    }

    fn ident_atom(&mut self) -> Result<Atom, CompileError> {
        let text = self.ident_text()?;
        Ok(self.ctx.atom_intern(&text))
    }

    fn string_text(&mut self, what: &str) -> Result<String, CompileError> {
        match self.advance()? {
            Token::String(s) => Ok(s),
            _ => Err(self.error(what)),
        }
    }

    fn integer(&mut self, what: &str) -> Result<i64, CompileError> {
        match self.advance()? {
            Token::Integer(v) => Ok(v),
            _ => Err(self.error(what)),
        }
    }

    /* Files and sections. */

    fn parse_file(&mut self) -> Result<XkbFile, CompileError> {
        let flags = self.parse_flags()?;
        match self.tok {
            Token::Keyword(Keyword::XkbKeymap | Keyword::XkbSemantics | Keyword::XkbLayout) => {
                self.parse_composite(flags)
            }
            Token::Keyword(kw) if section_file_type(kw).is_some() => self.parse_section(flags),
            _ => Err(self.error("a keymap or component section header")),
        }
    }

    fn parse_flags(&mut self) -> Result<MapFlags, CompileError> {
        let mut flags = MapFlags::empty();
        loop {
            let flag = match self.tok {
                Token::Keyword(Keyword::Partial) => MapFlags::PARTIAL,
                Token::Keyword(Keyword::Default) => MapFlags::DEFAULT,
                Token::Keyword(Keyword::Hidden) => MapFlags::HIDDEN,
                Token::Keyword(Keyword::AlphanumericKeys) => MapFlags::ALPHANUMERIC_KEYS,
                Token::Keyword(Keyword::ModifierKeys) => MapFlags::MODIFIER_KEYS,
                Token::Keyword(Keyword::KeypadKeys) => MapFlags::KEYPAD_KEYS,
                Token::Keyword(Keyword::FunctionKeys) => MapFlags::FUNCTION_KEYS,
                Token::Keyword(Keyword::AlternateGroup) => MapFlags::ALTERNATE_GROUP,
                _ => break,
            };
            flags |= flag;
            self.advance()?;
        }
        Ok(flags)
    }

    fn parse_composite(&mut self, flags: MapFlags) -> Result<XkbFile, CompileError> {
        self.advance()?;
        let name = match &self.tok {
            Token::String(_) => self.string_text("a map name")?,
            _ => String::new(),
        };
        self.expect(Token::OBrace, "'{'")?;
        let mut file = XkbFile::new(FileType::Keymap, name, flags);
        while self.tok != Token::CBrace {
            if self.tok == Token::End {
                return Err(self.error("'}'"));
            }
            file.sections.push(self.parse_file()?);
        }
        self.expect(Token::CBrace, "'}'")?;
        self.expect(Token::Semi, "';'")?;
        Ok(file)
    }

    fn parse_section(&mut self, flags: MapFlags) -> Result<XkbFile, CompileError> {
        let Token::Keyword(kw) = self.tok else {
            return Err(self.error("a section header"));
        };
        let Some(file_type) = section_file_type(kw) else {
            return Err(self.error("a section header"));
        };
        self.advance()?;

        let name = match &self.tok {
            Token::String(_) => self.string_text("a section name")?,
            _ => String::new(),
        };
        self.expect(Token::OBrace, "'{'")?;

        let mut file = XkbFile::new(file_type, name, flags);
        if file_type == FileType::Geometry {
            // Geometry is not compiled; skip the body.
            self.skip_balanced_braces()?;
        } else {
            while self.tok != Token::CBrace {
                if self.tok == Token::End {
                    return Err(self.error("'}'"));
                }
                self.parse_decl(&mut file.defs)?;
            }
            self.expect(Token::CBrace, "'}'")?;
        }
        self.expect(Token::Semi, "';'")?;
        Ok(file)
    }

    /// Consumes tokens until the brace opened before the call closes.
    fn skip_balanced_braces(&mut self) -> Result<(), CompileError> {
        let mut depth = 1usize;
        loop {
            match self.advance()? {
                Token::OBrace => depth += 1,
                Token::CBrace => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                Token::End => return Err(self.error("'}'")),
                _ => {}
            }
        }
    }

    /* Statements. */

    fn parse_decl(&mut self, defs: &mut Vec<Decl>) -> Result<(), CompileError> {
        // Optional merge-mode prefix; a string afterwards makes the
        // whole statement an include.
        let mut merge = MergeMode::Default;
        match self.tok {
            Token::Keyword(Keyword::Include) | Token::Keyword(Keyword::Alternate) => {
                self.advance()?;
                let stmt = self.string_text("an include string")?;
                // Include statements take no terminator; tolerate one.
                if self.tok == Token::Semi {
                    self.advance()?;
                }
                defs.push(Decl::Include(IncludeStmt {
                    merge: MergeMode::Default,
                    stmt,
                }));
                return Ok(());
            }
            Token::Keyword(Keyword::Augment) => {
                merge = MergeMode::Augment;
                self.advance()?;
            }
            Token::Keyword(Keyword::Override) => {
                merge = MergeMode::Override;
                self.advance()?;
            }
            Token::Keyword(Keyword::Replace) => {
                merge = MergeMode::Replace;
                self.advance()?;
            }
            _ => {}
        }
        if merge != MergeMode::Default {
            if let Token::String(_) = &self.tok {
                let stmt = self.string_text("an include string")?;
                if self.tok == Token::Semi {
                    self.advance()?;
                }
                defs.push(Decl::Include(IncludeStmt { merge, stmt }));
                return Ok(());
            }
        }

        match &self.tok {
            Token::KeyName(_) => {
                let Token::KeyName(name) = self.advance()? else {
                    unreachable!()
                };
                self.expect(Token::Equals, "'='")?;
                let value = self.integer("a keycode")?;
                self.expect(Token::Semi, "';'")?;
                defs.push(Decl::Keycode(KeycodeDef { merge, name, value }));
            }
            Token::Keyword(Keyword::Alias) => {
                self.advance()?;
                let Token::KeyName(alias) = self.advance()? else {
                    return Err(self.error("a key name"));
                };
                self.expect(Token::Equals, "'='")?;
                let Token::KeyName(real) = self.advance()? else {
                    return Err(self.error("a key name"));
                };
                self.expect(Token::Semi, "';'")?;
                defs.push(Decl::KeyAlias(KeyAliasDef { merge, alias, real }));
            }
            Token::Keyword(Keyword::Key) => {
                // `key <NAME> {...};` or a `key.field = ...` default.
                self.advance()?;
                if let Token::KeyName(_) = self.tok {
                    let Token::KeyName(key_name) = self.advance()? else {
                        unreachable!()
                    };
                    self.expect(Token::OBrace, "'{'")?;
                    let body = self.parse_comma_var_list(merge)?;
                    self.expect(Token::CBrace, "'}'")?;
                    self.expect(Token::Semi, "';'")?;
                    defs.push(Decl::Symbols(SymbolsDef {
                        merge,
                        key_name,
                        body,
                    }));
                } else {
                    let first = self.ctx.atom_intern("key");
                    defs.push(Decl::Var(self.parse_var_def_rest(merge, first)?));
                }
            }
            Token::Keyword(Keyword::Type) => {
                // `type "NAME" {...};` or a `type.field = ...` default.
                self.advance()?;
                if let Token::String(_) = self.tok {
                    let name = self.string_text("a type name")?;
                    let name = self.ctx.atom_intern(&name);
                    self.expect(Token::OBrace, "'{'")?;
                    let body = self.parse_semi_var_list(merge)?;
                    self.expect(Token::CBrace, "'}'")?;
                    self.expect(Token::Semi, "';'")?;
                    defs.push(Decl::KeyType(KeyTypeDef { merge, name, body }));
                } else {
                    let first = self.ctx.atom_intern("type");
                    defs.push(Decl::Var(self.parse_var_def_rest(merge, first)?));
                }
            }
            Token::Keyword(Keyword::Interpret) => {
                self.advance()?;
                if self.tok == Token::Dot
                    || self.tok == Token::OBracket
                    || self.tok == Token::Equals
                {
                    let first = self.ctx.atom_intern("interpret");
                    defs.push(Decl::Var(self.parse_var_def_rest(merge, first)?));
                } else {
                    self.parse_interpret(merge, defs)?;
                }
            }
            Token::Keyword(Keyword::VirtualModifiers) => {
                self.advance()?;
                loop {
                    let name = self.ident_atom()?;
                    let value = if self.tok == Token::Equals {
                        self.advance()?;
                        Some(self.parse_expr()?)
                    } else {
                        None
                    };
                    defs.push(Decl::VMod(VModDef { merge, name, value }));
                    if self.tok == Token::Comma {
                        self.advance()?;
                    } else {
                        break;
                    }
                }
                self.expect(Token::Semi, "';'")?;
            }
            Token::Keyword(Keyword::ModifierMap) => {
                self.advance()?;
                let modifier = self.ident_atom()?;
                self.expect(Token::OBrace, "'{'")?;
                let mut keys = Vec::new();
                while self.tok != Token::CBrace {
                    match self.advance()? {
                        Token::KeyName(atom) => keys.push(Expr::KeyName(atom)),
                        Token::Ident(name) => keys.push(Expr::Ident(self.ctx.atom_intern(&name))),
                        _ => return Err(self.error("a key name or keysym")),
                    }
                    if self.tok == Token::Comma {
                        self.advance()?;
                    }
                }
                self.expect(Token::CBrace, "'}'")?;
                self.expect(Token::Semi, "';'")?;
                defs.push(Decl::ModMap(ModMapDef {
                    merge,
                    modifier,
                    keys,
                }));
            }
            Token::Keyword(Keyword::Group) => {
                // `group N = ...;` or a `group`-prefixed field.
                self.advance()?;
                if let Token::Integer(_) = self.tok {
                    let group = self.integer("a group number")? as u32;
                    self.expect(Token::Equals, "'='")?;
                    let def = self.parse_expr()?;
                    self.expect(Token::Semi, "';'")?;
                    defs.push(Decl::GroupCompat(GroupCompatDef { merge, group, def }));
                } else {
                    let first = self.ctx.atom_intern("group");
                    defs.push(Decl::Var(self.parse_var_def_rest(merge, first)?));
                }
            }
            Token::Keyword(Keyword::Indicator) => {
                self.advance()?;
                if self.tok == Token::Dot {
                    let first = self.ctx.atom_intern("indicator");
                    defs.push(Decl::Var(self.parse_var_def_rest(merge, first)?));
                } else {
                    self.parse_indicator(merge, false, defs)?;
                }
            }
            Token::Keyword(Keyword::Virtual) => {
                self.advance()?;
                if matches!(self.tok, Token::Keyword(Keyword::Indicator)) {
                    self.advance()?;
                    self.parse_indicator(merge, true, defs)?;
                } else {
                    let first = self.ctx.atom_intern("virtual");
                    defs.push(Decl::Var(self.parse_var_def_rest(merge, first)?));
                }
            }
            _ => {
                let def = self.parse_var_def(merge)?;
                self.expect(Token::Semi, "';'")?;
                defs.push(Decl::Var(def));
            }
        }
        Ok(())
    }

    /// Indicator statement body; the `indicator` keyword has been
    /// consumed.
    fn parse_indicator(
        &mut self,
        merge: MergeMode,
        virtual_: bool,
        defs: &mut Vec<Decl>,
    ) -> Result<(), CompileError> {
        match &self.tok {
            Token::String(_) => {
                let name = self.string_text("an indicator name")?;
                let name = self.ctx.atom_intern(&name);
                self.expect(Token::OBrace, "'{'")?;
                let body = self.parse_semi_var_list(merge)?;
                self.expect(Token::CBrace, "'}'")?;
                self.expect(Token::Semi, "';'")?;
                defs.push(Decl::LedMap(LedMapDef { merge, name, body }));
            }
            Token::Integer(_) => {
                let ndx = self.integer("an indicator index")? as u32;
                self.expect(Token::Equals, "'='")?;
                let name = self.parse_expr()?;
                self.expect(Token::Semi, "';'")?;
                defs.push(Decl::LedName(LedNameDef {
                    merge,
                    ndx,
                    name,
                    virtual_,
                }));
            }
            _ => return Err(self.error("an indicator name or index")),
        }
        Ok(())
    }

    /// Interpret statement body; the `interpret` keyword has been
    /// consumed.
    fn parse_interpret(
        &mut self,
        merge: MergeMode,
        defs: &mut Vec<Decl>,
    ) -> Result<(), CompileError> {
        let sym = match &self.tok {
            Token::Ident(_) | Token::Keyword(_) => {
                let name = self.ident_text()?;
                if name.eq_ignore_ascii_case("any") {
                    None
                } else {
                    Some(self.keysym_from_name(&name))
                }
            }
            Token::Integer(_) => {
                let value = self.integer("a keysym")?;
                Some(self.keysym_from_number(value))
            }
            _ => return Err(self.error("a keysym")),
        };
        let match_expr = if self.tok == Token::Plus {
            self.advance()?;
            Some(self.parse_factor()?)
        } else {
            None
        };
        self.expect(Token::OBrace, "'{'")?;
        let body = self.parse_semi_var_list(merge)?;
        self.expect(Token::CBrace, "'}'")?;
        self.expect(Token::Semi, "';'")?;
        defs.push(Decl::Interp(InterpDef {
            merge,
            sym,
            match_expr,
            body,
        }));
        Ok(())
    }

    /// Semicolon-terminated variable assignments, up to a closing brace.
    fn parse_semi_var_list(&mut self, merge: MergeMode) -> Result<Vec<VarDef>, CompileError> {
        let mut body = Vec::new();
        while self.tok != Token::CBrace {
            if self.tok == Token::End {
                return Err(self.error("'}'"));
            }
            let def = self.parse_var_def(merge)?;
            self.expect(Token::Semi, "';'")?;
            body.push(def);
        }
        Ok(body)
    }

    /// Comma-separated key body items; bare bracketed lists are allowed.
    fn parse_comma_var_list(&mut self, merge: MergeMode) -> Result<Vec<VarDef>, CompileError> {
        let mut body = Vec::new();
        if self.tok == Token::CBrace {
            return Ok(body);
        }
        loop {
            if self.tok == Token::OBracket {
                let value = self.parse_list()?;
                body.push(VarDef {
                    merge,
                    name: None,
                    value,
                });
            } else {
                body.push(self.parse_var_def(merge)?);
            }
            if self.tok == Token::Comma {
                self.advance()?;
            } else {
                break;
            }
        }
        Ok(body)
    }

    fn parse_var_def(&mut self, merge: MergeMode) -> Result<VarDef, CompileError> {
        if self.tok == Token::Exclam {
            self.advance()?;
            let name = self.parse_lhs()?;
            return Ok(VarDef {
                merge,
                name: Some(name),
                value: Expr::Boolean(false),
            });
        }
        let name = self.parse_lhs()?;
        let value = if self.tok == Token::Equals {
            self.advance()?;
            self.parse_expr()?
        } else {
            Expr::Boolean(true)
        };
        Ok(VarDef {
            merge,
            name: Some(name),
            value,
        })
    }

    /// Finishes a variable definition whose leading identifier has
    /// already been consumed (used when a keyword opens the left-hand
    /// side), including the terminating semicolon.
    fn parse_var_def_rest(
        &mut self,
        merge: MergeMode,
        first: Atom,
    ) -> Result<VarDef, CompileError> {
        let name = self.parse_lhs_suffix(first)?;
        let value = if self.tok == Token::Equals {
            self.advance()?;
            self.parse_expr()?
        } else {
            Expr::Boolean(true)
        };
        self.expect(Token::Semi, "';'")?;
        Ok(VarDef {
            merge,
            name: Some(name),
            value,
        })
    }

    /* Expressions. */

    fn parse_lhs(&mut self) -> Result<Expr, CompileError> {
        let first = self.ident_atom()?;
        self.parse_lhs_suffix(first)
    }

    /// The `.field` / `[index]` tail of a left-hand side.
    fn parse_lhs_suffix(&mut self, first: Atom) -> Result<Expr, CompileError> {
        if self.tok == Token::Dot {
            self.advance()?;
            let field = self.ident_atom()?;
            if self.tok == Token::OBracket {
                self.advance()?;
                let entry = self.parse_expr()?;
                self.expect(Token::CBracket, "']'")?;
                return Ok(Expr::ArrayRef {
                    element: Some(first),
                    field,
                    entry: Box::new(entry),
                });
            }
            return Ok(Expr::FieldRef {
                element: first,
                field,
            });
        }
        if self.tok == Token::OBracket {
            self.advance()?;
            let entry = self.parse_expr()?;
            self.expect(Token::CBracket, "']'")?;
            return Ok(Expr::ArrayRef {
                element: None,
                field: first,
                entry: Box::new(entry),
            });
        }
        Ok(Expr::Ident(first))
    }

    fn parse_expr(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_mul()?;
        loop {
            let op = match self.tok {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Subtract,
                _ => break,
            };
            self.advance()?;
            let right = self.parse_mul()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_mul(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_factor()?;
        loop {
            let op = match self.tok {
                Token::Times => BinOp::Multiply,
                Token::Divide => BinOp::Divide,
                _ => break,
            };
            self.advance()?;
            let right = self.parse_factor()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<Expr, CompileError> {
        let op = match self.tok {
            Token::Minus => Some(UnOp::Negate),
            Token::Plus => Some(UnOp::UnaryPlus),
            Token::Exclam => Some(UnOp::Not),
            Token::Invert => Some(UnOp::Invert),
            _ => None,
        };
        if let Some(op) = op {
            self.advance()?;
            let expr = self.parse_factor()?;
            return Ok(Expr::Unary {
                op,
                expr: Box::new(expr),
            });
        }
        self.parse_operand()
    }

    fn parse_operand(&mut self) -> Result<Expr, CompileError> {
        match &self.tok {
            Token::OParen => {
                self.advance()?;
                let expr = self.parse_expr()?;
                self.expect(Token::CParen, "')'")?;
                Ok(expr)
            }
            Token::OBracket => self.parse_list(),
            Token::Integer(_) => {
                let value = self.integer("an integer")?;
                Ok(Expr::Integer(value))
            }
            Token::Float => {
                self.advance()?;
                Ok(Expr::Float)
            }
            Token::String(_) => {
                let s = self.string_text("a string")?;
                Ok(Expr::String(self.ctx.atom_intern(&s)))
            }
            Token::KeyName(_) => {
                let Token::KeyName(atom) = self.advance()? else {
                    unreachable!()
                };
                Ok(Expr::KeyName(atom))
            }
            Token::Ident(_) | Token::Keyword(_) => {
                let name = self.ident_text()?;
                let atom = self.ctx.atom_intern(&name);
                if self.tok == Token::OParen {
                    return Ok(Expr::Action(self.parse_action_args(atom)?));
                }
                if self.tok == Token::Dot {
                    self.advance()?;
                    let field = self.ident_atom()?;
                    if self.tok == Token::OBracket {
                        self.advance()?;
                        let entry = self.parse_expr()?;
                        self.expect(Token::CBracket, "']'")?;
                        return Ok(Expr::ArrayRef {
                            element: Some(atom),
                            field,
                            entry: Box::new(entry),
                        });
                    }
                    return Ok(Expr::FieldRef {
                        element: atom,
                        field,
                    });
                }
                if self.tok == Token::OBracket {
                    self.advance()?;
                    let entry = self.parse_expr()?;
                    self.expect(Token::CBracket, "']'")?;
                    return Ok(Expr::ArrayRef {
                        element: None,
                        field: atom,
                        entry: Box::new(entry),
                    });
                }
                Ok(Expr::Ident(atom))
            }
            _ => Err(self.error("an expression")),
        }
    }

    /// Bracketed list: keysyms or actions, disambiguated by the first
    /// element.
    fn parse_list(&mut self) -> Result<Expr, CompileError> {
        self.expect(Token::OBracket, "'['")?;
        if self.tok == Token::CBracket {
            self.advance()?;
            return Ok(Expr::EmptyList);
        }

        // A first identifier followed by '(' starts an action list.
        if matches!(self.tok, Token::Ident(_) | Token::Keyword(_)) {
            let name = self.ident_text()?;
            let atom = self.ctx.atom_intern(&name);
            if self.tok == Token::OParen {
                let mut actions = vec![self.parse_action_args(atom)?];
                while self.tok == Token::Comma {
                    self.advance()?;
                    let name = self.ident_atom()?;
                    actions.push(self.parse_action_args(name)?);
                }
                self.expect(Token::CBracket, "']'")?;
                return Ok(Expr::ActionList(actions));
            }
            // Keysym list starting with this name.
            let mut levels = vec![vec![self.keysym_from_name(&name)]];
            while self.tok == Token::Comma {
                self.advance()?;
                levels.push(self.parse_keysym_element()?);
            }
            self.expect(Token::CBracket, "']'")?;
            return Ok(Expr::KeysymList(levels));
        }

        let mut levels = vec![self.parse_keysym_element()?];
        while self.tok == Token::Comma {
            self.advance()?;
            levels.push(self.parse_keysym_element()?);
        }
        self.expect(Token::CBracket, "']'")?;
        Ok(Expr::KeysymList(levels))
    }

    /// One keysym-list element: a name, a number, or `{sym, sym}`.
    fn parse_keysym_element(&mut self) -> Result<Vec<Keysym>, CompileError> {
        match &self.tok {
            Token::OBrace => {
                self.advance()?;
                let mut syms = Vec::new();
                while self.tok != Token::CBrace {
                    syms.push(self.parse_single_keysym()?);
                    if self.tok == Token::Comma {
                        self.advance()?;
                    }
                }
                self.expect(Token::CBrace, "'}'")?;
                Ok(syms)
            }
            _ => Ok(vec![self.parse_single_keysym()?]),
        }
    }

    fn parse_single_keysym(&mut self) -> Result<Keysym, CompileError> {
        match &self.tok {
            Token::Ident(_) | Token::Keyword(_) => {
                let name = self.ident_text()?;
                Ok(self.keysym_from_name(&name))
            }
            Token::Integer(_) => {
                let value = self.integer("a keysym")?;
                Ok(self.keysym_from_number(value))
            }
            _ => Err(self.error("a keysym")),
        }
    }

    fn keysym_from_name(&self, name: &str) -> Keysym {
        if let Some(sym) = Keysym::from_name(name) {
            return sym;
        }
        if let Some(sym) = Keysym::from_name_insensitive(name) {
            log_warn!(
                self.ctx,
                Some(MessageCode::DeprecatedKeysymName),
                "{}: keysym name \"{}\" differs from the canonical \"{}\" only in case",
                self.scanner.file_name(),
                name,
                sym.name()
            );
            return sym;
        }
        log_warn!(
            self.ctx,
            Some(MessageCode::UnrecognizedKeysym),
            "{}: unrecognized keysym \"{}\"",
            self.scanner.file_name(),
            name
        );
        Keysym::NO_SYMBOL
    }

    fn keysym_from_number(&self, value: i64) -> Keysym {
        if (0..=9).contains(&value) {
            return Keysym(0x30 + value as u32);
        }
        if (0..=i64::from(Keysym::MAX)).contains(&value) {
            log_warn!(
                self.ctx,
                Some(MessageCode::NumericKeysym),
                "{}: numeric keysym \"0x{:x}\"",
                self.scanner.file_name(),
                value
            );
            return Keysym(value as u32);
        }
        log_warn!(
            self.ctx,
            Some(MessageCode::InvalidNumericKeysym),
            "{}: invalid numeric keysym {}",
            self.scanner.file_name(),
            value
        );
        Keysym::NO_SYMBOL
    }

    /// Action argument list; the opening parenthesis is the current
    /// token.
    fn parse_action_args(&mut self, name: Atom) -> Result<ActionDecl, CompileError> {
        self.expect(Token::OParen, "'('")?;
        let mut args = Vec::new();
        if self.tok != Token::CParen {
            loop {
                args.push(self.parse_action_arg()?);
                if self.tok == Token::Comma {
                    self.advance()?;
                } else {
                    break;
                }
            }
        }
        self.expect(Token::CParen, "')'")?;
        Ok(ActionDecl { name, args })
    }

    fn parse_action_arg(&mut self) -> Result<Expr, CompileError> {
        if self.tok == Token::Exclam {
            self.advance()?;
            let expr = self.parse_lhs()?;
            return Ok(Expr::Unary {
                op: UnOp::Not,
                expr: Box::new(expr),
            });
        }
        let lhs = self.parse_factor()?;
        if self.tok == Token::Equals {
            self.advance()?;
            let value = self.parse_expr()?;
            return Ok(Expr::Binary {
                op: BinOp::Assign,
                left: Box::new(lhs),
                right: Box::new(value),
            });
        }
        Ok(lhs)
    }
}

fn section_file_type(kw: Keyword) -> Option<FileType> {
    Some(match kw {
        Keyword::XkbKeycodes => FileType::Keycodes,
        Keyword::XkbTypes => FileType::Types,
        Keyword::XkbCompatmap => FileType::Compat,
        Keyword::XkbSymbols => FileType::Symbols,
        Keyword::XkbGeometry => FileType::Geometry,
        _ => return None,
    })
}
