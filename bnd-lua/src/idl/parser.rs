//! Recursive-descent parser over the token stream.
//!
//! The cursor only moves forward and looks at most one token ahead.

use tracing::debug;

use super::ast::*;
use super::lexer::{Token, TokenKind, tokenize};
use crate::error::ParseError;

type Result<T> = std::result::Result<T, ParseError>;

const DEFINITION_KINDS: &str =
    "'namespace', 'enum', 'dictionary', 'interface', 'callback', or 'event'";

/// Parse a whole declaration file.
pub fn parse(source: &str) -> Result<IdlFile> {
    let tokens = tokenize(source)?;
    Parser { tokens, cursor: 0 }.file()
}

struct Parser {
    tokens: Vec<Token>,
    cursor: usize,
}

impl Parser {
    // -----------------------------------------------------------------------
    // Cursor helpers
    // -----------------------------------------------------------------------

    fn peek(&self) -> &Token {
        // The stream always ends in Eof, and the cursor never passes it.
        &self.tokens[self.cursor.min(self.tokens.len() - 1)]
    }

    fn peek_second(&self) -> &Token {
        &self.tokens[(self.cursor + 1).min(self.tokens.len() - 1)]
    }

    fn at_punct(&self, p: &str) -> bool {
        let tok = self.peek();
        tok.kind == TokenKind::Punct && tok.value == p
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if tok.kind != TokenKind::Eof {
            self.cursor += 1;
        }
        tok
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token> {
        let tok = self.peek();
        if tok.kind != kind {
            return Err(ParseError::new(
                tok.line,
                format!("expected {kind}, found {} '{}'", tok.kind, tok.value),
            ));
        }
        Ok(self.advance())
    }

    fn expect_punct(&mut self, p: &str) -> Result<()> {
        if !self.at_punct(p) {
            let tok = self.peek();
            return Err(ParseError::new(
                tok.line,
                format!("expected '{p}', found {} '{}'", tok.kind, tok.value),
            ));
        }
        self.advance();
        Ok(())
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        let tok = self.peek();
        if tok.kind != TokenKind::Identifier || tok.value != keyword {
            return Err(ParseError::new(
                tok.line,
                format!("expected '{keyword}', found {} '{}'", tok.kind, tok.value),
            ));
        }
        self.advance();
        Ok(())
    }

    fn ident(&mut self) -> Result<String> {
        Ok(self.expect(TokenKind::Identifier)?.value)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.at_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn number<T: std::str::FromStr>(&mut self) -> Result<T> {
        let tok = self.expect(TokenKind::Number)?;
        tok.value
            .parse()
            .map_err(|_| ParseError::new(tok.line, format!("number '{}' out of range", tok.value)))
    }

    // -----------------------------------------------------------------------
    // Grammar
    // -----------------------------------------------------------------------

    fn file(mut self) -> Result<IdlFile> {
        let mut file = IdlFile::default();
        if self.at_punct("[") {
            file.attrs = self.attributes()?;
        }

        while self.peek().kind != TokenKind::Eof {
            let attrs = self.optional_attributes()?;
            let tok = self.peek().clone();
            if tok.kind != TokenKind::Identifier {
                return Err(ParseError::new(
                    tok.line,
                    format!("expected {DEFINITION_KINDS}, found {} '{}'", tok.kind, tok.value),
                ));
            }
            match tok.value.as_str() {
                "namespace" => {
                    if file.namespace.is_some() {
                        return Err(ParseError::new(tok.line, "multiple namespaces in one file"));
                    }
                    if !attrs.is_empty() {
                        let keys: Vec<&str> = attrs.keys().map(String::as_str).collect();
                        debug!(line = tok.line, ?keys, "attributes before namespace are ignored");
                    }
                    file.namespace = Some(self.namespace()?);
                }
                "enum" => file.enums.push(self.enumeration(attrs)?),
                "dictionary" => file.dictionaries.push(self.dictionary(attrs)?),
                "interface" => file.interfaces.push(self.interface(attrs)?),
                "callback" => file.callbacks.push(self.callback(attrs)?),
                "event" => file.events.push(self.event(attrs)?),
                other => {
                    return Err(ParseError::new(
                        tok.line,
                        format!("expected {DEFINITION_KINDS}, found '{other}'"),
                    ));
                }
            }
        }
        Ok(file)
    }

    /// `[ Key ( = "value" )? ( , Key ... )* ]`
    fn attributes(&mut self) -> Result<Attributes> {
        self.expect_punct("[")?;
        let mut attrs = Attributes::new();
        loop {
            let key = self.ident()?;
            let value = if self.eat_punct("=") {
                self.expect(TokenKind::StringLiteral)?.value
            } else {
                String::new()
            };
            attrs.insert(key, value);
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct("]")?;
        Ok(attrs)
    }

    fn optional_attributes(&mut self) -> Result<Attributes> {
        if self.at_punct("[") {
            self.attributes()
        } else {
            Ok(Attributes::new())
        }
    }

    /// `namespace Name { Operation* };`
    fn namespace(&mut self) -> Result<Namespace> {
        self.expect_keyword("namespace")?;
        let name = self.ident()?;
        self.expect_punct("{")?;
        let mut operations = Vec::new();
        while !self.at_punct("}") {
            let attrs = self.optional_attributes()?;
            operations.push(self.operation(attrs)?);
        }
        self.expect_punct("}")?;
        self.expect_punct(";")?;
        Ok(Namespace { name, operations })
    }

    /// `Type name ( Params ) ;`
    fn operation(&mut self, attrs: Attributes) -> Result<Operation> {
        let ret = self.ty()?;
        let name = self.ident()?;
        let params = self.param_list()?;
        self.expect_punct(";")?;
        Ok(Operation {
            name,
            ret,
            params,
            attrs,
        })
    }

    /// `( (Type name (, Type name)*)? )`
    fn param_list(&mut self) -> Result<Vec<Param>> {
        self.expect_punct("(")?;
        let mut params = Vec::new();
        if !self.at_punct(")") {
            loop {
                let ty = self.ty()?;
                let name = self.ident()?;
                params.push(Param { name, ty });
                if !self.eat_punct(",") {
                    break;
                }
            }
        }
        self.expect_punct(")")?;
        Ok(params)
    }

    /// `enum Name { "ITEM" (= N)? (,)? ... };`
    fn enumeration(&mut self, attrs: Attributes) -> Result<Enum> {
        self.expect_keyword("enum")?;
        let name = self.ident()?;
        self.expect_punct("{")?;
        let mut items = Vec::new();
        while !self.at_punct("}") {
            let item = self.expect(TokenKind::StringLiteral)?.value;
            let value = if self.eat_punct("=") {
                Some(self.number()?)
            } else {
                None
            };
            items.push(EnumItem { name: item, value });
            self.eat_punct(",");
        }
        self.expect_punct("}")?;
        self.expect_punct(";")?;
        Ok(Enum { name, items, attrs })
    }

    /// `dictionary Name { ([Attrs])? Type name ([N])? ; ... };`
    fn dictionary(&mut self, attrs: Attributes) -> Result<Dictionary> {
        self.expect_keyword("dictionary")?;
        let name = self.ident()?;
        self.expect_punct("{")?;
        let mut fields = Vec::new();
        while !self.at_punct("}") {
            let field_attrs = self.optional_attributes()?;
            let mut ty = self.ty()?;
            let field_name = self.ident()?;
            if self.eat_punct("[") {
                ty.array_len = Some(self.number()?);
                self.expect_punct("]")?;
            }
            self.expect_punct(";")?;
            fields.push(Field {
                name: field_name,
                ty,
                attrs: field_attrs,
            });
        }
        self.expect_punct("}")?;
        self.expect_punct(";")?;
        Ok(Dictionary {
            name,
            fields,
            attrs,
        })
    }

    /// `interface Name { ([Attrs])? Type method ( Params ) ; ... };`
    fn interface(&mut self, attrs: Attributes) -> Result<Interface> {
        self.expect_keyword("interface")?;
        let name = self.ident()?;
        self.expect_punct("{")?;
        let mut methods = Vec::new();
        while !self.at_punct("}") {
            let method_attrs = self.optional_attributes()?;
            methods.push(self.operation(method_attrs)?);
        }
        self.expect_punct("}")?;
        self.expect_punct(";")?;
        Ok(Interface {
            name,
            methods,
            attrs,
        })
    }

    /// `callback Name = Type ( Params ) ;`
    fn callback(&mut self, attrs: Attributes) -> Result<Callback> {
        self.expect_keyword("callback")?;
        let name = self.ident()?;
        self.expect_punct("=")?;
        let ret = self.ty()?;
        let params = self.param_list()?;
        self.expect_punct(";")?;
        Ok(Callback {
            name,
            params,
            ret,
            attrs,
        })
    }

    /// `event name ( Params ) : CType { arrayBlock* };`
    fn event(&mut self, attrs: Attributes) -> Result<EventAdapter> {
        self.expect_keyword("event")?;
        let name = self.ident()?;
        let params = self.param_list()?;
        self.expect_punct(":")?;
        let c_return_type = self.ident()?;
        self.expect_punct("{")?;
        let mut arrays = Vec::new();
        while !self.at_punct("}") {
            arrays.push(self.event_array()?);
        }
        self.expect_punct("}")?;
        self.expect_punct(";")?;
        Ok(EventAdapter {
            name,
            params,
            c_return_type,
            arrays,
            attrs,
        })
    }

    /// `luaField ( cArray , cCount ) { Type name = cAccessor ; ... } ;`
    fn event_array(&mut self) -> Result<EventArray> {
        let name = self.ident()?;
        self.expect_punct("(")?;
        let c_array = self.ident()?;
        self.expect_punct(",")?;
        let c_count = self.ident()?;
        self.expect_punct(")")?;
        self.expect_punct("{")?;
        let mut fields = Vec::new();
        while !self.at_punct("}") {
            let ty = self.ty()?;
            let field_name = self.ident()?;
            self.expect_punct("=")?;
            let c_accessor = self.ident()?;
            self.expect_punct(";")?;
            fields.push(EventField {
                name: field_name,
                c_accessor,
                ty,
            });
        }
        self.expect_punct("}")?;
        self.expect_punct(";")?;
        Ok(EventArray {
            name,
            c_array,
            c_count,
            fields,
        })
    }

    /// A primitive spelling or a type name, optionally followed by `[N]`.
    ///
    /// `long long`, `unsigned short`, `unsigned long` and
    /// `unsigned long long` need one token of lookahead.
    fn ty(&mut self) -> Result<IdlType> {
        let tok = self.expect(TokenKind::Identifier)?;
        let name = match tok.value.as_str() {
            "long" => {
                if self.peek_is_ident("long") {
                    self.advance();
                    "long long".to_string()
                } else {
                    "long".to_string()
                }
            }
            "unsigned" => {
                let next = self.expect(TokenKind::Identifier)?;
                match next.value.as_str() {
                    "short" => "unsigned short".to_string(),
                    "long" if self.peek_is_ident("long") => {
                        self.advance();
                        "unsigned long long".to_string()
                    }
                    "long" => "unsigned long".to_string(),
                    other => {
                        return Err(ParseError::new(
                            next.line,
                            format!("expected 'short' or 'long' after 'unsigned', found '{other}'"),
                        ));
                    }
                }
            }
            other => other.to_string(),
        };
        let mut ty = IdlType::named(name);
        // `Type[N] name` in parameter position.  In a dictionary the suffix
        // follows the field name instead and the next token is an identifier.
        if self.at_punct("[") && self.peek_second().kind == TokenKind::Number {
            self.advance();
            ty.array_len = Some(self.number()?);
            self.expect_punct("]")?;
        }
        Ok(ty)
    }

    fn peek_is_ident(&self, value: &str) -> bool {
        let tok = self.peek();
        tok.kind == TokenKind::Identifier && tok.value == value
    }
}
