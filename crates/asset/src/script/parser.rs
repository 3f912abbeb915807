//! Recursive-descent parser over the token stream.

use super::{
    Call, Field, FunctionDecl, Item, ObjectDecl, ObjectKind, Script, ScriptError, Value,
    lexer::{Lexer, Token, TokenKind},
};

/// Parse a whole script.
pub fn parse_script(source: &str) -> Result<Script, ScriptError> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser::new(tokens).script()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn script(mut self) -> Result<Script, ScriptError> {
        let mut items = Vec::new();
        while !self.at(&TokenKind::Eof) {
            // Stray semicolons between items are harmless.
            if self.eat(&TokenKind::Semicolon) {
                continue;
            }
            items.push(self.item()?);
        }
        Ok(Script { items })
    }

    fn item(&mut self) -> Result<Item, ScriptError> {
        let keyword = match &self.peek().kind {
            TokenKind::Ident(s) => s.to_ascii_lowercase(),
            _ => String::new(),
        };
        match keyword.as_str() {
            "singleton" => {
                self.bump();
                Ok(Item::Object(self.object(ObjectKind::Singleton)?))
            }
            "new" => {
                self.bump();
                Ok(Item::Object(self.object(ObjectKind::New)?))
            }
            "function" => {
                self.bump();
                Ok(Item::Function(self.function()?))
            }
            _ => Ok(Item::Call(self.call()?)),
        }
    }

    fn object(&mut self, kind: ObjectKind) -> Result<ObjectDecl, ScriptError> {
        let line = self.peek().line;
        let class = self.ident("object class")?;
        self.expect(TokenKind::LParen)?;
        let name = match self.peek().kind.clone() {
            TokenKind::Ident(s) | TokenKind::Str(s) => {
                self.bump();
                s
            }
            // Anonymous object.
            TokenKind::RParen => String::new(),
            _ => return Err(self.unexpected("object name")),
        };
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::LBrace)?;

        let mut fields = Vec::new();
        while !self.eat(&TokenKind::RBrace) {
            fields.push(self.field()?);
        }
        self.eat(&TokenKind::Semicolon);

        Ok(ObjectDecl {
            kind,
            class,
            name,
            fields,
            line,
        })
    }

    fn field(&mut self) -> Result<Field, ScriptError> {
        let name = self.ident("field name")?;
        let index = if self.eat(&TokenKind::LBracket) {
            let token = self.peek().clone();
            let index = match &token.kind {
                TokenKind::Number(text) => text.parse::<u32>().map_err(|_| {
                    ScriptError::InvalidNumber {
                        text: text.clone(),
                        line: token.line,
                        column: token.column,
                    }
                })?,
                _ => return Err(self.unexpected("field index")),
            };
            self.bump();
            self.expect(TokenKind::RBracket)?;
            Some(index)
        } else {
            None
        };
        self.expect(TokenKind::Eq)?;
        let value = self.value()?.to_text();
        self.expect(TokenKind::Semicolon)?;
        Ok(Field { name, index, value })
    }

    fn function(&mut self) -> Result<FunctionDecl, ScriptError> {
        let line = self.peek().line;
        let first = self.ident("function name")?;
        let (namespace, name) = if self.eat(&TokenKind::ColonColon) {
            (Some(first), self.ident("method name")?)
        } else {
            (None, first)
        };

        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        if !self.eat(&TokenKind::RParen) {
            loop {
                params.push(self.ident("parameter")?);
                if self.eat(&TokenKind::RParen) {
                    break;
                }
                self.expect(TokenKind::Comma)?;
            }
        }

        self.expect(TokenKind::LBrace)?;
        let mut body = Vec::new();
        while !self.eat(&TokenKind::RBrace) {
            if self.eat(&TokenKind::Semicolon) {
                continue;
            }
            body.push(self.call()?);
        }

        Ok(FunctionDecl {
            namespace,
            name,
            params,
            body,
            line,
        })
    }

    fn call(&mut self) -> Result<Call, ScriptError> {
        let line = self.peek().line;
        let first = self.ident("statement")?;
        let (receiver, method) = if self.eat(&TokenKind::Dot) {
            (Some(first), self.ident("method name")?)
        } else {
            (None, first)
        };

        self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        if !self.eat(&TokenKind::RParen) {
            loop {
                args.push(self.value()?);
                if self.eat(&TokenKind::RParen) {
                    break;
                }
                self.expect(TokenKind::Comma)?;
            }
        }
        self.expect(TokenKind::Semicolon)?;

        Ok(Call {
            receiver,
            method,
            args,
            line,
        })
    }

    fn value(&mut self) -> Result<Value, ScriptError> {
        let token = self.peek().clone();
        let value = match token.kind {
            TokenKind::Str(s) => Value::Str(s),
            TokenKind::Number(text) => parse_number(&text).ok_or(ScriptError::InvalidNumber {
                text,
                line: token.line,
                column: token.column,
            })?,
            TokenKind::Ident(s) if s.eq_ignore_ascii_case("true") => Value::Bool(true),
            TokenKind::Ident(s) if s.eq_ignore_ascii_case("false") => Value::Bool(false),
            TokenKind::Ident(s) => Value::Ident(s),
            _ => return Err(self.unexpected("value")),
        };
        self.bump();
        Ok(value)
    }

    fn ident(&mut self, what: &str) -> Result<String, ScriptError> {
        match &self.peek().kind {
            TokenKind::Ident(s) => {
                let s = s.clone();
                self.bump();
                Ok(s)
            }
            _ => Err(self.unexpected(what)),
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), ScriptError> {
        if self.eat(&kind) {
            Ok(())
        } else {
            Err(self.unexpected(&kind.describe()))
        }
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn at(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn peek(&self) -> &Token {
        // The lexer always terminates the stream with Eof.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn bump(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn unexpected(&self, expected: &str) -> ScriptError {
        let token = self.peek();
        ScriptError::Unexpected {
            expected: expected.to_string(),
            found: token.kind.describe(),
            line: token.line,
            column: token.column,
        }
    }
}

fn parse_number(text: &str) -> Option<Value> {
    if let Ok(i) = text.parse::<i64>() {
        return Some(Value::Int(i));
    }
    text.parse::<f64>().ok().map(Value::Float)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTOR: &str = r#"
echo("Creating MikuDAE");

singleton TSShapeConstructor(MikuDAE)
{
   baseShape = "./Miku_Hatsune.pmd";
   unit = "1.0";
   upAxis = "DEFAULT";
};

function MikuDAE::onLoad(%this)
{
   %this.addSequence( "./kishimen.vmd ambient", "kishimen", 0, -1, true, false, true);
   %this.addSequence( "./err.vmd ambient", "err", 0, -1);
}
"#;

    #[test]
    fn parses_object_function_and_call() {
        let script = parse_script(DESCRIPTOR).expect("parse descriptor");
        assert_eq!(script.items.len(), 3);

        let call = script.calls().next().unwrap();
        assert_eq!(call.method, "echo");
        assert_eq!(call.args, vec![Value::Str("Creating MikuDAE".into())]);

        let obj = script.objects_of_class("tsshapeconstructor").next().unwrap();
        assert_eq!(obj.name, "MikuDAE");
        assert_eq!(obj.field("baseShape", None), Some("./Miku_Hatsune.pmd"));

        let f = script.function("MikuDAE", "onLoad").unwrap();
        assert_eq!(f.params, vec!["%this".to_string()]);
        assert_eq!(f.body.len(), 2);
        assert_eq!(f.body[0].receiver.as_deref(), Some("%this"));
        assert_eq!(
            f.body[0].args[2..],
            [
                Value::Int(0),
                Value::Int(-1),
                Value::Bool(true),
                Value::Bool(false),
                Value::Bool(true)
            ]
        );
    }

    #[test]
    fn indexed_fields_and_unquoted_values() {
        let script = parse_script(
            "new Material(M) { diffuseColor[0] = \"1 1 1 1\"; specularPower[0] = 5; };",
        )
        .unwrap();
        let obj = script.objects().next().unwrap();
        assert_eq!(obj.kind, ObjectKind::New);
        assert_eq!(obj.field("diffuseColor", Some(0)), Some("1 1 1 1"));
        assert_eq!(obj.field("specularPower", Some(0)), Some("5"));
    }

    #[test]
    fn reports_position_of_missing_semicolon() {
        let err = parse_script("singleton Material(M)\n{\n   mapTo = \"x\"\n};").unwrap_err();
        match err {
            ScriptError::Unexpected { expected, line, .. } => {
                assert_eq!(expected, "';'");
                assert_eq!(line, 4);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_assignment_statements_in_functions() {
        assert!(parse_script("function f() { %x = 1; }").is_err());
    }
}
