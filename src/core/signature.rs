//! Parser for C-like routine declarations.
//!
//! ```text
//! int size(string disk, int64 *value)
//! void *malloc(uint size)
//! float64 pow(float64 x, float64 y);
//! ```
//!
//! Every parameter needs a name. A parameter list consisting of a lone
//! `void` declares no parameters, and `void *` is an opaque pointer.

use crate::core::error::{CallError, CallResult};
use crate::core::routine::RoutineDescriptor;
use crate::core::types::{ArgumentDescriptor, TypeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Ident(&'a str),
    Star,
    LParen,
    RParen,
    Comma,
    Semi,
}

struct Parser<'a> {
    text: &'a str,
    tokens: Vec<Token<'a>>,
    pos: usize,
}

/// Parse one declaration into a [`RoutineDescriptor`].
pub fn parse_signature(text: &str) -> CallResult<RoutineDescriptor> {
    Parser::new(text)?.parse()
}

fn tokenize(text: &str) -> Result<Vec<Token<'_>>, String> {
    let mut tokens = Vec::new();
    let bytes = text.as_bytes();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];
        let token = match c {
            b'*' => Token::Star,
            b'(' => Token::LParen,
            b')' => Token::RParen,
            b',' => Token::Comma,
            b';' => Token::Semi,
            c if c.is_ascii_whitespace() => {
                pos += 1;
                continue;
            }
            c if c.is_ascii_alphanumeric() || c == b'_' => {
                let start = pos;
                while pos < bytes.len() && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_')
                {
                    pos += 1;
                }
                tokens.push(Token::Ident(&text[start..pos]));
                continue;
            }
            _ => {
                let ch = text[pos..].chars().next().unwrap_or('?');
                return Err(format!("unexpected character {ch:?} at offset {pos}"));
            }
        };
        tokens.push(token);
        pos += 1;
    }

    Ok(tokens)
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> CallResult<Self> {
        let tokens = tokenize(text).map_err(|reason| CallError::InvalidSignature {
            signature: text.to_string(),
            reason,
        })?;
        Ok(Self {
            text,
            tokens,
            pos: 0,
        })
    }

    fn error(&self, reason: impl Into<String>) -> CallError {
        CallError::InvalidSignature {
            signature: self.text.to_string(),
            reason: reason.into(),
        }
    }

    fn peek(&self) -> Option<Token<'a>> {
        self.tokens.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<Token<'a>> {
        let token = self.peek();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: Token<'a>) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn ident(&mut self) -> Option<&'a str> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                self.pos += 1;
                Some(name)
            }
            _ => None,
        }
    }

    fn parse(mut self) -> CallResult<RoutineDescriptor> {
        let type_name = self
            .ident()
            .ok_or_else(|| self.error("expected result type"))?;
        let result_indirect = self.eat(Token::Star);
        let name = self
            .ident()
            .ok_or_else(|| self.error("expected routine name"))?;
        if !self.eat(Token::LParen) {
            return Err(self.error("expected '(' after routine name"));
        }

        let result = descriptor(type_name, result_indirect)?;
        let args = self.parse_params()?;

        self.eat(Token::Semi);
        if let Some(token) = self.next() {
            return Err(self.error(format!("unexpected {token:?} after declaration")));
        }

        Ok(RoutineDescriptor::new(name, Some(result), args))
    }

    fn parse_params(&mut self) -> CallResult<Vec<ArgumentDescriptor>> {
        let mut args = Vec::new();
        if self.eat(Token::RParen) {
            return Ok(args);
        }
        // `f(void)`
        if self.peek() == Some(Token::Ident("void"))
            && self.tokens.get(self.pos + 1) == Some(&Token::RParen)
        {
            self.pos += 2;
            return Ok(args);
        }

        loop {
            let index = args.len();
            let arg_error = |parser: &Self| parser.error(format!("error in argument {index}"));

            let type_name = self.ident().ok_or_else(|| arg_error(self))?;
            let indirect = self.eat(Token::Star);
            if self.ident().is_none() {
                return Err(arg_error(self));
            }
            let arg = descriptor(type_name, indirect)?;
            if arg.kind == TypeKind::Void && !arg.indirect {
                return Err(self.error(format!("argument {index} cannot be void")));
            }
            args.push(arg);

            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                _ => return Err(self.error("unterminated parameter list")),
            }
        }
    }
}

/// `void *` is an opaque pointer rather than an indirect void.
fn descriptor(type_name: &str, indirect: bool) -> CallResult<ArgumentDescriptor> {
    let kind = TypeKind::from_name(type_name)?;
    Ok(match (kind, indirect) {
        (TypeKind::Void, true) => ArgumentDescriptor::direct(TypeKind::Pointer),
        (kind, indirect) => ArgumentDescriptor::new(kind, indirect),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_routine() {
        let d = parse_signature("void print()").unwrap();
        assert_eq!(d.name, "print");
        assert_eq!(d.result, None);
        assert!(d.args.is_empty());
    }

    #[test]
    fn test_complex_routine() {
        let d = parse_signature("int size(string disk, int64 *value)").unwrap();
        assert_eq!(d.name, "size");
        assert_eq!(d.result, Some(ArgumentDescriptor::direct(TypeKind::Int)));
        assert_eq!(
            d.args,
            vec![
                ArgumentDescriptor::direct(TypeKind::String),
                ArgumentDescriptor::indirect(TypeKind::Int64),
            ]
        );
    }

    #[test]
    fn test_unknown_result_type() {
        assert_eq!(
            parse_signature("xxx print()"),
            Err(CallError::UnknownType { name: "xxx".into() })
        );
    }

    #[test]
    fn test_unknown_argument_type() {
        assert_eq!(
            parse_signature("void print(xxx value)"),
            Err(CallError::UnknownType { name: "xxx".into() })
        );
    }

    #[test]
    fn test_argument_without_name() {
        let err = parse_signature("void print(abc)").unwrap_err();
        match err {
            CallError::InvalidSignature { reason, .. } => {
                assert_eq!(reason, "error in argument 0")
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_pointer_spacing_variants() {
        for text in [
            "void *malloc(uint size)",
            "void* malloc(uint size)",
            "void*malloc(uint size);",
        ] {
            let d = parse_signature(text).unwrap();
            assert_eq!(d.result, Some(ArgumentDescriptor::direct(TypeKind::Pointer)));
            assert_eq!(d.args, vec![ArgumentDescriptor::direct(TypeKind::UInt)]);
        }
    }

    #[test]
    fn test_void_parameter_list() {
        let d = parse_signature("int32 rand(void)").unwrap();
        assert!(d.args.is_empty());
        assert!(parse_signature("int32 f(int32 a, void b)").is_err());
    }

    #[test]
    fn test_trailing_garbage() {
        assert!(matches!(
            parse_signature("int32 f() extra"),
            Err(CallError::InvalidSignature { .. })
        ));
        assert!(matches!(
            parse_signature("int32 f(int32 a"),
            Err(CallError::InvalidSignature { .. })
        ));
        assert!(matches!(
            parse_signature("int32 f[]"),
            Err(CallError::InvalidSignature { .. })
        ));
    }
}
