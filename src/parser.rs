//! Recursive-descent parser building the AST module described in
//! `SPEC_FULL.md` §3's grammar.

use crate::ast::*;
use crate::error::{Loc, SemaError, SyntaxError};
use crate::lexer::{Lexer, Spanned, Token};
use crate::types::{layout_struct, StructDef, Type};
use std::collections::HashMap;
use std::rc::Rc;

pub struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    structs: HashMap<String, Rc<StructDef>>,
}

pub fn parse(src: &str) -> Result<Module, SyntaxError> {
    let tokens = Lexer::new(src).tokenize()?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        structs: HashMap::new(),
    };
    parser.parse_module().map_err(|e| match e {
        ParseErr::Syntax(s) => s,
        ParseErr::Sema(s) => {
            // Type resolution errors surfacing during parsing are reported
            // through the same `SyntaxError` channel as a parse failure so
            // callers only need to handle one error type at this stage;
            // `CompileError` downstream distinguishes sema errors that arise
            // later, during the full typecheck pass.
            SyntaxError::UnexpectedToken {
                loc: sema_loc(&s),
                found: s.to_string(),
                expected: "a valid type".into(),
            }
        }
    })
}

fn sema_loc(e: &SemaError) -> Loc {
    match e {
        SemaError::UndefinedType { loc, .. } => *loc,
        _ => Loc::default(),
    }
}

enum ParseErr {
    Syntax(SyntaxError),
    Sema(SemaError),
}

impl From<SyntaxError> for ParseErr {
    fn from(e: SyntaxError) -> Self {
        ParseErr::Syntax(e)
    }
}

impl From<SemaError> for ParseErr {
    fn from(e: SemaError) -> Self {
        ParseErr::Sema(e)
    }
}

type PResult<T> = Result<T, ParseErr>;

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos].token
    }

    fn loc(&self) -> Loc {
        self.tokens[self.pos].loc
    }

    fn bump(&mut self) -> Token {
        let tok = self.tokens[self.pos].token.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, expected: &Token, what: &str) -> PResult<()> {
        if self.peek() == expected {
            self.bump();
            Ok(())
        } else {
            Err(ParseErr::Syntax(SyntaxError::UnexpectedToken {
                loc: self.loc(),
                found: format!("{:?}", self.peek()),
                expected: what.into(),
            }))
        }
    }

    fn expect_ident(&mut self, what: &str) -> PResult<String> {
        match self.peek().clone() {
            Token::Ident(name) => {
                self.bump();
                Ok(name)
            }
            other => Err(ParseErr::Syntax(SyntaxError::UnexpectedToken {
                loc: self.loc(),
                found: format!("{other:?}"),
                expected: what.into(),
            })),
        }
    }

    fn parse_module(&mut self) -> PResult<Module> {
        let mut structs = Vec::new();
        let mut globals = Vec::new();
        let mut functions = Vec::new();

        while self.peek() != &Token::Eof {
            match self.peek() {
                Token::Struct => structs.push(self.parse_struct()?),
                Token::Var => globals.push(self.parse_global()?),
                Token::Func => functions.push(self.parse_function()?),
                other => {
                    return Err(ParseErr::Syntax(SyntaxError::UnexpectedToken {
                        loc: self.loc(),
                        found: format!("{other:?}"),
                        expected: "`func`, `struct`, or `var`".into(),
                    }))
                }
            }
        }

        Ok(Module {
            structs,
            globals,
            functions,
        })
    }

    fn parse_struct(&mut self) -> PResult<Rc<StructDef>> {
        self.expect(&Token::Struct, "`struct`")?;
        let name = self.expect_ident("a struct name")?;
        self.expect(&Token::ColonEq, "`:=`")?;
        let mut fields = Vec::new();
        loop {
            let fname = self.expect_ident("a field name")?;
            self.expect(&Token::Colon, "`:`")?;
            let ty = self.parse_type()?;
            fields.push((fname, ty));
            if self.peek() == &Token::Comma {
                self.bump();
                continue;
            }
            break;
        }
        let def = Rc::new(layout_struct(name.clone(), fields));
        self.structs.insert(name, def.clone());
        Ok(def)
    }

    fn parse_global(&mut self) -> PResult<GlobalVar> {
        let loc = self.loc();
        self.expect(&Token::Var, "`var`")?;
        let name = self.expect_ident("a variable name")?;
        self.expect(&Token::Colon, "`:`")?;
        let ty = self.parse_type()?;
        Ok(GlobalVar { loc, name, ty })
    }

    fn parse_type(&mut self) -> PResult<Type> {
        let loc = self.loc();
        let mut ty = match self.bump() {
            Token::Ident(name) if name == "s32" => Type::S32,
            Token::Ident(name) => match self.structs.get(&name) {
                Some(def) => Type::Struct(def.clone()),
                None => {
                    return Err(ParseErr::Sema(SemaError::UndefinedType { loc, name }))
                }
            },
            other => {
                return Err(ParseErr::Syntax(SyntaxError::UnexpectedToken {
                    loc,
                    found: format!("{other:?}"),
                    expected: "a type".into(),
                }))
            }
        };
        while self.peek() == &Token::LBracket {
            self.bump();
            let count = self.expect_int("an array length")?;
            self.expect(&Token::RBracket, "`]`")?;
            ty = Type::Array(Box::new(ty), count as usize);
        }
        Ok(ty)
    }

    fn expect_int(&mut self, what: &str) -> PResult<i64> {
        match self.bump() {
            Token::Int(v) => Ok(v),
            other => Err(ParseErr::Syntax(SyntaxError::UnexpectedToken {
                loc: self.loc(),
                found: format!("{other:?}"),
                expected: what.into(),
            })),
        }
    }

    fn parse_function(&mut self) -> PResult<Function> {
        let loc = self.loc();
        self.expect(&Token::Func, "`func`")?;
        let name = self.expect_ident("a function name")?;
        self.expect(&Token::LParen, "`(`")?;
        let mut params = Vec::new();
        if self.peek() != &Token::RParen {
            loop {
                let pname = self.expect_ident("a parameter name")?;
                self.expect(&Token::Colon, "`:`")?;
                let pty = self.parse_type()?;
                params.push(Param { name: pname, ty: pty });
                if self.peek() == &Token::Comma {
                    self.bump();
                    continue;
                }
                break;
            }
        }
        self.expect(&Token::RParen, "`)`")?;
        self.expect(&Token::Colon, "`:`")?;
        let return_type = self.parse_type()?;
        self.expect(&Token::Begin, "`begin`")?;
        let mut body = Vec::new();
        while self.peek() != &Token::End {
            body.push(self.parse_statement()?);
        }
        self.expect(&Token::End, "`end`")?;
        Ok(Function {
            loc,
            name,
            params,
            return_type,
            body,
        })
    }

    fn parse_statement(&mut self) -> PResult<Statement> {
        let loc = self.loc();
        let kind = match self.peek().clone() {
            Token::Var => {
                self.bump();
                let name = self.expect_ident("a variable name")?;
                self.expect(&Token::Colon, "`:`")?;
                let ty = self.parse_type()?;
                StmtKind::VarDecl { name, ty }
            }
            Token::If => {
                self.bump();
                let cond = self.parse_expr()?;
                self.expect(&Token::Then, "`then`")?;
                let then_branch = Box::new(self.parse_statement()?);
                let else_branch = if self.peek() == &Token::Else {
                    self.bump();
                    Some(Box::new(self.parse_statement()?))
                } else {
                    None
                };
                StmtKind::If {
                    cond,
                    then_branch,
                    else_branch,
                }
            }
            Token::While => {
                self.bump();
                let cond = self.parse_expr()?;
                self.expect(&Token::Do, "`do`")?;
                let body = Box::new(self.parse_statement()?);
                StmtKind::While { cond, body }
            }
            Token::Begin => {
                self.bump();
                let mut stmts = Vec::new();
                while self.peek() != &Token::End {
                    stmts.push(self.parse_statement()?);
                }
                self.expect(&Token::End, "`end`")?;
                StmtKind::Block(stmts)
            }
            Token::Print => {
                self.bump();
                let mut args = vec![self.parse_expr()?];
                while self.peek() == &Token::Comma {
                    self.bump();
                    args.push(self.parse_expr()?);
                }
                StmtKind::Print(args)
            }
            Token::Return => {
                self.bump();
                StmtKind::Return(self.parse_expr()?)
            }
            Token::Break => {
                self.bump();
                StmtKind::Break
            }
            Token::Continue => {
                self.bump();
                StmtKind::Continue
            }
            _ => {
                let lhs = self.parse_expr()?;
                self.expect(&Token::ColonEq, "`:=`")?;
                let rhs = self.parse_expr()?;
                StmtKind::Assign { lhs, rhs }
            }
        };
        Ok(Statement::new(loc, kind))
    }

    fn parse_expr(&mut self) -> PResult<Expression> {
        self.parse_equality()
    }

    fn parse_equality(&mut self) -> PResult<Expression> {
        let mut lhs = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Token::Eq => BinOp::Eq,
                Token::Neq => BinOp::Neq,
                _ => break,
            };
            let loc = self.loc();
            self.bump();
            let rhs = self.parse_relational()?;
            lhs = Expression::new(
                loc,
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
            );
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> PResult<Expression> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Token::Lt => BinOp::Lt,
                Token::Le => BinOp::Le,
                Token::Gt => BinOp::Gt,
                Token::Ge => BinOp::Ge,
                _ => break,
            };
            let loc = self.loc();
            self.bump();
            let rhs = self.parse_additive()?;
            lhs = Expression::new(
                loc,
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
            );
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> PResult<Expression> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            let loc = self.loc();
            self.bump();
            let rhs = self.parse_multiplicative()?;
            lhs = Expression::new(
                loc,
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
            );
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> PResult<Expression> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::Shl => BinOp::Shl,
                Token::Shr => BinOp::Shr,
                _ => break,
            };
            let loc = self.loc();
            self.bump();
            let rhs = self.parse_unary()?;
            lhs = Expression::new(
                loc,
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
            );
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> PResult<Expression> {
        let loc = self.loc();
        match self.peek() {
            Token::Minus => {
                self.bump();
                let operand = self.parse_postfix()?;
                Ok(Expression::new(
                    loc,
                    ExprKind::Unary {
                        op: UnOp::Neg,
                        operand: Box::new(operand),
                    },
                ))
            }
            Token::Bang => {
                self.bump();
                let operand = self.parse_postfix()?;
                Ok(Expression::new(
                    loc,
                    ExprKind::Unary {
                        op: UnOp::Not,
                        operand: Box::new(operand),
                    },
                ))
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> PResult<Expression> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Token::Dot => {
                    let loc = self.loc();
                    self.bump();
                    let field = self.expect_ident("a field name")?;
                    expr = Expression::new(
                        loc,
                        ExprKind::Field {
                            base: Box::new(expr),
                            field,
                        },
                    );
                }
                Token::LBracket => {
                    let loc = self.loc();
                    self.bump();
                    let index = self.parse_expr()?;
                    self.expect(&Token::RBracket, "`]`")?;
                    expr = Expression::new(
                        loc,
                        ExprKind::Index {
                            base: Box::new(expr),
                            index: Box::new(index),
                        },
                    );
                }
                Token::LParen => {
                    let loc = self.loc();
                    let callee = match &expr.kind {
                        ExprKind::Identifier { name, .. } => name.clone(),
                        _ => {
                            return Err(ParseErr::Syntax(SyntaxError::UnexpectedToken {
                                loc,
                                found: "(".into(),
                                expected: "a call target to be an identifier".into(),
                            }))
                        }
                    };
                    self.bump();
                    let mut args = Vec::new();
                    if self.peek() != &Token::RParen {
                        args.push(self.parse_expr()?);
                        while self.peek() == &Token::Comma {
                            self.bump();
                            args.push(self.parse_expr()?);
                        }
                    }
                    self.expect(&Token::RParen, "`)`")?;
                    expr = Expression::new(
                        loc,
                        ExprKind::Call {
                            callee,
                            args,
                            is_comptime: false,
                            resolution: std::cell::RefCell::new(CallResolution::Unresolved),
                        },
                    );
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> PResult<Expression> {
        let loc = self.loc();
        match self.peek().clone() {
            Token::Int(v) => {
                self.bump();
                Ok(Expression::new(loc, ExprKind::IntLiteral(v)))
            }
            Token::Ident(name) => {
                self.bump();
                Ok(Expression::new(
                    loc,
                    ExprKind::Identifier {
                        name,
                        symbol: std::cell::RefCell::new(None),
                    },
                ))
            }
            Token::LParen => {
                self.bump();
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen, "`)`")?;
                Ok(inner)
            }
            Token::At => {
                self.bump();
                self.expect(&Token::Eval, "`eval`")?;
                self.expect(&Token::LParen, "`(`")?;
                let call = self.parse_postfix()?;
                self.expect(&Token::RParen, "`)`")?;
                match call.kind {
                    ExprKind::Call {
                        callee,
                        args,
                        resolution,
                        ..
                    } => Ok(Expression::new(
                        loc,
                        ExprKind::Call {
                            callee,
                            args,
                            is_comptime: true,
                            resolution,
                        },
                    )),
                    _ => Err(ParseErr::Syntax(SyntaxError::UnexpectedToken {
                        loc,
                        found: "non-call expression".into(),
                        expected: "a call expression inside `@eval(...)`".into(),
                    })),
                }
            }
            other => Err(ParseErr::Syntax(SyntaxError::UnexpectedToken {
                loc,
                found: format!("{other:?}"),
                expected: "an expression".into(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fib_source() {
        let src = "func fib(n: s32): s32 begin \
                    if n = 0 then return 0 \
                    if n = 1 then return 1 \
                    return fib(n-1) + fib(n-2) \
                    end \
                    func main(): s32 begin print fib(10) return 0 end";
        let module = parse(src).unwrap();
        assert_eq!(module.functions.len(), 2);
        assert_eq!(module.functions[0].name, "fib");
        assert_eq!(module.functions[0].params.len(), 1);
    }

    #[test]
    fn parses_struct_and_field_access() {
        let src = "struct P := a: s32, b: s32 \
                    func main(): s32 begin \
                    var p: P p.a := 10 p.b := 32 print p.a + p.b return 0 end";
        let module = parse(src).unwrap();
        assert_eq!(module.structs.len(), 1);
        assert_eq!(module.structs[0].fields.len(), 2);
    }

    #[test]
    fn parses_comptime_eval_call() {
        let src = "func zero(): s32 begin return 0 end \
                    func main(): s32 begin print @eval(zero()) return 0 end";
        let module = parse(src).unwrap();
        let call_kind = match &module.functions[1].body[0].kind {
            StmtKind::Print(args) => &args[0].kind,
            _ => unreachable!(),
        };
        let ExprKind::Call { is_comptime, .. } = call_kind else {
            unreachable!()
        };
        assert!(*is_comptime);
    }

    #[test]
    fn rejects_undefined_type() {
        let src = "func main(): Bogus begin return 0 end";
        let err = parse(src).unwrap_err();
        assert!(matches!(err, SyntaxError::UnexpectedToken { .. }));
    }
}
