//! Recursive-descent parser for the textual quadruple IR format.
//!
//! Two passes over the token stream, same as `cranelift-reader`'s own
//! `Parser::parse_function_list` pre-registers every function's signature
//! before parsing any body (so a forward call reference resolves): pass one
//! walks `global`/`func` headers only, assigning every global and function a
//! symbol up front; pass two parses each global initializer and function
//! body against that now-complete symbol table, lazily declaring locals on
//! first mention.

use std::collections::HashMap;
use std::rc::Rc;

use crate::lexer::{Lexer, Token};
use crate::{Location, ParseError, ParseResult};
use lcc_codegen::ir::{Instruction, Module, Operand, Symbol, SymbolRef, Type};
use lcc_codegen::Function;

struct TokenStream {
    toks: Vec<(Token, Location)>,
    pos: usize,
}

impl TokenStream {
    fn lex_all(src: &str) -> ParseResult<TokenStream> {
        let mut lexer = Lexer::new(src);
        let mut toks = Vec::new();
        loop {
            let pair = lexer.next_token()?;
            let is_eof = pair.0 == Token::Eof;
            toks.push(pair);
            if is_eof {
                break;
            }
        }
        Ok(TokenStream { toks, pos: 0 })
    }

    fn peek(&self) -> &Token {
        &self.toks[self.pos].0
    }

    fn loc(&self) -> Location {
        self.toks[self.pos].1
    }

    fn bump(&mut self) -> Token {
        let tok = self.toks[self.pos].0.clone();
        if self.pos + 1 < self.toks.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect_ident(&mut self, expected: &str) -> ParseResult<()> {
        match self.bump() {
            Token::Ident(s) if s == expected => Ok(()),
            other => err!(self.loc(), "expected '{}', found {:?}", expected, other),
        }
    }

    fn expect(&mut self, expected: Token) -> ParseResult<()> {
        let loc = self.loc();
        let tok = self.bump();
        if tok == expected {
            Ok(())
        } else {
            err!(loc, "expected {:?}, found {:?}", expected, tok)
        }
    }

    fn expect_at(&mut self) -> ParseResult<String> {
        match self.bump() {
            Token::At(name) => Ok(name),
            other => err!(self.loc(), "expected a '@name', found {:?}", other),
        }
    }
}

/// Global symbol registry shared across the whole parse: globals and
/// function signatures, keyed by their declared name.
struct GlobalSymbols {
    by_name: HashMap<String, SymbolRef>,
    next_id: u32,
}

impl GlobalSymbols {
    fn new() -> GlobalSymbols {
        GlobalSymbols { by_name: HashMap::new(), next_id: 0 }
    }

    fn declare(&mut self, name: &str, ty: Type) -> SymbolRef {
        let sym = Rc::new(Symbol::new(self.next_id, name, ty).with_global_name(name));
        self.next_id += 1;
        self.by_name.insert(name.to_string(), sym.clone());
        sym
    }

    fn lookup(&self, name: &str, loc: Location) -> ParseResult<SymbolRef> {
        self.by_name
            .get(name)
            .cloned()
            .ok_or_else(|| ParseError { location: loc, message: format!("undeclared global or function '@{name}'") })
    }
}

/// A function's local symbol table: parameters and locals declared by
/// `ALLOCA`/`PARAM`, keyed by name, plus the per-function id counter
/// (separate from the global one — `spec.md` §3: symbol ids are
/// function-scoped for locals).
struct LocalSymbols {
    by_name: HashMap<String, SymbolRef>,
    next_id: u32,
}

impl LocalSymbols {
    fn new() -> LocalSymbols {
        LocalSymbols { by_name: HashMap::new(), next_id: 0 }
    }

    fn declare(&mut self, name: &str, ty: Type) -> SymbolRef {
        if let Some(existing) = self.by_name.get(name) {
            return existing.clone();
        }
        let sym = Rc::new(Symbol::new(self.next_id, name, ty));
        self.next_id += 1;
        self.by_name.insert(name.to_string(), sym.clone());
        sym
    }

    /// First mention with no type annotation defaults to `Basic`, matching
    /// the reader's role as a thin assembler rather than a type-checker.
    fn lookup_or_declare_basic(&mut self, name: &str) -> SymbolRef {
        self.declare(name, Type::Basic)
    }
}

fn parse_type(ts: &mut TokenStream) -> ParseResult<Type> {
    ts.expect_ident("i32")?;
    if matches!(ts.peek(), Token::LBracket) {
        ts.bump();
        let len = match ts.bump() {
            Token::IntLit(v) if v >= 0 => v as usize,
            other => return err!(ts.loc(), "expected an array length, found {:?}", other),
        };
        ts.expect(Token::RBracket)?;
        return Ok(Type::array(Type::Basic, len));
    }
    Ok(Type::Basic)
}

/// Parse one operand slot. `locals` is `None` when parsing a global
/// initializer (where only constants and `@`-references are legal).
fn parse_operand(ts: &mut TokenStream, globals: &GlobalSymbols, locals: Option<&mut LocalSymbols>) -> ParseResult<Operand> {
    let loc = ts.loc();
    match ts.bump() {
        Token::Dash => Ok(Operand::Empty),
        Token::IntLit(v) => {
            let v = i32::try_from(v).map_err(|_| ParseError { location: loc, message: format!("constant {v} out of i32 range") })?;
            Ok(Operand::ConstantInt(v))
        }
        Token::At(name) => Ok(Operand::Variable(globals.lookup(&name, loc)?)),
        Token::Percent(name) => {
            let locals = locals.ok_or_else(|| ParseError { location: loc, message: "variable operands are only legal inside a function body".to_string() })?;
            if matches!(ts.peek(), Token::Colon) {
                ts.bump();
                let ty = parse_type(ts)?;
                return Ok(Operand::Variable(locals.declare(&name, ty)));
            }
            Ok(Operand::Variable(locals.lookup_or_declare_basic(&name)))
        }
        Token::Ident(word) => parse_temp_or_label(&word, loc),
        other => err!(loc, "expected an operand, found {:?}", other),
    }
}

fn parse_temp_or_label(word: &str, loc: Location) -> ParseResult<Operand> {
    let (prefix, rest) = word.split_at(1);
    if !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()) {
        let n: u32 = rest.parse().expect("validated all-digit above");
        if prefix == "t" {
            return Ok(Operand::Temporary(cranelift_entity::EntityRef::new(n as usize)));
        }
        if prefix == "L" {
            return Ok(Operand::Label(cranelift_entity::EntityRef::new(n as usize)));
        }
    }
    err!(loc, "expected a temp ('tN'), a label ('LN'), or an operand literal, found '{}'", word)
}

fn opcode_for(word: &str, loc: Location) -> ParseResult<lcc_codegen::Opcode> {
    use lcc_codegen::Opcode::*;
    Ok(match word {
        "ADD" => Add,
        "SUB" => Sub,
        "MUL" => Mul,
        "DIV" => Div,
        "MOD" => Mod,
        "NEG" => Neg,
        "NOT" => Not,
        "EQ" => Eq,
        "NEQ" => Neq,
        "LT" => Lt,
        "LE" => Le,
        "GT" => Gt,
        "GE" => Ge,
        "AND" => And,
        "OR" => Or,
        "ASSIGN" => Assign,
        "LOAD" => Load,
        "STORE" => Store,
        "IF" => If,
        "GOTO" => Goto,
        "LABEL" => Label,
        "PARAM" => Param,
        "ARG" => Arg,
        "CALL" => Call,
        "RETURN" => Return,
        "ALLOCA" => Alloca,
        "PRINTF" => Printf,
        "NOP" => Nop,
        other => return err!(loc, "unknown opcode '{}'", other),
    })
}

/// Parse one `OPCODE arg1, arg2, result` line.
fn parse_instruction(ts: &mut TokenStream, globals: &GlobalSymbols, locals: &mut LocalSymbols) -> ParseResult<Instruction> {
    let loc = ts.loc();
    let op = match ts.bump() {
        Token::Ident(word) => opcode_for(&word, loc)?,
        other => return err!(loc, "expected an opcode, found {:?}", other),
    };
    let arg1 = parse_operand(ts, globals, Some(locals))?;
    ts.expect(Token::Comma)?;
    let arg2 = parse_operand(ts, globals, Some(locals))?;
    ts.expect(Token::Comma)?;
    let result = parse_operand(ts, globals, Some(locals))?;
    Ok(Instruction { op, arg1, arg2, result, parent: None, phi_args: Vec::new() })
}

/// Pre-scan: register every `global`/`func` header's symbol, without
/// parsing bodies, so forward references (and recursive calls) resolve.
fn prescan(ts: &mut TokenStream, globals: &mut GlobalSymbols) -> ParseResult<()> {
    let checkpoint = ts.pos;
    loop {
        match ts.peek().clone() {
            Token::Eof => break,
            Token::Ident(kw) if kw == "global" => {
                ts.bump();
                let name = ts.expect_at()?;
                ts.expect(Token::Colon)?;
                let ty = parse_type(ts)?;
                globals.declare(&name, ty);
                if matches!(ts.peek(), Token::Equals) {
                    ts.bump();
                    skip_balanced_initializer(ts)?;
                }
            }
            Token::Ident(kw) if kw == "func" => {
                ts.bump();
                let name = ts.expect_at()?;
                ts.expect(Token::LParen)?;
                let mut params = Vec::new();
                if !matches!(ts.peek(), Token::RParen) {
                    params.push(parse_type(ts)?);
                    while matches!(ts.peek(), Token::Comma) {
                        ts.bump();
                        params.push(parse_type(ts)?);
                    }
                }
                ts.expect(Token::RParen)?;
                ts.expect(Token::Arrow)?;
                let ret = parse_type(ts)?;
                globals.declare(&name, Type::function(ret, params));
                skip_braced_block(ts)?;
            }
            other => return err!(ts.loc(), "expected 'global' or 'func' at top level, found {:?}", other),
        }
    }
    ts.pos = checkpoint;
    Ok(())
}

fn skip_balanced_initializer(ts: &mut TokenStream) -> ParseResult<()> {
    if matches!(ts.peek(), Token::LBracket) {
        let mut depth = 0i32;
        loop {
            match ts.bump() {
                Token::LBracket => depth += 1,
                Token::RBracket => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                Token::Eof => return err!(ts.loc(), "unterminated array initializer"),
                _ => {}
            }
        }
    } else {
        ts.bump();
    }
    Ok(())
}

fn skip_braced_block(ts: &mut TokenStream) -> ParseResult<()> {
    ts.expect(Token::LBrace)?;
    let mut depth = 1i32;
    loop {
        match ts.bump() {
            Token::LBrace => depth += 1,
            Token::RBrace => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            Token::Eof => return err!(ts.loc(), "unterminated function body"),
            _ => {}
        }
    }
    Ok(())
}

/// Parse an entire module from its textual form.
pub fn parse_module(src: &str) -> ParseResult<Module> {
    let mut ts = TokenStream::lex_all(src)?;
    let mut globals = GlobalSymbols::new();
    prescan(&mut ts, &mut globals)?;

    let mut module = Module::new();
    loop {
        match ts.peek().clone() {
            Token::Eof => break,
            Token::Ident(kw) if kw == "global" => {
                ts.bump();
                let name = ts.expect_at()?;
                ts.expect(Token::Colon)?;
                let _ty = parse_type(&mut ts)?;
                if matches!(ts.peek(), Token::Equals) {
                    ts.bump();
                    parse_global_initializer(&mut ts, &globals, &name, &mut module)?;
                }
            }
            Token::Ident(kw) if kw == "func" => {
                ts.bump();
                let name = ts.expect_at()?;
                ts.expect(Token::LParen)?;
                let mut param_tys = Vec::new();
                if !matches!(ts.peek(), Token::RParen) {
                    param_tys.push(parse_type(&mut ts)?);
                    while matches!(ts.peek(), Token::Comma) {
                        ts.bump();
                        param_tys.push(parse_type(&mut ts)?);
                    }
                }
                ts.expect(Token::RParen)?;
                ts.expect(Token::Arrow)?;
                let ret_ty = parse_type(&mut ts)?;
                ts.expect(Token::LBrace)?;

                let mut locals = LocalSymbols::new();
                let mut insts = Vec::new();
                while !matches!(ts.peek(), Token::RBrace) {
                    insts.push(parse_instruction(&mut ts, &globals, &mut locals)?);
                }
                ts.expect(Token::RBrace)?;

                module.functions.push(Function::from_flat_instructions(name, ret_ty, param_tys, insts));
            }
            other => return err!(ts.loc(), "expected 'global' or 'func' at top level, found {:?}", other),
        }
    }
    Ok(module)
}

fn parse_global_initializer(ts: &mut TokenStream, globals: &GlobalSymbols, name: &str, module: &mut Module) -> ParseResult<()> {
    let sym = globals.lookup(name, ts.loc())?;
    if matches!(ts.peek(), Token::LBracket) {
        ts.bump();
        let mut index = 0i32;
        if !matches!(ts.peek(), Token::RBracket) {
            let v = parse_int_literal(ts)?;
            module.globals.push(Instruction::store(Operand::ConstantInt(v), Operand::Variable(sym.clone()), Operand::ConstantInt(index)));
            index += 1;
            while matches!(ts.peek(), Token::Comma) {
                ts.bump();
                let v = parse_int_literal(ts)?;
                module.globals.push(Instruction::store(Operand::ConstantInt(v), Operand::Variable(sym.clone()), Operand::ConstantInt(index)));
                index += 1;
            }
        }
        ts.expect(Token::RBracket)?;
    } else {
        let v = parse_int_literal(ts)?;
        module.globals.push(Instruction::assign(Operand::ConstantInt(v), Operand::Variable(sym)));
    }
    Ok(())
}

fn parse_int_literal(ts: &mut TokenStream) -> ParseResult<i32> {
    let loc = ts.loc();
    match ts.bump() {
        Token::IntLit(v) => i32::try_from(v).map_err(|_| ParseError { location: loc, message: format!("constant {v} out of i32 range") }),
        other => err!(loc, "expected an integer literal, found {:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_function() {
        let src = "func @main() -> i32 {\n    RETURN -, -, 7\n}\n";
        let module = parse_module(src).unwrap();
        assert_eq!(module.functions.len(), 1);
        assert_eq!(module.functions[0].name, "main");
        let entry = module.functions[0].entry();
        assert_eq!(module.functions[0].blocks[entry].insts[0].op, lcc_codegen::Opcode::Return);
    }

    #[test]
    fn resolves_a_forward_call_reference() {
        let src = "\
func @main() -> i32 {
    ARG 5, -, -
    CALL 1, @helper, t0
    RETURN -, -, t0
}
func @helper(i32) -> i32 {
    PARAM 0, -, %n:i32
    RETURN -, -, %n
}
";
        let module = parse_module(src).unwrap();
        assert_eq!(module.functions.len(), 2);
        let main = module.function("main").unwrap();
        let entry = main.entry();
        let call = &main.blocks[entry].insts[1];
        assert_eq!(call.op, lcc_codegen::Opcode::Call);
        assert!(matches!(&call.arg2, Operand::Variable(sym) if sym.name == "helper"));
    }

    #[test]
    fn undeclared_global_is_an_error() {
        let src = "func @main() -> i32 {\n    RETURN -, -, @missing\n}\n";
        assert!(parse_module(src).is_err());
    }

    #[test]
    fn locally_typed_alloca_then_bare_reference_share_a_symbol() {
        let src = "\
func @main() -> i32 {
    ALLOCA %x:i32, -, 1
    ASSIGN 3, -, %x
    RETURN -, -, %x
}
";
        let module = parse_module(src).unwrap();
        let main = &module.functions[0];
        let entry = main.entry();
        let ids: Vec<u32> = main.blocks[entry]
            .insts
            .iter()
            .filter_map(|i| match &i.result {
                Operand::Variable(sym) => Some(sym.id),
                _ => None,
            })
            .collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]), "every %x reference must share one symbol id");
    }
}
