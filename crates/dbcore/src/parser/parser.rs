//! Module: parser::parser
//! Responsibility: the recursive-descent parser over `lexer::Token`
//! producing `ast::Statement`. Performs no name resolution or
//! type-checking — an unqualified `ColRef` or an as-yet-unindexed table
//! name is perfectly legal syntax here; the analyzer is the only
//! place either gets checked.

use crate::parser::ast::{
    AggType, BinaryExpr, BoundExpr, ColDef, ColRef, CompOp, HavingExpr, JoinClause, Lit, OrderDir, Rhs,
    SelectStmt, SetClause, SetKnob, Statement,
};
use crate::parser::lexer::{tokenize, Token};
use dbcore_types::error::{DbError, ErrorKind, ErrorOrigin};
use dbcore_types::value::ColType;

fn parse_err(message: impl Into<String>) -> DbError {
    DbError::new(ErrorKind::IoError, ErrorOrigin::Parser, message)
}

/// Parse one statement out of `src`. Trailing `;` is accepted and
/// discarded; a second statement after it is an error — the REPL feeds
/// one statement per `parse` call.
pub fn parse(src: &str) -> Result<Statement, DbError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser { tokens, pos: 0 };
    let stmt = parser.parse_statement()?;
    while parser.peek() == &Token::Semicolon {
        parser.advance();
    }
    if parser.peek() != &Token::Eof {
        return Err(parse_err(format!("unexpected trailing input at {:?}", parser.peek())));
    }
    Ok(stmt)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.tokens.get(self.pos + offset).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, want: &Token) -> Result<(), DbError> {
        if self.peek() == want {
            self.advance();
            Ok(())
        } else {
            Err(parse_err(format!("expected {want:?}, found {:?}", self.peek())))
        }
    }

    fn expect_ident(&mut self) -> Result<String, DbError> {
        match self.advance() {
            Token::Ident(s) => Ok(s),
            other => Err(parse_err(format!("expected identifier, found {other:?}"))),
        }
    }

    fn expect_int(&mut self) -> Result<i32, DbError> {
        match self.advance() {
            Token::IntLit(n) => Ok(n),
            other => Err(parse_err(format!("expected integer literal, found {other:?}"))),
        }
    }

    fn expect_str(&mut self) -> Result<String, DbError> {
        match self.advance() {
            Token::StrLit(s) => Ok(s),
            other => Err(parse_err(format!("expected string literal, found {other:?}"))),
        }
    }

    fn peek_keyword(&self) -> Option<String> {
        match self.peek() {
            Token::Ident(s) => Some(s.to_ascii_uppercase()),
            _ => None,
        }
    }

    /// Consume the next token if it is the identifier `kw`, case-insensitively.
    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.peek_keyword().as_deref() == Some(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<(), DbError> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(parse_err(format!("expected keyword {kw}, found {:?}", self.peek())))
        }
    }

    fn parse_statement(&mut self) -> Result<Statement, DbError> {
        let Some(kw) = self.peek_keyword() else {
            return Err(parse_err(format!("expected a statement keyword, found {:?}", self.peek())));
        };
        match kw.as_str() {
            "CREATE" => {
                self.advance();
                if self.eat_keyword("TABLE") {
                    self.parse_create_table()
                } else if self.eat_keyword("INDEX") {
                    self.parse_create_index()
                } else if self.eat_keyword("STATIC_CHECKPOINT") {
                    Ok(Statement::CreateStaticCheckpoint)
                } else {
                    Err(parse_err("expected TABLE, INDEX or STATIC_CHECKPOINT after CREATE"))
                }
            }
            "DROP" => {
                self.advance();
                if self.eat_keyword("TABLE") {
                    Ok(Statement::DropTable(self.expect_ident()?))
                } else if self.eat_keyword("INDEX") {
                    self.parse_drop_index()
                } else {
                    Err(parse_err("expected TABLE or INDEX after DROP"))
                }
            }
            "DESC" | "DESCRIBE" => {
                self.advance();
                Ok(Statement::DescTable(self.expect_ident()?))
            }
            "SHOW" => {
                self.advance();
                if self.eat_keyword("TABLES") {
                    Ok(Statement::ShowTables)
                } else if self.eat_keyword("INDEX") {
                    self.expect_keyword("FROM")?;
                    Ok(Statement::ShowIndex(self.expect_ident()?))
                } else {
                    Err(parse_err("expected TABLES or INDEX after SHOW"))
                }
            }
            "INSERT" => self.parse_insert(),
            "DELETE" => self.parse_delete(),
            "UPDATE" => self.parse_update(),
            "SELECT" => self.parse_select().map(Statement::Select),
            "BEGIN" => {
                self.advance();
                Ok(Statement::Begin)
            }
            "COMMIT" => {
                self.advance();
                Ok(Statement::Commit)
            }
            "ABORT" => {
                self.advance();
                Ok(Statement::Abort)
            }
            "ROLLBACK" => {
                self.advance();
                Ok(Statement::Rollback)
            }
            "LOAD" => {
                self.advance();
                let file = self.expect_str()?;
                self.expect_keyword("INTO")?;
                let table = self.expect_ident()?;
                Ok(Statement::Load { file, table })
            }
            "SET" => self.parse_set(),
            "HELP" => {
                self.advance();
                Ok(Statement::Help)
            }
            other => Err(parse_err(format!("unrecognized statement keyword {other}"))),
        }
    }

    fn parse_type_len(&mut self) -> Result<(ColType, usize), DbError> {
        let kw = self.expect_ident()?.to_ascii_uppercase();
        match kw.as_str() {
            "INT" => Ok((ColType::Int, 4)),
            "FLOAT" => Ok((ColType::Float, 4)),
            "CHAR" | "STRING" => {
                self.expect(&Token::LParen)?;
                let len = self.expect_int()?;
                self.expect(&Token::RParen)?;
                Ok((ColType::Str, len.max(0) as usize))
            }
            other => Err(parse_err(format!("unknown column type {other}"))),
        }
    }

    fn parse_create_table(&mut self) -> Result<Statement, DbError> {
        let table = self.expect_ident()?;
        self.expect(&Token::LParen)?;
        let mut cols = Vec::new();
        loop {
            let name = self.expect_ident()?;
            let (ty, len) = self.parse_type_len()?;
            cols.push(ColDef { name, ty, len });
            if !self.eat_comma() {
                break;
            }
        }
        self.expect(&Token::RParen)?;
        Ok(Statement::CreateTable { table, cols })
    }

    fn eat_comma(&mut self) -> bool {
        if self.peek() == &Token::Comma {
            self.advance();
            true
        } else {
            false
        }
    }

    fn parse_ident_list(&mut self) -> Result<Vec<String>, DbError> {
        self.expect(&Token::LParen)?;
        let mut cols = vec![self.expect_ident()?];
        while self.eat_comma() {
            cols.push(self.expect_ident()?);
        }
        self.expect(&Token::RParen)?;
        Ok(cols)
    }

    fn parse_create_index(&mut self) -> Result<Statement, DbError> {
        let table = self.expect_ident()?;
        let cols = self.parse_ident_list()?;
        Ok(Statement::CreateIndex { table, cols })
    }

    fn parse_drop_index(&mut self) -> Result<Statement, DbError> {
        let table = self.expect_ident()?;
        let cols = self.parse_ident_list()?;
        Ok(Statement::DropIndex { table, cols })
    }

    fn parse_literal(&mut self) -> Result<Lit, DbError> {
        let negative = self.peek() == &Token::Minus;
        if negative {
            self.advance();
        }
        match self.advance() {
            Token::IntLit(n) => Ok(Lit::Int(if negative { -n } else { n })),
            Token::FloatLit(f) => Ok(Lit::Float(if negative { -f } else { f })),
            Token::StrLit(s) if !negative => Ok(Lit::Str(s)),
            other => Err(parse_err(format!("expected a literal value, found {other:?}"))),
        }
    }

    fn parse_col_ref(&mut self) -> Result<ColRef, DbError> {
        let first = self.expect_ident()?;
        if self.peek() == &Token::Dot {
            self.advance();
            let col = self.expect_ident()?;
            Ok(ColRef::qualified(first, col))
        } else {
            Ok(ColRef::new(first))
        }
    }

    fn parse_insert(&mut self) -> Result<Statement, DbError> {
        self.expect_keyword("INSERT")?;
        self.expect_keyword("INTO")?;
        let table = self.expect_ident()?;
        self.expect_keyword("VALUES")?;
        self.expect(&Token::LParen)?;
        let mut values = vec![self.parse_literal()?];
        while self.eat_comma() {
            values.push(self.parse_literal()?);
        }
        self.expect(&Token::RParen)?;
        Ok(Statement::Insert { table, values })
    }

    fn parse_cmp_op(&mut self) -> Result<CompOp, DbError> {
        match self.advance() {
            Token::Eq => Ok(CompOp::Eq),
            Token::Ne => Ok(CompOp::Ne),
            Token::Lt => Ok(CompOp::Lt),
            Token::Gt => Ok(CompOp::Gt),
            Token::Le => Ok(CompOp::Le),
            Token::Ge => Ok(CompOp::Ge),
            other => Err(parse_err(format!("expected a comparison operator, found {other:?}"))),
        }
    }

    fn parse_cond(&mut self) -> Result<BinaryExpr, DbError> {
        let lhs = self.parse_col_ref()?;
        if self.eat_keyword("IN") {
            self.expect(&Token::LParen)?;
            if self.peek_keyword().as_deref() == Some("SELECT") {
                let sub = self.parse_select()?;
                self.expect(&Token::RParen)?;
                return Ok(BinaryExpr { lhs, op: CompOp::In, rhs: Rhs::Subquery(Box::new(sub)) });
            }
            let mut values = vec![self.parse_literal()?];
            while self.eat_comma() {
                values.push(self.parse_literal()?);
            }
            self.expect(&Token::RParen)?;
            return Ok(BinaryExpr { lhs, op: CompOp::In, rhs: Rhs::ValueList(values) });
        }
        let op = self.parse_cmp_op()?;
        if self.peek() == &Token::LParen {
            let saved = self.pos;
            self.advance();
            if self.peek_keyword().as_deref() == Some("SELECT") {
                let sub = self.parse_select()?;
                self.expect(&Token::RParen)?;
                return Ok(BinaryExpr { lhs, op, rhs: Rhs::Subquery(Box::new(sub)) });
            }
            self.pos = saved;
        }
        let rhs = match self.peek() {
            Token::Ident(_) => Rhs::Col(self.parse_col_ref()?),
            _ => Rhs::Value(self.parse_literal()?),
        };
        Ok(BinaryExpr { lhs, op, rhs })
    }

    fn parse_conds(&mut self) -> Result<Vec<BinaryExpr>, DbError> {
        let mut conds = vec![self.parse_cond()?];
        while self.eat_keyword("AND") {
            conds.push(self.parse_cond()?);
        }
        Ok(conds)
    }

    fn parse_set_clause(&mut self) -> Result<SetClause, DbError> {
        let col = self.expect_ident()?;
        self.expect(&Token::Eq)?;
        if let Token::Ident(name) = self.peek() {
            if *name == col && self.peek_at(1) == &Token::Plus {
                self.advance();
                self.advance();
                let value = self.parse_literal()?;
                return Ok(SetClause { col, value, increment: true });
            }
        }
        let value = self.parse_literal()?;
        Ok(SetClause { col, value, increment: false })
    }

    fn parse_delete(&mut self) -> Result<Statement, DbError> {
        self.expect_keyword("DELETE")?;
        self.expect_keyword("FROM")?;
        let table = self.expect_ident()?;
        let conds = if self.eat_keyword("WHERE") { self.parse_conds()? } else { Vec::new() };
        Ok(Statement::Delete { table, conds })
    }

    fn parse_update(&mut self) -> Result<Statement, DbError> {
        self.expect_keyword("UPDATE")?;
        let table = self.expect_ident()?;
        self.expect_keyword("SET")?;
        let mut set = vec![self.parse_set_clause()?];
        while self.eat_comma() {
            set.push(self.parse_set_clause()?);
        }
        let conds = if self.eat_keyword("WHERE") { self.parse_conds()? } else { Vec::new() };
        Ok(Statement::Update { table, set, conds })
    }

    fn parse_bound_expr(&mut self) -> Result<BoundExpr, DbError> {
        let agg = match self.peek_keyword().as_deref() {
            Some("COUNT") => Some(AggType::Count),
            Some("MAX") => Some(AggType::Max),
            Some("MIN") => Some(AggType::Min),
            Some("SUM") => Some(AggType::Sum),
            _ => None,
        };
        if let Some(agg) = agg {
            self.advance();
            self.expect(&Token::LParen)?;
            let col = if agg == AggType::Count && self.peek() == &Token::Star {
                self.advance();
                ColRef::star()
            } else {
                self.parse_col_ref()?
            };
            self.expect(&Token::RParen)?;
            let alias = self.parse_optional_alias()?;
            return Ok(BoundExpr { col, agg, alias });
        }
        let col = self.parse_col_ref()?;
        let alias = self.parse_optional_alias()?;
        Ok(BoundExpr { col, agg: AggType::Col, alias })
    }

    fn parse_optional_alias(&mut self) -> Result<Option<String>, DbError> {
        if self.eat_keyword("AS") {
            Ok(Some(self.expect_ident()?))
        } else {
            Ok(None)
        }
    }

    fn parse_select_list(&mut self) -> Result<Vec<BoundExpr>, DbError> {
        if self.peek() == &Token::Star {
            self.advance();
            return Ok(Vec::new());
        }
        let mut list = vec![self.parse_bound_expr()?];
        while self.eat_comma() {
            list.push(self.parse_bound_expr()?);
        }
        Ok(list)
    }

    fn parse_having(&mut self) -> Result<HavingExpr, DbError> {
        let lhs = self.parse_bound_expr()?;
        let op = self.parse_cmp_op()?;
        let rhs = self.parse_literal()?;
        Ok(HavingExpr { lhs, op, rhs })
    }

    fn parse_select(&mut self) -> Result<SelectStmt, DbError> {
        self.expect_keyword("SELECT")?;
        let select_list = self.parse_select_list()?;
        self.expect_keyword("FROM")?;
        let mut tables = vec![self.expect_ident()?];
        let mut joins = Vec::new();
        loop {
            if self.eat_keyword("JOIN") {
                let table = self.expect_ident()?;
                self.expect_keyword("ON")?;
                let conds = self.parse_conds()?;
                joins.push(JoinClause { table, conds });
            } else if self.eat_comma() {
                tables.push(self.expect_ident()?);
            } else {
                break;
            }
        }
        let conds = if self.eat_keyword("WHERE") { self.parse_conds()? } else { Vec::new() };
        let group_bys = if self.eat_keyword("GROUP") {
            self.expect_keyword("BY")?;
            let mut cols = vec![self.parse_col_ref()?];
            while self.eat_comma() {
                cols.push(self.parse_col_ref()?);
            }
            cols
        } else {
            Vec::new()
        };
        let havings = if self.eat_keyword("HAVING") {
            let mut list = vec![self.parse_having()?];
            while self.eat_keyword("AND") {
                list.push(self.parse_having()?);
            }
            list
        } else {
            Vec::new()
        };
        let order_by = if self.eat_keyword("ORDER") {
            self.expect_keyword("BY")?;
            let col = self.parse_col_ref()?;
            let dir = if self.eat_keyword("DESC") {
                OrderDir::Desc
            } else {
                self.eat_keyword("ASC");
                OrderDir::Asc
            };
            Some((col, dir))
        } else {
            None
        };
        let limit = if self.eat_keyword("LIMIT") {
            Some(self.expect_int()?.max(0) as usize)
        } else {
            None
        };
        Ok(SelectStmt { select_list, tables, joins, conds, group_bys, havings, order_by, limit })
    }

    fn parse_set(&mut self) -> Result<Statement, DbError> {
        self.expect_keyword("SET")?;
        let knob_name = self.expect_ident()?.to_ascii_lowercase();
        let knob = match knob_name.as_str() {
            "enable_nestloop" => SetKnob::NestLoop,
            "enable_sortmerge" => SetKnob::SortMerge,
            "enable_output_file" => SetKnob::OutputFile,
            other => return Err(parse_err(format!("unknown session setting {other}"))),
        };
        self.expect(&Token::Eq)?;
        let value = if self.eat_keyword("TRUE") {
            true
        } else if self.eat_keyword("FALSE") {
            false
        } else {
            return Err(parse_err("expected TRUE or FALSE"));
        };
        Ok(Statement::Set { knob, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_create_table() {
        let stmt = parse("CREATE TABLE g(id INT, score FLOAT, name CHAR(8))").unwrap();
        match stmt {
            Statement::CreateTable { table, cols } => {
                assert_eq!(table, "g");
                assert_eq!(cols.len(), 3);
                assert_eq!(cols[2].ty, ColType::Str);
                assert_eq!(cols[2].len, 8);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_select_with_where_group_order_limit() {
        let stmt = parse("SELECT name FROM g WHERE score = 85.0 ORDER BY name ASC LIMIT 2").unwrap();
        let Statement::Select(select) = stmt else { panic!("expected select") };
        assert_eq!(select.tables, vec!["g".to_string()]);
        assert_eq!(select.conds.len(), 1);
        assert_eq!(select.limit, Some(2));
        assert!(select.order_by.is_some());
    }

    #[test]
    fn parses_update_with_increment_set_clause() {
        let stmt = parse("UPDATE g SET score = score + 5 WHERE id = 2").unwrap();
        let Statement::Update { set, conds, .. } = stmt else { panic!("expected update") };
        assert!(set[0].increment);
        assert_eq!(conds.len(), 1);
    }

    #[test]
    fn parses_in_subquery_condition() {
        let stmt = parse("SELECT id FROM a WHERE id IN (SELECT id FROM b)").unwrap();
        let Statement::Select(select) = stmt else { panic!("expected select") };
        match &select.conds[0].rhs {
            Rhs::Subquery(_) => {}
            other => panic!("expected subquery rhs, got {other:?}"),
        }
    }

    #[test]
    fn parses_set_statement() {
        let stmt = parse("SET enable_nestloop = FALSE").unwrap();
        match stmt {
            Statement::Set { knob: SetKnob::NestLoop, value: false } => {}
            other => panic!("unexpected {other:?}"),
        }
    }
}
