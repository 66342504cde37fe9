//! Recursive-descent parser over the token stream.

use crate::error::QueryError;
use crate::schema::ColumnType;
use crate::sql::ast::*;
use crate::sql::token::{tokenize, Token};

pub fn parse_statement(sql: &str) -> Result<Statement, QueryError> {
    let tokens = tokenize(sql)?;
    Parser { tokens, pos: 0 }.parse()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, expected: &Token) -> Result<(), QueryError> {
        if self.peek() == expected {
            self.advance();
            Ok(())
        } else {
            Err(QueryError::Syntax(format!(
                "expected {expected:?}, found {:?}",
                self.peek()
            )))
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<(), QueryError> {
        match self.peek() {
            Token::Ident(s) if s == kw => {
                self.advance();
                Ok(())
            }
            other => Err(QueryError::Syntax(format!("expected keyword '{kw}', found {other:?}"))),
        }
    }

    fn check_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Token::Ident(s) if s == kw)
    }

    fn expect_ident(&mut self) -> Result<String, QueryError> {
        match self.advance() {
            Token::Ident(s) => Ok(s),
            other => Err(QueryError::Syntax(format!("expected identifier, found {other:?}"))),
        }
    }

    fn parse(&mut self) -> Result<Statement, QueryError> {
        let keyword = match self.peek() {
            Token::Ident(s) => s.clone(),
            other => return Err(QueryError::Syntax(format!("expected a statement, found {other:?}"))),
        };
        match keyword.as_str() {
            "CREATE" => self.parse_create(),
            "DROP" => self.parse_drop(),
            "SELECT" => self.parse_select(),
            "INSERT" => self.parse_insert(),
            "UPDATE" => self.parse_update(),
            "DELETE" => self.parse_delete(),
            other => Err(QueryError::Syntax(format!("unrecognized statement keyword '{other}'"))),
        }
    }

    fn parse_create(&mut self) -> Result<Statement, QueryError> {
        self.expect_keyword("CREATE")?;
        self.expect_keyword("TABLE")?;
        let table = self.expect_ident()?;
        self.expect(&Token::LParen)?;

        let mut columns = Vec::new();
        let mut primary = None;
        loop {
            if self.check_keyword("PRIMARY") {
                self.advance();
                self.expect_keyword("KEY")?;
                self.expect(&Token::LParen)?;
                primary = Some(self.expect_ident()?);
                self.expect(&Token::RParen)?;
            } else {
                let name = self.expect_ident()?;
                let ty = self.parse_type()?;
                columns.push(ColumnDef { name, ty });
            }
            match self.advance() {
                Token::Comma => continue,
                Token::RParen => break,
                other => return Err(QueryError::Syntax(format!("expected ',' or ')', found {other:?}"))),
            }
        }
        self.expect(&Token::Semicolon)?;
        Ok(Statement::CreateTable { table, columns, primary })
    }

    fn parse_type(&mut self) -> Result<ColumnType, QueryError> {
        let name = self.expect_ident()?;
        match name.as_str() {
            "INT" => Ok(ColumnType::Int),
            "REAL" => Ok(ColumnType::Real),
            "TEXT" => {
                self.expect(&Token::LParen)?;
                let n = match self.advance() {
                    Token::Int(n) if n > 0 => n as usize,
                    other => return Err(QueryError::Syntax(format!("expected a positive TEXT width, found {other:?}"))),
                };
                self.expect(&Token::RParen)?;
                Ok(ColumnType::Text(n))
            }
            other => Err(QueryError::Syntax(format!("unknown column type '{other}'"))),
        }
    }

    fn parse_drop(&mut self) -> Result<Statement, QueryError> {
        self.expect_keyword("DROP")?;
        self.expect_keyword("TABLE")?;
        let table = self.expect_ident()?;
        self.expect(&Token::Semicolon)?;
        Ok(Statement::DropTable { table })
    }

    fn parse_select(&mut self) -> Result<Statement, QueryError> {
        self.expect_keyword("SELECT")?;
        let columns = if *self.peek() == Token::Star {
            self.advance();
            None
        } else {
            Some(self.parse_ident_list()?)
        };
        self.expect_keyword("FROM")?;
        let table = self.expect_ident()?;
        let conditions = self.parse_optional_where()?;
        self.expect(&Token::Semicolon)?;
        Ok(Statement::Select { table, columns, conditions })
    }

    fn parse_ident_list(&mut self) -> Result<Vec<String>, QueryError> {
        let mut names = vec![self.expect_ident()?];
        while *self.peek() == Token::Comma {
            self.advance();
            names.push(self.expect_ident()?);
        }
        Ok(names)
    }

    fn parse_optional_where(&mut self) -> Result<Vec<Condition>, QueryError> {
        if self.check_keyword("WHERE") {
            self.advance();
            self.parse_conditions()
        } else {
            Ok(Vec::new())
        }
    }

    fn parse_conditions(&mut self) -> Result<Vec<Condition>, QueryError> {
        let mut conditions = vec![self.parse_condition()?];
        while self.check_keyword("AND") {
            self.advance();
            conditions.push(self.parse_condition()?);
        }
        Ok(conditions)
    }

    fn parse_condition(&mut self) -> Result<Condition, QueryError> {
        let column = self.expect_ident()?;
        let op = self.parse_operator()?;
        let value = self.parse_literal()?;
        Ok(Condition { column, op, value })
    }

    fn parse_operator(&mut self) -> Result<Operator, QueryError> {
        let op = match self.peek() {
            Token::Eq => Operator::Eq,
            Token::Neq => Operator::Neq,
            Token::Gt => Operator::Gt,
            Token::Ge => Operator::Ge,
            Token::Lt => Operator::Lt,
            Token::Le => Operator::Le,
            other => return Err(QueryError::Syntax(format!("expected a comparison operator, found {other:?}"))),
        };
        self.advance();
        Ok(op)
    }

    fn parse_literal(&mut self) -> Result<Literal, QueryError> {
        if *self.peek() == Token::Minus {
            self.advance();
            return match self.advance() {
                Token::Int(n) => Ok(Literal::Int(-n)),
                Token::Real(r) => Ok(Literal::Real(-r)),
                other => Err(QueryError::Syntax(format!("expected a number after '-', found {other:?}"))),
            };
        }
        match self.advance() {
            Token::Int(n) => Ok(Literal::Int(n)),
            Token::Real(r) => Ok(Literal::Real(r)),
            Token::Str(s) => Ok(Literal::Text(s)),
            other => Err(QueryError::Syntax(format!("expected a literal value, found {other:?}"))),
        }
    }

    fn parse_insert(&mut self) -> Result<Statement, QueryError> {
        self.expect_keyword("INSERT")?;
        self.expect_keyword("INTO")?;
        let table = self.expect_ident()?;
        let columns = if *self.peek() == Token::LParen {
            self.advance();
            let names = self.parse_ident_list()?;
            self.expect(&Token::RParen)?;
            Some(names)
        } else {
            None
        };
        self.expect_keyword("VALUES")?;

        let mut rows = vec![self.parse_value_tuple()?];
        while *self.peek() == Token::Comma {
            self.advance();
            rows.push(self.parse_value_tuple()?);
        }
        self.expect(&Token::Semicolon)?;
        Ok(Statement::Insert { table, columns, rows })
    }

    fn parse_value_tuple(&mut self) -> Result<Vec<Literal>, QueryError> {
        self.expect(&Token::LParen)?;
        let mut values = vec![self.parse_literal()?];
        while *self.peek() == Token::Comma {
            self.advance();
            values.push(self.parse_literal()?);
        }
        self.expect(&Token::RParen)?;
        Ok(values)
    }

    fn parse_update(&mut self) -> Result<Statement, QueryError> {
        self.expect_keyword("UPDATE")?;
        let table = self.expect_ident()?;
        self.expect_keyword("SET")?;
        let mut assignments = vec![self.parse_assignment()?];
        while *self.peek() == Token::Comma {
            self.advance();
            assignments.push(self.parse_assignment()?);
        }
        let conditions = self.parse_optional_where()?;
        self.expect(&Token::Semicolon)?;
        Ok(Statement::Update { table, assignments, conditions })
    }

    fn parse_assignment(&mut self) -> Result<Assignment, QueryError> {
        let column = self.expect_ident()?;
        self.expect(&Token::Eq)?;
        let expr = self.parse_expr()?;
        Ok(Assignment { column, expr })
    }

    fn parse_expr(&mut self) -> Result<Expr, QueryError> {
        match self.peek().clone() {
            Token::Int(_) | Token::Real(_) | Token::Str(_) | Token::Minus => Ok(Expr::Literal(self.parse_literal()?)),
            Token::Ident(name) => {
                self.advance();
                let arith = match self.peek() {
                    Token::Plus => Some(Arith::Add),
                    Token::Minus => Some(Arith::Sub),
                    Token::Star => Some(Arith::Mul),
                    Token::Slash => Some(Arith::Div),
                    _ => None,
                };
                match arith {
                    Some(op) => {
                        self.advance();
                        let value = self.parse_literal()?;
                        Ok(Expr::Arith(name, op, value))
                    }
                    None => Ok(Expr::Column(name)),
                }
            }
            other => Err(QueryError::Syntax(format!("expected an expression, found {other:?}"))),
        }
    }

    fn parse_delete(&mut self) -> Result<Statement, QueryError> {
        self.expect_keyword("DELETE")?;
        self.expect_keyword("FROM")?;
        let table = self.expect_ident()?;
        let conditions = self.parse_optional_where()?;
        self.expect(&Token::Semicolon)?;
        Ok(Statement::Delete { table, conditions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_create_table_with_primary_key() {
        let stmt = parse_statement("CREATE TABLE u (id INT, v REAL, PRIMARY KEY (id));").unwrap();
        match stmt {
            Statement::CreateTable { table, columns, primary } => {
                assert_eq!(table, "u");
                assert_eq!(columns.len(), 2);
                assert_eq!(primary, Some("id".to_string()));
            }
            other => panic!("expected CreateTable, got {other:?}"),
        }
    }

    #[test]
    fn parses_select_with_where_chain() {
        let stmt = parse_statement("SELECT v FROM u WHERE id >= 20 AND id < 40;").unwrap();
        match stmt {
            Statement::Select { table, columns, conditions } => {
                assert_eq!(table, "u");
                assert_eq!(columns, Some(vec!["v".to_string()]));
                assert_eq!(conditions.len(), 2);
            }
            other => panic!("expected Select, got {other:?}"),
        }
    }

    #[test]
    fn parses_insert_values_with_strings() {
        let stmt = parse_statement(r#"INSERT INTO t VALUES (1,"one"),(2,"two");"#).unwrap();
        match stmt {
            Statement::Insert { rows, .. } => {
                assert_eq!(rows.len(), 2);
                assert_eq!(rows[0], vec![Literal::Int(1), Literal::Text("one".into())]);
            }
            other => panic!("expected Insert, got {other:?}"),
        }
    }

    #[test]
    fn parses_update_arithmetic_assignment() {
        let stmt = parse_statement("UPDATE w SET n = n + 5 WHERE k = 2;").unwrap();
        match stmt {
            Statement::Update { assignments, conditions, .. } => {
                assert_eq!(assignments[0].expr, Expr::Arith("n".into(), Arith::Add, Literal::Int(5)));
                assert_eq!(conditions.len(), 1);
            }
            other => panic!("expected Update, got {other:?}"),
        }
    }
}
