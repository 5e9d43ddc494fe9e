//! Row predicates
//!
//! 按行对命名列求值的布尔表达式 AST。自定义治疗规则和条件随机分组都用它表达，
//! 应用前可以检查、打印并对照表校验。
//!
//! 文本形式（见 [`RowPredicate::parse`]）：
//!
//! ```text
//! male == 1 && (age0 >= 40 || !(cd40 < 200))
//! ```
//!
//! `&` / `|` 等同 `&&` / `||`，`true` / `false` 为常量谓词。
//! 列名规则与模型公式相同，可含 `.`。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{GFormulaError, Result};
use crate::formula::{is_identifier_char, is_identifier_start};
use crate::sanitize::is_missing;
use crate::table::ObservationTable;

/// 括号与 `!` 的最大嵌套层数
pub const MAX_PREDICATE_DEPTH: usize = 64;
/// 单个谓词文本的最大词元数
pub const MAX_PREDICATE_TOKENS: usize = 1024;

/// 比较运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn apply(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            Self::Eq => lhs == rhs,
            Self::Ne => lhs != rhs,
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
            Self::Gt => lhs > rhs,
            Self::Ge => lhs >= rhs,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// 单行上的布尔谓词
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowPredicate {
    Always,
    Never,
    Compare {
        column: String,
        op: CmpOp,
        value: f64,
    },
    And(Box<RowPredicate>, Box<RowPredicate>),
    Or(Box<RowPredicate>, Box<RowPredicate>),
    Not(Box<RowPredicate>),
}

impl RowPredicate {
    pub fn compare(column: impl Into<String>, op: CmpOp, value: f64) -> Self {
        Self::Compare {
            column: column.into(),
            op,
            value,
        }
    }

    pub fn eq(column: impl Into<String>, value: f64) -> Self {
        Self::compare(column, CmpOp::Eq, value)
    }

    pub fn ne(column: impl Into<String>, value: f64) -> Self {
        Self::compare(column, CmpOp::Ne, value)
    }

    pub fn lt(column: impl Into<String>, value: f64) -> Self {
        Self::compare(column, CmpOp::Lt, value)
    }

    pub fn le(column: impl Into<String>, value: f64) -> Self {
        Self::compare(column, CmpOp::Le, value)
    }

    pub fn gt(column: impl Into<String>, value: f64) -> Self {
        Self::compare(column, CmpOp::Gt, value)
    }

    pub fn ge(column: impl Into<String>, value: f64) -> Self {
        Self::compare(column, CmpOp::Ge, value)
    }

    pub fn and(self, other: RowPredicate) -> Self {
        Self::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: RowPredicate) -> Self {
        Self::Or(Box::new(self), Box::new(other))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// 解析文本形式
    pub fn parse(input: &str) -> Result<Self> {
        let tokens = tokenize(input)?;
        if tokens.len() > MAX_PREDICATE_TOKENS {
            return Err(GFormulaError::RuleEvaluation(format!(
                "predicate has {} tokens; at most {MAX_PREDICATE_TOKENS} are allowed",
                tokens.len()
            )));
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let expr = parser.parse_or()?;
        if let Some(tok) = parser.peek() {
            return Err(GFormulaError::RuleEvaluation(format!(
                "unexpected token '{tok}' in predicate '{input}'"
            )));
        }
        Ok(expr)
    }

    /// 表达式引用的列（去重，按首次出现顺序）
    pub fn columns(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Always | Self::Never => {}
            Self::Compare { column, .. } => {
                if !out.contains(&column.as_str()) {
                    out.push(column);
                }
            }
            Self::And(a, b) | Self::Or(a, b) => {
                a.collect_columns(out);
                b.collect_columns(out);
            }
            Self::Not(a) => a.collect_columns(out),
        }
    }

    /// 检查引用的列都在表中
    pub fn validate(&self, table: &ObservationTable) -> Result<()> {
        match self.columns().into_iter().find(|c| !table.has_column(c)) {
            Some(missing) => Err(GFormulaError::RuleEvaluation(format!(
                "predicate '{self}' references unknown column '{missing}'"
            ))),
            None => Ok(()),
        }
    }

    /// 对单行求值
    ///
    /// 与缺失单元格比较没有布尔值，返回错误
    pub fn evaluate(&self, table: &ObservationTable, row: usize) -> Result<bool> {
        match self {
            Self::Always => Ok(true),
            Self::Never => Ok(false),
            Self::Compare { column, op, value } => {
                let cell = table.value(row, column).ok_or_else(|| {
                    GFormulaError::RuleEvaluation(format!(
                        "predicate references unknown column '{column}'"
                    ))
                })?;
                if is_missing(cell) {
                    return Err(GFormulaError::RuleEvaluation(format!(
                        "'{column} {} {value}' is undefined on row {row}: value is missing",
                        op.symbol()
                    )));
                }
                Ok(op.apply(cell, *value))
            }
            Self::And(a, b) => Ok(a.evaluate(table, row)? && b.evaluate(table, row)?),
            Self::Or(a, b) => Ok(a.evaluate(table, row)? || b.evaluate(table, row)?),
            Self::Not(a) => Ok(!a.evaluate(table, row)?),
        }
    }

    /// 校验列引用后对每一行求值
    pub fn mask(&self, table: &ObservationTable) -> Result<Vec<bool>> {
        self.validate(table)?;
        (0..table.n_rows())
            .map(|row| self.evaluate(table, row))
            .collect()
    }
}

impl fmt::Display for RowPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => f.write_str("true"),
            Self::Never => f.write_str("false"),
            Self::Compare { column, op, value } => {
                write!(f, "{column} {} {value}", op.symbol())
            }
            Self::And(a, b) => write!(f, "({a} && {b})"),
            Self::Or(a, b) => write!(f, "({a} || {b})"),
            Self::Not(a) => write!(f, "!{a}"),
        }
    }
}

impl FromStr for RowPredicate {
    type Err = GFormulaError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

// ==================== Parser ====================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Op(CmpOp),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) => f.write_str(s),
            Token::Number(v) => write!(f, "{v}"),
            Token::Op(op) => f.write_str(op.symbol()),
            Token::And => f.write_str("&&"),
            Token::Or => f.write_str("||"),
            Token::Not => f.write_str("!"),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let err = |msg: String| GFormulaError::RuleEvaluation(format!("{msg} in predicate '{input}'"));

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '&' => {
                tokens.push(Token::And);
                i += if next == Some('&') { 2 } else { 1 };
            }
            '|' => {
                tokens.push(Token::Or);
                i += if next == Some('|') { 2 } else { 1 };
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Op(CmpOp::Ne));
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '=' if next == Some('=') => {
                tokens.push(Token::Op(CmpOp::Eq));
                i += 2;
            }
            '<' | '>' => {
                let op = match (c, next == Some('=')) {
                    ('<', true) => CmpOp::Le,
                    ('<', false) => CmpOp::Lt,
                    (_, true) => CmpOp::Ge,
                    (_, false) => CmpOp::Gt,
                };
                tokens.push(Token::Op(op));
                i += if next == Some('=') { 2 } else { 1 };
            }
            c if c.is_ascii_digit() || c == '.' || c == '-' => {
                let start = i;
                i += 1;
                while i < chars.len()
                    && (chars[i].is_ascii_digit()
                        || chars[i] == '.'
                        || chars[i] == 'e'
                        || chars[i] == 'E'
                        || ((chars[i] == '-' || chars[i] == '+')
                            && matches!(chars[i - 1], 'e' | 'E')))
                {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| err(format!("invalid number '{text}'")))?;
                tokens.push(Token::Number(value));
            }
            c if is_identifier_start(c) => {
                let start = i;
                while i < chars.len() && is_identifier_char(chars[i]) {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(err(format!("unexpected character '{other}'"))),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn descend(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_PREDICATE_DEPTH {
            return Err(GFormulaError::RuleEvaluation(format!(
                "predicate nests deeper than {MAX_PREDICATE_DEPTH} levels"
            )));
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<RowPredicate> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let rhs = self.parse_and()?;
            lhs = lhs.or(rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<RowPredicate> {
        let mut lhs = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = lhs.and(rhs);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<RowPredicate> {
        match self.next() {
            Some(Token::Not) => {
                self.descend()?;
                let inner = self.parse_unary()?;
                self.depth -= 1;
                Ok(inner.not())
            }
            Some(Token::LParen) => {
                self.descend()?;
                let inner = self.parse_or()?;
                self.depth -= 1;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(GFormulaError::RuleEvaluation(
                        "unbalanced parentheses in predicate".to_string(),
                    )),
                }
            }
            Some(Token::Ident(name)) if name == "true" => Ok(RowPredicate::Always),
            Some(Token::Ident(name)) if name == "false" => Ok(RowPredicate::Never),
            Some(Token::Ident(column)) => {
                let op = match self.next() {
                    Some(Token::Op(op)) => op,
                    other => {
                        return Err(GFormulaError::RuleEvaluation(format!(
                            "expected comparison after '{column}', found {}",
                            describe(other.as_ref())
                        )))
                    }
                };
                match self.next() {
                    Some(Token::Number(value)) => Ok(RowPredicate::compare(column, op, value)),
                    other => Err(GFormulaError::RuleEvaluation(format!(
                        "expected number after '{column} {}', found {}",
                        op.symbol(),
                        describe(other.as_ref())
                    ))),
                }
            }
            other => Err(GFormulaError::RuleEvaluation(format!(
                "expected a comparison, found {}",
                describe(other.as_ref())
            ))),
        }
    }
}

fn describe(tok: Option<&Token>) -> String {
    match tok {
        Some(t) => format!("'{t}'"),
        None => "end of input".to_string(),
    }
}
