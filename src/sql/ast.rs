//! Typed AST consumed by the executor.
//!
//! The parser (an external collaborator) produces these trees; the
//! executor takes ownership of a [`Statement`] and dispatches on its
//! [`StatementKind`]. Nothing in here ever inspects raw SQL text.

use crate::auth::PrivilegeKind;
use crate::catalog::schema::{ColumnDef, TableConstraint};
use crate::common::{CompareOp, Error, ErrorCode, Result, Value};
use crate::concurrency::IsolationLevel;

/// Discriminating tag of a statement, used to pick a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    CreateDatabase,
    CreateTable,
    CreateIndex,
    DropDatabase,
    DropTable,
    DropIndex,
    AlterTable,
    Use,
    Show,
    Select,
    Insert,
    Update,
    Delete,
    CreateUser,
    DropUser,
    Grant,
    Revoke,
    Begin,
    Commit,
    Rollback,
    Savepoint,
    SetTransaction,
    SetOperation,
}

/// Statement families, one strategy per family. TCL is handled by the
/// executor itself against the transaction manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementFamily {
    Ddl,
    Dml,
    Dcl,
    Utility,
    Tcl,
}

impl StatementKind {
    pub fn family(&self) -> StatementFamily {
        match self {
            StatementKind::CreateDatabase
            | StatementKind::CreateTable
            | StatementKind::CreateIndex
            | StatementKind::DropDatabase
            | StatementKind::DropTable
            | StatementKind::DropIndex
            | StatementKind::AlterTable => StatementFamily::Ddl,
            StatementKind::Select
            | StatementKind::Insert
            | StatementKind::Update
            | StatementKind::Delete
            | StatementKind::SetOperation => StatementFamily::Dml,
            StatementKind::CreateUser
            | StatementKind::DropUser
            | StatementKind::Grant
            | StatementKind::Revoke => StatementFamily::Dcl,
            StatementKind::Use | StatementKind::Show => StatementFamily::Utility,
            StatementKind::Begin
            | StatementKind::Commit
            | StatementKind::Rollback
            | StatementKind::Savepoint
            | StatementKind::SetTransaction => StatementFamily::Tcl,
        }
    }
}

/// Binary operators in expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    Gt,
    Le,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Like,
}

/// Unary operators in expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Expression tree nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Identifier(String),
    StringLiteral(String),
    NumericLiteral(String),
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expression>,
    },
    Function {
        name: String,
        args: Vec<Expression>,
    },
    Exists(Box<SelectStatement>),
    In {
        expr: Box<Expression>,
        list: Vec<Expression>,
    },
}

impl Expression {
    /// Shorthand for a NULL-able literal value node.
    pub fn literal(value: Value) -> Expression {
        match value {
            Value::Int(i) => Expression::NumericLiteral(i.to_string()),
            Value::Double(d) => Expression::NumericLiteral(d.to_string()),
            Value::Str(s) => Expression::StringLiteral(s),
            Value::Null => Expression::Function {
                name: "NULL".to_string(),
                args: Vec::new(),
            },
        }
    }

    /// Evaluate a constant expression: literals, unary minus/NOT, and
    /// arithmetic over numbers. Identifiers and subqueries are not
    /// constant and fail.
    pub fn evaluate(&self) -> Result<Value> {
        match self {
            Expression::StringLiteral(s) => Ok(Value::Str(s.clone())),
            Expression::NumericLiteral(s) => {
                if let Ok(i) = s.parse::<i64>() {
                    Ok(Value::Int(i))
                } else if let Ok(d) = s.parse::<f64>() {
                    Ok(Value::Double(d))
                } else {
                    Err(Error::new(
                        ErrorCode::SqlTypeMismatch,
                        "ast",
                        format!("'{}' is not a number", s),
                    ))
                }
            }
            Expression::Function { name, args } if name.eq_ignore_ascii_case("NULL") && args.is_empty() => {
                Ok(Value::Null)
            }
            Expression::Unary { op, expr } => {
                let value = expr.evaluate()?;
                match op {
                    UnaryOp::Neg => match value {
                        Value::Int(i) => Ok(Value::Int(-i)),
                        Value::Double(d) => Ok(Value::Double(-d)),
                        other => Err(Error::new(
                            ErrorCode::SqlTypeMismatch,
                            "ast",
                            format!("cannot negate '{}'", other.render()),
                        )),
                    },
                    UnaryOp::Not => Err(Error::new(
                        ErrorCode::SqlSemanticError,
                        "ast",
                        "NOT is not a constant value",
                    )),
                }
            }
            Expression::Binary { op, left, right } => {
                let (a, b) = (left.evaluate()?, right.evaluate()?);
                let (x, y) = match (a.as_number(), b.as_number()) {
                    (Some(x), Some(y)) => (x, y),
                    _ => {
                        return Err(Error::new(
                            ErrorCode::SqlTypeMismatch,
                            "ast",
                            "arithmetic over non-numeric operands",
                        ))
                    }
                };
                let result = match op {
                    BinaryOp::Add => x + y,
                    BinaryOp::Sub => x - y,
                    BinaryOp::Mul => x * y,
                    BinaryOp::Div => {
                        if y == 0.0 {
                            return Err(Error::new(
                                ErrorCode::InvalidParameter,
                                "ast",
                                "division by zero",
                            ));
                        }
                        x / y
                    }
                    BinaryOp::Mod => {
                        if y == 0.0 {
                            return Err(Error::new(
                                ErrorCode::InvalidParameter,
                                "ast",
                                "division by zero",
                            ));
                        }
                        x % y
                    }
                    _ => {
                        return Err(Error::new(
                            ErrorCode::SqlSemanticError,
                            "ast",
                            "operator is not a constant value",
                        ))
                    }
                };
                if result.fract() == 0.0 && matches!((&a, &b), (Value::Int(_), Value::Int(_))) {
                    Ok(Value::Int(result as i64))
                } else {
                    Ok(Value::Double(result))
                }
            }
            Expression::Identifier(name) => Err(Error::new(
                ErrorCode::SqlSemanticError,
                "ast",
                format!("identifier '{}' is not a constant", name),
            )),
            _ => Err(Error::new(
                ErrorCode::SqlSemanticError,
                "ast",
                "expression is not a constant",
            )),
        }
    }
}

/// A WHERE clause: a column-op-value triple.
#[derive(Debug, Clone, PartialEq)]
pub struct WhereClause {
    pub column: String,
    pub op: CompareOp,
    pub value: Value,
}

impl WhereClause {
    pub fn new(column: impl Into<String>, op: CompareOp, value: Value) -> Self {
        Self {
            column: column.into(),
            op,
            value,
        }
    }

    pub fn describe(&self) -> String {
        format!("{} {} {}", self.column, self.op, self.value.render())
    }
}

/// Aggregate functions in select items and HAVING.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunc {
    pub fn parse(s: &str) -> Option<AggregateFunc> {
        Some(match s.to_ascii_uppercase().as_str() {
            "COUNT" => AggregateFunc::Count,
            "SUM" => AggregateFunc::Sum,
            "AVG" => AggregateFunc::Avg,
            "MIN" => AggregateFunc::Min,
            "MAX" => AggregateFunc::Max,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunc::Count => "COUNT",
            AggregateFunc::Sum => "SUM",
            AggregateFunc::Avg => "AVG",
            AggregateFunc::Min => "MIN",
            AggregateFunc::Max => "MAX",
        }
    }
}

/// One item in a SELECT list.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    Column(String),
    /// `COUNT(*)` has `column: None`.
    Aggregate {
        func: AggregateFunc,
        column: Option<String>,
    },
}

/// The projected columns of a SELECT.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    All,
    Items(Vec<SelectItem>),
}

/// `JOIN t2 ON left = right` (equality join).
#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub table: String,
    pub left_column: String,
    pub right_column: String,
}

/// HAVING over one aggregate output.
#[derive(Debug, Clone, PartialEq)]
pub struct HavingClause {
    pub func: AggregateFunc,
    pub column: Option<String>,
    pub op: CompareOp,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

/// A full SELECT statement.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub distinct: bool,
    pub projection: Projection,
    pub table: String,
    pub join: Option<JoinClause>,
    pub where_clause: Option<WhereClause>,
    pub group_by: Option<String>,
    pub having: Option<HavingClause>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl SelectStatement {
    /// A bare `SELECT * FROM table`.
    pub fn star(table: impl Into<String>) -> Self {
        Self {
            distinct: false,
            projection: Projection::All,
            table: table.into(),
            join: None,
            where_clause: None,
            group_by: None,
            having: None,
            order_by: None,
            limit: None,
            offset: None,
        }
    }

    pub fn with_where(mut self, clause: WhereClause) -> Self {
        self.where_clause = Some(clause);
        self
    }

    /// True when any select item is an aggregate.
    pub fn has_aggregates(&self) -> bool {
        match &self.projection {
            Projection::All => false,
            Projection::Items(items) => items
                .iter()
                .any(|item| matches!(item, SelectItem::Aggregate { .. })),
        }
    }
}

/// Set operation kinds wrapping two SELECT operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOpKind {
    Union,
    Intersect,
    Except,
}

/// ALTER TABLE actions.
#[derive(Debug, Clone, PartialEq)]
pub enum AlterTableAction {
    AddColumn(ColumnDef),
    DropColumn(String),
}

/// SHOW variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowKind {
    Databases,
    Tables,
    Users,
}

/// The discriminated union over statement kinds the executor consumes.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateDatabase {
        name: String,
    },
    DropDatabase {
        name: String,
        if_exists: bool,
    },
    CreateTable {
        name: String,
        columns: Vec<ColumnDef>,
        constraints: Vec<TableConstraint>,
    },
    DropTable {
        name: String,
        if_exists: bool,
    },
    AlterTable {
        name: String,
        action: AlterTableAction,
    },
    CreateIndex {
        name: String,
        table: String,
        column: String,
        unique: bool,
    },
    DropIndex {
        name: String,
    },
    Use {
        database: String,
    },
    Show(ShowKind),
    Select(SelectStatement),
    Insert {
        table: String,
        columns: Option<Vec<String>>,
        rows: Vec<Vec<Expression>>,
    },
    Update {
        table: String,
        assignments: Vec<(String, Expression)>,
        where_clause: Option<WhereClause>,
    },
    Delete {
        table: String,
        where_clause: Option<WhereClause>,
    },
    CreateUser {
        username: String,
        password: String,
    },
    DropUser {
        username: String,
        if_exists: bool,
    },
    Grant {
        privileges: Vec<PrivilegeKind>,
        table: String,
        user: String,
    },
    Revoke {
        privileges: Vec<PrivilegeKind>,
        table: String,
        user: String,
    },
    Begin,
    Commit,
    Rollback,
    Savepoint {
        name: String,
    },
    SetTransaction {
        isolation: IsolationLevel,
    },
    SetOperation {
        op: SetOpKind,
        all: bool,
        left: Box<SelectStatement>,
        right: Box<SelectStatement>,
    },
}

impl Statement {
    pub fn kind(&self) -> StatementKind {
        match self {
            Statement::CreateDatabase { .. } => StatementKind::CreateDatabase,
            Statement::DropDatabase { .. } => StatementKind::DropDatabase,
            Statement::CreateTable { .. } => StatementKind::CreateTable,
            Statement::DropTable { .. } => StatementKind::DropTable,
            Statement::AlterTable { .. } => StatementKind::AlterTable,
            Statement::CreateIndex { .. } => StatementKind::CreateIndex,
            Statement::DropIndex { .. } => StatementKind::DropIndex,
            Statement::Use { .. } => StatementKind::Use,
            Statement::Show(_) => StatementKind::Show,
            Statement::Select(_) => StatementKind::Select,
            Statement::Insert { .. } => StatementKind::Insert,
            Statement::Update { .. } => StatementKind::Update,
            Statement::Delete { .. } => StatementKind::Delete,
            Statement::CreateUser { .. } => StatementKind::CreateUser,
            Statement::DropUser { .. } => StatementKind::DropUser,
            Statement::Grant { .. } => StatementKind::Grant,
            Statement::Revoke { .. } => StatementKind::Revoke,
            Statement::Begin => StatementKind::Begin,
            Statement::Commit => StatementKind::Commit,
            Statement::Rollback => StatementKind::Rollback,
            Statement::Savepoint { .. } => StatementKind::Savepoint,
            Statement::SetTransaction { .. } => StatementKind::SetTransaction,
            Statement::SetOperation { .. } => StatementKind::SetOperation,
        }
    }

    pub fn family(&self) -> StatementFamily {
        self.kind().family()
    }
}
