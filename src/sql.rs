use chrono::NaiveDate;
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    RegisterUser {
        id: Ulid,
        email: String,
        display_name: String,
        role: Role,
    },
    ListProperty {
        id: Ulid,
        listing: Listing,
    },
    UpdateProperty {
        id: Ulid,
        patch: ListingPatch,
    },
    DelistProperty {
        id: Ulid,
    },
    RequestBooking {
        id: Ulid,
        property_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
        guests: u32,
    },
    SetBookingStatus {
        id: Ulid,
        action: StatusAction,
    },
    AddFavorite {
        property_id: Ulid,
    },
    RemoveFavorite {
        property_id: Ulid,
    },
    Search {
        tokens: Vec<String>,
        check_in: Option<NaiveDate>,
        check_out: Option<NaiveDate>,
        min_guests: u32,
    },
    SelectUser {
        id: Ulid,
    },
    SelectProperties {
        id: Option<Ulid>,
        owner_id: Option<Ulid>,
    },
    SelectBookings {
        id: Option<Ulid>,
        property_id: Option<Ulid>,
    },
    SelectFavorites,
    SelectAvailability {
        property_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update { table, assignments, selection, .. } => {
            parse_update(table, assignments, selection)
        }
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "users" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("users", 4, values.len()));
            }
            Ok(Command::RegisterUser {
                id: parse_ulid(&values[0])?,
                email: parse_string(&values[1])?,
                display_name: parse_string(&values[2])?,
                role: parse_role(&values[3])?,
            })
        }
        // (id, title, city, state, country, max_guests, nightly_price
        //  [, amenities [, available_from [, available_to]]])
        "properties" => {
            if values.len() < 7 {
                return Err(SqlError::WrongArity("properties", 7, values.len()));
            }
            let id = parse_ulid(&values[0])?;
            let amenities = if values.len() >= 8 {
                parse_string_array(&values[7])?
            } else {
                Vec::new()
            };
            let available_from = if values.len() >= 9 {
                parse_date_or_null(&values[8])?
            } else {
                None
            };
            let available_to = if values.len() >= 10 {
                parse_date_or_null(&values[9])?
            } else {
                None
            };
            Ok(Command::ListProperty {
                id,
                listing: Listing {
                    title: parse_string(&values[1])?,
                    city: parse_string(&values[2])?,
                    state: parse_string(&values[3])?,
                    country: parse_string(&values[4])?,
                    max_guests: parse_u32(&values[5])?,
                    nightly_price: parse_i64(&values[6])?,
                    amenities,
                    available_from,
                    available_to,
                },
            })
        }
        "bookings" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("bookings", 5, values.len()));
            }
            Ok(Command::RequestBooking {
                id: parse_ulid(&values[0])?,
                property_id: parse_ulid(&values[1])?,
                check_in: parse_date(&values[2])?,
                check_out: parse_date(&values[3])?,
                guests: parse_u32(&values[4])?,
            })
        }
        "favorites" => {
            if values.is_empty() {
                return Err(SqlError::WrongArity("favorites", 1, 0));
            }
            Ok(Command::AddFavorite { property_id: parse_ulid(&values[0])? })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    match table.as_str() {
        "properties" => {
            let id = extract_where_eq_ulid(selection, "id")?;
            let mut patch = ListingPatch::default();
            for assignment in assignments {
                let value = &assignment.value;
                match assignment_column(assignment)?.as_str() {
                    "title" => patch.title = Some(parse_string(value)?),
                    "city" => patch.city = Some(parse_string(value)?),
                    "state" => patch.state = Some(parse_string(value)?),
                    "country" => patch.country = Some(parse_string(value)?),
                    "max_guests" => patch.max_guests = Some(parse_u32(value)?),
                    "nightly_price" => patch.nightly_price = Some(parse_i64(value)?),
                    "amenities" => patch.amenities = Some(parse_string_array(value)?),
                    "available_from" => patch.available_from = Some(parse_date_or_null(value)?),
                    "available_to" => patch.available_to = Some(parse_date_or_null(value)?),
                    other => return Err(SqlError::Parse(format!("unknown column: {other}"))),
                }
            }
            Ok(Command::UpdateProperty { id, patch })
        }
        "bookings" => {
            let id = extract_where_eq_ulid(selection, "id")?;
            if assignments.len() != 1 || assignment_column(&assignments[0])? != "status" {
                return Err(SqlError::Unsupported("only status may be updated on bookings".into()));
            }
            let status = parse_string(&assignments[0].value)?;
            let action = match status.to_ascii_uppercase().as_str() {
                "ACCEPTED" => StatusAction::Accept,
                "CANCELLED" => StatusAction::Cancel,
                "PENDING" => {
                    return Err(SqlError::Unsupported("cannot return a booking to PENDING".into()));
                }
                _ => return Err(SqlError::Parse(format!("bad status: {status}"))),
            };
            Ok(Command::SetBookingStatus { id, action })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    match table.as_str() {
        "properties" => {
            let id = extract_where_eq_ulid(&delete.selection, "id")?;
            Ok(Command::DelistProperty { id })
        }
        "favorites" => {
            let property_id = extract_where_eq_ulid(&delete.selection, "property_id")?;
            Ok(Command::RemoveFavorite { property_id })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    match table.as_str() {
        "search" => {
            let (mut location, mut check_in, mut check_out, mut min_guests) =
                (None, None, None, None);
            if let Some(selection) = &select.selection {
                extract_search_filters(selection, &mut location, &mut check_in, &mut check_out, &mut min_guests)?;
            }
            if check_in.is_some() != check_out.is_some() {
                return Err(SqlError::HalfOpenRange);
            }
            // Comma-separated so a token can hold a multi-word place name.
            let tokens = location
                .map(|l| {
                    l.split(',')
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            Ok(Command::Search {
                tokens,
                check_in,
                check_out,
                min_guests: min_guests.unwrap_or(0),
            })
        }
        "users" => {
            let mut id = None;
            if let Some(selection) = &select.selection {
                extract_id_filters(selection, &mut [("id", &mut id)])?;
            }
            Ok(Command::SelectUser {
                id: id.ok_or(SqlError::MissingFilter("id"))?,
            })
        }
        "properties" => {
            let (mut id, mut owner_id) = (None, None);
            if let Some(selection) = &select.selection {
                extract_id_filters(selection, &mut [("id", &mut id), ("owner_id", &mut owner_id)])?;
            }
            Ok(Command::SelectProperties { id, owner_id })
        }
        "bookings" => {
            let (mut id, mut property_id) = (None, None);
            if let Some(selection) = &select.selection {
                extract_id_filters(selection, &mut [("id", &mut id), ("property_id", &mut property_id)])?;
            }
            Ok(Command::SelectBookings { id, property_id })
        }
        "favorites" => Ok(Command::SelectFavorites),
        "availability" => {
            let (mut property_id, mut from, mut to) = (None, None, None);
            if let Some(selection) = &select.selection {
                extract_availability_filters(selection, &mut property_id, &mut from, &mut to)?;
            }
            Ok(Command::SelectAvailability {
                property_id: property_id.ok_or(SqlError::MissingFilter("property_id"))?,
                from: from.ok_or(SqlError::MissingFilter("free_from"))?,
                to: to.ok_or(SqlError::MissingFilter("free_to"))?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn extract_search_filters(
    expr: &Expr,
    location: &mut Option<String>,
    check_in: &mut Option<NaiveDate>,
    check_out: &mut Option<NaiveDate>,
    min_guests: &mut Option<u32>,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_search_filters(left, location, check_in, check_out, min_guests)?;
                extract_search_filters(right, location, check_in, check_out, min_guests)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("location") => *location = Some(parse_string(right)?),
                Some("check_in") => *check_in = Some(parse_date(right)?),
                Some("check_out") => *check_out = Some(parse_date(right)?),
                Some("min_guests") => *min_guests = Some(parse_u32(right)?),
                _ => {}
            },
            _ => {}
        }
    }
    Ok(())
}

/// Collect `col = 'ulid'` equality filters for the named columns out of an
/// AND-chain. Unknown columns are ignored.
fn extract_id_filters(
    expr: &Expr,
    targets: &mut [(&str, &mut Option<Ulid>)],
) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op: ast::BinaryOperator::And, right } => {
            extract_id_filters(left, targets)?;
            extract_id_filters(right, targets)?;
        }
        Expr::BinaryOp { left, op: ast::BinaryOperator::Eq, right } => {
            if let Some(col) = expr_column_name(left) {
                for (name, slot) in targets.iter_mut() {
                    if col == *name {
                        **slot = Some(parse_ulid(right)?);
                    }
                }
            }
        }
        _ => {}
    }
    Ok(())
}

fn extract_availability_filters(
    expr: &Expr,
    property_id: &mut Option<Ulid>,
    from: &mut Option<NaiveDate>,
    to: &mut Option<NaiveDate>,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_availability_filters(left, property_id, from, to)?;
                extract_availability_filters(right, property_id, from, to)?;
            }
            ast::BinaryOperator::Eq => {
                if expr_column_name(left).as_deref() == Some("property_id") {
                    *property_id = Some(parse_ulid(right)?);
                }
            }
            ast::BinaryOperator::GtEq => {
                if expr_column_name(left).as_deref() == Some("free_from") {
                    *from = Some(parse_date(right)?);
                }
            }
            ast::BinaryOperator::LtEq => {
                if expr_column_name(left).as_deref() == Some("free_to") {
                    *to = Some(parse_date(right)?);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn assignment_column(assignment: &ast::Assignment) -> Result<String, SqlError> {
    match &assignment.target {
        ast::AssignmentTarget::ColumnName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))
        }
        _ => Err(SqlError::Parse("unsupported assignment target".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows[0].clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_eq_ulid(selection: &Option<Expr>, column: &'static str) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter(column))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some(column) {
                parse_ulid(right)
            } else {
                Err(SqlError::MissingFilter(column))
            }
        }
        _ => Err(SqlError::MissingFilter(column)),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_role(expr: &Expr) -> Result<Role, SqlError> {
    let s = parse_string(expr)?;
    Role::parse(&s).ok_or_else(|| SqlError::Parse(format!("bad role: {s}")))
}

/// Dates are strict `YYYY-MM-DD`; anything else is an input error, never
/// a silent reinterpretation.
fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => s.clone(),
        Some(other) => return Err(SqlError::InvalidDate(format!("{other}"))),
        None => return Err(SqlError::InvalidDate(format!("{expr}"))),
    };
    NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|_| SqlError::InvalidDate(s))
}

fn parse_date_or_null(expr: &Expr) -> Result<Option<NaiveDate>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    parse_date(expr).map(Some)
}

fn parse_string_array(expr: &Expr) -> Result<Vec<String>, SqlError> {
    match expr {
        Expr::Array(array) => array.elem.iter().map(parse_string).collect(),
        _ => match extract_value(expr) {
            Some(Value::Null) => Ok(Vec::new()),
            _ => Err(SqlError::Parse(format!("expected ARRAY, got {expr:?}"))),
        },
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    parse_i64_expr(expr)
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
    InvalidDate(String),
    HalfOpenRange,
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::InvalidDate(s) => write!(f, "invalid date: {s} (expected YYYY-MM-DD)"),
            SqlError::HalfOpenRange => write!(f, "check_in and check_out must be given together"),
        }
    }
}

impl std::error::Error for SqlError {}
