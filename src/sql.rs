use chrono::{NaiveDate, NaiveTime};
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertProfile {
        id: Ulid,
        role: Role,
        full_name: Option<String>,
    },
    InsertWeeklyRule {
        id: Ulid,
        counselor_id: Ulid,
        day_of_week: DayOfWeek,
        start: NaiveTime,
        end: NaiveTime,
    },
    SetWeeklyRuleActive {
        id: Ulid,
        is_active: bool,
    },
    DeleteWeeklyRule {
        id: Ulid,
    },
    /// `hours` is None for a blocked date.
    InsertOverride {
        id: Ulid,
        counselor_id: Ulid,
        date: NaiveDate,
        hours: Option<(NaiveTime, NaiveTime)>,
        reason: Option<String>,
    },
    DeleteOverride {
        id: Ulid,
    },
    InsertAppointment {
        id: Ulid,
        counselor_id: Ulid,
        date: NaiveDate,
        start: NaiveTime,
        notes: Option<String>,
    },
    SetAppointmentStatus {
        id: Ulid,
        status: AppointmentStatus,
    },
    SelectSlots {
        counselor_id: Ulid,
        date: NaiveDate,
    },
    SelectDateStatus {
        counselor_id: Ulid,
        date: NaiveDate,
    },
    SelectWeeklyRules {
        counselor_id: Ulid,
    },
    SelectOverrides {
        counselor_id: Ulid,
        from: Option<NaiveDate>,
    },
    SelectAppointments {
        by: AppointmentsBy,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppointmentsBy {
    Counselor(Ulid),
    User(Ulid),
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

/// One VALUES row, addressable by column name. Without an explicit column
/// list the table's documented column order applies.
struct Row<'a> {
    table: &'static str,
    columns: Vec<String>,
    values: &'a [Expr],
}

impl<'a> Row<'a> {
    fn new(table: &'static str, insert: &ast::Insert, default_columns: &[&str], values: &'a [Expr]) -> Self {
        let columns = if insert.columns.is_empty() {
            default_columns.iter().map(|c| c.to_string()).collect()
        } else {
            insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
        };
        Self { table, columns, values }
    }

    fn get(&self, column: &str) -> Option<&'a Expr> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.values.get(idx).filter(|e| !is_null(e))
    }

    fn required(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingValue(self.table, column))
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "profiles" => {
            let row = Row::new("profiles", insert, &["id", "user_type", "full_name"], values);
            let role = parse_string(row.required("user_type")?)?;
            Ok(Command::InsertProfile {
                id: parse_ulid(row.required("id")?)?,
                role: role.parse().map_err(SqlError::Parse)?,
                full_name: row.get("full_name").map(parse_string).transpose()?,
            })
        }
        "weekly_availability" => {
            let row = Row::new(
                "weekly_availability",
                insert,
                &["id", "counselor_id", "day_of_week", "start_time", "end_time"],
                values,
            );
            let day = parse_i64(row.required("day_of_week")?)?;
            Ok(Command::InsertWeeklyRule {
                id: parse_ulid(row.required("id")?)?,
                counselor_id: parse_ulid(row.required("counselor_id")?)?,
                day_of_week: DayOfWeek::try_from(day)
                    .map_err(|_| SqlError::Parse(format!("day_of_week out of range: {day}")))?,
                start: parse_time(row.required("start_time")?)?,
                end: parse_time(row.required("end_time")?)?,
            })
        }
        "date_overrides" => {
            let row = Row::new(
                "date_overrides",
                insert,
                &["id", "counselor_id", "override_date", "is_available", "start_time", "end_time", "reason"],
                values,
            );
            let is_available = row.get("is_available").map(parse_bool).transpose()?.unwrap_or(false);
            let hours = if is_available {
                Some((
                    parse_time(row.required("start_time")?)?,
                    parse_time(row.required("end_time")?)?,
                ))
            } else {
                None
            };
            Ok(Command::InsertOverride {
                id: parse_ulid(row.required("id")?)?,
                counselor_id: parse_ulid(row.required("counselor_id")?)?,
                date: parse_date(row.required("override_date")?)?,
                hours,
                reason: row.get("reason").map(parse_string).transpose()?,
            })
        }
        "appointments" => {
            let row = Row::new(
                "appointments",
                insert,
                &["id", "counselor_id", "appointment_date", "start_time", "notes"],
                values,
            );
            Ok(Command::InsertAppointment {
                id: parse_ulid(row.required("id")?)?,
                counselor_id: parse_ulid(row.required("counselor_id")?)?,
                date: parse_date(row.required("appointment_date")?)?,
                start: parse_time(row.required("start_time")?)?,
                notes: row.get("notes").map(parse_string).transpose()?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── UPDATE / DELETE ───────────────────────────────────────────

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let id = extract_where_id(selection)?;

    match table.as_str() {
        "weekly_availability" => Ok(Command::SetWeeklyRuleActive {
            id,
            is_active: parse_bool(assigned(assignments, "is_active")?)?,
        }),
        "appointments" => {
            let status = parse_string(assigned(assignments, "status")?)?;
            Ok(Command::SetAppointmentStatus {
                id,
                status: status.parse().map_err(SqlError::Parse)?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn assigned<'a>(assignments: &'a [ast::Assignment], column: &'static str) -> Result<&'a Expr, SqlError> {
    assignments
        .iter()
        .find(|a| match &a.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name).as_deref() == Some(column),
            _ => false,
        })
        .map(|a| &a.value)
        .ok_or(SqlError::MissingValue("SET", column))
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "weekly_availability" => Ok(Command::DeleteWeeklyRule { id }),
        "date_overrides" => Ok(Command::DeleteOverride { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

/// `column op value` predicates from a WHERE clause joined by AND.
#[derive(Default)]
struct Filters<'a> {
    eq: Vec<(String, &'a Expr)>,
    gte: Vec<(String, &'a Expr)>,
}

impl<'a> Filters<'a> {
    fn collect(&mut self, expr: &'a Expr) -> Result<(), SqlError> {
        match expr {
            Expr::BinaryOp { left, op, right } => match op {
                ast::BinaryOperator::And => {
                    self.collect(left)?;
                    self.collect(right)?;
                }
                ast::BinaryOperator::Eq => {
                    if let Some(col) = expr_column_name(left) {
                        self.eq.push((col, right.as_ref()));
                    }
                }
                ast::BinaryOperator::GtEq => {
                    if let Some(col) = expr_column_name(left) {
                        self.gte.push((col, right.as_ref()));
                    }
                }
                other => return Err(SqlError::Unsupported(format!("operator {other}"))),
            },
            Expr::Nested(inner) => self.collect(inner)?,
            other => return Err(SqlError::Unsupported(format!("filter {other}"))),
        }
        Ok(())
    }

    fn eq(&self, column: &str) -> Option<&'a Expr> {
        self.eq.iter().find(|(c, _)| c == column).map(|(_, e)| *e)
    }

    fn gte(&self, column: &str) -> Option<&'a Expr> {
        self.gte.iter().find(|(c, _)| c == column).map(|(_, e)| *e)
    }

    fn require_ulid(&self, column: &'static str) -> Result<Ulid, SqlError> {
        parse_ulid(self.eq(column).ok_or(SqlError::MissingFilter(column))?)
    }

    fn require_date(&self, column: &'static str) -> Result<NaiveDate, SqlError> {
        parse_date(self.eq(column).ok_or(SqlError::MissingFilter(column))?)
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        filters.collect(selection)?;
    }

    match table.as_str() {
        "available_slots" => Ok(Command::SelectSlots {
            counselor_id: filters.require_ulid("counselor_id")?,
            date: filters.require_date("date")?,
        }),
        "date_status" => Ok(Command::SelectDateStatus {
            counselor_id: filters.require_ulid("counselor_id")?,
            date: filters.require_date("date")?,
        }),
        "weekly_availability" => Ok(Command::SelectWeeklyRules {
            counselor_id: filters.require_ulid("counselor_id")?,
        }),
        "date_overrides" => Ok(Command::SelectOverrides {
            counselor_id: filters.require_ulid("counselor_id")?,
            from: filters.gte("override_date").map(parse_date).transpose()?,
        }),
        "appointments" => {
            let by = if let Some(c) = filters.eq("counselor_id") {
                AppointmentsBy::Counselor(parse_ulid(c)?)
            } else if let Some(u) = filters.eq("user_id") {
                AppointmentsBy::User(parse_ulid(u)?)
            } else {
                return Err(SqlError::MissingFilter("counselor_id or user_id"));
            };
            Ok(Command::SelectAppointments { by })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
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
    let tables = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
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

fn extract_insert_values(insert: &ast::Insert) -> Result<&[Expr], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [row] => Ok(row),
            [] => Err(SqlError::Parse("empty VALUES".into())),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    match selection {
        Some(Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        }) if expr_column_name(left).as_deref() == Some("id") => parse_ulid(right),
        _ => Err(SqlError::MissingFilter("id")),
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

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

/// The text of a literal. Casts such as `'09:00'::time` read as their operand.
fn literal_text(expr: &Expr) -> Result<&str, SqlError> {
    match expr {
        Expr::Cast { expr, .. } | Expr::Nested(expr) => literal_text(expr),
        _ => match extract_value(expr) {
            Some(v) => literal_text_value(v),
            None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
        },
    }
}

fn literal_text_value(value: &Value) -> Result<&str, SqlError> {
    match value {
        Value::SingleQuotedString(s) | Value::Number(s, _) => Ok(s),
        other => Err(SqlError::Parse(format!("expected string, got {other}"))),
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    literal_text(expr).map(str::to_owned)
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = literal_text(expr)?;
    Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID {s}: {e}")))
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    let s = literal_text(expr)?;
    s.parse().map_err(|e| SqlError::Parse(format!("bad integer {s}: {e}")))
}

/// `YYYY-MM-DD`.
fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = literal_text(expr)?;
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| SqlError::Parse(format!("bad date {s}: {e}")))
}

/// `HH:MM` or `HH:MM:SS`.
fn parse_time(expr: &Expr) -> Result<NaiveTime, SqlError> {
    let s = literal_text(expr)?;
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|e| SqlError::Parse(format!("bad time {s}: {e}")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(other) => Err(SqlError::Parse(format!("expected bool, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("{0}: missing value for {1}")]
    MissingValue(&'static str, &'static str),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    const C: &str = "01HZX3Q4Y7K2M9N5P8R6T1V0WA";
    const ID: &str = "01HZX3Q4Y7K2M9N5P8R6T1V0WB";

    fn ulid(s: &str) -> Ulid {
        Ulid::from_string(s).unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn insert_profile() {
        let cmd = parse_sql(&format!(
            "INSERT INTO profiles (id, user_type, full_name) VALUES ('{C}', 'counselor', 'Dr. Ada')"
        ))
        .unwrap();
        assert_eq!(
            cmd,
            Command::InsertProfile {
                id: ulid(C),
                role: Role::Counselor,
                full_name: Some("Dr. Ada".into()),
            }
        );
    }

    #[test]
    fn insert_profile_bad_role() {
        let err = parse_sql(&format!("INSERT INTO profiles VALUES ('{C}', 'wizard', NULL)")).unwrap_err();
        assert!(matches!(err, SqlError::Parse(_)));
    }

    #[test]
    fn insert_weekly_rule_positional() {
        let cmd = parse_sql(&format!(
            "INSERT INTO weekly_availability VALUES ('{ID}', '{C}', 1, '09:00', '17:00:00')"
        ))
        .unwrap();
        assert_eq!(
            cmd,
            Command::InsertWeeklyRule {
                id: ulid(ID),
                counselor_id: ulid(C),
                day_of_week: 1,
                start: t(9, 0),
                end: t(17, 0),
            }
        );
    }

    #[test]
    fn insert_weekly_rule_reordered_columns() {
        let cmd = parse_sql(&format!(
            "INSERT INTO weekly_availability (counselor_id, id, start_time, end_time, day_of_week) \
             VALUES ('{C}', '{ID}', '13:30', '15:00', 3)"
        ))
        .unwrap();
        assert_eq!(
            cmd,
            Command::InsertWeeklyRule {
                id: ulid(ID),
                counselor_id: ulid(C),
                day_of_week: 3,
                start: t(13, 30),
                end: t(15, 0),
            }
        );
    }

    #[test]
    fn insert_blocked_date() {
        let cmd = parse_sql(&format!(
            "INSERT INTO date_overrides (id, counselor_id, override_date, is_available, reason) \
             VALUES ('{ID}', '{C}', '2026-12-25', false, 'holiday')"
        ))
        .unwrap();
        assert_eq!(
            cmd,
            Command::InsertOverride {
                id: ulid(ID),
                counselor_id: ulid(C),
                date: d("2026-12-25"),
                hours: None,
                reason: Some("holiday".into()),
            }
        );
    }

    #[test]
    fn insert_special_hours() {
        let cmd = parse_sql(&format!(
            "INSERT INTO date_overrides VALUES ('{ID}', '{C}', '2026-12-24', true, '09:00', '12:00', NULL)"
        ))
        .unwrap();
        assert_eq!(
            cmd,
            Command::InsertOverride {
                id: ulid(ID),
                counselor_id: ulid(C),
                date: d("2026-12-24"),
                hours: Some((t(9, 0), t(12, 0))),
                reason: None,
            }
        );
    }

    #[test]
    fn special_hours_need_times() {
        let err = parse_sql(&format!(
            "INSERT INTO date_overrides (id, counselor_id, override_date, is_available) \
             VALUES ('{ID}', '{C}', '2026-12-24', true)"
        ))
        .unwrap_err();
        assert!(matches!(err, SqlError::MissingValue("date_overrides", "start_time")));
    }

    #[test]
    fn insert_appointment() {
        let cmd = parse_sql(&format!(
            "INSERT INTO appointments (id, counselor_id, appointment_date, start_time, notes) \
             VALUES ('{ID}', '{C}', '2026-10-19', '09:00:00', 'first session')"
        ))
        .unwrap();
        assert_eq!(
            cmd,
            Command::InsertAppointment {
                id: ulid(ID),
                counselor_id: ulid(C),
                date: d("2026-10-19"),
                start: t(9, 0),
                notes: Some("first session".into()),
            }
        );
    }

    #[test]
    fn bad_date_rejected() {
        let err = parse_sql(&format!(
            "INSERT INTO appointments VALUES ('{ID}', '{C}', '2026-13-01', '09:00', NULL)"
        ))
        .unwrap_err();
        assert!(matches!(err, SqlError::Parse(_)));
    }

    #[test]
    fn update_rule_active() {
        let cmd = parse_sql(&format!("UPDATE weekly_availability SET is_active = false WHERE id = '{ID}'")).unwrap();
        assert_eq!(cmd, Command::SetWeeklyRuleActive { id: ulid(ID), is_active: false });
    }

    #[test]
    fn update_appointment_status() {
        let cmd = parse_sql(&format!("UPDATE appointments SET status = 'confirmed' WHERE id = '{ID}'")).unwrap();
        assert_eq!(
            cmd,
            Command::SetAppointmentStatus { id: ulid(ID), status: AppointmentStatus::Confirmed }
        );
    }

    #[test]
    fn update_without_id_rejected() {
        let err = parse_sql("UPDATE appointments SET status = 'cancelled'").unwrap_err();
        assert!(matches!(err, SqlError::MissingFilter("id")));
    }

    #[test]
    fn deletes() {
        assert_eq!(
            parse_sql(&format!("DELETE FROM weekly_availability WHERE id = '{ID}'")).unwrap(),
            Command::DeleteWeeklyRule { id: ulid(ID) }
        );
        assert_eq!(
            parse_sql(&format!("DELETE FROM date_overrides WHERE id = '{ID}'")).unwrap(),
            Command::DeleteOverride { id: ulid(ID) }
        );
        assert!(matches!(
            parse_sql(&format!("DELETE FROM appointments WHERE id = '{ID}'")),
            Err(SqlError::UnknownTable(_))
        ));
    }

    #[test]
    fn select_slots() {
        let cmd = parse_sql(&format!(
            "SELECT * FROM available_slots WHERE counselor_id = '{C}' AND date = '2026-10-19'"
        ))
        .unwrap();
        assert_eq!(cmd, Command::SelectSlots { counselor_id: ulid(C), date: d("2026-10-19") });
    }

    #[test]
    fn select_slots_needs_date() {
        let err = parse_sql(&format!("SELECT * FROM available_slots WHERE counselor_id = '{C}'")).unwrap_err();
        assert!(matches!(err, SqlError::MissingFilter("date")));
    }

    #[test]
    fn select_date_status() {
        let cmd = parse_sql(&format!(
            "SELECT * FROM date_status WHERE date = '2026-10-19' AND counselor_id = '{C}'"
        ))
        .unwrap();
        assert_eq!(cmd, Command::SelectDateStatus { counselor_id: ulid(C), date: d("2026-10-19") });
    }

    #[test]
    fn select_overrides_with_floor() {
        let cmd = parse_sql(&format!(
            "SELECT * FROM date_overrides WHERE counselor_id = '{C}' AND override_date >= '2026-11-01'"
        ))
        .unwrap();
        assert_eq!(
            cmd,
            Command::SelectOverrides { counselor_id: ulid(C), from: Some(d("2026-11-01")) }
        );
        let cmd = parse_sql(&format!("SELECT * FROM date_overrides WHERE counselor_id = '{C}'")).unwrap();
        assert_eq!(cmd, Command::SelectOverrides { counselor_id: ulid(C), from: None });
    }

    #[test]
    fn select_appointments() {
        assert_eq!(
            parse_sql(&format!("SELECT * FROM appointments WHERE user_id = '{C}'")).unwrap(),
            Command::SelectAppointments { by: AppointmentsBy::User(ulid(C)) }
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM appointments WHERE counselor_id = '{C}'")).unwrap(),
            Command::SelectAppointments { by: AppointmentsBy::Counselor(ulid(C)) }
        );
        assert!(matches!(
            parse_sql("SELECT * FROM appointments"),
            Err(SqlError::MissingFilter(_))
        ));
    }

    #[test]
    fn select_weekly_rules() {
        let cmd = parse_sql(&format!("SELECT * FROM weekly_availability WHERE counselor_id = '{C}'")).unwrap();
        assert_eq!(cmd, Command::SelectWeeklyRules { counselor_id: ulid(C) });
    }

    #[test]
    fn unknown_table_and_garbage() {
        assert!(matches!(parse_sql("SELECT * FROM nowhere"), Err(SqlError::UnknownTable(_))));
        assert!(matches!(parse_sql("NOT VALID SQL AT ALL"), Err(SqlError::Parse(_))));
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
