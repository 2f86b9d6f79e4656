use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::{process_socket, TlsAcceptor};
use tokio::net::TcpStream;
use tracing::debug;

use crate::auth::{resolve_session, CarebookAuthSource};
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{self, command_label};
use crate::session::Session;
use crate::sql::{self, AppointmentsBy, Command};

pub struct CarebookHandler {
    engine: Arc<Engine>,
    admin_user: String,
    query_parser: Arc<CarebookQueryParser>,
}

impl CarebookHandler {
    pub fn new(engine: Arc<Engine>, admin_user: String) -> Self {
        Self {
            engine,
            admin_user,
            query_parser: Arc::new(CarebookQueryParser),
        }
    }

    /// Profiles can be registered after login, so the session is resolved per
    /// statement rather than cached at startup.
    fn resolve_session<C: ClientInfo>(&self, client: &C) -> PgWireResult<Session> {
        let user = client.metadata().get("user").cloned().unwrap_or_default();
        resolve_session(&self.engine, &self.admin_user, &user).ok_or_else(|| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "28000".into(),
                format!("no session for user {user}"),
            )))
        })
    }

    async fn run(&self, session: &Session, sql: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = command_label(&cmd);
        debug!("{label}: {sql}");

        let started = Instant::now();
        let result = self.execute_command(session, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    async fn execute_command(&self, session: &Session, cmd: Command) -> PgWireResult<Vec<Response>> {
        let engine = &self.engine;
        match cmd {
            Command::InsertProfile { id, role, full_name } => {
                engine
                    .register_profile(session, id, role, full_name)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertWeeklyRule {
                id,
                counselor_id,
                day_of_week,
                start,
                end,
            } => {
                engine
                    .add_weekly_rule(session, id, counselor_id, day_of_week, start, end)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::SetWeeklyRuleActive { id, is_active } => {
                engine
                    .set_weekly_rule_active(session, id, is_active)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteWeeklyRule { id } => {
                engine.remove_weekly_rule(session, id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertOverride {
                id,
                counselor_id,
                date,
                hours,
                reason,
            } => {
                match hours {
                    None => engine.block_date(session, id, counselor_id, date, reason).await,
                    Some((start, end)) => {
                        engine
                            .add_special_hours(session, id, counselor_id, date, start, end, reason)
                            .await
                    }
                }
                .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteOverride { id } => {
                engine.remove_override(session, id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertAppointment {
                id,
                counselor_id,
                date,
                start,
                notes,
            } => {
                engine
                    .book_appointment(session, id, counselor_id, date, start, notes)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::SetAppointmentStatus { id, status } => {
                match status {
                    AppointmentStatus::Confirmed => engine.confirm_appointment(session, id).await,
                    AppointmentStatus::Completed => engine.complete_appointment(session, id).await,
                    AppointmentStatus::Cancelled => engine.cancel_appointment(session, id).await,
                    AppointmentStatus::Pending => engine.transition_appointment(session, id, status).await,
                }
                .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SelectSlots { counselor_id, date } => {
                let slots = engine.available_slots(counselor_id, date).await;
                let schema = Arc::new(slots_schema());
                let counselor = counselor_id.to_string();
                let date = date.to_string();
                let rows: Vec<PgWireResult<_>> = slots
                    .into_iter()
                    .map(|slot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&counselor)?;
                        encoder.encode_field(&date)?;
                        encoder.encode_field(&slot.to_string())?;
                        encoder.encode_field(&slot.end().map(fmt_time))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectDateStatus { counselor_id, date } => {
                let status = engine.date_status(counselor_id, date).await;
                let schema = Arc::new(date_status_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&status.date.to_string())?;
                encoder.encode_field(&status.blocked)?;
                encoder.encode_field(&status.special_hours.map(|w| fmt_time(w.start)))?;
                encoder.encode_field(&status.special_hours.map(|w| fmt_time(w.end)))?;
                encoder.encode_field(&status.selectable)?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectWeeklyRules { counselor_id } => {
                let rules = engine.weekly_rules(counselor_id).await.map_err(engine_err)?;
                let schema = Arc::new(weekly_schema());
                let rows: Vec<PgWireResult<_>> = rules
                    .into_iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.id.to_string())?;
                        encoder.encode_field(&r.counselor_id.to_string())?;
                        encoder.encode_field(&i32::from(r.day_of_week))?;
                        encoder.encode_field(&fmt_time(r.start))?;
                        encoder.encode_field(&fmt_time(r.end))?;
                        encoder.encode_field(&r.is_active)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectOverrides { counselor_id, from } => {
                let overrides = engine
                    .date_overrides(counselor_id, from)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(overrides_schema());
                let rows: Vec<PgWireResult<_>> = overrides
                    .into_iter()
                    .map(|o| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&o.id.to_string())?;
                        encoder.encode_field(&o.counselor_id.to_string())?;
                        encoder.encode_field(&o.date.to_string())?;
                        encoder.encode_field(&o.is_available)?;
                        encoder.encode_field(&o.start.map(fmt_time))?;
                        encoder.encode_field(&o.end.map(fmt_time))?;
                        encoder.encode_field(&o.reason)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectAppointments { by } => {
                let appts = match by {
                    AppointmentsBy::Counselor(id) => engine.counselor_appointments(session, id).await,
                    AppointmentsBy::User(id) => engine.user_appointments(session, id).await,
                }
                .map_err(engine_err)?;
                let schema = Arc::new(appointments_schema());
                let rows: Vec<PgWireResult<_>> = appts
                    .into_iter()
                    .map(|a| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&a.id.to_string())?;
                        encoder.encode_field(&a.user_id.to_string())?;
                        encoder.encode_field(&a.counselor_id.to_string())?;
                        encoder.encode_field(&a.date.to_string())?;
                        encoder.encode_field(&fmt_time(a.start))?;
                        encoder.encode_field(&fmt_time(a.end))?;
                        encoder.encode_field(&a.status.to_string())?;
                        encoder.encode_field(&a.notes)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
        }
    }
}

fn fmt_time(t: chrono::NaiveTime) -> String {
    t.format("%H:%M:%S").to_string()
}

// ── Result schemas ───────────────────────────────────────────────

fn text(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn boolean(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::BOOL, FieldFormat::Text)
}

fn slots_schema() -> Vec<FieldInfo> {
    vec![text("counselor_id"), text("date"), text("start_time"), text("end_time")]
}

fn date_status_schema() -> Vec<FieldInfo> {
    vec![
        text("date"),
        boolean("blocked"),
        text("special_start"),
        text("special_end"),
        boolean("selectable"),
    ]
}

fn weekly_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("counselor_id"),
        FieldInfo::new("day_of_week".into(), None, None, Type::INT4, FieldFormat::Text),
        text("start_time"),
        text("end_time"),
        boolean("is_active"),
    ]
}

fn overrides_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("counselor_id"),
        text("override_date"),
        boolean("is_available"),
        text("start_time"),
        text("end_time"),
        text("reason"),
    ]
}

fn appointments_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("user_id"),
        text("counselor_id"),
        text("appointment_date"),
        text("start_time"),
        text("end_time"),
        text("status"),
        text("notes"),
    ]
}

/// Row shape of a statement before its parameters are bound. Only SELECTs
/// return rows; the table named after FROM picks the shape.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.to_lowercase();
    let mut words = lower.split_whitespace();
    if words.next() != Some("select") {
        return vec![];
    }
    let Some(table) = words.skip_while(|w| *w != "from").nth(1) else {
        return vec![];
    };
    match table.trim_end_matches(';').trim_matches('"') {
        "available_slots" => slots_schema(),
        "date_status" => date_status_schema(),
        "weekly_availability" => weekly_schema(),
        "date_overrides" => overrides_schema(),
        "appointments" => appointments_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for CarebookHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let session = self.resolve_session(client)?;
        self.run(&session, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct CarebookQueryParser;

#[async_trait]
impl QueryParser for CarebookQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for CarebookHandler {
    type Statement = String;
    type QueryParser = CarebookQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let session = self.resolve_session(client)?;
        let sql = substitute_params(portal);
        let mut responses = self.run(&session, &sql).await?;
        Ok(responses.remove(0))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(param_types, result_schema(&target.statement)))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(&target.statement.statement)))
    }
}

/// A statement split around its `$N` placeholders.
enum Piece<'a> {
    Text(&'a str),
    Param(usize),
}

/// Scan left to right for `$N` outside quoted literals and identifiers.
/// A doubled quote inside a literal closes and reopens it, which leaves the
/// scan in the right state.
fn split_placeholders(sql: &str) -> Vec<Piece<'_>> {
    let bytes = sql.as_bytes();
    let mut pieces = Vec::new();
    let mut quote: Option<u8> = None;
    let mut text_start = 0;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                }
                i += 1;
            }
            None if b == b'\'' || b == b'"' => {
                quote = Some(b);
                i += 1;
            }
            None if b == b'$' => {
                let digits = bytes[i + 1..].iter().take_while(|d| d.is_ascii_digit()).count();
                match sql[i + 1..i + 1 + digits].parse::<usize>() {
                    Ok(n) if n > 0 => {
                        pieces.push(Piece::Text(&sql[text_start..i]));
                        pieces.push(Piece::Param(n));
                        i += 1 + digits;
                        text_start = i;
                    }
                    _ => i += 1,
                }
            }
            None => i += 1,
        }
    }
    pieces.push(Piece::Text(&sql[text_start..]));
    pieces
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    split_placeholders(sql)
        .iter()
        .filter_map(|p| match p {
            Piece::Param(n) => Some(*n),
            Piece::Text(_) => None,
        })
        .max()
        .unwrap_or(0)
}

/// Inline bound text parameters as quoted literals. Inlined values are never
/// rescanned; a placeholder with no bound value is left as written.
fn inline_params(sql: &str, params: &[Option<String>]) -> String {
    let mut out = String::with_capacity(sql.len());
    for piece in split_placeholders(sql) {
        match piece {
            Piece::Text(text) => out.push_str(text),
            Piece::Param(n) => match params.get(n - 1) {
                Some(Some(value)) => {
                    out.push('\'');
                    out.push_str(&value.replace('\'', "''"));
                    out.push('\'');
                }
                Some(None) => out.push_str("NULL"),
                None => {
                    out.push('$');
                    out.push_str(&n.to_string());
                }
            },
        }
    }
    out
}

fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    inline_params(&portal.statement.statement, &params)
}

// ── Factory ──────────────────────────────────────────────────────

#[derive(Clone)]
pub struct CarebookFactory {
    handler: Arc<CarebookHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<CarebookAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl CarebookFactory {
    pub fn new(engine: Arc<Engine>, password: String, admin_user: String) -> Self {
        let auth_source = CarebookAuthSource::new(engine.clone(), password, admin_user.clone());
        Self {
            handler: Arc::new(CarebookHandler::new(engine, admin_user)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for CarebookFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    factory: CarebookFactory,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    process_socket(socket, tls, factory).await
}

// ── Error mapping ────────────────────────────────────────────────

/// SQLSTATE for an engine failure.
pub fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Conflict(_) => "23505",
        EngineError::Unauthorized(_) => "42501",
        EngineError::NotFound(_) => "02000",
        EngineError::TransportFailure(_) => "58030",
        EngineError::InvalidInput(_) => "22023",
        EngineError::SlotUnavailable { .. }
        | EngineError::InvalidTransition { .. }
        | EngineError::LimitExceeded(_) => "P0001",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
