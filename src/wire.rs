use std::fmt::Debug;
use std::sync::Arc;

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
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::StaydAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::sql::{self, Command, SqlError};
use crate::tenant::TenantManager;

pub struct StaydHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<StaydQueryParser>,
}

impl StaydHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(StaydQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    /// The startup `user` parameter is the acting identity for the whole
    /// session. Every write is authorized against this ulid.
    fn resolve_session<C: ClientInfo>(&self, client: &C) -> PgWireResult<Ulid> {
        let user = client
            .metadata()
            .get("user")
            .cloned()
            .unwrap_or_default();
        Ulid::from_string(&user).map_err(|_| {
            metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "28000".into(),
                format!("session user must be a ulid, got {user:?}"),
            )))
        })
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        session: Ulid,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        let label = crate::observability::command_label(&cmd);
        let started = std::time::Instant::now();
        let result = self.dispatch(engine, session, cmd).await;
        metrics::histogram!(crate::observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(crate::observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    async fn dispatch(
        &self,
        engine: &Engine,
        session: Ulid,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::RegisterUser {
                id,
                email,
                display_name,
                role,
            } => {
                engine
                    .register_user(id, email, display_name, role, session)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::ListProperty { id, listing } => {
                let actor = engine.actor(&session).map_err(engine_err)?;
                engine
                    .list_property(id, actor, listing)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateProperty { id, patch } => {
                let actor = engine.actor(&session).map_err(engine_err)?;
                engine
                    .update_property(id, actor, patch)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DelistProperty { id } => {
                let actor = engine.actor(&session).map_err(engine_err)?;
                engine.delist_property(id, actor).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::RequestBooking {
                id,
                property_id,
                check_in,
                check_out,
                guests,
            } => {
                let actor = engine.actor(&session).map_err(engine_err)?;
                // Built as a literal: an inverted pair must reach
                // validate_stay, not trip the assert in StayRange::new.
                let stay = StayRange {
                    start: check_in,
                    end: check_out,
                };
                engine
                    .request_booking(id, property_id, actor, stay, guests)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::SetBookingStatus { id, action } => {
                let actor = engine.actor(&session).map_err(engine_err)?;
                engine
                    .set_booking_status(id, action, actor)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::AddFavorite { property_id } => {
                let actor = engine.actor(&session).map_err(engine_err)?;
                engine
                    .add_favorite(actor, property_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::RemoveFavorite { property_id } => {
                let actor = engine.actor(&session).map_err(engine_err)?;
                engine
                    .remove_favorite(actor, property_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::Search {
                tokens,
                check_in,
                check_out,
                min_guests,
            } => {
                let stay = match (check_in, check_out) {
                    (Some(start), Some(end)) => Some(StayRange { start, end }),
                    _ => None,
                };
                let props = engine
                    .search_available(&tokens, stay, min_guests)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![properties_response(props)])
            }
            Command::SelectUser { id } => {
                let user = engine.get_user(&id).map_err(engine_err)?;
                Ok(vec![users_response(vec![user])])
            }
            Command::SelectProperties { id, owner_id } => {
                let props = match id {
                    Some(id) => vec![engine.get_property_info(id).await.map_err(engine_err)?],
                    None => engine.list_properties(owner_id).await,
                };
                Ok(vec![properties_response(props)])
            }
            Command::SelectBookings { id, property_id } => {
                let actor = engine.actor(&session).map_err(engine_err)?;
                let bookings = if let Some(id) = id {
                    vec![engine.get_booking(id, actor).await.map_err(engine_err)?]
                } else if let Some(property_id) = property_id {
                    engine
                        .list_property_bookings(property_id, actor)
                        .await
                        .map_err(engine_err)?
                } else {
                    // Unfiltered listing is role-shaped: travelers get their
                    // trips, owners the bookings across their properties.
                    match actor.role {
                        Role::Traveler => engine.list_trips(actor.id).await,
                        Role::Owner => engine.list_owner_bookings(actor.id).await,
                    }
                };
                Ok(vec![bookings_response(bookings)])
            }
            Command::SelectFavorites => {
                let actor = engine.actor(&session).map_err(engine_err)?;
                let props = engine.list_favorites(actor.id).await;
                Ok(vec![properties_response(props)])
            }
            Command::SelectAvailability {
                property_id,
                from,
                to,
            } => {
                let window = StayRange { start: from, end: to };
                let ranges = engine
                    .calendar(property_id, window)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![availability_response(property_id, ranges)])
            }
        }
    }
}

// ── Result sets ──────────────────────────────────────────────────

fn properties_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("owner_id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("title".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("city".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("state".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("country".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("max_guests".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new(
            "nightly_price".into(),
            None,
            None,
            Type::INT8,
            FieldFormat::Text,
        ),
        FieldInfo::new("amenities".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new(
            "available_from".into(),
            None,
            None,
            Type::VARCHAR,
            FieldFormat::Text,
        ),
        FieldInfo::new(
            "available_to".into(),
            None,
            None,
            Type::VARCHAR,
            FieldFormat::Text,
        ),
        FieldInfo::new("created_at".into(), None, None, Type::INT8, FieldFormat::Text),
    ]
}

fn properties_response(props: Vec<PropertyInfo>) -> Response {
    let schema = Arc::new(properties_schema());
    let rows: Vec<PgWireResult<_>> = props
        .into_iter()
        .map(|p| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&p.id.to_string())?;
            encoder.encode_field(&p.owner_id.to_string())?;
            encoder.encode_field(&p.title)?;
            encoder.encode_field(&p.city)?;
            encoder.encode_field(&p.state)?;
            encoder.encode_field(&p.country)?;
            encoder.encode_field(&(p.max_guests as i64))?;
            encoder.encode_field(&p.nightly_price)?;
            encoder.encode_field(&p.amenities.join(","))?;
            encoder.encode_field(&p.available_from.map(|d| d.to_string()))?;
            encoder.encode_field(&p.available_to.map(|d| d.to_string()))?;
            encoder.encode_field(&p.created_at)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new(
            "property_id".into(),
            None,
            None,
            Type::VARCHAR,
            FieldFormat::Text,
        ),
        FieldInfo::new(
            "traveler_id".into(),
            None,
            None,
            Type::VARCHAR,
            FieldFormat::Text,
        ),
        FieldInfo::new("check_in".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("check_out".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("guests".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("status".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("created_at".into(), None, None, Type::INT8, FieldFormat::Text),
    ]
}

fn bookings_response(bookings: Vec<BookingInfo>) -> Response {
    let schema = Arc::new(bookings_schema());
    let rows: Vec<PgWireResult<_>> = bookings
        .into_iter()
        .map(|b| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&b.id.to_string())?;
            encoder.encode_field(&b.property_id.to_string())?;
            encoder.encode_field(&b.traveler_id.to_string())?;
            encoder.encode_field(&b.check_in.to_string())?;
            encoder.encode_field(&b.check_out.to_string())?;
            encoder.encode_field(&(b.guests as i64))?;
            encoder.encode_field(&b.status.as_str())?;
            encoder.encode_field(&b.created_at)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn users_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("email".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new(
            "display_name".into(),
            None,
            None,
            Type::VARCHAR,
            FieldFormat::Text,
        ),
        FieldInfo::new("role".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("created_at".into(), None, None, Type::INT8, FieldFormat::Text),
    ]
}

fn users_response(users: Vec<UserInfo>) -> Response {
    let schema = Arc::new(users_schema());
    let rows: Vec<PgWireResult<_>> = users
        .into_iter()
        .map(|u| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&u.id.to_string())?;
            encoder.encode_field(&u.email)?;
            encoder.encode_field(&u.display_name)?;
            encoder.encode_field(&u.role.as_str())?;
            encoder.encode_field(&u.created_at)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new(
            "property_id".into(),
            None,
            None,
            Type::VARCHAR,
            FieldFormat::Text,
        ),
        FieldInfo::new("free_from".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("free_to".into(), None, None, Type::VARCHAR, FieldFormat::Text),
    ]
}

fn availability_response(property_id: Ulid, ranges: Vec<StayRange>) -> Response {
    let schema = Arc::new(availability_schema());
    let pid = property_id.to_string();
    let rows: Vec<PgWireResult<_>> = ranges
        .into_iter()
        .map(|r| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&pid)?;
            encoder.encode_field(&r.start.to_string())?;
            encoder.encode_field(&r.end.to_string())?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

/// Result schema for describe messages, keyed off the SQL text. The real
/// parser runs at execute time; describe only needs the row shape.
fn schema_for_sql(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if !upper.contains("SELECT") {
        return vec![];
    }
    if upper.contains("AVAILABILITY") {
        availability_schema()
    } else if upper.contains("BOOKINGS") {
        bookings_schema()
    } else if upper.contains("USERS") {
        users_schema()
    } else if upper.contains("PROPERTIES") || upper.contains("FAVORITES") {
        properties_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for StaydHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let session = self.resolve_session(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.execute_command(&engine, session, cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct StaydQueryParser;

#[async_trait]
impl QueryParser for StaydQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
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
        Ok(schema_for_sql(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for StaydHandler {
    type Statement = String;
    type QueryParser = StaydQueryParser;

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
        let engine = self.resolve_engine(client)?;
        let session = self.resolve_session(client)?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.execute_command(&engine, session, cmd).await?;
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
        Ok(DescribeStatementResponse::new(
            param_types,
            schema_for_sql(&target.statement),
        ))
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
        Ok(DescribePortalResponse::new(schema_for_sql(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start {
                if let Ok(n) = sql[start..i].parse::<usize>() {
                    if n > max {
                        max = n;
                    }
                }
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let sql = portal.statement.statement.to_string();
    let params = &portal.parameters;
    let mut result = sql;

    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct StaydFactory {
    handler: Arc<StaydHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<StaydAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl StaydFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = StaydAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(StaydHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for StaydFactory {
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

/// Serve one client connection over the pgwire protocol.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = StaydFactory::new(tenant_manager, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: EngineError) -> PgWireError {
    let code = match &e {
        EngineError::NotFound(_) => "P0002",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::Conflict(_) => "23P01",
        EngineError::CapacityExceeded { .. } => "23514",
        EngineError::Forbidden(_) => "42501",
        EngineError::InvalidState { .. } => "55000",
        EngineError::InvalidStay(_) | EngineError::InvalidArgument(_) => "22023",
        EngineError::HasBookings(_) => "55006",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    let code = match &e {
        SqlError::InvalidDate(_) => "22007",
        SqlError::HalfOpenRange => "22023",
        _ => "42601",
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        e.to_string(),
    )))
}
