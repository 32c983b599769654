use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use skeincore::{
    Edge, Execution, ExecutionStatus, LogLevel, LogLine, Node, NodeState, NodeStatus,
    StorageError, Value, Workflow, MAX_LOG_WINDOW,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

type Result<T> = std::result::Result<T, StorageError>;

/// Partial update for a workflow. Nodes and edges replace atomically.
#[derive(Debug, Clone, Default)]
pub struct WorkflowPatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub nodes: Option<Vec<Node>>,
    pub edges: Option<Vec<Edge>>,
    pub variables: Option<Option<BTreeMap<String, Value>>>,
    pub metadata: Option<Option<BTreeMap<String, Value>>>,
}

/// Partial update for an execution's top-level fields.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPatch {
    pub status: Option<ExecutionStatus>,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A reusable workflow blueprint.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub category: String,
    pub workflow: Workflow,
    pub created_at: DateTime<Utc>,
}

/// SQLite-backed store.
///
/// The connection is wrapped in a `Mutex` and every operation runs on the
/// blocking pool; holding the lock across a read-modify-write makes
/// same-execution updates atomic, and WAL mode keeps commits durable
/// before the call returns.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path).map_err(StorageError::backend)?;
        Self::setup(conn)
    }

    /// In-memory store for tests and ephemeral runs.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(StorageError::backend)?;
        Self::setup(conn)
    }

    fn setup(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(StorageError::backend)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )
        .map_err(StorageError::backend)?;

        let current: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current < 1 {
            Self::migrate_v1(conn)?;
        }
        Ok(())
    }

    fn migrate_v1(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                nodes TEXT NOT NULL,
                edges TEXT NOT NULL,
                variables TEXT,
                metadata TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                status TEXT NOT NULL,
                input TEXT NOT NULL,
                output TEXT,
                error TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                node_states TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_executions_workflow_id
            ON executions(workflow_id, started_at DESC);

            CREATE TABLE IF NOT EXISTS templates (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                category TEXT NOT NULL,
                workflow TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_templates_category
            ON templates(category);

            CREATE TABLE IF NOT EXISTS logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                execution_id TEXT NOT NULL,
                node_id TEXT,
                level TEXT NOT NULL,
                message TEXT NOT NULL,
                data TEXT,
                timestamp TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_logs_execution_id
            ON logs(execution_id, id);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )
        .map_err(StorageError::backend)
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| StorageError::Backend(format!("connection lock poisoned: {e}")))?;
            f(&conn)
        })
        .await
        .map_err(|e| StorageError::Backend(format!("task join error: {e}")))?
    }

    // ------------------------------------------------------------------
    // Workflows
    // ------------------------------------------------------------------

    pub async fn create_workflow(&self, workflow: &Workflow) -> Result<()> {
        let w = workflow.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO workflows
                 (id, name, description, nodes, edges, variables, metadata, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    w.id,
                    w.name,
                    w.description,
                    encode(&w.nodes)?,
                    encode(&w.edges)?,
                    encode_opt(&w.variables)?,
                    encode_opt(&w.metadata)?,
                    w.created_at.to_rfc3339(),
                    w.updated_at.to_rfc3339(),
                ],
            )
            .map_err(StorageError::backend)?;
            Ok(())
        })
        .await
    }

    /// Overwrite the patched fields atomically and advance `updated_at`.
    pub async fn update_workflow(&self, id: &str, patch: WorkflowPatch) -> Result<Workflow> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let mut workflow = load_workflow(conn, &id)?.ok_or(StorageError::NotFound {
                entity: "workflow",
                id: id.clone(),
            })?;

            if let Some(name) = patch.name {
                workflow.name = name;
            }
            if let Some(description) = patch.description {
                workflow.description = description;
            }
            if let Some(nodes) = patch.nodes {
                workflow.nodes = nodes;
            }
            if let Some(edges) = patch.edges {
                workflow.edges = edges;
            }
            if let Some(variables) = patch.variables {
                workflow.variables = variables;
            }
            if let Some(metadata) = patch.metadata {
                workflow.metadata = metadata;
            }
            workflow.updated_at = Utc::now();

            conn.execute(
                "UPDATE workflows SET
                 name = ?2, description = ?3, nodes = ?4, edges = ?5,
                 variables = ?6, metadata = ?7, updated_at = ?8
                 WHERE id = ?1",
                params![
                    workflow.id,
                    workflow.name,
                    workflow.description,
                    encode(&workflow.nodes)?,
                    encode(&workflow.edges)?,
                    encode_opt(&workflow.variables)?,
                    encode_opt(&workflow.metadata)?,
                    workflow.updated_at.to_rfc3339(),
                ],
            )
            .map_err(StorageError::backend)?;
            Ok(workflow)
        })
        .await
    }

    pub async fn delete_workflow(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let n = conn
                .execute("DELETE FROM workflows WHERE id = ?1", params![id])
                .map_err(StorageError::backend)?;
            Ok(n > 0)
        })
        .await
    }

    pub async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>> {
        let id = id.to_string();
        self.with_conn(move |conn| load_workflow(conn, &id)).await
    }

    /// All workflows, most recently modified first.
    pub async fn list_workflows(&self) -> Result<Vec<Workflow>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, name, description, nodes, edges, variables, metadata,
                            created_at, updated_at
                     FROM workflows ORDER BY updated_at DESC",
                )
                .map_err(StorageError::backend)?;
            let rows = stmt
                .query_map([], row_to_workflow)
                .map_err(StorageError::backend)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| corrupt("workflow", "?", e))
        })
        .await
    }

    // ------------------------------------------------------------------
    // Executions
    // ------------------------------------------------------------------

    pub async fn create_execution(&self, execution: &Execution) -> Result<()> {
        let e = execution.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO executions
                 (id, workflow_id, status, input, output, error, started_at, completed_at, node_states)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    e.id,
                    e.workflow_id,
                    e.status.as_str(),
                    encode(&e.input)?,
                    e.output.as_ref().map(encode).transpose()?,
                    e.error,
                    e.started_at.to_rfc3339(),
                    e.completed_at.map(|t| t.to_rfc3339()),
                    encode(&e.node_states)?,
                ],
            )
            .map_err(StorageError::backend)?;
            Ok(())
        })
        .await
    }

    pub async fn update_execution(&self, id: &str, patch: ExecutionPatch) -> Result<()> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let mut execution =
                load_execution(conn, &id)?.ok_or(StorageError::NotFound {
                    entity: "execution",
                    id: id.clone(),
                })?;

            // A terminal status is reached exactly once; late writers
            // racing a stop lose.
            if execution.status.is_terminal() && patch.status.is_some() {
                return Ok(());
            }

            if let Some(status) = patch.status {
                execution.status = status;
            }
            if let Some(output) = patch.output {
                execution.output = Some(output);
            }
            if let Some(error) = patch.error {
                execution.error = Some(error);
            }
            if let Some(completed_at) = patch.completed_at {
                execution.completed_at = Some(completed_at);
            }

            conn.execute(
                "UPDATE executions SET status = ?2, output = ?3, error = ?4, completed_at = ?5
                 WHERE id = ?1",
                params![
                    execution.id,
                    execution.status.as_str(),
                    execution.output.as_ref().map(encode).transpose()?,
                    execution.error,
                    execution.completed_at.map(|t| t.to_rfc3339()),
                ],
            )
            .map_err(StorageError::backend)?;
            Ok(())
        })
        .await
    }

    pub async fn get_execution(&self, id: &str) -> Result<Option<Execution>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let Some(mut execution) = load_execution(conn, &id)? else {
                return Ok(None);
            };
            execution.logs = load_logs(conn, &id, MAX_LOG_WINDOW)?;
            Ok(Some(execution))
        })
        .await
    }

    /// Executions, optionally filtered by workflow, most recent first.
    pub async fn list_executions(&self, workflow_id: Option<&str>) -> Result<Vec<Execution>> {
        let workflow_id = workflow_id.map(str::to_string);
        self.with_conn(move |conn| {
            let sql_all = "SELECT id, workflow_id, status, input, output, error,
                                  started_at, completed_at, node_states
                           FROM executions ORDER BY started_at DESC";
            let sql_one = "SELECT id, workflow_id, status, input, output, error,
                                  started_at, completed_at, node_states
                           FROM executions WHERE workflow_id = ?1
                           ORDER BY started_at DESC";
            let mut stmt = conn
                .prepare(if workflow_id.is_some() { sql_one } else { sql_all })
                .map_err(StorageError::backend)?;
            let rows = match &workflow_id {
                Some(wid) => stmt.query_map(params![wid], row_to_execution),
                None => stmt.query_map([], row_to_execution),
            }
            .map_err(StorageError::backend)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| corrupt("execution", "?", e))
        })
        .await
    }

    /// Read-modify-write one node's state inside the execution's state map.
    ///
    /// Runs under the connection lock, so concurrent updates to the same
    /// execution serialize. Transitions violating monotonicity are dropped
    /// (event delivery is at-least-once; replays must be harmless).
    pub async fn update_execution_node_state(
        &self,
        execution_id: &str,
        node_id: &str,
        status: NodeStatus,
        output: Option<Value>,
        error: Option<String>,
    ) -> Result<()> {
        let execution_id = execution_id.to_string();
        let node_id = node_id.to_string();
        self.with_conn(move |conn| {
            let execution =
                load_execution(conn, &execution_id)?.ok_or(StorageError::NotFound {
                    entity: "execution",
                    id: execution_id.clone(),
                })?;

            let mut states = execution.node_states;
            let state = states
                .entry(node_id.clone())
                .or_insert_with(|| NodeState::new(NodeStatus::Pending));

            if state.status != status && !state.status.can_transition_to(status) {
                tracing::debug!(
                    execution_id = %execution_id,
                    node_id = %node_id,
                    from = %state.status,
                    to = %status,
                    "dropping non-monotonic node state transition"
                );
                return Ok(());
            }

            let now = Utc::now();
            state.status = status;
            match status {
                NodeStatus::Running => {
                    state.started_at.get_or_insert(now);
                }
                NodeStatus::Completed => {
                    state.completed_at.get_or_insert(now);
                    // Output is recorded exactly once, at completion.
                    if state.output.is_none() {
                        state.output = output;
                    }
                }
                NodeStatus::Error => {
                    state.completed_at.get_or_insert(now);
                    state.error = error;
                }
                NodeStatus::Pending | NodeStatus::Skipped => {}
            }

            conn.execute(
                "UPDATE executions SET node_states = ?2 WHERE id = ?1",
                params![execution_id, encode(&states)?],
            )
            .map_err(StorageError::backend)?;
            Ok(())
        })
        .await
    }

    pub async fn append_log(
        &self,
        execution_id: &str,
        node_id: Option<&str>,
        level: LogLevel,
        message: &str,
        data: Option<Value>,
    ) -> Result<()> {
        let execution_id = execution_id.to_string();
        let node_id = node_id.map(str::to_string);
        let message = message.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO logs (execution_id, node_id, level, message, data, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    execution_id,
                    node_id,
                    level.as_str(),
                    message,
                    data.as_ref().map(encode).transpose()?,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(StorageError::backend)?;
            Ok(())
        })
        .await
    }

    // ------------------------------------------------------------------
    // Templates
    // ------------------------------------------------------------------

    pub async fn save_template(&self, template: &Template) -> Result<()> {
        let t = template.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO templates
                 (id, name, description, category, workflow, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    t.id,
                    t.name,
                    t.description,
                    t.category,
                    encode(&t.workflow)?,
                    t.created_at.to_rfc3339(),
                ],
            )
            .map_err(StorageError::backend)?;
            Ok(())
        })
        .await
    }

    pub async fn get_template(&self, id: &str) -> Result<Option<Template>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, name, description, category, workflow, created_at
                 FROM templates WHERE id = ?1",
                params![id],
                row_to_template,
            )
            .optional()
            .map_err(|e| corrupt("template", &id, e))
        })
        .await
    }

    pub async fn list_templates(&self, category: Option<&str>) -> Result<Vec<Template>> {
        let category = category.map(str::to_string);
        self.with_conn(move |conn| {
            let sql_all = "SELECT id, name, description, category, workflow, created_at
                           FROM templates ORDER BY name";
            let sql_one = "SELECT id, name, description, category, workflow, created_at
                           FROM templates WHERE category = ?1 ORDER BY name";
            let mut stmt = conn
                .prepare(if category.is_some() { sql_one } else { sql_all })
                .map_err(StorageError::backend)?;
            let rows = match &category {
                Some(c) => stmt.query_map(params![c], row_to_template),
                None => stmt.query_map([], row_to_template),
            }
            .map_err(StorageError::backend)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| corrupt("template", "?", e))
        })
        .await
    }

    pub async fn delete_template(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let n = conn
                .execute("DELETE FROM templates WHERE id = ?1", params![id])
                .map_err(StorageError::backend)?;
            Ok(n > 0)
        })
        .await
    }

    /// Executions left `running`/`pending` by a previous process become
    /// terminal errors; the runtime does not resume mid-execution.
    pub async fn fail_interrupted_executions(&self, reason: &str) -> Result<usize> {
        let reason = reason.to_string();
        self.with_conn(move |conn| {
            let n = conn
                .execute(
                    "UPDATE executions SET status = 'error', error = ?1, completed_at = ?2
                     WHERE status IN ('running', 'pending')",
                    params![reason, Utc::now().to_rfc3339()],
                )
                .map_err(StorageError::backend)?;
            Ok(n)
        })
        .await
    }
}

// ----------------------------------------------------------------------
// Row mapping
// ----------------------------------------------------------------------

fn encode<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| StorageError::Backend(format!("encode: {e}")))
}

fn encode_opt<T: serde::Serialize>(value: &Option<T>) -> Result<Option<String>> {
    value.as_ref().map(encode).transpose()
}

fn corrupt(entity: &'static str, id: &str, err: impl std::fmt::Display) -> StorageError {
    StorageError::CorruptRecord {
        entity,
        id: id.to_string(),
        reason: err.to_string(),
    }
}

fn decode_field<T: serde::de::DeserializeOwned>(
    text: &str,
    idx: usize,
) -> rusqlite::Result<T> {
    serde_json::from_str(text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::new(e),
        )
    })
}

fn parse_time(text: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

fn row_to_workflow(row: &Row<'_>) -> rusqlite::Result<Workflow> {
    let nodes: String = row.get(3)?;
    let edges: String = row.get(4)?;
    let variables: Option<String> = row.get(5)?;
    let metadata: Option<String> = row.get(6)?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;

    Ok(Workflow {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        nodes: decode_field(&nodes, 3)?,
        edges: decode_field(&edges, 4)?,
        variables: variables.as_deref().map(|s| decode_field(s, 5)).transpose()?,
        metadata: metadata.as_deref().map(|s| decode_field(s, 6)).transpose()?,
        created_at: parse_time(&created_at, 7)?,
        updated_at: parse_time(&updated_at, 8)?,
    })
}

fn row_to_execution(row: &Row<'_>) -> rusqlite::Result<Execution> {
    let status: String = row.get(2)?;
    let input: String = row.get(3)?;
    let output: Option<String> = row.get(4)?;
    let started_at: String = row.get(6)?;
    let completed_at: Option<String> = row.get(7)?;
    let node_states: String = row.get(8)?;

    Ok(Execution {
        id: row.get(0)?,
        workflow_id: row.get(1)?,
        status: decode_field(&format!("\"{}\"", status), 2)?,
        input: decode_field(&input, 3)?,
        output: output.as_deref().map(|s| decode_field(s, 4)).transpose()?,
        error: row.get(5)?,
        started_at: parse_time(&started_at, 6)?,
        completed_at: completed_at
            .as_deref()
            .map(|s| parse_time(s, 7))
            .transpose()?,
        node_states: decode_field(&node_states, 8)?,
        logs: Vec::new(),
    })
}

fn row_to_template(row: &Row<'_>) -> rusqlite::Result<Template> {
    let workflow: String = row.get(4)?;
    let created_at: String = row.get(5)?;
    Ok(Template {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        category: row.get(3)?,
        workflow: decode_field(&workflow, 4)?,
        created_at: parse_time(&created_at, 5)?,
    })
}

fn load_workflow(conn: &Connection, id: &str) -> Result<Option<Workflow>> {
    conn.query_row(
        "SELECT id, name, description, nodes, edges, variables, metadata, created_at, updated_at
         FROM workflows WHERE id = ?1",
        params![id],
        row_to_workflow,
    )
    .optional()
    .map_err(|e| corrupt("workflow", id, e))
}

fn load_execution(conn: &Connection, id: &str) -> Result<Option<Execution>> {
    conn.query_row(
        "SELECT id, workflow_id, status, input, output, error, started_at, completed_at, node_states
         FROM executions WHERE id = ?1",
        params![id],
        row_to_execution,
    )
    .optional()
    .map_err(|e| corrupt("execution", id, e))
}

fn load_logs(conn: &Connection, execution_id: &str, limit: usize) -> Result<Vec<LogLine>> {
    let mut stmt = conn
        .prepare(
            "SELECT node_id, level, message, data, timestamp
             FROM (SELECT id, node_id, level, message, data, timestamp
                   FROM logs WHERE execution_id = ?1
                   ORDER BY id DESC LIMIT ?2)
             ORDER BY id ASC",
        )
        .map_err(StorageError::backend)?;
    let rows = stmt
        .query_map(params![execution_id, limit as i64], |row| {
            let level: String = row.get(1)?;
            let data: Option<String> = row.get(3)?;
            let timestamp: String = row.get(4)?;
            Ok(LogLine {
                node_id: row.get(0)?,
                level: decode_field(&format!("\"{}\"", level), 1)?,
                message: row.get(2)?,
                data: data.as_deref().map(|s| decode_field(s, 3)).transpose()?,
                timestamp: parse_time(&timestamp, 4)?,
            })
        })
        .map_err(StorageError::backend)?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| corrupt("log", execution_id, e))
}
