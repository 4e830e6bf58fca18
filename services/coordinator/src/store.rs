//! SQLite driver behind the `kiln::store::Store` contract. The schema is
//! the legacy two-table layout: no primary keys, logical keys `(id, frame)`
//! for projects and `(name, ip)` for compute nodes.

use hearth::logging::{self, debug, o};
use kiln::node::NodeRow;
use kiln::store::{Effect, Store, StoreError};
use kiln::task::TaskRow;
use rusqlite::{params, Connection};
use std::path::Path;

const CREATE_TABLES: &str = "
CREATE TABLE compute_nodes (
    name TEXT,
    ip TEXT,
    api_key TEXT,
    state TEXT
);
CREATE TABLE projects (
    project TEXT,
    id TEXT,
    input TEXT,
    output TEXT,
    frame INTEGER,
    state TEXT,
    rendererName TEXT,
    rendererVersion TEXT,
    startTime TEXT
);
";

pub struct SqliteStore {
    conn: Connection,
    log: logging::Logger,
}

impl SqliteStore {
    /// Opens the store file, creating it with the legacy schema when it
    /// does not exist yet. A schema-creation failure is fatal to start-up.
    pub fn open(path: &Path, log: &logging::Logger) -> Result<SqliteStore, StoreError> {
        let fresh = !path.exists();
        let conn = Connection::open(path).map_err(driver)?;

        if fresh {
            conn.execute_batch(CREATE_TABLES).map_err(driver)?;
        }

        let store = SqliteStore {
            conn,
            log: log.new(o!("component" => "sqlite-store")),
        };

        debug!(store.log, "store opened"; "path" => %path.display(), "fresh" => fresh);

        Ok(store)
    }
}

impl Store for SqliteStore {
    fn apply(&mut self, effect: &Effect) -> Result<(), StoreError> {
        let tx = self.conn.transaction().map_err(driver)?;

        match effect {
            Effect::TaskState { id, frame, state } => {
                tx.execute(
                    "UPDATE projects SET state = ?1 WHERE id = ?2 AND frame = ?3",
                    params![state.as_str(), id, frame],
                )
                .map_err(driver)?;
            }
            Effect::InsertTasks { rows } => {
                let mut stmt = tx
                    .prepare(
                        "INSERT INTO projects (project, id, input, output, frame, state, \
                         rendererName, rendererVersion, startTime) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    )
                    .map_err(driver)?;

                for row in rows {
                    stmt.execute(params![
                        row.project,
                        row.id,
                        row.input,
                        row.output,
                        row.frame,
                        row.state,
                        row.renderer_name,
                        row.renderer_version,
                        row.start_time,
                    ])
                    .map_err(driver)?;
                }

                drop(stmt);
            }
            Effect::NodeState { name, ip, state } => {
                tx.execute(
                    "UPDATE compute_nodes SET state = ?1 WHERE name = ?2 AND ip = ?3",
                    params![state.as_str(), name, ip],
                )
                .map_err(driver)?;
            }
            Effect::InsertNode { row } => {
                tx.execute(
                    "INSERT INTO compute_nodes (name, ip, api_key, state) \
                     VALUES (?1, ?2, ?3, ?4)",
                    params![row.name, row.ip, row.api_key, row.state],
                )
                .map_err(driver)?;
            }
        }

        tx.commit().map_err(driver)
    }

    fn load_tasks(&mut self) -> Result<Vec<TaskRow>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT project, id, input, output, frame, state, \
                 rendererName, rendererVersion, startTime FROM projects",
            )
            .map_err(driver)?;

        let rows = stmt
            .query_map([], |row| {
                Ok(TaskRow {
                    project: row.get(0)?,
                    id: row.get(1)?,
                    input: row.get(2)?,
                    output: row.get(3)?,
                    frame: row.get::<_, i64>(4)? as u32,
                    state: row.get(5)?,
                    renderer_name: row.get(6)?,
                    renderer_version: row.get(7)?,
                    start_time: row.get(8)?,
                })
            })
            .map_err(driver)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(driver)?;

        Ok(rows)
    }

    fn load_nodes(&mut self) -> Result<Vec<NodeRow>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, ip, api_key, state FROM compute_nodes")
            .map_err(driver)?;

        let rows = stmt
            .query_map([], |row| {
                Ok(NodeRow {
                    name: row.get(0)?,
                    ip: row.get(1)?,
                    api_key: row.get(2)?,
                    state: row.get(3)?,
                })
            })
            .map_err(driver)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(driver)?;

        Ok(rows)
    }
}

fn driver(err: rusqlite::Error) -> StoreError {
    StoreError::Driver(err.to_string())
}
