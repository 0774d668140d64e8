use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
pub(crate) enum Scenario {
    /// `waitfor delay` queries through a pool; one is cancelled and one paused.
    Busy,
    /// Large selects, streamed or aggregated, optionally prepared.
    Payload,
    /// Repeated stored procedure calls.
    Procedure,
    /// `RAISERROR` at a chosen severity.
    Severity,
    /// Snapshot-isolation insert/select loop on several connections.
    Txn,
    /// Twice `ceiling` concurrent `@@SPID` queries.
    Pool,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Drive mssql-middleware scenarios against a server")]
pub(crate) struct Args {
    #[arg(value_enum)]
    pub(crate) scenario: Scenario,
    /// Connection string; falls back to MSSQL_MIDDLEWARE_CONNECTION_STRING.
    #[arg(long)]
    pub(crate) connection_string: Option<String>,
    /// Look the server up as a LocalDB instance instead.
    #[arg(long)]
    pub(crate) localdb: Option<String>,
    #[arg(long, default_value = "master")]
    pub(crate) database: String,
    /// Replay canned results instead of connecting.
    #[arg(long)]
    pub(crate) scripted: bool,
    #[arg(long, value_parser = humantime::parse_duration, default_value = "2s")]
    pub(crate) delay: Duration,
    #[arg(long, default_value_t = 5)]
    pub(crate) repeats: usize,
    #[arg(long, default_value = "syscolumns")]
    pub(crate) table: String,
    /// Comma-separated column list; every column when omitted.
    #[arg(long)]
    pub(crate) columns: Option<String>,
    #[arg(long, default_value = "sys")]
    pub(crate) schema: String,
    #[arg(long, default_value_t = 1000)]
    pub(crate) top: usize,
    #[arg(long)]
    pub(crate) stream: bool,
    /// Procedure called by the procedure scenario; its first parameter gets `--value`.
    #[arg(long, default_value = "dbo.test_sp")]
    pub(crate) procedure: String,
    #[arg(long, default_value_t = 10)]
    pub(crate) value: i64,
    #[arg(long)]
    pub(crate) prepared: bool,
    #[arg(long, default_value_t = 9)]
    pub(crate) severity: u8,
    #[arg(long, default_value_t = 10)]
    pub(crate) iterations: usize,
    #[arg(long, default_value_t = 4)]
    pub(crate) ceiling: usize,
    #[arg(long)]
    pub(crate) seed: Option<u64>,
    #[arg(long)]
    pub(crate) log: Option<PathBuf>,
}

/// Where the probe gets its sessions from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) enum Target {
    ConnectionString(String),
    LocalDb { instance: String, database: String },
    Scripted,
}

/// Every knob a scenario reads, resolved from the command line.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ProbeConfig {
    pub(crate) scenario: Scenario,
    #[serde(skip)]
    pub(crate) target: Option<Target>,
    /// Length of each `waitfor delay` in the busy scenario.
    pub(crate) delay_ms: u64,
    /// Times each payload query or procedure call is repeated.
    pub(crate) repeats: usize,
    pub(crate) table: String,
    pub(crate) columns: Vec<String>,
    pub(crate) schema: String,
    /// Row limit for payload selects.
    pub(crate) top: usize,
    /// Read rows event by event instead of aggregating.
    pub(crate) stream: bool,
    pub(crate) procedure: String,
    pub(crate) value: i64,
    pub(crate) prepared: bool,
    pub(crate) severity: u8,
    /// Rounds per connection in the txn scenario.
    pub(crate) iterations: usize,
    pub(crate) ceiling: usize,
    pub(crate) seed: u64,
    pub(crate) log: Option<PathBuf>,
}

impl ProbeConfig {
    pub(crate) fn from_args(args: Args) -> Self {
        let target = if args.scripted {
            Some(Target::Scripted)
        } else if let Some(instance) = args.localdb {
            Some(Target::LocalDb {
                instance,
                database: args.database,
            })
        } else {
            args.connection_string
                .or_else(mssql_middleware::discovery::connection_string_from_env)
                .map(Target::ConnectionString)
        };
        ProbeConfig {
            scenario: args.scenario,
            target,
            delay_ms: u64::try_from(args.delay.as_millis()).unwrap_or(u64::MAX),
            repeats: args.repeats.max(1),
            table: args.table,
            columns: parse_columns(args.columns.as_deref()),
            schema: args.schema,
            top: args.top.max(1),
            stream: args.stream,
            procedure: args.procedure,
            value: args.value,
            prepared: args.prepared,
            severity: args.severity,
            iterations: args.iterations.max(1),
            ceiling: args.ceiling.max(1),
            seed: args.seed.unwrap_or_else(random_seed),
            log: args.log,
        }
    }

    pub(crate) fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// `SELECT TOP (n) ... FROM [schema].[table]` for the payload scenario.
    pub(crate) fn payload_sql(&self) -> String {
        let columns = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns
                .iter()
                .map(|c| mssql_middleware::translation::quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!(
            "SELECT TOP ({}) {columns} FROM {}.{}",
            self.top,
            mssql_middleware::translation::quote_ident(&self.schema),
            mssql_middleware::translation::quote_ident(&self.table)
        )
    }
}

fn parse_columns(columns: Option<&str>) -> Vec<String> {
    columns
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

fn random_seed() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    now.as_secs() ^ u64::from(now.subsec_nanos())
}
