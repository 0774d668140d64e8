//! Locating a server to connect to.
//!
//! These return configuration values; nothing here changes process state.

use regex::Regex;
use tokio::process::Command;

use crate::error::SqlMiddlewareDbError;

/// Environment variable consulted by [`connection_string_from_env`].
pub const CONNECTION_STRING_ENV: &str = "MSSQL_MIDDLEWARE_CONNECTION_STRING";

/// Default LocalDB instance name used by the demos.
pub const DEFAULT_LOCALDB_INSTANCE: &str = "node";

/// Pull the named pipe address (`np:\\.\pipe\...`) out of `sqllocaldb info` output.
///
/// # Errors
/// Returns `SqlMiddlewareDbError::ConfigError` if the pattern fails to compile.
pub fn parse_localdb_pipe(output: &str) -> Result<Option<String>, SqlMiddlewareDbError> {
    let pattern = Regex::new(r"np:\S+")
        .map_err(|e| SqlMiddlewareDbError::ConfigError(format!("pipe pattern: {e}")))?;
    Ok(output
        .split(['\r', '\n'])
        .find_map(|line| pattern.find(line))
        .map(|m| m.as_str().to_string()))
}

/// Connection string for a trusted connection to `server` and `database`.
#[must_use]
pub fn local_connection_string(server: &str, database: &str) -> String {
    format!("Server={server};Database={database};Trusted_Connection=Yes;")
}

/// Ask `sqllocaldb` for the pipe of a running instance and build a connection string for it.
///
/// # Errors
/// `SqlMiddlewareDbError::ConfigError` when the tool cannot be run, exits with failure or prints
/// no pipe (the instance is stopped).
pub async fn discover_localdb(instance: &str, database: &str) -> Result<String, SqlMiddlewareDbError> {
    let output = Command::new("sqllocaldb")
        .args(["info", instance])
        .output()
        .await
        .map_err(|e| SqlMiddlewareDbError::ConfigError(format!("running sqllocaldb: {e}")))?;
    if !output.status.success() {
        return Err(SqlMiddlewareDbError::ConfigError(format!(
            "sqllocaldb info {instance} failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    match parse_localdb_pipe(&stdout)? {
        Some(pipe) => {
            tracing::debug!(instance, %pipe, "localdb instance found");
            Ok(local_connection_string(&pipe, database))
        }
        None => Err(SqlMiddlewareDbError::ConfigError(format!(
            "localdb instance {instance} has no pipe; is it started?"
        ))),
    }
}

/// The connection string in [`CONNECTION_STRING_ENV`], if set and non-empty.
#[must_use]
pub fn connection_string_from_env() -> Option<String> {
    std::env::var(CONNECTION_STRING_ENV)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_pipe_in_info_output() {
        let output = "Name:               node\r\nVersion:            15.0.4153.1\r\n\
                      State:              Running\r\n\
                      Instance pipe name: np:\\\\.\\pipe\\LOCALDB#1A2B3C4D\\tsql\\query\r\n";
        assert_eq!(
            parse_localdb_pipe(output).unwrap().as_deref(),
            Some("np:\\\\.\\pipe\\LOCALDB#1A2B3C4D\\tsql\\query")
        );
    }

    #[test]
    fn stopped_instance_has_no_pipe() {
        let output = "Name: node\r\nState: Stopped\r\nInstance pipe name: \r\n";
        assert_eq!(parse_localdb_pipe(output).unwrap(), None);
    }

    #[test]
    fn builds_trusted_connection_string() {
        assert_eq!(
            local_connection_string("np:pipe", "scratch"),
            "Server=np:pipe;Database=scratch;Trusted_Connection=Yes;"
        );
    }
}
