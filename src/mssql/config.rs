use tiberius::Config;

use crate::error::SqlMiddlewareDbError;

/// Keys understood by ODBC drivers but not by tiberius' ADO parser.
const ODBC_ONLY_KEYS: [&str; 2] = ["driver", "dsn"];

/// Remove ODBC-only `key=value` pairs, honoring `{...}` quoted values.
pub(super) fn strip_odbc_keys(conn_str: &str) -> String {
    let mut kept = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let bytes = conn_str.as_bytes();
    for (idx, b) in bytes.iter().enumerate() {
        match b {
            b'{' => depth += 1,
            b'}' => depth = depth.saturating_sub(1),
            b';' if depth == 0 => {
                kept.push(&conn_str[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    kept.push(&conn_str[start..]);
    kept.into_iter()
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .filter(|pair| {
            let key = pair.split('=').next().unwrap_or_default().trim();
            !ODBC_ONLY_KEYS.iter().any(|k| key.eq_ignore_ascii_case(k))
        })
        .collect::<Vec<_>>()
        .join(";")
}

/// Build a tiberius config from an ADO/ODBC style connection string.
pub(super) fn parse_connection_string(conn_str: &str) -> Result<Config, SqlMiddlewareDbError> {
    let cleaned = strip_odbc_keys(conn_str);
    let mut config = Config::from_ado_string(&cleaned)
        .map_err(|e| SqlMiddlewareDbError::ConnectionError(format!("bad connection string: {e}")))?;
    let lowered = cleaned.to_ascii_lowercase();
    if !lowered.contains("trustservercertificate") {
        config.trust_cert();
    }
    Ok(config)
}

/// Server part of a connection string, for logs. Credentials are never included.
pub(super) fn describe(conn_str: &str) -> String {
    strip_odbc_keys(conn_str)
        .split(';')
        .find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = key.trim().to_ascii_lowercase();
            matches!(key.as_str(), "server" | "data source" | "address")
                .then(|| value.trim().to_string())
        })
        .unwrap_or_else(|| "sqlserver".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_driver_key_with_braced_value() {
        let cs = "Driver={ODBC Driver 17 for SQL Server; x}; Server=tcp:localhost,1433; Database=scratch;";
        assert_eq!(strip_odbc_keys(cs), "Server=tcp:localhost,1433;Database=scratch");
    }

    #[test]
    fn describes_server_only() {
        let cs = "Server=db.local;User Id=sa;Password=secret";
        assert_eq!(describe(cs), "db.local");
        assert_eq!(describe("Database=x"), "sqlserver");
    }
}
