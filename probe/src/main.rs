mod args;
mod replay;
mod scenarios;

use std::sync::Arc;

use clap::Parser;
use mssql_middleware::discovery;
use mssql_middleware::session::Connector;
use mssql_middleware::test_utils::TeeWriter;
use mssql_middleware::{SqlMiddlewareDbError, mssql::TiberiusConnector};
use tracing::{Level, error, info};

use crate::args::{Args, ProbeConfig, Target};

async fn resolve_connector(target: Option<&Target>) -> Result<Arc<dyn Connector>, SqlMiddlewareDbError> {
    let connection_string = match target {
        Some(Target::Scripted) => return Ok(Arc::new(replay::connector())),
        Some(Target::ConnectionString(cs)) => cs.clone(),
        Some(Target::LocalDb { instance, database }) => {
            discovery::discover_localdb(instance, database).await?
        }
        None => {
            discovery::discover_localdb(discovery::DEFAULT_LOCALDB_INSTANCE, "master").await?
        }
    };
    let connector = TiberiusConnector::new(&connection_string)?;
    info!(server = %connector.describe(), "connecting");
    Ok(Arc::new(connector))
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = ProbeConfig::from_args(args);

    let writer = TeeWriter::new(true, config.log.clone()).unwrap_or_else(|err| {
        eprintln!("failed to open log file: {err}");
        std::process::exit(1);
    });
    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_target(false)
        .with_max_level(Level::INFO)
        .init();

    match serde_json::to_string_pretty(&config) {
        Ok(json) => info!("probe config:\n{json}"),
        Err(err) => error!(%err, "failed to serialize probe config"),
    }

    let outcome = match resolve_connector(config.target.as_ref()).await {
        Ok(connector) => scenarios::run(&config, connector).await,
        Err(err) => Err(err),
    };
    if let Err(err) = outcome {
        error!(%err, scenario = ?config.scenario, "probe failed");
        std::process::exit(1);
    }
    info!(scenario = ?config.scenario, "probe finished");
}
