//! piothub - MQTT + HTTP ingestion hub with thing registry and InfluxDB/SQL fan-out.

use clap::Parser;
use piothub::bridge::{router, InfluxSink, InfluxWriter, MqttDispatcher, MqttPublisher, PacketProcessor, SqlSink, SqlWriter};
use piothub::cli::Args;
use piothub::registry::{OrgRegistry, ThingRegistry};
use piothub::{load_config, Config, HubError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), HubError> {
    let args = Args::parse();
    let config = load_config(&args.config)?;

    let filter = if args.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new(config.log_level.clone())
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("loaded configuration from {:?}", args.config);

    if args.test {
        println!("Configuration file is valid.");
        return Ok(());
    }

    info!("MQTT broker: {}:{}", config.mqtt.host, config.mqtt.port);
    info!("HTTP listen address: {}", config.http.listen_addr);

    loop {
        match run_hub(&config).await {
            Ok(()) => break,
            Err(e) => {
                if !args.daemon {
                    return Err(e);
                }
                error!(error = %e, "hub exited with error");
                info!("retrying in 30 seconds...");
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
        }
    }

    Ok(())
}

async fn run_hub(config: &Config) -> Result<(), HubError> {
    let things = Arc::new(ThingRegistry::connect(&config.registry.dsn).await?);
    let org_pool = sqlx::SqlitePool::connect(&config.registry.dsn).await?;
    let orgs = Arc::new(OrgRegistry::connect(org_pool).await?);

    let influx: Arc<dyn InfluxWriter> = Arc::new(InfluxSink::new(&config.influxdb, orgs.clone())?);
    let sql: Arc<dyn SqlWriter> = Arc::new(SqlSink::new(&config.sql, orgs.clone()));

    let (publisher, eventloop) = MqttPublisher::new(&config.mqtt);
    let publisher = Arc::new(publisher);
    let client = publisher.client();

    let dispatcher = Arc::new(MqttDispatcher::new(things.clone(), orgs.clone(), influx, sql));
    let mqtt_task = tokio::spawn(MqttPublisher::run(client, eventloop, dispatcher));

    let processor = Arc::new(PacketProcessor::new(
        things.clone(),
        publisher.clone(),
        Duration::from_millis(config.dos.min_interval_ms),
    ));
    let app = router(processor);

    let listener = tokio::net::TcpListener::bind(&config.http.listen_addr)
        .await
        .map_err(|e| HubError::Internal(format!("failed to bind {}: {e}", config.http.listen_addr)))?;

    info!("listening on {}", config.http.listen_addr);

    tokio::select! {
        res = axum::serve(listener, app) => {
            res.map_err(|e| HubError::Internal(e.to_string()))?;
        }
        res = mqtt_task => {
            res.map_err(|e| HubError::Internal(e.to_string()))?;
        }
    }

    Ok(())
}
