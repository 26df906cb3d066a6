use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use url::Url;

use pgreplica::config::Cli;
use pgreplica::replication::Event;
use pgreplica::session::ConnectionOptions;
use pgreplica::Subscriber;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let primary_options = cli.connection_options().unwrap();
    let aux_options = ConnectionOptions {
        replication: false,
        ..primary_options.clone()
    };
    let addrs = resolve(&cli.url).await.unwrap();

    let handler: pgreplica::replication::HandlerFn = Arc::new(|event, ack| {
        Box::pin(async move {
            log_event(&event);
            if let Some(ack) = ack {
                ack.ack();
            }
            Ok(())
        })
    });
    let subscriber_options = cli.subscriber_options(handler).unwrap();

    let subscriber = Subscriber::connect(&cli.slot, addrs.clone(), primary_options, addrs, aux_options, subscriber_options)
        .await
        .unwrap();

    tokio::select! {
        Ok(_) = tokio::signal::ctrl_c() => {},
        result = subscriber.wait() => {
            if let Err(err) = result {
                eprintln!("subscriber stopped: {err}");
            }
        }
    }

    subscriber.close().await.unwrap();
}

async fn resolve(url: &Url) -> std::io::Result<Vec<SocketAddr>> {
    let port = url.port().unwrap_or(5432);
    let host = url.host_str().unwrap_or("localhost");
    tokio::net::lookup_host((host, port)).await.map(|v| v.collect())
}

fn log_event(event: &Event) {
    match event {
        Event::Insert { schema, table, new_row } => println!("insert {schema}.{table}: {new_row:?}"),
        Event::Update { schema, table, new_row, .. } => println!("update {schema}.{table}: {new_row:?}"),
        Event::Delete { schema, table, old_row } => println!("delete {schema}.{table}: {old_row:?}"),
        Event::Commit { end_lsn, .. } => println!("commit at {end_lsn}"),
        _ => {}
    }
}
