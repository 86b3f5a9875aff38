//! Connects to FreeSWITCH in inbound mode and prints every answered channel as a JSON
//! line on stdout. Settings come from `FREESWITCH_ESL_*` environment variables.

use freeswitch_event_socket::{
    spawn_answer_publisher, EslConfig, EslError, EslEventType, ForwardingSink, InboundSocket,
    JsonLinesSink, NotificationSink,
};
use std::sync::Arc;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), EslError> {
    let config = EslConfig::from_env()?;
    let socket = InboundSocket::connect(&config).await?;

    let status = socket
        .send_api("status")
        .await?;
    info!("{}", status.body().unwrap_or_default());

    socket
        .subscribe_events(&[EslEventType::All])
        .await?;

    let mut channel_events = socket.channel_events();
    tokio::spawn(async move {
        while let Some(event) = channel_events
            .recv()
            .await
        {
            debug!("Channel event [{}] - {}", event.uuid(), event.name());
        }
    });

    let (sink, mut notifications) = ForwardingSink::new();
    let writer = tokio::task::spawn_blocking(move || {
        let stdout = JsonLinesSink::new(std::io::stdout());
        while let Some(notification) = notifications.blocking_recv() {
            stdout.publish(notification);
        }
    });
    let publisher = spawn_answer_publisher(&socket, Arc::new(sink));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, exiting");
            socket.exit().await?;
            socket.dispose();
        }
        _ = socket.disposed() => info!("Connection closed by FreeSWITCH"),
    }
    let _ = publisher.await;
    let _ = writer.await;
    Ok(())
}
