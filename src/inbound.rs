//! Inbound mode: we connect to FreeSWITCH and authenticate.

use crate::config::EslConfig;
use crate::connection::Connection;
use crate::error::{EslError, EslResult};
use crate::protocol::ContentType;
use crate::socket::EventSocket;
use tracing::{debug, info};

/// Client side of an inbound event socket connection.
pub struct InboundSocket;

impl InboundSocket {
    /// Connect and authenticate. Both steps are bounded by `config.response_timeout`.
    ///
    /// A rejected password fails with [`EslError::Authentication`] and closes the
    /// connection.
    pub async fn connect(config: &EslConfig) -> EslResult<EventSocket> {
        info!("Connecting to FreeSWITCH at {}:{}", config.host, config.port);
        let connection =
            Connection::connect(&config.host, config.port, config.response_timeout).await?;
        let socket = EventSocket::from_connection(connection);
        let mut auth_requests = socket
            .messages()
            .filter(|message| message.content_type() == &ContentType::AuthRequest);
        socket.start();

        let timeout_ms = u64::try_from(
            config
                .response_timeout
                .as_millis(),
        )
        .unwrap_or(u64::MAX);
        let handshake = async {
            debug!("[AUTH] Waiting for auth request from FreeSWITCH");
            auth_requests
                .recv()
                .await
                .ok_or(EslError::Disconnected)?;
            auth_requests.close();
            socket
                .auth(&config.password)
                .await
        };
        let result = match tokio::time::timeout(config.response_timeout, handshake).await {
            Ok(result) => result,
            Err(_) => Err(EslError::Timeout { timeout_ms }),
        };
        if let Err(e) = result {
            socket.dispose();
            return Err(e);
        }
        info!("({}) Connected and authenticated to FreeSWITCH", socket.id());
        Ok(socket)
    }
}
