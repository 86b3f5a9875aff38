//! A scripted FreeSWITCH on a loopback socket.

#![allow(dead_code)]

use freeswitch_event_socket::EventSocket;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// The switch end of one connection.
pub struct FakeSwitch {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// One command as written by the client: the header block and optional body.
#[derive(Debug, Clone)]
pub struct ReceivedCommand {
    pub head: String,
    pub body: Option<String>,
}

impl ReceivedCommand {
    pub fn first_line(&self) -> &str {
        self.head
            .lines()
            .next()
            .unwrap_or_default()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.head
            .lines()
            .skip(1)
            .find_map(|line| {
                let (key, value) = line.split_once(':')?;
                key.trim()
                    .eq_ignore_ascii_case(name)
                    .then(|| value.trim())
            })
    }
}

impl FakeSwitch {
    pub fn new(stream: TcpStream) -> Self {
        let (read, write) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer: write,
        }
    }

    /// Read the next command, skipping blank lines left over from a previous body.
    pub async fn read_command(&mut self) -> ReceivedCommand {
        tokio::time::timeout(READ_TIMEOUT, self.read_command_inner())
            .await
            .expect("timed out waiting for a command")
            .expect("connection closed while waiting for a command")
    }

    /// `None` if nothing arrives within `wait`.
    pub async fn try_read_command(&mut self, wait: Duration) -> Option<ReceivedCommand> {
        tokio::time::timeout(wait, self.read_command_inner())
            .await
            .ok()
            .flatten()
    }

    async fn read_command_inner(&mut self) -> Option<ReceivedCommand> {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            let n = self
                .reader
                .read_line(&mut line)
                .await
                .ok()?;
            if n == 0 {
                return None;
            }
            let line = line.trim_end_matches('\n');
            if line.is_empty() {
                if lines.is_empty() {
                    continue;
                }
                break;
            }
            lines.push(line.to_string());
        }
        let head = lines.join("\n");
        let length = lines
            .iter()
            .skip(1)
            .find_map(|line| {
                let (key, value) = line.split_once(':')?;
                key.trim()
                    .eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            });
        let body = match length {
            Some(length) => {
                let mut buf = vec![0u8; length];
                self.reader
                    .read_exact(&mut buf)
                    .await
                    .ok()?;
                Some(String::from_utf8(buf).ok()?)
            }
            None => None,
        };
        Some(ReceivedCommand { head, body })
    }

    pub async fn send_raw(&mut self, bytes: &str) {
        self.writer
            .write_all(bytes.as_bytes())
            .await
            .expect("write to client");
    }

    pub async fn auth_request(&mut self) {
        self.send_raw("Content-Type: auth/request\n\n")
            .await;
    }

    pub async fn reply(&mut self, reply_text: &str) {
        self.send_raw(&format!(
            "Content-Type: command/reply\nReply-Text: {}\n\n",
            reply_text
        ))
        .await;
    }

    pub async fn api_response(&mut self, body: &str) {
        self.send_raw(&format!(
            "Content-Type: api/response\nContent-Length: {}\n\n{}",
            body.len(),
            body
        ))
        .await;
    }

    /// A `text/event-plain` frame built from `(name, value)` headers.
    pub async fn event(&mut self, headers: &[(&str, &str)]) {
        self.send_raw(&event_frame(headers))
            .await;
    }

    pub async fn disconnect_notice(&mut self, disposition: Option<&str>) {
        let body = "Disconnected, goodbye.\nSee you at ClueCon! http://www.cluecon.com/\n";
        let disposition = disposition
            .map(|d| format!("Content-Disposition: {}\n", d))
            .unwrap_or_default();
        self.send_raw(&format!(
            "Content-Type: text/disconnect-notice\n{}Content-Length: {}\n\n{}",
            disposition,
            body.len(),
            body
        ))
        .await;
    }

    /// Answer every command with `+OK` until one whose first line starts with `prefix`.
    pub async fn accept_until(&mut self, prefix: &str) -> ReceivedCommand {
        loop {
            let command = self
                .read_command()
                .await;
            if command
                .first_line()
                .starts_with(prefix)
            {
                return command;
            }
            self.acknowledge(&command)
                .await;
        }
    }

    /// `+OK` for commands, an empty success for `api`.
    pub async fn acknowledge(&mut self, command: &ReceivedCommand) {
        if command
            .first_line()
            .starts_with("api ")
        {
            self.api_response("+OK\n")
                .await;
        } else {
            self.reply("+OK")
                .await;
        }
    }
}

pub fn event_frame(headers: &[(&str, &str)]) -> String {
    event_frame_with_body(headers, None)
}

/// An event whose own body (e.g. a `BACKGROUND_JOB` result) follows its headers.
pub fn event_frame_with_body(headers: &[(&str, &str)], event_body: Option<&str>) -> String {
    let mut body: String = headers
        .iter()
        .map(|(name, value)| format!("{}: {}\n", name, value))
        .collect();
    if let Some(event_body) = event_body {
        body.push_str(&format!("Content-Length: {}\n", event_body.len()));
        body.push('\n');
        body.push_str(event_body);
    } else {
        body.push('\n');
    }
    format!(
        "Content-Length: {}\nContent-Type: text/event-plain\n\n{}",
        body.len(),
        body
    )
}

/// A started [`EventSocket`] wired to a [`FakeSwitch`].
pub async fn socket_pair() -> (EventSocket, FakeSwitch) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap();
    let addr = listener
        .local_addr()
        .unwrap();
    let (client, server) = tokio::join!(TcpStream::connect(addr), listener.accept());
    (
        EventSocket::new(client.unwrap()),
        FakeSwitch::new(server.unwrap().0),
    )
}

/// Listener address and a switch connected to it.
pub async fn connect_switch(addr: std::net::SocketAddr) -> FakeSwitch {
    FakeSwitch::new(
        TcpStream::connect(addr)
            .await
            .unwrap(),
    )
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
