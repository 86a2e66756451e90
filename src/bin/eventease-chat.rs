use std::time::Duration;

use clap::{Parser, Subcommand};
use eventease::client::{ChatClient, ClientEvent, DEFAULT_SERVER_URL, EventKind};
use eventease::protocol::OutgoingMessage;
use eventease::services::message::StoredMessage;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {message}")]
    Server { status: u16, message: String },
    #[error("stdin read failed: {0}")]
    Stdin(#[from] std::io::Error),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("timed out waiting for connection")]
    Timeout,
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "eventease-chat", about = "EventEase project chat from the terminal")]
struct Cli {
    #[arg(long, env = "EVENTEASE_URL", default_value = DEFAULT_SERVER_URL)]
    url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that the server answers.
    Ping,
    /// Print stored messages of a project, oldest first.
    History { project_id: String },
    /// Join a project room: print incoming messages, send stdin lines.
    Join {
        project_id: String,
        #[arg(long, env = "EVENTEASE_USER")]
        user: Option<String>,
        #[arg(long, env = "EVENTEASE_USER_ID")]
        user_id: Option<String>,
        /// Seconds to wait for the first connection.
        #[arg(long, default_value_t = 10)]
        connect_timeout: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let base = cli.url.trim_end_matches('/').to_owned();

    match cli.command {
        Command::Ping => run_ping(&base).await,
        Command::History { project_id } => run_history(&base, &project_id).await,
        Command::Join { project_id, user, user_id, connect_timeout } => {
            run_join(&base, &project_id, user, user_id, Duration::from_secs(connect_timeout)).await
        }
    }
}

async fn run_ping(base: &str) -> Result<(), CliError> {
    let json = get_json(&format!("{base}/api")).await?;
    println!("{}", json.get("message").and_then(Value::as_str).unwrap_or("ok"));
    Ok(())
}

async fn run_history(base: &str, project_id: &str) -> Result<(), CliError> {
    let json = get_json(&format!("{base}/api/messages/project/{project_id}")).await?;
    for message in parse_history(json)? {
        println!("[{}] {}: {}", message.timestamp, message.user, message.text);
    }
    Ok(())
}

fn parse_history(json: Value) -> Result<Vec<StoredMessage>, CliError> {
    Ok(serde_json::from_value(json)?)
}

/// Status transitions observed by the join loop.
enum Signal {
    Connected,
    Disconnected,
    Failed(String),
}

async fn run_join(
    base: &str,
    project_id: &str,
    user: Option<String>,
    user_id: Option<String>,
    connect_timeout: Duration,
) -> Result<(), CliError> {
    let (signal_tx, mut signal_rx) = mpsc::unbounded_channel();

    let mut client = ChatClient::websocket();
    client.add_listener(EventKind::NewMessage, |event| {
        if let ClientEvent::NewMessage(msg) = event {
            println!("[{}] {}: {}", msg.project_id, msg.user, msg.text);
        }
    });
    client.add_listener(EventKind::Error, |event| {
        if let ClientEvent::Error(payload) = event {
            eprintln!("error: {}", payload.message);
        }
    });
    client.add_listener(EventKind::ConnectionStatus, move |event| {
        if let ClientEvent::ConnectionStatus(status) = event {
            let signal = match (&status.error, status.connected) {
                (Some(err), _) => Signal::Failed(err.clone()),
                (None, true) => Signal::Connected,
                (None, false) => Signal::Disconnected,
            };
            let _ = signal_tx.send(signal);
        }
    });
    client.connect(base);

    wait_for_connection(&mut signal_rx, connect_timeout).await?;
    join_room(&client, project_id)?;
    eprintln!("joined {project_id}; type a message and press enter");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let text = line.trim();
                if text.is_empty() {
                    continue;
                }
                let message = OutgoingMessage::new(project_id, text).with_user(user_id.clone(), user.clone());
                if !client.send_message(message) {
                    eprintln!("not connected; message dropped");
                }
            }
            Some(signal) = signal_rx.recv() => match signal {
                Signal::Connected => eprintln!("reconnected"),
                Signal::Disconnected => eprintln!("connection lost; retrying"),
                Signal::Failed(err) => return Err(CliError::Connection(err)),
            },
        }
    }

    client.disconnect();
    Ok(())
}

fn join_room(client: &ChatClient, project_id: &str) -> Result<(), CliError> {
    if client.join_project(project_id) {
        Ok(())
    } else {
        Err(CliError::Connection(format!("connection lost before joining {project_id}")))
    }
}

async fn wait_for_connection(
    signals: &mut mpsc::UnboundedReceiver<Signal>,
    limit: Duration,
) -> Result<(), CliError> {
    let wait = async {
        while let Some(signal) = signals.recv().await {
            match signal {
                Signal::Connected => return Ok(()),
                Signal::Disconnected => {}
                Signal::Failed(err) => return Err(CliError::Connection(err)),
            }
        }
        Err(CliError::Connection("client stopped".to_owned()))
    };
    tokio::time::timeout(limit, wait).await.map_err(|_| CliError::Timeout)?
}

async fn get_json(url: &str) -> Result<Value, CliError> {
    let response = reqwest::Client::new().get(url).send().await?;
    let status = response.status();
    let json = response.json::<Value>().await?;
    if !status.is_success() {
        let message = json
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("request failed")
            .to_owned();
        return Err(CliError::Server { status: status.as_u16(), message });
    }
    Ok(json)
}
