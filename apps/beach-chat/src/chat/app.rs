use chat_proto::{ApplicationMessage, ReactionKind};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::chat::cli::Cli;
use crate::chat::command::{ChatCommand, HELP, parse_line};
use crate::chat::error::CliError;
use crate::session::{SessionError, SessionEvent, SessionHandle};

pub async fn run(cli: Cli) -> Result<(), CliError> {
    let local_id = cli.id.trim().to_string();
    if local_id.is_empty() {
        return Err(CliError::InvalidArgument("--id must not be empty".into()));
    }

    let config = cli.chat_config();
    info!(
        target: "beach_chat::cli",
        signaling_url = %config.signaling_url,
        ice_servers = config.webrtc.ice_servers.len(),
        "starting chat session"
    );

    let session = SessionHandle::new(config);
    let printer = tokio::spawn(print_events(session.clone()));

    match cli.peer.as_deref() {
        Some(peer) => {
            println!("📞 calling {peer} as {local_id}…");
            session.connect(local_id.clone(), peer).await?;
        }
        None => {
            println!("👂 waiting for a call as {local_id}…");
            session.listen(local_id.clone()).await?;
        }
    }
    println!("type /help for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_line(&line) {
            Ok(None) => {}
            Ok(Some(command)) => {
                if !execute(&session, &local_id, command).await? {
                    break;
                }
            }
            Err(err) => eprintln!("⚠️  {err}"),
        }
    }

    debug!(target: "beach_chat::cli", "input closed; shutting down");
    session.shutdown().await;
    printer.abort();
    Ok(())
}

/// Runs one command. Returns `Ok(false)` when the user asked to leave.
async fn execute(
    session: &SessionHandle,
    local_id: &str,
    command: ChatCommand,
) -> Result<bool, CliError> {
    match command {
        ChatCommand::Say(message) => send(session, message).await?,
        ChatCommand::React { id, reaction } => {
            let target = id.or_else(|| {
                session
                    .snapshot()
                    .last_received_message
                    .and_then(|message| message.id().map(str::to_string))
            });
            match target {
                Some(id) => send(session, ApplicationMessage::reaction(id, reaction)).await?,
                None => eprintln!("⚠️  nothing to react to yet"),
            }
        }
        ChatCommand::Reactions => {
            let names: Vec<&str> = ReactionKind::ALL.iter().map(|kind| kind.as_str()).collect();
            println!("reactions: {}", names.join(", "));
        }
        ChatCommand::Status => {
            let snapshot = session.snapshot();
            println!(
                "status: {} (peer: {})",
                snapshot.status,
                snapshot.remote_id.as_deref().unwrap_or("-")
            );
            if let Some(err) = snapshot.last_error {
                println!("last error: {err}");
            }
        }
        ChatCommand::Connect(peer) => match session.connect(local_id, peer.as_str()).await {
            Ok(()) => println!("📞 calling {peer}…"),
            Err(SessionError::ActorGone) => return Err(SessionError::ActorGone.into()),
            Err(err) => eprintln!("⚠️  {err}"),
        },
        ChatCommand::Disconnect => {
            session.disconnect().await;
            println!("👋 disconnected");
        }
        ChatCommand::Help => println!("{HELP}"),
        ChatCommand::Quit => return Ok(false),
    }
    Ok(true)
}

async fn send(session: &SessionHandle, message: ApplicationMessage) -> Result<(), CliError> {
    let rendered = render(&message);
    match session.send_message(message).await {
        Ok(()) => println!("you: {rendered}"),
        Err(SessionError::ActorGone) => return Err(SessionError::ActorGone.into()),
        Err(err) => eprintln!("⚠️  not sent: {err}"),
    }
    Ok(())
}

async fn print_events(session: SessionHandle) {
    let mut events = session.subscribe();
    loop {
        match events.recv().await {
            Ok(SessionEvent::StatusChanged(status)) => println!("· {status}"),
            Ok(SessionEvent::Error(message)) => eprintln!("❌ {message}"),
            Ok(SessionEvent::MessageReceived(message)) => {
                let peer = session.snapshot().remote_id.unwrap_or_else(|| "peer".into());
                println!("{peer}: {}", render(&message));
            }
            // reported inline by `send`
            Ok(SessionEvent::SendRejected(_)) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(target: "beach_chat::cli", skipped, "event printer lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn render(message: &ApplicationMessage) -> String {
    match message {
        ApplicationMessage::Text { content, .. } => content.clone(),
        ApplicationMessage::Gif { content, .. } => format!("[gif] {content}"),
        ApplicationMessage::Reaction { id, reaction } => format!("reacted {reaction} to {id}"),
    }
}
