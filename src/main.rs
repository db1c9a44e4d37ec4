use std::sync::Arc;

use clap::{Parser, Subcommand};
use frames::Delivery;
use taskboard::api::{ApiError, HttpBoardApi};
use taskboard::config::SyncConfig;
use taskboard::error::SyncError;
use taskboard::session::{Connectivity, Session, SessionCommand, SessionEvent};
use taskboard::store::EntityRef;
use taskboard::transport::Credential;
use taskboard::transport::ws::WsConnector;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("missing access token; pass --token or set TASKBOARD_TOKEN")]
    MissingToken,
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("api client setup failed: {0}")]
    Api(#[from] ApiError),
    #[error("project {project_id} failed to load: {message}")]
    LoadFailed { project_id: i64, message: String },
    #[error("task {0} is not on the board")]
    UnknownTask(i64),
    #[error("moving task {task_id} failed: {message}")]
    WriteFailed { task_id: i64, message: String },
    #[error("connection closed before the operation finished")]
    SessionEnded,
}

#[derive(Parser, Debug)]
#[command(name = "taskboard", about = "Task board real-time sync client")]
struct Cli {
    #[arg(long, env = "TASKBOARD_TOKEN")]
    token: Option<String>,

    /// Id of the signed-in user; broadcasts carrying it are treated as echoes.
    #[arg(long, env = "TASKBOARD_USER_ID")]
    user_id: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Join a project room and print live changes until Ctrl-C.
    Watch {
        project_id: i64,
        #[arg(long, default_value_t = false)]
        notifications: bool,
    },
    /// Move a task and wait for the server to confirm.
    Move {
        project_id: i64,
        task_id: i64,
        status: String,
        #[arg(long, default_value_t = 0)]
        position: i64,
    },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let token = cli.token.ok_or(CliError::MissingToken)?;
    let credential = Credential::bearer(token);
    let config = SyncConfig::from_env();

    let api = HttpBoardApi::new(&config.api_url, &credential)?;
    let connector = WsConnector::new(config.transport.ws_url.clone());
    let (mut session, events) = Session::new(config, Arc::new(connector), Arc::new(api), cli.user_id);
    session.connect(credential).await?;

    match cli.command {
        Command::Watch { project_id, notifications } => run_watch(session, events, project_id, notifications).await,
        Command::Move { project_id, task_id, status, position } => {
            run_move(session, events, project_id, task_id, &status, position).await
        }
    }
}

async fn run_watch(
    session: Session,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    project_id: i64,
    notifications: bool,
) -> Result<(), CliError> {
    let (commands, commands_rx) = mpsc::unbounded_channel();
    let runner = tokio::spawn(session.run(commands_rx));

    if notifications {
        let _ = commands.send(SessionCommand::SubscribeNotifications);
    }
    let _ = commands.send(SessionCommand::EnterRoom(project_id));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(event) => println!("{}", describe(&event)),
                None => break,
            },
        }
    }

    let _ = commands.send(SessionCommand::Shutdown);
    if let Err(e) = runner.await {
        tracing::warn!(error = %e, "session task ended abnormally");
    }
    Ok(())
}

async fn run_move(
    mut session: Session,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    project_id: i64,
    task_id: i64,
    status: &str,
    position: i64,
) -> Result<(), CliError> {
    session.enter_room(project_id)?;
    let loaded = wait_for(&mut session, &mut events, |event| {
        matches!(
            event,
            SessionEvent::RoomLoaded { .. } | SessionEvent::LoadFailed { .. }
        )
    })
    .await?;
    if let SessionEvent::LoadFailed { error, .. } = loaded {
        session.disconnect().await;
        return Err(CliError::LoadFailed { project_id, message: error });
    }

    if !session.move_task(task_id, status, position) {
        session.disconnect().await;
        return Err(CliError::UnknownTask(task_id));
    }
    let entity = EntityRef::task(task_id);
    let settled = wait_for(&mut session, &mut events, |event| match event {
        SessionEvent::WriteConfirmed { entity: e } | SessionEvent::WriteFailed { entity: e, .. } => *e == entity,
        _ => false,
    })
    .await?;

    let result = match settled {
        SessionEvent::WriteFailed { error, .. } => Err(CliError::WriteFailed { task_id, message: error }),
        _ => {
            if let Some(task) = session.store().task(task_id) {
                println!(
                    "task {} \"{}\" is now {} at {}",
                    task.id,
                    task.title,
                    task.status.as_deref().unwrap_or("?"),
                    task.position.unwrap_or_default()
                );
            }
            Ok(())
        }
    };
    session.disconnect().await;
    result
}

/// Drive the session until an event matches.
async fn wait_for<F>(
    session: &mut Session,
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    pred: F,
) -> Result<SessionEvent, CliError>
where
    F: Fn(&SessionEvent) -> bool,
{
    loop {
        while let Ok(event) = events.try_recv() {
            tracing::debug!(event = %describe(&event), "session event");
            if pred(&event) {
                return Ok(event);
            }
            if event == SessionEvent::Connectivity(Connectivity::Offline) && session.current_room().is_none() {
                return Err(CliError::SessionEnded);
            }
        }
        if !session.pump().await {
            return Err(CliError::SessionEnded);
        }
    }
}

fn describe(event: &SessionEvent) -> String {
    match event {
        SessionEvent::Connectivity(Connectivity::Live) => "connected".to_owned(),
        SessionEvent::Connectivity(Connectivity::Offline) => "offline".to_owned(),
        SessionEvent::RoomEntered { project_id } => format!("joined project {project_id}"),
        SessionEvent::RoomLoaded { project_id } => format!("project {project_id} loaded"),
        SessionEvent::RoomLeft { project_id } => format!("left project {project_id}"),
        SessionEvent::StateChanged { project_id } => format!("project {project_id} changed"),
        SessionEvent::PresenceChanged { project_id, online } => {
            let names: Vec<&str> = online.iter().map(|entry| entry.display_name.as_str()).collect();
            format!("online in {project_id}: {}", names.join(", "))
        }
        SessionEvent::Notification(Delivery::Decoded(envelope)) => {
            format!("notification {}: {}", envelope.kind, envelope.payload)
        }
        SessionEvent::Notification(Delivery::Raw(body)) => format!("notification: {body}"),
        SessionEvent::TaskCreatedByPeer { title, .. } => format!("new task: {title}"),
        SessionEvent::TaskOpened { task_id } => format!("task {task_id} opened"),
        SessionEvent::WriteConfirmed { entity } => format!("{entity:?} saved"),
        SessionEvent::WriteFailed { entity, error, rollback } => {
            format!("{entity:?} not saved ({error}); {rollback:?}")
        }
        SessionEvent::CreateFailed { kind, error } => format!("{kind:?} not created ({error})"),
        SessionEvent::LoadFailed { resource, error } => format!("{resource:?} failed to load: {error}"),
    }
}
