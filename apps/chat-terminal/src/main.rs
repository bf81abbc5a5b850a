//! Line-based terminal client for one chat room.
//!
//! Messages typed on stdin are published to the room; `/retry`, `/status`,
//! `/logout` and `/quit` control the session.

mod config;
mod logging;
mod state;

use std::{process::ExitCode, sync::Arc};

use backend_core::{BackendChannelError, BackendError, BackendErrorCategory};
use backend_platform::{AuthStore, FileStore, ScopedStore};
use backend_rest::{
    AuthenticatedClient, ChatApi, HealthProbe, HttpTransport, ReqwestTransport, SessionApi,
};
use backend_stomp::{RestRoomServices, SessionDeps, WebSocketConnector, spawn_chat_session};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::{error, info, warn};

use crate::{
    config::TerminalConfig,
    state::{TerminalInput, TerminalState},
};

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();

    let config = match TerminalConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(code = %err.code, message = %err.message, "chat terminal stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: TerminalConfig) -> Result<(), BackendError> {
    let store = ScopedStore::new(
        FileStore::new(config.credentials_path()),
        config.endpoints.credential_scope(),
    );
    let auth = AuthStore::open(Arc::new(store))?;
    let transport: Arc<dyn HttpTransport> =
        Arc::new(ReqwestTransport::new(config.endpoints.clone())?);
    let sessions = SessionApi::new(transport.clone(), auth.clone());

    if !config.demo
        && auth.access_token().is_none()
        && let Some((email, password)) = config.login()
    {
        info!(%email, "logging in");
        sessions.login(email, password).await?;
    }

    let services = RestRoomServices::new(
        HealthProbe::new(transport.clone(), config.endpoints.health_timeout),
        ChatApi::new(AuthenticatedClient::new(transport, auth.clone())),
    );
    let connector = WebSocketConnector::for_sockjs_endpoint(&config.socket_url()?)?;
    let session = spawn_chat_session(
        config.session_config(),
        SessionDeps {
            services: Arc::new(services),
            connector: Arc::new(connector),
            auth: auth.clone(),
        },
    );

    let mut events = session.subscribe();
    let mut view = TerminalState::new(auth.email(), config.message_log_max);
    session.connect().await.map_err(runtime_gone)?;

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut logout = false;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    for line in view.handle_event(event) {
                        println!("{line}");
                    }
                    if let Some(return_to) = view.take_login_redirect() {
                        let Some((email, password)) = config.login() else {
                            break;
                        };
                        sessions.login(email, password).await?;
                        info!(%return_to, "logged in again");
                        session.retry().await.map_err(runtime_gone)?;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event stream lagged"),
                Err(RecvError::Closed) => break,
            },
            line = input.next_line() => match line {
                Ok(Some(line)) => match TerminalInput::parse(&line) {
                    TerminalInput::Empty => {}
                    TerminalInput::Message(body) => {
                        session.send_message(body).await.map_err(runtime_gone)?;
                    }
                    TerminalInput::Retry => session.retry().await.map_err(runtime_gone)?,
                    TerminalInput::Status => println!("{}", view.status_line()),
                    TerminalInput::Logout => {
                        logout = true;
                        break;
                    }
                    TerminalInput::Quit => break,
                },
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "stdin read failed");
                    break;
                }
            },
        }
    }

    session.disconnect().await.map_err(runtime_gone)?;
    if logout {
        sessions.logout().await?;
        info!("logged out");
    }
    Ok(())
}

fn runtime_gone(err: BackendChannelError) -> BackendError {
    BackendError::new(BackendErrorCategory::Internal, "session_stopped", err.to_string())
}
