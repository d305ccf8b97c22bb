use std::sync::Arc;

use axum::extract::rejection::FormRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Form, Json, Router};
use chrono::{Datelike, Utc};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{warn, Level};
use uuid::Uuid;

use santa_db::DbPool;
use santa_slack::{
    messages, normalize_santa_command, CommandReply, CommandRouter, SantaCommand,
    SecretSantaService, SlashCommandPayload,
};

use crate::health;

pub type SantaRouter = CommandRouter<SecretSantaService>;

#[derive(Clone)]
pub struct CommandState {
    commands: Arc<SantaRouter>,
}

/// Slash-command endpoints plus `/health`, with request tracing.
pub fn router(commands: Arc<SantaRouter>, db_pool: DbPool) -> Router {
    let mut command_routes = Router::new();
    for command in SantaCommand::ALL {
        command_routes = command_routes.route(
            command.path(),
            post(
                move |State(state): State<CommandState>,
                      payload: Result<Form<SlashCommandPayload>, FormRejection>| {
                    dispatch(state, command, payload)
                },
            ),
        );
    }

    command_routes.with_state(CommandState { commands }).merge(health::router(db_pool)).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    )
}

pub fn current_year() -> i32 {
    Utc::now().year()
}

async fn dispatch(
    state: CommandState,
    command: SantaCommand,
    payload: Result<Form<SlashCommandPayload>, FormRejection>,
) -> Response {
    let correlation_id = Uuid::new_v4().to_string();

    // Slack only renders 200 replies, so malformed forms still answer 200.
    let Form(payload) = match payload {
        Ok(form) => form,
        Err(rejection) => {
            warn!(
                event_name = "http.command.malformed",
                correlation_id = %correlation_id,
                command = command.as_str(),
                error = %rejection,
                "slash command form could not be parsed"
            );
            let message = messages::error_message(rejection.body_text());
            return (StatusCode::OK, Json(message)).into_response();
        }
    };

    let envelope = normalize_santa_command(command, payload, current_year(), correlation_id);
    match state.commands.route(envelope).await {
        CommandReply::Deferred => StatusCode::OK.into_response(),
        CommandReply::Message(message) => (StatusCode::OK, Json(message)).into_response(),
    }
}
