//! Process Wiring
//!
//! Builds the actor graph for the bot and the inference stack for the model
//! service from `Settings`.

use crate::actors::{ConversationEngine, UpdateDispatcher, UpdateRouterHandle};
use crate::config::Settings;
use crate::core::messenger::Messenger;
use crate::core::model_client::ModelClient;
use crate::core::telegram::TelegramClient;
use crate::engine::backbone::Backbone;
use crate::engine::optimization::OptimizationSettings;
use crate::engine::{default_image_size, select_device, InferenceDispatcher, StyleRegistry};
use crate::server::auth::UserAllowList;
use crate::server::handlers::load_examples;
use crate::server::AppState;
use crate::storage::{InMemorySessionStorage, SessionStorage};
use crate::styles::CUSTOM_STYLE;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

const POLL_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Run the bot until ctrl-c.
pub async fn run_bot(settings: Settings) -> Result<()> {
    if settings.telegram.api_token.is_empty() {
        anyhow::bail!("telegram.api_token is not configured");
    }

    let telegram = Arc::new(TelegramClient::new(settings.telegram.clone()));
    let messenger: Arc<dyn Messenger> = telegram.clone();
    let storage: Arc<dyn SessionStorage> = Arc::new(InMemorySessionStorage::new());
    let model = ModelClient::new(settings.model_service.clone())?;

    let conversation = Arc::new(ConversationEngine::new(
        messenger.clone(),
        storage,
        model,
        settings.conversation.max_content_images,
    ));
    let dispatcher = Arc::new(UpdateDispatcher::new(conversation, messenger, &settings));
    let router = UpdateRouterHandle::new(dispatcher, settings.conversation.channel_buffer_size);

    let mut offset = if settings.telegram.skip_pending_updates {
        let next = telegram.skip_pending_updates().await?;
        tracing::info!("Skipped pending updates, polling from offset {}", next);
        next
    } else {
        0
    };

    tracing::info!("Bot started");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received ctrl-c, shutting down");
                break;
            }
            polled = telegram.get_updates(offset) => match polled {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        if let Some(inbound) = update.into_inbound() {
                            router.route(inbound).await?;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Polling failed: {}", e);
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                }
            }
        }
    }

    router.shutdown().await?;
    Ok(())
}

/// Build the dispatcher for the configured backbone and generators.
pub fn build_dispatcher(settings: &Settings) -> Result<InferenceDispatcher> {
    let engine = &settings.engine;
    let device = select_device(&engine.device)?;
    tracing::info!("Using device {:?}", device);

    let backbone = Backbone::load_vgg19(&engine.backbone_weights, &device)?;
    let registry = StyleRegistry::load(&engine.generators_dir, &engine.fixed_styles, &device)?;
    let image_size = engine
        .image_size
        .unwrap_or_else(|| default_image_size(&device));

    Ok(InferenceDispatcher::new(
        Arc::new(backbone),
        Arc::new(registry),
        OptimizationSettings::from(engine),
        device,
        image_size,
        engine.pool_size,
    ))
}

/// Run the model service until ctrl-c.
pub async fn run_model_server(
    settings: Settings,
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    let server = &settings.server;
    let users = UserAllowList::from_file(&server.users_file)
        .with_context(|| format!("failed to read users from {}", server.users_file))?;
    if users.is_empty() {
        tracing::warn!("User allow-list is empty, every request will be rejected");
    }

    let dispatcher = build_dispatcher(&settings)?;
    let examples = load_examples(&server.examples_dir)?;

    let state = Arc::new(AppState {
        dispatcher: Arc::new(dispatcher),
        users,
        examples,
    });

    let address = format!(
        "{}:{}",
        host.unwrap_or_else(|| server.host.clone()),
        port.unwrap_or(server.port)
    );
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {}", address))?;

    crate::server::serve(listener, state, server.max_body_bytes, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
        }
    })
    .await
}

/// Fit a style image onto a content image offline and write the PNG result.
pub fn stylize_files(
    settings: &Settings,
    content: &Path,
    style: &Path,
    output: &Path,
    iterations: Option<usize>,
) -> Result<()> {
    let engine = &settings.engine;
    let device = select_device(&engine.device)?;
    let backbone = Backbone::load_vgg19(&engine.backbone_weights, &device)?;

    let mut optimization = OptimizationSettings::from(engine);
    if let Some(iterations) = iterations {
        optimization.max_iterations = iterations;
    }
    let image_size = engine
        .image_size
        .unwrap_or_else(|| default_image_size(&device));

    let dispatcher = InferenceDispatcher::new(
        Arc::new(backbone),
        Arc::new(StyleRegistry::new()),
        optimization,
        device,
        image_size,
        1,
    );

    let content = std::fs::read(content)
        .with_context(|| format!("failed to read {}", content.display()))?;
    let style = std::fs::read(style).with_context(|| format!("failed to read {}", style.display()))?;

    let fitted = dispatcher.transfer(CUSTOM_STYLE, Some(style), vec![content])?;
    let image = fitted
        .into_iter()
        .next()
        .context("optimization produced no image")?;
    std::fs::write(output, image).with_context(|| format!("failed to write {}", output.display()))?;
    Ok(())
}
