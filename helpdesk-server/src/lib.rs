pub mod api;
pub mod clock;
pub mod config;
pub mod notify;
pub mod service;
pub mod state_machine;
pub mod statistics;

use std::sync::Arc;

use anyhow::{Context, Result};
use helpdesk_core::{AssignmentResolver, RoutingConfig};
use tracing::info;

use crate::clock::Clock;
use crate::config::Config;
use crate::notify::{
    ConsoleChannel, NotificationChannel, NotificationDispatcher, RetryPolicy, WebhookChannel,
};
use crate::service::HelpDesk;
use crate::state_machine::{NotificationLog, RequestRepository, RequestStore};

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

/// Short build identifier: the git hash when known, otherwise the crate version.
pub fn get_version() -> String {
    let hash = option_env!("HELPDESK_GIT_HASH").or(built_info::GIT_COMMIT_HASH);
    match hash {
        Some(hash) if hash.len() >= 8 => hash[..8].to_string(),
        Some(hash) => hash.to_string(),
        None => built_info::PKG_VERSION.to_string(),
    }
}

pub struct AppState {
    pub help_desk: Arc<HelpDesk>,
    pub version: String,
}

impl AppState {
    pub fn new(help_desk: HelpDesk) -> Self {
        Self {
            help_desk: Arc::new(help_desk),
            version: get_version(),
        }
    }
}

/// Notification channels enabled by `config`, console first.
pub fn build_channels(config: &Config) -> Result<Vec<Arc<dyn NotificationChannel>>> {
    let mut channels: Vec<Arc<dyn NotificationChannel>> = Vec::new();
    if config.console_notifications {
        channels.push(Arc::new(ConsoleChannel::stdout()));
    }
    if let Some(url) = &config.webhook_url {
        let webhook = WebhookChannel::new(url.clone(), config.webhook_timeout)
            .context("Failed to build webhook HTTP client")?;
        channels.push(Arc::new(webhook));
    }
    Ok(channels)
}

/// Assemble a `HelpDesk` over a single backend that stores both requests and
/// notification records.
pub fn build_help_desk<R>(
    repo: Arc<R>,
    routing: RoutingConfig,
    channels: Vec<Arc<dyn NotificationChannel>>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
) -> Result<HelpDesk>
where
    R: RequestRepository + NotificationLog + 'static,
{
    let resolver = AssignmentResolver::new(routing).context("Invalid routing configuration")?;
    let store = Arc::new(RequestStore::new(repo.clone(), clock.clone()));
    let dispatcher = NotificationDispatcher::new(channels, repo.clone(), clock.clone(), policy);
    info!(
        channels = ?dispatcher.channel_kinds(),
        supervisors = resolver.supervisors().len(),
        "Help desk assembled"
    );
    Ok(HelpDesk::new(store, resolver, dispatcher, repo, clock))
}
