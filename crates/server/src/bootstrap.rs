use std::sync::Arc;

use async_trait::async_trait;
use maimai_agent::{
    ConversationRuntime, FastPathResponder, GatewayError, GatewaySet, Pipeline, RuntimeParts,
    StyleAdapter,
};
use maimai_channel::{ChannelRunner, IngressFilter, MessageHandler, NoopTransport, ReconnectPolicy};
use maimai_core::audit::{AuditSink, TracingAuditSink};
use maimai_core::config::{AppConfig, ConfigError, LoadOptions};
use maimai_core::storage::ProfileStore;
use maimai_core::{
    AdmissionController, ApplicationError, ConversationStore, FastPathClassifier, InboundMessage,
    PersonaRegistry, SessionTracker,
};
use maimai_db::{
    connect_from_config, migrations, DbPool, JsonKnowledgeLog, JsonUserStore, SqlProfileStore,
};
use thiserror::Error;
use tracing::{info, warn};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: Option<DbPool>,
    pub audit: TracingAuditSink,
    pub runtime: Arc<ConversationRuntime>,
    pub channel_runner: ChannelRunner,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("inference client setup failed: {0}")]
    Gateway(#[from] GatewayError),
    #[error("fast-path rules failed to compile: {0}")]
    Classifier(#[from] regex::Error),
}

/// Bridges the channel runner to the conversation runtime.
pub struct RuntimeHandler {
    runtime: Arc<ConversationRuntime>,
}

impl RuntimeHandler {
    pub fn new(runtime: Arc<ConversationRuntime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl MessageHandler for RuntimeHandler {
    async fn handle(&self, message: &InboundMessage) -> Option<String> {
        self.runtime.handle(message).await
    }
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let user_store = Arc::new(JsonUserStore::new(config.storage.users_path()));
    let conversations = ConversationStore::new(user_store.clone(), config.pipeline.max_history);
    let users = match conversations.load().await {
        Ok(users) => users,
        Err(error) => {
            let quarantined = user_store.quarantine().await;
            warn!(
                event_name = "system.bootstrap.users_unreadable",
                category = ApplicationError::from(error).category().as_str(),
                path = %user_store.path().display(),
                quarantined = quarantined.is_ok(),
                "starting with no stored conversations"
            );
            0
        }
    };
    let knowledge = JsonKnowledgeLog::open_or_recover(config.storage.knowledge_path()).await;
    info!(
        event_name = "system.bootstrap.storage_loaded",
        users,
        data_dir = %config.storage.data_dir.display(),
        "conversation storage loaded"
    );

    let (db_pool, profile_store) = if config.database.enabled {
        let pool =
            connect_from_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
        migrations::run_pending(&pool).await.map_err(BootstrapError::Migration)?;
        info!(
            event_name = "system.bootstrap.database_ready",
            "profile database connected and migrated"
        );
        let store: Arc<dyn ProfileStore> = Arc::new(SqlProfileStore::new(pool.clone()));
        (Some(pool), Some(store))
    } else {
        (None, None)
    };

    let audit = TracingAuditSink::default();
    let audit_sink: Arc<dyn AuditSink> = Arc::new(audit.clone());
    let personas = Arc::new(PersonaRegistry::new(profile_store));
    let gateways = GatewaySet::from_config(&config.llm)?;
    let stage_timeout = config.pipeline.stage_timeout();
    let responder = FastPathResponder::with_gateway(gateways.primary.clone(), stage_timeout);
    let adapter = StyleAdapter::new(gateways.primary.clone(), stage_timeout);
    let pipeline = Pipeline::new(
        gateways,
        Arc::new(knowledge),
        personas.clone(),
        audit_sink.clone(),
        &config.pipeline,
    );

    let runtime = Arc::new(ConversationRuntime::new(RuntimeParts {
        sessions: SessionTracker::from_config(&config.session),
        admission: AdmissionController::from_config(&config.admission),
        classifier: FastPathClassifier::new()?,
        responder,
        pipeline,
        adapter,
        conversations,
        personas,
        audit: audit_sink,
    }));

    let channel_runner = ChannelRunner::new(
        Arc::new(NoopTransport),
        Arc::new(RuntimeHandler::new(runtime.clone())),
        ReconnectPolicy::default(),
    )
    .with_filter(IngressFilter::from_config(&config.channel));

    info!(
        event_name = "system.bootstrap.ready",
        admission_limit = runtime.admission().current_limit(),
        generation_model = config.llm.generation_model(),
        "application bootstrap complete"
    );

    Ok(Application { config, db_pool, audit, runtime, channel_runner })
}

#[cfg(test)]
pub(crate) fn test_config(data_dir: &std::path::Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.channel.bot_token = "test-bot-token".to_owned().into();
    config.llm.api_key = "test-api-key".to_owned().into();
    config.llm.base_url = "http://127.0.0.1:9".to_owned();
    config.storage.data_dir = data_dir.to_path_buf();
    config
}
