//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! store / sink / clock / id 生成器と handler を受け取り、`build()` で
//! config と登録漏れを検証してから dispatcher と 3 つの background loop を起動する。
//! 未指定の store は InMemoryStore になる。

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::catalog::Catalog;
use super::config::{ConfigError, RuntimeConfig};
use super::dispatcher::Dispatcher;
use super::gc_loop::GCLoop;
use super::publisher_loop::PublisherLoop;
use super::reaper_loop::ReaperLoop;
use super::runtime::Runtime;
use super::tasks::{AgentRun, NotificationDelivery, PaymentCharge, PaymentRefund};
use super::terminal::TerminalWriter;
use crate::impls::InMemoryStore;
use crate::impls::handlers::{
    AgentExecutionHandler, NotificationHandler, PaymentHandler, RefundHandler, SimulationConfig,
};
use crate::ports::{
    CatalogStore, Clock, EventSink, IdGenerator, NoopEventSink, RecordStore, SystemClock,
    UlidGenerator,
};
use crate::typed::{Handler, RegistryError, Task, TypedRegistry};

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new(RuntimeConfig::default())
///     .with_store(Arc::new(SqliteStore::connect("sqlite://vagais.db").await?))
///     .with_builtin_handlers(SimulationConfig::default())
///     .register::<MyTask, _>(MyTaskHandler)?
///     .expect_tasks(&["my_namespace.my_task.v1"])
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - 設定値は build() 時に検証
/// - expect_tasks() で期待される task_type を登録
/// - build() 時に「期待集合 ⊆ 登録済み集合」をチェック
pub struct AppBuilder {
    config: RuntimeConfig,
    registry: TypedRegistry,
    expected_tasks: Option<Vec<String>>,
    records: Option<Arc<dyn RecordStore>>,
    catalog: Option<Arc<dyn CatalogStore>>,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    ids: Option<Arc<dyn IdGenerator>>,
    simulation: Option<SimulationConfig>,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing task types: {0:?}. These tasks were expected but not registered.")]
    MissingTaskTypes(Vec<String>),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("invalid runtime config: {0}")]
    Config(#[from] ConfigError),
}

impl AppBuilder {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            registry: TypedRegistry::new(),
            expected_tasks: None,
            records: None,
            catalog: None,
            sink: Arc::new(NoopEventSink),
            clock: Arc::new(SystemClock),
            ids: None,
            simulation: None,
        }
    }

    /// One store for both records and the catalog.
    pub fn with_store<S>(self, store: Arc<S>) -> Self
    where
        S: RecordStore + CatalogStore + 'static,
    {
        let records: Arc<dyn RecordStore> = store.clone();
        let catalog: Arc<dyn CatalogStore> = store;
        self.with_record_store(records).with_catalog_store(catalog)
    }

    pub fn with_record_store(mut self, records: Arc<dyn RecordStore>) -> Self {
        self.records = Some(records);
        self
    }

    pub fn with_catalog_store(mut self, catalog: Arc<dyn CatalogStore>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Register the simulated execution / payment / refund / notification
    /// handlers at build time.
    pub fn with_builtin_handlers(mut self, simulation: SimulationConfig) -> Self {
        self.simulation = Some(simulation);
        self
    }

    /// Handler を登録
    pub fn register<T: Task, H: Handler<T> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.registry.register::<T, H>(handler)?;
        Ok(self)
    }

    /// 期待される task_type のリストを設定
    pub fn expect_tasks(mut self, task_types: &[&str]) -> Self {
        self.expected_tasks = Some(task_types.iter().map(|t| t.to_string()).collect());
        self
    }

    /// 検証してから dispatcher と background loop を起動する
    ///
    /// tokio runtime の中で呼ぶこと（worker を spawn するため）
    pub fn build(mut self) -> Result<App, BuildError> {
        self.config.validate()?;

        let (records, catalog) = match (self.records.take(), self.catalog.take()) {
            (Some(records), Some(catalog)) => (records, catalog),
            (records, catalog) => {
                let memory = Arc::new(InMemoryStore::new());
                (
                    records.unwrap_or_else(|| memory.clone()),
                    catalog.unwrap_or(memory),
                )
            }
        };
        let clock = self.clock;
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));

        if let Some(simulation) = self.simulation {
            self.registry.register::<AgentRun, _>(AgentExecutionHandler::new(
                Arc::clone(&catalog),
                Arc::clone(&clock),
                simulation.execution_delay,
            ))?;
            self.registry
                .register::<PaymentCharge, _>(PaymentHandler::new(simulation.payment_delay))?;
            self.registry
                .register::<PaymentRefund, _>(RefundHandler::new(simulation.refund_delay))?;
            self.registry
                .register::<NotificationDelivery, _>(NotificationHandler::new(
                    simulation.email_delay,
                    simulation.sms_delay,
                ))?;
        }

        if let Some(expected_tasks) = &self.expected_tasks {
            let missing_tasks: Vec<String> = expected_tasks
                .iter()
                .filter(|t| !self.registry.contains(t))
                .cloned()
                .collect();
            if !missing_tasks.is_empty() {
                return Err(BuildError::MissingTaskTypes(missing_tasks));
            }
        }
        let registry = Arc::new(self.registry);
        let config = self.config;

        let (events_tx, events_rx) = mpsc::channel(config.event_buffer);
        let writer = Arc::new(TerminalWriter::new(
            Arc::clone(&records),
            Arc::clone(&catalog),
            Arc::clone(&clock),
            events_tx,
        ));
        let dispatcher = Arc::new(Dispatcher::spawn(&config, Arc::clone(&writer)));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let loops = vec![
            tokio::spawn(
                PublisherLoop::new(events_rx, self.sink, config.webhook_retry.clone())
                    .run(shutdown_rx.clone()),
            ),
            tokio::spawn(
                ReaperLoop::new(
                    Arc::clone(&records),
                    Arc::clone(&writer),
                    Arc::clone(&dispatcher),
                    Arc::clone(&clock),
                    config.stale_after,
                    config.reap_interval,
                    config.reap_batch,
                )
                .run(shutdown_rx.clone()),
            ),
            tokio::spawn(
                GCLoop::new(
                    Arc::clone(&records),
                    Arc::clone(&clock),
                    config.retention,
                    config.gc_interval,
                )
                .run(shutdown_rx),
            ),
        ];

        let runtime = Arc::new(Runtime::new(
            records,
            Arc::clone(&catalog),
            Arc::clone(&registry),
            Arc::clone(&dispatcher),
            writer,
            Arc::clone(&ids),
            Arc::clone(&clock),
        ));
        let catalog = Arc::new(Catalog::new(catalog, ids, clock));

        info!(task_types = ?registry.registered_types(), "app built");
        Ok(App {
            runtime,
            catalog,
            dispatcher,
            shutdown_tx,
            loops,
        })
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

/// App は組み立て済みのサービス一式
pub struct App {
    pub runtime: Arc<Runtime>,
    pub catalog: Arc<Catalog>,
    dispatcher: Arc<Dispatcher>,
    shutdown_tx: watch::Sender<bool>,
    loops: Vec<JoinHandle<()>>,
}

impl App {
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Drain the dispatcher, then stop the background loops.
    pub async fn shutdown(self) {
        self.dispatcher.shutdown().await;
        self.shutdown_tx.send_replace(true);
        for join in self.loops {
            if let Err(err) = join.await {
                error!(error = %err, "background loop terminated abnormally");
            }
        }
        info!("app stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Actor, NewAgent, RecordKind, SubjectId, UserId};
    use crate::ports::FixedClock;
    use crate::typed::testing::{EchoHandler, EchoTask, FlakyTask};
    use chrono::{TimeZone, Utc};
    use ulid::Ulid;

    #[tokio::test]
    async fn build_success() {
        let app = AppBuilder::default()
            .register::<EchoTask, _>(EchoHandler::default())
            .unwrap()
            .expect_tasks(&[EchoTask::TYPE])
            .build();
        assert!(app.is_ok());
        app.unwrap().shutdown().await;
    }

    #[tokio::test]
    async fn build_missing_task_types() {
        let app = AppBuilder::default()
            .register::<EchoTask, _>(EchoHandler::default())
            .unwrap()
            .expect_tasks(&[EchoTask::TYPE, FlakyTask::TYPE])
            .build();
        assert!(matches!(
            app,
            Err(BuildError::MissingTaskTypes(missing)) if missing == vec![FlakyTask::TYPE.to_string()]
        ));
    }

    #[tokio::test]
    async fn builtin_handlers_cover_every_record_kind() {
        let app = AppBuilder::default()
            .with_builtin_handlers(SimulationConfig::instant())
            .expect_tasks(&[
                AgentRun::TYPE,
                PaymentCharge::TYPE,
                PaymentRefund::TYPE,
                NotificationDelivery::TYPE,
            ])
            .build()
            .unwrap();
        app.shutdown().await;
    }

    #[tokio::test]
    async fn invalid_config_fails_fast() {
        let config = RuntimeConfig {
            queue_capacity: 0,
            ..RuntimeConfig::default()
        };
        let app = AppBuilder::new(config).build();
        assert!(matches!(app, Err(BuildError::Config(ConfigError::Zero("queue_capacity")))));
    }

    #[tokio::test]
    async fn injected_clock_and_ids_reach_every_write() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let clock = Arc::new(FixedClock::new(t0));
        let ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        let app = AppBuilder::default()
            .with_clock(clock)
            .with_id_generator(ids)
            .register::<EchoTask, _>(EchoHandler::replying(serde_json::json!({"ok": true})))
            .unwrap()
            .build()
            .unwrap();
        let actor = Actor::new(UserId::from_ulid(Ulid::new()));

        let record = app
            .runtime
            .submit(&actor, RecordKind::Payment, SubjectId::new("stripe"), &EchoTask { x: 1 })
            .await
            .unwrap();
        assert_eq!(record.created_at, t0);
        assert_eq!(
            record.id.as_ulid().timestamp_ms(),
            t0.timestamp_millis() as u64
        );

        let agent = app
            .catalog
            .register_agent(
                &actor,
                NewAgent {
                    name: "clocked".into(),
                    description: String::new(),
                    is_public: true,
                    is_enabled: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(agent.created_at, t0);
        assert_eq!(agent.id.as_ulid().timestamp_ms(), t0.timestamp_millis() as u64);
        app.shutdown().await;
    }
}
