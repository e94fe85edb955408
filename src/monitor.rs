//! One monitoring cycle: enumerate tracked products, scrape them through the
//! worker pool, commit price changes and notify on fired alerts.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::alert_evaluator::{AlertEvaluator, AlertToFire};
use crate::config::{HistoryConfig, SchedulerConfig};
use crate::dispatcher::NotificationDispatcher;
use crate::models::{Product, ProductSnapshot};
use crate::orchestrator::ScrapeOrchestrator;
use crate::price_comparator::PriceComparator;
use crate::storage::Storage;
use crate::utils::error::{ScrapeError, StorageError};
use crate::utils::telemetry::{CYCLES_TOTAL, CYCLE_DURATION_SECONDS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    Startup,
    Timer,
    Manual,
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TriggerSource::Startup => "startup",
            TriggerSource::Timer => "timer",
            TriggerSource::Manual => "manual",
        })
    }
}

#[derive(Error, Debug)]
pub enum CycleError {
    #[error("a monitoring cycle is already running")]
    AlreadyRunning,

    #[error("failed to enumerate products: {0}")]
    Storage(#[from] StorageError),
}

/// Summary of one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub trigger: TriggerSource,
    /// Products a scrape was attempted for.
    pub checked: usize,
    /// Products whose price changed.
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
    /// Products without a usable URL, or removed mid-cycle.
    pub skipped: usize,
    /// Products left unfinished at the deadline or on shutdown.
    pub abandoned: usize,
    pub alerts_fired: usize,
    pub notifications_failed: usize,
    pub duration: Duration,
    pub deadline_exceeded: bool,
    pub cancelled: bool,
}

impl CycleReport {
    fn new(trigger: TriggerSource) -> Self {
        Self {
            trigger,
            checked: 0,
            updated: 0,
            unchanged: 0,
            failed: 0,
            skipped: 0,
            abandoned: 0,
            alerts_fired: 0,
            notifications_failed: 0,
            duration: Duration::ZERO,
            deadline_exceeded: false,
            cancelled: false,
        }
    }

    fn record(&mut self, outcome: ProductOutcome) {
        match outcome {
            ProductOutcome::Updated(delivery) => {
                self.updated += 1;
                self.add_delivery(delivery);
            }
            ProductOutcome::Unchanged(delivery) => {
                self.unchanged += 1;
                self.add_delivery(delivery);
            }
            ProductOutcome::Failed => self.failed += 1,
            ProductOutcome::Vanished => self.skipped += 1,
            ProductOutcome::Abandoned => self.abandoned += 1,
        }
    }

    fn add_delivery(&mut self, delivery: Delivery) {
        self.alerts_fired += delivery.alerts_fired;
        self.notifications_failed += delivery.notifications_failed;
    }

    fn outcome_label(&self) -> &'static str {
        if self.cancelled {
            "cancelled"
        } else if self.deadline_exceeded {
            "deadline_exceeded"
        } else {
            "completed"
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Delivery {
    alerts_fired: usize,
    notifications_failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProductOutcome {
    Updated(Delivery),
    Unchanged(Delivery),
    Failed,
    Vanished,
    Abandoned,
}

type ProductMutex = Arc<tokio::sync::Mutex<()>>;

/// Per-product mutexes guarding the read-modify-write of one product.
#[derive(Default)]
struct ProductLocks {
    inner: std::sync::Mutex<HashMap<String, ProductMutex>>,
}

impl ProductLocks {
    async fn acquire(&self, product_id: &str) -> ProductLockGuard<'_> {
        let lock = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(product_id.to_string())
            .or_default()
            .clone();
        let held = Arc::clone(&lock).lock_owned().await;

        ProductLockGuard {
            locks: self,
            product_id: product_id.to_string(),
            lock,
            held: Some(held),
        }
    }
}

/// Holds one product's lock. The map entry is removed on release when no
/// other task holds or waits on it.
struct ProductLockGuard<'a> {
    locks: &'a ProductLocks,
    product_id: String,
    lock: ProductMutex,
    held: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for ProductLockGuard<'_> {
    fn drop(&mut self) {
        self.held.take();
        let mut locks = self.locks.inner.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map and one here means nobody else is waiting.
        let idle = locks
            .get(&self.product_id)
            .is_some_and(|entry| Arc::ptr_eq(entry, &self.lock) && Arc::strong_count(&self.lock) == 2);
        if idle {
            locks.remove(&self.product_id);
        }
    }
}

/// Clears the running flag when a cycle ends, including on early return.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct PriceMonitor {
    storage: Arc<dyn Storage>,
    orchestrator: Arc<ScrapeOrchestrator>,
    comparator: PriceComparator,
    evaluator: AlertEvaluator,
    dispatcher: NotificationDispatcher,
    locks: ProductLocks,
    running: AtomicBool,
    cycle_timeout: Duration,
    page_size: usize,
}

impl PriceMonitor {
    pub fn new(
        storage: Arc<dyn Storage>,
        orchestrator: Arc<ScrapeOrchestrator>,
        dispatcher: NotificationDispatcher,
        scheduler: &SchedulerConfig,
        history: &HistoryConfig,
    ) -> Self {
        Self {
            comparator: PriceComparator::new(storage.clone(), history),
            evaluator: AlertEvaluator::new(storage.clone()),
            storage,
            orchestrator,
            dispatcher,
            locks: ProductLocks::default(),
            running: AtomicBool::new(false),
            cycle_timeout: scheduler.cycle_timeout(),
            page_size: scheduler.page_size.max(1),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run one cycle. Never runs concurrently with itself; a second caller
    /// gets [`CycleError::AlreadyRunning`].
    pub async fn run_cycle(
        self: &Arc<Self>,
        trigger: TriggerSource,
        shutdown: &CancellationToken,
    ) -> Result<CycleReport, CycleError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CycleError::AlreadyRunning);
        }
        let _running = RunningGuard(&self.running);

        let started = Instant::now();
        let mut report = CycleReport::new(trigger);
        tracing::info!("Starting monitoring cycle ({})", trigger);

        let products = self.load_products().await?;
        let cycle_token = shutdown.child_token();
        let mut tasks = JoinSet::new();

        for product in products {
            if !product.has_fetchable_url() {
                tracing::debug!(product_id = %product.id, "Skipping product without a fetchable URL");
                report.skipped += 1;
                continue;
            }
            report.checked += 1;

            let monitor = Arc::clone(self);
            let token = cycle_token.clone();
            tasks.spawn(async move { monitor.process_product(product, &token).await });
        }

        let deadline = tokio::time::sleep(self.cycle_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled(), if !report.cancelled => {
                    tracing::info!("Shutdown requested, abandoning in-flight scrapes");
                    report.cancelled = true;
                    cycle_token.cancel();
                }
                _ = &mut deadline, if !report.deadline_exceeded => {
                    tracing::warn!(
                        "Cycle deadline of {}s exceeded, abandoning unfinished products",
                        self.cycle_timeout.as_secs()
                    );
                    report.deadline_exceeded = true;
                    cycle_token.cancel();
                }
                joined = tasks.join_next() => match joined {
                    Some(Ok(outcome)) => report.record(outcome),
                    Some(Err(e)) => {
                        tracing::error!("Product task failed: {}", e);
                        report.failed += 1;
                    }
                    None => break,
                },
            }
        }

        report.duration = started.elapsed();
        metrics::counter!(CYCLES_TOTAL, "outcome" => report.outcome_label()).increment(1);
        metrics::histogram!(CYCLE_DURATION_SECONDS).record(report.duration.as_secs_f64());

        tracing::info!(
            "Cycle finished in {:.1}s: checked={} updated={} unchanged={} failed={} skipped={} abandoned={} alerts={}",
            report.duration.as_secs_f64(),
            report.checked,
            report.updated,
            report.unchanged,
            report.failed,
            report.skipped,
            report.abandoned,
            report.alerts_fired
        );

        Ok(report)
    }

    async fn load_products(&self) -> Result<Vec<Product>, StorageError> {
        let mut products = Vec::new();
        let mut offset = 0;

        loop {
            let page = self.storage.list_products(self.page_size, offset).await?;
            let fetched = page.len();
            products.extend(page);
            if fetched < self.page_size {
                break;
            }
            offset += fetched;
        }

        Ok(products)
    }

    async fn process_product(&self, product: Product, cancel: &CancellationToken) -> ProductOutcome {
        let snapshot = match self.orchestrator.scrape_with_cancel(&product.url, cancel).await {
            Ok(snapshot) => snapshot,
            Err(ScrapeError::Cancelled) => return ProductOutcome::Abandoned,
            Err(e) => {
                tracing::warn!(product_id = %product.id, url = %product.url, "Scrape failed: {}", e);
                return ProductOutcome::Failed;
            }
        };

        match self.commit(&product.id, &snapshot).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(product_id = %product.id, "Failed to record price update: {}", e);
                ProductOutcome::Failed
            }
        }
    }

    /// Compare, persist and notify under the product's lock so overlapping
    /// work on one product is serialized.
    ///
    /// Fired alerts are marked pending before the price is written. Whatever
    /// fails after that point, the firing is retried on the next observation.
    async fn commit(&self, product_id: &str, snapshot: &ProductSnapshot) -> Result<ProductOutcome, StorageError> {
        let _held = self.locks.acquire(product_id).await;

        let Some(current) = self.storage.get_product(product_id).await? else {
            tracing::debug!(product_id = %product_id, "Product removed during the cycle");
            return Ok(ProductOutcome::Vanished);
        };

        let price_changed = current.current_price != snapshot.price;
        let mut fired = if price_changed {
            self.evaluator
                .evaluate(&current, current.current_price, snapshot.price)
                .await?
        } else {
            self.evaluator.evaluate_pending(&current, snapshot.price).await?
        };
        for to_fire in &mut fired {
            self.evaluator.mark_pending(to_fire).await?;
        }

        let update = self.comparator.commit(&current, snapshot).await?;
        let delivery = self.deliver(&update.product, fired).await;

        Ok(if update.price_changed {
            ProductOutcome::Updated(delivery)
        } else {
            ProductOutcome::Unchanged(delivery)
        })
    }

    async fn deliver(&self, product: &Product, fired: Vec<AlertToFire>) -> Delivery {
        let mut delivery = Delivery {
            alerts_fired: fired.len(),
            notifications_failed: 0,
        };

        for mut to_fire in fired {
            let report = self
                .dispatcher
                .dispatch(&to_fire.alert, product, to_fire.old_price)
                .await;
            delivery.notifications_failed += report.failures().len();

            if !report.any_delivered() {
                tracing::warn!(
                    alert_id = %to_fire.alert.id,
                    "No channel delivered the alert, it stays pending"
                );
                continue;
            }
            if let Err(e) = self.evaluator.mark_notified(&mut to_fire.alert).await {
                tracing::error!(
                    alert_id = %to_fire.alert.id,
                    "Alert delivered but not marked as notified, it will be sent again: {}",
                    e
                );
            }
        }

        delivery
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScraperConfig;
    use crate::fetcher::{Fetcher, RawContent};
    use crate::models::{Alert, ChannelKind, NewAlert, PriceHistoryEntry};
    use crate::plugins::traits::MockNotificationChannel;
    use crate::plugins::ExtractorRegistry;
    use crate::storage::{MemoryStorage, StorageResult};
    use crate::utils::error::{DispatchError, FetchError};
    use std::sync::atomic::AtomicUsize;
    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use url::Url;

    /// Serves `<meta itemprop="price">` pages with a price per URL path.
    #[derive(Default)]
    struct PriceBoard {
        prices: std::sync::Mutex<HashMap<String, String>>,
        delay: Duration,
    }

    impl PriceBoard {
        fn set(&self, path: &str, price: &str) {
            self.prices.lock().unwrap().insert(path.to_string(), price.to_string());
        }
    }

    #[async_trait]
    impl Fetcher for PriceBoard {
        async fn fetch(&self, url: &Url) -> Result<RawContent, FetchError> {
            tokio::time::sleep(self.delay).await;
            let price = self.prices.lock().unwrap().get(url.path()).cloned();
            match price {
                Some(price) => Ok(RawContent {
                    final_url: url.clone(),
                    status: 200,
                    body: format!(
                        r#"<html><head><title>Item</title></head><body>
                           <span itemprop="price" content="{}"></span></body></html>"#,
                        price
                    ),
                }),
                None => Err(FetchError::HttpStatus(500)),
            }
        }
    }

    struct Harness {
        storage: Arc<MemoryStorage>,
        board: Arc<PriceBoard>,
        monitor: Arc<PriceMonitor>,
    }

    fn harness(delay: Duration, cycle_timeout_secs: u64, dispatcher: NotificationDispatcher) -> Harness {
        let storage = Arc::new(MemoryStorage::new());
        let (board, monitor) = build(storage.clone(), delay, cycle_timeout_secs, dispatcher);
        Harness { storage, board, monitor }
    }

    fn build(
        storage: Arc<dyn Storage>,
        delay: Duration,
        cycle_timeout_secs: u64,
        dispatcher: NotificationDispatcher,
    ) -> (Arc<PriceBoard>, Arc<PriceMonitor>) {
        let board = Arc::new(PriceBoard {
            delay,
            ..Default::default()
        });
        let scraper = ScraperConfig {
            workers: 4,
            ..ScraperConfig::default()
        };
        let orchestrator = Arc::new(ScrapeOrchestrator::new(
            board.clone(),
            Arc::new(ExtractorRegistry::with_builtin()),
            &scraper,
        ));
        let scheduler = SchedulerConfig {
            cycle_timeout_secs,
            page_size: 2,
            ..SchedulerConfig::default()
        };
        let monitor = Arc::new(PriceMonitor::new(
            storage,
            orchestrator,
            dispatcher,
            &scheduler,
            &HistoryConfig::default(),
        ));
        (board, monitor)
    }

    async fn track(storage: &MemoryStorage, url: &str, price: i64) -> Product {
        let now = Utc::now() - chrono::Duration::hours(1);
        let product = Product {
            id: crate::models::generate_id(),
            url: url.to_string(),
            name: "Item".to_string(),
            image_url: None,
            current_price: Decimal::from(price),
            currency: "BRL".to_string(),
            is_available: true,
            site: "shop.example.xyz".to_string(),
            created_at: now,
            updated_at: now,
        };
        storage.create_product(&product).await.unwrap();
        product
    }

    async fn alert_on(storage: &MemoryStorage, product: &Product, target: i64) -> Alert {
        let alert = Alert::new(NewAlert {
            product_id: product.id.clone(),
            target_price: Decimal::from(target),
            channels: vec![ChannelKind::Email],
            recipient: Some("buyer@example.com".to_string()),
        });
        storage.create_alert(&alert).await.unwrap();
        alert
    }

    fn email_channel(sends: usize, result: Result<(), DispatchError>) -> NotificationDispatcher {
        let mut mock = MockNotificationChannel::new();
        mock.expect_kind().return_const(ChannelKind::Email);
        mock.expect_default_recipient().return_const(None::<String>);
        mock.expect_send().times(sends).returning(move |_, _, _| result.clone());

        let mut dispatcher = NotificationDispatcher::new();
        dispatcher.register(Arc::new(mock));
        dispatcher
    }

    /// Email channel that fails only on the `fail_on`-th send (zero based).
    fn email_failing_once(fail_on: usize) -> NotificationDispatcher {
        let sends = Arc::new(AtomicUsize::new(0));
        let mut mock = MockNotificationChannel::new();
        mock.expect_kind().return_const(ChannelKind::Email);
        mock.expect_default_recipient().return_const(None::<String>);
        mock.expect_send().returning(move |_, _, _| {
            if sends.fetch_add(1, Ordering::SeqCst) == fail_on {
                Err(DispatchError::Http {
                    channel: ChannelKind::Email,
                    status: 503,
                    body: String::new(),
                })
            } else {
                Ok(())
            }
        });

        let mut dispatcher = NotificationDispatcher::new();
        dispatcher.register(Arc::new(mock));
        dispatcher
    }

    async fn cycle(monitor: &Arc<PriceMonitor>) -> CycleReport {
        monitor
            .run_cycle(TriggerSource::Timer, &CancellationToken::new())
            .await
            .unwrap()
    }

    /// Delegates to [`MemoryStorage`] but fails writes of one product's price.
    struct FlakyStorage {
        inner: Arc<MemoryStorage>,
        broken: std::sync::Mutex<Option<String>>,
    }

    impl FlakyStorage {
        fn check(&self, product_id: &str) -> StorageResult<()> {
            match self.broken.lock().unwrap().as_deref() {
                Some(id) if id == product_id => Err(StorageError::Conflict("disk I/O error".into())),
                _ => Ok(()),
            }
        }
    }

    #[async_trait]
    impl Storage for FlakyStorage {
        async fn create_product(&self, product: &Product) -> StorageResult<()> {
            self.inner.create_product(product).await
        }
        async fn get_product(&self, id: &str) -> StorageResult<Option<Product>> {
            self.inner.get_product(id).await
        }
        async fn get_product_by_url(&self, url: &str) -> StorageResult<Option<Product>> {
            self.inner.get_product_by_url(url).await
        }
        async fn list_products(&self, limit: usize, offset: usize) -> StorageResult<Vec<Product>> {
            self.inner.list_products(limit, offset).await
        }
        async fn update_product(&self, product: &Product) -> StorageResult<()> {
            self.check(&product.id)?;
            self.inner.update_product(product).await
        }
        async fn delete_product(&self, id: &str) -> StorageResult<bool> {
            self.inner.delete_product(id).await
        }
        async fn append_price_history(
            &self,
            product_id: &str,
            price: Decimal,
            captured_at: chrono::DateTime<Utc>,
        ) -> StorageResult<PriceHistoryEntry> {
            self.check(product_id)?;
            self.inner.append_price_history(product_id, price, captured_at).await
        }
        async fn price_history(
            &self,
            product_id: &str,
            since: Option<chrono::DateTime<Utc>>,
        ) -> StorageResult<Vec<PriceHistoryEntry>> {
            self.inner.price_history(product_id, since).await
        }
        async fn latest_price_history(&self, product_id: &str) -> StorageResult<Option<PriceHistoryEntry>> {
            self.inner.latest_price_history(product_id).await
        }
        async fn record_price_update(
            &self,
            product: &Product,
            history: Option<&PriceHistoryEntry>,
        ) -> StorageResult<()> {
            self.check(&product.id)?;
            self.inner.record_price_update(product, history).await
        }
        async fn create_alert(&self, alert: &Alert) -> StorageResult<()> {
            self.inner.create_alert(alert).await
        }
        async fn get_active_alerts(&self, product_id: &str) -> StorageResult<Vec<Alert>> {
            self.inner.get_active_alerts(product_id).await
        }
        async fn update_alert(&self, alert: &Alert) -> StorageResult<()> {
            self.inner.update_alert(alert).await
        }
        async fn delete_alert(&self, id: &str) -> StorageResult<bool> {
            self.inner.delete_alert(id).await
        }
    }

    #[tokio::test]
    async fn test_cycle_updates_prices_and_fires_alerts() {
        let h = harness(Duration::ZERO, 60, email_channel(1, Ok(())));
        let drop = track(&h.storage, "https://shop.example.xyz/drop", 120).await;
        let steady = track(&h.storage, "https://shop.example.xyz/steady", 50).await;
        track(&h.storage, "https://shop.example.xyz/broken", 10).await;
        track(&h.storage, "", 10).await;
        let alert = alert_on(&h.storage, &drop, 100).await;

        h.board.set("/drop", "95.00");
        h.board.set("/steady", "50");

        let report = h
            .monitor
            .run_cycle(TriggerSource::Manual, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.checked, 3);
        assert_eq!(report.updated, 1);
        assert_eq!(report.unchanged, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.alerts_fired, 1);
        assert_eq!(report.notifications_failed, 0);
        assert!(!report.deadline_exceeded);

        let stored = h.storage.get_product(&drop.id).await.unwrap().unwrap();
        assert_eq!(stored.current_price, Decimal::from(95));
        assert_eq!(h.storage.price_history(&drop.id, None).await.unwrap().len(), 1);
        assert!(h.storage.price_history(&steady.id, None).await.unwrap().is_empty());

        let alerts = h.storage.alerts_for(&drop.id).await;
        assert_eq!(alerts[0].id, alert.id);
        assert!(alerts[0].notified_at.is_some());

        // Same prices again: nothing changes and the alert stays quiet.
        let report = h
            .monitor
            .run_cycle(TriggerSource::Timer, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.updated, 0);
        assert_eq!(report.unchanged, 2);
        assert_eq!(h.storage.price_history(&drop.id, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_undelivered_alert_stays_armed() {
        let failure = Err(DispatchError::Transport {
            channel: ChannelKind::Email,
            message: "connection refused".into(),
        });
        let h = harness(Duration::ZERO, 60, email_channel(1, failure));
        let product = track(&h.storage, "https://shop.example.xyz/p", 120).await;
        alert_on(&h.storage, &product, 100).await;
        h.board.set("/p", "90");

        let report = h
            .monitor
            .run_cycle(TriggerSource::Manual, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.alerts_fired, 1);
        assert_eq!(report.notifications_failed, 1);
        let alert = &h.storage.alerts_for(&product.id).await[0];
        assert!(alert.notified_at.is_none());
        assert_eq!(alert.pending_from, Some(Decimal::from(120)));
    }

    #[tokio::test]
    async fn test_failed_delivery_after_rearm_is_retried() {
        // The second send (the 110 -> 95 crossing) fails.
        let h = harness(Duration::ZERO, 60, email_failing_once(1));
        let product = track(&h.storage, "https://shop.example.xyz/p", 120).await;
        alert_on(&h.storage, &product, 100).await;

        let mut observed = Vec::new();
        for price in ["90", "110", "95", "95", "85", "80"] {
            h.board.set("/p", price);
            let report = cycle(&h.monitor).await;
            observed.push((price, report.alerts_fired, report.notifications_failed));
        }

        assert_eq!(
            observed,
            vec![
                ("90", 1, 0),
                ("110", 0, 0),
                ("95", 1, 1),
                // Unchanged price, but the episode is still undelivered.
                ("95", 1, 0),
                ("85", 0, 0),
                ("80", 0, 0),
            ]
        );
        let alert = &h.storage.alerts_for(&product.id).await[0];
        assert!(alert.notified_at.is_some());
        assert!(!alert.is_pending());
    }

    #[tokio::test]
    async fn test_storage_failure_only_fails_that_product() {
        let inner = Arc::new(MemoryStorage::new());
        let storage = Arc::new(FlakyStorage {
            inner: inner.clone(),
            broken: std::sync::Mutex::new(None),
        });
        let (board, monitor) = build(storage.clone(), Duration::ZERO, 60, email_channel(1, Ok(())));

        let broken = track(&inner, "https://shop.example.xyz/broken", 120).await;
        let a = track(&inner, "https://shop.example.xyz/a", 50).await;
        let b = track(&inner, "https://shop.example.xyz/b", 60).await;
        alert_on(&inner, &broken, 100).await;
        board.set("/broken", "90");
        board.set("/a", "45");
        board.set("/b", "55");
        *storage.broken.lock().unwrap() = Some(broken.id.clone());

        let report = cycle(&monitor).await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.updated, 2);
        assert_eq!(report.alerts_fired, 0);
        assert_eq!(inner.get_product(&a.id).await.unwrap().unwrap().current_price, Decimal::from(45));
        assert_eq!(inner.get_product(&b.id).await.unwrap().unwrap().current_price, Decimal::from(55));
        assert_eq!(inner.get_product(&broken.id).await.unwrap().unwrap().current_price, Decimal::from(120));
        assert!(inner.alerts_for(&broken.id).await[0].is_pending());

        // Once writes succeed again the change and its alert go through.
        *storage.broken.lock().unwrap() = None;
        let report = cycle(&monitor).await;
        assert_eq!(report.updated, 1);
        assert_eq!(report.alerts_fired, 1);
        assert!(inner.alerts_for(&broken.id).await[0].notified_at.is_some());
    }

    #[tokio::test]
    async fn test_future_updated_at_does_not_freeze_price() {
        let h = harness(Duration::ZERO, 60, NotificationDispatcher::new());
        let mut product = track(&h.storage, "https://shop.example.xyz/p", 100).await;
        product.updated_at = Utc::now() + chrono::Duration::hours(1);
        h.storage.update_product(&product).await.unwrap();
        h.board.set("/p", "50");

        let report = cycle(&h.monitor).await;
        assert_eq!(report.updated, 1);
        let stored = h.storage.get_product(&product.id).await.unwrap().unwrap();
        assert_eq!(stored.current_price, Decimal::from(50));
    }

    #[tokio::test]
    async fn test_cycle_never_overlaps() {
        let h = harness(Duration::from_millis(300), 60, NotificationDispatcher::new());
        track(&h.storage, "https://shop.example.xyz/slow", 10).await;
        h.board.set("/slow", "10");

        let monitor = h.monitor.clone();
        let first = tokio::spawn(async move {
            monitor
                .run_cycle(TriggerSource::Timer, &CancellationToken::new())
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.monitor.is_running());
        let second = h
            .monitor
            .run_cycle(TriggerSource::Manual, &CancellationToken::new())
            .await;
        assert!(matches!(second, Err(CycleError::AlreadyRunning)));

        assert!(first.await.unwrap().is_ok());
        assert!(!h.monitor.is_running());
    }

    #[tokio::test]
    async fn test_deadline_abandons_unfinished_products() {
        let h = harness(Duration::from_secs(30), 1, NotificationDispatcher::new());
        let product = track(&h.storage, "https://shop.example.xyz/hang", 10).await;
        h.board.set("/hang", "5");

        let started = Instant::now();
        let report = h
            .monitor
            .run_cycle(TriggerSource::Timer, &CancellationToken::new())
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(report.deadline_exceeded);
        assert_eq!(report.abandoned, 1);
        let stored = h.storage.get_product(&product.id).await.unwrap().unwrap();
        assert_eq!(stored.current_price, Decimal::from(10));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight_scrapes() {
        let h = harness(Duration::from_secs(30), 600, NotificationDispatcher::new());
        track(&h.storage, "https://shop.example.xyz/a", 10).await;
        track(&h.storage, "https://shop.example.xyz/b", 10).await;
        track(&h.storage, "https://shop.example.xyz/c", 10).await;

        let shutdown = CancellationToken::new();
        let canceller = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let report = h.monitor.run_cycle(TriggerSource::Timer, &shutdown).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.abandoned, 3);
    }

    #[tokio::test]
    async fn test_product_locks_serialize_and_are_released() {
        let locks = Arc::new(ProductLocks::default());
        let first = locks.acquire("p1").await;
        let _other = locks.acquire("p2").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _second = locks.acquire("p1").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        // Released while someone waits: the entry stays for the waiter.
        drop(first);
        assert!(locks.inner.lock().unwrap().contains_key("p1"));
        waiter.await.unwrap();

        assert!(!locks.inner.lock().unwrap().contains_key("p1"));
        assert_eq!(locks.inner.lock().unwrap().len(), 1);
    }
}
