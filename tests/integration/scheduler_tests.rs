use super::*;
use price_watcher::models::NewProduct;
use price_watcher::scheduler::{MonitorScheduler, TriggerOutcome};
use price_watcher::TriggerSource;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scheduler_runs_startup_cycle() -> anyhow::Result<()> {
    let shop = MockServer::start().await;
    let mut config = get_test_config(None);
    config.scheduler.run_on_startup = true;
    let (app, _dir) = create_test_app(config).await?;

    serve_page(&shop, "/lamp", product_page("Luminária", "150.00")).await;
    let product = app
        .add_product(NewProduct {
            url: format!("{}/lamp", shop.uri()),
            name: None,
        })
        .await?;
    serve_page(&shop, "/lamp", product_page("Luminária", "129.00")).await;

    let mut scheduler = MonitorScheduler::new(app.monitor.clone(), &app.config.scheduler).await?;
    scheduler.start().await?;

    let mut completed = false;
    for _ in 0..100 {
        if scheduler.stats().await.cycles_completed >= 1 {
            completed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(completed, "startup cycle did not complete");

    let stats = scheduler.stats().await;
    assert_eq!(stats.last_report.as_ref().map(|r| r.trigger), Some(TriggerSource::Startup));
    assert_eq!(stats.last_report.as_ref().map(|r| r.updated), Some(1));
    assert_eq!(
        app.storage.get_product(&product.id).await?.unwrap().current_price,
        "129.00".parse::<rust_decimal::Decimal>()?
    );

    scheduler.shutdown().await?;
    assert_eq!(scheduler.trigger(TriggerSource::Manual), TriggerOutcome::Stopped);

    Ok(())
}
