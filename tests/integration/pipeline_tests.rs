use super::*;
use price_watcher::models::{ChannelKind, NewAlert, NewProduct};
use price_watcher::TriggerSource;
use rust_decimal::Decimal;
use serde_json::json;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::body_partial_json;

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

#[tokio::test]
async fn test_price_drop_is_recorded_and_notified_once() -> anyhow::Result<()> {
    let shop = MockServer::start().await;
    let telegram = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(format!("/bot{}/sendMessage", TELEGRAM_TOKEN)))
        .and(body_partial_json(json!({ "chat_id": TELEGRAM_CHAT })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&telegram)
        .await;

    let (app, _dir) = create_test_app(get_test_config(Some(&telegram.uri()))).await?;

    // 1. Track the product at its current price
    serve_page(&shop, "/fone", product_page("Fone Bluetooth", "1299.90")).await;
    let product = app
        .add_product(NewProduct {
            url: format!("{}/fone", shop.uri()),
            name: None,
        })
        .await?;
    assert_eq!(product.name, "Fone Bluetooth");
    assert_eq!(product.current_price, dec("1299.90"));
    assert_eq!(product.currency, "BRL");

    // 2. Alert below the current price
    let alert = app
        .add_alert(NewAlert {
            product_id: product.id.clone(),
            target_price: dec("1200"),
            channels: vec![ChannelKind::Telegram],
            recipient: None,
        })
        .await?;

    // 3. The price drops past the target
    serve_page(&shop, "/fone", product_page("Fone Bluetooth", "1199.00")).await;
    let report = app
        .monitor
        .run_cycle(TriggerSource::Manual, &CancellationToken::new())
        .await?;

    assert_eq!(report.checked, 1);
    assert_eq!(report.updated, 1);
    assert_eq!(report.alerts_fired, 1);
    assert_eq!(report.notifications_failed, 0);

    let stored = app.storage.get_product(&product.id).await?.unwrap();
    assert_eq!(stored.current_price, dec("1199.00"));
    assert!(stored.updated_at >= product.updated_at);

    let alerts = app.storage.get_active_alerts(&product.id).await?;
    assert_eq!(alerts[0].id, alert.id);
    assert!(alerts[0].notified_at.is_some());

    // 4. Same price on the next cycle: no history, no second message
    let report = app
        .monitor
        .run_cycle(TriggerSource::Manual, &CancellationToken::new())
        .await?;
    assert_eq!(report.unchanged, 1);
    assert_eq!(report.alerts_fired, 0);

    let history = app.history(&product.id, None).await?;
    let prices: Vec<Decimal> = history.iter().map(|h| h.price).collect();
    assert_eq!(prices, vec![dec("1299.90"), dec("1199.00")]);

    Ok(())
}

#[tokio::test]
async fn test_failing_site_does_not_stop_the_cycle() -> anyhow::Result<()> {
    let shop = MockServer::start().await;
    let (app, _dir) = create_test_app(get_test_config(None)).await?;

    serve_page(&shop, "/a", product_page("Produto A", "10.00")).await;
    let a = app
        .add_product(NewProduct {
            url: format!("{}/a", shop.uri()),
            name: None,
        })
        .await?;
    serve_page(&shop, "/b", product_page("Produto B", "20.00")).await;
    let b = app
        .add_product(NewProduct {
            url: format!("{}/b", shop.uri()),
            name: None,
        })
        .await?;

    // Only /a answers now; /b falls through to wiremock's 404.
    serve_page(&shop, "/a", product_page("Produto A", "8.50")).await;
    let report = app
        .monitor
        .run_cycle(TriggerSource::Manual, &CancellationToken::new())
        .await?;

    assert_eq!(report.checked, 2);
    assert_eq!(report.updated, 1);
    assert_eq!(report.failed, 1);

    // The failed product keeps its last known price.
    assert_eq!(app.storage.get_product(&a.id).await?.unwrap().current_price, dec("8.50"));
    assert_eq!(app.storage.get_product(&b.id).await?.unwrap().current_price, dec("20.00"));

    Ok(())
}

#[tokio::test]
async fn test_deleted_product_takes_history_and_alerts_with_it() -> anyhow::Result<()> {
    let shop = MockServer::start().await;
    let (app, _dir) = create_test_app(get_test_config(None)).await?;

    serve_page(&shop, "/x", product_page("Produto X", "99.90")).await;
    let product = app
        .add_product(NewProduct {
            url: format!("{}/x", shop.uri()),
            name: Some("Meu produto".to_string()),
        })
        .await?;
    assert_eq!(product.name, "Meu produto");

    app.add_alert(NewAlert {
        product_id: product.id.clone(),
        target_price: dec("50"),
        channels: vec![ChannelKind::Email],
        recipient: Some("eu@example.com".to_string()),
    })
    .await?;

    assert!(app.storage.delete_product(&product.id).await?);
    assert!(app.history(&product.id, None).await?.is_empty());
    assert!(app.storage.get_active_alerts(&product.id).await?.is_empty());
    assert!(app.list_products().await?.is_empty());

    Ok(())
}
