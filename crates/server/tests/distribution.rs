//! End-to-end tests of the distribution server over a real socket

use common::{Amount, Side, UserId};
use futures_util::{SinkExt, StreamExt};
use matching_engine::{EngineConfig, Exchange, NewOrder};
use server::distribution::issue_token;
use server::{DistributionHub, Server, ServerConfig, ServerExt, WebSocketServer};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SECRET: &str = "integration-secret";

fn engine_config() -> EngineConfig {
    EngineConfig {
        pairs: vec![config::PairConfig {
            symbol: "BTC-USDT".into(),
            price_decimals: 2,
            amount_decimals: 4,
            min_amount: "0.0001".into(),
            enabled: true,
        }],
        batch: config::BatchConfig {
            flush_interval_ms: 1,
            ..Default::default()
        },
        ..Default::default()
    }
}

async fn start() -> (Arc<Exchange>, String, tokio_util::sync::CancellationToken) {
    let exchange = Exchange::start(engine_config()).await.unwrap();
    let distribution = config::DistributionConfig {
        auth: config::DistributionAuthConfig {
            jwt_secret: SECRET.into(),
            ..Default::default()
        },
        ..Default::default()
    };
    let hub = Arc::new(DistributionHub::new(Arc::clone(&exchange), distribution));
    let server = WebSocketServer::new(ServerConfig::websocket_only("127.0.0.1", 0), hub);
    let probe = server.clone();
    let (_handle, token) = server.spawn();

    for _ in 0..100 {
        if let Some(addr) = probe.address() {
            return (exchange, format!("ws://{}", addr), token);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("distribution server did not bind");
}

async fn send(client: &mut Client, json: serde_json::Value) {
    client.send(Message::Text(json.to_string())).await.unwrap();
}

/// Next JSON frame, skipping transport-level frames
async fn recv(client: &mut Client) -> serde_json::Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection ended")
            .unwrap();
        match frame {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Close(_) => return serde_json::json!({ "type": "close" }),
            _ => continue,
        }
    }
}

fn limit(user: &str, side: Side, price: &str, amount: &str) -> NewOrder {
    NewOrder {
        user_id: UserId::new(user).unwrap(),
        pair: "BTC-USDT".parse().unwrap(),
        side,
        order_type: Default::default(),
        price: Some(price.parse::<Amount>().unwrap()),
        amount: amount.parse().unwrap(),
        expires_at: None,
    }
}

#[tokio::test]
async fn test_book_and_trade_updates_reach_subscribers() {
    let (exchange, url, token) = start().await;
    let (mut client, _) = connect_async(url.as_str()).await.unwrap();

    send(
        &mut client,
        serde_json::json!({ "type": "subscribe", "channels": ["book:BTC-USDT", "trades:BTC-USDT"] }),
    )
    .await;
    assert_eq!(recv(&mut client).await["type"], "subscribed");
    let initial = recv(&mut client).await;
    assert_eq!(initial["channel"], "book:BTC-USDT");

    exchange.submit_order(limit("alice", Side::Sell, "100", "1")).await.unwrap();
    exchange.submit_order(limit("bob", Side::Buy, "100", "0.4")).await.unwrap();

    let mut saw_trade = false;
    let mut last_book = serde_json::Value::Null;
    for _ in 0..10 {
        let frame = recv(&mut client).await;
        match frame["channel"].as_str() {
            Some("trades:BTC-USDT") => {
                assert_eq!(frame["payload"]["price"], "100");
                assert_eq!(frame["payload"]["amount"], "0.4");
                saw_trade = true;
            }
            Some("book:BTC-USDT") => last_book = frame["payload"].clone(),
            _ => {}
        }
        if saw_trade && last_book["asks"][0]["amount"] == "0.6" {
            break;
        }
    }
    assert!(saw_trade);
    assert_eq!(last_book["asks"][0]["amount"], "0.6");

    token.cancel();
}

#[tokio::test]
async fn test_private_orders_channel() {
    let (exchange, url, token) = start().await;
    let (mut client, _) = connect_async(url.as_str()).await.unwrap();

    let jwt = issue_token(SECRET, &UserId::new("alice").unwrap(), None, Duration::from_secs(60)).unwrap();
    send(&mut client, serde_json::json!({ "type": "auth", "token": jwt })).await;
    assert_eq!(recv(&mut client).await["type"], "authenticated");

    send(
        &mut client,
        serde_json::json!({ "type": "subscribe", "channels": ["orders:alice"] }),
    )
    .await;
    assert_eq!(recv(&mut client).await["type"], "subscribed");

    exchange.submit_order(limit("alice", Side::Buy, "99", "1")).await.unwrap();
    exchange.submit_order(limit("bob", Side::Buy, "98", "1")).await.unwrap();

    let update = recv(&mut client).await;
    assert_eq!(update["channel"], "orders:alice");
    assert_eq!(update["payload"]["event"], "order_added");
    assert_eq!(update["payload"]["order"]["user_id"], "alice");

    token.cancel();
}

#[tokio::test]
async fn test_bad_token_closes_connection() {
    let (_exchange, url, token) = start().await;
    let (mut client, _) = connect_async(url.as_str()).await.unwrap();

    send(&mut client, serde_json::json!({ "type": "auth", "token": "forged" })).await;
    assert_eq!(recv(&mut client).await["type"], "error");
    assert_eq!(recv(&mut client).await["type"], "close");

    token.cancel();
}

#[tokio::test]
async fn test_ping_and_invalid_channel() {
    let (_exchange, url, token) = start().await;
    let (mut client, _) = connect_async(url.as_str()).await.unwrap();

    send(&mut client, serde_json::json!({ "type": "ping" })).await;
    assert_eq!(recv(&mut client).await["type"], "pong");

    send(
        &mut client,
        serde_json::json!({ "type": "subscribe", "channels": ["ticker:BTC-USDT"] }),
    )
    .await;
    let error = recv(&mut client).await;
    assert_eq!(error["type"], "error");
    assert!(error["message"].as_str().unwrap().contains("ticker:BTC-USDT"));

    token.cancel();
}
