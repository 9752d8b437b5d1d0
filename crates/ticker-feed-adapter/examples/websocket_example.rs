/*
[INPUT]:  Ticker feed WebSocket URL and an instrument id
[OUTPUT]: Raw ticker updates printed to stdout
[POS]:    Examples - single socket without the manager
[UPDATE]: When WebSocket API changes
*/

use std::env;

use ticker_feed_adapter::ws::parse_text;
use ticker_feed_adapter::*;

/// Example: open one socket, subscribe to one instrument, print five updates.
///
/// Usage: cargo run --example websocket_example -- [INSTRUMENT] [URL]
#[tokio::main]
async fn main() -> Result<()> {
    let mut args = env::args().skip(1);
    let instrument = args.next().unwrap_or_else(|| "AAPL".to_string());
    let base = args
        .next()
        .unwrap_or_else(|| "ws://127.0.0.1:8765/ws/ticker".to_string());

    let endpoint = Endpoint::new(FeedEnvironment::Development, &base, &base)?
        .with_development_token(Some("dev-token".to_string()));
    let url = endpoint.connection_url(None);

    println!("=== Ticker WebSocket Example ===\n");
    let mut connection = WsConnector::new().connect(&url).await?;
    println!("✓ Connected to {}", url.host_str().unwrap_or_default());

    connection.send_message(&OutboundMessage::subscribe(&instrument))?;
    println!("✓ Subscribed to {instrument}\n");

    let mut received = 0;
    while received < 5 {
        let Some(event) = connection.recv().await else {
            break;
        };
        match event {
            TransportEvent::Text(text) => match parse_text(&text) {
                Some(InboundMessage::Ticker(ticker)) => {
                    received += 1;
                    println!(
                        "{} {} ({}%)",
                        ticker.instrument_key().unwrap_or("?"),
                        ticker.price,
                        ticker.effective_change_percent().round_dp(2)
                    );
                }
                Some(InboundMessage::Ping) => connection.send_message(&OutboundMessage::Pong)?,
                _ => {}
            },
            TransportEvent::Closed { code, reason } => {
                println!("server closed the socket: {code:?} {reason}");
                break;
            }
            other => println!("{other:?}"),
        }
    }

    connection.send_message(&OutboundMessage::unsubscribe(&instrument))?;
    connection.close(NORMAL_CLOSURE, "example done");
    println!("\n✓ WebSocket example complete");
    Ok(())
}
