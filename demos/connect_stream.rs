use std::error::Error;
use std::time::Duration;

use featurestream_sdk::stream::{
    EventHandler, HandlerRegistry, Platform, StreamConfig, StreamConnection, StreamEventName,
};
use secrecy::SecretString;
use serde_json::json;
use tokio::sync::mpsc;

fn main() -> Result<(), Box<dyn Error>> {
    let base_url = "REPLACE_WITH_STREAM_BASE_URL".to_string();
    let environment_id = "REPLACE_WITH_CLIENT_SIDE_ID".to_string();
    let secure_mode_hash = "REPLACE_WITH_SECURE_MODE_HASH".to_string();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let config = StreamConfig::new(&base_url, environment_id)?
            .with_secure_mode_hash(SecretString::new(secure_mode_hash))
            .with_reconnect_delay(Duration::from_secs(1));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let put_tx = tx.clone();
        let handlers = HandlerRegistry::new()
            .on(
                StreamEventName::Put,
                EventHandler::json(move |flags| {
                    let _ = put_tx.send(format!("put {flags}"));
                }),
            )
            .on(
                StreamEventName::Patch,
                EventHandler::json(move |flag| {
                    let _ = tx.send(format!("patch {flag}"));
                }),
            );

        let connection = StreamConnection::new(config, Platform::http())?;
        connection.connect(json!({"key": "example-user"}), handlers);

        while let Some(update) = rx.recv().await {
            println!("connected={} {update}", connection.is_connected());
        }

        connection.disconnect();
        Ok::<(), Box<dyn Error>>(())
    })
}
