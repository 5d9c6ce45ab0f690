// Websocket account subscriptions.
use crate::{
    address::Pubkey,
    error::{
        ClientError,
        Result,
    },
    remote::AccountUpdates,
};
use futures::StreamExt;
use solana_account_decoder::UiAccountEncoding;
use solana_client::{
    nonblocking::pubsub_client::PubsubClient,
    rpc_config::RpcAccountInfoConfig,
};
use solana_sdk::commitment_config::CommitmentConfig;
use std::time::Duration;
use tokio::{
    sync::{
        mpsc,
        oneshot,
    },
    time,
};
use tracing::{
    debug,
    info,
};

const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

fn account_config() -> RpcAccountInfoConfig {
    RpcAccountInfoConfig {
        encoding: Some(UiAccountEncoding::Base64),
        commitment: Some(CommitmentConfig::confirmed()),
        ..RpcAccountInfoConfig::default()
    }
}

/// Open an account subscription for `address` and forward every notification's raw data.
/// Returns once the node has acknowledged the subscription.
pub async fn subscribe_account(ws_url: &str, address: &Pubkey) -> Result<AccountUpdates> {
    let (ready_tx, ready_rx) = oneshot::channel();
    let (sender, receiver) = mpsc::unbounded_channel();
    let url = ws_url.to_owned();
    let address = *address;

    let reader = tokio::spawn(async move {
        let client = match PubsubClient::new(&url).await {
            Ok(client) => client,
            Err(err) => {
                let _ = ready_tx.send(Err(ClientError::Transport(format!(
                    "websocket connect: {err}"
                ))));
                return;
            }
        };
        let (mut stream, unsubscribe) =
            match client.account_subscribe(&address, Some(account_config())).await {
                Ok(subscription) => subscription,
                Err(err) => {
                    let _ = ready_tx.send(Err(ClientError::classify_message(&err.to_string())));
                    return;
                }
            };
        if ready_tx.send(Ok(())).is_ok() {
            info!(%address, "account subscription active");
            while let Some(notification) = stream.next().await {
                match notification.value.data.decode() {
                    Some(data) => {
                        if sender.send(data).is_err() {
                            break;
                        }
                    }
                    None => debug!("ignoring notification in an unexpected encoding"),
                }
            }
        }
        drop(stream);
        unsubscribe().await;
        if let Err(err) = client.shutdown().await {
            debug!(%err, "websocket shutdown failed");
        }
        info!(%address, "account subscription closed");
    });

    match time::timeout(SUBSCRIBE_TIMEOUT, ready_rx).await {
        Ok(Ok(Ok(()))) => Ok(AccountUpdates::new(receiver, Some(reader))),
        Ok(Ok(Err(err))) => Err(err),
        Ok(Err(_)) => Err(ClientError::Transport(
            "subscription task ended before subscribing".into(),
        )),
        Err(_) => {
            reader.abort();
            Err(ClientError::Transport("account subscription timed out".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;

    #[test]
    fn account_config__requests_base64_at_confirmed() {
        let config = account_config();

        assert_eq!(config.encoding, Some(UiAccountEncoding::Base64));
        assert_eq!(config.commitment, Some(CommitmentConfig::confirmed()));
    }

    #[tokio::test]
    async fn subscribe_account__nothing_listening__is_transport_error() {
        let err = subscribe_account("ws://127.0.0.1:1", &Pubkey::new_unique())
            .await
            .unwrap_err();

        assert!(err.is_transient());
    }
}
