//! Websocket bridge between vote apps and the presentation's broker.
//!
//! Every text frame is a [`Frame`]. Whatever is published on any of the
//! four channels is forwarded to the socket; frames read from the socket
//! are published on their channel, except the session channel, which only
//! the presentation writes to.

use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;
use warp::ws::{Message, WebSocket};

use crate::broker::{BrokerChannel, BrokerConnection, MESSAGE_EVENT};
use crate::messaging::Channel;

type WsSender = UnboundedSender<Result<Message, warp::Error>>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Broker channel name, `lighthouse:votes` and so on
    pub channel: String,
    pub data: Value,
}

pub async fn client_connection(
    ws: WebSocket,
    client_id: String,
    connection: Arc<dyn BrokerConnection>,
) {
    let (client_ws_sender, mut client_ws_rcv) = ws.split();
    let (client_sender, client_rcv) = mpsc::unbounded_channel();

    let client_rcv = UnboundedReceiverStream::new(client_rcv);
    tokio::task::spawn(client_rcv.forward(client_ws_sender).map(|result| {
        if let Err(e) = result {
            error!("error sending websocket msg: {}", e);
        }
    }));

    let channels: Vec<(Channel, Arc<dyn BrokerChannel>)> = Channel::ALL
        .iter()
        .map(|channel| (*channel, connection.channel(channel.name())))
        .collect();

    for (_, channel) in &channels {
        tokio::task::spawn(forward_channel(channel.clone(), client_sender.clone()));
    }

    info!("{client_id} bridged to the broker");

    while let Some(result) = client_ws_rcv.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                error!("error receiving ws message for {client_id}: {e}");
                break;
            }
        };
        if msg.is_close() {
            break;
        }
        client_msg(&client_id, msg, &channels).await;
    }

    // Ends the forwarding tasks along with the subscriptions
    connection.close();
    info!("{client_id} disconnected");
}

async fn forward_channel(channel: Arc<dyn BrokerChannel>, sender: WsSender) {
    let mut payloads = channel.subscribe();

    while let Some(data) = payloads.next().await {
        let frame = Frame {
            channel: channel.name().to_string(),
            data,
        };
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                error!("could not encode frame for {}: {e}", channel.name());
                continue;
            }
        };
        if sender.send(Ok(Message::text(text))).is_err() {
            break;
        }
    }
}

async fn client_msg(client_id: &str, msg: Message, channels: &[(Channel, Arc<dyn BrokerChannel>)]) {
    let frame = match msg.to_str().map(serde_json::from_str::<Frame>) {
        Ok(Ok(frame)) => frame,
        _ => {
            warn!("{client_id} sent an invalid frame");
            return;
        }
    };

    let target = channels
        .iter()
        .find(|(channel, _)| channel.name() == frame.channel);

    match target {
        Some((Channel::Session, _)) => warn!("{client_id} tried to publish on {}", frame.channel),
        Some((_, channel)) => {
            if let Err(e) = channel.publish(MESSAGE_EVENT, frame.data).await {
                error!("{client_id} could not publish on {}: {e}", frame.channel);
            }
        }
        None => warn!("{client_id} sent a frame for unknown channel {}", frame.channel),
    }
}
