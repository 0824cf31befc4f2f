/// Connection manager: accept loop and per-connection session tasks.
use std::sync::Arc;

use futures::SinkExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::codec::Framed;
use tracing::{info, warn};

use super::codec::{CodecError, LineCodec};
use super::dispatch::Dispatcher;
use super::protocol::Outgoing;
use super::registry::{ConnId, Registry};
use crate::store::Store;

/// Accept chat clients on an already-bound listener.
///
/// The caller binds; tests hand in a listener on an ephemeral port and
/// abort the task when done. Runs until `accept` fails.
pub async fn serve(listener: TcpListener, store: Store) -> std::io::Result<()> {
    let registry = Arc::new(Registry::new());
    let dispatcher = Arc::new(Dispatcher::new(registry, store));
    let mut next_conn: u64 = 0;

    loop {
        let (socket, addr) = listener.accept().await?;
        next_conn += 1;
        let conn_id = ConnId(next_conn);
        info!(conn = %conn_id, %addr, "new connection");

        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            if let Err(e) = handle_client(socket, conn_id, &dispatcher).await {
                warn!(conn = %conn_id, %addr, "client error: {e}");
            }
            dispatcher.disconnect(conn_id).await;
            info!(conn = %conn_id, %addr, "disconnected");
        });
    }
}

/// Drive one client connection until the peer hangs up or the transport
/// fails.
///
/// This task is the sole writer to the socket: every ack, history page,
/// and broadcast drains through the session channel here, so the peer
/// sees them in submission order.
async fn handle_client(
    socket: TcpStream,
    conn_id: ConnId,
    dispatcher: &Dispatcher,
) -> Result<(), CodecError> {
    let mut framed = Framed::new(socket, LineCodec);
    let (tx, mut rx) = mpsc::unbounded_channel::<Outgoing>();

    loop {
        tokio::select! {
            // A complete line from the client.
            frame = framed.next() => {
                match frame {
                    Some(Ok(line)) => dispatcher.dispatch(conn_id, &tx, &line).await,
                    Some(Err(e)) => return Err(e),
                    None => return Ok(()), // Connection closed.
                }
            }

            // Outgoing traffic queued by dispatch and broadcasts.
            Some(outgoing) = rx.recv() => {
                framed.send(outgoing).await?;
            }
        }
    }
}
