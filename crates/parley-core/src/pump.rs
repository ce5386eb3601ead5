//! Connection pump pair.
//!
//! Each connection runs two tasks: an inbound loop that decodes frames and
//! hands them to the hub, and an outbound loop that drains the connection's
//! queue to the transport. When either side ends the other is aborted and the
//! disconnect sequence runs.

use parley_transport::{FrameReader, FrameWriter};
use tracing::{debug, trace, warn};

use crate::hub::{Hub, HubError};
use crate::identity::{Identity, Session};
use crate::outbound::OutboundReceiver;

/// Serve one authenticated connection until it closes.
pub async fn serve_connection<R, W>(hub: Hub, identity: Identity, reader: R, writer: W)
where
    R: FrameReader + 'static,
    W: FrameWriter + 'static,
{
    let (session, outbound) = hub.connect(identity).await;

    let mut inbound_task = {
        let hub = hub.clone();
        let session = session.clone();
        tokio::spawn(async move { inbound_loop(hub, session, reader).await })
    };
    let mut outbound_task = tokio::spawn(outbound_loop(outbound, writer));

    tokio::select! {
        _ = &mut inbound_task => outbound_task.abort(),
        _ = &mut outbound_task => inbound_task.abort(),
    }

    hub.disconnect(&session).await;
}

async fn inbound_loop<R: FrameReader>(hub: Hub, session: Session, mut reader: R) {
    let codec = hub.frame_codec();
    loop {
        let data = match reader.recv().await {
            Ok(Some(data)) => data,
            Ok(None) => {
                debug!(connection = %session.connection, "Peer closed connection");
                break;
            }
            Err(e) => {
                warn!(connection = %session.connection, error = %e, "Read failed");
                break;
            }
        };

        let frame = match codec.decode(&data) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(connection = %session.connection, error = %e, "Dropping malformed frame");
                continue;
            }
        };
        trace!(connection = %session.connection, kind = frame.kind(), "Inbound frame");

        match hub.dispatch(&session, frame).await {
            Ok(()) => {}
            Err(HubError::RouterClosed) => {
                warn!(connection = %session.connection, "Router closed, ending connection");
                break;
            }
            Err(e) => {
                warn!(connection = %session.connection, error = %e, "Dropping frame");
            }
        }
    }
}

async fn outbound_loop<W: FrameWriter>(mut outbound: OutboundReceiver, mut writer: W) {
    let connection = outbound.connection();
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = writer.send(frame).await {
            debug!(connection = %connection, error = %e, "Write failed");
            break;
        }
    }
    outbound.close();
    if let Err(e) = writer.close().await {
        trace!(connection = %connection, error = %e, "Close failed");
    }
}
