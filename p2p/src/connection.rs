//! Socket pipeline: one reader loop and one writer task per connection.

use {
    crate::{
        channel::{Channel, Direction, MessageQueueReceiver},
        error::{P2pError, Result},
        limiter::InboundPermit,
        message::{Message, ReasonCode},
        packet::MessageCodec,
        session::{NodeContext, Session},
    },
    futures::{SinkExt, StreamExt},
    log::{debug, warn},
    std::{sync::Arc, time::Duration},
    tokio::{
        io::AsyncRead,
        net::{tcp::OwnedWriteHalf, TcpStream},
    },
    tokio_util::{
        codec::{FramedRead, FramedWrite},
        sync::CancellationToken,
    },
};

/// Drive a connection until it closes.
///
/// Registers a channel for the socket, runs the session's read loop and
/// unregisters the channel on the way out. `permit` is held for as long as
/// the connection lives.
pub async fn run_connection(
    ctx: Arc<NodeContext>,
    stream: TcpStream,
    direction: Direction,
    cancel: CancellationToken,
    permit: Option<InboundPermit>,
) -> Result<()> {
    let remote_addr = stream.peer_addr()?;
    stream.set_nodelay(true)?;

    let (channel, queue) = Channel::new(
        ctx.channel_manager.next_channel_id(),
        direction,
        remote_addr,
        ctx.config.max_message_queue_size,
        cancel,
    );
    if !ctx.channel_manager.add(channel.clone()) {
        debug!("{remote_addr} is already connected");
        return Ok(());
    }

    let (read_half, write_half) = stream.into_split();
    let mut reader = FramedRead::new(read_half, ctx.message_codec());
    let writer = FramedWrite::new(write_half, ctx.message_codec());
    let write_task = tokio::spawn(write_loop(writer, queue, channel.clone()));

    let mut session = Session::new(ctx.clone(), channel.clone());
    session.on_connected();
    let result = read_loop(&mut reader, &mut session, ctx.config.channel_idle_timeout).await;
    session.on_closed();

    if let Err(e) = write_task.await {
        warn!("{channel}: writer task failed: {e}");
    }
    drop(permit);
    match result {
        Err(P2pError::IdleTimeout) | Ok(()) => Ok(()),
        Err(e) => {
            debug!("{channel}: {e}");
            Err(e)
        }
    }
}

async fn read_loop<R>(
    reader: &mut FramedRead<R, MessageCodec>,
    session: &mut Session,
    idle_timeout: Duration,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let channel = session.channel().clone();
    loop {
        let next = tokio::select! {
            biased;
            _ = channel.cancel_token().cancelled() => return Ok(()),
            next = tokio::time::timeout(idle_timeout, reader.next()) => next,
        };
        match next {
            Err(_) => {
                debug!("{channel}: idle for {idle_timeout:?}");
                return Err(P2pError::IdleTimeout);
            }
            Ok(None) => return Ok(()),
            Ok(Some(Err(e))) => return Err(e),
            Ok(Some(Ok(message))) => session.on_message(message),
        }
    }
}

async fn write_loop(
    mut writer: FramedWrite<OwnedWriteHalf, MessageCodec>,
    mut queue: MessageQueueReceiver,
    channel: Arc<Channel>,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = channel.cancel_token().cancelled() => break,
            message = queue.recv() => message,
        };
        let Some(message) = message else {
            break;
        };
        match writer.send(message).await {
            Ok(()) => {}
            Err(e @ P2pError::PacketTooLarge { .. }) => {
                warn!("{channel}: dropping outbound message: {e}");
            }
            Err(e) => {
                debug!("{channel}: write failed: {e}");
                channel.shutdown();
                break;
            }
        }
    }

    if let Some(reason) = channel.disconnect_reason() {
        if let Err(e) = writer.send(Message::Disconnect(reason)).await {
            debug!("{channel}: failed to send disconnect: {e}");
        }
    }
    let _ = writer.close().await;
}

/// Refuse a connection before any session is set up: send DISCONNECT with
/// `reason` and close.
pub async fn reject(ctx: &NodeContext, stream: TcpStream, reason: ReasonCode) {
    let mut writer = FramedWrite::new(stream, ctx.message_codec());
    if let Err(e) = writer.send(Message::Disconnect(reason)).await {
        debug!("failed to send {reason:?} to refused connection: {e}");
    }
    let _ = writer.close().await;
}
