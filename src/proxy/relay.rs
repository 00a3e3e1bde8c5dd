use bytes::BytesMut;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::dumper::{Direction, Dumper};
use crate::error::{RelayError, Result};
use crate::metrics::Metrics;
use crate::session::{ConnMetadata, DumpSession, DumpSink};

/// Bookkeeping entry for a connection that is currently being relayed
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub client_addr: SocketAddr,
    pub remote_addr: Option<SocketAddr>,
    pub connected_at: DateTime<Utc>,
}

/// Everything a connection task needs, shared by all of them
pub(crate) struct RelayContext {
    pub remote_addr: String,
    pub buffer_size: usize,
    pub dumper: Arc<dyn Dumper>,
    pub sink: Arc<dyn DumpSink>,
    pub metrics: Arc<Metrics>,
    pub connections: Arc<DashMap<Uuid, ConnectionInfo>>,
}

/// Bytes forwarded in each direction over the life of a connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub client_to_remote: u64,
    pub remote_to_client: u64,
}

/// Opens the upstream connection for `client` and relays until both sides close.
pub(crate) async fn handle_connection(
    client: TcpStream,
    client_addr: SocketAddr,
    ctx: Arc<RelayContext>,
) -> Result<RelayStats> {
    let remote = TcpStream::connect(&ctx.remote_addr)
        .await
        .map_err(|source| RelayError::ConnectFailed {
            addr: ctx.remote_addr.clone(),
            source,
        })?;
    let remote_addr = remote.peer_addr().ok();

    let metadata = ConnMetadata::new(Some(client_addr), remote_addr);
    let conn_id = metadata.conn_id;
    ctx.connections.insert(
        conn_id,
        ConnectionInfo {
            client_addr,
            remote_addr,
            connected_at: metadata.connected_at,
        },
    );
    tracing::debug!(%conn_id, remote = ?remote_addr, "Upstream connected");

    let session = Arc::new(Mutex::new(DumpSession::new(
        ctx.dumper.clone(),
        ctx.sink.clone(),
        metadata,
    )));

    let (client_read, client_write) = client.into_split();
    let (remote_read, remote_write) = remote.into_split();

    let upstream = pipe(
        client_read,
        remote_write,
        Direction::ClientToRemote,
        session.clone(),
        ctx.metrics.clone(),
        ctx.buffer_size,
    );
    let downstream = pipe(
        remote_read,
        client_write,
        Direction::RemoteToClient,
        session,
        ctx.metrics.clone(),
        ctx.buffer_size,
    );

    let result = tokio::try_join!(upstream, downstream);
    ctx.connections.remove(&conn_id);

    let (client_to_remote, remote_to_client) = result?;
    Ok(RelayStats {
        client_to_remote,
        remote_to_client,
    })
}

/// Copies one direction of a connection, dumping each buffer before it is
/// forwarded. Half-closes `writer` once `reader` reaches EOF.
async fn pipe<R, W>(
    mut reader: R,
    mut writer: W,
    direction: Direction,
    session: Arc<Mutex<DumpSession>>,
    metrics: Arc<Metrics>,
    buffer_size: usize,
) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(buffer_size);
    let mut total = 0u64;

    loop {
        buf.clear();
        let n = reader.read_buf(&mut buf).await.map_err(RelayError::from)?;
        if n == 0 {
            break;
        }

        let outcome = session.lock().await.dump(&buf[..n], direction);
        metrics.record_dump(outcome);

        writer.write_all(&buf[..n]).await.map_err(RelayError::from)?;
        metrics.record_bytes(direction.is_client_to_server(), n);
        total += n as u64;
    }

    writer.shutdown().await.map_err(RelayError::from)?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dumper::{create_dumper, DumperKind, DumperOptions};
    use crate::session::test_sink::MemorySink;
    use tracing::Span;

    #[tokio::test]
    async fn test_pipe_forwards_and_dumps() {
        let sink = Arc::new(MemorySink::default());
        let dumper = create_dumper(DumperKind::Hex, &DumperOptions::default(), Span::none());
        let session = Arc::new(Mutex::new(DumpSession::new(
            dumper,
            sink.clone(),
            ConnMetadata::new(None, None),
        )));
        let metrics = Arc::new(Metrics::new().unwrap());

        let (mut input, reader) = tokio::io::duplex(64);
        let (writer, mut output) = tokio::io::duplex(64);

        let task = tokio::spawn(pipe(
            reader,
            writer,
            Direction::RemoteToClient,
            session,
            metrics.clone(),
            16,
        ));

        input.write_all(b"hello").await.unwrap();
        drop(input);

        let mut forwarded = Vec::new();
        output.read_to_end(&mut forwarded).await.unwrap();
        assert_eq!(forwarded, b"hello");
        assert_eq!(task.await.unwrap().unwrap(), 5);

        let records = sink.records();
        assert!(!records.is_empty());
        assert!(records
            .iter()
            .all(|r| r.direction == Direction::RemoteToClient && r.values[0].key == "hex"));
        assert_eq!(metrics.bytes_remote_to_client.get(), 5);
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        // Grab a free port and close it again so nothing is listening there.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let closed = listener.local_addr().unwrap();
        drop(listener);

        let front = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let front_addr = front.local_addr().unwrap();
        let connect = tokio::spawn(async move { TcpStream::connect(front_addr).await });
        let (client, client_addr) = front.accept().await.unwrap();
        let _peer = connect.await.unwrap().unwrap();

        let ctx = Arc::new(RelayContext {
            remote_addr: closed.to_string(),
            buffer_size: 1024,
            dumper: create_dumper(DumperKind::Pg, &DumperOptions::default(), Span::none()),
            sink: Arc::new(MemorySink::default()),
            metrics: Arc::new(Metrics::new().unwrap()),
            connections: Arc::new(DashMap::new()),
        });

        let err = handle_connection(client, client_addr, ctx.clone())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Relay(RelayError::ConnectFailed { .. })
        ));
        assert!(ctx.connections.is_empty());
    }
}
