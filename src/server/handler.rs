//! Per-connection request handling.
//!
//! A connection carries exactly one exchange: read a line, decode it, apply
//! it to the elevator, write one reply line, close. A line that fails to
//! decode closes the connection without writing anything back.

use crate::elevator::{Elevator, Prediction};
use crate::protocol::{MAX_LINE_BYTES, ProtocolError, Request, Response};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use std::time::Duration;

/// Longest request excerpt written to the log.
const MAX_LOGGED_CHARS: usize = 120;

/// What happened on one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exchange {
    Answered { request: Request, response: Response },
    /// The client connected and closed without sending anything.
    Abandoned,
}

/// Serve one request-response exchange on `stream`.
///
/// Reading the request and writing the reply are each bounded by `timeout`.
pub async fn handle_connection<S>(
    stream: S,
    elevator: &Elevator,
    timeout: Duration,
) -> Result<Exchange, ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);

    // AwaitingRequest
    // One byte of headroom tells a full-length line ending at EOF apart from
    // an oversized one.
    let mut reader = tokio::io::BufReader::new(reader).take(MAX_LINE_BYTES as u64 + 1);
    let mut raw = Vec::new();
    let read = tokio::time::timeout(timeout, reader.read_until(b'\n', &mut raw))
        .await
        .map_err(|_| ProtocolError::Timeout("awaiting request"))??;
    if read == 0 {
        return Ok(Exchange::Abandoned);
    }
    if raw.len() > MAX_LINE_BYTES {
        return Err(ProtocolError::TooLong);
    }

    // Decoding
    let line = String::from_utf8_lossy(&raw);
    let request = match Request::decode(&line) {
        Ok(request) => request,
        Err(error) => {
            let (excerpt, truncated) = truncate_for_log(line.trim_end(), MAX_LOGGED_CHARS);
            tracing::warn!(%error, request = excerpt, truncated, "malformed request, closing connection");
            return Err(error);
        }
    };

    // Dispatching
    let response = dispatch(elevator, request).await;

    // Responding
    tokio::time::timeout(timeout, async {
        writer.write_all(response.encode().as_bytes()).await?;
        writer.flush().await?;
        writer.shutdown().await
    })
    .await
    .map_err(|_| ProtocolError::Timeout("writing response"))??;

    Ok(Exchange::Answered { request, response })
}

async fn dispatch(elevator: &Elevator, request: Request) -> Response {
    match request {
        Request::Demand { floor, timestamp } => {
            if let Err(error) = elevator.apply_demand(floor, timestamp).await {
                tracing::warn!(%error, floor, "failed to record demand, acknowledging anyway");
            }
            Response::Ack
        }
        Request::Predict { timestamp } => match elevator.predict_resting_floor(timestamp) {
            Prediction::Floor(floor) => Response::Floor(floor),
            Prediction::InUse => {
                tracing::debug!("elevator in use, no resting prediction");
                Response::NoPrediction
            }
            Prediction::Untrained => {
                tracing::debug!("no predictor installed yet");
                Response::NoPrediction
            }
        },
    }
}

fn truncate_for_log(message: &str, max_chars: usize) -> (&str, bool) {
    match message.char_indices().nth(max_chars) {
        Some((byte_index, _character)) => (&message[..byte_index], true),
        None => (message, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureExtractor;
    use crate::predictor::{ModelConfig, train};
    use crate::store::DemandStore;

    use tokio::io::duplex;

    const TIMEOUT: Duration = Duration::from_secs(5);

    async fn setup(dir: &tempfile::TempDir) -> Elevator {
        let store = DemandStore::connect(&dir.path().join("demands.db"), FeatureExtractor::default())
            .await
            .unwrap();
        Elevator::new(store, 0)
    }

    /// Write `request` from the client side, then collect everything the
    /// handler sends back until it closes.
    async fn exchange(
        elevator: &Elevator,
        request: &[u8],
    ) -> (Result<Exchange, ProtocolError>, Vec<u8>) {
        let (mut client, server) = duplex(4096);
        client.write_all(request).await.unwrap();

        let result = handle_connection(server, elevator, TIMEOUT).await;

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        (result, reply)
    }

    #[tokio::test]
    async fn demand_is_acknowledged_and_applied() {
        let dir = tempfile::tempdir().unwrap();
        let elevator = setup(&dir).await;

        let (result, reply) = exchange(&elevator, b"7 2024-07-21T01:00:00\n").await;

        assert!(matches!(
            result.unwrap(),
            Exchange::Answered {
                response: Response::Ack,
                ..
            }
        ));
        assert_eq!(reply, b"ack\n");
        assert_eq!(elevator.current_floor(), 7);
    }

    #[tokio::test]
    async fn predict_without_model_answers_none() {
        let dir = tempfile::tempdir().unwrap();
        let elevator = setup(&dir).await;

        let (_, reply) = exchange(&elevator, b"predict 2024-07-21T01:00:00\n").await;
        assert_eq!(reply, b"none\n");
    }

    #[tokio::test]
    async fn predict_with_model_answers_floor() {
        let dir = tempfile::tempdir().unwrap();
        let elevator = setup(&dir).await;
        let model = train(
            &ModelConfig::default(),
            &[vec![1.0, 6.0], vec![2.0, 6.0], vec![20.0, 6.0], vec![21.0, 6.0]],
            &[3, 3, 8, 8],
        )
        .unwrap();
        elevator.install_predictor(model);

        // 2024-07-21 is a Sunday.
        let (_, reply) = exchange(&elevator, b"predict 2024-07-21T01:30:00\n").await;
        assert_eq!(reply, b"3\n");
    }

    #[tokio::test]
    async fn malformed_request_closes_without_reply() {
        let dir = tempfile::tempdir().unwrap();
        let elevator = setup(&dir).await;

        let (result, reply) = exchange(&elevator, b"5\n").await;

        assert!(matches!(result, Err(ProtocolError::MissingTimestamp)));
        assert!(reply.is_empty());
        assert_eq!(elevator.current_floor(), 0);
    }

    #[tokio::test]
    async fn oversized_request_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let elevator = setup(&dir).await;
        let line = vec![b'9'; MAX_LINE_BYTES + 10];

        let (result, reply) = exchange(&elevator, &line).await;

        assert!(matches!(result, Err(ProtocolError::TooLong)));
        assert!(reply.is_empty());
    }

    #[tokio::test]
    async fn full_length_request_ending_at_eof_is_served() {
        let dir = tempfile::tempdir().unwrap();
        let elevator = setup(&dir).await;
        let mut line = b"3 2024-07-21T01:00:00".to_vec();
        line.resize(MAX_LINE_BYTES, b' ');

        let (mut client, server) = duplex(4096);
        client.write_all(&line).await.unwrap();
        client.shutdown().await.unwrap();

        let result = handle_connection(server, &elevator, TIMEOUT).await;

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert!(matches!(
            result.unwrap(),
            Exchange::Answered {
                response: Response::Ack,
                ..
            }
        ));
        assert_eq!(reply, b"ack\n");
        assert_eq!(elevator.current_floor(), 3);
    }

    #[tokio::test]
    async fn line_one_byte_over_limit_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let elevator = setup(&dir).await;
        let mut line = b"3 2024-07-21T01:00:00".to_vec();
        line.resize(MAX_LINE_BYTES, b' ');
        line.push(b'\n');

        let (result, reply) = exchange(&elevator, &line).await;

        assert!(matches!(result, Err(ProtocolError::TooLong)));
        assert!(reply.is_empty());
    }

    #[tokio::test]
    async fn empty_connection_is_abandoned() {
        let dir = tempfile::tempdir().unwrap();
        let elevator = setup(&dir).await;

        let (client, server) = duplex(64);
        drop(client);

        let result = handle_connection(server, &elevator, TIMEOUT).await.unwrap();
        assert_eq!(result, Exchange::Abandoned);
    }

    #[tokio::test]
    async fn silent_client_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let elevator = setup(&dir).await;
        let (_client, server) = duplex(64);

        let result = handle_connection(server, &elevator, Duration::from_millis(100)).await;
        assert!(matches!(result, Err(ProtocolError::Timeout(_))));
    }

    #[tokio::test]
    async fn store_failure_still_acknowledges_demand() {
        let dir = tempfile::tempdir().unwrap();
        let store = DemandStore::connect(&dir.path().join("demands.db"), FeatureExtractor::default())
            .await
            .unwrap();
        let elevator = Elevator::new(store.clone(), 0);
        store.close().await;

        let (_, reply) = exchange(&elevator, b"2 2024-07-21T01:00:00\n").await;

        assert_eq!(reply, b"ack\n");
        assert_eq!(elevator.current_floor(), 2);
    }

    #[test]
    fn truncate_for_log_handles_multibyte_characters() {
        let (truncated, was_truncated) = truncate_for_log("abc→def", 4);
        assert!(was_truncated);
        assert_eq!(truncated, "abc→");
    }

    #[test]
    fn truncate_for_log_returns_original_when_within_limit() {
        let (truncated, was_truncated) = truncate_for_log("hello", 10);
        assert!(!was_truncated);
        assert_eq!(truncated, "hello");
    }
}
