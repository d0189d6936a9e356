//! Extension side of an RPC session.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use nexus_core::rpc::protocol::{
    message_type, message_type_of, parse_time, AvailabilityResponse, CatalogsResponse, Close,
    Completion, HandshakeRequest, HandshakeResponse, Invocation, TimeRangeResponse,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::{SdkError, SdkResult};
use crate::handler::{ReadResult, RpcDataSourceHandler};

/// A message received after the handshake.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Invocation(Invocation),
    Close(Close),
}

/// Framed reader/writer over the host's pipes.
pub struct Peer<R, W> {
    reader: BufReader<R>,
    writer: W,
    last_line: String,
}

impl Peer<tokio::io::Stdin, tokio::io::Stdout> {
    /// Peer over this process's stdin/stdout.
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl<R, W> Peer<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
            last_line: String::new(),
        }
    }

    /// The last raw line received from the host.
    pub fn last_line(&self) -> &str {
        &self.last_line
    }

    async fn read_line(&mut self) -> SdkResult<Option<&str>> {
        self.last_line.clear();
        if self.reader.read_line(&mut self.last_line).await? == 0 {
            return Ok(None);
        }

        let trimmed_len = self.last_line.trim_end_matches(['\r', '\n']).len();
        self.last_line.truncate(trimmed_len);
        Ok(Some(&self.last_line))
    }

    /// Answer the host's handshake. Only `json` version 1 is accepted.
    pub async fn accept_handshake(&mut self) -> SdkResult<()> {
        let line = self
            .read_line()
            .await?
            .ok_or_else(|| SdkError::Handshake("the host closed the stream".to_string()))?;
        let request: HandshakeRequest = serde_json::from_str(line)?;

        if !request.is_supported() {
            let error = format!(
                "unsupported protocol '{}' version {}",
                request.protocol, request.version
            );
            self.send(&HandshakeResponse {
                error: Some(error.clone()),
            })
            .await?;
            return Err(SdkError::Handshake(error));
        }

        self.send(&HandshakeResponse::default()).await
    }

    /// Next invocation or close; `None` once the host closed the stream.
    ///
    /// Messages of other types are skipped.
    pub async fn next_message(&mut self) -> SdkResult<Option<Incoming>> {
        loop {
            let Some(line) = self.read_line().await? else {
                return Ok(None);
            };
            if line.trim().is_empty() {
                continue;
            }

            let value: Value = serde_json::from_str(line)?;
            match message_type_of(&value) {
                Some(message_type::INVOCATION) => {
                    return Ok(Some(Incoming::Invocation(serde_json::from_value(value)?)))
                }
                Some(message_type::CLOSE) => return Ok(Some(Incoming::Close(serde_json::from_value(value)?))),
                _ => continue,
            }
        }
    }

    /// Write one JSON line.
    pub async fn send<T: Serialize>(&mut self, message: &T) -> SdkResult<()> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Write a raw segment right after a completion.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> SdkResult<()> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Route one invocation to `handler` and write the answer.
    ///
    /// Handler failures become error completions; only transport failures
    /// are returned.
    pub async fn dispatch<H>(&mut self, handler: &mut H, invocation: Invocation) -> SdkResult<()>
    where
        H: RpcDataSourceHandler + ?Sized,
    {
        let Invocation {
            invocation_id,
            target,
            arguments,
            ..
        } = invocation;

        if invocation_id.is_none() {
            // Notifications have nobody waiting for an answer.
            if target == "SetParameters" {
                let (locator, configuration) = set_parameters_arguments(&target, arguments)?;
                handler.set_parameters(locator, configuration).await?;
            }
            return Ok(());
        }

        let outcome = invoke(handler, &target, arguments).await;

        match outcome {
            Ok(Answer::Value(result)) => self.send(&Completion::result(invocation_id, result)).await,
            Ok(Answer::Raw(read)) => {
                self.send(&Completion::result(invocation_id, Value::Null)).await?;
                self.send_raw(&read.data).await?;
                self.send_raw(&read.status).await
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => self.send(&Completion::error(invocation_id, e.to_string())).await,
        }
    }

    /// Serve until the host sends `Close` or closes the stream.
    pub async fn run<H>(&mut self, handler: &mut H) -> SdkResult<()>
    where
        H: RpcDataSourceHandler + ?Sized,
    {
        self.accept_handshake().await?;

        while let Some(message) = self.next_message().await? {
            match message {
                Incoming::Invocation(invocation) => self.dispatch(handler, invocation).await?,
                Incoming::Close(_) => break,
            }
        }

        Ok(())
    }
}

/// Run `handler` as an RPC extension on stdin/stdout.
pub async fn serve<H>(mut handler: H) -> SdkResult<()>
where
    H: RpcDataSourceHandler,
{
    Peer::stdio().run(&mut handler).await
}

// ============================================================================
// Dispatch
// ============================================================================

enum Answer {
    Value(Value),
    Raw(ReadResult),
}

async fn invoke<H>(handler: &mut H, target: &str, arguments: Vec<Value>) -> SdkResult<Answer>
where
    H: RpcDataSourceHandler + ?Sized,
{
    let mut arguments = Arguments::new(target, arguments);

    let value = match target {
        "GetCatalogs" => to_value(CatalogsResponse {
            catalogs: handler.get_catalogs().await?,
        })?,
        "GetTimeRange" => {
            let catalog_id: String = arguments.next()?;
            let range = handler.get_time_range(&catalog_id).await?;
            to_value(TimeRangeResponse {
                begin: range.begin,
                end: range.end,
            })?
        }
        "GetAvailability" => {
            let catalog_id: String = arguments.next()?;
            let begin = arguments.next_time()?;
            let end = arguments.next_time()?;
            to_value(AvailabilityResponse {
                availability: handler.get_availability(&catalog_id, begin, end).await?,
            })?
        }
        "ReadSingle" => {
            let path: String = arguments.next()?;
            let length: usize = arguments.next()?;
            let begin = arguments.next_time()?;
            let end = arguments.next_time()?;
            let read = handler.read_single(&path, length, begin, end).await?;
            check_segments(&path, length, &read)?;
            return Ok(Answer::Raw(read));
        }
        _ => return Err(SdkError::UnknownTarget(target.to_string())),
    };

    Ok(Answer::Value(value))
}

/// The host reads exactly `length` status bytes and whole elements of data.
fn check_segments(path: &str, length: usize, read: &ReadResult) -> SdkResult<()> {
    let data_fits = if length == 0 {
        read.data.is_empty()
    } else {
        read.data.len() % length == 0
    };

    if read.status.len() != length || !data_fits {
        return Err(SdkError::handler(format!(
            "read of {} returned {} data and {} status bytes for {} samples",
            path,
            read.data.len(),
            read.status.len(),
            length
        )));
    }
    Ok(())
}

fn to_value<T: Serialize>(value: T) -> SdkResult<Value> {
    Ok(serde_json::to_value(value)?)
}

fn set_parameters_arguments(
    target: &str,
    arguments: Vec<Value>,
) -> SdkResult<(String, HashMap<String, String>)> {
    let mut arguments = Arguments::new(target, arguments);
    let locator: String = arguments.next()?;
    let configuration: Option<HashMap<String, String>> = arguments.next_optional()?;
    Ok((locator, configuration.unwrap_or_default()))
}

/// Positional argument reader.
struct Arguments<'a> {
    target: &'a str,
    values: std::vec::IntoIter<Value>,
    position: usize,
}

impl<'a> Arguments<'a> {
    fn new(target: &'a str, values: Vec<Value>) -> Self {
        Self {
            target,
            values: values.into_iter(),
            position: 0,
        }
    }

    fn next<T: DeserializeOwned>(&mut self) -> SdkResult<T> {
        self.next_optional()?
            .ok_or_else(|| SdkError::arguments(self.target, format!("argument {} is missing", self.position)))
    }

    fn next_optional<T: DeserializeOwned>(&mut self) -> SdkResult<Option<T>> {
        self.position += 1;
        match self.values.next() {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| SdkError::arguments(self.target, format!("argument {}: {}", self.position, e))),
        }
    }

    fn next_time(&mut self) -> SdkResult<DateTime<Utc>> {
        let value: String = self.next()?;
        parse_time(&value)
            .ok_or_else(|| SdkError::arguments(self.target, format!("'{}' is not a timestamp", value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use nexus_core::datasource::{ResourceCatalog, TimeRange};
    use serde_json::json;
    use tokio::io::{duplex, AsyncReadExt, DuplexStream};

    #[derive(Default)]
    struct Fixed {
        locator: Option<String>,
        short_status: bool,
    }

    #[async_trait]
    impl RpcDataSourceHandler for Fixed {
        async fn set_parameters(
            &mut self,
            resource_locator: String,
            _configuration: HashMap<String, String>,
        ) -> SdkResult<()> {
            self.locator = Some(resource_locator);
            Ok(())
        }

        async fn get_catalogs(&self) -> SdkResult<Vec<ResourceCatalog>> {
            Ok(vec![ResourceCatalog::new("/A")])
        }

        async fn get_time_range(&self, catalog_id: &str) -> SdkResult<TimeRange> {
            if catalog_id != "/A" {
                return Err(SdkError::handler(format!("unknown catalog {}", catalog_id)));
            }
            Ok(TimeRange {
                begin: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
                end: Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap(),
            })
        }

        async fn get_availability(&self, _: &str, _: DateTime<Utc>, _: DateTime<Utc>) -> SdkResult<f64> {
            Ok(0.5)
        }

        async fn read_single(
            &self,
            _path: &str,
            length: usize,
            _: DateTime<Utc>,
            _: DateTime<Utc>,
        ) -> SdkResult<ReadResult> {
            if self.short_status {
                return Ok(ReadResult::new(vec![0; length * 4], vec![1; length / 2]));
            }
            Ok(ReadResult::new(vec![7; length * 2], vec![1; length]))
        }
    }

    fn peer() -> (Peer<DuplexStream, DuplexStream>, DuplexStream, DuplexStream) {
        let (host_out, peer_in) = duplex(4096);
        let (peer_out, host_in) = duplex(4096);
        (Peer::new(peer_in, peer_out), host_out, host_in)
    }

    async fn read_line(stream: &mut DuplexStream) -> String {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            stream.read_exact(&mut byte).await.unwrap();
            if byte[0] == b'\n' {
                return String::from_utf8(line).unwrap();
            }
            line.push(byte[0]);
        }
    }

    #[tokio::test]
    async fn test_rejects_unsupported_handshake() {
        let (mut peer, mut host_out, mut host_in) = peer();
        host_out
            .write_all(b"{\"protocol\":\"messagepack\",\"version\":1}\n")
            .await
            .unwrap();

        assert!(matches!(peer.accept_handshake().await, Err(SdkError::Handshake(_))));

        let response: HandshakeResponse = serde_json::from_str(&read_line(&mut host_in).await).unwrap();
        assert!(response.error.unwrap().contains("messagepack"));
    }

    #[tokio::test]
    async fn test_dispatch_answers_and_errors() {
        let (mut peer, _host_out, mut host_in) = peer();
        let mut handler = Fixed::default();

        peer.dispatch(&mut handler, Invocation::call("1", "GetTimeRange", vec![json!("/A")]))
            .await
            .unwrap();
        let completion: Completion = serde_json::from_str(&read_line(&mut host_in).await).unwrap();
        assert_eq!(completion.invocation_id.as_deref(), Some("1"));
        assert_eq!(completion.result.unwrap()["begin"], "2020-01-01T00:00:00Z");

        peer.dispatch(&mut handler, Invocation::call("2", "GetTimeRange", vec![json!("/B")]))
            .await
            .unwrap();
        let completion: Completion = serde_json::from_str(&read_line(&mut host_in).await).unwrap();
        assert!(completion.result.is_none());
        assert_eq!(completion.error.as_deref(), Some("unknown catalog /B"));

        peer.dispatch(&mut handler, Invocation::call("3", "Nope", vec![]))
            .await
            .unwrap();
        let completion: Completion = serde_json::from_str(&read_line(&mut host_in).await).unwrap();
        assert!(completion.error.unwrap().contains("Nope"));
    }

    #[tokio::test]
    async fn test_read_single_writes_segments_after_completion() {
        let (mut peer, _host_out, mut host_in) = peer();
        let mut handler = Fixed::default();

        let invocation = Invocation::call(
            "5",
            "ReadSingle",
            vec![json!("/A/T1/1_s"), json!(3), json!("2020-01-01T00:00:00Z"), json!("2020-01-01T00:00:03Z")],
        );
        peer.dispatch(&mut handler, invocation).await.unwrap();

        let completion: Completion = serde_json::from_str(&read_line(&mut host_in).await).unwrap();
        assert_eq!(completion.invocation_id.as_deref(), Some("5"));

        let mut data = [0u8; 6];
        let mut status = [0u8; 3];
        host_in.read_exact(&mut data).await.unwrap();
        host_in.read_exact(&mut status).await.unwrap();
        assert_eq!(data, [7; 6]);
        assert_eq!(status, [1; 3]);
    }

    #[tokio::test]
    async fn test_read_single_rejects_mismatched_segments() {
        let (mut peer, _host_out, mut host_in) = peer();
        let mut handler = Fixed {
            short_status: true,
            ..Fixed::default()
        };

        let invocation = Invocation::call(
            "6",
            "ReadSingle",
            vec![json!("/A/T1/1_s"), json!(4), json!("2020-01-01T00:00:00Z"), json!("2020-01-01T00:00:04Z")],
        );
        peer.dispatch(&mut handler, invocation).await.unwrap();

        let completion: Completion = serde_json::from_str(&read_line(&mut host_in).await).unwrap();
        assert_eq!(completion.invocation_id.as_deref(), Some("6"));
        assert!(completion.result.is_none());
        assert!(completion.error.unwrap().contains("2 status bytes for 4 samples"));

        // No raw bytes follow: the next line is the next completion.
        peer.dispatch(&mut handler, Invocation::call("7", "GetCatalogs", vec![]))
            .await
            .unwrap();
        let completion: Completion = serde_json::from_str(&read_line(&mut host_in).await).unwrap();
        assert_eq!(completion.invocation_id.as_deref(), Some("7"));
    }

    #[test]
    fn test_check_segments() {
        assert!(check_segments("/p", 2, &ReadResult::new(vec![0; 16], vec![1; 2])).is_ok());
        assert!(check_segments("/p", 0, &ReadResult::default()).is_ok());
        assert!(check_segments("/p", 0, &ReadResult::new(vec![0; 8], vec![])).is_err());
        assert!(check_segments("/p", 4, &ReadResult::new(vec![0; 10], vec![1; 4])).is_err());
        assert!(check_segments("/p", 4, &ReadResult::new(vec![0; 32], vec![1; 3])).is_err());
    }

    #[tokio::test]
    async fn test_set_parameters_notification() {
        let (mut peer, _host_out, _host_in) = peer();
        let mut handler = Fixed::default();

        let notification = Invocation::notification("SetParameters", vec![json!("file:///data"), json!({})]);
        peer.dispatch(&mut handler, notification).await.unwrap();

        assert_eq!(handler.locator.as_deref(), Some("file:///data"));
    }

    #[tokio::test]
    async fn test_run_stops_on_close() {
        let (mut peer, mut host_out, mut host_in) = peer();
        let mut handler = Fixed::default();

        host_out
            .write_all(b"{\"protocol\":\"json\",\"version\":1}\n{\"type\":6}\n{\"type\":7,\"error\":null}\n")
            .await
            .unwrap();

        peer.run(&mut handler).await.unwrap();
        let response: HandshakeResponse = serde_json::from_str(&read_line(&mut host_in).await).unwrap();
        assert!(response.error.is_none());
    }
}
