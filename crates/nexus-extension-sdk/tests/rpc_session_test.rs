//! Host-side RPC sessions against the sample extension binary.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use nexus_core::datasource::{CatalogItem, DataSource, DataSourceContext, NexusDataType, ReadRequest, Representation};
use nexus_core::rpc::data_source::COMMAND_KEY;
use nexus_core::rpc::{RpcCommunicator, RpcDataSource, RpcError, RpcSessionState};
use serde_json::{json, Value};

const SAMPLE: &str = env!("CARGO_BIN_EXE_nexus-sample-extension");
const TIMEOUT: Duration = Duration::from_secs(10);

async fn connected() -> RpcCommunicator {
    let communicator = RpcCommunicator::new(SAMPLE, Vec::new());
    communicator.connect(TIMEOUT).await.unwrap();
    communicator
}

async fn wait_for_state(communicator: &RpcCommunicator, state: RpcSessionState) -> bool {
    for _ in 0..100 {
        if communicator.state() == state {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn test_round_trip() {
    let communicator = connected().await;
    assert_eq!(communicator.state(), RpcSessionState::Connected);
    assert!(communicator.process_id().is_some());

    let pong: String = communicator.call("Ping", vec![], TIMEOUT).await.unwrap();
    assert_eq!(pong, "pong");

    let echoed: Value = communicator
        .call("Echo", vec![json!({"nested": [1, 2, 3]})], TIMEOUT)
        .await
        .unwrap();
    assert_eq!(echoed, json!({"nested": [1, 2, 3]}));

    communicator.close(TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn test_concurrent_calls_do_not_interleave() {
    let communicator = Arc::new(connected().await);

    let calls = (0..16).map(|i| {
        let communicator = Arc::clone(&communicator);
        tokio::spawn(async move {
            let echoed: i64 = communicator.call("Echo", vec![json!(i)], TIMEOUT).await.unwrap();
            (i, echoed)
        })
    });

    for (i, echoed) in futures::future::try_join_all(calls).await.unwrap() {
        assert_eq!(i, echoed);
    }
    assert!(communicator.is_connected());
}

#[tokio::test]
async fn test_wire_format_of_invocations() {
    let communicator = connected().await;

    let line: String = communicator
        .call("Record", vec![json!(1), json!("a")], TIMEOUT)
        .await
        .unwrap();

    assert_eq!(
        line,
        r#"{"type":1,"invocationId":"1","target":"Record","arguments":[1,"a"]}"#
    );
}

#[tokio::test]
async fn test_exit_disconnects_for_good() {
    let communicator = connected().await;

    let result = communicator.call::<Value>("Exit", vec![], TIMEOUT).await;
    assert!(matches!(result, Err(RpcError::Disconnected(_))));
    assert_eq!(communicator.state(), RpcSessionState::Disconnected);

    let again = communicator.call::<String>("Ping", vec![], TIMEOUT).await;
    assert!(matches!(again, Err(RpcError::InvalidOperation(_))));
    assert!(matches!(
        communicator.connect(TIMEOUT).await,
        Err(RpcError::InvalidOperation(_))
    ));
}

#[tokio::test]
async fn test_malformed_completions_are_rejected() {
    let communicator = connected().await;

    let both = communicator.call::<Value>("Both", vec![], TIMEOUT).await;
    assert!(matches!(both, Err(RpcError::Protocol(_))));

    let wrong_id = communicator.call::<Value>("WrongId", vec![], TIMEOUT).await;
    match wrong_id {
        Err(RpcError::Protocol(message)) => assert!(message.contains("wrong")),
        other => panic!("unexpected result: {:?}", other),
    }

    // Nothing was left on the stream, the session is still usable.
    let pong: String = communicator.call("Ping", vec![], TIMEOUT).await.unwrap();
    assert_eq!(pong, "pong");
}

#[tokio::test]
async fn test_remote_errors_keep_the_session() {
    let communicator = connected().await;

    let result = communicator
        .call::<Value>("GetTimeRange", vec![json!("/UNKNOWN")], TIMEOUT)
        .await;
    match result {
        Err(RpcError::Remote(message)) => assert_eq!(message, "Unknown catalog /UNKNOWN"),
        other => panic!("unexpected result: {:?}", other),
    }

    let result = communicator.call::<Value>("NoSuchTarget", vec![], TIMEOUT).await;
    assert!(matches!(result, Err(RpcError::Remote(_))));
    assert!(communicator.is_connected());
}

#[tokio::test]
async fn test_hanging_call_times_out_and_tears_down() {
    let communicator = connected().await;

    let result = communicator
        .call::<Value>("Hang", vec![], Duration::from_millis(300))
        .await;
    assert!(matches!(result, Err(RpcError::Timeout { .. })));
    assert_eq!(communicator.state(), RpcSessionState::Disconnected);
}

#[tokio::test]
async fn test_unstructured_stderr_tears_down() {
    let communicator = connected().await;

    // The answer may or may not arrive before the stderr line is noticed.
    let _ = communicator.call::<Value>("Garbage", vec![], TIMEOUT).await;

    assert!(wait_for_state(&communicator, RpcSessionState::Disconnected).await);
}

#[tokio::test]
async fn test_close_ends_the_process() {
    let communicator = connected().await;
    communicator.close(TIMEOUT).await.unwrap();

    assert_eq!(communicator.state(), RpcSessionState::Disconnected);
    assert!(communicator.process_id().is_none());
}

// ============================================================================
// RpcDataSource
// ============================================================================

async fn activated() -> RpcDataSource {
    let mut source = RpcDataSource::new().with_call_timeout(TIMEOUT);
    source
        .set_context(DataSourceContext::new("file:///sample").with_config(COMMAND_KEY, SAMPLE))
        .await
        .unwrap();
    source
}

#[tokio::test]
async fn test_data_source_catalogs_and_ranges() {
    let mut source = activated().await;

    let catalogs = source.get_catalogs().await.unwrap();
    let ids: Vec<&str> = catalogs.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, ["/SAMPLE/ACCESSIBLE", "/SAMPLE/RESTRICTED"]);
    assert_eq!(
        catalogs[0].resources[0].representations[0],
        Representation::new("1_s", NexusDataType::Float64)
    );

    let range = source.get_time_range("/SAMPLE/ACCESSIBLE").await.unwrap();
    assert_eq!(range.begin, Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
    assert_eq!(range.end, Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap());

    let availability = source
        .get_availability("/SAMPLE/ACCESSIBLE", range.begin, range.end)
        .await
        .unwrap();
    assert_eq!(availability, 0.9);

    let missing = source.get_time_range("/MISSING").await;
    assert!(missing.is_err());
    assert!(!missing.unwrap_err().is_disconnect());

    source.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_data_source_read_single() {
    let mut source = activated().await;

    let item = CatalogItem::new(
        "/SAMPLE/ACCESSIBLE",
        "T1",
        Representation::new("1_s", NexusDataType::Float64),
    );
    let mut data = vec![0u8; 4 * 8];
    let mut status = vec![0u8; 4];
    let begin = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 4).unwrap();

    let mut request = ReadRequest::new(item, &mut data, &mut status);
    source.read_single(&mut request, begin, end).await.unwrap();

    let values: Vec<f64> = data
        .chunks_exact(8)
        .map(|chunk| f64::from_le_bytes(chunk.try_into().unwrap()))
        .collect();
    assert_eq!(values, [0.0, 1.0, 2.0, 3.0]);
    assert_eq!(status, [1, 1, 1, 1]);

    // The stream is still aligned after the raw segments.
    let catalogs = source.get_catalogs().await.unwrap();
    assert_eq!(catalogs.len(), 2);

    source.shutdown().await.unwrap();
}
