//! Protocol Module Tests
//!
//! Validates the binary framing shared by every node-to-node exchange.
//!
//! ## Test Scopes
//! - **Codec**: Header layout, payload compression and typed bodies.
//! - **Rejection**: Every malformed frame surfaces as a protocol error.
//! - **Stream I/O**: Frames split across reads, EOF inside a frame.
//! - **Client**: One-shot request/reply, unreachable and silent peers.

#[cfg(test)]
mod tests {
    use crate::error::ClusterError;
    use crate::executor::types::{Task, TaskId};
    use crate::membership::types::NodeId;
    use crate::protocol::codec::parse_header;
    use crate::protocol::messages::{
        AssignmentReply, AssignmentStatus, ErrorReply, Heartbeat, Origin, TaskAssignment,
    };
    use crate::protocol::types::{HEADER_LEN, MAGIC, MAX_PAYLOAD_LEN, VERSION};
    use crate::protocol::{Frame, MessageType, Payload, client, decode, encode, read_frame, write_frame};

    use flate2::Compression;
    use flate2::write::ZlibEncoder;
    use proptest::prelude::*;
    use serde_json::{Value, json};
    use std::collections::BTreeMap;
    use std::io::Write;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            other => panic!("test payload must be an object, got {other}"),
        }
    }

    fn zlib(bytes: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes).unwrap();
        encoder.finish().unwrap()
    }

    fn raw_frame(type_code: u8, body: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC);
        bytes.push(VERSION);
        bytes.push(type_code);
        bytes.extend_from_slice(&(body.len() as u32).to_be_bytes());
        bytes.extend_from_slice(body);
        bytes
    }

    fn assert_protocol_error<T: std::fmt::Debug>(result: Result<T, ClusterError>, needle: &str) {
        match result {
            Err(ClusterError::Protocol(msg)) => {
                assert!(msg.contains(needle), "expected '{needle}' in '{msg}'")
            }
            other => panic!("expected protocol error containing '{needle}', got {other:?}"),
        }
    }

    // ============================================================
    // HEADER TESTS
    // ============================================================

    #[test]
    fn test_header_layout() {
        // ARRANGE
        let body = payload(json!({"node_id": "n1"}));

        // ACT
        let bytes = encode(MessageType::Heartbeat, &body).unwrap();

        // ASSERT
        assert_eq!(&bytes[0..4], &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(bytes[4], 1);
        assert_eq!(bytes[5], 0x01);
        let declared = u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize;
        assert_eq!(declared, bytes.len() - HEADER_LEN);
    }

    #[test]
    fn test_message_type_codes() {
        let codes: Vec<u8> = MessageType::ALL.iter().map(|t| t.code()).collect();

        assert_eq!(codes, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        for t in MessageType::ALL {
            assert_eq!(MessageType::try_from(t.code()).unwrap(), t);
        }
        assert!(MessageType::try_from(0x00).is_err());
        assert!(MessageType::try_from(0x09).is_err());
    }

    #[test]
    fn test_message_type_names() {
        assert_eq!(MessageType::TaskAssignment.to_string(), "TASK_ASSIGNMENT");
        assert_eq!(MessageType::NodeRegistration.to_string(), "NODE_REGISTRATION");
    }

    // ============================================================
    // ROUND TRIP TESTS
    // ============================================================

    #[test]
    fn test_every_message_type_round_trips() {
        let body = payload(json!({
            "task_id": "t-1",
            "nested": {"data": [1, 2, 3], "flag": true},
            "text": "héllo"
        }));

        for message_type in MessageType::ALL {
            let bytes = encode(message_type, &body).unwrap();
            let frame = decode(&bytes).unwrap();

            assert_eq!(frame.message_type, message_type);
            assert_eq!(frame.payload, body);
        }
    }

    #[test]
    fn test_empty_payload_round_trips() {
        let bytes = encode(MessageType::Shutdown, &Payload::new()).unwrap();

        let frame = decode(&bytes).unwrap();

        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_trailing_bytes_are_ignored() {
        let mut bytes = encode(MessageType::Heartbeat, &payload(json!({"a": 1}))).unwrap();
        bytes.extend_from_slice(b"next frame");

        let frame = decode(&bytes).unwrap();

        assert_eq!(frame.payload, payload(json!({"a": 1})));
    }

    proptest! {
        #[test]
        fn prop_encoded_frames_decode_to_the_same_frame(
            type_index in 0usize..MessageType::ALL.len(),
            fields in prop::collection::btree_map("[a-z_]{1,12}", any::<i64>(), 0..16),
            label in ".{0,64}",
        ) {
            let message_type = MessageType::ALL[type_index];
            let mut body: Payload = fields
                .into_iter()
                .map(|(k, v)| (k, Value::from(v)))
                .collect();
            body.insert("label".to_string(), Value::String(label));

            let frame = decode(&encode(message_type, &body).unwrap()).unwrap();

            prop_assert_eq!(frame.message_type, message_type);
            prop_assert_eq!(frame.payload, body);
        }
    }

    // ============================================================
    // REJECTION TESTS
    // ============================================================

    #[test]
    fn test_bad_magic_is_rejected() {
        let mut bytes = encode(MessageType::Heartbeat, &Payload::new()).unwrap();
        bytes[0..4].copy_from_slice(&[0xCA, 0xFE, 0xBA, 0xBE]);

        assert_protocol_error(decode(&bytes), "magic");
    }

    #[test]
    fn test_unsupported_version_is_rejected() {
        let mut bytes = encode(MessageType::Heartbeat, &Payload::new()).unwrap();
        bytes[4] = 2;

        assert_protocol_error(decode(&bytes), "version");
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let bytes = raw_frame(0x42, &zlib(b"{}"));

        assert_protocol_error(decode(&bytes), "unknown message type");
    }

    #[test]
    fn test_oversized_declared_length_is_rejected() {
        let mut header = [0u8; HEADER_LEN];
        header[0..4].copy_from_slice(&MAGIC);
        header[4] = VERSION;
        header[5] = MessageType::TaskAssignment.code();
        header[6..10].copy_from_slice(&((MAX_PAYLOAD_LEN as u32) + 1).to_be_bytes());

        assert_protocol_error(parse_header(&header), "exceeds limit");
    }

    #[test]
    fn test_short_header_is_rejected() {
        assert_protocol_error(decode(&[0xDE, 0xAD, 0xBE]), "too short");
        assert_protocol_error(decode(&[]), "too short");
    }

    #[test]
    fn test_truncated_payload_is_rejected() {
        let bytes = encode(MessageType::TaskResult, &payload(json!({"task_id": "abc"}))).unwrap();

        assert_protocol_error(decode(&bytes[..bytes.len() - 3]), "incomplete frame");
    }

    #[test]
    fn test_uncompressed_body_is_rejected() {
        // plain JSON where zlib data is expected
        let bytes = raw_frame(MessageType::Heartbeat.code(), b"{\"a\":1}");

        assert_protocol_error(decode(&bytes), "decompression");
    }

    #[test]
    fn test_non_map_body_is_rejected() {
        let bytes = raw_frame(MessageType::Heartbeat.code(), &zlib(b"[1,2,3]"));

        assert_protocol_error(decode(&bytes), "JSON map");
    }

    #[test]
    fn test_non_map_message_cannot_be_framed() {
        let result = Frame::from_message(MessageType::Error, &vec![1, 2, 3]);

        assert_protocol_error(result, "must be a map");
    }

    // ============================================================
    // TYPED BODY TESTS
    // ============================================================

    #[test]
    fn test_typed_message_survives_the_wire() {
        // ARRANGE
        let assignment = TaskAssignment {
            task_id: TaskId::from("task-7"),
            task_type: "compute".to_string(),
            payload: payload(json!({"op": "fib", "n": 20})),
            timeout_ms: 1_500,
            origin: Origin {
                node_id: NodeId::from("origin"),
                address: "10.0.0.1".to_string(),
                port: 8080,
            },
        };

        // ACT
        let frame = Frame::from_message(MessageType::TaskAssignment, &assignment).unwrap();
        let decoded = decode(&encode(frame.message_type, &frame.payload).unwrap()).unwrap();
        let back: TaskAssignment = decoded.parse().unwrap();

        // ASSERT
        assert_eq!(back, assignment);
        assert_eq!(back.origin.endpoint(), "10.0.0.1:8080");
    }

    #[test]
    fn test_assignment_saturates_unbounded_timeout() {
        let origin = Origin {
            node_id: NodeId::from("origin"),
            address: "127.0.0.1".to_string(),
            port: 9000,
        };
        let task = Task::new("compute", Payload::new()).with_timeout(Duration::MAX);

        let assignment = TaskAssignment::from_task(&task, origin);

        assert_eq!(assignment.timeout_ms, u64::MAX);
        let hosted = assignment.into_task(NodeId::from("host"));
        assert_eq!(hosted.timeout, Duration::from_millis(u64::MAX));
    }

    #[test]
    fn test_heartbeat_optional_fields_default() {
        let frame = Frame::new(
            MessageType::Heartbeat,
            payload(json!({"node_id": "n1", "load_average": 0.25, "tasks_running": 2})),
        );

        let heartbeat: Heartbeat = frame.parse().unwrap();

        assert_eq!(heartbeat.tasks_completed, 0);
        assert_eq!(heartbeat.metadata, BTreeMap::new());
    }

    #[test]
    fn test_parse_reports_missing_fields() {
        let frame = Frame::new(MessageType::Heartbeat, payload(json!({"node_id": "n1"})));

        assert_protocol_error(frame.parse::<Heartbeat>(), "malformed HEARTBEAT");
    }

    #[test]
    fn test_assignment_reply_wire_form() {
        let value = serde_json::to_value(AssignmentReply::rejected("busy")).unwrap();

        assert_eq!(value, json!({"status": "rejected", "reason": "busy"}));
        assert_eq!(AssignmentReply::accepted().status, AssignmentStatus::Accepted);
    }

    #[test]
    fn test_error_frame_carries_message() {
        let frame = Frame::error("nope");

        let reply: ErrorReply = frame.parse().unwrap();

        assert_eq!(frame.message_type, MessageType::Error);
        assert_eq!(reply.error, "nope");
    }

    // ============================================================
    // STREAM I/O TESTS
    // ============================================================

    #[tokio::test]
    async fn test_frame_split_across_writes_is_reassembled() {
        // ARRANGE
        let body = payload(json!({"data": (0..200).collect::<Vec<u32>>()}));
        let bytes = encode(MessageType::TaskResult, &body).unwrap();
        let (mut writer, mut reader) = tokio::io::duplex(16);

        // ACT: dribble the frame in 3-byte pieces
        let feeder = tokio::spawn(async move {
            for chunk in bytes.chunks(3) {
                writer.write_all(chunk).await.unwrap();
                tokio::task::yield_now().await;
            }
        });
        let frame = read_frame(&mut reader).await.unwrap();
        feeder.await.unwrap();

        // ASSERT
        assert_eq!(frame.message_type, MessageType::TaskResult);
        assert_eq!(frame.payload, body);
    }

    #[tokio::test]
    async fn test_eof_mid_header_is_a_protocol_error() {
        let (mut writer, mut reader) = tokio::io::duplex(64);
        writer.write_all(&MAGIC).await.unwrap();
        drop(writer);

        assert_protocol_error(read_frame(&mut reader).await, "mid-header");
    }

    #[tokio::test]
    async fn test_eof_mid_payload_is_a_protocol_error() {
        let bytes = encode(MessageType::Heartbeat, &payload(json!({"x": "y"}))).unwrap();
        let (mut writer, mut reader) = tokio::io::duplex(256);
        writer.write_all(&bytes[..bytes.len() - 1]).await.unwrap();
        drop(writer);

        assert_protocol_error(read_frame(&mut reader).await, "mid-payload");
    }

    #[tokio::test]
    async fn test_write_then_read_frame() {
        let frame = Frame::new(MessageType::ClusterStatus, payload(json!({"from": "a"})));
        let (mut writer, mut reader) = tokio::io::duplex(1024);

        write_frame(&mut writer, &frame).await.unwrap();
        let back = read_frame(&mut reader).await.unwrap();

        assert_eq!(back, frame);
    }

    // ============================================================
    // CLIENT TESTS
    // ============================================================

    #[tokio::test]
    async fn test_request_reads_single_reply() {
        // ARRANGE: a server that echoes the frame back with a marker
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut frame = read_frame(&mut stream).await.unwrap();
            frame.payload.insert("echo".to_string(), json!(true));
            write_frame(&mut stream, &frame).await.unwrap();
        });
        let request = Frame::new(MessageType::NodeDiscovery, payload(json!({"from": "me"})));

        // ACT
        let reply = client::request(&addr, &request, Duration::from_secs(2))
            .await
            .unwrap();

        // ASSERT
        assert_eq!(reply.message_type, MessageType::NodeDiscovery);
        assert_eq!(reply.payload.get("echo"), Some(&json!(true)));
        assert_eq!(reply.payload.get("from"), Some(&json!("me")));
    }

    #[tokio::test]
    async fn test_request_to_closed_port_is_a_dispatch_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = client::request(&addr, &Frame::error("x"), Duration::from_secs(2)).await;

        assert!(matches!(result, Err(ClusterError::Dispatch(_))));
    }

    #[tokio::test]
    async fn test_request_to_silent_peer_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let result =
            client::request(&addr, &Frame::error("x"), Duration::from_millis(200)).await;

        match result {
            Err(ClusterError::Dispatch(msg)) => assert!(msg.contains("timed out")),
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
