use mmc_core::protocol::{
    decode, encode, Axis, Command, DeviceError, ErrorCode, LineAccumulator, Mnemonic,
    ProtocolError, Response,
};

fn axis(n: u8) -> Axis {
    Axis::new(n).unwrap()
}

#[test]
fn test_protocol_error_display() {
    let err = ProtocolError::Timeout;
    assert!(!err.to_string().is_empty());
    assert_eq!(err.kind(), "timeout");
}

#[test]
fn test_device_error_display_lists_codes() {
    let err = ProtocolError::DeviceError(vec![DeviceError {
        code: ErrorCode::MoveOutsideSoftLimits,
        mnemonic: "MVA".to_string(),
        message: "Move Outside Soft Limits".to_string(),
    }]);
    let text = err.to_string();
    assert!(text.contains("37"));
    assert!(text.contains("MVA"));
}

#[test]
fn test_wire_format() {
    let mva = Command::write(axis(3), Mnemonic::Mva, Some(-5.0)).unwrap();
    assert_eq!(encode(&mva), b"3MVA-5\n\r");

    let ver = Command::query(axis(12), Mnemonic::Ver).unwrap();
    assert_eq!(encode(&ver), b"12VER?\n\r");
}

#[test]
fn test_reply_split_across_reads() {
    let query = Command::query(axis(1), Mnemonic::Pos).unwrap();
    let mut acc = LineAccumulator::default();

    acc.push(b"#1.0000");
    assert_eq!(acc.next_frame().unwrap(), None);
    acc.push(b"00,0.99998\r\n");

    let frame = acc.next_frame().unwrap().unwrap();
    assert_eq!(
        decode(&frame, &query).unwrap(),
        Response::QueryResult("1.000000,0.99998".to_string())
    );
}

#[test]
fn test_error_frame_beats_payload() {
    let query = Command::query(axis(1), Mnemonic::Vel).unwrap();
    let err = decode(b"#Error 20 - VEL - Motor Disabled\r\n", &query).unwrap_err();
    assert!(matches!(err, ProtocolError::DeviceError(_)));
}

#[test]
fn test_empty_query_reply_is_malformed() {
    let query = Command::query(axis(1), Mnemonic::Ver).unwrap();
    assert!(matches!(
        decode(b"#\r\n", &query),
        Err(ProtocolError::MalformedResponse(_))
    ));
}
