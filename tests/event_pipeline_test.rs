//! Device lines through the scanner, queue and recorder, without a controller.

use behavior_daq::adapters::{Connector, MockDevice};
use behavior_daq::data::CapacityPolicy;
use behavior_daq::protocol::{
    decode_line, encode_upload, DecodedLine, Event, EventKind, ParameterSet, Rig,
};
use behavior_daq::session::{
    EventQueue, EventRecorder, EventScanner, RecordOutcome, ScannerConfig,
};
use std::time::Duration;

fn scanner_config() -> ScannerConfig {
    ScannerConfig {
        read_timeout: Duration::from_millis(20),
        ..ScannerConfig::default()
    }
}

/// Play `lines` through a scanner and return what reached the queue.
async fn scan_lines(lines: &[&str]) -> Vec<Event> {
    let device = MockDevice::new().with_script(lines.iter().copied());
    let mut port = device.connector().open("mock").unwrap();
    let reader = port.try_clone_reader().unwrap();
    port.write(b"E").unwrap();

    let mut queue = EventQueue::new();
    let scanner = EventScanner::spawn(reader, queue.sender(), scanner_config());
    scanner.join().await.unwrap();
    port.close().unwrap();

    std::iter::from_fn(|| queue.try_pop()).collect()
}

#[tokio::test]
async fn test_malformed_lines_never_reach_the_queue() {
    let events = scan_lines(&[
        "hello world",
        "1,10,1",
        "1,x,1",
        "",
        "2,  20 ,5",
        "3,30,1,9",
        "Parameters received",
        "0,40",
    ])
    .await;

    let codes: Vec<i64> = events.iter().map(|e| e.code).collect();
    assert_eq!(codes, [1, 2, 3, 0]);
    assert_eq!(events[1], Event::new(2, 20, Some(5)));
    // fields past the payload are ignored
    assert_eq!(events[2], Event::new(3, 30, Some(1)));
}

#[tokio::test]
async fn test_scanner_stops_after_end_code() {
    let device = MockDevice::new().with_script(["1,10,1", "0,20", "1,30,1"]);
    let mut port = device.connector().open("mock").unwrap();
    let reader = port.try_clone_reader().unwrap();
    port.write(b"E").unwrap();

    let mut queue = EventQueue::new();
    let report = EventScanner::spawn(reader, queue.sender(), scanner_config())
        .join()
        .await
        .unwrap();

    assert_eq!(report.events, 2);
    assert_eq!(queue.clear(), 2);
    assert_eq!(device.pending_lines(), 1);
    port.close().unwrap();
}

#[tokio::test]
async fn test_order_preserved_per_kind() {
    let events = scan_lines(&[
        "1,5,1", "2,6,3", "1,7,0", "2,8,-1", "3,9", "1,11,1", "2,12,2", "0,13",
    ])
    .await;

    let mut recorder = EventRecorder::new(
        Rig::GoNoGo,
        &Rig::GoNoGo.default_parameters(),
        CapacityPolicy::Fixed { columns: 16 },
    )
    .unwrap();
    for event in events {
        recorder.record(event).unwrap();
    }
    recorder.trim_all();

    let lick = recorder.store(EventKind::Lick).unwrap();
    assert_eq!(lick.rows(), [&[5, 7, 11][..], &[1, 0, 1][..]]);
    let movement = recorder.store(EventKind::Movement).unwrap();
    assert_eq!(movement.rows(), [&[6, 8, 12][..], &[3, -1, 2][..]]);
    assert_eq!(recorder.store(EventKind::TrialStart).unwrap().counter(), 1);
    assert_eq!(recorder.store(EventKind::Cs).unwrap().width(), 0);
    assert_eq!(recorder.ended_at(), Some(13));
}

#[test]
fn test_end_code_is_terminal() {
    let mut recorder = EventRecorder::new(
        Rig::Conveyor,
        &Rig::Conveyor.default_parameters(),
        CapacityPolicy::default(),
    )
    .unwrap();
    recorder.record(Event::new(1, 10, None)).unwrap();
    assert_eq!(
        recorder.record(Event::new(0, 20, None)).unwrap(),
        RecordOutcome::End { timestamp: 20 }
    );
    for ts in 21..30 {
        assert_eq!(
            recorder.record(Event::new(1, ts, None)).unwrap(),
            RecordOutcome::AfterEnd
        );
    }
    assert_eq!(recorder.counters()[&EventKind::TrialStart], 1);
}

#[test]
fn test_trim_matches_counters_for_every_kind() {
    let params = Rig::GoNoGo.default_parameters();
    let mut recorder =
        EventRecorder::new(Rig::GoNoGo, &params, CapacityPolicy::default()).unwrap();
    for (i, code) in [1, 1, 2, 5, 7, 9, 9, 9].into_iter().enumerate() {
        recorder.record(Event::new(code, i as i64, Some(1))).unwrap();
    }
    recorder.trim_all();
    for store in recorder.stores() {
        assert_eq!(store.width(), store.counter(), "{}", store.kind());
        assert_eq!(store.to_dataset().shape, [2, store.counter()]);
    }
}

#[test]
fn test_upload_follows_insertion_order() {
    let mut params = ParameterSet::new();
    params.insert("zeta", 1);
    params.insert("alpha", 2);
    params.insert("mid", 3);
    params.insert("alpha", 20);

    let upload = encode_upload(b'D', &params);
    assert_eq!(upload, b"D1+20+3");

    let values: Vec<i64> = String::from_utf8(upload[1..].to_vec())
        .unwrap()
        .split('+')
        .map(|v| v.parse().unwrap())
        .collect();
    assert_eq!(values, params.values().collect::<Vec<_>>());
}

#[test]
fn test_go_no_go_defaults_upload_in_schema_order() {
    let params = Rig::GoNoGo.default_parameters();
    let upload = String::from_utf8(encode_upload(b'D', &params)).unwrap();
    assert!(upload.starts_with("D0+0+0+1200000+100+0+0+1+8000"));
    assert!(upload.ends_with("+0+100+50"));
    assert_eq!(upload[1..].split('+').count(), params.len());
}

#[test]
fn test_decode_examples() {
    assert_eq!(
        decode_line("5,1234,1"),
        DecodedLine::Event(Event::new(5, 1234, Some(1)))
    );
    assert_eq!(
        decode_line("hello world"),
        DecodedLine::RawText("hello world".to_string())
    );
}
