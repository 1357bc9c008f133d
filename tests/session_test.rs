use buttplug_session::buttplug::error::{SessionError, TransportError};
use buttplug_session::buttplug::events::{ClientEvent, DeviceInfo};
use buttplug_session::buttplug::feature::{CommandSlot, FeatureType};
use buttplug_session::buttplug::session::{ConnectionState, Session};
use buttplug_session::buttplug::transport::{
    Transport, TransportEvent, CLOSE_GOING_AWAY, CLOSE_POLICY_VIOLATION,
};

#[derive(Default)]
struct MockTransport {
    opened: Vec<String>,
    sent: Vec<String>,
    closed: Vec<(u16, String)>,
    fail_open: bool,
    fail_send: bool,
}

impl Transport for MockTransport {
    fn open(&mut self, url: &str) -> Result<(), TransportError> {
        if self.fail_open {
            return Err(TransportError::Open("refused".to_string()));
        }
        self.opened.push(url.to_string());
        Ok(())
    }

    fn send(&mut self, text: String) -> Result<(), TransportError> {
        if self.fail_send {
            return Err(TransportError::Send("broken pipe".to_string()));
        }
        self.sent.push(text);
        Ok(())
    }

    fn close(&mut self, code: u16, reason: &str) {
        self.closed.push((code, reason.to_string()));
    }
}

type TestSession = Session<MockTransport, Vec<ClientEvent>>;

const SERVER_INFO: &str =
    r#"[{"ServerInfo":{"Id":1,"ServerName":"S","MessageVersion":3,"MaxPingTime":6000}}]"#;

fn new_session() -> TestSession {
    Session::new(MockTransport::default(), Vec::new())
}

fn receive(session: &mut TestSession, frame: &str) {
    session.handle_transport_event(TransportEvent::Message(frame.to_string()));
}

fn take_sent(session: &mut TestSession) -> Vec<String> {
    std::mem::take(&mut session.transport_mut().sent)
}

fn take_events(session: &mut TestSession) -> Vec<ClientEvent> {
    std::mem::take(session.events_mut())
}

fn connected_session() -> TestSession {
    let mut session = new_session();
    session.connect("X", "ws://127.0.0.1:12345").unwrap();
    session.handle_transport_event(TransportEvent::Opened);
    receive(&mut session, SERVER_INFO);
    take_sent(&mut session);
    take_events(&mut session);
    session
}

fn device_added(index: u32, name: &str, messages: &str) -> String {
    format!(
        r#"[{{"DeviceAdded":{{"Id":0,"DeviceName":"{}","DeviceIndex":{},"DeviceMessageTimingGap":0,"DeviceMessages":{}}}}}]"#,
        name, index, messages
    )
}

const THREE_VIBRATORS: &str = r#"{"ScalarCmd":[
    {"StepCount":20,"ActuatorType":"Vibrate"},
    {"StepCount":20,"ActuatorType":"Vibrate"},
    {"StepCount":20,"ActuatorType":"Vibrate"}]}"#;

const BATTERY_DEVICE: &str = r#"{
    "ScalarCmd":[{"StepCount":20,"ActuatorType":"Vibrate"}],
    "SensorReadCmd":[{"FeatureDescriptor":"Battery Level","SensorType":"Battery","SensorRange":[[0,100]]}]}"#;

#[test]
fn handshake_requests_device_list_and_connects() {
    let mut session = new_session();
    let mut handle = session.connect("X", "ws://127.0.0.1:12345").unwrap();
    assert_eq!(session.state(), ConnectionState::Connecting);
    assert_eq!(session.transport().opened, vec!["ws://127.0.0.1:12345"]);
    assert!(take_sent(&mut session).is_empty());

    session.handle_transport_event(TransportEvent::Opened);
    assert_eq!(session.state(), ConnectionState::AwaitingServerInfo);
    assert_eq!(
        take_sent(&mut session),
        vec![r#"[{"RequestServerInfo":{"Id":1,"ClientName":"X","MessageVersion":3}}]"#]
    );
    assert!(handle.try_result().is_none());

    receive(&mut session, SERVER_INFO);
    assert_eq!(session.state(), ConnectionState::Connected);
    assert_eq!(session.server_name(), "S");
    assert_eq!(take_sent(&mut session), vec![r#"[{"RequestDeviceList":{"Id":2}}]"#]);
    assert_eq!(take_events(&mut session), vec![ClientEvent::Connected]);
    assert!(matches!(handle.try_result(), Some(Ok(()))));

    // Ping every 3 seconds.
    session.advance(2.5).unwrap();
    assert!(take_sent(&mut session).is_empty());
    session.advance(0.5).unwrap();
    assert_eq!(take_sent(&mut session), vec![r#"[{"Ping":{"Id":3}}]"#]);
}

#[test]
fn connect_handle_can_be_awaited() {
    let mut session = new_session();
    let handle = session.connect("X", "ws://127.0.0.1:12345").unwrap();
    session.handle_transport_event(TransportEvent::Opened);
    receive(&mut session, SERVER_INFO);
    assert!(futures::executor::block_on(handle).is_ok());
}

#[test]
fn version_mismatch_fails_the_connect() {
    let mut session = new_session();
    let mut handle = session.connect("X", "ws://127.0.0.1:12345").unwrap();
    session.handle_transport_event(TransportEvent::Opened);
    take_sent(&mut session);

    receive(
        &mut session,
        r#"[{"ServerInfo":{"Id":1,"ServerName":"Old","MessageVersion":2,"MaxPingTime":0}}]"#,
    );
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(take_sent(&mut session).is_empty());
    assert_eq!(session.transport().closed.len(), 1);
    assert_eq!(session.transport().closed[0].0, CLOSE_POLICY_VIOLATION);
    assert!(matches!(
        handle.try_result(),
        Some(Err(SessionError::ConnectionFailed(_)))
    ));
    let events = take_events(&mut session);
    assert!(matches!(events.as_slice(), [ClientEvent::Disconnected { .. }]));
}

#[test]
fn connect_is_rejected_while_connected() {
    let mut session = connected_session();
    assert!(matches!(
        session.connect("X", "ws://127.0.0.1:12345"),
        Err(SessionError::AlreadyConnected)
    ));
    assert!(session.is_connected());
    assert_eq!(session.transport().opened.len(), 1);
}

#[test]
fn failed_open_leaves_the_session_disconnected() {
    let mut session = Session::new(
        MockTransport { fail_open: true, ..Default::default() },
        Vec::new(),
    );
    assert!(matches!(
        session.connect("X", "ws://127.0.0.1:12345"),
        Err(SessionError::Transport(TransportError::Open(_)))
    ));
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(session.server_address(), "");
}

#[test]
fn device_list_is_expanded_into_device_added_events() {
    let mut session = connected_session();
    receive(
        &mut session,
        r#"[{"DeviceList":{"Id":2,"Devices":[
            {"DeviceName":"A","DeviceIndex":0,"DeviceMessages":{"ScalarCmd":[{"StepCount":20,"ActuatorType":"Vibrate"}]}},
            {"DeviceName":"B","DeviceIndex":3,"DeviceDisplayName":"Bee","DeviceMessages":{}}]}}]"#,
    );

    assert_eq!(
        take_events(&mut session),
        vec![
            ClientEvent::DeviceAdded(DeviceInfo {
                index: 0,
                name: "A".to_string(),
                display_name: String::new(),
            }),
            ClientEvent::DeviceAdded(DeviceInfo {
                index: 3,
                name: "B".to_string(),
                display_name: "Bee".to_string(),
            }),
        ]
    );
    assert_eq!(session.devices().count(), 2);
    assert_eq!(session.device(3).unwrap().display_name(), "Bee");
    assert_eq!(session.device(0).unwrap().display_name(), "A");
}

#[test]
fn batched_scalar_command_for_three_features() {
    let mut session = connected_session();
    receive(&mut session, &device_added(5, "Foo", THREE_VIBRATORS));

    session.device_mut(5).unwrap().vibrate_all(0.5, 0.0);
    session.advance(0.016).unwrap();

    assert_eq!(
        take_sent(&mut session),
        vec![concat!(
            r#"[{"ScalarCmd":{"Id":3,"DeviceIndex":5,"Scalars":["#,
            r#"{"Index":0,"Scalar":0.5,"ActuatorType":"Vibrate"},"#,
            r#"{"Index":1,"Scalar":0.5,"ActuatorType":"Vibrate"},"#,
            r#"{"Index":2,"Scalar":0.5,"ActuatorType":"Vibrate"}]}}]"#
        )]
    );
}

#[test]
fn all_devices_share_one_frame_per_tick() {
    let mut session = connected_session();
    receive(&mut session, &device_added(0, "A", THREE_VIBRATORS));
    receive(&mut session, &device_added(1, "B", THREE_VIBRATORS));

    session.device_mut(0).unwrap().stop();
    session.device_mut(1).unwrap().stop();
    session.start_scanning().unwrap();
    session.advance(0.016).unwrap();

    assert_eq!(
        take_sent(&mut session),
        vec![concat!(
            r#"[{"StartScanning":{"Id":3}},"#,
            r#"{"StopDeviceCmd":{"Id":4,"DeviceIndex":0}},"#,
            r#"{"StopDeviceCmd":{"Id":5,"DeviceIndex":1}}]"#
        )]
    );
}

#[test]
fn stop_supersedes_queued_actuation() {
    let mut session = connected_session();
    receive(&mut session, &device_added(5, "Foo", THREE_VIBRATORS));

    let mut device = session.device_mut(5).unwrap();
    device.vibrate_all(1.0, 0.0);
    device.stop();
    session.advance(0.016).unwrap();

    assert_eq!(
        take_sent(&mut session),
        vec![r#"[{"StopDeviceCmd":{"Id":3,"DeviceIndex":5}}]"#]
    );
}

#[test]
fn timing_gap_throttles_per_device() {
    let mut session = connected_session();
    receive(
        &mut session,
        r#"[{"DeviceAdded":{"Id":0,"DeviceName":"Slow","DeviceIndex":1,"DeviceMessageTimingGap":100,
            "DeviceMessages":{"ScalarCmd":[{"StepCount":20,"ActuatorType":"Vibrate"}]}}}]"#,
    );
    session.device_mut(1).unwrap().vibrate_all(0.3, 0.0);

    session.advance(0.05).unwrap();
    assert!(take_sent(&mut session).is_empty());
    session.advance(0.03).unwrap();
    assert!(take_sent(&mut session).is_empty());
    session.advance(0.05).unwrap();
    assert_eq!(take_sent(&mut session).len(), 1);
}

#[test]
fn reconnect_with_same_identity_keeps_features() {
    let mut session = connected_session();
    let frame = device_added(5, "Foo", BATTERY_DEVICE);
    receive(&mut session, &frame);
    receive(
        &mut session,
        r#"[{"SensorReading":{"Id":0,"DeviceIndex":5,"SensorIndex":0,"SensorType":"Battery","Data":[80]}}]"#,
    );
    receive(&mut session, r#"[{"DeviceRemoved":{"Id":0,"DeviceIndex":5}}]"#);
    assert!(!session.device(5).unwrap().is_connected());
    assert_eq!(session.devices().count(), 0);
    assert_eq!(session.all_devices().count(), 1);

    receive(&mut session, &frame);
    let device = session.device(5).unwrap();
    assert!(device.is_connected());
    assert_eq!(device.features().len(), 2);
    assert_eq!(device.features()[1].command_slot(), CommandSlot::SensorRead(0));
    assert_eq!(device.features()[1].last_sensor_reading(), &[80]);
    assert!((device.battery_level() - 0.8).abs() < 1e-9);
}

#[test]
fn reused_index_rebuilds_the_device() {
    let mut session = connected_session();
    receive(&mut session, &device_added(5, "Foo", BATTERY_DEVICE));
    receive(
        &mut session,
        r#"[{"SensorReading":{"Id":0,"DeviceIndex":5,"SensorIndex":0,"SensorType":"Battery","Data":[80]}}]"#,
    );

    receive(&mut session, &device_added(5, "Bar", THREE_VIBRATORS));
    let device = session.device(5).unwrap();
    assert_eq!(device.descriptive_name(), "Bar");
    assert_eq!(device.features().len(), 3);
    assert!(!device.has_battery_level());
}

#[test]
fn sensor_reading_resolves_by_type_and_index() {
    let mut session = connected_session();
    receive(&mut session, &device_added(5, "Foo", BATTERY_DEVICE));
    take_events(&mut session);

    let mut read = session
        .device_mut(5)
        .unwrap()
        .feature_mut(1)
        .unwrap()
        .async_read();
    session.advance(0.016).unwrap();
    assert_eq!(
        take_sent(&mut session),
        vec![r#"[{"SensorReadCmd":{"Id":3,"DeviceIndex":5,"SensorIndex":0,"SensorType":"Battery"}}]"#]
    );
    assert!(read.try_result().is_none());

    receive(
        &mut session,
        r#"[{"SensorReading":{"Id":3,"DeviceIndex":5,"SensorIndex":0,"SensorType":"Battery","Data":[55]}}]"#,
    );
    assert_eq!(read.try_result().unwrap().unwrap(), vec![55]);
    assert_eq!(
        take_events(&mut session),
        vec![ClientEvent::SensorReading {
            device_index: 5,
            feature_index: 1,
            feature_type: FeatureType::Battery,
            data: vec![55],
        }]
    );
}

#[test]
fn unmatched_sensor_reading_changes_nothing() {
    let mut session = connected_session();
    receive(&mut session, &device_added(5, "Foo", BATTERY_DEVICE));
    take_events(&mut session);

    receive(
        &mut session,
        r#"[{"SensorReading":{"Id":0,"DeviceIndex":5,"SensorIndex":1,"SensorType":"Battery","Data":[55]}}]"#,
    );
    receive(
        &mut session,
        r#"[{"SensorReading":{"Id":0,"DeviceIndex":5,"SensorIndex":0,"SensorType":"RSSI","Data":[-40]}}]"#,
    );
    receive(
        &mut session,
        r#"[{"SensorReading":{"Id":0,"DeviceIndex":9,"SensorIndex":0,"SensorType":"Battery","Data":[55]}}]"#,
    );

    assert!(take_events(&mut session).is_empty());
    assert!(session.device(5).unwrap().features()[1].last_sensor_reading().is_empty());
    assert!(session.is_connected());
}

#[test]
fn ambiguous_sensor_reading_reaches_every_match() {
    let mut session = connected_session();
    receive(
        &mut session,
        &device_added(
            5,
            "Foo",
            r#"{"SensorReadCmd":[{"SensorType":"Battery","SensorRange":[[0,100]]}],
                "SensorSubscribeCmd":[{"SensorType":"Battery","SensorRange":[[0,100]]}]}"#,
        ),
    );
    take_events(&mut session);
    {
        let device = session.device(5).unwrap();
        assert_eq!(device.features()[0].command_slot(), CommandSlot::SensorRead(0));
        assert_eq!(device.features()[1].command_slot(), CommandSlot::SensorSubscribe(0));
    }

    receive(
        &mut session,
        r#"[{"SensorReading":{"Id":0,"DeviceIndex":5,"SensorIndex":0,"SensorType":"Battery","Data":[42]}}]"#,
    );

    let reading = |feature_index| ClientEvent::SensorReading {
        device_index: 5,
        feature_index,
        feature_type: FeatureType::Battery,
        data: vec![42],
    };
    assert_eq!(take_events(&mut session), vec![reading(0), reading(1)]);
    let device = session.device(5).unwrap();
    assert_eq!(device.features()[0].last_sensor_reading(), &[42]);
    assert_eq!(device.features()[1].last_sensor_reading(), &[42]);
    assert!(session.is_connected());
}

#[test]
fn battery_level_handles_extreme_sensor_ranges() {
    let mut session = connected_session();
    receive(
        &mut session,
        &device_added(
            5,
            "Foo",
            r#"{"SensorReadCmd":[{"SensorType":"Battery","SensorRange":[[-2147483648,2147483647]]}]}"#,
        ),
    );
    receive(
        &mut session,
        r#"[{"SensorReading":{"Id":0,"DeviceIndex":5,"SensorIndex":0,"SensorType":"Battery","Data":[100]}}]"#,
    );

    let level = session.device(5).unwrap().battery_level();
    assert!(level > 0.5 && level < 0.51);
}

#[test]
fn unknown_device_removal_is_ignored() {
    let mut session = connected_session();
    receive(&mut session, r#"[{"DeviceRemoved":{"Id":0,"DeviceIndex":42}}]"#);
    assert!(take_events(&mut session).is_empty());
    assert!(session.is_connected());
}

#[test]
fn scanning_finished_is_reported() {
    let mut session = connected_session();
    receive(&mut session, r#"[{"ScanningFinished":{"Id":0}}]"#);
    assert_eq!(take_events(&mut session), vec![ClientEvent::ScanningFinished]);
}

#[test]
fn client_only_message_is_a_protocol_violation() {
    let mut session = connected_session();
    receive(&mut session, &device_added(5, "Foo", THREE_VIBRATORS));
    take_events(&mut session);

    receive(
        &mut session,
        r#"[{"StopAllDevices":{"Id":7}},{"ScanningFinished":{"Id":0}}]"#,
    );
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(session.transport().closed[0].0, CLOSE_POLICY_VIOLATION);
    let events = take_events(&mut session);
    assert!(matches!(events.as_slice(), [ClientEvent::Disconnected { .. }]));
}

#[test]
fn transport_close_resets_but_keeps_devices() {
    let mut session = connected_session();
    receive(&mut session, &device_added(5, "Foo", THREE_VIBRATORS));
    session.device_mut(5).unwrap().vibrate_all(0.5, 0.0);
    take_events(&mut session);

    session.handle_transport_event(TransportEvent::Closed {
        code: 1006,
        reason: "gone".to_string(),
        was_clean: false,
    });
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(
        take_events(&mut session),
        vec![ClientEvent::Disconnected { reason: "gone".to_string() }]
    );
    assert!(!session.device(5).unwrap().is_connected());
    assert_eq!(session.all_devices().count(), 1);
    assert!(session.transport().closed.is_empty());

    // A second close is not a second disconnect.
    session.handle_transport_event(TransportEvent::Closed {
        code: 1006,
        reason: "gone".to_string(),
        was_clean: false,
    });
    assert!(take_events(&mut session).is_empty());

    // Ids start again from 1 after reconnecting.
    session.connect("X", "ws://127.0.0.1:12345").unwrap();
    session.handle_transport_event(TransportEvent::Opened);
    assert_eq!(
        take_sent(&mut session),
        vec![r#"[{"RequestServerInfo":{"Id":1,"ClientName":"X","MessageVersion":3}}]"#]
    );
}

#[test]
fn commands_queued_before_a_disconnect_are_not_sent_after_reconnecting() {
    let mut session = connected_session();
    let frame = device_added(5, "Foo", THREE_VIBRATORS);
    receive(&mut session, &frame);
    {
        let mut device = session.device_mut(5).unwrap();
        device.vibrate_all(0.5, 1.0);
        device.stop();
    }

    session.handle_transport_event(TransportEvent::Closed {
        code: 1006,
        reason: "gone".to_string(),
        was_clean: false,
    });
    session.advance(0.016).unwrap();
    assert!(take_sent(&mut session).is_empty());

    session.connect("X", "ws://127.0.0.1:12345").unwrap();
    session.handle_transport_event(TransportEvent::Opened);
    receive(&mut session, SERVER_INFO);
    receive(&mut session, &frame);
    take_sent(&mut session);
    assert!(session.device(5).unwrap().is_connected());

    session.advance(0.016).unwrap();
    session.advance(2.0).unwrap();
    assert!(take_sent(&mut session).is_empty());
}

#[test]
fn stop_client_closes_and_rejects_a_second_stop() {
    let mut session = connected_session();
    session.stop_client("done").unwrap();
    assert_eq!(
        session.transport().closed,
        vec![(CLOSE_GOING_AWAY, "done".to_string())]
    );
    assert!(matches!(
        session.stop_client("again"),
        Err(SessionError::NotConnected)
    ));
    assert!(matches!(
        session.enqueue_message(buttplug_session::buttplug::message::StopAllDevices { id: 0 }),
        Err(SessionError::NotConnected)
    ));
}

#[test]
fn send_failure_disconnects() {
    let mut session = connected_session();
    session.transport_mut().fail_send = true;
    session.start_scanning().unwrap();
    assert!(matches!(
        session.advance(0.016),
        Err(SessionError::Transport(TransportError::Send(_)))
    ));
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[test]
fn garbled_frame_is_dropped_without_partial_application() {
    let mut session = connected_session();
    receive(
        &mut session,
        r#"[{"ScanningFinished":{"Id":0}},{"NotAMessage":{"Id":0}}]"#,
    );
    assert!(take_events(&mut session).is_empty());
    assert!(session.is_connected());
}
