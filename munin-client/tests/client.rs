use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use munin_client::{ClientConfig, NodeClient, NodeError, Reply, ServiceFailure};

const GREETING: &str = "# munin node at testhost";

type Handler = fn(usize, &str, &mut TcpStream) -> bool;

/// Serves `connections` sequential connections. The handler gets the
/// connection index and each request line; returning false hangs up.
fn spawn_node(connections: usize, handler: Handler) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();

    thread::spawn(move || {
        for idx in 0..connections {
            let (mut stream, _) = listener.accept().expect("accept");
            let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
            write_lines(&mut stream, &[GREETING]);
            let mut reader = BufReader::new(stream.try_clone().expect("clone"));
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
                if !handler(idx, line.trim_end(), &mut stream) {
                    break;
                }
            }
        }
    });

    port
}

fn write_lines(stream: &mut TcpStream, lines: &[&str]) {
    for line in lines {
        let _ = stream.write_all(line.as_bytes());
        let _ = stream.write_all(b"\n");
    }
    let _ = stream.flush();
}

fn client_for(port: u16) -> NodeClient {
    NodeClient::with_config(ClientConfig {
        host: "127.0.0.1".to_string(),
        port,
        connect_timeout: Some(Duration::from_secs(1)),
        read_timeout: Some(Duration::from_secs(1)),
        write_timeout: Some(Duration::from_secs(1)),
        ..ClientConfig::default()
    })
}

fn answer(command: &str, stream: &mut TcpStream) {
    match command {
        "version" => write_lines(stream, &["munins node on myhost"]),
        "list" => write_lines(stream, &["cpu load  memory"]),
        "list otherhost" => write_lines(stream, &["df"]),
        "nodes" => write_lines(stream, &["myhost", "otherhost", "."]),
        "config cpu" => write_lines(
            stream,
            &[
                "graph_title CPU usage",
                "graph_args --base 1000 -l 0",
                "user.label user",
                "user.type DERIVE",
                ".",
            ],
        ),
        "config load" => write_lines(
            stream,
            &["# load plugin", "graph_title Load", "load.label Load", "."],
        ),
        "fetch load" => write_lines(stream, &["load.value 0.12", "."]),
        "fetch cpu" => write_lines(stream, &["user.value 1200", "system.value U", "."]),
        "config broken" | "fetch broken" => write_lines(stream, &["# Bad exit", "."]),
        _ => write_lines(stream, &["# Unknown service", "."]),
    }
}

#[test]
fn version_is_read_once_per_session() {
    static CALLS: AtomicUsize = AtomicUsize::new(0);
    let port = spawn_node(1, |_, command, stream| {
        if command == "version" {
            CALLS.fetch_add(1, Ordering::SeqCst);
        }
        answer(command, stream);
        true
    });

    let mut node = client_for(port);
    assert_eq!(&*node.version().expect("version"), "myhost");
    assert_eq!(&*node.version().expect("cached version"), "myhost");
    assert_eq!(node.list().expect("list").len(), 3);
    assert_eq!(CALLS.load(Ordering::SeqCst), 1);
}

#[test]
fn version_rejects_foreign_banner() {
    let port = spawn_node(1, |_, _, stream| {
        write_lines(stream, &["hello"]);
        true
    });

    let mut node = client_for(port);
    let err = node.version().unwrap_err();
    assert!(matches!(err, NodeError::InvalidResponse(_)));
}

#[test]
fn connect_reads_greeting() {
    let port = spawn_node(1, |_, command, stream| {
        answer(command, stream);
        true
    });

    let mut node = client_for(port);
    assert!(!node.is_connected());
    node.connect().expect("connect");
    assert!(node.is_connected());
    assert_eq!(node.greeting(), Some(GREETING));
}

#[test]
fn rejects_greeting_without_comment_marker() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        write_lines(&mut stream, &["SSH-2.0-OpenSSH"]);
        thread::sleep(Duration::from_millis(200));
    });

    let mut node = client_for(port);
    assert!(matches!(node.connect(), Err(NodeError::InvalidResponse(_))));
    assert!(!node.is_connected());
}

#[test]
fn lists_services_and_nodes() {
    let port = spawn_node(1, |_, command, stream| {
        answer(command, stream);
        true
    });

    let mut node = client_for(port);
    assert_eq!(&*node.list().expect("list"), &["cpu", "load", "memory"]);
    assert_eq!(&*node.list_node("otherhost").expect("list node"), &["df"]);
    assert_eq!(&*node.nodes().expect("nodes"), &["myhost", "otherhost"]);
}

#[test]
fn config_single_service_returns_one() {
    let port = spawn_node(1, |_, command, stream| {
        answer(command, stream);
        true
    });

    let mut node = client_for(port);
    let config = node.config("cpu").expect("config").into_one().expect("one");
    assert_eq!(config.title(), Some("CPU usage"));
    assert_eq!(config.field_attr("user", "type"), Some("DERIVE"));
    assert_eq!(config.graph_args().expect("args").parsed.get("base"), Some(&1000));
}

#[test]
fn config_skips_unknown_service() {
    let port = spawn_node(1, |_, command, stream| {
        answer(command, stream);
        true
    });

    let mut node = client_for(port);
    let reply = node.config(["load", "missing"]).expect("config");
    let configs = match reply {
        Reply::Many(configs) => configs,
        Reply::One(_) => panic!("batch request must yield a batch reply"),
    };
    assert_eq!(configs.len(), 1);
    assert_eq!(configs[0].title(), Some("Load"));

    let report = node.config_report(["load", "missing"]).expect("report");
    let failed: Vec<_> = report.failed().collect();
    assert_eq!(failed, vec![("missing", ServiceFailure::UnknownService)]);
}

#[test]
fn single_unknown_service_yields_empty_batch() {
    let port = spawn_node(1, |_, command, stream| {
        answer(command, stream);
        true
    });

    let mut node = client_for(port);
    let reply = node.fetch("missing").expect("fetch");
    assert_eq!(reply, Reply::Many(Vec::new()));
}

#[test]
fn config_cache_ignores_request_order() {
    static CONFIGS: AtomicUsize = AtomicUsize::new(0);
    let port = spawn_node(1, |_, command, stream| {
        if command.starts_with("config ") {
            CONFIGS.fetch_add(1, Ordering::SeqCst);
        }
        answer(command, stream);
        true
    });

    let mut node = client_for(port);
    let first = node.config(["cpu", "load", "cpu"]).expect("config").into_vec();
    let second = node.config(["load", "cpu"]).expect("config").into_vec();

    assert_eq!(CONFIGS.load(Ordering::SeqCst), 2);
    assert_eq!(first.len(), 2);
    assert_eq!(first[0].title(), Some("CPU usage"));
    assert_eq!(second[0].title(), Some("Load"));
    assert_eq!(second[1].title(), Some("CPU usage"));
}

#[test]
fn fetch_is_never_cached() {
    static FETCHES: AtomicUsize = AtomicUsize::new(0);
    let port = spawn_node(1, |_, command, stream| {
        if command.starts_with("fetch ") {
            FETCHES.fetch_add(1, Ordering::SeqCst);
        }
        answer(command, stream);
        true
    });

    let mut node = client_for(port);
    let values = node.fetch("load").expect("fetch").into_one().expect("one");
    assert_eq!(values.get("load"), Some("0.12"));
    node.fetch("load").expect("fetch again");
    assert_eq!(FETCHES.load(Ordering::SeqCst), 2);
}

#[test]
fn fetch_batch_keeps_order() {
    let port = spawn_node(1, |_, command, stream| {
        answer(command, stream);
        true
    });

    let mut node = client_for(port);
    let values = node.fetch(vec!["cpu", "load"]).expect("fetch").into_vec();
    assert_eq!(values.len(), 2);
    assert!(values[0].is_unknown("system"));
    assert_eq!(values[0].as_f64("user"), Some(1200.0));
    assert_eq!(values[1].get("load"), Some("0.12"));
}

#[test]
fn strict_calls_surface_service_failures() {
    let port = spawn_node(1, |_, command, stream| {
        answer(command, stream);
        true
    });

    let mut node = client_for(port);
    let err = node.service_values("missing").unwrap_err();
    assert!(matches!(err, NodeError::UnknownService(ref name) if name == "missing"));
    let err = node.service_config("broken").unwrap_err();
    assert!(matches!(err, NodeError::BadExit(ref name) if name == "broken"));
    assert_eq!(
        node.service_values("load").expect("values").get("load"),
        Some("0.12")
    );
}

#[test]
fn invalid_arguments_never_reach_the_node() {
    let mut node = client_for(1);
    let empty: Vec<String> = Vec::new();
    assert!(matches!(node.config(empty), Err(NodeError::InvalidArgument(_))));
    assert!(matches!(node.fetch(""), Err(NodeError::InvalidArgument(_))));
    assert!(matches!(
        node.fetch("cpu\nquit"),
        Err(NodeError::InvalidArgument(_))
    ));
}

#[test]
fn reopens_after_disconnect_with_reconnect() {
    let port = spawn_node(2, |idx, command, stream| {
        if command == "fetch load" {
            let line = format!("load.value {}", idx);
            write_lines(stream, &[line.as_str(), "."]);
        }
        true
    });

    let mut node = client_for(port);
    let first = node.service_values("load").expect("first fetch");
    assert_eq!(first.get("load"), Some("0"));

    node.disconnect(true);
    assert!(!node.is_connected());

    let second = node.service_values("load").expect("fetch after reopen");
    assert_eq!(second.get("load"), Some("1"));
    assert!(node.is_connected());
}

#[test]
fn stays_closed_after_disconnect_without_reconnect() {
    let port = spawn_node(2, |_, command, stream| {
        answer(command, stream);
        true
    });

    let mut node = client_for(port);
    node.service_values("load").expect("fetch");
    node.disconnect(false);

    let err = node.service_values("load").unwrap_err();
    assert!(err.is_connection());
    assert!(!node.is_connected());

    node.connect().expect("explicit reconnect");
    node.service_values("load").expect("fetch after explicit connect");
}

#[test]
fn truncated_packet_fails_then_reconnects() {
    let port = spawn_node(2, |idx, command, stream| {
        if idx == 0 {
            write_lines(stream, &["load.value 0.12"]);
            return false;
        }
        answer(command, stream);
        true
    });

    let mut node = client_for(port);
    let err = node.fetch("load").unwrap_err();
    assert!(err.is_connection());
    assert!(!node.is_connected());

    let values = node.fetch("load").expect("fetch on new connection");
    assert_eq!(values.len(), 1);
}

#[test]
fn replies_serialize_to_json() {
    let port = spawn_node(1, |_, command, stream| {
        answer(command, stream);
        true
    });

    let mut node = client_for(port);
    let reply = node.fetch("load").expect("fetch");
    let json = serde_json::to_value(&reply).expect("json");
    assert_eq!(json, serde_json::json!({ "load": "0.12" }));
}
