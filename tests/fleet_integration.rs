/// 스텁 supervisord 기반 통합 테스트
///
/// 실제 supervisord 없이 std TcpListener로 XML-RPC over HTTP를 흉내 내는
/// 스텁 서버를 띄워서 재시도/인증/관대-엄격 정책과 모니터 전이를 검증합니다.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use taba_chan::monitor::{MonitorConfig, StatusMonitor};
use taba_chan::protocol::client::SupervisorClient;
use taba_chan::protocol::{LogKind, ProtocolError, RetryPolicy};
use taba_chan::registry::{HostDescriptor, HostStore};
use taba_chan::service::{FleetService, ProcessAction, ServiceError};
use tokio::sync::RwLock;

/// 스텁의 응답 한 건
enum Reply {
    Xml(String),
    Status(u16),
}

/// 요청 본문과 누적 요청 번호를 받아 응답을 결정하는 스텁 supervisord
struct StubSupervisor {
    port: u16,
    hits: Arc<AtomicUsize>,
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl StubSupervisor {
    fn spawn<F>(responder: F) -> Self
    where
        F: Fn(usize, &str) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind stub listener");
        let port = listener.local_addr().unwrap().port();
        listener.set_nonblocking(true).unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let stop = Arc::new(AtomicBool::new(false));

        let thread_hits = hits.clone();
        let thread_stop = stop.clone();
        let thread = std::thread::spawn(move || {
            while !thread_stop.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        stream.set_nonblocking(false).ok();
                        stream
                            .set_read_timeout(Some(Duration::from_secs(2)))
                            .ok();
                        if let Some(body) = read_request(&mut stream) {
                            let hit = thread_hits.fetch_add(1, Ordering::SeqCst);
                            let reply = responder(hit, &body);
                            write_reply(&mut stream, reply);
                        }
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        std::thread::sleep(Duration::from_millis(5));
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            port,
            hits,
            stop,
            thread: Some(thread),
        }
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for StubSupervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// HTTP 요청 하나를 읽고 본문을 반환
fn read_request(stream: &mut std::net::TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    // 헤더 끝까지 읽기
    loop {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&buf).to_string();
    let header_end = text.find("\r\n\r\n")? + 4;
    let content_length = text
        .lines()
        .find(|l| l.to_ascii_lowercase().starts_with("content-length:"))
        .and_then(|l| l.split(':').nth(1))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = buf[header_end.min(buf.len())..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    Some(String::from_utf8_lossy(&body).to_string())
}

fn write_reply(stream: &mut std::net::TcpStream, reply: Reply) {
    let (status_line, body) = match reply {
        Reply::Xml(xml) => ("HTTP/1.1 200 OK".to_string(), xml),
        Reply::Status(401) => ("HTTP/1.1 401 Unauthorized".to_string(), String::new()),
        Reply::Status(code) => (format!("HTTP/1.1 {} Error", code), String::new()),
    };
    let response = format!(
        "{}\r\nContent-Type: text/xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status_line,
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes());
}

// ── 캔 응답들 ─────────────────────────────────────────

fn state_xml() -> String {
    "<methodResponse><params><param><value><struct>\
     <member><name>statecode</name><value><int>1</int></value></member>\
     <member><name>statename</name><value><string>RUNNING</string></value></member>\
     </struct></value></param></params></methodResponse>"
        .to_string()
}

fn ok_xml() -> String {
    "<methodResponse><params><param><value><boolean>1</boolean></value></param></params></methodResponse>"
        .to_string()
}

fn string_xml(text: &str) -> String {
    format!(
        "<methodResponse><params><param><value><string>{}</string></value></param></params></methodResponse>",
        text
    )
}

fn fault_xml(code: i64, message: &str) -> String {
    format!(
        "<methodResponse><fault><value><struct>\
         <member><name>faultCode</name><value><int>{}</int></value></member>\
         <member><name>faultString</name><value><string>{}</string></value></member>\
         </struct></value></fault></methodResponse>",
        code, message
    )
}

fn processes_xml() -> String {
    "<methodResponse><params><param><value><array><data>\
     <value><struct>\
     <member><name>name</name><value><string>web</string></value></member>\
     <member><name>state</name><value><int>20</int></value></member>\
     <member><name>statename</name><value><string>RUNNING</string></value></member>\
     <member><name>pid</name><value><int>4242</int></value></member>\
     <member><name>description</name><value><string>pid 4242, uptime 0:01:02</string></value></member>\
     <member><name>stdout_logfile</name><value><string>/var/log/web.out</string></value></member>\
     <member><name>stderr_logfile</name><value><string>/var/log/web.err</string></value></member>\
     </struct></value>\
     <value><struct>\
     <member><name>name</name><value><string>worker</string></value></member>\
     </struct></value>\
     </data></array></value></param></params></methodResponse>"
        .to_string()
}

// ── 픽스처 ─────────────────────────────────────────

fn descriptor(port: u16) -> HostDescriptor {
    HostDescriptor {
        id: format!("127.0.0.1_{}", port),
        name: String::new(),
        ip: "127.0.0.1".to_string(),
        port,
        username: "ops".to_string(),
        password: "secret".to_string(),
        description: String::new(),
        tags: Vec::new(),
    }
}

/// 임시 레지스트리에 호스트들을 넣고 서비스/모니터를 구성
fn build_fleet(
    dir: &tempfile::TempDir,
    ports: &[u16],
    monitor_config: MonitorConfig,
) -> (Arc<RwLock<HostStore>>, Arc<StatusMonitor>, FleetService) {
    let path = dir.path().join("hosts.toml");
    let mut store = HostStore::new(path.to_str().unwrap());
    for port in ports {
        store.add(descriptor(*port)).expect("add host");
    }
    let store = Arc::new(RwLock::new(store));
    let monitor = Arc::new(StatusMonitor::new(store.clone(), monitor_config));
    let service = FleetService::new(store.clone(), monitor.clone())
        .with_policy(Duration::from_millis(500), RetryPolicy::immediate(1));
    (store, monitor, service)
}

fn fast_monitor() -> MonitorConfig {
    MonitorConfig {
        interval: Duration::from_millis(50),
        probe_timeout: Duration::from_millis(300),
    }
}

// ── 테스트 ─────────────────────────────────────────

#[tokio::test]
async fn test_connect_with_retry_uses_three_attempts() {
    let stub = StubSupervisor::spawn(|hit, _| {
        if hit < 2 {
            Reply::Status(500)
        } else {
            Reply::Xml(state_xml())
        }
    });

    let host = descriptor(stub.port);
    let result = tokio::task::spawn_blocking(move || {
        SupervisorClient::connect_with_retry(
            &host,
            Duration::from_millis(500),
            &RetryPolicy::immediate(3),
        )
    })
    .await
    .unwrap();

    assert!(result.is_ok(), "third attempt should succeed");
    assert_eq!(stub.hits(), 3, "exactly three probe requests expected");
    println!("✓ Retry succeeded on attempt 3 with {} probes", stub.hits());
}

#[tokio::test]
async fn test_auth_failure_is_not_retried() {
    let stub = StubSupervisor::spawn(|_, _| Reply::Status(401));

    let host = descriptor(stub.port);
    let result = tokio::task::spawn_blocking(move || {
        SupervisorClient::connect_with_retry(
            &host,
            Duration::from_millis(500),
            &RetryPolicy::immediate(3),
        )
    })
    .await
    .unwrap();

    match result {
        Err(ProtocolError::AuthError(_)) => {}
        other => panic!("expected AuthError, got {:?}", other.map(|_| ())),
    }
    assert_eq!(stub.hits(), 1, "auth failure must not be retried");
    println!("✓ AuthError after exactly one attempt");
}

#[tokio::test]
async fn test_list_hosts_strips_password() {
    let stub = StubSupervisor::spawn(|_, _| Reply::Xml(state_xml()));
    let dir = tempfile::tempdir().unwrap();
    // 살아있는 호스트 하나 + 죽은 포트 하나
    let (_store, monitor, service) = build_fleet(&dir, &[stub.port, 1], fast_monitor());

    monitor.poll_all_once().await;

    let hosts = service.list_hosts().await;
    assert_eq!(hosts.len(), 2, "one summary per registry entry");

    let json = serde_json::to_string(&hosts).unwrap();
    assert!(!json.contains("password"));
    assert!(!json.contains("secret"));

    let alive = hosts
        .iter()
        .find(|h| h.port == stub.port)
        .expect("stub host present");
    assert_eq!(alive.status, "connected");
    assert_eq!(alive.id, format!("127.0.0.1_{}", stub.port));

    let dead = hosts.iter().find(|h| h.port == 1).unwrap();
    assert_eq!(dead.status, "disconnected");
    println!("✓ Host listing has no secrets and reflects monitor cache");
}

#[tokio::test]
async fn test_get_host_reads_monitor_cache() {
    let stub = StubSupervisor::spawn(|_, _| Reply::Xml(state_xml()));
    let dir = tempfile::tempdir().unwrap();
    let (_store, monitor, service) = build_fleet(&dir, &[stub.port], fast_monitor());

    let id = format!("127.0.0.1_{}", stub.port);

    // 폴링 전: 기본값은 disconnected
    let before = service.get_host(&id).await.unwrap();
    assert_eq!(before.status, "disconnected");

    monitor.poll_all_once().await;
    let after = service.get_host(&id).await.unwrap();
    assert_eq!(after.status, "connected");

    assert!(service.get_host("missing").await.is_none());
    println!("✓ get_host follows the status cache");
}

#[tokio::test]
async fn test_list_processes_parses_snapshots() {
    let stub = StubSupervisor::spawn(|_, body| {
        if body.contains("getAllProcessInfo") {
            Reply::Xml(processes_xml())
        } else {
            Reply::Xml(state_xml())
        }
    });
    let dir = tempfile::tempdir().unwrap();
    let (_store, _monitor, service) = build_fleet(&dir, &[stub.port], fast_monitor());

    let id = format!("127.0.0.1_{}", stub.port);
    let processes = service.list_processes(&id).await.unwrap();

    assert_eq!(processes.len(), 2);
    assert_eq!(processes[0].name, "web");
    assert_eq!(processes[0].pid, 4242);
    assert_eq!(processes[0].stdout_logfile, "/var/log/web.out");
    // 필드가 빠진 struct는 보수적 기본값으로 채워짐
    assert_eq!(processes[1].name, "worker");
    assert_eq!(processes[1].statename, "Unknown");
    assert_eq!(processes[1].pid, 0);
    assert_eq!(processes[1].stderr_logfile, "");
    println!("✓ Process listing parses {} snapshots", processes.len());
}

#[tokio::test]
async fn test_process_info_single_lookup() {
    let stub = StubSupervisor::spawn(|_, body| {
        if body.contains("getProcessInfo") {
            Reply::Xml(
                "<methodResponse><params><param><value><struct>\
                 <member><name>name</name><value><string>web</string></value></member>\
                 <member><name>state</name><value><int>20</int></value></member>\
                 <member><name>statename</name><value><string>RUNNING</string></value></member>\
                 <member><name>pid</name><value><int>77</int></value></member>\
                 </struct></value></param></params></methodResponse>"
                    .to_string(),
            )
        } else {
            Reply::Xml(state_xml())
        }
    });

    let host = descriptor(stub.port);
    let snapshot = tokio::task::spawn_blocking(move || {
        let client = SupervisorClient::connect(&host, Duration::from_millis(500))?;
        client.process_info("web")
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(snapshot.name, "web");
    assert_eq!(snapshot.pid, 77);
    assert_eq!(snapshot.statename, "RUNNING");
    println!("✓ Single process lookup parsed");
}

#[tokio::test]
async fn test_list_processes_lenient_on_dead_host() {
    let dir = tempfile::tempdir().unwrap();
    let (_store, _monitor, service) = build_fleet(&dir, &[1], fast_monitor());

    // 연결 실패는 빈 목록으로 강등
    let processes = service.list_processes("127.0.0.1_1").await.unwrap();
    assert!(processes.is_empty());

    // 존재하지 않는 호스트는 HostNotFound로 전파
    match service.list_processes("nope").await {
        Err(ServiceError::HostNotFound(id)) => assert_eq!(id, "nope"),
        other => panic!("expected HostNotFound, got {:?}", other.map(|v| v.len())),
    }
    println!("✓ Lenient listing policy verified");
}

#[tokio::test]
async fn test_control_process_error_carries_context() {
    let dir = tempfile::tempdir().unwrap();
    let (_store, _monitor, service) = build_fleet(&dir, &[1], fast_monitor());

    let err = service
        .control_process("127.0.0.1_1", "app", ProcessAction::Restart)
        .await
        .expect_err("control against dead host must fail");

    let text = err.to_string();
    assert!(text.contains("127.0.0.1_1"), "error names the host: {}", text);
    assert!(text.contains("app"), "error names the process: {}", text);
    assert!(text.contains("restart"), "error names the action: {}", text);
    println!("✓ ActionFailed context: {}", text);
}

#[tokio::test]
async fn test_restart_swallows_stop_failure() {
    let started = Arc::new(AtomicUsize::new(0));
    let started_in_stub = started.clone();
    let stub = StubSupervisor::spawn(move |_, body| {
        if body.contains("stopProcess") {
            // 이미 멈춰 있는 프로세스
            Reply::Xml(fault_xml(70, "NOT_RUNNING: app"))
        } else if body.contains("startProcess") {
            started_in_stub.fetch_add(1, Ordering::SeqCst);
            Reply::Xml(ok_xml())
        } else {
            Reply::Xml(state_xml())
        }
    });
    let dir = tempfile::tempdir().unwrap();
    let (_store, _monitor, service) = build_fleet(&dir, &[stub.port], fast_monitor());

    let id = format!("127.0.0.1_{}", stub.port);
    service
        .control_process(&id, "app", ProcessAction::Restart)
        .await
        .expect("restart of a stopped process must succeed");

    assert_eq!(started.load(Ordering::SeqCst), 1, "start phase must run");
    println!("✓ Restart ignored the stop fault and started the process");
}

#[tokio::test]
async fn test_control_start_propagates_remote_fault() {
    let stub = StubSupervisor::spawn(|_, body| {
        if body.contains("startProcess") {
            Reply::Xml(fault_xml(60, "ALREADY_STARTED: app"))
        } else {
            Reply::Xml(state_xml())
        }
    });
    let dir = tempfile::tempdir().unwrap();
    let (_store, _monitor, service) = build_fleet(&dir, &[stub.port], fast_monitor());

    let id = format!("127.0.0.1_{}", stub.port);
    let err = service
        .control_process(&id, "app", ProcessAction::Start)
        .await
        .expect_err("start of a running process must fail");

    match err {
        ServiceError::ActionFailed {
            source: ProtocolError::RemoteFault { code, .. },
            ..
        } => assert_eq!(code, 60),
        other => panic!("expected RemoteFault source, got {:?}", other),
    }
    println!("✓ Remote fault propagated with context");
}

#[tokio::test]
async fn test_read_process_log() {
    let stub = StubSupervisor::spawn(|_, body| {
        if body.contains("readProcessStdoutLog") {
            Reply::Xml(string_xml("boot ok\nready\n"))
        } else if body.contains("readProcessStderrLog") {
            Reply::Xml(string_xml("warn: low disk\n"))
        } else {
            Reply::Xml(state_xml())
        }
    });
    let dir = tempfile::tempdir().unwrap();
    let (_store, _monitor, service) = build_fleet(&dir, &[stub.port], fast_monitor());

    let id = format!("127.0.0.1_{}", stub.port);
    let stdout = service
        .read_process_log(&id, "web", LogKind::Stdout)
        .await
        .unwrap();
    assert_eq!(stdout, "boot ok\nready\n");

    let stderr = service
        .read_process_log(&id, "web", LogKind::Stderr)
        .await
        .unwrap();
    assert_eq!(stderr, "warn: low disk\n");

    // 죽은 호스트에 대해서는 엄격하게 실패
    let dead_dir = tempfile::tempdir().unwrap();
    let (_s, _m, dead_service) = build_fleet(&dead_dir, &[1], fast_monitor());
    let err = dead_service
        .read_process_log("127.0.0.1_1", "web", LogKind::Stdout)
        .await
        .expect_err("log read against dead host must fail");
    assert!(err.to_string().contains("stdout"));
    println!("✓ Log reads: lenient nowhere, strict everywhere");
}

#[tokio::test]
async fn test_monitor_detects_flip_to_offline() {
    let mut stub = StubSupervisor::spawn(|_, _| Reply::Xml(state_xml()));
    let dir = tempfile::tempdir().unwrap();
    let (_store, monitor, _service) = build_fleet(&dir, &[stub.port], fast_monitor());

    let id = format!("127.0.0.1_{}", stub.port);

    monitor.poll_all_once().await;
    let online = monitor.status_of(&id);
    assert!(online.reachable);
    let first_change = online.last_change;

    // 같은 결과가 반복되면 last_change는 그대로
    monitor.poll_all_once().await;
    let still_online = monitor.status_of(&id);
    assert!(still_online.reachable);
    assert_eq!(still_online.last_change, first_change);

    // 호스트가 죽으면 다음 주기에 offline으로 전이
    stub.shutdown();
    tokio::time::sleep(Duration::from_millis(20)).await;
    monitor.poll_all_once().await;

    let offline = monitor.status_of(&id);
    assert!(!offline.reachable);
    assert!(offline.last_change > first_change, "flip must update last_change");
    println!("✓ Monitor recorded online → offline transition");
}

#[tokio::test]
async fn test_monitor_background_loop_lifecycle() {
    let stub = StubSupervisor::spawn(|_, _| Reply::Xml(state_xml()));
    let dir = tempfile::tempdir().unwrap();
    let (_store, monitor, _service) = build_fleet(&dir, &[stub.port], fast_monitor());

    let id = format!("127.0.0.1_{}", stub.port);

    monitor.start().await;
    monitor.start().await; // 멱등

    // 백그라운드 루프가 폴링을 수행할 때까지 대기
    let mut reachable = false;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(25)).await;
        if monitor.status_of(&id).reachable {
            reachable = true;
            break;
        }
    }
    assert!(reachable, "background loop should have probed the stub host");

    monitor.stop().await;
    let checks_at_stop = monitor.status_of(&id).last_check;

    // stop 이후에는 폴링이 더 일어나지 않아야 함
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(monitor.status_of(&id).last_check, checks_at_stop);
    println!("✓ Monitor start/stop lifecycle verified");
}
