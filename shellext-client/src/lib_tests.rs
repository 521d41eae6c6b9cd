use super::*;
use std::os::unix::net::UnixListener;
use std::thread;
use std::time::Instant;

/// Serves one connection: records the request line, answers with `reply`.
fn serve_once(listener: UnixListener, reply: Vec<u8>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut request = Vec::new();
        reader.read_until(b'\n', &mut request).unwrap();
        let mut stream = stream;
        stream.write_all(&reply).unwrap();
        request
    })
}

fn client_for(dir: &tempfile::TempDir) -> (CustomStateClient, UnixListener) {
    let socket = dir.path().join("test.sock");
    let listener = UnixListener::bind(&socket).unwrap();
    let client = CustomStateClient::new(socket.to_str().unwrap());
    (client, listener)
}

#[test]
fn derives_socket_from_application_name() {
    let client = CustomStateClient::for_application("cloudsync");
    assert_eq!(
        client.socket_path().file_name().unwrap(),
        "cloudsync-ShellExtensions.sock"
    );
    let client = CustomStateClient::new("/tmp/explicit.sock");
    assert_eq!(client.socket_path(), Path::new("/tmp/explicit.sock"));
}

#[test]
fn recognizes_sync_internal_files() {
    assert!(is_sync_internal("/sync/.sync_abc123.db"));
    assert!(is_sync_internal("/sync/.owncloudsync.log"));
    assert!(!is_sync_internal("/sync/docs/report.pdf"));
}

#[test]
fn maps_state_to_emblems() {
    assert!(emblems_for_state(CustomState::default()).is_empty());
    let both = CustomState {
        is_locked: true,
        is_shared: true,
    };
    assert_eq!(emblems_for_state(both), vec![Emblem::Locked, Emblem::Shared]);
    assert_eq!(Emblem::Shared.icon_name(), "emblem-shared");
}

#[test]
fn fetches_custom_state() {
    let dir = tempfile::tempdir().unwrap();
    let (client, listener) = client_for(&dir);
    let server = serve_once(
        listener,
        b"{\"version\":\"1.0\",\"customStateData\":{\"isLocked\":false,\"isShared\":true}}\n"
            .to_vec(),
    );

    let state = client.fetch_custom_state("/sync/docs/report.pdf").unwrap();
    assert!(state.is_shared);
    assert!(!state.is_locked);

    let request = server.join().unwrap();
    let decoded = protocol::decode(&request).unwrap();
    assert_eq!(
        decoded.payload,
        Payload::CustomStateRequest(CustomStateRequest {
            path: "/sync/docs/report.pdf".into()
        })
    );
}

#[test]
fn empty_reply_means_nothing_to_show() {
    let dir = tempfile::tempdir().unwrap();
    let (client, listener) = client_for(&dir);
    let server = serve_once(listener, protocol::empty_reply());

    assert!(client.fetch_custom_state("/sync/a.txt").is_none());
    server.join().unwrap();
}

#[test]
fn fetches_thumbnail_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let (client, listener) = client_for(&dir);
    let server = serve_once(
        listener,
        protocol::encode(&Payload::Thumbnail(b"img".to_vec())),
    );

    assert_eq!(
        client.fetch_thumbnail("/sync/pic.jpg", 64, 64),
        Some(b"img".to_vec())
    );
    let request = protocol::decode(&server.join().unwrap()).unwrap();
    assert_eq!(
        request.payload,
        Payload::ThumbnailRequest(ThumbnailRequest {
            path: "/sync/pic.jpg".into(),
            size: Some(ThumbnailSize {
                width: 64,
                height: 64
            }),
        })
    );
}

#[test]
fn missing_server_yields_none() {
    let dir = tempfile::tempdir().unwrap();
    let client = CustomStateClient::new(dir.path().join("absent.sock").to_str().unwrap());
    assert!(client.fetch_custom_state("/sync/a.txt").is_none());
    assert!(matches!(
        client.exchange(&Payload::Empty),
        Err(ClientError::Io(_))
    ));
}

#[test]
fn silent_server_is_bounded_by_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let (client, listener) = client_for(&dir);
    let client = client.with_timeout(Duration::from_millis(200));
    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        thread::sleep(Duration::from_secs(1));
        drop(stream);
    });

    let started = Instant::now();
    assert!(client.fetch_custom_state("/sync/a.txt").is_none());
    assert!(started.elapsed() < Duration::from_millis(900));
    server.join().unwrap();
}

#[test]
fn internal_files_skip_the_server() {
    let dir = tempfile::tempdir().unwrap();
    let (client, _listener) = client_for(&dir);
    // Nothing accepts; a connection attempt would still succeed through the
    // backlog and then time out, so an immediate None proves no request was sent.
    let client = client.with_timeout(Duration::from_secs(5));
    let started = Instant::now();
    assert!(client.fetch_custom_state("/sync/.sync_journal.db").is_none());
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn full_accept_backlog_does_not_block_the_caller() {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("busy.sock");
    let address = SockAddr::unix(&socket_path).unwrap();
    let listener = Socket::new(Domain::UNIX, Type::STREAM, None).unwrap();
    listener.bind(&address).unwrap();
    listener.listen(1).unwrap();

    // Nothing accepts, so these connections fill the backlog.
    let mut pending = Vec::new();
    for _ in 0..8 {
        let socket = Socket::new(Domain::UNIX, Type::STREAM, None).unwrap();
        socket.set_nonblocking(true).unwrap();
        let _ = socket.connect(&address);
        pending.push(socket);
    }

    let client = CustomStateClient::new(socket_path.to_str().unwrap())
        .with_timeout(Duration::from_millis(300));
    let started = Instant::now();
    assert!(client.fetch_custom_state("/sync/a.txt").is_none());
    assert!(started.elapsed() < Duration::from_secs(3));
    drop(listener);
}
