/// True when loopback sockets cannot be bound, e.g. inside a restrictive
/// sandbox. Tests that need a local server return early in that case.
pub fn should_skip_httpmock() -> bool {
    match std::net::TcpListener::bind(("127.0.0.1", 0)) {
        Ok(_) => false,
        Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
            eprintln!("skipping: loopback sockets are not permitted here");
            true
        }
        Err(err) => panic!("binding 127.0.0.1 for a local test server failed: {err}"),
    }
}
