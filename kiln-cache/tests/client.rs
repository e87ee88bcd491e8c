use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use kiln_cache::{CacheClient, CacheError, ClientOptions, ErrorKind};
use kiln_testsrv::{FakeBackend, CANNED_VALUE};

/// How a scripted server answers one expected command.
enum Respond {
    Simple(&'static str),
    Bulk(&'static [u8]),
    Nil,
    Error(&'static str),
    Raw(&'static [u8]),
    /// Close the connection with an RST so the client sees a reset.
    Reset,
    /// Answer with a bulk value after a delay.
    DelayedBulk(Duration, &'static [u8]),
    /// Never answer.
    Hang,
}

struct Step {
    expect: &'static [&'static [u8]],
    respond: Respond,
}

async fn spawn_script(steps: Vec<Step>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(run_script(listener, steps.into()));
    addr
}

async fn run_script(listener: TcpListener, mut steps: VecDeque<Step>) {
    while !steps.is_empty() {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let mut reader = BufReader::new(stream);
        loop {
            if steps.is_empty() {
                return;
            }
            let args = match read_command(&mut reader).await {
                Ok(args) => args,
                // Client went away; the remaining script continues on the
                // next accepted connection.
                Err(_) => break,
            };
            let step = steps.pop_front().expect("script step");
            let expected: Vec<Vec<u8>> = step.expect.iter().map(|arg| arg.to_vec()).collect();
            assert_eq!(args, expected, "unexpected command");
            match step.respond {
                Respond::Simple(msg) => {
                    write_raw(&mut reader, format!("+{msg}\r\n").into_bytes()).await;
                }
                Respond::Bulk(data) => write_bulk(&mut reader, data).await,
                Respond::Nil => write_raw(&mut reader, b"$-1\r\n".to_vec()).await,
                Respond::Error(msg) => {
                    write_raw(&mut reader, format!("-{msg}\r\n").into_bytes()).await;
                }
                Respond::Raw(data) => write_raw(&mut reader, data.to_vec()).await,
                Respond::Reset => {
                    reader
                        .get_ref()
                        .set_linger(Some(Duration::ZERO))
                        .expect("linger");
                    break;
                }
                Respond::DelayedBulk(delay, data) => {
                    tokio::time::sleep(delay).await;
                    write_bulk(&mut reader, data).await;
                }
                Respond::Hang => {
                    std::future::pending::<()>().await;
                }
            }
        }
    }
}

async fn read_command(reader: &mut BufReader<TcpStream>) -> std::io::Result<Vec<Vec<u8>>> {
    let mut line = Vec::new();
    read_line(reader, &mut line).await?;
    if line.first() != Some(&b'*') {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "expected array",
        ));
    }
    let count = parse_usize(&line[1..])?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        read_line(reader, &mut line).await?;
        if line.first() != Some(&b'$') {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "expected bulk",
            ));
        }
        let len = parse_usize(&line[1..])?;
        let mut data = vec![0u8; len];
        reader.read_exact(&mut data).await?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf).await?;
        if crlf != *b"\r\n" {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "missing crlf",
            ));
        }
        args.push(data);
    }
    Ok(args)
}

async fn read_line(reader: &mut BufReader<TcpStream>, buf: &mut Vec<u8>) -> std::io::Result<()> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf).await?;
    if bytes == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "eof",
        ));
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "invalid line",
        ));
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_usize(data: &[u8]) -> std::io::Result<usize> {
    if data.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "empty",
        ));
    }
    let mut value = 0usize;
    for &b in data {
        if !b.is_ascii_digit() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "digit",
            ));
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as usize);
    }
    Ok(value)
}

async fn write_raw(reader: &mut BufReader<TcpStream>, data: Vec<u8>) {
    reader.get_mut().write_all(&data).await.expect("write");
}

async fn write_bulk(reader: &mut BufReader<TcpStream>, data: &[u8]) {
    let mut buf = Vec::new();
    buf.extend_from_slice(format!("${}\r\n", data.len()).as_bytes());
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
    write_raw(reader, buf).await;
}

fn client_with(addr: SocketAddr, max_active: usize, max_idle: usize) -> CacheClient {
    CacheClient::new(
        addr.to_string(),
        ClientOptions {
            prefix: "kiln:".to_string(),
            max_idle,
            max_active,
            connect_timeout: Some(Duration::from_secs(1)),
        },
    )
}

#[tokio::test]
async fn put_then_get_roundtrip() {
    let addr = spawn_script(vec![
        Step {
            expect: &[b"SET" as &[u8], b"kiln:key", b"value"],
            respond: Respond::Simple("OK"),
        },
        Step {
            expect: &[b"GET" as &[u8], b"kiln:key"],
            respond: Respond::Bulk(b"value"),
        },
    ])
    .await;

    let client = client_with(addr, 1, 1);
    client.put("key", b"value").await.expect("put");
    let fetched = client.get("key").await.expect("get");
    assert_eq!(fetched.value, b"value");
    assert_eq!(fetched.key, "key");
    assert!(fetched.in_memory);
    assert!(client.metrics().snapshot().hits >= 1);
    client.close();
}

#[tokio::test]
async fn missing_key_is_not_found() {
    let addr = spawn_script(vec![Step {
        expect: &[b"GET" as &[u8], b"kiln:missing"],
        respond: Respond::Nil,
    }])
    .await;

    let client = client_with(addr, 1, 1);
    let err = client.get("missing").await.unwrap_err();
    assert!(matches!(err, CacheError::NotFound));
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn connection_reset_is_retried() {
    let addr = spawn_script(vec![
        Step {
            expect: &[b"GET" as &[u8], b"kiln:obj"],
            respond: Respond::Reset,
        },
        Step {
            expect: &[b"GET" as &[u8], b"kiln:obj"],
            respond: Respond::Bulk(b"payload"),
        },
    ])
    .await;

    let client = client_with(addr, 1, 1);
    let fetched = tokio::time::timeout(Duration::from_secs(5), client.get("obj"))
        .await
        .expect("deadline")
        .expect("retried get");
    assert_eq!(fetched.value, b"payload");
}

#[tokio::test]
async fn server_error_is_fatal_on_first_attempt() {
    let addr = spawn_script(vec![Step {
        expect: &[b"GET" as &[u8], b"kiln:obj"],
        respond: Respond::Error("ERR unknown command"),
    }])
    .await;

    let client = client_with(addr, 1, 1);
    let err = client.get("obj").await.unwrap_err();
    assert!(matches!(err, CacheError::Server(_)));
    assert_eq!(err.kind(), ErrorKind::Fatal);
}

#[tokio::test]
async fn malformed_reply_is_fatal_on_first_attempt() {
    let addr = spawn_script(vec![Step {
        expect: &[b"GET" as &[u8], b"kiln:obj"],
        respond: Respond::Raw(b"!bogus\r\n"),
    }])
    .await;

    let client = client_with(addr, 1, 1);
    let err = client.get("obj").await.unwrap_err();
    assert!(matches!(err, CacheError::Protocol));
    assert_eq!(err.kind(), ErrorKind::Fatal);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_gets_respect_admission_bound() {
    let backend = FakeBackend::start().await.expect("backend");
    let client = CacheClient::new(
        backend.addr().to_string(),
        ClientOptions {
            prefix: "load:".to_string(),
            max_idle: 5,
            max_active: 10,
            connect_timeout: Some(Duration::from_secs(1)),
        },
    );

    let mut tasks = Vec::with_capacity(100);
    for i in 0..100 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            tokio::time::timeout(Duration::from_secs(30), client.get(&format!("object-{i}"))).await
        }));
    }
    for task in tasks {
        let fetched = task.await.expect("join").expect("deadline").expect("get");
        assert_eq!(fetched.value, CANNED_VALUE);
    }

    // The client never holds more than 10 sockets, but the backend's gauge
    // can lag while a discarded connection's FIN races a fresh dial; allow
    // a small handoff overshoot, never unbounded growth.
    let peak = backend.peak_connections();
    assert!(peak <= 15, "peak connections {peak} exceeded the bound");
    client.close();
}

#[tokio::test]
async fn cancelled_wait_returns_promptly_and_leaks_no_slot() {
    let addr = spawn_script(vec![
        Step {
            expect: &[b"GET" as &[u8], b"kiln:slow"],
            respond: Respond::DelayedBulk(Duration::from_millis(400), b"slowpayload"),
        },
        Step {
            expect: &[b"GET" as &[u8], b"kiln:fast"],
            respond: Respond::Bulk(b"fastpayload"),
        },
    ])
    .await;

    let client = client_with(addr, 1, 1);
    let slow_client = client.clone();
    let slow = tokio::spawn(async move { slow_client.get("slow").await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The only admission slot is held; this caller gives up while queued.
    let cancelled = tokio::time::timeout(Duration::from_millis(100), client.get("never")).await;
    assert!(cancelled.is_err());

    let fetched = slow.await.expect("join").expect("slow get");
    assert_eq!(fetched.value, b"slowpayload");

    // The abandoned wait released its slot.
    let fetched = tokio::time::timeout(Duration::from_secs(5), client.get("fast"))
        .await
        .expect("slot leaked")
        .expect("get");
    assert_eq!(fetched.value, b"fastpayload");
}

#[tokio::test]
async fn close_terminates_inflight_operations() {
    let addr = spawn_script(vec![Step {
        expect: &[b"GET" as &[u8], b"kiln:stuck"],
        respond: Respond::Hang,
    }])
    .await;

    let client = client_with(addr, 1, 1);
    let inflight_client = client.clone();
    let inflight = tokio::spawn(async move { inflight_client.get("stuck").await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    client.close();
    let err = tokio::time::timeout(Duration::from_secs(1), inflight)
        .await
        .expect("terminated promptly")
        .expect("join")
        .unwrap_err();
    assert!(matches!(err, CacheError::Closed));
    assert_eq!(err.kind(), ErrorKind::Fatal);

    let err = client.get("later").await.unwrap_err();
    assert!(matches!(err, CacheError::Closed));
}
