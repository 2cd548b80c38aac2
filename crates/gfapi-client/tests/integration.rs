//! End-to-end tests of the client against the in-memory backend and an
//! in-process volfile server.

mod common;

use std::collections::HashMap;
use std::io::{Read, SeekFrom, Write};
use std::sync::Arc;

use common::{payload, TestVolume, PATCHY_VOLFILE, VOLUME};
use gfapi_client::{
    ClientConfig, ClientError, ConnectionState, OpenMode, StreamReader, StreamWriter,
    VolfileServerConfig,
};
use gfapi_transport::VolfileServer;

#[test]
fn test_copy_scenario() {
    let vol = TestVolume::new();
    let input = payload(4096);
    vol.seed("/subdir/file-input", &input);

    let conn = vol.client.open_volume(VOLUME).unwrap();
    conn.set_logging(&vol.log_file(), 7).unwrap();
    conn.set_volfile(&vol.volfile()).unwrap();
    conn.connect().unwrap();
    assert_eq!(conn.state(), ConnectionState::Connected);

    let mut fin = vol
        .client
        .open_file(&conn, "/subdir/file-input", OpenMode::read_only())
        .unwrap();
    let mut buf = [0u8; 1024];
    let n = vol.client.reader(&mut fin).read_buffer(&mut buf, 1024).unwrap();
    assert_eq!(n, 1024);
    assert_eq!(fin.offset(), 1024);

    let mut fout = vol
        .client
        .open_file(
            &conn,
            "/subdir/file-output",
            OpenMode::write_only().create(true).truncate(true),
        )
        .unwrap();
    assert_eq!(vol.client.writer(&mut fout).write_buffer(&buf[..n]).unwrap(), n);
    fout.close().unwrap();
    fin.close().unwrap();
    conn.close();

    assert_eq!(vol.contents("/subdir/file-output"), &input[..1024]);
    assert!(vol.log_file().exists());
}

#[test]
fn test_open_before_connect() {
    let vol = TestVolume::new();
    vol.seed("/subdir/file-input", b"data");
    let conn = vol.client.open_volume(VOLUME).unwrap();
    conn.set_volfile(&vol.volfile()).unwrap();
    assert!(matches!(
        conn.open("/subdir/file-input", OpenMode::read_only()),
        Err(ClientError::NotConnected { .. })
    ));
    assert_eq!(conn.open_handles(), 0);
}

#[test]
fn test_write_then_read_on_independent_handle() {
    let vol = TestVolume::new();
    vol.seed("/subdir/.keep", b"");
    let conn = vol.connect();
    let data = payload(10_000);

    let mut w = conn
        .open("/subdir/blob", OpenMode::write_only().create(true))
        .unwrap();
    StreamWriter::new(&mut w).write_buffer(&data).unwrap();

    let mut r = conn.open("/subdir/blob", OpenMode::read_only()).unwrap();
    let mut back = Vec::new();
    StreamReader::new(&mut r).read_to_end(&mut back).unwrap();
    assert_eq!(back, data);
}

#[test]
fn test_close_twice_leaves_others_alone() {
    let vol = TestVolume::new();
    vol.seed("/f", b"abc");
    let conn = vol.connect();
    let mut a = conn.open("/f", OpenMode::read_only()).unwrap();
    let mut b = conn.open("/f", OpenMode::read_only()).unwrap();
    a.close().unwrap();
    a.close().unwrap();
    assert!(b.is_open());
    assert_eq!(StreamReader::new(&mut b).read_byte().unwrap(), Some(b'a'));

    conn.close();
    conn.close();
    b.close().unwrap();
}

#[test]
fn test_byte_ops_advance_offset() {
    let vol = TestVolume::new();
    vol.seed("/f", &payload(64));
    let conn = vol.connect();

    let mut rw = conn.open("/f", OpenMode::read_write()).unwrap();
    {
        let mut reader = StreamReader::new(&mut rw);
        for i in 0..10u64 {
            assert_eq!(reader.offset(), i);
            reader.read_byte().unwrap().unwrap();
        }
    }
    assert_eq!(rw.offset(), 10);
    {
        let mut writer = StreamWriter::new(&mut rw);
        for i in 0..5u8 {
            writer.write_byte(i).unwrap();
        }
    }
    assert_eq!(rw.offset(), 15);
}

#[test]
fn test_write_fault_restores_offset() {
    let vol = TestVolume::new();
    vol.seed("/f", b"");
    let conn = vol.connect();
    let mut w = conn.open("/f", OpenMode::write_only()).unwrap();
    let mut writer = StreamWriter::new(&mut w);
    writer.write_buffer(b"prefix").unwrap();

    vol.backend.faults().max_write_chunk(4);
    vol.backend.faults().fail_writes_after(10);
    let err = writer.write_buffer(&payload(100)).unwrap_err();
    assert!(matches!(err, ClientError::Io { .. }));
    assert_eq!(writer.offset(), 6);

    vol.backend.faults().reset();
    writer.write_buffer(b"!").unwrap();
    assert_eq!(writer.offset(), 7);
}

#[test]
fn test_io_traits_compose_with_std_copy() {
    let vol = TestVolume::new();
    let data = payload(3000);
    vol.seed("/src", &data);
    let conn = vol.connect();

    let mut src = conn.open("/src", OpenMode::read_only()).unwrap();
    let mut dst = conn
        .open("/dst", OpenMode::write_only().create(true))
        .unwrap();
    let copied = std::io::copy(
        &mut StreamReader::new(&mut src),
        &mut StreamWriter::new(&mut dst),
    )
    .unwrap();
    assert_eq!(copied, 3000);
    StreamWriter::new(&mut dst).flush().unwrap();
    drop(dst);
    assert_eq!(vol.contents("/dst"), data);
}

#[test]
fn test_seek_then_stream() {
    let vol = TestVolume::new();
    vol.seed("/f", b"0123456789");
    let conn = vol.connect();
    let mut fh = conn.open("/f", OpenMode::read_only()).unwrap();
    fh.seek(SeekFrom::Start(7)).unwrap();
    let mut rest = String::new();
    StreamReader::new(&mut fh).read_to_string(&mut rest).unwrap();
    assert_eq!(rest, "789");
}

#[test]
fn test_teardown_invalidates_handles() {
    let vol = TestVolume::new();
    vol.seed("/f", b"abc");
    let conn = vol.connect();
    let mut fh = conn.open("/f", OpenMode::read_only()).unwrap();
    conn.close();
    assert!(matches!(
        StreamReader::new(&mut fh).read_byte(),
        Err(ClientError::InvalidHandle { .. })
    ));
    assert!(matches!(
        conn.open("/f", OpenMode::read_only()),
        Err(ClientError::NotConnected { .. })
    ));
}

#[test]
fn test_close_while_another_thread_streams() {
    let vol = TestVolume::new();
    vol.seed("/f", &payload(4096));
    let conn = vol.connect();
    let (tx, rx) = std::sync::mpsc::channel();

    std::thread::scope(|s| {
        let reader = s.spawn(|| -> ClientError {
            let mut fh = conn.open("/f", OpenMode::read_only()).unwrap();
            let mut buf = [0u8; 16];
            let mut signalled = false;
            loop {
                let read = StreamReader::new(&mut fh).read_buffer(&mut buf, 16);
                let step = match read {
                    Ok(0) => fh.seek(SeekFrom::Start(0)).map(|_| ()),
                    Ok(_) => Ok(()),
                    Err(e) => Err(e),
                };
                if let Err(e) = step {
                    return e;
                }
                if !signalled {
                    signalled = true;
                    tx.send(()).unwrap();
                }
            }
        });
        rx.recv().unwrap();
        conn.close();
        let err = reader.join().unwrap();
        assert!(matches!(err, ClientError::InvalidHandle { .. }));
    });
    assert_eq!(conn.state(), ConnectionState::Closed);
}

#[test]
fn test_connections_share_volume_state() {
    let vol = TestVolume::new();
    let first = vol.connect();
    let second = vol.connect();
    let mut w = first
        .open("/shared", OpenMode::write_only().create(true))
        .unwrap();
    StreamWriter::new(&mut w).write_buffer(b"visible").unwrap();
    w.close().unwrap();

    let mut r = second.open("/shared", OpenMode::read_only()).unwrap();
    let mut buf = [0u8; 16];
    let n = StreamReader::new(&mut r).read_buffer(&mut buf, 16).unwrap();
    assert_eq!(&buf[..n], b"visible");
}

#[test]
fn test_threads_open_independent_handles() {
    let vol = TestVolume::new();
    vol.seed("/f", &payload(256));
    let conn = vol.connect();

    std::thread::scope(|s| {
        for t in 0..4u64 {
            let conn = &conn;
            s.spawn(move || {
                let mut fh = conn.open("/f", OpenMode::read_only()).unwrap();
                fh.seek(SeekFrom::Start(t * 10)).unwrap();
                let b = StreamReader::new(&mut fh).read_byte().unwrap().unwrap();
                assert_eq!(b, payload(256)[(t * 10) as usize]);
            });
        }
    });
    assert_eq!(conn.open_handles(), 0);
}

#[test]
fn test_connect_via_tcp_volfile_server() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let listener = runtime
        .block_on(tokio::net::TcpListener::bind("127.0.0.1:0"))
        .unwrap();
    let port = listener.local_addr().unwrap().port();
    let mut volumes = HashMap::new();
    volumes.insert(VOLUME.to_string(), PATCHY_VOLFILE.to_string());
    let server = VolfileServer::new(Arc::new(volumes));
    runtime.spawn(async move {
        let _ = server.serve_tcp(listener).await;
    });

    let vol = TestVolume::new();
    let config = ClientConfig {
        volume: VOLUME.to_string(),
        volfile_server: Some(VolfileServerConfig {
            transport: Some("tcp".into()),
            host: "127.0.0.1".into(),
            port,
        }),
        connect_timeout_ms: 2000,
        request_timeout_ms: 2000,
        ..Default::default()
    };
    let conn = vol.client.connect_volume(&config).unwrap();
    let topology = conn.topology().unwrap();
    assert_eq!(topology.volfile.top().name, "patchy-dht");
    assert_eq!(topology.bricks().len(), 2);
}

#[test]
fn test_unknown_volume_on_server_fails_connect() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let listener = runtime
        .block_on(tokio::net::TcpListener::bind("127.0.0.1:0"))
        .unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = VolfileServer::new(Arc::new(HashMap::<String, String>::new()));
    runtime.spawn(async move {
        let _ = server.serve_tcp(listener).await;
    });

    let vol = TestVolume::new();
    let conn = vol.client.open_volume(VOLUME).unwrap();
    conn.set_volfile_server(None, "127.0.0.1", port).unwrap();
    assert!(matches!(conn.connect(), Err(ClientError::Connection { .. })));
    assert_eq!(conn.state(), ConnectionState::Failed);
}

#[test]
fn test_unreachable_server_fails_connect() {
    let vol = TestVolume::new();
    let conn = vol.client.open_volume(VOLUME).unwrap();
    // Bind then drop to get a port with nothing listening.
    let port = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    };
    conn.set_volfile_server(Some("socket"), "127.0.0.1", port).unwrap();
    conn.set_timeouts(500, 500).unwrap();
    assert!(matches!(conn.connect(), Err(ClientError::Connection { .. })));
}

#[test]
fn test_rdma_transport_fails_connect() {
    let vol = TestVolume::new();
    let conn = vol.client.open_volume(VOLUME).unwrap();
    conn.set_volfile_server(Some("rdma"), "server1", 0).unwrap();
    match conn.connect() {
        Err(ClientError::Connection { reason, .. }) => assert!(reason.to_lowercase().contains("rdma")),
        other => panic!("unexpected {other:?}"),
    }
}
