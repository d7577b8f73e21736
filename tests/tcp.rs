//! TCP: close, accept, connect, ping-pong, continuous transfer.

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use loopexec::{
    connect, read_until, receive, send, when_any, BoxSender, EventLoop, Ipv4Endpoint, SenderExt,
    TcpListener, TcpSocket,
};

use common::init_test_logging;

const PING_PONG_PORT: u16 = 1329;

fn ep(port: u16) -> Ipv4Endpoint {
    Ipv4Endpoint::new("127.0.0.1", port).unwrap()
}

#[test]
fn close_socket() {
    init_test_logging();
    let lp = EventLoop::new().unwrap();
    let sched = lp.scheduler();
    let socket = TcpSocket::new(&lp);

    lp.sync_wait(sched.schedule().pipe(socket.close()))
        .unwrap()
        .unwrap();
}

#[test]
fn bind_and_close_listener() {
    init_test_logging();
    let lp = EventLoop::new().unwrap();
    let sched = lp.scheduler();
    let listener = TcpListener::bind(&lp, ep(1330), 1).unwrap();

    lp.sync_wait(sched.schedule().pipe(listener.close()))
        .unwrap()
        .unwrap();
}

#[test]
fn no_incoming_connection() {
    init_test_logging();
    let timeout = Duration::from_millis(50);

    let lp = EventLoop::new().unwrap();
    let sched = lp.scheduler();
    let listener = TcpListener::bind(&lp, ep(1331), 1).unwrap();
    let socket = TcpSocket::new(&lp);

    let accepted = Arc::new(AtomicBool::new(false));
    let conn = listener
        .accept(&socket)
        .then({
            let accepted = accepted.clone();
            move |()| accepted.store(true, Ordering::SeqCst)
        })
        .finally(socket.close().pipe(listener.close()));

    let started = Instant::now();
    let race = sched.schedule().let_value({
        let sched = sched.clone();
        move |()| when_any(sched.schedule_after(timeout), conn)
    });
    lp.sync_wait(race).unwrap().unwrap();

    assert!(started.elapsed() + Duration::from_millis(2) >= timeout);
    assert!(!accepted.load(Ordering::SeqCst));
}

#[test]
fn no_data_to_read_until() {
    init_test_logging();
    let timeout = Duration::from_millis(50);
    let port = 1332;

    let data_received = Arc::new(AtomicBool::new(false));
    let connection_accepted = Arc::new(AtomicBool::new(false));

    let server = {
        let data_received = data_received.clone();
        let connection_accepted = connection_accepted.clone();
        thread::spawn(move || {
            let lp = EventLoop::new().unwrap();
            let sched = lp.scheduler();
            let listener = TcpListener::bind(&lp, ep(port), 1).unwrap();
            let socket = TcpSocket::new(&lp);

            let conn = listener
                .accept(&socket)
                .then({
                    let connection_accepted = connection_accepted.clone();
                    move |()| {
                        connection_accepted.store(true, Ordering::SeqCst);
                        [0u8; 4]
                    }
                })
                .pipe(read_until(&socket, |_| false))
                .then({
                    let data_received = data_received.clone();
                    move |(_buf, _n)| data_received.store(true, Ordering::SeqCst)
                })
                .finally(socket.close().pipe(listener.close()));

            let race = sched.schedule().let_value({
                let sched = sched.clone();
                move |()| when_any(sched.schedule_after(timeout), conn)
            });
            lp.sync_wait(race).unwrap().unwrap();
        })
    };

    let lp = EventLoop::new().unwrap();
    let sched = lp.scheduler();
    let socket = TcpSocket::new(&lp);
    let connected = Arc::new(AtomicBool::new(false));

    let conn = sched.schedule().let_value({
        let socket = socket.clone();
        let connected = connected.clone();
        move |()| {
            socket
                .connect(ep(port))
                .then(move |()| {
                    connected.store(true, Ordering::SeqCst);
                    thread::sleep(timeout);
                })
                .finally(socket.close())
        }
    });

    thread::sleep(Duration::from_millis(10));
    lp.sync_wait(conn).unwrap().unwrap();
    server.join().unwrap();

    assert!(connected.load(Ordering::SeqCst));
    assert!(connection_accepted.load(Ordering::SeqCst));
    assert!(!data_received.load(Ordering::SeqCst));
}

#[test]
fn ping_pong() {
    init_test_logging();
    let ping_received = Arc::new(AtomicBool::new(false));

    let server = {
        let ping_received = ping_received.clone();
        thread::spawn(move || {
            let lp = EventLoop::new().unwrap();
            let sched = lp.scheduler();
            let listener = TcpListener::bind(&lp, ep(PING_PONG_PORT), 1).unwrap();
            let socket = TcpSocket::new(&lp);

            let conn = sched
                .schedule()
                .pipe(listener.accept(&socket))
                .then(|()| [0u8; 4])
                .pipe(receive(&socket))
                .then({
                    let ping_received = ping_received.clone();
                    move |(buf, n)| {
                        assert_eq!(n, 4);
                        ping_received.store(&buf == b"Ping", Ordering::SeqCst);
                        *b"Pong"
                    }
                })
                .pipe(send(&socket))
                .pipe(socket.close())
                .pipe(listener.close());

            lp.sync_wait(conn).unwrap().unwrap();
        })
    };

    let lp = EventLoop::new().unwrap();
    let sched = lp.scheduler();
    let socket = TcpSocket::new(&lp);

    let conn = sched
        .schedule()
        .then(|()| ep(PING_PONG_PORT))
        .pipe(connect(&socket))
        .then(|()| *b"Ping")
        .pipe(send(&socket))
        .then(|()| [0u8; 4])
        .pipe(receive(&socket))
        .then(|(buf, n)| {
            assert_eq!(n, buf.len());
            assert_eq!(&buf, b"Pong");
        })
        .pipe(socket.close());

    thread::sleep(Duration::from_millis(50));
    lp.sync_wait(conn).unwrap().unwrap();
    server.join().unwrap();

    assert!(ping_received.load(Ordering::SeqCst));
}

/// Streams 100,000 consecutive little-endian u32 values in 250-value
/// chunks; the server echoes; the client checks it got every byte back.
#[test]
fn continuous_transfer() {
    init_test_logging();
    const VALUES: u32 = 100_000;
    const CHUNK_VALUES: u32 = 250;
    const CHUNK_BYTES: usize = (CHUNK_VALUES as usize) * 4;
    let port = 1333;

    fn echo_round(socket: TcpSocket, echoed: Arc<AtomicUsize>) -> BoxSender<()> {
        socket
            .clone()
            .receive(vec![0u8; CHUNK_BYTES])
            .let_value(move |(mut buf, n)| -> BoxSender<()> {
                if n == 0 {
                    socket.close().boxed()
                } else {
                    echoed.fetch_add(n, Ordering::SeqCst);
                    buf.truncate(n);
                    let socket2 = socket.clone();
                    let echoed2 = echoed.clone();
                    socket
                        .send(buf)
                        .let_value(move |()| echo_round(socket2, echoed2))
                        .boxed()
                }
            })
            .boxed()
    }

    let echoed = Arc::new(AtomicUsize::new(0));
    let server = {
        let echoed = echoed.clone();
        thread::spawn(move || {
            let lp = EventLoop::new().unwrap();
            let sched = lp.scheduler();
            let listener = TcpListener::bind(&lp, ep(port), 1).unwrap();
            let socket = TcpSocket::new(&lp);

            let conn = sched
                .schedule()
                .pipe(listener.accept(&socket))
                .let_value({
                    let socket = socket.clone();
                    move |()| echo_round(socket, echoed)
                })
                .pipe(listener.close());

            lp.sync_wait(conn).unwrap().unwrap();
        })
    };

    fn client_round(socket: TcpSocket, next: u32, received: Arc<AtomicUsize>) -> BoxSender<()> {
        if next >= VALUES {
            return socket.shutdown().pipe(socket.close()).boxed();
        }
        let chunk: Vec<u8> = (next..next + CHUNK_VALUES)
            .flat_map(u32::to_le_bytes)
            .collect();
        let socket2 = socket.clone();
        let received2 = received.clone();
        socket
            .clone()
            .send(chunk)
            .then(|()| vec![0u8; CHUNK_BYTES])
            .pipe(read_until(&socket, {
                let mut seen = 0usize;
                move |n| {
                    seen += n;
                    seen >= CHUNK_BYTES
                }
            }))
            .let_value(move |(_buf, total)| {
                received2.fetch_add(total, Ordering::SeqCst);
                client_round(socket2, next + CHUNK_VALUES, received2.clone())
            })
            .boxed()
    }

    let lp = EventLoop::new().unwrap();
    let sched = lp.scheduler();
    let socket = TcpSocket::new(&lp);
    let received = Arc::new(AtomicUsize::new(0));

    let conn = sched
        .schedule()
        .then(move |()| ep(port))
        .pipe(connect(&socket))
        .let_value({
            let socket = socket.clone();
            let received = received.clone();
            move |()| client_round(socket, 0, received)
        });

    thread::sleep(Duration::from_millis(50));
    lp.sync_wait(conn).unwrap().unwrap();
    server.join().unwrap();

    let total_bytes = (VALUES as usize) * 4;
    assert_eq!(received.load(Ordering::SeqCst), total_bytes);
    assert_eq!(echoed.load(Ordering::SeqCst), total_bytes);
}
