//! UDP: close, receive timeout, ping-pong.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use loopexec::{when_any, EventLoop, Ipv4Endpoint, SenderExt, UdpSocket};

use common::init_test_logging;

fn ep(port: u16) -> Ipv4Endpoint {
    Ipv4Endpoint::new("127.0.0.1", port).unwrap()
}

#[test]
fn close_socket() {
    init_test_logging();
    let lp = EventLoop::new().unwrap();
    let sched = lp.scheduler();
    let socket = UdpSocket::bind(&lp, ep(1340)).unwrap();

    lp.sync_wait(sched.schedule().pipe(socket.close()))
        .unwrap()
        .unwrap();
}

#[test]
fn no_incoming_requests() {
    init_test_logging();
    let timeout = Duration::from_millis(50);

    let lp = EventLoop::new().unwrap();
    let sched = lp.scheduler();
    let listener = UdpSocket::bind(&lp, ep(1341)).unwrap();

    let received = Arc::new(AtomicBool::new(false));
    let conn = listener
        .receive_from(vec![0u8; 4])
        .then({
            let received = received.clone();
            move |(_buf, _n, _peer)| received.store(true, Ordering::SeqCst)
        })
        .finally(listener.close());

    let started = Instant::now();
    let race = sched.schedule().let_value({
        let sched = sched.clone();
        move |()| when_any(sched.schedule_after(timeout), conn)
    });
    lp.sync_wait(race).unwrap().unwrap();

    assert!(started.elapsed() + Duration::from_millis(2) >= timeout);
    assert!(!received.load(Ordering::SeqCst));
}

#[test]
fn ping_pong() {
    init_test_logging();
    let port = 1342;
    let ping_received = Arc::new(AtomicBool::new(false));

    let server = {
        let ping_received = ping_received.clone();
        thread::spawn(move || {
            let lp = EventLoop::new().unwrap();
            let sched = lp.scheduler();
            let socket = UdpSocket::bind(&lp, ep(port)).unwrap();

            let conn = sched.schedule().let_value({
                let socket = socket.clone();
                let ping_received = ping_received.clone();
                move |()| {
                    socket
                        .clone()
                        .receive_from(vec![0u8; 4])
                        .let_value({
                            let socket = socket.clone();
                            move |(buf, n, peer)| {
                                assert_eq!(n, 4);
                                ping_received.store(&buf[..] == b"Ping", Ordering::SeqCst);
                                socket.send_to(b"Pong".to_vec(), peer)
                            }
                        })
                        .pipe(socket.close())
                }
            });
            lp.sync_wait(conn).unwrap().unwrap();
        })
    };

    let lp = EventLoop::new().unwrap();
    let sched = lp.scheduler();
    let socket = UdpSocket::bind(&lp, ep(0)).unwrap();

    let conn = sched.schedule().let_value({
        let socket = socket.clone();
        move |()| {
            socket
                .clone()
                .send_to(b"Ping".to_vec(), ep(port))
                .let_value({
                    let socket = socket.clone();
                    move |()| socket.receive_from(vec![0u8; 4])
                })
                .then(|(buf, n, _peer)| {
                    assert_eq!(n, 4);
                    assert_eq!(&buf[..n], b"Pong");
                })
                .pipe(socket.close())
        }
    });
    thread::sleep(Duration::from_millis(50));
    lp.sync_wait(conn).unwrap().unwrap();
    server.join().unwrap();

    assert!(ping_received.load(Ordering::SeqCst));
}
