//! Scoped resources: bind_to, connect_to, accept_from, async_value.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use loopexec::{
    accept_from, async_value, bind_to, connect_to, just, receive, AsyncScope, EventLoop,
    Ipv4Endpoint, OsErrc, SenderExt, TcpListener, TcpSocket, UdpSocket,
};

use common::init_test_logging;

fn ep(port: u16) -> Ipv4Endpoint {
    Ipv4Endpoint::new("127.0.0.1", port).unwrap()
}

#[test]
fn bind_to_scopes_a_listener() {
    init_test_logging();
    let lp = EventLoop::new().unwrap();
    let sched = lp.scheduler();

    let entered = Arc::new(AtomicBool::new(false));
    let job = bind_to(sched.schedule().then(|()| ep(1343)), {
        let entered = entered.clone();
        move |_listener: &TcpListener| {
            entered.store(true, Ordering::SeqCst);
            just(())
        }
    });
    lp.sync_wait(job).unwrap().unwrap();
    assert!(entered.load(Ordering::SeqCst));
    // Loop drop asserts no leaked handles: the listener was closed by the
    // adaptor.
}

#[test]
fn bind_to_surfaces_bind_errors() {
    init_test_logging();
    let lp = EventLoop::new().unwrap();
    let sched = lp.scheduler();
    let taken = UdpSocket::bind(&lp, ep(1344)).unwrap();

    let err = lp
        .sync_wait(bind_to(
            sched.schedule().then(|()| ep(1344)),
            |_socket: &UdpSocket| just(()),
        ))
        .unwrap_err();
    assert_eq!(err.as_os().unwrap().errc(), OsErrc::AddressInUse);

    lp.sync_wait(taken.close()).unwrap().unwrap();
}

#[test]
fn bind_to_scopes_a_udp_socket() {
    init_test_logging();
    let lp = EventLoop::new().unwrap();
    let sched = lp.scheduler();

    let entered = Arc::new(AtomicBool::new(false));
    let job = bind_to(sched.schedule().then(|()| ep(1345)), {
        let entered = entered.clone();
        move |_socket: &UdpSocket| {
            entered.store(true, Ordering::SeqCst);
            just(())
        }
    });
    lp.sync_wait(job).unwrap().unwrap();
    assert!(entered.load(Ordering::SeqCst));
}

#[test]
fn connect_to_closes_on_refused_connection() {
    init_test_logging();
    let lp = EventLoop::new().unwrap();
    let sched = lp.scheduler();

    // Nothing listens on this port.
    let err = lp
        .sync_wait(connect_to(
            sched.schedule().then(|()| ep(1346)),
            |_socket: &TcpSocket| just(()),
        ))
        .unwrap_err();
    assert_eq!(err.as_os().unwrap().errc(), OsErrc::ConnectionRefused);
    // The implicitly created socket was closed before the error was
    // re-delivered; loop drop verifies that.
}

#[test]
fn scoped_echo_end_to_end() {
    init_test_logging();
    let port = 1347;
    let served = Arc::new(AtomicBool::new(false));

    let server = {
        let served = served.clone();
        thread::spawn(move || {
            let lp = EventLoop::new().unwrap();
            let sched = lp.scheduler();

            let job = bind_to(sched.schedule().then(move |()| ep(port)), {
                let served = served.clone();
                move |listener: &TcpListener| {
                    accept_from(just(()), listener, move |socket: &TcpSocket| {
                        let socket2 = socket.clone();
                        socket
                            .receive([0u8; 4])
                            .let_value(move |(buf, n)| {
                                served.store(n == 4, Ordering::SeqCst);
                                let mut reply = buf;
                                reply.reverse();
                                socket2.send(reply)
                            })
                    })
                }
            });
            lp.sync_wait(job).unwrap().unwrap();
        })
    };

    let lp = EventLoop::new().unwrap();
    let sched = lp.scheduler();

    let job = connect_to(
        sched.schedule().then(move |()| ep(port)),
        |socket: &TcpSocket| {
            let socket = socket.clone();
            socket
                .clone()
                .send(*b"Ping")
                .then(|()| [0u8; 4])
                .pipe(receive(&socket))
                .then(|(buf, n)| {
                    assert_eq!(n, 4);
                    assert_eq!(&buf, b"gniP");
                })
        },
    );
    thread::sleep(Duration::from_millis(50));
    lp.sync_wait(job).unwrap().unwrap();
    server.join().unwrap();

    assert!(served.load(Ordering::SeqCst));
}

#[test]
fn async_value_scopes_a_stop_source() {
    init_test_logging();
    let lp = EventLoop::new().unwrap();
    let sched = lp.scheduler();

    let executed = Arc::new(AtomicBool::new(false));
    let job = async_value(just(AsyncScope::new()), {
        let sched = sched.clone();
        let executed = executed.clone();
        move |scope: &AsyncScope| {
            scope.spawn(sched.schedule().then({
                let executed = executed.clone();
                move |()| executed.store(true, Ordering::SeqCst)
            }));
            scope.on_empty()
        }
    });
    lp.sync_wait(sched.schedule().let_value(move |()| job))
        .unwrap()
        .unwrap();
    assert!(executed.load(Ordering::SeqCst));
}

#[test]
fn async_value_runs_the_destructor_on_body_error() {
    init_test_logging();
    let lp = EventLoop::new().unwrap();
    let sched = lp.scheduler();

    let socket = TcpSocket::new(&lp);
    // Lend the loop's own socket as the scoped value: the body fails, yet
    // the asynchronous destructor must still close the handle.
    let job = async_value(just(socket), |_socket: &TcpSocket| {
        loopexec::fail::<()>(loopexec::Error::os(OsErrc::Interrupted))
    });
    let err = lp
        .sync_wait(sched.schedule().let_value(move |()| job))
        .unwrap_err();
    assert_eq!(err.as_os().unwrap().errc(), OsErrc::Interrupted);
    // Loop drop verifies the close ran.
}
