
use std::time::Duration;

use fixture::{assert_no_frame, connect_client, recv_socket, recv_text, socket_stream};
use muxio::transport::{Frame, Transport};
use muxio::{MiddlewareError, Server};
use tokio::sync::mpsc;

#[tokio::test]
async fn connect_to_default_namespace() {
    let io = Server::new();
    let mut sockets = socket_stream(&io, "/");

    let (transport, mut rx) = connect_client(&io);

    // the admission is answered with a CONNECT packet
    assert_eq!(recv_text(&mut rx).await, "0");

    let socket = recv_socket(&mut sockets).await;
    assert_eq!(socket.id.as_str(), format!("/#{}", transport.id()));
    assert!(socket.connected());

    // the socket is automatically joined to the room named after its id
    assert!(socket
        .rooms()
        .iter()
        .any(|room| room.as_ref() == socket.id.as_str()));
}

#[tokio::test]
async fn connect_to_secondary_namespace() {
    let io = Server::new();
    let mut admin_sockets = socket_stream(&io, "/admin");

    let (transport, mut rx) = connect_client(&io);
    assert_eq!(recv_text(&mut rx).await, "0");

    transport.recv(Frame::Text("0/admin,".to_string()));
    assert_eq!(recv_text(&mut rx).await, "0/admin,");

    let socket = recv_socket(&mut admin_sockets).await;
    assert_eq!(socket.ns_path(), "/admin");
    assert_eq!(socket.id.as_str(), format!("/admin#{}", transport.id()));
}

#[tokio::test]
async fn connect_before_default_namespace_is_buffered() {
    let io = Server::new();
    // slow down the default admission so the subsidiary request arrives first
    io.use_middleware(|_socket| async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(())
    });
    let mut chat_sockets = socket_stream(&io, "/chat");

    let (transport, mut rx) = connect_client(&io);
    // pipelined before the default namespace is admitted
    transport.recv(Frame::Text("0/chat,".to_string()));

    // the default namespace is admitted first, then the buffered request
    assert_eq!(recv_text(&mut rx).await, "0");
    assert_eq!(recv_text(&mut rx).await, "0/chat,");

    let socket = recv_socket(&mut chat_sockets).await;
    assert_eq!(socket.ns_path(), "/chat");
}

#[tokio::test]
async fn unknown_namespace_is_answered_with_an_error() {
    let io = Server::new();
    let (transport, mut rx) = connect_client(&io);
    assert_eq!(recv_text(&mut rx).await, "0");

    transport.recv(Frame::Text("0/unknown,".to_string()));
    assert_eq!(
        recv_text(&mut rx).await,
        "4/unknown,\"Invalid namespace\""
    );

    // the connection itself is undisturbed
    transport.recv(Frame::Text("2[\"noop\"]".to_string()));
    assert_no_frame(&mut rx).await;
    assert!(io.client(transport.id()).is_some());
}

#[tokio::test]
async fn middleware_runs_in_registration_order() {
    let io = Server::new();
    let (tx, mut order) = mpsc::unbounded_channel::<usize>();

    for i in 1..=3 {
        let tx = tx.clone();
        io.use_middleware(move |_socket| {
            let tx = tx.clone();
            async move {
                tx.send(i).ok();
                Ok(())
            }
        });
    }

    let (_transport, mut rx) = connect_client(&io);
    assert_eq!(recv_text(&mut rx).await, "0");

    assert_eq!(order.recv().await, Some(1));
    assert_eq!(order.recv().await, Some(2));
    assert_eq!(order.recv().await, Some(3));
}

#[tokio::test]
async fn middleware_rejection_aborts_admission() {
    let io = Server::new();
    let admin = io.of("/admin");
    admin.use_middleware(|_socket| async { Err(MiddlewareError::new("nope")) });
    let mut admin_sockets = socket_stream(&io, "/admin");

    let (transport, mut rx) = connect_client(&io);
    assert_eq!(recv_text(&mut rx).await, "0");

    transport.recv(Frame::Text("0/admin,".to_string()));
    assert_eq!(recv_text(&mut rx).await, "4/admin,\"nope\"");

    // no connection event fired, and the default namespace is untouched
    assert!(admin_sockets.try_recv().is_err());
    assert!(admin.clients().is_empty());
    assert!(io.client(transport.id()).is_some());
}

#[tokio::test]
async fn middleware_rejection_payload_prefers_data() {
    let io = Server::new();
    let admin = io.of("/admin");
    admin.use_middleware(|_socket| async {
        Err(MiddlewareError::with_data(
            "denied",
            serde_json::json!({ "code": 401 }),
        ))
    });

    let (transport, mut rx) = connect_client(&io);
    assert_eq!(recv_text(&mut rx).await, "0");

    transport.recv(Frame::Text("0/admin,".to_string()));
    assert_eq!(recv_text(&mut rx).await, "4/admin,{\"code\":401}");
}

#[tokio::test]
async fn rejected_middleware_short_circuits_the_chain() {
    let io = Server::new();
    let (tx, mut order) = mpsc::unbounded_channel::<usize>();

    let tx1 = tx.clone();
    io.use_middleware(move |_socket| {
        let tx = tx1.clone();
        async move {
            tx.send(1).ok();
            Err(MiddlewareError::new("stop"))
        }
    });
    let tx2 = tx.clone();
    io.use_middleware(move |_socket| {
        let tx = tx2.clone();
        async move {
            tx.send(2).ok();
            Ok(())
        }
    });

    let (_transport, mut rx) = connect_client(&io);
    assert_eq!(recv_text(&mut rx).await, "4\"stop\"");
    assert_eq!(order.recv().await, Some(1));
    assert!(order.try_recv().is_err());
}

#[tokio::test]
async fn authorization_middleware_checks_the_handshake() {
    let io = Server::new();
    io.set_authorization(|handshake| {
        if handshake.query.contains_key("token") {
            Ok(())
        } else {
            Err(MiddlewareError::new("unauthorized"))
        }
    });

    let (_transport, mut rx) = connect_client(&io);
    assert_eq!(recv_text(&mut rx).await, "4\"unauthorized\"");
}
