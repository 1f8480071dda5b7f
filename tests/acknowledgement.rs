
use fixture::{connect_client, recv_socket, recv_text, socket_stream};
use muxio::transport::{Frame, Transport};
use muxio::{AckError, Server};
use serde_json::{json, Value};

#[tokio::test]
async fn server_emit_with_ack_round_trip() {
    let io = Server::new();
    let mut sockets = socket_stream(&io, "/");
    let (transport, mut rx) = connect_client(&io);
    assert_eq!(recv_text(&mut rx).await, "0");
    let socket = recv_socket(&mut sockets).await;

    let ack = socket.emit_with_ack("ping", (1, 2)).unwrap();
    // ack ids start at 0
    assert_eq!(recv_text(&mut rx).await, "20[\"ping\",1,2]");

    transport.recv(Frame::Text("30[\"pong\"]".to_string()));
    let (data, bin) = ack.await.unwrap();
    assert_eq!(data, json!(["pong"]));
    assert!(bin.is_empty());
}

#[tokio::test]
async fn ack_ids_are_monotonic_per_namespace() {
    let io = Server::new();
    let mut sockets = socket_stream(&io, "/");
    let (transport, mut rx) = connect_client(&io);
    assert_eq!(recv_text(&mut rx).await, "0");
    let socket = recv_socket(&mut sockets).await;

    let first = socket.emit_with_ack("a", ()).unwrap();
    let second = socket.emit_with_ack("b", ()).unwrap();
    assert_eq!(recv_text(&mut rx).await, "20[\"a\"]");
    assert_eq!(recv_text(&mut rx).await, "21[\"b\"]");

    // replies may arrive out of order, each resolves its own entry
    transport.recv(Frame::Text("31[\"second\"]".to_string()));
    transport.recv(Frame::Text("30[\"first\"]".to_string()));
    assert_eq!(second.await.unwrap().0, json!(["second"]));
    assert_eq!(first.await.unwrap().0, json!(["first"]));
}

#[tokio::test]
async fn incoming_event_with_ack_request_is_answered() {
    let io = Server::new();
    let mut sockets = socket_stream(&io, "/");
    let (transport, mut rx) = connect_client(&io);
    assert_eq!(recv_text(&mut rx).await, "0");
    let socket = recv_socket(&mut sockets).await;
    socket.on("hello", |_socket, data: Value, _bin, ack| async move {
        ack.send(data).ok();
    });

    transport.recv(Frame::Text("21[\"hello\",\"world\"]".to_string()));
    assert_eq!(recv_text(&mut rx).await, "31[\"world\"]");
}

#[tokio::test]
async fn ack_sender_without_request_is_a_noop() {
    let io = Server::new();
    let mut sockets = socket_stream(&io, "/");
    let (transport, mut rx) = connect_client(&io);
    assert_eq!(recv_text(&mut rx).await, "0");
    let socket = recv_socket(&mut sockets).await;
    socket.on("hello", |_socket, _data: Value, _bin, ack| async move {
        assert!(!ack.requested());
        ack.send("ignored").ok();
    });

    transport.recv(Frame::Text("2[\"hello\"]".to_string()));
    fixture::assert_no_frame(&mut rx).await;
}

#[tokio::test]
async fn pending_acks_are_dropped_when_the_socket_closes() {
    let io = Server::new();
    let mut sockets = socket_stream(&io, "/");
    let (transport, mut rx) = connect_client(&io);
    assert_eq!(recv_text(&mut rx).await, "0");
    let socket = recv_socket(&mut sockets).await;

    let ack = socket.emit_with_ack("ping", ()).unwrap();
    assert_eq!(recv_text(&mut rx).await, "20[\"ping\"]");

    transport.close();
    assert!(matches!(ack.await, Err(AckError::Recv(_))));
}

#[tokio::test]
async fn binary_ack_response() {
    let io = Server::new();
    let mut sockets = socket_stream(&io, "/");
    let (transport, mut rx) = connect_client(&io);
    assert_eq!(recv_text(&mut rx).await, "0");
    let socket = recv_socket(&mut sockets).await;
    socket.on("upload", |_socket, _data: Value, bin, ack| async move {
        ack.bin(bin).send("got it").ok();
    });

    // one binary attachment follows the event frame
    transport.recv(Frame::Text(
        "51-2[\"upload\",{\"_placeholder\":true,\"num\":0}]".to_string(),
    ));
    transport.recv(Frame::Binary(bytes::Bytes::from_static(&[1, 2, 3])));

    assert_eq!(
        recv_text(&mut rx).await,
        "61-2[\"got it\",{\"_placeholder\":true,\"num\":0}]"
    );
    assert_eq!(
        fixture::recv_frame(&mut rx).await,
        Frame::Binary(bytes::Bytes::from_static(&[1, 2, 3]))
    );
}
