
use fixture::{assert_no_frame, connect_client, recv_socket, recv_text, socket_stream};
use muxio::transport::{Frame, Transport};
use muxio::{BroadcastError, Server};
use serde_json::{json, Value};
use tokio::sync::mpsc;

#[tokio::test]
async fn emit_writes_packets_in_emission_order() {
    let io = Server::new();
    let mut sockets = socket_stream(&io, "/");
    let (_transport, mut rx) = connect_client(&io);
    assert_eq!(recv_text(&mut rx).await, "0");
    let socket = recv_socket(&mut sockets).await;

    for i in 0..5 {
        socket.emit("seq", i).unwrap();
    }
    for i in 0..5 {
        assert_eq!(recv_text(&mut rx).await, format!("2[\"seq\",{i}]"));
    }
}

#[tokio::test]
async fn reserved_socket_event_fires_local_handler_only() {
    let io = Server::new();
    let mut sockets = socket_stream(&io, "/");
    let (_transport, mut rx) = connect_client(&io);
    assert_eq!(recv_text(&mut rx).await, "0");
    let socket = recv_socket(&mut sockets).await;

    let (tx, mut local) = mpsc::unbounded_channel::<Value>();
    socket.on("error", move |_socket, data, _bin, _ack| {
        let tx = tx.clone();
        async move {
            tx.send(data).ok();
        }
    });

    socket.emit("error", "local only").unwrap();

    let data = tokio::time::timeout(std::time::Duration::from_secs(1), local.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(data, json!("local only"));
    assert_no_frame(&mut rx).await;
}

#[tokio::test]
async fn reserved_event_without_local_handler_is_swallowed() {
    let io = Server::new();
    let mut sockets = socket_stream(&io, "/");
    let (_transport, mut rx) = connect_client(&io);
    assert_eq!(recv_text(&mut rx).await, "0");
    let socket = recv_socket(&mut sockets).await;

    socket.emit("disconnect", ()).unwrap();
    socket.emit("newListener", ()).unwrap();
    assert_no_frame(&mut rx).await;
}

#[tokio::test]
async fn send_and_write_emit_a_message_event() {
    let io = Server::new();
    let mut sockets = socket_stream(&io, "/");
    let (_transport, mut rx) = connect_client(&io);
    assert_eq!(recv_text(&mut rx).await, "0");
    let socket = recv_socket(&mut sockets).await;

    socket.send("hi").unwrap();
    socket.write("there").unwrap();
    assert_eq!(recv_text(&mut rx).await, "2[\"message\",\"hi\"]");
    assert_eq!(recv_text(&mut rx).await, "2[\"message\",\"there\"]");
}

#[tokio::test]
async fn broadcasting_a_reserved_event_is_rejected() {
    let io = Server::new();
    let mut sockets = socket_stream(&io, "/");
    let (_transport, mut rx) = connect_client(&io);
    assert_eq!(recv_text(&mut rx).await, "0");
    let socket = recv_socket(&mut sockets).await;

    assert!(matches!(
        socket.broadcast().emit("disconnect", ()),
        Err(BroadcastError::ReservedEvent("disconnect"))
    ));
    assert!(matches!(
        io.emit("connection", ()),
        Err(BroadcastError::ReservedEvent("connection"))
    ));
    assert_no_frame(&mut rx).await;
}

#[tokio::test]
async fn emit_to_a_closed_transport_is_dropped_silently() {
    let io = Server::new();
    let mut sockets = socket_stream(&io, "/");
    let (transport, mut rx) = connect_client(&io);
    assert_eq!(recv_text(&mut rx).await, "0");
    let socket = recv_socket(&mut sockets).await;

    transport.close();
    // the socket is already closed; emitting must not error out
    socket.emit("late", ()).unwrap();
}

#[tokio::test]
async fn binary_event_to_a_single_peer() {
    let io = Server::new();
    let mut sockets = socket_stream(&io, "/");
    let (_transport, mut rx) = connect_client(&io);
    assert_eq!(recv_text(&mut rx).await, "0");
    let socket = recv_socket(&mut sockets).await;

    socket
        .bin([bytes::Bytes::from_static(&[42])])
        .emit("blob", "meta")
        .unwrap();

    assert_eq!(
        recv_text(&mut rx).await,
        "51-[\"blob\",\"meta\",{\"_placeholder\":true,\"num\":0}]"
    );
    assert_eq!(
        fixture::recv_frame(&mut rx).await,
        Frame::Binary(bytes::Bytes::from_static(&[42]))
    );
}

#[tokio::test]
async fn incoming_binary_event_is_reassembled() {
    let io = Server::new();
    let mut sockets = socket_stream(&io, "/");
    let (transport, mut rx) = connect_client(&io);
    assert_eq!(recv_text(&mut rx).await, "0");
    let socket = recv_socket(&mut sockets).await;

    let (tx, mut events) = mpsc::unbounded_channel::<(Value, Vec<bytes::Bytes>)>();
    socket.on("upload", move |_socket, data, bin, _ack| {
        let tx = tx.clone();
        async move {
            tx.send((data, bin)).ok();
        }
    });

    transport.recv(Frame::Text(
        "52-[\"upload\",\"f\",{\"_placeholder\":true,\"num\":0},{\"_placeholder\":true,\"num\":1}]"
            .to_string(),
    ));
    transport.recv(Frame::Binary(bytes::Bytes::from_static(&[1])));
    transport.recv(Frame::Binary(bytes::Bytes::from_static(&[2])));

    let (data, bin) = tokio::time::timeout(std::time::Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(data, json!(["f"]));
    assert_eq!(bin.len(), 2);
}
