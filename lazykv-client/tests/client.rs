use std::time::Duration;

use futures::{SinkExt, StreamExt};
use lazykv_client::{
    Client, ClientError, ConnectionOptions, ConnectionState, OptionsSource, Reply, TcpConnector,
};
use lazykv_common::{RespCodec, RespValue};
use tokio::net::TcpListener;
use tokio_util::codec::Framed;

async fn spawn_server() -> ConnectionOptions {
    let (addr, _task) = lazykv_server::spawn("127.0.0.1:0").await.expect("spawn server");
    ConnectionOptions::new(addr.ip().to_string(), addr.port())
}

async fn wait_for_subscribers(client: &Client, channel: &str, expected: i64) {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let counts: Vec<Reply> = client
                .command("PUBSUB")
                .args(["NUMSUB", channel])
                .query()
                .await
                .expect("numsub");
            if counts.get(1) == Some(&Reply::Integer(expected)) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("subscriber never registered");
}

#[tokio::test]
async fn set_then_get() {
    let client = Client::with_options(spawn_server().await);
    assert_eq!(client.set("test:key", "value").await.unwrap(), "OK");
    assert_eq!(client.get("test:key").await.unwrap(), Some("value".to_string()));
    assert_eq!(client.state(), ConnectionState::Ready);
}

#[tokio::test]
async fn commands_issued_before_ready_are_served() {
    let options = spawn_server().await;
    let client = Client::with_options(OptionsSource::pending(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(options)
    }));
    assert_eq!(client.options(), None);

    let (pong, set) = tokio::join!(client.ping(), client.set("k", "v"));
    assert_eq!(pong.unwrap(), "PONG");
    assert_eq!(set.unwrap(), "OK");
    assert!(client.options().is_some());
}

#[tokio::test]
async fn concurrent_hash_writes() {
    let client = Client::with_options(spawn_server().await);
    let (first, second) = tokio::join!(
        client.hset("test:hkey", "key1", "value"),
        client.hset("test:hkey", "key2", "other value"),
    );
    assert_eq!(first.unwrap(), 1);
    assert_eq!(second.unwrap(), 1);

    assert_eq!(
        client.hget("test:hkey", "key2").await.unwrap(),
        Some("other value".to_string())
    );
    let mut keys = client.hkeys("test:hkey").await.unwrap();
    keys.sort();
    assert_eq!(keys, vec!["key1", "key2"]);

    let all = client.hgetall("test:hkey").await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all["key1"], "value");
}

#[tokio::test]
async fn listen_delivers_only_its_channel() {
    let options = spawn_server().await;
    let publisher = Client::with_options(options.clone());
    let subscriber = Client::with_options(options);

    let collector = tokio::spawn(
        subscriber
            .listen("some-channel")
            .take(2)
            .collect::<Vec<_>>(),
    );
    wait_for_subscribers(&publisher, "some-channel", 1).await;

    assert_eq!(publisher.publish("some-channel", "1 message").await.unwrap(), 1);
    assert_eq!(publisher.publish("some-other-channel", "2 message").await.unwrap(), 0);
    assert_eq!(publisher.publish("some-channel", "3 message").await.unwrap(), 1);

    let payloads: Vec<String> = collector
        .await
        .unwrap()
        .into_iter()
        .map(|item| String::from_utf8(item.unwrap().to_vec()).unwrap())
        .collect();
    assert_eq!(payloads, vec!["1 message", "3 message"]);

    // The subscribed connection still answers commands.
    assert_eq!(subscriber.ping().await.unwrap(), "PONG");
}

#[tokio::test]
async fn unknown_command_is_unsupported() {
    let client = Client::with_options(spawn_server().await);
    let err = client
        .command("definitelyNotACommand")
        .arg(1i64)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::UnsupportedOperation(ref op) if op == "definitelyNotACommand"));

    let err = client.command("not a name").await.unwrap_err();
    assert!(matches!(err, ClientError::UnsupportedOperation(_)));

    // The connection survives both.
    assert_eq!(client.ping().await.unwrap(), "PONG");
}

#[tokio::test]
async fn non_zero_db_is_selected() {
    let options = spawn_server().await;
    let scratch = Client::with_options(options.clone().with_db(2));
    let main = Client::with_options(options);

    scratch.set("shared", "in db 2").await.unwrap();
    assert_eq!(scratch.get("shared").await.unwrap(), Some("in db 2".to_string()));
    assert_eq!(main.get("shared").await.unwrap(), None);
    assert!(!main.exists("shared").await.unwrap());
}

#[tokio::test]
async fn out_of_range_db_fails_the_connection() {
    let options = spawn_server().await.with_db(4096);
    let client = Client::with_options(options);
    let err = client.ping().await.unwrap_err();
    assert!(matches!(err, ClientError::Server(ref message) if message.contains("DB index")));
    assert_eq!(client.state(), ConnectionState::Failed);
}

#[tokio::test]
async fn refused_connection_is_replayed() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let client = Client::with_connector(
        ConnectionOptions::new("127.0.0.1", port),
        std::sync::Arc::new(TcpConnector::new().connect_timeout(Duration::from_secs(1))),
    );
    for _ in 0..2 {
        assert!(matches!(client.get("k").await, Err(ClientError::Io(_))));
    }
    assert_eq!(client.state(), ConnectionState::Failed);

    let items: Vec<_> = client.listen("ch").collect().await;
    assert!(matches!(items.as_slice(), [Err(ClientError::Io(_))]));
}

#[tokio::test]
async fn dropped_connection_ends_listen_with_an_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // A store that acks one SUBSCRIBE, pushes one message, then hangs up.
    let peer = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(socket, RespCodec);
        let frame = framed.next().await.unwrap().unwrap();
        let RespValue::Array(items) = frame else {
            panic!("expected a command array");
        };
        assert_eq!(items[0], RespValue::bulk("SUBSCRIBE"));

        framed
            .send(RespValue::Array(vec![
                RespValue::bulk("subscribe"),
                RespValue::bulk("ch"),
                RespValue::Integer(1),
            ]))
            .await
            .unwrap();
        framed
            .send(RespValue::Array(vec![
                RespValue::bulk("message"),
                RespValue::bulk("ch"),
                RespValue::bulk("hi"),
            ]))
            .await
            .unwrap();
    });

    let client = Client::with_options(ConnectionOptions::new(addr.ip().to_string(), addr.port()));
    let items: Vec<_> = tokio::time::timeout(Duration::from_secs(2), client.listen("ch").collect())
        .await
        .expect("listen must end once the store hangs up");
    peer.await.unwrap();

    assert_eq!(items.len(), 2);
    assert_eq!(&items[0].as_ref().unwrap()[..], b"hi");
    assert!(matches!(items[1], Err(ClientError::ConnectionClosed)));

    // Commands on the dead connection fail instead of hanging.
    assert!(matches!(client.ping().await, Err(ClientError::ConnectionClosed)));
}

#[tokio::test]
async fn delete_and_exists() {
    let client = Client::with_options(spawn_server().await);
    client.set("gone", "soon").await.unwrap();
    assert!(client.exists("gone").await.unwrap());
    assert_eq!(client.del("gone").await.unwrap(), 1);
    assert_eq!(client.del("gone").await.unwrap(), 0);
    assert_eq!(
        client.execute("ECHO", ["hello"]).await.unwrap(),
        Reply::Data("hello".into())
    );
}
