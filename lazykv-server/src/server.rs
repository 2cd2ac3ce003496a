//! # TCP Server
//!
//! Accept RESP2 connections, decode commands and dispatch them to the shared
//! store. A subscribed connection keeps answering commands while channel
//! messages are interleaved between replies.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use lazykv_common::{RespCodec, RespValue};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::store::{Outbox, Store};

/// Environment variable naming the listen address.
pub const BIND_VAR: &str = "LAZYKV_BIND";
/// Listen address used when `LAZYKV_BIND` is unset.
pub const DEFAULT_BIND: &str = "127.0.0.1:6379";

/// Per-connection state.
struct Session {
    id: u64,
    db: usize,
    channels: Vec<Bytes>,
    outbox: Outbox,
}

/// Accepts connections until the listener fails.
pub async fn serve(listener: TcpListener, store: Arc<Store>) -> StoreResult<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        debug!(%peer, "accepted connection");
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, store).await {
                warn!(%peer, error = %err, "connection ended with error");
            }
        });
    }
}

/// Binds `addr` and serves a fresh store in the background.
///
/// Returns the bound address, so `127.0.0.1:0` picks a free port.
pub async fn spawn(addr: &str) -> StoreResult<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    info!(addr = %local, "store listening");
    let task = tokio::spawn(async move {
        if let Err(err) = serve(listener, Arc::new(Store::new())).await {
            warn!(error = %err, "store stopped");
        }
    });
    Ok((local, task))
}

/// Handles a single TCP client connection.
pub async fn handle_connection(stream: TcpStream, store: Arc<Store>) -> StoreResult<()> {
    let (outbox, mut inbox) = mpsc::unbounded_channel();
    let mut session = Session {
        id: store.next_subscriber_id(),
        db: 0,
        channels: Vec::new(),
        outbox,
    };

    let result = drive(
        Framed::new(stream, RespCodec),
        &store,
        &mut session,
        &mut inbox,
    )
    .await;
    store.unsubscribe_all(session.id, &session.channels);
    result
}

async fn drive(
    mut framed: Framed<TcpStream, RespCodec>,
    store: &Store,
    session: &mut Session,
    inbox: &mut mpsc::UnboundedReceiver<RespValue>,
) -> StoreResult<()> {
    loop {
        tokio::select! {
            frame = framed.next() => match frame {
                Some(Ok(frame)) => {
                    let response = match frame.into_command_args() {
                        Some(args) => dispatch_command(&args, store, session),
                        None => RespValue::Error("ERR expected an array of bulk strings".into()),
                    };
                    framed.send(response).await?;
                }
                Some(Err(err)) => {
                    // Framing is lost; report and hang up.
                    let _ = framed.send(RespValue::Error("ERR protocol error".into())).await;
                    return Err(err.into());
                }
                None => return Ok(()),
            },
            Some(push) = inbox.recv() => framed.send(push).await?,
        }
    }
}

fn dispatch_command(args: &[Bytes], store: &Store, session: &mut Session) -> RespValue {
    let name = String::from_utf8_lossy(&args[0]).into_owned();
    let result = match name.to_ascii_uppercase().as_str() {
        "PING" => handle_ping(&name, args),
        "ECHO" => arity(&name, args, 2).map(|_| RespValue::bulk(args[1].clone())),
        "SELECT" => handle_select(&name, args, store, session),
        "GET" => handle_get(&name, args, store, session),
        "SET" => handle_set(&name, args, store, session),
        "DEL" => at_least(&name, args, 2)
            .and_then(|_| store.del(session.db, &args[1..]))
            .map(RespValue::Integer),
        "EXISTS" => at_least(&name, args, 2)
            .and_then(|_| store.exists(session.db, &args[1..]))
            .map(RespValue::Integer),
        "HSET" => handle_hset(&name, args, store, session),
        "HGET" => arity(&name, args, 3)
            .and_then(|_| store.hget(session.db, &args[1], &args[2]))
            .map(bulk_or_null),
        "HKEYS" => arity(&name, args, 2)
            .and_then(|_| store.hgetall(session.db, &args[1]))
            .map(|pairs| {
                RespValue::Array(pairs.into_iter().map(|(field, _)| RespValue::bulk(field)).collect())
            }),
        "HGETALL" => arity(&name, args, 2)
            .and_then(|_| store.hgetall(session.db, &args[1]))
            .map(|pairs| {
                RespValue::Array(
                    pairs
                        .into_iter()
                        .flat_map(|(field, value)| [RespValue::bulk(field), RespValue::bulk(value)])
                        .collect(),
                )
            }),
        "PUBLISH" => arity(&name, args, 3)
            .map(|_| RespValue::Integer(store.publish(&args[1], &args[2]))),
        "SUBSCRIBE" => handle_subscribe(&name, args, store, session),
        "PUBSUB" => handle_pubsub(&name, args, store),
        _ => Err(StoreError::UnknownCommand(name.clone())),
    };

    result.unwrap_or_else(|err| {
        debug!(command = %name, error = %err, "command failed");
        RespValue::Error(err.to_string())
    })
}

fn handle_ping(name: &str, args: &[Bytes]) -> StoreResult<RespValue> {
    match args.len() {
        1 => Ok(RespValue::Simple("PONG".to_string())),
        2 => Ok(RespValue::bulk(args[1].clone())),
        _ => Err(StoreError::Arity(name.to_string())),
    }
}

fn handle_select(
    name: &str,
    args: &[Bytes],
    store: &Store,
    session: &mut Session,
) -> StoreResult<RespValue> {
    arity(name, args, 2)?;
    let db = parse_usize(&args[1])?;
    store.check_db(db)?;
    session.db = db;
    Ok(ok())
}

fn handle_get(name: &str, args: &[Bytes], store: &Store, session: &Session) -> StoreResult<RespValue> {
    arity(name, args, 2)?;
    store.get(session.db, &args[1]).map(bulk_or_null)
}

fn handle_set(name: &str, args: &[Bytes], store: &Store, session: &Session) -> StoreResult<RespValue> {
    if args.len() < 3 {
        return Err(StoreError::Arity(name.to_string()));
    }
    if args.len() > 3 {
        return Err(StoreError::Syntax("syntax error"));
    }
    store.set(session.db, args[1].clone(), args[2].clone())?;
    Ok(ok())
}

fn handle_hset(name: &str, args: &[Bytes], store: &Store, session: &Session) -> StoreResult<RespValue> {
    if args.len() < 4 || args.len() % 2 != 0 {
        return Err(StoreError::Arity(name.to_string()));
    }
    let pairs: Vec<(Bytes, Bytes)> = args[2..]
        .chunks_exact(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect();
    store
        .hset(session.db, args[1].clone(), &pairs)
        .map(RespValue::Integer)
}

/// Replies with the first acknowledgement; acks for further channels go
/// through the outbox right behind it.
fn handle_subscribe(
    name: &str,
    args: &[Bytes],
    store: &Store,
    session: &mut Session,
) -> StoreResult<RespValue> {
    at_least(name, args, 2)?;
    let mut acks = Vec::with_capacity(args.len() - 1);
    for channel in &args[1..] {
        if store.subscribe(session.id, channel.clone(), &session.outbox) {
            session.channels.push(channel.clone());
        }
        acks.push(RespValue::Array(vec![
            RespValue::bulk("subscribe"),
            RespValue::bulk(channel.clone()),
            RespValue::Integer(session.channels.len() as i64),
        ]));
    }

    let mut acks = acks.into_iter();
    let first = acks.next().ok_or(StoreError::Arity(name.to_string()))?;
    for ack in acks {
        // Our own receiver lives as long as the session.
        let _ = session.outbox.send(ack);
    }
    Ok(first)
}

fn handle_pubsub(name: &str, args: &[Bytes], store: &Store) -> StoreResult<RespValue> {
    at_least(name, args, 2)?;
    if !args[1].eq_ignore_ascii_case(b"NUMSUB") {
        return Err(StoreError::Syntax("unknown PUBSUB subcommand"));
    }
    let counts = args[2..]
        .iter()
        .flat_map(|channel| {
            [
                RespValue::bulk(channel.clone()),
                RespValue::Integer(store.numsub(channel)),
            ]
        })
        .collect();
    Ok(RespValue::Array(counts))
}

fn arity(name: &str, args: &[Bytes], expected: usize) -> StoreResult<()> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(StoreError::Arity(name.to_string()))
    }
}

fn at_least(name: &str, args: &[Bytes], minimum: usize) -> StoreResult<()> {
    if args.len() >= minimum {
        Ok(())
    } else {
        Err(StoreError::Arity(name.to_string()))
    }
}

fn ok() -> RespValue {
    RespValue::Simple("OK".to_string())
}

fn bulk_or_null(value: Option<Bytes>) -> RespValue {
    value.map_or_else(RespValue::null, RespValue::bulk)
}

fn parse_usize(arg: &[u8]) -> StoreResult<usize> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or(StoreError::NotInteger)
}
