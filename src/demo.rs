//! The word-transforming demo service.
//!
//! Each frame is a word. `00000` is answered with `11111`, alphabetic words
//! with their upper and lower case forms, numeric words with their digits
//! sorted ascending and descending, anything else with `unknown message`.
//! Optionally every connection also receives a timestamp at a fixed interval.

use crate::config::Config;
use chrono::Utc;
use std::time::Duration;
use tcp_daemon::{handler_fn, BoxMessage, ConnectionId, HandlerRef, Message, Packet, Server};
use tokio::sync::mpsc;
use tracing::info;

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Word {
    text: String,
}

impl Word {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    fn is_alphabetic(&self) -> bool {
        self.text.bytes().all(|b| b.is_ascii_alphabetic())
    }

    fn is_numeric(&self) -> bool {
        self.text.bytes().all(|b| b.is_ascii_digit())
    }
}

impl Message for Word {
    fn as_bytes(&self) -> &[u8] {
        self.text.as_bytes()
    }
}

fn ascending(text: &str) -> String {
    let mut bytes = text.as_bytes().to_vec();
    bytes.sort_unstable();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn descending(text: &str) -> String {
    let mut bytes = text.as_bytes().to_vec();
    bytes.sort_unstable_by(|a, b| b.cmp(a));
    String::from_utf8_lossy(&bytes).into_owned()
}

fn is_alphabetic_word(message: &dyn Message) -> bool {
    message.downcast_ref::<Word>().is_some_and(Word::is_alphabetic)
}

fn is_numeric_word(message: &dyn Message) -> bool {
    message.downcast_ref::<Word>().is_some_and(Word::is_numeric)
}

/// Replace a raw [`Packet`] with the [`Word`] it spells.
fn decode_words(next: HandlerRef) -> HandlerRef {
    handler_fn(move |ctx| {
        let next = next.clone();
        Box::pin(async move {
            if let Some(packet) = ctx.received_as::<Packet>() {
                let word = Word::new(String::from_utf8_lossy(packet.as_bytes()));
                ctx.set_received(Box::new(word));
            }
            next.call(ctx).await
        })
    })
}

/// Answer `00000` directly.
fn answer_zeroes(next: HandlerRef) -> HandlerRef {
    handler_fn(move |ctx| {
        let next = next.clone();
        Box::pin(async move {
            if ctx.received_as::<Word>().is_some_and(|w| w.text() == "00000") {
                ctx.send(Packet::from("11111")).await?;
                return Ok(());
            }
            next.call(ctx).await
        })
    })
}

fn change_case() -> HandlerRef {
    handler_fn(|ctx| {
        Box::pin(async move {
            let text = ctx.received_as::<Word>().map(|w| w.text().to_owned()).unwrap_or_default();
            ctx.send(Word::new(text.to_uppercase())).await?;
            ctx.send(Word::new(text.to_lowercase())).await?;
            Ok(())
        })
    })
}

fn sort_digits() -> HandlerRef {
    handler_fn(|ctx| {
        Box::pin(async move {
            let text = ctx.received_as::<Word>().map(|w| w.text().to_owned()).unwrap_or_default();
            ctx.send(Word::new(ascending(&text))).await?;
            ctx.send(Word::new(descending(&text))).await?;
            Ok(())
        })
    })
}

fn unknown() -> HandlerRef {
    handler_fn(|ctx| {
        Box::pin(async move {
            ctx.send(Packet::from("unknown message")).await?;
            Ok(())
        })
    })
}

/// Feed `Utc::now()` to one connection every `interval`.
fn ticker(interval: Duration) -> mpsc::Receiver<BoxMessage> {
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        let mut ticks = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticks.tick().await;
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                _ = ticks.tick() => {
                    let stamp = format!("{}\n", Utc::now().to_rfc3339());
                    if tx.send(Box::new(Packet::from(stamp.as_str())) as BoxMessage).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

/// Build the demo server from configuration.
pub fn build(config: &Config) -> Server {
    let mut server = Server::new();
    server.set_splitter(config.splitter());
    server.set_settings(config.connection_settings());

    // Decoding must run before anything that inspects a Word.
    server.use_middleware(decode_words);
    server.use_middleware(answer_zeroes);

    server.add_route(is_alphabetic_word, change_case());
    server.add_route(is_numeric_word, sort_digits());
    server.set_default_handler(unknown());

    let tick_interval = config.tick_interval;
    server.set_on_connected(move |conn_id: &ConnectionId| {
        info!(%conn_id, "Client connected");
        tick_interval.map(ticker)
    });
    server.set_on_disconnected(|conn_id: &ConnectionId| {
        info!(%conn_id, "Client disconnected");
    });

    server
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CliArgs;
    use clap::Parser;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tcp_daemon::Listener;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::task::JoinHandle;

    fn config(extra: &[&str]) -> Config {
        let cli = CliArgs::parse_from(std::iter::once("tcp-daemon").chain(extra.iter().copied()));
        Config::from_args(cli).unwrap()
    }

    async fn launch(config: &Config) -> (Arc<Server>, SocketAddr, JoinHandle<tcp_daemon::Result<()>>) {
        let listener = Listener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr();
        let server = Arc::new(build(config));
        let task = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.serve(listener).await })
        };
        (server, addr, task)
    }

    async fn exchange(client: &mut TcpStream, request: &[u8], reply_len: usize) -> String {
        client.write_all(request).await.unwrap();
        let mut buf = vec![0u8; reply_len];
        client.read_exact(&mut buf).await.unwrap();
        String::from_utf8(buf).unwrap()
    }

    async fn stop(server: Arc<Server>, client: TcpStream, task: JoinHandle<tcp_daemon::Result<()>>) {
        drop(client);
        server.shutdown().unwrap();
        assert!(task.await.unwrap().is_ok());
    }

    #[test]
    fn test_digit_sorting() {
        assert_eq!(ascending("31415"), "11345");
        assert_eq!(descending("31415"), "54311");
    }

    #[test]
    fn test_word_classification() {
        assert!(is_alphabetic_word(&Word::new("HeLLo")));
        assert!(!is_alphabetic_word(&Word::new("ab1cd")));
        assert!(is_numeric_word(&Word::new("00042")));
        assert!(!is_numeric_word(&Packet::from("12345")));
    }

    #[tokio::test]
    async fn test_word_routes() {
        let (server, addr, task) = launch(&config(&[])).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        assert_eq!(exchange(&mut client, b"HeLLo", 10).await, "HELLOhello");
        assert_eq!(exchange(&mut client, b"31415", 10).await, "1134554311");
        assert_eq!(exchange(&mut client, b"00000", 5).await, "11111");
        assert_eq!(exchange(&mut client, b"ab1cd", 15).await, "unknown message");

        stop(server, client, task).await;
    }

    #[tokio::test]
    async fn test_frames_span_writes() {
        let (server, addr, task) = launch(&config(&[])).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"ab").await.unwrap();
        assert_eq!(exchange(&mut client, b"cde", 10).await, "ABCDEabcde");

        stop(server, client, task).await;
    }

    #[tokio::test]
    async fn test_ticker_pushes_timestamps() {
        let (server, addr, task) = launch(&config(&["--tick-interval", "1"])).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        while byte[0] != b'\n' {
            client.read_exact(&mut byte).await.unwrap();
            line.push(byte[0]);
        }
        let stamp = String::from_utf8(line).unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(stamp.trim_end()).is_ok());

        stop(server, client, task).await;
    }
}
