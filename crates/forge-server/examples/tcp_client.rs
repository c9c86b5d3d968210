//! Minimal interactive client for the forge server.
//!
//! Reads commands from stdin, sends them as framed requests, and prints
//! every reply and event the server pushes back.

use std::env;
use std::error::Error;
use std::io::{self, BufRead};

use tokio::net::TcpStream;

use forge_core::{Request, ScopedKey};
use forge_protocol::{
    decode_server_message, encode_client_message, read_frame, write_frame, ClientMessage,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Where to connect: env override or default.
    let addr = env::var("FORGE_CLIENT_ADDR").unwrap_or_else(|_| "127.0.0.1:7740".to_string());

    println!("Connecting to {addr}...");
    let stream = TcpStream::connect(&addr).await?;
    let (mut read_half, mut write_half) = stream.into_split();

    // Print everything the server pushes, as it arrives.
    tokio::spawn(async move {
        loop {
            match read_frame(&mut read_half).await {
                Ok(Some(frame)) => match decode_server_message(&frame) {
                    Ok(message) => println!("<< {message:?}"),
                    Err(err) => {
                        eprintln!("decode error: {err}");
                        break;
                    }
                },
                Ok(None) => {
                    println!("server closed the connection");
                    break;
                }
                Err(err) => {
                    eprintln!("read error: {err}");
                    break;
                }
            }
        }
    });

    println!("Connected. Commands:");
    println!("  listen             subscribe to events");
    println!("  build              subscribe to build changes");
    println!("  lookup <text>      parse text into keys");
    println!("  value <key>        listen to a key's value");
    println!("  run <command>      execute a command");
    println!("  complete <line>    tab completions");
    println!("  cancel [id]        cancel the running command");
    println!("Type 'quit' or 'exit' to leave.\n");

    let stdin = io::stdin();
    let mut serial: u64 = 0;

    for line in stdin.lock().lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.eq_ignore_ascii_case("quit") || trimmed.eq_ignore_ascii_case("exit") {
            println!("Exiting client.");
            break;
        }

        let (word, rest) = match trimmed.split_once(' ') {
            Some((word, rest)) => (word, rest.trim()),
            None => (trimmed, ""),
        };

        serial += 1;
        let request = match word {
            "listen" => Request::ListenToEvents,
            "build" => Request::ListenToBuildChange,
            "lookup" => Request::KeyLookup {
                text: rest.to_string(),
            },
            "value" => Request::ListenToValue {
                key: parse_key(rest),
            },
            "run" => Request::Execution {
                command: rest.to_string(),
            },
            "complete" => Request::CommandCompletions {
                id: serial,
                line: rest.to_string(),
                level: 1,
            },
            "cancel" => Request::Cancel {
                id: rest.parse().unwrap_or(0),
            },
            _ => {
                eprintln!("unknown command: {word}");
                continue;
            }
        };

        let mut body = Vec::with_capacity(128);
        encode_client_message(&ClientMessage { serial, request }, &mut body)?;
        write_frame(&mut write_half, &body).await?;
    }

    Ok(())
}

fn parse_key(text: &str) -> ScopedKey {
    match text.split_once('/') {
        Some((scope, name)) => ScopedKey::scoped(scope, name),
        None => ScopedKey::global(text),
    }
}
