use bincode::{deserialize, serialize};
use shared::{ClientCommand, Difficulty, GameMode, ServerEvent};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

// Brute-force inverse; the probe only ever sees small moduli.
fn solve(a: u64, p: u64) -> u64 {
    (1..p).find(|x| (a * x) % p == 1).unwrap_or(0)
}

async fn send(socket: &UdpSocket, addr: SocketAddr, command: &ClientCommand) {
    match serialize(command) {
        Ok(data) => {
            if let Err(e) = socket.send_to(&data, addr).await {
                println!("Send failed: {}", e);
            }
        }
        Err(e) => println!("Serialize failed: {}", e),
    }
}

async fn recv(socket: &UdpSocket, buf: &mut [u8]) -> Option<ServerEvent> {
    match timeout(Duration::from_secs(60), socket.recv_from(buf)).await {
        Ok(Ok((len, _))) => match deserialize::<ServerEvent>(&buf[0..len]) {
            Ok(event) => Some(event),
            Err(e) => {
                println!("Failed to deserialize event: {}", e);
                None
            }
        },
        Ok(Err(e)) => {
            println!("Receive error: {}", e);
            None
        }
        Err(_) => {
            println!("Timed out waiting for server");
            None
        }
    }
}

/// Plays one practice game against a local server and prints every event.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    println!("Client socket bound to {}", socket.local_addr()?);

    let server_addr = "127.0.0.1:8080".parse::<SocketAddr>()?;
    let mut buf = [0u8; 2048];

    println!("Logging in as probe");
    send(
        &socket,
        server_addr,
        &ClientCommand::Login {
            username: "probe".to_string(),
            password: "probe".to_string(),
        },
    )
    .await;

    match recv(&socket, &mut buf).await {
        Some(ServerEvent::LoggedIn { username, rating }) => {
            println!("Logged in as {} (rating {})", username, rating);
        }
        other => {
            println!("Login failed: {:?}", other);
            return Ok(());
        }
    }

    send(
        &socket,
        server_addr,
        &ClientCommand::CreateRoom {
            room_id: None,
            difficulty: Difficulty::Easy,
            mode: GameMode::Practice,
            round_time_secs: 15,
            round_count: 3,
        },
    )
    .await;
    send(&socket, server_addr, &ClientCommand::Ready).await;

    loop {
        let Some(event) = recv(&socket, &mut buf).await else {
            break;
        };
        println!("Event: {:?}", event);

        match event {
            ServerEvent::NewQuestion { p, a, .. } => {
                let answer = solve(a, p);
                println!("Answering {} for inverse of {} mod {}", answer, a, p);
                send(
                    &socket,
                    server_addr,
                    &ClientCommand::SubmitAnswer {
                        answer: answer.to_string(),
                    },
                )
                .await;
            }
            ServerEvent::GameOver { scores, .. } => {
                println!("Final scores: {:?}", scores);
                break;
            }
            _ => {}
        }
    }

    println!("Disconnecting");
    send(&socket, server_addr, &ClientCommand::Disconnect).await;
    println!("Test client finished");
    Ok(())
}
