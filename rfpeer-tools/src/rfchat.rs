//! Terminal chat with a single Bluetooth peer over RFCOMM.

use clap::Parser;
use futures::StreamExt;
use rfpeer::{
    rfcomm::{RfcommConfig, RfcommTransport},
    Address, ConnectionEvent, ConnectionState, Manager, Peer, Security,
};
use std::process::exit;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    select, signal,
};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[clap(
    name = "rfchat",
    about = "Chat with a single Bluetooth peer over RFCOMM.",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Opts {
    #[clap(flatten)]
    link: LinkOpts,
    #[clap(subcommand)]
    cmd: Cmd,
}

#[derive(Parser)]
struct LinkOpts {
    /// Address of local Bluetooth adapter to use.
    #[clap(long, short, global = true)]
    bind: Option<Address>,
    /// RFCOMM channel of secure links.
    #[clap(long, default_value_t = 1, global = true)]
    secure_channel: u8,
    /// RFCOMM channel of insecure links.
    #[clap(long, default_value_t = 2, global = true)]
    insecure_channel: u8,
    /// Dump received data in hexadecimal.
    #[clap(long, global = true)]
    hex: bool,
}

#[derive(Parser)]
enum Cmd {
    /// Wait for a remote device to connect.
    Listen,
    /// Connect to remote device, while still accepting incoming connections.
    Connect(ConnectOpts),
}

#[derive(Parser)]
struct ConnectOpts {
    /// Public Bluetooth address of target device.
    address: Address,
    /// Connect using an unauthenticated link.
    #[clap(long, short)]
    insecure: bool,
}

impl ConnectOpts {
    fn target(&self) -> (Peer, Security) {
        let security = if self.insecure { Security::Insecure } else { Security::Secure };
        (Peer::new(self.address), security)
    }
}

async fn print_received(peer: &str, data: &[u8], hex: bool) -> Result<()> {
    let text = if hex {
        format!("{}:\n{}\n", peer, pretty_hex::pretty_hex(&data))
    } else {
        format!("{}: {}", peer, String::from_utf8_lossy(data))
    };

    let mut stdout = tokio::io::stdout();
    stdout.write_all(text.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}

async fn chat(link: LinkOpts, target: Option<(Peer, Security)>) -> Result<()> {
    let transport = RfcommTransport::new(RfcommConfig {
        local: link.bind.unwrap_or_else(Address::any),
        secure_channel: link.secure_channel,
        insecure_channel: link.insecure_channel,
        ..Default::default()
    });
    let manager = Manager::new(transport);
    let mut events = manager.events().await;

    manager.start().await;
    if let Some((peer, security)) = target {
        manager.connect_with(peer, security).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut peer_name = String::new();
    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        select! {
            evt = events.next() => {
                let evt = match evt {
                    Some(evt) => evt,
                    None => break,
                };
                log::trace!("{:?}", &evt);
                match evt {
                    ConnectionEvent::StateChanged(ConnectionState::Listening) => eprintln!("Waiting for connection"),
                    ConnectionEvent::StateChanged(ConnectionState::Connecting) => eprintln!("Connecting..."),
                    ConnectionEvent::StateChanged(ConnectionState::Connected) => {
                        eprintln!("Connected to {}, type a line to send it", &peer_name)
                    }
                    ConnectionEvent::StateChanged(ConnectionState::None) => (),
                    ConnectionEvent::DeviceIdentified(peer) => peer_name = peer.display_name(),
                    ConnectionEvent::DataReceived(data) => print_received(&peer_name, &data, link.hex).await?,
                    ConnectionEvent::DataSent(_) => (),
                    ConnectionEvent::Disconnected(err) => eprintln!("Connection to {} lost: {}", &peer_name, &err),
                    ConnectionEvent::ConnectionFailed(err) => eprintln!("Unable to connect: {}", &err),
                    ConnectionEvent::WriteFailed(err) => eprintln!("Sending failed: {}", &err),
                }
            }
            line = lines.next_line() => {
                let line = match line? {
                    Some(line) => line,
                    None => break,
                };
                if manager.state().await != ConnectionState::Connected {
                    eprintln!("Not connected");
                    continue;
                }
                manager.write(format!("{}\n", line)).await;
            }
            res = &mut ctrl_c => {
                res?;
                break;
            }
        }
    }

    manager.stop().await;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::init();
    let opts: Opts = Opts::parse();
    let target = match &opts.cmd {
        Cmd::Listen => None,
        Cmd::Connect(c) => Some(c.target()),
    };

    match chat(opts.link, target).await {
        Ok(()) => exit(0),
        Err(err) => {
            eprintln!("Error: {}", &err);
            exit(2);
        }
    }
}
