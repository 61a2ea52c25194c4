//! fedsim CLI client
//!
//! A command-line client that talks to the fedsim daemon over UDP.
//! Uses rustyline for readline-style editing and history.
//!
//! Lines starting with `/` are local commands:
//!   /agent <name>   switch the target agent
//!   /stream         toggle streaming mode

use clap::Parser;
use fedsim::comm::protocol::{
    HEADER_LEN, decode_header, decode_response_payload, decode_update_payload, encode_cancel,
    encode_request,
};
use fedsim::comm::{MsgType, RequestPayload, ResponsePayload, UpdatePayload};
use rustyline::Editor;
use rustyline::history::FileHistory;
use std::collections::HashMap;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

/// CLI arguments
#[derive(Debug, Parser)]
#[command(name = "fedsim-cli")]
#[command(about = "fedsim daemon CLI client")]
struct Args {
    /// Daemon address (e.g., 127.0.0.1:9800)
    #[arg(short, long, default_value = "127.0.0.1:9800")]
    target: SocketAddr,

    /// Agent to address
    #[arg(short, long, default_value = "echo")]
    agent: String,

    /// Request streamed task updates
    #[arg(short, long)]
    stream: bool,

    /// Header sent with every request, as name=value (repeatable)
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// ACK timeout in seconds
    #[arg(long, default_value = "5")]
    timeout: u64,

    /// Response timeout in seconds
    #[arg(long, default_value = "320")]
    response_timeout: u64,

    /// Maximum retry attempts
    #[arg(short, long, default_value = "3")]
    max_retries: u32,

    /// History file path
    #[arg(long)]
    history_file: Option<PathBuf>,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected name=value, got '{}'", raw))
}

/// CLI configuration
#[derive(Debug, Clone)]
struct Config {
    target: SocketAddr,
    agent: String,
    stream: bool,
    headers: HashMap<String, String>,
    ack_timeout_secs: u64,
    response_timeout_secs: u64,
    max_retries: u32,
    history_file: PathBuf,
}

impl Config {
    fn from_args(args: Args) -> Self {
        let history_file = args.history_file.unwrap_or_else(|| {
            dirs::home_dir()
                .map(|p| p.join(".fedsim_history"))
                .unwrap_or_else(|| PathBuf::from(".fedsim_history"))
        });

        Self {
            target: args.target,
            agent: args.agent,
            stream: args.stream,
            headers: args.headers.into_iter().collect(),
            ack_timeout_secs: args.timeout,
            response_timeout_secs: args.response_timeout,
            max_retries: args.max_retries,
            history_file,
        }
    }
}

/// One packet from the daemon relevant to the pending request
enum Incoming {
    Ack,
    Update(UpdatePayload),
    Response(ResponsePayload),
}

/// Main client state
struct Client {
    socket: UdpSocket,
    config: Config,
    seq: AtomicU32,
}

impl Client {
    async fn new(config: Config) -> io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;

        Ok(Self {
            socket,
            config,
            seq: AtomicU32::new(1),
        })
    }

    /// Send a request, print updates as they arrive, return the response
    async fn send_request(&self, content: String) -> io::Result<ResponsePayload> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);

        let payload = RequestPayload {
            agent: self.config.agent.clone(),
            content,
            headers: self.config.headers.clone(),
            stream: self.config.stream,
        };
        let packet = encode_request(seq, &payload)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        for _attempt in 0..self.config.max_retries {
            self.socket.send_to(&packet, self.config.target).await?;

            match self.wait_for(seq, self.config.ack_timeout_secs).await {
                Ok(Some(Incoming::Ack)) => return self.wait_for_response(seq).await,
                Ok(Some(Incoming::Response(response))) => return Ok(response),
                _ => continue,
            }
        }

        Err(io::Error::new(io::ErrorKind::TimedOut, "fedsim not responding"))
    }

    /// Wait for the response, relaying updates; Ctrl+C sends a Cancel
    async fn wait_for_response(&self, seq: u32) -> io::Result<ResponsePayload> {
        let mut cancelled = false;
        loop {
            tokio::select! {
                incoming = self.wait_for(seq, self.config.response_timeout_secs) => {
                    match incoming? {
                        Some(Incoming::Response(response)) => return Ok(response),
                        Some(Incoming::Update(update)) => print_update(&update),
                        Some(Incoming::Ack) => {}
                        None => {
                            return Err(io::Error::new(io::ErrorKind::TimedOut, "Response timeout"));
                        }
                    }
                }
                _ = tokio::signal::ctrl_c(), if !cancelled => {
                    cancelled = true;
                    eprintln!("\n[cancelling...]");
                    let packet = encode_cancel(seq)
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                    self.socket.send_to(&packet, self.config.target).await?;
                }
            }
        }
    }

    /// Receive the next packet for `seq`; None on timeout
    async fn wait_for(&self, expected_seq: u32, secs: u64) -> io::Result<Option<Incoming>> {
        let mut buf = vec![0u8; 65536 + 1024];

        loop {
            let (len, addr) =
                match timeout(Duration::from_secs(secs), self.socket.recv_from(&mut buf)).await {
                    Ok(result) => result?,
                    Err(_) => return Ok(None),
                };
            if addr != self.config.target {
                continue;
            }

            let Ok((msg_type, seq)) = decode_header(&buf[..len]) else {
                continue;
            };
            if seq != expected_seq {
                continue;
            }

            let body = &buf[HEADER_LEN..len];
            let incoming = match msg_type {
                MsgType::RequestAck => Incoming::Ack,
                MsgType::Update => Incoming::Update(
                    decode_update_payload(body)
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
                ),
                MsgType::Response => Incoming::Response(
                    decode_response_payload(body)
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
                ),
                _ => continue,
            };
            return Ok(Some(incoming));
        }
    }
}

fn print_update(update: &UpdatePayload) {
    print!("\r");
    match (&update.text, &update.data) {
        (Some(text), _) => println!("[{}] {}", update.state, text),
        (None, Some(data)) => println!("[{}] {}", update.state, data),
        (None, None) => println!("[{}]", update.state),
    }
}

fn main() -> io::Result<()> {
    let args = Args::parse();
    let config = Config::from_args(args);

    if let Ok(lang) = std::env::var("LANG")
        && !lang.to_lowercase().contains("utf-8")
        && !lang.to_lowercase().contains("utf8")
    {
        eprintln!(
            "[warning] Terminal locale is not UTF-8. Non-ASCII characters may not display correctly."
        );
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async { run_client(config).await })
}

async fn run_client(config: Config) -> io::Result<()> {
    let mut client = Client::new(config.clone()).await?;

    let mut rl: Editor<(), FileHistory> = Editor::new().map_err(io::Error::other)?;

    if config.history_file.exists()
        && let Err(e) = rl.load_history(&config.history_file)
    {
        eprintln!("[warning] Failed to load history: {}", e);
    }

    println!("fedsim-cli v{}", env!("CARGO_PKG_VERSION"));
    println!("Target: {} agent={} stream={}", client.config.target, client.config.agent, client.config.stream);
    println!("Type your message and press Enter. /agent <name>, /stream. Ctrl+D to quit.");
    println!();

    loop {
        match rl.readline("> ") {
            Ok(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(input);

                if let Some(name) = input.strip_prefix("/agent ") {
                    client.config.agent = name.trim().to_string();
                    println!("[agent] {}", client.config.agent);
                    continue;
                }
                if input == "/stream" {
                    client.config.stream = !client.config.stream;
                    println!("[stream] {}", client.config.stream);
                    continue;
                }

                print!("[waiting...]");
                io::stdout().flush()?;

                match client.send_request(input.to_string()).await {
                    Ok(response) => {
                        print!("\r");
                        if response.is_error {
                            println!("[error] {}", response.content);
                        } else {
                            println!("{}", response.content);
                        }
                    }
                    Err(e) => {
                        print!("\r");
                        println!("[error] {}", e);
                    }
                }
            }
            Err(rustyline::error::ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("[error] Readline error: {}", e);
                break;
            }
        }
    }

    if let Err(e) = rl.save_history(&config.history_file) {
        eprintln!("[warning] Failed to save history: {}", e);
    }

    println!("\nGoodbye!");
    Ok(())
}
