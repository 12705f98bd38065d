mod transfer;

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Server,
    Client,
}

impl Mode {
    /// Servers listen on every interface. Clients default to the local host.
    fn default_addr(self) -> &'static str {
        match self {
            Mode::Server => "0.0.0.0:8080",
            Mode::Client => "127.0.0.1:8080",
        }
    }
}

/// Copy one file between two hosts over a raw TCP connection.
///
///   copyfile --mode server --out /path/to/received
///   copyfile --mode client --in /path/to/source
#[derive(Parser, Debug)]
#[command(name = "copyfile", version, about)]
struct Cli {
    /// Run as the receiving server or the sending client
    #[arg(long, value_enum, default_value_t = Mode::Server)]
    mode: Mode,

    /// File to send (client)
    #[arg(long = "in", value_name = "PATH")]
    input: Option<PathBuf>,

    /// Destination file (server)
    #[arg(long = "out", value_name = "PATH")]
    output: Option<PathBuf>,

    /// Address to listen on (default 0.0.0.0:8080) or connect to
    /// (default 127.0.0.1:8080)
    #[arg(long)]
    addr: Option<String>,
}

impl Cli {
    fn addr(&self) -> &str {
        self.addr
            .as_deref()
            .unwrap_or_else(|| self.mode.default_addr())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "copyfile=info".into()),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let addr = cli.addr().to_string();
    match cli.mode {
        Mode::Server => {
            let out = cli.output.ok_or("--out is required in server mode")?;
            let listener = TcpListener::bind(&addr).await?;
            tracing::info!("copyfile listening on {}", listener.local_addr()?);
            transfer::serve(listener, &out, async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await;
        }
        Mode::Client => {
            let input = cli.input.ok_or("--in is required in client mode")?;
            let mut conn = TcpStream::connect(&addr).await?;
            let sent = transfer::send(&mut conn, &input).await?;
            tracing::info!(bytes = sent, "file send complete");
        }
    }
    Ok(())
}
