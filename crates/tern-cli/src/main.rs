mod args;
mod endpoint;
mod present;

use std::process::ExitCode;
use std::time::Instant;

use anyhow::Context;
use rand::Rng;
use tracing::debug;

use tern_exchange::ExchangeConfig;
use tern_msg::{ContentFormat, PacketBuf, RequestBuilder};

use crate::args::{ArgsError, Invocation};

/// Holds the request and, once it arrives, the response.
const BUF_SIZE: usize = 128;
const TOKEN_LEN: usize = 4;

fn main() -> ExitCode {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tern=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let invocation = match args::parse(&argv) {
        Ok(invocation) => invocation,
        Err(ArgsError::Usage) => {
            println!("{}", args::USAGE);
            return ExitCode::FAILURE;
        }
        Err(e) => {
            println!("{}", e);
            println!("{}", args::USAGE);
            return ExitCode::FAILURE;
        }
    };

    match run(invocation) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(invocation: Invocation) -> anyhow::Result<ExitCode> {
    let config = ExchangeConfig::from_env().context("invalid exchange configuration")?;
    debug!(
        ack_timeout_ms = config.ack_timeout.as_millis() as u64,
        max_retransmit = config.max_retransmit,
        default_port = config.default_port,
        "exchange config"
    );

    let mut rng = rand::rng();
    let message_id: u16 = rng.random();
    let token: [u8; TOKEN_LEN] = rng.random();

    let mut buf = PacketBuf::with_capacity(BUF_SIZE);
    let started = Instant::now();
    let mut builder = RequestBuilder::new(invocation.method, message_id, &token).uri_path(&invocation.path);
    if let Some(data) = &invocation.data {
        builder = builder
            .content_format(ContentFormat::TEXT_PLAIN)
            .payload(data.as_bytes());
    }
    let len = builder.encode(&mut buf).context("request does not fit")?;
    let built = started.elapsed();

    println!(
        "sending msg ID {}, {} bytes, built in {} usec",
        message_id,
        len,
        built.as_micros()
    );

    match tern_exchange::request(&mut buf, invocation.remote, config) {
        Ok(response) => {
            print!("{}", present::response(&response));
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            debug!(error = %e, "exchange failed");
            println!("{}", present::failure(&e));
            Ok(ExitCode::FAILURE)
        }
    }
}
