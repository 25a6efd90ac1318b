#![deny(clippy::nursery, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

use actix::{Actor, Addr};
use actix_rt::System;
use bytes::Bytes;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, Span};
use tracing_subscriber::EnvFilter;

use twproxy::{
    config::Args,
    messages::{Connect, SendData, Shutdown},
    proxy::Proxy,
    tui::TerminalUi,
};

#[actix_rt::main]
async fn main() -> anyhow::Result<()> {
    // parse CLI arguments
    let opts: Args = Args::parse();

    // overrides the RUST_LOG variable to our own value based on the
    // amount of `-v`s that were passed when calling the service
    std::env::set_var(
        "RUST_LOG",
        match opts.verbose {
            1 => "debug",
            2 => "trace",
            _ => "info",
        },
    );

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .pretty();
    subscriber.init();

    let address = opts
        .address
        .unwrap_or_else(|| opts.config.address.clone());

    let tui = TerminalUi::new().start();
    let proxy = Proxy::new(opts.config, opts.script).start();

    // a failed dial leaves the proxy up and idle rather than exiting; the
    // error has already been surfaced through the TUI event stream
    if let Err(error) = proxy
        .send(Connect {
            address: address.clone(),
            tui: tui.recipient(),
            span: Span::current(),
        })
        .await?
    {
        error!(%error, "initial connection failed");
    } else {
        info!(%address, "proxy connected, forwarding stdin");
    }

    actix_rt::spawn(forward_stdin(proxy.clone()));

    tokio::signal::ctrl_c().await?;

    proxy
        .send(Shutdown {
            span: Span::current(),
        })
        .await?;
    System::current().stop();

    Ok(())
}

/// Feeds operator input lines into the proxy; each line is terminated the
/// way the game expects.
async fn forward_stdin(proxy: Addr<Proxy>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        proxy.do_send(SendData {
            data: Bytes::from(format!("{line}\r\n")),
            span: Span::current(),
        });
    }
}
