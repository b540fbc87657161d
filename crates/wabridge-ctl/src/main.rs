//! wabridge-ctl — command-line interface for the wabridge daemon.

use std::path::PathBuf;

use anyhow::{Context, Result};

mod cmd;

use cmd::{qr, sessions};

const DEFAULT_PORT: u16 = 9210;
const DEFAULT_OWNER_TYPE: &str = "coach";

fn print_usage() {
    println!("Usage: wabridge-ctl [--port <port>] [--type coach|staff] <command>");
    println!();
    println!("Commands:");
    println!("  sessions                    List live and recorded sessions");
    println!("  init <owner>                Start (or reuse) a session and show its QR state");
    println!("  status <owner>              Show session status");
    println!("  qr <owner> [--out <file>]   Show the pending QR, or save it as a PNG");
    println!("  send <owner> <to> <text>    Send a text message");
    println!("  disconnect <owner>          Close the session, keep credentials");
    println!("  logout <owner>              Log out the device and remove the session");
    println!("  cleanup <owner>             Remove the session and its credentials");
    println!();
    println!("Options:");
    println!("  --port <port>   API port (default: {})", DEFAULT_PORT);
    println!("  --type <type>   Owner type (default: {})", DEFAULT_OWNER_TYPE);
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    // Parse options
    let mut port = DEFAULT_PORT;
    let mut owner_type = DEFAULT_OWNER_TYPE.to_string();
    let mut out: Option<PathBuf> = None;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--port" => {
                i += 1;
                port = args
                    .get(i)
                    .context("--port requires a value")?
                    .parse()
                    .context("--port must be a number")?;
            }
            "--type" => {
                i += 1;
                owner_type = args.get(i).context("--type requires a value")?.clone();
            }
            "--out" => {
                i += 1;
                out = Some(args.get(i).context("--out requires a path")?.into());
            }
            other => remaining.push(other),
        }
        i += 1;
    }
    let ty = owner_type.as_str();

    match remaining.as_slice() {
        ["sessions"] | []                => sessions::cmd_sessions(port).await,
        ["init", owner]                  => sessions::cmd_init(port, owner, ty).await,
        ["status", owner]                => sessions::cmd_status(port, owner, ty).await,
        ["qr", owner]                    => qr::cmd_qr(port, owner, ty, out.as_deref()).await,
        ["disconnect", owner]            => sessions::cmd_disconnect(port, owner, ty).await,
        ["logout", owner]                => sessions::cmd_logout(port, owner, ty).await,
        ["cleanup", owner]               => sessions::cmd_cleanup(port, owner, ty).await,
        ["send", owner, to, text @ ..] if !text.is_empty() => {
            sessions::cmd_send(port, owner, ty, to, &text.join(" ")).await
        }
        ["help"] | ["--help"] | ["-h"]   => { print_usage(); Ok(()) }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
