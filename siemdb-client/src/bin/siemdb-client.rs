//! `siemdb-client --host --port --database [--command --collection --data]`
//!
//! Without `--command`, drops into an interactive REPL accepting
//! `INSERT/FIND/DELETE/HELP/EXIT` lines. With `--command`, runs one
//! operation and exits.

use std::io::{self, Write};

use clap::Parser;
use serde_json::Value;
use siemdb_client::DbClient;
use siemdb_protocol::Response;

#[derive(Parser)]
#[command(name = "siemdb-client")]
#[command(about = "Client for the siemdb document protocol")]
struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = 8080)]
    port: u16,

    #[arg(long, default_value = "default")]
    database: String,

    /// One of insert, find, delete. Omit to start the interactive REPL.
    #[arg(long)]
    command: Option<String>,

    #[arg(long, default_value = "")]
    collection: String,

    /// Raw JSON document (insert) or query (find/delete).
    #[arg(long, default_value = "{}")]
    data: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mut client = DbClient::new(args.host.clone(), args.port, args.database.clone());
    if let Err(e) = client.connect().await {
        eprintln!("Failed to connect to server: {e}");
        std::process::exit(1);
    }

    match args.command {
        Some(command) => {
            let resp = run_one_shot(&mut client, &command, &args.collection, &args.data).await;
            print_response(&resp);
        }
        None => interactive_mode(&mut client).await,
    }
}

async fn run_one_shot(client: &mut DbClient, command: &str, collection: &str, data: &str) -> Response {
    let value: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return Response::error(format!("Invalid JSON data: {e}")),
    };

    match command {
        "insert" => client.insert(collection, vec![value]).await,
        "find" => client.find(collection, value).await,
        "delete" => client.remove(collection, value).await,
        other => Response::error(format!("Unknown command: {other}")),
    }
}

async fn interactive_mode(client: &mut DbClient) {
    println!("Document database client");
    println!("Server: {}:{}", "connected", client.database());
    print_help();

    loop {
        print!("{}> ", client.database());
        let _ = io::stdout().flush();

        let mut line = String::new();
        if io::stdin().read_line(&mut line).unwrap_or(0) == 0 {
            println!("\nExiting");
            return;
        }
        let line = line.trim();

        if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
            println!("Exiting");
            return;
        }
        if line.eq_ignore_ascii_case("help") {
            print_help();
            continue;
        }
        if line.is_empty() {
            continue;
        }

        let mut parts = line.splitn(3, ' ');
        let operation = parts.next().unwrap_or("").to_uppercase();
        let collection = parts.next().unwrap_or("");
        let payload = parts.next().unwrap_or("{}");

        if collection.is_empty() {
            println!("Error: {operation} requires a collection");
            continue;
        }

        let value: Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => {
                println!("Error: invalid JSON: {e}");
                continue;
            }
        };

        let resp = match operation.as_str() {
            "INSERT" => client.insert(collection, vec![value]).await,
            "FIND" => client.find(collection, value).await,
            "DELETE" => client.remove(collection, value).await,
            other => {
                println!("Error: Unknown operation '{other}'");
                continue;
            }
        };
        print_response(&resp);
        println!();
    }
}

fn print_help() {
    println!();
    println!("Available commands:");
    println!("INSERT <collection> <json_data> - insert a document");
    println!("FIND <collection> <query> - find documents");
    println!("DELETE <collection> <query> - delete documents");
    println!("HELP - show this message");
    println!("EXIT / QUIT - quit");
    println!();
}

fn print_response(resp: &Response) {
    println!("Status: {:?}", resp.status);
    if !resp.message.is_empty() {
        println!("Message: {}", resp.message);
    }
    if resp.count > 0 {
        println!("Count: {}", resp.count);
    }
    if !resp.data.is_empty() {
        println!("Data:");
        for item in &resp.data {
            println!("  {item}");
        }
    }
}
