use clap::Parser;
use duplexrpc::{Client, ClientConfig, services::MethodList};
use serde_json::Value;

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Base URL of the server's RPC resource.
    #[arg(default_value = "http://127.0.0.1:8000/rpc/v0")]
    pub url: String,

    /// Bearer token.
    #[arg(long)]
    pub token: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = ClientConfig {
        token: args.token,
        ..ClientConfig::default()
    };
    let client = match Client::new(&args.url, config) {
        Ok(client) => client,
        Err(err) => {
            eprintln!("invalid url: {err}");
            std::process::exit(2);
        }
    };
    match client.call::<Value>(MethodList::METHOD, vec![]).await {
        Ok(rsp) => match serde_json::to_string_pretty(&rsp) {
            Ok(text) => println!("{text}"),
            Err(err) => eprintln!("formatting response failed: {err}"),
        },
        Err(err) => eprintln!("request failed: {err}"),
    }
}
