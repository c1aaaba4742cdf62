use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;

use lib_apiclient::loggers::init_tracing;
use lib_apiclient::{ApiManager, ApiResponse, ConfigType, RequestParams, handler, load_collections};

/// Calls any operation of a configured API collection from the command line.
#[derive(Parser, Debug)]
#[command(
    version,
    about,
    long_about = "Loads API collection configs from a JSON or JSON5 file and executes a verb against an address of the form `collection:operation` (or a bare `operation`, routed to the default collection). HTTP responses are printed as pretty JSON; subscriptions print one JSON line per message until Ctrl-C."
)]
struct Cli {
    /// Path to the JSON / JSON5 file holding one collection or an array of them.
    #[arg(short, long, env = "API_CALL_CONFIG")]
    config: PathBuf,

    /// Collection that bare operation names route to. Defaults to the first one in the file.
    #[arg(short, long)]
    default: Option<String>,

    /// Log level used when RUST_LOG is not set.
    #[arg(long, env = "API_CALL_LOG", default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    verb: Verb,
}

#[derive(Subcommand, Debug)]
enum Verb {
    /// GET a query.
    Query {
        address: String,
        #[command(flatten)]
        params: ParamArgs,
    },
    /// GET one item of a query.
    QueryItem {
        address: String,
        /// Value bound to the `{_id}` placeholder of the item path.
        #[arg(long)]
        item_id: String,
        #[command(flatten)]
        params: ParamArgs,
    },
    /// GET the metadata of a query (cached by default).
    QueryMeta {
        address: String,
        #[command(flatten)]
        params: ParamArgs,
    },
    /// POST a command.
    Send {
        address: String,
        /// JSON body.
        #[arg(long)]
        data: Option<String>,
        #[command(flatten)]
        params: ParamArgs,
    },
    /// Execute a request with its configured method.
    Request {
        address: String,
        /// JSON body, attached for POST/PUT/PATCH only.
        #[arg(long)]
        data: Option<String>,
        #[command(flatten)]
        params: ParamArgs,
    },
    /// Print messages from a socket channel until Ctrl-C.
    Subscribe {
        address: String,
        #[arg(long, default_value = "default")]
        channel: String,
    },
    /// Publish one JSON message on a socket channel.
    Publish {
        address: String,
        #[arg(long)]
        channel: String,
        /// JSON message.
        #[arg(long = "data")]
        message: String,
    },
    /// List collections and their declared operations.
    List,
}

#[derive(Args, Debug)]
struct ParamArgs {
    /// Path placeholder value, `name=value`. Repeatable.
    #[arg(long = "path", value_parser = parse_pair)]
    path: Vec<(String, String)>,

    /// Query-string pair, `name=value`. Repeatable.
    #[arg(long, value_parser = parse_pair)]
    search: Vec<(String, String)>,

    /// Extra request header, `name=value`. Repeatable.
    #[arg(long, value_parser = parse_pair)]
    header: Vec<(String, String)>,

    /// Force the response cache on or off.
    #[arg(long)]
    cache: Option<bool>,
}

impl ParamArgs {
    fn into_params(self) -> RequestParams {
        let mut params = RequestParams::new();
        for (k, v) in self.path {
            params = params.with_path_param(k, v);
        }
        for (k, v) in self.search {
            params = params.with_search(k, v);
        }
        for (k, v) in self.header {
            params = params.with_header(k, v);
        }
        if let Some(cache) = self.cache {
            params = params.with_cache(cache);
        }
        params
    }
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected `name=value`, got `{}`", raw))
}

/// Parses a JSON argument, falling back to a plain string.
fn parse_json(raw: Option<String>) -> Option<Value> {
    raw.map(|s| serde_json::from_str(&s).unwrap_or(Value::String(s)))
}

fn print_response(response: &ApiResponse) -> Result<()> {
    let json = serde_json::to_string_pretty(response).context("Failed to serialize response")?;
    println!("{}", json);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs)?;

    // 1. Load and register every collection in the file
    let configs = load_collections(&cli.config)
        .with_context(|| format!("Could not load {}", cli.config.display()))?;
    if configs.is_empty() {
        bail!("{} declares no collections", cli.config.display());
    }
    let manager = ApiManager::new()?;
    for config in configs {
        manager.register(config)?;
    }
    if let Some(default) = &cli.default {
        manager.set_default_collection(default)?;
    }

    // 2. Dispatch the verb
    match cli.verb {
        Verb::Query { address, params } => {
            print_response(&manager.query(&address, params.into_params()).await?)?;
        }
        Verb::QueryItem { address, item_id, params } => {
            print_response(&manager.query_item(&address, &item_id, params.into_params()).await?)?;
        }
        Verb::QueryMeta { address, params } => {
            print_response(&manager.query_meta(&address, params.into_params()).await?)?;
        }
        Verb::Send { address, data, params } => {
            print_response(&manager.send(&address, parse_json(data), params.into_params()).await?)?;
        }
        Verb::Request { address, data, params } => {
            print_response(&manager.request(&address, parse_json(data), params.into_params()).await?)?;
        }
        Verb::Subscribe { address, channel } => {
            let subscription = manager
                .subscribe(
                    &address,
                    &channel,
                    handler(|message| println!("{}", message)),
                )
                .await?;
            tracing::info!(address = %address, channel = %channel, "Subscribed; press Ctrl-C to stop");
            tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
            subscription.unsubscribe();
        }
        Verb::Publish { address, channel, message } => {
            let message = parse_json(Some(message)).unwrap_or(Value::Null);
            manager.publish(&address, &channel, message).await?;
            println!("Published to {} on {}", channel, address);
        }
        Verb::List => {
            let default = manager.default_collection();
            for name in manager.list_collections() {
                let collection = manager.get_collection(Some(&name))?;
                let marker = if default.as_deref() == Some(name.as_str()) { " (default)" } else { "" };
                println!("{}{} -> {}", name, marker, collection.base_url());
                for kind in [ConfigType::Query, ConfigType::Command, ConfigType::Request, ConfigType::Socket] {
                    let names = collection.operation_names(kind);
                    if !names.is_empty() {
                        println!("  {}: {}", kind, names.join(", "));
                    }
                }
            }
        }
    }

    manager.clear();
    Ok(())
}
