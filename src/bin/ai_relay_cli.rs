//! ai-relay-cli: drive a provider adapter from the command line
//!
//! Usage:
//!   ai-relay-cli stream <provider> <model> <prompt...>     Stream a completion
//!   ai-relay-cli complete <provider> <model> <prompt...>   One-shot completion
//!   ai-relay-cli models <provider>                          List models the backend reports
//!   ai-relay-cli providers                                  List provider keys and aliases

use std::io::Write;

use ai_lib_relay::{
    get_adapter, CallConfig, EventEmitter, Message, ModelOptions, Provider, ProviderAdapter,
    StreamEvent,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("AI_LOG").unwrap_or_else(|_| EnvFilter::from_default_env()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let code = match args[1].as_str() {
        "stream" => cmd_stream(&args[2..]).await,
        "complete" => cmd_complete(&args[2..]).await,
        "models" => cmd_models(&args[2..]).await,
        "providers" => cmd_providers(),
        "version" | "--version" | "-V" => cmd_version(),
        "help" | "--help" | "-h" => {
            print_usage();
            0
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            1
        }
    };
    std::process::exit(code);
}

fn print_usage() {
    println!(
        r#"ai-relay-cli: multi-provider streaming completion client

USAGE:
    ai-relay-cli <COMMAND> [OPTIONS]

COMMANDS:
    stream <provider> <model> <prompt...>      Stream a completion to stdout
    complete <provider> <model> <prompt...>    Print a one-shot completion
    models <provider>                          List models the backend reports
    providers                                  List provider keys and aliases
    version                                    Show version information
    help                                       Show this help message

OPTIONS (stream, complete):
    --system <text>         System prompt
    --temperature <value>   Sampling temperature
    --max-tokens <n>        Output token cap
    --json                  Ask for a JSON object response

ENVIRONMENT:
    <PROVIDER>_API_KEY      API key, e.g. OPENAI_API_KEY
    <PROVIDER>_BASE_URL     Base URL override, e.g. OLLAMA_BASE_URL
    AI_TRACE                Raise request diagnostics to info level
    AI_LOG / RUST_LOG       Log filter"#
    );
}

fn cmd_version() -> i32 {
    println!("ai-relay-cli {}", env!("CARGO_PKG_VERSION"));
    0
}

fn cmd_providers() -> i32 {
    let aliases = |p: Provider| match p {
        Provider::OpenAi => "oai, chatgpt",
        Provider::Anthropic => "claude",
        Provider::Gemini => "google, vertex, generativeai",
        Provider::Ollama => "local",
    };
    for p in Provider::ALL {
        println!("{:<10} aliases: {}", p.key(), aliases(p));
    }
    0
}

struct Invocation {
    adapter: std::sync::Arc<dyn ProviderAdapter>,
    config: CallConfig,
    options: ModelOptions,
    messages: Vec<Message>,
}

fn parse_invocation(args: &[String]) -> Result<Invocation, String> {
    let provider_key = args.first().ok_or("missing <provider>")?;
    let model = args.get(1).ok_or("missing <model>")?;
    let provider = Provider::from_alias(provider_key)
        .ok_or_else(|| format!("unknown provider: {provider_key}"))?;
    let adapter = get_adapter(provider_key).map_err(|e| e.to_string())?;

    let mut options = ModelOptions::new(model.as_str());
    let mut prompt: Vec<&str> = Vec::new();
    let mut rest = args[2..].iter();
    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "--system" => {
                let v = rest.next().ok_or("--system needs a value")?;
                options = options.system(v.as_str());
            }
            "--temperature" => {
                let v = rest.next().ok_or("--temperature needs a value")?;
                let t: f64 = v.parse().map_err(|_| format!("bad temperature: {v}"))?;
                options = options.temperature(t);
            }
            "--max-tokens" => {
                let v = rest.next().ok_or("--max-tokens needs a value")?;
                let n: u32 = v.parse().map_err(|_| format!("bad max tokens: {v}"))?;
                options = options.max_tokens(n);
            }
            "--json" => options = options.json_mode(true),
            word => prompt.push(word),
        }
    }
    if prompt.is_empty() {
        return Err("missing <prompt>".to_string());
    }

    Ok(Invocation {
        adapter,
        config: CallConfig::from_env(provider),
        options,
        messages: vec![Message::user(prompt.join(" "))],
    })
}

async fn cmd_stream(args: &[String]) -> i32 {
    let inv = match parse_invocation(args) {
        Ok(inv) => inv,
        Err(e) => {
            eprintln!("error: {e}");
            return 2;
        }
    };

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let (events, mut rx) = EventEmitter::channel(uuid::Uuid::new_v4().to_string());
    let worker = tokio::spawn(async move {
        inv.adapter
            .stream(cancel, &inv.config, &inv.options, &inv.messages, &events)
            .await;
    });

    let mut code = 0;
    let mut stdout = std::io::stdout();
    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::Delta { text } => {
                print!("{text}");
                let _ = stdout.flush();
            }
            StreamEvent::ToolCall { call } => {
                eprintln!("\n[tool call] {} {} {}", call.id, call.name, call.arguments);
            }
            StreamEvent::Usage(u) => {
                eprintln!(
                    "\n[usage] prompt={} completion={}",
                    u.prompt_tokens, u.completion_tokens
                );
            }
            StreamEvent::Done { finish_reason } => {
                println!();
                eprintln!("[done] {}", finish_reason.as_deref().unwrap_or("-"));
            }
            StreamEvent::Error(e) => {
                println!();
                eprintln!("[error] {}: {}", e.code, e.message);
                code = if e.is_cancelled() { 130 } else { 1 };
            }
            _ => {}
        }
    }
    let _ = worker.await;
    code
}

async fn cmd_complete(args: &[String]) -> i32 {
    let inv = match parse_invocation(args) {
        Ok(inv) => inv,
        Err(e) => {
            eprintln!("error: {e}");
            return 2;
        }
    };
    match inv
        .adapter
        .complete(&inv.config, &inv.options, &inv.messages, None)
        .await
    {
        Ok(out) => {
            println!("{}", out.text);
            for call in &out.tool_calls {
                eprintln!("[tool call] {} {} {}", call.id, call.name, call.arguments);
            }
            if let Some(u) = out.usage {
                eprintln!(
                    "[usage] prompt={} completion={}",
                    u.prompt_tokens, u.completion_tokens
                );
            }
            0
        }
        Err(e) => {
            eprintln!("[error] {}: {}", e.code, e.message);
            1
        }
    }
}

async fn cmd_models(args: &[String]) -> i32 {
    let Some(key) = args.first() else {
        eprintln!("error: missing <provider>");
        return 2;
    };
    let Some(provider) = Provider::from_alias(key) else {
        eprintln!("error: unknown provider: {key}");
        return 2;
    };
    let adapter = match get_adapter(key) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("[error] {}: {}", e.code, e.message);
            return 1;
        }
    };
    let models = adapter.list_models(&CallConfig::from_env(provider)).await;
    if models.is_empty() {
        eprintln!("no models reported by {}", provider);
    }
    for m in models {
        println!("{m}");
    }
    0
}
