mod commands;
mod config;
mod schema;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "protobridge", about = "Expose gRPC services as LLM tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    source: SourceArgs,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

/// Where the schema comes from and how it is cached. Unset flags fall back
/// to the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct SourceArgs {
    /// gRPC server to read the schema from via server reflection
    #[arg(long, env = "PROTOBRIDGE_REFLECTION_URL", global = true)]
    pub reflection_url: Option<String>,

    /// Descriptor set bundle as `path:service1,service2` (repeatable)
    #[arg(long = "descriptor-set", env = "PROTOBRIDGE_DESCRIPTOR_SET", global = true)]
    pub descriptor_sets: Vec<String>,

    /// Directory for the on-disk schema cache
    #[arg(long, env = "PROTOBRIDGE_CACHE_DIR", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// How long a resolved schema stays cached
    #[arg(long, env = "PROTOBRIDGE_CACHE_TTL_SECS", global = true)]
    pub cache_ttl_secs: Option<u64>,

    /// Deepest field level included in tool schemas
    #[arg(long, env = "PROTOBRIDGE_MAX_DEPTH", global = true)]
    pub max_depth: Option<usize>,

    /// Deadline for schema resolution and method calls
    #[arg(long, env = "PROTOBRIDGE_TIMEOUT_SECS", global = true)]
    pub timeout_secs: Option<u64>,

    /// Config file (defaults to <config dir>/protobridge/config.toml)
    #[arg(long, env = "PROTOBRIDGE_CONFIG", global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List a tool for every method of the exposed services
    Tools {
        /// Only these services (full names, repeatable)
        #[arg(long = "service")]
        services: Vec<String>,
        /// Require a response read mask argument on every tool
        #[arg(long)]
        response_read_mask: bool,
        /// Print the tools as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the discoverable tool set of a service as JSON
    ToolSet {
        /// Service full name
        service: String,
        /// Only these methods (short names, repeatable)
        #[arg(long = "method")]
        methods: Vec<String>,
        /// Mark these tools discovered before printing (repeatable)
        #[arg(long)]
        discover: Vec<String>,
    },

    /// Parse a tool call into a discovery, method request or message
    Parse {
        /// File holding the tool call as JSON, `-` for stdin
        call: PathBuf,
        /// Tool set JSON files the call may refer to (repeatable)
        #[arg(long = "tool-set")]
        tool_sets: Vec<PathBuf>,
    },

    /// Call a method with JSON arguments, the way a model would
    Call {
        /// Method full name, e.g. `library.v1.LibraryService.GetBook`
        method: String,
        /// Arguments as a JSON object
        #[arg(long, short, default_value = "{}")]
        data: String,
        /// Fields of the response to return
        #[arg(long)]
        read_mask: Option<String>,
        /// Server to send the call to (defaults to the reflection URL)
        #[arg(long, env = "PROTOBRIDGE_TARGET")]
        target: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("protobridge=info,pb=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.no_color || std::env::var_os("NO_COLOR").is_some() {
        colored::control::set_override(false);
    }

    let settings = config::Settings::load(&cli.source)?;

    match cli.command {
        Commands::Tools {
            services,
            response_read_mask,
            json,
        } => commands::tools::run(&settings, services, response_read_mask, json).await,
        Commands::ToolSet {
            service,
            methods,
            discover,
        } => commands::tool_set::run(&settings, service, methods, discover).await,
        Commands::Parse { call, tool_sets } => commands::parse::run(&settings, call, tool_sets).await,
        Commands::Call {
            method,
            data,
            read_mask,
            target,
        } => commands::call::run(&settings, method, data, read_mask, target).await,
    }
}
