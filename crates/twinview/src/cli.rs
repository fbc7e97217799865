//! Clap derive structures for the `twinview` CLI.
//!
//! Defines the command tree, global flags, and shared types. Also compiled
//! by `build.rs` for man page generation, so it depends on clap alone.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// twinview -- inspect and drive IoT device digital twins
#[derive(Debug, Parser)]
#[command(
    name = "twinview",
    version,
    about = "Inspect and drive IoT device digital twins",
    long_about = "Provision devices, hold a live hub session as a device, and compare\n\
        the management-plane twin with the hub's own copy.\n\n\
        Credentials come from flags, TWINVIEW_* environment variables, the\n\
        system keyring, or the active config profile, in that order.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config profile to use
    #[arg(long, short = 'p', env = "TWINVIEW_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Management-plane application id (overrides profile)
    #[arg(long, short = 'a', env = "TWINVIEW_APP_ID", global = true)]
    pub app_id: Option<String>,

    /// Device id (overrides profile)
    #[arg(long, short = 'd', env = "TWINVIEW_DEVICE_ID", global = true)]
    pub device_id: Option<String>,

    /// DPS id scope (overrides profile)
    #[arg(long, env = "TWINVIEW_SCOPE_ID", global = true)]
    pub scope_id: Option<String>,

    /// Device symmetric key, base64
    #[arg(long, env = "TWINVIEW_SYMMETRIC_KEY", global = true, hide_env_values = true)]
    pub symmetric_key: Option<String>,

    /// Management-plane bearer token
    #[arg(long, env = "TWINVIEW_ACCESS_TOKEN", global = true, hide_env_values = true)]
    pub access_token: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "TWINVIEW_OUTPUT",
        default_value = "json",
        global = true
    )]
    pub output: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', env = "TWINVIEW_INSECURE", global = true)]
    pub insecure: bool,

    /// Request timeout in seconds (overrides profile)
    #[arg(long, env = "TWINVIEW_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output Enum ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show the management plane's view of a device's properties
    #[command(alias = "ct")]
    CentralTwin,

    /// Find a device's twin across every hub behind the application
    #[command(alias = "cloud")]
    CloudTwin(CloudTwinArgs),

    /// Register the device with DPS and print the assigned hub
    Provision(ProvisionArgs),

    /// Connect as the device and work with its twin
    #[command(alias = "dev")]
    Device(DeviceArgs),

    /// Run the twin proxy HTTP service
    Serve(ServeArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  CLOUD TWIN
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct CloudTwinArgs {
    /// Look up through this twin proxy instead of calling hubs directly
    #[arg(long, env = "TWINVIEW_PROXY_URL")]
    pub proxy_url: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  PROVISION
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ProvisionArgs {
    /// DPS endpoint (overrides profile)
    #[arg(long, env = "TWINVIEW_DPS_ENDPOINT")]
    pub dps_endpoint: Option<String>,

    /// Give up after this many seconds of assignment (overrides profile)
    #[arg(long)]
    pub budget: Option<u64>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  DEVICE
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct DeviceArgs {
    /// Connect to this hub directly, skipping provisioning
    #[arg(long, global = true)]
    pub hub_host: Option<String>,

    #[command(flatten)]
    pub provision: ProvisionArgs,

    #[command(subcommand)]
    pub command: DeviceCommand,
}

#[derive(Debug, Subcommand)]
pub enum DeviceCommand {
    /// Fetch the twin over the device connection
    Get,

    /// Write reported properties
    Report {
        /// JSON object merged into reported properties
        #[arg(required_unless_present = "from_file")]
        patch: Option<String>,

        /// Read the patch from a JSON file
        #[arg(long, short = 'F', conflicts_with = "patch")]
        from_file: Option<PathBuf>,
    },

    /// Send one telemetry message
    Telemetry {
        /// JSON message body
        payload: String,
    },

    /// Stay connected and print desired-property changes and method calls
    Watch {
        /// Answer direct methods with 200 and echo the payload
        #[arg(long)]
        ack_methods: bool,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  SERVE
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, short = 'l', env = "TWINVIEW_LISTEN", default_value = "127.0.0.1:3000")]
    pub listen: SocketAddr,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  CONFIG
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create initial config file with guided setup
    Init,

    /// Display current configuration
    Show,

    /// List configured profiles
    Profiles,

    /// Set the default profile
    Use {
        /// Profile name to set as default
        name: String,
    },

    /// Store the profile's device symmetric key in the system keyring
    SetKey,

    /// Store the profile's management-plane bearer token in the system keyring
    SetToken,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
