use clap::{Parser, Subcommand, ValueEnum};
use skybridge_types::{CopyMode, NodeIdentity, PhysicalLabel, UserRole};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "skybridge",
    about = "Skybridge - hybrid database sync and secure tunnel manager",
    version = env!("CARGO_PKG_VERSION"),
    author,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path (falls back to the platform config directory)
    #[arg(short, long, env = "SKYBRIDGE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, env = "RUST_LOG", default_value = "warn", global = true)]
    pub log_level: String,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Write a starter config file to the resolved path")]
    Init {
        #[arg(long, help = "Overwrite an existing file")]
        force: bool,
    },

    #[command(about = "Show cluster roles, reachability, and last sync")]
    Status {
        #[arg(short, long, help = "Output as JSON")]
        json: bool,
    },

    #[command(about = "Run push/reconcile/pull between the local cache and the primary")]
    Sync {
        #[arg(short, long, help = "Output the full run as JSON")]
        json: bool,
    },

    #[command(about = "Exchange the Primary and Secondary role assignment")]
    Swap,

    #[command(about = "Copy every manifest table from one cloud node onto the other")]
    Replicate {
        #[arg(long, value_enum, help = "Physical node to copy from")]
        source: LabelArg,

        #[arg(long, value_enum, help = "Physical node to copy onto")]
        dest: LabelArg,

        #[arg(
            long,
            value_enum,
            help = "Copy mode for every table, overriding the config manifest"
        )]
        mode: Option<ModeArg>,

        #[arg(short, long, help = "Output the full run as JSON")]
        json: bool,
    },

    #[command(subcommand, about = "Inspect table schemas across nodes")]
    Tables(TableCommands),

    #[command(subcommand, about = "Administer companion portal accounts")]
    User(UserCommands),
}

#[derive(Subcommand)]
pub enum TableCommands {
    #[command(about = "List base tables on one node")]
    List {
        #[arg(value_enum, default_value = "primary", help = "Node to inspect")]
        node: NodeArg,
    },

    #[command(about = "Show tables missing on either of two nodes")]
    Compare {
        #[arg(value_enum)]
        left: NodeArg,

        #[arg(value_enum)]
        right: NodeArg,
    },
}

#[derive(Subcommand)]
pub enum UserCommands {
    #[command(about = "List accounts on the identity node")]
    List {
        #[arg(short, long, help = "Output as JSON")]
        json: bool,
    },

    #[command(about = "Create an account")]
    Add {
        username: String,

        #[arg(long, value_enum, default_value = "user", help = "Access level")]
        role: RoleArg,

        #[arg(long, help = "Password (read from stdin when omitted)")]
        password: Option<String>,
    },

    #[command(about = "Delete an account (the built-in admin is protected)")]
    Delete { username: String },

    #[command(about = "Set a new password without knowing the old one")]
    ResetPassword {
        username: String,

        #[arg(long, help = "New password (read from stdin when omitted)")]
        password: Option<String>,
    },

    #[command(about = "Change an account's access level")]
    SetRole {
        username: String,

        #[arg(value_enum)]
        role: RoleArg,
    },

    #[command(about = "Check a username/password pair")]
    Verify {
        username: String,

        #[arg(long, help = "Password (read from stdin when omitted)")]
        password: Option<String>,
    },
}

/// Physical node labels as command-line values.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LabelArg {
    Hostek,
    Vps,
}

impl From<LabelArg> for PhysicalLabel {
    fn from(arg: LabelArg) -> Self {
        match arg {
            LabelArg::Hostek => Self::Hostek,
            LabelArg::Vps => Self::Vps,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum NodeArg {
    Primary,
    Secondary,
    Local,
    Identity,
}

impl From<NodeArg> for NodeIdentity {
    fn from(arg: NodeArg) -> Self {
        match arg {
            NodeArg::Primary => Self::Primary,
            NodeArg::Secondary => Self::Secondary,
            NodeArg::Local => Self::Local,
            NodeArg::Identity => Self::IdentityStore,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum RoleArg {
    User,
    Admin,
}

impl From<RoleArg> for UserRole {
    fn from(arg: RoleArg) -> Self {
        match arg {
            RoleArg::User => Self::User,
            RoleArg::Admin => Self::Admin,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ModeArg {
    Truncate,
    Upsert,
    Append,
}

impl From<ModeArg> for CopyMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Truncate => Self::Truncate,
            ModeArg::Upsert => Self::Upsert,
            ModeArg::Append => Self::Append,
        }
    }
}
