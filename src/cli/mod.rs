//! Command-line interface definitions for the `driftless` binary.
//!
//! This module only depends on clap so the build script can reuse it when
//! generating the manual page.

use clap::{Args, Parser, Subcommand};

/// Top-level CLI for the `driftless` binary.
#[derive(Debug, Parser)]
#[command(
    name = "driftless",
    about = "Reconcile MongoDB Atlas resources and inspect their state identifiers",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Encode, decode, and import composite state identifiers.
    #[command(subcommand, name = "state-id")]
    StateId(StateIdCommand),
    /// Start, end, and inspect cluster outage simulations.
    #[command(subcommand, name = "outage")]
    Outage(OutageCommand),
}

/// Subcommands of `driftless state-id`.
#[derive(Debug, Subcommand)]
pub(crate) enum StateIdCommand {
    /// Encode `key=value` pairs into a state identifier.
    #[command(name = "encode")]
    Encode {
        /// Fields to encode, for example `project_id=5f1a`.
        #[arg(required = true, value_name = "KEY=VALUE")]
        fields: Vec<String>,
    },
    /// Decode a state identifier into `key=value` lines.
    #[command(name = "decode")]
    Decode {
        /// Encoded identifier.
        id: String,
    },
    /// Convert a dash-separated import identifier into a state identifier.
    ///
    /// The last field keeps any dashes that remain, so security group ids
    /// such as `sg-0123` survive.
    #[command(name = "import")]
    Import {
        /// Import identifier, for example `5f1a-my-cluster`.
        raw: String,
        /// Field names in the order they appear in the import identifier.
        #[arg(long, required = true, value_delimiter = ',', value_name = "NAMES")]
        fields: Vec<String>,
    },
}

/// Cluster selected by an outage subcommand.
#[derive(Clone, Debug, Args)]
pub(crate) struct ClusterTarget {
    /// Project (group) identifier.
    #[arg(long, env = "MONGODB_ATLAS_PROJECT_ID")]
    pub(crate) project_id: String,
    /// Cluster name.
    #[arg(long)]
    pub(crate) cluster_name: String,
}

/// Subcommands of `driftless outage`.
#[derive(Debug, Subcommand)]
pub(crate) enum OutageCommand {
    /// Start a simulation and wait until regions are offline.
    #[command(name = "start")]
    Start(OutageStartCommand),
    /// End the simulation and wait until it is gone.
    #[command(name = "end")]
    End(ClusterTarget),
    /// Show the current simulation status.
    #[command(name = "status")]
    Status(ClusterTarget),
}

/// Arguments for `driftless outage start`.
#[derive(Debug, Args)]
pub(crate) struct OutageStartCommand {
    /// Cluster to simulate the outage on.
    #[command(flatten)]
    pub(crate) target: ClusterTarget,
    /// Region to take offline as `PROVIDER:REGION`, for example
    /// `AWS:US_EAST_1`. Repeat for several regions.
    #[arg(long = "region", required = true, value_name = "PROVIDER:REGION")]
    pub(crate) regions: Vec<String>,
    /// Minutes to wait for the simulation to start.
    #[arg(long, value_name = "MINUTES")]
    pub(crate) timeout_minutes: Option<u64>,
}
