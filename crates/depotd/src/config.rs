//! Daemon configuration: defaults, environment overrides, program arguments.
//!
//! Resolution order: defaults → `DEPOT_*` environment variables → argv.
//! Arguments are bare tokens, not flags; `depotd server:run verbose port 9000`.

use std::path::PathBuf;

use depot_core::wire::DEFAULT_PORT;

/// Default per-session pacing sleep in milliseconds. 0 disables pacing.
pub const DEFAULT_UPDATE_RATE_MS: u64 = 10;

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Serve only when `server:run` was given.
    pub run_server: bool,
    pub show_help: bool,
    /// Log every processed packet.
    pub verbose: bool,
    /// Register at most one client at a time.
    pub singleton: bool,
    /// ANSI colors on stdout.
    pub print_colors: bool,
    pub port: u16,
    /// Sleep between a session's dispatch passes.
    pub update_rate_ms: u64,
    /// Optional transcript file; a `.html` extension selects the HTML writer.
    pub log_file: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            run_server: false,
            show_help: false,
            verbose: false,
            singleton: false,
            print_colors: false,
            port: DEFAULT_PORT,
            update_rate_ms: DEFAULT_UPDATE_RATE_MS,
            log_file: None,
        }
    }
}

impl DaemonConfig {
    /// Build the effective configuration from the environment and argv.
    pub fn from_env_and_args(args: impl Iterator<Item = String>) -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.apply_args(args);
        config
    }

    /// `DEPOT_*` overrides, applied before argv so the command line wins.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("DEPOT_PORT") {
            match v.parse() {
                Ok(p) => self.port = p,
                Err(_) => eprintln!("ignoring DEPOT_PORT: \"{v}\" is not a port number"),
            }
        }
        if let Ok(v) = std::env::var("DEPOT_UPDATE_RATE") {
            match v.parse() {
                Ok(r) => self.update_rate_ms = r,
                Err(_) => eprintln!("ignoring DEPOT_UPDATE_RATE: \"{v}\" is not a number"),
            }
        }
    }

    /// Parse the bare-token argument list. Unknown tokens and missing values
    /// are reported and skipped; parsing always completes.
    pub fn apply_args(&mut self, mut args: impl Iterator<Item = String>) {
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "help" => self.show_help = true,
                "server:run" => self.run_server = true,
                "verbose" => self.verbose = true,
                "singleton" => self.singleton = true,
                "print-colors" => self.print_colors = true,
                "verbose:logfile" => {
                    self.verbose = true;
                    match args.next() {
                        Some(file) => self.log_file = Some(PathBuf::from(file)),
                        None => eprintln!("expected filename after \"verbose:logfile\" parameter"),
                    }
                }
                "port" => match args.next().map(|v| v.parse::<u16>()) {
                    Some(Ok(p)) => self.port = p,
                    Some(Err(_)) => eprintln!("expected number after \"port\" parameter"),
                    None => eprintln!("expected number after \"port\" parameter"),
                },
                "update-rate" => match args.next().map(|v| v.parse::<u64>()) {
                    Some(Ok(r)) => self.update_rate_ms = r,
                    Some(Err(_)) => eprintln!("expected number after \"update-rate\" parameter"),
                    None => eprintln!("expected number after \"update-rate\" parameter"),
                },
                unknown => eprintln!("unknown program parameter \"{unknown}\""),
            }
        }
    }

    /// Multi-line configuration summary sent back in status replies.
    pub fn status_info(&self) -> String {
        format!(
            "verbose:      {}\n\
             singleton:    {}\n\
             print colors: {}\n\
             port:         {}\n\
             update rate:  {}",
            self.verbose, self.singleton, self.print_colors, self.port, self.update_rate_ms
        )
    }
}

pub fn print_usage() {
    println!("Usage:");
    println!("  depotd [Options]");
    println!("Options:");
    println!("  server:run                 Runs the daemon server.");
    println!("  verbose                    Prints all client/server communications to standard output.");
    println!("  verbose:logfile FILE       Verbose, plus a transcript written to FILE.");
    println!("  verbose:logfile FILE.html  Verbose, plus an HTML transcript written to FILE.html.");
    println!("  singleton                  This daemon instance only communicates with a single client.");
    println!("  print-colors               Prints the output with color highlighting.");
    println!("  port N                     Overwrite default port ({}) by number 'N'.", DEFAULT_PORT);
    println!("  update-rate N              Overwrite default update rate ({} ms) by number 'N'.", DEFAULT_UPDATE_RATE_MS);
    println!("  help                       Prints this text.");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
