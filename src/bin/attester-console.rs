//! Interactive attester console.
//!
//! Each line read from stdin is submitted as a query; the rendered
//! response or the error is printed. End of input exits.
//!
//! ```text
//! $ attester-console --manifest ./com.douzebis.attester.json
//! {"query":"get-ak-pub"}
//! get-ak-pub
//!   ak-pub: -----BEGIN PUBLIC KEY-----...
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::process::ExitCode;
use std::time::Duration;

use attester_bridge::{
    BridgeBuilder, BridgeOptions, CorrelationMode, Error, HostSource, NativeBridge, QueryClient,
    Result,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

/// Environment variable naming the host when no source flag is given.
const HOST_ENV: &str = "ATTESTER_HOST";

const USAGE: &str = "\
Usage: attester-console [OPTIONS]

Options:
  --host <name>        Native host name (default: com.douzebis.attester)
  --manifest <path>    Host manifest file
  --binary <path>      Host executable, no manifest checks
  --origin <origin>    Caller origin passed to the host
  --request-ids        Match replies by echoed request-id
  --timeout-ms <n>     Request timeout in milliseconds
  --debug              Debug logging
  -h, --help           Print this help";

// ============================================================================
// Types
// ============================================================================

/// Command-line arguments.
#[derive(Debug, Clone, Default, PartialEq)]
struct Args {
    source: Option<HostSource>,
    origin: Option<String>,
    request_ids: bool,
    timeout_ms: Option<u64>,
    debug: bool,
    help: bool,
}

impl Args {
    /// Parses arguments, program name excluded.
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut parsed = Self::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--host" => parsed.source = Some(HostSource::name(value(&mut args, &arg)?)),
                "--manifest" => parsed.source = Some(HostSource::manifest(value(&mut args, &arg)?)),
                "--binary" => parsed.source = Some(HostSource::binary(value(&mut args, &arg)?)),
                "--origin" => parsed.origin = Some(value(&mut args, &arg)?),
                "--request-ids" => parsed.request_ids = true,
                "--timeout-ms" => {
                    let raw = value(&mut args, &arg)?;
                    let ms = raw
                        .parse()
                        .map_err(|_| Error::config(format!("Invalid --timeout-ms value: {raw}")))?;
                    parsed.timeout_ms = Some(ms);
                }
                "--debug" => parsed.debug = true,
                "-h" | "--help" => parsed.help = true,
                other => return Err(Error::config(format!("Unknown argument: {other}"))),
            }
        }

        Ok(parsed)
    }

    /// Falls back to the environment when no host source was given.
    fn with_env_host(mut self, host: Option<String>) -> Self {
        if self.source.is_none()
            && let Some(host) = host.filter(|h| !h.is_empty())
        {
            self.source = Some(HostSource::name(host));
        }
        self
    }

    fn options(&self) -> BridgeOptions {
        let mut options = BridgeOptions::new();
        if self.request_ids {
            options = options.with_correlation(CorrelationMode::RequestId);
        }
        if let Some(ms) = self.timeout_ms {
            options = options.with_timeout(Duration::from_millis(ms));
        }
        options
    }

    fn builder(&self) -> BridgeBuilder {
        let mut builder = NativeBridge::builder().options(self.options());
        if let Some(source) = &self.source {
            builder = builder.source(source.clone());
        }
        if let Some(origin) = &self.origin {
            builder = builder.origin(origin.clone());
        }
        builder
    }
}

fn value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String> {
    args.next()
        .ok_or_else(|| Error::config(format!("Missing value for {flag}")))
}

// ============================================================================
// Functions
// ============================================================================

/// Initialize tracing/logging on stderr.
fn init_logging(debug: bool) {
    let filter = if debug {
        "attester_bridge=debug"
    } else {
        "attester_bridge=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::parse(std::env::args().skip(1)) {
        Ok(args) => args.with_env_host(std::env::var(HOST_ENV).ok()),
        Err(e) => {
            eprintln!("{e}\n\n{USAGE}");
            return ExitCode::from(2);
        }
    };

    if args.help {
        println!("{USAGE}");
        return ExitCode::SUCCESS;
    }

    init_logging(args.debug);

    let bridge = match args.builder().connect().await {
        Ok(bridge) => bridge,
        Err(e) => {
            error!(error = %e, "Native host unreachable, queries will fail");
            NativeBridge::detached(args.options())
        }
    };

    let mut client = QueryClient::new(bridge);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "Failed to read stdin");
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        match client.submit(&line).await {
            Ok(rendered) => println!("{rendered}"),
            Err(e) => println!("error: {e}"),
        }
    }

    info!(responses = client.log().len(), "Console closing");
    client.into_requester().close().await;
    ExitCode::SUCCESS
}

// ============================================================================
// Tests
// ============================================================================
