use clap::Parser;
use rawhttp::http::crawl::ImageStatus;
use rawhttp::http::{Client, HttpRequest, Method, Outcome, Uri};
use rawhttp::ClientConfig;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "rawhttp-client")]
#[command(about = "Send one HTTP/1.1 request and save what comes back", long_about = None)]
struct Cli {
    /// GET, HEAD, POST or PUT
    method: String,

    /// Target, as http://host[:port]/path
    uri: String,

    /// Overrides the port given in the URI
    port: Option<u16>,

    /// Directory downloads are written to
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// File name for the downloaded document
    #[arg(short, long)]
    target: Option<PathBuf>,

    /// Request body for POST/PUT
    #[arg(short, long, conflicts_with = "data_file")]
    data: Option<String>,

    /// Read the POST/PUT body from a file
    #[arg(long)]
    data_file: Option<PathBuf>,

    #[arg(long, default_value_t = 5)]
    timeout_secs: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rawhttp=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let method: Method = cli.method.to_ascii_uppercase().parse()?;
    let mut uri = Uri::parse(&cli.uri)?;
    if let Some(port) = cli.port {
        uri = uri.with_port(port);
    }

    let mut request = HttpRequest::for_parsed_uri(method, &uri);
    if method.has_request_body() {
        let body = match (cli.data, cli.data_file) {
            (Some(data), _) => data.into_bytes(),
            (None, Some(path)) => std::fs::read(path)?,
            (None, None) => Vec::new(),
        };
        request.set_body(body);
    }

    let config = ClientConfig {
        output_dir: cli.output_dir,
        target: cli.target,
        timeout: Duration::from_secs(cli.timeout_secs),
    };

    match Client::new(config).perform(&request)? {
        Outcome::Headers(response) => {
            print!("{}", String::from_utf8_lossy(&response.head_to_wire()));
        }
        Outcome::Saved { response, path } => {
            println!("{} -> {}", response.status(), path.display());
        }
        Outcome::Document {
            response,
            path,
            images,
        } => {
            println!("{} -> {}", response.status(), path.display());
            for image in images {
                match image.status {
                    ImageStatus::Saved(local) => println!("  {} -> {}", image.reference, local),
                    ImageStatus::Skipped(reason) => {
                        println!("  {} skipped: {}", image.reference, reason)
                    }
                    ImageStatus::Failed(reason) => {
                        eprintln!("  {} failed: {}", image.reference, reason)
                    }
                }
            }
        }
        Outcome::Confirmation { response, text } => {
            println!("{}", response.status());
            print!("{}", text);
        }
    }

    Ok(())
}
