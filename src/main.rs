use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use page_weight::config::{DEFAULT_ACCEPT_ENCODING, DEFAULT_CONTENT_TYPES, DEFAULT_TIMEOUT_MS};
use page_weight::observe::DEFAULT_SCRIPT;
use page_weight::{
    ContentTypeFilter, MeasureConfig, MeasureError, MeasurementPipeline, PhantomObserver,
    ReplayObserver,
};

#[derive(Parser, Debug)]
#[command(name = "page-weight")]
#[command(
    version,
    about = "Measure browser-reported, on-the-wire and decoded sizes of every resource a page loads"
)]
struct Args {
    /// Page to analyze
    url: String,

    /// How long to keep the page open for dynamically loaded resources (ms)
    #[arg(short, long, default_value_t = DEFAULT_TIMEOUT_MS)]
    timeout_ms: u64,

    /// Comma-separated content-type prefixes to measure
    #[arg(short, long, default_value = DEFAULT_CONTENT_TYPES)]
    content_types: String,

    /// Accept-Encoding sent when re-fetching resources
    #[arg(short = 'e', long, default_value = DEFAULT_ACCEPT_ENCODING)]
    accept_encoding: String,

    /// Deadline for each resource fetch (ms); transport default when unset
    #[arg(long)]
    fetch_timeout_ms: Option<u64>,

    /// Maximum concurrent fetches; one per resource when unset
    #[arg(short = 'j', long)]
    max_concurrency: Option<usize>,

    /// Request each resource with the Content-Encoding the browser saw
    #[arg(long)]
    observed_encoding: bool,

    /// Only report what the browser observed; do not re-fetch resources
    #[arg(long)]
    observe_only: bool,

    /// Read recorded collector output from this file instead of running the browser
    #[arg(long, value_name = "FILE")]
    replay: Option<PathBuf>,

    /// PhantomJS binary
    #[arg(long, env = "PHANTOMJS_BIN", default_value = "phantomjs")]
    phantomjs: PathBuf,

    /// Script that prints the page's resource events as JSON
    #[arg(long, env = "PAGE_WEIGHT_SCRIPT", default_value = DEFAULT_SCRIPT)]
    script: PathBuf,
}

impl Args {
    fn config(&self) -> MeasureConfig {
        MeasureConfig::new()
            .with_timeout(Duration::from_millis(self.timeout_ms))
            .with_content_types(ContentTypeFilter::parse(&self.content_types))
            .with_accept_encoding(self.accept_encoding.clone())
            .with_fetch_timeout(self.fetch_timeout_ms.map(Duration::from_millis))
            .with_max_concurrency(self.max_concurrency)
            .with_observed_encoding(self.observed_encoding)
    }

    fn pipeline(&self) -> MeasurementPipeline {
        let pipeline = match &self.replay {
            Some(path) => MeasurementPipeline::new(ReplayObserver::new(path)),
            None => MeasurementPipeline::new(PhantomObserver::new(&self.phantomjs, &self.script)),
        };
        pipeline.with_config(self.config())
    }
}

fn run(args: &Args) -> Result<String, Box<dyn std::error::Error>> {
    let pipeline = args.pipeline();
    let json = if args.observe_only {
        serde_json::to_string_pretty(&pipeline.observe_only(&args.url)?)?
    } else {
        serde_json::to_string_pretty(&pipeline.run(&args.url)?)?
    };
    Ok(json)
}

fn main() -> ExitCode {
    env_logger::init();

    let args = Args::parse();
    log::debug!("{:?}", args);

    match run(&args) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            if let Some(e) = e.downcast_ref::<MeasureError>() {
                log::debug!("run failed in {} phase", e.phase());
            }
            eprintln!("Failed to collect resource sizes for {} - {}", args.url, e);
            ExitCode::FAILURE
        }
    }
}
