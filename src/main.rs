use clap::{Args, Parser, Subcommand};
use discovery_locator::config::Config;
use discovery_locator::discovery::{rank_by_distance, DiscoveryClient, DiscoveryPlan};
use discovery_locator::geo::{distance_km, is_valid_coordinate};
use discovery_locator::location::providers::DEFAULT_GPSD_ADDR;
use discovery_locator::location::{
    GpsdPosition, IpApiLocator, LastKnownStrategy, LocationCache, LocationResolver,
    NominatimGeocoder, PositionProvider, ReportedPosition, Resolution,
};
use discovery_locator::policy::CountryPolicyTable;
use discovery_locator::{logging, server};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Discovery Locator: resolve the device location and pick a discovery radius.
///
/// Examples:
///   locator resolve
///   locator resolve --lat 46.8182 --lon 8.2275 --accuracy 12
///   locator resolve --gpsd --json
///   locator distance 24.7 46.7 21.4 39.8
///   locator policy sa
///   locator sync --token $DISCOVERY_TOKEN --base-url https://api.example.com
///   locator serve --port 8080
#[derive(Parser)]
#[command(name = "locator", version, about, long_about = None)]
struct Cli {
    /// Config file (default: ~/.discovery-locator/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging (RUST_LOG takes precedence).
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the GPS → reverse geocode → GeoIP chain once.
    Resolve(ResolveArgs),
    /// Great-circle distance in whole kilometres.
    Distance {
        #[arg(allow_hyphen_values = true)]
        lat1: f64,
        #[arg(allow_hyphen_values = true)]
        lon1: f64,
        #[arg(allow_hyphen_values = true)]
        lat2: f64,
        #[arg(allow_hyphen_values = true)]
        lon2: f64,
    },
    /// Show the discovery policy for a country code.
    Policy {
        /// ISO 3166-1 alpha-2 code; omitted means the global default.
        code: Option<String>,
        /// List every curated country.
        #[arg(long)]
        list: bool,
    },
    /// Resolve, push the origin to the backend and list nearby profiles.
    Sync {
        #[command(flatten)]
        resolve: ResolveArgs,
        /// Bearer token (falls back to $DISCOVERY_TOKEN).
        #[arg(long)]
        token: Option<String>,
        /// Backend base URL (falls back to [discovery] base_url).
        #[arg(long)]
        base_url: Option<String>,
    },
    /// Serve the HTTP API.
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Write the effective configuration to the config path.
    InitConfig,
}

#[derive(Args)]
struct ResolveArgs {
    /// Reported latitude (-90 to 90).
    #[arg(long, allow_hyphen_values = true, requires = "lon")]
    lat: Option<f64>,

    /// Reported longitude (-180 to 180).
    #[arg(long, allow_hyphen_values = true, requires = "lat")]
    lon: Option<f64>,

    /// Horizontal accuracy of the reported fix, in metres.
    #[arg(long)]
    accuracy: Option<f64>,

    /// Read the fix from gpsd (optionally at ADDR).
    #[arg(long, num_args = 0..=1, default_missing_value = DEFAULT_GPSD_ADDR, value_name = "ADDR")]
    gpsd: Option<String>,

    /// Skip GPS entirely, as if permission were denied.
    #[arg(long)]
    no_gps: bool,

    /// User-chosen radius in km, overriding the country default.
    #[arg(long)]
    radius: Option<u32>,

    /// Language for reverse-geocoded names (e.g. en, ar, fr).
    #[arg(long)]
    language: Option<String>,

    /// Use and update the last-known-location cache.
    #[arg(long)]
    cache: bool,

    /// Print JSON to stdout.
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct ResolveOutput {
    tier: &'static str,
    location: discovery_locator::location::ResolvedLocation,
    plan: DiscoveryPlan,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::initialize_logging(cli.verbose);

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load_from(&config_path);
    let policies = CountryPolicyTable::builtin();

    match cli.command {
        Command::Resolve(args) => {
            let (resolution, plan) = resolve_once(&args, &config, &policies).await;
            print_resolution(&resolution, &plan, args.json);
        }
        Command::Distance { lat1, lon1, lat2, lon2 } => {
            if !is_valid_coordinate(lat1, lon1) || !is_valid_coordinate(lat2, lon2) {
                eprintln!("Error: Invalid coordinates. Lat: -90..90, Lon: -180..180");
                std::process::exit(1);
            }
            println!("{} km", distance_km(lat1, lon1, lat2, lon2));
        }
        Command::Policy { code, list } => {
            if list {
                for p in policies.entries() {
                    println!("{} {}  {:<24} {:>4} km", p.flag_glyph, p.country_code, p.display_label, p.default_radius_km);
                }
                let d = policies.default_policy();
                println!("{} --  {:<24} {:>4} km", d.flag_glyph, d.display_label, d.default_radius_km);
            } else {
                let p = policies.lookup(code.as_deref());
                println!("{}", serde_json::to_string_pretty(p).unwrap_or_default());
            }
        }
        Command::Sync { resolve, token, base_url } => {
            sync(&resolve, token, base_url, &config, &policies).await;
        }
        Command::Serve { host, port } => {
            server::start(&host, port, config).await;
        }
        Command::InitConfig => {
            if let Err(e) = config.write_to(&config_path) {
                eprintln!("Error: Could not write {}: {}", config_path.display(), e);
                std::process::exit(1);
            }
            eprintln!("  Wrote {}", config_path.display());
        }
    }
}

fn position_provider(args: &ResolveArgs, config: &Config) -> Result<Arc<dyn PositionProvider>, String> {
    if args.no_gps {
        return Ok(Arc::new(ReportedPosition::denied()));
    }
    // Priority: explicit fix > --gpsd > configured gpsd > no GPS
    if let (Some(lat), Some(lon)) = (args.lat, args.lon) {
        if !is_valid_coordinate(lat, lon) {
            return Err("Invalid coordinates. Lat: -90..90, Lon: -180..180".into());
        }
        return Ok(Arc::new(ReportedPosition::new(lat, lon, args.accuracy)));
    }
    Ok(match args.gpsd.as_ref().or(config.positioning.gpsd_addr.as_ref()) {
        Some(addr) => Arc::new(GpsdPosition::new(addr.clone())),
        None => Arc::new(ReportedPosition::denied()),
    })
}

async fn resolve_once(
    args: &ResolveArgs,
    config: &Config,
    policies: &CountryPolicyTable,
) -> (Resolution, DiscoveryPlan) {
    let mut config = config.clone();
    if let Some(lang) = &args.language {
        config.geocoding.language = lang.clone();
    }

    let position = position_provider(args, &config).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });
    let mut resolver = LocationResolver::standard(
        &config,
        position,
        Arc::new(NominatimGeocoder::from_config(&config.geocoding)),
        Arc::new(IpApiLocator::from_config(&config.geoip, &config.geocoding.user_agent)),
    );

    let use_cache = args.cache || config.cache.enabled;
    let mut cache = use_cache.then(|| LocationCache::load_from(config.cache_path()));
    if let Some(cache) = &cache {
        resolver = resolver.with_strategy(LastKnownStrategy::from_cache(cache));
    }
    debug!(strategies = ?resolver.strategy_names(), "resolver ready");

    let resolution = resolver.resolve().await;
    if let Some(cache) = cache.as_mut() {
        cache.put(&resolution);
    }

    let plan = DiscoveryPlan::from_resolution(&resolution, policies, args.radius);
    (resolution, plan)
}

fn print_resolution(resolution: &Resolution, plan: &DiscoveryPlan, json: bool) {
    let location = resolution.to_resolved();
    eprintln!("  {}", location.display_line());
    eprintln!(
        "  {} {} \u{2014} radius {} km{}",
        plan.policy.flag_glyph,
        plan.policy.display_label,
        plan.radius_km,
        if plan.overridden { " (user override)" } else { "" },
    );
    if matches!(resolution, Resolution::NoData) {
        eprintln!("  \u{26A0}\u{FE0F}  Location unknown. Enter a location manually or keep the global radius.");
    }

    if json {
        let output = ResolveOutput {
            tier: resolution.tier(),
            location,
            plan: plan.clone(),
        };
        match serde_json::to_string_pretty(&output) {
            Ok(s) => println!("{}", s),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

async fn sync(
    args: &ResolveArgs,
    token: Option<String>,
    base_url: Option<String>,
    config: &Config,
    policies: &CountryPolicyTable,
) {
    let token = token
        .or_else(|| std::env::var("DISCOVERY_TOKEN").ok())
        .unwrap_or_else(|| {
            eprintln!("Error: No token. Use --token or set DISCOVERY_TOKEN.");
            std::process::exit(1);
        });
    let base_url = base_url
        .or_else(|| config.discovery.base_url.clone())
        .unwrap_or_else(|| {
            eprintln!("Error: No backend URL. Use --base-url or set [discovery] base_url.");
            std::process::exit(1);
        });

    let (resolution, plan) = resolve_once(args, config, policies).await;
    print_resolution(&resolution, &plan, false);

    let client = DiscoveryClient::new(&base_url, token, Duration::from_secs(config.discovery.timeout_secs));
    let radius = plan.radius_km;
    let origin = plan.origin;

    // ureq is blocking; keep it off the async workers.
    let result = tokio::task::spawn_blocking(move || {
        if let Some(origin) = &origin {
            client.update_location(origin)?;
        }
        client.discover(radius)
    })
    .await;

    let profiles = match result {
        Ok(Ok(p)) => p,
        Ok(Err(e)) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let ranked = match &plan.origin {
        Some(origin) => rank_by_distance(profiles, origin, radius),
        None => profiles,
    };

    match serde_json::to_string_pretty(&ranked) {
        Ok(s) => println!("{}", s),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
