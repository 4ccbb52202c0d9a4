use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use scanbus::protocol::{ControlMessage, ControlResponse, ResponseStatus};
use scanbus::{
    Band, ChannelCatalog, ReportEvents, ScanRequest, ScanScheduler, ScanScope, Schedule, SchedulerConfig,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "7070";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("scanbus")
        .version("0.1.0")
        .author("Radio Systems Engineering Team")
        .about("📡 Background scan scheduler - plan and inspect radio scan schedules")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("host")
                .short("h")
                .long("host")
                .value_name("HOST")
                .help("Scan service host address")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Scan service port")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table"])
                .default_value("table")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("plan")
                .about("🗓️  Compute a schedule offline from a JSON array of scan requests")
                .arg(
                    Arg::with_name("requests")
                        .help("File holding a JSON array of scan requests")
                        .required(true),
                )
                .arg(
                    Arg::with_name("config")
                        .short("c")
                        .long("config")
                        .value_name("FILE")
                        .help("Scheduler configuration (JSON)")
                        .takes_value(true),
                ),
        )
        .subcommand(SubCommand::with_name("periods").about("⏱️  Show the legal bucket period table"))
        .subcommand(
            SubCommand::with_name("channels")
                .about("📻 Show the channel catalog")
                .arg(
                    Arg::with_name("band")
                        .help("Band to expand")
                        .possible_values(&["all", "24", "5", "dfs", "5-dfs", "both", "both-dfs"])
                        .default_value("all"),
                ),
        )
        .subcommand(
            SubCommand::with_name("register")
                .about("➕ Register a scan request with the service")
                .arg(
                    Arg::with_name("client")
                        .long("client")
                        .value_name("TAG")
                        .help("Client tag")
                        .takes_value(true)
                        .required(true),
                )
                .arg(
                    Arg::with_name("period")
                        .long("period")
                        .value_name("MS")
                        .help("Scan period in milliseconds")
                        .takes_value(true)
                        .required(true)
                        .validator(|v| match v.parse::<u32>() {
                            Ok(p) if p > 0 => Ok(()),
                            _ => Err("Period must be a positive number of milliseconds".into()),
                        }),
                )
                .arg(
                    Arg::with_name("band")
                        .long("band")
                        .value_name("BAND")
                        .help("Band to scan")
                        .takes_value(true)
                        .possible_values(&["all", "24", "5", "dfs", "5-dfs", "both", "both-dfs"])
                        .conflicts_with("channels"),
                )
                .arg(
                    Arg::with_name("channels")
                        .long("channels")
                        .value_name("MHZ,...")
                        .help("Comma separated frequencies")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("max-period")
                        .long("max-period")
                        .value_name("MS")
                        .help("Exponential backoff ceiling")
                        .takes_value(true)
                        .requires("steps"),
                )
                .arg(
                    Arg::with_name("steps")
                        .long("steps")
                        .value_name("N")
                        .help("Backoff step count")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("cache")
                        .long("cache")
                        .value_name("SCANS")
                        .help("Max scans to cache before reporting")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("bssids")
                        .long("bssids")
                        .value_name("N")
                        .help("Max access points per scan")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("full-results")
                        .long("full-results")
                        .help("Report every full scan result"),
                )
                .arg(
                    Arg::with_name("no-batch")
                        .long("no-batch")
                        .help("Do not batch results"),
                ),
        )
        .subcommand(
            SubCommand::with_name("unregister")
                .about("➖ Remove a registered scan request")
                .arg(Arg::with_name("id").help("Request id").required(true)),
        )
        .subcommand(SubCommand::with_name("schedule").about("📋 Show the service's current schedule"))
        .subcommand(SubCommand::with_name("limits").about("📏 Show the service's scheduler limits"))
        .subcommand(SubCommand::with_name("stats").about("📈 Show registry statistics"))
        .get_matches();

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST);
    let port = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse::<u16>()?;
    let json = matches.value_of("format") == Some("json");

    match matches.subcommand() {
        ("plan", Some(sub)) => plan(sub, json)?,
        ("periods", Some(_)) => show_periods(json)?,
        ("channels", Some(sub)) => show_channels(sub, json)?,
        ("register", Some(sub)) => {
            let message = build_register(sub)?;
            send_and_print(host, port, message, json).await?;
        }
        ("unregister", Some(sub)) => {
            let id = sub.value_of("id").unwrap_or_default().parse()?;
            send_and_print(host, port, ControlMessage::Unregister { id }, json).await?;
        }
        ("schedule", Some(_)) => send_and_print(host, port, ControlMessage::GetSchedule, json).await?,
        ("limits", Some(_)) => send_and_print(host, port, ControlMessage::GetLimits, json).await?,
        ("stats", Some(_)) => send_and_print(host, port, ControlMessage::GetStats, json).await?,
        _ => {}
    }

    Ok(())
}

fn parse_band(name: &str) -> Band {
    match name {
        "24" => Band::BAND_24_GHZ,
        "5" => Band::BAND_5_GHZ,
        "dfs" => Band::BAND_5_GHZ_DFS_ONLY,
        "5-dfs" => Band::BAND_5_GHZ_WITH_DFS,
        "both" => Band::BAND_BOTH,
        "both-dfs" => Band::BAND_BOTH_WITH_DFS,
        _ => Band::UNSPECIFIED,
    }
}

fn plan(sub: &ArgMatches, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = match sub.value_of("config") {
        Some(path) => SchedulerConfig::from_file(path)?,
        None => SchedulerConfig::default(),
    };
    let path = sub.value_of("requests").unwrap_or_default();
    let requests: Vec<ScanRequest> = serde_json::from_str(&std::fs::read_to_string(path)?)?;

    let mut scheduler = ScanScheduler::with_config(&config)?;
    scheduler.update_schedule(&requests);

    if json {
        println!("{}", serde_json::to_string_pretty(scheduler.schedule())?);
        return Ok(());
    }

    print_schedule(scheduler.schedule());
    println!();
    println!("{}", "Request placement".bright_blue().bold());
    for (index, request) in requests.iter().enumerate() {
        let placement = match scheduler.bucket_index_for_request(index) {
            Some(bucket) => format!("bucket {}", bucket).green(),
            None => "not scheduled".red(),
        };
        println!(
            "  #{:<3} {:>9}ms {:<24} -> {}",
            index,
            request.period_ms,
            request.scope.to_string(),
            placement
        );
    }
    Ok(())
}

fn show_periods(json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let scheduler = ScanScheduler::new();
    let entries = scheduler.period_table().entries();
    if json {
        println!("{}", serde_json::to_string(entries)?);
        return Ok(());
    }
    println!(
        "{} (version {})",
        "Bucket period table".bright_blue().bold(),
        scanbus::periods::PERIOD_TABLE_VERSION
    );
    for period in entries {
        println!("  {:>10} ms  ({} s)", period, period / 1000);
    }
    Ok(())
}

fn show_channels(sub: &ArgMatches, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let scheduler = ScanScheduler::new();
    let band = parse_band(sub.value_of("band").unwrap_or("all"));
    let frequencies = scheduler.catalog().expand_band(band);
    if json {
        println!("{}", serde_json::to_string(&frequencies)?);
        return Ok(());
    }
    println!("{} {}", "Channels for".bright_blue().bold(), band.to_string().bold());
    for freq in frequencies {
        println!("  {} MHz  [{}]", freq, scheduler.catalog().band_of(freq));
    }
    Ok(())
}

fn build_register(sub: &ArgMatches) -> Result<ControlMessage, Box<dyn std::error::Error>> {
    let scope = match sub.value_of("channels") {
        Some(list) => {
            let channels = list
                .split(',')
                .map(|c| c.trim().parse::<u32>())
                .collect::<Result<Vec<_>, _>>()?;
            ScanScope::Channels(channels)
        }
        None => ScanScope::Band(parse_band(sub.value_of("band").unwrap_or("all"))),
    };
    let period_ms = sub.value_of("period").unwrap_or_default().parse::<u32>()?;

    let mut events = ReportEvents::EACH_SCAN;
    if sub.is_present("full-results") {
        events |= ReportEvents::FULL_RESULTS;
    }
    if sub.is_present("no-batch") {
        events |= ReportEvents::NO_BATCH;
    }

    let mut request = ScanRequest::new(scope, period_ms).with_report_events(events);
    if let Some(max_period) = sub.value_of("max-period") {
        let steps = sub.value_of("steps").unwrap_or("0").parse::<u32>()?;
        request = request.with_backoff(max_period.parse()?, steps);
    }
    if let Some(cache) = sub.value_of("cache") {
        request = request.with_max_scans_to_cache(cache.parse()?);
    }
    if let Some(bssids) = sub.value_of("bssids") {
        request = request.with_num_bssids_per_scan(bssids.parse()?);
    }

    Ok(ControlMessage::Register {
        client: sub.value_of("client").unwrap_or_default().to_string(),
        request,
    })
}

async fn send_and_print(
    host: &str,
    port: u16,
    message: ControlMessage,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = send_message(host, port, &message).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    let status = match response.status {
        ResponseStatus::Success => "✓ SUCCESS".green().bold(),
        ResponseStatus::Rejected => "✗ REJECTED".red().bold(),
        ResponseStatus::NotFound => "? NOT FOUND".yellow().bold(),
        ResponseStatus::InvalidMessage => "✗ INVALID".red().bold(),
        ResponseStatus::ScheduleUpdate => "↻ UPDATE".cyan().bold(),
    };
    println!("{}", status);
    if let Some(id) = response.request_id {
        println!("  request id: {}", id.to_string().bold());
    }
    if let Some(message) = &response.message {
        println!("  {}", message);
    }
    if let Some(schedule) = &response.schedule {
        print_schedule(schedule);
    }
    if let Some(limits) = &response.limits {
        println!("  max buckets:      {}", limits.max_buckets);
        println!("  max channels:     {}", limits.max_channels);
        println!("  max batch:        {}", limits.max_batch);
        println!("  max AP per scan:  {}", limits.max_ap_per_scan);
        println!("  idle period:      {} ms", limits.idle_period_ms);
    }
    if let Some(stats) = &response.stats {
        println!("  registered now:   {}", stats.currently_registered);
        println!("  total registered: {}", stats.total_registered);
        println!("  total rejected:   {}", stats.total_rejected);
        println!("  recomputes:       {}", stats.recomputes);
        println!("  schedule changes: {}", stats.schedule_changes);
    }
    Ok(())
}

/// Sends one message and waits for its reply, skipping schedule pushes.
async fn send_message(
    host: &str,
    port: u16,
    message: &ControlMessage,
) -> Result<ControlResponse, Box<dyn std::error::Error>> {
    let stream = TcpStream::connect(format!("{}:{}", host, port)).await?;
    let (reader, mut writer) = stream.into_split();

    writer.write_all(serde_json::to_string(message)?.as_bytes()).await?;
    writer.write_all(b"\n").await?;

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        let response: ControlResponse = serde_json::from_str(&line)?;
        if !response.is_push() {
            return Ok(response);
        }
    }
    Err("connection closed before a response arrived".into())
}

fn print_schedule(schedule: &Schedule) {
    println!(
        "{}  base {} ms, {} bucket(s), {} AP/scan, report every {} scan(s)",
        "Schedule".bright_blue().bold(),
        schedule.base_period_ms,
        schedule.bucket_count(),
        schedule.max_ap_per_scan,
        schedule.report_threshold_num_scans
    );
    if schedule.is_empty() {
        println!("  {}", "(idle)".dimmed());
        return;
    }
    for (index, bucket) in schedule.buckets.iter().enumerate() {
        let backoff = if bucket.is_exponential() {
            format!(" backoff to {} ms over {} steps", bucket.max_period_ms, bucket.step_count)
        } else {
            String::new()
        };
        println!(
            "  [{}] every {:>9} ms  {:<28} {}{}",
            index,
            bucket.period_ms,
            bucket.scope.to_string(),
            bucket.report_events.to_string().cyan(),
            backoff.yellow()
        );
    }
}
