use clap::{Parser, ValueEnum};
use eyre::{Context, Result};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::OnceLock;
use tracedb::config::Config;
use tracedb::{
    load_json_file, EventDataEntry, EventIndex, EventStore, Filter, FilterResult, FrameList,
    MarkList, SortMode, StatisticsTable, TimeRangeList,
};
use tracing_subscriber::EnvFilter;

static LONG_VERSION: OnceLock<String> = OnceLock::new();

fn get_long_version() -> &'static str {
    LONG_VERSION.get_or_init(|| {
        format!(
            "{} (commit: {}, format: {})",
            env!("CARGO_PKG_VERSION"),
            env!("GIT_REVISION"),
            protocol::FORMAT_VERSION
        )
    })
}

#[derive(Clone, Copy, ValueEnum)]
enum SortArg {
    Count,
    Total,
    Mean,
    Own,
}

impl From<SortArg> for SortMode {
    fn from(sort: SortArg) -> Self {
        match sort {
            SortArg::Count => SortMode::Count,
            SortArg::Total => SortMode::TotalTime,
            SortArg::Mean => SortMode::MeanTime,
            SortArg::Own => SortMode::OwnTime,
        }
    }
}

#[derive(Parser)]
#[command(name = "tracedb")]
#[command(about = "load a json event trace and summarize it")]
#[command(version = None, long_version = get_long_version())]
struct Args {
    #[arg(help = "trace file (json)")]
    trace: String,

    #[arg(short, long, help = "configuration file path (toml format)")]
    config: Option<String>,

    #[arg(short, long, help = "filter expression, e.g. 'app#render(frame > 2) [0, 100]'")]
    filter: Option<String>,

    #[arg(short, long, value_enum, default_value = "total", help = "statistics sort order")]
    sort: SortArg,

    #[arg(long, help = "list frames")]
    frames: bool,

    #[arg(long, help = "list time ranges")]
    ranges: bool,

    #[arg(long, help = "list marks")]
    marks: bool,

    #[arg(long, value_name = "EVENT", help = "list every event of the named type")]
    index: Vec<String>,
}

fn print_entry(entry: &EventDataEntry) {
    match entry {
        EventDataEntry::Scope(scope) => println!(
            "{:<40} {:>8} {:>12.3} {:>12.3} {:>12.3}",
            scope.event_type().name(),
            scope.count(),
            scope.total_time(),
            scope.own_time(),
            scope.mean_time()
        ),
        EventDataEntry::Instance(instance) => {
            println!("{:<40} {:>8}", instance.event_type().name(), instance.count())
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load(path).with_context(|| format!("failed to load config path={path}"))?,
        None => Config::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.filter)),
        )
        .init();

    let mut store = EventStore::new(config.store.clone());
    let frames = Rc::new(RefCell::new(FrameList::new()));
    let ranges = Rc::new(RefCell::new(TimeRangeList::new()));
    let marks = Rc::new(RefCell::new(MarkList::new()));
    let index = Rc::new(RefCell::new(EventIndex::new(args.index.iter().cloned())));
    store.register_ancillary_index(frames.clone());
    store.register_ancillary_index(ranges.clone());
    store.register_ancillary_index(marks.clone());
    if !args.index.is_empty() {
        store.register_ancillary_index(index.clone());
    }

    let summary = load_json_file(&mut store, &args.trace)
        .with_context(|| format!("failed to load trace path={}", args.trace))?;
    if summary.dropped > 0 {
        tracing::warn!(dropped = summary.dropped, "some events were malformed");
    }

    println!(
        "events: {} ({} visible), types: {}, chunks: {}, time: [{}, {}], max depth: {}",
        store.count(),
        store.total_event_count(),
        store.types().len(),
        store.chunk_count(),
        store.first_event_time(),
        store.last_event_time(),
        store.maximum_scope_depth()
    );

    if args.frames {
        let frames = frames.borrow();
        println!("\nframes: {}", frames.get_count());
        for frame in frames.get_all_frames() {
            println!(
                "  #{:<6} [{:.3}, {:.3}] {:.3}",
                frame.number(),
                frame.time(),
                frame.end_time(),
                frame.duration()
            );
        }
    }

    if args.ranges {
        let ranges = ranges.borrow();
        println!("\ntime ranges: {} (levels: {})", ranges.get_count(), ranges.maximum_level());
        for range in ranges.get_all_time_ranges() {
            println!(
                "  {:indent$}{} [{:.3}, {:.3}] {}",
                "",
                range.name(),
                range.time(),
                range.end_time(),
                range.value(),
                indent = range.level() * 2
            );
        }
    }

    if args.marks {
        let marks = marks.borrow();
        println!("\nmarks: {}", marks.get_count());
        for mark in marks.get_all_marks() {
            println!(
                "  {} [{:.3}, {:.3}] {}",
                mark.name(),
                mark.time(),
                mark.end_time(),
                mark.value()
            );
        }
    }

    if !args.index.is_empty() {
        let index = index.borrow();
        println!("\n{}: {}", args.index.join(", "), index.get_count());
        for event in index.iter(&store) {
            let name = store.types().get_by_id(event.type_id()).map_or("?", |t| t.name());
            println!("  #{:<6} {:.3} {}", event.id(), event.time(), name);
        }
    }

    let mut filter = Filter::new();
    let expression = args.filter.as_deref().unwrap_or(&config.filter.default);
    if filter.set_from_string(expression) == FilterResult::Failed {
        eyre::bail!("invalid filter expression: {expression}");
    }

    let table = StatisticsTable::build(
        &store,
        store.first_event_time(),
        store.last_event_time(),
        Some(&filter),
    );
    println!(
        "\n{:<40} {:>8} {:>12} {:>12} {:>12}",
        "event", "count", "total", "own", "mean"
    );
    table.for_each(args.sort.into(), print_entry);
    println!("matched events: {}", table.get_event_count());

    Ok(())
}
